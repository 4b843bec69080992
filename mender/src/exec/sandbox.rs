//! Stateless sandboxed execution: one snippet, one scratch directory, one
//! OS process per call.
//!
//! Every call allocates a fresh uniquely-named scratch directory (the
//! randomized suffix is the collision discriminator across concurrent
//! calls), materializes the source under the language's conventional entry
//! filename, optionally compiles, runs under a hard wall-clock timeout, and
//! classifies the exit. The scratch directory is owned by a guard and is
//! removed on every exit path, including faults. Faults raised anywhere in
//! prepare/compile/run are caught at this boundary and converted into
//! `Failed` outcomes; a missing toolchain binary is deliberately
//! indistinguishable from a genuine failure.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::exec::process::{ProcessOutput, run_with_timeout};
use crate::exec::toolchain::{Language, Toolchain, ToolchainMap, fill};
use crate::exec::{ExecOutcome, SnippetExecutor, clip};

/// Default bound on diagnostic text fed back into generation.
pub const DEFAULT_KEEP_BYTES: usize = 2_000;
/// Default bound on raw output captured from the child.
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 100_000;

/// Execute one snippet with the built-in toolchain table.
///
/// Infallible by contract: internal faults become `Failed` outcomes. The only
/// configuration fault (`UnsupportedLanguage`) cannot occur here because
/// `lang` is already a parsed tag and the default table is total.
pub fn execute(source: &str, lang: Language, timeout: Duration) -> ExecOutcome {
    SandboxExecutor::new(lang, timeout).execute_blocking(source)
}

/// Sandbox executor configured for one language.
#[derive(Debug, Clone)]
pub struct SandboxExecutor {
    lang: Language,
    timeout: Duration,
    toolchains: ToolchainMap,
    scratch_root: Option<PathBuf>,
    keep_bytes: usize,
    output_limit_bytes: usize,
}

impl SandboxExecutor {
    pub fn new(lang: Language, timeout: Duration) -> Self {
        Self {
            lang,
            timeout,
            toolchains: ToolchainMap::default(),
            scratch_root: None,
            keep_bytes: DEFAULT_KEEP_BYTES,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
        }
    }

    /// Override the toolchain table (TOML-loaded or extended).
    pub fn with_toolchains(mut self, toolchains: ToolchainMap) -> Self {
        self.toolchains = toolchains;
        self
    }

    /// Create scratch directories under `root` instead of the system temp
    /// dir. Tests use this to observe that scratch space is reclaimed.
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    pub fn with_keep_bytes(mut self, keep_bytes: usize) -> Self {
        self.keep_bytes = keep_bytes;
        self
    }

    pub fn with_output_limit_bytes(mut self, output_limit_bytes: usize) -> Self {
        self.output_limit_bytes = output_limit_bytes;
        self
    }

    /// Execute one snippet, blocking the calling thread for up to the
    /// configured timeout (enforced on the child process itself).
    #[instrument(skip_all, fields(lang = %self.lang, timeout_secs = self.timeout.as_secs()))]
    pub fn execute_blocking(&self, source: &str) -> ExecOutcome {
        match self.try_execute(source) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(err = %err, "sandbox fault converted to failure");
                ExecOutcome::failed(format!("execution error: {err:#}"))
            }
        }
    }

    fn try_execute(&self, source: &str) -> Result<ExecOutcome> {
        let toolchain = self.toolchains.get(self.lang)?.clone();

        // Scratch ownership: `TempDir` removes the directory when this
        // function returns, whatever the exit path.
        let mut builder = tempfile::Builder::new();
        let prefix = format!("mender-{}-", self.lang);
        builder.prefix(&prefix);
        let scratch = match &self.scratch_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .context("create scratch directory")?;
        let dir = scratch.path();

        self.prepare(source, &toolchain, dir)?;

        if let Some(compile) = &toolchain.compile {
            let output = self.run_step(compile, &toolchain, dir)?;
            if output.timed_out {
                return Ok(ExecOutcome::timed_out(format!(
                    "timed out: compilation exceeded {}s",
                    self.timeout.as_secs()
                )));
            }
            if !output.status.success() {
                debug!(exit_code = ?output.status.code(), "compile step failed, skipping run");
                return Ok(ExecOutcome::failed_with_output(
                    clip(&output.stderr_or_stdout(), self.keep_bytes, true),
                    output.combined(),
                ));
            }
        }

        let output = self.run_step(&toolchain.run, &toolchain, dir)?;
        Ok(self.classify(&output))
    }

    fn prepare(&self, source: &str, toolchain: &Toolchain, dir: &Path) -> Result<()> {
        let entry = dir.join(&toolchain.entry_file);
        fs::write(&entry, source).with_context(|| format!("write {}", entry.display()))?;
        if toolchain.executable_entry {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&entry, fs::Permissions::from_mode(0o755))
                    .with_context(|| format!("chmod {}", entry.display()))?;
            }
        }
        Ok(())
    }

    fn run_step(
        &self,
        template: &[String],
        toolchain: &Toolchain,
        dir: &Path,
    ) -> Result<ProcessOutput> {
        let argv: Vec<String> = template
            .iter()
            .map(|arg| fill(arg, &toolchain.entry_file, dir, self.timeout))
            .collect();
        // Empty commands are constructible through the TOML override; the
        // boundary converts this into a Failed outcome, never a panic.
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| anyhow!("toolchain for {} has an empty command", self.lang))?;
        debug!(argv = ?argv, "running sandbox step");
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(dir);
        run_with_timeout(cmd, self.timeout, self.output_limit_bytes)
    }

    fn classify(&self, output: &ProcessOutput) -> ExecOutcome {
        if output.timed_out {
            return ExecOutcome::timed_out(format!(
                "timed out: execution exceeded {}s",
                self.timeout.as_secs()
            ));
        }
        if output.status.success() {
            return ExecOutcome::passed(clip(&output.combined(), self.keep_bytes, false));
        }
        ExecOutcome::failed_with_output(
            clip(&output.stderr_or_stdout(), self.keep_bytes, true),
            output.combined(),
        )
    }
}

#[async_trait]
impl SnippetExecutor for SandboxExecutor {
    /// Bridge the blocking sandbox call onto the async scheduler without
    /// stalling unrelated tasks.
    async fn execute(&mut self, source: &str) -> ExecOutcome {
        let executor = self.clone();
        let source = source.to_string();
        match tokio::task::spawn_blocking(move || executor.execute_blocking(&source)).await {
            Ok(outcome) => outcome,
            Err(err) => ExecOutcome::failed(format!("execution error: sandbox task failed: {err}")),
        }
    }
}
