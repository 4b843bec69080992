//! Persistent interactive execution kernel.
//!
//! Runs Python units against one long-lived interpreter session so variables
//! and imports persist across calls, unlike the always-fresh sandbox. The
//! session is a driver subprocess (embedded script, newline-delimited JSON
//! protocol) with an explicit lifecycle:
//!
//! ```text
//! Unbuilt --build--> Running --terminate--> Unbuilt
//! Running --fatal crash--> Dead --reset--> Running
//! ```
//!
//! A timed-out unit is cancelled with SIGINT rather than by killing the
//! process, so session state survives where possible. A dead kernel is
//! rebuilt transparently; the caller sees exactly one
//! `Failed("kernel died, restarted")` and resubmits.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use base64::Engine;
use regex::Regex;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, instrument, warn};

use crate::exec::{ExecOutcome, SnippetExecutor, clip};

const DRIVER: &str = include_str!("kernel_driver.py");

/// Pause between terminating and rebuilding a kernel, and after an
/// interrupt, giving the interpreter time to settle.
const RESTART_PAUSE: Duration = Duration::from_secs(1);
/// How long to wait for the interrupted unit's reply when resynchronizing
/// the protocol after a timeout.
const DRAIN_GRACE: Duration = Duration::from_secs(3);

static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;]*[mK]").expect("ansi escape pattern should be valid")
});

const COROUTINE_HINT: &str = "error: the unit produced an un-awaited coroutine; call async \
                              functions with `await` (e.g. `await main()`)";

/// Lifecycle state of the kernel session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelState {
    Unbuilt,
    Running,
    Dead,
}

/// One source fragment submitted to the session.
#[derive(Debug, Clone)]
pub struct ExecutedUnit {
    pub source: String,
    pub passed: bool,
}

/// Typed outputs in a driver reply, mirroring notebook output kinds.
#[derive(Debug, Deserialize)]
#[serde(tag = "output_type", rename_all = "snake_case")]
enum Output {
    Stream {
        name: String,
        text: String,
    },
    ExecuteResult {
        text: String,
    },
    Error {
        ename: String,
        #[allow(dead_code)]
        evalue: String,
        traceback: Vec<String>,
    },
    DisplayData {
        data: BTreeMap<String, String>,
    },
}

#[derive(Debug, Deserialize)]
struct Reply {
    outputs: Vec<Output>,
}

struct KernelProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

/// Stateful executor holding one interactive session.
pub struct InteractiveKernel {
    state: KernelState,
    process: Option<KernelProcess>,
    timeout: Duration,
    keep_bytes: usize,
    python: String,
    artifacts_dir: Option<PathBuf>,
    units: Vec<ExecutedUnit>,
}

impl InteractiveKernel {
    /// A kernel that will build lazily on first use.
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: KernelState::Unbuilt,
            process: None,
            timeout,
            keep_bytes: crate::exec::sandbox::DEFAULT_KEEP_BYTES,
            python: "python3".to_string(),
            artifacts_dir: None,
            units: Vec::new(),
        }
    }

    /// Override the interpreter binary (e.g. a venv path).
    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }

    /// Directory for out-of-band rich output (decoded images). When unset,
    /// image payloads are dropped after logging.
    pub fn with_artifacts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifacts_dir = Some(dir.into());
        self
    }

    pub fn with_keep_bytes(mut self, keep_bytes: usize) -> Self {
        self.keep_bytes = keep_bytes;
        self
    }

    pub fn state(&self) -> KernelState {
        self.state
    }

    /// Append-only log of units submitted to this session.
    pub fn units(&self) -> &[ExecutedUnit] {
        &self.units
    }

    /// Record a prose unit (commentary between code units) in the session log
    /// without executing anything. Prose always passes.
    pub fn note(&mut self, text: &str) {
        self.units.push(ExecutedUnit {
            source: text.to_string(),
            passed: true,
        });
    }

    /// Spawn the driver subprocess.
    async fn build(&mut self) -> Result<()> {
        debug!(python = %self.python, "building kernel");
        let mut child = Command::new(&self.python)
            .arg("-u")
            .arg("-c")
            .arg(DRIVER)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawn kernel interpreter {}", self.python))?;
        let stdin = child.stdin.take().ok_or_else(|| anyhow!("kernel stdin was not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("kernel stdout was not piped"))?;
        self.process = Some(KernelProcess {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        });
        self.state = KernelState::Running;
        info!("kernel running");
        Ok(())
    }

    /// Kill the driver and reap it. The session returns to `Unbuilt`.
    pub async fn terminate(&mut self) -> Result<()> {
        if let Some(mut process) = self.process.take() {
            debug!("terminating kernel");
            process.child.start_kill().context("kill kernel")?;
            process.child.wait().await.context("reap kernel")?;
        }
        self.state = KernelState::Unbuilt;
        Ok(())
    }

    /// Full restart: terminate, pause, build. Session variables are lost.
    pub async fn reset(&mut self) -> Result<()> {
        self.terminate().await?;
        tokio::time::sleep(RESTART_PAUSE).await;
        self.build().await
    }

    /// Run one unit against the session, suspending only the caller.
    ///
    /// Builds the kernel lazily, enforces the per-call timeout with a
    /// cooperative interrupt, and converts every fault into an outcome.
    #[instrument(skip_all, fields(timeout_secs = self.timeout.as_secs()))]
    pub async fn run(&mut self, source: &str) -> ExecOutcome {
        if self.state != KernelState::Running {
            if let Err(err) = self.build().await {
                warn!(err = %err, "kernel build failed");
                let outcome = ExecOutcome::failed(format!("kernel build failed: {err:#}"));
                self.record(source, &outcome);
                return outcome;
            }
        }
        let outcome = self.run_unit(source).await;
        self.record(source, &outcome);
        outcome
    }

    fn record(&mut self, source: &str, outcome: &ExecOutcome) {
        self.units.push(ExecutedUnit {
            source: source.to_string(),
            passed: outcome.is_passed(),
        });
    }

    async fn run_unit(&mut self, source: &str) -> ExecOutcome {
        let request = match serde_json::to_string(&serde_json::json!({ "source": source })) {
            Ok(request) => request,
            Err(err) => return ExecOutcome::failed(format!("encode kernel request: {err}")),
        };

        if self.send_line(&request).await.is_err() {
            return self.died_and_restart().await;
        }

        match tokio::time::timeout(self.timeout, self.read_reply()).await {
            Err(_) => self.interrupt_after_timeout().await,
            Ok(Err(_)) => self.died_and_restart().await,
            Ok(Ok(line)) => self.classify_reply(source, &line),
        }
    }

    async fn send_line(&mut self, line: &str) -> Result<()> {
        let process = self.process.as_mut().ok_or_else(|| anyhow!("kernel not running"))?;
        process.stdin.write_all(line.as_bytes()).await?;
        process.stdin.write_all(b"\n").await?;
        process.stdin.flush().await?;
        Ok(())
    }

    /// Next protocol line; `Err` means the kernel is gone (EOF or I/O error).
    async fn read_reply(&mut self) -> Result<String> {
        let process = self.process.as_mut().ok_or_else(|| anyhow!("kernel not running"))?;
        match process.stdout.next_line().await {
            Ok(Some(line)) => Ok(line),
            Ok(None) => Err(anyhow!("kernel closed its output")),
            Err(err) => Err(err).context("read kernel reply"),
        }
    }

    /// Unrecoverable kernel death: full reset, report once, caller resubmits.
    async fn died_and_restart(&mut self) -> ExecOutcome {
        warn!("kernel died, restarting");
        self.state = KernelState::Dead;
        if let Err(err) = self.reset().await {
            return ExecOutcome::failed(format!("kernel died, restart failed: {err:#}"));
        }
        ExecOutcome::failed("kernel died, restarted")
    }

    /// Cancel a stuck unit with SIGINT (not a kill) so the session survives,
    /// then drain the interrupted unit's reply to resynchronize the protocol.
    async fn interrupt_after_timeout(&mut self) -> ExecOutcome {
        warn!(timeout_secs = self.timeout.as_secs(), "unit timed out, interrupting kernel");
        self.interrupt();
        tokio::time::sleep(RESTART_PAUSE).await;
        match tokio::time::timeout(DRAIN_GRACE, self.read_reply()).await {
            Ok(Ok(_)) => debug!("drained interrupted unit reply"),
            _ => {
                // Interrupt landed outside the unit or the kernel is gone:
                // rebuild so the next call starts from a live session.
                warn!("kernel did not settle after interrupt, restarting");
                self.state = KernelState::Dead;
                if let Err(err) = self.reset().await {
                    warn!(err = %err, "kernel restart after interrupt failed");
                }
            }
        }
        ExecOutcome::timed_out(format!(
            "timed out: code execution exceeded {}s and was interrupted",
            self.timeout.as_secs()
        ))
    }

    /// Send SIGINT to the driver. Shelling out keeps this crate free of
    /// unsafe signal calls; failure is logged and handled by the drain path.
    fn interrupt(&self) {
        let Some(pid) = self.process.as_ref().and_then(|p| p.child.id()) else {
            return;
        };
        match std::process::Command::new("kill")
            .arg("-INT")
            .arg(pid.to_string())
            .status()
        {
            Ok(status) if status.success() => debug!(pid, "interrupted kernel"),
            Ok(status) => warn!(pid, ?status, "kernel interrupt command failed"),
            Err(err) => warn!(pid, err = %err, "could not run interrupt command"),
        }
    }

    fn classify_reply(&mut self, source: &str, line: &str) -> ExecOutcome {
        let reply: Reply = match serde_json::from_str(line) {
            Ok(reply) => reply,
            Err(err) => {
                // Partial or garbled reply: surface what we captured rather
                // than propagating a fault.
                return ExecOutcome::failed(format!(
                    "malformed kernel reply ({err}): {}",
                    clip(line, self.keep_bytes, true)
                ));
            }
        };
        let (passed, text) = self.parse_outputs(&reply.outputs);
        if passed && source.contains("!pip") {
            // Recurring generation mistake: installing packages inside the
            // session. Force a failure so the next round removes it.
            return ExecOutcome::failed(
                "package installation (`!pip`) is not allowed inside the execution session; \
                 write plain code that uses the standard library",
            );
        }
        if passed {
            ExecOutcome::passed(text)
        } else {
            ExecOutcome::failed_with_output(text.clone(), text)
        }
    }

    /// Classify typed outputs into pass/fail plus bounded feedback text.
    ///
    /// Stream output is concatenated verbatim; result reprs are appended;
    /// images are rendered out of band and never affect pass/fail; an error
    /// marks the unit failed with the trimmed traceback; a coroutine repr is
    /// a deliberate guard against un-awaited async calls.
    fn parse_outputs(&mut self, outputs: &[Output]) -> (bool, String) {
        let mut passed = true;
        let mut parts: Vec<String> = Vec::new();
        for output in outputs {
            match output {
                Output::Stream { name, text } => {
                    debug!(stream = %name, bytes = text.len(), "stream output");
                    if text.contains("<coroutine object") {
                        passed = false;
                        parts.push(COROUTINE_HINT.to_string());
                    } else {
                        parts.push(strip_ansi(text));
                    }
                }
                Output::ExecuteResult { text } => {
                    if text.contains("<coroutine object") {
                        passed = false;
                        parts.push(COROUTINE_HINT.to_string());
                    } else {
                        parts.push(strip_ansi(text));
                    }
                }
                Output::Error { ename, traceback, .. } => {
                    debug!(error = %ename, "error output");
                    passed = false;
                    parts.push(strip_ansi(&traceback.join("\n")));
                }
                Output::DisplayData { data } => {
                    if let Some(payload) = data.get("image/png") {
                        self.save_image(payload);
                    }
                }
            }
        }
        let text = parts.join(",");
        (passed, clip(&text, self.keep_bytes, !passed))
    }

    fn save_image(&self, payload: &str) {
        let Some(dir) = &self.artifacts_dir else {
            debug!("image output dropped (no artifacts dir configured)");
            return;
        };
        let bytes = match base64::engine::general_purpose::STANDARD.decode(payload) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(err = %err, "could not decode image output");
                return;
            }
        };
        let path = dir.join(format!("unit-{}.png", self.units.len()));
        if let Err(err) = std::fs::create_dir_all(dir).and_then(|()| std::fs::write(&path, &bytes))
        {
            warn!(err = %err, "could not write image artifact");
        } else {
            info!(path = %path.display(), "image output written");
        }
    }
}

#[async_trait]
impl SnippetExecutor for InteractiveKernel {
    async fn execute(&mut self, source: &str) -> ExecOutcome {
        self.run(source).await
    }
}

fn strip_ansi(text: &str) -> String {
    ANSI_ESCAPE.replace_all(text, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::ExecStatus;

    fn kernel() -> InteractiveKernel {
        InteractiveKernel::new(Duration::from_secs(5))
    }

    #[test]
    fn new_kernel_starts_unbuilt() {
        let kernel = kernel();
        assert_eq!(kernel.state(), KernelState::Unbuilt);
        assert!(kernel.units().is_empty());
    }

    #[test]
    fn notes_are_logged_without_execution() {
        let mut kernel = kernel();
        kernel.note("analysis of the previous failure");
        assert_eq!(kernel.state(), KernelState::Unbuilt);
        assert_eq!(kernel.units().len(), 1);
        assert!(kernel.units()[0].passed);
    }

    #[test]
    fn parse_outputs_concatenates_streams() {
        let mut kernel = kernel();
        let outputs = vec![
            Output::Stream {
                name: "stdout".to_string(),
                text: "hello".to_string(),
            },
            Output::ExecuteResult {
                text: "42".to_string(),
            },
        ];
        let (passed, text) = kernel.parse_outputs(&outputs);
        assert!(passed);
        assert_eq!(text, "hello,42");
    }

    #[test]
    fn parse_outputs_marks_error_failed_and_strips_ansi() {
        let mut kernel = kernel();
        let outputs = vec![Output::Error {
            ename: "ValueError".to_string(),
            evalue: "bad".to_string(),
            traceback: vec![
                "\u{1b}[31mTraceback\u{1b}[0m".to_string(),
                "ValueError: bad".to_string(),
            ],
        }];
        let (passed, text) = kernel.parse_outputs(&outputs);
        assert!(!passed);
        assert!(text.contains("Traceback"));
        assert!(text.contains("ValueError: bad"));
        assert!(!text.contains('\u{1b}'));
    }

    #[test]
    fn parse_outputs_guards_unawaited_coroutines() {
        let mut kernel = kernel();
        let outputs = vec![Output::ExecuteResult {
            text: "<coroutine object main at 0x7f>".to_string(),
        }];
        let (passed, text) = kernel.parse_outputs(&outputs);
        assert!(!passed);
        assert!(text.contains("await"));
    }

    #[test]
    fn coroutine_guard_covers_stream_output_too() {
        let mut kernel = kernel();
        let outputs = vec![Output::Stream {
            name: "stdout".to_string(),
            text: "<coroutine object fetch at 0x7f>\n".to_string(),
        }];
        let (passed, text) = kernel.parse_outputs(&outputs);
        assert!(!passed);
        assert!(text.contains("await"));
    }

    #[test]
    fn parse_outputs_ignores_images_for_pass_fail() {
        let mut kernel = kernel();
        let mut data = BTreeMap::new();
        data.insert("image/png".to_string(), "aGk=".to_string());
        let outputs = vec![Output::DisplayData { data }];
        let (passed, text) = kernel.parse_outputs(&outputs);
        assert!(passed);
        assert!(text.is_empty());
    }

    #[test]
    fn parse_outputs_clips_failure_tail() {
        let mut kernel = kernel().with_keep_bytes(40);
        let outputs = vec![Output::Error {
            ename: "E".to_string(),
            evalue: String::new(),
            traceback: (0..100).map(|i| format!("frame {i}")).collect(),
        }];
        let (passed, text) = kernel.parse_outputs(&outputs);
        assert!(!passed);
        assert!(text.len() <= 40 + "...".len());
        assert!(text.contains("frame 99"), "tail must keep the final frames");
    }

    #[test]
    fn pip_guard_forces_failure() {
        let mut kernel = kernel();
        let outcome = kernel.classify_reply("# !pip install numpy\nx = 1", r#"{"outputs":[]}"#);
        assert_eq!(outcome.status, ExecStatus::Failed);
        assert!(outcome.diagnostic.contains("pip"));
    }

    #[test]
    fn malformed_reply_becomes_failure() {
        let mut kernel = kernel();
        let outcome = kernel.classify_reply("x = 1", "not json {");
        assert_eq!(outcome.status, ExecStatus::Failed);
        assert!(outcome.diagnostic.contains("malformed kernel reply"));
    }
}
