//! Generate, execute, and repair code snippets from a requirement.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use mender::agents::openai::OpenAiGeneration;
use mender::config::{MenderConfig, load_config};
use mender::exec::kernel::InteractiveKernel;
use mender::exec::sandbox::SandboxExecutor;
use mender::exec::toolchain::{Language, ToolchainMap};
use mender::exec::{ExecStatus, SnippetExecutor};
use mender::logging;
use mender::repair::{RepairLoop, RepairOutcome};

#[derive(Parser)]
#[command(
    name = "mender",
    version,
    about = "Generate, execute, and repair code snippets from a requirement"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the generate-execute-repair loop for a requirement.
    Solve {
        /// Natural-language requirement for the snippet.
        requirement: String,
        /// Target language tag (python, go, js, java, cpp, php, shell).
        #[arg(short, long, default_value = "python")]
        lang: String,
        /// Override the configured retry budget.
        #[arg(long)]
        max_retry: Option<u32>,
        /// Keep one interactive session across attempts instead of a fresh
        /// sandbox per attempt (python only).
        #[arg(long)]
        interactive: bool,
        /// Config file path.
        #[arg(long, default_value = ".mender.toml")]
        config: PathBuf,
    },
    /// Execute one source file in the sandbox and print the outcome.
    Exec {
        /// Source file to run.
        path: PathBuf,
        /// Target language tag.
        #[arg(short, long, default_value = "python")]
        lang: String,
        /// Override the configured execution timeout.
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Config file path.
        #[arg(long, default_value = ".mender.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    logging::init();
    match run().await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(1);
        }
    }
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Solve {
            requirement,
            lang,
            max_retry,
            interactive,
            config,
        } => cmd_solve(&requirement, &lang, max_retry, interactive, &config).await,
        Command::Exec {
            path,
            lang,
            timeout_secs,
            config,
        } => cmd_exec(&path, &lang, timeout_secs, &config).await,
    }
}

async fn cmd_solve(
    requirement: &str,
    lang: &str,
    max_retry: Option<u32>,
    interactive: bool,
    config_path: &Path,
) -> Result<i32> {
    let cfg = load_config(config_path)?;
    let lang: Language = lang.parse()?;
    let max_retry = max_retry.unwrap_or(cfg.max_retry);
    let generation = OpenAiGeneration::new(&cfg.provider)?;

    let outcome = if interactive {
        let kernel = InteractiveKernel::new(Duration::from_secs(cfg.kernel_timeout_secs))
            .with_keep_bytes(cfg.output_keep_bytes);
        solve_with(generation, kernel, requirement, lang, &cfg, max_retry).await?
    } else {
        let sandbox = SandboxExecutor::new(lang, Duration::from_secs(cfg.exec_timeout_secs))
            .with_toolchains(load_toolchains(&cfg)?)
            .with_keep_bytes(cfg.output_keep_bytes)
            .with_output_limit_bytes(cfg.output_limit_bytes);
        solve_with(generation, sandbox, requirement, lang, &cfg, max_retry).await?
    };

    println!("{}", outcome.code);
    if outcome.success {
        eprintln!("passed after {} attempt(s)", outcome.attempts);
        Ok(0)
    } else {
        eprintln!(
            "failed after {} attempt(s); last diagnostic:\n{}",
            outcome.attempts, outcome.diagnostic
        );
        Ok(1)
    }
}

async fn solve_with<E: SnippetExecutor>(
    generation: OpenAiGeneration,
    executor: E,
    requirement: &str,
    lang: Language,
    cfg: &MenderConfig,
    max_retry: u32,
) -> Result<RepairOutcome> {
    let mut repair = RepairLoop::new(generation, executor, requirement, lang)
        .with_revision_attempt(cfg.revision_attempt);
    repair.run(max_retry).await
}

async fn cmd_exec(
    path: &Path,
    lang: &str,
    timeout_secs: Option<u64>,
    config_path: &Path,
) -> Result<i32> {
    let cfg = load_config(config_path)?;
    let lang: Language = lang.parse()?;
    let source =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let timeout = Duration::from_secs(timeout_secs.unwrap_or(cfg.exec_timeout_secs));

    let mut sandbox = SandboxExecutor::new(lang, timeout)
        .with_toolchains(load_toolchains(&cfg)?)
        .with_keep_bytes(cfg.output_keep_bytes)
        .with_output_limit_bytes(cfg.output_limit_bytes);
    let outcome = sandbox.execute(&source).await;

    print!("{}", outcome.raw_output);
    match outcome.status {
        ExecStatus::Passed => Ok(0),
        ExecStatus::Failed | ExecStatus::TimedOut => {
            eprintln!("{}", outcome.diagnostic);
            Ok(1)
        }
    }
}

fn load_toolchains(cfg: &MenderConfig) -> Result<ToolchainMap> {
    match &cfg.toolchains_path {
        Some(path) => ToolchainMap::load(Path::new(path)),
        None => Ok(ToolchainMap::default()),
    }
}
