//! Interactive kernel lifecycle tests against a real python3 interpreter.

use std::time::{Duration, Instant};

use mender::exec::ExecStatus;
use mender::exec::kernel::{InteractiveKernel, KernelState};

fn kernel() -> InteractiveKernel {
    InteractiveKernel::new(Duration::from_secs(10))
}

#[tokio::test]
async fn builds_lazily_and_state_persists_across_units() {
    let mut kernel = kernel();
    assert_eq!(kernel.state(), KernelState::Unbuilt);

    let outcome = kernel.run("x = 41").await;
    assert!(outcome.is_passed(), "diagnostic: {}", outcome.diagnostic);
    assert_eq!(kernel.state(), KernelState::Running);

    // the second unit sees the first unit's variable
    let outcome = kernel.run("print(x + 1)").await;
    assert!(outcome.is_passed(), "diagnostic: {}", outcome.diagnostic);
    assert!(outcome.raw_output.contains("42"));

    assert_eq!(kernel.units().len(), 2);
    assert!(kernel.units().iter().all(|unit| unit.passed));
}

#[tokio::test]
async fn trailing_expression_is_reported_like_a_cell_result() {
    let mut kernel = kernel();
    let outcome = kernel.run("20 + 22").await;
    assert!(outcome.is_passed(), "diagnostic: {}", outcome.diagnostic);
    assert!(outcome.raw_output.contains("42"));
}

#[tokio::test]
async fn error_output_marks_the_unit_failed() {
    let mut kernel = kernel();
    let outcome = kernel.run("1 / 0").await;
    assert_eq!(outcome.status, ExecStatus::Failed);
    assert!(outcome.diagnostic.contains("ZeroDivisionError"));
    // the session survives an ordinary error
    let outcome = kernel.run("y = 2\nprint(y)").await;
    assert!(outcome.is_passed(), "diagnostic: {}", outcome.diagnostic);
}

#[tokio::test]
async fn unawaited_coroutine_is_guarded() {
    let mut kernel = kernel();
    let outcome = kernel
        .run("async def main():\n    return 1\n\nmain()")
        .await;
    assert_eq!(outcome.status, ExecStatus::Failed);
    assert!(outcome.diagnostic.contains("await"));
}

#[tokio::test]
async fn pip_install_is_rejected() {
    let mut kernel = kernel();
    let outcome = kernel.run("# !pip install numpy\nx = 1").await;
    assert_eq!(outcome.status, ExecStatus::Failed);
    assert!(outcome.diagnostic.contains("pip"));
}

/// A fatal crash yields exactly one "kernel died" failure, then the next
/// call succeeds transparently against a rebuilt session.
#[tokio::test]
async fn fatal_crash_restarts_the_kernel_once() {
    let mut kernel = kernel();
    assert!(kernel.run("x = 1").await.is_passed());

    let outcome = kernel.run("import os\nos._exit(1)").await;
    assert_eq!(outcome.status, ExecStatus::Failed);
    assert!(outcome.diagnostic.contains("kernel died"));
    assert_eq!(kernel.state(), KernelState::Running);

    let outcome = kernel.run("z = 7\nprint(z)").await;
    assert!(outcome.is_passed(), "diagnostic: {}", outcome.diagnostic);
    assert!(outcome.raw_output.contains("7"));
}

/// A stuck unit is interrupted, classified TimedOut within the bound, and
/// the session (with its variables) survives.
#[tokio::test]
async fn timeout_interrupts_but_preserves_session() {
    let mut kernel = InteractiveKernel::new(Duration::from_secs(1));
    assert!(kernel.run("x = 5").await.is_passed());

    let start = Instant::now();
    let outcome = kernel.run("import time\ntime.sleep(30)").await;
    assert_eq!(outcome.status, ExecStatus::TimedOut);
    assert!(
        start.elapsed() < Duration::from_secs(10),
        "interrupt took {:?}",
        start.elapsed()
    );

    let outcome = kernel.run("print(x)").await;
    assert!(outcome.is_passed(), "diagnostic: {}", outcome.diagnostic);
    assert!(outcome.raw_output.contains("5"));
}

#[tokio::test]
async fn terminate_returns_to_unbuilt() {
    let mut kernel = kernel();
    assert!(kernel.run("x = 1").await.is_passed());
    kernel.terminate().await.expect("terminate");
    assert_eq!(kernel.state(), KernelState::Unbuilt);

    // next run rebuilds lazily; previous state is gone by design
    let outcome = kernel.run("'x' in dir()").await;
    assert!(outcome.is_passed(), "diagnostic: {}", outcome.diagnostic);
    assert!(outcome.raw_output.contains("False"));
}

#[tokio::test]
async fn missing_interpreter_is_a_failure_not_a_fault() {
    let mut kernel = kernel().with_python("definitely-not-a-python");
    let outcome = kernel.run("x = 1").await;
    assert_eq!(outcome.status, ExecStatus::Failed);
    assert!(outcome.diagnostic.contains("kernel build failed"));
}
