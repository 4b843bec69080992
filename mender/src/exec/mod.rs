//! Execution of generated snippets.
//!
//! Two executors share the [`SnippetExecutor`] seam: the stateless
//! [`sandbox`] (one OS process and scratch directory per call) and the
//! stateful [`kernel`] (one long-lived interpreter session). Both uphold the
//! same boundary contract: every internal fault is converted into a
//! well-formed [`ExecOutcome`]; callers never observe a raised fault.

pub mod kernel;
pub mod process;
pub mod sandbox;
pub mod toolchain;

use async_trait::async_trait;

/// Classification of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    /// Clean exit and no error-typed output.
    Passed,
    /// Non-zero exit, compile failure, error output, or an internal fault
    /// converted at the executor boundary.
    Failed,
    /// The hard wall-clock timeout expired before the unit finished.
    TimedOut,
}

/// Result of executing one snippet.
///
/// `diagnostic` is non-empty whenever `status` is not [`ExecStatus::Passed`];
/// it is the bounded text fed back into the next generation round.
/// `raw_output` keeps the captured output for inspection and logging.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub status: ExecStatus,
    pub diagnostic: String,
    pub raw_output: String,
}

impl ExecOutcome {
    pub fn passed(raw_output: impl Into<String>) -> Self {
        Self {
            status: ExecStatus::Passed,
            diagnostic: String::new(),
            raw_output: raw_output.into(),
        }
    }

    pub fn failed(diagnostic: impl Into<String>) -> Self {
        let diagnostic = non_empty(diagnostic.into());
        let raw_output = diagnostic.clone();
        Self {
            status: ExecStatus::Failed,
            diagnostic,
            raw_output,
        }
    }

    pub fn failed_with_output(diagnostic: impl Into<String>, raw_output: impl Into<String>) -> Self {
        Self {
            status: ExecStatus::Failed,
            diagnostic: non_empty(diagnostic.into()),
            raw_output: raw_output.into(),
        }
    }

    pub fn timed_out(diagnostic: impl Into<String>) -> Self {
        let diagnostic = non_empty(diagnostic.into());
        let raw_output = diagnostic.clone();
        Self {
            status: ExecStatus::TimedOut,
            diagnostic,
            raw_output,
        }
    }

    pub fn is_passed(&self) -> bool {
        self.status == ExecStatus::Passed
    }
}

fn non_empty(diagnostic: String) -> String {
    if diagnostic.trim().is_empty() {
        "unknown error".to_string()
    } else {
        diagnostic
    }
}

/// Abstraction over snippet execution backends.
///
/// `&mut self` because the interactive kernel mutates session state per call;
/// the sandbox implementation is effectively stateless.
#[async_trait]
pub trait SnippetExecutor {
    /// Execute one source unit and classify the result. Must not fail:
    /// internal faults become [`ExecStatus::Failed`] outcomes.
    async fn execute(&mut self, source: &str) -> ExecOutcome;
}

/// Bound text to `keep` bytes, keeping the head on success-style output and
/// the tail on failure-style output (the end of a trace names the error).
pub(crate) fn clip(text: &str, keep: usize, keep_tail: bool) -> String {
    if text.len() <= keep {
        return text.to_string();
    }
    if keep_tail {
        let mut start = text.len() - keep;
        while !text.is_char_boundary(start) {
            start += 1;
        }
        format!("...{}", &text[start..])
    } else {
        let mut end = keep;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &text[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_outcome_never_has_empty_diagnostic() {
        let outcome = ExecOutcome::failed("");
        assert_eq!(outcome.status, ExecStatus::Failed);
        assert!(!outcome.diagnostic.is_empty());

        let outcome = ExecOutcome::timed_out("   ");
        assert!(!outcome.diagnostic.trim().is_empty());
    }

    #[test]
    fn passed_outcome_keeps_raw_output() {
        let outcome = ExecOutcome::passed("hello\n");
        assert!(outcome.is_passed());
        assert!(outcome.diagnostic.is_empty());
        assert_eq!(outcome.raw_output, "hello\n");
    }

    #[test]
    fn clip_keeps_head_or_tail() {
        assert_eq!(clip("abcdef", 10, false), "abcdef");
        assert_eq!(clip("abcdef", 3, false), "abc...");
        assert_eq!(clip("abcdef", 3, true), "...def");
    }

    #[test]
    fn clip_respects_char_boundaries() {
        // 'é' is two bytes; a naive byte slice would split it.
        let text = "ééé";
        let head = clip(text, 3, false);
        assert!(head.starts_with('é'));
        let tail = clip(text, 3, true);
        assert!(tail.ends_with('é'));
    }
}
