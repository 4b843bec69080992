//! Scripted doubles for loop and executor tests.

use std::collections::VecDeque;

use anyhow::{Result, bail};
use async_trait::async_trait;

use crate::agents::{GenerationService, Role};
use crate::exec::{ExecOutcome, SnippetExecutor};

/// Generation service that replays a fixed response sequence and records
/// which roles were invoked and reset.
pub struct ScriptedGeneration {
    responses: VecDeque<String>,
    pub calls: Vec<Role>,
    pub resets: Vec<Role>,
}

impl ScriptedGeneration {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: responses.into_iter().map(Into::into).collect(),
            calls: Vec::new(),
            resets: Vec::new(),
        }
    }
}

#[async_trait]
impl GenerationService for ScriptedGeneration {
    async fn generate(&mut self, role: Role, _prompt: &str) -> Result<String> {
        self.calls.push(role);
        match self.responses.pop_front() {
            Some(response) => Ok(response),
            None => bail!("scripted generation exhausted (role {})", role.as_str()),
        }
    }

    fn reset_history(&mut self, role: Role) {
        self.resets.push(role);
    }
}

/// Executor that replays fixed outcomes and records every executed source.
pub struct ScriptedExecutor {
    outcomes: VecDeque<ExecOutcome>,
    pub executed: Vec<String>,
}

impl ScriptedExecutor {
    pub fn new<I>(outcomes: I) -> Self
    where
        I: IntoIterator<Item = ExecOutcome>,
    {
        Self {
            outcomes: outcomes.into_iter().collect(),
            executed: Vec::new(),
        }
    }
}

#[async_trait]
impl SnippetExecutor for ScriptedExecutor {
    async fn execute(&mut self, source: &str) -> ExecOutcome {
        self.executed.push(source.to_string());
        self.outcomes
            .pop_front()
            .unwrap_or_else(|| ExecOutcome::failed("scripted executor exhausted"))
    }
}
