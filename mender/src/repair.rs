//! Bounded generate-execute-repair loop.
//!
//! One attempt is a generation step (strategy chosen purely by attempt
//! index) followed by one execution of the combined code+test unit. Failure
//! diagnostics are persisted into the session context and fed back into the
//! next generation round; the loop stops at the first pass or when the retry
//! budget is exhausted. Strictly sequential: no two attempts overlap, and
//! the context has exactly one owner.

use anyhow::Result;
use tracing::{debug, error, info, warn};

use crate::agents::{GenerationService, PromptSet, Role};
use crate::exec::SnippetExecutor;
use crate::exec::toolchain::Language;
use crate::parse;

/// Mutable session state owned by the loop and updated between attempts.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    pub instruction: String,
    pub code: String,
    pub test_code: String,
    pub last_diagnostic: String,
}

impl SessionContext {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            ..Self::default()
        }
    }
}

/// Which generation strategy runs at an attempt index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Fresh implementation plus tests (attempt 0).
    Initial,
    /// Rewrite the instruction itself from accumulated diagnostics.
    Revise,
    /// Repair the failing code/test pair from the last diagnostic.
    Debug,
}

/// Pure schedule: deterministic and reproducible for a fixed budget and
/// fixed backend responses. Attempt 0 always generates from scratch, even
/// when `revision_attempt` is 0.
pub fn strategy_for(attempt: u32, revision_attempt: u32) -> Strategy {
    if attempt == 0 {
        Strategy::Initial
    } else if attempt == revision_attempt {
        Strategy::Revise
    } else {
        Strategy::Debug
    }
}

/// Final result of a repair run.
#[derive(Debug, Clone)]
pub struct RepairOutcome {
    /// Most recently generated implementation, even after a failed run.
    pub code: String,
    /// Last diagnostic, verbatim, for inspection; empty on success.
    pub diagnostic: String,
    pub success: bool,
    /// Execution attempts actually performed.
    pub attempts: u32,
}

/// The orchestrator: coordinates a generation backend, an executor, and the
/// exclusively-owned session context.
pub struct RepairLoop<G, E> {
    generation: G,
    executor: E,
    prompts: PromptSet,
    context: SessionContext,
    lang: Language,
    revision_attempt: u32,
}

impl<G: GenerationService, E: SnippetExecutor> RepairLoop<G, E> {
    pub fn new(generation: G, executor: E, instruction: impl Into<String>, lang: Language) -> Self {
        Self {
            generation,
            executor,
            prompts: PromptSet::new(),
            context: SessionContext::new(instruction),
            lang,
            revision_attempt: 2,
        }
    }

    /// Override the attempt index at which requirement revision runs.
    pub fn with_revision_attempt(mut self, revision_attempt: u32) -> Self {
        self.revision_attempt = revision_attempt;
        self
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Recover the collaborators and final context, mainly for inspection.
    pub fn into_parts(self) -> (G, E, SessionContext) {
        (self.generation, self.executor, self.context)
    }

    /// Run up to `max_retry` generate-execute attempts.
    ///
    /// Ordinary generate/execute failures never surface as errors; `Err` is
    /// reserved for backend transport or template faults.
    pub async fn run(&mut self, max_retry: u32) -> Result<RepairOutcome> {
        let mut attempt = 0u32;
        let mut attempts_run = 0u32;
        let mut success = false;

        while !success && attempt < max_retry {
            let strategy = strategy_for(attempt, self.revision_attempt);
            info!(attempt, max_retry, ?strategy, "attempt start");
            match strategy {
                Strategy::Initial => self.initial_generation().await?,
                Strategy::Revise => self.revise_instruction().await?,
                Strategy::Debug => self.debug_generation().await?,
            }

            let unit = self.combined_unit();
            let outcome = self.executor.execute(&unit).await;
            attempts_run += 1;

            if outcome.is_passed() {
                info!(attempt, "execution passed");
                self.context.last_diagnostic.clear();
                success = true;
            } else {
                warn!(attempt, status = ?outcome.status, "execution failed");
                self.context.last_diagnostic = outcome.diagnostic;
                attempt += 1;
            }
        }

        if !success {
            error!(
                max_retry,
                diagnostic = %self.context.last_diagnostic,
                "retry budget exhausted"
            );
        }
        Ok(RepairOutcome {
            code: self.context.code.clone(),
            diagnostic: self.context.last_diagnostic.clone(),
            success,
            attempts: attempts_run,
        })
    }

    /// Attempt 0: implementation then tests against the current instruction.
    async fn initial_generation(&mut self) -> Result<()> {
        let prompt = self
            .prompts
            .implementer(&self.context.instruction, self.lang.as_str())?;
        let response = self.generation.generate(Role::Implementer, &prompt).await?;
        self.context.code = parse::extract_code(&response, self.lang.as_str());
        debug!(bytes = self.context.code.len(), "initial code generated");

        let prompt = self
            .prompts
            .test_writer(&self.context.instruction, self.lang.as_str())?;
        let response = self.generation.generate(Role::TestWriter, &prompt).await?;
        self.context.test_code = parse::extract_code(&response, self.lang.as_str());
        debug!(bytes = self.context.test_code.len(), "initial tests generated");
        Ok(())
    }

    /// Debug strategy: rewrite the failing pair from the last diagnostic.
    ///
    /// The returned pair overwrites the context explicitly; a retry must
    /// never silently re-execute stale code.
    async fn debug_generation(&mut self) -> Result<()> {
        self.generation.reset_history(Role::Debugger);
        let prompt = self.prompts.debugger(
            &self.context.code,
            &self.context.test_code,
            &self.context.last_diagnostic,
            self.lang.as_str(),
        )?;
        let response = self.generation.generate(Role::Debugger, &prompt).await?;

        if let Some(code) = parse::extract_section_code(&response, "Code", self.lang.as_str()) {
            self.context.code = code;
        }
        if let Some(tests) = parse::extract_section_code(&response, "Test", self.lang.as_str()) {
            self.context.test_code = tests;
        }
        debug!("debug-generated pair written back");
        Ok(())
    }

    /// Revision strategy: rewrite the instruction itself, then re-implement
    /// once against it.
    async fn revise_instruction(&mut self) -> Result<()> {
        let prompt = self
            .prompts
            .reviewer(&self.context.instruction, &self.context.last_diagnostic)?;
        let response = self.generation.generate(Role::Reviewer, &prompt).await?;
        let revised = parse::extract_code(&response, "");
        if revised.trim().is_empty() {
            // Malformed revision: keep the instruction we have.
            warn!("empty instruction revision ignored");
        } else {
            self.generation.reset_history(Role::Reviewer);
            self.context.instruction = revised;
            info!("instruction revised");
        }

        self.generation.reset_history(Role::Implementer);
        let prompt = self
            .prompts
            .implementer(&self.context.instruction, self.lang.as_str())?;
        let response = self.generation.generate(Role::Implementer, &prompt).await?;
        self.context.code = parse::extract_code(&response, self.lang.as_str());
        debug!("code regenerated from revised instruction");
        Ok(())
    }

    /// The executable unit: implementation followed by its tests.
    fn combined_unit(&self) -> String {
        format!("{}\n\n{}", self.context.code, self.context.test_code)
    }
}
