//! Generation roles and the service seam to the model backend.
//!
//! The [`GenerationService`] trait decouples the repair loop from the actual
//! backend (currently an OpenAI-compatible chat endpoint). Tests use
//! scripted services that return predetermined text without network access.

pub mod openai;

use anyhow::Result;
use async_trait::async_trait;
use minijinja::{Environment, context};

const IMPLEMENTER_TEMPLATE: &str = include_str!("prompts/implementer.md");
const TEST_WRITER_TEMPLATE: &str = include_str!("prompts/test_writer.md");
const DEBUGGER_TEMPLATE: &str = include_str!("prompts/debugger.md");
const REVIEWER_TEMPLATE: &str = include_str!("prompts/reviewer.md");

/// Generation role invoked at a point in the repair schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Writes the implementation for the current instruction.
    Implementer,
    /// Writes assertion-style test cases for the instruction.
    TestWriter,
    /// Rewrites a failing code/test pair from the last diagnostic.
    Debugger,
    /// Rewrites the instruction itself from accumulated diagnostics.
    Reviewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Implementer => "implementer",
            Role::TestWriter => "test-writer",
            Role::Debugger => "debugger",
            Role::Reviewer => "reviewer",
        }
    }

    /// System instructions sent with every request for this role.
    pub fn instructions(&self) -> &'static str {
        match self {
            Role::Implementer => {
                "You are a software programmer. Complete the requested function: \
                 understand the task, pick an efficient approach, then write working \
                 code. Produce usable code only, without test cases or a summary."
            }
            Role::TestWriter => {
                "You are a tester. Create comprehensive, well-documented test cases \
                 for the given incomplete function, with special attention to edge \
                 cases. Generate only the test code section."
            }
            Role::Debugger => {
                "You are a development engineer. Analyze the feedback, locate and \
                 explain the error, propose a fix, and rewrite the code so all \
                 identified bugs are fixed. Separate your answer into `## Code` and \
                 `## Test` sections, each with a fenced code block."
            }
            Role::Reviewer => {
                "You are a prompt reviewer for code generation tasks. Given an \
                 original prompt and the test errors its generated code produced, \
                 rewrite the prompt with explicit constraints that prevent the \
                 recurring failures. Do not generate code."
            }
        }
    }
}

/// Abstraction over generation backends.
///
/// Output without a clearly delimited code block is still a valid payload;
/// extraction and fallback live in [`crate::parse`], not here.
#[async_trait]
pub trait GenerationService {
    /// Produce text for a role given a fully rendered prompt.
    async fn generate(&mut self, role: Role, prompt: &str) -> Result<String>;

    /// Drop accumulated conversation history for a role, if the backend
    /// keeps any. The default is a no-op for stateless backends.
    fn reset_history(&mut self, _role: Role) {}
}

/// Rendered role prompts, one template per role.
pub struct PromptSet {
    env: Environment<'static>,
}

impl PromptSet {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("implementer", IMPLEMENTER_TEMPLATE)
            .expect("implementer template should be valid");
        env.add_template("test_writer", TEST_WRITER_TEMPLATE)
            .expect("test_writer template should be valid");
        env.add_template("debugger", DEBUGGER_TEMPLATE)
            .expect("debugger template should be valid");
        env.add_template("reviewer", REVIEWER_TEMPLATE)
            .expect("reviewer template should be valid");
        Self { env }
    }

    pub fn implementer(&self, requirement: &str, lang: &str) -> Result<String> {
        let template = self.env.get_template("implementer")?;
        Ok(template.render(context! {
            requirement => requirement.trim(),
            lang => lang,
        })?)
    }

    pub fn test_writer(&self, requirement: &str, lang: &str) -> Result<String> {
        let template = self.env.get_template("test_writer")?;
        Ok(template.render(context! {
            requirement => requirement.trim(),
            lang => lang,
        })?)
    }

    pub fn debugger(
        &self,
        code: &str,
        test_code: &str,
        diagnostic: &str,
        lang: &str,
    ) -> Result<String> {
        let template = self.env.get_template("debugger")?;
        Ok(template.render(context! {
            code => code,
            test_code => test_code,
            diagnostic => diagnostic,
            lang => lang,
        })?)
    }

    pub fn reviewer(&self, requirement: &str, diagnostic: &str) -> Result<String> {
        let template = self.env.get_template("reviewer")?;
        Ok(template.render(context! {
            requirement => requirement.trim(),
            diagnostic => diagnostic,
        })?)
    }
}

impl Default for PromptSet {
    fn default() -> Self {
        Self::new()
    }
}
