//! Bounded generate-execute-repair loop for program snippets.
//!
//! Given a natural-language requirement, the tool asks a generation backend
//! for an implementation and tests, executes the combined unit, and feeds
//! failure diagnostics back into further generation rounds until the unit
//! passes or a retry budget is exhausted. The architecture separates:
//!
//! - **[`exec`]**: running untrusted just-generated code — a stateless
//!   multi-language sandbox (fresh process and scratch directory per call)
//!   and a persistent interactive kernel with crash/timeout recovery.
//! - **[`agents`]**: the generation seam — roles, prompt templates, and an
//!   OpenAI-compatible chat backend. Tests use scripted services that return
//!   predetermined text without network access.
//! - **[`repair`]**: the deterministic retry state machine coordinating the
//!   two, with exclusively-owned mutable session state.

pub mod agents;
pub mod config;
pub mod exec;
pub mod logging;
pub mod parse;
pub mod repair;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
