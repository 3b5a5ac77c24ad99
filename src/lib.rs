//! Regression test generation driven by a language model.
//!
//! A [`GenerationOrchestrator`](testgen::orchestrator::GenerationOrchestrator)
//! asks the model what a unit should do, has it write a test, compiles the
//! test against the project, feeds compiler errors back until it builds,
//! runs it, and records the verdict in a [`ResultStore`](persistence::ResultStore).

pub mod config;
pub mod error;
pub mod host;
pub mod llm;
pub mod logger;
pub mod persistence;
pub mod shell;
pub mod state;
pub mod testgen;
