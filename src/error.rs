//! Error types shared across the pipeline.
//!
//! Only [`GenerationError`] ever escapes `GenerationOrchestrator::generate`;
//! the others are absorbed into attempt outcomes or verdicts along the way.

use std::path::PathBuf;

use thiserror::Error;

/// Fatal outcomes of a generation run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    /// The text-generation backend reported failure.
    #[error("generation service failed during {stage}: {message}")]
    Service { stage: &'static str, message: String },

    /// Every attempt produced empty code or build diagnostics.
    #[error("no compilable test after {attempts} attempt(s)")]
    AttemptsExhausted { attempts: usize },

    /// A prompt template could not be resolved or rendered.
    #[error("prompt assembly failed: {0}")]
    Prompt(String),

    #[error("generation cancelled")]
    Cancelled,

    /// `generate` was called on an orchestrator that is not idle.
    #[error("orchestrator is busy (state: {0})")]
    Busy(String),
}

/// Failures talking to a build or test host.
#[derive(Error, Debug)]
pub enum HostError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("host rejected submission: {0}")]
    Submission(String),
}

impl HostError {
    pub fn submission(msg: impl Into<String>) -> Self {
        Self::Submission(msg.into())
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("record store is corrupt: {0}")]
    Json(#[from] serde_json::Error),

    #[error("record store lock poisoned")]
    Lock,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("could not serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("template '{0}' not found in custom or default locations")]
    NotFound(String),

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("template '{name}' failed: {source}")]
    Render {
        name: String,
        #[source]
        source: tera::Error,
    },

    #[error("template cache lock poisoned")]
    Lock,
}
