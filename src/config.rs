//! Process-wide settings, built once by the entry point and handed to every
//! service by reference.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ConfigError;
use crate::testgen::execution::TestMode;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// OpenAI-compatible chat-completions endpoint.
    Rest,
    /// A local executable fed the prompt on stdin.
    LocalDirect,
}

/// What happens to the compiled temp file once a run finishes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TempArtifactPolicy {
    Delete,
    Keep,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /* ---------- generation backend ---------- */
    pub provider: Provider,
    pub server_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub local_command: String,

    /* ---------- project layout ---------- */
    pub project_root: PathBuf,
    pub temp_dir: PathBuf,
    pub test_destination: PathBuf,
    pub source_extension: String,
    pub custom_templates_dir: Option<PathBuf>,
    pub default_templates_dir: PathBuf,
    pub store_path: Option<PathBuf>,

    /* ---------- pipeline ---------- */
    pub max_attempts: usize,
    pub compile_timeout_secs: u64,
    pub test_timeout_secs: Option<u64>,
    pub temp_artifact_policy: TempArtifactPolicy,

    /* ---------- host commands ---------- */
    pub build_command: String,
    pub test_command: String,
    pub test_mode: TestMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: Provider::Rest,
            server_url: "http://localhost:11434/v1/chat/completions".into(),
            api_key: "ollama".into(),
            model: "gemma:2b".into(),
            temperature: 0.7,
            max_tokens: 2048,
            local_command: "llama-cli --simple-io -f /dev/stdin".into(),

            project_root: PathBuf::from("."),
            temp_dir: PathBuf::from("Tests/Temp"),
            test_destination: PathBuf::from("Tests/Generated"),
            source_extension: "cs".into(),
            custom_templates_dir: None,
            default_templates_dir: PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/templates")),
            store_path: None,

            max_attempts: 5,
            compile_timeout_secs: 15,
            test_timeout_secs: None,
            temp_artifact_policy: TempArtifactPolicy::Delete,

            build_command: "dotnet build --nologo -v q -clp:NoSummary".into(),
            test_command: "dotnet test --nologo --no-build --filter FullyQualifiedName~{test}".into(),
            test_mode: TestMode::Unit,
        }
    }
}

impl Config {
    /// Read the user config file (if any) and apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path();
        let mut cfg = match fs::read_to_string(&path) {
            Ok(raw) => toml::from_str::<Config>(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
            Err(e) => return Err(e.into()),
        };

        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = config_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        if self.compile_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "compile_timeout_secs must be positive".into(),
            ));
        }
        if self.source_extension.trim().is_empty() {
            return Err(ConfigError::Invalid("source_extension cannot be empty".into()));
        }
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Some(key) = env::var("TESTFORGE_API_KEY")
            .ok()
            .or_else(|| env::var("OPENAI_API_KEY").ok())
        {
            self.api_key = key;
        }
        if let Ok(model) = env::var("TESTFORGE_MODEL") {
            self.model = model;
        }
        if let Ok(url) = env::var("TESTFORGE_SERVER_URL") {
            self.server_url = url;
        }
    }

    pub fn compile_timeout(&self) -> Duration {
        Duration::from_secs(self.compile_timeout_secs)
    }

    pub fn test_timeout(&self) -> Option<Duration> {
        self.test_timeout_secs.map(Duration::from_secs)
    }

    /// Resolve a possibly-relative path against the project root.
    pub fn project_path(&self, p: &Path) -> PathBuf {
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.project_root.join(p)
        }
    }

    pub fn temp_folder(&self) -> PathBuf {
        self.project_path(&self.temp_dir)
    }

    pub fn destination_folder(&self) -> PathBuf {
        self.project_path(&self.test_destination)
    }

    /// Record store location; defaults to a per-project file in the user
    /// config dir, keyed by a hash of the project root.
    pub fn records_file(&self) -> PathBuf {
        if let Some(p) = &self.store_path {
            return self.project_path(p);
        }

        let root = fs::canonicalize(&self.project_root).unwrap_or_else(|_| self.project_root.clone());
        let mut hasher = Sha256::new();
        hasher.update(root.to_string_lossy().as_bytes());
        let hash = hex::encode(hasher.finalize());

        let mut base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        base.push("testforge");
        base.push("records");
        base.push(format!("{hash}.json"));
        base
    }
}

fn config_path() -> PathBuf {
    let mut dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    dir.push("testforge");
    dir.push("config.toml");
    dir
}
