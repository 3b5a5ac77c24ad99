use crate::config::{Config, Provider};
use crate::llm::client::{GenerationService, LlmResponse, RestClient};
use crate::llm::local::LocalCommand;
use crate::llm::prompt::{ModelParams, Prompt};

/// Backend chosen once from configuration.
pub enum LlmBackend {
    Rest(RestClient),
    LocalDirect(LocalCommand),
}

impl LlmBackend {
    pub fn from_config(cfg: &Config) -> Result<Self, String> {
        match cfg.provider {
            Provider::Rest => Ok(LlmBackend::Rest(RestClient::new(
                cfg.server_url.clone(),
                cfg.api_key.clone(),
            )?)),
            Provider::LocalDirect => Ok(LlmBackend::LocalDirect(LocalCommand::new(
                cfg.local_command.clone(),
                cfg.project_root.clone(),
            ))),
        }
    }
}

impl GenerationService for LlmBackend {
    fn get_response(&self, prompt: &Prompt, params: &ModelParams) -> LlmResponse {
        match self {
            LlmBackend::Rest(client) => client.get_response(prompt, params),
            LlmBackend::LocalDirect(local) => local.get_response(prompt, params),
        }
    }
}

/// Sampling parameters for every call in a run.
pub fn model_params(cfg: &Config) -> ModelParams {
    ModelParams {
        model: cfg.model.clone(),
        temperature: cfg.temperature,
        max_tokens: cfg.max_tokens,
    }
}
