use std::path::PathBuf;

use crate::llm::client::{GenerationService, LlmResponse};
use crate::llm::prompt::{ModelParams, Prompt, Role};
use crate::shell::{expand_template, run_shell, shell_quote};

/// Runs a local inference executable, feeding the prompt on stdin.
///
/// `{model}`, `{temperature}` and `{max_tokens}` in the command line are
/// replaced with the call's parameters.
pub struct LocalCommand {
    command: String,
    cwd: PathBuf,
}

impl LocalCommand {
    pub fn new(command: impl Into<String>, cwd: PathBuf) -> Self {
        Self {
            command: command.into(),
            cwd,
        }
    }

    fn run(&self, prompt: &Prompt, params: &ModelParams) -> Result<String, String> {
        let temperature = params.temperature.to_string();
        let max_tokens = params.max_tokens.to_string();
        let model = shell_quote(&params.model);

        let cmd = expand_template(
            &self.command,
            &[
                ("model", model.as_str()),
                ("temperature", temperature.as_str()),
                ("max_tokens", max_tokens.as_str()),
            ],
        );

        let input = format!(
            "{}\n\n{}",
            prompt.text_for(Role::System),
            prompt.text_for(Role::User)
        );

        let out = run_shell(&cmd, &self.cwd, Some(&input)).map_err(|e| e.to_string())?;

        if !out.success {
            return Err(out.stderr.trim().to_string());
        }

        Ok(out.stdout.trim().to_string())
    }
}

impl GenerationService for LocalCommand {
    fn get_response(&self, prompt: &Prompt, params: &ModelParams) -> LlmResponse {
        match self.run(prompt, params) {
            Ok(text) => LlmResponse::ok(text),
            Err(e) => LlmResponse::failed(e),
        }
    }
}
