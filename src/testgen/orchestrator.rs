//! Generation pipeline state machine.
//!
//! One `generate` call walks
//! `Idle -> GettingIntention -> {GeneratingCode <-> CorrectingCode} -> RunningTests -> UpdatingDatabase -> Finished`.
//! Every wait (model, build, test run) blocks only the calling thread; use
//! [`GenerationOrchestrator::spawn`] to keep it off a UI thread.

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread;

use crate::config::{Config, TempArtifactPolicy};
use crate::error::GenerationError;
use crate::llm::backend::model_params;
use crate::llm::client::GenerationService;
use crate::llm::prompt::{ModelParams, Prompt};
use crate::llm::templates::PromptAssembler;
use crate::logger::ProgressSink;
use crate::persistence::{GeneratedTestRecord, ResultStore};
use crate::state::{GeneratingStep, LogLevel};
use crate::testgen::build::{format_diagnostics, BuildHost, BuildVerifier, CompilationDiagnostic};
use crate::testgen::execution::{ExecutionRunner, TestHost, TestMode};
use crate::testgen::materialize::materialize_test;
use crate::testgen::parser::{extract_class_name, extract_test_code};
use crate::testgen::request::GenerationRequest;

#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Compiled,
    FailedToCompile,
    EmptyGeneration,
}

/// One pass through the generate/compile loop. Kept for inspection only.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub index: usize,
    pub code: String,
    pub diagnostics: Vec<CompilationDiagnostic>,
    pub outcome: AttemptOutcome,
}

/// Result of a run that produced compilable code.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub passed: bool,
    pub generated_test: Option<PathBuf>,
    pub record: Option<GeneratedTestRecord>,
    pub attempts: usize,
}

/// Code that survived the build, plus what the build told us about it.
struct CompiledTest {
    code: String,
    artifact: PathBuf,
    module: Option<String>,
}

pub struct GenerationOrchestrator {
    /* collaborators */
    service: Arc<dyn GenerationService>,
    prompts: PromptAssembler,
    verifier: BuildVerifier,
    runner: ExecutionRunner,
    store: Arc<dyn ResultStore>,
    progress: ProgressSink,
    cancel: CancelToken,

    /* settings */
    params: ModelParams,
    max_attempts: usize,
    destination: PathBuf,
    extension: String,
    temp_policy: TempArtifactPolicy,
    default_mode: TestMode,

    /* run state */
    step: GeneratingStep,
    test_passed: Option<bool>,
    generated_code: Option<String>,
    attempts: Vec<AttemptRecord>,
}

impl GenerationOrchestrator {
    pub fn new(
        cfg: &Config,
        service: Arc<dyn GenerationService>,
        build_host: Arc<dyn BuildHost>,
        test_host: Arc<dyn TestHost>,
        store: Arc<dyn ResultStore>,
    ) -> Self {
        Self {
            service,
            prompts: PromptAssembler::from_config(cfg),
            verifier: BuildVerifier::from_config(build_host, cfg),
            runner: ExecutionRunner::from_config(test_host, cfg),
            store,
            progress: ProgressSink::silent(),
            cancel: CancelToken::new(),

            params: model_params(cfg),
            max_attempts: cfg.max_attempts,
            destination: cfg.destination_folder(),
            extension: cfg.source_extension.clone(),
            temp_policy: cfg.temp_artifact_policy,
            default_mode: cfg.test_mode,

            step: GeneratingStep::Idle,
            test_passed: None,
            generated_code: None,
            attempts: Vec::new(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_temp_policy(mut self, policy: TempArtifactPolicy) -> Self {
        self.temp_policy = policy;
        self
    }

    pub fn step(&self) -> GeneratingStep {
        self.step
    }

    /// `None` until a run has finished.
    pub fn test_passed(&self) -> Option<bool> {
        self.test_passed
    }

    pub fn generated_code(&self) -> Option<&str> {
        self.generated_code.as_deref()
    }

    pub fn attempts(&self) -> &[AttemptRecord] {
        &self.attempts
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Make a finished orchestrator reusable. A no-op mid-run.
    pub fn reset(&mut self) {
        if self.step != GeneratingStep::Finished {
            return;
        }
        self.step = GeneratingStep::Idle;
        self.test_passed = None;
        self.generated_code = None;
        self.attempts.clear();
    }

    /// Run the whole pipeline on a worker thread and hand the orchestrator
    /// back with the result.
    pub fn spawn(
        mut self,
        request: GenerationRequest,
    ) -> thread::JoinHandle<(Self, Result<RunOutcome, GenerationError>)> {
        thread::spawn(move || {
            let result = self.generate(&request);
            (self, result)
        })
    }

    /// Drive one request to `Finished`.
    ///
    /// A record is persisted whatever happens after the busy check, and
    /// `test_passed` is always `Some` afterwards. Errors are the fatal
    /// outcomes only: service failure, exhausted attempts, cancellation.
    pub fn generate(&mut self, request: &GenerationRequest) -> Result<RunOutcome, GenerationError> {
        if self.step != GeneratingStep::Idle {
            tracing::error!(step = %self.step, "generate called while a run is in progress");
            return Err(GenerationError::Busy(self.step.to_string()));
        }

        self.test_passed = None;
        self.generated_code = None;
        self.attempts.clear();

        tracing::info!(
            unit = %request.target_path().display(),
            selector = request.selector(),
            kind = request.kind().label(),
            "generation started"
        );

        let compiled = self.intention(request).and_then(|intention| {
            self.compile_loop(request, &intention)
        });

        let verdict = match &compiled {
            Ok(test) => self.run_tests(request, test),
            Err(e) => {
                self.progress.log(self.step, LogLevel::Error, format!("fatal: {e}"));
                false
            }
        };

        let (generated_test, record) = self.update_database(request, compiled.as_ref().ok(), verdict);

        self.finish(compiled.as_ref().ok(), verdict);

        compiled.map(|_| RunOutcome {
            passed: verdict,
            generated_test,
            record,
            attempts: self.attempts.len(),
        })
    }

    /* ============================================================
       Stages
       ============================================================ */

    fn intention(&mut self, request: &GenerationRequest) -> Result<String, GenerationError> {
        self.enter(GeneratingStep::GettingIntention, "describing intended behavior");
        self.check_cancelled()?;

        let prompt = self
            .prompts
            .intention(
                request.kind(),
                request.target_source(),
                request.related_members(),
                request.selector(),
            )
            .map_err(|e| GenerationError::Prompt(e.to_string()))?;

        let description = self.ask(&prompt, "intention")?;
        tracing::debug!(chars = description.len(), "intention received");
        Ok(description)
    }

    fn compile_loop(
        &mut self,
        request: &GenerationRequest,
        intention: &str,
    ) -> Result<CompiledTest, GenerationError> {
        let hint = request.base_name_hint();
        // last non-empty code and its diagnostics text
        let mut previous: Option<(String, String)> = None;

        for index in 0..self.max_attempts {
            self.check_cancelled()?;

            let prompt = match &previous {
                None => {
                    self.enter(
                        GeneratingStep::GeneratingCode,
                        format!("generating test code (attempt {})", index + 1),
                    );
                    self.prompts.generator(
                        request.kind(),
                        intention,
                        request.target_source(),
                        request.related_members(),
                        request.selector(),
                    )
                }
                Some((code, errors)) => {
                    self.enter(
                        GeneratingStep::CorrectingCode,
                        format!("correcting test code (attempt {})", index + 1),
                    );
                    self.prompts.correction(request.kind(), code, errors)
                }
            }
            .map_err(|e| GenerationError::Prompt(e.to_string()))?;

            let response = self.ask(&prompt, "code generation")?;
            let code = extract_test_code(&response);

            if code.is_empty() {
                self.progress.log(
                    self.step,
                    LogLevel::Warn,
                    format!("attempt {} produced no code", index + 1),
                );
                self.attempts.push(AttemptRecord {
                    index,
                    code,
                    diagnostics: Vec::new(),
                    outcome: AttemptOutcome::EmptyGeneration,
                });
                continue;
            }

            self.check_cancelled()?;
            let check = self.verifier.check(&code, &hint);

            if check.is_clean() {
                self.progress.log(self.step, LogLevel::Success, "test code compiled");
                self.attempts.push(AttemptRecord {
                    index,
                    code: code.clone(),
                    diagnostics: Vec::new(),
                    outcome: AttemptOutcome::Compiled,
                });
                self.generated_code = Some(code.clone());
                return Ok(CompiledTest {
                    code,
                    artifact: check.file_path,
                    module: check.module_name,
                });
            }

            self.verifier.discard(&check.file_path);

            let errors = format_diagnostics(&check.diagnostics);
            self.progress.log(
                self.step,
                LogLevel::Warn,
                format!("attempt {} failed to compile:\n{errors}", index + 1),
            );
            self.attempts.push(AttemptRecord {
                index,
                code: code.clone(),
                diagnostics: check.diagnostics,
                outcome: AttemptOutcome::FailedToCompile,
            });
            previous = Some((code, errors));
        }

        Err(GenerationError::AttemptsExhausted {
            attempts: self.max_attempts,
        })
    }

    fn run_tests(&mut self, request: &GenerationRequest, test: &CompiledTest) -> bool {
        self.enter(GeneratingStep::RunningTests, "running generated test");

        if self.cancel.is_cancelled() {
            self.progress.log(self.step, LogLevel::Warn, "cancelled before test run");
            return false;
        }

        let Some(class_name) = extract_class_name(&test.code) else {
            self.progress.log(self.step, LogLevel::Warn, "no test class found in generated code");
            return false;
        };
        let Some(module) = test.module.as_deref() else {
            self.progress.log(
                self.step,
                LogLevel::Warn,
                format!("no module owns {}", test.artifact.display()),
            );
            return false;
        };

        let mode = TestMode::for_request(request.kind(), self.default_mode);
        let passed = self.runner.run(mode, module, &class_name);

        let (level, msg) = if passed {
            (LogLevel::Success, "test passed")
        } else {
            (LogLevel::Warn, "test failed or could not be run")
        };
        self.progress.log(self.step, level, msg);
        passed
    }

    fn update_database(
        &mut self,
        request: &GenerationRequest,
        compiled: Option<&CompiledTest>,
        verdict: bool,
    ) -> (Option<PathBuf>, Option<GeneratedTestRecord>) {
        self.enter(GeneratingStep::UpdatingDatabase, "recording result");

        let generated = compiled.and_then(|test| {
            match materialize_test(&self.destination, &self.extension, &test.code, request.selector()) {
                Ok(path) => Some(path),
                Err(e) => {
                    self.progress.log(
                        self.step,
                        LogLevel::Error,
                        format!("could not save final test file: {e}"),
                    );
                    None
                }
            }
        });

        let record = match self.store.upsert(
            request.target_path(),
            request.selector(),
            generated.as_deref(),
            verdict,
        ) {
            Ok(r) => Some(r),
            Err(e) => {
                self.progress.log(self.step, LogLevel::Error, format!("could not persist result: {e}"));
                None
            }
        };

        (generated, record)
    }

    fn finish(&mut self, compiled: Option<&CompiledTest>, verdict: bool) {
        if let Some(test) = compiled {
            match self.temp_policy {
                TempArtifactPolicy::Delete => self.verifier.discard(&test.artifact),
                TempArtifactPolicy::Keep => {
                    tracing::debug!(path = %test.artifact.display(), "keeping temp artifact")
                }
            }
        }

        self.test_passed = Some(verdict);
        let (level, msg) = if verdict {
            (LogLevel::Success, "finished: test passed")
        } else {
            (LogLevel::Warn, "finished: no passing test")
        };
        self.enter_with(GeneratingStep::Finished, level, msg);
    }

    /* ============================================================
       Helpers
       ============================================================ */

    fn ask(&self, prompt: &Prompt, stage: &'static str) -> Result<String, GenerationError> {
        let response = self.service.get_response(prompt, &self.params);
        if response.success {
            Ok(response.content)
        } else {
            Err(GenerationError::Service {
                stage,
                message: response.error_message,
            })
        }
    }

    fn check_cancelled(&self) -> Result<(), GenerationError> {
        if self.cancel.is_cancelled() {
            Err(GenerationError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn enter(&mut self, step: GeneratingStep, msg: impl Into<String>) {
        self.enter_with(step, LogLevel::Info, msg);
    }

    fn enter_with(&mut self, step: GeneratingStep, level: LogLevel, msg: impl Into<String>) {
        self.step = step;
        self.progress.log(step, level, msg);
    }
}
