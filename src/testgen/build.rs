//! Compile-check bridge.
//!
//! Build hosts report completion through a push-style notification that
//! covers a whole build batch. [`BuildVerifier::check`] turns that into a
//! single blocking answer scoped to one file: subscribe, trigger, wait for the
//! first notification on a one-slot channel, unsubscribe.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError};
use uuid::Uuid;

use crate::config::Config;
use crate::error::HostError;

/* ============================================================
   Host boundary
   ============================================================ */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// One compiler message as the host reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostDiagnostic {
    pub file: PathBuf,
    pub line: u32,
    pub severity: Severity,
    pub message: String,
}

/// "Build finished for module X", carrying messages for the entire batch.
#[derive(Debug, Clone)]
pub struct BuildFinished {
    pub module: String,
    pub diagnostics: Vec<HostDiagnostic>,
    /// Files whose submission started this build. Empty when the host
    /// cannot attribute a build to a submission.
    pub sources: Vec<PathBuf>,
}

impl BuildFinished {
    /// Whether this build may answer a submission of `file`. Builds that
    /// name other sources are leftovers from an earlier submission.
    fn answers(&self, file: &FileIdentity) -> bool {
        self.sources.is_empty() || self.sources.iter().any(|s| file.matches(s))
    }
}

pub type BuildHandler = Arc<dyn Fn(&BuildFinished) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

pub trait BuildHost: Send + Sync {
    fn subscribe(&self, handler: BuildHandler) -> SubscriptionId;

    /// Unknown or already-removed ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);

    /// Import `path` and start a build; completion arrives via subscribers.
    fn import_and_build(&self, path: &Path) -> Result<(), HostError>;

    /// Logical build unit that owns `path`.
    fn module_name_for(&self, path: &Path) -> Option<String>;
}

/// Subscriber registry for host implementations.
#[derive(Default)]
pub struct BuildSubscribers {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(SubscriptionId, BuildHandler)>>,
}

impl BuildSubscribers {
    pub fn subscribe(&self, handler: BuildHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, handler));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(h, _)| *h != id);
    }

    pub fn len(&self) -> usize {
        self.handlers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every current subscriber. Handlers run outside the
    /// lock so they may subscribe or unsubscribe freely.
    pub fn dispatch(&self, event: &BuildFinished) {
        let handlers: Vec<BuildHandler> = self
            .handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();

        for h in handlers {
            h(event);
        }
    }
}

/* ============================================================
   Verifier
   ============================================================ */

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationDiagnostic {
    pub line: u32,
    pub message: String,
}

impl fmt::Display for CompilationDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Line {}: {}", self.line, self.message)
    }
}

/// Diagnostics as the correction prompt shows them, one per line.
pub fn format_diagnostics(diags: &[CompilationDiagnostic]) -> String {
    diags
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone)]
pub struct BuildCheck {
    pub diagnostics: Vec<CompilationDiagnostic>,
    pub file_path: PathBuf,
    /// Set only for a clean build.
    pub module_name: Option<String>,
}

impl BuildCheck {
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// Scoped unsubscription: released once, explicitly or on drop.
struct Subscription<'a> {
    host: &'a dyn BuildHost,
    id: Option<SubscriptionId>,
}

impl<'a> Subscription<'a> {
    fn new(host: &'a dyn BuildHost, handler: BuildHandler) -> Self {
        let id = host.subscribe(handler);
        Self { host, id: Some(id) }
    }

    fn release(&mut self) {
        if let Some(id) = self.id.take() {
            self.host.unsubscribe(id);
        }
    }
}

impl Drop for Subscription<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

pub struct BuildVerifier {
    host: Arc<dyn BuildHost>,
    temp_dir: PathBuf,
    extension: String,
    timeout: Duration,
}

impl BuildVerifier {
    pub fn new(
        host: Arc<dyn BuildHost>,
        temp_dir: PathBuf,
        extension: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            host,
            temp_dir,
            extension: extension.into(),
            timeout,
        }
    }

    pub fn from_config(host: Arc<dyn BuildHost>, cfg: &Config) -> Self {
        Self::new(
            host,
            cfg.temp_folder(),
            cfg.source_extension.clone(),
            cfg.compile_timeout(),
        )
    }

    /// Write `code` to a fresh temp file, build it, and report the errors
    /// that belong to that file. Never hangs: every failure before the
    /// notification arrives becomes a single synthetic diagnostic.
    ///
    /// On a non-clean result the caller owns deleting the file
    /// (see [`BuildVerifier::discard`]).
    pub fn check(&self, code: &str, base_name_hint: &str) -> BuildCheck {
        let file_path = self.temp_dir.join(format!(
            "{}_{}.{}",
            base_name_hint,
            Uuid::new_v4().simple(),
            self.extension
        ));

        let diagnostics = match self.submit(&file_path, code) {
            Ok(d) => d,
            Err(msg) => {
                tracing::warn!(path = %file_path.display(), "compile check aborted: {msg}");
                vec![CompilationDiagnostic {
                    line: 0,
                    message: format!("An exception occurred: {msg}"),
                }]
            }
        };

        let module_name = if diagnostics.is_empty() {
            self.host.module_name_for(&file_path)
        } else {
            None
        };

        BuildCheck {
            diagnostics,
            file_path,
            module_name,
        }
    }

    fn submit(&self, path: &Path, code: &str) -> Result<Vec<CompilationDiagnostic>, String> {
        fs::create_dir_all(&self.temp_dir).map_err(|e| e.to_string())?;
        fs::write(path, code).map_err(|e| e.to_string())?;

        let (tx, rx) = bounded::<Vec<CompilationDiagnostic>>(1);
        let target = FileIdentity::new(path);

        let handler: BuildHandler = Arc::new(move |event: &BuildFinished| {
            if !event.answers(&target) {
                tracing::debug!(module = %event.module, "ignoring build for another submission");
                return;
            }
            // first notification wins; later ones find the slot full
            let _ = tx.try_send(scoped_errors(event, &target));
        });

        // subscribe before triggering so a fast build cannot be missed
        let mut subscription = Subscription::new(self.host.as_ref(), handler);

        self.host
            .import_and_build(path)
            .map_err(|e| e.to_string())?;

        let result = match rx.recv_timeout(self.timeout) {
            Ok(diags) => Ok(diags),
            Err(RecvTimeoutError::Timeout) => Err(format!(
                "compilation did not finish within {}s",
                self.timeout.as_secs_f32()
            )),
            Err(RecvTimeoutError::Disconnected) => {
                Err("build host dropped the completion handler".to_string())
            }
        };

        subscription.release();
        result
    }

    /// Remove a temp artifact. Missing files are fine.
    pub fn discard(&self, path: &Path) {
        match fs::remove_file(path) {
            Ok(()) => tracing::debug!(path = %path.display(), "temp artifact removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path.display(), "could not remove temp artifact: {e}"),
        }
    }
}

/// Path comparison tolerant of relative vs. canonical spellings.
struct FileIdentity {
    raw: PathBuf,
    canonical: Option<PathBuf>,
}

impl FileIdentity {
    fn new(path: &Path) -> Self {
        Self {
            raw: path.to_path_buf(),
            canonical: fs::canonicalize(path).ok(),
        }
    }

    fn matches(&self, other: &Path) -> bool {
        if other == self.raw {
            return true;
        }
        match (&self.canonical, fs::canonicalize(other).ok()) {
            (Some(a), Some(b)) => *a == b,
            _ => false,
        }
    }
}

fn scoped_errors(event: &BuildFinished, target: &FileIdentity) -> Vec<CompilationDiagnostic> {
    event
        .diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .filter(|d| target.matches(&d.file))
        .map(|d| CompilationDiagnostic {
            line: d.line,
            message: d.message.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    /// Host that answers each build from a background thread with a scripted
    /// batch, where `{target}` stands for the submitted file.
    struct ScriptedHost {
        subs: Arc<BuildSubscribers>,
        extra: Vec<HostDiagnostic>,
        target_errors: Vec<(u32, &'static str)>,
        fail_submit: bool,
        silent: bool,
        unsubscribes: AtomicUsize,
    }

    impl ScriptedHost {
        fn new() -> Self {
            Self {
                subs: Arc::new(BuildSubscribers::default()),
                extra: Vec::new(),
                target_errors: Vec::new(),
                fail_submit: false,
                silent: false,
                unsubscribes: AtomicUsize::new(0),
            }
        }
    }

    impl BuildHost for ScriptedHost {
        fn subscribe(&self, handler: BuildHandler) -> SubscriptionId {
            self.subs.subscribe(handler)
        }

        fn unsubscribe(&self, id: SubscriptionId) {
            self.unsubscribes.fetch_add(1, Ordering::SeqCst);
            self.subs.unsubscribe(id);
        }

        fn import_and_build(&self, path: &Path) -> Result<(), HostError> {
            if self.fail_submit {
                return Err(HostError::submission("asset database locked"));
            }
            if self.silent {
                return Ok(());
            }

            let mut diagnostics = self.extra.clone();
            for (line, msg) in &self.target_errors {
                diagnostics.push(HostDiagnostic {
                    file: path.to_path_buf(),
                    line: *line,
                    severity: Severity::Error,
                    message: msg.to_string(),
                });
            }
            diagnostics.push(HostDiagnostic {
                file: path.to_path_buf(),
                line: 1,
                severity: Severity::Warning,
                message: "unused variable".into(),
            });

            let subs = Arc::clone(&self.subs);
            thread::spawn(move || {
                let event = BuildFinished {
                    module: "Tests.Generated".into(),
                    diagnostics,
                    sources: Vec::new(),
                };
                subs.dispatch(&event);
                // a second batch must not change the answer
                subs.dispatch(&BuildFinished {
                    module: "Tests.Generated".into(),
                    diagnostics: Vec::new(),
                    sources: Vec::new(),
                });
            });
            Ok(())
        }

        fn module_name_for(&self, _path: &Path) -> Option<String> {
            Some("Tests.Generated".into())
        }
    }

    fn other_file(name: &str, line: u32) -> HostDiagnostic {
        HostDiagnostic {
            file: PathBuf::from(format!("Assets/Scripts/{name}.cs")),
            line,
            severity: Severity::Error,
            message: format!("{name} is broken"),
        }
    }

    fn verifier(host: Arc<ScriptedHost>, dir: &Path) -> BuildVerifier {
        BuildVerifier::new(host, dir.to_path_buf(), "cs", Duration::from_secs(5))
    }

    #[test]
    fn only_errors_for_the_submitted_file_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = ScriptedHost::new();
        host.extra = vec![other_file("A", 3), other_file("B", 7)];
        host.target_errors = vec![(12, "; expected")];
        let host = Arc::new(host);

        let check = verifier(Arc::clone(&host), dir.path()).check("class T {", "Move");

        assert_eq!(
            check.diagnostics,
            vec![CompilationDiagnostic {
                line: 12,
                message: "; expected".into()
            }]
        );
        assert!(check.module_name.is_none());
        assert!(host.subs.is_empty());
        assert_eq!(host.unsubscribes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clean_build_keeps_file_and_reports_module() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = ScriptedHost::new();
        host.extra = vec![other_file("A", 3)];
        let host = Arc::new(host);

        let check = verifier(host, dir.path()).check("class T {}", "Move");

        assert!(check.is_clean());
        assert_eq!(check.module_name.as_deref(), Some("Tests.Generated"));
        assert!(check.file_path.exists());
        assert_eq!(fs::read_to_string(&check.file_path).unwrap(), "class T {}");
        let name = check.file_path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("Move_") && name.ends_with(".cs"));
    }

    #[test]
    fn submission_failure_resolves_with_synthetic_diagnostic() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = ScriptedHost::new();
        host.fail_submit = true;
        let host = Arc::new(host);

        let check = verifier(Arc::clone(&host), dir.path()).check("class T {}", "Move");

        assert_eq!(check.diagnostics.len(), 1);
        assert_eq!(check.diagnostics[0].line, 0);
        assert!(check.diagnostics[0].message.contains("asset database locked"));
        assert!(host.subs.is_empty());
        assert_eq!(host.unsubscribes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_notification_times_out_as_build_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut host = ScriptedHost::new();
        host.silent = true;
        let host = Arc::new(host);

        let v = BuildVerifier::new(
            Arc::clone(&host) as Arc<dyn BuildHost>,
            dir.path().to_path_buf(),
            "cs",
            Duration::from_millis(50),
        );
        let check = v.check("class T {}", "Move");

        assert_eq!(check.diagnostics.len(), 1);
        assert!(check.diagnostics[0].message.contains("did not finish"));
        assert!(host.subs.is_empty());
    }

    #[test]
    fn unwritable_temp_dir_never_subscribes() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "x").unwrap();
        let host = Arc::new(ScriptedHost::new());

        let v = verifier(Arc::clone(&host), &blocker.join("nested"));
        let check = v.check("class T {}", "Move");

        assert_eq!(check.diagnostics.len(), 1);
        assert_eq!(host.unsubscribes.load(Ordering::SeqCst), 0);
        assert!(host.subs.is_empty());
    }

    #[test]
    fn temp_names_are_unique_per_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let host = Arc::new(ScriptedHost::new());
        let v = verifier(host, dir.path());

        let a = v.check("class A {}", "Move");
        let b = v.check("class A {}", "Move");
        assert_ne!(a.file_path, b.file_path);
    }

    #[test]
    fn discard_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let host = Arc::new(ScriptedHost::new());
        let v = verifier(host, dir.path());

        let check = v.check("class A {}", "Move");
        v.discard(&check.file_path);
        v.discard(&check.file_path);
        assert!(!check.file_path.exists());
    }

    #[test]
    fn double_release_unsubscribes_once() {
        let host = ScriptedHost::new();
        let mut sub = Subscription::new(&host, Arc::new(|_: &BuildFinished| {}));
        sub.release();
        sub.release();
        drop(sub);
        assert_eq!(host.unsubscribes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn diagnostics_render_one_per_line() {
        let text = format_diagnostics(&[
            CompilationDiagnostic { line: 3, message: "a".into() },
            CompilationDiagnostic { line: 9, message: "b".into() },
        ]);
        assert_eq!(text, "Line 3: a\nLine 9: b");
    }

    /// Replays a clean build of an earlier submission before answering.
    struct LateHost {
        subs: BuildSubscribers,
    }

    impl BuildHost for LateHost {
        fn subscribe(&self, handler: BuildHandler) -> SubscriptionId {
            self.subs.subscribe(handler)
        }
        fn unsubscribe(&self, id: SubscriptionId) {
            self.subs.unsubscribe(id)
        }
        fn import_and_build(&self, path: &Path) -> Result<(), HostError> {
            self.subs.dispatch(&BuildFinished {
                module: "Tests.Generated".into(),
                diagnostics: Vec::new(),
                sources: vec![PathBuf::from("Tests/Temp/Move_stale.cs")],
            });
            self.subs.dispatch(&BuildFinished {
                module: "Tests.Generated".into(),
                diagnostics: vec![HostDiagnostic {
                    file: path.to_path_buf(),
                    line: 4,
                    severity: Severity::Error,
                    message: "; expected".into(),
                }],
                sources: vec![path.to_path_buf()],
            });
            Ok(())
        }
        fn module_name_for(&self, _path: &Path) -> Option<String> {
            Some("Tests.Generated".into())
        }
    }

    #[test]
    fn builds_started_for_another_file_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let host = Arc::new(LateHost {
            subs: BuildSubscribers::default(),
        });

        let check = BuildVerifier::new(host, dir.path().to_path_buf(), "cs", Duration::from_secs(5))
            .check("class T {", "Move");

        assert!(!check.is_clean());
        assert_eq!(check.diagnostics[0].line, 4);
    }
}
