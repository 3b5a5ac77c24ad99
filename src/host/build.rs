use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::thread;

use regex::Regex;

use crate::config::Config;
use crate::error::HostError;
use crate::shell::{expand_template, run_shell, shell_quote};
use crate::testgen::build::{
    BuildFinished, BuildHandler, BuildHost, BuildSubscribers, HostDiagnostic, Severity,
    SubscriptionId,
};

const MAX_DIAGNOSTICS: usize = 500;

/// Files that mark the root of a build unit, by glob pattern.
const MODULE_MARKERS: &[&str] = &["*.asmdef", "*.csproj", "Cargo.toml"];

/// Build host backed by a shell command.
///
/// `import_and_build` returns at once; the command runs on its own thread
/// and its parsed diagnostics are broadcast to every subscriber.
/// The command may use `{file}` and `{module}` placeholders.
pub struct CommandBuildHost {
    root: PathBuf,
    command: String,
    subscribers: Arc<BuildSubscribers>,
}

impl CommandBuildHost {
    pub fn new(root: impl Into<PathBuf>, command: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            command: command.into(),
            subscribers: Arc::new(BuildSubscribers::default()),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.project_root.clone(), cfg.build_command.clone())
    }
}

impl BuildHost for CommandBuildHost {
    fn subscribe(&self, handler: BuildHandler) -> SubscriptionId {
        self.subscribers.subscribe(handler)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.unsubscribe(id);
    }

    fn import_and_build(&self, path: &Path) -> Result<(), HostError> {
        if !path.is_file() {
            return Err(HostError::submission(format!(
                "{} is not a file",
                path.display()
            )));
        }

        let module = self.module_name_for(path).unwrap_or_default();
        let quoted_file = shell_quote(&path.to_string_lossy());
        let quoted_module = shell_quote(&module);
        let cmd = expand_template(
            &self.command,
            &[
                ("file", quoted_file.as_str()),
                ("module", quoted_module.as_str()),
            ],
        );

        let root = self.root.clone();
        let file = path.to_path_buf();
        let subscribers = Arc::clone(&self.subscribers);

        thread::Builder::new()
            .name("build-host".into())
            .spawn(move || {
                tracing::debug!(command = %cmd, "build started");
                let diagnostics = match run_shell(&cmd, &root, None) {
                    Ok(out) => {
                        let text = out.combined();
                        let mut diags = parse_diagnostics(&text, &root);
                        let has_errors = diags.iter().any(|d| d.severity == Severity::Error);
                        if !out.success && !has_errors {
                            // failed with nothing we could attribute; blame the submitted file
                            diags.push(HostDiagnostic {
                                file: file.clone(),
                                line: 0,
                                severity: Severity::Error,
                                message: format!(
                                    "build exited with code {}: {}",
                                    out.exit_code,
                                    tail(&text, 400)
                                ),
                            });
                        }
                        diags
                    }
                    Err(e) => vec![HostDiagnostic {
                        file: file.clone(),
                        line: 0,
                        severity: Severity::Error,
                        message: format!("build command failed to start: {e}"),
                    }],
                };

                tracing::debug!(count = diagnostics.len(), "build finished");
                subscribers.dispatch(&BuildFinished {
                    module,
                    diagnostics,
                    sources: vec![file],
                });
            })?;

        Ok(())
    }

    fn module_name_for(&self, path: &Path) -> Option<String> {
        let mut dir = path.parent();

        while let Some(d) = dir {
            if let Some(name) = module_marker_in(d) {
                return Some(name);
            }
            if d == self.root || d.as_os_str().is_empty() {
                break;
            }
            dir = d.parent();
        }
        None
    }
}

fn module_marker_in(dir: &Path) -> Option<String> {
    for marker in MODULE_MARKERS {
        let pattern = dir.join(marker);
        let Some(pattern) = pattern.to_str() else {
            continue;
        };
        let Ok(paths) = glob::glob(pattern) else {
            continue;
        };

        for hit in paths.flatten() {
            let name = if *marker == "Cargo.toml" {
                dir.file_name().and_then(|n| n.to_str()).map(str::to_string)
            } else {
                hit.file_stem().and_then(|n| n.to_str()).map(str::to_string)
            };
            if name.is_some() {
                return name;
            }
        }
    }
    None
}

/* ============================================================
   Output parsing
   ============================================================ */

fn msbuild_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(?P<file>[^\n(]+?)\((?P<line>\d+),(?P<col>\d+)\):\s*(?P<sev>error|warning|info)\s+(?P<code>\w+):\s*(?P<msg>.*?)(?:\s+\[[^\]]*\])?\s*$",
        )
        .expect("msbuild diagnostic regex")
    })
}

fn gnu_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(?P<file>[^:\n]+):(?P<line>\d+):(?P<col>\d+):\s*(?:(?P<sev>error|warning|note|info)(?:\[\w+\])?:\s*)?(?P<msg>.*)$",
        )
        .expect("gnu diagnostic regex")
    })
}

/// Diagnostics from build output in `file(line,col): error CODE: msg` or
/// `file:line:col: [severity:] msg` form. Relative paths resolve against
/// `root`; duplicates are dropped.
pub fn parse_diagnostics(output: &str, root: &Path) -> Vec<HostDiagnostic> {
    let mut out: Vec<HostDiagnostic> = Vec::new();

    for line in output.lines() {
        let Some(c) = msbuild_re()
            .captures(line)
            .or_else(|| gnu_re().captures(line))
        else {
            continue;
        };

        let file = c.name("file").map(|m| m.as_str().trim()).unwrap_or("");
        let line_no = c
            .name("line")
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .unwrap_or(0);
        let severity = match c.name("sev").map(|m| m.as_str()) {
            Some("warning") => Severity::Warning,
            Some("note") | Some("info") => Severity::Info,
            _ => Severity::Error,
        };
        let message = match c.name("code") {
            Some(code) => format!(
                "{}: {}",
                code.as_str(),
                c.name("msg").map(|m| m.as_str()).unwrap_or("")
            ),
            None => c.name("msg").map(|m| m.as_str()).unwrap_or("").to_string(),
        };

        let path = PathBuf::from(file);
        let diag = HostDiagnostic {
            file: if path.is_absolute() { path } else { root.join(path) },
            line: line_no,
            severity,
            message,
        };

        if !out.contains(&diag) {
            out.push(diag);
        }
        if out.len() >= MAX_DIAGNOSTICS {
            break;
        }
    }

    out
}

fn tail(s: &str, n: usize) -> String {
    let count = s.chars().count();
    if count <= n {
        return s.trim().to_string();
    }
    let tail: String = s.chars().skip(count - n).collect();
    format!("...{}", tail.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use std::fs;
    use std::time::Duration;

    #[test]
    fn parses_msbuild_and_gnu_formats() {
        let root = Path::new("/proj");
        let out = "\
Tests/Temp/Move_1.cs(12,5): error CS1002: ; expected [/proj/Tests.csproj]
Tests/Temp/Move_1.cs(12,5): error CS1002: ; expected [/proj/Tests.csproj]
/abs/Other.cs(3,1): warning CS0168: unused
src/lib.rs:4:9: error[E0425]: cannot find value `x`
src/lib.rs:7:1: note: defined here
Build FAILED.
";
        let diags = parse_diagnostics(out, root);

        assert_eq!(diags.len(), 4);
        assert_eq!(diags[0].file, PathBuf::from("/proj/Tests/Temp/Move_1.cs"));
        assert_eq!(diags[0].line, 12);
        assert_eq!(diags[0].severity, Severity::Error);
        assert_eq!(diags[0].message, "CS1002: ; expected");

        assert_eq!(diags[1].file, PathBuf::from("/abs/Other.cs"));
        assert_eq!(diags[1].severity, Severity::Warning);

        assert_eq!(diags[2].message, "cannot find value `x`");
        assert_eq!(diags[2].severity, Severity::Error);
        assert_eq!(diags[3].severity, Severity::Info);
    }

    #[test]
    fn module_is_nearest_marker() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("Tests/Temp")).unwrap();
        fs::write(root.join("Tests/Tests.Generated.asmdef"), "{}").unwrap();
        fs::write(root.join("Game.csproj"), "").unwrap();
        fs::create_dir_all(root.join("Other")).unwrap();

        let host = CommandBuildHost::new(root, "true");
        assert_eq!(
            host.module_name_for(&root.join("Tests/Temp/X.cs")).as_deref(),
            Some("Tests.Generated")
        );
        assert_eq!(host.module_name_for(&root.join("Other/Y.cs")).as_deref(), Some("Game"));
    }

    #[test]
    fn build_output_is_broadcast_to_subscribers() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("Move_1.cs");
        fs::write(&file, "class T {").unwrap();

        let host = CommandBuildHost::new(
            dir.path(),
            "printf '%s(1,10): error CS1513: } expected\\n' {file}; exit 1",
        );
        let (tx, rx) = bounded(1);
        host.subscribe(Arc::new(move |e: &BuildFinished| {
            let _ = tx.try_send(e.diagnostics.clone());
        }));

        host.import_and_build(&file).unwrap();
        let diags = rx.recv_timeout(Duration::from_secs(10)).unwrap();

        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].file, file);
        assert_eq!(diags[0].message, "CS1513: } expected");
    }

    #[test]
    fn unexplained_failure_is_blamed_on_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("Move_1.cs");
        fs::write(&file, "class T {}").unwrap();

        let host = CommandBuildHost::new(dir.path(), "echo linker exploded; exit 3");
        let (tx, rx) = bounded(1);
        host.subscribe(Arc::new(move |e: &BuildFinished| {
            let _ = tx.try_send(e.diagnostics.clone());
        }));

        host.import_and_build(&file).unwrap();
        let diags = rx.recv_timeout(Duration::from_secs(10)).unwrap();

        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].file, file);
        assert!(diags[0].message.contains("linker exploded"));
    }

    #[test]
    fn missing_file_is_rejected_synchronously() {
        let dir = tempfile::tempdir().unwrap();
        let host = CommandBuildHost::new(dir.path(), "true");
        assert!(host.import_and_build(&dir.path().join("nope.cs")).is_err());
    }

    #[test]
    fn late_build_cannot_answer_the_next_submission() {
        use crate::testgen::build::BuildVerifier;

        let dir = tempfile::tempdir().unwrap();
        let host: Arc<dyn BuildHost> = Arc::new(CommandBuildHost::new(
            dir.path(),
            "sleep 1; printf '%s(1,1): error CS1002: ; expected\\n' {file}; exit 1",
        ));
        let temp = dir.path().join("Temp");
        let impatient = BuildVerifier::new(Arc::clone(&host), temp.clone(), "cs", Duration::from_millis(700));
        let patient = BuildVerifier::new(host, temp, "cs", Duration::from_secs(10));

        let first = impatient.check("class T {", "Move");
        assert!(first.diagnostics[0].message.contains("did not finish"));
        impatient.discard(&first.file_path);

        // the first build finishes while this one is still running
        let second = patient.check("class T {", "Move");
        assert!(!second.is_clean());
        assert_eq!(second.diagnostics[0].line, 1);
        assert!(second.diagnostics[0].message.contains("; expected"));
    }
}
