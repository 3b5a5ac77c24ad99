use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// What kind of test is being asked for; decides how the selector is read.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RequestKind {
    /// Selector is a method name.
    UnitMethod,
    /// Selector is a lifecycle hook name (`Start`, `Update`, ...).
    BehaviorLifecycle,
    /// Selector is a free-text scenario description.
    Integration,
}

impl RequestKind {
    /// Short label exposed to prompt templates.
    pub fn label(self) -> &'static str {
        match self {
            RequestKind::UnitMethod => "unit",
            RequestKind::BehaviorLifecycle => "behavior",
            RequestKind::Integration => "integration",
        }
    }
}

/// One orchestration run's input. Built once, never mutated.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /* identity */
    target_path: PathBuf,
    selector: String,
    kind: RequestKind,

    /* grounding */
    target_source: String,
    related_members: Vec<String>,
}

impl GenerationRequest {
    pub fn new(
        target_path: impl Into<PathBuf>,
        target_source: impl Into<String>,
        selector: impl Into<String>,
        kind: RequestKind,
    ) -> Self {
        Self {
            target_path: target_path.into(),
            selector: selector.into(),
            kind,
            target_source: target_source.into(),
            related_members: Vec::new(),
        }
    }

    /// Read the target unit from disk.
    pub fn from_file(
        target_path: &Path,
        selector: impl Into<String>,
        kind: RequestKind,
    ) -> io::Result<Self> {
        let source = fs::read_to_string(target_path)?;
        Ok(Self::new(target_path, source, selector, kind))
    }

    /// Attach the members a static-analysis slicer judged relevant.
    pub fn with_related_members(mut self, members: Vec<String>) -> Self {
        self.related_members = members;
        self
    }

    pub fn target_path(&self) -> &Path {
        &self.target_path
    }

    pub fn target_source(&self) -> &str {
        &self.target_source
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn related_members(&self) -> &[String] {
        &self.related_members
    }

    /// Filesystem-safe stem for temp files, derived from the selector.
    pub fn base_name_hint(&self) -> String {
        let mut name: String = self
            .selector
            .chars()
            .take(40)
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();

        name = name.trim_matches('_').to_string();

        if name.is_empty() {
            return "GeneratedTest".to_string();
        }
        if name.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            name.insert(0, '_');
        }
        name
    }
}
