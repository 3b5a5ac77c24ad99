//! Tera-backed prompt assembly.
//!
//! Each prompt is a `<Base>_System` / `<Base>_User` template pair. A template
//! is looked up in the user override directory first, then the packaged
//! default directory, then the copy compiled into the binary. Parsed templates
//! are cached under their resolved location.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tera::{Context, Tera};

use crate::config::Config;
use crate::error::TemplateError;
use crate::llm::prompt::Prompt;
use crate::testgen::request::RequestKind;

const TEMPLATE_EXT: &str = "tera";

const BUILTIN: &[(&str, &str)] = &[
    ("Intention_System", include_str!("../../templates/Intention_System.tera")),
    ("Intention_User", include_str!("../../templates/Intention_User.tera")),
    ("Generator_System", include_str!("../../templates/Generator_System.tera")),
    ("Generator_User", include_str!("../../templates/Generator_User.tera")),
    ("Correction_System", include_str!("../../templates/Correction_System.tera")),
    ("Correction_User", include_str!("../../templates/Correction_User.tera")),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Intention,
    Generator,
    Correction,
}

impl PromptKind {
    fn base_name(self) -> &'static str {
        match self {
            PromptKind::Intention => "Intention",
            PromptKind::Generator => "Generator",
            PromptKind::Correction => "Correction",
        }
    }
}

pub struct PromptAssembler {
    custom_dir: Option<PathBuf>,
    default_dir: PathBuf,
    cache: Mutex<Tera>,
}

impl PromptAssembler {
    pub fn new(custom_dir: Option<PathBuf>, default_dir: PathBuf) -> Self {
        Self {
            custom_dir,
            default_dir,
            cache: Mutex::new(Tera::default()),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            cfg.custom_templates_dir.as_ref().map(|p| cfg.project_path(p)),
            cfg.default_templates_dir.clone(),
        )
    }

    pub fn intention(
        &self,
        kind: RequestKind,
        sut_class: &str,
        related: &[String],
        selector: &str,
    ) -> Result<Prompt, TemplateError> {
        let mut ctx = Context::new();
        ctx.insert("kind", kind.label());
        ctx.insert("sut_class", sut_class);
        ctx.insert("sut_related_methods", related);
        ctx.insert("sut_method", selector);
        self.build(PromptKind::Intention, &ctx)
    }

    pub fn generator(
        &self,
        kind: RequestKind,
        intention: &str,
        sut_class: &str,
        related: &[String],
        selector: &str,
    ) -> Result<Prompt, TemplateError> {
        let mut ctx = Context::new();
        ctx.insert("kind", kind.label());
        ctx.insert("intention", intention);
        ctx.insert("sut_class", sut_class);
        ctx.insert("sut_related_methods", related);
        ctx.insert("sut_method", selector);
        self.build(PromptKind::Generator, &ctx)
    }

    pub fn correction(
        &self,
        kind: RequestKind,
        code: &str,
        errors: &str,
    ) -> Result<Prompt, TemplateError> {
        let mut ctx = Context::new();
        ctx.insert("kind", kind.label());
        ctx.insert("code", code);
        ctx.insert("errors", errors);
        self.build(PromptKind::Correction, &ctx)
    }

    fn build(&self, kind: PromptKind, ctx: &Context) -> Result<Prompt, TemplateError> {
        let base = kind.base_name();
        let system = self.render(&format!("{base}_System"), ctx)?;
        let user = self.render(&format!("{base}_User"), ctx)?;
        Ok(Prompt::new(system.trim(), user.trim()))
    }

    fn render(&self, name: &str, ctx: &Context) -> Result<String, TemplateError> {
        let source = self.resolve(name)?;
        let key = source.cache_key();

        let mut tera = self.cache.lock().map_err(|_| TemplateError::Lock)?;

        if !tera.get_template_names().any(|n| n == key) {
            let raw = source.read()?;
            tera.add_raw_template(&key, &raw)
                .map_err(|source| TemplateError::Render {
                    name: name.to_string(),
                    source,
                })?;
            tracing::debug!(template = %key, "template parsed");
        }

        tera.render(&key, ctx).map_err(|source| TemplateError::Render {
            name: name.to_string(),
            source,
        })
    }

    fn resolve(&self, name: &str) -> Result<TemplateSource, TemplateError> {
        let file_name = format!("{name}.{TEMPLATE_EXT}");

        if let Some(dir) = self.custom_dir.as_deref().filter(|d| d.is_dir()) {
            let path = dir.join(&file_name);
            if path.is_file() {
                return Ok(TemplateSource::File(path));
            }
        }

        let path = self.default_dir.join(&file_name);
        if path.is_file() {
            return Ok(TemplateSource::File(path));
        }

        BUILTIN
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(n, body)| TemplateSource::Builtin(n, body))
            .ok_or_else(|| TemplateError::NotFound(file_name))
    }
}

enum TemplateSource {
    File(PathBuf),
    Builtin(&'static str, &'static str),
}

impl TemplateSource {
    fn cache_key(&self) -> String {
        match self {
            TemplateSource::File(p) => p.to_string_lossy().into_owned(),
            TemplateSource::Builtin(name, _) => format!("builtin:{name}.{TEMPLATE_EXT}"),
        }
    }

    fn read(&self) -> Result<String, TemplateError> {
        match self {
            TemplateSource::File(p) => read_template(p),
            TemplateSource::Builtin(_, body) => Ok((*body).to_string()),
        }
    }
}

fn read_template(path: &Path) -> Result<String, TemplateError> {
    fs::read_to_string(path).map_err(|source| TemplateError::Io {
        path: path.to_path_buf(),
        source,
    })
}
