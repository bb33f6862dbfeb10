//! View rendering contract.
//!
//! Handlers only ever ask for `render(name, view_model) -> bytes`. The
//! shipped [`DirTemplates`] engine loads `<dir>/<name>.<ext>` once at
//! startup and embeds the JSON view model where the page carries the
//! `{{ view_model }}` marker; pages hydrate from that JSON client-side.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde_json::{Map, Value};
use thiserror::Error;

/// The placeholder replaced by the serialized view model.
pub const VIEW_MODEL_MARKER: &str = "{{ view_model }}";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template '{0}' not found")]
    NotFound(String),
    #[error("failed to read templates: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize view model: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Anything that can turn a named view plus a view model into bytes.
pub trait TemplateEngine: Send + Sync {
    fn render(&self, name: &str, view: &Map<String, Value>) -> Result<Vec<u8>, TemplateError>;
}

/// Pages loaded from a directory at startup; immutable afterwards.
#[derive(Debug, Clone, Default)]
pub struct DirTemplates {
    pages: HashMap<String, String>,
}

impl DirTemplates {
    /// Load every `*.<extension>` file under `dir`, keyed by file stem.
    pub fn load(dir: &Path, extension: &str) -> Result<Self, TemplateError> {
        let mut pages = HashMap::new();

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(extension) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            pages.insert(stem.to_string(), fs::read_to_string(&path)?);
        }

        tracing::info!(dir = %dir.display(), count = pages.len(), "Templates loaded");
        Ok(Self { pages })
    }

    pub fn from_pages<I, K, V>(pages: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            pages: pages.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl TemplateEngine for DirTemplates {
    fn render(&self, name: &str, view: &Map<String, Value>) -> Result<Vec<u8>, TemplateError> {
        let page = self
            .pages
            .get(name)
            .ok_or_else(|| TemplateError::NotFound(name.to_string()))?;

        // `</` would let a string value close the surrounding <script>.
        let json = serde_json::to_string(view)?.replace("</", "<\\/");
        Ok(page.replace(VIEW_MODEL_MARKER, &json).into_bytes())
    }
}
