//! Loading named workflow templates from the template directory.
use std::path::PathBuf;

use tokio::fs;

use crate::error::{AppError, AppResult};
use crate::workflow::graph::GraphDocument;

pub const DEFAULT_TEMPLATE: &str = "workflow_api.json";

#[derive(Debug, Clone)]
pub struct TemplateStore {
    root: PathBuf,
}

impl TemplateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        TemplateStore { root: root.into() }
    }

    /// Load and parse a template by file name. Every call returns a fresh
    /// document; nothing is cached.
    pub async fn load(&self, name: &str) -> AppResult<GraphDocument> {
        let path = self.resolve(name)?;
        tracing::info!(template = %name, path = %path.display(), "Loading workflow template");

        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::TemplateNotFound(name.to_string()));
            }
            Err(e) => return Err(AppError::Io(e)),
        };

        let doc = GraphDocument::from_slice(&bytes)
            .map_err(|e| AppError::TemplateInvalid(format!("{name}: {e}")))?;
        Ok(unwrap_prompt_envelope(doc))
    }

    /// Template names are plain file names inside the root directory.
    fn resolve(&self, name: &str) -> AppResult<PathBuf> {
        let trimmed = name.trim();
        let valid = !trimmed.is_empty()
            && !trimmed.contains(&['/', '\\'][..])
            && trimmed != "."
            && trimmed != "..";
        if !valid {
            return Err(AppError::InvalidRequest(format!("invalid prompt_file '{name}'")));
        }
        Ok(self.root.join(trimmed))
    }
}

/// Templates exported as `{"prompt": {...}}` are unwrapped to the bare graph.
pub fn unwrap_prompt_envelope(doc: GraphDocument) -> GraphDocument {
    let is_envelope = doc.len() == 1
        && doc
            .node("prompt")
            .is_some_and(|node| node.class_type.is_none() && node.inputs.is_none());
    if !is_envelope {
        return doc;
    }
    match doc.to_value() {
        serde_json::Value::Object(mut map) => match map.remove("prompt") {
            Some(inner @ serde_json::Value::Object(_)) => {
                GraphDocument::from_value(inner).unwrap_or(doc)
            }
            _ => doc,
        },
        _ => doc,
    }
}
