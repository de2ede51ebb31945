//! Inference backends behind one submit-graph, get-asset contract.
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{BackendKind, Config};
use crate::error::{AppError, AppResult};
use crate::workflow::graph::GraphDocument;

pub mod comfyui;
pub mod sagemaker;

pub use comfyui::ComfyUIBackend;
pub use sagemaker::SageMakerBackend;

pub const OCTET_STREAM: &str = "application/octet-stream";

/// The generated output of one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetResult {
    pub bytes: Vec<u8>,
    pub content_type: String,
    /// HTTP status the backend answered with; always a success code.
    pub status: u16,
}

impl AssetResult {
    pub fn new(bytes: Vec<u8>, content_type: impl Into<String>) -> Self {
        AssetResult {
            bytes,
            content_type: content_type.into(),
            status: 200,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }
}

/// A backend that renders a workflow graph into exactly one asset.
///
/// Implementations do not retry; a timeout is returned to the caller as
/// [`AppError::BackendTimeout`].
#[async_trait]
pub trait InvocationClient: Send + Sync {
    /// Submit a finalized graph and wait for its primary asset.
    async fn submit(&self, graph: &GraphDocument) -> AppResult<AssetResult>;

    /// Single-attempt liveness check.
    async fn ping(&self) -> AppResult<()>;

    fn name(&self) -> &'static str;
}

/// Build the backend selected by `BACKEND`.
pub async fn from_config(config: &Config) -> AppResult<Arc<dyn InvocationClient>> {
    match config.backend {
        BackendKind::ComfyUI => Ok(Arc::new(ComfyUIBackend::from_config(config)?)),
        BackendKind::SageMaker => {
            let endpoint = config
                .endpoint_name
                .clone()
                .ok_or_else(|| AppError::Config("ENDPOINT_NAME is not set".to_string()))?;
            Ok(Arc::new(SageMakerBackend::from_env(endpoint, config.submit_timeout, config.ping_timeout).await))
        }
    }
}

/// Best-effort content type for bytes a backend did not label.
pub fn sniff_content_type(bytes: &[u8]) -> &'static str {
    match image::guess_format(bytes) {
        Ok(format) => format.to_mime_type(),
        Err(_) => OCTET_STREAM,
    }
}
