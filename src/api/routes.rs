//! Shared application state and the axum router.
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::handlers;
use crate::api::request::Submission;
use crate::backend::{AssetResult, InvocationClient};
use crate::config::Config;
use crate::error::AppResult;
use crate::media::{AcceptHeader, ResponseTranscoder};
use crate::prompt::ParameterInjector;
use crate::workflow::{GraphDocument, TemplateStore};

pub struct AppState {
    pub backend: Arc<dyn InvocationClient>,
    pub templates: TemplateStore,
    pub injector: ParameterInjector,
    pub transcoder: ResponseTranscoder,
    pub debug_header: bool,
}

impl AppState {
    pub fn new(backend: Arc<dyn InvocationClient>, templates: TemplateStore) -> Self {
        AppState {
            backend,
            templates,
            injector: ParameterInjector::new(),
            transcoder: ResponseTranscoder::default(),
            debug_header: false,
        }
    }

    pub fn from_config(backend: Arc<dyn InvocationClient>, config: &Config) -> Self {
        AppState {
            transcoder: ResponseTranscoder::new(config.jpeg_quality),
            debug_header: config.debug_header,
            ..Self::new(backend, TemplateStore::new(&config.workflow_dir))
        }
    }

    /// Produce the graph a submission stands for. Templates are loaded fresh
    /// on every call.
    pub async fn render(&self, submission: Submission) -> AppResult<GraphDocument> {
        match submission {
            Submission::Generate(params) => {
                let mut graph = self.templates.load(&params.prompt_file).await?;
                self.injector.inject(
                    &mut graph,
                    params.seed,
                    &params.positive_prompt,
                    &params.negative_prompt,
                );
                Ok(graph)
            }
            Submission::Raw(graph) => Ok(graph),
        }
    }

    /// Render, submit to the backend and negotiate the response type.
    pub async fn invoke(&self, submission: Submission, accept: &AcceptHeader) -> AppResult<AssetResult> {
        let graph = self.render(submission).await?;
        tracing::debug!(backend = self.backend.name(), nodes = graph.len(), "Submitting workflow");
        let asset = self.backend.submit(&graph).await?;
        tracing::info!(
            backend = self.backend.name(),
            content_type = %asset.content_type,
            bytes = asset.bytes.len(),
            "Received asset"
        );
        Ok(self.transcoder.transcode(asset, accept))
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ping", get(handlers::ping))
        .route("/invocations", post(handlers::invocations))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
