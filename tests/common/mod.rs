//! Shared helpers for integration tests: a recording stub backend, template
//! directories and request builders.
#![allow(dead_code)]

use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request};
use axum::response::Response;
use axum::Router;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use tempfile::TempDir;
use tower::ServiceExt;

use comfyui_invoke_proxy::backend::{AssetResult, InvocationClient};
use comfyui_invoke_proxy::{api, AppError, AppResult, AppState, GraphDocument, TemplateStore};

pub const FIXTURE_TEMPLATE: &str = include_str!("../fixtures/workflow_api.json");

/// What the stub answers to every submission.
#[derive(Clone)]
pub enum Reply {
    Asset(AssetResult),
    Timeout,
    Unavailable,
}

pub struct StubBackend {
    reply: Reply,
    ping_ok: bool,
    submissions: Mutex<Vec<GraphDocument>>,
}

impl StubBackend {
    pub fn new(reply: Reply) -> Arc<Self> {
        Arc::new(StubBackend {
            reply,
            ping_ok: true,
            submissions: Mutex::new(Vec::new()),
        })
    }

    pub fn unreachable() -> Arc<Self> {
        Arc::new(StubBackend {
            reply: Reply::Unavailable,
            ping_ok: false,
            submissions: Mutex::new(Vec::new()),
        })
    }

    pub fn submissions(&self) -> Vec<GraphDocument> {
        self.submissions.lock().unwrap().clone()
    }
}

#[async_trait]
impl InvocationClient for StubBackend {
    async fn submit(&self, graph: &GraphDocument) -> AppResult<AssetResult> {
        self.submissions.lock().unwrap().push(graph.clone());
        match &self.reply {
            Reply::Asset(asset) => Ok(asset.clone()),
            Reply::Timeout => Err(AppError::BackendTimeout(Duration::from_secs(1))),
            Reply::Unavailable => Err(AppError::BackendUnavailable("connection refused".into())),
        }
    }

    async fn ping(&self) -> AppResult<()> {
        if self.ping_ok {
            Ok(())
        } else {
            Err(AppError::BackendUnavailable("connection refused".into()))
        }
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

/// A template directory holding the fixture as `workflow_api.json`.
pub fn template_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("workflow_api.json"), FIXTURE_TEMPLATE).unwrap();
    dir
}

pub fn build_state(backend: Arc<StubBackend>, templates: &TempDir) -> Arc<AppState> {
    Arc::new(AppState::new(backend, TemplateStore::new(templates.path())))
}

pub fn build_app(state: Arc<AppState>) -> Router {
    api::router(state)
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, Rgba([10, 120, 200, 255]));
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

pub async fn post_invocation(app: Router, body: &str, accept: Option<&str>) -> Response {
    let mut request = Request::builder()
        .method(Method::POST)
        .uri("/invocations")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(accept) = accept {
        request = request.header(header::ACCEPT, accept);
    }
    app.oneshot(request.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response {
    app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    hyper::body::to_bytes(response.into_body()).await.unwrap().to_vec()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
