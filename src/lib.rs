//! Workflow invocation proxy library
//!
//! Modules:
//! - `api`: Axum handlers, router setup and the function-URL event handler.
//! - `backend`: The `InvocationClient` trait with ComfyUI and SageMaker implementations.
//! - `comfyui`: REST client, websocket messages and the completion-tracking session.
//! - `media`: `Accept` parsing and PNG to JPEG transcoding.
//! - `prompt`: Seed and prompt-text injection into workflow graphs.
//! - `workflow`: Graph documents and the template directory.
//! - `utils`: Saving generated assets to disk.
//! - `config`: Env-driven configuration loader.
//! - `error`: Common error type and alias.
//!
//! Re-exports are provided for common types: `Config`, `AppState`,
//! `InvocationClient`, `ParameterInjector`, `GraphDocument` and `TemplateStore`.
pub mod api;
pub mod backend;
pub mod comfyui;
pub mod media;
pub mod prompt;
pub mod workflow;
pub mod utils;
pub mod config;
pub mod error;

pub use api::AppState;
pub use backend::{AssetResult, InvocationClient};
pub use config::Config;
pub use error::{AppError, AppResult};
pub use prompt::ParameterInjector;
pub use workflow::{GraphDocument, TemplateStore};
