//! Function-URL event boundary.
//!
//! An event carries the generation request as a JSON string in `body`
//! (base64 when `isBase64Encoded`). The response carries the asset base64
//! encoded; failures carry a JSON error string and no headers.
use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::request::{GenerationParams, Submission};
use crate::api::routes::AppState;
use crate::backend::AssetResult;
use crate::error::{AppError, AppResult};
use crate::media::AcceptHeader;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionUrlEvent {
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub is_base64_encoded: bool,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl FunctionUrlEvent {
    pub fn with_body(body: impl Into<String>) -> Self {
        FunctionUrlEvent {
            body: Some(body.into()),
            ..Default::default()
        }
    }

    /// Header lookup ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    fn request_body(&self) -> AppResult<Vec<u8>> {
        let Some(body) = self.body.as_deref() else {
            return Ok(b"{}".to_vec());
        };
        if self.is_base64_encoded {
            STANDARD
                .decode(body.trim())
                .map_err(|e| AppError::InvalidRequest(format!("body is not base64: {e}")))
        } else {
            Ok(body.as_bytes().to_vec())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionUrlResponse {
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    pub body: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_base64_encoded: bool,
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

impl FunctionUrlResponse {
    /// `statusCode` mirrors the status the backend reported for the asset.
    pub fn asset(asset: &AssetResult) -> Self {
        FunctionUrlResponse {
            status_code: asset.status,
            headers: HashMap::from([("Content-Type".to_string(), asset.content_type.clone())]),
            body: STANDARD.encode(&asset.bytes),
            is_base64_encoded: true,
        }
    }

    pub fn error(err: &AppError) -> Self {
        FunctionUrlResponse {
            status_code: err.status_code().as_u16(),
            headers: HashMap::new(),
            body: err.body().to_string(),
            is_base64_encoded: false,
        }
    }
}

/// Run one function-URL event through injection, submission and
/// negotiation. Every outcome becomes a response.
pub async fn handle_event(state: &AppState, event: FunctionUrlEvent) -> FunctionUrlResponse {
    if state.debug_header {
        for (name, value) in &event.headers {
            tracing::info!(header = %name, value = %value, "Event header");
        }
    }

    match run_event(state, &event).await {
        Ok(asset) => FunctionUrlResponse::asset(&asset),
        Err(e) => {
            match &e {
                AppError::MissingParameter(field) => tracing::error!(field, "Event is missing a required parameter"),
                other => tracing::error!(error = %other, "Event failed"),
            }
            FunctionUrlResponse::error(&e)
        }
    }
}

async fn run_event(state: &AppState, event: &FunctionUrlEvent) -> AppResult<AssetResult> {
    let body = event.request_body()?;
    let request: Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::InvalidRequest(format!("body is not valid JSON: {e}")))?;
    let params = GenerationParams::from_value(request)?;
    tracing::info!(prompt_file = %params.prompt_file, "Handling function URL event");

    let accept = AcceptHeader::from_header(event.header("accept"));
    state.invoke(Submission::Generate(params), &accept).await
}
