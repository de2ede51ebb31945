//! Axum request handlers for the HTTP API.
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::api::request::Submission;
use crate::api::routes::AppState;
use crate::error::AppResult;
use crate::media::AcceptHeader;

/// `GET /ping`: 200 with an empty body when the backend answers, else 500.
pub async fn ping(State(state): State<Arc<AppState>>) -> StatusCode {
    match state.backend.ping().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(backend = state.backend.name(), error = %e, "Backend ping failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// `POST /invocations`: run one generation and return the asset bytes.
pub async fn invocations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    if state.debug_header {
        log_headers(&headers);
    }

    let submission = Submission::from_body(&body)?;
    let accept = AcceptHeader::from_header(headers.get(header::ACCEPT).and_then(|v| v.to_str().ok()));
    let asset = state.invoke(submission, &accept).await?;

    let status = StatusCode::from_u16(asset.status).unwrap_or(StatusCode::OK);
    Ok((status, [(header::CONTENT_TYPE, asset.content_type)], asset.bytes).into_response())
}

fn log_headers(headers: &HeaderMap) {
    for (name, value) in headers {
        tracing::info!(header = %name, value = ?value, "Request header");
    }
}
