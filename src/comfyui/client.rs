//! Thin HTTP client for ComfyUI endpoints.
//!
//! - `queue_prompt` posts a graph to `/prompt` under a caller-chosen prompt id.
//! - `get_history` fetches `/history/{prompt_id}` as JSON.
//! - `get_image` proxies to `/view?filename=...&subfolder=...&type=...`.
//! - `ping` issues a `HEAD` on the server root.
use std::time::Duration;

use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::backend::{sniff_content_type, AssetResult};
use crate::error::{AppError, AppResult};
use crate::workflow::graph::GraphDocument;

/// Response of `POST /prompt`.
#[derive(Debug, Clone, Deserialize)]
pub struct QueuedPrompt {
    pub prompt_id: String,
    #[serde(default)]
    pub number: i64,
}

/// Location of an output file as reported in history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default = "default_folder_type")]
    pub folder_type: String,
}

fn default_folder_type() -> String {
    "output".to_string()
}

#[derive(Clone)]
pub struct ComfyUIClient {
    client: Client,
    base_url: String,
    request_timeout: Duration,
}

impl ComfyUIClient {
    pub fn new(base_url: String, request_timeout: Duration) -> Self {
        let base = base_url.trim_end_matches('/').to_string();
        ComfyUIClient {
            client: Client::new(),
            base_url: base,
            request_timeout,
        }
    }

    /// Queue a graph with ComfyUI under the given client and prompt ids.
    pub async fn queue_prompt(
        &self,
        graph: &GraphDocument,
        client_id: &str,
        prompt_id: &str,
    ) -> AppResult<QueuedPrompt> {
        let url = format!("{}/prompt", self.base_url);
        let body = json!({
            "prompt": graph,
            "client_id": client_id,
            "prompt_id": prompt_id,
        });
        tracing::info!(%url, prompt_id, "Sending prompt to ComfyUI");
        tracing::debug!(payload = %body, "Prompt payload");

        let response = self
            .client
            .post(&url)
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::from_transport(e, self.request_timeout))?;

        if response.status().is_success() {
            let queued: QueuedPrompt = response
                .json()
                .await
                .map_err(|e| AppError::MalformedResponse(format!("/prompt reply: {e}")))?;
            tracing::info!(prompt_id = %queued.prompt_id, number = queued.number, "Queued prompt");
            Ok(queued)
        } else {
            let status = response.status();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error body".to_string());
            let error_message = format!("Failed to queue prompt. Status: {status}, Body: {error_body}");
            tracing::error!("{}", error_message);
            Err(AppError::BackendRejected(error_message))
        }
    }

    /// Retrieve the history entry of one prompt.
    pub async fn get_history(&self, prompt_id: &str) -> AppResult<Value> {
        let url = format!("{}/history/{}", self.base_url, prompt_id);
        let response = self
            .client
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| AppError::from_transport(e, self.request_timeout))?;

        if response.status().is_success() {
            response
                .json()
                .await
                .map_err(|e| AppError::MalformedResponse(format!("history reply: {e}")))
        } else {
            Err(AppError::BackendRejected(format!(
                "Failed to get history: {:?}",
                response.status()
            )))
        }
    }

    /// Fetch an output file. The content type comes from the response header
    /// and is sniffed from the bytes when the header is missing.
    pub async fn get_image(&self, image: &ImageRef) -> AppResult<AssetResult> {
        let url = format!("{}/view", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(self.request_timeout)
            .query(image)
            .send()
            .await
            .map_err(|e| AppError::from_transport(e, self.request_timeout))?;

        if !response.status().is_success() {
            return Err(AppError::BackendRejected(format!(
                "Failed to get image '{}': {:?}",
                image.filename,
                response.status()
            )));
        }

        let status = response.status().as_u16();
        let declared = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::from_transport(e, self.request_timeout))?
            .to_vec();
        if bytes.is_empty() {
            return Err(AppError::MalformedResponse(format!(
                "empty body for image '{}'",
                image.filename
            )));
        }

        let content_type = declared.unwrap_or_else(|| sniff_content_type(&bytes).to_string());
        Ok(AssetResult::new(bytes, content_type).with_status(status))
    }

    /// `HEAD /` with the given timeout; succeeds on any 2xx.
    pub async fn ping(&self, timeout: Duration) -> AppResult<()> {
        let response = self
            .client
            .head(&self.base_url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| AppError::from_transport(e, timeout))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(AppError::BackendUnavailable(format!(
                "ComfyUI answered ping with {}",
                response.status()
            )))
        }
    }
}

/// Pick the primary output image of a prompt from its history entry.
///
/// Images saved to the `output` folder win over previews; within a class the
/// node with the smallest id wins. No image at all is a malformed response.
pub fn primary_image(history: &Value, prompt_id: &str) -> AppResult<ImageRef> {
    let outputs = history
        .get(prompt_id)
        .and_then(|entry| entry.get("outputs"))
        .and_then(Value::as_object)
        .ok_or_else(|| {
            AppError::MalformedResponse(format!("history has no outputs for prompt {prompt_id}"))
        })?;

    // serde_json maps iterate in key order.
    let images: Vec<ImageRef> = outputs
        .values()
        .filter_map(|node_output| node_output.get("images").and_then(Value::as_array))
        .flatten()
        .filter_map(|image| serde_json::from_value::<ImageRef>(image.clone()).ok())
        .collect();

    images
        .iter()
        .find(|image| image.folder_type == "output")
        .or_else(|| images.first())
        .cloned()
        .ok_or_else(|| AppError::MalformedResponse(format!("prompt {prompt_id} produced no images")))
}
