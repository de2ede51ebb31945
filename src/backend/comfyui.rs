//! Streaming backend: a local ComfyUI server reached over REST and websocket.
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::{AssetResult, InvocationClient};
use crate::comfyui::client::{primary_image, ComfyUIClient};
use crate::comfyui::messages::Completion;
use crate::comfyui::session::{ComfyUISession, WaitError};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::workflow::graph::GraphDocument;

/// Timeouts applied by [`ComfyUIBackend`].
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub connect: Duration,
    pub submit: Duration,
    pub ping: Duration,
}

pub struct ComfyUIBackend {
    client: ComfyUIClient,
    session: ComfyUISession,
    timeouts: Timeouts,
}

impl ComfyUIBackend {
    pub fn new(api_url: String, ws_url: String, timeouts: Timeouts) -> Self {
        ComfyUIBackend {
            client: ComfyUIClient::new(api_url, timeouts.submit),
            session: ComfyUISession::new(ws_url, timeouts.connect),
            timeouts,
        }
    }

    pub fn from_config(config: &Config) -> AppResult<Self> {
        let ws_url = websocket_url(&config.comfyui_url)?;
        Ok(Self::new(
            config.comfyui_url.clone(),
            ws_url,
            Timeouts {
                connect: config.connect_timeout,
                submit: config.submit_timeout,
                ping: config.ping_timeout,
            },
        ))
    }

    pub fn session(&self) -> &ComfyUISession {
        &self.session
    }
}

#[async_trait]
impl InvocationClient for ComfyUIBackend {
    async fn submit(&self, graph: &GraphDocument) -> AppResult<AssetResult> {
        let mut lease = self.session.acquire().await?;

        let prompt_id = uuid::Uuid::new_v4().to_string();
        let mut pending = lease.register(&prompt_id);
        let queued = self
            .client
            .queue_prompt(graph, lease.client_id(), &prompt_id)
            .await?;
        if queued.prompt_id != prompt_id {
            // Servers that ignore a client-chosen id assign their own.
            tracing::warn!(requested = %prompt_id, assigned = %queued.prompt_id, "ComfyUI reassigned prompt id");
            pending = lease.register(&queued.prompt_id);
        }
        let prompt_id = pending.prompt_id().to_string();

        match pending.wait(self.timeouts.submit).await {
            Ok(Completion::Finished) => {}
            Ok(Completion::Failed(reason)) => return Err(AppError::ExecutionFailed(reason)),
            Err(WaitError::TimedOut) => {
                tracing::warn!(%prompt_id, timeout = ?self.timeouts.submit, "Prompt did not complete in time");
                return Err(AppError::BackendTimeout(self.timeouts.submit));
            }
            Err(WaitError::Disconnected) => {
                lease.invalidate();
                return Err(AppError::BackendUnavailable(
                    "ComfyUI websocket closed before the prompt completed".to_string(),
                ));
            }
        }
        drop(lease);

        let history = self.client.get_history(&prompt_id).await?;
        let image = primary_image(&history, &prompt_id).map_err(|e| {
            tracing::error!(%prompt_id, %history, "No output image in history");
            e
        })?;
        tracing::info!(%prompt_id, filename = %image.filename, "Fetching output image");
        self.client.get_image(&image).await
    }

    async fn ping(&self) -> AppResult<()> {
        self.client.ping(self.timeouts.ping).await
    }

    fn name(&self) -> &'static str {
        "comfyui"
    }
}

/// `http://host:port` to `ws://host:port`, `https` to `wss`.
pub fn websocket_url(api_url: &str) -> AppResult<String> {
    let trimmed = api_url.trim().trim_end_matches('/');
    if let Some(rest) = trimmed.strip_prefix("https://") {
        Ok(format!("wss://{rest}"))
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        Ok(format!("ws://{rest}"))
    } else if trimmed.starts_with("ws://") || trimmed.starts_with("wss://") {
        Ok(trimmed.to_string())
    } else {
        Err(AppError::Config(format!(
            "COMFYUI_URL must start with http:// or https://, got '{api_url}'"
        )))
    }
}
