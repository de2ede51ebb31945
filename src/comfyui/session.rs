//! Websocket session with a ComfyUI server and prompt completion tracking.
//!
//! One [`ComfyUISession`] owns at most one live socket, opened lazily on the
//! first submission as `/ws?clientId=<uuid>` and reused until it drops. A
//! reader task parses every frame and resolves the matching entry of a
//! [`CompletionRegistry`], a map from prompt id to a one-shot sender. Frames
//! about other prompts are held briefly; status broadcasts, progress and
//! previews are ignored.
//!
//! Submissions hold the session lock from registration until completion, so
//! at most one prompt is in flight per session.
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard};
use std::time::Duration;

use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::comfyui::messages::{parse_message, ComfyUIMessage, Completion};
use crate::error::{AppError, AppResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Completions kept for prompts nobody has registered yet.
const UNCLAIMED_CAPACITY: usize = 32;

#[derive(Default)]
struct Slots {
    waiters: HashMap<String, oneshot::Sender<Completion>>,
    unclaimed: VecDeque<(String, Completion)>,
}

/// Prompt id to one-shot completion signal.
///
/// A completion that arrives before its prompt is registered is held in a
/// small ring and handed over on registration. This covers servers that
/// assign their own prompt id and finish before the caller learns it.
#[derive(Clone, Default)]
pub struct CompletionRegistry {
    slots: Arc<StdMutex<Slots>>,
}

impl CompletionRegistry {
    fn lock(&self) -> StdMutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start tracking a prompt. The returned handle stops tracking it when
    /// dropped, whether or not the completion arrived.
    pub fn register(&self, prompt_id: &str) -> PendingCompletion {
        let (tx, rx) = oneshot::channel();
        let mut slots = self.lock();
        match slots.unclaimed.iter().position(|(id, _)| id == prompt_id) {
            Some(index) => {
                if let Some((_, completion)) = slots.unclaimed.remove(index) {
                    tracing::debug!(prompt_id, "Prompt completed before registration");
                    let _ = tx.send(completion);
                }
            }
            None => {
                if slots.waiters.insert(prompt_id.to_string(), tx).is_some() {
                    tracing::warn!(prompt_id, "Replaced an existing waiter for prompt");
                }
            }
        }
        PendingCompletion {
            registry: self.clone(),
            prompt_id: prompt_id.to_string(),
            rx,
        }
    }

    /// Deliver a completion. Returns `false` when nobody waits for the
    /// prompt; the completion is then held for a later registration.
    pub fn complete(&self, prompt_id: &str, completion: Completion) -> bool {
        let mut slots = self.lock();
        match slots.waiters.remove(prompt_id) {
            Some(tx) => tx.send(completion).is_ok(),
            None => {
                if slots.unclaimed.len() == UNCLAIMED_CAPACITY {
                    slots.unclaimed.pop_front();
                }
                slots.unclaimed.push_back((prompt_id.to_string(), completion));
                false
            }
        }
    }

    /// Drop every waiter; their handles observe a disconnect.
    pub fn disconnect_all(&self) {
        let mut slots = self.lock();
        slots.waiters.clear();
        slots.unclaimed.clear();
    }

    pub fn pending(&self) -> usize {
        self.lock().waiters.len()
    }

    fn forget(&self, prompt_id: &str) {
        self.lock().waiters.remove(prompt_id);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    TimedOut,
    Disconnected,
}

/// A registered prompt waiting for its completion frame.
pub struct PendingCompletion {
    registry: CompletionRegistry,
    prompt_id: String,
    rx: oneshot::Receiver<Completion>,
}

impl PendingCompletion {
    pub fn prompt_id(&self) -> &str {
        &self.prompt_id
    }

    pub async fn wait(mut self, timeout: Duration) -> Result<Completion, WaitError> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(completion)) => Ok(completion),
            Ok(Err(_)) => Err(WaitError::Disconnected),
            Err(_) => Err(WaitError::TimedOut),
        }
    }
}

impl Drop for PendingCompletion {
    fn drop(&mut self) {
        self.registry.forget(&self.prompt_id);
    }
}

struct LiveSocket {
    client_id: String,
    reader: JoinHandle<()>,
}

impl Drop for LiveSocket {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

pub struct ComfyUISession {
    ws_url: String,
    connect_timeout: Duration,
    registry: CompletionRegistry,
    socket: Mutex<Option<LiveSocket>>,
}

impl ComfyUISession {
    /// `ws_url` is the server's websocket base, e.g. `ws://127.0.0.1:8188`.
    pub fn new(ws_url: String, connect_timeout: Duration) -> Self {
        ComfyUISession {
            ws_url: ws_url.trim_end_matches('/').to_string(),
            connect_timeout,
            registry: CompletionRegistry::default(),
            socket: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &CompletionRegistry {
        &self.registry
    }

    /// Take exclusive use of the session, connecting first if there is no
    /// live socket.
    pub async fn acquire(&self) -> AppResult<SessionLease<'_>> {
        let mut socket = self.socket.lock().await;
        let alive = socket.as_ref().is_some_and(|s| !s.reader.is_finished());
        if !alive {
            if socket.take().is_some() {
                tracing::info!("ComfyUI websocket dropped, reconnecting");
            }
            *socket = Some(self.connect().await?);
        }
        Ok(SessionLease {
            socket,
            registry: &self.registry,
        })
    }

    async fn connect(&self) -> AppResult<LiveSocket> {
        let client_id = uuid::Uuid::new_v4().to_string();
        let url = format!("{}/ws?clientId={}", self.ws_url, client_id);

        let (ws_stream, _response) = tokio::time::timeout(self.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| {
                AppError::BackendUnavailable(format!(
                    "timed out connecting to ComfyUI websocket at {}",
                    self.ws_url
                ))
            })?
            .map_err(|e| {
                AppError::BackendUnavailable(format!(
                    "failed to connect to ComfyUI websocket at {}: {e}",
                    self.ws_url
                ))
            })?;

        tracing::info!(client_id = %client_id, ws_url = %self.ws_url, "Connected to ComfyUI websocket");

        let reader = tokio::spawn(read_frames(ws_stream, self.registry.clone(), client_id.clone()));
        Ok(LiveSocket { client_id, reader })
    }
}

/// Exclusive use of a connected session.
pub struct SessionLease<'a> {
    socket: MutexGuard<'a, Option<LiveSocket>>,
    registry: &'a CompletionRegistry,
}

impl SessionLease<'_> {
    pub fn client_id(&self) -> &str {
        self.socket.as_ref().map(|s| s.client_id.as_str()).unwrap_or_default()
    }

    pub fn register(&self, prompt_id: &str) -> PendingCompletion {
        self.registry.register(prompt_id)
    }

    /// Discard the socket so the next lease reconnects.
    pub fn invalidate(&mut self) {
        *self.socket = None;
    }
}

async fn read_frames(mut ws_stream: WsStream, registry: CompletionRegistry, client_id: String) {
    while let Some(frame) = ws_stream.next().await {
        match frame {
            Ok(Message::Text(text)) => dispatch(&registry, &text),
            Ok(Message::Binary(_)) => {
                tracing::trace!(client_id = %client_id, "Ignoring binary preview frame");
            }
            Ok(Message::Close(frame)) => {
                tracing::info!(client_id = %client_id, ?frame, "ComfyUI websocket closed");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(client_id = %client_id, error = %e, "ComfyUI websocket receive error");
                break;
            }
        }
    }
    registry.disconnect_all();
}

fn dispatch(registry: &CompletionRegistry, text: &str) {
    let message = match parse_message(text) {
        Ok(message) => message,
        Err(_) => {
            tracing::trace!(raw = %text, "Ignoring unrecognized ComfyUI message");
            return;
        }
    };

    if let Some((prompt_id, completion)) = message.completion() {
        let finished = completion == Completion::Finished;
        if registry.complete(prompt_id, completion) {
            tracing::debug!(prompt_id, finished, "Prompt completed");
        } else {
            tracing::debug!(prompt_id, "Completion for untracked prompt held");
        }
        return;
    }

    match message {
        ComfyUIMessage::Progress(data) => {
            tracing::debug!(value = data.value, max = data.max, prompt_id = ?data.prompt_id, "Generation progress");
        }
        ComfyUIMessage::Status(data) => {
            tracing::debug!(queue_remaining = data.status.exec_info.queue_remaining, "ComfyUI queue status");
        }
        other => tracing::trace!(?other, "ComfyUI message"),
    }
}
