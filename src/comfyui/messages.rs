//! ComfyUI websocket message types.
//!
//! ComfyUI sends JSON text frames shaped `{"type": "<kind>", "data": {...}}`
//! to every socket opened with `?clientId=`. Only the kinds that matter for
//! completion tracking are modelled; anything else fails to parse and is
//! dropped by the session reader.
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ComfyUIMessage {
    #[serde(rename = "status")]
    Status(StatusData),

    #[serde(rename = "execution_start")]
    ExecutionStart(PromptRef),

    #[serde(rename = "execution_cached")]
    ExecutionCached(PromptRef),

    /// A node started executing; `node: null` means the whole prompt is done.
    #[serde(rename = "executing")]
    Executing(ExecutingData),

    #[serde(rename = "progress")]
    Progress(ProgressData),

    #[serde(rename = "executed")]
    Executed(PromptRef),

    /// Sent before the history entry is stored; not a completion.
    #[serde(rename = "execution_success")]
    ExecutionSuccess(PromptRef),

    #[serde(rename = "execution_error")]
    ExecutionError(ErrorData),

    #[serde(rename = "execution_interrupted")]
    ExecutionInterrupted(PromptRef),
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusData {
    pub status: QueueStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueStatus {
    pub exec_info: ExecInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecInfo {
    pub queue_remaining: i32,
}

/// Payload carrying only the prompt it refers to.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptRef {
    #[serde(default)]
    pub prompt_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutingData {
    pub node: Option<String>,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProgressData {
    pub value: i32,
    pub max: i32,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorData {
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub node_type: Option<String>,
    #[serde(default)]
    pub exception_message: String,
    #[serde(default)]
    pub exception_type: String,
}

/// Terminal state of a prompt as announced on the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Finished,
    Failed(String),
}

impl ComfyUIMessage {
    /// If this message ends a prompt, the prompt id and how it ended.
    pub fn completion(&self) -> Option<(&str, Completion)> {
        match self {
            ComfyUIMessage::Executing(ExecutingData {
                node: None,
                prompt_id: Some(id),
            }) => Some((id.as_str(), Completion::Finished)),
            ComfyUIMessage::ExecutionError(err) => {
                let id = err.prompt_id.as_deref()?;
                let node = err.node_type.as_deref().or(err.node_id.as_deref()).unwrap_or("?");
                Some((
                    id,
                    Completion::Failed(format!(
                        "{} in node {}: {}",
                        err.exception_type, node, err.exception_message
                    )),
                ))
            }
            ComfyUIMessage::ExecutionInterrupted(PromptRef { prompt_id: Some(id) }) => {
                Some((id.as_str(), Completion::Failed("execution interrupted".to_string())))
            }
            _ => None,
        }
    }
}

/// Parse a text frame. Unknown `type` values are errors; callers skip them.
pub fn parse_message(text: &str) -> Result<ComfyUIMessage, serde_json::Error> {
    serde_json::from_str(text)
}
