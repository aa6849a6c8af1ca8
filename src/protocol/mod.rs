//! Wire protocol — JSON frames exchanged with the assistant service.
//!
//! Every frame is a JSON object with a `type` discriminator. Inbound
//! frames carry their payload under `data`; outbound frames are flat.
//!
//! Decoding is two-stage: the envelope (`type` + `data`) first, then the
//! payload for the known kind. Unknown kinds decode to
//! [`InboundFrame::Unknown`] so newer servers never break older clients.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors from frame encoding and decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid `{kind}` payload: {reason}")]
    InvalidPayload { kind: String, reason: String },
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Credentials forwarded verbatim in the `authenticate` frame.
///
/// Field names on the wire follow the service's camelCase schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthCredentials {
    #[serde(rename = "envUrl")]
    pub endpoint_url: String,
    pub tenant: String,
    #[serde(rename = "accessToken")]
    pub access_token: String,
    #[serde(rename = "sqlxHost")]
    pub auxiliary_host: String,
    #[serde(rename = "incortaUsername")]
    pub username: String,
}

/// One encoded attachment, built per send and never retained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundFilePayload {
    pub name: String,
    /// Base64 of the raw file bytes.
    #[serde(rename = "content")]
    pub encoded_content: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub media_type: String,
}

/// Frames the client sends.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    Authenticate {
        credentials: AuthCredentials,
    },
    Query {
        query: String,
        files: Vec<OutboundFilePayload>,
    },
    UploadFiles {
        files: Vec<OutboundFilePayload>,
    },
    SetModel {
        model: String,
    },
    ClearConversation,
}

impl OutboundFrame {
    /// Serialize to the JSON text sent over the channel.
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// The `type` discriminator, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundFrame::Authenticate { .. } => "authenticate",
            OutboundFrame::Query { .. } => "query",
            OutboundFrame::UploadFiles { .. } => "upload_files",
            OutboundFrame::SetModel { .. } => "set_model",
            OutboundFrame::ClearConversation => "clear_conversation",
        }
    }
}

/// Frames the service sends.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Connected,
    Authenticated {
        model: Option<String>,
    },
    AuthenticationFailed {
        message: Option<String>,
    },
    ModelSwitched {
        model: String,
    },
    ModelSwitchFailed {
        message: Option<String>,
    },
    UserMessage {
        content: String,
    },
    AssistantMessage {
        content: String,
    },
    Thinking,
    ToolCall {
        tool_id: String,
        tool_name: String,
        tool_args: Value,
    },
    ToolResult {
        tool_id: String,
        tool_name: String,
        result: Value,
    },
    FileProcessed {
        file_name: Option<String>,
        status: Option<String>,
    },
    FilesUploaded {
        message: String,
    },
    FileError {
        file_name: String,
        error: String,
    },
    Completed,
    Error {
        message: Option<String>,
    },
    /// A `type` this client does not know. Ignored by the router.
    Unknown {
        kind: String,
    },
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ModelData {
    model: Option<String>,
}

#[derive(Deserialize)]
struct RequiredModelData {
    model: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct MessageData {
    message: Option<String>,
}

#[derive(Deserialize)]
struct ContentData {
    content: String,
}

#[derive(Deserialize)]
struct ToolCallData {
    #[serde(default, deserialize_with = "id_string")]
    tool_id: String,
    #[serde(default)]
    tool_name: String,
    #[serde(default)]
    tool_args: Value,
}

#[derive(Deserialize)]
struct ToolResultData {
    #[serde(default, deserialize_with = "id_string")]
    tool_id: String,
    #[serde(default)]
    tool_name: String,
    #[serde(default)]
    result: Value,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct FileProcessedData {
    file_name: Option<String>,
    status: Option<String>,
}

#[derive(Deserialize)]
struct FilesUploadedData {
    message: String,
}

#[derive(Deserialize)]
struct FileErrorData {
    #[serde(default)]
    file_name: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Accept string or numeric invocation ids; null becomes empty.
fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Null => Ok(String::new()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "invocation id must be a string, got {other}"
        ))),
    }
}

fn payload<T: DeserializeOwned>(kind: &str, data: Value) -> ProtocolResult<T> {
    // Absent `data` means an empty payload, not a type error.
    let data = match data {
        Value::Null => Value::Object(Map::new()),
        other => other,
    };
    serde_json::from_value(data).map_err(|e| ProtocolError::InvalidPayload {
        kind: kind.to_string(),
        reason: e.to_string(),
    })
}

impl InboundFrame {
    /// Decode one text frame.
    pub fn decode(text: &str) -> ProtocolResult<Self> {
        let envelope: Envelope = serde_json::from_str(text)?;
        Self::from_parts(envelope.kind, envelope.data)
    }

    /// Decode an already-parsed JSON value.
    pub fn from_value(value: Value) -> ProtocolResult<Self> {
        let envelope: Envelope = serde_json::from_value(value)?;
        Self::from_parts(envelope.kind, envelope.data)
    }

    fn from_parts(kind: String, data: Value) -> ProtocolResult<Self> {
        let k = kind.as_str();
        let frame = match k {
            "connected" => InboundFrame::Connected,
            "authenticated" => {
                let d: ModelData = payload(k, data)?;
                InboundFrame::Authenticated { model: d.model }
            }
            "authentication_failed" => {
                let d: MessageData = payload(k, data)?;
                InboundFrame::AuthenticationFailed { message: d.message }
            }
            "model_switched" => {
                let d: RequiredModelData = payload(k, data)?;
                InboundFrame::ModelSwitched { model: d.model }
            }
            "model_switch_failed" => {
                let d: MessageData = payload(k, data)?;
                InboundFrame::ModelSwitchFailed { message: d.message }
            }
            "user_message" => {
                let d: ContentData = payload(k, data)?;
                InboundFrame::UserMessage { content: d.content }
            }
            "assistant_message" => {
                let d: ContentData = payload(k, data)?;
                InboundFrame::AssistantMessage { content: d.content }
            }
            "thinking" => InboundFrame::Thinking,
            "tool_call" => {
                let d: ToolCallData = payload(k, data)?;
                InboundFrame::ToolCall {
                    tool_id: d.tool_id,
                    tool_name: d.tool_name,
                    tool_args: d.tool_args,
                }
            }
            "tool_result" => {
                let d: ToolResultData = payload(k, data)?;
                InboundFrame::ToolResult {
                    tool_id: d.tool_id,
                    tool_name: d.tool_name,
                    result: d.result,
                }
            }
            "file_processed" => {
                let d: FileProcessedData = payload(k, data)?;
                InboundFrame::FileProcessed {
                    file_name: d.file_name,
                    status: d.status,
                }
            }
            "files_uploaded" => {
                let d: FilesUploadedData = payload(k, data)?;
                InboundFrame::FilesUploaded { message: d.message }
            }
            "file_error" => {
                let d: FileErrorData = payload(k, data)?;
                InboundFrame::FileError {
                    file_name: d.file_name.unwrap_or_else(|| "unknown".into()),
                    error: d.error.unwrap_or_else(|| "Unknown error".into()),
                }
            }
            "completed" => InboundFrame::Completed,
            "error" => {
                let d: MessageData = payload(k, data)?;
                InboundFrame::Error { message: d.message }
            }
            _ => InboundFrame::Unknown { kind },
        };
        Ok(frame)
    }

    /// The `type` discriminator, for logging.
    pub fn kind(&self) -> &str {
        match self {
            InboundFrame::Connected => "connected",
            InboundFrame::Authenticated { .. } => "authenticated",
            InboundFrame::AuthenticationFailed { .. } => "authentication_failed",
            InboundFrame::ModelSwitched { .. } => "model_switched",
            InboundFrame::ModelSwitchFailed { .. } => "model_switch_failed",
            InboundFrame::UserMessage { .. } => "user_message",
            InboundFrame::AssistantMessage { .. } => "assistant_message",
            InboundFrame::Thinking => "thinking",
            InboundFrame::ToolCall { .. } => "tool_call",
            InboundFrame::ToolResult { .. } => "tool_result",
            InboundFrame::FileProcessed { .. } => "file_processed",
            InboundFrame::FilesUploaded { .. } => "files_uploaded",
            InboundFrame::FileError { .. } => "file_error",
            InboundFrame::Completed => "completed",
            InboundFrame::Error { .. } => "error",
            InboundFrame::Unknown { kind } => kind,
        }
    }
}
