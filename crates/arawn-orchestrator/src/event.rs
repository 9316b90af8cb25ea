//! The client event stream's wire shape (§6.2): a tagged variant produced by
//! the orchestrator and consumed by the encoder.

use serde::{Deserialize, Serialize};

use crate::error::FailureKind;

/// An artifact's payload, selected by what the producing tool result
/// actually contained (binary vs. text content block) rather than by a
/// fixed diagram format. See DESIGN.md for the rationale.
#[derive(Debug, Clone)]
pub enum ArtifactPayload {
    Bytes(Vec<u8>),
    Text(String),
}

impl ArtifactPayload {
    fn bytes_base64(&self) -> Option<String> {
        match self {
            Self::Bytes(bytes) => {
                use base64::Engine;
                Some(base64::engine::general_purpose::STANDARD.encode(bytes))
            }
            Self::Text(_) => None,
        }
    }

    fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Bytes(_) => None,
        }
    }

    fn from_wire(bytes_base64: Option<String>, text: Option<String>) -> Result<Self, String> {
        match (bytes_base64, text) {
            (Some(encoded), None) => {
                use base64::Engine;
                base64::engine::general_purpose::STANDARD
                    .decode(encoded)
                    .map(Self::Bytes)
                    .map_err(|e| e.to_string())
            }
            (None, Some(text)) => Ok(Self::Text(text)),
            _ => Err("artifact must carry exactly one of bytes_base64 or text".to_string()),
        }
    }
}

/// Which kind of artifact was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Diagram,
    Template,
}

/// One line of the newline-delimited client event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Thinking {
        step: String,
        message: String,
    },
    PartialText {
        text: String,
    },
    ToolInvoked {
        call_id: String,
        tool: String,
        args_digest: String,
    },
    ToolResult {
        call_id: String,
        status: ToolResultStatus,
        result_digest: String,
    },
    Artifact {
        kind: ArtifactKind,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        bytes_base64: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        text: Option<String>,
    },
    /// Terminal success. `payload` is mode-specific (see `mode.rs`).
    Complete {
        payload: serde_json::Value,
    },
    /// Terminal failure.
    Failed {
        kind: FailureKind,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolResultStatus {
    Ok,
    Error,
}

impl Event {
    pub fn thinking(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Thinking {
            step: step.into(),
            message: message.into(),
        }
    }

    pub fn partial_text(text: impl Into<String>) -> Self {
        Self::PartialText { text: text.into() }
    }

    pub fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failed {
            kind,
            message: message.into(),
        }
    }

    pub fn artifact(kind: ArtifactKind, payload: ArtifactPayload) -> Self {
        Self::Artifact {
            kind,
            bytes_base64: payload.bytes_base64(),
            text: payload.as_text().map(str::to_string),
        }
    }

    /// Recover the [`ArtifactPayload`] this event carried, if any.
    pub fn artifact_payload(&self) -> Option<Result<ArtifactPayload, String>> {
        match self {
            Self::Artifact {
                bytes_base64, text, ..
            } => Some(ArtifactPayload::from_wire(
                bytes_base64.clone(),
                text.clone(),
            )),
            _ => None,
        }
    }

    /// Whether this event terminates the stream (`complete` or `failed`,
    /// exactly one of which must end every request's event stream per §6.2).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Failed { .. })
    }
}

/// Digest a value for inclusion in an event without echoing it verbatim
/// (tool arguments/results may be large or sensitive).
pub fn digest(value: &serde_json::Value) -> String {
    let text = value.to_string();
    if text.len() <= 64 {
        text
    } else {
        let boundary = (0..=64).rev().find(|&i| text.is_char_boundary(i)).unwrap_or(0);
        format!("{}…({} bytes)", &text[..boundary], text.len())
    }
}
