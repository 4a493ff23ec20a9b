//! Messages exchanged between the popup manager and the backend host.
//!
//! Outgoing requests always carry the full transcript: the backend keeps no
//! conversation state between calls. Inbound messages are decoded into typed
//! [`InboundEvent`]s instead of being inspected field by field at the call site.

use serde::{Deserialize, Serialize};

/// Who owns a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Which side speaks first in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RoleConvention {
    UserFirst,
    AssistantFirst,
}

impl RoleConvention {
    /// Role implied by a transcript position under this convention.
    pub fn role_at(&self, position: usize) -> Role {
        let even = position % 2 == 0;
        match (self, even) {
            (RoleConvention::UserFirst, true) | (RoleConvention::AssistantFirst, false) => {
                Role::User
            }
            _ => Role::Assistant,
        }
    }
}

/// Request sent from a session to the backend host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingRequest {
    pub session_index: usize,
    pub transcript: Vec<String>,
    pub role_convention: RoleConvention,
    /// Explicit per-entry roles. Older senders omit this and rely on parity.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<Role>,
}

impl OutgoingRequest {
    /// Pairs every transcript entry with its role.
    ///
    /// Explicit roles win when they cover the whole transcript; otherwise the
    /// role convention decides by position.
    pub fn tagged_entries(&self) -> Vec<(Role, &str)> {
        let explicit = self.roles.len() == self.transcript.len();
        self.transcript
            .iter()
            .enumerate()
            .map(|(i, text)| {
                let role = if explicit {
                    self.roles[i]
                } else {
                    self.role_convention.role_at(i)
                };
                (role, text.as_str())
            })
            .collect()
    }
}

/// A decoded message from the backend host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Fragment { session_index: usize, text: String },
    Terminal { session_index: usize },
    Error { session_index: usize, message: String },
}

impl InboundEvent {
    pub fn session_index(&self) -> usize {
        match self {
            InboundEvent::Fragment { session_index, .. }
            | InboundEvent::Terminal { session_index }
            | InboundEvent::Error { session_index, .. } => *session_index,
        }
    }

    /// Wire form: `{sessionIndex, fragment}`, `{sessionIndex, terminal: true}`
    /// or `{sessionIndex, error}`.
    pub fn encode(&self) -> String {
        let value = match self {
            InboundEvent::Fragment {
                session_index,
                text,
            } => serde_json::json!({ "sessionIndex": session_index, "fragment": text }),
            InboundEvent::Terminal { session_index } => {
                serde_json::json!({ "sessionIndex": session_index, "terminal": true })
            }
            InboundEvent::Error {
                session_index,
                message,
            } => serde_json::json!({ "sessionIndex": session_index, "error": message }),
        };
        value.to_string()
    }

    /// Decode one raw inbound message.
    ///
    /// A single message may carry a fragment together with `terminal: true`; it
    /// then yields the fragment followed by the terminal event.
    pub fn decode(raw: &str) -> Result<Vec<InboundEvent>, WireError> {
        let parsed: RawInbound = match serde_json::from_str(raw) {
            Ok(p) => p,
            Err(e) => {
                return Err(WireError::Malformed {
                    session_index: recover_session_index(raw),
                    reason: e.to_string(),
                })
            }
        };

        let session_index = parsed.session_index.ok_or(WireError::MissingSessionIndex)?;
        let mut events = Vec::new();

        if let Some(message) = parsed.error {
            events.push(InboundEvent::Error {
                session_index,
                message,
            });
        }
        if let Some(text) = parsed.fragment {
            events.push(InboundEvent::Fragment {
                session_index,
                text,
            });
        }
        if parsed.terminal {
            events.push(InboundEvent::Terminal { session_index });
        }

        if events.is_empty() {
            return Err(WireError::Empty { session_index });
        }
        Ok(events)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInbound {
    session_index: Option<usize>,
    #[serde(default)]
    fragment: Option<String>,
    #[serde(default)]
    terminal: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Best effort lookup of `sessionIndex` in a payload that failed typed decoding.
fn recover_session_index(raw: &str) -> Option<usize> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    value
        .get("sessionIndex")?
        .as_u64()
        .and_then(|i| usize::try_from(i).ok())
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("malformed message: {reason}")]
    Malformed {
        session_index: Option<usize>,
        reason: String,
    },

    #[error("message has no sessionIndex")]
    MissingSessionIndex,

    #[error("message for session {session_index} carries no event")]
    Empty { session_index: usize },
}

impl WireError {
    /// Session the failed message was addressed to, when it can be told.
    pub fn session_index(&self) -> Option<usize> {
        match self {
            WireError::Malformed { session_index, .. } => *session_index,
            WireError::MissingSessionIndex => None,
            WireError::Empty { session_index } => Some(*session_index),
        }
    }
}
