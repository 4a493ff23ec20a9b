//! Handler for one chat request: transcript in, encoded inbound events out.

use shared::agent_api::{ChatMessage, StreamChunk};
use shared::wire::{InboundEvent, OutgoingRequest, RoleConvention};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};

use providers::CompletionStream;

pub const NO_CONTENT_ERROR: &str = "No message content to send.";

/// Role-tagged chat messages for a request, blank entries dropped.
///
/// An empty assistant-first conversation gets the greeting instruction as a
/// system message so the assistant opens it. An empty user-first conversation
/// has nothing to answer and yields `None`.
pub fn build_messages(req: &OutgoingRequest, greeting_prompt: &str) -> Option<Vec<ChatMessage>> {
    let messages: Vec<ChatMessage> = req
        .tagged_entries()
        .into_iter()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(role, text)| ChatMessage::new(role.as_str(), text))
        .collect();

    if !messages.is_empty() {
        return Some(messages);
    }
    match req.role_convention {
        RoleConvention::AssistantFirst => Some(vec![ChatMessage::new("system", greeting_prompt)]),
        RoleConvention::UserFirst => None,
    }
}

/// Stream one completion for `req`, sending every event to `out`.
///
/// The last event is always `Terminal`, also after an error, so the session
/// never stays waiting once this returns.
pub async fn handle_request(
    source: &dyn CompletionStream,
    greeting_prompt: &str,
    req: OutgoingRequest,
    out: &UnboundedSender<String>,
) {
    let session_index = req.session_index;
    let emit = |event: InboundEvent| {
        if out.send(event.encode()).is_err() {
            tracing::debug!("session {} listener gone, dropping event", session_index);
        }
    };

    let Some(messages) = build_messages(&req, greeting_prompt) else {
        emit(InboundEvent::Error {
            session_index,
            message: NO_CONTENT_ERROR.to_string(),
        });
        emit(InboundEvent::Terminal { session_index });
        return;
    };
    tracing::debug!(
        "session {}: requesting completion for {} messages",
        session_index,
        messages.len()
    );

    let (tx, mut rx) = unbounded_channel::<StreamChunk>();
    let producer = source.stream(messages, tx);
    let consumer = async {
        let mut fragments = 0usize;
        let mut errored = false;
        while let Some(chunk) = rx.recv().await {
            match chunk {
                StreamChunk::Text(text) => {
                    fragments += 1;
                    emit(InboundEvent::Fragment {
                        session_index,
                        text,
                    });
                }
                StreamChunk::Done { stop_reason } => {
                    tracing::debug!(
                        "session {}: stream done ({:?}) after {} fragments",
                        session_index,
                        stop_reason,
                        fragments
                    );
                    break;
                }
                StreamChunk::Error(message) => {
                    errored = true;
                    emit(InboundEvent::Error {
                        session_index,
                        message,
                    });
                    break;
                }
            }
        }
        errored
    };

    let (result, errored) = tokio::join!(producer, consumer);
    if let Err(e) = result {
        tracing::warn!("session {}: completion failed: {}", session_index, e);
        if !errored {
            emit(InboundEvent::Error {
                session_index,
                message: e.to_string(),
            });
        }
    }
    emit(InboundEvent::Terminal { session_index });
}
