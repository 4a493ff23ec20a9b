//! Completion sources that need no network: an echo bot for offline runs and a
//! scripted source for tests.

use anyhow::{anyhow, Result};
use shared::agent_api::{ChatMessage, StreamChunk};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

use providers::CompletionStream;

/// Streams the last user message back word by word.
pub struct EchoStream {
    delay: Duration,
}

impl EchoStream {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait::async_trait]
impl CompletionStream for EchoStream {
    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        tx: UnboundedSender<StreamChunk>,
    ) -> Result<()> {
        let reply = match messages.iter().rev().find(|m| m.role == "user") {
            Some(m) => format!("You said: {}", m.content),
            None => "Hello, how can I help?".to_string(),
        };

        for (i, word) in reply.split(' ').enumerate() {
            let piece = if i == 0 {
                word.to_string()
            } else {
                format!(" {}", word)
            };
            if tx.send(StreamChunk::Text(piece)).is_err() {
                return Ok(());
            }
            tokio::time::sleep(self.delay).await;
        }
        let _ = tx.send(StreamChunk::Done {
            stop_reason: Some("stop".into()),
        });
        Ok(())
    }
}

/// Replays fixed chunks, or fails before streaming.
pub struct ScriptedStream {
    chunks: Vec<StreamChunk>,
    failure: Option<String>,
    calls: AtomicUsize,
}

impl ScriptedStream {
    pub fn chunks(chunks: Vec<StreamChunk>) -> Self {
        Self {
            chunks,
            failure: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            chunks: Vec::new(),
            failure: Some(message.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl CompletionStream for ScriptedStream {
    async fn stream(
        &self,
        _messages: Vec<ChatMessage>,
        tx: UnboundedSender<StreamChunk>,
    ) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.failure {
            return Err(anyhow!("{}", message));
        }
        for chunk in &self.chunks {
            let _ = tx.send(chunk.clone());
        }
        Ok(())
    }
}
