use anyhow::{anyhow, Context, Result};
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use shared::agent_api::{ChatMessage, StreamChunk};
use std::env;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

static SHARED_HTTP: LazyLock<Client> = LazyLock::new(|| {
    Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .pool_max_idle_per_host(2)
        .build()
        .unwrap_or_default()
});

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

/// Streaming response: each line is one of these JSON objects.
#[derive(Debug, Deserialize)]
struct OllamaStreamChunk {
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    content: String,
}

pub struct OllamaClient {
    http: Client,
    base: String,
    model: String,
}

impl OllamaClient {
    pub fn new(model: String) -> Self {
        let base =
            env::var("OLLAMA_BASE_URL").unwrap_or_else(|_| "http://127.0.0.1:11434".to_string());
        Self {
            http: SHARED_HTTP.clone(),
            base,
            model,
        }
    }

    async fn post(&self, messages: &[ChatMessage]) -> Result<reqwest::Response> {
        let url = format!("{}/api/chat", self.base);
        let req = OllamaChatRequest {
            model: &self.model,
            messages,
            stream: true,
        };
        let resp = self
            .http
            .post(url)
            .json(&req)
            .send()
            .await
            .context("ollama request failed")?;
        if !resp.status().is_success() {
            return Err(anyhow!("ollama error: {}", resp.status()));
        }
        Ok(resp)
    }

    pub async fn generate_stream(
        &self,
        messages: Vec<ChatMessage>,
        tx: UnboundedSender<StreamChunk>,
    ) -> Result<()> {
        let resp = self.post(&messages).await?;

        // Ollama streams line-delimited JSON
        let mut stream = resp.bytes_stream();
        let mut lines = LineBuffer::default();

        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(b) => b,
                Err(e) => {
                    let _ = tx.send(StreamChunk::Error(format!("stream read error: {}", e)));
                    return Ok(());
                }
            };

            for line in lines.feed(&bytes) {
                match serde_json::from_str::<OllamaStreamChunk>(&line) {
                    Ok(chunk_data) => {
                        if let Some(msg) = chunk_data.message {
                            if !msg.content.is_empty() {
                                let _ = tx.send(StreamChunk::Text(msg.content));
                            }
                        }
                        if chunk_data.done {
                            let _ = tx.send(StreamChunk::Done { stop_reason: None });
                            return Ok(());
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(StreamChunk::Error(format!(
                            "Failed to parse Ollama stream: {}",
                            e
                        )));
                        return Ok(());
                    }
                }
            }
        }

        let _ = tx.send(StreamChunk::Done { stop_reason: None });
        Ok(())
    }
}

/// Splits a byte stream into complete, non-empty lines.
#[derive(Default)]
struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line).trim().to_string();
            if !text.is_empty() {
                out.push(text);
            }
        }
        out
    }
}
