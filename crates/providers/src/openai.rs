use anyhow::{anyhow, Context, Result};
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use shared::agent_api::{ChatMessage, StreamChunk};
use shared::settings::ProviderAuth;
use std::env;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

use crate::sse::SseParser;

static SHARED_HTTP: LazyLock<Client> = LazyLock::new(|| {
    Client::builder()
        .connect_timeout(Duration::from_secs(15))
        .pool_max_idle_per_host(2)
        .build()
        .unwrap_or_default()
});

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

// ── Request types ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

// ── Response types ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct OpenAIStreamResponse {
    choices: Vec<OpenAIStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamChoice {
    #[serde(default)]
    delta: OpenAIStreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAIStreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Error body returned by the API on non-2xx responses.
#[derive(Debug, Deserialize)]
struct OpenAIErrorBody {
    error: OpenAIErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorDetail {
    message: String,
}

// ── Client ───────────────────────────────────────────────────────────

pub struct OpenAIClient {
    http: Client,
    auth_token: String,
    model: String,
    base_url: String,
}

impl OpenAIClient {
    pub fn from_auth(model: &str, auth: &ProviderAuth, base_url: Option<&str>) -> Result<Self> {
        let auth_token = match &auth.api_key {
            Some(key) if !key.trim().is_empty() => key.clone(),
            // Fall back to the environment, as the CLI and CI do
            _ => env::var("OPENAI_API_KEY")
                .map_err(|_| anyhow!("No OpenAI authentication configured"))?,
        };

        Ok(Self {
            http: SHARED_HTTP.clone(),
            auth_token,
            model: model.to_string(),
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    async fn post(&self, messages: &[ChatMessage]) -> Result<reqwest::Response> {
        let req = OpenAIRequest {
            model: &self.model,
            messages,
            stream: true,
        };
        let resp = self
            .http
            .post(self.completions_url())
            .bearer_auth(&self.auth_token)
            .json(&req)
            .send()
            .await
            .context("openai request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("OpenAI API Error: {}", describe_error(status, &body)));
        }
        Ok(resp)
    }

    /// Streams text deltas into `tx`, finishing with `StreamChunk::Done`.
    ///
    /// Returns `Err` only when the request fails before any chunk is sent, so the
    /// router can still fall back to another provider.
    pub async fn generate_stream(
        &self,
        messages: Vec<ChatMessage>,
        tx: UnboundedSender<StreamChunk>,
    ) -> Result<()> {
        let resp = self.post(&messages).await?;

        let mut parser = SseParser::new();
        let mut stream = resp.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(b) => b,
                Err(e) => {
                    let _ = tx.send(StreamChunk::Error(format!("stream read error: {}", e)));
                    return Ok(());
                }
            };
            for event in parser.feed(&bytes) {
                if event.is_done() {
                    let _ = tx.send(StreamChunk::Done { stop_reason: None });
                    return Ok(());
                }
                let Ok(resp) = serde_json::from_str::<OpenAIStreamResponse>(&event.data) else {
                    tracing::debug!("skipping unparseable SSE payload: {}", event.data);
                    continue;
                };
                let Some(choice) = resp.choices.into_iter().next() else {
                    continue;
                };
                if let Some(content) = choice.delta.content {
                    if !content.is_empty() {
                        let _ = tx.send(StreamChunk::Text(content));
                    }
                }
                if let Some(reason) = choice.finish_reason {
                    let _ = tx.send(StreamChunk::Done {
                        stop_reason: Some(reason),
                    });
                    return Ok(());
                }
            }
        }

        let _ = tx.send(StreamChunk::Done { stop_reason: None });
        Ok(())
    }
}

/// `"<status> <message>"`, preferring the API's own error message.
fn describe_error(status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<OpenAIErrorBody>(body) {
        Ok(parsed) => format!("{} {}", status, parsed.error.message),
        Err(_) => {
            let detail: String = body.chars().take(800).collect();
            if detail.trim().is_empty() {
                status.to_string()
            } else {
                format!("{} {}", status, detail.trim())
            }
        }
    }
}
