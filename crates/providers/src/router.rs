use crate::ollama::OllamaClient;
use crate::openai::OpenAIClient;
use anyhow::{anyhow, Result};
use shared::agent_api::{ChatMessage, StreamChunk};
use shared::settings::ModelProvider;
use tokio::sync::mpsc::UnboundedSender;

/// Anything that can stream a chat completion into a chunk channel.
///
/// Note: Uses async_trait for object safety
#[async_trait::async_trait]
pub trait CompletionStream: Send + Sync {
    /// Contract: if the request fails *before* any chunk is sent, returns
    /// `Err(...)`. Once streaming starts, errors go through
    /// `StreamChunk::Error` and the method returns `Ok(())`.
    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        tx: UnboundedSender<StreamChunk>,
    ) -> Result<()>;
}

pub struct ProviderRouter {
    config: ModelProvider,
}

impl ProviderRouter {
    pub fn new(config: ModelProvider) -> Self {
        Self { config }
    }

    /// Streaming generation with provider fallback.
    pub async fn generate_stream(
        &self,
        messages: Vec<ChatMessage>,
        tx: UnboundedSender<StreamChunk>,
    ) -> Result<()> {
        let mut last_error = None;

        for provider in self.config.provider_preference.iter() {
            let result = match provider.as_str() {
                "local" => {
                    let client = OllamaClient::new(self.config.local_model.clone());
                    client.generate_stream(messages.clone(), tx.clone()).await
                }
                "openai" => match self.openai_client() {
                    Ok(client) => client.generate_stream(messages.clone(), tx.clone()).await,
                    Err(e) => Err(e),
                },
                _ => {
                    last_error = Some(anyhow!("Unknown provider: {}", provider));
                    continue;
                }
            };

            match result {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!("provider {} failed before streaming: {}", provider, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow!("No providers configured")))
    }

    fn openai_client(&self) -> Result<OpenAIClient> {
        OpenAIClient::from_auth(
            &self.config.openai_model,
            &self.config.openai_auth,
            self.config.openai_base_url.as_deref(),
        )
    }
}

#[async_trait::async_trait]
impl CompletionStream for ProviderRouter {
    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        tx: UnboundedSender<StreamChunk>,
    ) -> Result<()> {
        self.generate_stream(messages, tx).await
    }
}
