//! Agent Host - the backend side of the chat relay
//!
//! Receives chat requests from the popup manager, streams completions from the
//! configured providers and answers with encoded inbound events. Every request
//! runs as its own task, so sessions stream concurrently. The event channel
//! closes once the request channel is closed and in-flight requests finish,
//! which the relay observes as a disconnect.

pub mod ai_port;
pub mod offline;

use providers::{CompletionStream, ProviderRouter};
use shared::settings::AppSettings;
use shared::wire::OutgoingRequest;
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::{JoinHandle, JoinSet};

pub struct AgentHost {
    source: Arc<dyn CompletionStream>,
    greeting_prompt: String,
}

impl AgentHost {
    /// Host backed by the provider router for `settings`.
    pub fn new(settings: &AppSettings) -> Self {
        Self::with_source(
            Arc::new(ProviderRouter::new(settings.model.clone())),
            settings.greeting_prompt.clone(),
        )
    }

    pub fn with_source(source: Arc<dyn CompletionStream>, greeting_prompt: impl Into<String>) -> Self {
        Self {
            source,
            greeting_prompt: greeting_prompt.into(),
        }
    }

    pub async fn handle(&self, req: OutgoingRequest, out: &UnboundedSender<String>) {
        ai_port::handle_request(self.source.as_ref(), &self.greeting_prompt, req, out).await
    }

    /// Serve requests until `requests` closes and every stream has finished.
    pub fn spawn(
        self: Arc<Self>,
        mut requests: UnboundedReceiver<OutgoingRequest>,
        events: UnboundedSender<String>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut in_flight = JoinSet::new();
            while let Some(req) = requests.recv().await {
                tracing::info!("request for session {}", req.session_index);
                let host = self.clone();
                let out = events.clone();
                in_flight.spawn(async move { host.handle(req, &out).await });
            }
            while let Some(joined) = in_flight.join_next().await {
                if let Err(e) = joined {
                    tracing::warn!("request task failed: {}", e);
                }
            }
            tracing::info!("request channel closed, host shutting down");
        })
    }
}
