//! Relay between the popup registry and the backend host.
//!
//! The relay is an explicit object owned by the popup manager. Outgoing
//! requests go through a [`Transport`]; inbound raw messages are decoded into
//! typed events and applied to the registry by session index.

use shared::wire::{InboundEvent, OutgoingRequest};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::registry::{PopupRegistry, SessionIndex};

/// Outgoing half of the duplex conduit to the backend.
pub trait Transport {
    fn send(&mut self, request: &OutgoingRequest) -> anyhow::Result<()>;

    /// Release the conduit. Further sends fail.
    fn close(&mut self);
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("relay is not connected")]
    NotConnected,

    #[error("transport failed: {0}")]
    Transport(#[from] anyhow::Error),
}

pub struct Relay<T: Transport> {
    transport: T,
    connected: bool,
}

impl<T: Transport> Relay<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            connected: false,
        }
    }

    pub fn open(&mut self) {
        self.connected = true;
    }

    pub fn close(&mut self) {
        if self.connected {
            self.transport.close();
            self.connected = false;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn send(&mut self, request: &OutgoingRequest) -> Result<(), RelayError> {
        if !self.connected {
            return Err(RelayError::NotConnected);
        }
        tracing::debug!(
            "sending {} entries for session {}",
            request.transcript.len(),
            request.session_index
        );
        self.transport.send(request)?;
        Ok(())
    }

    /// Decode one inbound message and apply it. Returns the sessions touched.
    ///
    /// A payload that fails to decode becomes an error entry when its session
    /// can still be identified, and is only logged otherwise.
    pub fn on_message(&mut self, raw: &str, registry: &mut PopupRegistry) -> Vec<SessionIndex> {
        let events = match InboundEvent::decode(raw) {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!("undecodable backend message: {}", e);
                return match e.session_index() {
                    Some(index) if registry.apply_error(index, &e.to_string()) => vec![index],
                    _ => Vec::new(),
                };
            }
        };

        let mut touched = Vec::new();
        for event in events {
            let index = event.session_index();
            let applied = match event {
                InboundEvent::Fragment { text, .. } => registry.apply_fragment(index, &text),
                InboundEvent::Terminal { .. } => registry.mark_turn_complete(index),
                InboundEvent::Error { message, .. } => registry.apply_error(index, &message),
            };
            if applied && !touched.contains(&index) {
                touched.push(index);
            }
        }
        touched
    }

    /// The backend went away: no waiting session may stay stuck.
    pub fn on_disconnect(&mut self, registry: &mut PopupRegistry) -> Vec<SessionIndex> {
        self.connected = false;
        let released = registry.force_ready_all_awaiting();
        tracing::warn!("backend disconnected, released sessions {:?}", released);
        released
    }
}

/// In-process transport feeding an [`agent_host::AgentHost`].
pub struct ChannelTransport {
    tx: Option<UnboundedSender<OutgoingRequest>>,
}

impl ChannelTransport {
    /// Transport plus the receiver the host reads requests from.
    pub fn pair() -> (Self, UnboundedReceiver<OutgoingRequest>) {
        let (tx, rx) = unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }
}

impl Transport for ChannelTransport {
    fn send(&mut self, request: &OutgoingRequest) -> anyhow::Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("channel closed"))?;
        tx.send(request.clone())
            .map_err(|_| anyhow::anyhow!("backend host is gone"))
    }

    fn close(&mut self) {
        self.tx = None;
    }
}
