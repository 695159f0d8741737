use crate::core::errors::ExchangeError;
use crate::exchanges::kraken::{ChannelRegistry, UpstreamFactory};
use crate::gateway::envelope::{BridgeRequest, ChatMessage, Envelope, KRAKEN, SEND_MESSAGE};
use crate::gateway::manager::SessionManager;
use crate::gateway::session::Session;
use async_trait::async_trait;
use serde_json::value::RawValue;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Handles one envelope type
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(
        &self,
        payload: &RawValue,
        session: &Arc<Session>,
        manager: &SessionManager,
    ) -> Result<(), ExchangeError>;
}

/// Envelope type to handler. Assembled at startup and fixed afterwards.
#[derive(Default)]
pub struct EventRouter {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chat plus the exchange bridge
    pub fn with_default_handlers(
        factory: Arc<dyn UpstreamFactory>,
        channels: ChannelRegistry,
    ) -> Self {
        Self::new()
            .with_handler(SEND_MESSAGE, Arc::new(ChatHandler))
            .with_handler(KRAKEN, Arc::new(ExchangeBridgeHandler::new(factory, channels)))
    }

    #[must_use]
    pub fn with_handler(mut self, kind: &str, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.insert(kind.to_string(), handler);
        self
    }

    #[instrument(skip_all, fields(kind = %envelope.kind, identity = %session.identity()))]
    pub async fn route(
        &self,
        envelope: Envelope,
        session: &Arc<Session>,
        manager: &SessionManager,
    ) -> Result<(), ExchangeError> {
        let handler = self
            .handlers
            .get(&envelope.kind)
            .ok_or_else(|| ExchangeError::UnknownEventType(envelope.kind.clone()))?;
        handler.handle(&envelope.payload, session, manager).await
    }
}

/// Relays a chat message to every connected browser
pub struct ChatHandler;

#[async_trait]
impl EventHandler for ChatHandler {
    async fn handle(
        &self,
        payload: &RawValue,
        _session: &Arc<Session>,
        manager: &SessionManager,
    ) -> Result<(), ExchangeError> {
        let message: ChatMessage = serde_json::from_str(payload.get())?;
        let text = Envelope::new(SEND_MESSAGE, &message)?.to_text()?;
        let delivered = manager.broadcast(&text);
        debug!(from = %message.from, delivered, "Chat message relayed");
        Ok(())
    }
}

/// Turns browser subscription requests into upstream subscriptions on the
/// session's own upstream client
pub struct ExchangeBridgeHandler {
    factory: Arc<dyn UpstreamFactory>,
    channels: ChannelRegistry,
}

impl ExchangeBridgeHandler {
    pub fn new(factory: Arc<dyn UpstreamFactory>, channels: ChannelRegistry) -> Self {
        Self { factory, channels }
    }
}

#[async_trait]
impl EventHandler for ExchangeBridgeHandler {
    async fn handle(
        &self,
        payload: &RawValue,
        session: &Arc<Session>,
        _manager: &SessionManager,
    ) -> Result<(), ExchangeError> {
        let request: BridgeRequest = serde_json::from_str(payload.get())?;
        match request.method.as_str() {
            "subscribe" => {
                let channel = self.channels.build(&request.params)?;
                session.subscribe(channel, self.factory.as_ref()).await
            }
            "unsubscribe" => {
                if !self.channels.supports(&request.params.channel) {
                    return Err(ExchangeError::UnsupportedChannel(request.params.channel));
                }
                session.unsubscribe(&request.params.channel).await
            }
            other => Err(ExchangeError::UnsupportedMethod(other.to_string())),
        }
    }
}
