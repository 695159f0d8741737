use crate::core::config::GatewayConfig;
use crate::core::errors::ExchangeError;
use crate::gateway::envelope::Envelope;
use crate::gateway::router::EventRouter;
use crate::gateway::session::{read_pump, write_pump, Session};
use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink, Stream, StreamExt};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// Keepalive and buffering for browser sessions
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub pong_wait: Duration,
    pub ping_interval: Duration,
    pub outbound_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&GatewayConfig::default())
    }
}

impl SessionSettings {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            pong_wait: config.pong_wait,
            ping_interval: config.ping_interval(),
            outbound_capacity: config.outbound_capacity,
        }
    }
}

/// Live browser sessions keyed by identity, at most one per identity
pub struct SessionManager {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    router: EventRouter,
    settings: SessionSettings,
    next_id: AtomicU64,
}

impl SessionManager {
    pub fn new(router: EventRouter, settings: SessionSettings) -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            router,
            settings,
            next_id: AtomicU64::new(1),
        })
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, Arc<Session>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take over an upgraded browser socket
    pub async fn serve(self: &Arc<Self>, identity: String, socket: WebSocket) {
        let (sink, stream) = socket.split();
        self.connect(identity, sink, stream).await;
    }

    /// Register a session for `identity` over the given socket halves and
    /// start its pumps. An existing session for the same identity is cleaned
    /// up before the new one becomes visible.
    #[instrument(skip(self, sink, stream))]
    pub async fn connect<K, S, E>(self: &Arc<Self>, identity: String, sink: K, stream: S) -> Arc<Session>
    where
        K: Sink<Message> + Unpin + Send + 'static,
        K::Error: Display,
        S: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
        E: Display + Send + 'static,
    {
        let (session, outbound) = self.new_session(identity);
        self.register(Arc::clone(&session)).await;

        tokio::spawn(write_pump(
            Arc::clone(&session),
            Arc::clone(self),
            sink,
            outbound,
            self.settings.ping_interval,
        ));
        tokio::spawn(read_pump(
            Arc::clone(&session),
            Arc::clone(self),
            stream,
            self.settings.pong_wait,
        ));

        session
    }

    /// A fresh, unregistered session and the receiving end of its queue
    pub fn new_session(&self, identity: String) -> (Arc<Session>, mpsc::Receiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Session::new(id, identity, self.settings.outbound_capacity)
    }

    /// Make `session` the live session for its identity, evicting whoever
    /// holds it first
    pub async fn register(&self, session: Arc<Session>) {
        loop {
            let previous = self.sessions().remove(session.identity());
            if let Some(previous) = previous {
                info!(
                    identity = %previous.identity(),
                    evicted = previous.id(),
                    "Evicting existing session"
                );
                self.cleanup(&previous).await;
            }

            // A concurrent connect may have claimed the slot while we cleaned up
            if let Entry::Vacant(slot) = self.sessions().entry(session.identity().to_string()) {
                info!(identity = %session.identity(), session = session.id(), "Session registered");
                slot.insert(session);
                return;
            }
        }
    }

    /// Remove `session` from the registry if it is still the live one for
    /// its identity
    pub fn unregister(&self, session: &Session) -> bool {
        let mut sessions = self.sessions();
        match sessions.get(session.identity()) {
            Some(current) if current.id() == session.id() => {
                sessions.remove(session.identity());
                true
            }
            _ => false,
        }
    }

    /// Tear the session down. Safe to call any number of times from any
    /// task; only the first call does anything.
    pub async fn cleanup(&self, session: &Arc<Session>) -> bool {
        if !session.begin_cleanup() {
            return false;
        }
        self.unregister(session);
        session.teardown().await;
        info!(identity = %session.identity(), session = session.id(), "Session cleaned up");
        true
    }

    pub fn session(&self, identity: &str) -> Option<Arc<Session>> {
        self.sessions().get(identity).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.sessions().len()
    }

    /// Queue `text` for every live session. Returns how many accepted it.
    pub fn broadcast(&self, text: &str) -> usize {
        let sessions: Vec<Arc<Session>> = self.sessions().values().cloned().collect();
        sessions
            .iter()
            .filter(|session| match session.outbound().try_send(text.to_string()) {
                Ok(()) => true,
                Err(e) => {
                    warn!(identity = %session.identity(), error = %e, "Broadcast not delivered");
                    false
                }
            })
            .count()
    }

    /// Route one envelope to its handler
    pub async fn route_event(&self, envelope: Envelope, session: &Arc<Session>) -> Result<(), ExchangeError> {
        self.router.route(envelope, session, self).await
    }

    /// Handle one text frame from the browser. Failures are logged only; the
    /// browser never sees them.
    pub(crate) async fn dispatch(&self, session: &Arc<Session>, text: &str) {
        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(identity = %session.identity(), error = %e, "Malformed envelope");
                return;
            }
        };

        let kind = envelope.kind.clone();
        match self.route_event(envelope, session).await {
            Ok(()) => debug!(identity = %session.identity(), kind = %kind, "Event handled"),
            Err(e) => warn!(
                identity = %session.identity(),
                kind = %kind,
                error = %e,
                error_kind = ?e.kind(),
                "Event handling failed"
            ),
        }
    }
}
