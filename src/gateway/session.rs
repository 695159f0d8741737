use crate::core::errors::{ErrorKind, ExchangeError};
use crate::exchanges::kraken::{ChannelRequest, EventStream, UpstreamClient, UpstreamFactory};
use crate::gateway::envelope::Envelope;
use crate::gateway::manager::SessionManager;
use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Sending side of a session's outbound queue.
///
/// Clones share one underlying sender; `close` drops it so the writer pump
/// sees the end of the queue. Only the first `close` has any effect.
#[derive(Debug, Clone)]
pub struct Outbound {
    sender: Arc<Mutex<Option<mpsc::Sender<String>>>>,
}

impl Outbound {
    fn new(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender: Arc::new(Mutex::new(Some(sender))),
            },
            receiver,
        )
    }

    fn sender(&self) -> Option<mpsc::Sender<String>> {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Queue a frame, waiting for room. `false` once the queue is closed.
    pub async fn send(&self, text: String) -> bool {
        match self.sender() {
            Some(sender) => sender.send(text).await.is_ok(),
            None => false,
        }
    }

    /// Queue a frame without waiting
    pub fn try_send(&self, text: String) -> Result<(), ExchangeError> {
        let sender = self.sender().ok_or(ExchangeError::ChannelClosed)?;
        sender.try_send(text).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                ExchangeError::NetworkError("Outbound queue full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => ExchangeError::ChannelClosed,
        })
    }

    /// Close the queue. Returns whether this call was the one that closed it.
    pub fn close(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

/// Upstream client owned by a session, plus the task relaying its events
struct UpstreamBinding {
    client: UpstreamClient,
    bridge: CancellationToken,
    bridge_task: JoinHandle<()>,
}

impl UpstreamBinding {
    async fn shutdown(mut self) {
        self.bridge.cancel();
        if let Err(e) = self.client.close().await {
            debug!(error = %e, "Upstream close reported an error");
        }
        if let Err(e) = self.bridge_task.await {
            warn!(error = %e, "Bridge task ended abnormally");
        }
    }
}

/// One browser connection
pub struct Session {
    id: u64,
    identity: String,
    outbound: Outbound,
    upstream: tokio::sync::Mutex<Option<UpstreamBinding>>,
    shutdown: CancellationToken,
    cleaned: AtomicBool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("cleaned", &self.cleaned.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl Session {
    pub(crate) fn new(
        id: u64,
        identity: String,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (outbound, receiver) = Outbound::new(capacity);
        let session = Arc::new(Self {
            id,
            identity,
            outbound,
            upstream: tokio::sync::Mutex::new(None),
            shutdown: CancellationToken::new(),
            cleaned: AtomicBool::new(false),
        });
        (session, receiver)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn outbound(&self) -> &Outbound {
        &self.outbound
    }

    pub fn is_cleaned(&self) -> bool {
        self.cleaned.load(Ordering::Acquire)
    }

    /// Whether an upstream client is currently bound
    pub async fn has_upstream(&self) -> bool {
        self.upstream.lock().await.is_some()
    }

    /// Subscribe through this session's upstream client, connecting one and
    /// starting its bridge first when none is bound.
    pub async fn subscribe(
        &self,
        request: ChannelRequest,
        factory: &dyn UpstreamFactory,
    ) -> Result<(), ExchangeError> {
        let mut upstream = self.upstream.lock().await;
        // Cleanup may have run while we waited for the lock
        if self.is_cleaned() {
            return Err(ExchangeError::ChannelClosed);
        }

        if upstream
            .as_ref()
            .is_some_and(|binding| !binding.client.is_connected())
        {
            if let Some(stale) = upstream.take() {
                info!(identity = %self.identity, "Upstream connection lost, reconnecting");
                stale.shutdown().await;
            }
        }

        if upstream.is_none() {
            *upstream = Some(self.bind(factory).await?);
        }
        let Some(binding) = upstream.as_mut() else {
            return Err(ExchangeError::ChannelClosed);
        };

        let result = binding.client.subscribe(request).await;
        if result.is_err() && !binding.client.has_active_subscriptions() {
            if let Some(binding) = upstream.take() {
                binding.shutdown().await;
            }
        }
        result
    }

    async fn bind(&self, factory: &dyn UpstreamFactory) -> Result<UpstreamBinding, ExchangeError> {
        let mut client = factory.open().await?;
        let events = client.take_events().ok_or(ExchangeError::ChannelClosed)?;
        let bridge = CancellationToken::new();
        let bridge_task = spawn_bridge(events, self.outbound.clone(), bridge.clone());
        info!(identity = %self.identity, "Upstream client bound");
        Ok(UpstreamBinding {
            client,
            bridge,
            bridge_task,
        })
    }

    /// Unsubscribe `channel`; the upstream client is released once nothing is
    /// left subscribed, or as soon as its connection turns out to be dead.
    /// Without a bound client this is a no-op.
    pub async fn unsubscribe(&self, channel: &str) -> Result<(), ExchangeError> {
        let mut upstream = self.upstream.lock().await;
        let Some(binding) = upstream.as_mut() else {
            debug!(identity = %self.identity, channel, "No upstream client bound, nothing to unsubscribe");
            return Ok(());
        };

        if !binding.client.is_connected() {
            if let Some(stale) = upstream.take() {
                info!(identity = %self.identity, channel, "Upstream connection lost, released on unsubscribe");
                stale.shutdown().await;
            }
            return Ok(());
        }

        if let Err(e) = binding.client.unsubscribe(channel).await {
            if e.kind() == ErrorKind::Transport {
                if let Some(stale) = upstream.take() {
                    warn!(identity = %self.identity, error = %e, "Upstream unusable, released");
                    stale.shutdown().await;
                }
            }
            return Err(e);
        }

        if !binding.client.has_active_subscriptions() {
            if let Some(binding) = upstream.take() {
                binding.shutdown().await;
                info!(identity = %self.identity, "Last subscription gone, upstream client released");
            }
        }
        Ok(())
    }

    /// Flip the single-fire cleanup flag. Only the first caller gets `true`.
    pub(crate) fn begin_cleanup(&self) -> bool {
        !self.cleaned.swap(true, Ordering::AcqRel)
    }

    /// Release the upstream binding, close the outbound queue and stop the
    /// reader pump
    pub(crate) async fn teardown(&self) {
        if let Some(binding) = self.upstream.lock().await.take() {
            binding.shutdown().await;
        }
        self.outbound.close();
        self.shutdown.cancel();
    }
}

fn spawn_bridge(
    mut events: EventStream,
    outbound: Outbound,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            let Some(event) = event else {
                debug!("Upstream event stream ended");
                break;
            };

            let text = match Envelope::kraken(&event).and_then(|envelope| envelope.to_text()) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "Failed to wrap upstream event");
                    continue;
                }
            };

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                sent = outbound.send(text) => if !sent { break },
            }
        }
    })
}

/// Read frames from the browser until the socket ends, the pong deadline
/// passes or the session shuts down. Runs cleanup on the way out.
pub(crate) async fn read_pump<S, E>(
    session: Arc<Session>,
    manager: Arc<SessionManager>,
    mut stream: S,
    pong_wait: Duration,
) where
    S: Stream<Item = Result<Message, E>> + Unpin + Send,
    E: Display + Send,
{
    let mut deadline = Instant::now() + pong_wait;
    loop {
        // Frames already queued win over an elapsed deadline; a slow dispatch
        // must not cost the session a pong that arrived in time.
        let frame = tokio::select! {
            biased;
            () = session.shutdown.cancelled() => break,
            frame = stream.next() => frame,
            () = tokio::time::sleep_until(deadline) => {
                debug!(identity = %session.identity, "Pong deadline passed");
                break;
            }
        };

        match frame {
            Some(Ok(Message::Text(text))) => manager.dispatch(&session, text.as_str()).await,
            Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                Ok(text) => manager.dispatch(&session, text).await,
                Err(e) => warn!(identity = %session.identity, error = %e, "Binary frame is not UTF-8"),
            },
            Some(Ok(Message::Pong(_))) => deadline = Instant::now() + pong_wait,
            // Pings are answered by the socket itself
            Some(Ok(Message::Ping(_))) => {}
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(e)) => {
                debug!(identity = %session.identity, error = %e, "Socket read failed");
                break;
            }
        }
    }
    manager.cleanup(&session).await;
}

/// Drain the outbound queue into the socket and keep the connection alive
/// with pings. A closed queue ends the pump with a close frame.
pub(crate) async fn write_pump<K>(
    session: Arc<Session>,
    manager: Arc<SessionManager>,
    mut sink: K,
    mut outbound: mpsc::Receiver<String>,
    ping_interval: Duration,
) where
    K: Sink<Message> + Unpin + Send,
    K::Error: Display,
{
    let mut ticker = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
    loop {
        tokio::select! {
            message = outbound.recv() => match message {
                Some(text) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        debug!(identity = %session.identity, error = %e, "Socket write failed");
                        break;
                    }
                }
                None => {
                    if let Err(e) = sink.send(Message::Close(None)).await {
                        debug!(identity = %session.identity, error = %e, "Close frame not delivered");
                    }
                    let _ = sink.close().await;
                    break;
                }
            },
            _ = ticker.tick() => {
                if let Err(e) = sink.send(Message::Ping(Default::default())).await {
                    debug!(identity = %session.identity, error = %e, "Ping failed");
                    break;
                }
            }
        }
    }
    manager.cleanup(&session).await;
}
