use crate::core::errors::ExchangeError;
use crate::core::kernel::ws::{WsConfig, WsInbound, WsSink};
use crate::core::kernel::{TungsteniteWs, WsCodec};
use crate::core::types::Event;
use crate::exchanges::kraken::channels::ChannelRequest;
use crate::exchanges::kraken::codec::{KrakenCodec, KrakenMessage};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::collections::HashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

/// Receiving end of an upstream client's events.
///
/// Backed by a bounded broadcast channel: when the consumer falls behind, the
/// oldest events are dropped and the gap is logged.
pub struct EventStream {
    inner: broadcast::Receiver<Event>,
}

impl EventStream {
    /// Next event, or `None` once the upstream connection is gone
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.inner.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Slow consumer, dropped oldest upstream events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// One persistent connection to the Kraken push feed.
///
/// The channel map is only touched through `&mut self`, so whoever owns the
/// client is its single writer.
pub struct UpstreamClient {
    sink: Box<dyn WsSink>,
    codec: KrakenCodec,
    handlers: HashMap<String, ChannelRequest>,
    events: Option<EventStream>,
    shutdown: CancellationToken,
    reader: Option<JoinHandle<()>>,
    closed: bool,
}

impl UpstreamClient {
    /// Connect to `url` and start reading
    #[instrument(skip(config), fields(exchange = "kraken"))]
    pub async fn connect(url: &str, config: WsConfig) -> Result<Self, ExchangeError> {
        let buffer = config.message_buffer_size;
        let ws = TungsteniteWs::new(url.to_string(), "kraken".to_string()).with_config(config);
        let (sink, inbound) = ws.connect().await?;
        info!("Upstream connection established");
        Ok(Self::from_transport(sink, inbound, buffer))
    }

    /// Wrap an already open transport and start the read task
    pub fn from_transport(sink: Box<dyn WsSink>, inbound: WsInbound, buffer: usize) -> Self {
        let (sender, receiver) = broadcast::channel(buffer.max(1));
        let shutdown = CancellationToken::new();
        let reader = tokio::spawn(read_loop(inbound, sender, shutdown.clone()));

        Self {
            sink,
            codec: KrakenCodec,
            handlers: HashMap::new(),
            events: Some(EventStream { inner: receiver }),
            shutdown,
            reader: Some(reader),
            closed: false,
        }
    }

    /// Hand out the event stream. There is exactly one consumer; later calls
    /// get `None`.
    pub fn take_events(&mut self) -> Option<EventStream> {
        self.events.take()
    }

    /// Subscribe to `request`'s channel. An existing subscription to the same
    /// channel is unsubscribed first so the channel never has two handlers.
    #[instrument(skip(self), fields(exchange = "kraken", channel = request.channel()))]
    pub async fn subscribe(&mut self, request: ChannelRequest) -> Result<(), ExchangeError> {
        self.ensure_open()?;
        let channel = request.channel();

        if self.handlers.contains_key(channel) {
            if let Err(e) = self.unsubscribe(channel).await {
                warn!(error = %e, "Failed to drop previous subscription");
            }
        }

        let message = self.codec.encode_subscription(&request)?;
        self.sink.send_raw(message).await?;
        self.handlers.insert(channel.to_string(), request);
        debug!("Subscribed");
        Ok(())
    }

    #[instrument(skip(self), fields(exchange = "kraken"))]
    pub async fn unsubscribe(&mut self, channel: &str) -> Result<(), ExchangeError> {
        self.ensure_open()?;
        let request = self
            .handlers
            .get(channel)
            .ok_or_else(|| ExchangeError::ChannelNotFound(channel.to_string()))?;

        let message = self.codec.encode_unsubscription(request)?;
        self.sink.send_raw(message).await?;
        self.handlers.remove(channel);
        debug!("Unsubscribed");
        Ok(())
    }

    pub fn has_active_subscriptions(&self) -> bool {
        !self.handlers.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Open and still reading from Kraken
    pub fn is_connected(&self) -> bool {
        !self.closed
            && self
                .reader
                .as_ref()
                .is_some_and(|reader| !reader.is_finished())
    }

    /// Stop the read task, close the connection and end the event stream.
    /// Calling it again is a no-op.
    #[instrument(skip(self), fields(exchange = "kraken"))]
    pub async fn close(&mut self) -> Result<(), ExchangeError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.handlers.clear();
        self.shutdown.cancel();

        let result = self.sink.close().await;
        if let Some(reader) = self.reader.take() {
            if let Err(e) = reader.await {
                warn!(error = %e, "Upstream read task ended abnormally");
            }
        }
        info!("Upstream connection closed");
        result
    }

    fn ensure_open(&self) -> Result<(), ExchangeError> {
        if self.closed {
            Err(ExchangeError::ChannelClosed)
        } else {
            Ok(())
        }
    }
}

impl Drop for UpstreamClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn read_loop(
    mut inbound: WsInbound,
    events: broadcast::Sender<Event>,
    shutdown: CancellationToken,
) {
    let codec = KrakenCodec;
    loop {
        let message = tokio::select! {
            () = shutdown.cancelled() => break,
            message = inbound.next() => message,
        };

        match message {
            Some(Ok(Message::Close(frame))) => {
                info!(?frame, "Kraken closed the connection");
                break;
            }
            Some(Ok(message)) => match codec.decode_message(message) {
                Ok(Some(KrakenMessage::Event(event))) => {
                    if events.send(event).is_err() {
                        trace!("No event consumer attached");
                    }
                }
                Ok(Some(KrakenMessage::Ack(ack))) => ack.log(),
                Ok(Some(KrakenMessage::Heartbeat) | None) => {}
                Err(e) => warn!(error = %e, "Failed to decode upstream frame"),
            },
            Some(Err(e)) => {
                warn!(error = %e, "Upstream read failed");
                break;
            }
            None => {
                debug!("Upstream stream ended");
                break;
            }
        }
    }
    // Dropping the sender ends every EventStream
}

/// Opens upstream clients on demand. Injected so sessions can be tested
/// without a network.
#[async_trait]
pub trait UpstreamFactory: Send + Sync {
    async fn open(&self) -> Result<UpstreamClient, ExchangeError>;
}

/// Connects to the public Kraken push feed
#[derive(Debug, Clone)]
pub struct KrakenUpstreamFactory {
    url: String,
    config: WsConfig,
}

impl KrakenUpstreamFactory {
    pub fn new(url: String, config: WsConfig) -> Self {
        Self { url, config }
    }
}

#[async_trait]
impl UpstreamFactory for KrakenUpstreamFactory {
    async fn open(&self) -> Result<UpstreamClient, ExchangeError> {
        UpstreamClient::connect(&self.url, self.config.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchanges::kraken::testing::{fake_transport, FakeFeed};
    use serde_json::Value;

    fn ohlc(interval: u16) -> ChannelRequest {
        ChannelRequest::Ohlc {
            symbol: vec!["BTC/USD".to_string()],
            interval,
        }
    }

    fn client() -> (UpstreamClient, FakeFeed) {
        let (sink, inbound, feed) = fake_transport();
        (UpstreamClient::from_transport(sink, inbound, 16), feed)
    }

    #[tokio::test]
    async fn test_resubscribe_unsubscribes_first() {
        let (mut client, feed) = client();
        client.subscribe(ohlc(1)).await.unwrap();
        client.subscribe(ohlc(5)).await.unwrap();

        let sent = feed.sent();
        let methods: Vec<&str> = sent.iter().map(|m| m["method"].as_str().unwrap()).collect();
        assert_eq!(methods, vec!["subscribe", "unsubscribe", "subscribe"]);
        // The unsubscribe re-issues the parameters of the replaced subscription
        assert_eq!(sent[1]["params"]["interval"], 1);
        assert_eq!(sent[2]["params"]["interval"], 5);
        assert!(client.has_active_subscriptions());
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_channel() {
        let (mut client, feed) = client();
        let result = client.unsubscribe("ohlc").await;
        assert!(matches!(result, Err(ExchangeError::ChannelNotFound(c)) if c == "ohlc"));
        assert!(feed.sent().is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_last_channel_leaves_no_subscriptions() {
        let (mut client, feed) = client();
        client.subscribe(ohlc(1)).await.unwrap();
        client
            .subscribe(ChannelRequest::Ticker {
                symbol: vec!["ETH/USD".to_string()],
            })
            .await
            .unwrap();

        client.unsubscribe("ohlc").await.unwrap();
        assert!(client.has_active_subscriptions());
        client.unsubscribe("ticker").await.unwrap();
        assert!(!client.has_active_subscriptions());

        let last: &Value = &feed.sent()[3];
        assert_eq!(last["method"], "unsubscribe");
        assert_eq!(last["params"]["channel"], "ticker");
    }

    #[tokio::test]
    async fn test_events_are_published_in_order_and_noise_is_dropped() {
        let (mut client, feed) = client();
        let mut events = client.take_events().unwrap();
        assert!(client.take_events().is_none());

        feed.push(r#"{"method":"subscribe","success":true,"result":{"channel":"ohlc"}}"#);
        feed.push(r#"{"channel":"ohlc","type":"snapshot","timestamp":"t1","data":[1]}"#);
        feed.push(r#"{"channel":"heartbeat"}"#);
        feed.push("garbage");
        feed.push(r#"{"channel":"ohlc","type":"update","timestamp":"t2","data":[2]}"#);

        let first = events.recv().await.unwrap();
        let second = events.recv().await.unwrap();
        assert_eq!((first.kind.as_str(), first.data_str()), ("snapshot", Some("[1]")));
        assert_eq!((second.kind.as_str(), second.data_str()), ("update", Some("[2]")));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_ends_stream() {
        let (mut client, feed) = client();
        let mut events = client.take_events().unwrap();
        client.subscribe(ohlc(1)).await.unwrap();

        client.close().await.unwrap();
        client.close().await.unwrap();

        assert_eq!(feed.close_count(), 1);
        assert!(client.is_closed());
        assert!(!client.has_active_subscriptions());
        assert!(events.recv().await.is_none());
        assert!(matches!(
            client.subscribe(ohlc(1)).await,
            Err(ExchangeError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_remote_close_ends_stream() {
        let (mut client, feed) = client();
        let mut events = client.take_events().unwrap();
        feed.push(r#"{"channel":"status","type":"update","data":[{"system":"online"}]}"#);
        feed.disconnect();

        assert_eq!(events.recv().await.unwrap().channel, "status");
        assert!(events.recv().await.is_none());
    }
}
