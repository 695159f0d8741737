use crate::core::errors::ExchangeError;
use async_trait::async_trait;
use futures_util::stream::{BoxStream, SplitSink};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, instrument};

/// Inbound half of an exchange connection, control frames already filtered
pub type WsInbound = BoxStream<'static, Result<Message, ExchangeError>>;

type TungsteniteSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Events buffered for a slow consumer before the oldest are dropped
    pub message_buffer_size: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000, // 10 seconds
            message_buffer_size: 1024,
        }
    }
}

/// Outbound half of a WebSocket connection - pure transport
#[async_trait]
pub trait WsSink: Send {
    /// Send a raw message
    async fn send_raw(&mut self, msg: Message) -> Result<(), ExchangeError>;

    /// Send a close frame and stop writing
    async fn close(&mut self) -> Result<(), ExchangeError>;
}

#[async_trait]
impl WsSink for TungsteniteSink {
    async fn send_raw(&mut self, msg: Message) -> Result<(), ExchangeError> {
        self.send(msg).await.map_err(|e| {
            ExchangeError::NetworkError(format!("Failed to send WebSocket message: {}", e))
        })
    }

    async fn close(&mut self) -> Result<(), ExchangeError> {
        // The peer may already be gone; a failed close frame is not an error here
        let _ = self.send(Message::Close(None)).await;
        SinkExt::close(self)
            .await
            .map_err(|e| ExchangeError::NetworkError(format!("Failed to close WebSocket: {}", e)))
    }
}

/// Tungstenite-based WebSocket connector
pub struct TungsteniteWs {
    url: String,
    exchange_name: String,
    config: WsConfig,
}

impl TungsteniteWs {
    /// # Arguments
    /// * `url` - The WebSocket URL to connect to
    /// * `exchange_name` - Name of the exchange for logging/tracing
    pub fn new(url: String, exchange_name: String) -> Self {
        Self {
            url,
            exchange_name,
            config: WsConfig::default(),
        }
    }

    /// Set custom WebSocket configuration
    pub fn with_config(mut self, config: WsConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &WsConfig {
        &self.config
    }

    /// Open the connection and split it into its two halves
    #[instrument(skip(self), fields(exchange = %self.exchange_name, url = %self.url))]
    pub async fn connect(&self) -> Result<(Box<dyn WsSink>, WsInbound), ExchangeError> {
        let connect_timeout = Duration::from_millis(self.config.connect_timeout_ms);

        let (ws_stream, _) = tokio::time::timeout(connect_timeout, connect_async(&self.url))
            .await
            .map_err(|_| {
                ExchangeError::ConnectionTimeout("WebSocket connection timeout".to_string())
            })?
            .map_err(|e| {
                ExchangeError::NetworkError(format!("WebSocket connection failed: {}", e))
            })?;

        debug!("WebSocket connected");

        let (write, read) = ws_stream.split();
        let inbound = read
            .filter_map(|message| async move {
                match message {
                    // Pongs to exchange pings are flushed by tungstenite on the next read
                    Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
                    Ok(message) => Some(Ok(message)),
                    Err(e) => Some(Err(ExchangeError::NetworkError(format!(
                        "WebSocket error: {}",
                        e
                    )))),
                }
            })
            .boxed();

        Ok((Box::new(write), inbound))
    }
}
