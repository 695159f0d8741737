use crate::core::errors::ExchangeError;
use crate::core::kernel::WsCodec;
use crate::core::types::Event;
use crate::exchanges::kraken::channels::ChannelRequest;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

const HEARTBEAT_CHANNEL: &str = "heartbeat";

/// Decoded frame from the Kraken v2 push feed
#[derive(Debug, Clone)]
pub enum KrakenMessage {
    /// Market data or status update, relayed to subscribers untouched
    Event(Event),
    /// Reply to a request we sent (subscribe, unsubscribe, ping)
    Ack(MethodAck),
    Heartbeat,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MethodAck {
    pub method: String,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
}

impl MethodAck {
    /// Acks are informational only; a rejected request is worth a warning.
    pub fn log(&self) {
        match (self.success, &self.error) {
            (Some(false), error) => warn!(
                method = %self.method,
                error = error.as_deref().unwrap_or("unknown"),
                "Kraken rejected request"
            ),
            _ => debug!(method = %self.method, result = ?self.result, "Kraken acknowledged request"),
        }
    }
}

/// Just enough of a frame to tell acks from channel messages
#[derive(Deserialize)]
struct FrameProbe {
    method: Option<String>,
    channel: Option<String>,
}

pub struct KrakenCodec;

impl KrakenCodec {
    fn encode(method: &str, request: &ChannelRequest) -> Message {
        let message = json!({
            "method": method,
            "params": request.params(),
        });
        Message::Text(message.to_string())
    }
}

impl WsCodec for KrakenCodec {
    type Request = ChannelRequest;
    type Message = KrakenMessage;

    fn encode_subscription(&self, request: &Self::Request) -> Result<Message, ExchangeError> {
        Ok(Self::encode("subscribe", request))
    }

    fn encode_unsubscription(&self, request: &Self::Request) -> Result<Message, ExchangeError> {
        Ok(Self::encode("unsubscribe", request))
    }

    fn decode_message(&self, message: Message) -> Result<Option<Self::Message>, ExchangeError> {
        let text = match message {
            Message::Text(text) => text,
            Message::Binary(data) => String::from_utf8(data).map_err(|e| {
                ExchangeError::ParseError(format!("Invalid UTF-8 in binary message: {}", e))
            })?,
            _ => return Ok(None),
        };

        let probe: FrameProbe = serde_json::from_str(&text)?;
        if probe.method.is_some() {
            return Ok(Some(KrakenMessage::Ack(serde_json::from_str(&text)?)));
        }

        match probe.channel.as_deref() {
            Some(HEARTBEAT_CHANNEL) => Ok(Some(KrakenMessage::Heartbeat)),
            Some(_) => Ok(Some(KrakenMessage::Event(serde_json::from_str(&text)?))),
            None => Err(ExchangeError::ParseError(format!(
                "Frame has neither method nor channel: {}",
                text
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(message: &Message) -> Value {
        match message {
            Message::Text(text) => serde_json::from_str(text).unwrap(),
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    #[test]
    fn test_encode_subscribe_and_unsubscribe() {
        let request = ChannelRequest::Ohlc {
            symbol: vec!["BTC/USD".to_string()],
            interval: 5,
        };
        let codec = KrakenCodec;

        let subscribe = codec.encode_subscription(&request).unwrap();
        assert_eq!(
            text(&subscribe),
            json!({
                "method": "subscribe",
                "params": {"channel": "ohlc", "symbol": ["BTC/USD"], "interval": 5}
            })
        );

        let unsubscribe = codec.encode_unsubscription(&request).unwrap();
        assert_eq!(text(&unsubscribe)["method"], "unsubscribe");
        assert_eq!(text(&unsubscribe)["params"], text(&subscribe)["params"]);
    }

    #[test]
    fn test_decode_event_keeps_data_verbatim() {
        let raw = r#"{"channel":"ohlc","type":"update","timestamp":"2023-10-04T16:26:30.524394914Z","data":[{"symbol":"MATIC/USD","open":0.5624,"interval":5}]}"#;
        let decoded = KrakenCodec
            .decode_message(Message::Text(raw.to_string()))
            .unwrap();

        match decoded {
            Some(KrakenMessage::Event(event)) => {
                assert_eq!(event.channel, "ohlc");
                assert_eq!(event.kind, "update");
                assert_eq!(event.timestamp, "2023-10-04T16:26:30.524394914Z");
                assert_eq!(
                    event.data_str(),
                    Some(r#"[{"symbol":"MATIC/USD","open":0.5624,"interval":5}]"#)
                );
            }
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn test_decode_heartbeat_and_ack() {
        let heartbeat = KrakenCodec
            .decode_message(Message::Text(r#"{"channel":"heartbeat"}"#.to_string()))
            .unwrap();
        assert!(matches!(heartbeat, Some(KrakenMessage::Heartbeat)));

        let ack = KrakenCodec
            .decode_message(Message::Text(
                r#"{"method":"subscribe","success":false,"error":"Currency pair not supported","time_in":"x","time_out":"y"}"#
                    .to_string(),
            ))
            .unwrap();
        match ack {
            Some(KrakenMessage::Ack(ack)) => {
                assert_eq!(ack.method, "subscribe");
                assert_eq!(ack.success, Some(false));
                assert_eq!(ack.error.as_deref(), Some("Currency pair not supported"));
            }
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(KrakenCodec
            .decode_message(Message::Text("not json".to_string()))
            .is_err());
        assert!(matches!(
            KrakenCodec.decode_message(Message::Text("{}".to_string())),
            Err(ExchangeError::ParseError(_))
        ));
        assert!(KrakenCodec
            .decode_message(Message::Ping(Vec::new()))
            .unwrap()
            .is_none());
    }
}
