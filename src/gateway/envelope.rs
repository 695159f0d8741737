use crate::core::errors::ExchangeError;
use crate::core::types::Event;
use crate::exchanges::kraken::SubscriptionParams;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// Chat message relayed between browsers
pub const SEND_MESSAGE: &str = "send_message";
/// Exchange bridge: subscription requests in, upstream events out
pub const KRAKEN: &str = "kraken";

/// `{"type": ..., "payload": ...}` frame exchanged with the browser
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Box<RawValue>,
}

impl Envelope {
    pub fn new<T: Serialize>(kind: &str, payload: &T) -> Result<Self, ExchangeError> {
        Ok(Self {
            kind: kind.to_string(),
            payload: RawValue::from_string(serde_json::to_string(payload)?)?,
        })
    }

    /// Wrap an upstream event for delivery to the browser
    pub fn kraken(event: &Event) -> Result<Self, ExchangeError> {
        Self::new(KRAKEN, event)
    }

    pub fn to_text(&self) -> Result<String, ExchangeError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message: String,
    pub from: String,
}

/// Payload of a `kraken` envelope sent by the browser
#[derive(Debug, Deserialize)]
pub struct BridgeRequest {
    pub method: String,
    pub params: SubscriptionParams,
}
