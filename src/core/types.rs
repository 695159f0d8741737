use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::collections::HashMap;
use std::fmt;

/// Asset code → balance, as reported by the exchange.
pub type Balances = HashMap<String, String>;

/// One OHLC row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub vwap: f64,
    pub volume: f64,
    pub trade_count: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepted market order as acknowledged by the exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderConfirmation {
    pub pair: String,
    pub side: OrderSide,
    pub volume: Decimal,
    pub description: String,
    pub transaction_ids: Vec<String>,
}

/// Best bid/ask and last trade price for a pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickerSnapshot {
    pub ask: f64,
    pub bid: f64,
    pub last: f64,
}

/// One message from the exchange push feed.
///
/// `data` is carried through untouched so the browser sees exactly what the
/// exchange sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub channel: String,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Box<RawValue>>,
}

impl Event {
    pub fn data_str(&self) -> Option<&str> {
        self.data.as_deref().map(RawValue::get)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_keeps_raw_payload() {
        let raw = r#"{"channel":"ohlc","type":"update","timestamp":"2024-01-01T00:00:00Z","data":[{"open": 1.5}]}"#;
        let event: Event = serde_json::from_str(raw).unwrap();
        assert_eq!(event.channel, "ohlc");
        assert_eq!(event.kind, "update");
        assert_eq!(event.data_str(), Some(r#"[{"open": 1.5}]"#));

        let encoded = serde_json::to_string(&event).unwrap();
        assert!(encoded.contains(r#""type":"update""#));
        assert!(encoded.contains(r#""data":[{"open": 1.5}]"#));
    }

    #[test]
    fn test_order_side_wire_names() {
        assert_eq!(OrderSide::Buy.as_str(), "buy");
        assert_eq!(serde_json::to_string(&OrderSide::Sell).unwrap(), "\"sell\"");
    }
}
