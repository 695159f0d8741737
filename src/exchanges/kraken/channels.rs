use crate::core::errors::ExchangeError;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

pub const OHLC: &str = "ohlc";
pub const TICKER: &str = "ticker";
pub const TRADE: &str = "trade";
pub const BOOK: &str = "book";

/// Kraken's own default candle interval, in minutes
const DEFAULT_INTERVAL: u16 = 1;
const DEFAULT_BOOK_DEPTH: u16 = 10;

/// Channel parameters as the browser sends them inside a bridge request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionParams {
    pub channel: String,
    #[serde(default)]
    pub symbol: Vec<String>,
    #[serde(default)]
    pub interval: Option<u16>,
    #[serde(default)]
    pub depth: Option<u16>,
}

/// A subscription the push feed understands. Each variant carries exactly
/// the parameters its channel needs on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelRequest {
    Ohlc { symbol: Vec<String>, interval: u16 },
    Ticker { symbol: Vec<String> },
    Trade { symbol: Vec<String> },
    Book { symbol: Vec<String>, depth: u16 },
}

impl ChannelRequest {
    pub fn channel(&self) -> &'static str {
        match self {
            Self::Ohlc { .. } => OHLC,
            Self::Ticker { .. } => TICKER,
            Self::Trade { .. } => TRADE,
            Self::Book { .. } => BOOK,
        }
    }

    /// The `params` object for a subscribe/unsubscribe message
    pub fn params(&self) -> Value {
        match self {
            Self::Ohlc { symbol, interval } => json!({
                "channel": OHLC,
                "symbol": symbol,
                "interval": interval,
            }),
            Self::Ticker { symbol } => json!({"channel": TICKER, "symbol": symbol}),
            Self::Trade { symbol } => json!({"channel": TRADE, "symbol": symbol}),
            Self::Book { symbol, depth } => json!({
                "channel": BOOK,
                "symbol": symbol,
                "depth": depth,
            }),
        }
    }
}

pub type ChannelBuilder = fn(&SubscriptionParams) -> Result<ChannelRequest, ExchangeError>;

/// Channel name to request builder. Built once at startup and handed to
/// whatever needs to turn browser requests into upstream subscriptions.
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    builders: HashMap<String, ChannelBuilder>,
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut channels: Vec<&String> = self.builders.keys().collect();
        channels.sort();
        f.debug_struct("ChannelRegistry")
            .field("channels", &channels)
            .finish()
    }
}

impl ChannelRegistry {
    /// An empty registry; every channel is unsupported until registered
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every channel the gateway relays
    pub fn with_default_channels() -> Self {
        Self::new()
            .register(OHLC, build_ohlc)
            .register(TICKER, build_ticker)
            .register(TRADE, build_trade)
            .register(BOOK, build_book)
    }

    #[must_use]
    pub fn register(mut self, channel: &str, builder: ChannelBuilder) -> Self {
        self.builders.insert(channel.to_string(), builder);
        self
    }

    pub fn supports(&self, channel: &str) -> bool {
        self.builders.contains_key(channel)
    }

    pub fn build(&self, params: &SubscriptionParams) -> Result<ChannelRequest, ExchangeError> {
        let builder = self
            .builders
            .get(&params.channel)
            .ok_or_else(|| ExchangeError::UnsupportedChannel(params.channel.clone()))?;
        builder(params)
    }
}

fn symbols(params: &SubscriptionParams) -> Result<Vec<String>, ExchangeError> {
    if params.symbol.is_empty() {
        return Err(ExchangeError::ParseError(format!(
            "Channel {} needs at least one symbol",
            params.channel
        )));
    }
    Ok(params.symbol.clone())
}

fn build_ohlc(params: &SubscriptionParams) -> Result<ChannelRequest, ExchangeError> {
    Ok(ChannelRequest::Ohlc {
        symbol: symbols(params)?,
        interval: params.interval.unwrap_or(DEFAULT_INTERVAL),
    })
}

fn build_ticker(params: &SubscriptionParams) -> Result<ChannelRequest, ExchangeError> {
    Ok(ChannelRequest::Ticker {
        symbol: symbols(params)?,
    })
}

fn build_trade(params: &SubscriptionParams) -> Result<ChannelRequest, ExchangeError> {
    Ok(ChannelRequest::Trade {
        symbol: symbols(params)?,
    })
}

fn build_book(params: &SubscriptionParams) -> Result<ChannelRequest, ExchangeError> {
    Ok(ChannelRequest::Book {
        symbol: symbols(params)?,
        depth: params.depth.unwrap_or(DEFAULT_BOOK_DEPTH),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(raw: &str) -> SubscriptionParams {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn test_ohlc_request_from_browser_params() {
        let registry = ChannelRegistry::with_default_channels();
        let request = registry
            .build(&params(r#"{"channel":"ohlc","symbol":["BTC/USD"],"interval":60}"#))
            .unwrap();

        assert_eq!(
            request,
            ChannelRequest::Ohlc {
                symbol: vec!["BTC/USD".to_string()],
                interval: 60
            }
        );
        assert_eq!(
            request.params(),
            json!({"channel": "ohlc", "symbol": ["BTC/USD"], "interval": 60})
        );
    }

    #[test]
    fn test_defaults_fill_missing_parameters() {
        let registry = ChannelRegistry::with_default_channels();
        let book = registry
            .build(&params(r#"{"channel":"book","symbol":["ETH/USD"]}"#))
            .unwrap();
        assert_eq!(book.params()["depth"], 10);

        let ohlc = registry
            .build(&params(r#"{"channel":"ohlc","symbol":["ETH/USD"]}"#))
            .unwrap();
        assert_eq!(ohlc.params()["interval"], 1);
    }

    #[test]
    fn test_unknown_channel_is_unsupported() {
        let registry = ChannelRegistry::with_default_channels();
        let result = registry.build(&params(r#"{"channel":"level3","symbol":["BTC/USD"]}"#));
        assert!(matches!(result, Err(ExchangeError::UnsupportedChannel(c)) if c == "level3"));
    }

    #[test]
    fn test_empty_registry_supports_nothing() {
        let registry = ChannelRegistry::new();
        assert!(!registry.supports(OHLC));
        let result = registry.build(&params(r#"{"channel":"ohlc","symbol":["BTC/USD"]}"#));
        assert!(matches!(result, Err(ExchangeError::UnsupportedChannel(_))));
    }

    #[test]
    fn test_missing_symbol_is_rejected() {
        let registry = ChannelRegistry::with_default_channels();
        let result = registry.build(&params(r#"{"channel":"ticker"}"#));
        assert!(matches!(result, Err(ExchangeError::ParseError(_))));
    }
}
