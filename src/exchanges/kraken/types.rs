use crate::core::errors::ExchangeError;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

/// Every REST reply from Kraken is wrapped in `{"error": [...], "result": ...}`.
#[derive(Debug, Deserialize)]
pub struct KrakenResponse<T> {
    #[serde(default)]
    pub error: Vec<String>,
    pub result: Option<T>,
}

impl<T> KrakenResponse<T> {
    /// A non-empty error list wins over any result that came with it.
    pub fn into_result(self) -> Result<T, ExchangeError> {
        if !self.error.is_empty() {
            return Err(ExchangeError::Exchange(self.error));
        }
        self.result
            .ok_or_else(|| ExchangeError::ParseError("Response carried no result".to_string()))
    }
}

/// Decode a raw JSON reply through the error envelope
pub fn unwrap_response<T: DeserializeOwned>(value: Value) -> Result<T, ExchangeError> {
    serde_json::from_value::<KrakenResponse<T>>(value)?.into_result()
}

#[derive(Debug, Deserialize)]
pub struct KrakenOrderDescription {
    pub order: String,
}

#[derive(Debug, Deserialize)]
pub struct KrakenAddOrderResult {
    pub descr: KrakenOrderDescription,
    #[serde(default)]
    pub txid: Vec<String>,
}

/// Ticker entry; each price field is `[price, whole lot volume, lot volume]`
/// (the last-trade field has only two entries).
#[derive(Debug, Deserialize)]
pub struct KrakenTickerInfo {
    #[serde(rename = "a")]
    pub ask: Vec<String>,
    #[serde(rename = "b")]
    pub bid: Vec<String>,
    #[serde(rename = "c")]
    pub last_trade: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct KrakenServerTime {
    pub unixtime: i64,
    pub rfc1123: String,
}
