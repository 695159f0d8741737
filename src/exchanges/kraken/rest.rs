use crate::core::errors::ExchangeError;
use crate::core::kernel::rest::Params;
use crate::core::kernel::RestClient;
use crate::core::types::{Balances, Candle, OrderConfirmation, OrderSide, TickerSnapshot};
use crate::exchanges::kraken::types::{
    unwrap_response, KrakenAddOrderResult, KrakenServerTime, KrakenTickerInfo,
};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{debug, instrument};

/// Metadata key that sits next to the candle rows in an OHLC result
const OHLC_METADATA_KEY: &str = "last";
const OHLC_FIELDS: usize = 8;

/// Thin typed wrapper around `RestClient` for the Kraken API
#[derive(Debug, Clone)]
pub struct KrakenRest<R: RestClient> {
    client: R,
}

impl<R: RestClient> KrakenRest<R> {
    pub fn new(client: R) -> Self {
        Self { client }
    }

    /// Asset code to balance, as strings exactly as Kraken reports them
    #[instrument(skip(self), fields(exchange = "kraken"))]
    pub async fn get_balance(&self) -> Result<Balances, ExchangeError> {
        let response = self
            .client
            .post_signed("/0/private/Balance", Params::new())
            .await?;
        unwrap_response(response)
    }

    /// Candles for `pair`, oldest first
    #[instrument(skip(self), fields(exchange = "kraken"))]
    pub async fn get_ohlc(&self, pair: &str, interval: u16) -> Result<Vec<Candle>, ExchangeError> {
        let mut query = Params::new();
        query.insert("pair".to_string(), Value::from(pair));
        query.insert("interval".to_string(), Value::from(interval));

        let response = self.client.get("/0/public/OHLC", query).await?;
        let result: Map<String, Value> = unwrap_response(response)?;
        let candles = parse_ohlc(&result)?;
        debug!(count = candles.len(), "Parsed OHLC rows");
        Ok(candles)
    }

    /// Submit one market order. No retries at this level.
    #[instrument(skip(self), fields(exchange = "kraken"))]
    pub async fn add_order(
        &self,
        pair: &str,
        volume: Decimal,
        side: OrderSide,
    ) -> Result<OrderConfirmation, ExchangeError> {
        let mut body = Params::new();
        body.insert("ordertype".to_string(), Value::from("market"));
        body.insert("type".to_string(), Value::from(side.as_str()));
        body.insert("pair".to_string(), Value::from(pair));
        body.insert("volume".to_string(), Value::from(volume.to_string()));

        let response = self.client.post_signed("/0/private/AddOrder", body).await?;
        let result: KrakenAddOrderResult = unwrap_response(response)?;

        Ok(OrderConfirmation {
            pair: pair.to_string(),
            side,
            volume,
            description: result.descr.order,
            transaction_ids: result.txid,
        })
    }

    #[instrument(skip(self), fields(exchange = "kraken"))]
    pub async fn get_ticker(&self, pair: &str) -> Result<TickerSnapshot, ExchangeError> {
        let mut query = Params::new();
        query.insert("pair".to_string(), Value::from(pair));

        let response = self.client.get("/0/public/Ticker", query).await?;
        let result: HashMap<String, KrakenTickerInfo> = unwrap_response(response)?;
        // Kraken answers under its own canonical pair name, not the one we asked for
        let info = result
            .into_values()
            .next()
            .ok_or_else(|| ExchangeError::ParseError(format!("No ticker returned for {}", pair)))?;

        Ok(TickerSnapshot {
            ask: first_price(&info.ask, "ask")?,
            bid: first_price(&info.bid, "bid")?,
            last: first_price(&info.last_trade, "last")?,
        })
    }

    #[instrument(skip(self), fields(exchange = "kraken"))]
    pub async fn get_server_time(&self) -> Result<KrakenServerTime, ExchangeError> {
        let response = self.client.get("/0/public/Time", Params::new()).await?;
        unwrap_response(response)
    }
}

fn first_price(field: &[String], name: &str) -> Result<f64, ExchangeError> {
    field
        .first()
        .ok_or_else(|| ExchangeError::ParseError(format!("Ticker field {} is empty", name)))?
        .parse::<f64>()
        .map_err(|e| ExchangeError::ParseError(format!("Invalid {} price: {}", name, e)))
}

/// Parse the `result` object of an OHLC reply.
///
/// The rows live under the pair name Kraken chose, which is the one key that
/// is not `last`. Each row is `[time, open, high, low, close, vwap, volume, count]`
/// where any field may be a JSON number or a numeric string.
pub fn parse_ohlc(result: &Map<String, Value>) -> Result<Vec<Candle>, ExchangeError> {
    let rows = result
        .iter()
        .find(|(key, _)| key.as_str() != OHLC_METADATA_KEY)
        .map(|(_, rows)| rows)
        .ok_or_else(|| ExchangeError::ParseError("OHLC result has no data key".to_string()))?
        .as_array()
        .ok_or_else(|| ExchangeError::ParseError("OHLC data is not an array".to_string()))?;

    rows.iter().map(parse_candle).collect()
}

fn parse_candle(row: &Value) -> Result<Candle, ExchangeError> {
    let fields = row
        .as_array()
        .ok_or_else(|| ExchangeError::ParseError("OHLC row is not an array".to_string()))?;
    if fields.len() < OHLC_FIELDS {
        return Err(ExchangeError::ParseError(format!(
            "OHLC row has {} fields, expected {}",
            fields.len(),
            OHLC_FIELDS
        )));
    }

    let mut values = [0.0_f64; OHLC_FIELDS];
    for (slot, field) in values.iter_mut().zip(fields) {
        *slot = numeric_field(field)?;
    }
    let [time, open, high, low, close, vwap, volume, trade_count] = values;

    Ok(Candle {
        time,
        open,
        high,
        low,
        close,
        vwap,
        volume,
        trade_count,
    })
}

fn numeric_field(field: &Value) -> Result<f64, ExchangeError> {
    match field {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| ExchangeError::ParseError(format!("Unrepresentable number {}", n))),
        Value::String(s) => s
            .parse::<f64>()
            .map_err(|e| ExchangeError::ParseError(format!("Invalid numeric field {:?}: {}", s, e))),
        other => Err(ExchangeError::ParseError(format!(
            "Unexpected OHLC field {}",
            other
        ))),
    }
}
