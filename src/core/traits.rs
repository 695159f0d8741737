use crate::core::{
    errors::ExchangeError,
    types::{Balances, Candle, OrderConfirmation, OrderSide},
};
use async_trait::async_trait;
use rust_decimal::Decimal;

#[async_trait]
pub trait MarketDataSource {
    /// OHLC candles for `pair` at `interval` minutes
    async fn get_ohlc(&self, pair: &str, interval: u16) -> Result<Vec<Candle>, ExchangeError>;
}

#[async_trait]
pub trait OrderPlacer {
    /// Place a market order
    async fn place_order(
        &self,
        pair: &str,
        volume: Decimal,
        side: OrderSide,
    ) -> Result<OrderConfirmation, ExchangeError>;
}

#[async_trait]
pub trait AccountInfo {
    async fn get_balance(&self) -> Result<Balances, ExchangeError>;
}

// Composite trait for the REST passthrough routes
#[async_trait]
pub trait ExchangeConnector: MarketDataSource + OrderPlacer + AccountInfo + Send + Sync {}
