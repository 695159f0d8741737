use crate::core::{
    errors::ExchangeError,
    kernel::RestClient,
    traits::{AccountInfo, ExchangeConnector, MarketDataSource, OrderPlacer},
    types::{Balances, Candle, OrderConfirmation, OrderSide},
};
use crate::exchanges::kraken::rest::KrakenRest;
use crate::exchanges::kraken::trading::Trading;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// REST side of the exchange: market data, balances and order placement
pub struct KrakenConnector<R: RestClient + Clone> {
    rest: KrakenRest<R>,
    trading: Trading<R>,
}

impl<R: RestClient + Clone> KrakenConnector<R> {
    pub fn new(client: R) -> Self {
        Self {
            rest: KrakenRest::new(client.clone()),
            trading: Trading::new(KrakenRest::new(client)),
        }
    }

    /// Typed endpoints not covered by the connector traits
    pub fn rest(&self) -> &KrakenRest<R> {
        &self.rest
    }
}

#[async_trait]
impl<R: RestClient + Clone> MarketDataSource for KrakenConnector<R> {
    async fn get_ohlc(&self, pair: &str, interval: u16) -> Result<Vec<Candle>, ExchangeError> {
        self.rest.get_ohlc(pair, interval).await
    }
}

#[async_trait]
impl<R: RestClient + Clone> OrderPlacer for KrakenConnector<R> {
    async fn place_order(
        &self,
        pair: &str,
        volume: Decimal,
        side: OrderSide,
    ) -> Result<OrderConfirmation, ExchangeError> {
        self.trading.place_order(pair, volume, side).await
    }
}

#[async_trait]
impl<R: RestClient + Clone> AccountInfo for KrakenConnector<R> {
    async fn get_balance(&self) -> Result<Balances, ExchangeError> {
        self.rest.get_balance().await
    }
}

impl<R: RestClient + Clone> ExchangeConnector for KrakenConnector<R> {}
