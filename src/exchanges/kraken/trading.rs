use crate::core::errors::ExchangeError;
use crate::core::kernel::RestClient;
use crate::core::types::{OrderConfirmation, OrderSide};
use crate::exchanges::kraken::rest::KrakenRest;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;
use tracing::{info, instrument, warn};

/// Total attempts for one order, including the first
pub const ORDER_ATTEMPTS: usize = 3;

/// Order placement with a bounded immediate retry
pub struct Trading<R: RestClient> {
    rest: KrakenRest<R>,
}

impl<R: RestClient> Trading<R> {
    pub fn new(rest: KrakenRest<R>) -> Self {
        Self { rest }
    }

    /// Place a market order, trying up to [`ORDER_ATTEMPTS`] times without
    /// backoff. Returns the first success, or the last error once every
    /// attempt has failed.
    #[instrument(skip(self), fields(exchange = "kraken"))]
    pub async fn place_order(
        &self,
        pair: &str,
        volume: Decimal,
        side: OrderSide,
    ) -> Result<OrderConfirmation, ExchangeError> {
        let attempts = AtomicU32::new(0);
        let attempt = &attempts;
        let rest = &self.rest;
        let strategy = FixedInterval::from_millis(0).take(ORDER_ATTEMPTS - 1);

        let result = Retry::spawn(strategy, || async move {
            let n = attempt.fetch_add(1, Ordering::Relaxed) + 1;
            rest.add_order(pair, volume, side)
                .await
                .map_err(|e| {
                    warn!(attempt = n, error = %e, "Order attempt failed");
                    e
                })
        })
        .await;

        match &result {
            Ok(confirmation) => info!(
                attempts = attempts.load(Ordering::Relaxed),
                txids = ?confirmation.transaction_ids,
                "Order placed"
            ),
            Err(e) => warn!(attempts = ORDER_ATTEMPTS, error = %e, "Order failed after all attempts"),
        }
        result
    }
}
