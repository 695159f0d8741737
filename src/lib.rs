pub mod core;
pub mod exchanges;
pub mod gateway;

pub use core::{errors::ExchangeError, traits::ExchangeConnector, types::*};
pub use exchanges::kraken::KrakenConnector;
pub use gateway::{AppState, SessionManager};
