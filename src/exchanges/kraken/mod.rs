pub mod builder;
pub mod channels;
pub mod codec;
pub mod connector;
pub mod rest;
pub mod trading;
pub mod types;
pub mod upstream;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types for easier importing
pub use builder::{build_connector, build_rest_client};
pub use channels::{ChannelRegistry, ChannelRequest, SubscriptionParams};
pub use codec::{KrakenCodec, KrakenMessage};
pub use connector::KrakenConnector;
pub use rest::{parse_ohlc, KrakenRest};
pub use trading::Trading;
pub use upstream::{EventStream, KrakenUpstreamFactory, UpstreamClient, UpstreamFactory};
