//! Transport kernel: signed REST, raw WebSocket plumbing and the codec seam
//! that turns exchange frames into typed messages. Nothing in here knows
//! about browser sessions.

pub mod codec;
pub mod rest;
pub mod signer;
pub mod ws;

pub use codec::WsCodec;
pub use rest::{Params, ReqwestRest, RestClient, RestClientBuilder, RestClientConfig, RestRequest};
pub use signer::{KrakenSigner, NonceSource, SignatureResult, Signer};
pub use ws::{TungsteniteWs, WsConfig, WsInbound, WsSink};
