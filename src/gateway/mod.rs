pub mod envelope;
pub mod manager;
pub mod router;
pub mod server;
pub mod session;

pub use envelope::{ChatMessage, Envelope, KRAKEN, SEND_MESSAGE};
pub use manager::{SessionManager, SessionSettings};
pub use router::{ChatHandler, EventHandler, EventRouter, ExchangeBridgeHandler};
pub use server::{router, serve, AppState};
pub use session::{Outbound, Session};
