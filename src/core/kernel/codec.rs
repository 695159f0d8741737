use crate::core::errors::ExchangeError;
use tokio_tungstenite::tungstenite::Message;

/// Wire format of a push feed: how subscriptions are written and how inbound
/// frames are read back as typed messages.
pub trait WsCodec: Send + Sync + 'static {
    /// A subscription as the feed understands it
    type Request: Send + Sync;

    /// Typed form of an inbound frame
    type Message: Send + Sync;

    fn encode_subscription(&self, request: &Self::Request) -> Result<Message, ExchangeError>;

    /// Undo a subscription. Receives the same request that was subscribed.
    fn encode_unsubscription(&self, request: &Self::Request) -> Result<Message, ExchangeError>;

    /// Read one data frame. `Ok(None)` means the frame carries nothing worth
    /// decoding; control frames never reach the codec.
    fn decode_message(&self, message: Message) -> Result<Option<Self::Message>, ExchangeError>;
}
