//! In-memory stand-in for the Kraken push connection.

use crate::core::errors::ExchangeError;
use crate::core::kernel::ws::{WsInbound, WsSink};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

struct FakeSink {
    sent: Arc<Mutex<Vec<Message>>>,
    closes: Arc<AtomicUsize>,
    broken: Arc<AtomicBool>,
}

#[async_trait]
impl WsSink for FakeSink {
    async fn send_raw(&mut self, msg: Message) -> Result<(), ExchangeError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(ExchangeError::NetworkError("connection reset".to_string()));
        }
        self.sent.lock().unwrap().push(msg);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ExchangeError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Test handle: inspect what was written and script what is read
#[derive(Clone)]
pub struct FakeFeed {
    sent: Arc<Mutex<Vec<Message>>>,
    closes: Arc<AtomicUsize>,
    broken: Arc<AtomicBool>,
    inbound: Arc<Mutex<Option<mpsc::UnboundedSender<Message>>>>,
}

impl FakeFeed {
    /// Every text frame written so far, parsed
    pub fn sent(&self) -> Vec<Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|message| match message {
                Message::Text(text) => serde_json::from_str(text).unwrap(),
                other => panic!("unexpected frame {:?}", other),
            })
            .collect()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Deliver a text frame as if Kraken sent it
    pub fn push(&self, text: &str) {
        if let Some(sender) = self.inbound.lock().unwrap().as_ref() {
            let _ = sender.send(Message::Text(text.to_string()));
        }
    }

    /// End the inbound stream as if the connection dropped. Later writes fail.
    pub fn disconnect(&self) {
        self.broken.store(true, Ordering::SeqCst);
        self.inbound.lock().unwrap().take();
    }
}

pub fn fake_transport() -> (Box<dyn WsSink>, WsInbound, FakeFeed) {
    let sent = Arc::new(Mutex::new(Vec::new()));
    let closes = Arc::new(AtomicUsize::new(0));
    let broken = Arc::new(AtomicBool::new(false));
    let (sender, receiver) = mpsc::unbounded_channel();

    let inbound = futures_util::stream::unfold(receiver, |mut receiver| async move {
        receiver.recv().await.map(|message| (Ok(message), receiver))
    })
    .boxed();

    let sink = FakeSink {
        sent: Arc::clone(&sent),
        closes: Arc::clone(&closes),
        broken: Arc::clone(&broken),
    };
    let feed = FakeFeed {
        sent,
        closes,
        broken,
        inbound: Arc::new(Mutex::new(Some(sender))),
    };
    (Box::new(sink), inbound, feed)
}
