use bytes::Bytes;
use chrono::{DateTime, Local};
use std::fmt;
use tokio::sync::mpsc;

const PREVIEW_LEN: usize = 32;

/// One publish received from the broker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Bytes,
    pub received_at: DateTime<Local>,
}

impl fmt::Display for BusMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} - {}",
            self.received_at.format("%H:%M:%S%.3f"),
            self.topic,
            self.preview()
        )
    }
}

impl BusMessage {
    pub fn from_topic(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        BusMessage {
            topic: topic.into(),
            payload: payload.into(),
            received_at: Local::now(),
        }
    }

    /// Payload text cut to a short prefix; camera frames are large.
    pub fn preview(&self) -> String {
        let text = String::from_utf8_lossy(&self.payload);
        match text.char_indices().nth(PREVIEW_LEN) {
            Some((cut, _)) => format!("{}…", &text[..cut]),
            None => text.into_owned(),
        }
    }
}

/// Sending half of the channel from the broker connection to the sync engine.
pub struct MsgManager {
    pub inbound: mpsc::Sender<BusMessage>,
}

impl MsgManager {
    pub fn new(inbound: mpsc::Sender<BusMessage>) -> Self {
        Self { inbound }
    }

    /// Hand a message to the engine, waiting for room in the channel.
    pub async fn forward(&self, message: BusMessage) -> Result<(), mpsc::error::SendError<BusMessage>> {
        self.inbound.send(message).await
    }
}
