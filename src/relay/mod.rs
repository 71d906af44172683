pub mod fanout;

use anyhow::Result;
use tokio::sync::mpsc;

pub use fanout::FanOut;

/// Marker prepended by form-encoded webhook senders.
const TEXT_MARKER: &str = "text=";

/// Create the relay queue between the webhook and the fan-out loop.
///
/// The channel holds a single payload, so a webhook request waits until the
/// fan-out loop has taken the previous one.
pub fn channel() -> (RelaySender, RelayReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (RelaySender { tx }, RelayReceiver { rx })
}

#[derive(Clone)]
pub struct RelaySender {
    tx: mpsc::Sender<String>,
}

impl RelaySender {
    pub async fn enqueue(&self, payload: String) -> Result<()> {
        self.tx
            .send(payload)
            .await
            .map_err(|_| anyhow::anyhow!("relay queue is closed"))
    }
}

pub struct RelayReceiver {
    rx: mpsc::Receiver<String>,
}

impl RelayReceiver {
    /// `None` once every sender is dropped.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

/// Remove the first `text=` anywhere in the body, not only at the start.
pub fn strip_marker(body: &str) -> String {
    body.replacen(TEXT_MARKER, "", 1)
}

/// Reverse query-string escaping: `+` becomes a space and `%XX` sequences
/// are decoded. Returns `None` when the decoded bytes are not UTF-8.
pub fn decode_payload(payload: &str) -> Option<String> {
    let spaced = payload.replace('+', " ");
    urlencoding::decode(&spaced).ok().map(|s| s.into_owned())
}
