use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::platform::{Messenger, OutgoingMessage};
use crate::registry::Registry;
use crate::relay::{decode_payload, RelayReceiver};

/// Outcome of relaying one message
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub failed: usize,
}

/// Drains the relay queue and sends each message to every registered chat
pub struct FanOut {
    registry: Arc<Registry>,
    messenger: Arc<dyn Messenger>,
    retries: u32,
    retry_delay: Duration,
}

impl FanOut {
    pub fn new(registry: Arc<Registry>, messenger: Arc<dyn Messenger>, config: &RelayConfig) -> Self {
        Self {
            registry,
            messenger,
            retries: config.send_retries,
            retry_delay: config.retry_delay(),
        }
    }

    /// Runs until every relay sender is dropped.
    pub async fn run(self, mut queue: RelayReceiver) {
        info!("Fan-out loop started");
        while let Some(message) = queue.recv().await {
            debug!("Relaying payload: {}", message);
            let delivery = self.deliver(&message).await;
            info!(
                "Relayed message to {} chat(s), {} failed",
                delivery.delivered, delivery.failed
            );
        }
        info!("Relay queue closed, fan-out loop stopping");
    }

    pub async fn deliver(&self, message: &str) -> Delivery {
        let text = match decode_payload(message) {
            Some(text) => text,
            None => {
                warn!("Payload is not valid percent-encoded UTF-8, relaying it as-is");
                message.to_string()
            }
        };

        let mut delivery = Delivery::default();
        if text.trim().is_empty() {
            warn!("Dropping relayed message with no text");
            return delivery;
        }

        for chat_id in self.registry.snapshot().await {
            match self.send_with_retry(chat_id, &text).await {
                Ok(()) => delivery.delivered += 1,
                Err(e) => {
                    warn!("Giving up on chat {}: {:#}", chat_id, e);
                    delivery.failed += 1;
                }
            }
        }
        delivery
    }

    async fn send_with_retry(&self, chat_id: i64, text: &str) -> Result<()> {
        let mut delay = self.retry_delay;
        let mut attempt = 0;
        loop {
            match self
                .messenger
                .send(OutgoingMessage::text(chat_id, text))
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    warn!(
                        "Send to chat {} failed (attempt {}/{}): {:#}",
                        chat_id,
                        attempt,
                        self.retries + 1,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::testing::RecordingMessenger;
    use crate::relay;

    fn config(retries: u32) -> RelayConfig {
        RelayConfig {
            send_retries: retries,
            retry_delay_ms: 0,
        }
    }

    async fn registry_with(chats: &[i64]) -> Arc<Registry> {
        let registry = Arc::new(Registry::new());
        for chat in chats {
            registry.register(*chat).await;
        }
        registry
    }

    #[tokio::test]
    async fn test_each_recipient_gets_message_once() {
        let registry = registry_with(&[1, 2, 3]).await;
        let messenger = Arc::new(RecordingMessenger::default());
        let fanout = FanOut::new(registry, messenger.clone(), &config(0));

        let delivery = fanout.deliver("hello%20world").await;

        assert_eq!(delivery, Delivery { delivered: 3, failed: 0 });
        let sent = messenger.sent().await;
        let chats: Vec<i64> = sent.iter().map(|m| m.chat_id).collect();
        assert_eq!(chats, vec![1, 2, 3]);
        assert!(sent.iter().all(|m| m.text == "hello world"));
    }

    #[tokio::test]
    async fn test_duplicate_registration_no_duplicate_delivery() {
        let registry = registry_with(&[5, 5, 5]).await;
        let messenger = Arc::new(RecordingMessenger::default());
        let fanout = FanOut::new(registry, messenger.clone(), &config(0));

        fanout.deliver("ping").await;

        assert_eq!(messenger.sent().await.len(), 1);
    }

    #[tokio::test]
    async fn test_no_recipients() {
        let messenger = Arc::new(RecordingMessenger::default());
        let fanout = FanOut::new(Arc::new(Registry::new()), messenger.clone(), &config(0));

        assert_eq!(fanout.deliver("ping").await, Delivery::default());
        assert!(messenger.attempts().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_recipient_does_not_block_others() {
        let registry = registry_with(&[1, 2, 3]).await;
        let messenger = Arc::new(RecordingMessenger::failing_for(&[2]));
        let fanout = FanOut::new(registry, messenger.clone(), &config(0));

        let delivery = fanout.deliver("alert").await;

        assert_eq!(delivery, Delivery { delivered: 2, failed: 1 });
        let chats: Vec<i64> = messenger.sent().await.iter().map(|m| m.chat_id).collect();
        assert_eq!(chats, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_failed_send_is_retried() {
        let registry = registry_with(&[9]).await;
        let messenger = Arc::new(RecordingMessenger::failing_for(&[9]));
        let fanout = FanOut::new(registry, messenger.clone(), &config(2));

        let delivery = fanout.deliver("alert").await;

        assert_eq!(delivery.failed, 1);
        assert_eq!(messenger.attempts().await, vec![9, 9, 9]);
    }

    #[tokio::test]
    async fn test_empty_payload_is_not_sent() {
        let registry = registry_with(&[1, 2]).await;
        let messenger = Arc::new(RecordingMessenger::default());
        let fanout = FanOut::new(registry, messenger.clone(), &config(2));

        assert_eq!(fanout.deliver("").await, Delivery::default());
        assert_eq!(fanout.deliver("+%20").await, Delivery::default());
        assert!(messenger.attempts().await.is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_relayed_raw() {
        let registry = registry_with(&[1]).await;
        let messenger = Arc::new(RecordingMessenger::default());
        let fanout = FanOut::new(registry, messenger.clone(), &config(0));

        fanout.deliver("bad%FF").await;

        assert_eq!(messenger.sent().await[0].text, "bad%FF");
    }

    #[tokio::test]
    async fn test_run_drains_queue_in_order() {
        let registry = registry_with(&[1]).await;
        let messenger = Arc::new(RecordingMessenger::default());
        let fanout = FanOut::new(registry, messenger.clone(), &config(0));
        let (tx, rx) = relay::channel();

        let handle = tokio::spawn(fanout.run(rx));
        for text in ["first", "second", "third"] {
            tx.enqueue(text.to_string()).await.unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        let texts: Vec<String> = messenger.sent().await.into_iter().map(|m| m.text).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registration_during_fanout() {
        let registry = Arc::new(Registry::new());
        let messenger = Arc::new(RecordingMessenger::default());
        let fanout = Arc::new(FanOut::new(registry.clone(), messenger.clone(), &config(0)));

        let registrations = (0..100i64).map(|id| {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry.register(id).await;
            })
        });
        let relays = (0..20).map(|_| {
            let fanout = fanout.clone();
            tokio::spawn(async move {
                let delivery = fanout.deliver("tick").await;
                assert_eq!(delivery.failed, 0);
            })
        });

        for result in futures::future::join_all(registrations.chain(relays)).await {
            result.unwrap();
        }

        assert_eq!(registry.len().await, 100);
        let delivery = fanout.deliver("final").await;
        assert_eq!(delivery.delivered, 100);
    }
}
