use std::collections::BTreeSet;

use tokio::sync::Mutex;

/// Chats that opted in to relayed notifications. In-memory only.
#[derive(Default)]
pub struct Registry {
    chats: Mutex<BTreeSet<i64>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the chat was not registered before.
    pub async fn register(&self, chat_id: i64) -> bool {
        self.chats.lock().await.insert(chat_id)
    }

    /// Copy of the current recipients for a single fan-out pass.
    pub async fn snapshot(&self) -> Vec<i64> {
        self.chats.lock().await.iter().copied().collect()
    }

    #[cfg(test)]
    pub async fn contains(&self, chat_id: i64) -> bool {
        self.chats.lock().await.contains(&chat_id)
    }

    pub async fn len(&self) -> usize {
        self.chats.lock().await.len()
    }

    #[cfg(test)]
    pub async fn is_empty(&self) -> bool {
        self.chats.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let registry = Registry::new();
        assert!(registry.is_empty().await);
        assert!(registry.register(42).await);
        assert!(!registry.register(42).await);
        assert_eq!(registry.len().await, 1);
        assert!(registry.contains(42).await);
    }

    #[tokio::test]
    async fn test_snapshot_is_detached() {
        let registry = Registry::new();
        registry.register(3).await;
        registry.register(-100).await;

        let snapshot = registry.snapshot().await;
        registry.register(7).await;

        assert_eq!(snapshot, vec![-100, 3]);
        assert_eq!(registry.snapshot().await, vec![-100, 3, 7]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registration_loses_nothing() {
        let registry = Arc::new(Registry::new());

        let writers = (0..200i64).map(|id| {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry.register(id).await;
            })
        });
        let readers = (0..50).map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move {
                let snapshot = registry.snapshot().await;
                assert!(snapshot.windows(2).all(|w| w[0] < w[1]));
            })
        });

        for result in futures::future::join_all(writers.chain(readers)).await {
            result.unwrap();
        }

        assert_eq!(registry.len().await, 200);
    }
}
