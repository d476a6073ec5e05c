use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use tokio::sync::broadcast;

use crate::{RelayError, Result};

/// At-most-one in-flight producer per key within this process.
///
/// The first caller for a key becomes the leader and runs the producer;
/// concurrent callers subscribe to the leader's outcome and observe the
/// same value or error. Once the producer settles the pending record is
/// cleared, so a later call runs the producer again.
pub struct Singleflight<V: Clone> {
    inflight: Mutex<HashMap<String, broadcast::Sender<Result<V>>>>,
}

impl<V: Clone + Send + 'static> Singleflight<V> {
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run<F, Fut>(&self, key: &str, producer: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        enum Role<V: Clone> {
            Leader(broadcast::Sender<Result<V>>),
            Follower(broadcast::Receiver<Result<V>>),
        }

        let role = {
            let mut map = self.inflight.lock().expect("inflight map poisoned");
            match map.get(key) {
                // Followers subscribe while holding the lock, so the
                // leader cannot clear the record and publish before the
                // subscription exists.
                Some(tx) => Role::Follower(tx.subscribe()),
                None => {
                    let (tx, _) = broadcast::channel(1);
                    map.insert(key.to_string(), tx.clone());
                    Role::Leader(tx)
                }
            }
        };

        match role {
            Role::Leader(tx) => {
                // Clear the record even if the producer future is dropped
                // mid-flight; waiting followers then observe a closed
                // channel instead of hanging forever.
                let cleanup = ClearOnDrop {
                    inflight: &self.inflight,
                    key,
                };
                let result = producer().await;
                // Clear before publishing: a caller arriving now becomes a
                // fresh leader instead of subscribing to a spent channel.
                drop(cleanup);
                let _ = tx.send(result.clone());
                result
            }
            Role::Follower(mut rx) => match rx.recv().await {
                Ok(result) => result,
                Err(_) => Err(RelayError::Transient(
                    "coalesced producer was cancelled".into(),
                )),
            },
        }
    }
}

struct ClearOnDrop<'a, V: Clone> {
    inflight: &'a Mutex<HashMap<String, broadcast::Sender<Result<V>>>>,
    key: &'a str,
}

impl<V: Clone> Drop for ClearOnDrop<'_, V> {
    fn drop(&mut self) {
        if let Ok(mut map) = self.inflight.lock() {
            map.remove(self.key);
        }
    }
}
