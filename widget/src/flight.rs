use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use tokio::sync::oneshot;

/// Collapses concurrent work on the same key into one operation.
///
/// The first caller to [`SingleFlight::join`] a key becomes the leader and is
/// responsible for calling [`SingleFlight::complete`]. Every caller, leader
/// included, receives the completed value.
pub struct SingleFlight<K, V> {
    waiters: Mutex<HashMap<K, Vec<oneshot::Sender<V>>>>,
}

pub struct Flight<V> {
    pub leader: bool,
    rx: oneshot::Receiver<V>,
}

impl<V> Flight<V> {
    /// `None` if the leader went away without completing.
    pub async fn wait(self) -> Option<V> {
        self.rx.await.ok()
    }
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        SingleFlight {
            waiters: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, key: K) -> Flight<V> {
        let (tx, rx) = oneshot::channel();
        let mut waiters = self.waiters.lock();
        let entry = waiters.entry(key).or_default();
        let leader = entry.is_empty();
        entry.push(tx);
        Flight { leader, rx }
    }

    /// Hands `value` to every caller waiting on `key` and ends the flight.
    pub fn complete(&self, key: &K, value: V) {
        let senders = self.waiters.lock().remove(key).unwrap_or_default();
        for tx in senders {
            // Waiter dropped its request.
            let _ = tx.send(value.clone());
        }
    }

    pub fn in_flight(&self) -> usize {
        self.waiters.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_single_leader() {
        let flights: SingleFlight<String, u64> = SingleFlight::new();

        let first = flights.join("a".into());
        let second = flights.join("a".into());
        let other = flights.join("b".into());
        assert!(first.leader);
        assert!(!second.leader);
        assert!(other.leader);
        assert_eq!(flights.in_flight(), 2);

        flights.complete(&"a".to_string(), 42);
        assert_eq!(first.wait().await, Some(42));
        assert_eq!(second.wait().await, Some(42));
        assert_eq!(flights.in_flight(), 1);

        // A finished key starts a fresh flight.
        assert!(flights.join("a".into()).leader);
    }

    #[tokio::test]
    async fn test_abandoned_flight() {
        let flights: SingleFlight<u64, u64> = SingleFlight::new();
        let flight = flights.join(1);
        drop(flights);
        assert_eq!(flight.wait().await, None);
    }
}
