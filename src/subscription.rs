use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use async_channel::{Receiver, Sender};
use tokio::task::JoinHandle;

pub type Callback<T> = Box<dyn Fn(T) + Send + Sync + 'static>;

/// Cancel token of a live subscription.
///
/// Every emission is a full snapshot that replaces whatever the consumer held
/// before. `cancel` consumes the token, so it can only be called once; dropping
/// the token cancels as well. Cancelling waits for a callback that is already
/// running, and no callback starts afterwards, so it must not be called from
/// inside the subscription's own callback.
#[derive(Debug)]
pub struct Subscription {
    live: Arc<Mutex<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Must be called from within a tokio runtime.
    pub fn spawn<T: Send + 'static>(receiver: Receiver<T>, callback: Callback<T>) -> Self {
        let live = Arc::new(Mutex::new(true));

        let handle = {
            let live = live.clone();

            tokio::spawn(async move {
                while let Ok(snapshot) = receiver.recv().await {
                    // held for the whole callback, cancel waits on it
                    let running = live.lock().unwrap_or_else(PoisonError::into_inner);
                    if !*running {
                        break;
                    }

                    callback(snapshot);
                }
            })
        };

        Self {
            live,
            handle: Some(handle),
        }
    }

    pub fn is_active(&self) -> bool {
        self.handle
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    pub fn cancel(mut self) {
        self.abort();
    }

    fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            *self.live.lock().unwrap_or_else(PoisonError::into_inner) = false;
            handle.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Keyed fan-out of snapshots to every live subscriber of that key.
pub struct Hub<K, T> {
    channels: Mutex<HashMap<K, Vec<Sender<T>>>>,
}

impl<K, T> Default for Hub<K, T> {
    fn default() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, T> std::fmt::Debug for Hub<K, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub").finish_non_exhaustive()
    }
}

impl<K: Eq + Hash, T: Clone + Send + 'static> Hub<K, T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, key: K) -> (Sender<T>, Receiver<T>) {
        let (sender, receiver) = async_channel::unbounded();

        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_default()
            .push(sender.clone());

        (sender, receiver)
    }

    /// Registers a subscriber and hands it `initial` before any later publish.
    pub fn subscribe(&self, key: K, initial: T, callback: Callback<T>) -> Subscription {
        let (sender, receiver) = self.register(key);

        // unbounded and the receiver is still alive, so this cannot fail
        let _ = sender.try_send(initial);

        Subscription::spawn(receiver, callback)
    }

    pub fn publish(&self, key: &K, snapshot: T) {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(senders) = channels.get_mut(key) {
            senders.retain(|sender| sender.try_send(snapshot.clone()).is_ok());

            if senders.is_empty() {
                channels.remove(key);
            }
        }
    }

    pub fn subscriber_count(&self, key: &K) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map_or(0, |senders| senders.iter().filter(|s| !s.is_closed()).count())
    }
}

#[cfg(test)]
fn collector<T: Send + 'static>() -> (Callback<T>, std::sync::Arc<Mutex<Vec<T>>>) {
    let seen = std::sync::Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();

    (Box::new(move |v| sink.lock().unwrap().push(v)), seen)
}

#[tokio::test]
async fn delivers_initial_then_published_snapshots() {
    let hub: Hub<&str, u32> = Hub::new();
    let (callback, seen) = collector();

    let subscription = hub.subscribe("events", 1, callback);
    hub.publish(&"events", 2);
    hub.publish(&"other", 99);

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    assert!(subscription.is_active());

    subscription.cancel();
}

#[tokio::test]
async fn cancel_stops_delivery_and_prunes() {
    let hub: Hub<&str, u32> = Hub::new();
    let (callback, seen) = collector();

    let subscription = hub.subscribe("events", 1, callback);
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    subscription.cancel();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    hub.publish(&"events", 2);
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    assert_eq!(*seen.lock().unwrap(), vec![1]);
    assert_eq!(hub.subscriber_count(&"events"), 0);
}

#[test]
fn cancel_waits_for_a_running_callback() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async {
        let hub: Hub<&str, u32> = Hub::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let subscription = {
            let seen = seen.clone();
            hub.subscribe(
                "events",
                1,
                Box::new(move |_| {
                    std::thread::sleep(Duration::from_millis(100));
                    seen.fetch_add(1, Ordering::SeqCst);
                }),
            )
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        subscription.cancel();
        let at_cancel = seen.load(Ordering::SeqCst);

        hub.publish(&"events", 2);
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(at_cancel, 1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    });
}
