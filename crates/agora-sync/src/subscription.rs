//! Topic subscription manager.
//!
//! One channel per distinct topic, no matter how many screens want it.
//! Subscribing to an already-open topic bumps a reference count;
//! dropping the last handle tears the channel down. Each open topic
//! runs a pump task that forwards push events into the store's
//! dispatcher and reconnects with exponential backoff when the channel
//! drops.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agora_store::{CacheStore, PushEvent, dispatch};
use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::topics::{ChannelProvider, ChannelStatus, TopicKey};

/// Cap on total reconnection time for one topic before it is marked
/// failed.
const RECONNECT_GIVE_UP: Duration = Duration::from_secs(300);

/// Per-topic event fan-out capacity. Subscribers that lag re-read the
/// store, which the dispatcher has already updated.
const EVENTS_CHANNEL_CAPACITY: usize = 256;

struct TopicEntry {
    ref_count: usize,
    status_rx: watch::Receiver<ChannelStatus>,
    events_tx: broadcast::Sender<PushEvent>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Deduplicating registry of open topic channels.
pub struct SubscriptionManager {
    store: Arc<CacheStore>,
    provider: Arc<dyn ChannelProvider>,
    topics: Mutex<HashMap<TopicKey, TopicEntry>>,
}

impl SubscriptionManager {
    pub fn new(store: Arc<CacheStore>, provider: Arc<dyn ChannelProvider>) -> Arc<Self> {
        Arc::new(Self {
            store,
            provider,
            topics: Mutex::new(HashMap::new()),
        })
    }

    /// Subscribe to a topic, opening its channel if this is the first
    /// subscriber. Returns a handle whose drop releases the
    /// subscription; the channel closes when the last handle drops.
    ///
    /// Must be called within a tokio runtime.
    pub fn subscribe(self: &Arc<Self>, topic: TopicKey) -> TopicHandle {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(entry) = topics.get_mut(&topic) {
            entry.ref_count += 1;
            debug!(topic = %topic, ref_count = entry.ref_count, "joined existing subscription");
            return TopicHandle {
                topic,
                manager: Arc::clone(self),
                status_rx: entry.status_rx.clone(),
                events_tx: entry.events_tx.clone(),
            };
        }

        let (status_tx, status_rx) = watch::channel(ChannelStatus::Connecting);
        let (events_tx, _) = broadcast::channel(EVENTS_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_topic(
            Arc::clone(&self.store),
            Arc::clone(&self.provider),
            topic,
            status_tx,
            events_tx.clone(),
            shutdown_rx,
        ));
        topics.insert(
            topic,
            TopicEntry {
                ref_count: 1,
                status_rx: status_rx.clone(),
                events_tx: events_tx.clone(),
                shutdown_tx,
                task,
            },
        );
        info!(topic = %topic, "opened subscription");

        TopicHandle {
            topic,
            manager: Arc::clone(self),
            status_rx,
            events_tx,
        }
    }

    /// Whether a topic currently has an open channel.
    pub fn is_subscribed(&self, topic: TopicKey) -> bool {
        self.topics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&topic)
    }

    /// Topics with open channels.
    pub fn active_topics(&self) -> Vec<TopicKey> {
        self.topics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect()
    }

    /// Number of live handles on a topic.
    pub fn subscriber_count(&self, topic: TopicKey) -> usize {
        self.topics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&topic)
            .map_or(0, |entry| entry.ref_count)
    }

    /// Tear down every open channel. Idempotent.
    pub fn shutdown(&self) {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        for (topic, entry) in topics.drain() {
            info!(topic = %topic, "closing subscription on shutdown");
            let _ = entry.shutdown_tx.send(true);
            entry.task.abort();
        }
    }

    fn release(&self, topic: TopicKey) {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        let Some(entry) = topics.get_mut(&topic) else {
            return;
        };
        entry.ref_count -= 1;
        if entry.ref_count > 0 {
            debug!(topic = %topic, ref_count = entry.ref_count, "released subscription handle");
            return;
        }

        if let Some(entry) = topics.remove(&topic) {
            let _ = entry.shutdown_tx.send(true);
            info!(topic = %topic, "closed subscription");
        }
    }
}

/// A live subscription to one topic.
///
/// Dropping the handle releases it; the underlying channel stays open
/// as long as any other handle on the same topic is alive.
pub struct TopicHandle {
    topic: TopicKey,
    manager: Arc<SubscriptionManager>,
    status_rx: watch::Receiver<ChannelStatus>,
    events_tx: broadcast::Sender<PushEvent>,
}

impl TopicHandle {
    pub fn topic(&self) -> TopicKey {
        self.topic
    }

    /// Current channel status.
    pub fn status(&self) -> ChannelStatus {
        *self.status_rx.borrow()
    }

    /// Raw events on this topic, as delivered. The dispatcher has
    /// already applied each event to the store by the time it is
    /// received here.
    pub fn events(&self) -> broadcast::Receiver<PushEvent> {
        self.events_tx.subscribe()
    }

    /// Wait until the channel reports a given status.
    pub async fn wait_for(&mut self, status: ChannelStatus) {
        while *self.status_rx.borrow_and_update() != status {
            if self.status_rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Drop for TopicHandle {
    fn drop(&mut self) {
        self.manager.release(self.topic);
    }
}

/// Pump task for one topic: open the channel, forward events into the
/// dispatcher, reconnect with backoff on drops, stop on shutdown.
async fn run_topic(
    store: Arc<CacheStore>,
    provider: Arc<dyn ChannelProvider>,
    topic: TopicKey,
    status_tx: watch::Sender<ChannelStatus>,
    events_tx: broadcast::Sender<PushEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut backoff = ExponentialBackoff {
        initial_interval: Duration::from_millis(500),
        max_interval: Duration::from_secs(30),
        max_elapsed_time: Some(RECONNECT_GIVE_UP),
        ..Default::default()
    };

    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        let _ = status_tx.send(ChannelStatus::Connecting);

        let opened = tokio::select! {
            opened = provider.open(&topic) => opened,
            _ = shutdown_rx.changed() => break,
        };

        match opened {
            Ok(mut events) => {
                let _ = status_tx.send(ChannelStatus::Connected);
                backoff.reset();
                debug!(topic = %topic, "channel connected");

                loop {
                    tokio::select! {
                        _ = shutdown_rx.changed() => {
                            let _ = status_tx.send(ChannelStatus::Closed);
                            return;
                        }
                        event = events.recv() => match event {
                            Some(event) => {
                                if let Err(e) = dispatch(&store, event.clone()) {
                                    warn!(topic = %topic, error = %e, "failed to apply push event");
                                }
                                let _ = events_tx.send(event);
                            }
                            None => {
                                warn!(topic = %topic, "channel dropped, reconnecting");
                                break;
                            }
                        }
                    }
                }
            }
            Err(e) => {
                warn!(topic = %topic, error = %e, "failed to open channel");
            }
        }

        match backoff.next_backoff() {
            Some(wait) => {
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = shutdown_rx.changed() => break,
                }
            }
            None => {
                error!(topic = %topic, "reconnection attempts exhausted");
                let _ = status_tx.send(ChannelStatus::Error);
                return;
            }
        }
    }

    let _ = status_tx.send(ChannelStatus::Closed);
}
