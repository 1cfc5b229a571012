//! Event broadcast: lifecycle and result notifications for external observers.
//!
//! Listeners are either crossbeam channels (poll from any thread) or
//! synchronous callbacks. `publish` snapshots the listener list under a read
//! lock and dispatches after releasing it, so a callback may subscribe,
//! unsubscribe, or call back into the component that published.

use compact_str::CompactString;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

use crate::session::SessionState;
use crate::worker::WorkerState;

/// Everything the core reports to listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The session moved between states. Never sent for `old == new`.
    SessionStateChanged {
        old: SessionState,
        new: SessionState,
    },
    /// A worker moved between states. Never sent for `old == new`.
    WorkerStateChanged {
        worker: CompactString,
        old: WorkerState,
        new: WorkerState,
    },
    /// A worker configured with `NOTIFY` matched a file.
    FileMatched { worker: CompactString, path: PathBuf },
    /// The file sink now writes to `file` (`None` = file logging disabled).
    LogFileSwitched { file: Option<PathBuf> },
    /// The memory log started evicting its oldest records.
    MemoryLogFull { capacity: usize },
    /// The memory log was emptied by `clear_logs`.
    MemoryLogCleared,
}

/// Identifies one subscription for [`EventBus::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// A channel subscription. Dropping the receiver is enough to stop
/// delivery; the bus prunes disconnected channels on the next publish.
pub struct Subscription {
    pub id: SubscriberId,
    pub receiver: Receiver<Event>,
}

type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Clone)]
enum Listener {
    Channel(Sender<Event>),
    Callback(Callback),
}

struct BusInner {
    listeners: RwLock<Vec<(SubscriberId, Listener)>>,
    next_id: AtomicU64,
}

/// Cheaply cloneable handle to a shared broadcast bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                listeners: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Subscribe with an unbounded channel.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = crossbeam_channel::unbounded();
        let id = self.add(Listener::Channel(tx));
        Subscription { id, receiver: rx }
    }

    /// Subscribe a callback, invoked synchronously on the publishing thread.
    pub fn subscribe_fn<F>(&self, callback: F) -> SubscriberId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.add(Listener::Callback(Arc::new(callback)))
    }

    /// Remove a listener. Returns `false` if it was not subscribed.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut listeners = self.inner.listeners.write();
        let before = listeners.len();
        listeners.retain(|(sid, _)| *sid != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().len()
    }

    /// Deliver `event` to every listener in subscription order.
    pub fn publish(&self, event: Event) {
        let snapshot: Vec<(SubscriberId, Listener)> = self.inner.listeners.read().clone();
        if snapshot.is_empty() {
            return;
        }
        trace!(?event, listeners = snapshot.len(), "publish");

        let mut dead = Vec::new();
        for (id, listener) in &snapshot {
            match listener {
                Listener::Channel(tx) => {
                    if tx.send(event.clone()).is_err() {
                        dead.push(*id);
                    }
                }
                Listener::Callback(cb) => cb(&event),
            }
        }

        if !dead.is_empty() {
            self.inner
                .listeners
                .write()
                .retain(|(id, _)| !dead.contains(id));
        }
    }

    fn add(&self, listener: Listener) -> SubscriberId {
        let id = SubscriberId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners.write().push((id, listener));
        id
    }
}
