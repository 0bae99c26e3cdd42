//! Event bus: delivers committed events to subscribers
//!
//! Events are queued by the executor after a commit and delivered by a
//! single dispatcher thread, so handlers never run on the submitting thread
//! and never hold up a commit beyond the enqueue. The queue is bounded;
//! publishers wait for space when it is full.
//!
//! Delivery order is queue order: emission order within a transaction, and
//! commit order across transactions that share a registry. A handler that
//! fails or panics is logged and skipped; the remaining handlers still run.

use crate::executor::panic_message;
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};
use tally_core::{Event, FqName, TallyError, TallyResult};
use tracing::{debug, error, warn};

/// Handle returned by a subscription, used to cancel it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&Event) -> TallyResult<()> + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    /// None receives every event
    event_type: Option<FqName>,
    handler: Handler,
}

/// Event bus counters snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBusStats {
    /// Events waiting for the dispatcher
    pub queued: usize,
    /// Events delivered since the bus started
    pub delivered: u64,
    /// Handler calls that returned an error or panicked
    pub handler_failures: u64,
    /// Active subscriptions
    pub subscribers: usize,
}

struct QueueState {
    events: VecDeque<Event>,
    /// Events popped but not yet through every handler
    in_flight: usize,
    shutdown: bool,
    /// Set by the dispatcher on exit
    stopped: bool,
}

struct BusInner {
    state: Mutex<QueueState>,
    work_ready: Condvar,
    space_ready: Condvar,
    drained: Condvar,
    capacity: usize,
    subscriptions: RwLock<Vec<Subscription>>,
    next_subscription: AtomicU64,
    delivered: AtomicU64,
    handler_failures: AtomicU64,
}

/// Publish/subscribe bus with a dedicated dispatcher thread
pub struct EventBus {
    inner: Arc<BusInner>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    dispatcher_id: ThreadId,
}

impl EventBus {
    /// Start a bus whose queue holds at most `capacity` events
    ///
    /// # Errors
    /// `Config` for a zero capacity, `Internal` if the dispatcher thread
    /// cannot be spawned
    pub fn new(capacity: usize) -> TallyResult<Self> {
        if capacity == 0 {
            return Err(TallyError::Config {
                reason: "event channel capacity must be at least 1".to_string(),
            });
        }
        let inner = Arc::new(BusInner {
            state: Mutex::new(QueueState {
                events: VecDeque::with_capacity(capacity.min(1024)),
                in_flight: 0,
                shutdown: false,
                stopped: false,
            }),
            work_ready: Condvar::new(),
            space_ready: Condvar::new(),
            drained: Condvar::new(),
            capacity,
            subscriptions: RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            delivered: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
        });

        let worker = Arc::clone(&inner);
        let handle = std::thread::Builder::new()
            .name("tally-events".to_string())
            .spawn(move || dispatch_loop(&worker))
            .map_err(|e| TallyError::internal(format!("failed to spawn event dispatcher: {}", e)))?;

        Ok(Self {
            inner,
            dispatcher_id: handle.thread().id(),
            dispatcher: Mutex::new(Some(handle)),
        })
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Subscribe to one event type
    pub fn on<F>(&self, event_type: FqName, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) -> TallyResult<()> + Send + Sync + 'static,
    {
        self.subscribe(Some(event_type), Arc::new(handler))
    }

    /// Subscribe to every event
    pub fn on_any<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) -> TallyResult<()> + Send + Sync + 'static,
    {
        self.subscribe(None, Arc::new(handler))
    }

    /// Cancel a subscription; false if it was not active
    ///
    /// An event already being delivered may still reach the handler.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.inner.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    fn subscribe(&self, event_type: Option<FqName>, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.inner.subscriptions.write().push(Subscription {
            id,
            event_type,
            handler,
        });
        id
    }

    // ========================================================================
    // Publishing
    // ========================================================================

    /// Queue events for delivery, in order
    ///
    /// Blocks while the queue is full. Events published after shutdown are
    /// dropped with a warning.
    ///
    /// Called from a handler (a transaction submitted during delivery), the
    /// events are queued at once, past capacity if needed, and are still
    /// accepted while a shutdown drains the queue. Only the dispatcher frees
    /// space.
    pub fn publish(&self, events: Vec<Event>) {
        if events.is_empty() {
            return;
        }
        let on_dispatcher = std::thread::current().id() == self.dispatcher_id;
        let mut state = self.inner.state.lock();
        for event in events {
            if on_dispatcher {
                state.events.push_back(event);
                continue;
            }
            while state.events.len() >= self.inner.capacity && !state.shutdown {
                self.inner.space_ready.wait(&mut state);
            }
            if state.shutdown {
                warn!(event_id = event.event_id(), "event bus shut down; event dropped");
                continue;
            }
            state.events.push_back(event);
            self.inner.work_ready.notify_one();
        }
    }

    /// Block until every event published so far has been delivered
    ///
    /// Returns immediately when called from a handler.
    pub fn flush(&self) {
        if std::thread::current().id() == self.dispatcher_id {
            return;
        }
        let mut state = self.inner.state.lock();
        while (!state.events.is_empty() || state.in_flight > 0) && !state.stopped {
            self.inner.drained.wait(&mut state);
        }
    }

    /// Deliver what is queued, then stop the dispatcher
    pub fn shutdown(&self) {
        {
            let mut state = self.inner.state.lock();
            state.shutdown = true;
            self.inner.work_ready.notify_all();
            self.inner.space_ready.notify_all();
        }
        if std::thread::current().id() == self.dispatcher_id {
            return;
        }
        if let Some(handle) = self.dispatcher.lock().take() {
            if handle.join().is_err() {
                error!("event dispatcher thread panicked");
            }
        }
    }

    /// Counters snapshot
    pub fn stats(&self) -> EventBusStats {
        EventBusStats {
            queued: self.inner.state.lock().events.len(),
            delivered: self.inner.delivered.load(Ordering::Relaxed),
            handler_failures: self.inner.handler_failures.load(Ordering::Relaxed),
            subscribers: self.inner.subscriptions.read().len(),
        }
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.inner.capacity)
            .field("stats", &self.stats())
            .finish()
    }
}

fn dispatch_loop(inner: &BusInner) {
    loop {
        let event = {
            let mut state = inner.state.lock();
            loop {
                if let Some(event) = state.events.pop_front() {
                    state.in_flight += 1;
                    inner.space_ready.notify_one();
                    break event;
                }
                if state.shutdown {
                    state.stopped = true;
                    inner.drained.notify_all();
                    return;
                }
                inner.work_ready.wait(&mut state);
            }
        };

        deliver(inner, &event);

        let mut state = inner.state.lock();
        state.in_flight -= 1;
        if state.events.is_empty() && state.in_flight == 0 {
            inner.drained.notify_all();
        }
    }
}

fn deliver(inner: &BusInner, event: &Event) {
    let handlers: Vec<(SubscriptionId, Handler)> = inner
        .subscriptions
        .read()
        .iter()
        .filter(|s| s.event_type.as_ref().map_or(true, |t| t == event.type_name()))
        .map(|s| (s.id, Arc::clone(&s.handler)))
        .collect();

    for (id, handler) in handlers {
        match catch_unwind(AssertUnwindSafe(|| handler(event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                inner.handler_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    subscription = id.0,
                    event_id = event.event_id(),
                    error = %e,
                    "event handler failed"
                );
            }
            Err(panic) => {
                inner.handler_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    subscription = id.0,
                    event_id = event.event_id(),
                    "event handler panicked: {}",
                    panic_message(panic.as_ref())
                );
            }
        }
    }
    inner.delivered.fetch_add(1, Ordering::Relaxed);
    debug!(event_id = event.event_id(), event_type = %event.type_name(), "event delivered");
}
