//! # Event Bus
//!
//! Routes each published `RaceEvent` to the handlers registered for its kind.
//!
//! `publish` awaits the handlers one after another in registration order, so
//! its latency is the sum of theirs. Handlers are expected to be fast,
//! best-effort fan-out operations; anything that may block on slow I/O should
//! hand the event off to its own task. A handler that returns an error or
//! panics is logged and skipped; the remaining handlers still run and the
//! publisher never sees the failure.

use super::lock;
use crate::racing::{EventKind, RaceEvent};
use async_trait::async_trait;
use futures_util::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Something that reacts to published events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Label used in failure logs.
    fn name(&self) -> &str {
        "handler"
    }

    async fn handle(&self, event: Arc<RaceEvent>) -> anyhow::Result<()>;
}

/// Token returned by `subscribe`, needed to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Listener = (HandlerId, Arc<dyn EventHandler>);

#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<HashMap<EventKind, Vec<Listener>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for one kind of event.
    pub fn subscribe(&self, kind: EventKind, handler: Arc<dyn EventHandler>) -> HandlerId {
        let id = self.next_handler_id();
        lock(&self.listeners).entry(kind).or_default().push((id, handler));
        id
    }

    /// Registers `handler` for every kind under a single id.
    pub fn subscribe_all(&self, handler: Arc<dyn EventHandler>) -> HandlerId {
        let id = self.next_handler_id();
        let mut listeners = lock(&self.listeners);
        for kind in EventKind::ALL {
            listeners.entry(kind).or_default().push((id, Arc::clone(&handler)));
        }
        id
    }

    /// Removes a handler from one kind. Returns whether it was registered.
    pub fn unsubscribe(&self, kind: EventKind, id: HandlerId) -> bool {
        let mut listeners = lock(&self.listeners);
        let Some(list) = listeners.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(registered, _)| *registered != id);
        before != list.len()
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        lock(&self.listeners).get(&kind).map_or(0, Vec::len)
    }

    /// Delivers `event` to every handler of its kind. Returns how many succeeded.
    pub async fn publish(&self, event: RaceEvent) -> usize {
        let event = Arc::new(event);
        // Snapshot the list so no lock is held while handlers run.
        let handlers: Vec<Listener> = lock(&self.listeners)
            .get(&event.kind)
            .cloned()
            .unwrap_or_default();

        let mut succeeded = 0;
        for (_, handler) in handlers {
            match AssertUnwindSafe(handler.handle(Arc::clone(&event))).catch_unwind().await {
                Ok(Ok(())) => succeeded += 1,
                Ok(Err(e)) => {
                    log::warn!("Event handler '{}' failed on {}: {:#}", handler.name(), event.kind, e);
                }
                Err(_) => {
                    log::error!("Event handler '{}' panicked on {}", handler.name(), event.kind);
                }
            }
        }
        succeeded
    }

    fn next_handler_id(&self) -> HandlerId {
        HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

/// Adapts a synchronous closure into an [`EventHandler`].
pub fn handler_fn<F>(name: &str, f: F) -> Arc<dyn EventHandler>
where
    F: Fn(&RaceEvent) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(FnHandler { name: name.to_string(), f })
}

struct FnHandler<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&RaceEvent) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: Arc<RaceEvent>) -> anyhow::Result<()> {
        (self.f)(&event)
    }
}
