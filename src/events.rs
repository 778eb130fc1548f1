//! Typed event bus shared by both controllers.
//!
//! Each controller defines a closed event enum; its [`BusEvent::Kind`]
//! discriminant is the dispatch key. Listeners receive the event plus the
//! controller handle the bus was emitted from, and answer with a
//! [`Flow`]: `Veto` stops dispatch, an `Err` aborts dispatch and
//! propagates to whoever emitted.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::Result;

/// An event that can travel over an [`EventBus`].
pub trait BusEvent: Clone + Send + Sync + 'static {
    type Kind: Copy + Eq + Hash + Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

/// A listener's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Veto,
}

impl Flow {
    pub fn is_veto(self) -> bool {
        self == Self::Veto
    }
}

/// Handle returned by `on`/`on_async`, used to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener<E, H> = Arc<dyn Fn(E, H) -> BoxFuture<'static, Result<Flow>> + Send + Sync>;

/// Publish/subscribe bus with one fixed extra argument (`H`, the
/// controller handle) passed to every listener.
pub struct EventBus<E: BusEvent, H> {
    listeners: RwLock<HashMap<E::Kind, Vec<(ListenerId, Listener<E, H>)>>>,
    next_id: AtomicU64,
}

impl<E: BusEvent, H: Clone + Send + Sync + 'static> EventBus<E, H> {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a synchronous listener. It runs inline during `emit`.
    pub fn on<F>(&self, kind: E::Kind, listener: F) -> ListenerId
    where
        F: Fn(&E, &H) -> Flow + Send + Sync + 'static,
    {
        self.insert(
            kind,
            Arc::new(move |event: E, handle: H| {
                let flow = listener(&event, &handle);
                futures::future::ready(Ok(flow)).boxed()
            }),
        )
    }

    /// Register an asynchronous listener. `emit` awaits it before moving on.
    pub fn on_async<F, Fut>(&self, kind: E::Kind, listener: F) -> ListenerId
    where
        F: Fn(E, H) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Flow>> + Send + 'static,
    {
        self.insert(kind, Arc::new(move |event: E, handle: H| listener(event, handle).boxed()))
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut removed = false;
        for entries in listeners.values_mut() {
            let before = entries.len();
            entries.retain(|(existing, _)| *existing != id);
            removed |= entries.len() != before;
        }
        removed
    }

    pub fn listener_count(&self, kind: E::Kind) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Dispatch `event` to its listeners in registration order.
    ///
    /// The listener list is snapshotted first, so listeners may register or
    /// remove listeners (or re-enter the controller) while being called.
    pub async fn emit(&self, event: E, handle: &H) -> Result<Flow> {
        let kind = event.kind();
        let listeners: Vec<Listener<E, H>> = self
            .listeners
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&kind)
            .map(|entries| entries.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();

        for listener in listeners {
            if listener(event.clone(), handle.clone()).await?.is_veto() {
                tracing::debug!(event = ?kind, "Listener vetoed event");
                return Ok(Flow::Veto);
            }
        }
        Ok(Flow::Continue)
    }

    fn insert(&self, kind: E::Kind, listener: Listener<E, H>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push((id, listener));
        id
    }
}

impl<E: BusEvent, H: Clone + Send + Sync + 'static> Default for EventBus<E, H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: BusEvent, H> Debug for EventBus<E, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}
