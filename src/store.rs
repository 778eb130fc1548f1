//! Observable store with `subscribe`/`get_snapshot` semantics.
//!
//! The published snapshot is an `Arc<T>` that never changes once handed
//! out. [`Store::update`] clones the top level, lets the caller mutate the
//! copy, and swaps it in. State types keep their sub-trees behind `Arc`s
//! so the clone is shallow and `Arc::make_mut` copies only the sub-tree
//! that is actually touched.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use crate::debounce::Debounced;
use crate::lock;

type StoreListener = Arc<dyn Fn() + Send + Sync>;

/// When subscribers hear about a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyMode {
    /// Inline, right after the snapshot is swapped.
    Immediate,
    /// Coalesced: one notification per window of rapid mutations.
    Debounced(Duration),
}

/// Shared observable value. Clones point at the same store.
pub struct Store<T> {
    inner: Arc<StoreInner<T>>,
}

struct StoreInner<T> {
    snapshot: RwLock<Arc<T>>,
    listeners: Mutex<Vec<(u64, StoreListener)>>,
    next_id: AtomicU64,
    notifier: Option<Debounced>,
}

impl<T: Clone + Send + Sync + 'static> Store<T> {
    pub fn new(initial: T) -> Self {
        Self::with_mode(initial, NotifyMode::Immediate)
    }

    pub fn with_mode(initial: T, mode: NotifyMode) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<StoreInner<T>>| {
            let notifier = match mode {
                NotifyMode::Immediate => None,
                NotifyMode::Debounced(delay) => {
                    let weak = weak.clone();
                    Some(Debounced::new(delay, move || {
                        if let Some(inner) = weak.upgrade() {
                            inner.notify_now();
                        }
                        async { Ok(()) }
                    }))
                }
            };
            StoreInner {
                snapshot: RwLock::new(Arc::new(initial)),
                listeners: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                notifier,
            }
        });
        Self { inner }
    }

    /// Current snapshot. Identity is stable until the next mutation.
    pub fn get_snapshot(&self) -> Arc<T> {
        Arc::clone(
            &self
                .inner
                .snapshot
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        )
    }

    /// Register a change listener. It is not called at subscribe time.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.listeners).push((id, Arc::new(listener)));

        let weak = Arc::downgrade(&self.inner);
        Subscription {
            unsubscribe: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    lock(&inner.listeners).retain(|(existing, _)| *existing != id);
                }
            })),
        }
    }

    /// Produce the next snapshot from a copy of the current one.
    ///
    /// `f` runs while the store is locked and must not touch the store.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let result = {
            let mut current = self
                .inner
                .snapshot
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let mut next = T::clone(&current);
            let result = f(&mut next);
            *current = Arc::new(next);
            result
        };
        self.inner.changed();
        result
    }

    /// Replace the whole value.
    pub fn set(&self, value: T) {
        self.update(|current| *current = value);
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.listeners).len()
    }
}

impl<T> StoreInner<T> {
    fn changed(&self) {
        match &self.notifier {
            // Registration is synchronous; the run happens on the timer task.
            Some(notifier) => drop(notifier.call()),
            None => self.notify_now(),
        }
    }

    fn notify_now(&self) {
        let listeners: Vec<StoreListener> = lock(&self.listeners)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener();
        }
    }
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Store<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self
            .inner
            .snapshot
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f.debug_struct("Store").field("snapshot", &*snapshot).finish()
    }
}

/// Returned by [`Store::subscribe`]; call `unsubscribe` to stop listening.
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[derive(Debug, Clone, Default)]
    struct Demo {
        left: Arc<Vec<u32>>,
        right: Arc<Vec<u32>>,
    }

    fn counter(store: &Store<Demo>) -> (Subscription, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let sub = store.subscribe(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (sub, calls)
    }

    #[test]
    fn snapshot_is_stable_until_mutation() {
        let store = Store::new(Demo::default());
        let a = store.get_snapshot();
        let b = store.get_snapshot();
        assert!(Arc::ptr_eq(&a, &b));

        store.update(|s| Arc::make_mut(&mut s.left).push(1));
        let c = store.get_snapshot();
        assert!(!Arc::ptr_eq(&a, &c));
        assert!(a.left.is_empty(), "old snapshot stays valid");
        assert_eq!(*c.left, vec![1]);
    }

    #[test]
    fn untouched_subtree_is_shared() {
        let store = Store::new(Demo::default());
        let before = store.get_snapshot();
        store.update(|s| Arc::make_mut(&mut s.left).push(1));
        let after = store.get_snapshot();

        assert!(Arc::ptr_eq(&before.right, &after.right));
        assert!(!Arc::ptr_eq(&before.left, &after.left));
    }

    #[test]
    fn listeners_fire_per_mutation_not_on_subscribe() {
        let store = Store::new(Demo::default());
        let (sub, calls) = counter(&store);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        store.update(|s| Arc::make_mut(&mut s.left).push(1));
        store.update(|s| Arc::make_mut(&mut s.left).push(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        sub.unsubscribe();
        store.update(|s| Arc::make_mut(&mut s.left).push(3));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.subscriber_count(), 0);
    }

    #[test]
    fn listener_may_read_snapshot() {
        let store = Store::new(Demo::default());
        let reader = store.clone();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = store.subscribe(move || {
            sink.lock().unwrap().push(reader.get_snapshot().left.len());
        });

        store.update(|s| Arc::make_mut(&mut s.left).push(9));
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn debounced_mode_coalesces_notifications() {
        let store = Store::with_mode(Demo::default(), NotifyMode::Debounced(Duration::ZERO));
        let (_sub, calls) = counter(&store);

        for i in 0..5 {
            store.update(|s| Arc::make_mut(&mut s.left).push(i));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.get_snapshot().left.len(), 5);
    }
}
