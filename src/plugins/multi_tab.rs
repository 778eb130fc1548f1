//! Cross-tab sync.
//!
//! Mirrors closed hints and (optionally) the base state into a storage
//! shared between tabs, and applies changes written by other tabs. A
//! write that hits the storage quota disables further writes for the
//! lifetime of the plugin instance.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::StorageError;
use crate::events::Flow;
use crate::lock;
use crate::onboarding::{BaseState, Onboarding, OnboardingEvent, OnboardingEventKind, WeakOnboarding};

use super::OnboardingPlugin;

pub const CLOSED_HINT_KEY: &str = "tourguide.closedHint";
pub const STATE_KEY: &str = "tourguide.state";

/// A value written by some tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    pub key: String,
    pub value: String,
    /// Tab that wrote the value.
    pub origin: u64,
}

/// Key/value storage visible to every tab, with change notification.
pub trait SharedStorage: Send + Sync {
    /// Identity of this tab; its own writes come back with this origin.
    fn tab_id(&self) -> u64;

    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;
}

/// In-process stand-in for browser storage shared between tabs.
#[derive(Debug)]
pub struct MemorySharedStorage {
    values: Mutex<HashMap<String, String>>,
    tx: broadcast::Sender<StorageChange>,
    next_tab: AtomicU64,
    /// Maximum value length in bytes, if limited.
    quota: Option<usize>,
    writes: AtomicUsize,
}

impl MemorySharedStorage {
    pub fn new() -> Arc<Self> {
        Self::build(None)
    }

    pub fn with_quota(bytes: usize) -> Arc<Self> {
        Self::build(Some(bytes))
    }

    fn build(quota: Option<usize>) -> Arc<Self> {
        let (tx, _) = broadcast::channel(64);
        Arc::new(Self {
            values: Mutex::new(HashMap::new()),
            tx,
            next_tab: AtomicU64::new(1),
            quota,
            writes: AtomicUsize::new(0),
        })
    }

    /// Open a handle for a new tab.
    pub fn tab(self: &Arc<Self>) -> Arc<SharedStorageTab> {
        Arc::new(SharedStorageTab {
            id: self.next_tab.fetch_add(1, Ordering::Relaxed),
            storage: Arc::clone(self),
        })
    }

    /// Successful writes across all tabs.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

/// One tab's view of a [`MemorySharedStorage`].
#[derive(Debug)]
pub struct SharedStorageTab {
    id: u64,
    storage: Arc<MemorySharedStorage>,
}

impl SharedStorage for SharedStorageTab {
    fn tab_id(&self) -> u64 {
        self.id
    }

    fn get(&self, key: &str) -> Option<String> {
        lock(&self.storage.values).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if self.storage.quota.is_some_and(|quota| value.len() > quota) {
            return Err(StorageError::QuotaExceeded {
                key: key.to_string(),
            });
        }
        lock(&self.storage.values).insert(key.to_string(), value.to_string());
        self.storage.writes.fetch_add(1, Ordering::SeqCst);
        // No receivers just means no other tab is listening.
        let _ = self.storage.tx.send(StorageChange {
            key: key.to_string(),
            value: value.to_string(),
            origin: self.id,
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.storage.tx.subscribe()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MultiTabSyncOptions {
    /// Mirror user-closed hints.
    pub sync_closed_hint: bool,
    /// Mirror the whole base state.
    pub sync_state: bool,
}

impl Default for MultiTabSyncOptions {
    fn default() -> Self {
        Self {
            sync_closed_hint: true,
            sync_state: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ClosedHint {
    preset: String,
    step: String,
}

/// Cross-tab sync plugin for the onboarding controller.
#[derive(Clone)]
pub struct MultiTabSync {
    writer: Writer,
    options: MultiTabSyncOptions,
}

/// Guarded writer shared by the listeners of one plugin instance.
#[derive(Clone)]
struct Writer {
    storage: Arc<dyn SharedStorage>,
    disabled: Arc<AtomicBool>,
    /// Last value written or received per key.
    last: Arc<Mutex<HashMap<String, String>>>,
}

impl Writer {
    fn write(&self, key: &str, value: String) {
        if self.disabled.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut last = lock(&self.last);
            if last.get(key) == Some(&value) {
                return;
            }
            last.insert(key.to_string(), value.clone());
        }
        match self.storage.set(key, &value) {
            Ok(()) => debug!(key, "Mirrored onboarding change to other tabs"),
            Err(StorageError::QuotaExceeded { .. }) => {
                self.disabled.store(true, Ordering::SeqCst);
                warn!(key, "Shared storage quota exceeded; cross-tab sync disabled");
            }
            Err(e) => warn!(key, error = %e, "Failed to mirror onboarding change"),
        }
    }

    fn remember(&self, key: &str, value: &str) {
        lock(&self.last).insert(key.to_string(), value.to_string());
    }
}

impl MultiTabSync {
    pub fn new(storage: Arc<dyn SharedStorage>, options: MultiTabSyncOptions) -> Self {
        Self {
            writer: Writer {
                storage,
                disabled: Arc::new(AtomicBool::new(false)),
                last: Arc::new(Mutex::new(HashMap::new())),
            },
            options,
        }
    }

    /// Whether a quota failure has switched writes off.
    pub fn is_disabled(&self) -> bool {
        self.writer.disabled.load(Ordering::SeqCst)
    }

    fn listen(&self, onboarding: WeakOnboarding) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime; cross-tab changes will not be applied");
            return;
        };
        let mut rx = self.writer.storage.subscribe();
        let own = self.writer.storage.tab_id();
        let writer = self.writer.clone();
        let options = self.options;

        runtime.spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(change) if change.origin == own => {}
                    Ok(change) => {
                        let Some(onboarding) = onboarding.upgrade() else {
                            break;
                        };
                        writer.remember(&change.key, &change.value);
                        apply_change(&onboarding, options, &change).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed = n, "Cross-tab listener lagged behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Shared storage closed");
                        break;
                    }
                }
            }
        });
    }
}

async fn apply_change(onboarding: &Onboarding, options: MultiTabSyncOptions, change: &StorageChange) {
    match change.key.as_str() {
        CLOSED_HINT_KEY if options.sync_closed_hint => {
            match serde_json::from_str::<ClosedHint>(&change.value) {
                // Closing as a program action keeps the close from echoing back.
                Ok(closed) => {
                    if let Err(e) = onboarding.close_hint(Some(&closed.step)).await {
                        warn!(step = %closed.step, error = %e, "Failed to mirror closed hint");
                    }
                }
                Err(e) => warn!(error = %e, "Ignoring malformed closed-hint payload"),
            }
        }
        STATE_KEY if options.sync_state => match serde_json::from_str::<BaseState>(&change.value) {
            Ok(base) => {
                if let Err(e) = onboarding.replace_base_state(base).await {
                    warn!(error = %e, "Failed to apply state from another tab");
                }
            }
            Err(e) => warn!(error = %e, "Ignoring malformed state payload"),
        },
        _ => {}
    }
}

impl OnboardingPlugin for MultiTabSync {
    fn name(&self) -> &str {
        "multi-tab-sync"
    }

    fn apply(&self, onboarding: &Onboarding) {
        if self.options.sync_closed_hint {
            let writer = self.writer.clone();
            onboarding.on(OnboardingEventKind::CloseHintByUser, move |event, _| {
                if let OnboardingEvent::CloseHintByUser { preset, step } = event {
                    let closed = ClosedHint {
                        preset: preset.clone(),
                        step: step.clone(),
                    };
                    match serde_json::to_string(&closed) {
                        Ok(json) => writer.write(CLOSED_HINT_KEY, json),
                        Err(e) => warn!(error = %e, "Failed to encode closed hint"),
                    }
                }
                Flow::Continue
            });
        }

        if self.options.sync_state {
            let writer = self.writer.clone();
            let weak = onboarding.downgrade();
            // Kept for the controller's lifetime.
            let _subscription = onboarding.subscribe(move || {
                let Some(onboarding) = weak.upgrade() else {
                    return;
                };
                let base = Arc::clone(&onboarding.get_snapshot().base);
                match serde_json::to_string(&*base) {
                    Ok(json) => writer.write(STATE_KEY, json),
                    Err(e) => warn!(error = %e, "Failed to encode onboarding state"),
                }
            });
        }

        self.listen(onboarding.downgrade());
        info!(tab = self.writer.storage.tab_id(), "Cross-tab sync attached");
    }
}
