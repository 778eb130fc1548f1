//! Persistence seam for promo progress.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::lock;

use super::state::PromoProgressState;

#[async_trait]
pub trait PromoStorage: Send + Sync {
    async fn get_progress_state(&self) -> Result<PromoProgressState, StorageError>;

    async fn save_progress(&self, progress: &PromoProgressState) -> Result<(), StorageError>;
}

/// In-process storage with call counters.
#[derive(Debug, Default)]
pub struct MemoryPromoStorage {
    progress: Mutex<PromoProgressState>,
    fail_fetch: AtomicBool,
    fetch_calls: AtomicUsize,
    saves: AtomicUsize,
}

impl MemoryPromoStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_progress(progress: PromoProgressState) -> Self {
        Self {
            progress: Mutex::new(progress),
            ..Self::default()
        }
    }

    pub fn set_fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn saved_progress(&self) -> PromoProgressState {
        lock(&self.progress).clone()
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PromoStorage for MemoryPromoStorage {
    async fn get_progress_state(&self) -> Result<PromoProgressState, StorageError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(StorageError::Fetch("storage unavailable".into()));
        }
        Ok(lock(&self.progress).clone())
    }

    async fn save_progress(&self, progress: &PromoProgressState) -> Result<(), StorageError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        *lock(&self.progress) = progress.clone();
        Ok(())
    }
}
