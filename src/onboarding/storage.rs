//! Persistence seam for onboarding state.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::lock;

use super::state::{BaseState, ProgressState};

/// Host-supplied persistence. Transport (REST, local storage, ...) is the
/// host's business.
#[async_trait]
pub trait OnboardingStorage: Send + Sync {
    /// Fetch persisted progress. Partial payloads are fine.
    async fn get_progress_state(&self) -> Result<ProgressState, StorageError>;

    async fn save_state(&self, state: &BaseState) -> Result<(), StorageError>;

    async fn save_progress(&self, progress: &ProgressState) -> Result<(), StorageError>;
}

/// In-process storage that records what was saved and how often.
#[derive(Debug, Default)]
pub struct MemoryOnboardingStorage {
    state: Mutex<Option<BaseState>>,
    progress: Mutex<ProgressState>,
    fail_fetch: AtomicBool,
    fetch_calls: AtomicUsize,
    state_saves: AtomicUsize,
    progress_saves: AtomicUsize,
}

impl MemoryOnboardingStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_progress(progress: ProgressState) -> Self {
        Self {
            progress: Mutex::new(progress),
            ..Self::default()
        }
    }

    /// Make subsequent fetches fail (or succeed again).
    pub fn set_fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn saved_state(&self) -> Option<BaseState> {
        lock(&self.state).clone()
    }

    pub fn saved_progress(&self) -> ProgressState {
        lock(&self.progress).clone()
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn state_saves(&self) -> usize {
        self.state_saves.load(Ordering::SeqCst)
    }

    pub fn progress_saves(&self) -> usize {
        self.progress_saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OnboardingStorage for MemoryOnboardingStorage {
    async fn get_progress_state(&self) -> Result<ProgressState, StorageError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(StorageError::Fetch("storage unavailable".into()));
        }
        Ok(lock(&self.progress).clone())
    }

    async fn save_state(&self, state: &BaseState) -> Result<(), StorageError> {
        self.state_saves.fetch_add(1, Ordering::SeqCst);
        *lock(&self.state) = Some(state.clone());
        Ok(())
    }

    async fn save_progress(&self, progress: &ProgressState) -> Result<(), StorageError> {
        self.progress_saves.fetch_add(1, Ordering::SeqCst);
        *lock(&self.progress) = progress.clone();
        Ok(())
    }
}
