//! State machines for guided product tours and promo campaigns.
//!
//! Two controllers share one design: [`onboarding::Onboarding`] drives
//! multi-step presets and decides which hint may show right now;
//! [`promo::PromoManager`] admits at most one promo at a time from a
//! priority queue gated by declarative conditions. Both publish an
//! observable snapshot, persist through host callbacks with debounced
//! saves, and expose a typed event bus for plugins.

pub mod catalog;
pub mod clock;
pub mod config;
pub mod debounce;
pub mod error;
pub mod events;
pub mod logging;
pub mod onboarding;
pub mod plugins;
pub mod promo;
pub mod store;

pub use error::{Error, Result};

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
