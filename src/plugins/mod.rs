//! Plugin interface and the bundled plugins.
//!
//! A plugin receives the live controller once, during construction, and
//! wires itself in through the controller's event bus and store
//! subscription. Plugins that need to reach back into a controller later
//! hold a weak handle.

pub mod multi_tab;
pub mod promo_bridge;

use crate::onboarding::Onboarding;
use crate::promo::PromoManager;

pub use multi_tab::{
    MemorySharedStorage, MultiTabSync, MultiTabSyncOptions, SharedStorage, SharedStorageTab,
    StorageChange,
};
pub use promo_bridge::PromoBridge;

pub trait OnboardingPlugin: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, onboarding: &Onboarding);
}

pub trait PromoManagerPlugin: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, manager: &PromoManager);
}
