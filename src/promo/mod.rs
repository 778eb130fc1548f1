//! Promo campaigns: grouped promos admitted one at a time from a
//! priority queue, gated by declarative conditions.

pub mod conditions;
pub mod controller;
pub mod events;
pub mod helpers;
pub mod model;
pub mod state;
pub mod storage;

pub use conditions::{
    Condition, ConditionContext, ConditionScope, HelperCall, HelperFactory, HelperRegistry,
    PredicateFn,
};
pub use controller::{PromoManager, PromoManagerOptions, UrlProvider, WeakPromoManager};
pub use events::{PromoEvent, PromoEventKind};
pub use helpers::{
    default_helpers, limit_frequency, match_url, show_once_for_period, show_once_for_session,
    time_window, Period,
};
pub use model::{Priority, Promo, PromoGroup, PromoRegistry, RegisteredPromo};
pub use state::{PromoBaseState, PromoProgressState, PromoSnapshot, PromoStatus, ProgressInfo};
pub use storage::{MemoryPromoStorage, PromoStorage};
