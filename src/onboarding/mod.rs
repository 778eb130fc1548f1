//! Guided tours: presets of ordered steps, one hint at a time.
//!
//! The host reports anchor mounts/unmounts and user actions; the
//! [`Onboarding`] controller decides which hint may be visible, tracks
//! progress, and persists through an [`OnboardingStorage`].

pub mod controller;
pub mod events;
pub mod hint;
pub mod model;
pub mod registry;
pub mod state;
pub mod storage;

pub use controller::{Onboarding, OnboardingOptions, ShowHintFn, WeakOnboarding};
pub use events::{OnboardingEvent, OnboardingEventKind};
pub use hint::{AnchorElement, ElementRef, HintParams, HintState, HintStore, VirtualElement};
pub use model::{
    hook, CombinedPreset, Hook, HookContext, PassMode, PassRestriction, Preset, PresetHooks,
    PresetKind, PresetVisibility, Step, StepHooks,
};
pub use registry::PresetRegistry;
pub use state::{
    find_next_unpassed_step, BaseState, ControllerStatus, OnboardingSnapshot, ProgressState,
    WizardState,
};
pub use storage::{MemoryOnboardingStorage, OnboardingStorage};
