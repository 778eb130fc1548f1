//! Onboarding event catalog.

use crate::events::BusEvent;

use super::hint::{ElementRef, HintParams};
use super::state::WizardState;

#[derive(Debug, Clone)]
pub enum OnboardingEvent {
    /// Progress was fetched and the controller became active.
    Init,
    ShowHint(HintParams),
    StepPass { preset: String, step: String },
    AddPreset { preset: String },
    BeforeRunPreset { preset: String },
    RunPreset { preset: String },
    FinishPreset { preset: String },
    BeforeSuggestPreset { preset: String },
    StepElementReached { step: String, element: ElementRef },
    /// Cancelable: a `Flow::Veto` keeps the hint hidden.
    BeforeShowHint(HintParams),
    CloseHint { preset: String, step: String },
    CloseHintByUser { preset: String, step: String },
    WizardStateChanged { wizard_state: WizardState },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OnboardingEventKind {
    Init,
    ShowHint,
    StepPass,
    AddPreset,
    BeforeRunPreset,
    RunPreset,
    FinishPreset,
    BeforeSuggestPreset,
    StepElementReached,
    BeforeShowHint,
    CloseHint,
    CloseHintByUser,
    WizardStateChanged,
}

impl BusEvent for OnboardingEvent {
    type Kind = OnboardingEventKind;

    fn kind(&self) -> OnboardingEventKind {
        match self {
            Self::Init => OnboardingEventKind::Init,
            Self::ShowHint(_) => OnboardingEventKind::ShowHint,
            Self::StepPass { .. } => OnboardingEventKind::StepPass,
            Self::AddPreset { .. } => OnboardingEventKind::AddPreset,
            Self::BeforeRunPreset { .. } => OnboardingEventKind::BeforeRunPreset,
            Self::RunPreset { .. } => OnboardingEventKind::RunPreset,
            Self::FinishPreset { .. } => OnboardingEventKind::FinishPreset,
            Self::BeforeSuggestPreset { .. } => OnboardingEventKind::BeforeSuggestPreset,
            Self::StepElementReached { .. } => OnboardingEventKind::StepElementReached,
            Self::BeforeShowHint(_) => OnboardingEventKind::BeforeShowHint,
            Self::CloseHint { .. } => OnboardingEventKind::CloseHint,
            Self::CloseHintByUser { .. } => OnboardingEventKind::CloseHintByUser,
            Self::WizardStateChanged { .. } => OnboardingEventKind::WizardStateChanged,
        }
    }
}

impl OnboardingEvent {
    /// Preset the event concerns, when it has one.
    pub fn preset(&self) -> Option<&str> {
        match self {
            Self::ShowHint(hint) | Self::BeforeShowHint(hint) => Some(&hint.preset),
            Self::StepPass { preset, .. }
            | Self::AddPreset { preset }
            | Self::BeforeRunPreset { preset }
            | Self::RunPreset { preset }
            | Self::FinishPreset { preset }
            | Self::BeforeSuggestPreset { preset }
            | Self::CloseHint { preset, .. }
            | Self::CloseHintByUser { preset, .. } => Some(preset),
            Self::Init | Self::StepElementReached { .. } | Self::WizardStateChanged { .. } => None,
        }
    }
}
