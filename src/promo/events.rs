//! Promo manager event catalog.

use crate::events::BusEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromoEvent {
    /// The manager has progress and is ready; fired once per instance.
    Init,
    /// Progress arrived from storage.
    ProgressLoaded,
    RequestStart { promo: String },
    StartPromo { promo: String },
    FinishPromo { promo: String },
    CancelPromo { promo: String },
    SkipPromo { promo: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromoEventKind {
    Init,
    ProgressLoaded,
    RequestStart,
    StartPromo,
    FinishPromo,
    CancelPromo,
    SkipPromo,
}

impl BusEvent for PromoEvent {
    type Kind = PromoEventKind;

    fn kind(&self) -> PromoEventKind {
        match self {
            Self::Init => PromoEventKind::Init,
            Self::ProgressLoaded => PromoEventKind::ProgressLoaded,
            Self::RequestStart { .. } => PromoEventKind::RequestStart,
            Self::StartPromo { .. } => PromoEventKind::StartPromo,
            Self::FinishPromo { .. } => PromoEventKind::FinishPromo,
            Self::CancelPromo { .. } => PromoEventKind::CancelPromo,
            Self::SkipPromo { .. } => PromoEventKind::SkipPromo,
        }
    }
}

impl PromoEvent {
    pub fn promo(&self) -> Option<&str> {
        match self {
            Self::RequestStart { promo }
            | Self::StartPromo { promo }
            | Self::FinishPromo { promo }
            | Self::CancelPromo { promo }
            | Self::SkipPromo { promo } => Some(promo),
            Self::Init | Self::ProgressLoaded => None,
        }
    }
}
