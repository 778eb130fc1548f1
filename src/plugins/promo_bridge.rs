//! Links onboarding presets to promo-manager entries so a tour and a
//! promo never compete for the user's attention.
//!
//! - Before a linked preset shows a hint, its promo must hold the promo
//!   slot; the bridge starts it immediately or vetoes the hint.
//! - Running a linked preset requests its promo.
//! - Finishing either side finishes the other.
//!
//! Install the same `Arc<PromoBridge>` as a plugin on both controllers.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::Result;
use crate::events::Flow;
use crate::lock;
use crate::onboarding::{Onboarding, OnboardingEvent, OnboardingEventKind, WeakOnboarding};
use crate::promo::{PromoEvent, PromoEventKind, PromoManager, PromoStatus, WeakPromoManager};

use super::{OnboardingPlugin, PromoManagerPlugin};

pub struct PromoBridge {
    shared: Arc<Shared>,
}

struct Shared {
    /// Preset slug → promo slug.
    promo_by_preset: HashMap<String, String>,
    /// Promo slug → preset slug.
    preset_by_promo: HashMap<String, String>,
    onboarding: Mutex<Option<WeakOnboarding>>,
    promo: Mutex<Option<WeakPromoManager>>,
    /// Presets whose finish is currently being forwarded to the promo side.
    finishing: Mutex<HashSet<String>>,
}

impl Shared {
    fn onboarding(&self) -> Option<Onboarding> {
        lock(&self.onboarding).as_ref().and_then(WeakOnboarding::upgrade)
    }

    fn promo(&self) -> Option<PromoManager> {
        lock(&self.promo).as_ref().and_then(WeakPromoManager::upgrade)
    }

    /// Linked promo and the promo manager, when both exist.
    fn linked_promo(&self, preset: Option<&str>) -> Option<(String, PromoManager)> {
        let promo = self.promo_by_preset.get(preset?)?.clone();
        Some((promo, self.promo()?))
    }
}

impl PromoBridge {
    /// `links` pairs preset slugs with promo slugs.
    pub fn new<I, P, Q>(links: I) -> Arc<Self>
    where
        I: IntoIterator<Item = (P, Q)>,
        P: Into<String>,
        Q: Into<String>,
    {
        let promo_by_preset: HashMap<String, String> = links
            .into_iter()
            .map(|(preset, promo)| (preset.into(), promo.into()))
            .collect();
        let preset_by_promo = promo_by_preset
            .iter()
            .map(|(preset, promo)| (promo.clone(), preset.clone()))
            .collect();
        Arc::new(Self {
            shared: Arc::new(Shared {
                promo_by_preset,
                preset_by_promo,
                onboarding: Mutex::new(None),
                promo: Mutex::new(None),
                finishing: Mutex::new(HashSet::new()),
            }),
        })
    }
}

async fn before_show_hint(shared: Arc<Shared>, event: OnboardingEvent) -> Result<Flow> {
    let Some((promo, manager)) = shared.linked_promo(event.preset()) else {
        return Ok(Flow::Continue);
    };
    match manager.promo_status(&promo) {
        PromoStatus::Active | PromoStatus::Finished => Ok(Flow::Continue),
        PromoStatus::Forbidden => {
            debug!(promo = %promo, "Linked promo is forbidden; holding hint back");
            Ok(Flow::Veto)
        }
        PromoStatus::CanRun | PromoStatus::Pending => {
            if manager.start_promo_immediately(&promo).await? {
                Ok(Flow::Continue)
            } else {
                debug!(promo = %promo, "Promo slot is taken; holding hint back");
                Ok(Flow::Veto)
            }
        }
    }
}

async fn run_preset(shared: Arc<Shared>, event: OnboardingEvent) -> Result<Flow> {
    if let Some((promo, manager)) = shared.linked_promo(event.preset()) {
        manager.request_start(&promo, false).await?;
    }
    Ok(Flow::Continue)
}

async fn finish_preset(shared: Arc<Shared>, event: OnboardingEvent) -> Result<Flow> {
    let Some(preset) = event.preset().map(str::to_string) else {
        return Ok(Flow::Continue);
    };
    let Some((promo, manager)) = shared.linked_promo(Some(&preset)) else {
        return Ok(Flow::Continue);
    };
    if manager.is_finished(&promo) {
        return Ok(Flow::Continue);
    }

    lock(&shared.finishing).insert(preset.clone());
    let result = manager.finish_promo(&promo, Duration::ZERO).await;
    lock(&shared.finishing).remove(&preset);
    result.map(|_| Flow::Continue)
}

async fn finish_promo(shared: Arc<Shared>, event: PromoEvent) -> Result<Flow> {
    let Some(preset) = event
        .promo()
        .and_then(|promo| shared.preset_by_promo.get(promo))
        .cloned()
    else {
        return Ok(Flow::Continue);
    };
    if lock(&shared.finishing).contains(&preset) {
        return Ok(Flow::Continue);
    }
    let Some(onboarding) = shared.onboarding() else {
        return Ok(Flow::Continue);
    };
    if !onboarding.get_snapshot().base.active_presets.contains(&preset) {
        return Ok(Flow::Continue);
    }
    onboarding.finish_preset(&preset, true).await?;
    Ok(Flow::Continue)
}

impl OnboardingPlugin for PromoBridge {
    fn name(&self) -> &str {
        "promo-bridge"
    }

    fn apply(&self, onboarding: &Onboarding) {
        for preset in self.shared.promo_by_preset.keys() {
            if !onboarding.registry().contains(preset) {
                warn!(preset = %preset, "Promo bridge links an unknown preset");
            }
        }
        *lock(&self.shared.onboarding) = Some(onboarding.downgrade());

        let shared = Arc::clone(&self.shared);
        onboarding.on_async(OnboardingEventKind::BeforeShowHint, move |event, _| {
            before_show_hint(Arc::clone(&shared), event)
        });
        let shared = Arc::clone(&self.shared);
        onboarding.on_async(OnboardingEventKind::RunPreset, move |event, _| {
            run_preset(Arc::clone(&shared), event)
        });
        let shared = Arc::clone(&self.shared);
        onboarding.on_async(OnboardingEventKind::FinishPreset, move |event, _| {
            finish_preset(Arc::clone(&shared), event)
        });
    }
}

impl PromoManagerPlugin for PromoBridge {
    fn name(&self) -> &str {
        "promo-bridge"
    }

    fn apply(&self, manager: &PromoManager) {
        for promo in self.shared.preset_by_promo.keys() {
            if !manager.registry().contains(promo) {
                warn!(promo = %promo, "Promo bridge links an unknown promo");
            }
        }
        *lock(&self.shared.promo) = Some(manager.downgrade());

        let shared = Arc::clone(&self.shared);
        manager.on_async(PromoEventKind::FinishPromo, move |event, _| {
            finish_promo(Arc::clone(&shared), event)
        });
    }
}

impl std::fmt::Debug for PromoBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromoBridge")
            .field("links", &self.shared.promo_by_preset)
            .finish_non_exhaustive()
    }
}
