//! Bundled plugins wired onto real controllers: cross-tab sync between two
//! onboarding instances and the onboarding/promo bridge.

use std::sync::Arc;
use std::time::Duration;

use tourguide::onboarding::{
    ElementRef, MemoryOnboardingStorage, Onboarding, OnboardingOptions, Preset, Step,
    VirtualElement, WizardState,
};
use tourguide::plugins::{
    MemorySharedStorage, MultiTabSync, MultiTabSyncOptions, PromoBridge, SharedStorage,
};
use tourguide::promo::{
    MemoryPromoStorage, Promo, PromoGroup, PromoManager, PromoManagerOptions, PromoStatus,
};

fn tour() -> Preset {
    Preset::common("tour", vec![Step::new("s1"), Step::new("s2")])
}

fn anchor(id: &str) -> ElementRef {
    VirtualElement::new(id)
}

/// Let spawned listeners and zero-delay tasks run.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

fn tab(shared: &Arc<MemorySharedStorage>, options: MultiTabSyncOptions) -> (Onboarding, Arc<MultiTabSync>) {
    let sync = Arc::new(MultiTabSync::new(shared.tab(), options));
    let onboarding = Onboarding::new(
        OnboardingOptions::new(vec![tour()], Arc::new(MemoryOnboardingStorage::new()))
            .with_plugin(sync.clone()),
    )
    .unwrap();
    (onboarding, sync)
}

async fn show_first_hint(onboarding: &Onboarding) {
    onboarding.run_preset("tour").await.unwrap();
    onboarding.set_wizard_state(WizardState::Visible).await.unwrap();
    onboarding.step_element_reached("s1", anchor("s1")).await.unwrap();
    assert!(onboarding.hint_store().is_open_for("s1"));
}

#[tokio::test(start_paused = true)]
async fn closing_by_user_closes_the_hint_in_other_tabs() {
    let shared = MemorySharedStorage::new();
    let (first, _) = tab(&shared, MultiTabSyncOptions::default());
    let (second, _) = tab(&shared, MultiTabSyncOptions::default());
    show_first_hint(&first).await;
    show_first_hint(&second).await;

    first.close_hint_by_user(Some("s1")).await.unwrap();
    settle().await;

    assert!(second.current_hint().is_none());
    // The mirrored close is not broadcast again.
    assert_eq!(shared.writes(), 1);
}

#[tokio::test(start_paused = true)]
async fn full_state_is_mirrored_when_enabled() {
    let shared = MemorySharedStorage::new();
    let options = MultiTabSyncOptions {
        sync_closed_hint: true,
        sync_state: true,
    };
    let (first, _) = tab(&shared, options);
    let (second, _) = tab(&shared, options);

    first.add_preset(&["tour"]).await.unwrap();
    settle().await;
    assert_eq!(second.get_snapshot().base.available_presets, vec!["tour"]);

    first.run_preset("tour").await.unwrap();
    settle().await;
    assert_eq!(second.get_snapshot().base, first.get_snapshot().base);
    assert_eq!(second.user_presets(), vec!["tour"]);
}

#[tokio::test(start_paused = true)]
async fn quota_failure_turns_sync_off_for_good() {
    let shared = MemorySharedStorage::with_quota(8);
    let (first, sync) = tab(&shared, MultiTabSyncOptions::default());
    let observer = shared.tab();
    show_first_hint(&first).await;

    first.close_hint_by_user(None).await.unwrap();
    assert!(sync.is_disabled());
    assert_eq!(shared.writes(), 0);
    assert!(observer.get(tourguide::plugins::multi_tab::CLOSED_HINT_KEY).is_none());

    // Closing still works locally.
    assert!(first.current_hint().is_none());
}

struct Linked {
    onboarding: Onboarding,
    promos: PromoManager,
}

fn linked() -> Linked {
    let bridge = PromoBridge::new([("tour", "tour-promo")]);
    let promos = PromoManager::new(
        PromoManagerOptions::new(
            vec![PromoGroup::new("tours", vec![Promo::new("tour-promo"), Promo::new("other")])],
            Arc::new(MemoryPromoStorage::new()),
        )
        .with_plugin(bridge.clone()),
    )
    .unwrap();
    let onboarding = Onboarding::new(
        OnboardingOptions::new(vec![tour()], Arc::new(MemoryOnboardingStorage::new()))
            .with_plugin(bridge),
    )
    .unwrap();
    Linked { onboarding, promos }
}

#[tokio::test(start_paused = true)]
async fn running_a_linked_preset_takes_the_promo_slot() {
    let Linked { onboarding, promos } = linked();

    show_first_hint(&onboarding).await;
    settle().await;
    assert_eq!(promos.active_promo().as_deref(), Some("tour-promo"));
}

#[tokio::test(start_paused = true)]
async fn hint_waits_while_another_promo_is_active() {
    let Linked { onboarding, promos } = linked();
    assert!(promos.start_promo_immediately("other").await.unwrap());

    onboarding.run_preset("tour").await.unwrap();
    onboarding.set_wizard_state(WizardState::Visible).await.unwrap();
    onboarding.step_element_reached("s1", anchor("s1")).await.unwrap();
    assert!(onboarding.current_hint().is_none());
    assert_eq!(promos.promo_status("tour-promo"), PromoStatus::Pending);

    promos.finish_promo("other", Duration::ZERO).await.unwrap();
    settle().await;
    assert!(promos.is_active("tour-promo"));

    onboarding.step_element_reached("s1", anchor("s1")).await.unwrap();
    assert!(onboarding.hint_store().is_open_for("s1"));
}

#[tokio::test(start_paused = true)]
async fn finishing_the_preset_finishes_the_promo() {
    let Linked { onboarding, promos } = linked();
    show_first_hint(&onboarding).await;

    onboarding.pass_step("s1").await.unwrap();
    onboarding.pass_step("s2").await.unwrap();

    assert!(onboarding.is_preset_finished("tour"));
    assert!(promos.is_finished("tour-promo"));
    assert_eq!(promos.active_promo(), None);
}

#[tokio::test(start_paused = true)]
async fn finishing_the_promo_finishes_the_preset() {
    let Linked { onboarding, promos } = linked();
    show_first_hint(&onboarding).await;

    promos.finish_promo("tour-promo", Duration::ZERO).await.unwrap();

    assert!(onboarding.is_preset_finished("tour"));
    assert!(onboarding.get_snapshot().base.active_presets.is_empty());
    assert!(onboarding.current_hint().is_none());
}
