//! Promo admission scenarios driven through the public API with a manual
//! clock and the in-memory progress storage.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tourguide::clock::ManualClock;
use tourguide::events::Flow;
use tourguide::promo::{
    limit_frequency, match_url, show_once_for_period, show_once_for_session, MemoryPromoStorage,
    Priority, Promo, PromoEvent, PromoEventKind, PromoGroup, PromoManager, PromoManagerOptions,
    PromoProgressState, PromoStatus,
};

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

struct Harness {
    manager: PromoManager,
    storage: Arc<MemoryPromoStorage>,
    clock: Arc<ManualClock>,
}

fn harness(groups: Vec<PromoGroup>) -> Harness {
    harness_with(groups, |options| options)
}

fn harness_with(
    groups: Vec<PromoGroup>,
    configure: impl FnOnce(PromoManagerOptions) -> PromoManagerOptions,
) -> Harness {
    let storage = Arc::new(MemoryPromoStorage::new());
    let clock = ManualClock::new(1_700_000_000_000);
    let options = PromoManagerOptions::new(groups, storage.clone()).with_clock(clock.clone());
    Harness {
        manager: PromoManager::new(configure(options)).unwrap(),
        storage,
        clock,
    }
}

/// Let the zero-delay activation task run.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[tokio::test(start_paused = true)]
async fn high_priority_is_promoted_first_regardless_of_request_order() {
    let Harness { manager, .. } = harness(vec![PromoGroup::new(
        "tips",
        vec![
            Promo::new("first"),
            Promo::new("second"),
            Promo::new("urgent").with_priority(Priority::High),
        ],
    )]);

    for slug in ["first", "second", "urgent"] {
        manager.request_start(slug, false).await.unwrap();
    }
    settle().await;

    assert_eq!(manager.active_promo().as_deref(), Some("urgent"));
    assert_eq!(manager.queue(), vec!["first", "second"]);
}

#[tokio::test(start_paused = true)]
async fn at_most_one_promo_is_ever_active() {
    let Harness { manager, .. } = harness(vec![
        PromoGroup::new("a", vec![Promo::new("a1"), Promo::new("a2")]),
        PromoGroup::new("b", vec![Promo::new("b1")]),
    ]);
    let starts = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&starts);
    manager.on(PromoEventKind::StartPromo, move |event, manager| {
        // The slot is taken by exactly the promo being started.
        assert_eq!(manager.active_promo().as_deref(), event.promo());
        seen.lock().unwrap().push(event.promo().unwrap_or_default().to_string());
        Flow::Continue
    });

    let (r1, r2, r3) = tokio::join!(
        manager.request_start("a1", false),
        manager.request_start("b1", false),
        manager.request_start("a2", false),
    );
    r1.unwrap();
    r2.unwrap();
    r3.unwrap();
    settle().await;
    assert_eq!(starts.lock().unwrap().len(), 1);

    let mut finished = Vec::new();
    while let Some(active) = manager.active_promo() {
        manager.finish_promo(&active, Duration::ZERO).await.unwrap();
        finished.push(active);
        settle().await;
    }
    // Default priority follows catalog order.
    assert_eq!(finished, vec!["a1", "a2", "b1"]);
    assert_eq!(*starts.lock().unwrap(), finished);
}

#[tokio::test(start_paused = true)]
async fn show_once_for_period_reopens_after_the_period() {
    let Harness {
        manager,
        storage,
        clock,
    } = harness(vec![PromoGroup::new(
        "news",
        vec![Promo::new("x").with_condition(show_once_for_period(7 * DAY))],
    )]);

    manager.request_start("x", false).await.unwrap();
    settle().await;
    assert!(manager.is_active("x"));
    manager.finish_promo("x", Duration::ZERO).await.unwrap();
    assert_eq!(storage.saved_progress().finished_promos, vec!["x"]);

    clock.advance(3 * DAY);
    manager.request_start("x", false).await.unwrap();
    settle().await;
    assert_eq!(manager.active_promo(), None);
    assert_eq!(manager.promo_status("x"), PromoStatus::Finished);

    clock.advance(5 * DAY);
    manager.request_start("x", false).await.unwrap();
    settle().await;
    assert_eq!(manager.active_promo().as_deref(), Some("x"));
}

#[tokio::test(start_paused = true)]
async fn cancel_records_only_on_request_and_skip_always_records() {
    let Harness { manager, storage, .. } = harness(vec![PromoGroup::new(
        "g",
        vec![Promo::new("a"), Promo::new("b")],
    )]);

    manager.start_promo_immediately("a").await.unwrap();
    manager.cancel_promo("a", false, Duration::ZERO).await.unwrap();
    assert_eq!(storage.saves(), 0);
    assert_eq!(manager.promo_status("a"), PromoStatus::CanRun);

    manager.start_promo_immediately("b").await.unwrap();
    manager.skip_promo("b").await.unwrap();
    let progress = storage.saved_progress();
    assert!(progress.last_call_of_promo("b").is_some());
    assert!(progress.last_call_of_type("g").is_some());
    assert!(progress.last_call_of_promo("a").is_none());
    assert!(!progress.is_finished("b"));
}

#[tokio::test(start_paused = true)]
async fn group_conditions_read_group_history() {
    let Harness { manager, clock, .. } = harness(vec![PromoGroup::new(
        "surveys",
        vec![Promo::new("s1"), Promo::new("s2")],
    )
    .with_condition(show_once_for_period(DAY))]);

    manager.start_promo_immediately("s1").await.unwrap();
    manager.finish_promo("s1", Duration::ZERO).await.unwrap();
    assert_eq!(manager.promo_status("s2"), PromoStatus::Forbidden);
    assert_eq!(manager.get_first_available_promo_by_type("surveys"), None);

    clock.advance(DAY);
    assert_eq!(
        manager.get_first_available_promo_by_type("surveys").as_deref(),
        Some("s1")
    );
}

#[tokio::test(start_paused = true)]
async fn frequency_limit_spans_groups() {
    let Harness { manager, .. } = harness(vec![
        PromoGroup::new("tips", vec![Promo::new("tip")]),
        PromoGroup::new(
            "ads",
            vec![Promo::new("ad").with_condition(limit_frequency(vec!["tips".into()], DAY))],
        ),
    ]);

    manager.ensure_progress().await;
    assert_eq!(manager.promo_status("ad"), PromoStatus::CanRun);
    manager.start_promo_immediately("tip").await.unwrap();
    manager.finish_promo("tip", Duration::ZERO).await.unwrap();
    assert_eq!(manager.promo_status("ad"), PromoStatus::Forbidden);
}

#[tokio::test(start_paused = true)]
async fn session_and_url_conditions_gate_admission() {
    let url = Arc::new(Mutex::new(String::from("https://app.test/settings")));
    let current = Arc::clone(&url);
    let Harness { manager, .. } = harness_with(
        vec![PromoGroup::new(
            "onboarding",
            vec![
                Promo::new("dashboard-tour")
                    .with_condition(match_url(r"/dashboard$").unwrap())
                    .with_condition(show_once_for_session()),
            ],
        )],
        move |options| options.with_url_provider(move || Some(current.lock().unwrap().clone())),
    );

    manager.ensure_progress().await;
    assert_eq!(manager.promo_status("dashboard-tour"), PromoStatus::Forbidden);

    *url.lock().unwrap() = "https://app.test/dashboard".into();
    assert_eq!(manager.promo_status("dashboard-tour"), PromoStatus::CanRun);
    manager.start_promo_immediately("dashboard-tour").await.unwrap();
    manager.cancel_promo("dashboard-tour", true, Duration::ZERO).await.unwrap();
    assert_eq!(manager.promo_status("dashboard-tour"), PromoStatus::Forbidden);
}

#[tokio::test(start_paused = true)]
async fn progress_loads_once_and_reports_events() {
    let mut progress = PromoProgressState::default();
    progress.finish("old");
    let storage = Arc::new(MemoryPromoStorage::with_progress(progress));
    let manager = PromoManager::new(PromoManagerOptions::new(
        vec![PromoGroup::new("g", vec![Promo::new("old"), Promo::new("new")])],
        storage.clone(),
    ))
    .unwrap();
    let loaded = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&loaded);
    manager.on(PromoEventKind::ProgressLoaded, move |event, _| {
        assert!(matches!(event, PromoEvent::ProgressLoaded));
        counter.fetch_add(1, Ordering::SeqCst);
        Flow::Continue
    });

    tokio::join!(manager.ensure_progress(), manager.ensure_progress());
    manager.request_start("old", false).await.unwrap();
    settle().await;

    assert_eq!(storage.fetch_calls(), 1);
    assert_eq!(loaded.load(Ordering::SeqCst), 1);
    assert_eq!(manager.promo_status("old"), PromoStatus::Finished);
    assert_eq!(manager.active_promo(), None);
}
