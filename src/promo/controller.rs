//! Promo manager: a single-slot scheduler over a priority queue.
//!
//! `request_start` queues a promo and schedules promotion of the queue
//! head on a zero-delay coalescing task, so a burst of requests made in
//! one turn is sorted before anything is admitted. At most one promo is
//! active; closing it schedules the next promotion.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::OnceCell;

use crate::clock::{Clock, SystemClock};
use crate::config::PromoManagerConfig;
use crate::debounce::Debounced;
use crate::error::{Error, Result};
use crate::events::{EventBus, Flow, ListenerId};
use crate::logging::Logger;
use crate::plugins::PromoManagerPlugin;
use crate::store::{NotifyMode, Store, Subscription};

use super::conditions::{Condition, ConditionContext, ConditionScope, Evaluator, HelperRegistry};
use super::events::{PromoEvent, PromoEventKind};
use super::helpers::default_helpers;
use super::model::{PromoGroup, PromoRegistry, RegisteredPromo};
use super::state::{PromoProgressState, PromoSnapshot, PromoStatus};
use super::storage::PromoStorage;

/// Supplies the host's current URL to `matchUrl` conditions.
pub type UrlProvider = Arc<dyn Fn() -> Option<String> + Send + Sync>;

pub struct PromoManagerOptions {
    pub groups: Vec<PromoGroup>,
    /// Global constraints ANDed into every promo's admission check.
    pub constraints: Vec<Condition>,
    pub helpers: HelperRegistry,
    pub progress_state: Option<PromoProgressState>,
    pub storage: Arc<dyn PromoStorage>,
    pub clock: Arc<dyn Clock>,
    pub url_provider: Option<UrlProvider>,
    pub config: PromoManagerConfig,
    pub plugins: Vec<Arc<dyn PromoManagerPlugin>>,
}

impl PromoManagerOptions {
    pub fn new(groups: Vec<PromoGroup>, storage: Arc<dyn PromoStorage>) -> Self {
        Self {
            groups,
            constraints: Vec::new(),
            helpers: default_helpers(),
            progress_state: None,
            storage,
            clock: Arc::new(SystemClock),
            url_provider: None,
            config: PromoManagerConfig::default(),
            plugins: Vec::new(),
        }
    }

    pub fn with_constraint(mut self, condition: Condition) -> Self {
        self.constraints.push(condition);
        self
    }

    pub fn with_helpers(mut self, helpers: HelperRegistry) -> Self {
        self.helpers = helpers;
        self
    }

    pub fn with_progress_state(mut self, progress: PromoProgressState) -> Self {
        self.progress_state = Some(progress);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_url_provider<F>(mut self, provider: F) -> Self
    where
        F: Fn() -> Option<String> + Send + Sync + 'static,
    {
        self.url_provider = Some(Arc::new(provider));
        self
    }

    pub fn with_config(mut self, config: PromoManagerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_plugin(mut self, plugin: Arc<dyn PromoManagerPlugin>) -> Self {
        self.plugins.push(plugin);
        self
    }
}

/// Handle to a promo manager. Clones share one instance.
#[derive(Clone)]
pub struct PromoManager {
    inner: Arc<Inner>,
}

#[derive(Clone)]
pub struct WeakPromoManager {
    inner: Weak<Inner>,
}

impl WeakPromoManager {
    pub fn upgrade(&self) -> Option<PromoManager> {
        self.inner.upgrade().map(|inner| PromoManager { inner })
    }
}

struct Inner {
    registry: PromoRegistry,
    constraints: Vec<Condition>,
    helpers: HelperRegistry,
    logger: Logger,
    clock: Arc<dyn Clock>,
    url_provider: Option<UrlProvider>,
    session_start: i64,
    state: Store<PromoSnapshot>,
    events: EventBus<PromoEvent, PromoManager>,
    loaded: OnceCell<()>,
    initialized: AtomicBool,
    storage: Arc<dyn PromoStorage>,
    /// Zero-delay task promoting the queue head.
    activate: Debounced,
    save_progress: Debounced,
}

impl PromoManager {
    pub fn new(options: PromoManagerOptions) -> Result<Self> {
        let PromoManagerOptions {
            groups,
            constraints,
            helpers,
            progress_state,
            storage,
            clock,
            url_provider,
            config,
            plugins,
        } = options;

        let registry = PromoRegistry::new(groups, &helpers)?;
        let preloaded = progress_state.is_some();
        let state = Store::with_mode(
            PromoSnapshot {
                base: Arc::default(),
                progress: progress_state.map(Arc::new),
            },
            NotifyMode::Debounced(config.notify_debounce),
        );

        let save_progress = {
            let state = state.clone();
            let storage = Arc::clone(&storage);
            Debounced::new(config.save_debounce, move || {
                let progress = state.get_snapshot().progress.clone();
                let storage = Arc::clone(&storage);
                async move {
                    match progress {
                        Some(progress) => storage.save_progress(&progress).await.map_err(Error::from),
                        None => Ok(()),
                    }
                }
            })
        };

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let weak = weak.clone();
            let activate = Debounced::new(Duration::ZERO, move || {
                let manager = WeakPromoManager {
                    inner: weak.clone(),
                }
                .upgrade();
                async move {
                    match manager {
                        Some(manager) => manager.activate_next().await,
                        None => Ok(()),
                    }
                }
            });

            Inner {
                registry,
                constraints,
                helpers,
                logger: Logger::new("promo-manager", config.log_level),
                session_start: clock.now_millis(),
                clock,
                url_provider,
                state,
                events: EventBus::new(),
                loaded: OnceCell::new_with(preloaded.then_some(())),
                initialized: AtomicBool::new(false),
                storage,
                activate,
                save_progress,
            }
        });

        let manager = Self { inner };
        for plugin in plugins {
            manager
                .inner
                .logger
                .debug(format!("Applying plugin {}", plugin.name()));
            plugin.apply(&manager);
        }
        Ok(manager)
    }

    pub fn downgrade(&self) -> WeakPromoManager {
        WeakPromoManager {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn registry(&self) -> &PromoRegistry {
        &self.inner.registry
    }

    pub fn get_snapshot(&self) -> Arc<PromoSnapshot> {
        self.inner.state.get_snapshot()
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.state.subscribe(listener)
    }

    pub fn on<F>(&self, kind: PromoEventKind, listener: F) -> ListenerId
    where
        F: Fn(&PromoEvent, &PromoManager) -> Flow + Send + Sync + 'static,
    {
        self.inner.events.on(kind, listener)
    }

    pub fn on_async<F, Fut>(&self, kind: PromoEventKind, listener: F) -> ListenerId
    where
        F: Fn(PromoEvent, PromoManager) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Flow>> + Send + 'static,
    {
        self.inner.events.on_async(kind, listener)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.events.off(id)
    }

    async fn emit(&self, event: PromoEvent) -> Result<Flow> {
        self.inner.events.emit(event, self).await
    }

    // ── Progress ────────────────────────────────────────────────────

    /// Load progress once; concurrent callers share the fetch. Failures
    /// are logged and leave every promo `Forbidden`.
    pub async fn ensure_progress(&self) {
        let mut fetched = false;
        let result = self
            .inner
            .loaded
            .get_or_try_init(|| {
                fetched = true;
                self.load_progress()
            })
            .await;

        if let Err(e) = result {
            self.inner
                .logger
                .error(format!("Failed to load promo progress: {e}"));
            return;
        }
        if fetched {
            self.emit_logged(PromoEvent::ProgressLoaded).await;
        }
        if !self.inner.initialized.swap(true, Ordering::SeqCst) {
            self.emit_logged(PromoEvent::Init).await;
        }
    }

    async fn load_progress(&self) -> Result<()> {
        self.inner.logger.debug("Loading progress");
        let progress = self.inner.storage.get_progress_state().await?;
        self.inner
            .state
            .update(|s| s.progress = Some(Arc::new(progress)));
        Ok(())
    }

    async fn emit_logged(&self, event: PromoEvent) {
        let kind = event.kind_name();
        if let Err(e) = self.emit(event).await {
            self.inner.logger.error(format!("{kind} listener failed: {e}"));
        }
    }

    async fn save_progress(&self) -> Result<()> {
        self.inner.save_progress.call().await
    }

    /// Schedule promotion of the queue head without waiting for it.
    fn schedule_activation(&self) {
        drop(self.inner.activate.call());
    }

    // ── Status ──────────────────────────────────────────────────────

    pub fn promo_status(&self, slug: &str) -> PromoStatus {
        self.status_in(&self.get_snapshot(), slug)
    }

    fn status_in(&self, snapshot: &PromoSnapshot, slug: &str) -> PromoStatus {
        let Some(progress) = &snapshot.progress else {
            return PromoStatus::Forbidden;
        };
        if snapshot.base.active_promo.as_deref() == Some(slug) {
            return PromoStatus::Active;
        }
        // Own or group conditions are the re-show policy of a finished
        // promo; without any, finishing is terminal.
        if progress.is_finished(slug) && !(self.has_conditions(slug) && self.is_valid(snapshot, slug)) {
            return PromoStatus::Finished;
        }
        if snapshot.base.active_queue.iter().any(|queued| queued == slug) {
            return PromoStatus::Pending;
        }
        if self.is_valid(snapshot, slug) {
            PromoStatus::CanRun
        } else {
            PromoStatus::Forbidden
        }
    }

    pub fn active_promo(&self) -> Option<String> {
        self.get_snapshot().base.active_promo.clone()
    }

    pub fn is_active(&self, slug: &str) -> bool {
        self.get_snapshot().base.active_promo.as_deref() == Some(slug)
    }

    /// Finished, regardless of whether it still holds the slot.
    pub fn is_finished(&self, slug: &str) -> bool {
        self.get_snapshot()
            .progress
            .as_ref()
            .is_some_and(|progress| progress.is_finished(slug))
    }

    pub fn queue(&self) -> Vec<String> {
        self.get_snapshot().base.active_queue.clone()
    }

    fn has_conditions(&self, slug: &str) -> bool {
        let registry = &self.inner.registry;
        registry.get(slug).is_some_and(|entry| {
            !entry.promo.conditions.is_empty()
                || registry
                    .group(&entry.group)
                    .is_some_and(|group| !group.conditions.is_empty())
        })
    }

    /// Constraints, then group conditions, then promo conditions.
    fn is_valid(&self, snapshot: &PromoSnapshot, slug: &str) -> bool {
        let Some(entry) = self.inner.registry.get(slug) else {
            return false;
        };
        let evaluator = Evaluator {
            helpers: &self.inner.helpers,
            logger: &self.inner.logger,
        };
        let group_conditions = self
            .inner
            .registry
            .group(&entry.group)
            .map(|group| group.conditions.as_slice())
            .unwrap_or_default();

        evaluator.all(
            &self.inner.constraints,
            snapshot,
            &self.context(entry, ConditionScope::Promo),
        ) && evaluator.all(
            group_conditions,
            snapshot,
            &self.context(entry, ConditionScope::Group),
        ) && evaluator.all(
            &entry.promo.conditions,
            snapshot,
            &self.context(entry, ConditionScope::Promo),
        )
    }

    fn context(&self, entry: &RegisteredPromo, scope: ConditionScope) -> ConditionContext {
        ConditionContext {
            promo: entry.promo.slug.clone(),
            group: entry.group.clone(),
            scope,
            now_millis: self.inner.clock.now_millis(),
            session_start: self.inner.session_start,
            current_url: self.inner.url_provider.as_ref().and_then(|url| url()),
        }
    }

    /// First promo of `group` (declared order) that could show now.
    pub fn get_first_available_promo_by_type(&self, group: &str) -> Option<String> {
        let snapshot = self.get_snapshot();
        self.inner
            .registry
            .group(group)?
            .promos
            .iter()
            .find(|promo| {
                matches!(
                    self.status_in(&snapshot, &promo.slug),
                    PromoStatus::CanRun | PromoStatus::Pending
                )
            })
            .map(|promo| promo.slug.clone())
    }

    fn entry(&self, slug: &str) -> Result<&RegisteredPromo> {
        self.inner
            .registry
            .get(slug)
            .ok_or_else(|| Error::UnknownPromo(slug.to_string()))
    }

    // ── Admission ───────────────────────────────────────────────────

    /// Queue `slug` and schedule promotion. With `update_progress_info`,
    /// the request itself counts as a call for time-window conditions.
    pub async fn request_start(&self, slug: &str, update_progress_info: bool) -> Result<()> {
        if slug.is_empty() {
            return Ok(());
        }
        let Some(entry) = self.inner.registry.get(slug) else {
            self.inner
                .logger
                .error(format!("Requested unknown promo {slug}"));
            return Ok(());
        };

        self.ensure_progress().await;
        let status = self.promo_status(slug);
        if status != PromoStatus::CanRun {
            self.inner
                .logger
                .debug(format!("Promo {slug} is {status}, not queuing"));
            return Ok(());
        }

        self.enqueue(slug, update_progress_info.then_some(entry.group.as_str()));
        self.inner.logger.debug(format!("Queued promo {slug}"));
        self.emit(PromoEvent::RequestStart {
            promo: slug.to_string(),
        })
        .await?;

        self.schedule_activation();
        if update_progress_info {
            self.save_progress().await?;
        }
        Ok(())
    }

    /// Insert into the queue and re-sort it. `record_for` is the group to
    /// record a call against, if any.
    fn enqueue(&self, slug: &str, record_for: Option<&str>) {
        let registry = &self.inner.registry;
        let now = self.inner.clock.now_millis();
        self.inner.state.update(|s| {
            let base = Arc::make_mut(&mut s.base);
            if !base.active_queue.iter().any(|queued| queued == slug) {
                base.active_queue.push(slug.to_string());
                base.active_queue.sort_by_key(|queued| registry.priority_of(queued));
            }
            if let (Some(group), Some(progress)) = (record_for, s.progress.as_mut()) {
                Arc::make_mut(progress).record_call(slug, group, now);
            }
        });
    }

    /// Promote the first queued promo whose conditions hold right now.
    async fn activate_next(&self) -> Result<()> {
        let snapshot = self.get_snapshot();
        if snapshot.base.active_promo.is_some() || snapshot.base.active_queue.is_empty() {
            return Ok(());
        }
        let candidate = snapshot
            .base
            .active_queue
            .iter()
            .find(|slug| self.is_valid(&snapshot, slug))
            .cloned();
        match candidate {
            Some(slug) => self.activate(&slug).await.map(|_| ()),
            None => {
                self.inner
                    .logger
                    .debug("No queued promo passes its conditions");
                Ok(())
            }
        }
    }

    async fn activate(&self, slug: &str) -> Result<bool> {
        if self.get_snapshot().base.active_promo.is_some() {
            return Ok(false);
        }
        let activated = self.inner.state.update(|s| {
            let base = Arc::make_mut(&mut s.base);
            if base.active_promo.is_some() {
                return false;
            }
            base.active_queue.retain(|queued| queued != slug);
            base.active_promo = Some(slug.to_string());
            // A repeat run starts unfinished.
            if let Some(progress) = s.progress.as_mut().filter(|p| p.is_finished(slug)) {
                Arc::make_mut(progress).finished_promos.retain(|done| done != slug);
            }
            true
        });
        if activated {
            self.inner.logger.debug(format!("Started promo {slug}"));
            self.emit(PromoEvent::StartPromo {
                promo: slug.to_string(),
            })
            .await?;
        }
        Ok(activated)
    }

    /// Activate `slug` now, bypassing the queue. Only `CanRun` or
    /// `Pending` promos qualify. When another promo holds the slot the
    /// promo is queued instead and `false` is returned.
    pub async fn start_promo_immediately(&self, slug: &str) -> Result<bool> {
        self.entry(slug)?;
        self.ensure_progress().await;

        let status = self.promo_status(slug);
        if !matches!(status, PromoStatus::CanRun | PromoStatus::Pending) {
            self.inner
                .logger
                .debug(format!("Promo {slug} is {status}, cannot start"));
            return Ok(false);
        }
        if self.get_snapshot().base.active_promo.is_some() {
            if status == PromoStatus::CanRun {
                self.enqueue(slug, None);
                self.emit(PromoEvent::RequestStart {
                    promo: slug.to_string(),
                })
                .await?;
            }
            return Ok(false);
        }
        self.activate(slug).await
    }

    // ── Closing ─────────────────────────────────────────────────────

    /// Mark `slug` finished and record the call. The slot is released
    /// after `close_timeout`.
    pub async fn finish_promo(&self, slug: &str, close_timeout: Duration) -> Result<()> {
        let group = self.entry(slug)?.group.clone();
        self.ensure_progress().await;

        let now = self.inner.clock.now_millis();
        self.inner.state.update(|s| {
            Arc::make_mut(&mut s.base)
                .active_queue
                .retain(|queued| queued != slug);
            if let Some(progress) = s.progress.as_mut() {
                let progress = Arc::make_mut(progress);
                progress.finish(slug);
                progress.record_call(slug, &group, now);
            }
        });
        self.inner.logger.debug(format!("Finished promo {slug}"));
        self.emit(PromoEvent::FinishPromo {
            promo: slug.to_string(),
        })
        .await?;

        self.release_slot(slug, close_timeout);
        self.save_progress().await
    }

    /// Close the active `slug` without finishing it. Records the call
    /// only when asked.
    pub async fn cancel_promo(
        &self,
        slug: &str,
        update_progress_info: bool,
        close_timeout: Duration,
    ) -> Result<()> {
        self.close_unfinished(
            slug,
            update_progress_info,
            close_timeout,
            PromoEvent::CancelPromo {
                promo: slug.to_string(),
            },
        )
        .await
    }

    /// Dismissal by the user: a cancel that always records the call.
    pub async fn skip_promo(&self, slug: &str) -> Result<()> {
        self.close_unfinished(
            slug,
            true,
            Duration::ZERO,
            PromoEvent::SkipPromo {
                promo: slug.to_string(),
            },
        )
        .await
    }

    async fn close_unfinished(
        &self,
        slug: &str,
        update_progress_info: bool,
        close_timeout: Duration,
        event: PromoEvent,
    ) -> Result<()> {
        let group = self.entry(slug)?.group.clone();
        if update_progress_info {
            self.ensure_progress().await;
            let now = self.inner.clock.now_millis();
            self.inner.state.update(|s| {
                if let Some(progress) = s.progress.as_mut() {
                    Arc::make_mut(progress).record_call(slug, &group, now);
                }
            });
        }
        self.emit(event).await?;

        self.release_slot(slug, close_timeout);
        if update_progress_info {
            self.save_progress().await?;
        }
        Ok(())
    }

    /// Abort `slug` whether active or queued. Records nothing.
    pub async fn cancel_start(&self, slug: &str) -> Result<()> {
        self.entry(slug)?;
        let snapshot = self.get_snapshot();
        let queued = snapshot.base.active_queue.iter().any(|queued| queued == slug);
        let active = snapshot.base.active_promo.as_deref() == Some(slug);
        if !queued && !active {
            return Ok(());
        }

        self.inner.state.update(|s| {
            let base = Arc::make_mut(&mut s.base);
            base.active_queue.retain(|queued| queued != slug);
            if base.active_promo.as_deref() == Some(slug) {
                base.active_promo = None;
            }
        });
        self.inner.logger.debug(format!("Cancelled start of {slug}"));
        self.emit(PromoEvent::CancelPromo {
            promo: slug.to_string(),
        })
        .await?;
        if active {
            self.schedule_activation();
        }
        Ok(())
    }

    /// Clear the slot if `slug` holds it, now or after `delay`, then
    /// promote the next candidate.
    fn release_slot(&self, slug: &str, delay: Duration) {
        if delay.is_zero() {
            self.clear_active(slug);
            return;
        }
        let weak = self.downgrade();
        let slug = slug.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(manager) = weak.upgrade() {
                manager.clear_active(&slug);
            }
        });
    }

    fn clear_active(&self, slug: &str) {
        if self.get_snapshot().base.active_promo.as_deref() != Some(slug) {
            return;
        }
        self.inner.state.update(|s| {
            let base = Arc::make_mut(&mut s.base);
            if base.active_promo.as_deref() == Some(slug) {
                base.active_promo = None;
            }
        });
        self.schedule_activation();
    }
}

impl PromoEvent {
    fn kind_name(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::ProgressLoaded => "progressLoaded",
            Self::RequestStart { .. } => "requestStart",
            Self::StartPromo { .. } => "startPromo",
            Self::FinishPromo { .. } => "finishPromo",
            Self::CancelPromo { .. } => "cancelPromo",
            Self::SkipPromo { .. } => "skipPromo",
        }
    }
}

impl std::fmt::Debug for PromoManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromoManager")
            .field("promos", &self.inner.registry.len())
            .field("active", &self.active_promo())
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for WeakPromoManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakPromoManager")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::clock::ManualClock;
    use crate::promo::model::{Priority, Promo};
    use crate::promo::storage::MemoryPromoStorage;

    fn manager(groups: Vec<PromoGroup>) -> (PromoManager, Arc<MemoryPromoStorage>) {
        let storage = Arc::new(MemoryPromoStorage::new());
        let options = PromoManagerOptions::new(groups, storage.clone())
            .with_clock(ManualClock::new(1_000));
        (PromoManager::new(options).unwrap(), storage)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn status_is_forbidden_until_progress_loads() {
        let (manager, storage) = manager(vec![PromoGroup::new("g", vec![Promo::new("a")])]);
        assert_eq!(manager.promo_status("a"), PromoStatus::Forbidden);

        manager.ensure_progress().await;
        manager.ensure_progress().await;
        assert_eq!(storage.fetch_calls(), 1);
        assert_eq!(manager.promo_status("a"), PromoStatus::CanRun);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_requests_admits_highest_priority() {
        let (manager, _) = manager(vec![PromoGroup::new(
            "g",
            vec![
                Promo::new("a"),
                Promo::new("b"),
                Promo::new("c").with_priority(Priority::High),
            ],
        )]);

        manager.request_start("a", false).await.unwrap();
        manager.request_start("b", false).await.unwrap();
        manager.request_start("c", false).await.unwrap();
        settle().await;

        assert_eq!(manager.active_promo().as_deref(), Some("c"));
        assert_eq!(manager.queue(), vec!["a", "b"]);
        assert_eq!(manager.promo_status("a"), PromoStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_requests_notifies_subscribers_in_batches() {
        let (manager, _) = manager(vec![PromoGroup::new(
            "g",
            vec![Promo::new("a"), Promo::new("b"), Promo::new("c")],
        )]);
        let notifications = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&notifications);
        let _subscription = manager.subscribe(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        for slug in ["a", "b", "c"] {
            manager.request_start(slug, false).await.unwrap();
        }
        assert_eq!(notifications.load(Ordering::SeqCst), 0);
        settle().await;

        // One batch for load and queueing, one for the promotion.
        let seen = notifications.load(Ordering::SeqCst);
        assert!((1..=2).contains(&seen), "notified {seen} times");
        assert!(manager.is_active("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn closing_promotes_next() {
        let (manager, _) = manager(vec![PromoGroup::new("g", vec![Promo::new("a"), Promo::new("b")])]);
        manager.request_start("a", false).await.unwrap();
        manager.request_start("b", false).await.unwrap();
        settle().await;
        assert!(manager.is_active("a"));

        manager.cancel_promo("a", false, Duration::ZERO).await.unwrap();
        settle().await;
        assert!(manager.is_active("b"));
        assert_eq!(manager.promo_status("a"), PromoStatus::CanRun);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_release_keeps_slot() {
        let (manager, _) = manager(vec![PromoGroup::new("g", vec![Promo::new("a")])]);
        assert!(manager.start_promo_immediately("a").await.unwrap());

        manager.finish_promo("a", Duration::from_millis(300)).await.unwrap();
        assert!(manager.is_active("a"));
        tokio::time::sleep(Duration::from_millis(301)).await;
        assert_eq!(manager.active_promo(), None);
        assert_eq!(manager.promo_status("a"), PromoStatus::Finished);
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_start_queues_when_slot_taken() {
        let (manager, _) = manager(vec![PromoGroup::new("g", vec![Promo::new("a"), Promo::new("b")])]);
        assert!(manager.start_promo_immediately("a").await.unwrap());
        assert!(!manager.start_promo_immediately("b").await.unwrap());
        assert!(manager.is_active("a"));
        assert_eq!(manager.promo_status("b"), PromoStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_start_drops_pending_without_progress() {
        let (manager, storage) = manager(vec![PromoGroup::new("g", vec![Promo::new("a"), Promo::new("b")])]);
        manager.start_promo_immediately("a").await.unwrap();
        manager.request_start("b", false).await.unwrap();

        manager.cancel_start("b").await.unwrap();
        assert!(manager.queue().is_empty());
        manager.cancel_start("a").await.unwrap();
        settle().await;
        assert_eq!(manager.active_promo(), None);
        assert!(manager.get_snapshot().progress.as_ref().unwrap().progress_info_by_promo.is_empty());
        assert_eq!(storage.saves(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_promo_is_an_error_for_explicit_close() {
        let (manager, _) = manager(vec![]);
        assert_eq!(
            manager.finish_promo("nope", Duration::ZERO).await,
            Err(Error::UnknownPromo("nope".into()))
        );
        manager.request_start("nope", false).await.unwrap();
        assert!(manager.queue().is_empty());
    }
}
