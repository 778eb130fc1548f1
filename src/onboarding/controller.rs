//! Onboarding controller: preset activation, step progression, hint
//! admission, and persistence.
//!
//! State mutation happens in short synchronous sections between the
//! suspension points (progress fetch, saves, hooks, listeners). Anchors
//! reported while another hint is open are parked in a "reached but not
//! shown" registry and re-evaluated whenever a hint closes, a step
//! passes, or the wizard becomes visible.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::OnceCell;

use crate::config::{OnboardingConfig, PassStepScope};
use crate::debounce::Debounced;
use crate::error::{Error, Result};
use crate::events::{EventBus, Flow, ListenerId};
use crate::lock;
use crate::logging::Logger;
use crate::plugins::OnboardingPlugin;
use crate::store::{Store, Subscription};

use super::events::{OnboardingEvent, OnboardingEventKind};
use super::hint::{ElementRef, HintParams, HintStore};
use super::model::{
    CombinedPreset, Hook, HookContext, PassMode, PassRestriction, Preset, PresetKind,
    PresetVisibility,
};
use super::registry::PresetRegistry;
use super::state::{
    contains_slug, find_next_unpassed_step, push_unique, BaseState, ControllerStatus,
    OnboardingSnapshot, ProgressState, WizardState,
};
use super::storage::OnboardingStorage;

/// Host rendering hook, called synchronously when a hint becomes visible.
pub type ShowHintFn = Arc<dyn Fn(&HintParams) + Send + Sync>;

/// Everything needed to build an [`Onboarding`] controller.
pub struct OnboardingOptions {
    pub presets: Vec<Preset>,
    /// Restored base state; defaults when absent.
    pub base_state: Option<BaseState>,
    /// Preloaded progress. When absent it is fetched lazily from storage.
    pub progress_state: Option<ProgressState>,
    pub storage: Arc<dyn OnboardingStorage>,
    pub show_hint: Option<ShowHintFn>,
    pub config: OnboardingConfig,
    pub plugins: Vec<Arc<dyn OnboardingPlugin>>,
}

impl OnboardingOptions {
    pub fn new(presets: Vec<Preset>, storage: Arc<dyn OnboardingStorage>) -> Self {
        Self {
            presets,
            base_state: None,
            progress_state: None,
            storage,
            show_hint: None,
            config: OnboardingConfig::default(),
            plugins: Vec::new(),
        }
    }

    pub fn with_base_state(mut self, base: BaseState) -> Self {
        self.base_state = Some(base);
        self
    }

    pub fn with_progress_state(mut self, progress: ProgressState) -> Self {
        self.progress_state = Some(progress);
        self
    }

    pub fn with_show_hint<F>(mut self, show_hint: F) -> Self
    where
        F: Fn(&HintParams) + Send + Sync + 'static,
    {
        self.show_hint = Some(Arc::new(show_hint));
        self
    }

    pub fn with_config(mut self, config: OnboardingConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_plugin(mut self, plugin: Arc<dyn OnboardingPlugin>) -> Self {
        self.plugins.push(plugin);
        self
    }
}

/// Handle to an onboarding controller. Clones share one instance.
#[derive(Clone)]
pub struct Onboarding {
    inner: Arc<Inner>,
}

/// Non-owning handle, for plugins that must not keep the controller alive.
#[derive(Clone)]
pub struct WeakOnboarding {
    inner: Weak<Inner>,
}

impl WeakOnboarding {
    pub fn upgrade(&self) -> Option<Onboarding> {
        self.inner.upgrade().map(|inner| Onboarding { inner })
    }
}

struct Inner {
    registry: PresetRegistry,
    config: OnboardingConfig,
    logger: Logger,
    storage: Arc<dyn OnboardingStorage>,
    show_hint: Option<ShowHintFn>,
    state: Store<OnboardingSnapshot>,
    hints: HintStore,
    events: EventBus<OnboardingEvent, Onboarding>,
    loaded: OnceCell<()>,
    session: Mutex<Session>,
    save_state: Debounced,
    save_progress: Debounced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Activation {
    Unchanged,
    Started,
    /// Was finished; progress was reset.
    Restarted,
}

/// Per-instance bookkeeping that is never persisted.
#[derive(Default)]
struct Session {
    /// Anchors reported but not yet shown, in arrival order.
    reached: Vec<(String, ElementRef)>,
    /// Steps whose hint was shown during this session.
    shown: HashSet<String>,
    /// Combined preset → resolved internal preset.
    combined_targets: HashMap<String, String>,
}

impl Onboarding {
    /// Validate the catalog, build the controller, and apply plugins in order.
    pub fn new(options: OnboardingOptions) -> Result<Self> {
        let OnboardingOptions {
            presets,
            base_state,
            progress_state,
            storage,
            show_hint,
            config,
            plugins,
        } = options;

        let registry = PresetRegistry::new(presets)?;
        let logger = Logger::new("onboarding", config.log_level);
        let preloaded = progress_state.is_some();

        let state = Store::new(OnboardingSnapshot {
            status: if preloaded {
                ControllerStatus::Active
            } else {
                ControllerStatus::Idle
            },
            base: Arc::new(base_state.unwrap_or_default()),
            progress: progress_state.map(Arc::new),
        });

        let save_state = {
            let state = state.clone();
            let storage = Arc::clone(&storage);
            Debounced::new(config.save_debounce, move || {
                let base = Arc::clone(&state.get_snapshot().base);
                let storage = Arc::clone(&storage);
                async move { storage.save_state(&base).await.map_err(Error::from) }
            })
        };
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

        let onboarding = Self {
            inner: Arc::new(Inner {
                registry,
                logger,
                storage,
                show_hint,
                state,
                hints: HintStore::new(),
                events: EventBus::new(),
                loaded: OnceCell::new_with(preloaded.then_some(())),
                session: Mutex::new(Session::default()),
                save_state,
                save_progress,
                config,
            }),
        };

        for plugin in plugins {
            onboarding
                .inner
                .logger
                .debug(format!("Applying plugin {}", plugin.name()));
            plugin.apply(&onboarding);
        }

        Ok(onboarding)
    }

    pub fn downgrade(&self) -> WeakOnboarding {
        WeakOnboarding {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn registry(&self) -> &PresetRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &OnboardingConfig {
        &self.inner.config
    }

    // ── Observable store ────────────────────────────────────────────

    pub fn get_snapshot(&self) -> Arc<OnboardingSnapshot> {
        self.inner.state.get_snapshot()
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.state.subscribe(listener)
    }

    pub fn hint_store(&self) -> &HintStore {
        &self.inner.hints
    }

    pub fn current_hint(&self) -> Option<HintParams> {
        self.inner.hints.current()
    }

    pub fn status(&self) -> ControllerStatus {
        self.get_snapshot().status
    }

    fn base(&self) -> Arc<BaseState> {
        Arc::clone(&self.get_snapshot().base)
    }

    fn progress(&self) -> Option<Arc<ProgressState>> {
        self.get_snapshot().progress.clone()
    }

    // ── Events ──────────────────────────────────────────────────────

    pub fn on<F>(&self, kind: OnboardingEventKind, listener: F) -> ListenerId
    where
        F: Fn(&OnboardingEvent, &Onboarding) -> Flow + Send + Sync + 'static,
    {
        self.inner.events.on(kind, listener)
    }

    pub fn on_async<F, Fut>(&self, kind: OnboardingEventKind, listener: F) -> ListenerId
    where
        F: Fn(OnboardingEvent, Onboarding) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Flow>> + Send + 'static,
    {
        self.inner.events.on_async(kind, listener)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.events.off(id)
    }

    async fn emit(&self, event: OnboardingEvent) -> Result<Flow> {
        self.inner.events.emit(event, self).await
    }

    // ── Progress loading ────────────────────────────────────────────

    /// Load progress once. Concurrent callers share the in-flight fetch; a
    /// failed fetch is logged and leaves the controller idle so a later
    /// call can retry.
    pub async fn ensure_running(&self) {
        let mut fetched = false;
        let result = self
            .inner
            .loaded
            .get_or_try_init(|| {
                fetched = true;
                self.load_progress()
            })
            .await;

        match result {
            Ok(_) if fetched => {
                if let Err(e) = self.emit(OnboardingEvent::Init).await {
                    self.inner.logger.error(format!("Init listener failed: {e}"));
                }
            }
            Ok(_) => {}
            Err(e) => self
                .inner
                .logger
                .error(format!("Failed to load onboarding progress: {e}")),
        }
    }

    async fn load_progress(&self) -> Result<()> {
        self.inner.logger.debug("Loading progress");
        let progress = self.inner.storage.get_progress_state().await?;
        self.inner.state.update(|s| {
            s.progress = Some(Arc::new(progress));
            s.status = ControllerStatus::Active;
        });
        Ok(())
    }

    async fn save_state(&self) -> Result<()> {
        self.inner.save_state.call().await
    }

    async fn save_progress(&self) -> Result<()> {
        self.inner.save_progress.call().await
    }

    async fn save_all(&self) -> Result<()> {
        let (state, progress) = futures::join!(self.save_state(), self.save_progress());
        state.and(progress)
    }

    // ── Lookup ──────────────────────────────────────────────────────

    fn preset(&self, slug: &str) -> Result<Arc<Preset>> {
        self.inner
            .registry
            .get(slug)
            .ok_or_else(|| Error::UnknownPreset(slug.to_string()))
    }

    /// Owner of `step`: the first owner in active-preset order, otherwise
    /// the first owner in catalog order.
    fn find_preset_for_step(&self, step: &str) -> Option<Arc<Preset>> {
        let owners = self.inner.registry.presets_with_step(step);
        if owners.len() <= 1 {
            return owners.into_iter().next();
        }

        let base = self.base();
        let active: Vec<&Arc<Preset>> = base
            .active_presets
            .iter()
            .filter_map(|slug| owners.iter().find(|preset| preset.slug == *slug))
            .collect();
        if active.len() > 1 {
            let slugs: Vec<&str> = active.iter().map(|p| p.slug.as_str()).collect();
            self.inner.logger.error(format!(
                "Step {step} is declared by several active presets ({}); using {}",
                slugs.join(", "),
                slugs[0]
            ));
        }
        active
            .first()
            .map(|preset| Arc::clone(*preset))
            .or_else(|| owners.into_iter().next())
    }

    fn can_pass_steps_of(&self, preset: &str) -> bool {
        let base = self.base();
        contains_slug(&base.active_presets, preset)
            || (self.inner.config.pass_step_scope == PassStepScope::Available
                && contains_slug(&base.available_presets, preset))
    }

    /// The internal preset a combined preset currently routes to, without
    /// running the resolver.
    fn known_target(&self, preset: &Preset) -> Vec<String> {
        match &preset.kind {
            PresetKind::Combined(combined) => {
                let cached = lock(&self.inner.session)
                    .combined_targets
                    .get(&preset.slug)
                    .cloned();
                match cached {
                    Some(target) => vec![target],
                    None => combined.internal_presets.clone(),
                }
            }
            _ => vec![preset.slug.clone()],
        }
    }

    async fn resolve_combined(&self, slug: &str, combined: &CombinedPreset) -> String {
        let cached = lock(&self.inner.session).combined_targets.get(slug).cloned();
        if let Some(target) = cached {
            return target;
        }

        let picked = (combined.pick_preset)(self.clone()).await;
        let target = if combined.internal_presets.contains(&picked) {
            picked
        } else {
            let fallback = combined
                .internal_presets
                .first()
                .cloned()
                .unwrap_or_else(|| picked.clone());
            self.inner.logger.error(format!(
                "Combined preset {slug} picked {picked}, which is not one of its internal presets; using {fallback}"
            ));
            fallback
        };

        lock(&self.inner.session)
            .combined_targets
            .insert(slug.to_string(), target.clone());
        target
    }

    async fn run_hook(&self, hook: Option<&Hook>, preset: &str, step: Option<&str>) {
        if let Some(hook) = hook {
            hook(HookContext {
                preset: preset.to_string(),
                step: step.map(str::to_string),
                onboarding: self.clone(),
            })
            .await;
        }
    }

    // ── Steps ───────────────────────────────────────────────────────

    /// Mark `step_slug` passed, finishing its preset when it was the last
    /// unpassed step. Progress is saved once per call.
    pub async fn pass_step(&self, step_slug: &str) -> Result<()> {
        let Some(preset) = self.find_preset_for_step(step_slug) else {
            self.inner
                .logger
                .debug(format!("No preset declares step {step_slug}"));
            return Ok(());
        };
        if !self.can_pass_steps_of(&preset.slug) {
            self.inner.logger.debug(format!(
                "Preset {} is not running, ignoring step {step_slug}",
                preset.slug
            ));
            return Ok(());
        }

        self.ensure_running().await;
        let Some(progress) = self.progress() else {
            self.inner
                .logger
                .error(format!("Progress is not loaded, cannot pass {step_slug}"));
            return Ok(());
        };
        if progress.is_step_passed(&preset.slug, step_slug) {
            return Ok(());
        }
        let Some(step) = preset.step(step_slug) else {
            return Ok(());
        };
        if step.pass_restriction == Some(PassRestriction::AfterPrevious) {
            let slugs = preset.step_slugs();
            let next = find_next_unpassed_step(&slugs, progress.passed_steps(&preset.slug));
            if next != Some(step_slug) {
                self.inner.logger.debug(format!(
                    "Step {step_slug} can only pass after its predecessor (next is {next:?})"
                ));
                return Ok(());
            }
        }

        let completed = self.inner.state.update(|s| {
            let Some(progress) = s.progress.as_mut() else {
                return false;
            };
            let progress = Arc::make_mut(progress);
            progress.pass_step(&preset.slug, step_slug);
            preset
                .steps
                .iter()
                .all(|step| progress.is_step_passed(&preset.slug, &step.slug))
        });
        self.inner
            .logger
            .debug(format!("Passed step {step_slug} of {}", preset.slug));

        self.run_hook(step.hooks.on_step_pass.as_ref(), &preset.slug, Some(step_slug))
            .await;
        self.emit(OnboardingEvent::StepPass {
            preset: preset.slug.clone(),
            step: step_slug.to_string(),
        })
        .await?;

        // An on-show-hint step was passed by its own display; leave it open.
        let closed = step.pass_mode != PassMode::OnShowHint
            && self.close_hint_with(Some(step_slug), false).await?;
        if !closed {
            self.reveal_reached_hints().await?;
        }

        if completed {
            self.finish_preset(&preset.slug, false).await?;
            self.save_all().await
        } else {
            self.save_progress().await
        }
    }

    /// The host saw the anchor for `step_slug` mount.
    pub async fn step_element_reached(&self, step_slug: &str, element: ElementRef) -> Result<()> {
        let Some(preset) = self.find_preset_for_step(step_slug) else {
            return Ok(());
        };
        let base = self.base();
        if !contains_slug(&base.active_presets, &preset.slug) {
            self.inner.logger.debug(format!(
                "Preset {} is not active, ignoring anchor {step_slug}",
                preset.slug
            ));
            return Ok(());
        }
        if !base.wizard_state.allows_hints() || !base.enabled {
            return Ok(());
        }

        self.ensure_running().await;
        self.emit(OnboardingEvent::StepElementReached {
            step: step_slug.to_string(),
            element: Arc::clone(&element),
        })
        .await?;

        if self.inner.hints.update_element(step_slug, &element) {
            return Ok(());
        }

        {
            let mut session = lock(&self.inner.session);
            match session.reached.iter_mut().find(|(step, _)| step == step_slug) {
                Some(entry) => entry.1 = element,
                None => session.reached.push((step_slug.to_string(), element)),
            }
        }

        self.try_show_hint(step_slug).await.map(|_| ())
    }

    /// The host saw the anchor for `step_slug` unmount.
    pub async fn step_element_disappeared(&self, step_slug: &str) -> Result<()> {
        lock(&self.inner.session)
            .reached
            .retain(|(step, _)| step != step_slug);

        let keep_open = self
            .find_preset_for_step(step_slug)
            .and_then(|preset| {
                preset
                    .step(step_slug)
                    .map(|step| !step.close_on_element_unmount)
            })
            .unwrap_or(false);
        if keep_open || !self.inner.hints.is_open_for(step_slug) {
            return Ok(());
        }
        self.close_hint_with(Some(step_slug), false).await.map(|_| ())
    }

    /// The hint that may show for `step_slug` right now, if any.
    fn eligible_hint(&self, step_slug: &str) -> Option<HintParams> {
        let element = {
            let session = lock(&self.inner.session);
            if session.shown.contains(step_slug) {
                return None;
            }
            session
                .reached
                .iter()
                .find(|(step, _)| step == step_slug)
                .map(|(_, element)| Arc::clone(element))?
        };
        if self.inner.hints.is_open() {
            return None;
        }
        if !element.is_connected() {
            self.forget_reached(step_slug);
            return None;
        }

        let preset = self.find_preset_for_step(step_slug)?;
        let snapshot = self.get_snapshot();
        let base = &snapshot.base;
        if !contains_slug(&base.active_presets, &preset.slug)
            || !base.wizard_state.allows_hints()
            || !base.enabled
        {
            return None;
        }

        let progress = snapshot.progress.as_ref()?;
        let passed = progress.passed_steps(&preset.slug);
        if passed.iter().any(|step| step == step_slug) {
            self.forget_reached(step_slug);
            return None;
        }
        if find_next_unpassed_step(&preset.step_slugs(), passed) != Some(step_slug) {
            return None;
        }

        Some(HintParams {
            preset: preset.slug.clone(),
            step: step_slug.to_string(),
            element,
        })
    }

    fn forget_reached(&self, step_slug: &str) {
        lock(&self.inner.session)
            .reached
            .retain(|(step, _)| step != step_slug);
    }

    /// Show the hint for `step_slug` if it is eligible and no listener vetoes.
    fn try_show_hint<'a>(&'a self, step_slug: &'a str) -> BoxFuture<'a, Result<bool>> {
        async move {
            let Some(params) = self.eligible_hint(step_slug) else {
                return Ok(false);
            };
            if self
                .emit(OnboardingEvent::BeforeShowHint(params.clone()))
                .await?
                .is_veto()
            {
                self.inner
                    .logger
                    .debug(format!("Hint for {step_slug} was vetoed"));
                return Ok(false);
            }
            // Listeners may have opened another hint meanwhile.
            if self.inner.hints.is_open() {
                return Ok(false);
            }
            {
                let mut session = lock(&self.inner.session);
                if !session.shown.insert(step_slug.to_string()) {
                    return Ok(false);
                }
                session.reached.retain(|(step, _)| step != step_slug);
            }

            self.inner.hints.show(params.clone());
            if let Some(show_hint) = &self.inner.show_hint {
                show_hint(&params);
            }
            self.inner.logger.debug(format!(
                "Showing hint {step_slug} of {}",
                params.preset
            ));
            self.emit(OnboardingEvent::ShowHint(params.clone())).await?;

            let pass_on_show = self
                .inner
                .registry
                .get(&params.preset)
                .and_then(|preset| {
                    preset
                        .step(step_slug)
                        .map(|step| step.pass_mode == PassMode::OnShowHint)
                })
                .unwrap_or(false);
            if pass_on_show {
                self.pass_step(step_slug).await?;
            }
            Ok(true)
        }
        .boxed()
    }

    /// Surface the first parked anchor that became eligible.
    async fn reveal_reached_hints(&self) -> Result<()> {
        let pending: Vec<String> = lock(&self.inner.session)
            .reached
            .iter()
            .map(|(step, _)| step.clone())
            .collect();
        for step in pending {
            if self.inner.hints.is_open() {
                break;
            }
            if self.try_show_hint(&step).await? {
                break;
            }
        }
        Ok(())
    }

    // ── Hints ───────────────────────────────────────────────────────

    /// Close the open hint (only if it is for `step`, when given).
    pub async fn close_hint(&self, step: Option<&str>) -> Result<()> {
        self.close_hint_with(step, false).await.map(|_| ())
    }

    /// Same as [`close_hint`](Self::close_hint), reported as a user action.
    pub async fn close_hint_by_user(&self, step: Option<&str>) -> Result<()> {
        self.close_hint_with(step, true).await.map(|_| ())
    }

    async fn close_hint_with(&self, step: Option<&str>, by_user: bool) -> Result<bool> {
        let Some(closed) = self.inner.hints.close(step) else {
            return Ok(false);
        };

        let hooks = self
            .inner
            .registry
            .get(&closed.preset)
            .and_then(|preset| preset.step(&closed.step).map(|step| step.hooks.clone()));
        let hook = hooks.as_ref().and_then(|hooks| {
            if by_user {
                hooks.on_close_hint_by_user.as_ref()
            } else {
                hooks.on_close_hint.as_ref()
            }
        });
        self.run_hook(hook, &closed.preset, Some(&closed.step)).await;

        let event = if by_user {
            OnboardingEvent::CloseHintByUser {
                preset: closed.preset,
                step: closed.step,
            }
        } else {
            OnboardingEvent::CloseHint {
                preset: closed.preset,
                step: closed.step,
            }
        };
        self.emit(event).await?;

        self.reveal_reached_hints().await?;
        Ok(true)
    }

    async fn close_hint_of_presets(&self, presets: &[String]) -> Result<()> {
        let open_step = self
            .inner
            .hints
            .current()
            .filter(|hint| presets.contains(&hint.preset))
            .map(|hint| hint.step);
        if let Some(step) = open_step {
            self.close_hint_with(Some(&step), false).await?;
        }
        Ok(())
    }

    // ── Presets ─────────────────────────────────────────────────────

    /// Make presets available. Unknown slugs are ignored.
    pub async fn add_preset(&self, slugs: &[&str]) -> Result<()> {
        let base = self.base();
        let mut fresh: Vec<String> = Vec::new();
        for slug in slugs {
            if !self.inner.registry.contains(slug) {
                self.inner.logger.debug(format!("Ignoring unknown preset {slug}"));
                continue;
            }
            if !contains_slug(&base.available_presets, slug) {
                push_unique(&mut fresh, slug);
            }
        }
        if fresh.is_empty() {
            return Ok(());
        }

        self.inner.state.update(|s| {
            let base = Arc::make_mut(&mut s.base);
            for slug in &fresh {
                push_unique(&mut base.available_presets, slug);
            }
        });
        for preset in fresh {
            self.emit(OnboardingEvent::AddPreset { preset }).await?;
        }
        self.save_state().await
    }

    /// Activate a preset. Fails on unknown slugs; no-op when already active.
    pub async fn run_preset(&self, slug: &str) -> Result<()> {
        let preset = self.preset(slug)?;
        let PresetKind::Combined(combined) = &preset.kind else {
            let activation = self.activate(&preset).await?;
            return self.save_activation(activation).await;
        };

        let base = self.base();
        if combined
            .internal_presets
            .iter()
            .any(|target| contains_slug(&base.active_presets, target))
        {
            self.inner
                .logger
                .debug(format!("Combined preset {slug} is already running"));
            return Ok(());
        }

        self.run_hook(preset.hooks.on_before_start.as_ref(), slug, None)
            .await;
        self.emit(OnboardingEvent::BeforeRunPreset {
            preset: slug.to_string(),
        })
        .await?;

        let target = self.resolve_combined(slug, combined).await;
        let target = self.preset(&target)?;
        let activation = self.activate(&target).await?;

        self.inner.state.update(|s| {
            let base = Arc::make_mut(&mut s.base);
            push_unique(&mut base.available_presets, slug);
            push_unique(&mut base.suggested_presets, slug);
        });
        self.run_hook(preset.hooks.on_start.as_ref(), slug, None).await;
        self.emit(OnboardingEvent::RunPreset {
            preset: slug.to_string(),
        })
        .await?;

        match activation {
            Activation::Restarted => self.save_all().await,
            _ => self.save_state().await,
        }
    }

    async fn save_activation(&self, activation: Activation) -> Result<()> {
        match activation {
            Activation::Unchanged => Ok(()),
            Activation::Started => self.save_state().await,
            Activation::Restarted => self.save_all().await,
        }
    }

    /// Activation of a common or internal preset. A finished preset starts
    /// over with no passed steps.
    async fn activate(&self, preset: &Preset) -> Result<Activation> {
        if contains_slug(&self.base().active_presets, &preset.slug) {
            self.inner
                .logger
                .debug(format!("Preset {} is already running", preset.slug));
            return Ok(Activation::Unchanged);
        }

        self.run_hook(preset.hooks.on_before_start.as_ref(), &preset.slug, None)
            .await;
        self.emit(OnboardingEvent::BeforeRunPreset {
            preset: preset.slug.clone(),
        })
        .await?;

        self.ensure_running().await;
        let activation = self.inner.state.update(|s| {
            let base = Arc::make_mut(&mut s.base);
            push_unique(&mut base.available_presets, &preset.slug);
            push_unique(&mut base.suggested_presets, &preset.slug);
            base.enabled = true;
            if !push_unique(&mut base.active_presets, &preset.slug) {
                return Activation::Unchanged;
            }
            match s.progress.as_mut() {
                Some(progress) if progress.is_finished(&preset.slug) => {
                    Arc::make_mut(progress).reset(&preset.slug);
                    Activation::Restarted
                }
                _ => Activation::Started,
            }
        });
        match activation {
            Activation::Unchanged => return Ok(activation),
            Activation::Restarted => {
                let mut session = lock(&self.inner.session);
                for step in &preset.steps {
                    session.shown.remove(&step.slug);
                }
            }
            Activation::Started => {}
        }
        self.inner
            .logger
            .debug(format!("Running preset {}", preset.slug));

        self.run_hook(preset.hooks.on_start.as_ref(), &preset.slug, None)
            .await;
        self.emit(OnboardingEvent::RunPreset {
            preset: preset.slug.clone(),
        })
        .await?;
        self.reveal_reached_hints().await?;
        Ok(activation)
    }

    /// Finish a preset. Combined presets finish their resolved internal
    /// target. With `should_save == false` the caller owns persistence.
    pub async fn finish_preset(&self, slug: &str, should_save: bool) -> Result<()> {
        let preset = self.preset(slug)?;
        self.run_hook(preset.hooks.on_end.as_ref(), slug, None).await;
        self.emit(OnboardingEvent::FinishPreset {
            preset: slug.to_string(),
        })
        .await?;

        self.ensure_running().await;
        let target = match &preset.kind {
            PresetKind::Combined(combined) => self.resolve_combined(slug, combined).await,
            _ => preset.slug.clone(),
        };

        let finished = self.inner.state.update(|s| {
            let Some(progress) = s.progress.as_mut() else {
                return false;
            };
            Arc::make_mut(progress).finish(&target);
            Arc::make_mut(&mut s.base)
                .active_presets
                .retain(|active| *active != target);
            true
        });
        if !finished {
            self.inner
                .logger
                .error(format!("Progress is not loaded, cannot finish {slug}"));
            return Ok(());
        }
        self.inner.logger.debug(format!("Finished preset {target}"));

        self.close_hint_of_presets(std::slice::from_ref(&target))
            .await?;
        if should_save {
            self.save_all().await?;
        }
        Ok(())
    }

    /// Forget progress of the listed presets and deactivate them.
    pub async fn reset_preset_progress(&self, slugs: &[&str]) -> Result<()> {
        self.ensure_running().await;

        let mut targets: Vec<String> = Vec::new();
        let mut combined_slugs: Vec<String> = Vec::new();
        for slug in slugs {
            let Some(preset) = self.inner.registry.get(slug) else {
                self.inner.logger.debug(format!("Ignoring unknown preset {slug}"));
                continue;
            };
            match &preset.kind {
                PresetKind::Combined(combined) => {
                    combined_slugs.push(preset.slug.clone());
                    for target in &combined.internal_presets {
                        push_unique(&mut targets, target);
                    }
                }
                _ => {
                    push_unique(&mut targets, &preset.slug);
                }
            }
        }
        if targets.is_empty() {
            return Ok(());
        }

        self.inner.state.update(|s| {
            Arc::make_mut(&mut s.base)
                .active_presets
                .retain(|active| !targets.contains(active));
            if let Some(progress) = s.progress.as_mut() {
                let progress = Arc::make_mut(progress);
                for target in &targets {
                    progress.reset(target);
                }
            }
        });

        {
            let mut session = lock(&self.inner.session);
            for target in &targets {
                if let Some(preset) = self.inner.registry.get(target) {
                    for step in &preset.steps {
                        session.shown.remove(&step.slug);
                    }
                }
            }
            for slug in &combined_slugs {
                session.combined_targets.remove(slug);
            }
        }

        self.close_hint_of_presets(&targets).await?;
        self.save_all().await
    }

    /// Reset every available preset except always-hidden ones.
    pub async fn reset_all_presets_progress(&self) -> Result<()> {
        let base = self.base();
        let registry = &self.inner.registry;
        let slugs: Vec<&str> = base
            .available_presets
            .iter()
            .filter(|slug| {
                let Some(preset) = registry.get(slug) else {
                    return false;
                };
                preset.visibility != PresetVisibility::AlwaysHidden
                    && !registry
                        .combined_owners(slug)
                        .iter()
                        .any(|owner| owner.visibility == PresetVisibility::AlwaysHidden)
            })
            .map(String::as_str)
            .collect();
        self.reset_preset_progress(&slugs).await
    }

    /// Offer a preset once. Returns whether it was suggested now.
    pub async fn suggest_preset_once(
        &self,
        slug: &str,
        wizard_state: Option<WizardState>,
    ) -> Result<bool> {
        self.preset(slug)?;
        if contains_slug(&self.base().suggested_presets, slug) {
            self.inner
                .logger
                .debug(format!("Preset {slug} was already suggested"));
            return Ok(false);
        }
        let fresh = self.inner.state.update(|s| {
            push_unique(&mut Arc::make_mut(&mut s.base).suggested_presets, slug)
        });
        if !fresh {
            return Ok(false);
        }

        self.emit(OnboardingEvent::BeforeSuggestPreset {
            preset: slug.to_string(),
        })
        .await?;
        self.set_wizard_state(wizard_state.unwrap_or(WizardState::Visible))
            .await?;
        self.run_preset(slug).await?;
        Ok(true)
    }

    // ── Wizard / flags ──────────────────────────────────────────────

    pub async fn set_wizard_state(&self, wizard_state: WizardState) -> Result<()> {
        let previous = self.base().wizard_state;
        if previous == wizard_state {
            return Ok(());
        }
        self.inner
            .state
            .update(|s| Arc::make_mut(&mut s.base).wizard_state = wizard_state);
        self.emit(OnboardingEvent::WizardStateChanged { wizard_state })
            .await?;

        if !wizard_state.allows_hints() && self.inner.config.close_hint_on_wizard_hide {
            self.close_hint_with(None, false).await?;
        }
        if wizard_state.allows_hints() && !previous.allows_hints() {
            self.ensure_running().await;
            self.reveal_reached_hints().await?;
        }
        self.save_state().await
    }

    pub fn is_enabled(&self) -> bool {
        self.base().enabled
    }

    pub async fn set_enabled(&self, enabled: bool) -> Result<()> {
        if self.is_enabled() == enabled {
            return Ok(());
        }
        self.inner
            .state
            .update(|s| Arc::make_mut(&mut s.base).enabled = enabled);
        if !enabled {
            self.close_hint_with(None, false).await?;
        }
        self.save_state().await
    }

    /// Adopt base state synced from elsewhere (another tab) without
    /// persisting it again.
    pub async fn replace_base_state(&self, base: BaseState) -> Result<()> {
        if *self.base() == base {
            return Ok(());
        }
        self.inner.state.update(|s| s.base = Arc::new(base));

        let snapshot = self.get_snapshot();
        let stale = self
            .inner
            .hints
            .current()
            .filter(|hint| !contains_slug(&snapshot.base.active_presets, &hint.preset));
        if let Some(hint) = stale {
            self.close_hint_with(Some(&hint.step), false).await?;
        }
        if snapshot.base.wizard_state.allows_hints() {
            self.reveal_reached_hints().await?;
        }
        Ok(())
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// Presets to list to the user, in availability order.
    pub fn user_presets(&self) -> Vec<String> {
        let snapshot = self.get_snapshot();
        snapshot
            .base
            .available_presets
            .iter()
            .filter(|slug| {
                let Some(preset) = self.inner.registry.get(slug) else {
                    return false;
                };
                if preset.is_internal() {
                    return false;
                }
                match preset.visibility {
                    PresetVisibility::Visible => true,
                    PresetVisibility::AlwaysHidden => false,
                    PresetVisibility::InitialHidden => self.is_touched(&snapshot, &preset),
                }
            })
            .cloned()
            .collect()
    }

    fn is_touched(&self, snapshot: &OnboardingSnapshot, preset: &Preset) -> bool {
        self.known_target(preset).iter().any(|target| {
            contains_slug(&snapshot.base.active_presets, target)
                || snapshot
                    .progress
                    .as_ref()
                    .is_some_and(|progress| progress.is_touched(target))
        })
    }

    pub fn is_preset_finished(&self, slug: &str) -> bool {
        let Some(preset) = self.inner.registry.get(slug) else {
            return false;
        };
        let Some(progress) = self.progress() else {
            return false;
        };
        self.known_target(&preset)
            .iter()
            .any(|target| progress.is_finished(target))
    }

    pub fn passed_steps(&self, slug: &str) -> Vec<String> {
        let Some(preset) = self.inner.registry.get(slug) else {
            return Vec::new();
        };
        let Some(progress) = self.progress() else {
            return Vec::new();
        };
        self.known_target(&preset)
            .first()
            .map(|target| progress.passed_steps(target).to_vec())
            .unwrap_or_default()
    }

    /// Next step to work on for `slug` under current progress.
    pub fn next_step_of(&self, slug: &str) -> Option<String> {
        let preset = self.inner.registry.get(slug)?;
        let target = self.known_target(&preset).into_iter().next()?;
        let target = self.inner.registry.get(&target)?;
        let progress = self.progress().unwrap_or_default();
        find_next_unpassed_step(&target.step_slugs(), progress.passed_steps(&target.slug))
            .map(str::to_string)
    }
}

impl std::fmt::Debug for Onboarding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Onboarding")
            .field("presets", &self.inner.registry.len())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for WeakOnboarding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakOnboarding")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::onboarding::hint::VirtualElement;
    use crate::onboarding::model::Step;
    use crate::onboarding::storage::MemoryOnboardingStorage;

    fn intro() -> Preset {
        Preset::common("intro", vec![Step::new("a"), Step::new("b")])
    }

    fn build(presets: Vec<Preset>) -> (Onboarding, Arc<MemoryOnboardingStorage>) {
        let storage = Arc::new(MemoryOnboardingStorage::new());
        let onboarding = Onboarding::new(OnboardingOptions::new(presets, storage.clone())).unwrap();
        (onboarding, storage)
    }

    fn element(id: &str) -> ElementRef {
        VirtualElement::new(id)
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_loads_share_one_fetch() {
        let (onboarding, storage) = build(vec![intro()]);
        let inits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&inits);
        onboarding.on(OnboardingEventKind::Init, move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Flow::Continue
        });

        tokio::join!(onboarding.ensure_running(), onboarding.ensure_running());
        onboarding.ensure_running().await;

        assert_eq!(storage.fetch_calls(), 1);
        assert_eq!(inits.load(Ordering::SeqCst), 1);
        assert_eq!(onboarding.status(), ControllerStatus::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fetch_stays_idle_and_retries() {
        let (onboarding, storage) = build(vec![intro()]);
        storage.set_fail_fetch(true);
        onboarding.ensure_running().await;
        assert_eq!(onboarding.status(), ControllerStatus::Idle);

        storage.set_fail_fetch(false);
        onboarding.ensure_running().await;
        assert_eq!(onboarding.status(), ControllerStatus::Active);
        assert_eq!(storage.fetch_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn steps_of_idle_presets_are_ignored() {
        let (onboarding, storage) = build(vec![intro()]);
        onboarding.pass_step("a").await.unwrap();
        assert_eq!(storage.fetch_calls(), 0);
        assert!(onboarding.passed_steps("intro").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn parked_anchor_shows_after_previous_hint_closes() {
        let (onboarding, _storage) = build(vec![intro()]);
        onboarding.run_preset("intro").await.unwrap();
        onboarding.set_wizard_state(WizardState::Visible).await.unwrap();

        onboarding.step_element_reached("a", element("a")).await.unwrap();
        onboarding.step_element_reached("b", element("b")).await.unwrap();
        assert_eq!(onboarding.current_hint().map(|h| h.step).as_deref(), Some("a"));

        onboarding.pass_step("a").await.unwrap();
        assert_eq!(onboarding.current_hint().map(|h| h.step).as_deref(), Some("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn hidden_wizard_suppresses_hints() {
        let (onboarding, _storage) = build(vec![intro()]);
        onboarding.run_preset("intro").await.unwrap();
        onboarding.step_element_reached("a", element("a")).await.unwrap();
        assert!(onboarding.current_hint().is_none());

        onboarding.set_wizard_state(WizardState::Collapsed).await.unwrap();
        onboarding.step_element_reached("a", element("a")).await.unwrap();
        assert!(onboarding.current_hint().is_some());

        onboarding.set_wizard_state(WizardState::Hidden).await.unwrap();
        assert!(onboarding.current_hint().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn detached_anchor_is_not_shown() {
        let (onboarding, _storage) = build(vec![intro()]);
        onboarding.run_preset("intro").await.unwrap();
        onboarding.set_wizard_state(WizardState::Visible).await.unwrap();

        let anchor = VirtualElement::new("a");
        anchor.detach();
        onboarding.step_element_reached("a", anchor).await.unwrap();
        assert!(onboarding.current_hint().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn pass_on_show_keeps_hint_open_and_advances() {
        let preset = Preset::common(
            "intro",
            vec![Step::new("a").pass_on_show_hint(), Step::new("b")],
        );
        let (onboarding, storage) = build(vec![preset]);
        onboarding.run_preset("intro").await.unwrap();
        onboarding.set_wizard_state(WizardState::Visible).await.unwrap();

        onboarding.step_element_reached("a", element("a")).await.unwrap();
        assert_eq!(onboarding.passed_steps("intro"), vec!["a"]);
        assert!(onboarding.hint_store().is_open_for("a"));
        assert_eq!(storage.saved_progress().passed_steps("intro"), ["a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn unmount_closes_unless_step_keeps_hint() {
        let preset = Preset::common("intro", vec![Step::new("a").keep_hint_on_unmount(), Step::new("b")]);
        let (onboarding, _storage) = build(vec![preset]);
        onboarding.run_preset("intro").await.unwrap();
        onboarding.set_wizard_state(WizardState::Visible).await.unwrap();

        onboarding.step_element_reached("a", element("a")).await.unwrap();
        onboarding.step_element_disappeared("a").await.unwrap();
        assert!(onboarding.hint_store().is_open_for("a"));

        onboarding.pass_step("a").await.unwrap();
        onboarding.step_element_reached("b", element("b")).await.unwrap();
        onboarding.step_element_disappeared("b").await.unwrap();
        assert!(onboarding.current_hint().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_combined_pick_falls_back_to_first_candidate() {
        let presets = vec![
            Preset::internal("flow-a", vec![Step::new("a1")]),
            Preset::internal("flow-b", vec![Step::new("b1")]),
            Preset::combined(
                "flow",
                CombinedPreset::new(vec!["flow-a".into(), "flow-b".into()], |_| async {
                    "missing".to_string()
                }),
            ),
        ];
        let (onboarding, _storage) = build(presets);
        onboarding.run_preset("flow").await.unwrap();

        let base = onboarding.get_snapshot().base.clone();
        assert_eq!(base.active_presets, vec!["flow-a"]);
        assert_eq!(onboarding.next_step_of("flow").as_deref(), Some("a1"));
        assert_eq!(onboarding.user_presets(), vec!["flow"]);
    }

    #[tokio::test(start_paused = true)]
    async fn visibility_filters_user_presets_and_bulk_reset() {
        let presets = vec![
            intro(),
            Preset::common("later", vec![Step::new("l1")])
                .with_visibility(PresetVisibility::InitialHidden),
            Preset::common("secret", vec![Step::new("s1")])
                .with_visibility(PresetVisibility::AlwaysHidden),
        ];
        let (onboarding, _storage) = build(presets);
        onboarding.add_preset(&["intro", "later", "secret", "unknown"]).await.unwrap();
        assert_eq!(onboarding.user_presets(), vec!["intro"]);

        onboarding.run_preset("later").await.unwrap();
        onboarding.run_preset("secret").await.unwrap();
        onboarding.pass_step("s1").await.unwrap();
        assert_eq!(onboarding.user_presets(), vec!["intro", "later"]);

        onboarding.reset_all_presets_progress().await.unwrap();
        assert!(onboarding.is_preset_finished("secret"));
        assert!(onboarding.get_snapshot().base.active_presets.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rerunning_a_finished_preset_starts_it_over() {
        let (onboarding, storage) = build(vec![intro()]);
        onboarding.run_preset("intro").await.unwrap();
        onboarding.set_wizard_state(WizardState::Visible).await.unwrap();
        onboarding.step_element_reached("a", element("a")).await.unwrap();
        onboarding.pass_step("a").await.unwrap();
        onboarding.pass_step("b").await.unwrap();
        assert!(onboarding.is_preset_finished("intro"));
        let progress_saves = storage.progress_saves();

        onboarding.run_preset("intro").await.unwrap();
        let snapshot = onboarding.get_snapshot();
        let progress = snapshot.progress.as_ref().unwrap();
        assert_eq!(snapshot.base.active_presets, vec!["intro"]);
        assert!(!progress.is_finished("intro"));
        assert!(progress.passed_steps("intro").is_empty());
        assert_eq!(onboarding.next_step_of("intro").as_deref(), Some("a"));
        assert_eq!(storage.progress_saves(), progress_saves + 1);
        assert!(storage.saved_progress().finished_presets.is_empty());

        onboarding.step_element_reached("a", element("a")).await.unwrap();
        assert!(onboarding.hint_store().is_open_for("a"));
        onboarding.pass_step("a").await.unwrap();
        onboarding.pass_step("b").await.unwrap();
        assert!(onboarding.is_preset_finished("intro"));
    }

    #[tokio::test(start_paused = true)]
    async fn rerunning_a_finished_combined_preset_restarts_its_target() {
        let presets = vec![
            Preset::internal("flow-a", vec![Step::new("a1")]),
            Preset::combined(
                "flow",
                CombinedPreset::fixed(vec!["flow-a".into()], "flow-a"),
            ),
        ];
        let (onboarding, _storage) = build(presets);
        onboarding.run_preset("flow").await.unwrap();
        onboarding.pass_step("a1").await.unwrap();
        assert!(onboarding.is_preset_finished("flow"));

        onboarding.run_preset("flow").await.unwrap();
        let snapshot = onboarding.get_snapshot();
        assert_eq!(snapshot.base.active_presets, vec!["flow-a"]);
        assert!(snapshot.progress.as_ref().unwrap().finished_presets.is_empty());
        assert!(!onboarding.is_preset_finished("flow"));
    }

    #[tokio::test(start_paused = true)]
    async fn running_an_active_preset_saves_nothing() {
        let (onboarding, storage) = build(vec![intro()]);
        onboarding.run_preset("intro").await.unwrap();
        assert_eq!(storage.state_saves(), 1);

        onboarding.run_preset("intro").await.unwrap();
        assert_eq!(storage.state_saves(), 1);
        assert_eq!(storage.progress_saves(), 0);
    }

    fn sharing_presets() -> Vec<Preset> {
        vec![
            Preset::common("first", vec![Step::new("shared"), Step::new("f2")]),
            Preset::common("second", vec![Step::new("shared"), Step::new("s2")]),
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn shared_step_goes_to_the_first_active_owner() {
        let (onboarding, _storage) = build(sharing_presets());
        onboarding.run_preset("first").await.unwrap();
        onboarding.run_preset("second").await.unwrap();
        onboarding.pass_step("shared").await.unwrap();
        assert_eq!(onboarding.passed_steps("first"), vec!["shared"]);
        assert!(onboarding.passed_steps("second").is_empty());

        // Activation order wins over catalog order.
        let (onboarding, _storage) = build(sharing_presets());
        onboarding.run_preset("second").await.unwrap();
        onboarding.run_preset("first").await.unwrap();
        onboarding.pass_step("shared").await.unwrap();
        assert_eq!(onboarding.passed_steps("second"), vec!["shared"]);
        assert!(onboarding.passed_steps("first").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shared_step_goes_to_the_only_active_owner() {
        let (onboarding, _storage) = build(sharing_presets());
        onboarding.run_preset("second").await.unwrap();
        onboarding.pass_step("shared").await.unwrap();
        assert_eq!(onboarding.passed_steps("second"), vec!["shared"]);
        assert!(onboarding.passed_steps("first").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_preset_is_an_error_for_run_and_suggest() {
        let (onboarding, _storage) = build(vec![intro()]);
        assert_eq!(
            onboarding.run_preset("nope").await,
            Err(Error::UnknownPreset("nope".into()))
        );
        assert!(onboarding.suggest_preset_once("nope", None).await.is_err());
    }
}
