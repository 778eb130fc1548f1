//! Preset and step definitions.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};

use super::controller::Onboarding;

/// When a step counts as passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PassMode {
    /// An explicit `pass_step` call marks it passed.
    #[default]
    OnAction,
    /// Passed the moment its hint is shown.
    OnShowHint,
}

/// Extra admission rule for `pass_step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PassRestriction {
    /// Only passable when it is exactly the next unpassed step.
    AfterPrevious,
}

/// Whether a preset shows up in user-facing listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PresetVisibility {
    #[default]
    Visible,
    /// Hidden until the user has touched it.
    InitialHidden,
    /// Never listed and exempt from bulk reset.
    AlwaysHidden,
}

/// Arguments passed to preset and step hooks.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub preset: String,
    pub step: Option<String>,
    pub onboarding: Onboarding,
}

/// Async lifecycle hook.
pub type Hook = Arc<dyn Fn(HookContext) -> BoxFuture<'static, ()> + Send + Sync>;

/// Build a [`Hook`] from an async closure.
pub fn hook<F, Fut>(f: F) -> Hook
where
    F: Fn(HookContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |ctx| f(ctx).boxed())
}

/// Resolver choosing which internal preset a combined preset runs.
pub type PickPresetFn = Arc<dyn Fn(Onboarding) -> BoxFuture<'static, String> + Send + Sync>;

#[derive(Clone, Default)]
pub struct StepHooks {
    pub on_step_pass: Option<Hook>,
    pub on_close_hint: Option<Hook>,
    pub on_close_hint_by_user: Option<Hook>,
}

#[derive(Clone, Default)]
pub struct PresetHooks {
    /// Awaited before activation; may delay it.
    pub on_before_start: Option<Hook>,
    pub on_start: Option<Hook>,
    pub on_end: Option<Hook>,
}

fn hook_names(hooks: &[(&'static str, bool)]) -> Vec<&'static str> {
    hooks
        .iter()
        .filter(|(_, present)| *present)
        .map(|(name, _)| *name)
        .collect()
}

impl std::fmt::Debug for StepHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(hook_names(&[
                ("on_step_pass", self.on_step_pass.is_some()),
                ("on_close_hint", self.on_close_hint.is_some()),
                ("on_close_hint_by_user", self.on_close_hint_by_user.is_some()),
            ]))
            .finish()
    }
}

impl std::fmt::Debug for PresetHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(hook_names(&[
                ("on_before_start", self.on_before_start.is_some()),
                ("on_start", self.on_start.is_some()),
                ("on_end", self.on_end.is_some()),
            ]))
            .finish()
    }
}

/// A single anchor-bound point of a preset.
#[derive(Debug, Clone)]
pub struct Step {
    pub slug: String,
    /// Opaque payload handed to the renderer.
    pub hint: Option<serde_json::Value>,
    pub pass_restriction: Option<PassRestriction>,
    pub pass_mode: PassMode,
    /// Close the open hint when the anchor unmounts.
    pub close_on_element_unmount: bool,
    pub hooks: StepHooks,
}

impl Step {
    pub fn new(slug: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            hint: None,
            pass_restriction: None,
            pass_mode: PassMode::OnAction,
            close_on_element_unmount: true,
            hooks: StepHooks::default(),
        }
    }

    pub fn with_hint(mut self, hint: serde_json::Value) -> Self {
        self.hint = Some(hint);
        self
    }

    pub fn after_previous(mut self) -> Self {
        self.pass_restriction = Some(PassRestriction::AfterPrevious);
        self
    }

    pub fn pass_on_show_hint(mut self) -> Self {
        self.pass_mode = PassMode::OnShowHint;
        self
    }

    pub fn keep_hint_on_unmount(mut self) -> Self {
        self.close_on_element_unmount = false;
        self
    }

    pub fn on_step_pass(mut self, hook: Hook) -> Self {
        self.hooks.on_step_pass = Some(hook);
        self
    }

    pub fn on_close_hint(mut self, hook: Hook) -> Self {
        self.hooks.on_close_hint = Some(hook);
        self
    }

    pub fn on_close_hint_by_user(mut self, hook: Hook) -> Self {
        self.hooks.on_close_hint_by_user = Some(hook);
        self
    }
}

/// Router half of a combined preset.
#[derive(Clone)]
pub struct CombinedPreset {
    /// Candidate targets; each must be an internal preset.
    pub internal_presets: Vec<String>,
    pub pick_preset: PickPresetFn,
}

impl CombinedPreset {
    pub fn new<F, Fut>(internal_presets: Vec<String>, pick: F) -> Self
    where
        F: Fn(Onboarding) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = String> + Send + 'static,
    {
        Self {
            internal_presets,
            pick_preset: Arc::new(move |onboarding| pick(onboarding).boxed()),
        }
    }

    /// Always resolves to `target`.
    pub fn fixed(internal_presets: Vec<String>, target: impl Into<String>) -> Self {
        let target = target.into();
        Self::new(internal_presets, move |_| {
            let target = target.clone();
            async move { target }
        })
    }
}

impl std::fmt::Debug for CombinedPreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CombinedPreset")
            .field("internal_presets", &self.internal_presets)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub enum PresetKind {
    /// Ordinary sequential tour.
    Common,
    /// Same shape as common, never listed; target of combined presets.
    Internal,
    /// Delegates all step/progress behavior to one internal preset.
    Combined(CombinedPreset),
}

/// A named, ordered tour of steps.
#[derive(Debug, Clone)]
pub struct Preset {
    pub slug: String,
    pub name: String,
    pub kind: PresetKind,
    pub visibility: PresetVisibility,
    pub steps: Vec<Step>,
    pub hooks: PresetHooks,
}

impl Preset {
    pub fn common(slug: impl Into<String>, steps: Vec<Step>) -> Self {
        Self::with_kind(slug, PresetKind::Common, steps)
    }

    pub fn internal(slug: impl Into<String>, steps: Vec<Step>) -> Self {
        Self::with_kind(slug, PresetKind::Internal, steps)
    }

    pub fn combined(slug: impl Into<String>, combined: CombinedPreset) -> Self {
        Self::with_kind(slug, PresetKind::Combined(combined), Vec::new())
    }

    fn with_kind(slug: impl Into<String>, kind: PresetKind, steps: Vec<Step>) -> Self {
        let slug = slug.into();
        Self {
            name: slug.clone(),
            slug,
            kind,
            visibility: PresetVisibility::Visible,
            steps,
            hooks: PresetHooks::default(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_visibility(mut self, visibility: PresetVisibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn on_before_start(mut self, hook: Hook) -> Self {
        self.hooks.on_before_start = Some(hook);
        self
    }

    pub fn on_start(mut self, hook: Hook) -> Self {
        self.hooks.on_start = Some(hook);
        self
    }

    pub fn on_end(mut self, hook: Hook) -> Self {
        self.hooks.on_end = Some(hook);
        self
    }

    pub fn is_combined(&self) -> bool {
        matches!(self.kind, PresetKind::Combined(_))
    }

    pub fn is_internal(&self) -> bool {
        matches!(self.kind, PresetKind::Internal)
    }

    pub fn step(&self, slug: &str) -> Option<&Step> {
        self.steps.iter().find(|step| step.slug == slug)
    }

    pub fn has_step(&self, slug: &str) -> bool {
        self.step(slug).is_some()
    }

    /// Step slugs in declared order.
    pub fn step_slugs(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.slug.as_str()).collect()
    }
}
