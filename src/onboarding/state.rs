//! Onboarding state: persisted base/progress and the published snapshot.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Visibility of the host's wizard panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WizardState {
    #[default]
    Hidden,
    Collapsed,
    Visible,
    Invisible,
}

impl WizardState {
    /// Hints may display in every state except `Hidden`.
    pub fn allows_hints(self) -> bool {
        self != Self::Hidden
    }
}

impl std::fmt::Display for WizardState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Hidden => "hidden",
            Self::Collapsed => "collapsed",
            Self::Visible => "visible",
            Self::Invisible => "invisible",
        };
        write!(f, "{s}")
    }
}

/// Whether progress has been loaded at least once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerStatus {
    #[default]
    Idle,
    Active,
}

/// Persisted through `save_state`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BaseState {
    /// Ever-activated presets, ordered.
    pub available_presets: Vec<String>,
    /// Running presets; order is priority for step lookup.
    pub active_presets: Vec<String>,
    /// Presets offered at least once.
    pub suggested_presets: Vec<String>,
    pub wizard_state: WizardState,
    pub enabled: bool,
}

/// Persisted through `save_progress`. Missing fields load as empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProgressState {
    /// Preset slug → passed step slugs in pass order, deduplicated.
    pub preset_passed_steps: BTreeMap<String, Vec<String>>,
    pub finished_presets: Vec<String>,
}

impl ProgressState {
    pub fn passed_steps(&self, preset: &str) -> &[String] {
        self.preset_passed_steps
            .get(preset)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_step_passed(&self, preset: &str, step: &str) -> bool {
        self.passed_steps(preset).iter().any(|s| s == step)
    }

    pub fn is_finished(&self, preset: &str) -> bool {
        self.finished_presets.iter().any(|p| p == preset)
    }

    /// Append `step` unless already recorded. Returns whether it was added.
    pub fn pass_step(&mut self, preset: &str, step: &str) -> bool {
        let passed = self
            .preset_passed_steps
            .entry(preset.to_string())
            .or_default();
        push_unique(passed, step)
    }

    pub fn finish(&mut self, preset: &str) -> bool {
        push_unique(&mut self.finished_presets, preset)
    }

    /// Forget every trace of `preset`.
    pub fn reset(&mut self, preset: &str) {
        self.finished_presets.retain(|p| p != preset);
        self.preset_passed_steps.remove(preset);
    }

    pub fn is_touched(&self, preset: &str) -> bool {
        self.is_finished(preset) || !self.passed_steps(preset).is_empty()
    }
}

/// Published onboarding snapshot. Sub-trees sit behind `Arc` so a mutation
/// copies only what it touches.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingSnapshot {
    pub status: ControllerStatus,
    pub base: Arc<BaseState>,
    pub progress: Option<Arc<ProgressState>>,
}

/// Push `slug` if absent. Returns whether it was added.
pub(crate) fn push_unique(list: &mut Vec<String>, slug: &str) -> bool {
    if list.iter().any(|existing| existing == slug) {
        return false;
    }
    list.push(slug.to_string());
    true
}

pub(crate) fn contains_slug(list: &[String], slug: &str) -> bool {
    list.iter().any(|existing| existing == slug)
}

/// The step that should be worked on next.
///
/// Scanning from the end, returns the first step whose predecessor (in
/// declared order) is passed while the step itself is not. Passed slugs
/// unknown to `steps` are ignored. Falls back to the first step.
pub fn find_next_unpassed_step<'a, S, P>(steps: &'a [S], passed: &[P]) -> Option<&'a str>
where
    S: AsRef<str>,
    P: AsRef<str>,
{
    let is_passed = |slug: &str| passed.iter().any(|p| p.as_ref() == slug);
    (1..steps.len())
        .rev()
        .find(|&i| is_passed(steps[i - 1].as_ref()) && !is_passed(steps[i].as_ref()))
        .map(|i| steps[i].as_ref())
        .or_else(|| steps.first().map(AsRef::as_ref))
}
