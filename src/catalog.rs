//! JSON catalog: presets, promo groups, and controller configs in one
//! document, validated into registries in a single pass.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{OnboardingConfig, PromoManagerConfig};
use crate::error::CatalogError;
use crate::onboarding::{
    CombinedPreset, PassMode, PassRestriction, Preset, PresetRegistry, PresetVisibility, Step,
};
use crate::promo::{Condition, HelperCall, HelperRegistry, Priority, Promo, PromoGroup, PromoRegistry};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CatalogDef {
    pub onboarding: OnboardingConfig,
    pub promo_manager: PromoManagerConfig,
    pub presets: Vec<PresetDef>,
    pub promo_groups: Vec<PromoGroupDef>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PresetType {
    #[default]
    Common,
    Internal,
    Combined,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresetDef {
    pub slug: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: PresetType,
    #[serde(default)]
    pub visibility: PresetVisibility,
    #[serde(default)]
    pub steps: Vec<StepDef>,
    /// Combined only: candidate internal presets.
    #[serde(default)]
    pub internal_presets: Vec<String>,
    /// Combined only: the target to run; defaults to the first candidate.
    #[serde(default)]
    pub default_target: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDef {
    pub slug: String,
    #[serde(default)]
    pub hint: Option<Value>,
    #[serde(default)]
    pub pass_restriction: Option<PassRestriction>,
    #[serde(default)]
    pub pass_mode: PassMode,
    #[serde(default = "default_true")]
    pub close_on_element_unmount: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromoGroupDef {
    pub slug: String,
    #[serde(default)]
    pub conditions: Vec<HelperCall>,
    #[serde(default)]
    pub promos: Vec<PromoDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromoDef {
    pub slug: String,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub conditions: Vec<HelperCall>,
    #[serde(default)]
    pub meta: Option<Value>,
}

impl StepDef {
    fn to_step(&self) -> Step {
        Step {
            hint: self.hint.clone(),
            pass_restriction: self.pass_restriction,
            pass_mode: self.pass_mode,
            close_on_element_unmount: self.close_on_element_unmount,
            ..Step::new(self.slug.clone())
        }
    }
}

impl PresetDef {
    fn to_preset(&self) -> Result<Preset, CatalogError> {
        let steps = self.steps.iter().map(StepDef::to_step).collect();
        let preset = match self.kind {
            PresetType::Common => Preset::common(self.slug.clone(), steps),
            PresetType::Internal => Preset::internal(self.slug.clone(), steps),
            PresetType::Combined => {
                let target = match &self.default_target {
                    Some(target) if !self.internal_presets.contains(target) => {
                        return Err(CatalogError::InvalidDefaultTarget {
                            combined: self.slug.clone(),
                            target: target.clone(),
                        });
                    }
                    Some(target) => target.clone(),
                    None => match self.internal_presets.first() {
                        Some(first) => first.clone(),
                        None => return Err(CatalogError::EmptyCombined(self.slug.clone())),
                    },
                };
                Preset::combined(
                    self.slug.clone(),
                    CombinedPreset::fixed(self.internal_presets.clone(), target),
                )
            }
        };
        let preset = preset.with_visibility(self.visibility);
        Ok(match &self.name {
            Some(name) => preset.named(name.clone()),
            None => preset,
        })
    }
}

fn conditions(calls: &[HelperCall]) -> Vec<Condition> {
    calls.iter().cloned().map(Condition::from).collect()
}

impl PromoGroupDef {
    fn to_group(&self) -> PromoGroup {
        PromoGroup {
            slug: self.slug.clone(),
            conditions: conditions(&self.conditions),
            promos: self
                .promos
                .iter()
                .map(|def| Promo {
                    slug: def.slug.clone(),
                    priority: def.priority,
                    conditions: conditions(&def.conditions),
                    meta: def.meta.clone(),
                })
                .collect(),
        }
    }
}

impl CatalogDef {
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        serde_json::from_str(json).map_err(|e| CatalogError::Parse(e.to_string()))
    }

    pub fn presets(&self) -> Result<Vec<Preset>, CatalogError> {
        self.presets.iter().map(PresetDef::to_preset).collect()
    }

    pub fn promo_groups(&self) -> Vec<PromoGroup> {
        self.promo_groups.iter().map(PromoGroupDef::to_group).collect()
    }

    pub fn preset_registry(&self) -> Result<PresetRegistry, CatalogError> {
        PresetRegistry::new(self.presets()?)
    }

    pub fn promo_registry(&self, helpers: &HelperRegistry) -> Result<PromoRegistry, CatalogError> {
        PromoRegistry::new(self.promo_groups(), helpers)
    }
}
