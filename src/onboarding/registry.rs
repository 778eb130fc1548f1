//! Validated preset catalog.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::CatalogError;

use super::model::{Preset, PresetKind};

/// Preset catalog checked once at construction, so lookups never need to
/// re-validate references.
#[derive(Debug, Clone, Default)]
pub struct PresetRegistry {
    presets: Vec<Arc<Preset>>,
    index: HashMap<String, usize>,
}

impl PresetRegistry {
    /// Validate and index `presets`, keeping declaration order.
    pub fn new(presets: Vec<Preset>) -> Result<Self, CatalogError> {
        let mut index = HashMap::with_capacity(presets.len());
        for (position, preset) in presets.iter().enumerate() {
            if index.insert(preset.slug.clone(), position).is_some() {
                return Err(CatalogError::DuplicatePreset(preset.slug.clone()));
            }
            let mut seen = HashSet::new();
            for step in &preset.steps {
                if !seen.insert(step.slug.as_str()) {
                    return Err(CatalogError::DuplicateStep {
                        preset: preset.slug.clone(),
                        step: step.slug.clone(),
                    });
                }
            }
        }

        for preset in &presets {
            let PresetKind::Combined(combined) = &preset.kind else {
                continue;
            };
            if combined.internal_presets.is_empty() {
                return Err(CatalogError::EmptyCombined(preset.slug.clone()));
            }
            for target in &combined.internal_presets {
                let Some(&position) = index.get(target) else {
                    return Err(CatalogError::UnknownTarget {
                        combined: preset.slug.clone(),
                        target: target.clone(),
                    });
                };
                if !presets[position].is_internal() {
                    return Err(CatalogError::TargetNotInternal {
                        combined: preset.slug.clone(),
                        target: target.clone(),
                    });
                }
            }
        }

        Ok(Self {
            presets: presets.into_iter().map(Arc::new).collect(),
            index,
        })
    }

    pub fn get(&self, slug: &str) -> Option<Arc<Preset>> {
        self.index.get(slug).map(|&i| Arc::clone(&self.presets[i]))
    }

    pub fn contains(&self, slug: &str) -> bool {
        self.index.contains_key(slug)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Preset>> {
        self.presets.iter()
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }

    /// Every preset declaring `step`, in catalog order.
    pub fn presets_with_step(&self, step: &str) -> Vec<Arc<Preset>> {
        self.presets
            .iter()
            .filter(|preset| preset.has_step(step))
            .cloned()
            .collect()
    }

    /// Combined presets routing to `internal`.
    pub fn combined_owners(&self, internal: &str) -> Vec<Arc<Preset>> {
        self.presets
            .iter()
            .filter(|preset| match &preset.kind {
                PresetKind::Combined(combined) => {
                    combined.internal_presets.iter().any(|t| t == internal)
                }
                _ => false,
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onboarding::model::{CombinedPreset, Step};

    fn steps(slugs: &[&str]) -> Vec<Step> {
        slugs.iter().map(|s| Step::new(*s)).collect()
    }

    #[test]
    fn indexes_and_finds_owners() {
        let registry = PresetRegistry::new(vec![
            Preset::common("a", steps(&["s1", "shared"])),
            Preset::common("b", steps(&["shared", "s2"])),
        ])
        .unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("a"));
        let owners: Vec<_> = registry
            .presets_with_step("shared")
            .iter()
            .map(|p| p.slug.clone())
            .collect();
        assert_eq!(owners, vec!["a", "b"]);
        assert!(registry.presets_with_step("missing").is_empty());
    }

    #[test]
    fn rejects_duplicate_preset() {
        let err = PresetRegistry::new(vec![
            Preset::common("a", steps(&["s1"])),
            Preset::common("a", steps(&["s2"])),
        ])
        .unwrap_err();
        assert_eq!(err, CatalogError::DuplicatePreset("a".into()));
    }

    #[test]
    fn rejects_duplicate_step_within_preset() {
        let err = PresetRegistry::new(vec![Preset::common("a", steps(&["s1", "s1"]))]).unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateStep { .. }));
    }

    #[test]
    fn validates_combined_targets() {
        let err = PresetRegistry::new(vec![Preset::combined(
            "c",
            CombinedPreset::fixed(vec!["ghost".into()], "ghost"),
        )])
        .unwrap_err();
        assert!(matches!(err, CatalogError::UnknownTarget { .. }));

        let err = PresetRegistry::new(vec![
            Preset::common("plain", steps(&["s"])),
            Preset::combined("c", CombinedPreset::fixed(vec!["plain".into()], "plain")),
        ])
        .unwrap_err();
        assert!(matches!(err, CatalogError::TargetNotInternal { .. }));

        let err =
            PresetRegistry::new(vec![Preset::combined("c", CombinedPreset::fixed(vec![], "x"))])
                .unwrap_err();
        assert_eq!(err, CatalogError::EmptyCombined("c".into()));
    }

    #[test]
    fn finds_combined_owner() {
        let registry = PresetRegistry::new(vec![
            Preset::internal("i1", steps(&["s"])),
            Preset::combined("c", CombinedPreset::fixed(vec!["i1".into()], "i1")),
        ])
        .unwrap();
        let owners = registry.combined_owners("i1");
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].slug, "c");
    }
}
