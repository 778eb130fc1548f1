//! Promo catalog: groups, promos, priorities.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::CatalogError;

use super::conditions::{Condition, HelperRegistry};

/// Queue priority. Lower sorts first; `High` beats every default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "PriorityRepr", into = "PriorityRepr")]
pub enum Priority {
    High,
    Value(i64),
}

impl Priority {
    pub fn value(self) -> i64 {
        match self {
            Self::High => -1,
            Self::Value(value) => value,
        }
    }
}

/// Wire form: the string `"high"` or a number.
#[derive(Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
enum PriorityRepr {
    Named(NamedPriority),
    Value(i64),
}

#[derive(Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum NamedPriority {
    High,
}

impl From<PriorityRepr> for Priority {
    fn from(repr: PriorityRepr) -> Self {
        match repr {
            PriorityRepr::Named(NamedPriority::High) => Self::High,
            PriorityRepr::Value(value) => Self::Value(value),
        }
    }
}

impl From<Priority> for PriorityRepr {
    fn from(priority: Priority) -> Self {
        match priority {
            Priority::High => Self::Named(NamedPriority::High),
            Priority::Value(value) => Self::Value(value),
        }
    }
}

/// A single schedulable promotional unit.
#[derive(Debug, Clone)]
pub struct Promo {
    pub slug: String,
    /// Explicit priority; when absent the registration order is used.
    pub priority: Option<Priority>,
    pub conditions: Vec<Condition>,
    /// Opaque payload for the renderer.
    pub meta: Option<serde_json::Value>,
}

impl Promo {
    pub fn new(slug: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            priority: None,
            conditions: Vec::new(),
            meta: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// Promos sharing type-level conditions and type-level call tracking.
#[derive(Debug, Clone)]
pub struct PromoGroup {
    pub slug: String,
    pub conditions: Vec<Condition>,
    pub promos: Vec<Promo>,
}

impl PromoGroup {
    pub fn new(slug: impl Into<String>, promos: Vec<Promo>) -> Self {
        Self {
            slug: slug.into(),
            conditions: Vec::new(),
            promos,
        }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }
}

/// A promo together with its resolved group and sort key.
#[derive(Debug, Clone)]
pub struct RegisteredPromo {
    pub promo: Promo,
    pub group: String,
    pub priority: i64,
}

/// Validated promo catalog.
#[derive(Debug, Clone, Default)]
pub struct PromoRegistry {
    groups: Vec<PromoGroup>,
    promos: HashMap<String, RegisteredPromo>,
}

impl PromoRegistry {
    /// Validate and index `groups`. Declarative conditions naming a helper
    /// missing from `helpers` are reported but kept; they fail closed.
    pub fn new(groups: Vec<PromoGroup>, helpers: &HelperRegistry) -> Result<Self, CatalogError> {
        let mut promos = HashMap::new();
        let mut group_slugs: Vec<&str> = Vec::new();
        // Insertion counter; starts at 0 so `High` (-1) still sorts first.
        let mut counter: i64 = 0;

        for group in &groups {
            if group_slugs.contains(&group.slug.as_str()) {
                return Err(CatalogError::DuplicateGroup(group.slug.clone()));
            }
            group_slugs.push(&group.slug);
            warn_unknown_helpers(&group.slug, &group.conditions, helpers);

            for promo in &group.promos {
                if promos.contains_key(&promo.slug) {
                    return Err(CatalogError::DuplicatePromo(promo.slug.clone()));
                }
                warn_unknown_helpers(&promo.slug, &promo.conditions, helpers);
                let priority = promo.priority.map_or(counter, Priority::value);
                counter += 1;
                promos.insert(
                    promo.slug.clone(),
                    RegisteredPromo {
                        promo: promo.clone(),
                        group: group.slug.clone(),
                        priority,
                    },
                );
            }
        }

        Ok(Self { groups, promos })
    }

    pub fn get(&self, slug: &str) -> Option<&RegisteredPromo> {
        self.promos.get(slug)
    }

    pub fn contains(&self, slug: &str) -> bool {
        self.promos.contains_key(slug)
    }

    pub fn group(&self, slug: &str) -> Option<&PromoGroup> {
        self.groups.iter().find(|group| group.slug == slug)
    }

    pub fn groups(&self) -> &[PromoGroup] {
        &self.groups
    }

    pub fn priority_of(&self, slug: &str) -> i64 {
        self.promos.get(slug).map_or(i64::MAX, |entry| entry.priority)
    }

    /// Promo slugs of `group`, ordered by priority (stable).
    pub fn by_priority(&self, group: &str) -> Vec<&str> {
        let mut slugs: Vec<&str> = self
            .group(group)
            .map(|group| group.promos.iter().map(|promo| promo.slug.as_str()).collect())
            .unwrap_or_default();
        slugs.sort_by_key(|slug| self.priority_of(slug));
        slugs
    }

    pub fn len(&self) -> usize {
        self.promos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.promos.is_empty()
    }
}

fn warn_unknown_helpers(owner: &str, conditions: &[Condition], helpers: &HelperRegistry) {
    for condition in conditions {
        if let Condition::Helper(call) = condition {
            if !helpers.contains(&call.helper) {
                tracing::warn!(owner = %owner, helper = %call.helper, "Unknown condition helper; it will always fail");
            }
        }
    }
}
