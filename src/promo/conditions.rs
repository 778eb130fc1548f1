//! Promo admission conditions.
//!
//! A condition is either a Rust predicate or a declarative
//! `{"helper": name, "args": [...]}` call resolved against a
//! [`HelperRegistry`]. Unresolvable helpers fail closed.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::logging::Logger;

use super::state::{PromoProgressState, PromoSnapshot};

/// Whether a condition is evaluated on behalf of a group or a single promo.
/// Helpers that track call history read the matching progress map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionScope {
    Group,
    Promo,
}

/// Evaluation inputs beyond the snapshot.
#[derive(Debug, Clone)]
pub struct ConditionContext {
    pub promo: String,
    pub group: String,
    pub scope: ConditionScope,
    pub now_millis: i64,
    /// Unix millis when this manager instance was created.
    pub session_start: i64,
    pub current_url: Option<String>,
}

impl ConditionContext {
    /// Last call of the promo or group, depending on scope.
    pub fn last_call(&self, progress: &PromoProgressState) -> Option<i64> {
        match self.scope {
            ConditionScope::Group => progress.last_call_of_type(&self.group),
            ConditionScope::Promo => progress.last_call_of_promo(&self.promo),
        }
    }
}

pub type PredicateFn = Arc<dyn Fn(&PromoSnapshot, &ConditionContext) -> bool + Send + Sync>;

/// Builds a predicate from declarative arguments.
pub type HelperFactory = Arc<dyn Fn(&[Value]) -> Result<PredicateFn> + Send + Sync>;

/// Declarative helper invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelperCall {
    pub helper: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

#[derive(Clone)]
pub enum Condition {
    Predicate(PredicateFn),
    Helper(HelperCall),
}

impl Condition {
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&PromoSnapshot, &ConditionContext) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(f))
    }

    pub fn helper(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self::Helper(HelperCall {
            helper: name.into(),
            args,
        })
    }
}

impl From<HelperCall> for Condition {
    fn from(call: HelperCall) -> Self {
        Self::Helper(call)
    }
}

impl std::fmt::Debug for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Predicate(_) => f.write_str("Predicate(..)"),
            Self::Helper(call) => f.debug_tuple("Helper").field(call).finish(),
        }
    }
}

/// Named helper factories available to declarative conditions.
#[derive(Clone, Default)]
pub struct HelperRegistry {
    factories: HashMap<String, HelperFactory>,
}

impl HelperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&[Value]) -> Result<PredicateFn> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn resolve(&self, call: &HelperCall) -> Option<Result<PredicateFn>> {
        self.factories.get(&call.helper).map(|factory| factory(&call.args))
    }
}

impl std::fmt::Debug for HelperRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HelperRegistry")
            .field("helpers", &self.names())
            .finish()
    }
}

/// Evaluates condition lists against one snapshot.
pub(crate) struct Evaluator<'a> {
    pub helpers: &'a HelperRegistry,
    pub logger: &'a Logger,
}

impl Evaluator<'_> {
    /// All conditions hold. Stops at the first failure.
    pub fn all(
        &self,
        conditions: &[Condition],
        snapshot: &PromoSnapshot,
        ctx: &ConditionContext,
    ) -> bool {
        conditions
            .iter()
            .all(|condition| self.check(condition, snapshot, ctx))
    }

    fn check(&self, condition: &Condition, snapshot: &PromoSnapshot, ctx: &ConditionContext) -> bool {
        match condition {
            Condition::Predicate(predicate) => predicate(snapshot, ctx),
            Condition::Helper(call) => match self.helpers.resolve(call) {
                Some(Ok(predicate)) => predicate(snapshot, ctx),
                Some(Err(e)) => {
                    self.logger.error(format!("Condition for {}: {e}", ctx.promo));
                    false
                }
                None => {
                    self.logger.error(format!(
                        "Condition for {} uses unknown helper {}",
                        ctx.promo, call.helper
                    ));
                    false
                }
            },
        }
    }
}
