//! Built-in condition helpers.
//!
//! Each helper exists in two forms: a typed constructor returning a
//! [`Condition`] for Rust callers, and a named factory in
//! [`default_helpers`] for declarative catalogs.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};

use super::conditions::{Condition, ConditionContext, HelperRegistry, PredicateFn};
use super::state::PromoSnapshot;

pub const SHOW_ONCE_FOR_PERIOD: &str = "showOnceForPeriod";
pub const SHOW_ONCE_FOR_SESSION: &str = "showOnceForSession";
pub const LIMIT_FREQUENCY: &str = "limitFrequency";
pub const MATCH_URL: &str = "matchUrl";
pub const TIME_WINDOW: &str = "timeWindow";

/// `{days, hours, minutes, seconds}`, all optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Period {
    pub days: u64,
    pub hours: u64,
    pub minutes: u64,
    pub seconds: u64,
}

impl Period {
    pub fn days(days: u64) -> Self {
        Self {
            days,
            ..Self::default()
        }
    }

    /// Saturates instead of overflowing on huge catalog values.
    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(
            self.days
                .saturating_mul(86_400)
                .saturating_add(self.hours.saturating_mul(3_600))
                .saturating_add(self.minutes.saturating_mul(60))
                .saturating_add(self.seconds),
        )
    }
}

fn millis(period: Duration) -> i64 {
    i64::try_from(period.as_millis()).unwrap_or(i64::MAX)
}

fn predicate<F>(f: F) -> PredicateFn
where
    F: Fn(&PromoSnapshot, &ConditionContext) -> bool + Send + Sync + 'static,
{
    Arc::new(f)
}

fn show_once_for_period_fn(period: Duration) -> PredicateFn {
    let period = millis(period);
    predicate(move |snapshot, ctx| {
        let Some(progress) = &snapshot.progress else {
            return false;
        };
        ctx.last_call(progress)
            .is_none_or(|last| ctx.now_millis.saturating_sub(last) >= period)
    })
}

fn show_once_for_session_fn() -> PredicateFn {
    predicate(|snapshot, ctx| {
        let Some(progress) = &snapshot.progress else {
            return false;
        };
        ctx.last_call(progress)
            .is_none_or(|last| last < ctx.session_start)
    })
}

fn limit_frequency_fn(slugs: Vec<String>, period: Duration) -> PredicateFn {
    let period = millis(period);
    predicate(move |snapshot, ctx| {
        let Some(progress) = &snapshot.progress else {
            return false;
        };
        slugs.iter().all(|slug| {
            [progress.last_call_of_promo(slug), progress.last_call_of_type(slug)]
                .into_iter()
                .flatten()
                .all(|last| ctx.now_millis.saturating_sub(last) >= period)
        })
    })
}

fn match_url_fn(pattern: Regex) -> PredicateFn {
    predicate(move |_, ctx| {
        ctx.current_url
            .as_deref()
            .is_some_and(|url| pattern.is_match(url))
    })
}

fn time_window_fn(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> PredicateFn {
    let start = start.map(|t| t.timestamp_millis());
    let end = end.map(|t| t.timestamp_millis());
    predicate(move |_, ctx| {
        start.is_none_or(|start| ctx.now_millis >= start)
            && end.is_none_or(|end| ctx.now_millis < end)
    })
}

/// At most one call per `period` (per promo or per group, by scope).
pub fn show_once_for_period(period: Duration) -> Condition {
    Condition::Predicate(show_once_for_period_fn(period))
}

/// Not called since this manager instance was created.
pub fn show_once_for_session() -> Condition {
    Condition::Predicate(show_once_for_session_fn())
}

/// None of `slugs` (promos or groups) was called within `period`.
pub fn limit_frequency(slugs: Vec<String>, period: Duration) -> Condition {
    Condition::Predicate(limit_frequency_fn(slugs, period))
}

/// The host's current URL matches `pattern`.
pub fn match_url(pattern: &str) -> Result<Condition> {
    let pattern = Regex::new(pattern).map_err(|e| args_error(MATCH_URL, e))?;
    Ok(Condition::Predicate(match_url_fn(pattern)))
}

/// Now lies in `[start, end)`; a missing bound is open.
pub fn time_window(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Condition {
    Condition::Predicate(time_window_fn(start, end))
}

fn args_error(helper: &str, reason: impl std::fmt::Display) -> Error {
    Error::ConditionArgs {
        helper: helper.to_string(),
        reason: reason.to_string(),
    }
}

/// Decode the first argument, or the default when there is none.
fn first_arg<T: DeserializeOwned + Default>(helper: &str, args: &[Value]) -> Result<T> {
    match args.first() {
        Some(value) => serde_json::from_value(value.clone()).map_err(|e| args_error(helper, e)),
        None => Ok(T::default()),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LimitFrequencyArgs {
    slugs: Vec<String>,
    period: Period,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TimeWindowArgs {
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

/// Registry with every built-in helper under its declarative name.
pub fn default_helpers() -> HelperRegistry {
    let mut helpers = HelperRegistry::new();
    helpers
        .register(SHOW_ONCE_FOR_PERIOD, |args| {
            let period: Period = first_arg(SHOW_ONCE_FOR_PERIOD, args)?;
            Ok(show_once_for_period_fn(period.as_duration()))
        })
        .register(SHOW_ONCE_FOR_SESSION, |_| Ok(show_once_for_session_fn()))
        .register(LIMIT_FREQUENCY, |args| {
            let args: LimitFrequencyArgs = first_arg(LIMIT_FREQUENCY, args)?;
            Ok(limit_frequency_fn(args.slugs, args.period.as_duration()))
        })
        .register(MATCH_URL, |args| {
            let pattern = args
                .first()
                .and_then(Value::as_str)
                .ok_or_else(|| args_error(MATCH_URL, "expected a pattern string"))?;
            let pattern = Regex::new(pattern).map_err(|e| args_error(MATCH_URL, e))?;
            Ok(match_url_fn(pattern))
        })
        .register(TIME_WINDOW, |args| {
            let args: TimeWindowArgs = first_arg(TIME_WINDOW, args)?;
            Ok(time_window_fn(args.start, args.end))
        });
    helpers
}
