//! Promo manager state.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// In-memory admission state. Not persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PromoBaseState {
    /// The single active promo.
    pub active_promo: Option<String>,
    /// Candidates in priority order.
    pub active_queue: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressInfo {
    /// Unix millis of the last finish (or recorded cancel/request).
    pub last_call_time: i64,
}

/// Persisted through `save_progress`. Missing fields load as empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PromoProgressState {
    pub finished_promos: Vec<String>,
    /// Group slug → last call.
    pub progress_info_by_type: BTreeMap<String, ProgressInfo>,
    /// Promo slug → last call.
    pub progress_info_by_promo: BTreeMap<String, ProgressInfo>,
}

impl PromoProgressState {
    pub fn is_finished(&self, promo: &str) -> bool {
        self.finished_promos.iter().any(|p| p == promo)
    }

    pub fn finish(&mut self, promo: &str) -> bool {
        if self.is_finished(promo) {
            return false;
        }
        self.finished_promos.push(promo.to_string());
        true
    }

    pub fn last_call_of_promo(&self, promo: &str) -> Option<i64> {
        self.progress_info_by_promo
            .get(promo)
            .map(|info| info.last_call_time)
    }

    pub fn last_call_of_type(&self, group: &str) -> Option<i64> {
        self.progress_info_by_type
            .get(group)
            .map(|info| info.last_call_time)
    }

    /// Record a call for both the promo and its group.
    pub fn record_call(&mut self, promo: &str, group: &str, now_millis: i64) {
        let info = ProgressInfo {
            last_call_time: now_millis,
        };
        self.progress_info_by_promo.insert(promo.to_string(), info);
        self.progress_info_by_type.insert(group.to_string(), info);
    }
}

/// Derived lifecycle state of one promo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PromoStatus {
    /// Progress not loaded, or conditions fail.
    Forbidden,
    CanRun,
    /// Queued.
    Pending,
    Active,
    Finished,
}

impl std::fmt::Display for PromoStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Forbidden => "forbidden",
            Self::CanRun => "canRun",
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Finished => "finished",
        };
        write!(f, "{s}")
    }
}

/// Published promo snapshot.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromoSnapshot {
    pub base: Arc<PromoBaseState>,
    pub progress: Option<Arc<PromoProgressState>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_call_updates_promo_and_group() {
        let mut progress = PromoProgressState::default();
        progress.record_call("x", "tips", 1_000);
        assert_eq!(progress.last_call_of_promo("x"), Some(1_000));
        assert_eq!(progress.last_call_of_type("tips"), Some(1_000));
        assert_eq!(progress.last_call_of_promo("y"), None);

        assert!(progress.finish("x"));
        assert!(!progress.finish("x"));
    }

    #[test]
    fn progress_wire_format() {
        let progress: PromoProgressState = serde_json::from_str(
            r#"{"finishedPromos": ["x"], "progressInfoByType": {"tips": {"lastCallTime": 5}}}"#,
        )
        .unwrap();
        assert!(progress.is_finished("x"));
        assert_eq!(progress.last_call_of_type("tips"), Some(5));
        assert!(progress.progress_info_by_promo.is_empty());
    }

    #[test]
    fn status_display_matches_serde() {
        for status in [
            PromoStatus::Forbidden,
            PromoStatus::CanRun,
            PromoStatus::Pending,
            PromoStatus::Active,
            PromoStatus::Finished,
        ] {
            assert_eq!(
                serde_json::to_string(&status).unwrap(),
                format!("\"{status}\"")
            );
        }
    }
}
