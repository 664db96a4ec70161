//! Hook execution metrics read from `hook-metrics.jsonl`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::layout::HOOK_METRICS_FILE;
use crate::store::{ConfinedStore, Result, StoreError};

/// Entries returned when no limit is given.
pub const DEFAULT_METRICS_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookResult {
    Success,
    Failure,
}

/// One line of the metrics log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookMetric {
    pub hook: String,
    pub duration_ms: u64,
    #[serde(default)]
    pub exit_code: i32,
    pub result: HookResult,
    #[serde(default)]
    pub tool: String,
    #[serde(default)]
    pub project: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HookMetricsSummary {
    pub hook_name: String,
    pub total_executions: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub avg_duration_ms: u64,
    pub max_duration_ms: u64,
    pub min_duration_ms: u64,
    pub last_execution: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HookMetricsReport {
    pub metrics: Vec<HookMetric>,
    pub summaries: Vec<HookMetricsSummary>,
}

#[derive(Debug, Clone, Default)]
pub struct MetricsQuery {
    /// Only entries of this hook.
    pub hook: Option<String>,
    /// Newest entries kept; `None` keeps all of them.
    pub limit: Option<usize>,
}

/// Reads the metrics log under the root. A missing log is an empty report.
pub async fn hook_metrics(
    store: &ConfinedStore,
    query: &MetricsQuery,
) -> Result<HookMetricsReport> {
    match store.read(HOOK_METRICS_FILE).await {
        Ok(log) => Ok(summarize(&log, query)),
        Err(StoreError::NotFound(_)) => Ok(HookMetricsReport::default()),
        Err(e) => Err(e),
    }
}

/// Parses `log`, dropping lines that are not valid metric records, keeps
/// the newest `limit` entries and summarizes them per hook. Summaries are
/// ordered by execution count, most active first.
pub fn summarize(log: &str, query: &MetricsQuery) -> HookMetricsReport {
    let mut skipped = 0;
    let mut metrics: Vec<HookMetric> = log
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<HookMetric>(line) {
            Ok(metric) => Some(metric),
            Err(_) => {
                skipped += 1;
                None
            }
        })
        .filter(|m| query.hook.as_deref().map_or(true, |hook| m.hook == hook))
        .collect();
    if skipped > 0 {
        debug!(skipped, "ignored malformed hook metric lines");
    }

    metrics.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    if let Some(limit) = query.limit {
        metrics.truncate(limit);
    }

    let summaries = summaries_for(&metrics);
    HookMetricsReport { metrics, summaries }
}

/// Per-hook figures over `metrics`, which must be sorted newest first.
fn summaries_for(metrics: &[HookMetric]) -> Vec<HookMetricsSummary> {
    let mut order: Vec<&str> = Vec::new();
    let mut by_hook: HashMap<&str, Vec<&HookMetric>> = HashMap::new();
    for metric in metrics {
        by_hook
            .entry(metric.hook.as_str())
            .or_insert_with(|| {
                order.push(metric.hook.as_str());
                Vec::new()
            })
            .push(metric);
    }

    let mut summaries: Vec<HookMetricsSummary> = order
        .into_iter()
        .filter_map(|hook| {
            let runs = by_hook.get(hook)?;
            let newest = runs.first()?;
            let total: u64 = runs.iter().map(|m| m.duration_ms).sum();
            Some(HookMetricsSummary {
                hook_name: hook.to_string(),
                total_executions: runs.len(),
                success_count: runs.iter().filter(|m| m.result == HookResult::Success).count(),
                failure_count: runs.iter().filter(|m| m.result == HookResult::Failure).count(),
                avg_duration_ms: (total as f64 / runs.len() as f64).round() as u64,
                max_duration_ms: runs.iter().map(|m| m.duration_ms).max().unwrap_or(0),
                min_duration_ms: runs.iter().map(|m| m.duration_ms).min().unwrap_or(0),
                last_execution: newest.timestamp,
            })
        })
        .collect();
    summaries.sort_by(|a, b| b.total_executions.cmp(&a.total_executions));
    summaries
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn log() -> String {
        [
            r#"{"hook":"lint.sh","duration_ms":120,"result":"success","tool":"Edit","#.to_owned()
                + r#""timestamp":"2026-01-01T10:00:00Z"}"#,
            r#"{"hook":"lint.sh","duration_ms":80,"exit_code":1,"result":"failure","#.to_owned()
                + r#""timestamp":"2026-01-01T12:00:00Z"}"#,
            "not json at all".to_owned(),
            r#"{"hook":"fmt.sh","duration_ms":15,"result":"success","project":"b","#.to_owned()
                + r#""timestamp":"2026-01-01T11:00:00Z"}"#,
            r#"{"hook":"fmt.sh","duration_ms":"slow","result":"success","#.to_owned()
                + r#""timestamp":"2026-01-01T11:30:00Z"}"#,
            String::new(),
            r#"{"hook":"lint.sh","duration_ms":101,"result":"success","#.to_owned()
                + r#""timestamp":"2026-01-01T09:00:00Z"}"#,
        ]
        .join("\n")
    }

    #[test]
    fn summarizes_valid_lines_newest_first() {
        let report = summarize(&log(), &MetricsQuery::default());

        assert_eq!(report.metrics.len(), 4);
        let durations: Vec<_> = report.metrics.iter().map(|m| m.duration_ms).collect();
        assert_eq!(durations, vec![80, 15, 120, 101]);

        assert_eq!(report.summaries.len(), 2);
        let lint = &report.summaries[0];
        assert_eq!(lint.hook_name, "lint.sh");
        assert_eq!(lint.total_executions, 3);
        assert_eq!(lint.success_count, 2);
        assert_eq!(lint.failure_count, 1);
        assert_eq!(lint.avg_duration_ms, 100);
        assert_eq!(lint.max_duration_ms, 120);
        assert_eq!(lint.min_duration_ms, 80);
        assert_eq!(
            lint.last_execution.to_rfc3339(),
            "2026-01-01T12:00:00+00:00"
        );
        assert_eq!(report.summaries[1].hook_name, "fmt.sh");
    }

    #[test]
    fn filter_and_limit_apply_before_summaries() {
        let report = summarize(
            &log(),
            &MetricsQuery {
                hook: Some("lint.sh".into()),
                limit: Some(2),
            },
        );
        assert_eq!(report.metrics.len(), 2);
        assert_eq!(report.summaries.len(), 1);
        assert_eq!(report.summaries[0].total_executions, 2);
        assert_eq!(report.summaries[0].min_duration_ms, 80);
    }

    #[tokio::test]
    async fn missing_log_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = ConfinedStore::new(dir.path()).unwrap();
        let report = hook_metrics(&store, &MetricsQuery::default()).await.unwrap();
        assert!(report.metrics.is_empty());
        assert!(report.summaries.is_empty());

        store.write(HOOK_METRICS_FILE, &log(), false).await.unwrap();
        let report = hook_metrics(&store, &MetricsQuery::default()).await.unwrap();
        assert_eq!(report.metrics.len(), 4);
    }
}
