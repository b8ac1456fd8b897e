use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregate, anonymous explanation metrics from `GET /api/telemetry/summary`.
///
/// Rates arrive pre-formatted as percentage strings such as `"12.5%"`; use
/// [`parse_percent`] to get at the number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySummary {
    pub total_scans: u64,
    #[serde(default)]
    pub verdict_distribution: BTreeMap<String, String>,
    pub incomplete_analysis_rate: String,
    pub allowlist_override_rate: String,
    #[serde(default)]
    pub drift_status_distribution: BTreeMap<String, u64>,
    pub avg_risk_signals_per_scan: f64,
    #[serde(default)]
    pub top_risk_signals: Vec<String>,
    #[serde(default)]
    pub top_inconclusive_checks: Vec<String>,
    pub collection_period: CollectionPeriod,
}

impl TelemetrySummary {
    /// Share of scans with the given verdict label, in percent.
    pub fn verdict_share(&self, verdict: &str) -> Option<f64> {
        self.verdict_distribution
            .get(verdict)
            .and_then(|rate| parse_percent(rate))
    }
}

/// Timestamps are ISO-8601 text and may be empty before the first scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionPeriod {
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub last_updated: String,
}

impl CollectionPeriod {
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.start)
    }

    pub fn last_updated_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.last_updated)
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|at| at.with_timezone(&Utc))
}

/// Parses `"12.5%"` into `12.5`. A missing `%` is tolerated.
pub fn parse_percent(raw: &str) -> Option<f64> {
    raw.trim().trim_end_matches('%').trim().parse().ok()
}
