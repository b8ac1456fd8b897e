//! In-memory analysis service.
//!
//! Selected with `use_fixtures` in [`crate::config::ClientConfig`]; also the
//! default test double. Responses are deterministic: the URL text picks the
//! verdict, and freeze state is toggled explicitly.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use urlguard_model::{
    BatchScanEntry, BatchScanResponse, BatchVerdict, Coordinates, Explanation, GovernanceBudget,
    GovernanceHealth, GovernanceStatus, HealthStatus, LiveThreat, MAX_BATCH_URLS, RegionCount,
    ScanResult, Severity, TelemetrySummary, ThreatMapPoint, TrustInfo, TrustedDomains,
    UnfreezeResponse, Verdict,
};
use urlguard_model::telemetry::CollectionPeriod;

use crate::api::{AnalysisApi, accept_scan_result};
use crate::error::{GatewayError, GatewayResult};
use crate::gateway::DEFAULT_FREEZE_ACTIONS;

pub const SAFE_RISK_SCORE: f64 = 12.5;
pub const SUSPICIOUS_RISK_SCORE: f64 = 67.3;
pub const PHISHING_RISK_SCORE: f64 = 92.8;
pub const MODEL_TYPE: &str = "CalibratedClassifierCV";
pub const MAX_OVERRIDES_PER_HOUR: u32 = 5;

/// Sample SAFE response for a trusted domain.
pub fn safe_sample(url: &str) -> ScanResult {
    ScanResult {
        success: true,
        verdict: Verdict::Safe,
        risk_score: SAFE_RISK_SCORE,
        is_trusted_domain: true,
        ml_bypassed: true,
        explanation: Explanation {
            summary: "This domain is on a trusted allowlist. ML checks were bypassed.".into(),
            positive: vec!["Registered domain is on the trusted allowlist".into()],
            risk: vec![],
            inconclusive: vec![],
            analysis_complete: true,
            allowlist_override: true,
            blocklist_match: None,
        },
        warnings: vec![],
        url: url.to_string(),
        risk_level: "Minimal Risk".into(),
        latency_ms: 3.1,
        trust_info: Some(TrustInfo {
            is_trusted: true,
            registered_domain: Some("google.com".into()),
            matched_domain: Some("google.com".into()),
            reason: Some("Domain matches trusted allowlist".into()),
        }),
        network_issues: None,
    }
}

/// Sample SUSPICIOUS response.
pub fn suspicious_sample(url: &str) -> ScanResult {
    ScanResult {
        success: true,
        verdict: Verdict::Suspicious,
        risk_score: SUSPICIOUS_RISK_SCORE,
        is_trusted_domain: false,
        ml_bypassed: false,
        explanation: Explanation {
            summary: "Some indicators of risk were found. Proceed with caution.".into(),
            positive: vec!["Valid HTTPS certificate".into()],
            risk: vec!["Domain registered recently".into()],
            inconclusive: vec!["WHOIS lookup timed out".into()],
            analysis_complete: false,
            allowlist_override: false,
            blocklist_match: None,
        },
        warnings: vec!["WHOIS lookup failed".into()],
        url: url.to_string(),
        risk_level: "Elevated Risk".into(),
        latency_ms: 812.4,
        trust_info: None,
        network_issues: Some(urlguard_model::NetworkIssues {
            whois_failed: true,
            whois_error: Some("timeout".into()),
            any_failed: true,
            ..Default::default()
        }),
    }
}

/// Sample PHISHING response.
pub fn phishing_sample(url: &str) -> ScanResult {
    ScanResult {
        success: true,
        verdict: Verdict::Phishing,
        risk_score: PHISHING_RISK_SCORE,
        is_trusted_domain: false,
        ml_bypassed: false,
        explanation: Explanation {
            summary: "Multiple high-risk indicators suggest this is a phishing page.".into(),
            positive: vec![],
            risk: vec![
                "Brand name appears outside the registered domain".into(),
                "Login form posts to a third-party host".into(),
            ],
            inconclusive: vec![],
            analysis_complete: true,
            allowlist_override: false,
            blocklist_match: None,
        },
        warnings: vec![],
        url: url.to_string(),
        risk_level: "Critical Risk".into(),
        latency_ms: 455.0,
        trust_info: None,
        network_issues: None,
    }
}

/// Picks the sample whose verdict the URL text names.
pub fn sample_for(url: &str) -> ScanResult {
    let lowered = url.to_ascii_lowercase();
    if lowered.contains("phishing") {
        phishing_sample(url)
    } else if lowered.contains("suspicious") {
        suspicious_sample(url)
    } else {
        safe_sample(url)
    }
}

#[derive(Debug, Clone)]
struct FreezeRecord {
    reason: String,
    frozen_at: String,
    frozen_by: String,
    incident_id: String,
}

#[derive(Debug, Default)]
struct FixtureState {
    freeze: Option<FreezeRecord>,
    override_count: u32,
    offline: bool,
    latency: Option<Duration>,
    served: Vec<ScanResult>,
    first_scan_at: Option<DateTime<Utc>>,
    last_scan_at: Option<DateTime<Utc>>,
}

/// Deterministic in-memory [`AnalysisApi`].
#[derive(Debug, Clone, Default)]
pub struct FixtureApi {
    inner: Arc<RwLock<FixtureState>>,
    governance_reads: Arc<AtomicUsize>,
    scans: Arc<AtomicUsize>,
}

impl FixtureApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Puts the fixture service into the frozen state.
    pub fn freeze(&self, reason: impl Into<String>) {
        if let Ok(mut guard) = self.inner.write() {
            let now = Utc::now();
            guard.freeze = Some(FreezeRecord {
                reason: reason.into(),
                frozen_at: now.to_rfc3339(),
                frozen_by: "fixture".into(),
                incident_id: format!("INC-{}", now.timestamp()),
            });
        }
    }

    /// Makes every call fail as if the service were unreachable.
    pub fn set_offline(&self, offline: bool) {
        if let Ok(mut guard) = self.inner.write() {
            guard.offline = offline;
        }
    }

    /// Delays every call; useful to observe in-flight behaviour.
    pub fn set_latency(&self, latency: Option<Duration>) {
        if let Ok(mut guard) = self.inner.write() {
            guard.latency = latency;
        }
    }

    pub fn set_override_count(&self, count: u32) {
        if let Ok(mut guard) = self.inner.write() {
            guard.override_count = count;
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.inner
            .read()
            .map(|guard| guard.freeze.is_some())
            .unwrap_or(false)
    }

    /// Number of governance status reads served so far.
    pub fn governance_reads(&self) -> usize {
        self.governance_reads.load(Ordering::SeqCst)
    }

    pub fn scans_served(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> GatewayResult<()> {
        let (offline, latency) = self
            .inner
            .read()
            .map(|guard| (guard.offline, guard.latency))
            .unwrap_or((false, None));
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if offline {
            return Err(GatewayError::TransportUnavailable {
                message: "fixture service is offline".into(),
            });
        }
        Ok(())
    }

    fn freeze_error(&self) -> Option<GatewayError> {
        let guard = self.inner.read().ok()?;
        guard
            .freeze
            .as_ref()
            .map(|record| GatewayError::GovernanceFreeze {
                reason: record.reason.clone(),
                actions: DEFAULT_FREEZE_ACTIONS.to_string(),
            })
    }

    fn record_served(&self, sample: &ScanResult) {
        if let Ok(mut guard) = self.inner.write() {
            let now = Utc::now();
            guard.first_scan_at.get_or_insert(now);
            guard.last_scan_at = Some(now);
            guard.served.push(sample.clone());
        }
    }

    fn telemetry_snapshot(&self) -> TelemetrySummary {
        let Ok(guard) = self.inner.read() else {
            return empty_summary();
        };
        let served = &guard.served;
        let total = served.len() as u64;
        let divisor = total.max(1) as f64;
        let rate = |count: usize| format!("{:.1}%", count as f64 / divisor * 100.0);
        let count = |keep: &dyn Fn(&ScanResult) -> bool| {
            served.iter().filter(|s| keep(s)).count()
        };

        let verdict_distribution = Verdict::ALL
            .into_iter()
            .filter_map(|verdict| {
                let seen = count(&|s: &ScanResult| s.verdict == verdict);
                (seen > 0).then(|| (verdict.as_wire().to_string(), rate(seen)))
            })
            .collect();
        let incomplete = count(&|s: &ScanResult| !s.explanation.analysis_complete);
        let overridden = count(&|s: &ScanResult| s.explanation.allowlist_override);
        let risk_signals: usize = served.iter().map(|s| s.explanation.risk.len()).sum();

        TelemetrySummary {
            total_scans: total,
            verdict_distribution,
            incomplete_analysis_rate: rate(incomplete),
            allowlist_override_rate: rate(overridden),
            drift_status_distribution: BTreeMap::from([("none".to_string(), total)]),
            avg_risk_signals_per_scan: (risk_signals as f64 / divisor * 100.0).round()
                / 100.0,
            top_risk_signals: most_frequent(served.iter().flat_map(|s| &s.explanation.risk)),
            top_inconclusive_checks: most_frequent(
                served.iter().flat_map(|s| &s.explanation.inconclusive),
            ),
            collection_period: CollectionPeriod {
                start: guard
                    .first_scan_at
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_default(),
                last_updated: guard
                    .last_scan_at
                    .map(|at| at.to_rfc3339())
                    .unwrap_or_default(),
            },
        }
    }

    fn status_snapshot(&self) -> GovernanceStatus {
        let (freeze, override_count) = self
            .inner
            .read()
            .map(|guard| (guard.freeze.clone(), guard.override_count))
            .unwrap_or((None, 0));

        GovernanceStatus {
            is_frozen: freeze.is_some(),
            freeze_reason: freeze.as_ref().map(|f| f.reason.clone()),
            frozen_at: freeze.as_ref().map(|f| f.frozen_at.clone()),
            frozen_by: freeze.as_ref().map(|f| f.frozen_by.clone()),
            incident_id: freeze.as_ref().map(|f| f.incident_id.clone()),
            budget: GovernanceBudget {
                override_count_hourly: override_count,
                max_overrides_per_hour: MAX_OVERRIDES_PER_HOUR,
                budget_exhausted: override_count >= MAX_OVERRIDES_PER_HOUR,
                window_start: None,
            },
            health: GovernanceHealth {
                pipeline_ready: true,
                model_type: MODEL_TYPE.into(),
                governance_available: true,
            },
        }
    }
}

fn empty_summary() -> TelemetrySummary {
    TelemetrySummary {
        total_scans: 0,
        verdict_distribution: BTreeMap::new(),
        incomplete_analysis_rate: "0.0%".into(),
        allowlist_override_rate: "0.0%".into(),
        drift_status_distribution: BTreeMap::new(),
        avg_risk_signals_per_scan: 0.0,
        top_risk_signals: Vec::new(),
        top_inconclusive_checks: Vec::new(),
        collection_period: CollectionPeriod::default(),
    }
}

/// Up to five labels, most frequent first, ties in first-seen order.
fn most_frequent<'a>(labels: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut counts: Vec<(&String, usize)> = Vec::new();
    for label in labels {
        match counts.iter_mut().find(|(seen, _)| *seen == label) {
            Some((_, count)) => *count += 1,
            None => counts.push((label, 1)),
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
        .into_iter()
        .take(5)
        .map(|(label, _)| label.clone())
        .collect()
}

#[async_trait]
impl AnalysisApi for FixtureApi {
    async fn scan(&self, url: &str) -> GatewayResult<ScanResult> {
        self.enter().await?;
        if let Some(freeze) = self.freeze_error() {
            return Err(freeze);
        }
        if url.trim().is_empty() {
            return Err(GatewayError::RemoteRejected {
                message: "URL is required".into(),
                status_code: 400,
            });
        }
        self.scans.fetch_add(1, Ordering::SeqCst);
        let sample = sample_for(url.trim());
        self.record_served(&sample);
        accept_scan_result(sample)
    }

    async fn batch_scan(&self, urls: &[String]) -> GatewayResult<BatchScanResponse> {
        self.enter().await?;
        if urls.len() > MAX_BATCH_URLS {
            return Err(GatewayError::RemoteRejected {
                message: format!("Maximum {MAX_BATCH_URLS} URLs per batch"),
                status_code: 400,
            });
        }
        let results: Vec<BatchScanEntry> = urls
            .iter()
            .map(|url| url.trim())
            .filter(|url| !url.is_empty())
            .map(|url| {
                let sample = sample_for(url);
                BatchScanEntry {
                    url: url.to_string(),
                    verdict: BatchVerdict::Scored(sample.verdict),
                    risk_score: Some(sample.risk_score),
                    is_trusted_domain: Some(sample.is_trusted_domain),
                    ml_bypassed: Some(sample.ml_bypassed),
                    error: None,
                }
            })
            .collect();
        if results.is_empty() {
            return Err(GatewayError::RemoteRejected {
                message: "No valid URLs provided".into(),
                status_code: 400,
            });
        }

        let count = |verdict: Verdict| {
            results
                .iter()
                .filter(|entry| entry.verdict == BatchVerdict::Scored(verdict))
                .count()
        };
        Ok(BatchScanResponse {
            success: true,
            total: results.len(),
            phishing_count: count(Verdict::Phishing),
            safe_count: count(Verdict::Safe),
            suspicious_count: count(Verdict::Suspicious),
            results,
        })
    }

    async fn governance_status(&self) -> GatewayResult<GovernanceStatus> {
        self.governance_reads.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;
        Ok(self.status_snapshot())
    }

    async fn unfreeze(&self, _ticket: Option<String>) -> GatewayResult<UnfreezeResponse> {
        self.enter().await?;
        let mut guard = self
            .inner
            .write()
            .map_err(|_| GatewayError::RemoteRejected {
                message: "Failed to unfreeze system".into(),
                status_code: 500,
            })?;

        if guard.freeze.is_none() {
            return Ok(UnfreezeResponse {
                success: true,
                message: Some("System is not frozen".into()),
                error: None,
            });
        }
        if guard.override_count >= MAX_OVERRIDES_PER_HOUR {
            return Err(GatewayError::RemoteRejected {
                message: "Override budget exhausted for this hour".into(),
                status_code: 400,
            });
        }

        guard.freeze = None;
        guard.override_count += 1;
        Ok(UnfreezeResponse {
            success: true,
            message: Some("System unfrozen successfully".into()),
            error: None,
        })
    }

    async fn live_threats(&self) -> GatewayResult<Vec<LiveThreat>> {
        self.enter().await?;
        let now = Utc::now();
        let rows = [
            ("Malware C2", "192.168.45.22 → FinCorp", "Moscow, RU", Severity::Critical, 2),
            ("Cred Harvester", "login-microsoft-secure.com", "Lagos, NG", Severity::Critical, 9),
            ("Port Scan", "10.0.4.120 → Gateway", "Shenzhen, CN", Severity::Suspicious, 17),
            (
                "Phishing Kit",
                "secure-paypal-verify.net",
                "São Paulo, BR",
                Severity::Suspicious,
                31,
            ),
            ("Ransomware", "45.33.32.156 → AWS-EC2", "Kyiv, UA", Severity::Safe, 58),
        ];
        Ok(rows
            .iter()
            .enumerate()
            .map(|(index, (label, entity, location, severity, age_secs))| {
                let timestamp = now - TimeDelta::seconds(*age_secs);
                LiveThreat {
                    id: format!("LIVE-{}-{index}", timestamp.format("%H%M%S")),
                    label: (*label).into(),
                    entity: (*entity).into(),
                    location: (*location).into(),
                    severity: *severity,
                    timestamp,
                }
            })
            .collect())
    }

    async fn threat_map(&self) -> GatewayResult<Vec<ThreatMapPoint>> {
        self.enter().await?;
        let now = Utc::now();
        let routes = [
            ((55.75, 37.62), (40.71, -74.01), "malware", Severity::Critical, "email"),
            ((31.23, 121.47), (51.51, -0.13), "credential_harvesting", Severity::Critical, "web"),
            ((6.52, 3.38), (37.77, -122.42), "social_engineering", Severity::Suspicious, "sms"),
            ((-23.55, -46.64), (48.86, 2.35), "malware", Severity::Safe, "network"),
        ];
        Ok(routes
            .iter()
            .enumerate()
            .map(|(index, (source, target, kind, severity, vector))| {
                let timestamp = now - TimeDelta::seconds(15 * index as i64);
                ThreatMapPoint {
                    threat_id: format!("THR-{index:04}-{}", timestamp.format("%H%M%S")),
                    threat_type: (*kind).into(),
                    severity: *severity,
                    source: Coordinates {
                        lat: source.0,
                        lng: source.1,
                    },
                    target: Coordinates {
                        lat: target.0,
                        lng: target.1,
                    },
                    attack_vector: (*vector).into(),
                    timestamp,
                }
            })
            .collect())
    }

    async fn threat_regions(&self) -> GatewayResult<Vec<RegionCount>> {
        self.enter().await?;
        Ok(vec![
            RegionCount {
                region: "Eastern Europe".into(),
                count: 4281,
            },
            RegionCount {
                region: "Southeast Asia".into(),
                count: 2104,
            },
            RegionCount {
                region: "North America".into(),
                count: 982,
            },
        ])
    }

    async fn trusted_domains(&self) -> GatewayResult<TrustedDomains> {
        self.enter().await?;
        let sample: Vec<String> = [
            "google.com",
            "github.com",
            "microsoft.com",
            "amazon.com",
            "facebook.com",
            "twitter.com",
            "linkedin.com",
            "apple.com",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        Ok(TrustedDomains {
            total_trusted: sample.len() as u64,
            sample_trusted_domains: sample,
            note: "Trusted domains bypass ML and are always marked SAFE".into(),
        })
    }

    async fn health(&self) -> GatewayResult<HealthStatus> {
        self.enter().await?;
        Ok(HealthStatus {
            status: "healthy".into(),
            pipeline_ready: true,
            model_type: MODEL_TYPE.into(),
            governance_available: Some(true),
        })
    }

    async fn telemetry_summary(&self) -> GatewayResult<TelemetrySummary> {
        self.enter().await?;
        Ok(self.telemetry_snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn url_text_selects_sample() {
        let api = FixtureApi::new();
        let safe = api.scan("https://google.com").await.unwrap();
        assert_eq!(safe.verdict, Verdict::Safe);
        assert_eq!(safe.risk_score, SAFE_RISK_SCORE);
        assert!(safe.is_trusted_domain);
        assert!(safe.trust_info.is_some());

        let phishing = api.scan("http://paypal-phishing.example/login").await.unwrap();
        assert_eq!(phishing.verdict, Verdict::Phishing);
        assert_eq!(phishing.risk_score, PHISHING_RISK_SCORE);
        assert!(!phishing.is_trusted_domain);
        assert_eq!(api.scans_served(), 2);
    }

    #[tokio::test]
    async fn telemetry_summarizes_served_scans() {
        let api = FixtureApi::new();
        let empty = api.telemetry_summary().await.unwrap();
        assert_eq!(empty.total_scans, 0);
        assert!(empty.collection_period.started_at().is_none());

        api.scan("https://google.com").await.unwrap();
        api.scan("http://paypal-phishing.example").await.unwrap();
        api.scan("http://suspicious.example").await.unwrap();
        api.scan("http://another-phishing.example").await.unwrap();

        let summary = api.telemetry_summary().await.unwrap();
        assert_eq!(summary.total_scans, 4);
        assert_eq!(summary.verdict_share("PHISHING"), Some(50.0));
        assert_eq!(summary.verdict_share("SAFE"), Some(25.0));
        assert_eq!(summary.incomplete_analysis_rate, "25.0%");
        assert_eq!(summary.avg_risk_signals_per_scan, 1.25);
        assert_eq!(
            summary.top_risk_signals.first().map(String::as_str),
            Some("Brand name appears outside the registered domain")
        );
        assert_eq!(summary.top_inconclusive_checks, vec!["WHOIS lookup timed out"]);
        assert!(summary.collection_period.last_updated_at().is_some());
    }

    #[tokio::test]
    async fn frozen_fixture_rejects_scans_until_unfrozen() {
        let api = FixtureApi::new();
        api.freeze("FP spike");

        let err = api.scan("https://google.com").await.unwrap_err();
        assert!(matches!(
            err,
            GatewayError::GovernanceFreeze { ref reason, .. } if reason == "FP spike"
        ));
        let status = api.governance_status().await.unwrap();
        assert!(status.is_frozen);
        assert!(status.is_consistent());

        api.unfreeze(Some("OPS-1".into())).await.unwrap();
        assert!(!api.is_frozen());
        let status = api.governance_status().await.unwrap();
        assert!(!status.is_frozen);
        assert_eq!(status.budget.override_count_hourly, 1);
    }

    #[tokio::test]
    async fn exhausted_budget_blocks_unfreeze() {
        let api = FixtureApi::new();
        api.set_override_count(MAX_OVERRIDES_PER_HOUR);
        api.freeze("drift");

        let err = api.unfreeze(None).await.unwrap_err();
        assert_eq!(err.status_code(), Some(400));
        assert!(api.is_frozen());
    }

    #[tokio::test]
    async fn batch_counts_match_rows() {
        let api = FixtureApi::new();
        let urls = vec![
            "https://google.com".to_string(),
            "http://phishing.example".to_string(),
            "http://suspicious.example".to_string(),
            "  ".to_string(),
        ];
        let response = api.batch_scan(&urls).await.unwrap();
        assert_eq!(response.total, 3);
        assert_eq!(response.safe_count, 1);
        assert_eq!(response.phishing_count, 1);
        assert_eq!(response.suspicious_count, 1);
    }

    #[tokio::test]
    async fn live_feed_is_most_recent_first() {
        let feed = FixtureApi::new().live_threats().await.unwrap();
        assert!(feed.windows(2).all(|pair| pair[0].timestamp >= pair[1].timestamp));
    }
}
