use serde::{Deserialize, Serialize};

use crate::verdict::{BatchVerdict, Verdict};

/// Largest batch the service accepts in one `/api/batch-scan` call.
pub const MAX_BATCH_URLS: usize = 50;

/// Body of `POST /scan`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRequest {
    pub url: String,
}

impl ScanRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// Human-facing explanation attached to every verdict.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Explanation {
    pub summary: String,
    #[serde(default)]
    pub positive: Vec<String>,
    #[serde(default)]
    pub risk: Vec<String>,
    #[serde(default)]
    pub inconclusive: Vec<String>,
    #[serde(default = "default_true")]
    pub analysis_complete: bool,
    #[serde(default)]
    pub allowlist_override: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocklist_match: Option<bool>,
}

/// Outcome of the trusted-domain gate for a scanned URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustInfo {
    pub is_trusted: bool,
    pub registered_domain: Option<String>,
    pub matched_domain: Option<String>,
    pub reason: Option<String>,
}

/// Network lookups the service could not complete while analysing a URL.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NetworkIssues {
    #[serde(default)]
    pub http_failed: bool,
    pub http_error: Option<String>,
    #[serde(default)]
    pub whois_failed: bool,
    pub whois_error: Option<String>,
    #[serde(default)]
    pub dns_failed: bool,
    pub dns_error: Option<String>,
    #[serde(default)]
    pub any_failed: bool,
}

/// Successful `/scan` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    #[serde(default = "default_true")]
    pub success: bool,
    pub verdict: Verdict,
    pub risk_score: f64,
    pub is_trusted_domain: bool,
    #[serde(default)]
    pub ml_bypassed: bool,
    pub explanation: Explanation,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub url: String,
    /// Free-text label, informational only.
    #[serde(default)]
    pub risk_level: String,
    #[serde(default)]
    pub latency_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_info: Option<TrustInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_issues: Option<NetworkIssues>,
}

impl ScanResult {
    /// Drops `trust_info` when the domain was not trusted.
    ///
    /// The service attaches the trust gate outcome to every response, even
    /// negative ones; the client model only keeps it for trusted domains.
    pub fn into_normalized(mut self) -> Self {
        if !self.is_trusted_domain {
            self.trust_info = None;
        }
        self
    }

    /// Checks the invariants the client relies on.
    pub fn check_invariants(&self) -> Result<(), String> {
        if !self.risk_score.is_finite() || !(0.0..=100.0).contains(&self.risk_score) {
            return Err(format!(
                "risk_score {} outside [0, 100]",
                self.risk_score
            ));
        }
        if self.trust_info.is_some() && !self.is_trusted_domain {
            return Err("trust_info present for an untrusted domain".to_string());
        }
        Ok(())
    }
}

/// Body of `POST /api/batch-scan`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchScanRequest {
    pub urls: Vec<String>,
}

/// One row of a batch scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchScanEntry {
    pub url: String,
    pub verdict: BatchVerdict,
    #[serde(default)]
    pub risk_score: Option<f64>,
    #[serde(default)]
    pub is_trusted_domain: Option<bool>,
    #[serde(default)]
    pub ml_bypassed: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Successful `/api/batch-scan` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchScanResponse {
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default)]
    pub results: Vec<BatchScanEntry>,
    pub total: usize,
    #[serde(default)]
    pub phishing_count: usize,
    #[serde(default)]
    pub safe_count: usize,
    #[serde(default)]
    pub suspicious_count: usize,
}

impl BatchScanResponse {
    /// Entries whose individual analysis failed on the service side.
    pub fn failed(&self) -> impl Iterator<Item = &BatchScanEntry> {
        self.results
            .iter()
            .filter(|entry| entry.verdict == BatchVerdict::Error)
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNTRUSTED_RESPONSE: &str = r#"{
        "success": true,
        "verdict": "PHISHING",
        "risk_score": 92.8,
        "is_trusted_domain": false,
        "ml_bypassed": false,
        "explanation": {
            "summary": "Multiple high-risk indicators.",
            "positive": [],
            "risk": ["Brand impersonation"],
            "inconclusive": [],
            "analysis_complete": true,
            "allowlist_override": false
        },
        "warnings": [],
        "url": "http://paypal-phishing.example",
        "risk_level": "Critical Risk",
        "latency_ms": 41.2,
        "trust_info": {
            "is_trusted": false,
            "registered_domain": "paypal-phishing.example",
            "matched_domain": null,
            "reason": "Not on allowlist"
        }
    }"#;

    #[test]
    fn normalization_strips_negative_trust_info() {
        let parsed: ScanResult = serde_json::from_str(UNTRUSTED_RESPONSE).unwrap();
        assert!(parsed.check_invariants().is_err());

        let normalized = parsed.into_normalized();
        assert!(normalized.trust_info.is_none());
        assert!(normalized.check_invariants().is_ok());
        assert_eq!(normalized.verdict, Verdict::Phishing);
    }

    #[test]
    fn rejects_out_of_range_risk() {
        let mut parsed: ScanResult =
            serde_json::from_str(UNTRUSTED_RESPONSE).unwrap();
        parsed.trust_info = None;
        parsed.risk_score = 140.0;
        assert!(parsed.check_invariants().is_err());
    }

    #[test]
    fn batch_response_lists_failed_rows() {
        let parsed: BatchScanResponse = serde_json::from_str(
            r#"{
                "success": true,
                "results": [
                    {"url": "https://a.example", "verdict": "SAFE", "risk_score": 3.0},
                    {"url": "https://b.example", "verdict": "ERROR", "error": "timeout"}
                ],
                "total": 2,
                "phishing_count": 0,
                "safe_count": 1,
                "suspicious_count": 0
            }"#,
        )
        .unwrap();

        let failed: Vec<_> = parsed.failed().map(|e| e.url.as_str()).collect();
        assert_eq!(failed, vec!["https://b.example"]);
    }
}
