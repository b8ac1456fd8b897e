use serde::{Deserialize, Serialize};

/// Response of `GET /api/trusted-domains`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedDomains {
    pub sample_trusted_domains: Vec<String>,
    pub total_trusted: u64,
    #[serde(default)]
    pub note: String,
}

/// Response of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub pipeline_ready: bool,
    pub model_type: String,
    #[serde(default)]
    pub governance_available: Option<bool>,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy" || self.status == "ok"
    }
}
