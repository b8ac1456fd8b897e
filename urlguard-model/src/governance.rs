use serde::{Deserialize, Serialize};

/// Snapshot returned by `GET /api/governance/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernanceStatus {
    pub is_frozen: bool,
    pub freeze_reason: Option<String>,
    pub frozen_at: Option<String>,
    pub frozen_by: Option<String>,
    pub incident_id: Option<String>,
    pub budget: GovernanceBudget,
    pub health: GovernanceHealth,
}

impl GovernanceStatus {
    /// Freeze details are all present exactly when the service is frozen.
    pub fn is_consistent(&self) -> bool {
        let details = [
            &self.freeze_reason,
            &self.frozen_at,
            &self.frozen_by,
            &self.incident_id,
        ];
        let freeze_ok = if self.is_frozen {
            details.iter().all(|field| field.is_some())
        } else {
            details.iter().all(|field| field.is_none())
        };
        freeze_ok && self.budget.is_consistent()
    }

    /// A fresh snapshot describing the same service after a freeze was lifted.
    pub fn unfrozen(&self) -> Self {
        Self {
            is_frozen: false,
            freeze_reason: None,
            frozen_at: None,
            frozen_by: None,
            incident_id: None,
            budget: self.budget.clone(),
            health: self.health.clone(),
        }
    }
}

/// Hourly emergency-override budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceBudget {
    pub override_count_hourly: u32,
    pub max_overrides_per_hour: u32,
    pub budget_exhausted: bool,
    pub window_start: Option<String>,
}

impl GovernanceBudget {
    /// Share of the hourly budget already spent, in percent.
    ///
    /// A zero-sized budget counts as fully spent.
    pub fn budget_percentage(&self) -> f64 {
        if self.max_overrides_per_hour == 0 {
            return 100.0;
        }
        f64::from(self.override_count_hourly) / f64::from(self.max_overrides_per_hour)
            * 100.0
    }

    pub fn is_consistent(&self) -> bool {
        let spent = self.override_count_hourly >= self.max_overrides_per_hour;
        self.budget_exhausted == spent
    }

    pub fn remaining(&self) -> u32 {
        self.max_overrides_per_hour
            .saturating_sub(self.override_count_hourly)
    }
}

/// Informational service health; never gates client behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceHealth {
    pub pipeline_ready: bool,
    pub model_type: String,
    pub governance_available: bool,
}

/// Body of `POST /api/governance/unfreeze`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnfreezeRequest {
    pub force: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket: Option<String>,
}

impl UnfreezeRequest {
    /// Overrides are always forced; there is no conditional unfreeze.
    pub fn forced(ticket: Option<String>) -> Self {
        Self {
            force: true,
            ticket: ticket.filter(|ticket| !ticket.trim().is_empty()),
        }
    }
}

/// Response of `POST /api/governance/unfreeze`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnfreezeResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}
