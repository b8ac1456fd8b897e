use serde::{Deserialize, Serialize};

/// `error` label the service puts on every freeze rejection.
pub const FREEZE_ERROR_LABEL: &str = "SYSTEM FROZEN";

/// Body of a 503 response while the service is frozen.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FreezeEnvelope {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub actions: Option<String>,
}

/// Body of any other non-success response.
///
/// Every field is optional so that a partially-shaped error body still
/// yields whatever message it carries.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
}
