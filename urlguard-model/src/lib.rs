//! Wire data model for the URL-analysis service.
//!
//! Every type here is an immutable value snapshot: pollers and state
//! machines replace them wholesale and never patch fields in place.
#![allow(missing_docs)]

pub mod envelope;
pub mod governance;
pub mod routes;
pub mod scan;
pub mod service;
pub mod telemetry;
pub mod threats;
pub mod verdict;

pub use envelope::{ErrorEnvelope, FreezeEnvelope, FREEZE_ERROR_LABEL};
pub use governance::{
    GovernanceBudget, GovernanceHealth, GovernanceStatus, UnfreezeRequest,
    UnfreezeResponse,
};
pub use scan::{
    BatchScanEntry, BatchScanRequest, BatchScanResponse, Explanation,
    MAX_BATCH_URLS, NetworkIssues, ScanRequest, ScanResult, TrustInfo,
};
pub use service::{HealthStatus, TrustedDomains};
pub use telemetry::{CollectionPeriod, TelemetrySummary};
pub use threats::{
    Coordinates, LiveThreat, RegionCount, Severity, ThreatMapPoint,
};
pub use verdict::{BatchVerdict, Verdict};
