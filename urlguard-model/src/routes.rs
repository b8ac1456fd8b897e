/// Route definitions exposed by the analysis service.
pub const SCAN: &str = "/scan";
pub const HEALTH: &str = "/health";

pub mod api {
    pub const BATCH_SCAN: &str = "/api/batch-scan";
    pub const TRUSTED_DOMAINS: &str = "/api/trusted-domains";

    pub mod governance {
        pub const STATUS: &str = "/api/governance/status";
        pub const UNFREEZE: &str = "/api/governance/unfreeze";
    }

    pub mod threats {
        pub const LIVE: &str = "/api/threats/live";
        pub const MAP_DATA: &str = "/api/threats/map-data";
        pub const REGIONS: &str = "/api/threats/regions";
    }

    pub mod telemetry {
        pub const SUMMARY: &str = "/api/telemetry/summary";
    }
}

/// Header carrying the operator credential on privileged requests.
pub const ADMIN_KEY_HEADER: &str = "X-Admin-Key";
