//! Service trait over the analysis API.
//!
//! Widgets, pollers and workflows depend on [`AnalysisApi`] rather than on
//! the HTTP gateway, so the fixture service (or a test double) can stand in
//! for the network.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};
use urlguard_model::routes::{self, api};
use urlguard_model::{
    BatchScanRequest, BatchScanResponse, GovernanceStatus, HealthStatus, LiveThreat, RegionCount,
    ScanRequest, ScanResult, TelemetrySummary, ThreatMapPoint, TrustedDomains, UnfreezeRequest,
    UnfreezeResponse,
};

use crate::config::ClientConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::fixtures::FixtureApi;
use crate::gateway::HttpGateway;

/// Every operation the client performs against the analysis service.
#[async_trait]
pub trait AnalysisApi: Send + Sync + Debug {
    /// Analyse one URL.
    async fn scan(&self, url: &str) -> GatewayResult<ScanResult>;

    /// Analyse up to [`urlguard_model::MAX_BATCH_URLS`] URLs in one call.
    async fn batch_scan(&self, urls: &[String]) -> GatewayResult<BatchScanResponse>;

    async fn governance_status(&self) -> GatewayResult<GovernanceStatus>;

    /// Privileged: lift a freeze. Always forced.
    async fn unfreeze(&self, ticket: Option<String>) -> GatewayResult<UnfreezeResponse>;

    async fn live_threats(&self) -> GatewayResult<Vec<LiveThreat>>;

    async fn threat_map(&self) -> GatewayResult<Vec<ThreatMapPoint>>;

    async fn threat_regions(&self) -> GatewayResult<Vec<RegionCount>>;

    async fn trusted_domains(&self) -> GatewayResult<TrustedDomains>;

    async fn health(&self) -> GatewayResult<HealthStatus>;

    /// Aggregate explanation metrics for operators.
    async fn telemetry_summary(&self) -> GatewayResult<TelemetrySummary>;
}

/// Builds the service selected by `config`: fixtures or HTTP.
///
/// # Errors
/// Propagates [`HttpGateway::new`] failures.
pub fn build_api(config: &ClientConfig) -> GatewayResult<Arc<dyn AnalysisApi>> {
    if config.use_fixtures {
        info!("serving analysis calls from fixtures");
        return Ok(Arc::new(FixtureApi::new()));
    }
    info!(base_url = %config.base_url, "serving analysis calls over http");
    Ok(Arc::new(HttpGateway::new(config)?))
}

/// Validates a scan body against the client-side invariants.
pub(crate) fn accept_scan_result(result: ScanResult) -> GatewayResult<ScanResult> {
    if result.trust_info.is_some() && !result.is_trusted_domain {
        debug!(url = %result.url, "dropping trust_info for untrusted domain");
    }
    let result = result.into_normalized();
    result
        .check_invariants()
        .map_err(|message| GatewayError::MalformedResponse { message })?;
    Ok(result)
}

/// A 2xx unfreeze body with `success: false` is still a rejection.
pub(crate) fn accept_unfreeze(
    response: UnfreezeResponse,
) -> GatewayResult<UnfreezeResponse> {
    if response.success {
        return Ok(response);
    }
    Err(GatewayError::RemoteRejected {
        message: response
            .error
            .or(response.message)
            .unwrap_or_else(|| "Unfreeze was not applied".to_string()),
        status_code: 200,
    })
}

#[async_trait]
impl AnalysisApi for HttpGateway {
    async fn scan(&self, url: &str) -> GatewayResult<ScanResult> {
        let result: ScanResult = self
            .post(routes::SCAN, &ScanRequest::new(url), false)
            .await?;
        accept_scan_result(result)
    }

    async fn batch_scan(&self, urls: &[String]) -> GatewayResult<BatchScanResponse> {
        let body = BatchScanRequest {
            urls: urls.to_vec(),
        };
        self.post(api::BATCH_SCAN, &body, false).await
    }

    async fn governance_status(&self) -> GatewayResult<GovernanceStatus> {
        self.get(api::governance::STATUS).await
    }

    async fn unfreeze(&self, ticket: Option<String>) -> GatewayResult<UnfreezeResponse> {
        let response: UnfreezeResponse = self
            .post(
                api::governance::UNFREEZE,
                &UnfreezeRequest::forced(ticket),
                true,
            )
            .await?;
        accept_unfreeze(response)
    }

    async fn live_threats(&self) -> GatewayResult<Vec<LiveThreat>> {
        self.get(api::threats::LIVE).await
    }

    async fn threat_map(&self) -> GatewayResult<Vec<ThreatMapPoint>> {
        self.get(api::threats::MAP_DATA).await
    }

    async fn threat_regions(&self) -> GatewayResult<Vec<RegionCount>> {
        self.get(api::threats::REGIONS).await
    }

    async fn trusted_domains(&self) -> GatewayResult<TrustedDomains> {
        self.get(api::TRUSTED_DOMAINS).await
    }

    async fn health(&self) -> GatewayResult<HealthStatus> {
        self.get(routes::HEALTH).await
    }

    async fn telemetry_summary(&self) -> GatewayResult<TelemetrySummary> {
        self.get(api::telemetry::SUMMARY).await
    }
}
