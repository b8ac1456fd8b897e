#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use urlguard_client::config::ClientConfig;
use urlguard_client::{AnalysisApi, FixtureApi, GatewayError, GatewayResult, HttpGateway};
use urlguard_model::{
    BatchScanResponse, GovernanceStatus, HealthStatus, LiveThreat, RegionCount, ScanResult,
    TelemetrySummary, ThreatMapPoint, TrustedDomains, UnfreezeResponse,
};

/// Serves `router` on an ephemeral local port and returns its base URL.
pub async fn spawn_server(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("test server");
    });
    format!("http://{addr}")
}

pub fn gateway_for(base_url: &str) -> HttpGateway {
    let config = ClientConfig::new(base_url).expect("valid base url");
    HttpGateway::new(&config).expect("gateway")
}

/// A base URL nothing listens on.
pub async fn unreachable_base_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    format!("http://{addr}")
}

/// Scan outcomes are released by the test, in whatever order it likes.
/// Everything else is answered by [`FixtureApi`].
#[derive(Debug, Default)]
pub struct ScriptedApi {
    pending: Mutex<HashMap<String, oneshot::Receiver<GatewayResult<ScanResult>>>>,
    fallback: FixtureApi,
}

impl ScriptedApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers `url`; its scan resolves when the returned sender fires.
    pub fn script(&self, url: &str) -> oneshot::Sender<GatewayResult<ScanResult>> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("script lock")
            .insert(url.to_string(), rx);
        tx
    }
}

#[async_trait]
impl AnalysisApi for ScriptedApi {
    async fn scan(&self, url: &str) -> GatewayResult<ScanResult> {
        let scripted = self.pending.lock().expect("script lock").remove(url);
        match scripted {
            Some(rx) => rx.await.unwrap_or_else(|_| {
                Err(GatewayError::TransportUnavailable {
                    message: "script dropped".into(),
                })
            }),
            None => self.fallback.scan(url).await,
        }
    }

    async fn batch_scan(&self, urls: &[String]) -> GatewayResult<BatchScanResponse> {
        self.fallback.batch_scan(urls).await
    }

    async fn governance_status(&self) -> GatewayResult<GovernanceStatus> {
        self.fallback.governance_status().await
    }

    async fn unfreeze(&self, ticket: Option<String>) -> GatewayResult<UnfreezeResponse> {
        self.fallback.unfreeze(ticket).await
    }

    async fn live_threats(&self) -> GatewayResult<Vec<LiveThreat>> {
        self.fallback.live_threats().await
    }

    async fn threat_map(&self) -> GatewayResult<Vec<ThreatMapPoint>> {
        self.fallback.threat_map().await
    }

    async fn threat_regions(&self) -> GatewayResult<Vec<RegionCount>> {
        self.fallback.threat_regions().await
    }

    async fn trusted_domains(&self) -> GatewayResult<TrustedDomains> {
        self.fallback.trusted_domains().await
    }

    async fn health(&self) -> GatewayResult<HealthStatus> {
        self.fallback.health().await
    }

    async fn telemetry_summary(&self) -> GatewayResult<TelemetrySummary> {
        self.fallback.telemetry_summary().await
    }
}
