//! Read-only dashboard feeds: live threats, map points and region counts.
//!
//! Each feed is an independent [`PolledResource`] with its own interval,
//! staleness window and backoff. Sequences are kept in the order the
//! service delivered them.

use std::sync::Arc;

use futures::FutureExt;
use urlguard_model::{LiveThreat, RegionCount, ThreatMapPoint};

use crate::api::AnalysisApi;
use crate::config::PollingConfig;
use crate::poller::{PollHandle, PolledResource};

#[derive(Debug, Clone)]
pub struct ThreatFeeds {
    pub live: Arc<PolledResource<Vec<LiveThreat>>>,
    pub map: Arc<PolledResource<Vec<ThreatMapPoint>>>,
    pub regions: Arc<PolledResource<Vec<RegionCount>>>,
}

impl ThreatFeeds {
    /// Builds the three pollers; none runs until [`Self::start_all`].
    pub fn new(api: &Arc<dyn AnalysisApi>, polling: &PollingConfig) -> Self {
        let live = {
            let api = Arc::clone(api);
            PolledResource::new("live_feed", polling.live_feed, move || {
                let api = Arc::clone(&api);
                async move { api.live_threats().await }.boxed()
            })
        };
        let map = {
            let api = Arc::clone(api);
            PolledResource::new("threat_map", polling.threat_map, move || {
                let api = Arc::clone(&api);
                async move { api.threat_map().await }.boxed()
            })
        };
        let regions = {
            let api = Arc::clone(api);
            PolledResource::new("regions", polling.regions, move || {
                let api = Arc::clone(&api);
                async move { api.threat_regions().await }.boxed()
            })
        };
        Self { live, map, regions }
    }

    /// Starts all three loops. Dropping the returned handles stops them.
    pub fn start_all(&self) -> Vec<PollHandle> {
        vec![self.live.start(), self.map.start(), self.regions.start()]
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time;

    use super::*;
    use crate::fixtures::FixtureApi;

    #[tokio::test(start_paused = true)]
    async fn feeds_keep_delivered_order_and_last_data_on_failure() {
        let fixture = FixtureApi::new();
        let api: Arc<dyn AnalysisApi> = Arc::new(fixture.clone());
        let feeds = ThreatFeeds::new(&api, &PollingConfig::default());

        let live = feeds.live.refresh().await.unwrap();
        let delivered = api.live_threats().await.unwrap();
        let ids: Vec<_> = live.iter().map(|threat| threat.label.clone()).collect();
        let expected: Vec<_> = delivered.iter().map(|threat| threat.label.clone()).collect();
        assert_eq!(ids, expected);

        fixture.set_offline(true);
        time::advance(Duration::from_secs(5)).await;
        assert!(feeds.live.refresh_if_stale().await.is_err());

        let snapshot = feeds.live.snapshot();
        assert!(snapshot.is_showing_stale_data());
        assert_eq!(snapshot.data().map(Vec::len), Some(live.len()));
    }

    #[tokio::test(start_paused = true)]
    async fn start_all_populates_every_feed() {
        let api: Arc<dyn AnalysisApi> = Arc::new(FixtureApi::new());
        let feeds = ThreatFeeds::new(&api, &PollingConfig::default());
        let handles = feeds.start_all();

        let mut regions = feeds.regions.subscribe();
        regions
            .wait_for(|snapshot| snapshot.data.is_some())
            .await
            .unwrap();
        time::sleep(Duration::from_millis(10)).await;

        assert!(feeds.live.latest().is_some());
        assert!(feeds.map.latest().is_some());
        assert_eq!(handles.len(), 3);
        assert!(handles.iter().all(PollHandle::is_running));
    }
}
