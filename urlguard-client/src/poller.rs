//! Recurring, coalesced reads of one remote resource.
//!
//! A [`PolledResource`] owns the latest snapshot of a resource and publishes
//! it through a `watch` channel, so any number of widgets can subscribe
//! without issuing their own requests. Concurrent refreshes share a single
//! in-flight read. Failures never blank the snapshot: the previous data stays
//! and `is_error` is raised.
//!
//! [`PolledResource::start`] spawns the timer loop and returns a
//! [`PollHandle`]; dropping the handle stops the loop.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::config::PollPolicy;
use crate::error::{GatewayError, GatewayResult};

/// Future produced by a resource's fetch function.
pub type FetchFuture<T> = BoxFuture<'static, GatewayResult<T>>;

type Fetcher<T> = Arc<dyn Fn() -> FetchFuture<T> + Send + Sync>;
type SharedFetch<T> = Shared<BoxFuture<'static, GatewayResult<Arc<T>>>>;

/// What subscribers see of a polled resource.
#[derive(Debug)]
pub struct PollSnapshot<T> {
    /// Last successfully fetched value; kept across failures.
    pub data: Option<Arc<T>>,
    /// When `data` was fetched. `None` after an invalidation.
    pub last_success: Option<Instant>,
    /// A read is in flight.
    pub is_fetching: bool,
    /// The most recent attempt failed.
    pub is_error: bool,
    /// Cleared by the next successful read.
    pub last_error: Option<GatewayError>,
    pub consecutive_failures: u32,
}

impl<T> Clone for PollSnapshot<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            last_success: self.last_success,
            is_fetching: self.is_fetching,
            is_error: self.is_error,
            last_error: self.last_error.clone(),
            consecutive_failures: self.consecutive_failures,
        }
    }
}

impl<T> Default for PollSnapshot<T> {
    fn default() -> Self {
        Self {
            data: None,
            last_success: None,
            is_fetching: false,
            is_error: false,
            last_error: None,
            consecutive_failures: 0,
        }
    }
}

impl<T> PollSnapshot<T> {
    pub fn data(&self) -> Option<&T> {
        self.data.as_deref()
    }

    /// Age of the data at `now`, if any was ever fetched.
    pub fn age(&self, now: Instant) -> Option<Duration> {
        self.last_success
            .map(|fetched| now.saturating_duration_since(fetched))
    }

    /// Stale when never fetched, invalidated, or older than `stale_after`.
    pub fn is_stale(&self, now: Instant, stale_after: Duration) -> bool {
        self.age(now).is_none_or(|age| age >= stale_after)
    }

    /// Data is on screen but the latest refresh failed.
    pub fn is_showing_stale_data(&self) -> bool {
        self.is_error && self.data.is_some()
    }
}

struct InFlight<T> {
    epoch: u64,
    future: SharedFetch<T>,
}

/// One remote resource, its latest snapshot and its refresh machinery.
pub struct PolledResource<T> {
    name: &'static str,
    policy: PollPolicy,
    fetcher: Fetcher<T>,
    snapshot: watch::Sender<PollSnapshot<T>>,
    in_flight: Mutex<Option<InFlight<T>>>,
    epoch: AtomicU64,
}

impl<T> fmt::Debug for PolledResource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot.borrow();
        f.debug_struct("PolledResource")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("has_data", &snapshot.data.is_some())
            .field("is_error", &snapshot.is_error)
            .field("epoch", &self.epoch.load(Ordering::SeqCst))
            .finish()
    }
}

impl<T: Send + Sync + 'static> PolledResource<T> {
    /// Wraps `fetch`; nothing is read until a refresh or [`Self::start`].
    pub fn new<F>(name: &'static str, policy: PollPolicy, fetch: F) -> Arc<Self>
    where
        F: Fn() -> FetchFuture<T> + Send + Sync + 'static,
    {
        let (snapshot, _) = watch::channel(PollSnapshot::default());
        Arc::new(Self {
            name,
            policy,
            fetcher: Arc::new(fetch),
            snapshot,
            in_flight: Mutex::new(None),
            epoch: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    /// Receiver that observes every snapshot replacement.
    pub fn subscribe(&self) -> watch::Receiver<PollSnapshot<T>> {
        self.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> PollSnapshot<T> {
        self.snapshot.borrow().clone()
    }

    /// Last good value, possibly stale.
    pub fn latest(&self) -> Option<Arc<T>> {
        self.snapshot.borrow().data.clone()
    }

    pub fn is_stale(&self) -> bool {
        self.snapshot
            .borrow()
            .is_stale(Instant::now(), self.policy.stale_after)
    }

    /// Refreshes only when the snapshot is stale; otherwise returns the
    /// cached value without touching the network.
    ///
    /// # Errors
    /// The fetch failure, when a fetch happened and failed.
    pub async fn refresh_if_stale(&self) -> GatewayResult<Arc<T>> {
        {
            let snapshot = self.snapshot.borrow();
            if !snapshot.is_stale(Instant::now(), self.policy.stale_after)
                && let Some(data) = &snapshot.data
            {
                return Ok(Arc::clone(data));
            }
        }
        self.refresh().await
    }

    /// Forces a read. Joins the in-flight read when one exists for the
    /// current epoch.
    ///
    /// # Errors
    /// The fetch failure; the snapshot keeps its previous data.
    pub async fn refresh(&self) -> GatewayResult<Arc<T>> {
        let (epoch, future, started) = self.join_or_start();
        if started {
            debug!(resource = self.name, epoch, "fetch started");
            self.snapshot.send_modify(|snapshot| snapshot.is_fetching = true);
        }

        let outcome = future.clone().await;
        self.finish(epoch, &future, &outcome);
        outcome
    }

    /// Marks the snapshot stale so the next read refetches.
    ///
    /// Reads already in flight belong to the previous epoch and will not
    /// commit.
    pub fn invalidate(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.snapshot.send_modify(|snapshot| {
            snapshot.last_success = None;
            snapshot.is_fetching = false;
        });
        debug!(resource = self.name, "snapshot invalidated");
    }

    /// Replaces the snapshot wholesale with `value` and invalidates it.
    ///
    /// The new value is visible immediately; the next poll still refetches.
    pub fn replace(&self, value: T) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.snapshot.send_replace(PollSnapshot {
            data: Some(Arc::new(value)),
            ..PollSnapshot::default()
        });
        debug!(resource = self.name, "snapshot replaced");
    }

    /// Spawns the recurring read loop.
    pub fn start(self: &Arc<Self>) -> PollHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(poll_loop(Arc::clone(self), stop_rx));
        debug!(resource = self.name, interval = ?self.policy.interval, "poller started");
        PollHandle {
            name: self.name,
            stop_tx,
            task: Some(task),
        }
    }

    fn join_or_start(&self) -> (u64, SharedFetch<T>, bool) {
        let mut slot = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let epoch = self.epoch.load(Ordering::SeqCst);

        if let Some(in_flight) = slot.as_ref()
            && in_flight.epoch == epoch
        {
            return (epoch, in_flight.future.clone(), false);
        }

        let future = (self.fetcher)()
            .map(|outcome| outcome.map(Arc::new))
            .boxed()
            .shared();
        *slot = Some(InFlight {
            epoch,
            future: future.clone(),
        });
        (epoch, future, true)
    }

    /// Commits a finished read once, and only if its epoch is still current.
    fn finish(
        &self,
        epoch: u64,
        future: &SharedFetch<T>,
        outcome: &GatewayResult<Arc<T>>,
    ) {
        {
            let mut slot = self
                .in_flight
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match slot.as_ref() {
                Some(in_flight) if in_flight.future.ptr_eq(future) => {
                    *slot = None;
                }
                // another waiter already committed this read, or it was superseded
                _ => return,
            }
        }

        if epoch != self.epoch.load(Ordering::SeqCst) {
            debug!(resource = self.name, epoch, "discarding read from an older epoch");
            return;
        }

        let previous = self.snapshot.borrow().clone();
        let next = match outcome {
            Ok(data) => PollSnapshot {
                data: Some(Arc::clone(data)),
                last_success: Some(Instant::now()),
                is_fetching: false,
                is_error: false,
                last_error: None,
                consecutive_failures: 0,
            },
            Err(err) => {
                warn!(
                    resource = self.name,
                    error = %err,
                    "refresh failed, keeping last snapshot"
                );
                PollSnapshot {
                    data: previous.data,
                    last_success: previous.last_success,
                    is_fetching: false,
                    is_error: true,
                    last_error: Some(err.clone()),
                    consecutive_failures: previous.consecutive_failures.saturating_add(1),
                }
            }
        };
        self.snapshot.send_replace(next);
    }

    /// Drops an in-flight read nobody is awaiting any more.
    fn release_abandoned_read(&self) {
        let mut slot = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let abandoned = slot
            .as_ref()
            .is_some_and(|in_flight| in_flight.future.strong_count() == Some(1));
        if abandoned {
            *slot = None;
            drop(slot);
            self.snapshot.send_modify(|snapshot| snapshot.is_fetching = false);
            debug!(resource = self.name, "abandoned in-flight read");
        }
    }
}

async fn poll_loop<T: Send + Sync + 'static>(
    resource: Arc<PolledResource<T>>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let policy = resource.policy;
    let mut ticker = time::interval(policy.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut next_allowed = Instant::now();

    loop {
        // `tick` yields the scheduled instant, so fetch latency never
        // shifts the backoff window.
        let tick_at = tokio::select! {
            _ = stop_rx.wait_for(|stopped| *stopped) => break,
            tick_at = ticker.tick() => tick_at,
        };
        if tick_at < next_allowed {
            continue;
        }

        let outcome = tokio::select! {
            _ = stop_rx.wait_for(|stopped| *stopped) => break,
            outcome = resource.refresh_if_stale() => outcome,
        };
        next_allowed = match outcome {
            Err(_) if policy.max_backoff.is_some() => {
                let failures = resource.snapshot.borrow().consecutive_failures;
                let delay = policy.next_delay(failures);
                debug!(resource = resource.name, failures, ?delay, "backing off");
                tick_at + delay
            }
            _ => tick_at,
        };
    }

    resource.release_abandoned_read();
    debug!(resource = resource.name, "poller stopped");
}

/// Start/stop handle for a running poll loop. Dropping it stops the loop.
#[derive(Debug)]
pub struct PollHandle {
    name: &'static str,
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl PollHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// False once the loop has observed the stop signal and exited.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stops the timer loop.
    ///
    /// A read the loop itself started is cancelled and `is_fetching` drops
    /// back to `false`. A read other callers are awaiting runs to completion
    /// and commits as usual.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.stop_tx.send(true);
        self.task.take();
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    use super::*;

    fn counting_resource(
        calls: Arc<AtomicUsize>,
        fail: Arc<AtomicBool>,
    ) -> Arc<PolledResource<usize>> {
        let policy = PollPolicy::new(Duration::from_secs(10), Duration::from_secs(8));
        counting_resource_with(policy, calls, fail)
    }

    fn counting_resource_with(
        policy: PollPolicy,
        calls: Arc<AtomicUsize>,
        fail: Arc<AtomicBool>,
    ) -> Arc<PolledResource<usize>> {
        PolledResource::new("counter", policy, move || {
            let calls = Arc::clone(&calls);
            let fail = Arc::clone(&fail);
            async move {
                time::sleep(Duration::from_millis(100)).await;
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if fail.load(Ordering::SeqCst) {
                    Err(GatewayError::TransportUnavailable {
                        message: "down".into(),
                    })
                } else {
                    Ok(n)
                }
            }
            .boxed()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_refreshes_share_one_read() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resource = counting_resource(Arc::clone(&calls), Default::default());

        let (a, b, c) = tokio::join!(resource.refresh(), resource.refresh(), resource.refresh());
        assert_eq!(*a.unwrap(), 1);
        assert_eq!(*b.unwrap(), 1);
        assert_eq!(*c.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!resource.snapshot().is_fetching);
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_snapshot_suppresses_refetch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resource = counting_resource(Arc::clone(&calls), Default::default());

        resource.refresh_if_stale().await.unwrap();
        time::advance(Duration::from_secs(5)).await;
        resource.refresh_if_stale().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        time::advance(Duration::from_secs(4)).await;
        resource.refresh_if_stale().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_keeps_last_known_data() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fail = Arc::new(AtomicBool::new(false));
        let resource = counting_resource(Arc::clone(&calls), Arc::clone(&fail));

        resource.refresh().await.unwrap();
        fail.store(true, Ordering::SeqCst);
        assert!(resource.refresh().await.is_err());

        let snapshot = resource.snapshot();
        assert_eq!(snapshot.data().copied(), Some(1));
        assert!(snapshot.is_error);
        assert!(snapshot.is_showing_stale_data());
        assert_eq!(snapshot.consecutive_failures, 1);

        fail.store(false, Ordering::SeqCst);
        resource.refresh().await.unwrap();
        let snapshot = resource.snapshot();
        assert!(!snapshot.is_error);
        assert_eq!(snapshot.consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn replace_discards_older_in_flight_read() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resource = counting_resource(Arc::clone(&calls), Default::default());

        let pending = {
            let resource = Arc::clone(&resource);
            tokio::spawn(async move { resource.refresh().await })
        };
        tokio::task::yield_now().await;
        resource.replace(42);

        let stale = pending.await.unwrap().unwrap();
        assert_eq!(*stale, 1);
        assert_eq!(resource.latest().as_deref().copied(), Some(42));
        assert!(resource.is_stale());
    }

    #[tokio::test(start_paused = true)]
    async fn poll_loop_runs_until_handle_dropped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resource = counting_resource(Arc::clone(&calls), Default::default());
        let mut rx = resource.subscribe();

        let handle = resource.start();
        rx.wait_for(|snapshot| snapshot.data.is_some()).await.unwrap();
        assert!(handle.is_running());

        time::sleep(Duration::from_secs(31)).await;
        let seen = calls.load(Ordering::SeqCst);
        assert!(seen >= 3, "expected repeated polls, saw {seen}");

        drop(handle);
        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(calls.load(Ordering::SeqCst), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_loop_without_backoff_keeps_its_interval() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fail = Arc::new(AtomicBool::new(true));
        let resource = counting_resource(Arc::clone(&calls), fail);

        let _handle = resource.start();
        time::sleep(Duration::from_secs(55)).await;
        // ticks at 0, 10, 20, 30, 40 and 50
        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert_eq!(resource.snapshot().consecutive_failures, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_loop_backs_off_from_the_tick() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fail = Arc::new(AtomicBool::new(true));
        let policy = PollPolicy::new(Duration::from_secs(5), Duration::from_secs(4))
            .with_max_backoff(Duration::from_secs(60));
        let resource = counting_resource_with(policy, Arc::clone(&calls), Arc::clone(&fail));

        let _handle = resource.start();
        // reads at 0, 10, 30, 70, then capped at 130
        time::sleep(Duration::from_secs(75)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 5);

        fail.store(false, Ordering::SeqCst);
        time::sleep(Duration::from_secs(60)).await;
        let snapshot = resource.snapshot();
        assert!(!snapshot.is_error);
        assert_eq!(snapshot.consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stopping_mid_read_clears_fetching() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resource = counting_resource(Arc::clone(&calls), Default::default());
        let mut rx = resource.subscribe();

        let handle = resource.start();
        rx.wait_for(|snapshot| snapshot.is_fetching).await.unwrap();
        handle.stop();
        rx.wait_for(|snapshot| !snapshot.is_fetching).await.unwrap();

        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(resource.snapshot().data.is_none());

        assert_eq!(*resource.refresh().await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stopping_leaves_a_shared_read_to_its_waiter() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resource = counting_resource(Arc::clone(&calls), Default::default());
        let mut rx = resource.subscribe();

        let handle = resource.start();
        rx.wait_for(|snapshot| snapshot.is_fetching).await.unwrap();
        let waiter = {
            let resource = Arc::clone(&resource);
            tokio::spawn(async move { resource.refresh().await })
        };
        tokio::task::yield_now().await;
        handle.stop();

        assert_eq!(*waiter.await.unwrap().unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(resource.latest().as_deref().copied(), Some(1));
    }
}
