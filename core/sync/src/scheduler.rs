//! Sync scheduling - immediate and periodic requests.
//!
//! Requests are queued to a single worker ([`SyncSchedulerHandle::run`]) that
//! spawns one session task per input. A trigger for an input whose session is
//! still running is dropped rather than queued behind it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::{self, JoinError, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::session::SyncSession;
use crate::state::SyncReport;
use crate::status::{StatusSender, SyncStatus, SyncStatusEvent};
use crate::window::check_period;
use epgsync_common::{Clock, Error, ErrorReason, InputId, Result};
use epgsync_source::{ProgramSource, SourceRegistry};
use epgsync_storage::Store;

/// What caused a sync request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    Immediate,
    Periodic,
}

/// Message sent to the scheduler worker.
#[derive(Debug)]
pub enum SyncRequest {
    /// Run a session for `input` over a window of `window_ms`.
    Sync {
        input: InputId,
        window_ms: i64,
        trigger: SyncTrigger,
        /// Cancellation generation of the input when the request was made.
        generation: u64,
    },
    /// Stop the worker.
    Shutdown,
}

#[derive(Default)]
struct Registrations {
    /// Token of the in-flight session per input.
    active: HashMap<InputId, CancellationToken>,
    /// Token of the recurring trigger per input.
    periodic: HashMap<InputId, CancellationToken>,
    /// Bumped by every cancel so queued requests from before it are dropped.
    generations: HashMap<InputId, u64>,
    /// Report of the last session that returned one.
    reports: HashMap<InputId, SyncReport>,
}

impl Registrations {
    fn generation(&self, input: &InputId) -> u64 {
        self.generations.get(input).copied().unwrap_or(0)
    }
}

struct Shared {
    config: SyncConfig,
    sources: RwLock<SourceRegistry>,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    status: StatusSender,
    registrations: Mutex<Registrations>,
    shutdown: CancellationToken,
}

/// Front end for requesting syncs. Cheap to clone.
#[derive(Clone)]
pub struct SyncScheduler {
    shared: Arc<Shared>,
    request_tx: mpsc::Sender<SyncRequest>,
}

impl SyncScheduler {
    /// Create a scheduler writing to `store`, returning the worker handle
    /// that must be run for requests to be served.
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> (Self, SyncSchedulerHandle) {
        let (request_tx, request_rx) = mpsc::channel(config.request_queue_capacity.max(1));
        let status = StatusSender::new(config.status_channel_capacity);

        let shared = Arc::new(Shared {
            config,
            sources: RwLock::new(SourceRegistry::new()),
            store,
            clock,
            status,
            registrations: Mutex::new(Registrations::default()),
            shutdown: CancellationToken::new(),
        });

        let scheduler = Self {
            shared: shared.clone(),
            request_tx,
        };
        let handle = SyncSchedulerHandle { shared, request_rx };

        (scheduler, handle)
    }

    /// Configuration the scheduler was created with.
    pub fn config(&self) -> &SyncConfig {
        &self.shared.config
    }

    /// Register the program source of an input.
    ///
    /// # Errors
    /// - `InvalidInput` if the input already has a source
    pub async fn register_source(&self, input: InputId, source: Arc<dyn ProgramSource>) -> Result<()> {
        let name = source.name().to_string();
        self.shared.sources.write().await.register(input.clone(), source)?;
        info!(input = %input, source = %name, "Registered program source");
        Ok(())
    }

    /// Cancel all syncs of an input and forget its source.
    pub async fn unregister_source(&self, input: &InputId) -> Option<Arc<dyn ProgramSource>> {
        self.cancel_all_sync_requests(input).await;
        self.shared.sources.write().await.unregister(input)
    }

    /// Subscribe to status events of every input.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncStatusEvent> {
        self.shared.status.subscribe()
    }

    /// Request a one-off sync of `period_ms` of guide data.
    ///
    /// Dropped if a session for the input is already running. Periodic
    /// registrations are left alone.
    ///
    /// # Errors
    /// - `InvalidInput` if `period_ms` is not positive or too long
    /// - `NotFound` if the input has no source
    /// - `SchedulerStopped` if the worker is gone
    pub async fn request_immediate_sync(&self, input: &InputId, period_ms: i64) -> Result<()> {
        check_period(period_ms)?;
        self.ensure_source(input).await?;

        let generation = self.shared.registrations.lock().await.generation(input);
        debug!(input = %input, period_ms, "Queueing immediate sync");
        self.request_tx
            .send(SyncRequest::Sync {
                input: input.clone(),
                window_ms: period_ms,
                trigger: SyncTrigger::Immediate,
                generation,
            })
            .await
            .map_err(|_| Error::SchedulerStopped)
    }

    /// Register a recurring sync of `period_ms` of guide data at the
    /// configured interval, replacing any previous registration.
    pub async fn request_periodic_sync(&self, input: &InputId, period_ms: i64) -> Result<()> {
        let every = self.shared.config.sync_interval()?;
        self.request_periodic_sync_every(input, period_ms, every).await
    }

    /// Register a recurring sync of `period_ms` of guide data every `every`,
    /// replacing any previous registration. The first sync fires one interval
    /// from now.
    ///
    /// # Errors
    /// - `InvalidInput` if `every` is zero or `period_ms` is not a usable
    ///   window length
    /// - `NotFound` if the input has no source
    /// - `SchedulerStopped` if the scheduler was shut down
    pub async fn request_periodic_sync_every(
        &self,
        input: &InputId,
        period_ms: i64,
        every: Duration,
    ) -> Result<()> {
        check_period(period_ms)?;
        if every.is_zero() {
            return Err(Error::InvalidInput("Sync interval must be positive".to_string()));
        }
        self.ensure_source(input).await?;
        if self.shared.shutdown.is_cancelled() {
            return Err(Error::SchedulerStopped);
        }

        let token = self.shared.shutdown.child_token();
        let generation = {
            let mut registrations = self.shared.registrations.lock().await;
            if let Some(previous) = registrations.periodic.insert(input.clone(), token.clone()) {
                previous.cancel();
                debug!(input = %input, "Replaced periodic sync registration");
            }
            registrations.generation(input)
        };

        info!(input = %input, period_ms, every = ?every, "Registered periodic sync");
        tokio::spawn(run_periodic(
            self.request_tx.clone(),
            input.clone(),
            period_ms,
            every,
            generation,
            token,
        ));
        Ok(())
    }

    /// Remove the periodic registration of an input and cancel its running
    /// session. Requests already queued for the input are dropped.
    pub async fn cancel_all_sync_requests(&self, input: &InputId) {
        let mut registrations = self.shared.registrations.lock().await;
        *registrations.generations.entry(input.clone()).or_insert(0) += 1;

        if let Some(token) = registrations.periodic.remove(input) {
            token.cancel();
        }
        if let Some(token) = registrations.active.get(input) {
            token.cancel();
        }
        info!(input = %input, "Cancelled all sync requests");
    }

    /// Whether a session for the input is running.
    pub async fn is_syncing(&self, input: &InputId) -> bool {
        self.shared.registrations.lock().await.active.contains_key(input)
    }

    /// Whether the input has a periodic registration.
    pub async fn is_periodic(&self, input: &InputId) -> bool {
        self.shared.registrations.lock().await.periodic.contains_key(input)
    }

    /// Report of the last session of the input that returned one.
    pub async fn last_report(&self, input: &InputId) -> Option<SyncReport> {
        self.shared.registrations.lock().await.reports.get(input).cloned()
    }

    /// Cancel everything and stop the worker once running sessions end.
    pub async fn shutdown(&self) {
        self.shared.shutdown.cancel();
        let _ = self.request_tx.send(SyncRequest::Shutdown).await;
    }

    async fn ensure_source(&self, input: &InputId) -> Result<()> {
        self.shared.sources.read().await.resolve(input).map(|_| ())
    }
}

/// Send a sync request every `every` until `token` is cancelled.
async fn run_periodic(
    request_tx: mpsc::Sender<SyncRequest>,
    input: InputId,
    window_ms: i64,
    every: Duration,
    generation: u64,
    token: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!(input = %input, "Periodic sync stopped");
                break;
            }
            _ = ticker.tick() => {
                let request = SyncRequest::Sync {
                    input: input.clone(),
                    window_ms,
                    trigger: SyncTrigger::Periodic,
                    generation,
                };
                match request_tx.try_send(request) {
                    Ok(()) => debug!(input = %input, "Triggered periodic sync"),
                    Err(TrySendError::Full(_)) => {
                        warn!(input = %input, "Request queue full, skipping periodic sync");
                    }
                    Err(TrySendError::Closed(_)) => break,
                }
            }
        }
    }
}

/// Worker side of the scheduler.
pub struct SyncSchedulerHandle {
    shared: Arc<Shared>,
    request_rx: mpsc::Receiver<SyncRequest>,
}

impl SyncSchedulerHandle {
    /// Serve requests until shutdown.
    ///
    /// This should be spawned in a tokio task.
    pub async fn run(mut self) {
        let mut sessions = JoinSet::new();
        let mut running: HashMap<task::Id, InputId> = HashMap::new();
        info!("Sync scheduler started");

        loop {
            tokio::select! {
                request = self.request_rx.recv() => match request {
                    Some(SyncRequest::Sync { input, window_ms, trigger, generation }) => {
                        let started = self
                            .start_session(&mut sessions, input.clone(), window_ms, trigger, generation)
                            .await;
                        if let Some(id) = started {
                            running.insert(id, input);
                        }
                    }
                    Some(SyncRequest::Shutdown) | None => {
                        info!("Received shutdown request");
                        break;
                    }
                },

                Some(joined) = sessions.join_next_with_id(), if !sessions.is_empty() => {
                    self.session_ended(&mut running, joined).await;
                }

                _ = self.shared.shutdown.cancelled() => {
                    info!("Sync scheduler shutting down");
                    break;
                }
            }
        }

        self.shared.shutdown.cancel();
        while let Some(joined) = sessions.join_next_with_id().await {
            self.session_ended(&mut running, joined).await;
        }
        info!("Sync scheduler stopped");
    }

    /// Forget a finished session task. A task that panicked or was aborted
    /// never cleared its own entry, so clear it here and report the failure.
    async fn session_ended(
        &self,
        running: &mut HashMap<task::Id, InputId>,
        joined: std::result::Result<(task::Id, ()), JoinError>,
    ) {
        let (id, failure) = match joined {
            Ok((id, ())) => (id, None),
            Err(e) => (e.id(), Some(e)),
        };
        let input = running.remove(&id);

        let (Some(input), Some(e)) = (input, failure) else {
            return;
        };
        error!(input = %input, "Sync session task failed: {}", e);
        self.shared.registrations.lock().await.active.remove(&input);
        self.shared
            .status
            .send(&input, SyncStatus::Error(ErrorReason::Other));
    }

    /// Spawn a session for `input` unless the request is stale or coalesced.
    async fn start_session(
        &self,
        sessions: &mut JoinSet<()>,
        input: InputId,
        window_ms: i64,
        trigger: SyncTrigger,
        generation: u64,
    ) -> Option<task::Id> {
        let source = match self.shared.sources.read().await.resolve(&input) {
            Ok(source) => source,
            Err(e) => {
                warn!(input = %input, "Dropping sync request: {}", e);
                return None;
            }
        };

        let token = {
            let mut registrations = self.shared.registrations.lock().await;
            if registrations.generation(&input) != generation {
                debug!(input = %input, ?trigger, "Dropping sync request made before a cancel");
                return None;
            }
            if registrations.active.contains_key(&input) {
                debug!(input = %input, ?trigger, "Sync already running, request coalesced");
                return None;
            }
            let token = self.shared.shutdown.child_token();
            registrations.active.insert(input.clone(), token.clone());
            token
        };

        self.shared.status.send(&input, SyncStatus::Started);
        debug!(input = %input, ?trigger, window_ms, "Starting sync session");

        let shared = self.shared.clone();
        let handle = sessions.spawn(async move {
            let mut session = SyncSession::new(
                input.clone(),
                source,
                shared.store.clone(),
                shared.clock.clone(),
                window_ms,
            )
            .with_cancellation(token)
            .with_status(shared.status.clone());

            let result = session.run().await;

            let status = {
                let mut registrations = shared.registrations.lock().await;
                registrations.active.remove(&input);
                match result {
                    Ok(report) => {
                        let status = if report.cancelled {
                            SyncStatus::Cancelled
                        } else {
                            SyncStatus::Finished
                        };
                        registrations.reports.insert(input.clone(), report);
                        status
                    }
                    Err(e) => SyncStatus::Error(e.reason()),
                }
            };
            shared.status.send(&input, status);
        });
        Some(handle.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use epgsync_common::{Channel, ManualClock, Program, HOUR_MS};
    use epgsync_source::SampleSource;
    use epgsync_storage::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const NOW: i64 = 1_700_000_123_456;

    fn input() -> InputId {
        InputId::new("input-a").unwrap()
    }

    fn scheduler(store: Arc<MemoryStore>) -> SyncScheduler {
        let (scheduler, handle) =
            SyncScheduler::new(store, Arc::new(ManualClock::new(NOW)), SyncConfig::default());
        tokio::spawn(handle.run());
        scheduler
    }

    async fn next_status(rx: &mut broadcast::Receiver<SyncStatusEvent>) -> SyncStatus {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for status")
            .expect("status channel closed")
            .status
    }

    async fn wait_terminal(rx: &mut broadcast::Receiver<SyncStatusEvent>) -> SyncStatus {
        loop {
            let status = next_status(rx).await;
            if status.is_terminal() {
                return status;
            }
        }
    }

    #[tokio::test]
    async fn test_immediate_sync_status_sequence() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler(store.clone());
        scheduler
            .register_source(input(), Arc::new(SampleSource::new()))
            .await
            .unwrap();
        let mut rx = scheduler.subscribe();

        scheduler.request_immediate_sync(&input(), HOUR_MS).await.unwrap();

        assert_eq!(next_status(&mut rx).await, SyncStatus::Started);
        assert!(matches!(next_status(&mut rx).await, SyncStatus::Scanned { channels_scanned: 1, .. }));
        assert!(matches!(next_status(&mut rx).await, SyncStatus::Scanned { channels_scanned: 2, .. }));
        assert_eq!(next_status(&mut rx).await, SyncStatus::Finished);

        // One looping instance and one scheduled program fall in the hour.
        assert_eq!(store.program_count().unwrap(), 2);
        let report = scheduler.last_report(&input()).await.unwrap();
        assert_eq!(report.programs_inserted, 2);
        assert!(!scheduler.is_syncing(&input()).await);

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_unregistered_input_rejected() {
        let scheduler = scheduler(Arc::new(MemoryStore::new()));

        let result = scheduler.request_immediate_sync(&input(), HOUR_MS).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
        let result = scheduler.request_periodic_sync(&input(), HOUR_MS).await;
        assert!(matches!(result, Err(Error::NotFound(_))));

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_non_positive_period_rejected() {
        let scheduler = scheduler(Arc::new(MemoryStore::new()));
        scheduler
            .register_source(input(), Arc::new(SampleSource::new()))
            .await
            .unwrap();

        let result = scheduler.request_immediate_sync(&input(), 0).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        let result = scheduler.request_immediate_sync(&input(), i64::MAX).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        let result = scheduler
            .request_periodic_sync_every(&input(), HOUR_MS, Duration::ZERO)
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_empty_source_reports_error() {
        let scheduler = scheduler(Arc::new(MemoryStore::new()));
        scheduler
            .register_source(input(), Arc::new(SampleSource::empty()))
            .await
            .unwrap();
        let mut rx = scheduler.subscribe();

        scheduler.request_immediate_sync(&input(), HOUR_MS).await.unwrap();

        assert_eq!(next_status(&mut rx).await, SyncStatus::Started);
        assert_eq!(
            next_status(&mut rx).await,
            SyncStatus::Error(ErrorReason::NoChannels)
        );

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_periodic_sync_repeats_until_cancelled() {
        let scheduler = scheduler(Arc::new(MemoryStore::new()));
        scheduler
            .register_source(input(), Arc::new(SampleSource::new()))
            .await
            .unwrap();
        let mut rx = scheduler.subscribe();

        scheduler
            .request_periodic_sync_every(&input(), HOUR_MS, Duration::from_millis(50))
            .await
            .unwrap();
        assert!(scheduler.is_periodic(&input()).await);

        for _ in 0..2 {
            assert_eq!(next_status(&mut rx).await, SyncStatus::Started);
            assert_eq!(wait_terminal(&mut rx).await, SyncStatus::Finished);
        }

        scheduler.cancel_all_sync_requests(&input()).await;
        assert!(!scheduler.is_periodic(&input()).await);

        // Let any session started before the cancel finish, then expect silence.
        tokio::time::sleep(Duration::from_millis(100)).await;
        while rx.try_recv().is_ok() {}
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(rx.try_recv().is_err());

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_reregistration_replaces_previous() {
        let scheduler = scheduler(Arc::new(MemoryStore::new()));
        scheduler
            .register_source(input(), Arc::new(SampleSource::new()))
            .await
            .unwrap();

        scheduler
            .request_periodic_sync_every(&input(), HOUR_MS, Duration::from_secs(3600))
            .await
            .unwrap();
        scheduler
            .request_periodic_sync_every(&input(), 2 * HOUR_MS, Duration::from_secs(3600))
            .await
            .unwrap();

        let registrations = scheduler.shared.registrations.lock().await;
        assert_eq!(registrations.periodic.len(), 1);
        drop(registrations);

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_requests_after_shutdown_fail() {
        let (scheduler, handle) = SyncScheduler::new(
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::new(NOW)),
            SyncConfig::default(),
        );
        scheduler
            .register_source(input(), Arc::new(SampleSource::new()))
            .await
            .unwrap();

        let worker = tokio::spawn(handle.run());
        scheduler.shutdown().await;
        worker.await.unwrap();

        let result = scheduler.request_immediate_sync(&input(), HOUR_MS).await;
        assert!(matches!(result, Err(Error::SchedulerStopped)));
    }

    /// Source whose first channel fetch panics.
    struct PanicOnceSource {
        calls: AtomicUsize,
        inner: SampleSource,
    }

    #[async_trait]
    impl ProgramSource for PanicOnceSource {
        fn name(&self) -> &str {
            "panic-once"
        }

        async fn get_channels(&self) -> Result<Vec<Channel>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("lineup parser bug");
            }
            self.inner.get_channels().await
        }

        async fn get_programs(&self, channel: &Channel, start_ms: i64, end_ms: i64) -> Result<Vec<Program>> {
            self.inner.get_programs(channel, start_ms, end_ms).await
        }
    }

    #[tokio::test]
    async fn test_panicking_session_releases_input() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler(store.clone());
        let source = Arc::new(PanicOnceSource {
            calls: AtomicUsize::new(0),
            inner: SampleSource::new(),
        });
        scheduler.register_source(input(), source.clone()).await.unwrap();
        let mut rx = scheduler.subscribe();

        scheduler.request_immediate_sync(&input(), HOUR_MS).await.unwrap();
        assert_eq!(next_status(&mut rx).await, SyncStatus::Started);
        assert_eq!(
            next_status(&mut rx).await,
            SyncStatus::Error(ErrorReason::Other)
        );
        assert!(!scheduler.is_syncing(&input()).await);

        // The input is not left wedged: the next request runs.
        scheduler.request_immediate_sync(&input(), HOUR_MS).await.unwrap();
        assert_eq!(next_status(&mut rx).await, SyncStatus::Started);
        assert_eq!(wait_terminal(&mut rx).await, SyncStatus::Finished);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.program_count().unwrap(), 2);

        scheduler.shutdown().await;
    }
}
