//! One end-to-end sync run over the channels of an input.

use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::reconcile::{reconcile_channels, reconcile_programs, ProgramDiff};
use crate::state::{SessionState, SyncReport};
use crate::status::{StatusSender, SyncStatus};
use crate::tiler::tile_programs;
use crate::window::{compute_window, SyncWindow};
use epgsync_common::{Channel, Clock, Error, InputId, Program, Result};
use epgsync_source::ProgramSource;
use epgsync_storage::Store;

/// A single sync pass: fetch channels, reconcile them, then fetch, tile and
/// reconcile the programs of each channel in turn.
///
/// Cancellation is cooperative. The token is checked before the channel
/// fetch, between channels and before each program fetch; calls already
/// issued to the source or store run to completion.
pub struct SyncSession {
    input: InputId,
    source: Arc<dyn ProgramSource>,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    window_ms: i64,
    cancel: CancellationToken,
    status: Option<StatusSender>,
    state: SessionState,
}

impl SyncSession {
    /// Create a session syncing `window_ms` of guide data from now.
    pub fn new(
        input: InputId,
        source: Arc<dyn ProgramSource>,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        window_ms: i64,
    ) -> Self {
        Self {
            input,
            source,
            store,
            clock,
            window_ms,
            cancel: CancellationToken::new(),
            status: None,
            state: SessionState::Idle,
        }
    }

    /// Use `token` to stop the session early.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Report per-channel progress on `status`.
    pub fn with_status(mut self, status: StatusSender) -> Self {
        self.status = Some(status);
        self
    }

    /// Current phase.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Input being synced.
    pub fn input(&self) -> &InputId {
        &self.input
    }

    /// Run the session to completion.
    ///
    /// A cancelled run is not an error: it returns the partial report with
    /// `cancelled` set.
    ///
    /// # Errors
    /// - `InvalidInput` if the window length is not positive or too long
    /// - `SourceUnavailable` if the source fails
    /// - `StoreWriteFailure` or `StoreUnavailable` if the channel list
    ///   cannot be written or read back
    /// - `NoChannels` if the input has no channels after reconciliation
    pub async fn run(&mut self) -> Result<SyncReport> {
        let started = Instant::now();
        let window = match compute_window(self.clock.now_ms(), self.window_ms) {
            Ok(window) => window,
            Err(e) => {
                self.transition(SessionState::Error);
                error!(input = %self.input, "Sync session rejected: {}", e);
                return Err(e);
            }
        };
        let mut report = SyncReport::new(self.input.clone(), window);

        info!(
            input = %self.input,
            run_id = %report.run_id,
            window = %window,
            "Sync session started"
        );

        let result = self.run_passes(window, &mut report).await;
        report.duration = started.elapsed();

        match result {
            Ok(()) => {
                self.transition(SessionState::Finished);
                info!(
                    input = %self.input,
                    channels = report.channels_synced,
                    failed = report.channels_failed,
                    inserted = report.programs_inserted,
                    updated = report.programs_updated,
                    deleted = report.programs_deleted,
                    unchanged = report.programs_unchanged,
                    "Sync session finished in {:?}",
                    report.duration
                );
                Ok(report)
            }
            Err(Error::Cancelled) => {
                self.transition(SessionState::Cancelled);
                report.cancelled = true;
                info!(
                    input = %self.input,
                    channels = report.channels_synced,
                    "Sync session cancelled"
                );
                Ok(report)
            }
            Err(e) => {
                self.transition(SessionState::Error);
                error!(input = %self.input, "Sync session failed: {}", e);
                Err(e)
            }
        }
    }

    async fn run_passes(&mut self, window: SyncWindow, report: &mut SyncReport) -> Result<()> {
        self.check_cancelled()?;
        let channels = self.sync_channels(report).await?;

        let channel_count = channels.len();
        for (index, channel) in channels.iter().enumerate() {
            self.check_cancelled()?;
            self.transition(SessionState::SyncingPrograms { index });

            match self.sync_programs(channel, window).await {
                Ok(diff) => report.record_programs(&diff),
                Err(e) if e.is_channel_scoped() => {
                    warn!(
                        input = %self.input,
                        channel = %channel.external_id,
                        "Skipping channel: {}",
                        e
                    );
                    report.channels_failed += 1;
                }
                Err(e) => return Err(e),
            }

            self.emit(SyncStatus::Scanned {
                channels_scanned: index + 1,
                channel_count,
                display_name: channel.display_name.clone(),
            });
        }

        Ok(())
    }

    /// Fetch and reconcile the channel list, returning the stored channels.
    async fn sync_channels(&mut self, report: &mut SyncReport) -> Result<Vec<Channel>> {
        self.transition(SessionState::FetchingChannels);
        let fetched = self.source.get_channels().await?;
        debug!(input = %self.input, count = fetched.len(), "Fetched channels");

        self.transition(SessionState::ReconcilingChannels);
        let stored = self.store.get_channels(&self.input).await?;
        let diff = reconcile_channels(fetched, stored);

        if !diff.upserts.is_empty() {
            let mapping = self.store.upsert_channels(&self.input, &diff.upserts).await?;
            debug!(
                input = %self.input,
                inserted = diff.inserted,
                updated = diff.updated,
                mapped = mapping.len(),
                "Wrote channels"
            );
        }
        if !diff.deletes.is_empty() {
            self.store.delete_channels(&self.input, &diff.deletes).await?;
            info!(input = %self.input, count = diff.deletes.len(), "Removed channels dropped by the source");
        }
        report.record_channels(&diff);

        let channels = self.store.get_channels(&self.input).await?;
        if channels.is_empty() {
            return Err(Error::NoChannels(self.input.to_string()));
        }
        Ok(channels)
    }

    /// Fetch, expand and reconcile the programs of one stored channel.
    async fn sync_programs(&self, channel: &Channel, window: SyncWindow) -> Result<ProgramDiff> {
        let channel_id = channel.id.ok_or_else(|| {
            Error::StoreUnavailable(format!("Channel {} has no store id", channel.external_id))
        })?;

        let fetched = self
            .source
            .get_programs(channel, window.start_ms, window.end_ms)
            .await?;
        let expanded = if channel.repeatable {
            tile_programs(&channel.external_id, fetched, window)?
        } else {
            fetched
        };

        let programs: Vec<Program> = expanded
            .into_iter()
            .filter(|p| p.overlaps(window.start_ms, window.end_ms))
            .map(|mut p| {
                p.id = None;
                p.channel_id = Some(channel_id);
                p
            })
            .collect();

        let stored = self.store.get_programs(channel_id).await?;
        let diff = reconcile_programs(programs, stored, window);

        if !diff.writes.is_empty() {
            self.store
                .write_programs(channel_id, diff.writes.clone())
                .await
                .map_err(|e| match e {
                    // Channel vanished under us; only this channel is affected.
                    Error::NotFound(msg) => Error::StoreWriteFailure(msg),
                    other => other,
                })?;
        }

        debug!(
            input = %self.input,
            channel = %channel.external_id,
            writes = diff.writes.len(),
            unchanged = diff.unchanged,
            "Reconciled programs"
        );
        Ok(diff)
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    fn transition(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal session transition {} -> {}",
            self.state,
            next
        );
        debug!(input = %self.input, from = %self.state, to = %next, "Session state change");
        self.state = next;
    }

    fn emit(&self, status: SyncStatus) {
        if let Some(sender) = &self.status {
            sender.send(&self.input, status);
        }
    }
}
