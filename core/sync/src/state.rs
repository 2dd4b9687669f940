//! Session state machine and run reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::reconcile::{ChannelDiff, ProgramDiff};
use crate::window::SyncWindow;
use epgsync_common::{Error, InputId, Result};

/// Phase of a sync session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Created but not started.
    Idle,
    /// Asking the source for the channel list.
    FetchingChannels,
    /// Writing the channel diff.
    ReconcilingChannels,
    /// Fetching and reconciling programs of the channel at `index`.
    SyncingPrograms { index: usize },
    /// Every channel was processed.
    Finished,
    /// Stopped early on request.
    Cancelled,
    /// Aborted by a session-scoped error.
    Error,
}

impl SessionState {
    /// Whether the session can no longer make progress.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Finished | SessionState::Cancelled | SessionState::Error
        )
    }

    /// Whether moving to `next` is a legal transition.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (*self, next) {
            (_, SessionState::Error) | (_, SessionState::Cancelled) => true,
            (SessionState::Idle, SessionState::FetchingChannels) => true,
            (SessionState::FetchingChannels, SessionState::ReconcilingChannels) => true,
            (SessionState::ReconcilingChannels, SessionState::SyncingPrograms { index }) => index == 0,
            (SessionState::ReconcilingChannels, SessionState::Finished) => true,
            (
                SessionState::SyncingPrograms { index: current },
                SessionState::SyncingPrograms { index: following },
            ) => following == current + 1,
            (SessionState::SyncingPrograms { .. }, SessionState::Finished) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::FetchingChannels => write!(f, "fetching channels"),
            SessionState::ReconcilingChannels => write!(f, "reconciling channels"),
            SessionState::SyncingPrograms { index } => write!(f, "syncing programs of channel {}", index),
            SessionState::Finished => write!(f, "finished"),
            SessionState::Cancelled => write!(f, "cancelled"),
            SessionState::Error => write!(f, "error"),
        }
    }
}

/// Summary of one sync run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub input: InputId,
    pub window: SyncWindow,
    pub started_at: DateTime<Utc>,
    /// Channel rows inserted or updated.
    pub channels_written: usize,
    /// Channel rows removed because the source dropped them.
    pub channels_deleted: usize,
    /// Channels whose programs were reconciled.
    pub channels_synced: usize,
    /// Channels skipped because of a channel-scoped error.
    pub channels_failed: usize,
    pub programs_inserted: usize,
    pub programs_updated: usize,
    pub programs_deleted: usize,
    pub programs_unchanged: usize,
    pub duration: Duration,
    /// The run stopped early because it was cancelled.
    pub cancelled: bool,
}

impl SyncReport {
    /// Create an empty report for a run over `window`.
    pub fn new(input: InputId, window: SyncWindow) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            input,
            window,
            started_at: Utc::now(),
            channels_written: 0,
            channels_deleted: 0,
            channels_synced: 0,
            channels_failed: 0,
            programs_inserted: 0,
            programs_updated: 0,
            programs_deleted: 0,
            programs_unchanged: 0,
            duration: Duration::ZERO,
            cancelled: false,
        }
    }

    /// Fold a channel diff into the counts.
    pub fn record_channels(&mut self, diff: &ChannelDiff) {
        self.channels_written += diff.upserts.len();
        self.channels_deleted += diff.deletes.len();
    }

    /// Fold a program diff that was written successfully into the counts.
    pub fn record_programs(&mut self, diff: &ProgramDiff) {
        self.channels_synced += 1;
        self.programs_inserted += diff.writes.inserts.len();
        self.programs_updated += diff.writes.updates.len();
        self.programs_deleted += diff.writes.deletes.len();
        self.programs_unchanged += diff.unchanged;
    }

    /// Total program rows written.
    pub fn program_writes(&self) -> usize {
        self.programs_inserted + self.programs_updated + self.programs_deleted
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }
}
