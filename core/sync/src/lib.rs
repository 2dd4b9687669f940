//! EPG Sync Engine
//!
//! This module keeps a store's channel and program guide in step with a
//! program source, including:
//! - Hour-aligned sync windows
//! - Expansion of repeating channel schedules over the window
//! - Minimal-write reconciliation of channels and programs
//! - Immediate and periodic sync requests, one session per input at a time
//! - Lifecycle status broadcast to any number of observers

pub mod config;
pub mod reconcile;
pub mod scheduler;
pub mod session;
pub mod state;
pub mod status;
pub mod tiler;
pub mod window;

// Re-export main types
pub use config::SyncConfig;
pub use reconcile::{reconcile_channels, reconcile_programs, ChannelDiff, ProgramDiff};
pub use scheduler::{SyncRequest, SyncScheduler, SyncSchedulerHandle, SyncTrigger};
pub use session::SyncSession;
pub use state::{SessionState, SyncReport};
pub use status::{StatusSender, SyncStatus, SyncStatusEvent};
pub use tiler::{tile_programs, RepeatCycle, Tiling};
pub use window::{align_to_hour, check_period, compute_window, SyncWindow, MAX_PERIOD_MS};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_exports() {
        // Verify all main types are accessible
        let _config = SyncConfig::default();
        let _window = compute_window(0, epgsync_common::HOUR_MS).unwrap();
        let _status = StatusSender::new(1);
    }
}
