//! Reconciliation of fetched guide data against stored rows.
//!
//! Both diffs are pure: they compute the minimal write set and leave applying
//! it to the caller.

use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

use crate::window::SyncWindow;
use epgsync_common::{Channel, ChannelId, Program, UtcMillis};
use epgsync_storage::ProgramWrites;

/// Result of diffing a channel's programs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgramDiff {
    pub writes: ProgramWrites,
    /// Fetched programs that matched a stored row exactly.
    pub unchanged: usize,
}

/// Compute the program write set for one channel.
///
/// Programs are matched on start time. A matched pair with identical content
/// produces no write; a changed pair becomes an update carrying the stored
/// id. Unmatched fetched programs are inserted. Unmatched stored programs are
/// deleted only if they overlap `window`.
pub fn reconcile_programs(
    fetched: Vec<Program>,
    stored: Vec<Program>,
    window: SyncWindow,
) -> ProgramDiff {
    let mut diff = ProgramDiff::default();

    // First stored row per start time is the match candidate, later
    // duplicates are removed if they fall inside the window.
    let mut by_start: BTreeMap<UtcMillis, Program> = BTreeMap::new();
    let mut leftovers: Vec<Program> = Vec::new();
    for program in stored {
        if program.id.is_none() {
            continue;
        }
        if by_start.contains_key(&program.start_time_utc_ms) {
            leftovers.push(program);
        } else {
            by_start.insert(program.start_time_utc_ms, program);
        }
    }

    let mut seen: HashSet<UtcMillis> = HashSet::new();
    for program in fetched {
        if program.end_time_utc_ms <= program.start_time_utc_ms {
            warn!(title = %program.title, "Dropping fetched program that ends before it starts");
            continue;
        }
        if !seen.insert(program.start_time_utc_ms) {
            debug!(
                title = %program.title,
                start = program.start_time_utc_ms,
                "Dropping fetched program with duplicate start time"
            );
            continue;
        }

        match by_start.remove(&program.start_time_utc_ms) {
            Some(existing) if existing.same_content(&program) => {
                diff.unchanged += 1;
            }
            Some(existing) => {
                let mut update = program;
                update.id = existing.id;
                update.channel_id = existing.channel_id;
                diff.writes.updates.push(update);
            }
            None => diff.writes.inserts.push(program),
        }
    }

    diff.writes.deletes = by_start
        .into_values()
        .chain(leftovers)
        .filter(|p| p.overlaps(window.start_ms, window.end_ms))
        .filter_map(|p| p.id)
        .collect();
    diff.writes.deletes.sort();

    diff
}

/// Result of diffing an input's channel list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelDiff {
    /// New and changed channels; changed ones carry their store id.
    pub upserts: Vec<Channel>,
    /// Stored channels absent from the fetch.
    pub deletes: Vec<ChannelId>,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl ChannelDiff {
    /// Whether applying the diff would not touch the store.
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletes.is_empty()
    }
}

/// Compute the channel write set for an input, matching on external id.
pub fn reconcile_channels(fetched: Vec<Channel>, stored: Vec<Channel>) -> ChannelDiff {
    let mut diff = ChannelDiff::default();
    let mut by_external: HashMap<String, Channel> = stored
        .into_iter()
        .map(|c| (c.external_id.clone(), c))
        .collect();

    let mut seen: HashSet<String> = HashSet::new();
    for channel in fetched {
        if !seen.insert(channel.external_id.clone()) {
            warn!(external_id = %channel.external_id, "Dropping duplicate channel from source");
            continue;
        }

        match by_external.remove(&channel.external_id) {
            Some(existing) if existing.same_content(&channel) => diff.unchanged += 1,
            Some(existing) => {
                let mut update = channel;
                update.id = existing.id;
                diff.upserts.push(update);
                diff.updated += 1;
            }
            None => {
                let mut insert = channel;
                insert.id = None;
                diff.upserts.push(insert);
                diff.inserted += 1;
            }
        }
    }

    diff.deletes = by_external.into_values().filter_map(|c| c.id).collect();
    diff.deletes.sort();
    diff
}
