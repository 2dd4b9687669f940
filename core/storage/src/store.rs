//! Store trait definition.

use async_trait::async_trait;
use std::collections::HashMap;

use epgsync_common::{Channel, ChannelId, InputId, Program, Result};

/// Mapping from a channel's external id to its store id.
pub type ChannelMap = HashMap<String, ChannelId>;

/// Write set for the programs of one channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgramWrites {
    /// New programs; ids are assigned by the store.
    pub inserts: Vec<Program>,
    /// Changed programs; each carries the id of the row it replaces.
    pub updates: Vec<Program>,
    /// Programs to remove.
    pub deletes: Vec<epgsync_common::ProgramId>,
}

impl ProgramWrites {
    /// Whether the write set would not touch the store.
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    /// Total number of row writes.
    pub fn len(&self) -> usize {
        self.inserts.len() + self.updates.len() + self.deletes.len()
    }
}

/// Storage backend for channels and programs.
///
/// Implementations must keep ids stable: upserting a channel whose
/// `(input, external_id)` already exists updates that row in place, and an id
/// is never handed out twice.
#[async_trait]
pub trait Store: Send + Sync {
    /// Get the backend name (e.g., "memory", "sqlite").
    fn name(&self) -> &str;

    /// Insert or update channels of an input.
    ///
    /// # Postconditions
    /// - Every given channel exists in the store
    /// - Returns the store id of every given channel, keyed by external id
    ///
    /// # Errors
    /// - `StoreWriteFailure` if any write fails
    async fn upsert_channels(&self, input: &InputId, channels: &[Channel]) -> Result<ChannelMap>;

    /// List the channels of an input, ordered by store id.
    async fn get_channels(&self, input: &InputId) -> Result<Vec<Channel>>;

    /// Delete channels of an input together with their programs.
    async fn delete_channels(&self, input: &InputId, ids: &[ChannelId]) -> Result<()>;

    /// List the programs of a channel, ordered by start time.
    async fn get_programs(&self, channel: ChannelId) -> Result<Vec<Program>>;

    /// Apply a program write set to a channel.
    ///
    /// # Errors
    /// - `NotFound` if the channel does not exist
    /// - `StoreWriteFailure` if any write fails; backends with transactions
    ///   leave the channel unchanged in that case
    async fn write_programs(&self, channel: ChannelId, writes: ProgramWrites) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use epgsync_common::ProgramId;

    #[test]
    fn test_program_writes_len() {
        let writes = ProgramWrites {
            inserts: vec![Program::new("a", 0, 10)],
            updates: vec![],
            deletes: vec![ProgramId(1), ProgramId(2)],
        };
        assert_eq!(writes.len(), 3);
        assert!(!writes.is_empty());
        assert!(ProgramWrites::default().is_empty());
    }
}
