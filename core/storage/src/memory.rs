//! In-memory store for tests and one-shot runs.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::store::{ChannelMap, ProgramWrites, Store};
use epgsync_common::{Channel, ChannelId, Error, InputId, Program, ProgramId, Result};

#[derive(Debug, Default)]
struct Inner {
    next_channel_id: i64,
    next_program_id: i64,
    /// Channel rows with the input they belong to.
    channels: BTreeMap<ChannelId, (InputId, Channel)>,
    /// (input, external id) -> channel id.
    index: HashMap<(InputId, String), ChannelId>,
    programs: HashMap<ChannelId, BTreeMap<ProgramId, Program>>,
}

impl Inner {
    fn allocate_channel_id(&mut self) -> ChannelId {
        self.next_channel_id += 1;
        ChannelId(self.next_channel_id)
    }

    fn allocate_program_id(&mut self) -> ProgramId {
        self.next_program_id += 1;
        ProgramId(self.next_program_id)
    }
}

/// In-memory store.
///
/// Useful for testing and for syncs whose result does not need to outlive
/// the process. All data is lost on drop.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| Error::StoreUnavailable("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| Error::StoreWriteFailure("memory store lock poisoned".to_string()))
    }

    /// Number of programs stored across all channels.
    pub fn program_count(&self) -> Result<usize> {
        Ok(self.read()?.programs.values().map(BTreeMap::len).sum())
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn upsert_channels(&self, input: &InputId, channels: &[Channel]) -> Result<ChannelMap> {
        let mut inner = self.write()?;
        let mut map = ChannelMap::new();

        for channel in channels {
            let key = (input.clone(), channel.external_id.clone());
            let id = match inner.index.get(&key) {
                Some(id) => *id,
                None => {
                    let id = inner.allocate_channel_id();
                    inner.index.insert(key, id);
                    id
                }
            };

            let mut row = channel.clone();
            row.id = Some(id);
            inner.channels.insert(id, (input.clone(), row));
            map.insert(channel.external_id.clone(), id);
        }

        debug!(input = %input, count = channels.len(), "Upserted channels");
        Ok(map)
    }

    async fn get_channels(&self, input: &InputId) -> Result<Vec<Channel>> {
        let inner = self.read()?;
        Ok(inner
            .channels
            .values()
            .filter(|(owner, _)| owner == input)
            .map(|(_, channel)| channel.clone())
            .collect())
    }

    async fn delete_channels(&self, input: &InputId, ids: &[ChannelId]) -> Result<()> {
        let mut inner = self.write()?;

        for id in ids {
            let owned_by_input = matches!(inner.channels.get(id), Some((owner, _)) if owner == input);
            if !owned_by_input {
                continue;
            }
            if let Some((owner, channel)) = inner.channels.remove(id) {
                inner.index.remove(&(owner, channel.external_id));
            }
            inner.programs.remove(id);
        }

        Ok(())
    }

    async fn get_programs(&self, channel: ChannelId) -> Result<Vec<Program>> {
        let inner = self.read()?;
        let mut programs: Vec<Program> = inner
            .programs
            .get(&channel)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default();
        programs.sort_by_key(|p| (p.start_time_utc_ms, p.id));
        Ok(programs)
    }

    async fn write_programs(&self, channel: ChannelId, writes: ProgramWrites) -> Result<()> {
        let mut inner = self.write()?;

        if !inner.channels.contains_key(&channel) {
            return Err(Error::NotFound(format!("Channel not found: {}", channel)));
        }

        // Validate everything before touching the rows so a rejected write
        // set leaves the channel as it was.
        let existing = inner.programs.get(&channel);
        for program in writes.inserts.iter().chain(writes.updates.iter()) {
            if program.end_time_utc_ms <= program.start_time_utc_ms {
                return Err(Error::StoreWriteFailure(format!(
                    "Program '{}' ends before it starts",
                    program.title
                )));
            }
        }
        for program in &writes.updates {
            let known = program
                .id
                .is_some_and(|id| existing.is_some_and(|rows| rows.contains_key(&id)));
            if !known {
                return Err(Error::StoreWriteFailure(format!(
                    "Cannot update unknown program '{}'",
                    program.title
                )));
            }
        }

        let mut inserted = Vec::with_capacity(writes.inserts.len());
        for mut program in writes.inserts {
            let id = inner.allocate_program_id();
            program.id = Some(id);
            program.channel_id = Some(channel);
            inserted.push(program);
        }

        let rows = inner.programs.entry(channel).or_default();
        for id in &writes.deletes {
            rows.remove(id);
        }
        for mut program in writes.updates {
            program.channel_id = Some(channel);
            if let Some(id) = program.id {
                rows.insert(id, program);
            }
        }
        for program in inserted {
            if let Some(id) = program.id {
                rows.insert(id, program);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use epgsync_common::HOUR_MS;

    fn input() -> InputId {
        InputId::new("test-input").unwrap()
    }

    #[tokio::test]
    async fn test_upsert_assigns_stable_ids() {
        let store = MemoryStore::new();
        let channels = vec![Channel::new("a", "A"), Channel::new("b", "B")];

        let first = store.upsert_channels(&input(), &channels).await.unwrap();
        let renamed = vec![Channel::new("a", "A (HD)")];
        let second = store.upsert_channels(&input(), &renamed).await.unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(first["a"], second["a"]);

        let stored = store.get_channels(&input()).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].display_name, "A (HD)");
    }

    #[tokio::test]
    async fn test_channels_are_scoped_by_input() {
        let store = MemoryStore::new();
        let other = InputId::new("other-input").unwrap();

        let mine = store.upsert_channels(&input(), &[Channel::new("a", "A")]).await.unwrap();
        let theirs = store.upsert_channels(&other, &[Channel::new("a", "A")]).await.unwrap();

        assert_ne!(mine["a"], theirs["a"]);
        assert_eq!(store.get_channels(&other).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ids_not_reused_after_delete() {
        let store = MemoryStore::new();
        let first = store.upsert_channels(&input(), &[Channel::new("a", "A")]).await.unwrap();
        store.delete_channels(&input(), &[first["a"]]).await.unwrap();

        let second = store.upsert_channels(&input(), &[Channel::new("a", "A")]).await.unwrap();
        assert_ne!(first["a"], second["a"]);
    }

    #[tokio::test]
    async fn test_write_programs() {
        let store = MemoryStore::new();
        let map = store.upsert_channels(&input(), &[Channel::new("a", "A")]).await.unwrap();
        let channel = map["a"];

        let writes = ProgramWrites {
            inserts: vec![
                Program::new("Second", HOUR_MS, 2 * HOUR_MS),
                Program::new("First", 0, HOUR_MS),
            ],
            ..Default::default()
        };
        store.write_programs(channel, writes).await.unwrap();

        let programs = store.get_programs(channel).await.unwrap();
        assert_eq!(programs.len(), 2);
        assert_eq!(programs[0].title, "First");
        assert_eq!(programs[0].channel_id, Some(channel));

        let mut updated = programs[0].clone();
        updated.title = "First (repeat)".to_string();
        let writes = ProgramWrites {
            updates: vec![updated],
            deletes: vec![programs[1].id.unwrap()],
            ..Default::default()
        };
        store.write_programs(channel, writes).await.unwrap();

        let programs = store.get_programs(channel).await.unwrap();
        assert_eq!(programs.len(), 1);
        assert_eq!(programs[0].title, "First (repeat)");
    }

    #[tokio::test]
    async fn test_rejected_write_leaves_channel_unchanged() {
        let store = MemoryStore::new();
        let map = store.upsert_channels(&input(), &[Channel::new("a", "A")]).await.unwrap();
        let channel = map["a"];

        let writes = ProgramWrites {
            inserts: vec![Program::new("Good", 0, HOUR_MS), Program::new("Bad", HOUR_MS, HOUR_MS)],
            ..Default::default()
        };
        assert!(store.write_programs(channel, writes).await.is_err());
        assert!(store.get_programs(channel).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_write_to_unknown_channel_fails() {
        let store = MemoryStore::new();
        let result = store.write_programs(ChannelId(99), ProgramWrites::default()).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_channel_drops_programs() {
        let store = MemoryStore::new();
        let map = store.upsert_channels(&input(), &[Channel::new("a", "A")]).await.unwrap();
        let writes = ProgramWrites {
            inserts: vec![Program::new("Show", 0, HOUR_MS)],
            ..Default::default()
        };
        store.write_programs(map["a"], writes).await.unwrap();
        assert_eq!(store.program_count().unwrap(), 1);

        store.delete_channels(&input(), &[map["a"]]).await.unwrap();
        assert_eq!(store.program_count().unwrap(), 0);
        assert!(store.get_channels(&input()).await.unwrap().is_empty());
    }
}
