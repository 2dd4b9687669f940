//! SQLite-backed store.
//!
//! Persists channels and programs so a guide surface can query them between
//! sync runs. Ids come from `AUTOINCREMENT` columns and are never reused.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::store::{ChannelMap, ProgramWrites, Store};
use epgsync_common::{Channel, ChannelId, Error, InputId, Program, ProgramId, Result};

const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS channels (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    input_id TEXT NOT NULL,
    external_id TEXT NOT NULL,
    display_name TEXT NOT NULL,
    display_number TEXT,
    description TEXT,
    repeatable INTEGER NOT NULL,
    provider_data TEXT,
    UNIQUE (input_id, external_id)
);

CREATE TABLE IF NOT EXISTS programs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    channel_id INTEGER NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
    start_ms INTEGER NOT NULL,
    end_ms INTEGER NOT NULL,
    title TEXT NOT NULL,
    description TEXT,
    episode_title TEXT,
    provider_data TEXT,
    CHECK (end_ms > start_ms)
);

CREATE INDEX IF NOT EXISTS idx_programs_channel_start ON programs(channel_id, start_ms);
"#;

fn write_err(e: rusqlite::Error) -> Error {
    Error::StoreWriteFailure(e.to_string())
}

fn read_err(e: rusqlite::Error) -> Error {
    Error::StoreUnavailable(e.to_string())
}

fn encode_json(value: &Option<serde_json::Value>) -> Result<Option<String>> {
    value
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| Error::Serialization(e.to_string()))
}

fn decode_json(raw: Option<String>) -> Result<Option<serde_json::Value>> {
    raw.as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| Error::Serialization(e.to_string()))
}

/// Store backed by a SQLite database file.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Create or open a store database.
    ///
    /// # Errors
    /// - Database creation or schema setup failure
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref()).map_err(read_err)?;
        conn.execute_batch(SCHEMA).map_err(write_err)?;

        info!(path = %db_path.as_ref().display(), "SQLite store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(read_err)?;
        conn.execute_batch(SCHEMA).map_err(write_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::StoreUnavailable("SQLite connection lock poisoned".to_string()))
    }
}

#[async_trait]
impl Store for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn upsert_channels(&self, input: &InputId, channels: &[Channel]) -> Result<ChannelMap> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(write_err)?;
        let mut map = ChannelMap::new();

        {
            let mut stmt = tx
                .prepare(
                    r#"
                    INSERT INTO channels
                    (input_id, external_id, display_name, display_number, description, repeatable, provider_data)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    ON CONFLICT (input_id, external_id) DO UPDATE SET
                        display_name = excluded.display_name,
                        display_number = excluded.display_number,
                        description = excluded.description,
                        repeatable = excluded.repeatable,
                        provider_data = excluded.provider_data
                    RETURNING id
                    "#,
                )
                .map_err(write_err)?;

            for channel in channels {
                let provider_data = encode_json(&channel.provider_data)?;
                let id: i64 = stmt
                    .query_row(
                        params![
                            input.as_str(),
                            channel.external_id,
                            channel.display_name,
                            channel.display_number,
                            channel.description,
                            channel.repeatable,
                            provider_data,
                        ],
                        |row| row.get(0),
                    )
                    .map_err(write_err)?;
                map.insert(channel.external_id.clone(), ChannelId(id));
            }
        }

        tx.commit().map_err(write_err)?;
        debug!(input = %input, count = channels.len(), "Upserted channels");
        Ok(map)
    }

    async fn get_channels(&self, input: &InputId) -> Result<Vec<Channel>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT id, external_id, display_name, display_number, description, repeatable, provider_data
                FROM channels WHERE input_id = ?1 ORDER BY id
                "#,
            )
            .map_err(read_err)?;

        let rows = stmt
            .query_map([input.as_str()], |row| {
                Ok((
                    Channel {
                        id: Some(ChannelId(row.get(0)?)),
                        external_id: row.get(1)?,
                        display_name: row.get(2)?,
                        display_number: row.get(3)?,
                        description: row.get(4)?,
                        repeatable: row.get(5)?,
                        provider_data: None,
                    },
                    row.get::<_, Option<String>>(6)?,
                ))
            })
            .map_err(read_err)?;

        let mut channels = Vec::new();
        for row in rows {
            let (mut channel, raw) = row.map_err(read_err)?;
            channel.provider_data = decode_json(raw)?;
            channels.push(channel);
        }
        Ok(channels)
    }

    async fn delete_channels(&self, input: &InputId, ids: &[ChannelId]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(write_err)?;
        for id in ids {
            tx.execute(
                "DELETE FROM channels WHERE id = ?1 AND input_id = ?2",
                params![id.0, input.as_str()],
            )
            .map_err(write_err)?;
        }
        tx.commit().map_err(write_err)
    }

    async fn get_programs(&self, channel: ChannelId) -> Result<Vec<Program>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT id, channel_id, start_ms, end_ms, title, description, episode_title, provider_data
                FROM programs WHERE channel_id = ?1 ORDER BY start_ms, id
                "#,
            )
            .map_err(read_err)?;

        let rows = stmt
            .query_map([channel.0], |row| {
                Ok((
                    Program {
                        id: Some(ProgramId(row.get(0)?)),
                        channel_id: Some(ChannelId(row.get(1)?)),
                        start_time_utc_ms: row.get(2)?,
                        end_time_utc_ms: row.get(3)?,
                        title: row.get(4)?,
                        description: row.get(5)?,
                        episode_title: row.get(6)?,
                        provider_data: None,
                    },
                    row.get::<_, Option<String>>(7)?,
                ))
            })
            .map_err(read_err)?;

        let mut programs = Vec::new();
        for row in rows {
            let (mut program, raw) = row.map_err(read_err)?;
            program.provider_data = decode_json(raw)?;
            programs.push(program);
        }
        Ok(programs)
    }

    async fn write_programs(&self, channel: ChannelId, writes: ProgramWrites) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(write_err)?;

        let exists = tx
            .query_row("SELECT 1 FROM channels WHERE id = ?1", [channel.0], |_| Ok(()))
            .optional()
            .map_err(read_err)?;
        if exists.is_none() {
            return Err(Error::NotFound(format!("Channel not found: {}", channel)));
        }

        for id in &writes.deletes {
            tx.execute(
                "DELETE FROM programs WHERE id = ?1 AND channel_id = ?2",
                params![id.0, channel.0],
            )
            .map_err(write_err)?;
        }

        for program in &writes.updates {
            let id = program.id.ok_or_else(|| {
                Error::StoreWriteFailure(format!("Cannot update unsaved program '{}'", program.title))
            })?;
            let changed = tx
                .execute(
                    r#"
                    UPDATE programs SET
                        start_ms = ?1, end_ms = ?2, title = ?3, description = ?4,
                        episode_title = ?5, provider_data = ?6
                    WHERE id = ?7 AND channel_id = ?8
                    "#,
                    params![
                        program.start_time_utc_ms,
                        program.end_time_utc_ms,
                        program.title,
                        program.description,
                        program.episode_title,
                        encode_json(&program.provider_data)?,
                        id.0,
                        channel.0,
                    ],
                )
                .map_err(write_err)?;
            if changed == 0 {
                return Err(Error::StoreWriteFailure(format!(
                    "Cannot update unknown program {}",
                    id
                )));
            }
        }

        {
            let mut stmt = tx
                .prepare(
                    r#"
                    INSERT INTO programs
                    (channel_id, start_ms, end_ms, title, description, episode_title, provider_data)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    "#,
                )
                .map_err(write_err)?;
            for program in &writes.inserts {
                stmt.execute(params![
                    channel.0,
                    program.start_time_utc_ms,
                    program.end_time_utc_ms,
                    program.title,
                    program.description,
                    program.episode_title,
                    encode_json(&program.provider_data)?,
                ])
                .map_err(write_err)?;
            }
        }

        tx.commit().map_err(write_err)?;
        debug!(
            channel = %channel,
            inserts = writes.inserts.len(),
            updates = writes.updates.len(),
            deletes = writes.deletes.len(),
            "Applied program writes"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use epgsync_common::HOUR_MS;
    use tempfile::TempDir;

    fn input() -> InputId {
        InputId::new("sqlite-input").unwrap()
    }

    #[tokio::test]
    async fn test_channel_roundtrip_with_provider_data() {
        let store = SqliteStore::in_memory().unwrap();
        let channel = Channel::new("ch-1", "Test Channel")
            .with_display_number("1-1")
            .with_repeatable(true)
            .with_provider_data(serde_json::json!({"video": "hd"}));

        let map = store.upsert_channels(&input(), &[channel.clone()]).await.unwrap();
        let stored = store.get_channels(&input()).await.unwrap();

        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, Some(map["ch-1"]));
        assert!(stored[0].same_content(&channel));
    }

    #[tokio::test]
    async fn test_upsert_keeps_id() {
        let store = SqliteStore::in_memory().unwrap();
        let first = store.upsert_channels(&input(), &[Channel::new("ch-1", "Old")]).await.unwrap();
        let second = store.upsert_channels(&input(), &[Channel::new("ch-1", "New")]).await.unwrap();

        assert_eq!(first["ch-1"], second["ch-1"]);
        let stored = store.get_channels(&input()).await.unwrap();
        assert_eq!(stored[0].display_name, "New");
    }

    #[tokio::test]
    async fn test_write_programs_and_cascade() {
        let store = SqliteStore::in_memory().unwrap();
        let map = store.upsert_channels(&input(), &[Channel::new("ch-1", "A")]).await.unwrap();
        let channel = map["ch-1"];

        let writes = ProgramWrites {
            inserts: vec![
                Program::new("Late", HOUR_MS, 2 * HOUR_MS),
                Program::new("Early", 0, HOUR_MS).with_description("first"),
            ],
            ..Default::default()
        };
        store.write_programs(channel, writes).await.unwrap();

        let programs = store.get_programs(channel).await.unwrap();
        assert_eq!(programs.len(), 2);
        assert_eq!(programs[0].title, "Early");
        assert_eq!(programs[0].description.as_deref(), Some("first"));

        store.delete_channels(&input(), &[channel]).await.unwrap();
        assert!(store.get_programs(channel).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_write_rolls_back() {
        let store = SqliteStore::in_memory().unwrap();
        let map = store.upsert_channels(&input(), &[Channel::new("ch-1", "A")]).await.unwrap();
        let channel = map["ch-1"];

        let mut ghost = Program::new("Ghost", 0, HOUR_MS);
        ghost.id = Some(ProgramId(404));
        let writes = ProgramWrites {
            inserts: vec![Program::new("Show", 0, HOUR_MS)],
            updates: vec![ghost],
            deletes: vec![],
        };

        let result = store.write_programs(channel, writes).await;
        assert!(matches!(result, Err(Error::StoreWriteFailure(_))));
        assert!(store.get_programs(channel).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("guide.db");

        let channel_id = {
            let store = SqliteStore::open(&path).unwrap();
            let map = store.upsert_channels(&input(), &[Channel::new("ch-1", "A")]).await.unwrap();
            let writes = ProgramWrites {
                inserts: vec![Program::new("Show", 0, HOUR_MS)],
                ..Default::default()
            };
            store.write_programs(map["ch-1"], writes).await.unwrap();
            map["ch-1"]
        };

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.get_channels(&input()).await.unwrap().len(), 1);
        assert_eq!(store.get_programs(channel_id).await.unwrap().len(), 1);
    }
}
