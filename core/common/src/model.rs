//! Channel and program records exchanged between sources, the sync engine
//! and stores.

use serde::{Deserialize, Serialize};

use crate::types::{ChannelId, ProgramId, UtcMillis};

/// A channel of a TV input.
///
/// `external_id` is assigned by the program source and is the reconciliation
/// key. `id` is only set once the store has written the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    /// Store-assigned id, `None` until first written.
    pub id: Option<ChannelId>,
    /// Source-assigned id, stable across syncs.
    pub external_id: String,
    /// Name shown in the guide.
    pub display_name: String,
    /// Channel number shown in the guide (e.g. "7-1").
    pub display_number: Option<String>,
    pub description: Option<String>,
    /// Schedule is a short template cycle repeated over the sync window.
    pub repeatable: bool,
    /// Opaque data owned by the program source.
    pub provider_data: Option<serde_json::Value>,
}

impl Channel {
    /// Create an unsaved channel.
    pub fn new(external_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: None,
            external_id: external_id.into(),
            display_name: display_name.into(),
            display_number: None,
            description: None,
            repeatable: false,
            provider_data: None,
        }
    }

    /// Set the display number.
    pub fn with_display_number(mut self, number: impl Into<String>) -> Self {
        self.display_number = Some(number.into());
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark the channel as repeatable.
    pub fn with_repeatable(mut self, repeatable: bool) -> Self {
        self.repeatable = repeatable;
        self
    }

    /// Attach provider data.
    pub fn with_provider_data(mut self, data: serde_json::Value) -> Self {
        self.provider_data = Some(data);
        self
    }

    /// Compare every persisted field except the store id.
    pub fn same_content(&self, other: &Channel) -> bool {
        self.external_id == other.external_id
            && self.display_name == other.display_name
            && self.display_number == other.display_number
            && self.description == other.description
            && self.repeatable == other.repeatable
            && self.provider_data == other.provider_data
    }
}

/// A scheduled program on a channel, covering `[start, end)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    /// Store-assigned id, `None` until first written.
    pub id: Option<ProgramId>,
    /// Owning channel, set once the channel has a store id.
    pub channel_id: Option<ChannelId>,
    pub start_time_utc_ms: UtcMillis,
    pub end_time_utc_ms: UtcMillis,
    pub title: String,
    pub description: Option<String>,
    pub episode_title: Option<String>,
    /// Opaque data owned by the program source.
    pub provider_data: Option<serde_json::Value>,
}

impl Program {
    /// Create an unsaved program.
    pub fn new(title: impl Into<String>, start_time_utc_ms: UtcMillis, end_time_utc_ms: UtcMillis) -> Self {
        Self {
            id: None,
            channel_id: None,
            start_time_utc_ms,
            end_time_utc_ms,
            title: title.into(),
            description: None,
            episode_title: None,
            provider_data: None,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the episode title.
    pub fn with_episode_title(mut self, episode_title: impl Into<String>) -> Self {
        self.episode_title = Some(episode_title.into());
        self
    }

    /// Attach provider data.
    pub fn with_provider_data(mut self, data: serde_json::Value) -> Self {
        self.provider_data = Some(data);
        self
    }

    /// Length of the program in milliseconds (may be non-positive for bad input).
    pub fn duration_ms(&self) -> i64 {
        self.end_time_utc_ms.saturating_sub(self.start_time_utc_ms)
    }

    /// Whether `[start, end)` intersects `[window_start, window_end)`.
    pub fn overlaps(&self, window_start: UtcMillis, window_end: UtcMillis) -> bool {
        self.end_time_utc_ms > window_start && self.start_time_utc_ms < window_end
    }

    /// Compare every persisted field except identity (id, channel, start).
    pub fn same_content(&self, other: &Program) -> bool {
        self.end_time_utc_ms == other.end_time_utc_ms
            && self.title == other.title
            && self.description == other.description
            && self.episode_title == other.episode_title
            && self.provider_data == other.provider_data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HOUR_MS;

    #[test]
    fn test_program_overlaps() {
        let program = Program::new("News", HOUR_MS, 2 * HOUR_MS);

        assert!(program.overlaps(0, HOUR_MS + 1));
        assert!(program.overlaps(HOUR_MS + 30, 3 * HOUR_MS));
        // Half-open: touching boundaries do not overlap
        assert!(!program.overlaps(0, HOUR_MS));
        assert!(!program.overlaps(2 * HOUR_MS, 3 * HOUR_MS));
    }

    #[test]
    fn test_program_same_content_ignores_identity() {
        let mut stored = Program::new("News", 0, HOUR_MS).with_description("Daily news");
        stored.id = Some(ProgramId(7));
        stored.channel_id = Some(ChannelId(1));
        let fetched = Program::new("News", 0, HOUR_MS).with_description("Daily news");

        assert!(stored.same_content(&fetched));

        let renamed = fetched.clone().with_episode_title("Evening edition");
        assert!(!stored.same_content(&renamed));
    }

    #[test]
    fn test_channel_same_content() {
        let mut stored = Channel::new("ch-1", "Test Channel").with_repeatable(true);
        stored.id = Some(ChannelId(3));
        let fetched = Channel::new("ch-1", "Test Channel").with_repeatable(true);
        assert!(stored.same_content(&fetched));

        let renumbered = fetched.with_display_number("2-1");
        assert!(!stored.same_content(&renumbered));
    }

    #[test]
    fn test_program_serialization() {
        let program = Program::new("Movie", 0, 2 * HOUR_MS)
            .with_provider_data(serde_json::json!({"rating": "PG"}));

        let json = serde_json::to_string(&program).unwrap();
        let restored: Program = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, program);
    }
}
