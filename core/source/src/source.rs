//! Program source trait definition.

use async_trait::async_trait;

use epgsync_common::{Channel, Program, Result, UtcMillis};

/// Supplier of channel and program data for one TV input.
///
/// Implementations must handle their own transport and parsing and report
/// any fetch failure as `Error::SourceUnavailable`.
#[async_trait]
pub trait ProgramSource: Send + Sync {
    /// Get the source name (e.g., "sample", "xmltv").
    fn name(&self) -> &str;

    /// Fetch the current channel lineup.
    ///
    /// Returned channels have no store id; `external_id` must be unique and
    /// stable across calls.
    async fn get_channels(&self) -> Result<Vec<Channel>>;

    /// Fetch the programs of `channel` for `[start_ms, end_ms)`.
    ///
    /// For a repeatable channel this returns one representative cycle of
    /// template programs rather than the whole range.
    async fn get_programs(
        &self,
        channel: &Channel,
        start_ms: UtcMillis,
        end_ms: UtcMillis,
    ) -> Result<Vec<Program>>;
}
