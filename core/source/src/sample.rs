//! Generated sample lineup.
//!
//! The default lineup has two channels: a repeatable channel whose template
//! is a single one-hour program, and a scheduled channel with five
//! consecutive one-hour programs starting at the requested range start.

use async_trait::async_trait;
use tracing::debug;

use crate::source::ProgramSource;
use epgsync_common::{Channel, Error, Program, Result, UtcMillis, HOUR_MS};

/// How a sample channel produces its programs.
#[derive(Debug, Clone)]
pub enum SampleChannel {
    /// Repeatable channel returning the same template cycle on every fetch.
    Looping {
        channel: Channel,
        /// Template programs; start times are only used for their durations.
        cycle: Vec<Program>,
    },
    /// Channel with `count` consecutive programs from the range start.
    Scheduled {
        channel: Channel,
        count: usize,
        duration_ms: i64,
    },
}

impl SampleChannel {
    fn channel(&self) -> &Channel {
        match self {
            SampleChannel::Looping { channel, .. } | SampleChannel::Scheduled { channel, .. } => channel,
        }
    }
}

/// Program source backed by a generated lineup.
#[derive(Debug, Clone)]
pub struct SampleSource {
    channels: Vec<SampleChannel>,
}

impl SampleSource {
    /// Create a source with no channels.
    pub fn empty() -> Self {
        Self { channels: Vec::new() }
    }

    /// Create a source with the default two-channel lineup.
    pub fn new() -> Self {
        Self::empty()
            .with_looping_channel(
                Channel::new("sample-loop", "Sample Loop")
                    .with_display_number("1-1")
                    .with_repeatable(true)
                    .with_provider_data(serde_json::json!({"repeatable": true})),
                vec![Program::new("Sample Loop Feature", 0, HOUR_MS)
                    .with_description("The sample feature, repeated every hour")],
            )
            .with_scheduled_channel(
                Channel::new("sample-schedule", "Sample Schedule").with_display_number("2-1"),
                5,
                HOUR_MS,
            )
    }

    /// Add a repeatable channel with a fixed template cycle.
    pub fn with_looping_channel(mut self, channel: Channel, cycle: Vec<Program>) -> Self {
        self.channels.push(SampleChannel::Looping {
            channel: channel.with_repeatable(true),
            cycle,
        });
        self
    }

    /// Add a channel with `count` consecutive programs of `duration_ms`.
    pub fn with_scheduled_channel(mut self, channel: Channel, count: usize, duration_ms: i64) -> Self {
        self.channels.push(SampleChannel::Scheduled {
            channel,
            count,
            duration_ms,
        });
        self
    }

    fn find(&self, external_id: &str) -> Option<&SampleChannel> {
        self.channels
            .iter()
            .find(|c| c.channel().external_id == external_id)
    }
}

impl Default for SampleSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProgramSource for SampleSource {
    fn name(&self) -> &str {
        "sample"
    }

    async fn get_channels(&self) -> Result<Vec<Channel>> {
        Ok(self.channels.iter().map(|c| c.channel().clone()).collect())
    }

    async fn get_programs(
        &self,
        channel: &Channel,
        start_ms: UtcMillis,
        _end_ms: UtcMillis,
    ) -> Result<Vec<Program>> {
        let sample = self.find(&channel.external_id).ok_or_else(|| {
            Error::SourceUnavailable(format!("Unknown sample channel: {}", channel.external_id))
        })?;

        let programs = match sample {
            SampleChannel::Looping { cycle, .. } => cycle.clone(),
            SampleChannel::Scheduled {
                channel,
                count,
                duration_ms,
            } => (0..*count)
                .map(|i| {
                    let start = start_ms + i as i64 * duration_ms;
                    Program::new(
                        format!("{} #{}", channel.display_name, i + 1),
                        start,
                        start + duration_ms,
                    )
                    .with_episode_title(format!("Episode {}", i + 1))
                })
                .collect(),
        };

        debug!(
            channel = %channel.external_id,
            count = programs.len(),
            "Generated sample programs"
        );
        Ok(programs)
    }
}
