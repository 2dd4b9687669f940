//! Expansion of repeating channel schedules.
//!
//! A repeatable channel publishes one short cycle of template programs. The
//! cycle is laid end to end from an origin that is a multiple of the cycle
//! duration counted from the Unix epoch, so every device produces the same
//! instance for a given absolute time no matter when it syncs.

use tracing::warn;

use crate::window::SyncWindow;
use epgsync_common::{Error, Program, Result, UtcMillis};

#[derive(Debug, Clone)]
struct Template {
    /// Start relative to the beginning of the cycle.
    offset_ms: i64,
    duration_ms: i64,
    program: Program,
}

/// Ordered template programs defining one repeat period.
#[derive(Debug, Clone)]
pub struct RepeatCycle {
    templates: Vec<Template>,
    duration_ms: i64,
}

impl RepeatCycle {
    /// Build a cycle from the programs fetched for a repeatable channel.
    ///
    /// Templates keep their given order; only their durations matter, not
    /// their start times. Templates with a non-positive duration are skipped.
    ///
    /// # Errors
    /// - `InvalidRepeatCycle` if no template has a positive duration
    pub fn new(channel: &str, programs: Vec<Program>) -> Result<Self> {
        let mut templates = Vec::with_capacity(programs.len());
        let mut offset_ms: i64 = 0;

        for program in programs {
            let duration_ms = program.duration_ms();
            if duration_ms <= 0 {
                warn!(
                    channel,
                    title = %program.title,
                    duration_ms,
                    "Skipping template program without positive duration"
                );
                continue;
            }
            templates.push(Template {
                offset_ms,
                duration_ms,
                program,
            });
            offset_ms = offset_ms.saturating_add(duration_ms);
        }

        if offset_ms <= 0 {
            return Err(Error::InvalidRepeatCycle {
                channel: channel.to_string(),
                reason: "cycle duration is zero".to_string(),
            });
        }

        Ok(Self {
            templates,
            duration_ms: offset_ms,
        })
    }

    /// Sum of the template durations.
    pub fn duration_ms(&self) -> i64 {
        self.duration_ms
    }

    /// Number of templates in one cycle.
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// A valid cycle always has at least one template.
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Start of the cycle instance containing `ts`.
    pub fn origin_for(&self, ts: UtcMillis) -> UtcMillis {
        ts - ts.rem_euclid(self.duration_ms)
    }

    /// Lazily produce the instances intersecting `window`.
    ///
    /// Instances straddling either window edge are emitted whole.
    pub fn tile(&self, window: SyncWindow) -> Tiling<'_> {
        Tiling {
            cycle: self,
            window,
            cycle_start: self.origin_for(window.start_ms),
            index: 0,
        }
    }
}

/// Iterator over concrete program instances of a [`RepeatCycle`].
#[derive(Debug, Clone)]
pub struct Tiling<'a> {
    cycle: &'a RepeatCycle,
    window: SyncWindow,
    cycle_start: UtcMillis,
    index: usize,
}

impl Iterator for Tiling<'_> {
    type Item = Program;

    fn next(&mut self) -> Option<Program> {
        loop {
            let template = &self.cycle.templates[self.index];
            let start = self.cycle_start.saturating_add(template.offset_ms);
            if start >= self.window.end_ms {
                return None;
            }
            let end = start.saturating_add(template.duration_ms);

            self.index += 1;
            if self.index == self.cycle.templates.len() {
                self.index = 0;
                self.cycle_start = self.cycle_start.saturating_add(self.cycle.duration_ms);
            }

            if end <= self.window.start_ms {
                continue;
            }

            let mut instance = template.program.clone();
            instance.id = None;
            instance.channel_id = None;
            instance.start_time_utc_ms = start;
            instance.end_time_utc_ms = end;
            return Some(instance);
        }
    }
}

/// Expand the fetched cycle of a repeatable channel over `window`.
///
/// # Errors
/// - `InvalidRepeatCycle` if the cycle has no positive duration
pub fn tile_programs(channel: &str, cycle: Vec<Program>, window: SyncWindow) -> Result<Vec<Program>> {
    let cycle = RepeatCycle::new(channel, cycle)?;
    Ok(cycle.tile(window).collect())
}
