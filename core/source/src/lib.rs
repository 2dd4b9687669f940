//! Program source abstraction for EPG sync.
//!
//! A program source supplies the channel lineup of one TV input and the
//! programs of each channel for a requested time range. Concrete adapters
//! (tuner scans, feeds, generated samples) implement [`ProgramSource`]; the
//! sync engine never depends on any particular one.

pub mod registry;
pub mod sample;
pub mod source;

pub use registry::SourceRegistry;
pub use sample::{SampleChannel, SampleSource};
pub use source::ProgramSource;
