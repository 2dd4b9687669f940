//! Common utilities and types shared across the EPG sync crates.
//!
//! This module provides the error taxonomy, identifiers, the channel and
//! program model, and the clock abstraction used by every other crate.

pub mod clock;
pub mod error;
pub mod model;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, ErrorReason, Result};
pub use model::{Channel, Program};
pub use types::{ChannelId, InputId, ProgramId, UtcMillis, HOUR_MS};
