//! Stream arguments, validated stream configuration and engine tuning.

mod args;
mod stream;

pub use args::{ArgInfo, ArgKind, DEFAULT_BUFFER_COUNT, MIN_BUFFER_COUNT, StreamArgs};
pub use stream::{Direction, DriverLimits, SessionTuning, StreamConfig};
