//! Live run tracking: registry, per-run logger and observer stream.

mod logger;
mod registry;
mod stream;

pub use logger::RunLogger;
pub use registry::{Reclaimer, RunProgress, RunRegistry, RunState};
pub use stream::{stream_run, StreamFrame};
