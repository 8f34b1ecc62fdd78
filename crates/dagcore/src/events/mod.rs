// crates/dagcore/src/events/mod.rs

mod base;

pub use base::{EventEmitter, EventSink, RunEvent, RunId, RunLevel};
