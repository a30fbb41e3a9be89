#![forbid(unsafe_code)]

mod artifact;
mod process_set;
mod target;

pub use artifact::ArtifactRecord;
pub use process_set::{MonitoredProcessSet, SharedProcessSet, lock_set};
pub use target::TraceTarget;
