#![deny(unsafe_code)]

pub mod artifacts;
pub mod auxiliary;
pub mod channel;
pub mod clock;
pub mod collect;
pub mod domain;
pub mod engine;
pub mod error;
pub mod layout;
pub mod postprocess;
pub mod strategy;
pub mod supervisor;

pub use artifacts::{
    ArtifactQueue, CompletionReport, Controller, DirectoryController, NetlogController,
    UploadSummary, report_completion,
};
pub use auxiliary::Auxiliary;
pub use channel::{ChannelState, Dispatcher, EventChannel, EventRecord, LineSource};
pub use clock::{Clock, SystemClock};
pub use domain::{ArtifactRecord, MonitoredProcessSet, SharedProcessSet, TraceTarget};
pub use engine::{AnalysisEngine, MonitorOutcome, Phase, Services, StopReason};
pub use error::Error;
pub use layout::RunLayout;
pub use postprocess::BehaviorSummary;
pub use strategy::{Strategy, StrategyContext, StrategyRegistry, resolve_package};
pub use supervisor::{Launcher, MonitoredProcess, ProcessControl, ProcessState, Supervisor};
