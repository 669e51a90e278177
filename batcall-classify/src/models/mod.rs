//! Data models for the classification engine
//!
//! - Run state machine and durable run row
//! - Classifier service wire format

pub mod run;
pub mod wire;

pub use run::{ClassificationRun, InvalidTransition, RunState, RunStatus};
pub use wire::{unwrap_singleton, FileRecord, ServiceEnvelope};
