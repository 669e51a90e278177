//! Classification engine components
//!
//! Leaves first: slicer → client → dispatcher → merger / persister, with the
//! orchestrator driving them per run.

pub mod audio_slicer;
pub mod batch_dispatcher;
pub mod classifier_client;
pub mod dummy_classifier;
pub mod feature_merger;
pub mod result_persister;
pub mod run_orchestrator;

pub use audio_slicer::{SliceError, SourceWaveform};
pub use batch_dispatcher::{BatchDispatcher, BatchOutcome, DispatchError, SegmentMetadata, SegmentResult};
pub use classifier_client::{ClassifierClient, ClassifierError, ClassifyRequest};
pub use result_persister::PersistError;
pub use run_orchestrator::{EngineContext, RunError, RunOrchestrator, RunOutcome};
