//! shardlet-runtime: Worker execution layer
//!
//! This crate provides everything a single worker runs:
//! - Execution contexts bound to a device set
//! - Model runners (CPU or accelerator) over an opaque backend
//! - The batch handler pipeline
//! - Process-based worker launching

pub mod context;
pub mod handler;
pub mod process;
pub mod runner;
pub mod tensor;
pub mod traits;

pub use context::ExecutionContext;
pub use handler::{BatchHandler, BatchOutcome, SlotMap};
pub use process::{ProcessLauncher, ProcessLauncherConfig, WorkerProcess};
pub use runner::ModelRunner;
pub use tensor::{InputBatch, OutputBatch};
pub use traits::{Backend, LoadedModel, ModelLoader, Tokenizer};
