//! Seams to the external model runtime and tokenizer

use async_trait::async_trait;
use shardlet_core::{ModelArtifacts, ShardletResult};
use std::sync::Arc;

use crate::context::ExecutionContext;
use crate::tensor::{InputBatch, OutputBatch};

/// Compiled model executing one batched forward pass.
///
/// Implementations wrap the tensor runtime. `forward` blocks until the
/// whole batch has been computed and must return one output row per
/// input row.
pub trait Backend: Send + Sync {
    fn forward(&self, input: &InputBatch) -> ShardletResult<OutputBatch>;
}

/// Opaque text encoder
pub trait Tokenizer: Send + Sync {
    /// Encode text into token ids.
    ///
    /// Failures caused by the input should be reported as
    /// `ShardletError::Decode`.
    fn encode(&self, text: &str) -> ShardletResult<Vec<i64>>;
}

/// Model loaded onto a worker's devices
pub struct LoadedModel {
    pub backend: Arc<dyn Backend>,
    pub tokenizer: Arc<dyn Tokenizer>,
}

/// Loader trait for placing a model artifact on bound devices
#[async_trait]
pub trait ModelLoader: Send + Sync {
    /// Load the model described by `artifacts` into the bound context
    async fn load(
        &self,
        context: &ExecutionContext,
        artifacts: &ModelArtifacts,
    ) -> ShardletResult<LoadedModel>;

    /// Get the loader name
    fn name(&self) -> &'static str;
}
