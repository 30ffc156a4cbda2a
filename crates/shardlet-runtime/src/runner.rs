//! Model runners selected once at load time

use shardlet_core::{DeviceSet, ShardletError, ShardletResult};
use std::sync::Arc;
use tracing::{debug, info};

use crate::context::ExecutionContext;
use crate::tensor::{InputBatch, OutputBatch};
use crate::traits::Backend;

/// Runner executing on host memory
pub struct CpuRunner {
    backend: Arc<dyn Backend>,
}

/// Runner executing on a bound set of accelerator devices
pub struct AcceleratorRunner {
    backend: Arc<dyn Backend>,
    devices: DeviceSet,
}

/// Model handle owned by exactly one worker
pub enum ModelRunner {
    Cpu(CpuRunner),
    Accelerator(AcceleratorRunner),
}

impl ModelRunner {
    /// Pick the execution path matching the bound context
    pub fn select(context: &ExecutionContext, backend: Arc<dyn Backend>) -> Self {
        let runner = if context.is_accelerator() {
            ModelRunner::Accelerator(AcceleratorRunner {
                backend,
                devices: context.devices.clone(),
            })
        } else {
            ModelRunner::Cpu(CpuRunner { backend })
        };

        info!(
            worker_index = context.worker_index,
            runner = runner.name(),
            devices = %context.devices,
            "Model runner selected"
        );

        runner
    }

    /// Run one batched forward pass.
    ///
    /// The output is checked to hold exactly one row per input row.
    pub fn run(&self, input: &InputBatch) -> ShardletResult<OutputBatch> {
        let result = match self {
            ModelRunner::Cpu(runner) => runner.backend.forward(input),
            ModelRunner::Accelerator(runner) => {
                debug!(devices = %runner.devices, rows = input.rows(), "Running batch");
                runner.backend.forward(input)
            }
        };

        let output = result.map_err(|e| match e {
            ShardletError::ModelExecution(_) => e,
            other => ShardletError::ModelExecution(other.to_string()),
        })?;

        if output.rows() != input.rows() {
            return Err(ShardletError::ModelExecution(format!(
                "model returned {} rows for {} inputs",
                output.rows(),
                input.rows()
            )));
        }

        Ok(output)
    }

    /// Get the runner name
    pub fn name(&self) -> &'static str {
        match self {
            ModelRunner::Cpu(_) => "cpu",
            ModelRunner::Accelerator(_) => "accelerator",
        }
    }

    /// Devices held by an accelerator runner
    pub fn devices(&self) -> Option<&DeviceSet> {
        match self {
            ModelRunner::Cpu(_) => None,
            ModelRunner::Accelerator(runner) => Some(&runner.devices),
        }
    }
}
