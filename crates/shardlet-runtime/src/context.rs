//! Binding a worker's execution context to its devices

use shardlet_core::{
    DeviceInventory, DeviceKind, DeviceSet, ShardletError, ShardletResult, WorkerSpec,
};
use std::collections::HashSet;
use tracing::debug;

/// Environment variable carrying the worker index
pub const ENV_WORKER_INDEX: &str = "SHARDLET_WORKER_INDEX";
/// Environment variable carrying the bound device ids
pub const ENV_DEVICES: &str = "SHARDLET_DEVICES";

/// Execution context bound exclusively to one worker's devices.
///
/// Must exist before a model is loaded so allocations land on the
/// correct devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    /// Worker index within the pool
    pub worker_index: u32,
    /// Kind of the bound devices
    pub kind: DeviceKind,
    /// Bound devices
    pub devices: DeviceSet,
}

impl ExecutionContext {
    /// Bind a worker's device set against the devices visible on this host
    pub fn bind(spec: &WorkerSpec, inventory: &DeviceInventory) -> ShardletResult<Self> {
        let mut seen = HashSet::new();
        for &id in spec.device_set.ids() {
            if !seen.insert(id) {
                return Err(ShardletError::DeviceBinding(format!(
                    "device {} listed twice for worker {}",
                    id, spec.worker_index
                )));
            }
            match inventory.get(id) {
                Some(device) if device.available => {}
                Some(_) => {
                    return Err(ShardletError::DeviceBinding(format!(
                        "{} device {} is not available",
                        inventory.kind, id
                    )))
                }
                None => {
                    return Err(ShardletError::DeviceBinding(format!(
                        "{} device {} not found",
                        inventory.kind, id
                    )))
                }
            }
        }

        debug!(
            worker_index = spec.worker_index,
            devices = %spec.device_set,
            kind = %inventory.kind,
            "Execution context bound"
        );

        Ok(Self {
            worker_index: spec.worker_index,
            kind: inventory.kind,
            devices: spec.device_set.clone(),
        })
    }

    /// Environment that scopes a worker process to this context
    pub fn env(&self) -> Vec<(&'static str, String)> {
        let mut env = vec![
            (ENV_WORKER_INDEX, self.worker_index.to_string()),
            (ENV_DEVICES, self.devices.to_visible_devices()),
        ];
        if self.kind == DeviceKind::Cuda {
            env.push(("CUDA_VISIBLE_DEVICES", self.devices.to_visible_devices()));
        }
        env
    }

    /// Whether this context runs on an accelerator
    pub fn is_accelerator(&self) -> bool {
        self.kind != DeviceKind::Cpu
    }
}
