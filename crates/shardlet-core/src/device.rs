//! Device discovery and device sets

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ShardletError, ShardletResult};

/// Kind of execution unit a worker is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Logical CPU cores
    Cpu,
    /// NVIDIA CUDA devices
    Cuda,
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceKind::Cpu => write!(f, "cpu"),
            DeviceKind::Cuda => write!(f, "cuda"),
        }
    }
}

/// A single assignable device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Device index
    pub index: u32,
    /// Device name
    pub name: String,
    /// Device kind
    pub kind: DeviceKind,
    /// Whether the device may be bound by a worker
    pub available: bool,
}

/// Devices visible to this host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInventory {
    /// Kind shared by every device in the inventory
    pub kind: DeviceKind,
    /// Detected devices, ordered by index
    pub devices: Vec<DeviceInfo>,
}

impl DeviceInventory {
    /// Create an empty inventory (no devices detected)
    pub fn empty(kind: DeviceKind) -> Self {
        Self {
            kind,
            devices: Vec::new(),
        }
    }

    /// Build an inventory of `count` available devices numbered from zero
    pub fn with_count(kind: DeviceKind, count: u32) -> Self {
        let devices = (0..count)
            .map(|index| DeviceInfo {
                index,
                name: format!("{} {}", kind, index),
                kind,
                available: true,
            })
            .collect();
        Self { kind, devices }
    }

    /// Get available device indices, in ascending order
    pub fn available_indices(&self) -> Vec<u32> {
        self.devices
            .iter()
            .filter(|d| d.available)
            .map(|d| d.index)
            .collect()
    }

    /// Look up a device by index
    pub fn get(&self, index: u32) -> Option<&DeviceInfo> {
        self.devices.iter().find(|d| d.index == index)
    }
}

/// Ordered, non-empty list of device ids owned by one worker
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<u32>", into = "Vec<u32>")]
pub struct DeviceSet(Vec<u32>);

impl DeviceSet {
    /// Create a device set, rejecting an empty list
    pub fn new(ids: Vec<u32>) -> ShardletResult<Self> {
        if ids.is_empty() {
            return Err(ShardletError::Config(
                "device set must not be empty".to_string(),
            ));
        }
        Ok(Self(ids))
    }

    pub fn ids(&self) -> &[u32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.0.contains(&id)
    }

    /// Comma-separated ids, as expected by `CUDA_VISIBLE_DEVICES`
    pub fn to_visible_devices(&self) -> String {
        self.0
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl TryFrom<Vec<u32>> for DeviceSet {
    type Error = ShardletError;

    fn try_from(ids: Vec<u32>) -> ShardletResult<Self> {
        DeviceSet::new(ids)
    }
}

impl From<DeviceSet> for Vec<u32> {
    fn from(set: DeviceSet) -> Self {
        set.0
    }
}

impl std::fmt::Display for DeviceSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.to_visible_devices())
    }
}

/// Detect devices of the given kind on this host
///
/// CUDA devices come from `CUDA_VISIBLE_DEVICES` when it is set, otherwise
/// from the `/dev/nvidiaN` device nodes. CPU devices are logical cores.
pub fn detect_devices(kind: DeviceKind) -> DeviceInventory {
    match kind {
        DeviceKind::Cpu => {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get() as u32)
                .unwrap_or(1);
            DeviceInventory::with_count(DeviceKind::Cpu, cores)
        }
        DeviceKind::Cuda => match std::env::var("CUDA_VISIBLE_DEVICES") {
            Ok(value) => cuda_from_visible_devices(&value),
            Err(_) => cuda_from_device_nodes(Path::new("/dev")),
        },
    }
}

fn cuda_from_visible_devices(value: &str) -> DeviceInventory {
    // Only numeric ids are understood; UUID-style entries are skipped
    let mut indices: Vec<u32> = value
        .split(',')
        .filter_map(|s| s.trim().parse::<u32>().ok())
        .collect();
    indices.sort_unstable();
    indices.dedup();
    cuda_inventory(indices)
}

fn cuda_from_device_nodes(dev: &Path) -> DeviceInventory {
    let Ok(entries) = std::fs::read_dir(dev) else {
        return DeviceInventory::empty(DeviceKind::Cuda);
    };

    let mut indices: Vec<u32> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            e.file_name()
                .to_str()
                .and_then(|name| name.strip_prefix("nvidia"))
                .and_then(|n| n.parse::<u32>().ok())
        })
        .collect();
    indices.sort_unstable();
    cuda_inventory(indices)
}

fn cuda_inventory(indices: Vec<u32>) -> DeviceInventory {
    DeviceInventory {
        kind: DeviceKind::Cuda,
        devices: indices
            .into_iter()
            .map(|index| DeviceInfo {
                index,
                name: format!("cuda:{}", index),
                kind: DeviceKind::Cuda,
                available: true,
            })
            .collect(),
    }
}
