//! Worker specification and lifecycle types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::DeviceSet;

/// Immutable description of one worker, created once at pool startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSpec {
    /// Worker index within the pool
    pub worker_index: u32,
    /// Number of devices the worker requires
    pub devices_per_worker: u32,
    /// Devices the worker is bound to
    pub device_set: DeviceSet,
}

/// Worker lifecycle state
///
/// `Starting -> Ready -> Serving <-> Degraded -> Stopped`, with `Failed`
/// reachable from `Starting` or `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    /// Devices being bound and model being loaded
    Starting,
    /// Model loaded, no batch served yet
    Ready,
    /// Last batch completed normally
    Serving,
    /// Last batch hit a batch-scoped failure
    Degraded,
    /// Startup failed; the worker never accepts batches
    Failed,
    /// Worker shut down
    Stopped,
}

impl WorkerStatus {
    /// Whether moving from `self` to `next` is a legal lifecycle step
    pub fn can_transition_to(self, next: WorkerStatus) -> bool {
        use WorkerStatus::*;
        matches!(
            (self, next),
            (Starting, Ready)
                | (Starting, Failed)
                | (Starting, Stopped)
                | (Ready, Serving)
                | (Ready, Degraded)
                | (Ready, Failed)
                | (Ready, Stopped)
                | (Serving, Serving)
                | (Serving, Degraded)
                | (Serving, Stopped)
                | (Degraded, Serving)
                | (Degraded, Degraded)
                | (Degraded, Stopped)
        )
    }

    /// Whether a worker in this state accepts batches
    pub fn accepts_batches(self) -> bool {
        matches!(
            self,
            WorkerStatus::Ready | WorkerStatus::Serving | WorkerStatus::Degraded
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerStatus::Failed | WorkerStatus::Stopped)
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerStatus::Starting => write!(f, "Starting"),
            WorkerStatus::Ready => write!(f, "Ready"),
            WorkerStatus::Serving => write!(f, "Serving"),
            WorkerStatus::Degraded => write!(f, "Degraded"),
            WorkerStatus::Failed => write!(f, "Failed"),
            WorkerStatus::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Health snapshot for one worker, as reported to the supervisor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHealth {
    /// Unique worker identifier
    pub id: Uuid,
    /// Worker index within the pool
    pub worker_index: u32,
    /// Current status
    pub status: WorkerStatus,
    /// Assigned devices; absent when allocation failed
    pub device_set: Option<DeviceSet>,
    /// Reason for the last failure, if any
    pub last_error: Option<String>,
    /// Number of batches handled
    pub batches_served: u64,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Completion time of the most recent batch
    pub last_batch_at: Option<DateTime<Utc>>,
}

impl WorkerHealth {
    /// Create the health record for a worker that is starting up
    pub fn starting(worker_index: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            worker_index,
            status: WorkerStatus::Starting,
            device_set: None,
            last_error: None,
            batches_served: 0,
            created_at: Utc::now(),
            last_batch_at: None,
        }
    }

    /// Check if the worker can take traffic
    pub fn is_healthy(&self) -> bool {
        matches!(self.status, WorkerStatus::Ready | WorkerStatus::Serving)
    }
}
