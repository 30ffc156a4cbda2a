//! Device assignment for pool workers

use shardlet_core::{
    DeviceInventory, DeviceSet, PoolConfig, ShardletError, ShardletResult, WorkerSpec,
};
use std::collections::HashSet;
use tracing::debug;

/// Devices for one worker.
///
/// Worker `i` receives the contiguous slice `[i*d, (i+1)*d)` of
/// `explicit` when given, otherwise of `available`. Slices of distinct
/// workers never overlap; an explicit list that repeats an id is
/// rejected. Pure: no state is read or written.
pub fn assign(
    available: &[u32],
    devices_per_worker: u32,
    worker_index: u32,
    explicit: Option<&[u32]>,
) -> ShardletResult<DeviceSet> {
    if devices_per_worker == 0 {
        return Err(ShardletError::Config(
            "devices_per_worker must be at least 1".to_string(),
        ));
    }

    let (source, origin) = match explicit {
        Some(ids) => {
            let mut seen = HashSet::with_capacity(ids.len());
            if let Some(id) = ids.iter().find(|&&id| !seen.insert(id)) {
                return Err(ShardletError::Config(format!(
                    "device {} appears more than once in the explicit device list",
                    id
                )));
            }
            (ids, "explicit device list")
        }
        None => {
            if available.is_empty() {
                return Err(ShardletError::Config("no devices available".to_string()));
            }
            (available, "available devices")
        }
    };

    let per_worker = devices_per_worker as usize;
    let start = (worker_index as usize).checked_mul(per_worker);
    let end = start.and_then(|s| s.checked_add(per_worker));
    match (start, end) {
        (Some(start), Some(end)) if end <= source.len() => {
            DeviceSet::new(source[start..end].to_vec())
        }
        _ => Err(ShardletError::Config(format!(
            "worker {} needs {} devices but the {} holds only {}",
            worker_index,
            devices_per_worker,
            origin,
            source.len()
        ))),
    }
}

/// Assignment settings for a whole pool
#[derive(Debug, Clone)]
pub struct DeviceAllocator {
    available: Vec<u32>,
    devices_per_worker: u32,
    explicit: Option<Vec<u32>>,
}

impl DeviceAllocator {
    pub fn new(available: Vec<u32>, devices_per_worker: u32, explicit: Option<Vec<u32>>) -> Self {
        Self {
            available,
            devices_per_worker,
            explicit,
        }
    }

    /// Create an allocator over the available devices of an inventory
    pub fn from_config(config: &PoolConfig, inventory: &DeviceInventory) -> Self {
        Self::new(
            inventory.available_indices(),
            config.devices_per_worker,
            config.device_ids.clone(),
        )
    }

    /// Assign the device set of one worker
    pub fn assign(&self, worker_index: u32) -> ShardletResult<WorkerSpec> {
        let device_set = assign(
            &self.available,
            self.devices_per_worker,
            worker_index,
            self.explicit.as_deref(),
        )?;

        debug!(
            worker_index = worker_index,
            devices = %device_set,
            "Assigned devices"
        );

        Ok(WorkerSpec {
            worker_index,
            devices_per_worker: self.devices_per_worker,
            device_set,
        })
    }

    /// Assignment for every worker; failures stay per worker
    pub fn plan(&self, worker_count: u32) -> Vec<ShardletResult<WorkerSpec>> {
        (0..worker_count).map(|i| self.assign(i)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn devices(n: u32) -> Vec<u32> {
        (0..n).collect()
    }

    #[test]
    fn test_round_robin_slices() {
        let available = devices(8);
        assert_eq!(assign(&available, 4, 0, None).unwrap().ids(), &[0, 1, 2, 3]);
        assert_eq!(assign(&available, 4, 1, None).unwrap().ids(), &[4, 5, 6, 7]);
    }

    #[test]
    fn test_explicit_device_list() {
        let explicit = [2, 3, 4, 5];
        let available = devices(8);
        assert_eq!(
            assign(&available, 2, 0, Some(&explicit)).unwrap().ids(),
            &[2, 3]
        );
        assert_eq!(
            assign(&available, 2, 1, Some(&explicit)).unwrap().ids(),
            &[4, 5]
        );

        let result = assign(&available, 2, 2, Some(&explicit));
        assert!(matches!(result, Err(ShardletError::Config(_))));
    }

    #[test]
    fn test_not_enough_devices() {
        let result = assign(&devices(6), 4, 1, None);
        assert!(matches!(result, Err(ShardletError::Config(_))));
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(matches!(
            assign(&devices(4), 0, 0, None),
            Err(ShardletError::Config(_))
        ));
        assert!(matches!(
            assign(&[], 1, 0, None),
            Err(ShardletError::Config(_))
        ));
        assert!(matches!(
            assign(&devices(4), u32::MAX, u32::MAX, None),
            Err(ShardletError::Config(_))
        ));
    }

    #[test]
    fn test_assignments_are_disjoint_and_sized() {
        for total in 1..=16u32 {
            let available = devices(total);
            for per_worker in 1..=total {
                let workers = total / per_worker;
                let mut used = HashSet::new();
                for worker in 0..workers {
                    let set = assign(&available, per_worker, worker, None).unwrap();
                    assert_eq!(set.len(), per_worker as usize);
                    for &id in set.ids() {
                        assert!(used.insert(id), "device {} assigned twice", id);
                    }
                }
                assert!(assign(&available, per_worker, workers, None).is_err());
            }
        }
    }

    #[test]
    fn test_explicit_assignments_are_disjoint() {
        let explicit = [5, 1, 7, 3, 0, 6];
        let available = devices(8);
        for per_worker in 1..=3u32 {
            let workers = explicit.len() as u32 / per_worker;
            let mut used = HashSet::new();
            for worker in 0..workers {
                let set = assign(&available, per_worker, worker, Some(&explicit)).unwrap();
                for &id in set.ids() {
                    assert!(used.insert(id), "device {} assigned twice", id);
                }
            }
        }
    }

    #[test]
    fn test_explicit_list_with_repeated_device() {
        let explicit = [0, 1, 1, 2];
        for worker in 0..2 {
            let result = assign(&devices(4), 2, worker, Some(&explicit));
            assert!(matches!(result, Err(ShardletError::Config(_))));
        }
    }

    #[test]
    fn test_assign_is_deterministic() {
        let available = vec![7, 3, 9, 1];
        let first = assign(&available, 2, 1, None).unwrap();
        let second = assign(&available, 2, 1, None).unwrap();
        assert_eq!(first, second);
        // Order of the input list is preserved, not sorted
        assert_eq!(first.ids(), &[9, 1]);
    }

    #[test]
    fn test_plan_keeps_failures_per_worker() {
        let allocator = DeviceAllocator::new(devices(6), 4, None);
        let plan = allocator.plan(2);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].as_ref().unwrap().device_set.ids(), &[0, 1, 2, 3]);
        assert!(plan[1].is_err());
    }

    #[test]
    fn test_from_config_uses_available_devices() {
        let mut inventory = DeviceInventory::with_count(shardlet_core::DeviceKind::Cuda, 4);
        inventory.devices[0].available = false;
        let config = PoolConfig {
            worker_count: 1,
            devices_per_worker: 2,
            device_ids: None,
            device_kind: shardlet_core::DeviceKind::Cuda,
        };

        let allocator = DeviceAllocator::from_config(&config, &inventory);
        let spec = allocator.assign(0).unwrap();
        assert_eq!(spec.device_set.ids(), &[1, 2]);
        assert_eq!(spec.devices_per_worker, 2);
    }
}
