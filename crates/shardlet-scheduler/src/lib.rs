//! shardlet-scheduler: Device assignment and worker pool
//!
//! This crate places workers on devices and supervises them:
//! - Contiguous device assignment per worker
//! - Worker startup (bind, then load) with per-worker failure isolation
//! - Batch routing and per-worker health reporting

pub mod allocator;
pub mod pool;

pub use allocator::{assign, DeviceAllocator};
pub use pool::WorkerPool;
