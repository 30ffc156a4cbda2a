//! shardlet-core: Core types for the shardlet worker pool
//!
//! This crate provides the fundamental types used throughout shardlet:
//! - Device discovery and device sets
//! - Worker specifications and lifecycle states
//! - Requests and responses
//! - Model artifact records
//! - Configuration types
//! - Error handling

pub mod config;
pub mod device;
pub mod error;
pub mod model;
pub mod request;
pub mod worker;

pub use config::*;
pub use device::*;
pub use error::*;
pub use model::*;
pub use request::*;
pub use worker::*;
