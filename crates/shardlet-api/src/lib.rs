//! shardlet-api: Health API for shardlet
//!
//! This crate exposes per-worker health to an external supervisor:
//! - Pool liveness and readiness
//! - Worker listing with status and devices
//! - A server bound from `[api]` configuration

pub mod rest;
pub mod server;

pub use rest::create_router;
pub use server::{bind, serve};
