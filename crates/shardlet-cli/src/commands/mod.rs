//! CLI commands implementation

use anyhow::Result;
use futures::future::join_all;
use shardlet_core::{detect_devices, DeviceInventory, ServingConfig, ShardletResult};
use shardlet_runtime::{ExecutionContext, ProcessLauncher, ProcessLauncherConfig, WorkerProcess};
use shardlet_scheduler::DeviceAllocator;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// Allocate and bind every worker of the pool, keeping failures per worker
fn bind_workers(
    config: &ServingConfig,
    inventory: &DeviceInventory,
) -> Vec<(u32, ShardletResult<ExecutionContext>)> {
    let allocator = DeviceAllocator::from_config(&config.pool, inventory);
    allocator
        .plan(config.pool.worker_count)
        .into_iter()
        .enumerate()
        .map(|(index, spec)| {
            let context = spec.and_then(|spec| ExecutionContext::bind(&spec, inventory));
            (index as u32, context)
        })
        .collect()
}

/// One table row per worker
fn plan_rows(config: &ServingConfig, inventory: &DeviceInventory) -> Vec<String> {
    bind_workers(config, inventory)
        .into_iter()
        .map(|(index, context)| match context {
            Ok(ctx) => format!("{:<8} {:<20} {}", index, ctx.devices.to_string(), "ok"),
            Err(e) => format!("{:<8} {:<20} {}", index, "-", e),
        })
        .collect()
}

/// Show the device set each worker would receive
pub fn plan(config: &ServingConfig) -> Result<()> {
    let inventory = detect_devices(config.pool.device_kind);

    println!(
        "{} workers x {} {} devices ({} available)",
        config.pool.worker_count,
        config.pool.devices_per_worker,
        inventory.kind,
        inventory.available_indices().len()
    );
    if let Some(ids) = &config.pool.device_ids {
        println!("Explicit device list: {:?}", ids);
    }
    println!();
    println!("{:<8} {:<20} {}", "WORKER", "DEVICES", "STATUS");
    println!("{}", "-".repeat(60));
    for row in plan_rows(config, &inventory) {
        println!("{}", row);
    }

    Ok(())
}

/// Show devices detected on this host
pub fn devices(config: &ServingConfig, json: bool) -> Result<()> {
    let inventory = detect_devices(config.pool.device_kind);

    if json {
        println!("{}", serde_json::to_string_pretty(&inventory)?);
        return Ok(());
    }

    println!(
        "{} devices: {} total, {} available",
        inventory.kind,
        inventory.devices.len(),
        inventory.available_indices().len()
    );
    for device in &inventory.devices {
        println!(
            "[{}] {} - {}",
            device.index,
            device.name,
            if device.available {
                "Available"
            } else {
                "Unavailable"
            }
        );
    }

    Ok(())
}

/// Launch one worker process per assigned device set and wait for them
pub async fn launch(config: &ServingConfig, program: PathBuf, args: Vec<String>) -> Result<()> {
    let inventory = detect_devices(config.pool.device_kind);
    let launcher = ProcessLauncher::new(ProcessLauncherConfig { program, args });

    let mut processes: Vec<WorkerProcess> = Vec::new();
    for (index, context) in bind_workers(config, &inventory) {
        let launched = context.and_then(|ctx| launcher.launch(&ctx));
        match launched {
            Ok(process) => processes.push(process),
            Err(e) => error!(worker_index = index, error = %e, "Worker not launched"),
        }
    }

    if processes.is_empty() {
        anyhow::bail!("no worker could be launched");
    }
    info!(
        launched = processes.len(),
        total = config.pool.worker_count,
        "Workers launched"
    );

    let exits = join_all(processes.iter_mut().map(|p| async move {
        let index = p.worker_index;
        (index, p.wait().await)
    }));

    let interrupted = tokio::select! {
        results = exits => {
            for (index, result) in results {
                match result {
                    Ok(status) if status.success() => {
                        info!(worker_index = index, "Worker exited");
                    }
                    Ok(status) => {
                        warn!(worker_index = index, status = %status, "Worker exited with failure");
                    }
                    Err(e) => {
                        error!(worker_index = index, error = %e, "Failed to wait for worker");
                    }
                }
            }
            false
        }
        _ = tokio::signal::ctrl_c() => true,
    };

    if interrupted {
        info!("Interrupted, stopping workers");
        for process in processes.iter_mut() {
            if let Err(e) = process.stop().await {
                warn!(worker_index = process.worker_index, error = %e, "Failed to stop worker");
            }
        }
    }

    Ok(())
}
