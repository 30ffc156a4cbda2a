//! Process-based worker launcher
//!
//! Runs each worker as its own OS process, scoped to its device set via
//! environment variables set before the process starts.

use shardlet_core::{ShardletError, ShardletResult};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, Command};
use tracing::{debug, error, info};

use crate::context::ExecutionContext;

/// Process launcher configuration
#[derive(Debug, Clone)]
pub struct ProcessLauncherConfig {
    /// Worker executable
    pub program: PathBuf,
    /// Arguments passed to every worker
    pub args: Vec<String>,
}

/// Launches one worker process per execution context
pub struct ProcessLauncher {
    config: ProcessLauncherConfig,
}

/// A running worker process
pub struct WorkerProcess {
    /// Worker index within the pool
    pub worker_index: u32,
    child: Child,
}

impl ProcessLauncher {
    /// Create a new process launcher
    pub fn new(config: ProcessLauncherConfig) -> Self {
        Self { config }
    }

    /// Build the command to start a worker
    fn build_command(&self, context: &ExecutionContext) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args);

        for (key, value) in context.env() {
            cmd.env(key, value);
        }

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::inherit());
        cmd.kill_on_drop(true);

        cmd
    }

    /// Spawn the worker process for a bound context
    pub fn launch(&self, context: &ExecutionContext) -> ShardletResult<WorkerProcess> {
        info!(
            worker_index = context.worker_index,
            devices = %context.devices,
            program = %self.config.program.display(),
            "Starting worker process"
        );

        let mut cmd = self.build_command(context);
        match cmd.spawn() {
            Ok(child) => {
                debug!(
                    worker_index = context.worker_index,
                    pid = child.id().unwrap_or(0),
                    "Worker process spawned"
                );
                Ok(WorkerProcess {
                    worker_index: context.worker_index,
                    child,
                })
            }
            Err(e) => {
                error!(
                    worker_index = context.worker_index,
                    error = %e,
                    "Failed to spawn worker process"
                );
                Err(ShardletError::Launch(format!(
                    "Failed to spawn worker {}: {}",
                    context.worker_index, e
                )))
            }
        }
    }
}

impl WorkerProcess {
    /// OS process id, if the process has not been reaped
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the process to exit
    pub async fn wait(&mut self) -> ShardletResult<ExitStatus> {
        Ok(self.child.wait().await?)
    }

    /// Kill the process and reap it
    pub async fn stop(&mut self) -> ShardletResult<()> {
        info!(worker_index = self.worker_index, "Stopping worker process");
        self.child.kill().await?;
        Ok(())
    }
}
