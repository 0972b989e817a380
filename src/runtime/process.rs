//! Real component processes
//!
//! Each component is started through a host-exec wrapper (by default
//! `ip netns exec {host}`) so it runs inside the emulated host's network
//! namespace. Output goes to a per-component log file in the work directory.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use super::{ContainerRuntime, LaunchRequest, ProcessHandle, RuntimeError};

/// Runtime that spawns OS processes
pub struct ProcessRuntime {
    /// Children by process id
    processes: DashMap<String, Child>,
    /// Argument prefix placed before every command; `{host}` is substituted
    host_exec: Vec<String>,
    /// Directory for component log files
    work_dir: PathBuf,
    /// How long a fresh process must survive to count as started
    startup_check: Duration,
}

impl ProcessRuntime {
    pub fn new(host_exec: Vec<String>, work_dir: PathBuf, startup_check: Duration) -> Self {
        Self {
            processes: DashMap::new(),
            host_exec,
            work_dir,
            startup_check,
        }
    }

    /// Full argument vector for a launch request
    pub fn argv(&self, request: &LaunchRequest) -> Vec<String> {
        self.host_exec
            .iter()
            .map(|arg| arg.replace("{host}", &request.host))
            .chain(request.command.iter().cloned())
            .collect()
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.processes.contains_key(id)
    }

    pub fn list_running(&self) -> Vec<String> {
        self.processes.iter().map(|p| p.key().clone()).collect()
    }

    async fn stop_child(id: &str, child: &mut Child, grace: Duration) -> Result<(), RuntimeError> {
        if let Some(pid) = child.id() {
            let _ = Command::new("kill")
                .args(["-TERM", &pid.to_string()])
                .output()
                .await;
        }

        match timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                debug!("Process {} exited with {}", id, status);
                Ok(())
            }
            Ok(Err(e)) => Err(RuntimeError::IoError(e)),
            Err(_) => {
                warn!(
                    "Process {} still running after {:?}, killing it",
                    id, grace
                );
                child.kill().await?;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl ContainerRuntime for ProcessRuntime {
    async fn launch(&self, request: &LaunchRequest) -> Result<ProcessHandle, RuntimeError> {
        let id = request.process_id();
        let argv = self.argv(request);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| RuntimeError::SpawnError(format!("{}: empty command", id)))?;

        tokio::fs::create_dir_all(&self.work_dir).await?;
        let log_path = self.work_dir.join(format!("{}.log", id));
        let log = std::fs::File::create(&log_path)?;

        let mut child = Command::new(program)
            .args(args)
            .envs(&request.env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RuntimeError::SpawnError(format!("{}: {}", id, e)))?;

        sleep(self.startup_check).await;
        if let Some(status) = child.try_wait()? {
            if !status.success() {
                return Err(RuntimeError::ProcessExited(format!(
                    "{} exited with {} (see {})",
                    id,
                    status,
                    log_path.display()
                )));
            }
            debug!("Process {} already finished successfully", id);
        }

        let pid = child.id();
        info!(
            "Started {} on {} ({}) pid={:?}",
            id, request.host, request.ip, pid
        );
        self.processes.insert(id.clone(), child);
        Ok(ProcessHandle { id, pid })
    }

    async fn terminate(&self, handle: &ProcessHandle, grace: Duration) -> Result<(), RuntimeError> {
        let (id, mut child) = self
            .processes
            .remove(&handle.id)
            .ok_or_else(|| RuntimeError::NotFound(handle.id.clone()))?;
        info!("Stopping {}", id);
        Self::stop_child(&id, &mut child, grace).await
    }

    async fn shutdown_all(&self) {
        let ids: Vec<String> = self.list_running();
        for id in ids {
            if let Some((id, mut child)) = self.processes.remove(&id) {
                if let Err(e) = child.kill().await {
                    error!("Failed to kill {}: {}", id, e);
                }
            }
        }
    }
}
