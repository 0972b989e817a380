//! Component process runtime
//!
//! The lifecycle controller never spawns processes itself; it hands a fully
//! resolved `LaunchRequest` to a `ContainerRuntime` and keeps the returned
//! handle. Two runtimes ship with the crate: `ProcessRuntime` runs real
//! processes inside each host's network namespace, `SimulatedRuntime` only
//! pretends to and is used for dry runs and tests.

pub mod process;
pub mod simulated;

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lifecycle::ServiceKey;

pub use process::ProcessRuntime;
pub use simulated::SimulatedRuntime;

/// Errors that can occur while starting or stopping components
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Failed to spawn process: {0}")]
    SpawnError(String),

    #[error("Process exited during startup: {0}")]
    ProcessExited(String),

    #[error("Process not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Everything needed to start one component on one host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub service_key: ServiceKey,
    pub component: String,
    pub host: String,
    pub ip: Ipv4Addr,
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl LaunchRequest {
    /// Stable identifier for the process, unique among live components
    pub fn process_id(&self) -> String {
        format!("{}-{}", self.service_key, self.component)
    }
}

/// Opaque handle to a launched component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessHandle {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

/// Starts and stops component processes
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Start a component; fails if the process cannot be started
    async fn launch(&self, request: &LaunchRequest) -> Result<ProcessHandle, RuntimeError>;

    /// Ask the process to exit, killing it once `grace` has elapsed
    async fn terminate(&self, handle: &ProcessHandle, grace: Duration) -> Result<(), RuntimeError>;

    /// Kill everything this runtime still tracks
    async fn shutdown_all(&self);
}
