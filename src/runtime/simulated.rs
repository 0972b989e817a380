//! In-memory runtime for dry runs and tests
//!
//! Nothing is executed. Launches are recorded, and components named with
//! `fail_component` are refused so launch failures can be exercised.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::{ContainerRuntime, LaunchRequest, ProcessHandle, RuntimeError};

#[derive(Default)]
pub struct SimulatedRuntime {
    live: DashMap<String, LaunchRequest>,
    /// Component name -> launches still allowed to succeed
    failing: Mutex<HashMap<String, usize>>,
    next_pid: AtomicU32,
    launches: Mutex<Vec<LaunchRequest>>,
    terminations: Mutex<Vec<String>>,
}

impl SimulatedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every future launch of a component with this name
    pub fn fail_component(&self, component: &str) {
        self.fail_component_after(component, 0);
    }

    /// Let `successes` more launches of a component through, then refuse
    pub fn fail_component_after(&self, component: &str, successes: usize) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(component.to_string(), successes);
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.clear();
        }
    }

    /// Every launch request accepted so far, in order
    pub fn launches(&self) -> Vec<LaunchRequest> {
        self.launches.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// Process ids terminated so far, in order
    pub fn terminations(&self) -> Vec<String> {
        self.terminations
            .lock()
            .map(|t| t.clone())
            .unwrap_or_default()
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Live process ids, sorted
    pub fn live(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.live.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl ContainerRuntime for SimulatedRuntime {
    async fn launch(&self, request: &LaunchRequest) -> Result<ProcessHandle, RuntimeError> {
        let refused = match self.failing.lock() {
            Ok(mut failing) => match failing.get_mut(&request.component) {
                Some(0) => true,
                Some(remaining) => {
                    *remaining -= 1;
                    false
                }
                None => false,
            },
            Err(_) => false,
        };
        if refused {
            return Err(RuntimeError::SpawnError(format!(
                "{}: simulated launch failure",
                request.process_id()
            )));
        }

        let id = request.process_id();
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst) + 1000;
        debug!("[simulated] launch {} on {} ({})", id, request.host, request.ip);
        self.live.insert(id.clone(), request.clone());
        if let Ok(mut launches) = self.launches.lock() {
            launches.push(request.clone());
        }
        Ok(ProcessHandle { id, pid: Some(pid) })
    }

    async fn terminate(&self, handle: &ProcessHandle, _grace: Duration) -> Result<(), RuntimeError> {
        self.live
            .remove(&handle.id)
            .ok_or_else(|| RuntimeError::NotFound(handle.id.clone()))?;
        debug!("[simulated] terminate {}", handle.id);
        if let Ok(mut terminations) = self.terminations.lock() {
            terminations.push(handle.id.clone());
        }
        Ok(())
    }

    async fn shutdown_all(&self) {
        for id in self.live() {
            self.live.remove(&id);
            if let Ok(mut terminations) = self.terminations.lock() {
                terminations.push(id);
            }
        }
    }
}
