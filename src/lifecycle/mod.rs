//! Service lifecycle control
//!
//! `ServiceController` owns every piece of mutable scheduling state: host
//! slot counts, live instances and the flow index. A deploy runs
//! placement, process launch, peer-address resolution and flow
//! installation as one unit and rolls all of it back if a component fails
//! to start. A stop tears down in reverse order. Both are followed by a
//! backfill pass that fills idle capacity with filler instances.
//!
//! The controller is used behind a single `tokio::sync::Mutex`
//! (`SharedController`), which serializes all lifecycle operations.

pub mod instance;
pub mod readiness;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::template::{expand_command, resolve_env};
use crate::config::{ComponentSpec, PeerAddr, ServiceCatalog, ServiceDefinition, Settings};
use crate::flow::{
    ControlPlane, FlowDetail, FlowFilter, FlowKey, FlowManager, FlowRequest, RemoveSummary,
};
use crate::placement::{FillerSlots, HostUsage, PlacementError, PlacementScheduler};
use crate::runtime::{ContainerRuntime, LaunchRequest, RuntimeError};
use crate::topology::{TopologyError, TopologyView};

pub use instance::{
    ComponentInstance, InstanceRow, InstanceState, ServiceInstance, ServiceKey, Tier,
};
pub use readiness::{ArtifactProbe, ReadinessError};

/// Controller shared between request handlers
pub type SharedController = Arc<Mutex<ServiceController>>;

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("Unknown instance: {0}")]
    UnknownInstance(ServiceKey),

    #[error("Placement failed: {0}")]
    Placement(#[from] PlacementError),

    #[error("Topology error: {0}")]
    Topology(#[from] TopologyError),

    #[error("Failed to launch {component}: {source}")]
    ProcessLaunch {
        component: String,
        source: RuntimeError,
    },

    #[error("Test of {service_key} failed: {source}")]
    ReadinessTimeout {
        service_key: ServiceKey,
        source: ReadinessError,
    },

    #[error("Service instance {0} has no reporter component")]
    NoReporter(ServiceKey),

    #[error("{service_key}: cannot move from {from} to {to}")]
    InvalidTransition {
        service_key: ServiceKey,
        from: InstanceState,
        to: InstanceState,
    },
}

/// Controller knobs, usually derived from `Settings`
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub max_apps: usize,
    pub filler_service: Option<String>,
    pub scripts_dir: String,
    pub stop_grace: Duration,
    pub shared_dir: PathBuf,
    pub poll_interval: Duration,
    pub readiness_timeout: Duration,
    /// Fixed RNG seed for host selection
    pub seed: Option<u64>,
}

impl ControllerConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_apps: settings.max_apps,
            filler_service: settings.filler_service.clone(),
            scripts_dir: settings.runtime.scripts_dir.to_string_lossy().into_owned(),
            stop_grace: settings.runtime.stop_grace(),
            shared_dir: settings.readiness.shared_dir.clone(),
            poll_interval: settings.readiness.poll_interval(),
            readiness_timeout: settings.readiness.timeout(),
            seed: None,
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Result of a successful deploy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployOutcome {
    pub service_key: ServiceKey,
    /// Filler instances stopped to make room
    pub evicted: Vec<ServiceKey>,
    /// Filler instances started afterwards
    pub backfilled: Vec<ServiceKey>,
}

/// Result of a successful stop
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopOutcome {
    pub service_key: ServiceKey,
    pub freed_slots: usize,
    pub removed_flows: usize,
    pub backfilled: Vec<ServiceKey>,
}

/// One tracked rule, for listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRow {
    pub key: FlowKey,
    pub detail: FlowDetail,
}

/// Capacity snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityReport {
    pub max_apps: usize,
    pub used_slots: usize,
    pub available_slots: usize,
    pub instances: usize,
    pub flows: usize,
    pub hosts: Vec<HostUsage>,
}

/// A component launched but not yet part of a running instance
struct Launched {
    component: ComponentInstance,
    env: BTreeMap<String, String>,
}

pub struct ServiceController {
    config: ControllerConfig,
    catalog: ServiceCatalog,
    topology: Arc<TopologyView>,
    scheduler: PlacementScheduler,
    flows: FlowManager,
    runtime: Arc<dyn ContainerRuntime>,
    instances: BTreeMap<ServiceKey, ServiceInstance>,
    counters: HashMap<String, u64>,
    next_seq: u64,
}

impl ServiceController {
    pub fn new(
        config: ControllerConfig,
        catalog: ServiceCatalog,
        topology: Arc<TopologyView>,
        runtime: Arc<dyn ContainerRuntime>,
        control_plane: Arc<dyn ControlPlane>,
    ) -> Self {
        let hosts = topology.hosts();
        let scheduler = match config.seed {
            Some(seed) => PlacementScheduler::with_seed(hosts, config.max_apps, seed),
            None => PlacementScheduler::new(hosts, config.max_apps),
        };
        let flows = FlowManager::new(topology.clone(), control_plane);
        Self {
            config,
            catalog,
            topology,
            scheduler,
            flows,
            runtime,
            instances: BTreeMap::new(),
            counters: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn into_shared(self) -> SharedController {
        Arc::new(Mutex::new(self))
    }

    // ------------------------------------------------------------------
    // Lifecycle operations
    // ------------------------------------------------------------------

    /// Deploy one instance of `service`, then backfill
    ///
    /// Capacity freed by evictions is backfilled even when the deploy
    /// itself fails afterwards.
    pub async fn deploy(&mut self, service: &str) -> Result<DeployOutcome, LifecycleError> {
        let mut evicted = Vec::new();
        let result = self.deploy_one(service, &mut evicted).await;
        let backfilled = if result.is_ok() || !evicted.is_empty() {
            self.backfill().await
        } else {
            Vec::new()
        };
        let service_key = result?;
        Ok(DeployOutcome {
            service_key,
            evicted,
            backfilled,
        })
    }

    /// Stop an instance, then backfill the freed capacity
    pub async fn stop(&mut self, service_key: &ServiceKey) -> Result<StopOutcome, LifecycleError> {
        let (freed_slots, removed) = self.stop_one(service_key).await?;
        let backfilled = self.backfill().await;
        Ok(StopOutcome {
            service_key: service_key.clone(),
            freed_slots,
            removed_flows: removed.removed,
            backfilled,
        })
    }

    /// Fill idle capacity with filler instances
    ///
    /// Never evicts anything and stops at the first failure.
    pub async fn backfill(&mut self) -> Vec<ServiceKey> {
        let mut deployed = Vec::new();
        let Some(filler) = self.config.filler_service.clone() else {
            return deployed;
        };
        let Some(size) = self.catalog.get(&filler).map(ServiceDefinition::size) else {
            warn!("Filler service '{}' is not in the catalog", filler);
            return deployed;
        };

        while size > 0 && self.scheduler.available_slots() >= size {
            match self.deploy_one(&filler, &mut Vec::new()).await {
                Ok(key) => deployed.push(key),
                Err(e) => {
                    warn!("Backfill with {} stopped: {}", filler, e);
                    break;
                }
            }
        }
        if !deployed.is_empty() {
            info!("Backfilled {} filler instance(s)", deployed.len());
        }
        deployed
    }

    /// Initial backfill at startup
    pub async fn bootstrap(&mut self) -> Vec<ServiceKey> {
        info!(
            "Bootstrapping on {} host(s), {} slot(s) each",
            self.topology.hosts().len(),
            self.scheduler.max_apps()
        );
        self.backfill().await
    }

    /// Stop everything without backfilling
    pub async fn shutdown(&mut self) {
        let keys: Vec<ServiceKey> = self.instances.keys().cloned().collect();
        for key in keys {
            if let Err(e) = self.stop_one(&key).await {
                error!("Failed to stop {} during shutdown: {}", key, e);
            }
        }
        self.runtime.shutdown_all().await;
        info!("All service instances stopped");
    }

    /// Readiness check for an instance's reporter artifact
    ///
    /// Only builds the probe so callers can poll without holding the lock.
    pub fn test_probe(&self, service_key: &ServiceKey) -> Result<ArtifactProbe, LifecycleError> {
        let instance = self
            .instances
            .get(service_key)
            .ok_or_else(|| LifecycleError::UnknownInstance(service_key.clone()))?;
        let has_reporter = self
            .catalog
            .get(&instance.service)
            .and_then(|d| d.reporter.as_ref())
            .is_some();
        if !has_reporter {
            return Err(LifecycleError::NoReporter(service_key.clone()));
        }
        Ok(ArtifactProbe::new(
            self.config.shared_dir.join(format!("{}.txt", service_key)),
            self.config.poll_interval,
            self.config.readiness_timeout,
        ))
    }

    /// Wait for the reporter's result and return it
    pub async fn test(&self, service_key: &ServiceKey) -> Result<String, LifecycleError> {
        let probe = self.test_probe(service_key)?;
        probe
            .wait_stable()
            .await
            .map_err(|source| LifecycleError::ReadinessTimeout {
                service_key: service_key.clone(),
                source,
            })
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn catalog(&self) -> &ServiceCatalog {
        &self.catalog
    }

    pub fn topology(&self) -> &TopologyView {
        &self.topology
    }

    pub fn scheduler(&self) -> &PlacementScheduler {
        &self.scheduler
    }

    pub fn flows(&self) -> &FlowManager {
        &self.flows
    }

    pub fn instance(&self, service_key: &ServiceKey) -> Option<&ServiceInstance> {
        self.instances.get(service_key)
    }

    /// Live instances, oldest first
    pub fn instances(&self) -> Vec<&ServiceInstance> {
        let mut all: Vec<&ServiceInstance> = self.instances.values().collect();
        all.sort_by_key(|i| i.seq);
        all
    }

    pub fn list_instances(&self) -> Vec<InstanceRow> {
        self.instances()
            .into_iter()
            .flat_map(InstanceRow::from_instance)
            .collect()
    }

    pub fn list_flows(&self) -> Vec<FlowRow> {
        self.flows
            .list()
            .into_iter()
            .map(|(key, detail)| FlowRow { key, detail })
            .collect()
    }

    pub fn capacity(&self) -> CapacityReport {
        CapacityReport {
            max_apps: self.scheduler.max_apps(),
            used_slots: self.scheduler.used_slots(),
            available_slots: self.scheduler.available_slots(),
            instances: self.instances.len(),
            flows: self.flows.index().len(),
            hosts: self.scheduler.usage(),
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Filler instances in eviction order
    fn filler_slots(&self) -> Vec<FillerSlots> {
        self.instances()
            .into_iter()
            .filter(|i| i.tier == Tier::Filler)
            .map(|i| FillerSlots {
                service_key: i.service_key.clone(),
                slots: i.components.len(),
            })
            .collect()
    }

    fn next_key(&mut self, service: &str) -> ServiceKey {
        let counter = self.counters.entry(service.to_string()).or_insert(0);
        *counter += 1;
        ServiceKey::new(service, *counter)
    }

    /// Admission, placement, launch and flow setup for one instance
    ///
    /// Every filler stopped to make room is pushed onto `evicted` as it goes.
    async fn deploy_one(
        &mut self,
        service: &str,
        evicted: &mut Vec<ServiceKey>,
    ) -> Result<ServiceKey, LifecycleError> {
        let definition = self
            .catalog
            .get(service)
            .cloned()
            .ok_or_else(|| LifecycleError::UnknownService(service.to_string()))?;
        let tier = if self.config.filler_service.as_deref() == Some(service) {
            Tier::Filler
        } else {
            Tier::UserRequested
        };

        // Evict one victim at a time, re-planning after each stop
        loop {
            let fillers = self.filler_slots();
            let plan = self
                .scheduler
                .admission_plan(definition.size(), tier, &fillers)?;
            let Some(victim) = plan.into_iter().next() else {
                break;
            };
            info!("Evicting filler {} to admit {}", victim, service);
            self.stop_one(&victim).await?;
            evicted.push(victim);
        }

        let service_key = self.next_key(service);
        let seq = self.next_seq;
        self.next_seq += 1;
        let mut instance = ServiceInstance::new(service_key.clone(), service, tier, seq);
        self.advance(&mut instance, InstanceState::Placed)?;

        let mut reserved: Vec<String> = Vec::new();
        let mut launched: Vec<Launched> = Vec::new();
        if let Err(e) = self
            .place_and_launch(&definition, &service_key, &mut reserved, &mut launched)
            .await
        {
            self.rollback(&service_key, &reserved, &launched).await;
            return Err(e);
        }

        instance.components = launched.into_iter().map(|l| l.component).collect();
        self.install_flows(&definition, &instance).await;
        self.advance(&mut instance, InstanceState::Running)?;

        info!(
            "Deployed {} ({}) on [{}]",
            service_key,
            tier,
            instance.hosts().join(", ")
        );
        self.instances.insert(service_key.clone(), instance);
        Ok(service_key)
    }

    /// Place every component, launch it, then relaunch the provisional ones
    async fn place_and_launch(
        &mut self,
        definition: &ServiceDefinition,
        service_key: &ServiceKey,
        reserved: &mut Vec<String>,
        launched: &mut Vec<Launched>,
    ) -> Result<(), LifecycleError> {
        let mut peers: BTreeMap<String, PeerAddr> = definition
            .components
            .iter()
            .map(|c| {
                let addr = PeerAddr {
                    ip: None,
                    port: c.listen_port,
                };
                (c.name.clone(), addr)
            })
            .collect();
        let mut used_hosts: HashSet<String> = HashSet::new();

        for spec in &definition.components {
            let host = self.scheduler.pick_host(&used_hosts).ok_or_else(|| {
                PlacementError::Insufficient {
                    needed: 1,
                    available: self.scheduler.available_slots(),
                    reclaimable: 0,
                }
            })?;
            self.scheduler.reserve(&host)?;
            reserved.push(host.clone());
            used_hosts.insert(host.clone());

            let ip = self.topology.host_ip(&host)?;
            if let Some(peer) = peers.get_mut(&spec.name) {
                peer.ip = Some(ip);
            }

            let resolved = resolve_env(&spec.env, &peers);
            let request = self.launch_request(service_key, spec, &host, ip, resolved.vars);
            let handle = self.runtime.launch(&request).await.map_err(|source| {
                LifecycleError::ProcessLaunch {
                    component: spec.name.clone(),
                    source,
                }
            })?;
            if resolved.provisional {
                debug!(
                    "{}: {} started with provisional peer addresses",
                    service_key, spec.name
                );
            }
            launched.push(Launched {
                component: ComponentInstance {
                    component: spec.name.clone(),
                    host,
                    ip,
                    listen_port: spec.listen_port,
                    handle,
                    provisional: resolved.provisional,
                },
                env: request.env,
            });
        }

        for i in 0..launched.len() {
            if !launched[i].component.provisional {
                continue;
            }
            let Some(spec) = definition.component(&launched[i].component.component) else {
                continue;
            };
            let resolved = resolve_env(&spec.env, &peers);
            let (host, ip) = {
                let c = &launched[i].component;
                (c.host.clone(), c.ip)
            };
            let request = self.launch_request(service_key, spec, &host, ip, resolved.vars);
            if request.env == launched[i].env {
                launched[i].component.provisional = false;
                continue;
            }

            info!(
                "{}: relaunching {} with resolved peer addresses",
                service_key, spec.name
            );
            let old = launched.remove(i);
            if let Err(e) = self
                .runtime
                .terminate(&old.component.handle, self.config.stop_grace)
                .await
            {
                warn!("{}: stopping {} failed: {}", service_key, spec.name, e);
            }
            let handle = self.runtime.launch(&request).await.map_err(|source| {
                LifecycleError::ProcessLaunch {
                    component: spec.name.clone(),
                    source,
                }
            })?;
            launched.insert(
                i,
                Launched {
                    component: ComponentInstance {
                        handle,
                        provisional: false,
                        ..old.component
                    },
                    env: request.env,
                },
            );
        }
        Ok(())
    }

    fn launch_request(
        &self,
        service_key: &ServiceKey,
        spec: &ComponentSpec,
        host: &str,
        ip: Ipv4Addr,
        vars: BTreeMap<String, String>,
    ) -> LaunchRequest {
        let mut env = vars;
        env.insert("SERVICE_KEY".to_string(), service_key.to_string());
        env.insert(
            "SHARED_DIR".to_string(),
            self.config.shared_dir.to_string_lossy().into_owned(),
        );
        if let Some(port) = spec.listen_port {
            env.insert("LISTEN_PORT".to_string(), port.to_string());
        }
        LaunchRequest {
            service_key: service_key.clone(),
            component: spec.name.clone(),
            host: host.to_string(),
            ip,
            command: expand_command(&spec.command, &self.config.scripts_dir),
            env,
        }
    }

    /// All-pairs reachability plus one rule set per declared dependency
    async fn install_flows(&mut self, definition: &ServiceDefinition, instance: &ServiceInstance) {
        let key = &instance.service_key;
        let mut pairs: BTreeSet<(String, String)> = BTreeSet::new();
        for (i, a) in instance.components.iter().enumerate() {
            for b in &instance.components[i + 1..] {
                if a.host != b.host {
                    let pair = if a.host < b.host {
                        (a.host.clone(), b.host.clone())
                    } else {
                        (b.host.clone(), a.host.clone())
                    };
                    pairs.insert(pair);
                }
            }
        }

        let mut requests: Vec<FlowRequest> = pairs
            .into_iter()
            .map(|(a, b)| FlowRequest::reachability(a, b))
            .collect();
        for dep in &definition.dependencies {
            let (Some(from), Some(to)) = (instance.component(&dep.from), instance.component(&dep.to))
            else {
                continue;
            };
            requests.push(FlowRequest::application(
                from.host.clone(),
                to.host.clone(),
                dep.protocol,
                dep.port,
            ));
        }

        for request in &requests {
            if let Err(e) = self.flows.install(key, request).await {
                warn!(
                    "{}: no rules between {} and {}: {}",
                    key, request.host_a, request.host_b, e
                );
            }
        }
    }

    /// Undo a partially deployed instance
    async fn rollback(&mut self, service_key: &ServiceKey, reserved: &[String], launched: &[Launched]) {
        warn!("{}: rolling back", service_key);
        for l in launched.iter().rev() {
            if let Err(e) = self
                .runtime
                .terminate(&l.component.handle, self.config.stop_grace)
                .await
            {
                warn!(
                    "{}: stopping {} during rollback failed: {}",
                    service_key, l.component.component, e
                );
            }
        }
        self.flows.remove(service_key, &FlowFilter::default()).await;
        for host in reserved {
            if let Err(e) = self.scheduler.release(host) {
                error!("{}: {}", service_key, e);
            }
        }
    }

    /// Tear down one instance without backfilling
    async fn stop_one(
        &mut self,
        service_key: &ServiceKey,
    ) -> Result<(usize, RemoveSummary), LifecycleError> {
        let mut instance = self
            .instances
            .remove(service_key)
            .ok_or_else(|| LifecycleError::UnknownInstance(service_key.clone()))?;
        self.advance(&mut instance, InstanceState::Stopping)?;

        for component in instance.components.iter().rev() {
            if let Err(e) = self
                .runtime
                .terminate(&component.handle, self.config.stop_grace)
                .await
            {
                warn!(
                    "{}: stopping {} failed: {}",
                    service_key, component.component, e
                );
            }
        }

        let removed = self.flows.remove(service_key, &FlowFilter::default()).await;
        for component in &instance.components {
            if let Err(e) = self.scheduler.release(&component.host) {
                error!("{}: {}", service_key, e);
            }
        }
        self.advance(&mut instance, InstanceState::Terminated)?;

        info!(
            "Stopped {}: freed {} slot(s), removed {} rule(s)",
            service_key,
            instance.components.len(),
            removed.removed
        );
        Ok((instance.components.len(), removed))
    }

    fn advance(
        &self,
        instance: &mut ServiceInstance,
        next: InstanceState,
    ) -> Result<(), LifecycleError> {
        instance
            .transition(next)
            .map(|_| ())
            .map_err(|from| LifecycleError::InvalidTransition {
                service_key: instance.service_key.clone(),
                from,
                to: next,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::DryRunControlPlane;
    use crate::runtime::SimulatedRuntime;
    use crate::topology::{build_topology, TopologyKind};

    fn controller(filler: Option<&str>) -> (ServiceController, Arc<SimulatedRuntime>) {
        let topology = Arc::new(TopologyView::from_spec(&build_topology(TopologyKind::Simple)).unwrap());
        let runtime = Arc::new(SimulatedRuntime::new());
        let config = ControllerConfig {
            filler_service: filler.map(str::to_string),
            seed: Some(11),
            stop_grace: Duration::ZERO,
            ..ControllerConfig::default()
        };
        let controller = ServiceController::new(
            config,
            ServiceCatalog::builtin(),
            topology,
            runtime.clone(),
            Arc::new(DryRunControlPlane::new()),
        );
        (controller, runtime)
    }

    #[tokio::test]
    async fn test_keys_are_per_service_and_monotonic() {
        let (mut ctl, _) = controller(None);
        let a = ctl.deploy("web").await.unwrap().service_key;
        let b = ctl.deploy("random").await.unwrap().service_key;
        ctl.stop(&a).await.unwrap();
        let c = ctl.deploy("web").await.unwrap().service_key;
        assert_eq!(a.to_string(), "web-1");
        assert_eq!(b.to_string(), "random-1");
        assert_eq!(c.to_string(), "web-2");
    }

    #[tokio::test]
    async fn test_deploy_sets_env_and_relaunches_provisional() {
        let (mut ctl, runtime) = controller(None);
        let key = ctl.deploy("colab").await.unwrap().service_key;

        // colab_a, colab_b, then colab_a again with colab_b's address
        let launches = runtime.launches();
        assert_eq!(launches.len(), 3);
        assert_eq!(launches[0].env["COLAB_B_IP"], "0.0.0.0");
        let b_ip = launches[1].ip.to_string();
        assert_eq!(launches[2].component, "colab_a");
        assert_eq!(launches[2].env["COLAB_B_IP"], b_ip);
        assert_eq!(launches[1].env["LISTEN_PORT"], "5004");
        assert_eq!(launches[2].env["SERVICE_KEY"], key.to_string());
        assert_eq!(runtime.terminations(), vec![format!("{}-colab_a", key)]);

        let instance = ctl.instance(&key).unwrap();
        assert_eq!(instance.state, InstanceState::Running);
        assert!(instance.components.iter().all(|c| !c.provisional));
        assert_eq!(runtime.live_count(), 2);
    }

    #[tokio::test]
    async fn test_no_relaunch_when_peers_placed_first() {
        let (mut ctl, runtime) = controller(None);
        ctl.deploy("random").await.unwrap();
        assert_eq!(runtime.launches().len(), 3);
        assert!(runtime.terminations().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_service() {
        let (mut ctl, _) = controller(None);
        assert!(matches!(
            ctl.deploy("mail").await,
            Err(LifecycleError::UnknownService(_))
        ));
    }

    #[tokio::test]
    async fn test_launch_failure_rolls_back() {
        let (mut ctl, runtime) = controller(None);
        runtime.fail_component("random_sum");

        let err = ctl.deploy("random").await.unwrap_err();
        assert!(matches!(err, LifecycleError::ProcessLaunch { ref component, .. } if component == "random_sum"));
        assert_eq!(runtime.live_count(), 0);
        assert_eq!(ctl.capacity().used_slots, 0);
        assert!(ctl.flows().index().is_empty());
        assert!(ctl.list_instances().is_empty());
    }

    #[tokio::test]
    async fn test_relaunch_failure_rolls_back() {
        let (mut ctl, runtime) = controller(None);
        // the first colab_a start succeeds, the relaunch does not
        runtime.fail_component_after("colab_a", 1);

        let err = ctl.deploy("colab").await.unwrap_err();
        assert!(matches!(err, LifecycleError::ProcessLaunch { ref component, .. } if component == "colab_a"));
        assert_eq!(runtime.live_count(), 0);
        assert_eq!(ctl.capacity().used_slots, 0);
        assert!(ctl.flows().index().is_empty());
    }

    #[tokio::test]
    async fn test_stop_frees_slots_and_flows() {
        let (mut ctl, _) = controller(None);
        let key = ctl.deploy("datetime").await.unwrap().service_key;
        assert_eq!(ctl.capacity().used_slots, 3);
        let flows_before = ctl.flows().records_for(&key).len();

        let outcome = ctl.stop(&key).await.unwrap();
        assert_eq!(outcome.freed_slots, 3);
        assert_eq!(outcome.removed_flows, flows_before);
        assert_eq!(ctl.capacity().used_slots, 0);
        assert!(ctl.flows().records_for(&key).is_empty());
        assert!(matches!(
            ctl.stop(&key).await,
            Err(LifecycleError::UnknownInstance(_))
        ));
    }

    #[tokio::test]
    async fn test_flows_have_mirrors() {
        let (mut ctl, _) = controller(None);
        ctl.deploy("datetime").await.unwrap();
        ctl.deploy("web").await.unwrap();
        assert!(ctl.flows().missing_mirrors().is_empty());
    }

    #[tokio::test]
    async fn test_bootstrap_fills_every_slot() {
        let (mut ctl, _) = controller(Some("colab"));
        let deployed = ctl.bootstrap().await;
        // 6 hosts x 2 slots, 2 components per colab instance
        assert_eq!(deployed.len(), 6);
        assert_eq!(ctl.capacity().available_slots, 0);
        assert!(ctl
            .list_instances()
            .iter()
            .all(|row| row.tier == Tier::Filler));
    }

    #[tokio::test]
    async fn test_user_deploy_evicts_fillers() {
        let (mut ctl, _) = controller(Some("colab"));
        ctl.bootstrap().await;

        let outcome = ctl.deploy("random").await.unwrap();
        // 3 slots needed: two filler instances go, the odd slot is refilled
        // only if a whole filler fits, which it does not
        assert_eq!(
            outcome.evicted,
            vec![ServiceKey::new("colab", 1), ServiceKey::new("colab", 2)]
        );
        assert!(outcome.backfilled.is_empty());
        assert_eq!(ctl.capacity().available_slots, 1);
    }

    #[tokio::test]
    async fn test_test_probe_requires_reporter() {
        let (mut ctl, _) = controller(None);
        let web = ctl.deploy("web").await.unwrap().service_key;
        assert!(matches!(
            ctl.test_probe(&web),
            Err(LifecycleError::NoReporter(_))
        ));
        let random = ctl.deploy("random").await.unwrap().service_key;
        let probe = ctl.test_probe(&random).unwrap();
        assert!(probe.path.ends_with("random-1.txt"));
    }

    #[tokio::test]
    async fn test_shutdown_stops_everything_without_backfill() {
        let (mut ctl, runtime) = controller(Some("colab"));
        ctl.bootstrap().await;
        ctl.shutdown().await;
        assert!(ctl.list_instances().is_empty());
        assert_eq!(runtime.live_count(), 0);
        assert_eq!(ctl.capacity().used_slots, 0);
    }
}
