//! Flow lifecycle management
//!
//! Turns "host A must reach host B" into bidirectional forwarding rules on
//! every switch along the path, pushes them to the control plane and keeps
//! an index of what was installed so a service's rules can be torn down as
//! a unit.
//!
//! Push failures never abort the caller: the local index always reflects the
//! rules this process asked for, and `FlowDetail::pushed` records whether the
//! control plane accepted the add.

pub mod control_plane;
pub mod record;

use std::net::Ipv4Addr;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::lifecycle::ServiceKey;
use crate::topology::{PathResolver, TopologyError, TopologyView};

pub use control_plane::{
    ControlPlane, DryRunControlPlane, FlowEntry, FlowMatch, FlowOp, FlowPushError, RyuRestClient,
};
pub use record::{
    mirror, FlowAction, FlowDetail, FlowFilter, FlowIndex, FlowKey, Protocol, DIRECT_PRIORITY,
    PATH_PRIORITY,
};

/// A pairwise communication requirement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowRequest {
    pub host_a: String,
    pub host_b: String,
    pub protocol: Protocol,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
}

impl FlowRequest {
    /// Any-IPv4 reachability between two hosts
    pub fn reachability(host_a: impl Into<String>, host_b: impl Into<String>) -> Self {
        Self {
            host_a: host_a.into(),
            host_b: host_b.into(),
            protocol: Protocol::Ip,
            src_port: None,
            dst_port: None,
        }
    }

    /// Application traffic from `host_a` to a listening port on `host_b`
    pub fn application(
        host_a: impl Into<String>,
        host_b: impl Into<String>,
        protocol: Protocol,
        dst_port: u16,
    ) -> Self {
        Self {
            host_a: host_a.into(),
            host_b: host_b.into(),
            protocol,
            src_port: None,
            dst_port: Some(dst_port),
        }
    }
}

/// Outcome of an install call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstallSummary {
    /// Records added to the index (forward and reverse)
    pub records: usize,
    /// Records the control plane did not accept
    pub push_failures: usize,
}

/// Outcome of a remove call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemoveSummary {
    pub removed: usize,
    pub delete_failures: usize,
}

/// One switch traversal: where traffic enters and where it leaves
#[derive(Debug, Clone, PartialEq, Eq)]
struct Hop {
    switch: String,
    dpid: u64,
    in_port: u32,
    out_port: u32,
}

/// Owns the flow index and programs the control plane
pub struct FlowManager {
    topology: Arc<TopologyView>,
    paths: PathResolver,
    control_plane: Arc<dyn ControlPlane>,
    index: FlowIndex,
}

impl FlowManager {
    pub fn new(topology: Arc<TopologyView>, control_plane: Arc<dyn ControlPlane>) -> Self {
        let paths = PathResolver::new(&topology);
        Self {
            topology,
            paths,
            control_plane,
            index: FlowIndex::new(),
        }
    }

    /// Install forward and reverse rules for one communication requirement
    ///
    /// Topology errors (including `PathNotFound`) abort this requirement
    /// before anything is pushed. Push failures are logged and counted.
    pub async fn install(
        &mut self,
        service_key: &ServiceKey,
        request: &FlowRequest,
    ) -> Result<InstallSummary, TopologyError> {
        if request.host_a == request.host_b {
            debug!(
                "{}: {} talks to itself, no switch rules needed",
                service_key, request.host_a
            );
            return Ok(InstallSummary::default());
        }

        let src_ip = self.topology.host_ip(&request.host_a)?;
        let dst_ip = self.topology.host_ip(&request.host_b)?;
        let hops = self.hops(&request.host_a, &request.host_b)?;
        let priority = if hops.len() == 1 {
            DIRECT_PRIORITY
        } else {
            PATH_PRIORITY
        };

        let mut summary = InstallSummary::default();
        for hop in &hops {
            let key = FlowKey {
                service_key: service_key.clone(),
                src_ip,
                dst_ip,
                src_port: request.src_port,
                dst_port: request.dst_port,
                protocol: request.protocol,
                dpid: hop.dpid,
                in_port: hop.in_port,
            };
            let detail = FlowDetail::new(&hop.switch, hop.out_port, priority);
            let (reverse_key, reverse_detail) = mirror(&key, &detail);

            for (key, detail) in [(key, detail), (reverse_key, reverse_detail)] {
                if !self.add_record(key, detail).await {
                    summary.push_failures += 1;
                }
                summary.records += 1;
            }
        }

        info!(
            "{}: installed {} rules between {} and {} ({} {} hop(s))",
            service_key,
            summary.records,
            src_ip,
            dst_ip,
            request.protocol,
            hops.len()
        );
        Ok(summary)
    }

    /// Delete every rule of `service_key` matching `filter`
    ///
    /// Records leave the index whether or not the control plane confirmed
    /// the delete.
    pub async fn remove(&mut self, service_key: &ServiceKey, filter: &FlowFilter) -> RemoveSummary {
        let mut summary = RemoveSummary::default();

        for key in self.index.select(service_key, filter) {
            let Some(detail) = self.index.remove(&key) else {
                continue;
            };
            let entry = FlowEntry::from_record(FlowOp::Delete, &key, &detail);
            if let Err(e) = self.control_plane.push(FlowOp::Delete, &entry).await {
                warn!(
                    "{}: failed to delete rule {} -> {} on {}: {}",
                    service_key, key.src_ip, key.dst_ip, detail.switch, e
                );
                summary.delete_failures += 1;
            }
            summary.removed += 1;
        }

        if summary.removed > 0 {
            info!("{}: removed {} rules", service_key, summary.removed);
        }
        summary
    }

    pub fn index(&self) -> &FlowIndex {
        &self.index
    }

    /// Snapshot of every tracked rule
    pub fn list(&self) -> Vec<(FlowKey, FlowDetail)> {
        self.index
            .iter()
            .map(|(k, d)| (k.clone(), d.clone()))
            .collect()
    }

    pub fn records_for(&self, service_key: &ServiceKey) -> Vec<FlowKey> {
        self.index.select(service_key, &FlowFilter::default())
    }

    /// Rules between two addresses, in either direction
    pub fn records_between(&self, service_key: &ServiceKey, a: Ipv4Addr, b: Ipv4Addr) -> usize {
        self.index.select(service_key, &FlowFilter::between(a, b)).len()
            + self.index.select(service_key, &FlowFilter::between(b, a)).len()
    }

    pub fn missing_mirrors(&self) -> Vec<FlowKey> {
        self.index.missing_mirrors()
    }

    async fn add_record(&mut self, key: FlowKey, mut detail: FlowDetail) -> bool {
        let entry = FlowEntry::from_record(FlowOp::Add, &key, &detail);
        match self.control_plane.push(FlowOp::Add, &entry).await {
            Ok(()) => detail.pushed = true,
            Err(e) => warn!(
                "{}: failed to add rule {} -> {} on {}: {}",
                key.service_key, key.src_ip, key.dst_ip, detail.switch, e
            ),
        }
        let pushed = detail.pushed;
        self.index.insert(key, detail);
        pushed
    }

    /// Per-switch ingress/egress ports from `host_a` towards `host_b`
    fn hops(&self, host_a: &str, host_b: &str) -> Result<Vec<Hop>, TopologyError> {
        let sw_a = self.topology.switch_for(host_a)?;
        let sw_b = self.topology.switch_for(host_b)?;
        let first_in = self.topology.port_between(sw_a, host_a)?;
        let last_out = self.topology.port_between(sw_b, host_b)?;

        let path = self.paths.shortest_path(sw_a, sw_b)?;
        let mut hops = Vec::with_capacity(path.len());
        for (i, switch) in path.iter().enumerate() {
            let in_port = match i {
                0 => first_in,
                _ => self.topology.port_between(switch, &path[i - 1])?,
            };
            let out_port = if i + 1 == path.len() {
                last_out
            } else {
                self.topology.port_between(switch, &path[i + 1])?
            };
            hops.push(Hop {
                switch: switch.clone(),
                dpid: self.topology.dpid(switch)?,
                in_port,
                out_port,
            });
        }
        Ok(hops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{build_topology, TopologyKind, TopologySpec};

    fn manager(spec: &TopologySpec) -> (FlowManager, Arc<DryRunControlPlane>) {
        let topology = Arc::new(TopologyView::from_spec(spec).unwrap());
        let plane = Arc::new(DryRunControlPlane::new());
        (FlowManager::new(topology, plane.clone()), plane)
    }

    fn simple() -> (FlowManager, Arc<DryRunControlPlane>) {
        manager(&build_topology(TopologyKind::Simple))
    }

    #[tokio::test]
    async fn test_same_switch_direct_pair() {
        let (mut flows, plane) = simple();
        let key = ServiceKey::new("web", 1);
        // h1 and h5 both hang off s1
        let summary = flows
            .install(&key, &FlowRequest::reachability("h1", "h5"))
            .await
            .unwrap();

        assert_eq!(summary, InstallSummary { records: 2, push_failures: 0 });
        assert_eq!(plane.count(FlowOp::Add), 2);
        for (k, d) in flows.list() {
            assert_eq!(d.priority, DIRECT_PRIORITY);
            assert_eq!(k.dpid, 1);
            assert!(d.pushed);
        }
        assert!(flows.missing_mirrors().is_empty());
    }

    #[tokio::test]
    async fn test_multi_hop_pairs_per_switch() {
        let (mut flows, _) = simple();
        let key = ServiceKey::new("random", 1);
        // h1 on s1, h3 on s3: s1 -> s2 -> s3
        let summary = flows
            .install(&key, &FlowRequest::application("h1", "h3", Protocol::Tcp, 5000))
            .await
            .unwrap();
        assert_eq!(summary.records, 6);

        let h1 = Ipv4Addr::new(10, 0, 0, 1);
        let h3 = Ipv4Addr::new(10, 0, 0, 3);
        let forward: Vec<_> = flows
            .list()
            .into_iter()
            .filter(|(k, _)| k.src_ip == h1 && k.dst_ip == h3)
            .collect();
        assert_eq!(forward.len(), 3);
        for (k, d) in &forward {
            assert_eq!(d.priority, PATH_PRIORITY);
            assert_eq!(k.dst_port, Some(5000));
        }

        // ingress: from h1's port towards s2; egress: towards h3's port
        let ingress = forward.iter().find(|(k, _)| k.dpid == 1).unwrap();
        assert_eq!(ingress.0.in_port, 1);
        assert_eq!(ingress.1.out_port, 3);
        let egress = forward.iter().find(|(k, _)| k.dpid == 3).unwrap();
        assert_eq!(egress.1.out_port, 1);

        // transit: enters from s1, leaves towards s3
        let transit = forward.iter().find(|(k, _)| k.dpid == 2).unwrap();
        assert_eq!(transit.0.in_port, flows.topology.port_between("s2", "s1").unwrap());
        assert_eq!(transit.1.out_port, flows.topology.port_between("s2", "s3").unwrap());
        assert_eq!(egress.0.in_port, flows.topology.port_between("s3", "s2").unwrap());

        // replies match on the service's source port
        let reverse = flows
            .list()
            .into_iter()
            .find(|(k, _)| k.src_ip == h3 && k.dpid == 3)
            .unwrap();
        assert_eq!(reverse.0.src_port, Some(5000));
        assert_eq!(reverse.0.dst_port, None);
        assert!(flows.missing_mirrors().is_empty());
    }

    #[tokio::test]
    async fn test_two_ports_between_one_host_pair() {
        let (mut flows, plane) = simple();
        let key = ServiceKey::new("datetime", 1);
        for port in [5002, 5003] {
            let summary = flows
                .install(&key, &FlowRequest::application("h1", "h3", Protocol::Tcp, port))
                .await
                .unwrap();
            assert_eq!(summary.records, 6);
        }
        assert_eq!(flows.index().len(), 12);
        assert!(flows.missing_mirrors().is_empty());

        let summary = flows.remove(&key, &FlowFilter::default()).await;
        assert_eq!(summary.removed, 12);
        assert_eq!(plane.count(FlowOp::Add), plane.count(FlowOp::Delete));
        assert!(flows.index().is_empty());
    }

    #[tokio::test]
    async fn test_push_failure_is_recorded_not_fatal() {
        let (mut flows, plane) = simple();
        plane.fail_switch(2);
        let key = ServiceKey::new("web", 2);
        let summary = flows
            .install(&key, &FlowRequest::reachability("h1", "h3"))
            .await
            .unwrap();

        assert_eq!(summary.records, 6);
        assert_eq!(summary.push_failures, 2);
        assert_eq!(flows.records_for(&key).len(), 6);
        let unpushed = flows.list().into_iter().filter(|(_, d)| !d.pushed).count();
        assert_eq!(unpushed, 2);
    }

    #[tokio::test]
    async fn test_remove_is_unconditional() {
        let (mut flows, plane) = simple();
        let key = ServiceKey::new("web", 3);
        flows
            .install(&key, &FlowRequest::reachability("h1", "h2"))
            .await
            .unwrap();
        let installed = flows.records_for(&key).len();

        plane.fail_switch(1);
        let summary = flows.remove(&key, &FlowFilter::default()).await;
        assert_eq!(summary.removed, installed);
        assert_eq!(summary.delete_failures, 2);
        assert!(flows.index().is_empty());
    }

    #[tokio::test]
    async fn test_remove_with_filter() {
        let (mut flows, _) = simple();
        let key = ServiceKey::new("datetime", 1);
        flows
            .install(&key, &FlowRequest::reachability("h1", "h5"))
            .await
            .unwrap();
        flows
            .install(&key, &FlowRequest::application("h1", "h5", Protocol::Tcp, 5002))
            .await
            .unwrap();
        assert_eq!(flows.index().len(), 4);

        let h1 = Ipv4Addr::new(10, 0, 0, 1);
        let h5 = Ipv4Addr::new(10, 0, 0, 5);
        let filter = FlowFilter::between(h1, h5)
            .with_protocol(Protocol::Tcp)
            .with_dst_port(5002);
        let summary = flows.remove(&key, &filter).await;
        assert_eq!(summary.removed, 1);
        assert_eq!(flows.index().len(), 3);
    }

    #[tokio::test]
    async fn test_disconnected_switches_abort_pair() {
        let mut spec = build_topology(TopologyKind::Simple);
        // drop every switch-switch link
        spec.links.retain(|l| l.a.starts_with('h') || l.b.starts_with('h'));
        let (mut flows, plane) = manager(&spec);

        let result = flows
            .install(&ServiceKey::new("web", 1), &FlowRequest::reachability("h1", "h2"))
            .await;
        assert!(matches!(result, Err(TopologyError::PathNotFound { .. })));
        assert!(flows.index().is_empty());
        assert_eq!(plane.count(FlowOp::Add), 0);
    }

    #[tokio::test]
    async fn test_same_host_needs_no_rules() {
        let (mut flows, plane) = simple();
        let summary = flows
            .install(&ServiceKey::new("web", 1), &FlowRequest::reachability("h2", "h2"))
            .await
            .unwrap();
        assert_eq!(summary.records, 0);
        assert!(plane.pushes().is_empty());
    }
}
