//! Read-only view of the emulated network
//!
//! The topology is described once (from a file or one of the built-in
//! generators) and never mutated afterwards. The flow manager asks it which
//! switch a host hangs off and which local port leads from one node to
//! another; the path resolver walks its switch-only subgraph.

pub mod builder;
pub mod path;

use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use builder::{build_topology, TopologyKind};
pub use path::PathResolver;

/// Errors raised while building or querying the topology
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Host '{0}' is not attached to any switch")]
    NotAttached(String),

    #[error("Host '{0}' is attached to more than one switch")]
    MultiplyAttached(String),

    #[error("No link between '{0}' and '{1}'")]
    PortNotFound(String, String),

    #[error("No path between switches '{from}' and '{to}'")]
    PathNotFound { from: String, to: String },

    #[error("Invalid link: {0}")]
    InvalidLink(String),

    #[error("Failed to load topology: {0}")]
    LoadError(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Switch,
    Host,
}

/// A node declaration in a topology description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub name: String,
    pub kind: NodeKind,
    /// Datapath id (switches only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dpid: Option<u64>,
    /// IPv4 address (hosts only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<Ipv4Addr>,
}

impl NodeSpec {
    pub fn switch(name: impl Into<String>, dpid: u64) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Switch,
            dpid: Some(dpid),
            ip: None,
        }
    }

    pub fn host(name: impl Into<String>, ip: Ipv4Addr) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Host,
            dpid: None,
            ip: Some(ip),
        }
    }
}

/// A link declaration: each endpoint carries its local port number
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkSpec {
    pub a: String,
    pub a_port: u32,
    pub b: String,
    pub b_port: u32,
}

/// Serializable description of the whole network
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopologySpec {
    pub nodes: Vec<NodeSpec>,
    pub links: Vec<LinkSpec>,
}

impl TopologySpec {
    /// Parse a JSON topology description
    pub fn from_json(content: &str) -> Result<Self, TopologyError> {
        serde_json::from_str(content).map_err(|e| TopologyError::LoadError(e.to_string()))
    }

    /// Read a JSON topology description from disk
    pub fn load(path: &Path) -> Result<Self, TopologyError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TopologyError::LoadError(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&content)
    }
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    dpid: u64,
    ip: Option<Ipv4Addr>,
}

/// One end of a link as seen from a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adjacency {
    pub peer: String,
    pub local_port: u32,
}

/// Immutable adjacency of switches and hosts
#[derive(Debug, Clone)]
pub struct TopologyView {
    nodes: BTreeMap<String, Node>,
    adjacency: HashMap<String, Vec<Adjacency>>,
}

impl TopologyView {
    /// Build and validate a view from its description
    pub fn from_spec(spec: &TopologySpec) -> Result<Self, TopologyError> {
        let mut nodes = BTreeMap::new();
        let mut switch_index = 0u64;
        let mut host_index = 0u32;

        for node in &spec.nodes {
            if nodes.contains_key(&node.name) {
                return Err(TopologyError::LoadError(format!(
                    "duplicate node '{}'",
                    node.name
                )));
            }
            let entry = match node.kind {
                NodeKind::Switch => {
                    switch_index += 1;
                    Node {
                        kind: NodeKind::Switch,
                        dpid: node.dpid.unwrap_or(switch_index),
                        ip: None,
                    }
                }
                NodeKind::Host => {
                    host_index += 1;
                    Node {
                        kind: NodeKind::Host,
                        dpid: 0,
                        ip: Some(node.ip.unwrap_or_else(|| default_host_ip(host_index))),
                    }
                }
            };
            nodes.insert(node.name.clone(), entry);
        }

        let mut adjacency: HashMap<String, Vec<Adjacency>> = HashMap::new();
        for link in &spec.links {
            if link.a == link.b {
                return Err(TopologyError::InvalidLink(format!(
                    "self-loop on '{}'",
                    link.a
                )));
            }
            for name in [&link.a, &link.b] {
                if !nodes.contains_key(name) {
                    return Err(TopologyError::UnknownNode(name.clone()));
                }
            }
            for (node, port, peer) in [
                (&link.a, link.a_port, &link.b),
                (&link.b, link.b_port, &link.a),
            ] {
                let ports = adjacency.entry(node.clone()).or_default();
                if ports.iter().any(|adj| adj.local_port == port) {
                    return Err(TopologyError::InvalidLink(format!(
                        "port {} on '{}' used twice",
                        port, node
                    )));
                }
                ports.push(Adjacency {
                    peer: peer.clone(),
                    local_port: port,
                });
            }
        }

        Ok(Self { nodes, adjacency })
    }

    /// Switch the given host is attached to
    ///
    /// A host must hang off exactly one switch.
    pub fn switch_for(&self, host: &str) -> Result<&str, TopologyError> {
        self.expect_kind(host, NodeKind::Host)?;
        let mut switches = self
            .neighbors(host)
            .iter()
            .filter(|adj| self.is_switch(&adj.peer))
            .map(|adj| adj.peer.as_str());
        match (switches.next(), switches.next()) {
            (Some(switch), None) => Ok(switch),
            (None, _) => Err(TopologyError::NotAttached(host.to_string())),
            (Some(_), Some(_)) => Err(TopologyError::MultiplyAttached(host.to_string())),
        }
    }

    /// Local port on `a` whose link reaches `b`
    pub fn port_between(&self, a: &str, b: &str) -> Result<u32, TopologyError> {
        if !self.nodes.contains_key(a) {
            return Err(TopologyError::UnknownNode(a.to_string()));
        }
        self.neighbors(a)
            .iter()
            .find(|adj| adj.peer == b)
            .map(|adj| adj.local_port)
            .ok_or_else(|| TopologyError::PortNotFound(a.to_string(), b.to_string()))
    }

    pub fn dpid(&self, switch: &str) -> Result<u64, TopologyError> {
        self.expect_kind(switch, NodeKind::Switch)
            .map(|node| node.dpid)
    }

    pub fn host_ip(&self, host: &str) -> Result<Ipv4Addr, TopologyError> {
        let node = self.expect_kind(host, NodeKind::Host)?;
        node.ip
            .ok_or_else(|| TopologyError::UnknownNode(host.to_string()))
    }

    /// Host names in sorted order
    pub fn hosts(&self) -> Vec<String> {
        self.names_of(NodeKind::Host)
    }

    /// Switch names in sorted order
    pub fn switches(&self) -> Vec<String> {
        self.names_of(NodeKind::Switch)
    }

    pub fn is_switch(&self, name: &str) -> bool {
        self.nodes
            .get(name)
            .is_some_and(|n| n.kind == NodeKind::Switch)
    }

    /// All links of a node, in declaration order
    pub fn neighbors(&self, name: &str) -> &[Adjacency] {
        self.adjacency
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn names_of(&self, kind: NodeKind) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.kind == kind)
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn expect_kind(&self, name: &str, kind: NodeKind) -> Result<&Node, TopologyError> {
        self.nodes
            .get(name)
            .filter(|n| n.kind == kind)
            .ok_or_else(|| TopologyError::UnknownNode(name.to_string()))
    }
}

/// Address handed to the i-th host (1-based) when none is declared
pub fn default_host_ip(index: u32) -> Ipv4Addr {
    let [_, b, c, d] = index.to_be_bytes();
    Ipv4Addr::new(10, b, c, d)
}
