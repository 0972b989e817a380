//! Built-in topology generators
//!
//! Ports are numbered per node from 1 in the order links are created, and
//! host `hN` gets address `10.0.0.N`.

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{default_host_ip, LinkSpec, NodeSpec, TopologySpec};

/// Named topology shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TopologyKind {
    /// Switches in a ring, hosts attached round-robin (6 hosts, 4 switches)
    Simple,
    /// Spine-leaf fabric (8 hosts, 6 switches)
    Complex,
}

impl FromStr for TopologyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "simple" => Ok(Self::Simple),
            "complex" => Ok(Self::Complex),
            other => Err(format!("Unknown topology type: {}", other)),
        }
    }
}

/// Build the default-sized topology for a kind
pub fn build_topology(kind: TopologyKind) -> TopologySpec {
    match kind {
        TopologyKind::Simple => ring(6, 4),
        TopologyKind::Complex => spine_leaf(8, 6),
    }
}

/// Hosts round-robin over a ring of switches
pub fn ring(num_hosts: usize, num_switches: usize) -> TopologySpec {
    let num_switches = num_switches.max(1);
    let mut builder = SpecBuilder::default();

    let switches: Vec<String> = (1..=num_switches)
        .map(|i| builder.switch(format!("s{}", i)))
        .collect();
    let hosts: Vec<String> = (1..=num_hosts)
        .map(|i| builder.host(format!("h{}", i)))
        .collect();

    for (i, host) in hosts.iter().enumerate() {
        builder.link(host, &switches[i % num_switches]);
    }

    if num_switches > 1 {
        for i in 0..num_switches {
            let next = (i + 1) % num_switches;
            // two switches would otherwise get a second parallel link
            if num_switches == 2 && i == 1 {
                break;
            }
            builder.link(&switches[i], &switches[next]);
        }
    }

    builder.finish()
}

/// Spine-leaf fabric: every leaf links to every spine
pub fn spine_leaf(num_hosts: usize, num_switches: usize) -> TopologySpec {
    let num_switches = num_switches.max(2);
    let num_spine = (num_switches / 2).max(1);
    let num_leaf = (num_switches - num_spine).max(1);
    let mut builder = SpecBuilder::default();

    let spines: Vec<String> = (1..=num_spine)
        .map(|i| builder.switch(format!("s_spine{}", i)))
        .collect();
    let leaves: Vec<String> = (1..=num_leaf)
        .map(|i| builder.switch(format!("s_leaf{}", i)))
        .collect();
    let hosts: Vec<String> = (1..=num_hosts)
        .map(|i| builder.host(format!("h{}", i)))
        .collect();

    for (i, host) in hosts.iter().enumerate() {
        builder.link(host, &leaves[i % num_leaf]);
    }
    for leaf in &leaves {
        for spine in &spines {
            builder.link(leaf, spine);
        }
    }

    builder.finish()
}

#[derive(Default)]
struct SpecBuilder {
    spec: TopologySpec,
    next_port: HashMap<String, u32>,
    switch_count: u64,
    host_count: u32,
}

impl SpecBuilder {
    fn switch(&mut self, name: String) -> String {
        self.switch_count += 1;
        self.spec
            .nodes
            .push(NodeSpec::switch(name.clone(), self.switch_count));
        name
    }

    fn host(&mut self, name: String) -> String {
        self.host_count += 1;
        self.spec
            .nodes
            .push(NodeSpec::host(name.clone(), default_host_ip(self.host_count)));
        name
    }

    fn link(&mut self, a: &str, b: &str) {
        let a_port = self.allocate_port(a);
        let b_port = self.allocate_port(b);
        self.spec.links.push(LinkSpec {
            a: a.to_string(),
            a_port,
            b: b.to_string(),
            b_port,
        });
    }

    fn allocate_port(&mut self, node: &str) -> u32 {
        let port = self.next_port.entry(node.to_string()).or_insert(1);
        let allocated = *port;
        *port += 1;
        allocated
    }

    fn finish(self) -> TopologySpec {
        self.spec
    }
}
