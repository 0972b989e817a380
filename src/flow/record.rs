//! Flow keys, details and the in-memory index of installed rules

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::lifecycle::ServiceKey;

/// Rule priority when both hosts hang off the same switch
pub const DIRECT_PRIORITY: u16 = 200;

/// Rule priority for each hop of a multi-switch path
pub const PATH_PRIORITY: u16 = 100;

/// IP protocol matched by a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Any IPv4 traffic (no `ip_proto` match)
    Ip,
    Icmp,
    Tcp,
    Udp,
}

impl Protocol {
    /// Value for the `ip_proto` match field, if any
    pub fn ip_proto(&self) -> Option<u8> {
        match self {
            Protocol::Ip => None,
            Protocol::Icmp => Some(1),
            Protocol::Tcp => Some(6),
            Protocol::Udp => Some(17),
        }
    }

    /// Whether src/dst ports can be matched for this protocol
    pub fn has_ports(&self) -> bool {
        matches!(self, Protocol::Tcp | Protocol::Udp)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Protocol::Ip => "ip",
            Protocol::Icmp => "icmp",
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        };
        f.write_str(name)
    }
}

/// Switch action of a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum FlowAction {
    Output { port: u32 },
}

/// Identity of one installed rule
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowKey {
    pub service_key: ServiceKey,
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    /// Matched L4 source port; set on the reply side of an application rule
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
    pub protocol: Protocol,
    pub dpid: u64,
    pub in_port: u32,
}

/// What the rule does once matched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowDetail {
    pub switch: String,
    pub out_port: u32,
    pub priority: u16,
    pub action: FlowAction,
    /// Whether the control plane acknowledged the add
    pub pushed: bool,
}

impl FlowDetail {
    pub fn new(switch: impl Into<String>, out_port: u32, priority: u16) -> Self {
        Self {
            switch: switch.into(),
            out_port,
            priority,
            action: FlowAction::Output { port: out_port },
            pushed: false,
        }
    }
}

/// Compute the reverse-direction record of a rule
///
/// Addresses, L4 ports and switch ports are all swapped.
pub fn mirror(key: &FlowKey, detail: &FlowDetail) -> (FlowKey, FlowDetail) {
    let reverse_key = FlowKey {
        service_key: key.service_key.clone(),
        src_ip: key.dst_ip,
        dst_ip: key.src_ip,
        src_port: key.dst_port,
        dst_port: key.src_port,
        protocol: key.protocol,
        dpid: key.dpid,
        in_port: detail.out_port,
    };
    let reverse = FlowDetail::new(detail.switch.clone(), key.in_port, detail.priority);
    (reverse_key, reverse)
}

/// Optional filters applied on top of the service key when removing rules
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowFilter {
    pub src_ip: Option<Ipv4Addr>,
    pub dst_ip: Option<Ipv4Addr>,
    pub protocol: Option<Protocol>,
    pub dst_port: Option<u16>,
}

impl FlowFilter {
    pub fn between(src_ip: Ipv4Addr, dst_ip: Ipv4Addr) -> Self {
        Self {
            src_ip: Some(src_ip),
            dst_ip: Some(dst_ip),
            ..Self::default()
        }
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    pub fn with_dst_port(mut self, port: u16) -> Self {
        self.dst_port = Some(port);
        self
    }

    pub fn matches(&self, key: &FlowKey) -> bool {
        self.src_ip.map_or(true, |ip| key.src_ip == ip)
            && self.dst_ip.map_or(true, |ip| key.dst_ip == ip)
            && self.protocol.map_or(true, |p| key.protocol == p)
            && self.dst_port.map_or(true, |port| key.dst_port == Some(port))
    }
}

/// Ordered index of every rule this process believes is installed
#[derive(Debug, Default, Clone)]
pub struct FlowIndex {
    records: BTreeMap<FlowKey, FlowDetail>,
}

impl FlowIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: FlowKey, detail: FlowDetail) {
        self.records.insert(key, detail);
    }

    pub fn remove(&mut self, key: &FlowKey) -> Option<FlowDetail> {
        self.records.remove(key)
    }

    pub fn get(&self, key: &FlowKey) -> Option<&FlowDetail> {
        self.records.get(key)
    }

    /// Keys owned by `service_key` that pass `filter`
    pub fn select(&self, service_key: &ServiceKey, filter: &FlowFilter) -> Vec<FlowKey> {
        self.records
            .keys()
            .filter(|k| &k.service_key == service_key && filter.matches(k))
            .cloned()
            .collect()
    }

    /// Whether the reverse record of `key` is present
    pub fn has_mirror(&self, key: &FlowKey) -> bool {
        let Some(detail) = self.records.get(key) else {
            return false;
        };
        let (reverse, _) = mirror(key, detail);
        self.records
            .get(&reverse)
            .is_some_and(|rev| rev.out_port == key.in_port)
    }

    /// Records whose reverse direction is absent
    pub fn missing_mirrors(&self) -> Vec<FlowKey> {
        self.records
            .keys()
            .filter(|k| !self.has_mirror(k))
            .cloned()
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FlowKey, &FlowDetail)> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(src: [u8; 4], dst: [u8; 4], dst_port: Option<u16>, in_port: u32) -> FlowKey {
        FlowKey {
            service_key: ServiceKey::new("web", 1),
            src_ip: Ipv4Addr::from(src),
            dst_ip: Ipv4Addr::from(dst),
            src_port: None,
            dst_port,
            protocol: Protocol::Tcp,
            dpid: 1,
            in_port,
        }
    }

    #[test]
    fn test_mirror_swaps_everything() {
        let forward = key([10, 0, 0, 1], [10, 0, 0, 2], Some(8081), 1);
        let detail = FlowDetail::new("s1", 3, DIRECT_PRIORITY);
        let (rev_key, rev_detail) = mirror(&forward, &detail);

        assert_eq!(rev_key.src_ip, forward.dst_ip);
        assert_eq!(rev_key.dst_ip, forward.src_ip);
        assert_eq!(rev_key.in_port, 3);
        assert_eq!(rev_key.dst_port, None);
        assert_eq!(rev_detail.out_port, 1);
        assert_eq!(rev_key.src_port, Some(8081));
        assert_eq!(rev_detail.action, FlowAction::Output { port: 1 });

        // mirroring twice gives back the forward rule
        let (again, again_detail) = mirror(&rev_key, &rev_detail);
        assert_eq!(again, forward);
        assert_eq!(again_detail.out_port, detail.out_port);
    }

    #[test]
    fn test_replies_from_different_ports_are_distinct() {
        let mut index = FlowIndex::new();
        for port in [5002, 5003] {
            let forward = key([10, 0, 0, 1], [10, 0, 0, 3], Some(port), 1);
            let detail = FlowDetail::new("s1", 2, DIRECT_PRIORITY);
            let (rev_key, rev_detail) = mirror(&forward, &detail);
            index.insert(forward, detail);
            index.insert(rev_key, rev_detail);
        }
        assert_eq!(index.len(), 4);
        assert!(index.missing_mirrors().is_empty());
    }

    #[test]
    fn test_index_mirror_tracking() {
        let mut index = FlowIndex::new();
        let forward = key([10, 0, 0, 1], [10, 0, 0, 2], Some(5000), 1);
        let detail = FlowDetail::new("s1", 2, DIRECT_PRIORITY);
        index.insert(forward.clone(), detail.clone());
        assert_eq!(index.missing_mirrors(), vec![forward.clone()]);

        let (rev_key, rev_detail) = mirror(&forward, &detail);
        index.insert(rev_key, rev_detail);
        assert!(index.has_mirror(&forward));
        assert!(index.missing_mirrors().is_empty());
    }

    #[test]
    fn test_filter_selection() {
        let mut index = FlowIndex::new();
        let a = key([10, 0, 0, 1], [10, 0, 0, 2], Some(5000), 1);
        let b = key([10, 0, 0, 1], [10, 0, 0, 3], Some(5001), 1);
        index.insert(a.clone(), FlowDetail::new("s1", 2, PATH_PRIORITY));
        index.insert(b.clone(), FlowDetail::new("s1", 3, PATH_PRIORITY));

        let service = ServiceKey::new("web", 1);
        assert_eq!(index.select(&service, &FlowFilter::default()).len(), 2);
        let only_b = FlowFilter::between(b.src_ip, b.dst_ip).with_dst_port(5001);
        assert_eq!(index.select(&service, &only_b), vec![b]);
        let udp = FlowFilter::default().with_protocol(Protocol::Udp);
        assert!(index.select(&service, &udp).is_empty());
        assert!(index.select(&ServiceKey::new("web", 2), &FlowFilter::default()).is_empty());
    }

    #[test]
    fn test_action_serializes_like_ofctl() {
        let json = serde_json::to_value(FlowAction::Output { port: 4 }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "OUTPUT", "port": 4}));
    }
}
