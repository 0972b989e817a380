//! Control-plane flow programming
//!
//! Rules are pushed one at a time to an `ofctl_rest` style endpoint
//! (`POST {base}/stats/flowentry/{add|delete}`). Calls carry a short fixed
//! timeout and are never retried.

use std::collections::HashSet;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::record::{FlowAction, FlowDetail, FlowKey};

/// IPv4 ethertype
pub const ETH_TYPE_IPV4: u16 = 0x0800;

/// Errors from a single rule push
#[derive(Error, Debug)]
pub enum FlowPushError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Control plane returned status {0}")]
    Status(u16),

    #[error("Control plane rejected rule: {0}")]
    Rejected(String),
}

/// Operation discriminator of a push
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowOp {
    Add,
    Delete,
}

impl fmt::Display for FlowOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowOp::Add => f.write_str("add"),
            FlowOp::Delete => f.write_str("delete"),
        }
    }
}

/// Match section of a flow entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowMatch {
    pub eth_type: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_proto: Option<u8>,
    pub ipv4_src: String,
    pub ipv4_dst: String,
    pub in_port: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp_src: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp_dst: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub udp_src: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub udp_dst: Option<u16>,
}

/// Request body for one rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowEntry {
    pub dpid: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookie: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookie_mask: Option<u64>,
    pub table_id: u8,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    pub priority: u16,
    pub flags: u16,
    #[serde(rename = "match")]
    pub flow_match: FlowMatch,
    pub actions: Vec<FlowAction>,
}

impl FlowEntry {
    /// Build the wire entry for a tracked rule
    pub fn from_record(op: FlowOp, key: &FlowKey, detail: &FlowDetail) -> Self {
        let (src_port, dst_port) = if key.protocol.has_ports() {
            (key.src_port, key.dst_port)
        } else {
            (None, None)
        };
        let tcp = key.protocol == super::Protocol::Tcp;

        let flow_match = FlowMatch {
            eth_type: ETH_TYPE_IPV4,
            ip_proto: key.protocol.ip_proto(),
            ipv4_src: key.src_ip.to_string(),
            ipv4_dst: key.dst_ip.to_string(),
            in_port: key.in_port,
            tcp_src: src_port.filter(|_| tcp),
            tcp_dst: dst_port.filter(|_| tcp),
            udp_src: src_port.filter(|_| !tcp),
            udp_dst: dst_port.filter(|_| !tcp),
        };

        let (cookie, cookie_mask) = match op {
            FlowOp::Add => (Some(0), Some(0)),
            FlowOp::Delete => (None, None),
        };

        Self {
            dpid: key.dpid,
            cookie,
            cookie_mask,
            table_id: 0,
            idle_timeout: 0,
            hard_timeout: 0,
            priority: detail.priority,
            flags: 0,
            flow_match,
            actions: vec![detail.action],
        }
    }
}

/// Something that can program switch forwarding tables
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn push(&self, op: FlowOp, entry: &FlowEntry) -> Result<(), FlowPushError>;
}

/// REST client for a Ryu `ofctl_rest` controller
pub struct RyuRestClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl RyuRestClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, FlowPushError> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }

    pub fn endpoint(&self, op: FlowOp) -> String {
        format!("{}/stats/flowentry/{}", self.base_url, op)
    }
}

#[async_trait]
impl ControlPlane for RyuRestClient {
    async fn push(&self, op: FlowOp, entry: &FlowEntry) -> Result<(), FlowPushError> {
        let response = self
            .http_client
            .post(self.endpoint(op))
            .json(entry)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FlowPushError::Status(status.as_u16()));
        }
        debug!("Flow {} accepted for dpid {}", op, entry.dpid);
        Ok(())
    }
}

/// Control plane that only records what it was asked to do
///
/// Used by `serve --dry-run` and by tests. Pushes for the dpids in
/// `failing_dpids` are rejected.
#[derive(Default)]
pub struct DryRunControlPlane {
    pushes: Mutex<Vec<(FlowOp, FlowEntry)>>,
    failing_dpids: Mutex<HashSet<u64>>,
}

impl DryRunControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every push to a switch from now on
    pub fn fail_switch(&self, dpid: u64) {
        if let Ok(mut failing) = self.failing_dpids.lock() {
            failing.insert(dpid);
        }
    }

    pub fn recover_switch(&self, dpid: u64) {
        if let Ok(mut failing) = self.failing_dpids.lock() {
            failing.remove(&dpid);
        }
    }

    /// Everything accepted so far, in order
    pub fn pushes(&self) -> Vec<(FlowOp, FlowEntry)> {
        self.pushes
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, op: FlowOp) -> usize {
        self.pushes().iter().filter(|(o, _)| *o == op).count()
    }
}

#[async_trait]
impl ControlPlane for DryRunControlPlane {
    async fn push(&self, op: FlowOp, entry: &FlowEntry) -> Result<(), FlowPushError> {
        let failing = self
            .failing_dpids
            .lock()
            .map(|f| f.contains(&entry.dpid))
            .unwrap_or(false);
        if failing {
            return Err(FlowPushError::Rejected(format!(
                "switch {} unreachable",
                entry.dpid
            )));
        }

        debug!("[dry-run] flow {} on dpid {}", op, entry.dpid);
        if let Ok(mut pushes) = self.pushes.lock() {
            pushes.push((op, entry.clone()));
        }
        Ok(())
    }
}
