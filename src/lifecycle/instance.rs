//! Service and component instances

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::runtime::ProcessHandle;

/// Identity of a deployed service instance, `{service}-{n}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceKey(String);

impl ServiceKey {
    pub fn new(service: &str, n: u64) -> Self {
        Self(format!("{}-{}", service, n))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ServiceKey {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<&str> for ServiceKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Priority tier of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tier {
    /// Deployed on request; may evict fillers
    UserRequested,
    /// Backfill; evictable
    Filler,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::UserRequested => f.write_str("user-requested"),
            Tier::Filler => f.write_str("filler"),
        }
    }
}

/// Lifecycle state; only ever moves forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Pending,
    Placed,
    Running,
    Stopping,
    Terminated,
}

impl InstanceState {
    pub fn can_transition_to(self, next: InstanceState) -> bool {
        next > self
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstanceState::Pending => "pending",
            InstanceState::Placed => "placed",
            InstanceState::Running => "running",
            InstanceState::Stopping => "stopping",
            InstanceState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// One running component of an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentInstance {
    pub component: String,
    pub host: String,
    pub ip: Ipv4Addr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen_port: Option<u16>,
    pub handle: ProcessHandle,
    /// Started with placeholder peer addresses; relaunched once all are placed
    #[serde(skip)]
    pub provisional: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceInstance {
    pub service_key: ServiceKey,
    pub service: String,
    pub tier: Tier,
    /// Deployment order across all instances; lower is older
    pub seq: u64,
    pub state: InstanceState,
    pub components: Vec<ComponentInstance>,
    pub created_at: DateTime<Utc>,
}

impl ServiceInstance {
    pub fn new(service_key: ServiceKey, service: &str, tier: Tier, seq: u64) -> Self {
        Self {
            service_key,
            service: service.to_string(),
            tier,
            seq,
            state: InstanceState::Pending,
            components: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Move to `next`, returning the previous state on success
    pub fn transition(&mut self, next: InstanceState) -> Result<InstanceState, InstanceState> {
        if !self.state.can_transition_to(next) {
            return Err(self.state);
        }
        let previous = self.state;
        self.state = next;
        Ok(previous)
    }

    pub fn hosts(&self) -> Vec<&str> {
        self.components.iter().map(|c| c.host.as_str()).collect()
    }

    pub fn component(&self, name: &str) -> Option<&ComponentInstance> {
        self.components.iter().find(|c| c.component == name)
    }
}

/// Flat view of one component for listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRow {
    pub service_key: ServiceKey,
    pub component: String,
    pub host: String,
    pub ip: Ipv4Addr,
    pub state: InstanceState,
    pub tier: Tier,
}

impl InstanceRow {
    pub fn from_instance(instance: &ServiceInstance) -> Vec<Self> {
        instance
            .components
            .iter()
            .map(|c| InstanceRow {
                service_key: instance.service_key.clone(),
                component: c.component.clone(),
                host: c.host.clone(),
                ip: c.ip,
                state: instance.state,
                tier: instance.tier,
            })
            .collect()
    }
}
