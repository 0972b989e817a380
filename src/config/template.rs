//! Placeholder resolution for component commands and environments
//!
//! Environment values may refer to peers of the same instance:
//! `{{ip:component}}` becomes the peer's address once it is placed and
//! `{{port:component}}` its declared listen port. Commands may use
//! `{scripts_dir}`.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::OnceLock;

use regex::Regex;

/// Address handed out for peers that are not placed yet
pub const PROVISIONAL_IP: Ipv4Addr = Ipv4Addr::UNSPECIFIED;

/// What a placeholder asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerField {
    Ip,
    Port,
}

/// A `{{field:component}}` reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRef {
    pub field: PeerField,
    pub component: String,
}

/// What is known about a peer at resolution time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerAddr {
    pub ip: Option<Ipv4Addr>,
    pub port: Option<u16>,
}

/// Resolved environment plus whether any value is provisional
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedEnv {
    pub vars: BTreeMap<String, String>,
    pub provisional: bool,
}

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\s*(ip|port)\s*:\s*([A-Za-z0-9_-]+)\s*\}\}")
            .expect("placeholder pattern is valid")
    })
}

// ============================================================================
// SBIO: Pure business logic (no I/O)
// ============================================================================

/// Every peer reference in a template value
pub fn peer_references(value: &str) -> Vec<PeerRef> {
    placeholder_pattern()
        .captures_iter(value)
        .filter_map(|caps| {
            let field = match caps.get(1)?.as_str() {
                "ip" => PeerField::Ip,
                _ => PeerField::Port,
            };
            Some(PeerRef {
                field,
                component: caps.get(2)?.as_str().to_string(),
            })
        })
        .collect()
}

/// Substitute peer placeholders in one value
///
/// Returns the resolved string and whether an unplaced peer's address had
/// to be filled with `PROVISIONAL_IP`.
pub fn resolve_value(value: &str, peers: &BTreeMap<String, PeerAddr>) -> (String, bool) {
    let mut provisional = false;
    let resolved = placeholder_pattern()
        .replace_all(value, |caps: &regex::Captures<'_>| {
            let component = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            let peer = peers.get(component);
            match caps.get(1).map(|m| m.as_str()) {
                Some("ip") => match peer.and_then(|p| p.ip) {
                    Some(ip) => ip.to_string(),
                    None => {
                        provisional = true;
                        PROVISIONAL_IP.to_string()
                    }
                },
                _ => peer
                    .and_then(|p| p.port)
                    .map(|p| p.to_string())
                    .unwrap_or_default(),
            }
        })
        .to_string();
    (resolved, provisional)
}

/// Resolve a whole environment template
pub fn resolve_env(
    template: &BTreeMap<String, String>,
    peers: &BTreeMap<String, PeerAddr>,
) -> ResolvedEnv {
    let mut resolved = ResolvedEnv::default();
    for (name, value) in template {
        let (value, provisional) = resolve_value(value, peers);
        resolved.provisional |= provisional;
        resolved.vars.insert(name.clone(), value);
    }
    resolved
}

/// Expand `{scripts_dir}` in a command template
pub fn expand_command(command: &[String], scripts_dir: &str) -> Vec<String> {
    command
        .iter()
        .map(|arg| arg.replace("{scripts_dir}", scripts_dir))
        .collect()
}
