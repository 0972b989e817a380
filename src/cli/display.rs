//! Display formatting for CLI output
//!
//! SBIO pattern: Pure functions that format data for display

use super::commands::ValidationResult;
use crate::config::ServiceDefinition;
use crate::lifecycle::{FlowRow, InstanceRow};
use crate::server::{DeployResponse, OperationStatus, StatusResponse, TestResponse};
use crate::topology::TopologyView;

// ============================================================================
// Table formatting helpers
// ============================================================================

/// Format a simple table with headers and rows
pub fn format_table(headers: &[&str], rows: Vec<Vec<String>>) -> String {
    if rows.is_empty() {
        return "No resources found.\n".to_string();
    }

    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let mut output = String::new();
    push_row(
        &mut output,
        headers.iter().map(|h| h.to_uppercase()),
        &widths,
    );
    for row in rows {
        push_row(&mut output, row.into_iter(), &widths);
    }
    output
}

fn push_row(output: &mut String, cells: impl Iterator<Item = String>, widths: &[usize]) {
    let mut line = String::new();
    for (i, cell) in cells.enumerate() {
        if i > 0 {
            line.push_str("   ");
        }
        match widths.get(i) {
            Some(width) => line.push_str(&format!("{:width$}", cell, width = width)),
            None => line.push_str(&cell),
        }
    }
    output.push_str(line.trim_end());
    output.push('\n');
}

// ============================================================================
// Instance and flow display
// ============================================================================

/// Format running components, one row per component
pub fn format_instance_list(rows: &[InstanceRow]) -> String {
    let headers = &["SERVICE KEY", "COMPONENT", "HOST", "IP", "STATE", "TIER"];
    let rows: Vec<Vec<String>> = rows
        .iter()
        .map(|r| {
            vec![
                r.service_key.to_string(),
                r.component.clone(),
                r.host.clone(),
                r.ip.to_string(),
                r.state.to_string(),
                r.tier.to_string(),
            ]
        })
        .collect();

    format_table(headers, rows)
}

/// Format tracked forwarding rules
pub fn format_flow_list(flows: &[FlowRow]) -> String {
    let headers = &[
        "SERVICE KEY",
        "SWITCH",
        "IN",
        "SRC",
        "DST",
        "PROTO",
        "PORTS",
        "OUT",
        "PRIO",
        "PUSHED",
    ];
    let rows: Vec<Vec<String>> = flows
        .iter()
        .map(|f| {
            let ports = match (f.key.src_port, f.key.dst_port) {
                (None, None) => "-".to_string(),
                (src, dst) => format!(
                    "{}->{}",
                    src.map_or("*".to_string(), |p| p.to_string()),
                    dst.map_or("*".to_string(), |p| p.to_string())
                ),
            };
            vec![
                f.key.service_key.to_string(),
                format!("{} ({})", f.detail.switch, f.key.dpid),
                f.key.in_port.to_string(),
                f.key.src_ip.to_string(),
                f.key.dst_ip.to_string(),
                f.key.protocol.to_string(),
                ports,
                f.detail.out_port.to_string(),
                f.detail.priority.to_string(),
                if f.detail.pushed { "yes" } else { "no" }.to_string(),
            ]
        })
        .collect();

    format_table(headers, rows)
}

/// Format the catalog
pub fn format_service_list(services: &[ServiceDefinition]) -> String {
    let headers = &["NAME", "SIZE", "COMPONENTS", "REPORTER"];
    let rows: Vec<Vec<String>> = services
        .iter()
        .map(|s| {
            vec![
                s.name.clone(),
                s.size().to_string(),
                s.components
                    .iter()
                    .map(|c| c.name.as_str())
                    .collect::<Vec<_>>()
                    .join(","),
                s.reporter.clone().unwrap_or_else(|| "-".to_string()),
            ]
        })
        .collect();

    format_table(headers, rows)
}

// ============================================================================
// Status display
// ============================================================================

/// Format scheduler status and per-host capacity
pub fn format_status(status: &StatusResponse) -> String {
    let capacity = &status.capacity;
    let mut output = String::new();

    output.push_str("Scheduler Status\n");
    output.push_str("================\n\n");
    output.push_str(&format!("Status:    {}", status.status));
    if status.dry_run {
        output.push_str(" (dry run)");
    }
    output.push('\n');
    output.push_str(&format!("Uptime:    {}s\n", status.uptime_secs));
    output.push_str(&format!(
        "Slots:     {}/{} used ({} per host)\n",
        capacity.used_slots,
        capacity.used_slots + capacity.available_slots,
        capacity.max_apps
    ));
    output.push_str(&format!("Instances: {}\n", capacity.instances));
    output.push_str(&format!("Flows:     {}\n\n", capacity.flows));

    let rows: Vec<Vec<String>> = capacity
        .hosts
        .iter()
        .map(|h| {
            vec![
                h.host.clone(),
                format!("{}/{}", h.used, h.max),
                h.max.saturating_sub(h.used).to_string(),
            ]
        })
        .collect();
    output.push_str(&format_table(&["HOST", "USED", "FREE"], rows));

    output
}

// ============================================================================
// Operation results
// ============================================================================

pub fn format_deploy_result(service: &str, result: &DeployResponse) -> String {
    let mut output = String::new();

    match (&result.service_key, result.success) {
        (Some(key), true) => {
            output.push_str(&format!("✓ Deployed {} as {}\n", service, key));
            if !result.evicted.is_empty() {
                output.push_str(&format!("  Evicted:    {}\n", join_keys(&result.evicted)));
            }
            if !result.backfilled.is_empty() {
                output.push_str(&format!("  Backfilled: {}\n", join_keys(&result.backfilled)));
            }
        }
        _ => {
            output.push_str(&format!("✗ Failed to deploy {}\n", service));
            if let Some(ref reason) = result.reason {
                output.push_str(&format!("  Reason: {}\n", reason));
            }
        }
    }

    output
}

pub fn format_stop_result(key: &str, result: &OperationStatus) -> String {
    if result.success {
        format!(
            "✓ Stopped {} ({} slots freed, {} flows removed)\n",
            key, result.freed_slots, result.removed_flows
        )
    } else {
        format!(
            "✗ Failed to stop {}: {}\n",
            key,
            result.reason.as_deref().unwrap_or("unknown error")
        )
    }
}

pub fn format_test_result(key: &str, result: &TestResponse) -> String {
    match (&result.content, result.success) {
        (Some(content), true) => {
            let mut output = format!("✓ {} reported:\n", key);
            for line in content.lines() {
                output.push_str(&format!("  {}\n", line));
            }
            output
        }
        _ => format!(
            "✗ {} did not report: {}\n",
            key,
            result.error.as_deref().unwrap_or("no result")
        ),
    }
}

fn join_keys<T: ToString>(keys: &[T]) -> String {
    keys.iter()
        .map(|k| k.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

// ============================================================================
// Validation display
// ============================================================================

/// Format validation result for display
pub fn format_validation_result(result: &ValidationResult, path: &str) -> String {
    let mut output = String::new();

    if result.valid {
        output.push_str(&format!("✓ {} is valid\n\n", path));
        output.push_str(&format!("  Services:   {}\n", result.services));
        output.push_str(&format!("  Components: {}\n", result.components));
    } else {
        output.push_str(&format!("✗ {} is invalid\n\n", path));
        if let Some(ref error) = result.error {
            output.push_str(&format!("  Error: {}\n", error));
        }
    }

    output
}

// ============================================================================
// Topology display
// ============================================================================

/// Format switches with their links, then hosts with their attachment
pub fn format_topology(topology: &TopologyView) -> String {
    let mut output = String::new();

    let switches = topology.switches();
    output.push_str(&format!("Switches ({}):\n", switches.len()));
    for switch in &switches {
        let dpid = topology.dpid(switch).unwrap_or_default();
        output.push_str(&format!("  {} [dpid {}]\n", switch, dpid));
        for adj in topology.neighbors(switch) {
            output.push_str(&format!("    port {} -> {}\n", adj.local_port, adj.peer));
        }
    }

    let hosts = topology.hosts();
    output.push_str(&format!("\nHosts ({}):\n", hosts.len()));
    let rows: Vec<Vec<String>> = hosts
        .iter()
        .map(|h| {
            vec![
                h.clone(),
                topology
                    .host_ip(h)
                    .map(|ip| ip.to_string())
                    .unwrap_or_else(|_| "?".to_string()),
                topology.switch_for(h).unwrap_or("-").to_string(),
            ]
        })
        .collect();
    output.push_str(&format_table(&["HOST", "IP", "SWITCH"], rows));

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{CapacityReport, InstanceState, ServiceKey, Tier};
    use crate::placement::HostUsage;
    use crate::topology::{build_topology, TopologyKind};
    use std::net::Ipv4Addr;

    #[test]
    fn test_format_table() {
        let headers = &["NAME", "AGE"];
        let rows = vec![
            vec!["Alice".to_string(), "30".to_string()],
            vec!["Bob".to_string(), "25".to_string()],
        ];

        let output = format_table(headers, rows);
        assert!(output.starts_with("NAME"));
        assert!(output.contains("Alice   30"));
        assert!(output.contains("Bob"));
    }

    #[test]
    fn test_format_table_empty() {
        let headers = &["NAME"];
        let rows: Vec<Vec<String>> = vec![];

        let output = format_table(headers, rows);
        assert!(output.contains("No resources found"));
    }

    #[test]
    fn test_format_instance_list() {
        let rows = vec![InstanceRow {
            service_key: ServiceKey::new("web", 1),
            component: "web_server".to_string(),
            host: "h3".to_string(),
            ip: Ipv4Addr::new(10, 0, 0, 3),
            state: InstanceState::Running,
            tier: Tier::UserRequested,
        }];

        let output = format_instance_list(&rows);
        assert!(output.contains("web-1"));
        assert!(output.contains("10.0.0.3"));
        assert!(output.contains("running"));
        assert!(output.contains("user-requested"));
    }

    #[test]
    fn test_format_status() {
        let status = StatusResponse {
            status: "ok".to_string(),
            dry_run: true,
            uptime_secs: 12,
            capacity: CapacityReport {
                max_apps: 2,
                used_slots: 3,
                available_slots: 1,
                instances: 2,
                flows: 8,
                hosts: vec![
                    HostUsage {
                        host: "h1".to_string(),
                        used: 2,
                        max: 2,
                    },
                    HostUsage {
                        host: "h2".to_string(),
                        used: 1,
                        max: 2,
                    },
                ],
            },
        };

        let output = format_status(&status);
        assert!(output.contains("(dry run)"));
        assert!(output.contains("3/4 used"));
        assert!(output.contains("h2"));
        assert!(output.contains("1/2"));
    }

    #[test]
    fn test_format_deploy_result() {
        let ok = DeployResponse {
            success: true,
            service_key: Some(ServiceKey::new("web", 2)),
            evicted: vec![ServiceKey::new("colab", 1)],
            backfilled: Vec::new(),
            reason: None,
        };
        let output = format_deploy_result("web", &ok);
        assert!(output.contains("✓ Deployed web as web-2"));
        assert!(output.contains("Evicted:    colab-1"));
        assert!(!output.contains("Backfilled"));

        let refused = DeployResponse {
            success: false,
            service_key: None,
            evicted: Vec::new(),
            backfilled: Vec::new(),
            reason: Some("Insufficient capacity".to_string()),
        };
        let output = format_deploy_result("web", &refused);
        assert!(output.contains("✗"));
        assert!(output.contains("Insufficient capacity"));
    }

    #[test]
    fn test_format_stop_and_test_results() {
        let stopped = OperationStatus {
            success: true,
            reason: None,
            freed_slots: 3,
            removed_flows: 12,
        };
        assert!(format_stop_result("random-1", &stopped).contains("3 slots freed"));

        let reported = TestResponse {
            success: true,
            content: Some("Sum: 9\n".to_string()),
            error: None,
        };
        assert!(format_test_result("random-1", &reported).contains("  Sum: 9"));

        let silent = TestResponse {
            success: false,
            content: None,
            error: Some("timed out".to_string()),
        };
        assert!(format_test_result("random-1", &silent).contains("timed out"));
    }

    #[test]
    fn test_format_validation_valid() {
        let result = ValidationResult {
            valid: true,
            services: 4,
            components: 10,
            error: None,
        };

        let output = format_validation_result(&result, "catalog.jsonc");
        assert!(output.contains("✓"));
        assert!(output.contains("Services:   4"));
        assert!(output.contains("Components: 10"));
    }

    #[test]
    fn test_format_validation_invalid() {
        let result = ValidationResult {
            valid: false,
            services: 0,
            components: 0,
            error: Some("Parse error".to_string()),
        };

        let output = format_validation_result(&result, "catalog.jsonc");
        assert!(output.contains("✗"));
        assert!(output.contains("invalid"));
        assert!(output.contains("Parse error"));
    }

    #[test]
    fn test_format_topology() {
        let view = TopologyView::from_spec(&build_topology(TopologyKind::Simple)).unwrap();
        let output = format_topology(&view);
        assert!(output.contains("Hosts (6)"));
        assert!(output.contains("h1"));
        assert!(output.contains("dpid"));
    }
}
