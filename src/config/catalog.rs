//! Service catalog
//!
//! A catalog lists the deployable service types. It is either the built-in
//! set or a JSONC file:
//!
//! ```jsonc
//! {
//!   "services": [
//!     {
//!       "name": "colab",
//!       "components": [
//!         { "name": "colab_a", "command": ["python3", "{scripts_dir}/colab_a.py"],
//!           "env": { "COLAB_B_IP": "{{ip:colab_b}}" } },
//!         { "name": "colab_b", "command": ["python3", "{scripts_dir}/colab_b.py"],
//!           "listen_port": 5004 }
//!       ],
//!       "dependencies": [{ "from": "colab_a", "to": "colab_b", "protocol": "tcp", "port": 5004 }],
//!       "reporter": "colab_a"
//!     }
//!   ]
//! }
//! ```

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::template::{peer_references, PeerField};
use crate::flow::Protocol;

/// Errors from parsing or validating a catalog
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Failed to parse catalog: {0}")]
    ParseError(String),

    #[error("Catalog defines no services")]
    Empty,

    #[error("Service '{0}' is defined more than once")]
    DuplicateService(String),

    #[error("Service '{0}' has no components")]
    NoComponents(String),

    #[error("Service '{service}' defines component '{component}' more than once")]
    DuplicateComponent { service: String, component: String },

    #[error("Service '{service}': component '{component}' has an empty command")]
    EmptyCommand { service: String, component: String },

    #[error("Service '{service}': dependency refers to unknown component '{component}'")]
    UnknownEndpoint { service: String, component: String },

    #[error("Service '{service}': dependency {from} -> {to} must be tcp or udp")]
    PortlessDependency {
        service: String,
        from: String,
        to: String,
    },

    #[error("Service '{service}': '{component}' refers to unknown peer '{peer}'")]
    UnknownPeer {
        service: String,
        component: String,
        peer: String,
    },

    #[error("Service '{service}': '{component}' needs the port of '{peer}', which declares none")]
    PeerWithoutPort {
        service: String,
        component: String,
        peer: String,
    },

    #[error("Service '{service}': reporter '{reporter}' is not one of its components")]
    UnknownReporter { service: String, reporter: String },
}

/// One process of a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub name: String,
    /// Argument vector; `{scripts_dir}` is expanded at launch
    pub command: Vec<String>,
    /// Environment template; values may hold peer placeholders
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen_port: Option<u16>,
}

impl ComponentSpec {
    pub fn new(name: &str, script: &str) -> Self {
        Self {
            name: name.to_string(),
            command: vec!["python3".to_string(), format!("{{scripts_dir}}/{}", script)],
            env: BTreeMap::new(),
            listen_port: None,
        }
    }

    pub fn listening(mut self, port: u16) -> Self {
        self.listen_port = Some(port);
        self
    }

    pub fn with_env(mut self, name: &str, value: &str) -> Self {
        self.env.insert(name.to_string(), value.to_string());
        self
    }
}

/// A declared traffic requirement between two components
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySpec {
    pub from: String,
    pub to: String,
    #[serde(default = "default_protocol")]
    pub protocol: Protocol,
    pub port: u16,
}

fn default_protocol() -> Protocol {
    Protocol::Tcp
}

/// A deployable service type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub name: String,
    pub components: Vec<ComponentSpec>,
    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,
    /// Component whose output artifact `test` waits for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reporter: Option<String>,
}

impl ServiceDefinition {
    /// Number of host slots one instance occupies
    pub fn size(&self) -> usize {
        self.components.len()
    }

    pub fn component(&self, name: &str) -> Option<&ComponentSpec> {
        self.components.iter().find(|c| c.name == name)
    }

    fn dependency(from: &str, to: &str, port: u16) -> DependencySpec {
        DependencySpec {
            from: from.to_string(),
            to: to.to_string(),
            protocol: Protocol::Tcp,
            port,
        }
    }

    /// Check internal consistency of one definition
    pub fn validate(&self) -> Result<(), CatalogError> {
        let service = || self.name.clone();
        if self.components.is_empty() {
            return Err(CatalogError::NoComponents(service()));
        }

        let mut names = HashSet::new();
        for c in &self.components {
            if !names.insert(c.name.as_str()) {
                return Err(CatalogError::DuplicateComponent {
                    service: service(),
                    component: c.name.clone(),
                });
            }
            if c.command.is_empty() {
                return Err(CatalogError::EmptyCommand {
                    service: service(),
                    component: c.name.clone(),
                });
            }
        }

        for dep in &self.dependencies {
            for end in [&dep.from, &dep.to] {
                if !names.contains(end.as_str()) {
                    return Err(CatalogError::UnknownEndpoint {
                        service: service(),
                        component: end.clone(),
                    });
                }
            }
            if !dep.protocol.has_ports() {
                return Err(CatalogError::PortlessDependency {
                    service: service(),
                    from: dep.from.clone(),
                    to: dep.to.clone(),
                });
            }
        }

        for c in &self.components {
            for peer in c.env.values().flat_map(|v| peer_references(v)) {
                let Some(target) = self.component(&peer.component) else {
                    return Err(CatalogError::UnknownPeer {
                        service: service(),
                        component: c.name.clone(),
                        peer: peer.component,
                    });
                };
                if peer.field == PeerField::Port && target.listen_port.is_none() {
                    return Err(CatalogError::PeerWithoutPort {
                        service: service(),
                        component: c.name.clone(),
                        peer: peer.component,
                    });
                }
            }
        }

        if let Some(reporter) = &self.reporter {
            if !names.contains(reporter.as_str()) {
                return Err(CatalogError::UnknownReporter {
                    service: service(),
                    reporter: reporter.clone(),
                });
            }
        }
        Ok(())
    }
}

/// All deployable service types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCatalog {
    pub services: Vec<ServiceDefinition>,
}

impl ServiceCatalog {
    /// Parse and validate a JSONC catalog
    pub fn from_str(content: &str) -> Result<Self, CatalogError> {
        let stripped = strip_jsonc_comments(content);
        let catalog: Self =
            serde_json::from_str(&stripped).map_err(|e| CatalogError::ParseError(e.to_string()))?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// The services shipped with the crate
    pub fn builtin() -> Self {
        let web = ServiceDefinition {
            name: "web".to_string(),
            components: vec![
                ComponentSpec::new("web_server", "web_server.py")
                    .listening(8081)
                    .with_env("DATABASE_IP", "{{ip:database}}")
                    .with_env("DATABASE_PORT", "{{port:database}}"),
                ComponentSpec::new("database", "database.py").listening(8082),
            ],
            dependencies: vec![ServiceDefinition::dependency("web_server", "database", 8082)],
            reporter: None,
        };

        let random = ServiceDefinition {
            name: "random".to_string(),
            components: vec![
                ComponentSpec::new("random_gen1", "random_gen1.py").listening(5000),
                ComponentSpec::new("random_gen2", "random_gen2.py").listening(5001),
                ComponentSpec::new("random_sum", "random_sum.py")
                    .with_env("GEN1_IP", "{{ip:random_gen1}}")
                    .with_env("GEN2_IP", "{{ip:random_gen2}}"),
            ],
            dependencies: vec![
                ServiceDefinition::dependency("random_sum", "random_gen1", 5000),
                ServiceDefinition::dependency("random_sum", "random_gen2", 5001),
            ],
            reporter: Some("random_sum".to_string()),
        };

        let datetime = ServiceDefinition {
            name: "datetime".to_string(),
            components: vec![
                ComponentSpec::new("date_fetcher", "date_fetcher.py").listening(5002),
                ComponentSpec::new("time_fetcher", "time_fetcher.py").listening(5003),
                ComponentSpec::new("datetime_combiner", "datetime_combiner.py")
                    .with_env("DATE_IP", "{{ip:date_fetcher}}")
                    .with_env("TIME_IP", "{{ip:time_fetcher}}"),
            ],
            dependencies: vec![
                ServiceDefinition::dependency("datetime_combiner", "date_fetcher", 5002),
                ServiceDefinition::dependency("datetime_combiner", "time_fetcher", 5003),
            ],
            reporter: Some("datetime_combiner".to_string()),
        };

        // colab_a starts before its peer is placed and gets relaunched
        let colab = ServiceDefinition {
            name: "colab".to_string(),
            components: vec![
                ComponentSpec::new("colab_a", "colab_a.py").with_env("COLAB_B_IP", "{{ip:colab_b}}"),
                ComponentSpec::new("colab_b", "colab_b.py").listening(5004),
            ],
            dependencies: vec![ServiceDefinition::dependency("colab_a", "colab_b", 5004)],
            reporter: Some("colab_a".to_string()),
        };

        Self {
            services: vec![web, random, datetime, colab],
        }
    }

    pub fn get(&self, name: &str) -> Option<&ServiceDefinition> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.services.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn validate(&self) -> Result<(), CatalogError> {
        if self.services.is_empty() {
            return Err(CatalogError::Empty);
        }
        let mut seen = HashSet::new();
        for service in &self.services {
            if !seen.insert(service.name.as_str()) {
                return Err(CatalogError::DuplicateService(service.name.clone()));
            }
            service.validate()?;
        }
        Ok(())
    }
}

/// Strip `//` and `/* */` comments outside of string literals
pub fn strip_jsonc_comments(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if in_string {
            result.push(c);
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match (c, chars.peek()) {
            ('"', _) => {
                in_string = true;
                result.push(c);
            }
            ('/', Some('/')) => {
                // keep the newline so line numbers in parse errors stay right
                if chars.by_ref().any(|nc| nc == '\n') {
                    result.push('\n');
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = ' ';
                for nc in chars.by_ref() {
                    if prev == '*' && nc == '/' {
                        break;
                    }
                    if nc == '\n' {
                        result.push('\n');
                    }
                    prev = nc;
                }
            }
            _ => result.push(c),
        }
    }

    result
}
