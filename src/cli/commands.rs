//! Command implementations for the CLI
//!
//! SBIO pattern: Commands return Results, I/O is handled by caller

use std::path::Path;

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::config::{load_catalog_file, ServiceDefinition};
use crate::lifecycle::{FlowRow, InstanceRow};
use crate::server::{DeployRequest, DeployResponse, OperationStatus, StatusResponse, TestResponse};

/// Errors that can occur during command execution
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Server error: {0}")]
    Server(String),
}

/// Result type for commands
pub type CommandResult<T> = Result<T, CommandError>;

// ============================================================================
// Validate Commands
// ============================================================================

/// Validate a catalog file
pub fn validate_catalog(path: &Path) -> ValidationResult {
    match load_catalog_file(path) {
        Ok(catalog) => ValidationResult {
            valid: true,
            services: catalog.services.len(),
            components: catalog.services.iter().map(|s| s.components.len()).sum(),
            error: None,
        },
        Err(e) => ValidationResult {
            valid: false,
            services: 0,
            components: 0,
            error: Some(e.to_string()),
        },
    }
}

/// Result of validating a catalog
#[derive(Debug)]
pub struct ValidationResult {
    pub valid: bool,
    pub services: usize,
    pub components: usize,
    pub error: Option<String>,
}

// ============================================================================
// HTTP Client for the scheduler
// ============================================================================

/// Client for the scheduler's HTTP surface
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> CommandResult<T> {
        let resp = self.client.get(self.url(path)).send().await?;
        if !resp.status().is_success() {
            return Err(CommandError::Server(format!(
                "GET {} failed: {}",
                path,
                resp.status()
            )));
        }
        Ok(resp.json().await?)
    }

    pub async fn status(&self) -> CommandResult<StatusResponse> {
        self.get_json("/v1/status").await
    }

    pub async fn list_services(&self) -> CommandResult<Vec<ServiceDefinition>> {
        self.get_json("/v1/services").await
    }

    pub async fn list_instances(&self) -> CommandResult<Vec<InstanceRow>> {
        self.get_json("/v1/instances").await
    }

    pub async fn list_flows(&self) -> CommandResult<Vec<FlowRow>> {
        self.get_json("/v1/flows").await
    }

    /// Deploy a service; a refused deploy is returned, not raised
    pub async fn deploy(&self, service: &str) -> CommandResult<DeployResponse> {
        let resp = self
            .client
            .post(self.url("/v1/instances"))
            .json(&DeployRequest {
                service: service.to_string(),
            })
            .send()
            .await?;
        Ok(resp.json().await?)
    }

    pub async fn stop(&self, key: &str) -> CommandResult<OperationStatus> {
        let resp = self
            .client
            .delete(self.url(&format!("/v1/instances/{}", key)))
            .send()
            .await?;
        Ok(resp.json().await?)
    }

    pub async fn test(&self, key: &str) -> CommandResult<TestResponse> {
        let resp = self
            .client
            .get(self.url(&format!("/v1/instances/{}/test", key)))
            .send()
            .await?;
        Ok(resp.json().await?)
    }
}
