pub mod catalog;
pub mod settings;
pub mod template;

pub use catalog::{
    strip_jsonc_comments, CatalogError, ComponentSpec, DependencySpec, ServiceCatalog,
    ServiceDefinition,
};
pub use settings::{default_config_path, expand_path, Settings, DEFAULT_PORT};
pub use template::{PeerAddr, ResolvedEnv, PROVISIONAL_IP};

use std::path::Path;
use thiserror::Error;

use crate::topology::TopologyError;

/// Errors for file I/O operations (separate from pure parsing errors)
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid settings: {0}")]
    SettingsError(#[from] serde_yaml::Error),

    #[error("Catalog error: {0}")]
    CatalogError(#[from] CatalogError),

    #[error("Topology error: {0}")]
    TopologyError(#[from] TopologyError),

    #[error("Filler service '{0}' is not in the catalog")]
    UnknownFiller(String),
}

// ============================================================================
// SBIO: I/O wrapper - thin layer over pure functions
// ============================================================================

/// Load settings from disk.
pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    Ok(Settings::from_yaml(&content)?.expanded())
}

/// Load settings from `path`, or from the default location if it exists,
/// or fall back to defaults.
pub fn load_settings_or_default(path: Option<&Path>) -> Result<Settings, ConfigError> {
    match path {
        Some(path) => load_settings(path),
        None => {
            let default = default_config_path();
            if default.exists() {
                load_settings(&default)
            } else {
                Ok(Settings::default().expanded())
            }
        }
    }
}

/// Load and validate a JSONC catalog file.
pub fn load_catalog_file(path: &Path) -> Result<ServiceCatalog, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    Ok(ServiceCatalog::from_str(&content)?)
}

/// The catalog named by the settings (built-in if none), checked against
/// the configured filler service.
pub fn load_catalog(settings: &Settings) -> Result<ServiceCatalog, ConfigError> {
    let catalog = match &settings.catalog {
        Some(path) => load_catalog_file(path)?,
        None => ServiceCatalog::builtin(),
    };
    if let Some(filler) = &settings.filler_service {
        if catalog.get(filler).is_none() {
            return Err(ConfigError::UnknownFiller(filler.clone()));
        }
    }
    Ok(catalog)
}
