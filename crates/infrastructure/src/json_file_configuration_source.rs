use std::collections::BTreeSet;
use std::path::Path;

use async_trait::async_trait;
use cascade_application::CascadeConfigurationSource;
use cascade_core::{AppError, AppResult};
use cascade_domain::CascadeConfiguration;
use serde::Deserialize;
use tracing::info;

/// Configuration source backed by a JSON document.
///
/// The document holds either one configuration object or an array of them.
/// Every configuration is validated when the document is loaded.
#[derive(Debug, Clone)]
pub struct JsonFileConfigurationSource {
    configurations: Vec<CascadeConfiguration>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ConfigurationDocument {
    Many(Vec<CascadeConfiguration>),
    One(Box<CascadeConfiguration>),
}

impl JsonFileConfigurationSource {
    /// Parses and validates a configuration document.
    pub fn from_json(document: &str) -> AppResult<Self> {
        let parsed: ConfigurationDocument = serde_json::from_str(document).map_err(|error| {
            AppError::Configuration(format!("invalid cascade configuration document: {error}"))
        })?;

        let configurations = match parsed {
            ConfigurationDocument::Many(configurations) => configurations,
            ConfigurationDocument::One(configuration) => vec![*configuration],
        };

        let mut seen_ids = BTreeSet::new();
        for configuration in &configurations {
            configuration.validate()?;
            if !seen_ids.insert(configuration.id.as_str()) {
                return Err(AppError::Conflict(format!(
                    "cascade configuration id '{}' is defined more than once",
                    configuration.id
                )));
            }
        }

        Ok(Self { configurations })
    }

    /// Reads, parses and validates a configuration document from disk.
    pub async fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let document = tokio::fs::read_to_string(path).await.map_err(|error| {
            AppError::Configuration(format!(
                "failed to read cascade configuration '{}': {error}",
                path.display()
            ))
        })?;

        let source = Self::from_json(document.as_str())?;
        info!(
            path = %path.display(),
            configuration_count = source.configurations.len(),
            "loaded cascade configurations"
        );

        Ok(source)
    }
}

#[async_trait]
impl CascadeConfigurationSource for JsonFileConfigurationSource {
    async fn list_configurations(&self) -> AppResult<Vec<CascadeConfiguration>> {
        Ok(self.configurations.clone())
    }
}
