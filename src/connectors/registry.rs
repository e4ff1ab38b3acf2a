//! Connector registry
//!
//! Maps each [`SourceKind`] to the connector that can talk to it. Sources
//! without a registered connector are listed in the catalog but cannot be
//! synced or connected through OAuth.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::AppConfig;
use crate::connectors::google_business::{GoogleBusinessConnector, GoogleBusinessSettings};
use crate::connectors::metadata::SourceKind;
use crate::connectors::trait_::ReviewConnector;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("no connector registered for '{kind}'")]
    ConnectorNotFound { kind: SourceKind },
}

#[derive(Clone, Default)]
pub struct Registry {
    connectors: HashMap<SourceKind, Arc<dyn ReviewConnector>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the registry for a deployment; unconfigured providers are skipped.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut registry = Self::new();

        match GoogleBusinessSettings::from_config(config) {
            Some(settings) => match GoogleBusinessConnector::new(settings) {
                Ok(connector) => {
                    registry.register(Arc::new(connector));
                    info!("Google Business connector registered");
                }
                Err(err) => warn!(error = %err, "Google Business connector not registered"),
            },
            None => warn!("Google Business connector not registered: missing Google client credentials"),
        }

        registry
    }

    pub fn register(&mut self, connector: Arc<dyn ReviewConnector>) {
        self.connectors.insert(connector.kind(), connector);
    }

    pub fn get(&self, kind: SourceKind) -> Result<Arc<dyn ReviewConnector>, RegistryError> {
        self.connectors
            .get(&kind)
            .cloned()
            .ok_or(RegistryError::ConnectorNotFound { kind })
    }

    pub fn contains(&self, kind: SourceKind) -> bool {
        self.connectors.contains_key(&kind)
    }

    /// Registered kinds, in catalog order.
    pub fn kinds(&self) -> Vec<SourceKind> {
        SourceKind::ALL
            .into_iter()
            .filter(|kind| self.connectors.contains_key(kind))
            .collect()
    }
}
