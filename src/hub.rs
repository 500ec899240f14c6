//! Registry of configured endpoints
//!
//! Each endpoint gets its own [`DeviceTools`], and with it its own client,
//! connection and lock. Endpoints never share state.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use crate::client::ModbusClient;
use crate::config::{EndpointConfig, ToolsConfig};
use crate::error::{ClientError, ClientResult};
use crate::tools::{DeviceSettings, DeviceTools};

struct HubEntry {
    unique_id: String,
    tools: Arc<DeviceTools>,
}

/// Named [`DeviceTools`] handles, one per `host:port`
#[derive(Default)]
pub struct DeviceHub {
    entries: BTreeMap<String, HubEntry>,
}

impl DeviceHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every endpoint of a validated configuration
    pub fn from_config(config: &ToolsConfig) -> ClientResult<Self> {
        let mut hub = Self::new();
        for endpoint in &config.endpoints {
            hub.add(endpoint)?;
        }
        Ok(hub)
    }

    /// Register one endpoint. A name or `host:port` already present is rejected.
    pub fn add(&mut self, config: &EndpointConfig) -> ClientResult<Arc<DeviceTools>> {
        let endpoint = config.to_endpoint()?;
        let unique_id = endpoint.to_string();

        if self.entries.contains_key(&config.name) {
            return Err(ClientError::configuration(format!(
                "Endpoint name '{}' is already registered",
                config.name
            )));
        }
        if self.entries.values().any(|e| e.unique_id == unique_id) {
            return Err(ClientError::configuration(format!(
                "Endpoint {} is already configured",
                unique_id
            )));
        }

        let tools = Arc::new(DeviceTools::new(
            ModbusClient::new(endpoint),
            DeviceSettings::from_register_map(&config.registers),
        ));
        info!("Registered endpoint '{}' at {}", config.name, unique_id);

        self.entries.insert(
            config.name.clone(),
            HubEntry {
                unique_id,
                tools: Arc::clone(&tools),
            },
        );
        Ok(tools)
    }

    pub fn get(&self, name: &str) -> Option<Arc<DeviceTools>> {
        self.entries.get(name).map(|e| Arc::clone(&e.tools))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Unregister `name` and release its connection
    pub async fn remove(&mut self, name: &str) -> bool {
        match self.entries.remove(name) {
            Some(entry) => {
                entry.tools.shutdown().await;
                info!("Removed endpoint '{}' at {}", name, entry.unique_id);
                true
            }
            None => false,
        }
    }

    pub async fn shutdown_all(&self) {
        for entry in self.entries.values() {
            entry.tools.shutdown().await;
        }
    }
}
