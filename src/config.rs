//! YAML configuration for endpoints and their register maps
//!
//! ```yaml
//! endpoints:
//!   - name: hall
//!     host: 192.168.1.50
//!     port: 502
//!     timeout: 2.5
//!     registers:
//!       button_mode: 11
//! ```
//!
//! Everything except `name` and `host` has a default.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};
use crate::transport::{Endpoint, DEFAULT_TCP_PORT};

fn default_port() -> u16 {
    DEFAULT_TCP_PORT
}

fn default_timeout() -> f64 {
    5.0
}

fn default_hr_button_mode() -> u16 {
    1
}

fn default_hr_output_level() -> u16 {
    2
}

/// Firmware register layout of the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterMap {
    /// Holding register receiving the new slave id
    #[serde(default)]
    pub new_slave: u16,

    /// Holding register for the button mode (0 mono, 1 bi)
    #[serde(default = "default_hr_button_mode")]
    pub button_mode: u16,

    /// Holding register for the output level (0 low, 1 high)
    #[serde(default = "default_hr_output_level")]
    pub output_level: u16,

    /// Coil driving the test output
    #[serde(default)]
    pub test_output: u16,
}

impl Default for RegisterMap {
    fn default() -> Self {
        Self {
            new_slave: 0,
            button_mode: default_hr_button_mode(),
            output_level: default_hr_output_level(),
            test_output: 0,
        }
    }
}

/// One Modbus TCP endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub name: String,
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Response timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: f64,

    #[serde(default)]
    pub registers: RegisterMap,
}

impl EndpointConfig {
    pub fn new<N: Into<String>, H: Into<String>>(name: N, host: H) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port: default_port(),
            timeout: default_timeout(),
            registers: RegisterMap::default(),
        }
    }

    /// Validated endpoint; the host is trimmed
    pub fn to_endpoint(&self) -> ClientResult<Endpoint> {
        Endpoint::with_timeout_secs(self.host.as_str(), self.port, self.timeout)
    }

    /// `host:port` identity used for duplicate detection
    pub fn unique_id(&self) -> String {
        format!("{}:{}", self.host.trim(), self.port)
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

impl ToolsConfig {
    /// Load and validate a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> ClientResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ClientError::configuration(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> ClientResult<Self> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml_string(&self) -> ClientResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> ClientResult<()> {
        let mut names = HashSet::new();
        let mut ids = HashSet::new();

        for endpoint in &self.endpoints {
            if endpoint.name.trim().is_empty() {
                return Err(ClientError::configuration("Endpoint name must not be empty"));
            }
            endpoint.to_endpoint().map_err(|e| {
                ClientError::configuration(format!("Endpoint '{}': {}", endpoint.name, e))
            })?;
            if !names.insert(endpoint.name.as_str()) {
                return Err(ClientError::configuration(format!(
                    "Duplicate endpoint name '{}'",
                    endpoint.name
                )));
            }
            if !ids.insert(endpoint.unique_id()) {
                return Err(ClientError::configuration(format!(
                    "Endpoint {} is already configured",
                    endpoint.unique_id()
                )));
            }
        }
        Ok(())
    }

    pub fn endpoint(&self, name: &str) -> Option<&EndpointConfig> {
        self.endpoints.iter().find(|e| e.name == name)
    }
}
