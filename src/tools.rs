//! Device commissioning panel
//!
//! [`DeviceTools`] bundles one endpoint's client with the operator's current
//! parameters ([`DeviceSettings`]): which slave to address, which id to
//! assign, where the firmware keeps its registers and the last known option
//! values. Options are only recorded after the device accepted the write.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::client::ModbusClient;
use crate::config::RegisterMap;
use crate::constants::BROADCAST_SLAVE;
use crate::error::{check_range, ClientError, ClientResult, ValidRange};
use crate::protocol::{SlaveId, ADDRESS_RANGE, SLAVE_RANGE, UNICAST_SLAVE_RANGE};
use crate::services::{assign_slave_id, AssignOutcome, AssignSlaveId};
use crate::transport::{ModbusSession, TcpSession};

/// Button wiring mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ButtonMode {
    #[default]
    Mono,
    Bi,
}

/// Output drive level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputLevel {
    Low,
    #[default]
    High,
}

impl ButtonMode {
    pub const OPTIONS: [&'static str; 2] = ["mono", "bi"];

    /// Value written to the button-mode register
    pub fn register_value(self) -> u16 {
        match self {
            Self::Mono => 0,
            Self::Bi => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mono => "mono",
            Self::Bi => "bi",
        }
    }
}

impl OutputLevel {
    pub const OPTIONS: [&'static str; 2] = ["low", "high"];

    /// Value written to the output-level register
    pub fn register_value(self) -> u16 {
        match self {
            Self::Low => 0,
            Self::High => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::High => "high",
        }
    }
}

impl FromStr for ButtonMode {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mono" => Ok(Self::Mono),
            "bi" => Ok(Self::Bi),
            _ => Err(ClientError::invalid_option("button_mode", &Self::OPTIONS, s)),
        }
    }
}

impl FromStr for OutputLevel {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "high" => Ok(Self::High),
            _ => Err(ClientError::invalid_option("output_level", &Self::OPTIONS, s)),
        }
    }
}

impl fmt::Display for ButtonMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for OutputLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Numeric parameters an operator can edit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumberKey {
    TargetSlave,
    NewSlave,
    HrNewSlave,
    HrButtonMode,
    HrOutputLevel,
    CoilTestOutput,
}

impl NumberKey {
    pub const ALL: [NumberKey; 6] = [
        NumberKey::TargetSlave,
        NumberKey::NewSlave,
        NumberKey::HrNewSlave,
        NumberKey::HrButtonMode,
        NumberKey::HrOutputLevel,
        NumberKey::CoilTestOutput,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::TargetSlave => "target_slave",
            Self::NewSlave => "new_slave",
            Self::HrNewSlave => "hr_new_slave",
            Self::HrButtonMode => "hr_button_mode",
            Self::HrOutputLevel => "hr_output_level",
            Self::CoilTestOutput => "coil_test_output",
        }
    }

    pub fn range(self) -> ValidRange {
        match self {
            Self::TargetSlave => SLAVE_RANGE,
            Self::NewSlave => UNICAST_SLAVE_RANGE,
            _ => ADDRESS_RANGE,
        }
    }
}

impl FromStr for NumberKey {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|key| key.name() == s.trim())
            .ok_or_else(|| ClientError::configuration(format!("Unknown setting '{}'", s)))
    }
}

/// Operator parameters of one endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub target_slave: SlaveId,
    pub new_slave: SlaveId,
    pub hr_new_slave: u16,
    pub hr_button_mode: u16,
    pub hr_output_level: u16,
    pub coil_test_output: u16,
    pub button_mode: ButtonMode,
    pub output_level: OutputLevel,
    pub test_output: bool,
}

impl DeviceSettings {
    pub fn from_register_map(map: &RegisterMap) -> Self {
        Self {
            target_slave: BROADCAST_SLAVE,
            new_slave: 1,
            hr_new_slave: map.new_slave,
            hr_button_mode: map.button_mode,
            hr_output_level: map.output_level,
            coil_test_output: map.test_output,
            button_mode: ButtonMode::default(),
            output_level: OutputLevel::default(),
            test_output: false,
        }
    }

    pub fn number(&self, key: NumberKey) -> u16 {
        match key {
            NumberKey::TargetSlave => self.target_slave as u16,
            NumberKey::NewSlave => self.new_slave as u16,
            NumberKey::HrNewSlave => self.hr_new_slave,
            NumberKey::HrButtonMode => self.hr_button_mode,
            NumberKey::HrOutputLevel => self.hr_output_level,
            NumberKey::CoilTestOutput => self.coil_test_output,
        }
    }

    /// Range-checked update of one numeric setting
    pub fn set_number(&mut self, key: NumberKey, value: i64) -> ClientResult<()> {
        let value = check_range(key.name(), value, key.range())?;
        match key {
            NumberKey::TargetSlave => self.target_slave = value as SlaveId,
            NumberKey::NewSlave => self.new_slave = value as SlaveId,
            NumberKey::HrNewSlave => self.hr_new_slave = value as u16,
            NumberKey::HrButtonMode => self.hr_button_mode = value as u16,
            NumberKey::HrOutputLevel => self.hr_output_level = value as u16,
            NumberKey::CoilTestOutput => self.coil_test_output = value as u16,
        }
        Ok(())
    }

    /// Target slave, refusing broadcast for read-back and option writes
    fn unicast_target(&self) -> ClientResult<SlaveId> {
        if self.target_slave == BROADCAST_SLAVE {
            return Err(ClientError::validation(
                "target_slave",
                UNICAST_SLAVE_RANGE,
                self.target_slave as i64,
            ));
        }
        Ok(self.target_slave)
    }
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self::from_register_map(&RegisterMap::default())
    }
}

/// Commissioning panel for one endpoint
pub struct DeviceTools<S: ModbusSession = TcpSession> {
    client: ModbusClient<S>,
    settings: RwLock<DeviceSettings>,
}

impl<S: ModbusSession> DeviceTools<S> {
    pub fn new(client: ModbusClient<S>, settings: DeviceSettings) -> Self {
        Self {
            client,
            settings: RwLock::new(settings),
        }
    }

    pub fn client(&self) -> &ModbusClient<S> {
        &self.client
    }

    /// Snapshot of the current settings
    pub async fn settings(&self) -> DeviceSettings {
        *self.settings.read().await
    }

    /// Replace all settings, e.g. when restoring persisted state
    pub async fn restore(&self, settings: DeviceSettings) {
        *self.settings.write().await = settings;
    }

    pub async fn set_number(&self, key: NumberKey, value: i64) -> ClientResult<()> {
        self.settings.write().await.set_number(key, value)
    }

    /// Write the configured new slave id to the configured target
    pub async fn apply_new_slave(&self) -> ClientResult<AssignOutcome> {
        let settings = self.settings().await;
        let request = AssignSlaveId::new(
            settings.new_slave as i64,
            settings.target_slave as i64,
            settings.hr_new_slave as i64,
        )?;
        assign_slave_id(&self.client, &request).await
    }

    pub async fn select_button_mode(&self, mode: ButtonMode) -> ClientResult<()> {
        let settings = self.settings().await;
        let slave = settings.unicast_target()?;
        self.client
            .write_register(settings.hr_button_mode, mode.register_value(), slave)
            .await?;
        self.settings.write().await.button_mode = mode;
        Ok(())
    }

    pub async fn select_output_level(&self, level: OutputLevel) -> ClientResult<()> {
        let settings = self.settings().await;
        let slave = settings.unicast_target()?;
        self.client
            .write_register(settings.hr_output_level, level.register_value(), slave)
            .await?;
        self.settings.write().await.output_level = level;
        Ok(())
    }

    pub async fn set_test_output(&self, on: bool) -> ClientResult<()> {
        let settings = self.settings().await;
        let slave = settings.unicast_target()?;
        self.client
            .write_coil(settings.coil_test_output, on, slave)
            .await?;
        self.settings.write().await.test_output = on;
        Ok(())
    }

    /// Read the test coil back from the device
    pub async fn refresh_test_output(&self) -> ClientResult<bool> {
        let settings = self.settings().await;
        let slave = settings.unicast_target()?;
        let bits = self
            .client
            .read_coils(settings.coil_test_output, 1, slave)
            .await?;
        let on = bits.first().copied().unwrap_or(false);
        self.settings.write().await.test_output = on;
        Ok(on)
    }

    pub async fn shutdown(&self) {
        self.client.shutdown().await;
    }
}
