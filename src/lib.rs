//! # SmartElektra Tools - Modbus TCP commissioning client
//!
//! Reconfigure and test SmartElektra bus devices (relay and button
//! controllers) behind a Modbus TCP gateway: assign slave ids, switch button
//! mode and output level, drive the test output, and issue raw coil and
//! register operations.
//!
//! ## Features
//!
//! - **One connection per endpoint**: connect on demand, every request
//!   serialised through a single async lock
//! - **Distinct failures**: validation, connection and device exceptions
//!   are separate [`ClientError`] variants
//! - **Broadcast slave-id assignment**: failures on slave 0 are absorbed for
//!   [`services::assign_slave_id`] only
//! - **YAML configuration** of endpoints and firmware register maps
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Client |
//! |------|----------|--------|
//! | 0x01 | Read Coils | ✅ |
//! | 0x05 | Write Single Coil | ✅ |
//! | 0x06 | Write Single Register | ✅ |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use smartelektra_tools::{services, AssignSlaveId, ClientResult, Endpoint, ModbusClient};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> ClientResult<()> {
//!     let endpoint = Endpoint::new("192.168.1.50", 502, Duration::from_secs(5))?;
//!     let client = ModbusClient::new(endpoint);
//!
//!     // Every device on the segment answers as slave 12 afterwards
//!     let request = AssignSlaveId::broadcast(12)?;
//!     services::assign_slave_id(&client, &request).await?;
//!
//!     let coils = client.read_coils(0, 4, 12).await?;
//!     println!("Coils: {:?}", coils);
//!
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```

// ============================================================================
// Protocol core
// ============================================================================

/// Error types and range validation
pub mod error;

/// Modbus protocol constants
pub mod constants;

/// Stack-allocated PDU buffer and request builders
pub mod pdu;

/// Operations, responses and address ranges
pub mod protocol;

/// Slave-address parameter compatibility
pub mod compat;

/// TCP session: connection and MBAP framing
pub mod transport;

/// Serialising client facade
pub mod client;

// ============================================================================
// Commissioning
// ============================================================================

/// Validated high-level requests
pub mod services;

/// YAML endpoint configuration
pub mod config;

/// Per-endpoint device panel
pub mod tools;

/// Registry of configured endpoints
pub mod hub;

#[cfg(test)]
mod testing;

// ============================================================================
// Re-exports for convenience
// ============================================================================

pub use tokio;

// === Core client API ===
pub use client::ModbusClient;
pub use transport::{Endpoint, ModbusSession, TcpSession, TransportStats};

// === Error handling ===
pub use error::{check_range, ClientError, ClientResult, ValidRange};

// === Core types ===
pub use compat::{SlaveBinding, SlaveParam};
pub use protocol::{ExceptionCode, FunctionCode, ModbusResponse, Operation, SlaveId};

// === Commissioning ===
pub use config::{EndpointConfig, RegisterMap, ToolsConfig};
pub use hub::DeviceHub;
pub use services::{
    AssignOutcome, AssignSlaveId, ReadCoilsRequest, WriteCoilRequest, WriteRegisterRequest,
};
pub use tools::{ButtonMode, DeviceSettings, DeviceTools, NumberKey, OutputLevel};

// === Protocol limits ===
pub use constants::{BROADCAST_SLAVE, DEFAULT_UNIT_ID, MAX_READ_COILS, MAX_SLAVE};
pub use transport::{DEFAULT_TCP_PORT, DEFAULT_TIMEOUT};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!(
        "SmartElektra Tools v{} - Modbus TCP commissioning client",
        VERSION
    )
}
