//! Modbus protocol constants and device address ranges
//!
//! Frame sizes follow the Modbus Application Protocol specification; the
//! address ranges follow the serial-line addressing rules that Modbus TCP
//! gateways inherit (0 = broadcast, 1-247 = individual devices).

// ============================================================================
// Frame Size Constants
// ============================================================================

/// Modbus MBAP header length for TCP
/// Format: Transaction ID(2) + Protocol ID(2) + Length(2)
/// The Unit ID that follows is counted in the Length field
pub const MBAP_HEADER_LEN: usize = 6;

/// Protocol identifier carried in every MBAP header
pub const MODBUS_PROTOCOL_ID: u16 = 0;

/// Maximum PDU (Protocol Data Unit) size per Modbus specification
/// RS485 ADU (256 bytes) - Slave Address (1 byte) - CRC (2 bytes) = 253 bytes
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum MBAP length field value (Unit ID + PDU)
pub const MAX_MBAP_LENGTH: usize = 1 + MAX_PDU_SIZE;

// ============================================================================
// Coil Operation Limits
// ============================================================================

/// Maximum number of coils for FC01 (Read Coils)
///
/// Response PDU: Function Code (1) + Byte Count (1) + ceil(N / 8) ≤ 253,
/// which allows 2008; the specification rounds this down to 2000.
pub const MAX_READ_COILS: u16 = 2000;

/// Wire value of an ON coil in FC05
pub const COIL_ON: u16 = 0xFF00;

/// Wire value of an OFF coil in FC05
pub const COIL_OFF: u16 = 0x0000;

// ============================================================================
// Modbus Function Codes
// ============================================================================

/// Read Coils (FC01)
pub const FC_READ_COILS: u8 = 0x01;

/// Write Single Coil (FC05)
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;

/// Write Single Register (FC06)
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;

/// Bit set on the function code of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

// ============================================================================
// Modbus Exception Codes
// ============================================================================

/// Illegal Function
pub const EXCEPTION_ILLEGAL_FUNCTION: u8 = 0x01;

/// Illegal Data Address
pub const EXCEPTION_ILLEGAL_DATA_ADDRESS: u8 = 0x02;

/// Illegal Data Value
pub const EXCEPTION_ILLEGAL_DATA_VALUE: u8 = 0x03;

/// Server Device Failure
pub const EXCEPTION_SERVER_DEVICE_FAILURE: u8 = 0x04;

/// Acknowledge
pub const EXCEPTION_ACKNOWLEDGE: u8 = 0x05;

/// Server Device Busy
pub const EXCEPTION_SERVER_DEVICE_BUSY: u8 = 0x06;

/// Memory Parity Error
pub const EXCEPTION_MEMORY_PARITY_ERROR: u8 = 0x08;

/// Gateway Path Unavailable
pub const EXCEPTION_GATEWAY_PATH_UNAVAILABLE: u8 = 0x0A;

/// Gateway Target Device Failed to Respond
pub const EXCEPTION_GATEWAY_TARGET_FAILED: u8 = 0x0B;

// ============================================================================
// Device Addressing
// ============================================================================

/// Slave address 0 addresses every device on the segment
pub const BROADCAST_SLAVE: u8 = 0;

/// Lowest individually addressable slave
pub const MIN_UNICAST_SLAVE: u8 = 1;

/// Highest individually addressable slave
pub const MAX_SLAVE: u8 = 247;

/// Unit id used when the caller's slave keyword cannot be bound
pub const DEFAULT_UNIT_ID: u8 = 1;
