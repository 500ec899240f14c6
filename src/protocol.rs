//! Modbus request/response model for the three supported operations
//!
//! Requests are built per call and never persisted. A response is either a
//! successful payload or an exception that the device reported; both are
//! values, so the client decides how to classify them.

use std::fmt;

use crate::constants::{
    BROADCAST_SLAVE, COIL_OFF, COIL_ON, EXCEPTION_ACKNOWLEDGE, EXCEPTION_FLAG,
    EXCEPTION_GATEWAY_PATH_UNAVAILABLE, EXCEPTION_GATEWAY_TARGET_FAILED,
    EXCEPTION_ILLEGAL_DATA_ADDRESS, EXCEPTION_ILLEGAL_DATA_VALUE, EXCEPTION_ILLEGAL_FUNCTION,
    EXCEPTION_MEMORY_PARITY_ERROR, EXCEPTION_SERVER_DEVICE_BUSY, EXCEPTION_SERVER_DEVICE_FAILURE,
    FC_READ_COILS, FC_WRITE_SINGLE_COIL, FC_WRITE_SINGLE_REGISTER, MAX_READ_COILS, MAX_SLAVE,
    MIN_UNICAST_SLAVE,
};
use crate::error::{ClientError, ClientResult, ValidRange};
use crate::pdu::{ModbusPdu, PduBuilder};

/// Modbus slave/unit identifier (0 = broadcast, 1-247)
pub type SlaveId = u8;

/// Any slave address, broadcast included
pub const SLAVE_RANGE: ValidRange = ValidRange::new(BROADCAST_SLAVE as i64, MAX_SLAVE as i64);

/// Individually addressable slaves only
pub const UNICAST_SLAVE_RANGE: ValidRange = ValidRange::new(MIN_UNICAST_SLAVE as i64, MAX_SLAVE as i64);

/// Coil or register address
pub const ADDRESS_RANGE: ValidRange = ValidRange::new(0, u16::MAX as i64);

/// Holding register value
pub const REGISTER_VALUE_RANGE: ValidRange = ValidRange::new(0, u16::MAX as i64);

/// Coil count for a single FC01 request
pub const COIL_COUNT_RANGE: ValidRange = ValidRange::new(1, MAX_READ_COILS as i64);

/// Supported function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FunctionCode {
    /// Read Coils (0x01)
    ReadCoils = FC_READ_COILS,
    /// Write Single Coil (0x05)
    WriteSingleCoil = FC_WRITE_SINGLE_COIL,
    /// Write Single Register (0x06)
    WriteSingleRegister = FC_WRITE_SINGLE_REGISTER,
}

impl FunctionCode {
    /// Convert from the wire byte, exception flag stripped
    pub fn from_u8(value: u8) -> Option<Self> {
        match value & !EXCEPTION_FLAG {
            FC_READ_COILS => Some(Self::ReadCoils),
            FC_WRITE_SINGLE_COIL => Some(Self::WriteSingleCoil),
            FC_WRITE_SINGLE_REGISTER => Some(Self::WriteSingleRegister),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Operation name used in error messages and logs
    pub fn operation_name(self) -> &'static str {
        match self {
            Self::ReadCoils => "read_coils",
            Self::WriteSingleCoil => "write_coil",
            Self::WriteSingleRegister => "write_register",
        }
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReadCoils => "Read Coils",
            Self::WriteSingleCoil => "Write Single Coil",
            Self::WriteSingleRegister => "Write Single Register",
        };
        write!(f, "{} (0x{:02X})", name, self.to_u8())
    }
}

/// Modbus exception codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionCode {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    ServerDeviceFailure,
    Acknowledge,
    ServerDeviceBusy,
    MemoryParityError,
    GatewayPathUnavailable,
    GatewayTargetFailedToRespond,
    /// Code outside the published table
    Other(u8),
}

impl ExceptionCode {
    pub fn from_u8(code: u8) -> Self {
        match code {
            EXCEPTION_ILLEGAL_FUNCTION => Self::IllegalFunction,
            EXCEPTION_ILLEGAL_DATA_ADDRESS => Self::IllegalDataAddress,
            EXCEPTION_ILLEGAL_DATA_VALUE => Self::IllegalDataValue,
            EXCEPTION_SERVER_DEVICE_FAILURE => Self::ServerDeviceFailure,
            EXCEPTION_ACKNOWLEDGE => Self::Acknowledge,
            EXCEPTION_SERVER_DEVICE_BUSY => Self::ServerDeviceBusy,
            EXCEPTION_MEMORY_PARITY_ERROR => Self::MemoryParityError,
            EXCEPTION_GATEWAY_PATH_UNAVAILABLE => Self::GatewayPathUnavailable,
            EXCEPTION_GATEWAY_TARGET_FAILED => Self::GatewayTargetFailedToRespond,
            other => Self::Other(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Self::IllegalFunction => EXCEPTION_ILLEGAL_FUNCTION,
            Self::IllegalDataAddress => EXCEPTION_ILLEGAL_DATA_ADDRESS,
            Self::IllegalDataValue => EXCEPTION_ILLEGAL_DATA_VALUE,
            Self::ServerDeviceFailure => EXCEPTION_SERVER_DEVICE_FAILURE,
            Self::Acknowledge => EXCEPTION_ACKNOWLEDGE,
            Self::ServerDeviceBusy => EXCEPTION_SERVER_DEVICE_BUSY,
            Self::MemoryParityError => EXCEPTION_MEMORY_PARITY_ERROR,
            Self::GatewayPathUnavailable => EXCEPTION_GATEWAY_PATH_UNAVAILABLE,
            Self::GatewayTargetFailedToRespond => EXCEPTION_GATEWAY_TARGET_FAILED,
            Self::Other(code) => code,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::IllegalFunction => "illegal function",
            Self::IllegalDataAddress => "illegal data address",
            Self::IllegalDataValue => "illegal data value",
            Self::ServerDeviceFailure => "server device failure",
            Self::Acknowledge => "acknowledge",
            Self::ServerDeviceBusy => "server device busy",
            Self::MemoryParityError => "memory parity error",
            Self::GatewayPathUnavailable => "gateway path unavailable",
            Self::GatewayTargetFailedToRespond => "gateway target device failed to respond",
            Self::Other(_) => "unknown exception",
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.description(), self.to_u8())
    }
}

/// The operation part of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ReadCoils { address: u16, count: u16 },
    WriteCoil { address: u16, value: bool },
    WriteRegister { address: u16, value: u16 },
}

impl Operation {
    pub fn function(&self) -> FunctionCode {
        match self {
            Self::ReadCoils { .. } => FunctionCode::ReadCoils,
            Self::WriteCoil { .. } => FunctionCode::WriteSingleCoil,
            Self::WriteRegister { .. } => FunctionCode::WriteSingleRegister,
        }
    }

    /// Encode as a request PDU
    pub fn to_pdu(&self) -> ClientResult<ModbusPdu> {
        match *self {
            Self::ReadCoils { address, count } => PduBuilder::build_read_coils(address, count),
            Self::WriteCoil { address, value } => {
                PduBuilder::build_write_single_coil(address, value)
            }
            Self::WriteRegister { address, value } => {
                PduBuilder::build_write_single_register(address, value)
            }
        }
    }
}

/// A request addressed to one slave (or to all, for slave 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationRequest {
    pub slave: SlaveId,
    pub operation: Operation,
}

impl OperationRequest {
    pub fn new(slave: SlaveId, operation: Operation) -> Self {
        Self { slave, operation }
    }

    pub fn is_broadcast(&self) -> bool {
        self.slave == BROADCAST_SLAVE
    }
}

/// A response PDU received from the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModbusResponse {
    /// FC01 payload, every bit of every returned byte
    Coils(Vec<bool>),
    /// FC05/FC06 echo of the written address and wire value
    Ack {
        function: FunctionCode,
        address: u16,
        value: u16,
    },
    /// The device rejected the request
    Exception {
        function: FunctionCode,
        code: ExceptionCode,
    },
}

impl ModbusResponse {
    /// Whether the response encodes a device/protocol fault
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Exception { .. })
    }

    pub fn description(&self) -> String {
        match self {
            Self::Coils(bits) => format!("{} coil bits", bits.len()),
            Self::Ack {
                function,
                address,
                value,
            } => format!("{} ack address={} value=0x{:04X}", function, address, value),
            Self::Exception { function, code } => {
                format!("{} exception: {}", function, code)
            }
        }
    }

    /// Decode a response PDU against the operation that was sent.
    ///
    /// A PDU that does not belong to `operation` (wrong function, short payload,
    /// mismatched echo) is a protocol error: the stream is no longer trustworthy.
    pub fn from_pdu(operation: &Operation, pdu: &ModbusPdu) -> ClientResult<Self> {
        let expected = operation.function();
        let op_name = expected.operation_name();
        let fc = pdu
            .function_code()
            .ok_or_else(|| ClientError::protocol(op_name, "empty response PDU"))?;

        if fc & !EXCEPTION_FLAG != expected.to_u8() {
            return Err(ClientError::protocol(
                op_name,
                format!(
                    "function code mismatch: sent 0x{:02X}, received 0x{:02X}",
                    expected.to_u8(),
                    fc
                ),
            ));
        }

        if pdu.is_exception() {
            let code = pdu
                .exception_code()
                .ok_or_else(|| ClientError::protocol(op_name, "truncated exception response"))?;
            return Ok(Self::Exception {
                function: expected,
                code: ExceptionCode::from_u8(code),
            });
        }

        let body = &pdu.as_slice()[1..];
        match *operation {
            Operation::ReadCoils { .. } => {
                let (&byte_count, payload) = body
                    .split_first()
                    .ok_or_else(|| ClientError::protocol(op_name, "missing byte count"))?;
                if payload.len() != byte_count as usize {
                    return Err(ClientError::protocol(
                        op_name,
                        format!(
                            "byte count {} does not match payload length {}",
                            byte_count,
                            payload.len()
                        ),
                    ));
                }
                Ok(Self::Coils(unpack_bits(payload)))
            }
            Operation::WriteCoil { address, value } => {
                let wire = if value { COIL_ON } else { COIL_OFF };
                Self::parse_echo(expected, body, address, wire)
            }
            Operation::WriteRegister { address, value } => {
                Self::parse_echo(expected, body, address, value)
            }
        }
    }

    fn parse_echo(
        function: FunctionCode,
        body: &[u8],
        address: u16,
        value: u16,
    ) -> ClientResult<Self> {
        let op_name = function.operation_name();
        if body.len() != 4 {
            return Err(ClientError::protocol(
                op_name,
                format!("echo must be 4 bytes, got {}", body.len()),
            ));
        }
        let echoed_address = u16::from_be_bytes([body[0], body[1]]);
        let echoed_value = u16::from_be_bytes([body[2], body[3]]);
        if echoed_address != address || echoed_value != value {
            return Err(ClientError::protocol(
                op_name,
                format!(
                    "echo mismatch: sent {}=0x{:04X}, received {}=0x{:04X}",
                    address, value, echoed_address, echoed_value
                ),
            ));
        }
        Ok(Self::Ack {
            function,
            address,
            value,
        })
    }
}

/// Unpack coil bytes, LSB of the first byte is the first coil
pub fn unpack_bits(bytes: &[u8]) -> Vec<bool> {
    bytes
        .iter()
        .flat_map(|&byte| (0..8).map(move |bit| byte & (1 << bit) != 0))
        .collect()
}
