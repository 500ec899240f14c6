//! Modbus PDU buffer
//!
//! Fixed-size stack array sized to the protocol maximum, so encoding a
//! request or holding a received response never allocates.

use tracing::debug;

use crate::constants::{
    COIL_OFF, COIL_ON, EXCEPTION_FLAG, FC_READ_COILS, FC_WRITE_SINGLE_COIL,
    FC_WRITE_SINGLE_REGISTER, MAX_PDU_SIZE,
};
use crate::error::{ClientError, ClientResult};

/// PDU with stack-allocated fixed array
#[derive(Debug, Clone)]
pub struct ModbusPdu {
    data: [u8; MAX_PDU_SIZE],
    len: usize,
}

impl ModbusPdu {
    /// Create an empty PDU
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0; MAX_PDU_SIZE],
            len: 0,
        }
    }

    /// Copy a received PDU out of a frame
    pub fn from_slice(data: &[u8]) -> ClientResult<Self> {
        if data.len() > MAX_PDU_SIZE {
            return Err(ClientError::protocol(
                "decode",
                format!("PDU too large: {} bytes (max {})", data.len(), MAX_PDU_SIZE),
            ));
        }

        let mut pdu = Self::new();
        pdu.data[..data.len()].copy_from_slice(data);
        pdu.len = data.len();

        match (pdu.function_code(), pdu.exception_code()) {
            (Some(fc), Some(exc)) => debug!(
                "PDU parsed: FC={:02X} ({}), exception_code={:02X}",
                fc,
                Self::function_code_description(fc),
                exc
            ),
            (Some(fc), None) => debug!(
                "PDU parsed: FC={:02X} ({}), data_len={}",
                fc,
                Self::function_code_description(fc),
                pdu.len - 1
            ),
            (None, _) => debug!("PDU parsed: empty PDU"),
        }

        Ok(pdu)
    }

    #[inline]
    pub fn push(&mut self, byte: u8) -> ClientResult<()> {
        if self.len >= MAX_PDU_SIZE {
            return Err(ClientError::protocol("encode", "PDU buffer full"));
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Push u16 in big-endian
    #[inline]
    pub fn push_u16(&mut self, value: u16) -> ClientResult<()> {
        for byte in value.to_be_bytes() {
            self.push(byte)?;
        }
        Ok(())
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Function code (first byte)
    #[inline]
    pub fn function_code(&self) -> Option<u8> {
        self.as_slice().first().copied()
    }

    #[inline]
    pub fn is_exception(&self) -> bool {
        self.function_code()
            .map(|fc| fc & EXCEPTION_FLAG != 0)
            .unwrap_or(false)
    }

    #[inline]
    pub fn exception_code(&self) -> Option<u8> {
        if self.is_exception() {
            self.as_slice().get(1).copied()
        } else {
            None
        }
    }

    /// Human-readable function code description
    pub fn function_code_description(fc: u8) -> &'static str {
        match fc & !EXCEPTION_FLAG {
            FC_READ_COILS => "Read Coils",
            FC_WRITE_SINGLE_COIL => "Write Single Coil",
            FC_WRITE_SINGLE_REGISTER => "Write Single Register",
            _ => "Unsupported Function",
        }
    }
}

impl Default for ModbusPdu {
    fn default() -> Self {
        Self::new()
    }
}

/// PDU builder - fluent API
pub struct PduBuilder {
    pdu: ModbusPdu,
}

impl Default for PduBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PduBuilder {
    #[inline]
    pub fn new() -> Self {
        Self {
            pdu: ModbusPdu::new(),
        }
    }

    #[inline]
    pub fn function_code(mut self, fc: u8) -> ClientResult<Self> {
        self.pdu.push(fc)?;
        Ok(self)
    }

    /// Append a big-endian word (address, quantity or value)
    #[inline]
    pub fn word(mut self, value: u16) -> ClientResult<Self> {
        self.pdu.push_u16(value)?;
        Ok(self)
    }

    pub fn build(self) -> ModbusPdu {
        if let Some(fc) = self.pdu.function_code() {
            debug!(
                "PDU built: FC={:02X} ({}), total_len={}",
                fc,
                ModbusPdu::function_code_description(fc),
                self.pdu.len()
            );
        }
        self.pdu
    }

    /// Read coils request (FC01)
    pub fn build_read_coils(start_address: u16, quantity: u16) -> ClientResult<ModbusPdu> {
        Ok(PduBuilder::new()
            .function_code(FC_READ_COILS)?
            .word(start_address)?
            .word(quantity)?
            .build())
    }

    /// Write single coil request (FC05); ON is sent as 0xFF00
    pub fn build_write_single_coil(address: u16, value: bool) -> ClientResult<ModbusPdu> {
        Ok(PduBuilder::new()
            .function_code(FC_WRITE_SINGLE_COIL)?
            .word(address)?
            .word(if value { COIL_ON } else { COIL_OFF })?
            .build())
    }

    /// Write single register request (FC06)
    pub fn build_write_single_register(address: u16, value: u16) -> ClientResult<ModbusPdu> {
        Ok(PduBuilder::new()
            .function_code(FC_WRITE_SINGLE_REGISTER)?
            .word(address)?
            .word(value)?
            .build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pdu_basic_operations() {
        let mut pdu = ModbusPdu::new();
        assert!(pdu.is_empty());

        pdu.push(0x01).unwrap();
        pdu.push_u16(0x0100).unwrap();
        pdu.push_u16(0x000A).unwrap();

        assert_eq!(pdu.len(), 5);
        assert_eq!(pdu.function_code(), Some(0x01));
        assert!(!pdu.is_exception());
        assert_eq!(pdu.as_slice(), &[0x01, 0x01, 0x00, 0x00, 0x0A]);
    }

    #[test]
    fn test_pdu_buffer_full() {
        let mut pdu = ModbusPdu::from_slice(&[0u8; MAX_PDU_SIZE]).unwrap();
        assert!(pdu.push(0).is_err());
        assert!(ModbusPdu::from_slice(&[0u8; MAX_PDU_SIZE + 1]).is_err());
    }

    #[test]
    fn test_exception_response() {
        let pdu = ModbusPdu::from_slice(&[0x85, 0x02]).unwrap();
        assert!(pdu.is_exception());
        assert_eq!(pdu.exception_code(), Some(0x02));
    }

    #[test]
    fn test_build_read_coils() {
        let pdu = PduBuilder::build_read_coils(0x0013, 0x0025).unwrap();
        assert_eq!(pdu.as_slice(), &[0x01, 0x00, 0x13, 0x00, 0x25]);
    }

    #[test]
    fn test_build_write_single_coil() {
        let on = PduBuilder::build_write_single_coil(0x00AC, true).unwrap();
        assert_eq!(on.as_slice(), &[0x05, 0x00, 0xAC, 0xFF, 0x00]);

        let off = PduBuilder::build_write_single_coil(0x00AC, false).unwrap();
        assert_eq!(off.as_slice(), &[0x05, 0x00, 0xAC, 0x00, 0x00]);
    }

    #[test]
    fn test_build_write_single_register() {
        let pdu = PduBuilder::build_write_single_register(0x0001, 0x0003).unwrap();
        assert_eq!(pdu.as_slice(), &[0x06, 0x00, 0x01, 0x00, 0x03]);
    }
}
