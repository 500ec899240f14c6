//! Modbus TCP transport session
//!
//! A session owns at most one TCP connection to one [`Endpoint`] and performs
//! the raw request/response exchange for the three supported operations.
//! It does no locking and no classification: a call returns
//!
//! * `Ok(Some(response))` - a response arrived (possibly an exception),
//! * `Ok(None)` - nothing arrived within the endpoint timeout,
//! * `Err(..)` - the transport failed or the reply was not a valid frame.
//!
//! Serialisation and classification are done by [`crate::client::ModbusClient`].
//!
//! ## Frame layout
//!
//! ```text
//! | Transaction ID (2) | Protocol ID (2) | Length (2) | Unit ID (1) | PDU (N) |
//! ```

use std::fmt;
use std::future::Future;
use std::io;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::compat::{SlaveBinding, SlaveParam};
use crate::constants::{DEFAULT_UNIT_ID, MAX_MBAP_LENGTH, MBAP_HEADER_LEN, MODBUS_PROTOCOL_ID};
use crate::error::{ClientError, ClientResult};
use crate::pdu::ModbusPdu;
use crate::protocol::{FunctionCode, ModbusResponse, Operation, SlaveId};

/// Modbus TCP default port
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Default request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Network target of a session. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
    timeout: Duration,
}

impl Endpoint {
    /// Build an endpoint; the host is trimmed, port 0 and a zero timeout are rejected.
    pub fn new<S: Into<String>>(host: S, port: u16, timeout: Duration) -> ClientResult<Self> {
        let host = host.into().trim().to_string();
        if host.is_empty() {
            return Err(ClientError::configuration("host must not be empty"));
        }
        if port == 0 {
            return Err(ClientError::configuration("port must be in range 1..=65535"));
        }
        if timeout.is_zero() {
            return Err(ClientError::configuration("timeout must be positive"));
        }
        Ok(Self {
            host,
            port,
            timeout,
        })
    }

    /// Build an endpoint from a timeout in (fractional) seconds
    pub fn with_timeout_secs<S: Into<String>>(
        host: S,
        port: u16,
        timeout_secs: f64,
    ) -> ClientResult<Self> {
        if !timeout_secs.is_finite() || timeout_secs <= 0.0 {
            return Err(ClientError::configuration(format!(
                "timeout must be a positive number of seconds (got {})",
                timeout_secs
            )));
        }
        let timeout = Duration::try_from_secs_f64(timeout_secs).map_err(|e| {
            ClientError::configuration(format!("timeout {} out of range: {}", timeout_secs, e))
        })?;
        Self::new(host, port, timeout)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Transport layer statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Raw protocol I/O against one endpoint.
///
/// Implementations must not classify responses: exceptions come back as
/// `Ok(Some(..))`, silence as `Ok(None)`.
pub trait ModbusSession: Send {
    /// Establish the connection if it is not already open. Idempotent.
    fn connect(&mut self) -> impl Future<Output = ClientResult<()>> + Send;

    /// Release the connection. Never fails.
    fn close(&mut self) -> impl Future<Output = ()> + Send;

    fn is_connected(&self) -> bool;

    /// Slave keyword names the call for `function` accepts
    fn slave_params(&self, function: FunctionCode) -> &'static [SlaveParam];

    /// Read coils (FC01)
    fn read_coils(
        &mut self,
        address: u16,
        count: u16,
        binding: SlaveBinding,
    ) -> impl Future<Output = ClientResult<Option<ModbusResponse>>> + Send;

    /// Write single coil (FC05)
    fn write_coil(
        &mut self,
        address: u16,
        value: bool,
        binding: SlaveBinding,
    ) -> impl Future<Output = ClientResult<Option<ModbusResponse>>> + Send;

    /// Write single register (FC06)
    fn write_register(
        &mut self,
        address: u16,
        value: u16,
        binding: SlaveBinding,
    ) -> impl Future<Output = ClientResult<Option<ModbusResponse>>> + Send;

    fn stats(&self) -> TransportStats {
        TransportStats::default()
    }
}

/// Format raw bytes as hex string for packet logging
fn format_hex_packet(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

fn log_packet(direction: &str, data: &[u8], unit: SlaveId) {
    info!("[MODBUS-TCP] {} unit:{} {}", direction, unit, format_hex_packet(data));
}

/// Modbus TCP session over a tokio socket
pub struct TcpSession {
    endpoint: Endpoint,
    stream: Option<TcpStream>,
    transaction_id: u16,
    default_unit: SlaveId,
    stats: TransportStats,
    packet_logging: bool,
    // Set while a request is on the wire; still set on entry means the
    // caller was dropped before the reply was read.
    in_flight: bool,
}

impl TcpSession {
    /// Create a session; nothing is connected until the first request.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            stream: None,
            transaction_id: 0,
            default_unit: DEFAULT_UNIT_ID,
            stats: TransportStats::default(),
            packet_logging: false,
            in_flight: false,
        }
    }

    /// Unit id used when a call leaves the slave unbound
    pub fn with_default_unit(mut self, unit: SlaveId) -> Self {
        self.default_unit = unit;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Enable or disable hex dumps of every frame
    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.packet_logging = enabled;
    }

    fn next_transaction_id(&mut self) -> u16 {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        if self.transaction_id == 0 {
            self.transaction_id = 1;
        }
        self.transaction_id
    }

    async fn transact(
        &mut self,
        operation: Operation,
        binding: SlaveBinding,
    ) -> ClientResult<Option<ModbusResponse>> {
        let op_name = operation.function().operation_name();
        let unit = binding.unit_id(self.default_unit);
        let transaction_id = self.next_transaction_id();
        let frame = encode_frame(transaction_id, unit, &operation.to_pdu()?);
        let limit = self.endpoint.timeout;

        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ClientError::connection(format!("not connected to {}", self.endpoint)))?;

        if self.packet_logging {
            log_packet("send", &frame, unit);
        }
        self.stats.requests_sent += 1;
        self.stats.bytes_sent += frame.len() as u64;

        self.in_flight = true;
        let outcome = exchange(stream, &frame, limit).await;
        self.in_flight = false;

        let response = match outcome {
            Ok(Some(response)) => response,
            Ok(None) => {
                self.stats.timeouts += 1;
                debug!(
                    "No response from {} unit {} within {:?} ({})",
                    self.endpoint, unit, limit, op_name
                );
                return Ok(None);
            }
            Err(e) => {
                self.stats.errors += 1;
                self.stream = None;
                return Err(if e.kind() == io::ErrorKind::InvalidData {
                    ClientError::protocol(op_name, e.to_string())
                } else {
                    ClientError::connection(format!("{} to {} failed: {}", op_name, self.endpoint, e))
                });
            }
        };

        self.stats.responses_received += 1;
        self.stats.bytes_received += response.len() as u64;
        if self.packet_logging {
            log_packet("receive", &response, unit);
        }

        match decode_frame(&response, transaction_id, &operation) {
            Ok(decoded) => Ok(Some(decoded)),
            Err(e) => {
                self.stats.errors += 1;
                self.stream = None;
                Err(e)
            }
        }
    }
}

impl ModbusSession for TcpSession {
    async fn connect(&mut self) -> ClientResult<()> {
        if self.stream.is_some() {
            if !self.in_flight {
                return Ok(());
            }
            debug!(
                "Previous request to {} was abandoned mid-flight, reconnecting",
                self.endpoint
            );
            self.stream = None;
            self.in_flight = false;
        }

        let target = (self.endpoint.host.as_str(), self.endpoint.port);
        let stream = match timeout(self.endpoint.timeout, TcpStream::connect(target)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(ClientError::connection(format!(
                    "Cannot connect to {}: {}",
                    self.endpoint, e
                )))
            }
            Err(_) => {
                return Err(ClientError::connection(format!(
                    "Cannot connect to {}: timed out after {}ms",
                    self.endpoint,
                    self.endpoint.timeout.as_millis()
                )))
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY on {}: {}", self.endpoint, e);
        }
        debug!("Connected to {}", self.endpoint);
        self.stream = Some(stream);
        Ok(())
    }

    async fn close(&mut self) {
        self.in_flight = false;
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("Ignoring error while closing {}: {}", self.endpoint, e);
            }
            debug!("Closed connection to {}", self.endpoint);
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn slave_params(&self, _function: FunctionCode) -> &'static [SlaveParam] {
        &[SlaveParam::Unit]
    }

    async fn read_coils(
        &mut self,
        address: u16,
        count: u16,
        binding: SlaveBinding,
    ) -> ClientResult<Option<ModbusResponse>> {
        self.transact(Operation::ReadCoils { address, count }, binding)
            .await
    }

    async fn write_coil(
        &mut self,
        address: u16,
        value: bool,
        binding: SlaveBinding,
    ) -> ClientResult<Option<ModbusResponse>> {
        self.transact(Operation::WriteCoil { address, value }, binding)
            .await
    }

    async fn write_register(
        &mut self,
        address: u16,
        value: u16,
        binding: SlaveBinding,
    ) -> ClientResult<Option<ModbusResponse>> {
        self.transact(Operation::WriteRegister { address, value }, binding)
            .await
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

/// Wrap a PDU in an MBAP header
fn encode_frame(transaction_id: u16, unit: SlaveId, pdu: &ModbusPdu) -> BytesMut {
    let mut frame = BytesMut::with_capacity(MBAP_HEADER_LEN + 1 + pdu.len());
    frame.put_u16(transaction_id);
    frame.put_u16(MODBUS_PROTOCOL_ID);
    frame.put_u16((1 + pdu.len()) as u16);
    frame.put_u8(unit);
    frame.put_slice(pdu.as_slice());
    frame
}

/// Send one frame and read one reply. `Ok(None)` means the reply did not
/// arrive in time.
async fn exchange(
    stream: &mut TcpStream,
    frame: &[u8],
    limit: Duration,
) -> io::Result<Option<Vec<u8>>> {
    match timeout(limit, stream.write_all(frame)).await {
        Ok(result) => result?,
        Err(_) => return Err(io::Error::new(io::ErrorKind::TimedOut, "send timed out")),
    }

    let read_reply = async {
        let mut header = [0u8; MBAP_HEADER_LEN];
        stream.read_exact(&mut header).await?;

        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        if !(2..=MAX_MBAP_LENGTH).contains(&length) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid MBAP length field {}", length),
            ));
        }

        let mut reply = vec![0u8; MBAP_HEADER_LEN + length];
        reply[..MBAP_HEADER_LEN].copy_from_slice(&header);
        stream.read_exact(&mut reply[MBAP_HEADER_LEN..]).await?;
        Ok(reply)
    };

    match timeout(limit, read_reply).await {
        Ok(result) => result.map(Some),
        Err(_) => Ok(None),
    }
}

fn decode_frame(
    frame: &[u8],
    transaction_id: u16,
    operation: &Operation,
) -> ClientResult<ModbusResponse> {
    let op_name = operation.function().operation_name();
    let received_tid = u16::from_be_bytes([frame[0], frame[1]]);
    let protocol_id = u16::from_be_bytes([frame[2], frame[3]]);

    if received_tid != transaction_id {
        return Err(ClientError::protocol(
            op_name,
            format!(
                "transaction id mismatch: sent {}, received {}",
                transaction_id, received_tid
            ),
        ));
    }
    if protocol_id != MODBUS_PROTOCOL_ID {
        return Err(ClientError::protocol(
            op_name,
            format!("unexpected protocol id {}", protocol_id),
        ));
    }

    // Byte 6 is the unit id; the PDU follows it.
    let pdu = ModbusPdu::from_slice(&frame[MBAP_HEADER_LEN + 1..])?;
    ModbusResponse::from_pdu(operation, &pdu)
}
