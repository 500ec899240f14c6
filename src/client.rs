//! Thread-safe Modbus TCP client
//!
//! [`ModbusClient`] is the single entry point for talking to one endpoint.
//! Every operation runs the same sequence under one async mutex:
//!
//! 1. connect on demand (fail fast with a connection error),
//! 2. bind the slave address to the keyword the session call accepts,
//! 3. send the request,
//! 4. classify the outcome.
//!
//! | Outcome | Result | Connection |
//! |---------|--------|------------|
//! | no response | `ClientError::Connection` | closed |
//! | transport failure | error from the session | closed |
//! | exception response | `ClientError::Protocol` | open |
//! | normal response | value | open |
//!
//! There is no retry: the next call reconnects if the previous one closed
//! the connection.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use smartelektra_tools::{ClientResult, ModbusClient};
//!
//! #[tokio::main]
//! async fn main() -> ClientResult<()> {
//!     let client = ModbusClient::connect_to("192.168.1.50", 502, 5.0)?;
//!
//!     let coils = client.read_coils(0, 8, 1).await?;
//!     println!("Coils: {:?}", coils);
//!
//!     client.write_register(0, 17, 1).await?;
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::compat::SlaveParam;
use crate::error::{check_range, ClientError, ClientResult};
use crate::protocol::{
    ModbusResponse, Operation, OperationRequest, SlaveId, COIL_COUNT_RANGE, SLAVE_RANGE,
};
use crate::transport::{Endpoint, ModbusSession, TcpSession, TransportStats};

/// Serialising facade over one [`ModbusSession`]
pub struct ModbusClient<S: ModbusSession = TcpSession> {
    session: Mutex<S>,
    label: String,
}

impl ModbusClient<TcpSession> {
    /// Client for `endpoint`; the connection opens on the first request.
    pub fn new(endpoint: Endpoint) -> Self {
        let label = endpoint.to_string();
        Self::with_session(TcpSession::new(endpoint), label)
    }

    /// Client from raw construction parameters (timeout in seconds)
    pub fn connect_to(host: &str, port: u16, timeout_secs: f64) -> ClientResult<Self> {
        Ok(Self::new(Endpoint::with_timeout_secs(host, port, timeout_secs)?))
    }

    /// Enable or disable hex dumps of every frame
    pub async fn set_packet_logging(&self, enabled: bool) {
        self.session.lock().await.set_packet_logging(enabled);
    }
}

impl<S: ModbusSession> ModbusClient<S> {
    /// Wrap an arbitrary session; `label` names the endpoint in logs.
    pub fn with_session<L: Into<String>>(session: S, label: L) -> Self {
        Self {
            session: Mutex::new(session),
            label: label.into(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Read `count` coils starting at `address` (FC01)
    pub async fn read_coils(
        &self,
        address: u16,
        count: u16,
        slave: SlaveId,
    ) -> ClientResult<Vec<bool>> {
        check_range("count", count as i64, COIL_COUNT_RANGE)?;
        let request = OperationRequest::new(slave, Operation::ReadCoils { address, count });

        match self.execute(request).await? {
            ModbusResponse::Coils(mut bits) => {
                if bits.len() < count as usize {
                    return Err(ClientError::protocol(
                        "read_coils",
                        format!("requested {} coils, response carries {}", count, bits.len()),
                    ));
                }
                bits.truncate(count as usize);
                Ok(bits)
            }
            other => Err(ClientError::protocol(
                "read_coils",
                format!("unexpected response: {}", other.description()),
            )),
        }
    }

    /// Write one coil (FC05)
    pub async fn write_coil(&self, address: u16, value: bool, slave: SlaveId) -> ClientResult<()> {
        let request = OperationRequest::new(slave, Operation::WriteCoil { address, value });
        self.execute(request).await.map(|_| ())
    }

    /// Write one holding register (FC06)
    pub async fn write_register(&self, address: u16, value: u16, slave: SlaveId) -> ClientResult<()> {
        let request = OperationRequest::new(slave, Operation::WriteRegister { address, value });
        self.execute(request).await.map(|_| ())
    }

    /// Release the connection. Safe to call when never connected.
    pub async fn shutdown(&self) {
        self.session.lock().await.close().await;
        debug!("Client for {} shut down", self.label);
    }

    pub async fn is_connected(&self) -> bool {
        self.session.lock().await.is_connected()
    }

    pub async fn stats(&self) -> TransportStats {
        self.session.lock().await.stats()
    }

    async fn execute(&self, request: OperationRequest) -> ClientResult<ModbusResponse> {
        check_range("slave", request.slave as i64, SLAVE_RANGE)?;

        let function = request.operation.function();
        let op_name = function.operation_name();

        let mut session = self.session.lock().await;

        if let Err(e) = session.connect().await {
            debug!("{} on {} aborted: {}", op_name, self.label, e);
            return Err(e);
        }

        let binding = SlaveParam::resolve(session.slave_params(function), request.slave);
        debug!(
            "{} -> {} slave={} {:?} binding={:?}",
            op_name, self.label, request.slave, request.operation, binding
        );

        let outcome = match request.operation {
            Operation::ReadCoils { address, count } => {
                session.read_coils(address, count, binding).await
            }
            Operation::WriteCoil { address, value } => {
                session.write_coil(address, value, binding).await
            }
            Operation::WriteRegister { address, value } => {
                session.write_register(address, value, binding).await
            }
        };

        match outcome {
            Ok(Some(response)) if response.is_error() => {
                debug!("{} on {} rejected: {}", op_name, self.label, response.description());
                Err(ClientError::protocol(op_name, response.description()))
            }
            Ok(Some(response)) => Ok(response),
            Ok(None) => {
                session.close().await;
                if request.is_broadcast() {
                    debug!("No response to broadcast {} on {}", op_name, self.label);
                } else {
                    warn!(
                        "No response from slave {} on {}, connection dropped",
                        request.slave, self.label
                    );
                }
                Err(ClientError::connection(format!(
                    "No response from {} (slave {}) on {}",
                    op_name, request.slave, self.label
                )))
            }
            Err(e) => {
                session.close().await;
                warn!("{} on {} failed, connection dropped: {}", op_name, self.label, e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compat::SlaveBinding;
    use crate::protocol::FunctionCode;
    use crate::testing::{coil_ack, exception, register_ack, start_echo_slave, MockSession};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn client(session: MockSession) -> ModbusClient<MockSession> {
        ModbusClient::with_session(session, "mock:502")
    }

    #[tokio::test]
    async fn test_read_coils_returns_requested_count() {
        let session = MockSession::new().reply(Ok(Some(ModbusResponse::Coils(vec![
            true, false, true, true,
        ]))));
        let call_log = session.call_log.clone();
        let client = client(session);

        let bits = client.read_coils(10, 3, 7).await.unwrap();
        assert_eq!(bits, vec![true, false, true]);

        let calls = call_log.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].address, 10);
        assert_eq!(calls[0].value, 3);
        assert_eq!(
            calls[0].binding,
            SlaveBinding::Keyword {
                param: SlaveParam::Slave,
                slave: 7
            }
        );
    }

    #[tokio::test]
    async fn test_read_coils_short_payload_is_protocol_error() {
        let session = MockSession::new().reply(Ok(Some(ModbusResponse::Coils(vec![true]))));
        let client = client(session);

        let err = client.read_coils(0, 3, 1).await.unwrap_err();
        assert!(err.is_protocol());
    }

    #[tokio::test]
    async fn test_no_response_closes_connection() {
        let session = MockSession::new().reply(Ok(None)).reply(register_ack(0, 1));
        let call_log = session.call_log.clone();
        let client = client(session);

        let err = client.write_register(0, 1, 5).await.unwrap_err();
        assert!(err.is_connection());
        assert!(err.to_string().contains("No response"));
        assert!(!client.is_connected().await);
        assert_eq!(call_log.closes(), 1);

        // next call reconnects from scratch
        assert_ok!(client.write_register(0, 1, 5).await);
        assert_eq!(call_log.connects(), 2);
    }

    #[tokio::test]
    async fn test_exception_keeps_connection_open() {
        let session = MockSession::new()
            .reply(exception(FunctionCode::WriteSingleRegister, 0x02))
            .reply(exception(FunctionCode::WriteSingleCoil, 0x04))
            .reply(coil_ack(3, true));
        let call_log = session.call_log.clone();
        let client = client(session);

        let err = client.write_register(9, 1, 5).await.unwrap_err();
        assert!(err.is_protocol());
        assert!(err.to_string().contains("illegal data address"));
        assert!(client.is_connected().await);

        let err = client.write_coil(3, true, 5).await.unwrap_err();
        assert!(err.is_protocol());

        assert_ok!(client.write_coil(3, true, 5).await);
        assert_eq!(call_log.connects(), 1);
        assert_eq!(call_log.closes(), 0);
    }

    #[tokio::test]
    async fn test_connect_failure_sends_nothing() {
        let session = MockSession::new().refuse_connect().reply(register_ack(0, 1));
        let call_log = session.call_log.clone();
        let client = client(session);

        let err = assert_err!(client.write_register(0, 1, 1).await);
        assert!(err.is_connection());
        assert!(call_log.calls().is_empty());
    }

    #[tokio::test]
    async fn test_transport_error_closes_and_propagates() {
        let session = MockSession::new().reply(Err(ClientError::connection("reset by peer")));
        let call_log = session.call_log.clone();
        let client = client(session);

        let err = client.write_coil(0, false, 2).await.unwrap_err();
        assert_eq!(err, ClientError::connection("reset by peer"));
        assert_eq!(call_log.closes(), 1);
    }

    #[tokio::test]
    async fn test_out_of_range_slave_and_count_rejected_before_io() {
        let session = MockSession::new();
        let call_log = session.call_log.clone();
        let client = client(session);

        assert!(client.write_register(0, 1, 248).await.unwrap_err().is_validation());
        assert!(client.read_coils(0, 0, 1).await.unwrap_err().is_validation());
        assert!(client.read_coils(0, 2001, 1).await.unwrap_err().is_validation());
        assert_eq!(call_log.connects(), 0);
        assert!(call_log.calls().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_before_connect() {
        let client = client(MockSession::new());
        client.shutdown().await;
        assert!(!client.is_connected().await);
    }

    #[tokio::test]
    async fn test_binding_resolved_per_function() {
        fn params(function: FunctionCode) -> &'static [SlaveParam] {
            match function {
                FunctionCode::WriteSingleRegister => &[SlaveParam::Unit, SlaveParam::DeviceId],
                FunctionCode::WriteSingleCoil => &[SlaveParam::Unit],
                FunctionCode::ReadCoils => &[],
            }
        }

        let session = MockSession::new()
            .accepting(params)
            .reply(register_ack(0, 4))
            .reply(coil_ack(1, true))
            .reply(Ok(Some(ModbusResponse::Coils(vec![false; 8]))));
        let call_log = session.call_log.clone();
        let client = client(session);

        client.write_register(0, 4, 3).await.unwrap();
        client.write_coil(1, true, 3).await.unwrap();
        client.read_coils(0, 8, 3).await.unwrap();

        let bindings: Vec<_> = call_log.calls().into_iter().map(|c| c.binding).collect();
        assert_eq!(
            bindings,
            vec![
                SlaveBinding::Keyword {
                    param: SlaveParam::DeviceId,
                    slave: 3
                },
                SlaveBinding::Keyword {
                    param: SlaveParam::Unit,
                    slave: 3
                },
                SlaveBinding::Omitted,
            ]
        );
    }

    fn tcp_client(port: u16) -> ModbusClient {
        let endpoint = Endpoint::new("127.0.0.1", port, Duration::from_secs(1)).unwrap();
        ModbusClient::new(endpoint)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_calls_never_overlap_on_the_wire() {
        let (port, slave) = start_echo_slave(Duration::from_millis(20)).await;
        let client = Arc::new(tcp_client(port));

        let tasks: Vec<_> = (0..8u16)
            .map(|i| {
                let client = Arc::clone(&client);
                tokio::spawn(async move { client.write_register(i, i, 1).await })
            })
            .collect();

        for task in tasks {
            assert_ok!(task.await.unwrap());
        }

        // a second frame never reaches the slave before the first is answered
        assert_eq!(slave.overlapped(), 0);
        assert_eq!(slave.requests().len(), 8);
        assert_eq!(slave.connections(), 1);
    }

    #[tokio::test]
    async fn test_abandoned_call_does_not_poison_next() {
        let (port, slave) = start_echo_slave(Duration::from_millis(200)).await;
        let client = tcp_client(port);

        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), client.write_register(1, 1, 5)).await;
        assert!(abandoned.is_err());
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_ok!(client.write_register(2, 2, 5).await);
        assert_ok!(client.write_register(3, 3, 5).await);
        assert_eq!(slave.connections(), 2);
    }
}
