//! Validated high-level requests
//!
//! Raw values coming from a service call, a CLI argument or a stored setting
//! are range checked here, before anything touches the network. A rejected
//! value yields [`ClientError::Validation`] naming the field and its range.
//!
//! [`assign_slave_id`] is the only operation with broadcast leniency: when
//! the target is slave 0 every failure is absorbed and reported as
//! [`AssignOutcome::Unconfirmed`]. Plain coil and register writes to slave 0
//! surface their errors like any other write.

use tracing::{info, warn};

use crate::client::ModbusClient;
use crate::constants::BROADCAST_SLAVE;
use crate::error::{check_range, ClientResult};
use crate::protocol::{
    SlaveId, ADDRESS_RANGE, COIL_COUNT_RANGE, REGISTER_VALUE_RANGE, SLAVE_RANGE,
    UNICAST_SLAVE_RANGE,
};
use crate::transport::ModbusSession;

/// Write a new slave id into the device's slave-id register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssignSlaveId {
    new_slave: SlaveId,
    target_slave: SlaveId,
    register_address: u16,
}

impl AssignSlaveId {
    pub fn new(new_slave: i64, target_slave: i64, register_address: i64) -> ClientResult<Self> {
        Ok(Self {
            new_slave: check_range("new_slave", new_slave, UNICAST_SLAVE_RANGE)? as SlaveId,
            target_slave: check_range("target_slave", target_slave, SLAVE_RANGE)? as SlaveId,
            register_address: check_range("register_address", register_address, ADDRESS_RANGE)?
                as u16,
        })
    }

    /// Broadcast to slave 0, register 0
    pub fn broadcast(new_slave: i64) -> ClientResult<Self> {
        Self::new(new_slave, BROADCAST_SLAVE as i64, 0)
    }

    pub fn new_slave(&self) -> SlaveId {
        self.new_slave
    }

    pub fn target_slave(&self) -> SlaveId {
        self.target_slave
    }

    pub fn register_address(&self) -> u16 {
        self.register_address
    }

    pub fn is_broadcast(&self) -> bool {
        self.target_slave == BROADCAST_SLAVE
    }
}

/// Whether the device confirmed a slave-id assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOutcome {
    /// The write was acknowledged
    Confirmed,
    /// Broadcast sent; any failure was absorbed
    Unconfirmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadCoilsRequest {
    slave: SlaveId,
    address: u16,
    count: u16,
}

impl ReadCoilsRequest {
    pub fn new(slave: i64, address: i64, count: i64) -> ClientResult<Self> {
        Ok(Self {
            slave: check_range("slave", slave, SLAVE_RANGE)? as SlaveId,
            address: check_range("address", address, ADDRESS_RANGE)? as u16,
            count: check_range("count", count, COIL_COUNT_RANGE)? as u16,
        })
    }

    pub fn slave(&self) -> SlaveId {
        self.slave
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    pub fn count(&self) -> u16 {
        self.count
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteCoilRequest {
    slave: SlaveId,
    address: u16,
    value: bool,
}

impl WriteCoilRequest {
    pub fn new(slave: i64, address: i64, value: bool) -> ClientResult<Self> {
        Ok(Self {
            slave: check_range("slave", slave, SLAVE_RANGE)? as SlaveId,
            address: check_range("address", address, ADDRESS_RANGE)? as u16,
            value,
        })
    }

    pub fn slave(&self) -> SlaveId {
        self.slave
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    pub fn value(&self) -> bool {
        self.value
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteRegisterRequest {
    slave: SlaveId,
    address: u16,
    value: u16,
}

impl WriteRegisterRequest {
    pub fn new(slave: i64, address: i64, value: i64) -> ClientResult<Self> {
        Ok(Self {
            slave: check_range("slave", slave, SLAVE_RANGE)? as SlaveId,
            address: check_range("address", address, ADDRESS_RANGE)? as u16,
            value: check_range("value", value, REGISTER_VALUE_RANGE)? as u16,
        })
    }

    pub fn slave(&self) -> SlaveId {
        self.slave
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    pub fn value(&self) -> u16 {
        self.value
    }
}

/// Assign a new slave id, absorbing any failure for a broadcast target.
pub async fn assign_slave_id<S: ModbusSession>(
    client: &ModbusClient<S>,
    request: &AssignSlaveId,
) -> ClientResult<AssignOutcome> {
    let result = client
        .write_register(
            request.register_address,
            request.new_slave as u16,
            request.target_slave,
        )
        .await;

    match result {
        Ok(()) => {
            info!(
                "Slave {} on {} now answers as {}",
                request.target_slave,
                client.label(),
                request.new_slave
            );
            Ok(AssignOutcome::Confirmed)
        }
        Err(e) if request.is_broadcast() => {
            warn!(
                "Broadcast slave id {} on {} not confirmed: {}",
                request.new_slave,
                client.label(),
                e
            );
            Ok(AssignOutcome::Unconfirmed)
        }
        Err(e) => Err(e),
    }
}

pub async fn read_coils<S: ModbusSession>(
    client: &ModbusClient<S>,
    request: &ReadCoilsRequest,
) -> ClientResult<Vec<bool>> {
    client
        .read_coils(request.address, request.count, request.slave)
        .await
}

pub async fn write_coil<S: ModbusSession>(
    client: &ModbusClient<S>,
    request: &WriteCoilRequest,
) -> ClientResult<()> {
    client
        .write_coil(request.address, request.value, request.slave)
        .await
}

pub async fn write_register<S: ModbusSession>(
    client: &ModbusClient<S>,
    request: &WriteRegisterRequest,
) -> ClientResult<()> {
    client
        .write_register(request.address, request.value, request.slave)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use crate::protocol::FunctionCode;
    use crate::testing::{exception, register_ack, MockSession};
    use proptest::prelude::*;

    fn client(session: MockSession) -> ModbusClient<MockSession> {
        ModbusClient::with_session(session, "mock:502")
    }

    proptest! {
        #[test]
        fn prop_new_slave_out_of_range_rejected(
            new_slave in prop_oneof![i64::MIN..1i64, 248i64..i64::MAX]
        ) {
            let err = AssignSlaveId::new(new_slave, 0, 0).unwrap_err();
            prop_assert!(err.is_validation());
            prop_assert!(err.to_string().starts_with("new_slave must be in range 1..=247"));
        }

        #[test]
        fn prop_target_slave_out_of_range_rejected(
            target in prop_oneof![i64::MIN..0i64, 248i64..i64::MAX]
        ) {
            let err = AssignSlaveId::new(1, target, 0).unwrap_err();
            prop_assert!(err.to_string().starts_with("target_slave must be in range 0..=247"));
        }

        #[test]
        fn prop_register_value_in_range_accepted(value in 0i64..=65535) {
            let request = WriteRegisterRequest::new(1, 0, value).unwrap();
            prop_assert_eq!(request.value() as i64, value);
        }
    }

    #[test]
    fn test_request_bounds() {
        assert!(AssignSlaveId::new(247, 247, 65535).is_ok());
        assert!(AssignSlaveId::new(1, 0, 65536).unwrap_err().is_validation());
        assert!(WriteCoilRequest::new(248, 0, true).is_err());
        assert!(ReadCoilsRequest::new(1, 0, 0).unwrap_err().is_validation());
        assert_eq!(ReadCoilsRequest::new(1, 65535, 2000).unwrap().count(), 2000);
        assert!(WriteCoilRequest::new(0, -1, true).is_err());
        assert_eq!(
            WriteRegisterRequest::new(1, 0, 65536).unwrap_err(),
            ClientError::validation("value", REGISTER_VALUE_RANGE, 65536)
        );
    }

    #[test]
    fn test_broadcast_defaults() {
        let request = AssignSlaveId::broadcast(12).unwrap();
        assert!(request.is_broadcast());
        assert_eq!(request.target_slave(), 0);
        assert_eq!(request.register_address(), 0);
        assert_eq!(request.new_slave(), 12);
    }

    #[tokio::test]
    async fn test_broadcast_no_response_is_absorbed() {
        let session = MockSession::new().reply(Ok(None));
        let call_log = session.call_log.clone();
        let client = client(session);

        let outcome = assign_slave_id(&client, &AssignSlaveId::broadcast(9).unwrap())
            .await
            .unwrap();
        assert_eq!(outcome, AssignOutcome::Unconfirmed);
        assert!(!client.is_connected().await);
        assert_eq!(call_log.closes(), 1);

        let call = &call_log.calls()[0];
        assert_eq!(call.function, FunctionCode::WriteSingleRegister);
        assert_eq!(call.value, 9);
    }

    #[tokio::test]
    async fn test_broadcast_exception_is_absorbed() {
        let session =
            MockSession::new().reply(exception(FunctionCode::WriteSingleRegister, 0x04));
        let client = client(session);

        let outcome = assign_slave_id(&client, &AssignSlaveId::broadcast(9).unwrap()).await;
        assert_eq!(outcome, Ok(AssignOutcome::Unconfirmed));
    }

    #[tokio::test]
    async fn test_unicast_no_response_propagates() {
        let client = client(MockSession::new().reply(Ok(None)));

        let request = AssignSlaveId::new(9, 5, 0).unwrap();
        let err = assign_slave_id(&client, &request).await.unwrap_err();
        assert!(err.is_connection());
    }

    #[tokio::test]
    async fn test_unicast_ack_is_confirmed() {
        let session = MockSession::new().reply(register_ack(3, 9));
        let call_log = session.call_log.clone();
        let client = client(session);

        let request = AssignSlaveId::new(9, 5, 3).unwrap();
        assert_eq!(
            assign_slave_id(&client, &request).await,
            Ok(AssignOutcome::Confirmed)
        );
        assert_eq!(call_log.calls()[0].address, 3);
    }

    #[tokio::test]
    async fn test_raw_writes_to_broadcast_are_not_lenient() {
        let session = MockSession::new().reply(Ok(None)).reply(Ok(None));
        let client = client(session);

        let register = WriteRegisterRequest::new(0, 0, 7).unwrap();
        assert!(write_register(&client, &register).await.unwrap_err().is_connection());

        let coil = WriteCoilRequest::new(0, 0, true).unwrap();
        assert!(write_coil(&client, &coil).await.unwrap_err().is_connection());
    }

    #[tokio::test]
    async fn test_read_coils_handler() {
        let session = MockSession::new().reply(Ok(Some(
            crate::protocol::ModbusResponse::Coils(vec![true, false, true, true]),
        )));
        let client = client(session);

        let request = ReadCoilsRequest::new(7, 10, 3).unwrap();
        assert_eq!(
            read_coils(&client, &request).await.unwrap(),
            vec![true, false, true]
        );
    }

    #[tokio::test]
    async fn test_exception_on_unicast_write_keeps_connection() {
        let session = MockSession::new()
            .reply(exception(FunctionCode::WriteSingleRegister, 0x03))
            .reply(register_ack(0, 1));
        let call_log = session.call_log.clone();
        let client = client(session);

        let request = WriteRegisterRequest::new(5, 0, 1).unwrap();
        assert!(write_register(&client, &request).await.unwrap_err().is_protocol());
        assert!(write_register(&client, &request).await.is_ok());
        assert_eq!(call_log.connects(), 1);
    }
}
