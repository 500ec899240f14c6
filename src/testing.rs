//! Recording session double and an in-process echo slave shared by the unit tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::compat::{SlaveBinding, SlaveParam};
use crate::constants::{COIL_OFF, COIL_ON, MBAP_HEADER_LEN};
use crate::error::{ClientError, ClientResult};
use crate::protocol::{FunctionCode, ModbusResponse};
use crate::transport::ModbusSession;

/// One call the session saw
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub function: FunctionCode,
    pub address: u16,
    pub value: u16,
    pub binding: SlaveBinding,
}

/// Counters shared between a test and the session it handed to a client
#[derive(Debug, Default)]
pub struct CallLog {
    pub connects: AtomicUsize,
    pub closes: AtomicUsize,
    pub calls: Mutex<Vec<RecordedCall>>,
}

impl CallLog {
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

pub type Reply = ClientResult<Option<ModbusResponse>>;

fn slave_only(_function: FunctionCode) -> &'static [SlaveParam] {
    &[SlaveParam::Slave]
}

/// Session double with scripted replies
pub struct MockSession {
    pub call_log: Arc<CallLog>,
    connected: bool,
    refuse_connect: bool,
    replies: VecDeque<Reply>,
    params: fn(FunctionCode) -> &'static [SlaveParam],
}

impl MockSession {
    pub fn new() -> Self {
        Self {
            call_log: Arc::new(CallLog::default()),
            connected: false,
            refuse_connect: false,
            replies: VecDeque::new(),
            params: slave_only,
        }
    }

    pub fn reply(mut self, reply: Reply) -> Self {
        self.replies.push_back(reply);
        self
    }

    pub fn refuse_connect(mut self) -> Self {
        self.refuse_connect = true;
        self
    }

    pub fn accepting(mut self, params: fn(FunctionCode) -> &'static [SlaveParam]) -> Self {
        self.params = params;
        self
    }

    async fn record(&mut self, call: RecordedCall) -> Reply {
        self.call_log.calls.lock().unwrap().push(call);
        self.replies
            .pop_front()
            .unwrap_or_else(|| Err(ClientError::connection("No reply scripted in mock")))
    }
}

impl ModbusSession for MockSession {
    async fn connect(&mut self) -> ClientResult<()> {
        if self.refuse_connect {
            return Err(ClientError::connection("Cannot connect to mock:502"));
        }
        if !self.connected {
            self.connected = true;
            self.call_log.connects.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.connected = false;
        self.call_log.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn slave_params(&self, function: FunctionCode) -> &'static [SlaveParam] {
        (self.params)(function)
    }

    async fn read_coils(&mut self, address: u16, count: u16, binding: SlaveBinding) -> Reply {
        self.record(RecordedCall {
            function: FunctionCode::ReadCoils,
            address,
            value: count,
            binding,
        })
        .await
    }

    async fn write_coil(&mut self, address: u16, value: bool, binding: SlaveBinding) -> Reply {
        self.record(RecordedCall {
            function: FunctionCode::WriteSingleCoil,
            address,
            value: value as u16,
            binding,
        })
        .await
    }

    async fn write_register(&mut self, address: u16, value: u16, binding: SlaveBinding) -> Reply {
        self.record(RecordedCall {
            function: FunctionCode::WriteSingleRegister,
            address,
            value,
            binding,
        })
        .await
    }
}

/// Successful echo for a register write
pub fn register_ack(address: u16, value: u16) -> Reply {
    Ok(Some(ModbusResponse::Ack {
        function: FunctionCode::WriteSingleRegister,
        address,
        value,
    }))
}

/// Successful echo for a coil write
pub fn coil_ack(address: u16, value: bool) -> Reply {
    Ok(Some(ModbusResponse::Ack {
        function: FunctionCode::WriteSingleCoil,
        address,
        value: if value { COIL_ON } else { COIL_OFF },
    }))
}

/// Device-side exception for `function`
pub fn exception(function: FunctionCode, code: u8) -> Reply {
    Ok(Some(ModbusResponse::Exception {
        function,
        code: crate::protocol::ExceptionCode::from_u8(code),
    }))
}

/// What an echo slave saw across all of its connections
#[derive(Debug, Default)]
pub struct SlaveLog {
    pub connections: AtomicUsize,
    /// Requests whose successor was already on the wire before the reply went out
    pub overlapped: AtomicUsize,
    pub requests: Mutex<Vec<Vec<u8>>>,
}

impl SlaveLog {
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn overlapped(&self) -> usize {
        self.overlapped.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.requests.lock().unwrap().clone()
    }
}

/// Slave on 127.0.0.1 that echoes every request after `delay`.
///
/// An echo is the valid reply for FC05 and FC06. Any number of connections
/// are accepted, one after another or side by side.
pub async fn start_echo_slave(delay: Duration) -> (u16, Arc<SlaveLog>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let log = Arc::new(SlaveLog::default());

    let accept_log = Arc::clone(&log);
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            accept_log.connections.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(serve_echo(socket, Arc::clone(&accept_log), delay));
        }
    });

    (port, log)
}

async fn serve_echo(mut socket: TcpStream, log: Arc<SlaveLog>, delay: Duration) {
    loop {
        let mut header = [0u8; MBAP_HEADER_LEN];
        if socket.read_exact(&mut header).await.is_err() {
            return;
        }
        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        let mut body = vec![0u8; length];
        if socket.read_exact(&mut body).await.is_err() {
            return;
        }

        let mut request = header.to_vec();
        request.extend_from_slice(&body);
        log.requests.lock().unwrap().push(request.clone());

        tokio::time::sleep(delay).await;

        let mut next = [0u8; 1];
        if let Ok(Ok(n)) =
            tokio::time::timeout(Duration::from_millis(1), socket.peek(&mut next)).await
        {
            if n > 0 {
                log.overlapped.fetch_add(1, Ordering::SeqCst);
            }
        }

        if socket.write_all(&request).await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::ModbusPdu;
    use crate::protocol::Operation;

    #[test]
    fn test_coil_ack_matches_decoded_echo() {
        for (value, raw) in [(true, [0xFF, 0x00]), (false, [0x00, 0x00])] {
            let pdu = ModbusPdu::from_slice(&[0x05, 0x00, 0x03, raw[0], raw[1]]).unwrap();
            let decoded =
                ModbusResponse::from_pdu(&Operation::WriteCoil { address: 3, value }, &pdu)
                    .unwrap();
            assert_eq!(coil_ack(3, value), Ok(Some(decoded)));
        }
    }
}
