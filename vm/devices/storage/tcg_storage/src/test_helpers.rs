// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A scripted TPer for unit tests.
//!
//! Session manager traffic (StartSession, Properties, EndOfSession) is
//! answered automatically. In-session calls are recorded and answered from
//! a queue of [`Reply`]s, defaulting to an empty success.

use crate::EngineConfig;
use crate::SedDevice;
use crate::credential::PasswordHashing;
use crate::transport::DeviceIdentity;
use crate::transport::SecurityTransport;
use crate::transport::TransportError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tcg_storage_protocol::MethodStatus;
use tcg_storage_protocol::Uid;
use tcg_storage_protocol::compacket;
use tcg_storage_protocol::compacket::ComChannel;
use tcg_storage_protocol::compacket::ComPacketHeader;
use tcg_storage_protocol::compacket::PacketHeader;
use tcg_storage_protocol::compacket::SessionNumbers;
use tcg_storage_protocol::discovery::FeatureCode;
use tcg_storage_protocol::discovery::LEVEL0_DISCOVERY_COM_ID;
use tcg_storage_protocol::discovery::builder::*;
use tcg_storage_protocol::token::Value;
use tcg_storage_protocol::token::control;
use tcg_storage_protocol::uid::method;
use tcg_storage_protocol::uid::object;
use zerocopy::FromBytes;
use zerocopy::FromZeros;
use zerocopy::IntoBytes;

/// Passwords are used unhashed so tests can match challenges directly.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        password_hashing: PasswordHashing::NoHash,
        receive_timeout: Duration::from_millis(100),
        poll_interval: Duration::ZERO,
        ..Default::default()
    }
}

/// A scripted method result.
#[derive(Debug, Clone)]
pub enum Reply {
    Results(Vec<Value>, MethodStatus),
    Raw(Vec<u8>),
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Results(Vec::new(), MethodStatus::SUCCESS)
    }

    pub fn results<I: IntoIterator<Item = Value>>(results: I) -> Self {
        Reply::Results(results.into_iter().collect(), MethodStatus::SUCCESS)
    }

    /// A `Get` result holding the given columns.
    pub fn columns(columns: &[(u64, Value)]) -> Self {
        Reply::results([Value::List(
            columns
                .iter()
                .map(|(c, v)| Value::named(*c, v.clone()))
                .collect(),
        )])
    }

    pub fn status(status: MethodStatus) -> Self {
        Reply::Results(Vec::new(), status)
    }

    pub fn raw(payload: Vec<u8>) -> Self {
        Reply::Raw(payload)
    }

    fn payload(&self) -> Vec<u8> {
        match self {
            Reply::Results(results, status) => Value::encode_all(&[
                Value::List(results.clone()),
                Value::EndOfData,
                Value::list([u64::from(status.0), 0, 0]),
            ])
            .unwrap(),
            Reply::Raw(payload) => payload.clone(),
        }
    }
}

/// A recorded in-session method call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub invoking: Uid,
    pub method: Uid,
    pub params: Vec<Value>,
    pub numbers: SessionNumbers,
}

/// A recorded StartSession.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStart {
    pub hsn: u32,
    pub sp: Uid,
    pub write: bool,
    pub authority: Option<Uid>,
    pub challenge: Option<Vec<u8>>,
}

struct State {
    discovery: Vec<u8>,
    tsn: u32,
    replies: VecDeque<Reply>,
    start_reply: Option<Reply>,
    reject_start: Option<MethodStatus>,
    answer_com_id: Option<u16>,
    pending_polls: u32,
    fail_next_receive: bool,
    response: Option<Vec<u8>>,
    sends: usize,
    receives: usize,
    last_com_id: Option<u16>,
    calls: Vec<Call>,
    starts: Vec<SessionStart>,
    end_of_sessions: usize,
}

/// The fake device. Clones share state, so a test can keep one clone
/// while the engine owns another.
#[derive(Clone)]
pub struct FakeTper(Arc<Mutex<State>>);

impl FakeTper {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(State {
            discovery: opal2_discovery(),
            tsn: 0x1001,
            replies: VecDeque::new(),
            start_reply: None,
            reject_start: None,
            answer_com_id: None,
            pending_polls: 0,
            fail_next_receive: false,
            response: None,
            sends: 0,
            receives: 0,
            last_com_id: None,
            calls: Vec::new(),
            starts: Vec::new(),
            end_of_sessions: 0,
        })))
    }

    pub fn set_discovery(&self, discovery: Vec<u8>) {
        self.0.lock().discovery = discovery;
    }

    pub fn set_tsn(&self, tsn: u32) {
        self.0.lock().tsn = tsn;
    }

    /// Queues the reply to the next in-session call.
    pub fn push(&self, reply: Reply) {
        self.0.lock().replies.push_back(reply);
    }

    /// Answers the next StartSession with `reply` instead of SyncSession.
    pub fn script_start(&self, reply: Reply) {
        self.0.lock().start_reply = Some(reply);
    }

    /// Rejects every StartSession with `status`.
    pub fn reject_start(&self, status: MethodStatus) {
        self.0.lock().reject_start = Some(status);
    }

    /// Frames responses with a different ComID.
    pub fn answer_on_com_id(&self, com_id: u16) {
        self.0.lock().answer_com_id = Some(com_id);
    }

    /// The next `n` receives report outstanding data but carry none.
    pub fn pending_polls(&self, n: u32) {
        self.0.lock().pending_polls = n;
    }

    pub fn fail_next_receive(&self) {
        self.0.lock().fail_next_receive = true;
    }

    pub fn sends(&self) -> usize {
        self.0.lock().sends
    }

    pub fn receives(&self) -> usize {
        self.0.lock().receives
    }

    pub fn last_com_id(&self) -> Option<u16> {
        self.0.lock().last_com_id
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().calls.clone()
    }

    pub fn last_call(&self) -> Option<Call> {
        self.0.lock().calls.last().cloned()
    }

    pub fn session_starts(&self) -> Vec<SessionStart> {
        self.0.lock().starts.clone()
    }

    pub fn end_of_sessions(&self) -> usize {
        self.0.lock().end_of_sessions
    }
}

impl State {
    fn handle(&mut self, com_id: u16, request: &[u8]) {
        let (com, rest) = ComPacketHeader::read_from_prefix(request).unwrap();
        assert_eq!(com.com_id.get(), com_id);
        let (packet, _) = PacketHeader::read_from_prefix(rest).unwrap();
        let numbers = SessionNumbers {
            tsn: packet.tsn.get(),
            hsn: packet.hsn.get(),
        };
        let unframed =
            compacket::unframe(request, ComChannel::new(com_id), numbers, None).unwrap();
        let values = Value::decode_all(&unframed.payload).unwrap();

        let payload = match values.as_slice() {
            [Value::EndOfSession] => {
                self.end_of_sessions += 1;
                vec![control::END_OF_SESSION]
            }
            [
                Value::Call,
                Value::Bytes(invoking),
                Value::Bytes(method_uid),
                Value::List(params),
                ..,
            ] => {
                let invoking = Uid::from_slice(invoking).unwrap();
                let method_uid = Uid::from_slice(method_uid).unwrap();
                if invoking == object::SESSION_MANAGER {
                    self.session_manager(method_uid, params)
                } else {
                    self.calls.push(Call {
                        invoking,
                        method: method_uid,
                        params: params.clone(),
                        numbers,
                    });
                    self.replies.pop_front().unwrap_or_else(Reply::ok).payload()
                }
            }
            other => panic!("unexpected request {other:?}"),
        };

        self.response = Some(compacket::frame(
            &payload,
            ComChannel::new(self.answer_com_id.unwrap_or(com_id)),
            numbers,
            0,
            0,
        ));
    }

    fn session_manager(&mut self, method_uid: Uid, params: &[Value]) -> Vec<u8> {
        match method_uid {
            method::START_SESSION => {
                let mut start = SessionStart {
                    hsn: params[0].as_uint().unwrap() as u32,
                    sp: Uid::from_slice(params[1].as_bytes().unwrap()).unwrap(),
                    write: params[2].as_bool().unwrap(),
                    authority: None,
                    challenge: None,
                };
                for p in &params[3..] {
                    let (name, value) = p.as_named().unwrap();
                    match name.as_uint().unwrap() {
                        0 => start.challenge = Some(value.as_bytes().unwrap().to_vec()),
                        3 => start.authority = Uid::from_slice(value.as_bytes().unwrap()),
                        n => panic!("unexpected StartSession parameter {n}"),
                    }
                }
                let hsn = start.hsn;
                self.starts.push(start);

                if let Some(reply) = self.start_reply.take() {
                    return reply.payload();
                }
                if let Some(status) = self.reject_start {
                    return Reply::status(status).payload();
                }
                Value::encode_all(&[
                    Value::Call,
                    object::SESSION_MANAGER.into(),
                    method::SYNC_SESSION.into(),
                    Value::list([u64::from(hsn), u64::from(self.tsn)]),
                    Value::EndOfData,
                    Value::list([0u64, 0, 0]),
                ])
                .unwrap()
            }
            method::PROPERTIES => {
                let host = params[0].as_named().unwrap().1.clone();
                Value::encode_all(&[
                    Value::Call,
                    object::SESSION_MANAGER.into(),
                    method::PROPERTIES.into(),
                    Value::list([
                        Value::list([
                            Value::named("MaxComPacketSize", 65536u64),
                            Value::named("MaxResponseComPacketSize", 65536u64),
                            Value::named("MaxPacketSize", 65516u64),
                        ]),
                        Value::named(0u64, host),
                    ]),
                    Value::EndOfData,
                    Value::list([0u64, 0, 0]),
                ])
                .unwrap()
            }
            other => panic!("unexpected session manager method {other}"),
        }
    }
}

impl SecurityTransport for FakeTper {
    fn security_send(
        &mut self,
        protocol: u8,
        com_id: u16,
        buf: &[u8],
    ) -> Result<(), TransportError> {
        assert_eq!(protocol, 1);
        assert_eq!(buf.len() % 512, 0);
        let mut state = self.0.lock();
        state.sends += 1;
        state.last_com_id = Some(com_id);
        state.handle(com_id, buf);
        Ok(())
    }

    fn security_receive(
        &mut self,
        protocol: u8,
        com_id: u16,
        _max_len: usize,
    ) -> Result<Vec<u8>, TransportError> {
        assert_eq!(protocol, 1);
        let mut state = self.0.lock();
        state.receives += 1;
        state.last_com_id = Some(com_id);
        if com_id == LEVEL0_DISCOVERY_COM_ID {
            return Ok(state.discovery.clone());
        }
        if std::mem::take(&mut state.fail_next_receive) {
            return Err(TransportError::Timeout);
        }
        let mut empty = ComPacketHeader::new_zeroed();
        empty.com_id = state.answer_com_id.unwrap_or(com_id).into();
        if state.pending_polls > 0 {
            if state.pending_polls != u32::MAX {
                state.pending_polls -= 1;
            }
            empty.outstanding_data = 1u32.into();
            return Ok(empty.as_bytes().to_vec());
        }
        Ok(state
            .response
            .take()
            .unwrap_or_else(|| empty.as_bytes().to_vec()))
    }

    fn identity(&mut self) -> Result<DeviceIdentity, TransportError> {
        Ok(DeviceIdentity {
            model: "FAKE SED".into(),
            firmware_revision: "1.0".into(),
            serial: b"FAKESERIAL0123456789".to_vec(),
        })
    }
}

/// Discovery for an Opal 2.0 drive at ComID 0x1000 with Single User Mode
/// over 9 locking objects.
pub fn opal2_discovery() -> Vec<u8> {
    level0_response(&[
        (FeatureCode::TPER, flags_body(0x11)),
        (FeatureCode::LOCKING, flags_body(0x01)),
        (FeatureCode::OPAL2, ssc_body(0x1000, 4, 8)),
        (
            FeatureCode::SINGLE_USER_MODE,
            vec![0, 0, 0, 9, 0, 0, 0, 0, 0, 0, 0, 0],
        ),
    ])
}

pub fn opal2_device() -> (FakeTper, SedDevice<FakeTper>) {
    let fake = FakeTper::new();
    let dev = SedDevice::open(fake.clone(), test_config()).unwrap();
    (fake, dev)
}

pub fn enterprise_device() -> (FakeTper, SedDevice<FakeTper>) {
    let fake = FakeTper::new();
    fake.set_discovery(level0_response(&[
        (FeatureCode::LOCKING, flags_body(0x01)),
        (FeatureCode::ENTERPRISE, ssc_body(0x07fe, 0, 0)),
    ]));
    let dev = SedDevice::open(fake.clone(), test_config()).unwrap();
    (fake, dev)
}

pub fn opal1_device() -> (FakeTper, SedDevice<FakeTper>) {
    let fake = FakeTper::new();
    fake.set_discovery(level0_response(&[
        (FeatureCode::LOCKING, flags_body(0x01)),
        (FeatureCode::OPAL1, ssc_body(0x0800, 0, 0)),
    ]));
    let dev = SedDevice::open(fake.clone(), test_config()).unwrap();
    (fake, dev)
}
