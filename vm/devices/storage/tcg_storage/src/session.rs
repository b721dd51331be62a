// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! ComID I/O and the session state machine.

use crate::Error;
use crate::EngineConfig;
use crate::credential::Credential;
use crate::method::MethodResponse;
use crate::method::ResponseError;
use crate::method::encode_call;
use crate::transport::SecurityTransport;
use std::time::Instant;
use tcg_storage_protocol::MethodStatus;
use tcg_storage_protocol::Uid;
use tcg_storage_protocol::compacket;
use tcg_storage_protocol::compacket::ComChannel;
use tcg_storage_protocol::compacket::ComPacketResponse;
use tcg_storage_protocol::compacket::FRAME_OVERHEAD;
use tcg_storage_protocol::compacket::SessionNumbers;
use tcg_storage_protocol::discovery::SECURITY_PROTOCOL_TCG;
use tcg_storage_protocol::token::Value;
use tcg_storage_protocol::token::control;
use tcg_storage_protocol::uid::method;
use tcg_storage_protocol::uid::object;
use tcg_storage_protocol::uid::param;

/// Host session numbers handed out by a [`Tper`] start here.
const FIRST_HOST_SESSION_NUMBER: u32 = 105;

/// The TPer behind one ComID.
///
/// Owns the transport exclusively. Sessions borrow it mutably, so at most
/// one session exists per device at a time.
pub struct Tper<T> {
    transport: T,
    config: EngineConfig,
    channel: ComChannel,
    next_hsn: u32,
}

/// TPer and host communication properties from `Properties`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    /// What the TPer reported about itself.
    pub tper: Vec<(String, u64)>,
    /// The host properties the TPer accepted.
    pub host: Vec<(String, u64)>,
}

impl<T: SecurityTransport> Tper<T> {
    /// Talks to `com_id` on `transport`.
    pub fn new(transport: T, config: EngineConfig, com_id: u16) -> Self {
        Self {
            transport,
            config,
            channel: ComChannel::new(com_id),
            next_hsn: FIRST_HOST_SESSION_NUMBER,
        }
    }

    /// The configuration fixed at construction.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The ComID every exchange uses.
    pub fn com_id(&self) -> u16 {
        self.channel.com_id
    }

    /// Direct transport access.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Releases the transport.
    pub fn into_transport(self) -> T {
        self.transport
    }

    fn next_hsn(&mut self) -> u32 {
        let hsn = self.next_hsn;
        self.next_hsn = self.next_hsn.wrapping_add(1).max(1);
        hsn
    }

    /// Fails if `payload` would not fit in one transfer buffer.
    fn check_size(&self, payload: &[u8]) -> Result<(), Error> {
        let size = FRAME_OVERHEAD + payload.len().next_multiple_of(4);
        if size > self.config.max_packet_size {
            return Err(Error::RequestTooLarge {
                size,
                max: self.config.max_packet_size,
            });
        }
        Ok(())
    }

    /// Sends one framed request and receives its response, polling while
    /// the device reports outstanding data.
    pub(crate) fn exchange(
        &mut self,
        payload: &[u8],
        numbers: SessionNumbers,
        seq_number: u32,
        last_seq: Option<u32>,
    ) -> Result<ComPacketResponse, Error> {
        let com_id = self.channel.com_id;
        let request = compacket::frame(
            payload,
            self.channel,
            numbers,
            seq_number,
            self.config.transfer_alignment,
        );
        if self.config.dump_wire {
            tracing::trace!(com_id, data = %hex::encode(&request), "security send");
        }
        self.transport
            .security_send(SECURITY_PROTOCOL_TCG, com_id, &request)?;

        let deadline = Instant::now() + self.config.receive_timeout;
        loop {
            let buf = self.transport.security_receive(
                SECURITY_PROTOCOL_TCG,
                com_id,
                self.config.max_packet_size,
            )?;
            if self.config.dump_wire {
                tracing::trace!(com_id, data = %hex::encode(&buf), "security receive");
            }
            let response = compacket::unframe(&buf, self.channel, numbers, last_seq)?;
            if !response.is_pending() {
                return Ok(response);
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout);
            }
            tracing::trace!(
                outstanding = response.outstanding_data,
                "response not ready"
            );
            std::thread::sleep(self.config.poll_interval);
        }
    }

    /// Exchanges communication properties with the session manager.
    pub fn properties(&mut self) -> Result<Properties, Error> {
        let max = self.config.max_packet_size as u64;
        let host = [
            ("MaxComPacketSize", max),
            ("MaxPacketSize", max.saturating_sub(20)),
            ("MaxIndTokenSize", max.saturating_sub(FRAME_OVERHEAD as u64)),
            ("MaxPackets", 1),
            ("MaxSubpackets", 1),
            ("MaxMethods", 1),
        ];
        let params = vec![Value::named(
            param::HOST_PROPERTIES,
            Value::list(host.map(|(name, v)| Value::named(name, v))),
        )];
        let payload = encode_call(object::SESSION_MANAGER, method::PROPERTIES, params)?;
        self.check_size(&payload)?;
        let response = self.exchange(&payload, SessionNumbers::default(), 0, None)?;
        let response =
            MethodResponse::parse(&response.payload).map_err(|e| e.into_error("Properties"))?;
        if response.status != MethodStatus::SUCCESS {
            return Err(Error::MethodFailed {
                method: "Properties",
                status: response.status,
            });
        }

        let mut properties = Properties::default();
        for value in &response.results {
            match value {
                Value::List(items) => properties.tper = property_list(items),
                Value::Named(_, host) => {
                    if let Some(items) = host.as_list() {
                        properties.host = property_list(items);
                    }
                }
                _ => {}
            }
        }
        Ok(properties)
    }
}

fn property_list(items: &[Value]) -> Vec<(String, u64)> {
    items
        .iter()
        .filter_map(|item| {
            let (name, value) = item.as_named()?;
            Some((
                String::from_utf8_lossy(name.as_bytes()?).into_owned(),
                value.as_uint()?,
            ))
        })
        .collect()
}

/// Session states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session on the device.
    Closed,
    /// `StartSession` is in flight.
    Starting,
    /// Methods may be invoked.
    Open,
    /// End of session is in flight.
    Closing,
    /// A transport, framing or authentication failure occurred. Only
    /// [`Session::close`] leaves this state.
    Faulted,
}

/// A session with one SP.
///
/// Method calls are strictly sequential; each one blocks until its
/// response arrives or the receive deadline passes. Dropping an open
/// session ends it on the device.
pub struct Session<'a, T: SecurityTransport> {
    tper: &'a mut Tper<T>,
    state: SessionState,
    numbers: SessionNumbers,
    sp: Option<Uid>,
    authority: Option<Uid>,
    seq_number: u32,
    last_response_seq: Option<u32>,
}

impl<'a, T: SecurityTransport> Session<'a, T> {
    /// A closed session on `tper`.
    pub fn new(tper: &'a mut Tper<T>) -> Self {
        Self {
            tper,
            state: SessionState::Closed,
            numbers: SessionNumbers::default(),
            sp: None,
            authority: None,
            seq_number: 0,
            last_response_seq: None,
        }
    }

    /// The current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Session numbers assigned by `StartSession`.
    pub fn numbers(&self) -> SessionNumbers {
        self.numbers
    }

    /// The authority authenticated at start, if any.
    pub fn authority(&self) -> Option<Uid> {
        self.authority
    }

    pub(crate) fn config(&self) -> &EngineConfig {
        &self.tper.config
    }

    /// Starts a session with `sp`, optionally authenticating as an
    /// authority in the same exchange.
    pub fn start(
        &mut self,
        sp: Uid,
        write: bool,
        auth: Option<(Uid, &Credential)>,
    ) -> Result<(), Error> {
        if self.state != SessionState::Closed {
            return Err(Error::SessionNotUsable(self.state));
        }

        let hsn = self.tper.next_hsn();
        let mut params = vec![Value::Uint(hsn.into()), sp.into(), write.into()];
        if let Some((authority, credential)) = auth {
            params.push(Value::named(
                param::HOST_CHALLENGE,
                credential.as_bytes(),
            ));
            params.push(Value::named(param::HOST_SIGNING_AUTHORITY, authority));
        }
        let payload = encode_call(object::SESSION_MANAGER, method::START_SESSION, params)?;
        self.tper.check_size(&payload)?;

        self.state = SessionState::Starting;
        self.seq_number = 0;
        self.last_response_seq = None;
        let response = self
            .transact(SessionNumbers::default(), &payload, "StartSession")
            .map_err(|err| match err {
                Error::Token(_) | Error::UnexpectedResponse { .. } => Error::SessionStartFailed {
                    sp,
                    reason: "malformed StartSession reply",
                },
                err => err,
            })?;

        if response.status != MethodStatus::SUCCESS {
            self.state = SessionState::Faulted;
            tracing::warn!(%sp, status = %response.status, "StartSession rejected");
            return Err(Error::MethodFailed {
                method: "StartSession",
                status: response.status,
            });
        }

        let numbers = sync_session_numbers(&response, hsn).map_err(|reason| {
            self.state = SessionState::Faulted;
            Error::SessionStartFailed { sp, reason }
        })?;

        self.numbers = numbers;
        self.sp = Some(sp);
        self.authority = auth.map(|(authority, _)| authority);
        self.last_response_seq = None;
        self.state = SessionState::Open;
        tracing::debug!(
            com_id = self.tper.com_id(),
            hsn = numbers.hsn,
            tsn = numbers.tsn,
            %sp,
            authority = ?self.authority,
            "session started"
        );
        Ok(())
    }

    /// Invokes `method` on `invoking` and returns the result values.
    ///
    /// A non-success status fails with [`Error::MethodFailed`]. Rejected
    /// credentials also fault the session.
    pub fn invoke(
        &mut self,
        invoking: Uid,
        method_uid: Uid,
        params: Vec<Value>,
    ) -> Result<Vec<Value>, Error> {
        if self.state != SessionState::Open {
            return Err(Error::SessionNotUsable(self.state));
        }
        let name = method::name(method_uid);
        let payload = encode_call(invoking, method_uid, params)?;
        self.tper.check_size(&payload)?;

        let response = self.transact(self.numbers, &payload, name)?;
        if response.status != MethodStatus::SUCCESS {
            if response.status.is_authentication_failure() {
                self.state = SessionState::Faulted;
            }
            tracing::warn!(method = name, %invoking, status = %response.status, "method failed");
            return Err(Error::MethodFailed {
                method: name,
                status: response.status,
            });
        }
        tracing::trace!(method = name, %invoking, "method succeeded");
        Ok(response.results)
    }

    /// One request/response round trip. Any failure faults the session.
    fn transact(
        &mut self,
        numbers: SessionNumbers,
        payload: &[u8],
        name: &'static str,
    ) -> Result<MethodResponse, Error> {
        let seq = self.seq_number;
        self.seq_number = self.seq_number.wrapping_add(1);

        let result = match self
            .tper
            .exchange(payload, numbers, seq, self.last_response_seq)
        {
            Ok(response) => {
                self.last_response_seq = Some(response.seq_number);
                MethodResponse::parse(&response.payload).map_err(|e| e.into_error(name))
            }
            Err(err) => Err(err),
        };
        if result.is_err() {
            self.state = SessionState::Faulted;
        }
        result
    }

    /// Ends the session. Failures to reach the device are logged and the
    /// session is considered closed regardless.
    pub fn close(&mut self) {
        let live = matches!(self.state, SessionState::Open | SessionState::Faulted)
            && self.numbers.tsn != 0;
        if live {
            self.state = SessionState::Closing;
            let seq = self.seq_number;
            self.seq_number = self.seq_number.wrapping_add(1);
            match self.tper.exchange(
                &[control::END_OF_SESSION],
                self.numbers,
                seq,
                self.last_response_seq,
            ) {
                Ok(response) => {
                    if response.payload.first() != Some(&control::END_OF_SESSION) {
                        tracing::debug!("device did not echo end of session");
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        error = &err as &dyn std::error::Error,
                        "end of session not acknowledged"
                    );
                }
            }
            tracing::debug!(
                sp = ?self.sp,
                hsn = self.numbers.hsn,
                tsn = self.numbers.tsn,
                "session closed"
            );
        }
        self.reset();
    }

    /// Marks the session closed after a method that makes the device
    /// abort it (`Revert`, `RevertSP`).
    pub(crate) fn ended_by_device(&mut self) {
        tracing::debug!(hsn = self.numbers.hsn, tsn = self.numbers.tsn, "session ended by device");
        self.reset();
    }

    fn reset(&mut self) {
        self.state = SessionState::Closed;
        self.numbers = SessionNumbers::default();
        self.sp = None;
        self.authority = None;
    }
}

impl<T: SecurityTransport> Drop for Session<'_, T> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Extracts the session numbers from a SyncSession reply.
fn sync_session_numbers(
    response: &MethodResponse,
    hsn: u32,
) -> Result<SessionNumbers, &'static str> {
    if response.method != Some(method::SYNC_SESSION) {
        return Err("reply is not SyncSession");
    }
    let mut results = response.results.iter().map(Value::as_uint);
    let reply_hsn = results.next().flatten().ok_or("missing host session number")?;
    let tsn = results.next().flatten().ok_or("missing TPer session number")?;
    if reply_hsn != u64::from(hsn) {
        return Err("host session number mismatch");
    }
    let tsn = u32::try_from(tsn).map_err(|_| "TPer session number out of range")?;
    if tsn == 0 {
        return Err("TPer session number is zero");
    }
    Ok(SessionNumbers { tsn, hsn })
}

impl ResponseError {
    pub(crate) fn into_error(self, method: &'static str) -> Error {
        match self {
            ResponseError::Token(err) => Error::Token(err),
            ResponseError::Malformed(reason) => Error::UnexpectedResponse { method, reason },
            ResponseError::EndOfSession => Error::UnexpectedResponse {
                method,
                reason: "device ended the session",
            },
        }
    }
}
