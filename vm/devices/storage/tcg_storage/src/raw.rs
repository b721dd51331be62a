// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Diagnostic passthrough.
//!
//! These calls go straight to a [`Tper`] session with operator-supplied
//! UIDs and parameters. Results are returned as decoded values without any
//! interpretation, and nothing here is used by the managed operations.

use crate::Error;
use crate::credential::Credential;
use crate::session::Session;
use crate::session::Tper;
use crate::transport::SecurityTransport;
use tcg_storage_protocol::Uid;
use tcg_storage_protocol::token::Value;
use tcg_storage_protocol::uid::method;

/// Parses a hex-encoded token stream into method parameters. Whitespace
/// is ignored; an empty string means no parameters.
pub fn parse_params(hex_tokens: &str) -> Result<Vec<Value>, Error> {
    let digits: String = hex_tokens.split_whitespace().collect();
    let bytes = hex::decode(&digits)
        .map_err(|err| Error::InvalidArgument(format!("parameter tokens: {err}")))?;
    Ok(Value::decode_all(&bytes)?)
}

/// Invokes `method` on `invoking` in a session with `sp` and returns the
/// raw result list.
pub fn raw_command<T: SecurityTransport>(
    tper: &mut Tper<T>,
    sp: Uid,
    auth: Option<(Uid, &Credential)>,
    invoking: Uid,
    method_uid: Uid,
    params: Vec<Value>,
) -> Result<Vec<Value>, Error> {
    tracing::debug!(%sp, %invoking, method = %method_uid, "raw command");
    let mut session = Session::new(tper);
    session.start(sp, true, auth)?;
    session.invoke(invoking, method_uid, params)
}

/// Reads every column of `object` with an unbounded `Get`.
pub fn object_dump<T: SecurityTransport>(
    tper: &mut Tper<T>,
    sp: Uid,
    auth: Option<(Uid, &Credential)>,
    object: Uid,
) -> Result<Vec<Value>, Error> {
    let mut session = Session::new(tper);
    session.start(sp, false, auth)?;
    session.invoke(object, method::GET, vec![Value::List(Vec::new())])
}
