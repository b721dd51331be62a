// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Method call encoding, result parsing, and the table methods used by the
//! variant drivers.

use crate::Error;
use crate::session::Session;
use crate::transport::SecurityTransport;
use tcg_storage_protocol::MethodStatus;
use tcg_storage_protocol::Uid;
use tcg_storage_protocol::token::TokenError;
use tcg_storage_protocol::token::Value;
use tcg_storage_protocol::uid::method;
use tcg_storage_protocol::uid::object;
use tcg_storage_protocol::uid::param;

/// Encodes `Call invoking method [params] EndOfData [0 0 0]`.
pub fn encode_call(invoking: Uid, method: Uid, params: Vec<Value>) -> Result<Vec<u8>, TokenError> {
    Value::encode_all(&[
        Value::Call,
        invoking.into(),
        method.into(),
        Value::List(params),
        Value::EndOfData,
        Value::list([0u64, 0, 0]),
    ])
}

/// Why a response token stream could not be interpreted.
#[derive(Debug)]
pub enum ResponseError {
    /// The token stream itself is invalid.
    Token(TokenError),
    /// Tokens decoded but do not form a method response.
    Malformed(&'static str),
    /// The device sent EndOfSession instead of a result.
    EndOfSession,
}

impl From<TokenError> for ResponseError {
    fn from(err: TokenError) -> Self {
        ResponseError::Token(err)
    }
}

/// A decoded method result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodResponse {
    /// Set for session manager replies, which are themselves calls.
    pub invoking: Option<Uid>,
    /// Method UID of a session manager reply.
    pub method: Option<Uid>,
    /// Items of the result list.
    pub results: Vec<Value>,
    /// Status from the trailing status list.
    pub status: MethodStatus,
}

impl MethodResponse {
    /// Parses `[Call uid uid] [results] EndOfData [status 0 0]`.
    pub fn parse(payload: &[u8]) -> Result<Self, ResponseError> {
        let values = Value::decode_all(payload)?;
        let mut iter = values.into_iter().peekable();

        let mut invoking = None;
        let mut method = None;
        if iter.peek() == Some(&Value::Call) {
            iter.next();
            let mut uid = || {
                iter.next()
                    .as_ref()
                    .and_then(Value::as_bytes)
                    .and_then(Uid::from_slice)
                    .ok_or(ResponseError::Malformed("call without UIDs"))
            };
            invoking = Some(uid()?);
            method = Some(uid()?);
        }

        let results = match iter.next() {
            Some(Value::List(items)) => {
                if iter.next() != Some(Value::EndOfData) {
                    return Err(ResponseError::Malformed("missing end of data"));
                }
                items
            }
            Some(Value::EndOfData) => Vec::new(),
            Some(Value::EndOfSession) => return Err(ResponseError::EndOfSession),
            None => return Err(ResponseError::Malformed("empty response")),
            Some(_) => return Err(ResponseError::Malformed("unexpected token before results")),
        };

        let status = match iter.next() {
            Some(Value::List(status)) => status
                .first()
                .and_then(Value::as_uint)
                .ok_or(ResponseError::Malformed("empty status list"))?,
            _ => return Err(ResponseError::Malformed("missing status list")),
        };
        let status = u8::try_from(status)
            .map_err(|_| ResponseError::Malformed("status code out of range"))?;

        Ok(Self {
            invoking,
            method,
            results,
            status: MethodStatus(status),
        })
    }
}

/// Finds the first list of named values, looking through the single-item
/// list wrappers that `Get`/`EGet` results carry.
fn named_values(results: &[Value]) -> &[Value] {
    let mut current = results;
    loop {
        if current.iter().any(|v| v.as_named().is_some()) {
            return current;
        }
        match current {
            [Value::List(inner)] => current = inner,
            _ => return current,
        }
    }
}

/// Column/value pairs of a `Get` result.
pub fn columns(results: &[Value]) -> Vec<(u64, Value)> {
    named_values(results)
        .iter()
        .filter_map(|v| {
            let (name, value) = v.as_named()?;
            Some((name.as_uint()?, value.clone()))
        })
        .collect()
}

/// Column/value pairs of an `EGet` result, keyed by column name.
pub fn named_columns(results: &[Value]) -> Vec<(String, Value)> {
    named_values(results)
        .iter()
        .filter_map(|v| {
            let (name, value) = v.as_named()?;
            Some((
                String::from_utf8_lossy(name.as_bytes()?).into_owned(),
                value.clone(),
            ))
        })
        .collect()
}

impl<T: SecurityTransport> Session<'_, T> {
    /// Reads columns `start..=end` of a table row.
    pub fn get(&mut self, row: Uid, start: u64, end: u64) -> Result<Vec<(u64, Value)>, Error> {
        let cell_block = Value::list([
            Value::named(param::START_COLUMN, start),
            Value::named(param::END_COLUMN, end),
        ]);
        let results = self.invoke(row, method::GET, vec![cell_block])?;
        Ok(columns(&results))
    }

    /// Reads a single column.
    pub fn get_column(&mut self, row: Uid, column: u64) -> Result<Value, Error> {
        self.get(row, column, column)?
            .into_iter()
            .find_map(|(c, v)| (c == column).then_some(v))
            .ok_or(Error::UnexpectedResponse {
                method: "Get",
                reason: "requested column missing from result",
            })
    }

    /// Reads a single unsigned integer column.
    pub fn get_uint(&mut self, row: Uid, column: u64) -> Result<u64, Error> {
        self.get_column(row, column)?
            .as_uint()
            .ok_or(Error::UnexpectedResponse {
                method: "Get",
                reason: "column is not an integer",
            })
    }

    /// Writes columns of a table row.
    pub fn set(&mut self, row: Uid, values: Vec<(u64, Value)>) -> Result<(), Error> {
        let values = Value::List(
            values
                .into_iter()
                .map(|(column, value)| Value::named(column, value))
                .collect(),
        );
        self.invoke(row, method::SET, vec![Value::named(param::SET_VALUES, values)])?;
        Ok(())
    }

    /// Writes `data` into a byte table at `offset`.
    pub fn set_bytes(&mut self, table: Uid, offset: u64, data: &[u8]) -> Result<(), Error> {
        self.invoke(
            table,
            method::SET,
            vec![
                Value::named(param::SET_WHERE, offset),
                Value::named(param::SET_VALUES, data),
            ],
        )?;
        Ok(())
    }

    /// Enterprise `EGet` of columns `start..=end` by name.
    pub fn eget(
        &mut self,
        row: Uid,
        start: &str,
        end: &str,
    ) -> Result<Vec<(String, Value)>, Error> {
        let cell_block = Value::list([
            Value::named("startColumn", start),
            Value::named("endColumn", end),
        ]);
        let results = self.invoke(row, method::EGET, vec![cell_block])?;
        Ok(named_columns(&results))
    }

    /// Enterprise `EGet` of one column.
    pub fn eget_column(&mut self, row: Uid, column: &str) -> Result<Value, Error> {
        self.eget(row, column, column)?
            .into_iter()
            .find_map(|(c, v)| (c == column).then_some(v))
            .ok_or(Error::UnexpectedResponse {
                method: "EGet",
                reason: "requested column missing from result",
            })
    }

    /// Enterprise `ESet` of named columns.
    pub fn eset(&mut self, row: Uid, values: Vec<(&str, Value)>) -> Result<(), Error> {
        let values = Value::List(
            values
                .into_iter()
                .map(|(column, value)| Value::named(column, value))
                .collect(),
        );
        self.invoke(
            row,
            method::ESET,
            vec![Value::List(Vec::new()), Value::List(vec![values])],
        )?;
        Ok(())
    }

    /// Activates `sp`, optionally placing the given locking objects in
    /// Single User Mode.
    pub fn activate(&mut self, sp: Uid, single_user: Option<Vec<Uid>>) -> Result<(), Error> {
        let params = match single_user {
            Some(objects) => vec![Value::named(
                param::SINGLE_USER_SELECTION_LIST,
                Value::list(objects),
            )],
            None => Vec::new(),
        };
        self.invoke(sp, method::ACTIVATE, params)?;
        Ok(())
    }

    /// Reverts `sp` to factory state. The device ends the session.
    pub fn revert(&mut self, sp: Uid) -> Result<(), Error> {
        self.invoke(sp, method::REVERT, Vec::new())?;
        self.ended_by_device();
        Ok(())
    }

    /// Reverts the SP this session is open to. The device ends the session.
    pub fn revert_sp(&mut self, keep_global_range_key: bool) -> Result<(), Error> {
        let params = if keep_global_range_key {
            vec![Value::named(param::KEEP_GLOBAL_RANGE_KEY, true)]
        } else {
            Vec::new()
        };
        self.invoke(object::THIS_SP, method::REVERTSP, params)?;
        self.ended_by_device();
        Ok(())
    }

    /// Regenerates a media encryption key.
    pub fn gen_key(&mut self, key: Uid) -> Result<(), Error> {
        self.invoke(key, method::GENKEY, Vec::new())?;
        Ok(())
    }

    /// Cryptographically erases a locking range or band.
    pub fn erase(&mut self, range: Uid) -> Result<(), Error> {
        self.invoke(range, method::ERASE, Vec::new())?;
        Ok(())
    }
}
