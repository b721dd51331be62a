// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Client-side protocol engine for TCG Storage self-encrypting drives.
//!
//! [`SedDevice`] reads Level 0 Discovery once, selects the SSC variant
//! (Opal 1.0, Opal 2.0 or Enterprise) and then runs management operations
//! as sequences of method calls inside [`Session`]s. The transport is
//! abstracted by [`SecurityTransport`].

#![forbid(unsafe_code)]

pub mod config;
pub mod credential;
mod device;
mod enterprise;
pub mod method;
mod opal;
pub mod raw;
pub mod session;
mod sum;
#[cfg(test)]
mod test_helpers;
pub mod transport;
pub mod variant;

pub use config::EngineConfig;
pub use credential::Credential;
pub use device::LockState;
pub use device::LockingRangeInfo;
pub use device::RangeLockEnable;
pub use device::SedDevice;
pub use session::Session;
pub use session::SessionState;
pub use session::Tper;
pub use transport::DeviceIdentity;
pub use transport::SecurityTransport;
pub use variant::Authority;
pub use variant::SscVariant;

use tcg_storage_protocol::MethodStatus;
use tcg_storage_protocol::Uid;
use tcg_storage_protocol::compacket::FrameError;
use tcg_storage_protocol::discovery::DiscoveryError;
use tcg_storage_protocol::token::TokenError;
use thiserror::Error;
use transport::TransportError;

/// Engine errors.
#[derive(Debug, Error)]
#[expect(missing_docs)]
pub enum Error {
    #[error("invalid token stream")]
    Token(#[from] TokenError),
    #[error("protocol error")]
    Protocol(#[from] FrameError),
    #[error("invalid Level 0 Discovery response")]
    Discovery(#[from] DiscoveryError),
    #[error("transport error")]
    Transport(#[source] TransportError),
    #[error("timed out waiting for the device to respond")]
    Timeout,
    #[error("credential derivation failed")]
    CredentialDerivation(#[from] credential::CredentialError),
    #[error("failed to start a session with SP {sp}: {reason}")]
    SessionStartFailed { sp: Uid, reason: &'static str },
    #[error("session is {0:?} and cannot be used")]
    SessionNotUsable(SessionState),
    #[error("{method} failed: {status}")]
    MethodFailed {
        method: &'static str,
        status: MethodStatus,
    },
    #[error("unexpected response to {method}: {reason}")]
    UnexpectedResponse {
        method: &'static str,
        reason: &'static str,
    },
    #[error("request of {size} bytes exceeds the {max} byte packet limit")]
    RequestTooLarge { size: usize, max: usize },
    #[error("device does not support {0}")]
    Unsupported(&'static str),
    #[error("SP {sp} is in life cycle state {life_cycle}, expected {expected}")]
    WrongLifeCycle {
        sp: Uid,
        life_cycle: u64,
        expected: u64,
    },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => Error::Timeout,
            err => Error::Transport(err),
        }
    }
}

impl Error {
    /// The status reported by the device, if the device rejected a method.
    pub fn method_status(&self) -> Option<MethodStatus> {
        match *self {
            Error::MethodFailed { status, .. } => Some(status),
            _ => None,
        }
    }
}
