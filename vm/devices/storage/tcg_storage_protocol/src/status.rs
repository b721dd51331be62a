// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Method status codes (Core Specification 5.1.5).

use std::fmt;

/// Status code returned in the status list at the end of a method result.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodStatus(pub u8);

#[expect(missing_docs)] // names match the status table
impl MethodStatus {
    pub const SUCCESS: Self = Self(0x00);
    pub const NOT_AUTHORIZED: Self = Self(0x01);
    pub const OBSOLETE: Self = Self(0x02);
    pub const SP_BUSY: Self = Self(0x03);
    pub const SP_FAILED: Self = Self(0x04);
    pub const SP_DISABLED: Self = Self(0x05);
    pub const SP_FROZEN: Self = Self(0x06);
    pub const NO_SESSIONS_AVAILABLE: Self = Self(0x07);
    pub const UNIQUENESS_CONFLICT: Self = Self(0x08);
    pub const INSUFFICIENT_SPACE: Self = Self(0x09);
    pub const INSUFFICIENT_ROWS: Self = Self(0x0a);
    pub const INVALID_PARAMETER: Self = Self(0x0c);
    pub const TPER_MALFUNCTION: Self = Self(0x0f);
    pub const TRANSACTION_FAILURE: Self = Self(0x10);
    pub const RESPONSE_OVERFLOW: Self = Self(0x11);
    pub const AUTHORITY_LOCKED_OUT: Self = Self(0x12);
    pub const FAIL: Self = Self(0x3f);

    /// The name from the Core specification status table, if known.
    pub fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::SUCCESS => "SUCCESS",
            Self::NOT_AUTHORIZED => "NOT_AUTHORIZED",
            Self::OBSOLETE => "OBSOLETE",
            Self::SP_BUSY => "SP_BUSY",
            Self::SP_FAILED => "SP_FAILED",
            Self::SP_DISABLED => "SP_DISABLED",
            Self::SP_FROZEN => "SP_FROZEN",
            Self::NO_SESSIONS_AVAILABLE => "NO_SESSIONS_AVAILABLE",
            Self::UNIQUENESS_CONFLICT => "UNIQUENESS_CONFLICT",
            Self::INSUFFICIENT_SPACE => "INSUFFICIENT_SPACE",
            Self::INSUFFICIENT_ROWS => "INSUFFICIENT_ROWS",
            Self::INVALID_PARAMETER => "INVALID_PARAMETER",
            Self::TPER_MALFUNCTION => "TPER_MALFUNCTION",
            Self::TRANSACTION_FAILURE => "TRANSACTION_FAILURE",
            Self::RESPONSE_OVERFLOW => "RESPONSE_OVERFLOW",
            Self::AUTHORITY_LOCKED_OUT => "AUTHORITY_LOCKED_OUT",
            Self::FAIL => "FAIL",
            _ => return None,
        })
    }

    /// Whether this status means the presented credential was rejected.
    pub fn is_authentication_failure(self) -> bool {
        matches!(self, Self::NOT_AUTHORIZED | Self::AUTHORITY_LOCKED_OUT)
    }
}

impl fmt::Debug for MethodStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "MethodStatus({:#04x})", self.0),
        }
    }
}

impl fmt::Display for MethodStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
