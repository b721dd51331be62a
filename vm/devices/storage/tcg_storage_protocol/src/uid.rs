// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Object, method and column identifiers from the TCG Core, Opal and
//! Enterprise SSC tables.

use std::fmt;

/// An 8-byte TCG unique identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uid(pub [u8; 8]);

impl Uid {
    /// Builds a UID from its big-endian integer form.
    pub const fn new(v: u64) -> Self {
        Self(v.to_be_bytes())
    }

    /// The big-endian integer form.
    pub const fn get(self) -> u64 {
        u64::from_be_bytes(self.0)
    }

    /// Parses a UID from an 8-byte slice.
    pub fn from_slice(b: &[u8]) -> Option<Self> {
        Some(Self(b.try_into().ok()?))
    }

    /// Returns this UID with `n` added to the low half (row index).
    pub const fn offset(self, n: u32) -> Self {
        Self::new(self.get() + n as u64)
    }
}

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uid({self})")
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.get();
        write!(f, "{:08x}:{:08x}", v >> 32, v as u32)
    }
}

impl std::str::FromStr for Uid {
    type Err = std::num::ParseIntError;

    /// Accepts `0x0000000900000001`, `00000009:00000001` or plain hex.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim_start_matches("0x").replace([':', ' ', '_'], "");
        u64::from_str_radix(&s, 16).map(Uid::new)
    }
}

impl From<Uid> for crate::token::Value {
    fn from(uid: Uid) -> Self {
        crate::token::Value::Bytes(uid.0.to_vec())
    }
}

/// Invoking IDs and object UIDs.
pub mod object {
    #![expect(missing_docs)] // names match the TCG UID tables

    use super::Uid;

    pub const SESSION_MANAGER: Uid = Uid::new(0x0000_0000_0000_00ff);
    pub const THIS_SP: Uid = Uid::new(0x0000_0000_0000_0001);

    pub const ADMIN_SP: Uid = Uid::new(0x0000_0205_0000_0001);
    pub const LOCKING_SP: Uid = Uid::new(0x0000_0205_0000_0002);
    pub const ENTERPRISE_LOCKING_SP: Uid = Uid::new(0x0000_0205_0001_0001);

    // Authorities
    pub const ANYBODY: Uid = Uid::new(0x0000_0009_0000_0001);
    pub const SID: Uid = Uid::new(0x0000_0009_0000_0006);
    pub const ADMIN1: Uid = Uid::new(0x0000_0009_0001_0001);
    pub const USER1: Uid = Uid::new(0x0000_0009_0003_0001);
    pub const PSID: Uid = Uid::new(0x0000_0009_0001_ff01);
    pub const BAND_MASTER0: Uid = Uid::new(0x0000_0009_0000_8001);
    pub const ERASE_MASTER: Uid = Uid::new(0x0000_0009_0000_8401);

    // Credentials
    pub const C_PIN_SID: Uid = Uid::new(0x0000_000b_0000_0001);
    pub const C_PIN_MSID: Uid = Uid::new(0x0000_000b_0000_8402);
    pub const C_PIN_ADMIN1: Uid = Uid::new(0x0000_000b_0001_0001);
    pub const C_PIN_USER1: Uid = Uid::new(0x0000_000b_0003_0001);
    pub const C_PIN_BAND_MASTER0: Uid = Uid::new(0x0000_000b_0000_8001);
    pub const C_PIN_ERASE_MASTER: Uid = Uid::new(0x0000_000b_0000_8401);

    // Locking SP objects
    pub const LOCKING_INFO: Uid = Uid::new(0x0000_0801_0000_0001);
    pub const LOCKING_RANGE_GLOBAL: Uid = Uid::new(0x0000_0802_0000_0001);
    pub const OPAL_LOCKING_RANGE1: Uid = Uid::new(0x0000_0802_0003_0001);
    pub const MBR_CONTROL: Uid = Uid::new(0x0000_0803_0000_0001);
    pub const MBR: Uid = Uid::new(0x0000_0804_0000_0000);
    pub const K_AES_256_GLOBAL: Uid = Uid::new(0x0000_0806_0000_0001);
    pub const K_AES_256_RANGE1: Uid = Uid::new(0x0000_0806_0003_0001);

    // Table descriptor rows
    pub const TABLE_MBR: Uid = Uid::new(0x0000_0001_0000_0804);
}

/// Method UIDs.
pub mod method {
    #![expect(missing_docs)] // names match the TCG method table

    use super::Uid;

    pub const PROPERTIES: Uid = Uid::new(0x0000_0000_0000_ff01);
    pub const START_SESSION: Uid = Uid::new(0x0000_0000_0000_ff02);
    pub const SYNC_SESSION: Uid = Uid::new(0x0000_0000_0000_ff03);

    pub const REVERT: Uid = Uid::new(0x0000_0006_0000_0202);
    pub const ACTIVATE: Uid = Uid::new(0x0000_0006_0000_0203);
    pub const EGET: Uid = Uid::new(0x0000_0006_0000_0006);
    pub const ESET: Uid = Uid::new(0x0000_0006_0000_0007);
    pub const NEXT: Uid = Uid::new(0x0000_0006_0000_0008);
    pub const EAUTHENTICATE: Uid = Uid::new(0x0000_0006_0000_000c);
    pub const GETACL: Uid = Uid::new(0x0000_0006_0000_000d);
    pub const GENKEY: Uid = Uid::new(0x0000_0006_0000_0010);
    pub const REVERTSP: Uid = Uid::new(0x0000_0006_0000_0011);
    pub const GET: Uid = Uid::new(0x0000_0006_0000_0016);
    pub const SET: Uid = Uid::new(0x0000_0006_0000_0017);
    pub const AUTHENTICATE: Uid = Uid::new(0x0000_0006_0000_001c);
    pub const RANDOM: Uid = Uid::new(0x0000_0006_0000_0601);
    pub const ERASE: Uid = Uid::new(0x0000_0006_0000_0803);

    /// Human-readable method name for logs and errors.
    pub fn name(uid: Uid) -> &'static str {
        match uid {
            PROPERTIES => "Properties",
            START_SESSION => "StartSession",
            SYNC_SESSION => "SyncSession",
            REVERT => "Revert",
            ACTIVATE => "Activate",
            EGET => "EGet",
            ESET => "ESet",
            NEXT => "Next",
            EAUTHENTICATE => "EAuthenticate",
            GETACL => "GetACL",
            GENKEY => "GenKey",
            REVERTSP => "RevertSP",
            GET => "Get",
            SET => "Set",
            AUTHENTICATE => "Authenticate",
            RANDOM => "Random",
            ERASE => "Erase",
            _ => "Unknown",
        }
    }
}

/// Table column numbers.
pub mod column {
    #![expect(missing_docs)] // names match the TCG table definitions

    // Locking table
    pub const RANGE_START: u64 = 3;
    pub const RANGE_LENGTH: u64 = 4;
    pub const READ_LOCK_ENABLED: u64 = 5;
    pub const WRITE_LOCK_ENABLED: u64 = 6;
    pub const READ_LOCKED: u64 = 7;
    pub const WRITE_LOCKED: u64 = 8;
    pub const LOCK_ON_RESET: u64 = 9;
    pub const ACTIVE_KEY: u64 = 10;

    // MBRControl table
    pub const MBR_ENABLE: u64 = 1;
    pub const MBR_DONE: u64 = 2;

    // C_PIN table
    pub const PIN: u64 = 3;

    // Authority table
    pub const AUTHORITY_ENABLED: u64 = 5;

    // SP table
    pub const LIFE_CYCLE: u64 = 6;

    // LockingInfo table
    pub const MAX_RANGES: u64 = 4;

    // Table table
    pub const TABLE_ROWS: u64 = 7;
}

/// Byte-string column names used with `EGet`/`ESet` on Enterprise devices.
pub mod enterprise_column {
    #![expect(missing_docs)]

    pub const RANGE_START: &str = "RangeStart";
    pub const RANGE_LENGTH: &str = "RangeLength";
    pub const READ_LOCK_ENABLED: &str = "ReadLockEnabled";
    pub const WRITE_LOCK_ENABLED: &str = "WriteLockEnabled";
    pub const READ_LOCKED: &str = "ReadLocked";
    pub const WRITE_LOCKED: &str = "WriteLocked";
    pub const LOCK_ON_RESET: &str = "LockOnReset";
    pub const PIN: &str = "PIN";
    pub const ENABLED: &str = "Enabled";
}

/// SP life cycle states.
pub mod life_cycle {
    #![expect(missing_docs)]

    pub const MANUFACTURED_INACTIVE: u64 = 8;
    pub const MANUFACTURED: u64 = 9;
}

/// Named parameter and value constants for methods taking optional
/// arguments.
pub mod param {
    /// StartSession optional parameter: HostChallenge.
    pub const HOST_CHALLENGE: u64 = 0;
    /// StartSession optional parameter: HostSigningAuthority.
    pub const HOST_SIGNING_AUTHORITY: u64 = 3;
    /// Set: the Values column list.
    pub const SET_VALUES: u64 = 1;
    /// Set on byte tables: the Where offset.
    pub const SET_WHERE: u64 = 0;
    /// Get cell block: start column.
    pub const START_COLUMN: u64 = 3;
    /// Get cell block: end column.
    pub const END_COLUMN: u64 = 4;
    /// Properties: HostProperties list.
    pub const HOST_PROPERTIES: u64 = 0;
    /// Activate: SingleUserSelectionList.
    pub const SINGLE_USER_SELECTION_LIST: u64 = 0x06_0000;
    /// RevertSP: KeepGlobalRangeKey.
    pub const KEEP_GLOBAL_RANGE_KEY: u64 = 0x06_0000;
}

/// Locking table row for Opal range `n` (0 is the global range).
pub const fn opal_locking_range(n: u32) -> Uid {
    if n == 0 {
        object::LOCKING_RANGE_GLOBAL
    } else {
        object::OPAL_LOCKING_RANGE1.offset(n - 1)
    }
}

/// Locking table row for Enterprise band `n` (0 is the global band).
pub const fn enterprise_band(n: u32) -> Uid {
    object::LOCKING_RANGE_GLOBAL.offset(n)
}

/// Media encryption key for Opal range `n`.
pub const fn opal_range_key(n: u32) -> Uid {
    if n == 0 {
        object::K_AES_256_GLOBAL
    } else {
        object::K_AES_256_RANGE1.offset(n - 1)
    }
}

/// User authority `n`, starting at 1.
pub const fn user(n: u32) -> Uid {
    object::USER1.offset(n.saturating_sub(1))
}

/// C_PIN row of user authority `n`, starting at 1.
pub const fn c_pin_user(n: u32) -> Uid {
    object::C_PIN_USER1.offset(n.saturating_sub(1))
}

/// BandMaster authority for Enterprise band `n`.
pub const fn band_master(n: u32) -> Uid {
    object::BAND_MASTER0.offset(n)
}

/// C_PIN row for BandMaster `n`.
pub const fn c_pin_band_master(n: u32) -> Uid {
    object::C_PIN_BAND_MASTER0.offset(n)
}
