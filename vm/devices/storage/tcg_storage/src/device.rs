// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The device facade: discovery at open time, then management operations
//! dispatched on the selected SSC variant.

use crate::Error;
use crate::EngineConfig;
use crate::credential::Credential;
use crate::enterprise;
use crate::opal;
use crate::session::Properties;
use crate::session::Session;
use crate::session::Tper;
use crate::sum;
use crate::transport::DeviceIdentity;
use crate::transport::SecurityTransport;
use crate::variant::Authority;
use crate::variant::SscVariant;
use crate::variant::VariantProfile;
use std::str::FromStr;
use tcg_storage_protocol::Uid;
use tcg_storage_protocol::discovery::LEVEL0_DISCOVERY_COM_ID;
use tcg_storage_protocol::discovery::Level0Discovery;
use tcg_storage_protocol::discovery::SECURITY_PROTOCOL_TCG;

/// Lock state applied to a locking range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// Unlocked.
    ReadWrite,
    /// Write locked only.
    ReadOnly,
    /// Read and write locked.
    Locked,
}

impl LockState {
    /// `(ReadLocked, WriteLocked)`.
    pub fn locks(self) -> (bool, bool) {
        match self {
            LockState::ReadWrite => (false, false),
            LockState::ReadOnly => (false, true),
            LockState::Locked => (true, true),
        }
    }
}

impl FromStr for LockState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RW" | "READWRITE" => Ok(LockState::ReadWrite),
            "RO" | "READONLY" => Ok(LockState::ReadOnly),
            "LK" | "LOCKED" => Ok(LockState::Locked),
            _ => Err(Error::InvalidArgument(format!(
                "lock state {s:?} is not one of RW, RO, LK"
            ))),
        }
    }
}

/// Read/write lock enables of a locking range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeLockEnable {
    /// `ReadLockEnabled`.
    pub read: bool,
    /// `WriteLockEnabled`.
    pub write: bool,
}

impl RangeLockEnable {
    /// Reads and writes are subject to locking.
    pub const ENABLED: Self = Self {
        read: true,
        write: true,
    };
    /// The range never locks.
    pub const DISABLED: Self = Self {
        read: false,
        write: false,
    };
    /// Only writes are subject to locking.
    pub const READ_ONLY: Self = Self {
        read: false,
        write: true,
    };
}

/// One row of the Locking table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[expect(missing_docs)] // column names
pub struct LockingRangeInfo {
    pub range: u32,
    pub start: u64,
    pub length: u64,
    pub read_lock_enabled: bool,
    pub write_lock_enabled: bool,
    pub read_locked: bool,
    pub write_locked: bool,
}

/// A self-encrypting drive.
///
/// Level 0 Discovery is read once by [`SedDevice::open`]; the selected
/// variant and ComID stay fixed for the lifetime of the value.
pub struct SedDevice<T> {
    pub(crate) tper: Tper<T>,
    discovery: Level0Discovery,
    profile: Option<VariantProfile>,
    identity: DeviceIdentity,
}

impl<T: SecurityTransport> SedDevice<T> {
    /// Reads the device identity and Level 0 Discovery and selects the
    /// SSC variant. Devices without a supported SSC open successfully but
    /// reject every management operation.
    pub fn open(mut transport: T, config: EngineConfig) -> Result<Self, Error> {
        let identity = transport.identity()?;
        let buf = transport.security_receive(
            SECURITY_PROTOCOL_TCG,
            LEVEL0_DISCOVERY_COM_ID,
            config.max_packet_size,
        )?;
        let discovery = Level0Discovery::parse(&buf)?;
        let profile = VariantProfile::select(&discovery);
        let com_id = config
            .com_id_override
            .or(profile.map(|p| p.base_com_id))
            .unwrap_or(0);

        tracing::debug!(
            model = identity.model.trim(),
            serial = %identity.serial_string(),
            variant = ?profile.map(|p| p.variant),
            com_id,
            "opened device"
        );

        Ok(Self {
            tper: Tper::new(transport, config, com_id),
            discovery,
            profile,
            identity,
        })
    }

    /// Identity strings read at open time.
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// The Level 0 Discovery read at open time.
    pub fn discovery(&self) -> &Level0Discovery {
        &self.discovery
    }

    /// The selected variant, if any SSC is supported.
    pub fn profile(&self) -> Option<&VariantProfile> {
        self.profile.as_ref()
    }

    /// Shorthand for the selected variant tag.
    pub fn variant(&self) -> Option<SscVariant> {
        self.profile.map(|p| p.variant)
    }

    /// Whether the device implements a supported SSC.
    pub fn is_sed(&self) -> bool {
        self.profile.is_some()
    }

    /// Direct access to the ComID channel, for diagnostics.
    pub fn tper_mut(&mut self) -> &mut Tper<T> {
        &mut self.tper
    }

    /// Releases the transport.
    pub fn into_transport(self) -> T {
        self.tper.into_transport()
    }

    /// Hashes an operator-supplied password for this device.
    pub fn credential(&self, password: &str) -> Result<Credential, Error> {
        Ok(Credential::from_password(
            password,
            &self.identity.salt(),
            self.tper.config().password_hashing,
        )?)
    }

    /// Runs `f` inside a session with `sp`, authenticated when `auth` is
    /// given. The session ends when `f` returns.
    pub(crate) fn with_session<R>(
        &mut self,
        sp: Uid,
        write: bool,
        auth: Option<(Uid, &Credential)>,
        f: impl FnOnce(&mut Session<'_, T>) -> Result<R, Error>,
    ) -> Result<R, Error> {
        let mut session = Session::new(&mut self.tper);
        session.start(sp, write, auth)?;
        f(&mut session)
    }

    /// Runs `f` in a read-write Locking SP session as `authority`.
    pub(crate) fn locking_session<R>(
        &mut self,
        authority: Authority,
        password: &str,
        f: impl FnOnce(&mut Session<'_, T>) -> Result<R, Error>,
    ) -> Result<R, Error> {
        let sp = self.require_profile()?.locking_sp();
        let credential = self.credential(password)?;
        self.with_session(sp, true, Some((authority.uid(), &credential)), f)
    }

    pub(crate) fn require_profile(&self) -> Result<VariantProfile, Error> {
        self.profile
            .ok_or(Error::Unsupported("TCG Opal or Enterprise SSC"))
    }

    fn require_opal(&self, operation: &'static str) -> Result<VariantProfile, Error> {
        let profile = self.require_profile()?;
        if profile.is_enterprise() {
            return Err(Error::Unsupported(operation));
        }
        Ok(profile)
    }

    fn require_enterprise(&self, operation: &'static str) -> Result<VariantProfile, Error> {
        let profile = self.require_profile()?;
        if !profile.is_enterprise() {
            return Err(Error::Unsupported(operation));
        }
        Ok(profile)
    }

    pub(crate) fn require_sum(&self) -> Result<VariantProfile, Error> {
        let profile = self.require_profile()?;
        if profile.capabilities.single_user_mode.is_none() {
            return Err(Error::Unsupported("Single User Mode"));
        }
        Ok(profile)
    }

    /// Exchanges communication properties with the session manager.
    pub fn properties(&mut self) -> Result<Properties, Error> {
        self.require_profile()?;
        self.tper.properties()
    }

    /// Reads the factory default SID password (MSID).
    pub fn msid(&mut self) -> Result<Vec<u8>, Error> {
        match self.require_profile()?.variant {
            SscVariant::Opal1 | SscVariant::Opal2 => opal::msid(self),
            SscVariant::Enterprise => enterprise::msid(self),
        }
    }

    /// Replaces the MSID-valued SID credential with `new_password`.
    pub fn take_ownership(&mut self, new_password: &str) -> Result<(), Error> {
        match self.require_profile()?.variant {
            SscVariant::Opal1 | SscVariant::Opal2 => opal::take_ownership(self, new_password),
            SscVariant::Enterprise => enterprise::take_ownership(self, new_password),
        }
    }

    /// Changes the SID password.
    pub fn set_sid_password(&mut self, old: &str, new: &str) -> Result<(), Error> {
        match self.require_profile()?.variant {
            SscVariant::Opal1 | SscVariant::Opal2 => opal::set_sid_password(self, old, new),
            SscVariant::Enterprise => enterprise::set_sid_password(self, old, new),
        }
    }

    /// Moves the Locking SP from Manufactured-Inactive to Manufactured.
    pub fn activate_locking_sp(&mut self, sid_password: &str) -> Result<(), Error> {
        self.require_opal("Locking SP activation")?;
        opal::activate_locking_sp(self, sid_password, None)
    }

    /// Activates the Locking SP with `range` in Single User Mode.
    pub fn activate_locking_sp_sum(&mut self, range: u32, sid_password: &str) -> Result<(), Error> {
        self.require_sum()?;
        opal::activate_locking_sp(self, sid_password, Some(range))
    }

    /// Take ownership, activate locking, unlock and open up the global
    /// range, and turn the MBR shadow on and done.
    pub fn initial_setup(&mut self, password: &str) -> Result<(), Error> {
        self.require_opal("initial setup")?;
        opal::initial_setup(self, password)
    }

    /// Single User Mode setup of one range: activate, define the range and
    /// give its owner `user_password`.
    pub fn setup_sum(
        &mut self,
        range: u32,
        start: u64,
        length: u64,
        sid_password: &str,
        user_password: &str,
    ) -> Result<(), Error> {
        self.require_sum()?;
        sum::setup(self, range, start, length, sid_password, user_password)
    }

    /// Sets the password of `authority`, authenticating with `password`
    /// as Admin1 (Opal) or as the authority itself (Enterprise).
    pub fn set_password(
        &mut self,
        password: &str,
        authority: Authority,
        new_password: &str,
    ) -> Result<(), Error> {
        match self.require_profile()?.variant {
            SscVariant::Opal1 | SscVariant::Opal2 => {
                opal::set_password(self, password, authority, new_password)
            }
            SscVariant::Enterprise => {
                enterprise::set_password(self, password, authority, new_password)
            }
        }
    }

    /// Single User Mode: a range owner changes its own password.
    pub fn set_password_sum(
        &mut self,
        user: Authority,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), Error> {
        self.require_sum()?;
        sum::set_password(self, user, old_password, new_password)
    }

    /// Enables a Locking SP user authority.
    pub fn enable_user(&mut self, admin_password: &str, user: Authority) -> Result<(), Error> {
        self.require_opal("user authorities")?;
        opal::enable_user(self, admin_password, user)
    }

    /// Locks or unlocks a range.
    pub fn set_locking_range(
        &mut self,
        range: u32,
        state: LockState,
        password: &str,
    ) -> Result<(), Error> {
        match self.require_profile()?.variant {
            SscVariant::Opal1 | SscVariant::Opal2 => {
                opal::set_locking_range(self, range, state, password)
            }
            SscVariant::Enterprise => enterprise::set_locking_range(self, range, state, password),
        }
    }

    /// Single User Mode: the range owner locks or unlocks its range.
    pub fn set_locking_range_sum(
        &mut self,
        range: u32,
        state: LockState,
        user_password: &str,
    ) -> Result<(), Error> {
        self.require_sum()?;
        sum::set_locking_range(self, range, state, user_password)
    }

    /// Enables, disables or write-only enables locking on a range.
    pub fn configure_range(
        &mut self,
        range: u32,
        enable: RangeLockEnable,
        password: &str,
    ) -> Result<(), Error> {
        match self.require_profile()?.variant {
            SscVariant::Opal1 | SscVariant::Opal2 => {
                opal::configure_range(self, range, enable, password)
            }
            SscVariant::Enterprise => enterprise::configure_range(self, range, enable, password),
        }
    }

    /// Defines the bounds of a non-global range and enables read and write
    /// locking on it.
    pub fn setup_range(
        &mut self,
        range: u32,
        start: u64,
        length: u64,
        password: &str,
    ) -> Result<(), Error> {
        if range == 0 {
            return Err(Error::InvalidArgument(
                "the global range cannot be resized".into(),
            ));
        }
        match self.require_profile()?.variant {
            SscVariant::Opal1 | SscVariant::Opal2 => {
                opal::setup_range(self, range, start, length, password)
            }
            SscVariant::Enterprise => enterprise::setup_range(self, range, start, length, password),
        }
    }

    /// Single User Mode: the range owner defines its range.
    pub fn setup_range_sum(
        &mut self,
        range: u32,
        start: u64,
        length: u64,
        user_password: &str,
    ) -> Result<(), Error> {
        if range == 0 {
            return Err(Error::InvalidArgument(
                "the global range cannot be resized".into(),
            ));
        }
        self.require_sum()?;
        sum::setup_range(self, range, start, length, user_password)
    }

    /// Reads every locking range, or only `range`.
    pub fn list_ranges(
        &mut self,
        range: Option<u32>,
        password: &str,
    ) -> Result<Vec<LockingRangeInfo>, Error> {
        match self.require_profile()?.variant {
            SscVariant::Opal1 | SscVariant::Opal2 => opal::list_ranges(self, range, password),
            SscVariant::Enterprise => enterprise::list_ranges(self, range, password),
        }
    }

    /// Regenerates the media encryption key of a range, destroying its
    /// data.
    pub fn rekey(&mut self, range: u32, password: &str) -> Result<(), Error> {
        match self.require_profile()?.variant {
            SscVariant::Opal1 | SscVariant::Opal2 => opal::rekey(self, range, password),
            SscVariant::Enterprise => enterprise::erase(self, range, password),
        }
    }

    /// Enterprise: erases a band as EraseMaster.
    pub fn erase_range(&mut self, range: u32, erase_master_password: &str) -> Result<(), Error> {
        self.require_enterprise("band erase (use Single User Mode erase on Opal)")?;
        enterprise::erase(self, range, erase_master_password)
    }

    /// Single User Mode: erases a range as Admin1.
    pub fn erase_range_sum(&mut self, range: u32, admin_password: &str) -> Result<(), Error> {
        self.require_sum()?;
        sum::erase(self, range, admin_password)
    }

    /// Enterprise: enables the BandMaster of `band`, or of every band.
    pub fn set_bands_enabled(
        &mut self,
        band: Option<u32>,
        erase_master_password: &str,
    ) -> Result<(), Error> {
        self.require_enterprise("band enable")?;
        enterprise::set_bands_enabled(self, band, erase_master_password)
    }

    /// Sets MBRControl.Done.
    pub fn set_mbr_done(&mut self, done: bool, admin_password: &str) -> Result<(), Error> {
        self.require_opal("MBR shadowing")?;
        opal::set_mbr_control(self, None, Some(done), admin_password)
    }

    /// Sets MBRControl.Enable.
    pub fn set_mbr_enable(&mut self, enable: bool, admin_password: &str) -> Result<(), Error> {
        self.require_opal("MBR shadowing")?;
        opal::set_mbr_control(self, Some(enable), None, admin_password)
    }

    /// Writes a pre-boot authentication image into the MBR shadow table.
    /// `progress` is called with the number of bytes written so far.
    pub fn load_pba(
        &mut self,
        admin_password: &str,
        image: &[u8],
        progress: impl FnMut(usize),
    ) -> Result<(), Error> {
        self.require_opal("MBR shadowing")?;
        opal::load_pba(self, admin_password, image, progress)
    }

    /// Reverts the Locking SP as Admin1, optionally keeping the global
    /// range key (and with it, the global range's data).
    pub fn revert_locking_sp(
        &mut self,
        admin_password: &str,
        keep_global: bool,
    ) -> Result<(), Error> {
        self.require_opal("Locking SP revert")?;
        opal::revert_locking_sp(self, admin_password, keep_global)
    }

    /// Reverts the TPer to factory state as SID or PSID. With
    /// `admin_sp_only`, only the Admin SP is reverted (`RevertSP`).
    pub fn revert_tper(
        &mut self,
        password: &str,
        authority: Authority,
        admin_sp_only: bool,
    ) -> Result<(), Error> {
        self.require_profile()?;
        opal::revert_tper(self, password, authority, admin_sp_only)
    }
}
