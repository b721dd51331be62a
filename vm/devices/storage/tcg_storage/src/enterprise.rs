// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Enterprise SSC management operations.
//!
//! Bands are controlled by their own BandMaster authority and erased by
//! EraseMaster. Tables are accessed with `EGet`/`ESet` and named columns.

use crate::Error;
use crate::credential::Credential;
use crate::device::LockState;
use crate::device::LockingRangeInfo;
use crate::device::RangeLockEnable;
use crate::device::SedDevice;
use crate::session::Session;
use crate::transport::SecurityTransport;
use crate::variant::Authority;
use tcg_storage_protocol::MethodStatus;
use tcg_storage_protocol::token::Value;
use tcg_storage_protocol::uid;
use tcg_storage_protocol::uid::enterprise_column as col;
use tcg_storage_protocol::uid::object;

/// Upper bound on bands probed when enabling every band.
const MAX_BANDS: u32 = 1024;

pub(crate) fn msid<T: SecurityTransport>(dev: &mut SedDevice<T>) -> Result<Vec<u8>, Error> {
    dev.with_session(object::ADMIN_SP, false, None, |s| {
        s.eget_column(object::C_PIN_MSID, col::PIN)?
            .as_bytes()
            .map(<[u8]>::to_vec)
            .ok_or(Error::UnexpectedResponse {
                method: "EGet",
                reason: "MSID PIN is not a byte string",
            })
    })
}

/// Sets the SID, EraseMaster and BandMaster0 credentials, all of which
/// ship set to MSID.
pub(crate) fn take_ownership<T: SecurityTransport>(
    dev: &mut SedDevice<T>,
    new_password: &str,
) -> Result<(), Error> {
    let msid = Credential::plain(msid(dev)?);
    let new = dev.credential(new_password)?;

    dev.with_session(object::ADMIN_SP, true, Some((object::SID, &msid)), |s| {
        s.eset(object::C_PIN_SID, vec![(col::PIN, new.as_bytes().into())])
    })?;
    for authority in [Authority::EraseMaster, Authority::BandMaster(0)] {
        let Some(c_pin) = authority.c_pin() else {
            continue;
        };
        dev.with_session(
            object::ENTERPRISE_LOCKING_SP,
            true,
            Some((authority.uid(), &msid)),
            |s| s.eset(c_pin, vec![(col::PIN, new.as_bytes().into())]),
        )?;
    }
    tracing::info!("took ownership of SID, EraseMaster and BandMaster0");
    Ok(())
}

pub(crate) fn set_sid_password<T: SecurityTransport>(
    dev: &mut SedDevice<T>,
    old: &str,
    new: &str,
) -> Result<(), Error> {
    let old = dev.credential(old)?;
    let new = dev.credential(new)?;
    dev.with_session(object::ADMIN_SP, true, Some((object::SID, &old)), |s| {
        s.eset(object::C_PIN_SID, vec![(col::PIN, new.as_bytes().into())])
    })
}

/// Changes a BandMaster or EraseMaster password, authenticating as that
/// authority.
pub(crate) fn set_password<T: SecurityTransport>(
    dev: &mut SedDevice<T>,
    password: &str,
    authority: Authority,
    new_password: &str,
) -> Result<(), Error> {
    let c_pin = match authority {
        Authority::BandMaster(_) | Authority::EraseMaster => authority.c_pin(),
        _ => None,
    }
    .ok_or_else(|| {
        Error::InvalidArgument(format!(
            "{authority} is not a BandMaster or EraseMaster authority"
        ))
    })?;
    let new = dev.credential(new_password)?;
    dev.locking_session(authority, password, |s| {
        s.eset(c_pin, vec![(col::PIN, new.as_bytes().into())])
    })
}

pub(crate) fn set_locking_range<T: SecurityTransport>(
    dev: &mut SedDevice<T>,
    band: u32,
    state: LockState,
    password: &str,
) -> Result<(), Error> {
    let (read_locked, write_locked) = state.locks();
    dev.locking_session(Authority::BandMaster(band), password, |s| {
        s.eset(
            uid::enterprise_band(band),
            vec![
                (col::READ_LOCKED, read_locked.into()),
                (col::WRITE_LOCKED, write_locked.into()),
            ],
        )
    })
}

pub(crate) fn configure_range<T: SecurityTransport>(
    dev: &mut SedDevice<T>,
    band: u32,
    enable: RangeLockEnable,
    password: &str,
) -> Result<(), Error> {
    dev.locking_session(Authority::BandMaster(band), password, |s| {
        s.eset(
            uid::enterprise_band(band),
            vec![
                (col::READ_LOCK_ENABLED, enable.read.into()),
                (col::WRITE_LOCK_ENABLED, enable.write.into()),
            ],
        )
    })
}

pub(crate) fn setup_range<T: SecurityTransport>(
    dev: &mut SedDevice<T>,
    band: u32,
    start: u64,
    length: u64,
    password: &str,
) -> Result<(), Error> {
    dev.locking_session(Authority::BandMaster(band), password, |s| {
        s.eset(
            uid::enterprise_band(band),
            vec![
                (col::RANGE_START, start.into()),
                (col::RANGE_LENGTH, length.into()),
                (col::READ_LOCK_ENABLED, true.into()),
                (col::WRITE_LOCK_ENABLED, true.into()),
            ],
        )
    })
}

fn band_info(band: u32, columns: &[(String, Value)]) -> Result<LockingRangeInfo, Error> {
    let uint = |name: &str| {
        columns
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_uint())
            .ok_or(Error::UnexpectedResponse {
                method: "EGet",
                reason: "band column missing from result",
            })
    };
    Ok(LockingRangeInfo {
        range: band,
        start: uint(col::RANGE_START)?,
        length: uint(col::RANGE_LENGTH)?,
        read_lock_enabled: uint(col::READ_LOCK_ENABLED)? != 0,
        write_lock_enabled: uint(col::WRITE_LOCK_ENABLED)? != 0,
        read_locked: uint(col::READ_LOCKED)? != 0,
        write_locked: uint(col::WRITE_LOCKED)? != 0,
    })
}

/// Each band has its own BandMaster, so a single password reads a single
/// band. Without `band`, the global band is read as BandMaster0.
pub(crate) fn list_ranges<T: SecurityTransport>(
    dev: &mut SedDevice<T>,
    band: Option<u32>,
    password: &str,
) -> Result<Vec<LockingRangeInfo>, Error> {
    let band = band.unwrap_or(0);
    dev.locking_session(Authority::BandMaster(band), password, |s| {
        let columns = s.eget(uid::enterprise_band(band), col::RANGE_START, col::WRITE_LOCKED)?;
        Ok(vec![band_info(band, &columns)?])
    })
}

/// Cryptographically erases a band as EraseMaster. The band's BandMaster
/// credential is reset by the device.
pub(crate) fn erase<T: SecurityTransport>(
    dev: &mut SedDevice<T>,
    band: u32,
    erase_master_password: &str,
) -> Result<(), Error> {
    dev.locking_session(Authority::EraseMaster, erase_master_password, |s| {
        s.erase(uid::enterprise_band(band))
    })?;
    tracing::info!(band, "erased band");
    Ok(())
}

fn enable_band<T: SecurityTransport>(s: &mut Session<'_, T>, band: u32) -> Result<(), Error> {
    s.eset(uid::band_master(band), vec![(col::ENABLED, true.into())])
}

/// Enables the BandMaster of `band`, or of every band the device has.
pub(crate) fn set_bands_enabled<T: SecurityTransport>(
    dev: &mut SedDevice<T>,
    band: Option<u32>,
    erase_master_password: &str,
) -> Result<(), Error> {
    dev.locking_session(Authority::EraseMaster, erase_master_password, |s| {
        if let Some(band) = band {
            return enable_band(s, band);
        }
        for band in 0..MAX_BANDS {
            match enable_band(s, band) {
                Ok(()) => {}
                // Past the last band.
                Err(err)
                    if band > 0
                        && err.method_status() == Some(MethodStatus::INVALID_PARAMETER) =>
                {
                    tracing::debug!(bands = band, "enabled all bands");
                    break;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    })
}
