// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Opal 1.0 / 2.0 management operations.
//!
//! Each operation runs in its own session. Locking SP operations
//! authenticate as Admin1; Admin SP operations as SID.

use crate::Error;
use crate::credential::Credential;
use crate::device::LockState;
use crate::device::LockingRangeInfo;
use crate::device::RangeLockEnable;
use crate::device::SedDevice;
use crate::session::Session;
use crate::transport::SecurityTransport;
use crate::variant::Authority;
use tcg_storage_protocol::Uid;
use tcg_storage_protocol::compacket::FRAME_OVERHEAD;
use tcg_storage_protocol::token::Value;
use tcg_storage_protocol::uid;
use tcg_storage_protocol::uid::column;
use tcg_storage_protocol::uid::life_cycle;
use tcg_storage_protocol::uid::object;

/// Token overhead of a byte-table `Set` around its data.
const SET_BYTES_OVERHEAD: usize = 64;

pub(crate) fn msid<T: SecurityTransport>(dev: &mut SedDevice<T>) -> Result<Vec<u8>, Error> {
    dev.with_session(object::ADMIN_SP, false, None, |s| {
        s.get_column(object::C_PIN_MSID, column::PIN)?
            .as_bytes()
            .map(<[u8]>::to_vec)
            .ok_or(Error::UnexpectedResponse {
                method: "Get",
                reason: "MSID PIN is not a byte string",
            })
    })
}

pub(crate) fn take_ownership<T: SecurityTransport>(
    dev: &mut SedDevice<T>,
    new_password: &str,
) -> Result<(), Error> {
    let msid = Credential::plain(msid(dev)?);
    let new = dev.credential(new_password)?;
    dev.with_session(object::ADMIN_SP, true, Some((object::SID, &msid)), |s| {
        s.set(object::C_PIN_SID, vec![(column::PIN, new.as_bytes().into())])
    })?;
    tracing::info!("took ownership of the SID authority");
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
        s.set(object::C_PIN_SID, vec![(column::PIN, new.as_bytes().into())])
    })
}

pub(crate) fn activate_locking_sp<T: SecurityTransport>(
    dev: &mut SedDevice<T>,
    sid_password: &str,
    single_user_range: Option<u32>,
) -> Result<(), Error> {
    let profile = dev.require_profile()?;
    let sid = dev.credential(sid_password)?;
    dev.with_session(object::ADMIN_SP, true, Some((object::SID, &sid)), |s| {
        let state = s.get_uint(object::LOCKING_SP, column::LIFE_CYCLE)?;
        if state != life_cycle::MANUFACTURED_INACTIVE {
            return Err(Error::WrongLifeCycle {
                sp: object::LOCKING_SP,
                life_cycle: state,
                expected: life_cycle::MANUFACTURED_INACTIVE,
            });
        }
        let single_user = single_user_range.map(|range| vec![profile.locking_range(range)]);
        s.activate(object::LOCKING_SP, single_user)
    })?;
    tracing::info!(single_user_range, "activated the Locking SP");
    Ok(())
}

pub(crate) fn initial_setup<T: SecurityTransport>(
    dev: &mut SedDevice<T>,
    password: &str,
) -> Result<(), Error> {
    take_ownership(dev, password)?;
    activate_locking_sp(dev, password, None)?;
    configure_range(dev, 0, RangeLockEnable::DISABLED, password)?;
    set_locking_range(dev, 0, LockState::ReadWrite, password)?;
    set_mbr_control(dev, None, Some(true), password)?;
    set_mbr_control(dev, Some(true), None, password)?;
    Ok(())
}

/// Runs `f` in a Locking SP session as Admin1.
fn as_admin1<T: SecurityTransport, R>(
    dev: &mut SedDevice<T>,
    password: &str,
    f: impl FnOnce(&mut Session<'_, T>) -> Result<R, Error>,
) -> Result<R, Error> {
    dev.locking_session(Authority::Admin(1), password, f)
}

pub(crate) fn set_password<T: SecurityTransport>(
    dev: &mut SedDevice<T>,
    password: &str,
    authority: Authority,
    new_password: &str,
) -> Result<(), Error> {
    let c_pin = match authority {
        Authority::Admin(_) | Authority::User(_) => authority.c_pin(),
        _ => None,
    }
    .ok_or_else(|| {
        Error::InvalidArgument(format!(
            "{authority} is not a Locking SP admin or user authority"
        ))
    })?;
    let new = dev.credential(new_password)?;
    as_admin1(dev, password, |s| {
        s.set(c_pin, vec![(column::PIN, new.as_bytes().into())])
    })
}

pub(crate) fn enable_user<T: SecurityTransport>(
    dev: &mut SedDevice<T>,
    admin_password: &str,
    user: Authority,
) -> Result<(), Error> {
    if !matches!(user, Authority::User(_)) {
        return Err(Error::InvalidArgument(format!("{user} is not a user authority")));
    }
    as_admin1(dev, admin_password, |s| {
        s.set(user.uid(), vec![(column::AUTHORITY_ENABLED, true.into())])
    })
}

pub(crate) fn set_locking_range<T: SecurityTransport>(
    dev: &mut SedDevice<T>,
    range: u32,
    state: LockState,
    password: &str,
) -> Result<(), Error> {
    let (read_locked, write_locked) = state.locks();
    let row = uid::opal_locking_range(range);
    as_admin1(dev, password, |s| {
        s.set(
            row,
            vec![
                (column::READ_LOCKED, read_locked.into()),
                (column::WRITE_LOCKED, write_locked.into()),
            ],
        )
    })
}

pub(crate) fn configure_range<T: SecurityTransport>(
    dev: &mut SedDevice<T>,
    range: u32,
    enable: RangeLockEnable,
    password: &str,
) -> Result<(), Error> {
    let row = uid::opal_locking_range(range);
    as_admin1(dev, password, |s| {
        s.set(
            row,
            vec![
                (column::READ_LOCK_ENABLED, enable.read.into()),
                (column::WRITE_LOCK_ENABLED, enable.write.into()),
            ],
        )
    })
}

pub(crate) fn setup_range<T: SecurityTransport>(
    dev: &mut SedDevice<T>,
    range: u32,
    start: u64,
    length: u64,
    password: &str,
) -> Result<(), Error> {
    let row = uid::opal_locking_range(range);
    as_admin1(dev, password, |s| {
        s.set(
            row,
            vec![
                (column::RANGE_START, start.into()),
                (column::RANGE_LENGTH, length.into()),
                (column::READ_LOCK_ENABLED, true.into()),
                (column::WRITE_LOCK_ENABLED, true.into()),
            ],
        )
    })
}

/// Largest MaxRanges accepted from a device; Opal caps the Locking table
/// at 0xFFFF non-global ranges.
const MAX_LOCKING_RANGES: u64 = 0xffff;

fn range_info(range: u32, columns: &[(u64, Value)]) -> Result<LockingRangeInfo, Error> {
    let uint = |c: u64| {
        columns
            .iter()
            .find(|(n, _)| *n == c)
            .and_then(|(_, v)| v.as_uint())
            .ok_or(Error::UnexpectedResponse {
                method: "Get",
                reason: "locking range column missing from result",
            })
    };
    Ok(LockingRangeInfo {
        range,
        start: uint(column::RANGE_START)?,
        length: uint(column::RANGE_LENGTH)?,
        read_lock_enabled: uint(column::READ_LOCK_ENABLED)? != 0,
        write_lock_enabled: uint(column::WRITE_LOCK_ENABLED)? != 0,
        read_locked: uint(column::READ_LOCKED)? != 0,
        write_locked: uint(column::WRITE_LOCKED)? != 0,
    })
}

pub(crate) fn list_ranges<T: SecurityTransport>(
    dev: &mut SedDevice<T>,
    range: Option<u32>,
    password: &str,
) -> Result<Vec<LockingRangeInfo>, Error> {
    as_admin1(dev, password, |s| {
        let ranges = match range {
            Some(range) => range..=range,
            None => {
                let max = s.get_uint(object::LOCKING_INFO, column::MAX_RANGES)?;
                if max > MAX_LOCKING_RANGES {
                    return Err(Error::UnexpectedResponse {
                        method: "Get",
                        reason: "MaxRanges exceeds the Opal limit",
                    });
                }
                0..=max as u32
            }
        };
        ranges
            .map(|range| {
                let columns = s.get(
                    uid::opal_locking_range(range),
                    column::RANGE_START,
                    column::WRITE_LOCKED,
                )?;
                range_info(range, &columns)
            })
            .collect()
    })
}

pub(crate) fn rekey<T: SecurityTransport>(
    dev: &mut SedDevice<T>,
    range: u32,
    password: &str,
) -> Result<(), Error> {
    as_admin1(dev, password, |s| {
        let key = s
            .get_column(uid::opal_locking_range(range), column::ACTIVE_KEY)?
            .as_bytes()
            .and_then(Uid::from_slice)
            .ok_or(Error::UnexpectedResponse {
                method: "Get",
                reason: "ActiveKey is not a UID",
            })?;
        s.gen_key(key)
    })?;
    tracing::info!(range, "regenerated range key");
    Ok(())
}

pub(crate) fn set_mbr_control<T: SecurityTransport>(
    dev: &mut SedDevice<T>,
    enable: Option<bool>,
    done: Option<bool>,
    password: &str,
) -> Result<(), Error> {
    let mut values = Vec::new();
    if let Some(enable) = enable {
        values.push((column::MBR_ENABLE, enable.into()));
    }
    if let Some(done) = done {
        values.push((column::MBR_DONE, done.into()));
    }
    as_admin1(dev, password, |s| s.set(object::MBR_CONTROL, values))
}

pub(crate) fn load_pba<T: SecurityTransport>(
    dev: &mut SedDevice<T>,
    admin_password: &str,
    image: &[u8],
    mut progress: impl FnMut(usize),
) -> Result<(), Error> {
    let config = dev.tper.config();
    let chunk_size = config
        .pba_chunk_size
        .min(
            config
                .max_packet_size
                .saturating_sub(FRAME_OVERHEAD + SET_BYTES_OVERHEAD),
        );
    if chunk_size == 0 {
        return Err(Error::InvalidArgument(
            "packet size too small to carry PBA data".into(),
        ));
    }

    as_admin1(dev, admin_password, |s| {
        // Some drives leave Rows out of the MBR table descriptor.
        match s.get_uint(object::TABLE_MBR, column::TABLE_ROWS) {
            Ok(capacity) if image.len() as u64 > capacity => {
                return Err(Error::InvalidArgument(format!(
                    "PBA image of {} bytes exceeds the {capacity} byte MBR table",
                    image.len()
                )));
            }
            Ok(_) => {}
            Err(Error::UnexpectedResponse { .. }) => {
                tracing::debug!("MBR table size not reported");
            }
            Err(err) => return Err(err),
        }
        let mut written = 0;
        for chunk in image.chunks(chunk_size) {
            s.set_bytes(object::MBR, written as u64, chunk)?;
            written += chunk.len();
            progress(written);
        }
        tracing::info!(bytes = written, "loaded PBA image");
        Ok(())
    })
}

pub(crate) fn revert_locking_sp<T: SecurityTransport>(
    dev: &mut SedDevice<T>,
    admin_password: &str,
    keep_global: bool,
) -> Result<(), Error> {
    as_admin1(dev, admin_password, |s| s.revert_sp(keep_global))?;
    tracing::info!(keep_global, "reverted the Locking SP");
    Ok(())
}

/// Reverts as SID (hashed password) or PSID (printed label, verbatim).
pub(crate) fn revert_tper<T: SecurityTransport>(
    dev: &mut SedDevice<T>,
    password: &str,
    authority: Authority,
    admin_sp_only: bool,
) -> Result<(), Error> {
    let credential = match authority {
        Authority::Sid => dev.credential(password)?,
        Authority::Psid => Credential::plain(password.as_bytes()),
        _ => {
            return Err(Error::InvalidArgument(format!(
                "TPer revert requires SID or PSID, not {authority}"
            )));
        }
    };
    dev.with_session(
        object::ADMIN_SP,
        true,
        Some((authority.uid(), &credential)),
        |s| {
            if admin_sp_only {
                s.revert_sp(false)
            } else {
                s.revert(object::ADMIN_SP)
            }
        },
    )?;
    tracing::info!(%authority, admin_sp_only, "reverted the TPer");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::FakeTper;
    use crate::test_helpers::Reply;
    use crate::test_helpers::opal1_device;
    use crate::test_helpers::opal2_device;
    use tcg_storage_protocol::MethodStatus;
    use tcg_storage_protocol::uid::method;
    use tcg_storage_protocol::uid::param;

    fn set_params(values: &[(u64, Value)]) -> Vec<Value> {
        vec![Value::named(
            param::SET_VALUES,
            Value::List(
                values
                    .iter()
                    .map(|(c, v)| Value::named(*c, v.clone()))
                    .collect(),
            ),
        )]
    }

    fn methods(fake: &FakeTper) -> Vec<(Uid, Uid)> {
        fake.calls().iter().map(|c| (c.invoking, c.method)).collect()
    }

    #[test]
    fn take_ownership_uses_msid() {
        let (fake, mut dev) = opal2_device();
        fake.push(Reply::columns(&[(column::PIN, b"MSIDPIN".to_vec().into())]));
        dev.take_ownership("new").unwrap();

        let starts = fake.session_starts();
        assert_eq!(starts.len(), 2);
        assert_eq!(starts[0].sp, object::ADMIN_SP);
        assert_eq!(starts[0].authority, None);
        assert!(!starts[0].write);
        assert_eq!(starts[1].authority, Some(object::SID));
        assert_eq!(starts[1].challenge.as_deref(), Some(&b"MSIDPIN"[..]));

        let call = fake.last_call().unwrap();
        assert_eq!(call.invoking, object::C_PIN_SID);
        assert_eq!(
            call.params,
            set_params(&[(column::PIN, b"new".to_vec().into())])
        );
        assert_eq!(fake.end_of_sessions(), 2);
    }

    #[test]
    fn activate_checks_life_cycle() {
        let (fake, mut dev) = opal2_device();
        fake.push(Reply::columns(&[(
            column::LIFE_CYCLE,
            life_cycle::MANUFACTURED.into(),
        )]));
        let err = dev.activate_locking_sp("sid").unwrap_err();
        assert!(matches!(
            err,
            Error::WrongLifeCycle {
                life_cycle: life_cycle::MANUFACTURED,
                ..
            }
        ));
        assert_eq!(methods(&fake), [(object::LOCKING_SP, method::GET)]);
    }

    #[test]
    fn activate_with_single_user_range() {
        let (fake, mut dev) = opal2_device();
        fake.push(Reply::columns(&[(
            column::LIFE_CYCLE,
            life_cycle::MANUFACTURED_INACTIVE.into(),
        )]));
        dev.activate_locking_sp_sum(1, "sid").unwrap();
        let call = fake.last_call().unwrap();
        assert_eq!(call.invoking, object::LOCKING_SP);
        assert_eq!(call.method, method::ACTIVATE);
        assert_eq!(
            call.params,
            [Value::named(
                param::SINGLE_USER_SELECTION_LIST,
                Value::list([object::OPAL_LOCKING_RANGE1])
            )]
        );
    }

    #[test]
    fn initial_setup_sequence() {
        let (fake, mut dev) = opal2_device();
        fake.push(Reply::columns(&[(column::PIN, b"MSID".to_vec().into())]));
        fake.push(Reply::ok());
        fake.push(Reply::columns(&[(
            column::LIFE_CYCLE,
            life_cycle::MANUFACTURED_INACTIVE.into(),
        )]));
        dev.initial_setup("pw").unwrap();

        assert_eq!(
            methods(&fake),
            [
                (object::C_PIN_MSID, method::GET),
                (object::C_PIN_SID, method::SET),
                (object::LOCKING_SP, method::GET),
                (object::LOCKING_SP, method::ACTIVATE),
                (object::LOCKING_RANGE_GLOBAL, method::SET),
                (object::LOCKING_RANGE_GLOBAL, method::SET),
                (object::MBR_CONTROL, method::SET),
                (object::MBR_CONTROL, method::SET),
            ]
        );
        let calls = fake.calls();
        assert_eq!(
            calls[4].params,
            set_params(&[
                (column::READ_LOCK_ENABLED, false.into()),
                (column::WRITE_LOCK_ENABLED, false.into()),
            ])
        );
        assert_eq!(
            calls[6].params,
            set_params(&[(column::MBR_DONE, true.into())])
        );
        assert_eq!(
            calls[7].params,
            set_params(&[(column::MBR_ENABLE, true.into())])
        );
    }

    #[test]
    fn initial_setup_stops_at_first_failure() {
        let (fake, mut dev) = opal2_device();
        fake.push(Reply::columns(&[(column::PIN, b"MSID".to_vec().into())]));
        fake.push(Reply::status(MethodStatus::NOT_AUTHORIZED));
        let err = dev.initial_setup("pw").unwrap_err();
        assert_eq!(err.method_status(), Some(MethodStatus::NOT_AUTHORIZED));
        assert_eq!(fake.calls().len(), 2);
    }

    #[test]
    fn lock_and_unlock() {
        let (fake, mut dev) = opal1_device();
        dev.set_locking_range(2, LockState::ReadOnly, "admin").unwrap();
        let call = fake.last_call().unwrap();
        assert_eq!(call.invoking, uid::opal_locking_range(2));
        assert_eq!(
            call.params,
            set_params(&[
                (column::READ_LOCKED, false.into()),
                (column::WRITE_LOCKED, true.into()),
            ])
        );
    }

    #[test]
    fn set_user_password() {
        let (fake, mut dev) = opal2_device();
        dev.set_password("admin", Authority::User(2), "secret").unwrap();
        let call = fake.last_call().unwrap();
        assert_eq!(call.invoking, uid::c_pin_user(2));
        assert_eq!(
            fake.session_starts()[0].authority,
            Some(object::ADMIN1)
        );

        let err = dev
            .set_password("admin", Authority::Sid, "secret")
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn enable_user_sets_enabled_column() {
        let (fake, mut dev) = opal2_device();
        dev.enable_user("admin", Authority::User(1)).unwrap();
        let call = fake.last_call().unwrap();
        assert_eq!(call.invoking, object::USER1);
        assert_eq!(
            call.params,
            set_params(&[(column::AUTHORITY_ENABLED, true.into())])
        );
    }

    #[test]
    fn list_all_ranges() {
        let (fake, mut dev) = opal2_device();
        fake.push(Reply::columns(&[(column::MAX_RANGES, 1u64.into())]));
        fake.push(Reply::columns(&[
            (column::RANGE_START, 0u64.into()),
            (column::RANGE_LENGTH, 0u64.into()),
            (column::READ_LOCK_ENABLED, false.into()),
            (column::WRITE_LOCK_ENABLED, false.into()),
            (column::READ_LOCKED, false.into()),
            (column::WRITE_LOCKED, false.into()),
        ]));
        fake.push(Reply::columns(&[
            (column::RANGE_START, 4096u64.into()),
            (column::RANGE_LENGTH, 8192u64.into()),
            (column::READ_LOCK_ENABLED, true.into()),
            (column::WRITE_LOCK_ENABLED, true.into()),
            (column::READ_LOCKED, true.into()),
            (column::WRITE_LOCKED, true.into()),
        ]));
        let ranges = dev.list_ranges(None, "admin").unwrap();
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].range, 0);
        assert!(!ranges[0].read_lock_enabled);
        assert_eq!(
            ranges[1],
            LockingRangeInfo {
                range: 1,
                start: 4096,
                length: 8192,
                read_lock_enabled: true,
                write_lock_enabled: true,
                read_locked: true,
                write_locked: true,
            }
        );
        assert_eq!(fake.end_of_sessions(), 1);
    }

    #[test]
    fn undescribed_range_is_an_error() {
        let (fake, mut dev) = opal2_device();
        fake.push(Reply::columns(&[
            (column::RANGE_START, 0u64.into()),
            (column::RANGE_LENGTH, 0u64.into()),
        ]));
        let err = dev.list_ranges(Some(1), "admin").unwrap_err();
        assert!(matches!(err, Error::UnexpectedResponse { method: "Get", .. }));
        assert_eq!(fake.end_of_sessions(), 1);
    }

    #[test]
    fn oversized_max_ranges_is_rejected() {
        let (fake, mut dev) = opal2_device();
        fake.push(Reply::columns(&[(
            column::MAX_RANGES,
            (MAX_LOCKING_RANGES + 1).into(),
        )]));
        let err = dev.list_ranges(None, "admin").unwrap_err();
        assert!(matches!(err, Error::UnexpectedResponse { .. }));
        assert_eq!(methods(&fake), [(object::LOCKING_INFO, method::GET)]);
    }

    #[test]
    fn rekey_regenerates_active_key() {
        let (fake, mut dev) = opal2_device();
        fake.push(Reply::columns(&[(
            column::ACTIVE_KEY,
            uid::opal_range_key(1).into(),
        )]));
        dev.rekey(1, "admin").unwrap();
        let call = fake.last_call().unwrap();
        assert_eq!(call.invoking, object::K_AES_256_RANGE1);
        assert_eq!(call.method, method::GENKEY);
    }

    #[test]
    fn pba_is_written_in_chunks() {
        let (fake, mut dev) = opal2_device();
        fake.push(Reply::columns(&[(column::TABLE_ROWS, 0x0800_0000u64.into())]));
        let image = vec![0x5a; 2500];
        let mut progress = Vec::new();
        dev.load_pba("admin", &image, |n| progress.push(n)).unwrap();
        assert_eq!(progress, [1024, 2048, 2500]);

        let writes: Vec<_> = fake
            .calls()
            .into_iter()
            .filter(|c| c.invoking == object::MBR)
            .collect();
        assert_eq!(writes.len(), 3);
        assert_eq!(
            writes[2].params,
            [
                Value::named(param::SET_WHERE, 2048u64),
                Value::named(param::SET_VALUES, vec![0x5au8; 452]),
            ]
        );
    }

    #[test]
    fn pba_without_reported_table_size() {
        let (fake, mut dev) = opal2_device();
        fake.push(Reply::columns(&[]));
        let mut progress = Vec::new();
        dev.load_pba("admin", &[0x5a; 16], |n| progress.push(n)).unwrap();
        assert_eq!(progress, [16]);

        let call = fake.last_call().unwrap();
        assert_eq!(call.invoking, object::MBR);
        assert_eq!(
            call.params,
            [
                Value::named(param::SET_WHERE, 0u64),
                Value::named(param::SET_VALUES, vec![0x5au8; 16]),
            ]
        );
    }

    #[test]
    fn pba_table_size_failure_is_not_ignored() {
        let (fake, mut dev) = opal2_device();
        fake.push(Reply::status(MethodStatus::NOT_AUTHORIZED));
        let err = dev.load_pba("admin", &[0; 16], |_| {}).unwrap_err();
        assert_eq!(err.method_status(), Some(MethodStatus::NOT_AUTHORIZED));
        assert_eq!(fake.calls().len(), 1);
    }

    #[test]
    fn pba_larger_than_shadow_is_rejected() {
        let (fake, mut dev) = opal2_device();
        fake.push(Reply::columns(&[(column::TABLE_ROWS, 100u64.into())]));
        let err = dev.load_pba("admin", &[0; 101], |_| {}).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(fake.calls().len(), 1);
    }

    #[test]
    fn revert_locking_sp_keeps_global_key() {
        let (fake, mut dev) = opal2_device();
        dev.revert_locking_sp("admin", true).unwrap();
        let call = fake.last_call().unwrap();
        assert_eq!(call.invoking, object::THIS_SP);
        assert_eq!(call.method, method::REVERTSP);
        assert_eq!(
            call.params,
            [Value::named(param::KEEP_GLOBAL_RANGE_KEY, true)]
        );
        // The device ends the session itself.
        assert_eq!(fake.end_of_sessions(), 0);
    }

    #[test]
    fn revert_tper_as_sid() {
        let (fake, mut dev) = opal2_device();
        dev.revert_tper("sid", Authority::Sid, false).unwrap();
        let call = fake.last_call().unwrap();
        assert_eq!(call.invoking, object::ADMIN_SP);
        assert_eq!(call.method, method::REVERT);
        assert_eq!(fake.session_starts()[0].authority, Some(object::SID));

        let err = dev
            .revert_tper("x", Authority::Admin(1), false)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
