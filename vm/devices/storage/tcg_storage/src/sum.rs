// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Opal 2.0 Single User Mode.
//!
//! A range in Single User Mode is owned by the user authority whose number
//! is one past the range number (User1 owns the global range). Only that
//! user can lock, unlock or redefine it; Admin1 keeps the ability to erase
//! it.

use crate::Error;
use crate::device::LockState;
use crate::device::SedDevice;
use crate::opal;
use crate::transport::SecurityTransport;
use crate::variant::Authority;
use tcg_storage_protocol::uid;
use tcg_storage_protocol::uid::column;

/// The authority owning `range` in Single User Mode.
fn range_owner(range: u32) -> Authority {
    Authority::User(range.saturating_add(1))
}

pub(crate) fn setup<T: SecurityTransport>(
    dev: &mut SedDevice<T>,
    range: u32,
    start: u64,
    length: u64,
    sid_password: &str,
    user_password: &str,
) -> Result<(), Error> {
    opal::activate_locking_sp(dev, sid_password, Some(range))?;

    // Admin1 inherits the SID credential on activation.
    let owner = range_owner(range);
    opal::set_password(dev, sid_password, owner, user_password)?;

    if range == 0 {
        dev.locking_session(owner, user_password, |s| {
            s.set(
                uid::opal_locking_range(0),
                vec![
                    (column::READ_LOCK_ENABLED, true.into()),
                    (column::WRITE_LOCK_ENABLED, true.into()),
                ],
            )
        })?;
    } else {
        setup_range(dev, range, start, length, user_password)?;
    }
    tracing::info!(range, %owner, "configured Single User Mode range");
    Ok(())
}

pub(crate) fn set_password<T: SecurityTransport>(
    dev: &mut SedDevice<T>,
    user: Authority,
    old_password: &str,
    new_password: &str,
) -> Result<(), Error> {
    let c_pin = match user {
        Authority::User(_) => user.c_pin(),
        _ => None,
    }
    .ok_or_else(|| Error::InvalidArgument(format!("{user} does not own a range")))?;
    let new = dev.credential(new_password)?;
    dev.locking_session(user, old_password, |s| {
        s.set(c_pin, vec![(column::PIN, new.as_bytes().into())])
    })
}

pub(crate) fn set_locking_range<T: SecurityTransport>(
    dev: &mut SedDevice<T>,
    range: u32,
    state: LockState,
    user_password: &str,
) -> Result<(), Error> {
    let (read_locked, write_locked) = state.locks();
    dev.locking_session(range_owner(range), user_password, |s| {
        s.set(
            uid::opal_locking_range(range),
            vec![
                (column::READ_LOCKED, read_locked.into()),
                (column::WRITE_LOCKED, write_locked.into()),
            ],
        )
    })
}

pub(crate) fn setup_range<T: SecurityTransport>(
    dev: &mut SedDevice<T>,
    range: u32,
    start: u64,
    length: u64,
    user_password: &str,
) -> Result<(), Error> {
    dev.locking_session(range_owner(range), user_password, |s| {
        s.set(
            uid::opal_locking_range(range),
            vec![
                (column::RANGE_START, start.into()),
                (column::RANGE_LENGTH, length.into()),
                (column::READ_LOCK_ENABLED, true.into()),
                (column::WRITE_LOCK_ENABLED, true.into()),
            ],
        )
    })
}

pub(crate) fn erase<T: SecurityTransport>(
    dev: &mut SedDevice<T>,
    range: u32,
    admin_password: &str,
) -> Result<(), Error> {
    dev.locking_session(Authority::Admin(1), admin_password, |s| {
        s.erase(uid::opal_locking_range(range))
    })?;
    tracing::info!(range, "erased Single User Mode range");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::FakeTper;
    use crate::test_helpers::Reply;
    use crate::test_helpers::opal2_device;
    use crate::test_helpers::test_config;
    use tcg_storage_protocol::discovery::FeatureCode;
    use tcg_storage_protocol::discovery::builder::*;
    use tcg_storage_protocol::uid::life_cycle;
    use tcg_storage_protocol::uid::method;
    use tcg_storage_protocol::uid::object;

    #[test]
    fn setup_hands_range_to_its_owner() {
        let (fake, mut dev) = opal2_device();
        fake.push(Reply::columns(&[(
            column::LIFE_CYCLE,
            life_cycle::MANUFACTURED_INACTIVE.into(),
        )]));
        dev.setup_sum(1, 2048, 4096, "sid", "user").unwrap();

        let calls: Vec<_> = fake
            .calls()
            .iter()
            .map(|c| (c.invoking, c.method))
            .collect();
        assert_eq!(
            calls,
            [
                (object::LOCKING_SP, method::GET),
                (object::LOCKING_SP, method::ACTIVATE),
                (uid::c_pin_user(2), method::SET),
                (object::OPAL_LOCKING_RANGE1, method::SET),
            ]
        );
        let starts = fake.session_starts();
        assert_eq!(starts[0].authority, Some(object::SID));
        assert_eq!(starts[1].authority, Some(object::ADMIN1));
        assert_eq!(starts[2].authority, Some(uid::user(2)));
        assert_eq!(starts[2].challenge.as_deref(), Some(&b"user"[..]));
    }

    #[test]
    fn owner_locks_its_range() {
        let (fake, mut dev) = opal2_device();
        dev.set_locking_range_sum(3, LockState::Locked, "user")
            .unwrap();
        assert_eq!(fake.session_starts()[0].authority, Some(uid::user(4)));
        assert_eq!(
            fake.last_call().unwrap().invoking,
            uid::opal_locking_range(3)
        );
    }

    #[test]
    fn user_changes_own_password() {
        let (fake, mut dev) = opal2_device();
        dev.set_password_sum(Authority::User(2), "old", "new")
            .unwrap();
        let start = fake.session_starts().pop().unwrap();
        assert_eq!(start.authority, Some(uid::user(2)));
        assert_eq!(start.challenge.as_deref(), Some(&b"old"[..]));
        assert_eq!(fake.last_call().unwrap().invoking, uid::c_pin_user(2));
    }

    #[test]
    fn admin_erases_range() {
        let (fake, mut dev) = opal2_device();
        dev.erase_range_sum(1, "admin").unwrap();
        let call = fake.last_call().unwrap();
        assert_eq!(call.invoking, object::OPAL_LOCKING_RANGE1);
        assert_eq!(call.method, method::ERASE);
        assert_eq!(fake.session_starts()[0].authority, Some(object::ADMIN1));
    }

    #[test]
    fn requires_single_user_mode_feature() {
        let fake = FakeTper::new();
        fake.set_discovery(level0_response(&[
            (FeatureCode::LOCKING, flags_body(0x01)),
            (FeatureCode::OPAL2, ssc_body(0x1000, 4, 8)),
        ]));
        let mut dev = SedDevice::open(fake.clone(), test_config()).unwrap();
        let err = dev
            .set_locking_range_sum(1, LockState::ReadWrite, "user")
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
        assert_eq!(fake.sends(), 0);
    }
}
