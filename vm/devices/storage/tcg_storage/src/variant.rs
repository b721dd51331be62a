// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! SSC variant selection and per-variant UID tables.

use std::fmt;
use std::str::FromStr;
use tcg_storage_protocol::Uid;
use tcg_storage_protocol::discovery::GeometryFeature;
use tcg_storage_protocol::discovery::Level0Discovery;
use tcg_storage_protocol::uid;
use tcg_storage_protocol::uid::object;

/// The security subsystem class a device is driven as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SscVariant {
    /// Opal SSC 1.0.
    Opal1,
    /// Opal SSC 2.0.
    Opal2,
    /// Enterprise SSC.
    Enterprise,
}

impl fmt::Display for SscVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SscVariant::Opal1 => "Opal 1.0",
            SscVariant::Opal2 => "Opal 2.0",
            SscVariant::Enterprise => "Enterprise",
        })
    }
}

/// What the device reported it can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[expect(missing_docs)] // mirrors the discovery descriptors
pub struct Capabilities {
    pub locking: bool,
    pub locking_enabled: bool,
    pub mbr_shadow: bool,
    /// Number of locking objects that can be placed in Single User Mode.
    pub single_user_mode: Option<u32>,
    pub data_store: bool,
    pub geometry: Option<GeometryFeature>,
    /// Locking SP admin and user authority counts, when reported.
    pub locking_admins: u16,
    pub locking_users: u16,
}

/// The variant tag plus everything needed to address its objects, fixed
/// at device-open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariantProfile {
    /// Which SSC the device is driven as.
    pub variant: SscVariant,
    /// ComID used for sessions.
    pub base_com_id: u16,
    /// Feature flags from discovery.
    pub capabilities: Capabilities,
}

impl VariantProfile {
    /// Picks the variant from a discovery response, preferring Opal 2.0,
    /// then Opal 1.0, then Enterprise.
    pub fn select(discovery: &Level0Discovery) -> Option<Self> {
        let (variant, ssc) = if let Some(f) = discovery.opal2() {
            (SscVariant::Opal2, f)
        } else if let Some(f) = discovery.opal1() {
            (SscVariant::Opal1, f)
        } else if let Some(f) = discovery.enterprise() {
            (SscVariant::Enterprise, f)
        } else {
            return None;
        };

        let locking = discovery.locking().unwrap_or_default();
        let single_user_mode = match variant {
            SscVariant::Opal2 => discovery
                .single_user_mode()
                .map(|f| f.number_of_locking_objects),
            _ => None,
        };

        Some(Self {
            variant,
            base_com_id: ssc.base_com_id,
            capabilities: Capabilities {
                locking: locking.locking_supported(),
                locking_enabled: locking.locking_enabled(),
                mbr_shadow: variant != SscVariant::Enterprise,
                single_user_mode,
                data_store: discovery.data_store().is_some(),
                geometry: discovery.geometry(),
                locking_admins: ssc.num_locking_admins,
                locking_users: ssc.num_locking_users,
            },
        })
    }

    /// The Locking SP of this variant.
    pub fn locking_sp(&self) -> Uid {
        match self.variant {
            SscVariant::Opal1 | SscVariant::Opal2 => object::LOCKING_SP,
            SscVariant::Enterprise => object::ENTERPRISE_LOCKING_SP,
        }
    }

    /// Locking table row for range (or band) `n`.
    pub fn locking_range(&self, n: u32) -> Uid {
        match self.variant {
            SscVariant::Opal1 | SscVariant::Opal2 => uid::opal_locking_range(n),
            SscVariant::Enterprise => uid::enterprise_band(n),
        }
    }

    /// Whether bands and EGet/ESet are used.
    pub fn is_enterprise(&self) -> bool {
        self.variant == SscVariant::Enterprise
    }
}

/// An authority, as named on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
    /// The anonymous authority.
    Anybody,
    /// Admin SP owner.
    Sid,
    /// Physical SID printed on the drive label.
    Psid,
    /// Locking SP `Admin<n>`.
    Admin(u32),
    /// Locking SP `User<n>`.
    User(u32),
    /// Enterprise `BandMaster<n>`.
    BandMaster(u32),
    /// Enterprise `EraseMaster`.
    EraseMaster,
}

impl Authority {
    /// The authority object UID.
    pub fn uid(self) -> Uid {
        match self {
            Authority::Anybody => object::ANYBODY,
            Authority::Sid => object::SID,
            Authority::Psid => object::PSID,
            Authority::Admin(n) => object::ADMIN1.offset(n.saturating_sub(1)),
            Authority::User(n) => uid::user(n),
            Authority::BandMaster(n) => uid::band_master(n),
            Authority::EraseMaster => object::ERASE_MASTER,
        }
    }

    /// The C_PIN row holding this authority's credential, if it has one
    /// the host can set.
    pub fn c_pin(self) -> Option<Uid> {
        Some(match self {
            Authority::Sid => object::C_PIN_SID,
            Authority::Admin(n) => object::C_PIN_ADMIN1.offset(n.saturating_sub(1)),
            Authority::User(n) => uid::c_pin_user(n),
            Authority::BandMaster(n) => uid::c_pin_band_master(n),
            Authority::EraseMaster => object::C_PIN_ERASE_MASTER,
            Authority::Anybody | Authority::Psid => return None,
        })
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Authority::Anybody => f.write_str("Anybody"),
            Authority::Sid => f.write_str("SID"),
            Authority::Psid => f.write_str("PSID"),
            Authority::Admin(n) => write!(f, "Admin{n}"),
            Authority::User(n) => write!(f, "User{n}"),
            Authority::BandMaster(n) => write!(f, "BandMaster{n}"),
            Authority::EraseMaster => f.write_str("EraseMaster"),
        }
    }
}

/// Unrecognized authority name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown authority {0:?}")]
pub struct ParseAuthorityError(String);

impl FromStr for Authority {
    type Err = ParseAuthorityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseAuthorityError(s.to_string());
        let lower = s.to_ascii_lowercase();
        let indexed = |prefix: &str, min: u32| -> Option<u32> {
            let n = lower.strip_prefix(prefix)?.parse().ok()?;
            (n >= min).then_some(n)
        };
        Ok(match lower.as_str() {
            "anybody" => Authority::Anybody,
            "sid" => Authority::Sid,
            "psid" => Authority::Psid,
            "erasemaster" => Authority::EraseMaster,
            _ => {
                if let Some(n) = indexed("admin", 1) {
                    Authority::Admin(n)
                } else if let Some(n) = indexed("user", 1) {
                    Authority::User(n)
                } else if let Some(n) = indexed("bandmaster", 0) {
                    Authority::BandMaster(n)
                } else {
                    return Err(err());
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tcg_storage_protocol::discovery::FeatureCode;
    use tcg_storage_protocol::discovery::builder::*;

    fn profile(features: &[(FeatureCode, Vec<u8>)]) -> Option<VariantProfile> {
        let buf = level0_response(features);
        VariantProfile::select(&Level0Discovery::parse(&buf).unwrap())
    }

    #[test]
    fn opal2_wins_over_opal1() {
        let p = profile(&[
            (FeatureCode::LOCKING, flags_body(0x01)),
            (FeatureCode::OPAL1, ssc_body(0x0800, 0, 0)),
            (FeatureCode::OPAL2, ssc_body(0x1000, 4, 8)),
            (FeatureCode::SINGLE_USER_MODE, vec![0, 0, 0, 9, 0, 0, 0, 0, 0, 0, 0, 0]),
        ])
        .unwrap();
        assert_eq!(p.variant, SscVariant::Opal2);
        assert_eq!(p.base_com_id, 0x1000);
        assert!(p.capabilities.locking);
        assert_eq!(p.capabilities.single_user_mode, Some(9));
        assert_eq!(p.locking_sp(), object::LOCKING_SP);
        assert_eq!(p.locking_range(1).get(), 0x0000_0802_0003_0001);
    }

    #[test]
    fn enterprise_profile() {
        let p = profile(&[(FeatureCode::ENTERPRISE, ssc_body(0x07fe, 0, 0))]).unwrap();
        assert_eq!(p.variant, SscVariant::Enterprise);
        assert!(!p.capabilities.mbr_shadow);
        assert_eq!(p.locking_sp(), object::ENTERPRISE_LOCKING_SP);
        assert_eq!(p.locking_range(1).get(), 0x0000_0802_0000_0002);
    }

    #[test]
    fn no_ssc_is_not_a_sed() {
        assert!(profile(&[(FeatureCode::TPER, flags_body(0x01))]).is_none());
    }

    #[test]
    fn authority_names() {
        assert_eq!("Admin1".parse::<Authority>().unwrap(), Authority::Admin(1));
        assert_eq!("user9".parse::<Authority>().unwrap(), Authority::User(9));
        assert_eq!(
            "BandMaster0".parse::<Authority>().unwrap(),
            Authority::BandMaster(0)
        );
        assert_eq!("PSID".parse::<Authority>().unwrap(), Authority::Psid);
        assert!("User0".parse::<Authority>().is_err());
        assert!("root".parse::<Authority>().is_err());
        assert_eq!(Authority::User(2).to_string(), "User2");
        assert_eq!(Authority::User(2).c_pin().unwrap().get(), 0x0000_000b_0003_0002);
        assert_eq!(Authority::Psid.c_pin(), None);
    }
}
