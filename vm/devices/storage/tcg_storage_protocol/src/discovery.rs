// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Level 0 Discovery (Core Specification 3.3.6), read with security
//! protocol 1 on ComID 1.

use crate::packed_nums::*;
use bitfield_struct::bitfield;
use thiserror::Error;
use zerocopy::FromBytes;
use zerocopy::FromZeros;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// Security protocol used for discovery and all session traffic.
pub const SECURITY_PROTOCOL_TCG: u8 = 0x01;
/// ComID of the Level 0 Discovery request.
pub const LEVEL0_DISCOVERY_COM_ID: u16 = 0x0001;

/// Feature codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeatureCode(pub u16);

impl FeatureCode {
    pub const TPER: Self = Self(0x0001);
    pub const LOCKING: Self = Self(0x0002);
    pub const GEOMETRY: Self = Self(0x0003);
    pub const ENTERPRISE: Self = Self(0x0100);
    pub const OPAL1: Self = Self(0x0200);
    pub const SINGLE_USER_MODE: Self = Self(0x0201);
    pub const DATA_STORE: Self = Self(0x0202);
    pub const OPAL2: Self = Self(0x0203);
}

/// Discovery response header.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct Level0Header {
    /// Length of the response, excluding this field.
    pub length: u32_be,
    pub major_version: u16_be,
    pub minor_version: u16_be,
    pub reserved: [u8; 8],
    pub vendor: [u8; 32],
}

/// Header in front of each feature descriptor.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct FeatureHeader {
    pub code: u16_be,
    /// Version in the high nibble.
    pub version: u8,
    /// Length of the descriptor body.
    pub length: u8,
}

const _: () = assert!(size_of::<Level0Header>() == 48);

#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct TperFlags {
    pub sync: bool,
    pub async_: bool,
    pub ack_nak: bool,
    pub buffer_management: bool,
    pub streaming: bool,
    _reserved: bool,
    pub com_id_management: bool,
    _reserved2: bool,
}

#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct LockingFlags {
    pub locking_supported: bool,
    pub locking_enabled: bool,
    pub locked: bool,
    pub media_encryption: bool,
    pub mbr_enabled: bool,
    pub mbr_done: bool,
    #[bits(2)]
    _reserved: u8,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
struct RawFlagsFeature {
    flags: u8,
    reserved: [u8; 11],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
struct RawGeometry {
    align: u8,
    reserved: [u8; 7],
    logical_block_size: u32_be,
    alignment_granularity: u64_be,
    lowest_aligned_lba: u64_be,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
struct RawSsc {
    base_com_id: u16_be,
    num_com_ids: u16_be,
    range_crossing: u8,
    num_locking_admins: u16_be,
    num_locking_users: u16_be,
    initial_pin: u8,
    reverted_pin: u8,
    reserved: [u8; 5],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
struct RawSingleUserMode {
    number_of_locking_objects: u32_be,
    policy: u8,
    reserved: [u8; 7],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
struct RawDataStore {
    reserved: u16_be,
    max_tables: u16_be,
    max_size: u32_be,
    alignment: u32_be,
}

/// Geometry reporting feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometryFeature {
    pub align_required: bool,
    pub logical_block_size: u32,
    pub alignment_granularity: u64,
    pub lowest_aligned_lba: u64,
}

/// SSC feature descriptor shared by Enterprise, Opal1 and Opal2. The admin
/// and user counts and PIN indicators are only reported by Opal2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SscFeature {
    pub base_com_id: u16,
    pub num_com_ids: u16,
    pub range_crossing: bool,
    pub num_locking_admins: u16,
    pub num_locking_users: u16,
    pub initial_pin: u8,
    pub reverted_pin: u8,
}

/// Single User Mode feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SingleUserModeFeature {
    pub number_of_locking_objects: u32,
    pub any_in_sum: bool,
    pub all_in_sum: bool,
    /// Range owners, rather than Admins, control the ranges' policies.
    pub policy: bool,
}

/// DataStore table feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataStoreFeature {
    pub max_tables: u16,
    pub max_size: u32,
    pub alignment: u32,
}

/// A parsed feature descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feature {
    Tper(TperFlags),
    Locking(LockingFlags),
    Geometry(GeometryFeature),
    Enterprise(SscFeature),
    Opal1(SscFeature),
    Opal2(SscFeature),
    SingleUserMode(SingleUserModeFeature),
    DataStore(DataStoreFeature),
    Unknown {
        code: u16,
        version: u8,
        data: Vec<u8>,
    },
}

/// Discovery parse failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscoveryError {
    #[error("discovery response of {0} bytes is shorter than its header")]
    Truncated(usize),
    #[error("discovery length {declared} exceeds the {available} bytes received")]
    LengthOutOfRange { declared: usize, available: usize },
    #[error("feature {code:#06x} at offset {offset} runs past the end of the response")]
    FeatureTruncated { code: u16, offset: usize },
}

/// A parsed Level 0 Discovery response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Level0Discovery {
    pub major_version: u16,
    pub minor_version: u16,
    pub features: Vec<Feature>,
}

/// Reads a descriptor body, zero-extending bodies shorter than `T`.
fn read_padded<T: FromBytes + IntoBytes>(data: &[u8]) -> T {
    let mut v = T::new_zeroed();
    let n = data.len().min(size_of::<T>());
    v.as_mut_bytes()[..n].copy_from_slice(&data[..n]);
    v
}

fn parse_ssc(data: &[u8]) -> SscFeature {
    let raw: RawSsc = read_padded(data);
    SscFeature {
        base_com_id: raw.base_com_id.get(),
        num_com_ids: raw.num_com_ids.get(),
        range_crossing: raw.range_crossing & 0x01 != 0,
        num_locking_admins: raw.num_locking_admins.get(),
        num_locking_users: raw.num_locking_users.get(),
        initial_pin: raw.initial_pin,
        reverted_pin: raw.reverted_pin,
    }
}

fn parse_feature(code: u16, version: u8, data: &[u8]) -> Feature {
    match FeatureCode(code) {
        FeatureCode::TPER => Feature::Tper(TperFlags::from_bits(
            read_padded::<RawFlagsFeature>(data).flags,
        )),
        FeatureCode::LOCKING => Feature::Locking(LockingFlags::from_bits(
            read_padded::<RawFlagsFeature>(data).flags,
        )),
        FeatureCode::GEOMETRY => {
            let raw: RawGeometry = read_padded(data);
            Feature::Geometry(GeometryFeature {
                align_required: raw.align & 0x01 != 0,
                logical_block_size: raw.logical_block_size.get(),
                alignment_granularity: raw.alignment_granularity.get(),
                lowest_aligned_lba: raw.lowest_aligned_lba.get(),
            })
        }
        FeatureCode::ENTERPRISE => Feature::Enterprise(parse_ssc(data)),
        FeatureCode::OPAL1 => Feature::Opal1(parse_ssc(data)),
        FeatureCode::OPAL2 => Feature::Opal2(parse_ssc(data)),
        FeatureCode::SINGLE_USER_MODE => {
            let raw: RawSingleUserMode = read_padded(data);
            Feature::SingleUserMode(SingleUserModeFeature {
                number_of_locking_objects: raw.number_of_locking_objects.get(),
                any_in_sum: raw.policy & 0x01 != 0,
                all_in_sum: raw.policy & 0x02 != 0,
                policy: raw.policy & 0x04 != 0,
            })
        }
        FeatureCode::DATA_STORE => {
            let raw: RawDataStore = read_padded(data);
            Feature::DataStore(DataStoreFeature {
                max_tables: raw.max_tables.get(),
                max_size: raw.max_size.get(),
                alignment: raw.alignment.get(),
            })
        }
        _ => Feature::Unknown {
            code,
            version,
            data: data.to_vec(),
        },
    }
}

impl Level0Discovery {
    /// Parses a discovery response. Trailing bytes beyond the declared
    /// length are ignored.
    pub fn parse(buf: &[u8]) -> Result<Self, DiscoveryError> {
        let (header, _) =
            Level0Header::read_from_prefix(buf).map_err(|_| DiscoveryError::Truncated(buf.len()))?;

        let declared = header.length.get() as usize;
        let end = declared + size_of::<u32_be>();
        if end > buf.len() {
            return Err(DiscoveryError::LengthOutOfRange {
                declared,
                available: buf.len() - size_of::<u32_be>(),
            });
        }

        let mut features = Vec::new();
        let mut offset = size_of::<Level0Header>();
        while offset + size_of::<FeatureHeader>() <= end {
            let (fh, rest) = FeatureHeader::read_from_prefix(&buf[offset..end])
                .map_err(|_| DiscoveryError::Truncated(buf.len()))?;
            let code = fh.code.get();
            let data = rest
                .get(..fh.length as usize)
                .ok_or(DiscoveryError::FeatureTruncated { code, offset })?;
            features.push(parse_feature(code, fh.version >> 4, data));
            offset += size_of::<FeatureHeader>() + data.len();
        }

        Ok(Self {
            major_version: header.major_version.get(),
            minor_version: header.minor_version.get(),
            features,
        })
    }

    pub fn tper(&self) -> Option<TperFlags> {
        self.features.iter().find_map(|f| match f {
            Feature::Tper(v) => Some(*v),
            _ => None,
        })
    }

    pub fn locking(&self) -> Option<LockingFlags> {
        self.features.iter().find_map(|f| match f {
            Feature::Locking(v) => Some(*v),
            _ => None,
        })
    }

    pub fn geometry(&self) -> Option<GeometryFeature> {
        self.features.iter().find_map(|f| match f {
            Feature::Geometry(v) => Some(*v),
            _ => None,
        })
    }

    pub fn opal1(&self) -> Option<SscFeature> {
        self.features.iter().find_map(|f| match f {
            Feature::Opal1(v) => Some(*v),
            _ => None,
        })
    }

    pub fn opal2(&self) -> Option<SscFeature> {
        self.features.iter().find_map(|f| match f {
            Feature::Opal2(v) => Some(*v),
            _ => None,
        })
    }

    pub fn enterprise(&self) -> Option<SscFeature> {
        self.features.iter().find_map(|f| match f {
            Feature::Enterprise(v) => Some(*v),
            _ => None,
        })
    }

    pub fn single_user_mode(&self) -> Option<SingleUserModeFeature> {
        self.features.iter().find_map(|f| match f {
            Feature::SingleUserMode(v) => Some(*v),
            _ => None,
        })
    }

    pub fn data_store(&self) -> Option<DataStoreFeature> {
        self.features.iter().find_map(|f| match f {
            Feature::DataStore(v) => Some(*v),
            _ => None,
        })
    }
}

/// Test and fake-device support: serializes descriptors back into a
/// discovery response.
#[cfg(any(test, feature = "test_utilities"))]
pub mod builder {
    use super::*;

    /// Builds a discovery response from `(code, body)` descriptors.
    pub fn level0_response(features: &[(FeatureCode, Vec<u8>)]) -> Vec<u8> {
        let mut body = Vec::new();
        for (code, data) in features {
            let fh = FeatureHeader {
                code: code.0.into(),
                version: 0x10,
                length: data.len() as u8,
            };
            body.extend_from_slice(fh.as_bytes());
            body.extend_from_slice(data);
        }
        let mut header = Level0Header::new_zeroed();
        header.length = ((size_of::<Level0Header>() - 4 + body.len()) as u32).into();
        header.major_version = 0.into();
        header.minor_version = 1.into();
        let mut buf = header.as_bytes().to_vec();
        buf.extend_from_slice(&body);
        buf
    }

    /// An SSC descriptor body with the given base ComID.
    pub fn ssc_body(base_com_id: u16, num_locking_admins: u16, num_locking_users: u16) -> Vec<u8> {
        let raw = RawSsc {
            base_com_id: base_com_id.into(),
            num_com_ids: 1.into(),
            range_crossing: 0,
            num_locking_admins: num_locking_admins.into(),
            num_locking_users: num_locking_users.into(),
            initial_pin: 0,
            reverted_pin: 0,
            reserved: [0; 5],
        };
        raw.as_bytes().to_vec()
    }

    /// A TPer or Locking descriptor body.
    pub fn flags_body(flags: u8) -> Vec<u8> {
        let mut v = vec![0; 12];
        v[0] = flags;
        v
    }
}
