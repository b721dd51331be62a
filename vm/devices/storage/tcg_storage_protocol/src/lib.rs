// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Wire formats for the TCG Storage security subsystem classes (Opal 1.0,
//! Opal 2.0, Enterprise): the binary token stream, ComPacket framing,
//! Level 0 Discovery, and the well-known UID and status tables.
//!
//! This crate performs no I/O.

#![forbid(unsafe_code)]

#[expect(missing_docs)] // header fields follow the wire layout
pub mod compacket;
#[expect(missing_docs)] // descriptor fields follow the wire layout
pub mod discovery;
pub mod status;
pub mod token;
pub mod uid;

pub use status::MethodStatus;
pub use uid::Uid;

#[allow(non_camel_case_types)]
mod packed_nums {
    pub type u16_be = zerocopy::U16<zerocopy::BigEndian>;
    pub type u32_be = zerocopy::U32<zerocopy::BigEndian>;
    pub type u64_be = zerocopy::U64<zerocopy::BigEndian>;
}
