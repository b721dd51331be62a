// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! ComPacket / Packet / SubPacket framing (Core Specification 3.2.3).

use crate::packed_nums::*;
use thiserror::Error;
use zerocopy::FromBytes;
use zerocopy::FromZeros;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// ComPacket header.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct ComPacketHeader {
    pub reserved: u32_be,
    pub com_id: u16_be,
    pub com_id_extension: u16_be,
    pub outstanding_data: u32_be,
    pub min_transfer: u32_be,
    pub length: u32_be,
}

/// Packet header.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct PacketHeader {
    pub tsn: u32_be,
    pub hsn: u32_be,
    pub seq_number: u32_be,
    pub reserved: u16_be,
    pub ack_type: u16_be,
    pub acknowledgement: u32_be,
    pub length: u32_be,
}

/// SubPacket header.
#[repr(C)]
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct SubPacketHeader {
    pub reserved: [u8; 6],
    pub kind: u16_be,
    pub length: u32_be,
}

const _: () = assert!(size_of::<ComPacketHeader>() == 20);
const _: () = assert!(size_of::<PacketHeader>() == 24);
const _: () = assert!(size_of::<SubPacketHeader>() == 12);

/// SubPacket kind carrying a token stream.
pub const SUBPACKET_KIND_DATA: u16 = 0x0000;

/// Size of all three headers together.
pub const FRAME_OVERHEAD: usize =
    size_of::<ComPacketHeader>() + size_of::<PacketHeader>() + size_of::<SubPacketHeader>();

/// The communication channel a request is sent on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComChannel {
    /// ComID assigned by the device.
    pub com_id: u16,
    /// ComID extension, zero for static ComIDs.
    pub com_id_extension: u16,
}

impl ComChannel {
    /// A static ComID channel.
    pub const fn new(com_id: u16) -> Self {
        Self {
            com_id,
            com_id_extension: 0,
        }
    }
}

/// Session numbers carried in every packet header. Both are zero for
/// session manager traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionNumbers {
    /// TPer session number.
    pub tsn: u32,
    /// Host session number.
    pub hsn: u32,
}

/// Framing failures on responses.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("response of {0} bytes is too short for a ComPacket header")]
    Truncated(usize),
    #[error("{header} length {declared} does not match the {actual} bytes available")]
    LengthMismatch {
        header: &'static str,
        declared: usize,
        actual: usize,
    },
    #[error("response ComID {actual:#06x}/{actual_ext:#06x} does not match request ComID {expected:#06x}/{expected_ext:#06x}")]
    ComIdMismatch {
        expected: u16,
        expected_ext: u16,
        actual: u16,
        actual_ext: u16,
    },
    #[error("response session {actual:?} does not match request session {expected:?}")]
    SessionMismatch {
        expected: SessionNumbers,
        actual: SessionNumbers,
    },
    #[error("response sequence number {actual} is older than {last}")]
    SequenceRegression { last: u32, actual: u32 },
}

/// An unframed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComPacketResponse {
    /// Bytes the device still holds for this ComID.
    pub outstanding_data: u32,
    /// Minimum transfer size the device asks for when data is outstanding.
    pub min_transfer: u32,
    /// Packet sequence number, zero when no packet was present.
    pub seq_number: u32,
    /// Concatenated data subpacket payloads, padding removed.
    pub payload: Vec<u8>,
}

impl ComPacketResponse {
    /// Whether the device has not produced the response yet and the host
    /// should receive again.
    pub fn is_pending(&self) -> bool {
        self.payload.is_empty() && self.outstanding_data != 0
    }
}

fn align_up(n: usize, alignment: usize) -> usize {
    if alignment <= 1 {
        n
    } else {
        n.div_ceil(alignment) * alignment
    }
}

/// Wraps a token stream in a single data subpacket, packet and ComPacket.
///
/// The subpacket payload is padded to four bytes and the whole buffer is
/// zero-padded to a multiple of `alignment`.
pub fn frame(
    payload: &[u8],
    channel: ComChannel,
    session: SessionNumbers,
    seq_number: u32,
    alignment: usize,
) -> Vec<u8> {
    let sub_len = size_of::<SubPacketHeader>() + align_up(payload.len(), 4);
    let packet_len = size_of::<PacketHeader>() + sub_len;
    let total = size_of::<ComPacketHeader>() + packet_len;

    let mut com = ComPacketHeader::new_zeroed();
    com.com_id = channel.com_id.into();
    com.com_id_extension = channel.com_id_extension.into();
    com.length = (packet_len as u32).into();

    let mut packet = PacketHeader::new_zeroed();
    packet.tsn = session.tsn.into();
    packet.hsn = session.hsn.into();
    packet.seq_number = seq_number.into();
    packet.length = (sub_len as u32).into();

    let mut sub = SubPacketHeader::new_zeroed();
    sub.kind = SUBPACKET_KIND_DATA.into();
    sub.length = (payload.len() as u32).into();

    let mut buf = Vec::with_capacity(align_up(total, alignment));
    buf.extend_from_slice(com.as_bytes());
    buf.extend_from_slice(packet.as_bytes());
    buf.extend_from_slice(sub.as_bytes());
    buf.extend_from_slice(payload);
    buf.resize(align_up(total, alignment), 0);
    buf
}

/// Validates a response buffer against the request it answers and extracts
/// the token stream.
///
/// `last_seq` is the sequence number of the previous response in the same
/// session, if any; a response older than it is rejected. A ComPacket with
/// zero length is returned with an empty payload so the caller can inspect
/// [`ComPacketResponse::is_pending`].
pub fn unframe(
    buf: &[u8],
    channel: ComChannel,
    session: SessionNumbers,
    last_seq: Option<u32>,
) -> Result<ComPacketResponse, FrameError> {
    let (com, rest) =
        ComPacketHeader::read_from_prefix(buf).map_err(|_| FrameError::Truncated(buf.len()))?;

    let (com_id, com_id_extension) = (com.com_id.get(), com.com_id_extension.get());
    if com_id != channel.com_id || com_id_extension != channel.com_id_extension {
        return Err(FrameError::ComIdMismatch {
            expected: channel.com_id,
            expected_ext: channel.com_id_extension,
            actual: com_id,
            actual_ext: com_id_extension,
        });
    }

    let com_len = com.length.get() as usize;
    let body = rest.get(..com_len).ok_or(FrameError::LengthMismatch {
        header: "ComPacket",
        declared: com_len,
        actual: rest.len(),
    })?;

    let mut response = ComPacketResponse {
        outstanding_data: com.outstanding_data.get(),
        min_transfer: com.min_transfer.get(),
        seq_number: 0,
        payload: Vec::new(),
    };
    if com_len == 0 {
        return Ok(response);
    }

    let (packet, packet_body) =
        PacketHeader::read_from_prefix(body).map_err(|_| FrameError::LengthMismatch {
            header: "ComPacket",
            declared: com_len,
            actual: size_of::<PacketHeader>(),
        })?;
    let packet_len = packet.length.get() as usize;
    if packet_len != packet_body.len() {
        return Err(FrameError::LengthMismatch {
            header: "Packet",
            declared: packet_len,
            actual: packet_body.len(),
        });
    }

    let actual = SessionNumbers {
        tsn: packet.tsn.get(),
        hsn: packet.hsn.get(),
    };
    if actual != session {
        return Err(FrameError::SessionMismatch {
            expected: session,
            actual,
        });
    }

    let seq_number = packet.seq_number.get();
    if let Some(last) = last_seq {
        if seq_number < last {
            return Err(FrameError::SequenceRegression {
                last,
                actual: seq_number,
            });
        }
    }
    response.seq_number = seq_number;

    let mut remaining = packet_body;
    while !remaining.is_empty() {
        let (sub, sub_body) = SubPacketHeader::read_from_prefix(remaining).map_err(|_| {
            FrameError::LengthMismatch {
                header: "SubPacket",
                declared: size_of::<SubPacketHeader>(),
                actual: remaining.len(),
            }
        })?;
        let sub_len = sub.length.get() as usize;
        let data = sub_body.get(..sub_len).ok_or(FrameError::LengthMismatch {
            header: "SubPacket",
            declared: sub_len,
            actual: sub_body.len(),
        })?;
        if sub.kind.get() == SUBPACKET_KIND_DATA {
            response.payload.extend_from_slice(data);
        }
        // The last subpacket may omit its trailing pad.
        remaining = &sub_body[align_up(sub_len, 4).min(sub_body.len())..];
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHANNEL: ComChannel = ComChannel::new(0x07fe);
    const SESSION: SessionNumbers = SessionNumbers { tsn: 0x1001, hsn: 105 };

    /// Builds a response buffer the way a TPer would.
    fn response(payload: &[u8], channel: ComChannel, session: SessionNumbers, seq: u32) -> Vec<u8> {
        frame(payload, channel, session, seq, 0)
    }

    #[test]
    fn frame_layout() {
        let buf = frame(&[0xf8, 0xf9, 0xfa], CHANNEL, SESSION, 3, 512);
        assert_eq!(buf.len(), 512);

        let (com, rest) = ComPacketHeader::read_from_prefix(&buf).unwrap();
        assert_eq!(com.com_id.get(), 0x07fe);
        assert_eq!(com.length.get() as usize, 24 + 12 + 4);

        let (packet, rest) = PacketHeader::read_from_prefix(rest).unwrap();
        assert_eq!(packet.tsn.get(), 0x1001);
        assert_eq!(packet.hsn.get(), 105);
        assert_eq!(packet.seq_number.get(), 3);
        assert_eq!(packet.length.get(), 12 + 4);

        let (sub, rest) = SubPacketHeader::read_from_prefix(rest).unwrap();
        assert_eq!(sub.kind.get(), SUBPACKET_KIND_DATA);
        assert_eq!(sub.length.get(), 3);
        assert_eq!(&rest[..4], &[0xf8, 0xf9, 0xfa, 0x00]);
        assert!(rest[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn unframe_strips_padding() {
        let mut buf = response(&[1, 2, 3, 4, 5], CHANNEL, SESSION, 1);
        buf.resize(512, 0);
        let r = unframe(&buf, CHANNEL, SESSION, None).unwrap();
        assert_eq!(r.payload, [1, 2, 3, 4, 5]);
        assert_eq!(r.seq_number, 1);
        assert!(!r.is_pending());
    }

    #[test]
    fn declared_length_past_buffer_is_rejected() {
        let buf = response(&[0xf9; 16], CHANNEL, SESSION, 0);
        let err = unframe(&buf[..buf.len() - 8], CHANNEL, SESSION, None).unwrap_err();
        assert!(matches!(
            err,
            FrameError::LengthMismatch {
                header: "ComPacket",
                ..
            }
        ));
    }

    #[test]
    fn inner_length_mismatch_is_rejected() {
        let mut buf = response(&[0xf9; 8], CHANNEL, SESSION, 0);
        // Claim a larger subpacket than the packet holds.
        buf[FRAME_OVERHEAD - 1] = 0x40;
        let err = unframe(&buf, CHANNEL, SESSION, None).unwrap_err();
        assert!(matches!(
            err,
            FrameError::LengthMismatch {
                header: "SubPacket",
                ..
            }
        ));

        let mut buf = response(&[0xf9; 8], CHANNEL, SESSION, 0);
        // Packet length one byte short of the ComPacket body.
        buf[20 + 23] -= 1;
        let err = unframe(&buf, CHANNEL, SESSION, None).unwrap_err();
        assert!(matches!(
            err,
            FrameError::LengthMismatch {
                header: "Packet",
                ..
            }
        ));
    }

    #[test]
    fn foreign_com_id_is_rejected() {
        let buf = response(&[0xf9], ComChannel::new(0x1000), SESSION, 0);
        let err = unframe(&buf, CHANNEL, SESSION, None).unwrap_err();
        assert_eq!(
            err,
            FrameError::ComIdMismatch {
                expected: 0x07fe,
                expected_ext: 0,
                actual: 0x1000,
                actual_ext: 0,
            }
        );
    }

    #[test]
    fn foreign_session_is_rejected() {
        let other = SessionNumbers { tsn: 0x1002, hsn: 105 };
        let buf = response(&[0xf9], CHANNEL, other, 0);
        let err = unframe(&buf, CHANNEL, SESSION, None).unwrap_err();
        assert!(matches!(err, FrameError::SessionMismatch { .. }));
    }

    #[test]
    fn stale_sequence_number_is_rejected() {
        let buf = response(&[0xf9], CHANNEL, SESSION, 4);
        assert!(unframe(&buf, CHANNEL, SESSION, Some(4)).is_ok());
        let err = unframe(&buf, CHANNEL, SESSION, Some(5)).unwrap_err();
        assert_eq!(err, FrameError::SequenceRegression { last: 5, actual: 4 });
    }

    #[test]
    fn empty_compacket_with_outstanding_data_is_pending() {
        let mut com = ComPacketHeader::new_zeroed();
        com.com_id = CHANNEL.com_id.into();
        com.outstanding_data = 1.into();
        let mut buf = com.as_bytes().to_vec();
        buf.resize(512, 0);
        let r = unframe(&buf, CHANNEL, SESSION, None).unwrap();
        assert!(r.is_pending());
    }

    #[test]
    fn short_buffer_is_truncated() {
        assert_eq!(
            unframe(&[0; 19], CHANNEL, SESSION, None).unwrap_err(),
            FrameError::Truncated(19)
        );
    }
}
