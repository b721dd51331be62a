// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The security protocol transport consumed by the engine.

use std::io;
use thiserror::Error;

/// Transport failures.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The pass-through request could not be issued.
    #[error("security protocol pass-through failed")]
    Io(#[source] io::Error),
    /// The device did not answer within the transport deadline.
    #[error("device did not respond in time")]
    Timeout,
    /// The device or the OS layer reported a command failure.
    #[error("device rejected the command: {0}")]
    Device(String),
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::TimedOut {
            TransportError::Timeout
        } else {
            TransportError::Io(err)
        }
    }
}

/// Identity strings reported by the device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Model string, trimmed.
    pub model: String,
    /// Firmware revision, trimmed.
    pub firmware_revision: String,
    /// Serial number exactly as reported, including padding.
    pub serial: Vec<u8>,
}

/// Length of the ATA/NVMe serial number field, which is also the PBKDF2
/// salt length.
pub const SERIAL_LEN: usize = 20;

impl DeviceIdentity {
    /// The serial number trimmed for display.
    pub fn serial_string(&self) -> String {
        String::from_utf8_lossy(&self.serial).trim().to_string()
    }

    /// The salt used when hashing passwords for this device: the serial
    /// number field, space-padded or truncated to its ATA width.
    pub fn salt(&self) -> [u8; SERIAL_LEN] {
        let mut salt = [b' '; SERIAL_LEN];
        let n = self.serial.len().min(SERIAL_LEN);
        salt[..n].copy_from_slice(&self.serial[..n]);
        salt
    }
}

/// Access to a device's security protocol pass-through commands (SCSI
/// SECURITY PROTOCOL IN/OUT, ATA TRUSTED SEND/RECEIVE, NVMe Security
/// Send/Receive).
///
/// Implementations own their device handle exclusively and issue one
/// command at a time.
pub trait SecurityTransport {
    /// Sends `buf` to `protocol`/`com_id`.
    fn security_send(&mut self, protocol: u8, com_id: u16, buf: &[u8])
    -> Result<(), TransportError>;

    /// Receives up to `max_len` bytes from `protocol`/`com_id`.
    fn security_receive(
        &mut self,
        protocol: u8,
        com_id: u16,
        max_len: usize,
    ) -> Result<Vec<u8>, TransportError>;

    /// Returns the device's identity strings.
    fn identity(&mut self) -> Result<DeviceIdentity, TransportError>;
}

impl<T: SecurityTransport + ?Sized> SecurityTransport for Box<T> {
    fn security_send(
        &mut self,
        protocol: u8,
        com_id: u16,
        buf: &[u8],
    ) -> Result<(), TransportError> {
        (**self).security_send(protocol, com_id, buf)
    }

    fn security_receive(
        &mut self,
        protocol: u8,
        com_id: u16,
        max_len: usize,
    ) -> Result<Vec<u8>, TransportError> {
        (**self).security_receive(protocol, com_id, max_len)
    }

    fn identity(&mut self) -> Result<DeviceIdentity, TransportError> {
        (**self).identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn salt_is_padded_serial() {
        let id = DeviceIdentity {
            serial: b"S3EWNX0K".to_vec(),
            ..Default::default()
        };
        assert_eq!(&id.salt(), b"S3EWNX0K            ");
        assert_eq!(id.serial_string(), "S3EWNX0K");

        let id = DeviceIdentity {
            serial: b"0123456789abcdefghijklmn".to_vec(),
            ..Default::default()
        };
        assert_eq!(&id.salt(), b"0123456789abcdefghij");
    }

    #[test]
    fn timed_out_io_maps_to_timeout() {
        let err = TransportError::from(io::Error::from(io::ErrorKind::TimedOut));
        assert!(matches!(err, TransportError::Timeout));
        let err = TransportError::from(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(err, TransportError::Io(_)));
    }
}
