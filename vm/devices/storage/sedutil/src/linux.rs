// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Linux pass-through transport.
//!
//! SATA and SAS disks get SCSI SECURITY PROTOCOL IN/OUT through `SG_IO`
//! (libata translates them for ATA drives). NVMe namespaces get admin
//! Security Send/Receive through the NVMe admin command ioctl.

// UNSAFETY: SG_IO and NVMe admin pass-through ioctls.
#![expect(unsafe_code)]

use std::io;
use std::os::fd::AsRawFd;
use std::path::Path;
use std::path::PathBuf;
use tcg_storage::DeviceIdentity;
use tcg_storage::SecurityTransport;
use tcg_storage::transport::TransportError;

const SCSI_SECURITY_PROTOCOL_IN: u8 = 0xa2;
const SCSI_SECURITY_PROTOCOL_OUT: u8 = 0xb5;
const SCSI_INQUIRY: u8 = 0x12;
const VPD_UNIT_SERIAL_NUMBER: u8 = 0x80;

const NVME_ADMIN_IDENTIFY: u8 = 0x06;
const NVME_ADMIN_SECURITY_SEND: u8 = 0x81;
const NVME_ADMIN_SECURITY_RECEIVE: u8 = 0x82;
const NVME_IDENTIFY_CONTROLLER: u32 = 1;

const SG_TIMEOUT_MS: u32 = 20_000;
const SG_DID_TIME_OUT: u16 = 0x03;
const SENSE_LEN: usize = 32;

/// Security protocol transfers are padded to this.
const TRANSFER_ALIGNMENT: usize = 512;

mod ioctl {
    use std::ffi::c_void;

    pub const SG_INTERFACE_ID: i32 = b'S' as i32;
    pub const SG_DXFER_TO_DEV: i32 = -2;
    pub const SG_DXFER_FROM_DEV: i32 = -3;

    /// `struct sg_io_hdr` from `<scsi/sg.h>`.
    #[repr(C)]
    pub struct SgIoHdr {
        pub interface_id: i32,
        pub dxfer_direction: i32,
        pub cmd_len: u8,
        pub mx_sb_len: u8,
        pub iovec_count: u16,
        pub dxfer_len: u32,
        pub dxferp: *mut c_void,
        pub cmdp: *const u8,
        pub sbp: *mut u8,
        pub timeout: u32,
        pub flags: u32,
        pub pack_id: i32,
        pub usr_ptr: *mut c_void,
        pub status: u8,
        pub masked_status: u8,
        pub msg_status: u8,
        pub sb_len_wr: u8,
        pub host_status: u16,
        pub driver_status: u16,
        pub resid: i32,
        pub duration: u32,
        pub info: u32,
    }

    /// `struct nvme_admin_cmd` from `<linux/nvme_ioctl.h>`.
    #[repr(C)]
    #[derive(Default)]
    pub struct NvmeAdminCmd {
        pub opcode: u8,
        pub flags: u8,
        pub rsvd1: u16,
        pub nsid: u32,
        pub cdw2: u32,
        pub cdw3: u32,
        pub metadata: u64,
        pub addr: u64,
        pub metadata_len: u32,
        pub data_len: u32,
        pub cdw10: u32,
        pub cdw11: u32,
        pub cdw12: u32,
        pub cdw13: u32,
        pub cdw14: u32,
        pub cdw15: u32,
        pub timeout_ms: u32,
        pub result: u32,
    }

    const _: () = assert!(size_of::<NvmeAdminCmd>() == 72);

    nix::ioctl_readwrite_bad!(sg_io, 0x2285, SgIoHdr);
    nix::ioctl_none!(nvme_get_nsid, b'N', 0x40);
    nix::ioctl_readwrite!(nvme_admin_cmd, b'N', 0x41, NvmeAdminCmd);
}

enum Kind {
    Scsi,
    Nvme { nsid: u32 },
}

/// An opened block device.
pub struct BlockDevice {
    file: fs_err::File,
    kind: Kind,
}

impl BlockDevice {
    /// Opens `path`, treating `/dev/nvme*` as NVMe and everything else as
    /// SCSI.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = fs_err::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)?;
        let is_nvme = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with("nvme"));
        let kind = if is_nvme {
            // SAFETY: the fd is valid for the lifetime of `file` and the
            // ioctl takes no argument.
            let nsid = unsafe { ioctl::nvme_get_nsid(file.file().as_raw_fd()) }
                .map_err(io::Error::from)?;
            Kind::Nvme { nsid: nsid as u32 }
        } else {
            Kind::Scsi
        };
        Ok(Self { file, kind })
    }

    fn fd(&self) -> i32 {
        self.file.file().as_raw_fd()
    }

    /// Runs a SCSI command, returning the number of bytes transferred.
    fn scsi(
        &mut self,
        cdb: &[u8],
        direction: i32,
        buf: *mut u8,
        len: usize,
    ) -> Result<usize, TransportError> {
        let mut sense = [0u8; SENSE_LEN];
        let mut hdr = ioctl::SgIoHdr {
            interface_id: ioctl::SG_INTERFACE_ID,
            dxfer_direction: direction,
            cmd_len: cdb.len() as u8,
            mx_sb_len: SENSE_LEN as u8,
            iovec_count: 0,
            dxfer_len: len as u32,
            dxferp: buf.cast(),
            cmdp: cdb.as_ptr(),
            sbp: sense.as_mut_ptr(),
            timeout: SG_TIMEOUT_MS,
            flags: 0,
            pack_id: 0,
            usr_ptr: std::ptr::null_mut(),
            status: 0,
            masked_status: 0,
            msg_status: 0,
            sb_len_wr: 0,
            host_status: 0,
            driver_status: 0,
            resid: 0,
            duration: 0,
            info: 0,
        };
        // SAFETY: `hdr` points at `cdb`, `sense` and a caller-provided buffer
        // of `len` bytes, all of which outlive the synchronous ioctl.
        unsafe { ioctl::sg_io(self.fd(), &mut hdr) }.map_err(io::Error::from)?;

        if hdr.host_status == SG_DID_TIME_OUT {
            return Err(TransportError::Timeout);
        }
        if hdr.status != 0 || hdr.host_status != 0 || hdr.driver_status != 0 {
            let sense = &sense[..usize::from(hdr.sb_len_wr).min(SENSE_LEN)];
            return Err(TransportError::Device(format!(
                "SCSI opcode {:#04x} failed: status {:#04x}, host {:#06x}, driver {:#06x}, sense {}",
                cdb[0],
                hdr.status,
                hdr.host_status,
                hdr.driver_status,
                hex::encode(sense)
            )));
        }
        Ok(len.saturating_sub(hdr.resid.max(0) as usize))
    }

    fn scsi_in(&mut self, cdb: &[u8], len: usize) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; len];
        let n = self.scsi(cdb, ioctl::SG_DXFER_FROM_DEV, buf.as_mut_ptr(), buf.len())?;
        buf.truncate(n);
        Ok(buf)
    }

    fn nvme_admin(&mut self, mut cmd: ioctl::NvmeAdminCmd) -> Result<(), TransportError> {
        // SAFETY: `cmd.addr` is zero or points at a live buffer of
        // `cmd.data_len` bytes owned by the caller for the duration of the
        // synchronous ioctl.
        let status =
            unsafe { ioctl::nvme_admin_cmd(self.fd(), &mut cmd) }.map_err(io::Error::from)?;
        if status != 0 {
            return Err(TransportError::Device(format!(
                "NVMe admin opcode {:#04x} failed with status {status:#x}",
                cmd.opcode
            )));
        }
        Ok(())
    }
}

fn security_cdw10(protocol: u8, com_id: u16) -> u32 {
    (u32::from(protocol) << 24) | (u32::from(com_id) << 8)
}

fn security_cdb(opcode: u8, protocol: u8, com_id: u16, len: usize) -> [u8; 12] {
    let [c0, c1] = com_id.to_be_bytes();
    let [l0, l1, l2, l3] = (len as u32).to_be_bytes();
    [opcode, protocol, c0, c1, 0, 0, l0, l1, l2, l3, 0, 0]
}

fn ascii(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string()
}

impl SecurityTransport for BlockDevice {
    fn security_send(
        &mut self,
        protocol: u8,
        com_id: u16,
        buf: &[u8],
    ) -> Result<(), TransportError> {
        let mut data = buf.to_vec();
        data.resize(buf.len().next_multiple_of(TRANSFER_ALIGNMENT), 0);
        match self.kind {
            Kind::Scsi => {
                let cdb = security_cdb(SCSI_SECURITY_PROTOCOL_OUT, protocol, com_id, data.len());
                self.scsi(&cdb, ioctl::SG_DXFER_TO_DEV, data.as_mut_ptr(), data.len())?;
            }
            Kind::Nvme { nsid } => {
                self.nvme_admin(ioctl::NvmeAdminCmd {
                    opcode: NVME_ADMIN_SECURITY_SEND,
                    nsid,
                    addr: data.as_ptr() as u64,
                    data_len: data.len() as u32,
                    cdw10: security_cdw10(protocol, com_id),
                    cdw11: data.len() as u32,
                    ..Default::default()
                })?;
            }
        }
        Ok(())
    }

    fn security_receive(
        &mut self,
        protocol: u8,
        com_id: u16,
        max_len: usize,
    ) -> Result<Vec<u8>, TransportError> {
        let len = max_len.next_multiple_of(TRANSFER_ALIGNMENT);
        match self.kind {
            Kind::Scsi => {
                let cdb = security_cdb(SCSI_SECURITY_PROTOCOL_IN, protocol, com_id, len);
                self.scsi_in(&cdb, len)
            }
            Kind::Nvme { nsid } => {
                let mut buf = vec![0u8; len];
                self.nvme_admin(ioctl::NvmeAdminCmd {
                    opcode: NVME_ADMIN_SECURITY_RECEIVE,
                    nsid,
                    addr: buf.as_mut_ptr() as u64,
                    data_len: len as u32,
                    cdw10: security_cdw10(protocol, com_id),
                    cdw11: len as u32,
                    ..Default::default()
                })?;
                Ok(buf)
            }
        }
    }

    fn identity(&mut self) -> Result<DeviceIdentity, TransportError> {
        match self.kind {
            Kind::Scsi => {
                let inquiry = self.scsi_in(&[SCSI_INQUIRY, 0, 0, 0, 96, 0], 96)?;
                let field = |range: std::ops::Range<usize>| {
                    ascii(inquiry.get(range).unwrap_or_default())
                };
                let model = format!("{} {}", field(8..16), field(16..32));
                let firmware_revision = field(32..36);

                let vpd = self.scsi_in(&[SCSI_INQUIRY, 1, VPD_UNIT_SERIAL_NUMBER, 0, 252, 0], 252)?;
                let serial_len = vpd.get(3).copied().map_or(0, usize::from);
                let serial = vpd.get(4..4 + serial_len).unwrap_or_default().to_vec();
                Ok(DeviceIdentity {
                    model: model.trim().to_string(),
                    firmware_revision,
                    serial,
                })
            }
            Kind::Nvme { .. } => {
                let mut buf = vec![0u8; 4096];
                self.nvme_admin(ioctl::NvmeAdminCmd {
                    opcode: NVME_ADMIN_IDENTIFY,
                    addr: buf.as_mut_ptr() as u64,
                    data_len: buf.len() as u32,
                    cdw10: NVME_IDENTIFY_CONTROLLER,
                    ..Default::default()
                })?;
                Ok(DeviceIdentity {
                    model: ascii(&buf[24..64]),
                    firmware_revision: ascii(&buf[64..72]),
                    serial: buf[4..24].to_vec(),
                })
            }
        }
    }
}

/// Whether a `/dev` entry is a whole SCSI disk or an NVMe namespace.
fn is_disk_name(name: &str) -> bool {
    if let Some(letters) = name.strip_prefix("sd") {
        return !letters.is_empty() && letters.bytes().all(|b| b.is_ascii_lowercase());
    }
    if let Some(rest) = name.strip_prefix("nvme") {
        let Some((controller, namespace)) = rest.split_once('n') else {
            return false;
        };
        let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
        return digits(controller) && digits(namespace);
    }
    false
}

/// Candidate disks under `/dev`, sorted by name.
pub fn scan() -> io::Result<Vec<PathBuf>> {
    let mut disks = Vec::new();
    for entry in fs_err::read_dir("/dev")? {
        let entry = entry?;
        if entry.file_name().to_str().is_some_and(is_disk_name) {
            disks.push(entry.path());
        }
    }
    disks.sort();
    Ok(disks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_names() {
        assert!(is_disk_name("sda"));
        assert!(is_disk_name("sdab"));
        assert!(!is_disk_name("sda1"));
        assert!(is_disk_name("nvme0n1"));
        assert!(!is_disk_name("nvme0n1p2"));
        assert!(!is_disk_name("nvme0"));
        assert!(!is_disk_name("tty0"));
    }

    #[test]
    fn security_protocol_cdb() {
        assert_eq!(
            security_cdb(SCSI_SECURITY_PROTOCOL_IN, 1, 0x07fe, 2048),
            [0xa2, 1, 0x07, 0xfe, 0, 0, 0, 0, 0x08, 0x00, 0, 0]
        );
        assert_eq!(security_cdw10(1, 0x1000), 0x0110_0000);
    }
}
