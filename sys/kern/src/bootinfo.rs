// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Read-only view of the shared boot-information band.
//!
//! The loader leaves a small header at the start of the shared flash band:
//! a magic word, the default boot slot, and per-image entry/version/status
//! records. The kernel only consumes these fixed leading fields; the rest
//! of the band (message buffer, optional signature) belongs to the loader
//! and the update machinery.

use byteorder::{ByteOrder, LittleEndian};

/// Expected first word of the header.
pub const BOOT_MAGIC: u32 = 0xb007_1e55;

/// Number of per-image records in the header.
pub const NUM_IMAGES: usize = 2;

/// Outcome the loader recorded for one image.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BootStatus {
    /// Verified and bootable.
    Ok,
    /// Known bad.
    Ko,
    /// Needs checking.
    Check,
}

#[derive(Copy, Clone, Debug)]
pub struct ImageInfo {
    pub entry: u32,
    pub version: u32,
    pub status: BootStatus,
}

#[derive(Copy, Clone, Debug)]
pub struct BootInfo {
    pub default_slot: u8,
    pub images: [ImageInfo; NUM_IMAGES],
}

/// Byte length of the fixed header the kernel reads.
pub const HEADER_LEN: usize = 8 + NUM_IMAGES * 12;

/// Parses the fixed header fields out of the raw band contents.
pub fn parse(bytes: &[u8]) -> Option<BootInfo> {
    if bytes.len() < HEADER_LEN {
        return None;
    }
    if LittleEndian::read_u32(&bytes[0..4]) != BOOT_MAGIC {
        return None;
    }
    let default_slot = (LittleEndian::read_u32(&bytes[4..8]) & 0xff) as u8;

    let mut images = [ImageInfo {
        entry: 0,
        version: 0,
        status: BootStatus::Check,
    }; NUM_IMAGES];
    for (i, img) in images.iter_mut().enumerate() {
        let at = 8 + i * 12;
        img.entry = LittleEndian::read_u32(&bytes[at..at + 4]);
        img.version = LittleEndian::read_u32(&bytes[at + 4..at + 8]);
        img.status = match LittleEndian::read_u32(&bytes[at + 8..at + 12]) {
            0 => BootStatus::Ok,
            1 => BootStatus::Ko,
            _ => BootStatus::Check,
        };
    }

    Some(BootInfo {
        default_slot,
        images,
    })
}

/// Reads the header from the shared band. `None` if the loader left
/// nothing recognizable there.
#[cfg(target_arch = "arm")]
pub fn read() -> Option<BootInfo> {
    // Safety: the band is mapped, read-only flash at a fixed address.
    let bytes = unsafe {
        core::slice::from_raw_parts(crate::layout::SHARED_BASE as *const u8, HEADER_LEN)
    };
    parse(bytes)
}

#[cfg(not(target_arch = "arm"))]
pub fn read() -> Option<BootInfo> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(magic: u32) -> Vec<u8> {
        let mut b = vec![0u8; HEADER_LEN];
        LittleEndian::write_u32(&mut b[0..4], magic);
        LittleEndian::write_u32(&mut b[4..8], 1);
        // Image 0: entry, version, status Ok.
        LittleEndian::write_u32(&mut b[8..12], 0x0808_0000);
        LittleEndian::write_u32(&mut b[12..16], 7);
        LittleEndian::write_u32(&mut b[16..20], 0);
        // Image 1: status Ko.
        LittleEndian::write_u32(&mut b[20..24], 0x080c_0000);
        LittleEndian::write_u32(&mut b[24..28], 6);
        LittleEndian::write_u32(&mut b[28..32], 1);
        b
    }

    #[test]
    fn parses_well_formed_header() {
        let info = parse(&header(BOOT_MAGIC)).unwrap();
        assert_eq!(info.default_slot, 1);
        assert_eq!(info.images[0].entry, 0x0808_0000);
        assert_eq!(info.images[0].status, BootStatus::Ok);
        assert_eq!(info.images[1].version, 6);
        assert_eq!(info.images[1].status, BootStatus::Ko);
    }

    #[test]
    fn rejects_bad_magic_and_short_input() {
        assert!(parse(&header(0x1234_5678)).is_none());
        assert!(parse(&[0u8; 4]).is_none());
    }

    #[test]
    fn unknown_status_reads_as_check() {
        let mut b = header(BOOT_MAGIC);
        LittleEndian::write_u32(&mut b[16..20], 9);
        let info = parse(&b).unwrap();
        assert_eq!(info.images[0].status, BootStatus::Check);
    }
}
