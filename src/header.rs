// SPDX-FileCopyrightText: 2025 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::{
    consts::{MAC_SIZE, SIGNING_KEY_SIZE},
    Error,
};

/// Fixed-layout header at the start of a firmware bundle in external flash.
///
/// All multi-byte fields are little-endian with no padding:
///
/// ```text
/// magic:u32  total_size:u32  crc32:u32  bundle_version:u16
/// signing_key_update_flag:u16  encrypted_new_signing_key:[u8;32]
/// signed_hash:[u8;16]
/// ```
///
/// The header is written once by the bundle producer and is read-only to the
/// bootloader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleHeader {
    magic: [u8; 4],
    total_size: [u8; 4],
    crc32: [u8; 4],
    bundle_version: [u8; 2],
    signing_key_update_flag: [u8; 2],
    encrypted_new_signing_key: [u8; SIGNING_KEY_SIZE],
    signed_hash: [u8; MAC_SIZE],
}

impl BundleHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = 64;

    /// Magic number identifying a firmware bundle.
    pub const MAGIC: [u8; 4] = *b"FWUP";

    /// Offset of the first byte covered by the outer CRC32. The CRC covers
    /// everything after its own field: the rest of the header plus the whole
    /// signed region.
    pub const CRC_COVER_OFFSET: usize = 12;

    /// Parse a header from the first [`Self::SIZE`] bytes of a bundle.
    pub fn parse(data: &[u8; Self::SIZE]) -> Result<Self, Error> {
        let magic = data[..4].try_into().expect("validated");
        if magic != Self::MAGIC {
            return Err(Error::BadMagic);
        }

        Ok(Self {
            magic,
            total_size: data[4..8].try_into().expect("validated"),
            crc32: data[8..12].try_into().expect("validated"),
            bundle_version: data[12..14].try_into().expect("validated"),
            signing_key_update_flag: data[14..16].try_into().expect("validated"),
            encrypted_new_signing_key: data[16..48].try_into().expect("validated"),
            signed_hash: data[48..64].try_into().expect("validated"),
        })
    }

    /// Check that the signed region fits inside the external flash.
    pub fn validate_size(&self, flash_capacity: u32) -> Result<(), Error> {
        let end = (Self::SIZE as u32)
            .checked_add(self.total_size())
            .ok_or(Error::OversizedBundle)?;
        if end > flash_capacity {
            return Err(Error::OversizedBundle);
        }
        Ok(())
    }

    /// Magic number.
    pub fn magic(&self) -> [u8; 4] {
        self.magic
    }

    /// Size in bytes of the signed region that follows the header.
    pub fn total_size(&self) -> u32 {
        u32::from_le_bytes(self.total_size)
    }

    /// Outer CRC32 over everything after the CRC field itself.
    pub fn crc32(&self) -> u32 {
        u32::from_le_bytes(self.crc32)
    }

    /// Monotonic bundle version, compared against the platform unique row
    /// for rollback protection.
    pub fn bundle_version(&self) -> u16 {
        u16::from_le_bytes(self.bundle_version)
    }

    /// True if the bundle carries a replacement signing key to install.
    pub fn rotate_signing_key(&self) -> bool {
        u16::from_le_bytes(self.signing_key_update_flag) != 0
    }

    /// Replacement signing key, encrypted in counter mode under the current
    /// signing key. Only meaningful if [`Self::rotate_signing_key`] is set.
    pub fn encrypted_new_signing_key(&self) -> &[u8; SIGNING_KEY_SIZE] {
        &self.encrypted_new_signing_key
    }

    /// Expected streaming MAC over the signed region.
    pub fn signed_hash(&self) -> &[u8; MAC_SIZE] {
        &self.signed_hash
    }
}
