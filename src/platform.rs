// SPDX-FileCopyrightText: 2025 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::consts::SIGNING_KEY_SIZE;

/// Contents of the platform unique row, one row of internal flash at the
/// top of memory, outside the erasable application region.
///
/// Persists across updates; only the finalizer mutates it, at the end of a
/// successful update.
#[derive(Debug, Clone)]
pub struct PlatformRow {
    pub bundle_signing_key: [u8; SIGNING_KEY_SIZE],
    pub current_bundle_version: u16,
}

impl PlatformRow {
    /// Size of the row in flash.
    pub const SIZE: usize = 256;

    /// Serialize into a row image. Unused bytes are zero.
    pub fn serialize(&self, buf: &mut [u8; Self::SIZE]) {
        buf.fill(0);
        buf[..SIGNING_KEY_SIZE].copy_from_slice(&self.bundle_signing_key);
        buf[SIGNING_KEY_SIZE..SIGNING_KEY_SIZE + 2]
            .copy_from_slice(&self.current_bundle_version.to_le_bytes());
    }

    /// Deserialize from a row image.
    pub fn deserialize(buf: &[u8; Self::SIZE]) -> Self {
        Self {
            bundle_signing_key: buf[..SIGNING_KEY_SIZE].try_into().expect("validated"),
            current_bundle_version: u16::from_le_bytes(
                buf[SIGNING_KEY_SIZE..SIGNING_KEY_SIZE + 2]
                    .try_into()
                    .expect("validated"),
            ),
        }
    }
}

// The serialized fields must fit the flash row.
const _: () = assert!(SIGNING_KEY_SIZE + 2 <= PlatformRow::SIZE);

/// Persistence of the platform unique row and the cross-reboot flags.
///
/// The "upgrade pending" flag is set by the application before it requests a
/// reboot into the bootloader and cleared by the bootloader on any terminal
/// update outcome. The "update succeeded" flag is set by the finalizer and
/// consumed by the application.
pub trait PlatformStore {
    fn load(&self) -> PlatformRow;

    fn store(&mut self, row: &PlatformRow);

    fn upgrade_pending(&self) -> bool;

    fn clear_upgrade_pending(&mut self);

    fn set_update_succeeded(&mut self);
}
