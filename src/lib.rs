// SPDX-FileCopyrightText: 2025 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Firmware-update engine of the bootloader.
//!
//! Decides whether a pending firmware bundle in external serial flash is
//! authentic, not a downgrade, and safe to program, then programs it into
//! internal program memory. The bundle is far larger than RAM, so both the
//! authentication and the programming walk it as a DMA-overlapped stream of
//! fixed-size chunks: pass 1 runs a streaming keyed MAC over the whole
//! signed region, pass 2 re-walks the identical data while programming,
//! cross-checking every firmware chunk against the MAC state cached in
//! pass 1 so that flash content modified between the passes is detected and
//! treated as an attack.
//!
//! All hardware (external flash DMA, internal NVM controller, AES engine,
//! file table, persisted flags) appears as traits, implemented by the
//! bootloader binary on target and by fakes in the host tests.

#![no_std]

pub mod consts;
mod controller;
mod header;
mod mac;
mod platform;
mod program;
mod stream;


pub use controller::{CheckpointTable, FileTable, Outcome, UpdateConfig, UpdateEngine};
pub use header::BundleHeader;
pub use mac::{ct_mac_eq, ctr_xor, BlockCipher, Mac, MacState};
pub use platform::{PlatformRow, PlatformStore};
pub use program::{erase_region, NvmController, RowProgrammer};
pub use stream::{read_exact, BufSlot, ChunkReader, FlashSource};

/// Errors that abort an update without touching internal flash.
///
/// Cross-pass tamper is deliberately not here: it is not an error the
/// caller can recover from, it is the [`Outcome::Tampered`] terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The bundle header's magic number is missing or unknown.
    BadMagic,
    /// The signed region would extend past the external flash.
    OversizedBundle,
    /// The outer CRC32 does not match; the bundle is truncated or corrupt.
    CrcMismatch,
    /// The file table has no firmware update record at the requested index.
    RecordMissing,
    /// The firmware record does not lie entirely within the signed region.
    RecordOutOfBounds,
    /// The firmware image does not fit the application region.
    FirmwareTooLarge,
    /// The pass-1 streaming MAC does not match the bundle's signed hash.
    AuthenticationFailed,
    /// The bundle version is not strictly greater than the installed one.
    VersionRollback,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::BadMagic => write!(f, "bad magic in bundle header"),
            Self::OversizedBundle => write!(f, "signed region larger than external flash"),
            Self::CrcMismatch => write!(f, "outer CRC32 mismatch"),
            Self::RecordMissing => write!(f, "firmware update record not found"),
            Self::RecordOutOfBounds => write!(f, "firmware record outside signed region"),
            Self::FirmwareTooLarge => write!(f, "firmware image larger than application region"),
            Self::AuthenticationFailed => write!(f, "streaming MAC mismatch"),
            Self::VersionRollback => write!(f, "bundle version is not an upgrade"),
        }
    }
}
