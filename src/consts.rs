// SPDX-FileCopyrightText: 2025 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

/// Size of one streaming chunk in bytes.
/// Two buffers of this size are held in RAM at once (one owned by compute,
/// one owned by the in-flight DMA read), so this is the main RAM cost of the
/// update pipeline. Must be a multiple of the cipher block size so that MAC
/// state snapshots taken at chunk boundaries are well defined.
pub const BUFFER_SIZE: usize = 512;

/// Block size of the AES engine used for the streaming MAC.
pub const CIPHER_BLOCK_SIZE: usize = 16;

/// Size of the streaming MAC output, one cipher block.
pub const MAC_SIZE: usize = 16;

/// Size of the bundle signing key stored in the platform unique row.
pub const SIGNING_KEY_SIZE: usize = 32;

/// Smallest erasable unit of the internal program memory.
/// On the target MCU a row is four pages of 64 bytes each.
pub const FLASH_ROW_SIZE: usize = 256;

/// Size of one internal flash page, the largest unit the NVM controller
/// accepts in a single write operation.
pub const FLASH_PAGE_SIZE: usize = 64;

/// Number of 16-bit words in one internal flash page.
pub const FLASH_PAGE_WORDS: usize = FLASH_PAGE_SIZE / 2;

/// Upper bound on the size of the erasable application region.
/// Used to size the RAM table of intermediary MAC checkpoints; the real
/// region bounds are provided at run time by the bootloader binary.
pub const APP_REGION_MAX: u32 = 0x3_8000;

/// Capacity of the intermediary MAC checkpoint table: one entry per
/// streaming chunk that can overlap the firmware range, plus one because an
/// unaligned range straddles one extra chunk boundary.
pub const MAX_CHECKPOINTS: usize = (APP_REGION_MAX as usize / BUFFER_SIZE) + 1;

/// File-table index of the firmware update record used on the boot path.
pub const FW_RECORD_BOOT: u8 = 0;

/// File-table index of the firmware update record pushed to the companion
/// MCU by a runtime-triggered update.
pub const FW_RECORD_COMPANION: u8 = 1;

// A chunk that ends mid cipher block would make the pass-1 checkpoint
// snapshots ambiguous.
const _: () = assert!(BUFFER_SIZE % CIPHER_BLOCK_SIZE == 0);
const _: () = assert!(FLASH_ROW_SIZE % FLASH_PAGE_SIZE == 0);
const _: () = assert!(FLASH_PAGE_SIZE % 2 == 0);
