// SPDX-FileCopyrightText: 2025 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use core::sync::atomic::{fence, Ordering};

use crate::{
    consts::{FLASH_PAGE_SIZE, FLASH_PAGE_WORDS, FLASH_ROW_SIZE},
    Error,
};

/// Internal program-memory controller.
///
/// The memory cannot be addressed while an erase or write is in flight, so
/// every operation is followed by a busy-wait on [`Self::poll_ready`].
pub trait NvmController {
    /// Erase the row starting at `addr`. Non-blocking.
    fn erase_row(&mut self, addr: u32);

    /// Write one page of 16-bit words at `addr`, which is page-aligned and
    /// inside a previously erased row. Non-blocking.
    fn write_page(&mut self, addr: u32, words: &[u16; FLASH_PAGE_WORDS]);

    /// True when no erase or write is in flight.
    fn poll_ready(&self) -> bool;
}

fn wait_ready<N: NvmController>(nvm: &N) {
    while !nvm.poll_ready() {}
    fence(Ordering::Acquire);
}

/// Row-erase/page-write state machine over the application region.
///
/// Bytes are appended at strictly increasing addresses starting at the
/// region base. Each full row is flushed as one erase followed by its pages
/// in order, blocking on hardware-busy between every operation. A row is
/// erased exactly once, right before its first word is written.
pub struct RowProgrammer<'a, N: NvmController> {
    nvm: &'a mut N,
    /// Address of the row currently being filled.
    cursor: u32,
    end: u32,
    row: [u8; FLASH_ROW_SIZE],
    fill: usize,
}

impl<'a, N: NvmController> RowProgrammer<'a, N> {
    /// Program starting at `start`, never writing at or past `end`. Both
    /// bounds must be row-aligned.
    pub fn new(nvm: &'a mut N, start: u32, end: u32) -> Self {
        debug_assert!(start % FLASH_ROW_SIZE as u32 == 0);
        debug_assert!(end % FLASH_ROW_SIZE as u32 == 0);
        Self {
            nvm,
            cursor: start,
            end,
            row: [0; FLASH_ROW_SIZE],
            fill: 0,
        }
    }

    /// Append bytes to the image, flushing full rows to flash as they
    /// complete.
    pub fn program(&mut self, mut bytes: &[u8]) -> Result<(), Error> {
        while !bytes.is_empty() {
            let space = FLASH_ROW_SIZE - self.fill;
            let take = space.min(bytes.len());
            self.row[self.fill..self.fill + take].copy_from_slice(&bytes[..take]);
            self.fill += take;
            bytes = &bytes[take..];
            if self.fill == FLASH_ROW_SIZE {
                self.flush()?;
            }
        }
        Ok(())
    }

    /// Flush the final partial row, zero-padding its unused tail so row
    /// alignment is preserved when the image ends mid-row.
    pub fn finish(mut self) -> Result<(), Error> {
        if self.fill > 0 {
            self.row[self.fill..].fill(0);
            self.fill = FLASH_ROW_SIZE;
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Error> {
        let row_addr = self.cursor;
        if row_addr + FLASH_ROW_SIZE as u32 > self.end {
            return Err(Error::FirmwareTooLarge);
        }

        self.nvm.erase_row(row_addr);
        wait_ready(self.nvm);

        let mut words = [0u16; FLASH_PAGE_WORDS];
        for (i, page) in self.row.chunks_exact(FLASH_PAGE_SIZE).enumerate() {
            for (word, pair) in words.iter_mut().zip(page.chunks_exact(2)) {
                *word = u16::from_le_bytes([pair[0], pair[1]]);
            }
            self.nvm
                .write_page(row_addr + (i * FLASH_PAGE_SIZE) as u32, &words);
            wait_ready(self.nvm);
        }

        self.cursor += FLASH_ROW_SIZE as u32;
        self.fill = 0;
        Ok(())
    }
}

/// Row-erase the whole region. Used to wipe the application image on a
/// cross-pass tamper event before the device halts.
pub fn erase_region<N: NvmController>(nvm: &mut N, start: u32, end: u32) {
    let mut addr = start;
    while addr < end {
        nvm.erase_row(addr);
        wait_ready(nvm);
        addr += FLASH_ROW_SIZE as u32;
    }
}
