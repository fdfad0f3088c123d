// SPDX-FileCopyrightText: 2025 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use core::sync::atomic::{fence, Ordering};

use crate::consts::BUFFER_SIZE;

/// One of the two DMA buffers of the double-buffer pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BufSlot {
    A,
    B,
}

impl BufSlot {
    pub fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

/// Cursor-addressed, DMA-overlapped read access to the external flash.
///
/// The implementation owns the two chunk buffers so that an in-flight DMA
/// transfer never aliases a buffer the compute stage is reading; callers
/// address them through [`BufSlot`]. At most one read is in flight at a
/// time.
pub trait FlashSource {
    /// Total addressable size of the external flash in bytes.
    fn capacity(&self) -> u32;

    /// True if the flash answered its identification probe at boot.
    fn present(&self) -> bool;

    /// Start a read of `len` bytes at `addr` into `slot`. Non-blocking;
    /// `len` is at most [`BUFFER_SIZE`]. Must not be called while a read is
    /// in flight.
    fn start_read(&mut self, slot: BufSlot, addr: u32, len: usize);

    /// True when no read is in flight.
    fn poll_ready(&self) -> bool;

    /// Contents of `slot`. Only valid once the read that targeted it has
    /// completed.
    fn buffer(&self, slot: BufSlot) -> &[u8; BUFFER_SIZE];
}

/// Busy-wait for the flash source. This polling loop is the single
/// suspension point of the whole pipeline; the bootloader has no scheduler
/// to yield to.
fn wait_ready<F: FlashSource>(source: &F) {
    while !source.poll_ready() {}
    // The DMA completion must be visible before the buffer is read.
    fence(Ordering::Acquire);
}

/// Streams a flash address range as fixed-size chunks through the
/// double-buffer pair.
///
/// While chunk N is handed to compute, chunk N+1's read is already in
/// flight in the other buffer. The alternation invariant lives here: a
/// buffer is reused for chunk N+2 only after chunk N's borrow has ended,
/// and chunk N+1's read is issued strictly after chunk N's buffer is handed
/// over.
pub struct ChunkReader<'a, F: FlashSource> {
    source: &'a mut F,
    /// Address of the next chunk to hand to compute.
    cursor: u32,
    end: u32,
    /// Slot holding (or receiving) the chunk at `cursor`.
    compute: BufSlot,
}

impl<'a, F: FlashSource> ChunkReader<'a, F> {
    /// Start streaming `[start, end)`, issuing the first read immediately.
    pub fn new(source: &'a mut F, start: u32, end: u32) -> Self {
        if start < end {
            source.start_read(BufSlot::A, start, chunk_len(start, end));
        }
        Self {
            source,
            cursor: start,
            end,
            compute: BufSlot::A,
        }
    }

    /// Hand the next chunk to compute, returning its flash address and
    /// contents. Only the final chunk may be shorter than [`BUFFER_SIZE`].
    pub fn next_chunk(&mut self) -> Option<(u32, &[u8])> {
        if self.cursor >= self.end {
            return None;
        }

        let addr = self.cursor;
        let len = chunk_len(addr, self.end);
        let slot = self.compute;
        wait_ready(self.source);

        // Overlap: kick off the following chunk's read into the other
        // buffer before compute touches this one.
        let next = addr + len as u32;
        if next < self.end {
            self.source
                .start_read(slot.other(), next, chunk_len(next, self.end));
        }

        self.cursor = next;
        self.compute = slot.other();
        Some((addr, &self.source.buffer(slot)[..len]))
    }
}

/// Blocking read of a short range, used for the bundle header and the
/// firmware record's size prefix.
pub fn read_exact<F: FlashSource>(source: &mut F, addr: u32, out: &mut [u8]) {
    let mut reader = ChunkReader::new(source, addr, addr + out.len() as u32);
    let mut filled = 0;
    while let Some((_, chunk)) = reader.next_chunk() {
        out[filled..filled + chunk.len()].copy_from_slice(chunk);
        filled += chunk.len();
    }
}

fn chunk_len(addr: u32, end: u32) -> usize {
    BUFFER_SIZE.min((end - addr) as usize)
}
