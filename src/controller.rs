// SPDX-FileCopyrightText: 2025 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use crc::{Crc, CRC_32_ISCSI};
use heapless::Vec;

use crate::{
    consts::MAX_CHECKPOINTS,
    header::BundleHeader,
    mac::{ct_mac_eq, ctr_xor, BlockCipher, Mac, MacState},
    platform::PlatformStore,
    program::{erase_region, NvmController, RowProgrammer},
    stream::{read_exact, ChunkReader, FlashSource},
    Error,
};

/// Intermediary MAC checkpoint table: one pass-1 MAC state per streaming
/// chunk that overlaps the firmware range, in read order. Lives for exactly
/// one update attempt and is never persisted.
pub type CheckpointTable = Vec<Mac, MAX_CHECKPOINTS>;

/// File-table lookup in the external flash filesystem.
pub trait FileTable {
    /// Flash address of the firmware update file record for `index`, a
    /// size-prefixed blob inside the signed region.
    fn firmware_record(&self, index: u8) -> Option<u32>;
}

/// Address layout for one update attempt.
#[derive(Debug, Clone)]
pub struct UpdateConfig {
    /// Address of the bundle header in external flash.
    pub bundle_base: u32,
    /// First address of the erasable application region in internal flash.
    pub app_start: u32,
    /// One past the last address of the application region.
    pub app_end: u32,
    /// File-table index of the firmware record to install.
    pub record_index: u8,
}

/// Terminal outcome of an update attempt. The caller owns the actual
/// reset/halt and any status display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[must_use]
pub enum Outcome {
    /// The upgrade pending flag is not set; boot the application normally.
    NoUpdatePending,
    /// New firmware programmed and committed. Reset the device.
    UpdateInstalled,
    /// Update abandoned, previous application untouched, pending flag
    /// cleared. Reset the device.
    Aborted(Error),
    /// External flash content changed between the two passes. The
    /// application region has been erased; display the irrecoverable error
    /// and halt.
    Tampered,
    /// External flash failed its presence probe. Display and halt.
    HardwareFault,
}

/// Why an attempt ended early.
pub(crate) enum Failure {
    /// Soft: clear the pending flag and reboot into the old application.
    Abort(Error),
    /// Fatal: active tamper between pass 1 and pass 2.
    Tamper,
}

/// The two-pass streaming verification-and-flash pipeline.
///
/// Pass 1 authenticates the whole signed region with a streaming MAC and
/// caches the intermediate MAC state after every chunk that overlaps the
/// firmware record. Pass 2 re-streams the identical region, re-running the
/// MAC from scratch, and only hands a chunk's firmware bytes to the row
/// programmer after its fresh MAC state matches the pass-1 checkpoint. The
/// external flash is reachable over the update-loading path and therefore
/// untrusted between the passes; a checkpoint mismatch means the content
/// changed after authentication and is handled by erasing the application
/// region rather than programming a single unauthenticated byte.
pub struct UpdateEngine<'a, F, N, T, P, C>
where
    F: FlashSource,
    N: NvmController,
    T: FileTable,
    P: PlatformStore,
    C: BlockCipher,
{
    flash: &'a mut F,
    nvm: &'a mut N,
    files: &'a T,
    platform: &'a mut P,
    config: UpdateConfig,
    _cipher: core::marker::PhantomData<C>,
}

impl<'a, F, N, T, P, C> UpdateEngine<'a, F, N, T, P, C>
where
    F: FlashSource,
    N: NvmController,
    T: FileTable,
    P: PlatformStore,
    C: BlockCipher,
{
    pub fn new(
        flash: &'a mut F,
        nvm: &'a mut N,
        files: &'a T,
        platform: &'a mut P,
        config: UpdateConfig,
    ) -> Self {
        Self {
            flash,
            nvm,
            files,
            platform,
            config,
            _cipher: core::marker::PhantomData,
        }
    }

    /// Run one update attempt to a terminal outcome.
    pub fn run(&mut self) -> Outcome {
        if !self.platform.upgrade_pending() {
            return Outcome::NoUpdatePending;
        }
        // Hardware precondition, not part of the pipeline proper. The
        // pending flag survives so a transient fault retries after a power
        // cycle.
        if !self.flash.present() {
            return Outcome::HardwareFault;
        }

        match self.try_update() {
            Ok(()) => Outcome::UpdateInstalled,
            Err(Failure::Abort(e)) => {
                self.platform.clear_upgrade_pending();
                Outcome::Aborted(e)
            }
            Err(Failure::Tamper) => {
                erase_region(self.nvm, self.config.app_start, self.config.app_end);
                self.platform.clear_upgrade_pending();
                Outcome::Tampered
            }
        }
    }

    fn try_update(&mut self) -> Result<(), Failure> {
        let header = self.read_header().map_err(Failure::Abort)?;
        header
            .validate_size(self.flash.capacity())
            .map_err(Failure::Abort)?;

        // Cheap whole-bundle gate against truncation and gross corruption.
        // Protects against nothing adversarial; the MAC passes do that.
        self.check_outer_crc(&header)?;

        let (fw_start, fw_end) = self.locate_firmware(&header).map_err(Failure::Abort)?;

        let row = self.platform.load();
        let cipher = C::new(&row.bundle_signing_key);

        let mut checkpoints = CheckpointTable::new();
        let final_mac = self.pass1(&cipher, &header, fw_start, fw_end, &mut checkpoints)?;

        if !ct_mac_eq(&final_mac, header.signed_hash()) {
            return Err(Failure::Abort(Error::AuthenticationFailed));
        }
        // The version gate runs only after the MAC has matched, so an
        // unauthenticated bundle cannot probe which versions the device
        // would accept.
        if header.bundle_version() <= row.current_bundle_version {
            return Err(Failure::Abort(Error::VersionRollback));
        }

        self.pass2(&cipher, &header, fw_start, fw_end, &checkpoints)?;

        self.finalize(&header, &cipher, row);
        Ok(())
    }

    fn read_header(&mut self) -> Result<BundleHeader, Error> {
        let mut bytes = [0u8; BundleHeader::SIZE];
        read_exact(self.flash, self.config.bundle_base, &mut bytes);
        BundleHeader::parse(&bytes)
    }

    fn check_outer_crc(&mut self, header: &BundleHeader) -> Result<(), Failure> {
        let crc = Crc::<u32>::new(&CRC_32_ISCSI);
        let mut digest = crc.digest();

        let start = self.config.bundle_base + BundleHeader::CRC_COVER_OFFSET as u32;
        let end = self.data_end(header);
        let mut reader = ChunkReader::new(self.flash, start, end);
        while let Some((_, chunk)) = reader.next_chunk() {
            digest.update(chunk);
        }

        if digest.finalize() != header.crc32() {
            return Err(Failure::Abort(Error::CrcMismatch));
        }
        Ok(())
    }

    /// Resolve the firmware record and return its image byte range,
    /// validated against the signed region and the application region size.
    fn locate_firmware(&mut self, header: &BundleHeader) -> Result<(u32, u32), Error> {
        let record_addr = self
            .files
            .firmware_record(self.config.record_index)
            .ok_or(Error::RecordMissing)?;

        // The record address comes from the file table in external flash
        // and is as untrusted as the rest of the bundle; all arithmetic on
        // it must be overflow-checked.
        let fw_start = record_addr.checked_add(4).ok_or(Error::RecordOutOfBounds)?;
        let data_start = self.data_start();
        let data_end = self.data_end(header);
        if record_addr < data_start || fw_start > data_end {
            return Err(Error::RecordOutOfBounds);
        }

        let mut size_bytes = [0u8; 4];
        read_exact(self.flash, record_addr, &mut size_bytes);
        let size = u32::from_le_bytes(size_bytes);
        if size == 0 {
            return Err(Error::RecordOutOfBounds);
        }

        let fw_end = fw_start.checked_add(size).ok_or(Error::RecordOutOfBounds)?;
        if fw_end > data_end {
            return Err(Error::RecordOutOfBounds);
        }
        if size > self.config.app_end - self.config.app_start {
            return Err(Error::FirmwareTooLarge);
        }
        Ok((fw_start, fw_end))
    }

    /// Pass 1: authenticate the entire signed region, caching the MAC state
    /// after every chunk that overlaps the firmware range.
    pub(crate) fn pass1(
        &mut self,
        cipher: &C,
        header: &BundleHeader,
        fw_start: u32,
        fw_end: u32,
        checkpoints: &mut CheckpointTable,
    ) -> Result<Mac, Failure> {
        let data_start = self.data_start();
        let data_end = self.data_end(header);
        let mut mac = MacState::init();
        let mut reader = ChunkReader::new(self.flash, data_start, data_end);
        while let Some((addr, chunk)) = reader.next_chunk() {
            mac.update(cipher, chunk);
            if overlaps(addr, addr + chunk.len() as u32, fw_start, fw_end) {
                checkpoints
                    .push(*mac.mac())
                    .map_err(|_| Failure::Abort(Error::FirmwareTooLarge))?;
            }
        }
        Ok(*mac.mac())
    }

    /// Pass 2: re-stream and re-authenticate the identical region chunk for
    /// chunk, programming each chunk's firmware bytes only after its MAC
    /// state matches the pass-1 checkpoint.
    pub(crate) fn pass2(
        &mut self,
        cipher: &C,
        header: &BundleHeader,
        fw_start: u32,
        fw_end: u32,
        checkpoints: &CheckpointTable,
    ) -> Result<(), Failure> {
        let data_start = self.data_start();
        let data_end = self.data_end(header);
        let mut mac = MacState::init();
        let mut programmer =
            RowProgrammer::new(self.nvm, self.config.app_start, self.config.app_end);
        let mut next_checkpoint = 0;

        let mut reader = ChunkReader::new(self.flash, data_start, data_end);
        while let Some((addr, chunk)) = reader.next_chunk() {
            mac.update(cipher, chunk);

            let chunk_end = addr + chunk.len() as u32;
            if !overlaps(addr, chunk_end, fw_start, fw_end) {
                continue;
            }

            // Running out of checkpoints means pass 2 sees more firmware
            // chunks than pass 1 authenticated, a tamper signature.
            let Some(expected) = checkpoints.get(next_checkpoint) else {
                return Err(Failure::Tamper);
            };
            next_checkpoint += 1;
            if mac.mac() != expected {
                return Err(Failure::Tamper);
            }

            // The chunk may overlap the firmware range only partially at
            // either boundary; program just the overlapping sub-range.
            let copy_start = fw_start.max(addr);
            let copy_end = fw_end.min(chunk_end);
            let sub = &chunk[(copy_start - addr) as usize..(copy_end - addr) as usize];
            programmer.program(sub).map_err(Failure::Abort)?;
        }

        programmer.finish().map_err(Failure::Abort)?;
        Ok(())
    }

    /// Commit a verified update: rotate the signing key if requested,
    /// install the new bundle version, flip the cross-reboot flags.
    fn finalize(&mut self, header: &BundleHeader, cipher: &C, row: crate::platform::PlatformRow) {
        let mut row = row;
        if header.rotate_signing_key() {
            let mut key = *header.encrypted_new_signing_key();
            ctr_xor(cipher, &mut key);
            row.bundle_signing_key = key;
        }
        row.current_bundle_version = header.bundle_version();
        self.platform.store(&row);
        self.platform.set_update_succeeded();
        self.platform.clear_upgrade_pending();
    }

    /// First byte of the signed region, right after the header.
    fn data_start(&self) -> u32 {
        self.config.bundle_base + BundleHeader::SIZE as u32
    }

    /// One past the last byte of the signed region.
    fn data_end(&self, header: &BundleHeader) -> u32 {
        self.data_start() + header.total_size()
    }
}

fn overlaps(start: u32, end: u32, range_start: u32, range_end: u32) -> bool {
    start < range_end && range_start < end
}
