// SPDX-FileCopyrightText: 2025 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::consts::{CIPHER_BLOCK_SIZE, MAC_SIZE, SIGNING_KEY_SIZE};

/// Keyed AES block encryption.
///
/// Implemented by the hardware AES engine on target and by a software fake
/// in tests. The same keyed instance drives both the streaming MAC and the
/// counter-mode decryption of a replacement signing key.
pub trait BlockCipher: Sized {
    fn new(key: &[u8; SIGNING_KEY_SIZE]) -> Self;

    /// Encrypt one block in place.
    fn encrypt_block(&self, block: &mut [u8; CIPHER_BLOCK_SIZE]);
}

/// A streaming MAC value.
pub type Mac = [u8; MAC_SIZE];

/// Block-chained streaming MAC state.
///
/// The MAC is computed incrementally over data far larger than RAM: each
/// cipher block of the stream is XORed into the state, which is then
/// encrypted. The MAC after the last chunk is the final value.
///
/// Re-running from [`MacState::init`] over the same data with the same chunk
/// boundaries reproduces the identical sequence of intermediate states. The
/// two-pass controller depends on this to compare pass-2 states against the
/// checkpoints cached in pass 1.
pub struct MacState {
    state: [u8; CIPHER_BLOCK_SIZE],
}

impl MacState {
    /// Fresh state. The key lives in the cipher, not here.
    pub fn init() -> Self {
        Self {
            state: [0; CIPHER_BLOCK_SIZE],
        }
    }

    /// Absorb one chunk of the stream.
    ///
    /// Chunks must be a multiple of the cipher block size except for the
    /// final chunk of the stream, whose trailing partial block is
    /// zero-padded.
    pub fn update(&mut self, cipher: &impl BlockCipher, chunk: &[u8]) {
        let mut blocks = chunk.chunks_exact(CIPHER_BLOCK_SIZE);
        for block in &mut blocks {
            for (s, b) in self.state.iter_mut().zip(block) {
                *s ^= b;
            }
            cipher.encrypt_block(&mut self.state);
        }

        let tail = blocks.remainder();
        if !tail.is_empty() {
            let mut padded = [0u8; CIPHER_BLOCK_SIZE];
            padded[..tail.len()].copy_from_slice(tail);
            for (s, b) in self.state.iter_mut().zip(&padded) {
                *s ^= b;
            }
            cipher.encrypt_block(&mut self.state);
        }
    }

    /// Current MAC, the state after the last absorbed chunk.
    pub fn mac(&self) -> &Mac {
        &self.state
    }
}

/// Counter-mode keystream XOR, its own inverse.
///
/// Used by the finalizer to decrypt the replacement signing key under the
/// current signing key. The counter block is zero except for a little-endian
/// block counter in its first four bytes.
pub fn ctr_xor(cipher: &impl BlockCipher, data: &mut [u8]) {
    let mut counter = 0u32;
    for chunk in data.chunks_mut(CIPHER_BLOCK_SIZE) {
        let mut keystream = [0u8; CIPHER_BLOCK_SIZE];
        keystream[..4].copy_from_slice(&counter.to_le_bytes());
        cipher.encrypt_block(&mut keystream);
        for (b, k) in chunk.iter_mut().zip(&keystream) {
            *b ^= k;
        }
        counter += 1;
    }
}

/// Constant-time MAC comparison.
///
/// The accumulated difference goes through `black_box` so the comparison
/// cannot be compiled into an early-exit loop an attacker could time.
pub fn ct_mac_eq(a: &Mac, b: &Mac) -> bool {
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    core::hint::black_box(diff) == 0
}
