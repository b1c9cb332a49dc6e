//! CRC-32 as computed by the board firmware.
//!
//! This is the STM32 hardware CRC unit emulated in software: polynomial
//! `0x04C11DB7`, init `0xFFFFFFFF`, no reflection and no final XOR. The
//! firmware feeds the peripheral 32-bit little-endian words, so the input is
//! zero-padded to a multiple of four and every word is consumed high byte
//! first, i.e. bytes 3, 2, 1, 0 of each group. A zlib CRC-32 gives different
//! results and must not be substituted.

use crc::{CRC_32_MPEG_2, Crc};

/// CRC-32/MPEG-2 is the STM32 peripheral's algorithm; only the byte order differs.
const STM32: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

/// CRC engine for frames and firmware images.
#[derive(Clone, Copy, Default)]
pub struct Crc32;

impl Crc32 {
    pub fn new() -> Self {
        Self
    }

    /// Checksum `data` the way the firmware does, padding the tail word with zeros.
    pub fn checksum(&self, data: &[u8]) -> u32 {
        let mut digest = STM32.digest();
        for chunk in data.chunks(4) {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            word.reverse();
            digest.update(&word);
        }
        digest.finalize()
    }
}

impl std::fmt::Debug for Crc32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crc32")
            .field("poly", &format_args!("{:#010x}", STM32.algorithm.poly))
            .finish()
    }
}
