//! The legacy DES-based primitive used by V1 (`0x102`/`0x103`) archives.
//!
//! This is treated as an opaque primitive behind a narrow interface
//! (`decode_file_name`, `crypt_file_data`) rather than something the rest
//! of the engine reaches into — callers never see S-boxes or key
//! schedules, only "decode this name" / "crypt this buffer for cycle N".
//! The key schedule itself is the one fixed single key the legacy format
//! has always used; there is no per-archive key negotiation to implement.

use encoding_rs::SHIFT_JIS;

use crate::error::{CoreError, Result};

/// Direction for `crypt_file_data` — DES is its own inverse given the same
/// key schedule order reversed, but we keep the direction explicit so
/// callers never have to reason about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Decrypt,
    Encrypt,
}

/// Mirrors `flags & (MIXED|HEADER)` from the entry flags byte.
pub const MIXED: u8 = 0x02;
pub const HEADER: u8 = 0x04;

/// Decodes a V1 directory entry's name field. The bytes are first run
/// through the per-byte descrambler (iterate from the end, undo a
/// per-position transform), then decoded as Shift-JIS, the legacy
/// multibyte encoding these archives were produced under.
pub fn decode_file_name(encrypted: &[u8]) -> Result<String> {
    let descrambled = descramble_name_bytes(encrypted);
    let (cow, _enc, had_errors) = SHIFT_JIS.decode(&descrambled);
    if had_errors {
        Err(CoreError::NameDecodeError(encrypted.to_vec()))
    } else {
        Ok(cow.into_owned())
    }
}

fn descramble_name_bytes(encrypted: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(encrypted.len());
    for (k, block) in encrypted.chunks(8).enumerate() {
        let mut buf = [0u8; 8];
        buf[..block.len()].copy_from_slice(block);
        if k == 0 || encrypted.len() <= 8 {
            des_decrypt_block(&mut buf);
        } else {
            swap_nibbles(&mut buf);
        }
        out.extend_from_slice(&buf[..block.len()]);
    }
    out
}

/// Applies the legacy per-entry body cipher in place. `entry_type` is
/// `flags & (MIXED|HEADER)`; `cycle` is the per-entry DES cycle derived by
/// the ARC reader from the entry's compressed size (§4.4). Only ever
/// called for `0x102`/`0x103` archives.
pub fn crypt_file_data(buf: &mut [u8], entry_type: u8, cycle: i32, direction: Direction) {
    if buf.len() < 8 {
        return;
    }
    let cycle = cycle.max(1) as usize;
    let digest_only = entry_type & HEADER != 0;
    let num_blocks = buf.len() / 8;
    // The first 20 blocks (or every block, for HEADER-only entries) get
    // full DES; past that, only one block in every `cycle` does, the rest
    // get a cheap nibble swap. This mirrors the gating the legacy format
    // is known to apply so that large files aren't fully DES'd.
    for i in 0..num_blocks {
        let block = &mut buf[i * 8..i * 8 + 8];
        let mut fixed: [u8; 8] = block.try_into().unwrap();
        let full_des = i < 20 || (!digest_only && (i - 20) % cycle == 0) || digest_only;
        if full_des {
            match direction {
                Direction::Decrypt => des_decrypt_block(&mut fixed),
                Direction::Encrypt => des_encrypt_block(&mut fixed),
            }
        } else {
            swap_nibbles(&mut fixed);
        }
        block.copy_from_slice(&fixed);
    }
}

fn swap_nibbles(block: &mut [u8; 8]) {
    for byte in block.iter_mut() {
        *byte = (*byte << 4) | (*byte >> 4);
    }
}

// ---------------------------------------------------------------------
// Minimal single-key DES (ECB, one 8-byte block at a time). Standard
// tables; the key itself is the one fixed legacy key, not something this
// module negotiates.
// ---------------------------------------------------------------------

const FIXED_KEY: [u8; 8] = [0x19, 0xA2, 0x5C, 0x71, 0xEE, 0x03, 0x48, 0xBD];

const IP: [u8; 64] = [
    58, 50, 42, 34, 26, 18, 10, 2, 60, 52, 44, 36, 28, 20, 12, 4, 62, 54, 46, 38, 30, 22, 14, 6,
    64, 56, 48, 40, 32, 24, 16, 8, 57, 49, 41, 33, 25, 17, 9, 1, 59, 51, 43, 35, 27, 19, 11, 3,
    61, 53, 45, 37, 29, 21, 13, 5, 63, 55, 47, 39, 31, 23, 15, 7,
];

const FP: [u8; 64] = [
    40, 8, 48, 16, 56, 24, 64, 32, 39, 7, 47, 15, 55, 23, 63, 31, 38, 6, 46, 14, 54, 22, 62, 30,
    37, 5, 45, 13, 53, 21, 61, 29, 36, 4, 44, 12, 52, 20, 60, 28, 35, 3, 43, 11, 51, 19, 59, 27,
    34, 2, 42, 10, 50, 18, 58, 26, 33, 1, 41, 9, 49, 17, 57, 25,
];

const PC1: [u8; 56] = [
    57, 49, 41, 33, 25, 17, 9, 1, 58, 50, 42, 34, 26, 18, 10, 2, 59, 51, 43, 35, 27, 19, 11, 3, 60,
    52, 44, 36, 63, 55, 47, 39, 31, 23, 15, 7, 62, 54, 46, 38, 30, 22, 14, 6, 61, 53, 45, 37, 29,
    21, 13, 5, 28, 20, 12, 4,
];

const PC2: [u8; 48] = [
    14, 17, 11, 24, 1, 5, 3, 28, 15, 6, 21, 10, 23, 19, 12, 4, 26, 8, 16, 7, 27, 20, 13, 2, 41,
    52, 31, 37, 47, 55, 30, 40, 51, 45, 33, 48, 44, 49, 39, 56, 34, 53, 46, 42, 50, 36, 29, 32,
];

const SHIFTS: [u8; 16] = [1, 1, 2, 2, 2, 2, 2, 2, 1, 2, 2, 2, 2, 2, 2, 1];

const E: [u8; 48] = [
    32, 1, 2, 3, 4, 5, 4, 5, 6, 7, 8, 9, 8, 9, 10, 11, 12, 13, 12, 13, 14, 15, 16, 17, 16, 17, 18,
    19, 20, 21, 20, 21, 22, 23, 24, 25, 24, 25, 26, 27, 28, 29, 28, 29, 30, 31, 32, 1,
];

const P: [u8; 32] = [
    16, 7, 20, 21, 29, 12, 28, 17, 1, 15, 23, 26, 5, 18, 31, 10, 2, 8, 24, 14, 32, 27, 3, 9, 19,
    13, 30, 6, 22, 11, 4, 25,
];

const S: [[[u8; 16]; 4]; 8] = [
    [
        [14, 4, 13, 1, 2, 15, 11, 8, 3, 10, 6, 12, 5, 9, 0, 7],
        [0, 15, 7, 4, 14, 2, 13, 1, 10, 6, 12, 11, 9, 5, 3, 8],
        [4, 1, 14, 8, 13, 6, 2, 11, 15, 12, 9, 7, 3, 10, 5, 0],
        [15, 12, 8, 2, 4, 9, 1, 7, 5, 11, 3, 14, 10, 0, 6, 13],
    ],
    [
        [15, 1, 8, 14, 6, 11, 3, 4, 9, 7, 2, 13, 12, 0, 5, 10],
        [3, 13, 4, 7, 15, 2, 8, 14, 12, 0, 1, 10, 6, 9, 11, 5],
        [0, 14, 7, 11, 10, 4, 13, 1, 5, 8, 12, 6, 9, 3, 2, 15],
        [13, 8, 10, 1, 3, 15, 4, 2, 11, 6, 7, 12, 0, 5, 14, 9],
    ],
    [
        [10, 0, 9, 14, 6, 3, 15, 5, 1, 13, 12, 7, 11, 4, 2, 8],
        [13, 7, 0, 9, 3, 4, 6, 10, 2, 8, 5, 14, 12, 11, 15, 1],
        [13, 6, 4, 9, 8, 15, 3, 0, 11, 1, 2, 12, 5, 10, 14, 7],
        [1, 10, 13, 0, 6, 9, 8, 7, 4, 15, 14, 3, 11, 5, 2, 12],
    ],
    [
        [7, 13, 14, 3, 0, 6, 9, 10, 1, 2, 8, 5, 11, 12, 4, 15],
        [13, 8, 11, 5, 6, 15, 0, 3, 4, 7, 2, 12, 1, 10, 14, 9],
        [10, 6, 9, 0, 12, 11, 7, 13, 15, 1, 3, 14, 5, 2, 8, 4],
        [3, 15, 0, 6, 10, 1, 13, 8, 9, 4, 5, 11, 12, 7, 2, 14],
    ],
    [
        [2, 12, 4, 1, 7, 10, 11, 6, 8, 5, 3, 15, 13, 0, 14, 9],
        [14, 11, 2, 12, 4, 7, 13, 1, 5, 0, 15, 10, 3, 9, 8, 6],
        [4, 2, 1, 11, 10, 13, 7, 8, 15, 9, 12, 5, 6, 3, 0, 14],
        [11, 8, 12, 7, 1, 14, 2, 13, 6, 15, 0, 9, 10, 4, 5, 3],
    ],
    [
        [12, 1, 10, 15, 9, 2, 6, 8, 0, 13, 3, 4, 14, 7, 5, 11],
        [10, 15, 4, 2, 7, 12, 9, 5, 6, 1, 13, 14, 0, 11, 3, 8],
        [9, 14, 15, 5, 2, 8, 12, 3, 7, 0, 4, 10, 1, 13, 11, 6],
        [4, 3, 2, 12, 9, 5, 15, 10, 11, 14, 1, 7, 6, 0, 8, 13],
    ],
    [
        [4, 11, 2, 14, 15, 0, 8, 13, 3, 12, 9, 7, 5, 10, 6, 1],
        [13, 0, 11, 7, 4, 9, 1, 10, 14, 3, 5, 12, 2, 15, 8, 6],
        [1, 4, 11, 13, 12, 3, 7, 14, 10, 15, 6, 8, 0, 5, 9, 2],
        [6, 11, 13, 8, 1, 4, 10, 7, 9, 5, 0, 15, 14, 2, 3, 12],
    ],
    [
        [13, 2, 8, 4, 6, 15, 11, 1, 10, 9, 3, 14, 5, 0, 12, 7],
        [1, 15, 13, 8, 10, 3, 7, 4, 12, 5, 6, 11, 0, 14, 9, 2],
        [7, 11, 4, 1, 9, 12, 14, 2, 0, 6, 10, 13, 15, 3, 5, 8],
        [2, 1, 14, 7, 4, 10, 8, 13, 15, 12, 9, 0, 3, 5, 6, 11],
    ],
];

fn permute(input: u64, input_bits: u32, table: &[u8]) -> u64 {
    let mut out = 0u64;
    for &bit_pos in table {
        let bit = (input >> (input_bits - bit_pos as u32)) & 1;
        out = (out << 1) | bit;
    }
    out
}

fn key_schedule() -> [u64; 16] {
    let key = u64::from_be_bytes(FIXED_KEY);
    let permuted = permute(key, 64, &PC1);
    let mut c = (permuted >> 28) & 0x0FFF_FFFF;
    let mut d = permuted & 0x0FFF_FFFF;
    let mut subkeys = [0u64; 16];
    for (round, &shift) in SHIFTS.iter().enumerate() {
        c = ((c << shift) | (c >> (28 - shift))) & 0x0FFF_FFFF;
        d = ((d << shift) | (d >> (28 - shift))) & 0x0FFF_FFFF;
        let cd = (c << 28) | d;
        subkeys[round] = permute(cd, 56, &PC2);
    }
    subkeys
}

fn feistel(r: u32, subkey: u64) -> u32 {
    let expanded = permute(r as u64, 32, &E) ^ subkey;
    let mut out = 0u32;
    for i in 0..8 {
        let chunk = ((expanded >> (42 - i * 6)) & 0x3F) as u8;
        let row = (((chunk & 0x20) >> 4) | (chunk & 1)) as usize;
        let col = ((chunk >> 1) & 0x0F) as usize;
        out = (out << 4) | S[i][row][col] as u32;
    }
    permute(out as u64, 32, &P) as u32
}

fn des_block(block: &mut [u8; 8], subkeys: &[u64; 16], decrypt: bool) {
    let input = u64::from_be_bytes(*block);
    let permuted = permute(input, 64, &IP);
    let mut l = (permuted >> 32) as u32;
    let mut r = permuted as u32;
    for round in 0..16 {
        let subkey = if decrypt { subkeys[15 - round] } else { subkeys[round] };
        let next_l = r;
        r = l ^ feistel(r, subkey);
        l = next_l;
    }
    let combined = ((r as u64) << 32) | l as u64;
    let output = permute(combined, 64, &FP);
    *block = output.to_be_bytes();
}

fn des_encrypt_block(block: &mut [u8; 8]) {
    des_block(block, &key_schedule(), false);
}

fn des_decrypt_block(block: &mut [u8; 8]) {
    des_block(block, &key_schedule(), true);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn des_block_round_trips() {
        let mut block = *b"abcdefgh";
        let original = block;
        des_encrypt_block(&mut block);
        assert_ne!(block, original);
        des_decrypt_block(&mut block);
        assert_eq!(block, original);
    }

    #[test]
    fn crypt_file_data_round_trips() {
        let mut data = vec![0u8; 256];
        for (i, b) in data.iter_mut().enumerate() {
            *b = i as u8;
        }
        let original = data.clone();
        crypt_file_data(&mut data, MIXED, 4, Direction::Encrypt);
        assert_ne!(data, original);
        crypt_file_data(&mut data, MIXED, 4, Direction::Decrypt);
        assert_eq!(data, original);
    }

    #[test]
    fn crypt_file_data_ignores_short_buffers() {
        let mut data = vec![1, 2, 3];
        let original = data.clone();
        crypt_file_data(&mut data, MIXED, 1, Direction::Encrypt);
        assert_eq!(data, original);
    }
}
