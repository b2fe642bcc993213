//! GPT-2 byte-level alphabet for vocabulary and merge files.
//!
//! Trainers that persist token bytes as JSON or text cannot write raw bytes
//! such as `0x00` or a lone UTF-8 continuation byte. The GPT-2 convention maps
//! each of the 256 byte values to a distinct printable Unicode character so a
//! token's bytes survive a round trip through a text file.
//!
//! # Mapping Strategy
//!
//! - Bytes 33-126 (`!` to `~`), 161-172 and 174-255 map to the character with
//!   the same code point.
//! - The remaining 68 bytes (0-32, 127-160, 173) map, in byte order, to
//!   U+0100 onwards. Space (0x20) therefore becomes `Ġ` (U+0120).
//!
//! This module is only consulted while loading definition files whose text
//! encoding is [`TokenTextEncoding::ByteLevel`](super::TokenTextEncoding);
//! encoding itself always runs on raw bytes.

use rustc_hash::FxHashMap;
use std::sync::LazyLock;

/// Byte to Unicode character mapping (256 entries).
static BYTE_TO_CHAR: LazyLock<[char; 256]> = LazyLock::new(|| {
    let mut mapping = ['\0'; 256];
    let mut is_direct = [false; 256];

    for b in (33u8..=126).chain(161u8..=172).chain(174u8..=255) {
        is_direct[b as usize] = true;
        mapping[b as usize] = char::from(b);
    }

    let mut next_char = 0x100u32;
    for b in 0..256usize {
        if !is_direct[b] {
            // 0x100..0x144 are all valid scalar values
            mapping[b] = char::from_u32(next_char).unwrap_or(char::REPLACEMENT_CHARACTER);
            next_char += 1;
        }
    }

    mapping
});

/// Unicode character to byte mapping (reverse of BYTE_TO_CHAR).
static CHAR_TO_BYTE: LazyLock<FxHashMap<char, u8>> = LazyLock::new(|| {
    BYTE_TO_CHAR
        .iter()
        .enumerate()
        .map(|(byte, &ch)| (ch, byte as u8))
        .collect()
});

/// Encode raw bytes into their byte-level string form.
///
/// Used when writing token bytes into a human-readable definition file.
#[inline]
pub fn byte_level_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| BYTE_TO_CHAR[b as usize]).collect()
}

/// Decode a byte-level string back to raw bytes.
///
/// Returns `None` if the string contains a character outside the 256-character
/// alphabet, which means the file was not written with the byte-level convention.
#[inline]
pub fn byte_level_decode(text: &str) -> Option<Vec<u8>> {
    text.chars()
        .map(|ch| CHAR_TO_BYTE.get(&ch).copied())
        .collect()
}
