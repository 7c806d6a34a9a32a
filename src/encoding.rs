//! # Byte-Level Codecs
//!
//! The three byte-level helpers the record engine is built on:
//!
//! - [`swap_endianness`]: in-place byte reversal of every element in a
//!   buffer, used when a connection's `CONVERT=` differs from the host
//!   byte order. Elements one byte wide are left untouched; a trailing
//!   partial element is never reversed.
//! - [`decode_record_marker`]: the 32-bit length field that brackets each
//!   sequential unformatted record (an identical header and footer).
//!   Markers are written through the normal emit path with a 4-byte
//!   element width, so the same swap rule covers both directions.
//! - [`find_last_newline`]: backward `\n` search for `BACKSPACE` over
//!   formatted records. The scan covers exactly the valid span it is
//!   given, starting at the last byte.

/// Width in bytes of the sequential unformatted record length marker.
pub const RECORD_MARKER_BYTES: usize = 4;

/// Reverses each `element_bytes`-wide element of `data` in place.
pub fn swap_endianness(data: &mut [u8], element_bytes: usize) {
    if element_bytes > 1 {
        data.chunks_exact_mut(element_bytes).for_each(<[u8]>::reverse);
    }
}

/// Decodes a record length marker from the first four bytes of `bytes`.
pub fn decode_record_marker(bytes: &[u8], swap: bool) -> i32 {
    let mut word = [0u8; RECORD_MARKER_BYTES];
    word.copy_from_slice(&bytes[..RECORD_MARKER_BYTES]);
    if swap {
        word.reverse();
    }
    i32::from_ne_bytes(word)
}

/// Index of the last `\n` in `buf`, if any.
pub fn find_last_newline(buf: &[u8]) -> Option<usize> {
    buf.iter().rposition(|&b| b == b'\n')
}
