//! Variable-length integer codec for compressed adjacency lists
//!
//! Every value is split into 7-bit chunks that are written least significant
//! chunk first, one byte per chunk. The final byte of a value carries the high
//! bit; all earlier bytes of the value leave it clear.

/// Entries holding this value are skipped by the bulk encoders
pub const IGNORE_VALUE: u64 = u64::MAX;

/// Largest number of bytes a single `u64` can occupy
pub const MAX_ENCODED_SIZE: usize = 10;

const CHUNK_BITS: u32 = 7;
const CHUNK_MASK: u64 = 0x7F;
const END_BIT: u8 = 0x80;

/// Map a signed value onto the unsigned domain so small magnitudes stay small
#[inline]
pub fn zigzag(value: i64) -> u64 {
    ((value >> 63) ^ (value << 1)) as u64
}

/// Inverse of [`zigzag`]
#[inline]
pub fn unzigzag(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// Number of bytes [`encode`] will write for `value`
#[inline]
pub fn encoded_size(value: u64) -> usize {
    if value == 0 {
        return 1;
    }
    let bits = (u64::BITS - value.leading_zeros()) as usize;
    (bits + CHUNK_BITS as usize - 1) / CHUNK_BITS as usize
}

/// Number of bytes [`encode_values`] will write for `values`
pub fn encoded_size_of(values: &[u64]) -> usize {
    values
        .iter()
        .filter(|&&value| value != IGNORE_VALUE)
        .map(|&value| encoded_size(value))
        .sum()
}

/// Append the encoding of `value` to `out`, returning the number of bytes written
#[inline]
pub fn encode(value: u64, out: &mut Vec<u8>) -> usize {
    let start = out.len();
    let mut remaining = value;
    while remaining > CHUNK_MASK {
        out.push((remaining & CHUNK_MASK) as u8);
        remaining >>= CHUNK_BITS;
    }
    out.push(remaining as u8 | END_BIT);
    out.len() - start
}

/// Append every value except [`IGNORE_VALUE`] entries, returning bytes written
pub fn encode_values(values: &[u64], out: &mut Vec<u8>) -> usize {
    let start = out.len();
    for &value in values {
        if value != IGNORE_VALUE {
            encode(value, out);
        }
    }
    out.len() - start
}

/// Decode one value starting at `pos`, returning it with the position after it
#[inline]
pub fn decode(bytes: &[u8], pos: usize) -> (u64, usize) {
    let mut value = 0u64;
    let mut shift = 0;
    let mut pos = pos;
    loop {
        let byte = bytes[pos];
        pos += 1;
        value |= ((byte & CHUNK_MASK as u8) as u64) << shift;
        if byte & END_BIT != 0 {
            return (value, pos);
        }
        shift += CHUNK_BITS;
    }
}

/// Decode `out.len()` values starting at `pos`, returning the position after them
pub fn decode_values(bytes: &[u8], pos: usize, out: &mut [u64]) -> usize {
    let mut pos = pos;
    for slot in out.iter_mut() {
        let (value, next) = decode(bytes, pos);
        *slot = value;
        pos = next;
    }
    pos
}

/// Decode `out.len()` deltas and turn them back into absolute values, starting from `base`
pub fn decode_deltas(bytes: &[u8], pos: usize, base: u64, out: &mut [u64]) -> usize {
    let mut pos = pos;
    let mut current = base;
    for slot in out.iter_mut() {
        let (delta, next) = decode(bytes, pos);
        current = current.wrapping_add(delta);
        *slot = current;
        pos = next;
    }
    pos
}

/// Replace an ascending sequence by its gaps, skipping [`IGNORE_VALUE`] entries.
///
/// The first kept value stays absolute. Returns the number of kept values.
pub fn delta_encode(values: &mut [u64]) -> usize {
    let mut previous = 0u64;
    let mut kept = 0;
    for value in values.iter_mut() {
        if *value == IGNORE_VALUE {
            continue;
        }
        let current = *value;
        debug_assert!(current >= previous, "delta encoding requires ascending input");
        *value = current - previous;
        previous = current;
        kept += 1;
    }
    kept
}

/// Encode an arbitrary signed sequence as zigzag-mapped deltas
pub fn encode_signed_deltas(values: &[i64], out: &mut Vec<u8>) -> usize {
    let start = out.len();
    let mut previous = 0i64;
    for &value in values {
        encode(zigzag(value.wrapping_sub(previous)), out);
        previous = value;
    }
    out.len() - start
}

/// Decode `count` values written by [`encode_signed_deltas`]
pub fn decode_signed_deltas(bytes: &[u8], pos: usize, count: usize) -> (Vec<i64>, usize) {
    let mut values = Vec::with_capacity(count);
    let mut pos = pos;
    let mut previous = 0i64;
    for _ in 0..count {
        let (raw, next) = decode(bytes, pos);
        previous = previous.wrapping_add(unzigzag(raw));
        values.push(previous);
        pos = next;
    }
    (values, pos)
}
