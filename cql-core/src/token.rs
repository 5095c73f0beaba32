//! Murmur3 partition tokens.

use std::fmt;

/// A position on the Murmur3 token ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub i64);

impl Token {
    /// Computes the token owning a serialized partition key.
    pub fn from_routing_key(key: &[u8]) -> Self {
        let hash = murmur3_x64_128_h1(key);
        // The partitioner reserves the minimum value.
        if hash == i64::MIN {
            Token(i64::MAX)
        } else {
            Token(hash)
        }
    }

    /// Returns the raw token value.
    pub fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// First half of MurmurHash3 x64 128-bit with seed 0, matching the
/// server partitioner (tail bytes are sign-extended).
fn murmur3_x64_128_h1(data: &[u8]) -> i64 {
    const C1: u64 = 0x87c3_7b91_1142_53d5;
    const C2: u64 = 0x4cf5_ad43_2745_937f;

    let len = data.len();
    let mut h1: u64 = 0;
    let mut h2: u64 = 0;
    let nblocks = len / 16;

    for i in 0..nblocks {
        let offset = i * 16;
        let mut k1 = read_u64_le(&data[offset..offset + 8]);
        let mut k2 = read_u64_le(&data[offset + 8..offset + 16]);

        k1 = k1.wrapping_mul(C1);
        k1 = k1.rotate_left(31);
        k1 = k1.wrapping_mul(C2);
        h1 ^= k1;

        h1 = h1.rotate_left(27);
        h1 = h1.wrapping_add(h2);
        h1 = h1.wrapping_mul(5).wrapping_add(0x52dc_e729);

        k2 = k2.wrapping_mul(C2);
        k2 = k2.rotate_left(33);
        k2 = k2.wrapping_mul(C1);
        h2 ^= k2;

        h2 = h2.rotate_left(31);
        h2 = h2.wrapping_add(h1);
        h2 = h2.wrapping_mul(5).wrapping_add(0x3849_5ab5);
    }

    let tail = &data[nblocks * 16..];
    let rem = tail.len();
    let mut k1: u64 = 0;
    let mut k2: u64 = 0;

    if rem > 8 {
        for i in (8..rem).rev() {
            k2 ^= sign_extend(tail[i]) << ((i - 8) * 8);
        }
        k2 = k2.wrapping_mul(C2);
        k2 = k2.rotate_left(33);
        k2 = k2.wrapping_mul(C1);
        h2 ^= k2;
    }

    if rem > 0 {
        for i in (0..rem.min(8)).rev() {
            k1 ^= sign_extend(tail[i]) << (i * 8);
        }
        k1 = k1.wrapping_mul(C1);
        k1 = k1.rotate_left(31);
        k1 = k1.wrapping_mul(C2);
        h1 ^= k1;
    }

    h1 ^= len as u64;
    h2 ^= len as u64;

    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);

    h1 = fmix64(h1);
    h2 = fmix64(h2);

    h1 = h1.wrapping_add(h2);
    h1 as i64
}

fn read_u64_le(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

fn sign_extend(byte: u8) -> u64 {
    byte as i8 as i64 as u64
}

fn fmix64(mut k: u64) -> u64 {
    k ^= k >> 33;
    k = k.wrapping_mul(0xff51_afd7_ed55_8ccd);
    k ^= k >> 33;
    k = k.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    k ^= k >> 33;
    k
}
