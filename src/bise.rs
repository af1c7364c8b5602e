//! Bounded integer sequence encoding.
//!
//! BISE packs a sequence of integers in `[0, A)` into a bit stream. When the
//! alphabet size is `3 * 2^k` or `5 * 2^k`, each value splits into `k` plain
//! bits plus one ternary ("trit") or quinary ("quint") digit. Digits are
//! grouped, five trits into one 8-bit block or three quints into one 7-bit
//! block, and the block bits are interleaved with the plain bits at fixed
//! positions so partial sequences stay decodable.

use crate::quant::QuantMethod;

/// Bit budget of a physical block; sequences never exceed it.
const BLOCK_BITS: u32 = 128;

/// A bit count no candidate encoding can satisfy, returned for alphabets
/// that BISE cannot represent.
pub(crate) const BITCOUNT_INVALID: u32 = BLOCK_BITS + 1;

/// `(bits, trits, quints)` per quantization level, in level order.
const ISE_FORM: [(u32, u32, u32); 21] = [
    (1, 0, 0), // 2
    (0, 1, 0), // 3
    (2, 0, 0), // 4
    (0, 0, 1), // 5
    (1, 1, 0), // 6
    (3, 0, 0), // 8
    (1, 0, 1), // 10
    (2, 1, 0), // 12
    (4, 0, 0), // 16
    (2, 0, 1), // 20
    (3, 1, 0), // 24
    (5, 0, 0), // 32
    (3, 0, 1), // 40
    (4, 1, 0), // 48
    (6, 0, 0), // 64
    (4, 0, 1), // 80
    (5, 1, 0), // 96
    (7, 0, 0), // 128
    (5, 0, 1), // 160
    (6, 1, 0), // 192
    (8, 0, 0), // 256
];

/// Returns the `(bits, trits, quints)` structure of a quantization level.
pub(crate) fn ise_form(quant: QuantMethod) -> (u32, u32, u32) {
    ISE_FORM[quant as usize]
}

/// Returns the number of bits needed to encode `count` values at the given
/// quantization level.
pub(crate) fn sequence_bitcount(count: u32, quant: QuantMethod) -> u32 {
    let (bits, trits, quints) = ISE_FORM[quant as usize];
    let mut total = count * bits;
    if trits != 0 {
        total += (count * 8 + 4) / 5;
    }
    if quints != 0 {
        total += (count * 7 + 2) / 3;
    }
    total
}

/// [`sequence_bitcount`] over an untrusted raw level index, as found in
/// random data being decoded. Unknown levels get a bit count larger than any
/// block so candidate checks reject them.
pub(crate) fn sequence_bitcount_raw(count: u32, quant_raw: u32) -> u32 {
    match QuantMethod::try_from(quant_raw as u8) {
        Ok(q) if quant_raw <= 20 => sequence_bitcount(count, q),
        _ => BITCOUNT_INVALID,
    }
}

#[inline]
fn write_bits(block: &mut u128, value: u32, count: u32, offset: u32) {
    debug_assert!(count <= 32);
    debug_assert!(count == 32 || value < (1 << count));
    debug_assert!(offset + count <= BLOCK_BITS);
    *block |= (value as u128) << offset;
}

#[inline]
fn read_bits(block: u128, count: u32, offset: u32) -> u32 {
    debug_assert!(count < 32);
    debug_assert!(offset + count <= BLOCK_BITS);
    ((block >> offset) as u32) & ((1u32 << count) - 1)
}

/// Packs five trits into their 8-bit group value.
fn trit_group_pack(t: [u8; 5]) -> u32 {
    debug_assert!(t.iter().all(|&v| v < 3));
    let t = t.map(u32::from);

    let c = if t[1] == 2 && t[2] == 2 {
        // Both middle digits maxed, escape into the low bits
        3 * 4 + t[0]
    } else if t[2] == 2 {
        t[1] * 16 + t[0] * 4 + 3
    } else {
        t[2] * 16 + t[1] * 4 + t[0]
    };

    if t[3] == 2 && t[4] == 2 {
        ((c >> 2) << 5) | (0b111 << 2) | (c & 3)
    } else if t[4] == 2 {
        (t[3] << 7) | (0b11 << 5) | c
    } else {
        (t[4] << 7) | (t[3] << 5) | c
    }
}

/// Unpacks an 8-bit trit group into five trits. Total over all inputs:
/// malformed groups still produce digits below 3.
fn trit_group_unpack(tt: u32) -> [u8; 5] {
    let (c, t4, t3);
    if (tt >> 2) & 0b111 == 0b111 {
        c = ((tt >> 5) << 2) | (tt & 3);
        t4 = 2;
        t3 = 2;
    } else {
        c = tt & 0x1F;
        if (tt >> 5) & 0b11 == 0b11 {
            t4 = 2;
            t3 = (tt >> 7) & 1;
        } else {
            t4 = (tt >> 7) & 1;
            t3 = (tt >> 5) & 0b11;
        }
    }

    let (t2, t1, t0);
    if c & 0b11 == 0b11 {
        t2 = 2;
        t1 = (c >> 4) & 1;
        let b3 = (c >> 3) & 1;
        let b2 = (c >> 2) & 1;
        t0 = (b3 << 1) | (b2 & !b3 & 1);
    } else if (c >> 2) & 0b11 == 0b11 {
        t2 = 2;
        t1 = 2;
        t0 = c & 0b11;
    } else {
        t2 = (c >> 4) & 1;
        t1 = (c >> 2) & 0b11;
        let b1 = (c >> 1) & 1;
        let b0 = c & 1;
        t0 = (b1 << 1) | (b0 & !b1 & 1);
    }

    [t0 as u8, t1 as u8, t2 as u8, t3 as u8, t4 as u8]
}

/// Packs three quints into their 7-bit group value.
fn quint_group_pack(q: [u8; 3]) -> u32 {
    debug_assert!(q.iter().all(|&v| v < 5));
    let q = q.map(u32::from);

    if q[0] == 4 && q[1] == 4 {
        ((q[2] & 3) << 3) | (0b11 << 1) | (q[2] >> 2)
    } else {
        let c = if q[1] == 4 {
            (q[0] << 3) | 5
        } else {
            (q[1] << 3) | q[0]
        };
        if q[2] == 4 {
            ((!c >> 1) & 0b11) << 5 | ((c >> 3) & 0b11) << 3 | (0b11 << 1) | (c & 1)
        } else {
            (q[2] << 5) | c
        }
    }
}

/// Unpacks a 7-bit quint group into three quints. Total over all inputs.
fn quint_group_unpack(qq: u32) -> [u8; 3] {
    if (qq >> 1) & 0b11 == 0b11 && (qq >> 5) & 0b11 == 0 {
        let q0bit = qq & 1;
        let q2 = (q0bit << 2) | ((((qq >> 4) & 1) & !q0bit) << 1) | (((qq >> 3) & 1) & !q0bit);
        return [4, 4, q2 as u8];
    }

    let (c, q2);
    if (qq >> 1) & 0b11 == 0b11 {
        q2 = 4;
        c = (((qq >> 3) & 0b11) << 3) | (((!qq >> 5) & 0b11) << 1) | (qq & 1);
    } else {
        q2 = (qq >> 5) & 0b11;
        c = qq & 0x1F;
    }

    let (q1, q0);
    if c & 0b111 == 5 {
        q1 = 4;
        q0 = (c >> 3) & 0b11;
    } else {
        q1 = (c >> 3) & 0b11;
        q0 = c & 0b111;
    }

    [q0 as u8, q1 as u8, q2 as u8]
}

/// Encodes `values` with BISE into `block`, starting at `bit_offset`.
///
/// `block` bits outside the sequence span are left untouched, so multiple
/// sequences can share one 128-bit block.
pub(crate) fn encode_ise(quant: QuantMethod, values: &[u8], block: &mut u128, bit_offset: u32) {
    let (bits, trits, quints) = ISE_FORM[quant as usize];
    let total_bits = sequence_bitcount(values.len() as u32, quant);
    debug_assert!(bit_offset + total_bits <= BLOCK_BITS);

    let mask = (1u32 << bits) - 1;

    let mut scratch: u128 = 0;
    let mut pos = 0u32;

    if trits != 0 {
        for group in values.chunks(5) {
            let mut t = [0u8; 5];
            let mut m = [0u32; 5];
            for (i, &v) in group.iter().enumerate() {
                t[i] = v >> bits;
                m[i] = u32::from(v) & mask;
            }
            let tt = trit_group_pack(t);

            // Interleave plain bits and group bits at their fixed positions.
            write_bits(&mut scratch, m[0], bits, pos);
            write_bits(&mut scratch, tt & 0b11, 2, pos + bits);
            write_bits(&mut scratch, m[1], bits, pos + bits + 2);
            write_bits(&mut scratch, (tt >> 2) & 0b11, 2, pos + 2 * bits + 2);
            write_bits(&mut scratch, m[2], bits, pos + 2 * bits + 4);
            write_bits(&mut scratch, (tt >> 4) & 1, 1, pos + 3 * bits + 4);
            write_bits(&mut scratch, m[3], bits, pos + 3 * bits + 5);
            write_bits(&mut scratch, (tt >> 5) & 0b11, 2, pos + 4 * bits + 5);
            write_bits(&mut scratch, m[4], bits, pos + 4 * bits + 7);
            write_bits(&mut scratch, (tt >> 7) & 1, 1, pos + 5 * bits + 7);
            pos += 5 * bits + 8;
        }
    } else if quints != 0 {
        for group in values.chunks(3) {
            let mut q = [0u8; 3];
            let mut m = [0u32; 3];
            for (i, &v) in group.iter().enumerate() {
                q[i] = v >> bits;
                m[i] = u32::from(v) & mask;
            }
            let qq = quint_group_pack(q);

            write_bits(&mut scratch, m[0], bits, pos);
            write_bits(&mut scratch, qq & 0b111, 3, pos + bits);
            write_bits(&mut scratch, m[1], bits, pos + bits + 3);
            write_bits(&mut scratch, (qq >> 3) & 0b11, 2, pos + 2 * bits + 3);
            write_bits(&mut scratch, m[2], bits, pos + 2 * bits + 5);
            write_bits(&mut scratch, (qq >> 5) & 0b11, 2, pos + 3 * bits + 5);
            pos += 3 * bits + 7;
        }
    } else {
        for &v in values {
            write_bits(&mut scratch, u32::from(v), bits, pos);
            pos += bits;
        }
    }

    // Truncate the final partial group to the sequence bit count. Zero-value
    // padding digits guarantee the dropped bits are zero.
    if total_bits < BLOCK_BITS {
        scratch &= (1u128 << total_bits) - 1;
    }
    *block |= scratch << bit_offset;
}

/// Decodes `out.len()` values with BISE from `block` starting at
/// `bit_offset`.
///
/// Bits outside the sequence span never affect the result, and every decoded
/// value is below the alphabet size even for malformed input.
pub(crate) fn decode_ise(quant: QuantMethod, block: u128, bit_offset: u32, out: &mut [u8]) {
    let (bits, trits, quints) = ISE_FORM[quant as usize];
    let total_bits = sequence_bitcount(out.len() as u32, quant);
    debug_assert!(bit_offset + total_bits <= BLOCK_BITS);

    // Mask to the sequence span so truncated trailing group bits read as 0.
    let mut stream = block >> bit_offset;
    if total_bits < BLOCK_BITS {
        stream &= (1u128 << total_bits) - 1;
    }

    let mut pos = 0u32;
    if trits != 0 {
        for group in out.chunks_mut(5) {
            let mut tt = read_bits(stream, 2, pos + bits);
            tt |= read_bits(stream, 2, pos + 2 * bits + 2) << 2;
            tt |= read_bits(stream, 1, pos + 3 * bits + 4) << 4;
            tt |= read_bits(stream, 2, pos + 4 * bits + 5) << 5;
            tt |= read_bits(stream, 1, pos + 5 * bits + 7) << 7;
            let t = trit_group_unpack(tt);

            let m = [
                read_bits(stream, bits, pos),
                read_bits(stream, bits, pos + bits + 2),
                read_bits(stream, bits, pos + 2 * bits + 4),
                read_bits(stream, bits, pos + 3 * bits + 5),
                read_bits(stream, bits, pos + 4 * bits + 7),
            ];
            for (i, v) in group.iter_mut().enumerate() {
                *v = (u32::from(t[i]) << bits | m[i]) as u8;
            }
            pos += 5 * bits + 8;
        }
    } else if quints != 0 {
        for group in out.chunks_mut(3) {
            let mut qq = read_bits(stream, 3, pos + bits);
            qq |= read_bits(stream, 2, pos + 2 * bits + 3) << 3;
            qq |= read_bits(stream, 2, pos + 3 * bits + 5) << 5;
            let q = quint_group_unpack(qq);

            let m = [
                read_bits(stream, bits, pos),
                read_bits(stream, bits, pos + bits + 3),
                read_bits(stream, bits, pos + 2 * bits + 5),
            ];
            for (i, v) in group.iter_mut().enumerate() {
                *v = (u32::from(q[i]) << bits | m[i]) as u8;
            }
            pos += 3 * bits + 7;
        }
    } else {
        for v in out.iter_mut() {
            *v = read_bits(stream, bits, pos) as u8;
            pos += bits;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trit_groups_round_trip() {
        for a in 0..3u8 {
            for b in 0..3u8 {
                for c in 0..3u8 {
                    for d in 0..3u8 {
                        for e in 0..3u8 {
                            let t = [a, b, c, d, e];
                            let packed = trit_group_pack(t);
                            assert!(packed < 256);
                            assert_eq!(trit_group_unpack(packed), t, "group {t:?}");
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn quint_groups_round_trip() {
        for a in 0..5u8 {
            for b in 0..5u8 {
                for c in 0..5u8 {
                    let q = [a, b, c];
                    let packed = quint_group_pack(q);
                    assert!(packed < 128);
                    assert_eq!(quint_group_unpack(packed), q, "group {q:?}");
                }
            }
        }
    }

    #[test]
    fn group_unpack_is_total() {
        for tt in 0..256u32 {
            assert!(trit_group_unpack(tt).iter().all(|&t| t < 3));
        }
        for qq in 0..128u32 {
            assert!(quint_group_unpack(qq).iter().all(|&q| q < 5));
        }
    }

    #[test]
    fn bitcounts() {
        // Plain powers of two
        assert_eq!(sequence_bitcount(10, QuantMethod::Q32), 50);
        // Trits: 8 bits per 5 values on top of the plain bits
        assert_eq!(sequence_bitcount(5, QuantMethod::Q3), 8);
        assert_eq!(sequence_bitcount(6, QuantMethod::Q3), 10);
        // Quints: 7 bits per 3 values
        assert_eq!(sequence_bitcount(3, QuantMethod::Q5), 7);
        assert_eq!(sequence_bitcount(4, QuantMethod::Q5), 10);
        // Untrusted level index
        assert_eq!(sequence_bitcount_raw(10, 99), BITCOUNT_INVALID);
    }

    #[test]
    fn sequences_round_trip_at_every_level() {
        for quant_idx in 0..21u8 {
            let quant = QuantMethod::try_from(quant_idx).unwrap();
            let alphabet = quant.levels() as u8;
            for count in 1..=24usize {
                if 9 + sequence_bitcount(count as u32, quant) > 128 {
                    break;
                }
                let values: Vec<u8> = (0..count)
                    .map(|i| ((i * 7 + 3) % alphabet as usize) as u8)
                    .collect();

                let mut block = 0u128;
                encode_ise(quant, &values, &mut block, 9);

                let mut out = vec![0u8; count];
                decode_ise(quant, block, 9, &mut out);
                assert_eq!(values, out, "level {quant:?} count {count}");

                // Nothing outside the sequence span may be touched.
                let bits = sequence_bitcount(count as u32, quant);
                let mask = if 9 + bits < 128 {
                    !(((1u128 << bits) - 1) << 9)
                } else {
                    !(u128::MAX << 9)
                };
                assert_eq!(block & mask, 0);
            }
        }
    }

    #[test]
    fn random_sequences_round_trip() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(0x415354435f425345);

        for quant_idx in 0..21u8 {
            let quant = QuantMethod::try_from(quant_idx).unwrap();
            let alphabet = quant.levels();
            for _ in 0..1000 {
                let max_count = (0..=64u32)
                    .rev()
                    .find(|&n| sequence_bitcount(n, quant) <= 128)
                    .unwrap();
                let count = rng.gen_range(1..=max_count.max(1)) as usize;
                let offset = rng.gen_range(0..=(128 - sequence_bitcount(count as u32, quant)));

                let values: Vec<u8> = (0..count)
                    .map(|_| rng.gen_range(0..alphabet) as u8)
                    .collect();

                let mut block = 0u128;
                encode_ise(quant, &values, &mut block, offset);
                let mut out = vec![0u8; count];
                decode_ise(quant, block, offset, &mut out);
                assert_eq!(values, out, "level {quant:?} count {count} offset {offset}");
            }
        }
    }

    #[test]
    fn decode_ignores_unrelated_bits() {
        let values = [1u8, 2, 0, 2, 1, 1, 0];
        let mut block = 0u128;
        encode_ise(QuantMethod::Q3, &values, &mut block, 40);
        // Fill everything outside the sequence with ones.
        let bits = sequence_bitcount(7, QuantMethod::Q3);
        let span = ((1u128 << bits) - 1) << 40;
        let noisy = block | !span;

        let mut out = [0u8; 7];
        decode_ise(QuantMethod::Q3, noisy, 40, &mut out);
        assert_eq!(out, values);
    }
}
