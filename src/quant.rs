//! Quantization and unquantization tables.
//!
//! ASTC stores weights and color endpoints at 21 possible alphabet sizes.
//! The unquantization procedures are fixed by the format, so all tables here
//! are generated once on first use and shared process-wide afterwards.

use std::sync::OnceLock;

use num_enum::TryFromPrimitive;

use crate::bise;

/// The ASTC quantization methods.
///
/// The discriminants are stored directly in the encoded format, so the order
/// is fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, TryFromPrimitive)]
#[repr(u8)]
pub enum QuantMethod {
    Q2 = 0,
    Q3 = 1,
    Q4 = 2,
    Q5 = 3,
    Q6 = 4,
    Q8 = 5,
    Q10 = 6,
    Q12 = 7,
    Q16 = 8,
    Q20 = 9,
    Q24 = 10,
    Q32 = 11,
    Q40 = 12,
    Q48 = 13,
    Q64 = 14,
    Q80 = 15,
    Q96 = 16,
    Q128 = 17,
    Q160 = 18,
    Q192 = 19,
    Q256 = 20,
}

impl QuantMethod {
    pub(crate) const COUNT: usize = 21;

    /// The number of levels this method distinguishes.
    pub fn levels(self) -> u32 {
        const LEVELS: [u32; QuantMethod::COUNT] = [
            2, 3, 4, 5, 6, 8, 10, 12, 16, 20, 24, 32, 40, 48, 64, 80, 96, 128, 160, 192, 256,
        ];
        LEVELS[self as usize]
    }

    pub(crate) fn from_index(index: u8) -> QuantMethod {
        QuantMethod::try_from(index).expect("quant index out of range")
    }
}

/// Weight grids use only the first 12 levels (up to 32 steps).
pub(crate) const WEIGHT_QUANT_COUNT: usize = 12;

/// Color endpoints may not be quantized below 6 levels.
pub(crate) const COLOR_QUANT_MIN: QuantMethod = QuantMethod::Q6;

/// Replicates the low `n` bits of `v` across a `to`-bit field.
fn replicate_bits(v: u32, n: u32, to: u32) -> u32 {
    debug_assert!(n >= 1 && v < (1 << n));
    if n >= to {
        return v >> (n - to);
    }
    let mut r = 0;
    let mut shift = to as i32 - n as i32;
    while shift > -(n as i32) {
        r |= if shift >= 0 { v << shift } else { v >> -shift };
        shift -= n as i32;
    }
    r
}

/// Unquantizes a packed color value to `0..=255` per the format's
/// unquantization procedure.
///
/// Only levels from [`COLOR_QUANT_MIN`] upwards are meaningful for colors.
fn unquant_color(quant: QuantMethod, v: u32) -> u8 {
    let (bits, trits, quints) = bise::ise_form(quant);
    if trits == 0 && quints == 0 {
        return replicate_bits(v, bits, 8) as u8;
    }

    let n = bits;
    let m = v & ((1 << n) - 1);
    let d = v >> n;
    let a = if m & 1 != 0 { 0x1FF } else { 0 };
    let mb = (m >> 1) & 1;
    let mc = (m >> 2) & 1;
    let md = (m >> 3) & 1;
    let me = (m >> 4) & 1;
    let mf = (m >> 5) & 1;

    // C multipliers and B bit patterns from the format's unquantization
    // parameter table; B spreads the m bits that are not folded into A.
    let (c, b) = if trits != 0 {
        match n {
            1 => (204, 0),
            2 => (93, mb * 0b1_0001_0110),
            3 => (44, mc * 0b1_0000_1010 + mb * 0b0_1000_0101),
            4 => (22, md * 0b1_0000_0100 + mc * 0b0_1000_0010 + mb * 0b0_0100_0001),
            5 => (11, me * 0b1_0000_0010 + md * 0b0_1000_0001 + mc * 0b0_0100_0000 + mb * 0b0_0010_0000),
            6 => {
                (5, mf * 0b1_0000_0001 + me * 0b0_1000_0000 + md * 0b0_0100_0000
                    + mc * 0b0_0010_0000 + mb * 0b0_0001_0000)
            }
            _ => unreachable!("trit color form with {n} bits"),
        }
    } else {
        match n {
            1 => (113, 0),
            2 => (54, mb * 0b1_0000_1100),
            3 => (26, mc * 0b1_0000_0101 + mb * 0b0_1000_0010),
            4 => (13, md * 0b1_0000_0010 + mc * 0b0_1000_0001 + mb * 0b0_0100_0000),
            5 => (6, me * 0b1_0000_0001 + md * 0b0_1000_0000 + mc * 0b0_0100_0000 + mb * 0b0_0010_0000),
            _ => unreachable!("quint color form with {n} bits"),
        }
    };

    let t = (d * c + b) ^ a;
    (((a & 0x80) | (t >> 2)) & 0xFF) as u8
}

/// Unquantizes a packed weight value to `0..=64`.
fn unquant_weight(quant: QuantMethod, v: u32) -> u8 {
    let (bits, trits, quints) = bise::ise_form(quant);

    let w = if trits == 0 && quints == 0 {
        replicate_bits(v, bits, 6)
    } else if trits != 0 && bits == 0 {
        [0u32, 32, 63][v as usize]
    } else if quints != 0 && bits == 0 {
        [0u32, 16, 32, 47, 63][v as usize]
    } else {
        let n = bits;
        let m = v & ((1 << n) - 1);
        let d = v >> n;
        let a = if m & 1 != 0 { 0x7F } else { 0 };
        let mb = (m >> 1) & 1;
        let mc = (m >> 2) & 1;

        let (c, b) = if trits != 0 {
            match n {
                1 => (50, 0),
                2 => (23, mb * 0b100_0101),
                3 => (11, mc * 0b100_0010 + mb * 0b010_0001),
                _ => unreachable!("trit weight form with {n} bits"),
            }
        } else {
            match n {
                1 => (28, 0),
                2 => (13, mb * 0b100_0010),
                _ => unreachable!("quint weight form with {n} bits"),
            }
        };

        let t = (d * c + b) ^ a;
        (a & 0x20) | (t >> 2)
    };

    // The weight domain is 0..=64; the top half shifts up by one so that 32
    // sits exactly at the midpoint.
    (if w > 32 { w + 1 } else { w }) as u8
}

/// Color (un)quantization tables for all levels, packed-value indexed.
pub(crate) struct ColorTables {
    /// `unquant[level][packed]` is the 8-bit unquantized value.
    pub unquant: [[u8; 256]; QuantMethod::COUNT],
    /// `quant[level][value]` is the packed value whose unquantization is
    /// nearest to `value`.
    pub quant: [[u8; 256]; QuantMethod::COUNT],
}

pub(crate) fn color_tables() -> &'static ColorTables {
    static TABLES: OnceLock<ColorTables> = OnceLock::new();
    TABLES.get_or_init(|| {
        let mut t = ColorTables {
            unquant: [[0; 256]; QuantMethod::COUNT],
            quant: [[0; 256]; QuantMethod::COUNT],
        };
        for level in COLOR_QUANT_MIN as usize..QuantMethod::COUNT {
            let quant = QuantMethod::from_index(level as u8);
            let count = quant.levels();
            for v in 0..count {
                t.unquant[level][v as usize] = unquant_color(quant, v);
            }
            for value in 0..256u32 {
                let mut best = 0u8;
                let mut best_dist = u32::MAX;
                for v in 0..count {
                    let dist = value.abs_diff(u32::from(t.unquant[level][v as usize]));
                    if dist < best_dist {
                        best_dist = dist;
                        best = v as u8;
                    }
                }
                t.quant[level][value as usize] = best;
            }
        }
        t
    })
}

/// Weight quantization transfer table for a single level.
pub(crate) struct WeightTable {
    pub method: QuantMethod,
    pub levels: u8,
    /// Unquantized value (`0..=64`) per packed value.
    pub unquant: [u8; 32],
    /// Nearest packed value for each integer weight `0..=64`.
    pub nearest: [u8; 65],
}

impl WeightTable {
    /// Quantizes an unscaled weight in `[0, 64]`, testing the two
    /// surrounding representable levels and keeping the closer.
    ///
    /// Returns `(packed_value, unquantized_value)`.
    pub fn quantize(&self, w: f32) -> (u8, u8) {
        let clamped = w.clamp(0.0, 64.0);
        let below = self.nearest[clamped.floor() as usize];
        let above = self.nearest[clamped.ceil() as usize];
        let below_u = self.unquant[below as usize];
        let above_u = self.unquant[above as usize];
        if (clamped - f32::from(below_u)).abs() <= (f32::from(above_u) - clamped).abs() {
            (below, below_u)
        } else {
            (above, above_u)
        }
    }
}

pub(crate) fn weight_tables() -> &'static [WeightTable; WEIGHT_QUANT_COUNT] {
    static TABLES: OnceLock<[WeightTable; WEIGHT_QUANT_COUNT]> = OnceLock::new();
    TABLES.get_or_init(|| {
        std::array::from_fn(|level| {
            let method = QuantMethod::from_index(level as u8);
            let levels = method.levels() as u8;

            let mut unquant = [0u8; 32];
            for v in 0..levels {
                unquant[v as usize] = unquant_weight(method, u32::from(v));
            }

            let nearest = std::array::from_fn(|w| {
                let mut best = 0u8;
                let mut best_dist = u32::MAX;
                for v in 0..levels {
                    let dist = (w as u32).abs_diff(u32::from(unquant[v as usize]));
                    if dist < best_dist {
                        best_dist = dist;
                        best = v;
                    }
                }
                best
            });

            WeightTable {
                method,
                levels,
                unquant,
                nearest,
            }
        })
    })
}

/// Maximum number of endpoint value pairs a block can carry.
pub(crate) const MAX_ENDPOINT_PAIRS: usize = 9;

/// Returns the highest color quantization level whose BISE encoding of
/// `pairs * 2` values fits in `bits`, or `None` if even the coarsest legal
/// level does not fit.
pub(crate) fn quant_mode_for_bits(pairs: u32, bits: u32) -> Option<QuantMethod> {
    static TABLE: OnceLock<[[i8; 128]; MAX_ENDPOINT_PAIRS + 1]> = OnceLock::new();
    let table = TABLE.get_or_init(|| {
        let mut t = [[-1i8; 128]; MAX_ENDPOINT_PAIRS + 1];
        for pairs in 1..=MAX_ENDPOINT_PAIRS {
            for level in COLOR_QUANT_MIN as usize..QuantMethod::COUNT {
                let quant = QuantMethod::from_index(level as u8);
                let needed = bise::sequence_bitcount(pairs as u32 * 2, quant);
                for bits in needed..128 {
                    t[pairs][bits as usize] = level as i8;
                }
            }
        }
        t
    });

    if pairs as usize > MAX_ENDPOINT_PAIRS {
        return None;
    }
    let level = table[pairs as usize][bits.min(127) as usize];
    if level < 0 {
        None
    } else {
        Some(QuantMethod::from_index(level as u8))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_unquant_known_values() {
        let tables = weight_tables();
        assert_eq!(&tables[QuantMethod::Q2 as usize].unquant[..2], &[0, 64]);
        assert_eq!(&tables[QuantMethod::Q3 as usize].unquant[..3], &[0, 32, 64]);
        assert_eq!(&tables[QuantMethod::Q4 as usize].unquant[..4], &[0, 21, 43, 64]);
        assert_eq!(&tables[QuantMethod::Q5 as usize].unquant[..5], &[0, 16, 32, 48, 64]);
        // Trit- and quint-based levels store values in packed order.
        assert_eq!(&tables[QuantMethod::Q6 as usize].unquant[..6], &[0, 64, 12, 52, 25, 39]);
        assert_eq!(
            &tables[QuantMethod::Q10 as usize].unquant[..10],
            &[0, 64, 7, 57, 14, 50, 21, 43, 28, 36]
        );
    }

    #[test]
    fn color_unquant_known_values() {
        let t = color_tables();
        assert_eq!(
            &t.unquant[QuantMethod::Q12 as usize][..12],
            &[0, 255, 69, 186, 23, 232, 92, 163, 46, 209, 116, 139]
        );
        assert_eq!(&t.unquant[QuantMethod::Q6 as usize][..6], &[0, 255, 51, 204, 102, 153]);
        // Powers of two replicate bits.
        assert_eq!(t.unquant[QuantMethod::Q16 as usize][5], 0x55);
        assert_eq!(t.unquant[QuantMethod::Q256 as usize][129], 129);
    }

    #[test]
    fn color_quant_round_trips() {
        let t = color_tables();
        for level in COLOR_QUANT_MIN as usize..QuantMethod::COUNT {
            let count = QuantMethod::from_index(level as u8).levels();
            for v in 0..count {
                let unq = t.unquant[level][v as usize];
                assert_eq!(
                    t.quant[level][unq as usize], v as u8,
                    "level {level} value {v}"
                );
            }
        }
    }

    #[test]
    fn weight_unquant_is_symmetric() {
        for table in weight_tables() {
            let n = table.levels as usize;
            let mut sorted: Vec<u8> = table.unquant[..n].to_vec();
            sorted.sort_unstable();
            for i in 0..n {
                assert_eq!(sorted[i] + sorted[n - 1 - i], 64, "{:?}", table.method);
            }
        }
    }

    #[test]
    fn weight_quantize_picks_nearest() {
        let table = &weight_tables()[QuantMethod::Q6 as usize];
        assert_eq!(table.quantize(0.0).1, 0);
        assert_eq!(table.quantize(64.0).1, 64);
        assert_eq!(table.quantize(13.0).1, 12);
        assert_eq!(table.quantize(19.5).1, 25);
        assert_eq!(table.quantize(45.0).1, 39);
    }

    #[test]
    fn quant_mode_table_is_monotonic() {
        for pairs in 1..=MAX_ENDPOINT_PAIRS as u32 {
            let mut last = None;
            for bits in 0..128 {
                let q = quant_mode_for_bits(pairs, bits);
                if let (Some(prev), Some(cur)) = (last, q) {
                    assert!(cur >= prev);
                }
                if q.is_some() {
                    last = q;
                }
            }
            // 8 bits per value is always enough at the top end.
            assert_eq!(quant_mode_for_bits(pairs, pairs * 16), Some(QuantMethod::Q256));
        }
    }
}
