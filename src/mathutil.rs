//! Small numeric helpers shared across the codec.

use half::f16;

/// Converts a float to the 16-bit log-encoded (LNS) representation used for
/// HDR channels, as a float in `[0, 65535]`.
///
/// The LNS domain is piecewise linear in the FP16 exponent/mantissa, which
/// makes linear interpolation between LNS endpoints approximate geometric
/// interpolation of the underlying radiance values.
pub(crate) fn float_to_lns(p: f32) -> f32 {
    if p.is_nan() || p <= 1.0 / 67108864.0 {
        // Underflow or NaN, return 0
        return 0.0;
    }
    if p >= 65536.0 {
        return 65535.0;
    }

    let (frac, mut expo) = frexp(p);
    let mut p1;
    if expo < -13 {
        // Denormal FP16 range
        p1 = p * 33554432.0;
        expo = 0;
    } else {
        expo += 14;
        p1 = (frac - 0.5) * 4096.0;
    }

    if p1 < 384.0 {
        p1 *= 4.0 / 3.0;
    } else if p1 <= 1408.0 {
        p1 += 128.0;
    } else {
        p1 = (p1 + 512.0) * (4.0 / 5.0);
    }

    p1 + (expo as f32) * 2048.0
}

/// Converts a 16-bit LNS value to the FP16 bit pattern it decodes to.
pub(crate) fn lns_to_sf16(p: u16) -> u16 {
    let mc = p & 0x7FF;
    let ec = p >> 11;
    let mt = if mc < 512 {
        3 * mc
    } else if mc < 1536 {
        4 * mc - 512
    } else {
        5 * mc - 2048
    };

    let res = (ec << 10) | (mt >> 3);
    res.min(0x7BFF)
}

/// Converts an FP16 bit pattern to f32.
pub(crate) fn sf16_to_float(bits: u16) -> f32 {
    f16::from_bits(bits).to_f32()
}

/// Converts an f32 to the nearest FP16 bit pattern.
pub(crate) fn float_to_sf16(v: f32) -> u16 {
    f16::from_f32(v).to_bits()
}

/// Splits `v` into `(fraction, exponent)` with the fraction in `[0.5, 1)`,
/// matching C's `frexp`.
fn frexp(v: f32) -> (f32, i32) {
    debug_assert!(v.is_finite() && v > 0.0);
    let bits = v.to_bits();
    let biased = ((bits >> 23) & 0xFF) as i32;
    if biased == 0 {
        // Subnormal input: renormalize through a scale by 2^32.
        let (frac, expo) = frexp(v * 4294967296.0);
        return (frac, expo - 32);
    }
    let expo = biased - 126;
    let frac = f32::from_bits((bits & 0x807F_FFFF) | 0x3F00_0000);
    (frac, expo)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frexp_matches_libm() {
        for &(v, frac, expo) in &[
            (1.0_f32, 0.5, 1),
            (0.5, 0.5, 0),
            (3.0, 0.75, 2),
            (65536.0, 0.5, 17),
            (0.1, 0.8, -3),
        ] {
            let (f, e) = frexp(v);
            assert!((f - frac).abs() < 1e-6, "frac of {v}: {f} != {frac}");
            assert_eq!(e, expo, "expo of {v}");
        }
    }

    #[test]
    fn lns_round_trips_through_fp16() {
        // Every FP16-representable positive value should survive
        // float -> LNS -> FP16 with at most one mantissa step of error.
        for i in 1..1000u16 {
            let v = sf16_to_float(i * 31);
            if !v.is_finite() || v <= 0.0 || v >= 65536.0 {
                continue;
            }
            let lns = float_to_lns(v).round() as u16;
            let back = sf16_to_float(lns_to_sf16(lns));
            let rel = (back - v).abs() / v.max(1e-10);
            assert!(rel < 0.01, "value {v} decoded to {back}");
        }
    }

    #[test]
    fn lns_is_monotonic() {
        let mut last = -1.0f32;
        for i in 0..512 {
            let v = (i as f32) * 0.37 + 0.001;
            let l = float_to_lns(v);
            assert!(l >= last);
            last = l;
        }
    }
}
