//! Endpoint color packing and unpacking.
//!
//! Sixteen endpoint formats cover LDR and HDR data with direct, delta,
//! scale and luminance variants. Unpacking follows the format specification
//! and is total over arbitrary inputs. Packing works by constructing one or
//! more candidate encodings, running each through the real unpacker, and
//! keeping the candidate that reconstructs the requested endpoints best, so
//! the two directions can never drift apart.

use glam::{IVec4, Vec4};
use num_enum::TryFromPrimitive;

use crate::config::Profile;
use crate::quant::{color_tables, QuantMethod};

/// The ASTC endpoint formats. Discriminants are wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u8)]
pub(crate) enum EndpointFormat {
    Luminance = 0,
    LuminanceDelta = 1,
    HdrLuminanceLargeRange = 2,
    HdrLuminanceSmallRange = 3,
    LuminanceAlpha = 4,
    LuminanceAlphaDelta = 5,
    RgbScale = 6,
    HdrRgbScale = 7,
    Rgb = 8,
    RgbDelta = 9,
    RgbScaleAlpha = 10,
    HdrRgb = 11,
    Rgba = 12,
    RgbaDelta = 13,
    HdrRgbLdrAlpha = 14,
    HdrRgba = 15,
}

impl EndpointFormat {
    /// The endpoint class, `0..=3`; class `c` stores `2 * (c + 1)` integers.
    pub fn class(self) -> u8 {
        self as u8 >> 2
    }

    /// The number of integer values this format stores.
    pub fn value_count(self) -> usize {
        (usize::from(self.class()) + 1) * 2
    }

    /// Whether the RGB data decodes to the HDR representation.
    pub fn is_rgb_hdr(self) -> bool {
        matches!(
            self,
            EndpointFormat::HdrLuminanceLargeRange
                | EndpointFormat::HdrLuminanceSmallRange
                | EndpointFormat::HdrRgbScale
                | EndpointFormat::HdrRgb
                | EndpointFormat::HdrRgbLdrAlpha
                | EndpointFormat::HdrRgba
        )
    }
}

/// Endpoints decoded from a physical block, in the 16-bit working domain.
#[derive(Clone, Copy)]
pub(crate) struct UnpackedEndpoints {
    pub rgb_hdr: bool,
    pub alpha_hdr: bool,
    pub e0: IVec4,
    pub e1: IVec4,
}

fn blue_contract(r: i32, g: i32, b: i32) -> (i32, i32, i32) {
    ((r + b) >> 1, (g + b) >> 1, b)
}

/// Splits a delta-carrying value pair: `a` holds a 6-bit signed delta plus
/// the top bit of the base, `b` the remaining base bits.
fn bit_transfer_signed(a: i32, b: i32) -> (i32, i32) {
    let base = (b >> 1) | (a & 0x80);
    let mut delta = (a >> 1) & 0x3F;
    if delta & 0x20 != 0 {
        delta -= 0x40;
    }
    (delta, base)
}

fn sign_extend(v: i32, bits: u32) -> i32 {
    let shift = 32 - bits;
    (v << shift) >> shift
}

/// Expands an 8-bit LDR endpoint component to 16 bits.
fn expand_ldr(v: i32, srgb: bool) -> i32 {
    if srgb {
        (v << 8) | 0x80
    } else {
        v * 257
    }
}

// The sRGB expansion applies to the color channels only; alpha always
// replicates.
fn expand_ldr_vec(v: IVec4, srgb: bool) -> IVec4 {
    IVec4::new(
        expand_ldr(v.x, srgb),
        expand_ldr(v.y, srgb),
        expand_ldr(v.z, srgb),
        expand_ldr(v.w, false),
    )
}

/// The default alpha for formats that do not store one.
fn default_alpha(profile: Profile) -> (i32, bool) {
    if profile.is_hdr_alpha() {
        (0x7800, true)
    } else {
        (65535, false)
    }
}

fn clamp255(v: i32) -> i32 {
    v.clamp(0, 255)
}

/// Unpacks one endpoint pair.
///
/// `input` holds the quantized values from the bit stream; only the first
/// `format.value_count()` entries are read. Returns `None` when the format
/// is not decodable under the profile (HDR endpoints in an LDR context),
/// which the caller surfaces as an error block.
pub(crate) fn unpack_color_endpoints(
    profile: Profile,
    format: EndpointFormat,
    quant: QuantMethod,
    input: &[u8],
) -> Option<UnpackedEndpoints> {
    if format.is_rgb_hdr() && !profile.is_hdr() {
        return None;
    }

    let tables = color_tables();
    let uq = |i: usize| -> i32 { i32::from(tables.unquant[quant as usize][input[i] as usize]) };
    let srgb = profile == Profile::LdrSrgb;
    let (alpha_default, alpha_default_hdr) = default_alpha(profile);

    let result = match format {
        EndpointFormat::Luminance => {
            let (v0, v1) = (uq(0), uq(1));
            UnpackedEndpoints {
                rgb_hdr: false,
                alpha_hdr: alpha_default_hdr,
                e0: IVec4::new(
                    expand_ldr(v0, srgb),
                    expand_ldr(v0, srgb),
                    expand_ldr(v0, srgb),
                    alpha_default,
                ),
                e1: IVec4::new(
                    expand_ldr(v1, srgb),
                    expand_ldr(v1, srgb),
                    expand_ldr(v1, srgb),
                    alpha_default,
                ),
            }
        }

        EndpointFormat::LuminanceDelta => {
            let (v0, v1) = (uq(0), uq(1));
            let l0 = (v0 >> 2) | (v1 & 0xC0);
            let l1 = (l0 + (v1 & 0x3F)).min(255);
            UnpackedEndpoints {
                rgb_hdr: false,
                alpha_hdr: alpha_default_hdr,
                e0: IVec4::new(
                    expand_ldr(l0, srgb),
                    expand_ldr(l0, srgb),
                    expand_ldr(l0, srgb),
                    alpha_default,
                ),
                e1: IVec4::new(
                    expand_ldr(l1, srgb),
                    expand_ldr(l1, srgb),
                    expand_ldr(l1, srgb),
                    alpha_default,
                ),
            }
        }

        EndpointFormat::HdrLuminanceLargeRange => {
            let (v0, v1) = (uq(0), uq(1));
            let (y0, y1) = if v1 >= v0 {
                (v0 << 4, v1 << 4)
            } else {
                ((v1 << 4) + 8, (v0 << 4) - 8)
            };
            UnpackedEndpoints {
                rgb_hdr: true,
                alpha_hdr: alpha_default_hdr,
                e0: IVec4::new(y0 << 4, y0 << 4, y0 << 4, alpha_default),
                e1: IVec4::new(y1 << 4, y1 << 4, y1 << 4, alpha_default),
            }
        }

        EndpointFormat::HdrLuminanceSmallRange => {
            let (v0, v1) = (uq(0), uq(1));
            let (y0, d) = if v0 & 0x80 != 0 {
                (((v1 & 0xE0) << 4) | ((v0 & 0x7F) << 2), (v1 & 0x1F) << 2)
            } else {
                (((v1 & 0xF0) << 4) | ((v0 & 0x7F) << 1), (v1 & 0x0F) << 1)
            };
            let y1 = (y0 + d).min(0xFFF);
            UnpackedEndpoints {
                rgb_hdr: true,
                alpha_hdr: alpha_default_hdr,
                e0: IVec4::new(y0 << 4, y0 << 4, y0 << 4, alpha_default),
                e1: IVec4::new(y1 << 4, y1 << 4, y1 << 4, alpha_default),
            }
        }

        EndpointFormat::LuminanceAlpha => {
            let (v0, v1, v2, v3) = (uq(0), uq(1), uq(2), uq(3));
            UnpackedEndpoints {
                rgb_hdr: false,
                alpha_hdr: false,
                e0: expand_ldr_vec(IVec4::new(v0, v0, v0, v2), srgb),
                e1: expand_ldr_vec(IVec4::new(v1, v1, v1, v3), srgb),
            }
        }

        EndpointFormat::LuminanceAlphaDelta => {
            let (dl, bl) = bit_transfer_signed(uq(1), uq(0));
            let (da, ba) = bit_transfer_signed(uq(3), uq(2));
            UnpackedEndpoints {
                rgb_hdr: false,
                alpha_hdr: false,
                e0: expand_ldr_vec(IVec4::new(bl, bl, bl, ba), srgb),
                e1: expand_ldr_vec(
                    IVec4::new(
                        clamp255(bl + dl),
                        clamp255(bl + dl),
                        clamp255(bl + dl),
                        clamp255(ba + da),
                    ),
                    srgb,
                ),
            }
        }

        EndpointFormat::RgbScale => {
            let (v0, v1, v2, v3) = (uq(0), uq(1), uq(2), uq(3));
            UnpackedEndpoints {
                rgb_hdr: false,
                alpha_hdr: alpha_default_hdr,
                e0: IVec4::new(
                    expand_ldr((v0 * v3) >> 8, srgb),
                    expand_ldr((v1 * v3) >> 8, srgb),
                    expand_ldr((v2 * v3) >> 8, srgb),
                    alpha_default,
                ),
                e1: IVec4::new(
                    expand_ldr(v0, srgb),
                    expand_ldr(v1, srgb),
                    expand_ldr(v2, srgb),
                    alpha_default,
                ),
            }
        }

        EndpointFormat::RgbScaleAlpha => {
            let (v0, v1, v2, v3) = (uq(0), uq(1), uq(2), uq(3));
            let (a0, a1) = (uq(4), uq(5));
            UnpackedEndpoints {
                rgb_hdr: false,
                alpha_hdr: false,
                e0: expand_ldr_vec(
                    IVec4::new((v0 * v3) >> 8, (v1 * v3) >> 8, (v2 * v3) >> 8, a0),
                    srgb,
                ),
                e1: expand_ldr_vec(IVec4::new(v0, v1, v2, a1), srgb),
            }
        }

        EndpointFormat::Rgb => {
            let (v0, v1, v2, v3, v4, v5) = (uq(0), uq(1), uq(2), uq(3), uq(4), uq(5));
            let s0 = v0 + v2 + v4;
            let s1 = v1 + v3 + v5;
            let (e0, e1) = if s1 >= s0 {
                (IVec4::new(v0, v2, v4, 255), IVec4::new(v1, v3, v5, 255))
            } else {
                let (r0, g0, b0) = blue_contract(v1, v3, v5);
                let (r1, g1, b1) = blue_contract(v0, v2, v4);
                (IVec4::new(r0, g0, b0, 255), IVec4::new(r1, g1, b1, 255))
            };
            let mut out = UnpackedEndpoints {
                rgb_hdr: false,
                alpha_hdr: alpha_default_hdr,
                e0: expand_ldr_vec(e0, srgb),
                e1: expand_ldr_vec(e1, srgb),
            };
            out.e0.w = alpha_default;
            out.e1.w = alpha_default;
            out
        }

        EndpointFormat::RgbDelta => {
            let (dr, br) = bit_transfer_signed(uq(1), uq(0));
            let (dg, bg) = bit_transfer_signed(uq(3), uq(2));
            let (db, bb) = bit_transfer_signed(uq(5), uq(4));
            let rgbsum = dr + dg + db;

            let (e0, e1) = if rgbsum >= 0 {
                (
                    IVec4::new(br, bg, bb, 255),
                    IVec4::new(
                        clamp255(br + dr),
                        clamp255(bg + dg),
                        clamp255(bb + db),
                        255,
                    ),
                )
            } else {
                let (r0, g0, b0) = blue_contract(
                    clamp255(br + dr),
                    clamp255(bg + dg),
                    clamp255(bb + db),
                );
                let (r1, g1, b1) = blue_contract(br, bg, bb);
                (IVec4::new(r0, g0, b0, 255), IVec4::new(r1, g1, b1, 255))
            };
            let mut out = UnpackedEndpoints {
                rgb_hdr: false,
                alpha_hdr: alpha_default_hdr,
                e0: expand_ldr_vec(e0, srgb),
                e1: expand_ldr_vec(e1, srgb),
            };
            out.e0.w = alpha_default;
            out.e1.w = alpha_default;
            out
        }

        EndpointFormat::Rgba | EndpointFormat::RgbaDelta => {
            let with_alpha = |mut base: UnpackedEndpoints, a0: i32, a1: i32| {
                base.e0.w = expand_ldr(a0, false);
                base.e1.w = expand_ldr(a1, false);
                base.alpha_hdr = false;
                base
            };

            if format == EndpointFormat::Rgba {
                let rgb =
                    unpack_color_endpoints(profile, EndpointFormat::Rgb, quant, &input[..6])?;
                let s0 = uq(0) + uq(2) + uq(4);
                let s1 = uq(1) + uq(3) + uq(5);
                if s1 >= s0 {
                    with_alpha(rgb, uq(6), uq(7))
                } else {
                    with_alpha(rgb, uq(7), uq(6))
                }
            } else {
                let rgb = unpack_color_endpoints(
                    profile,
                    EndpointFormat::RgbDelta,
                    quant,
                    &input[..6],
                )?;
                let (da, ba) = bit_transfer_signed(uq(7), uq(6));
                let (dr, _) = bit_transfer_signed(uq(1), uq(0));
                let (dg, _) = bit_transfer_signed(uq(3), uq(2));
                let (db, _) = bit_transfer_signed(uq(5), uq(4));
                if dr + dg + db >= 0 {
                    with_alpha(rgb, ba, clamp255(ba + da))
                } else {
                    with_alpha(rgb, clamp255(ba + da), ba)
                }
            }
        }

        EndpointFormat::HdrRgbScale => {
            let (v0, v1, v2, v3) = (uq(0), uq(1), uq(2), uq(3));
            let (e0, e1) = unpack_hdr_rgbo(v0, v1, v2, v3);
            UnpackedEndpoints {
                rgb_hdr: true,
                alpha_hdr: alpha_default_hdr,
                e0: IVec4::new(e0.x, e0.y, e0.z, alpha_default),
                e1: IVec4::new(e1.x, e1.y, e1.z, alpha_default),
            }
        }

        EndpointFormat::HdrRgb => {
            let v = [uq(0), uq(1), uq(2), uq(3), uq(4), uq(5)];
            let (e0, e1) = unpack_hdr_rgb(&v);
            UnpackedEndpoints {
                rgb_hdr: true,
                alpha_hdr: alpha_default_hdr,
                e0: IVec4::new(e0.x, e0.y, e0.z, alpha_default),
                e1: IVec4::new(e1.x, e1.y, e1.z, alpha_default),
            }
        }

        EndpointFormat::HdrRgbLdrAlpha => {
            let v = [uq(0), uq(1), uq(2), uq(3), uq(4), uq(5)];
            let (e0, e1) = unpack_hdr_rgb(&v);
            UnpackedEndpoints {
                rgb_hdr: true,
                alpha_hdr: false,
                e0: IVec4::new(e0.x, e0.y, e0.z, expand_ldr(uq(6), false)),
                e1: IVec4::new(e1.x, e1.y, e1.z, expand_ldr(uq(7), false)),
            }
        }

        EndpointFormat::HdrRgba => {
            let v = [uq(0), uq(1), uq(2), uq(3), uq(4), uq(5)];
            let (e0, e1) = unpack_hdr_rgb(&v);
            let (a0, a1) = unpack_hdr_alpha(uq(6), uq(7));
            UnpackedEndpoints {
                rgb_hdr: true,
                alpha_hdr: true,
                e0: IVec4::new(e0.x, e0.y, e0.z, a0),
                e1: IVec4::new(e1.x, e1.y, e1.z, a1),
            }
        }
    };

    Some(result)
}

/// HDR RGB + scale (offset form): one high-precision major component with
/// downward offsets for the others and the low endpoint.
fn unpack_hdr_rgbo(v0: i32, v1: i32, v2: i32, v3: i32) -> (IVec4, IVec4) {
    let modeval = ((v0 & 0xC0) >> 6) | ((v1 & 0x80) >> 5) | ((v2 & 0x80) >> 4);

    let (majcomp, mode) = if (modeval & 0xC) != 0xC {
        (modeval >> 2, modeval & 3)
    } else if modeval != 0xF {
        (modeval & 3, 4)
    } else {
        (0, 5)
    };

    let mut red = v0 & 0x3F;
    let mut green = v1 & 0x1F;
    let mut blue = v2 & 0x1F;
    let mut scale = v3 & 0x1F;

    let bit0 = (v1 >> 6) & 1;
    let bit1 = (v1 >> 5) & 1;
    let bit2 = (v2 >> 6) & 1;
    let bit3 = (v2 >> 5) & 1;
    let bit4 = (v3 >> 7) & 1;
    let bit5 = (v3 >> 6) & 1;
    let bit6 = (v3 >> 5) & 1;

    let ohcomp = 1 << mode;
    if ohcomp & 0x30 != 0 {
        green |= bit0 << 6;
    }
    if ohcomp & 0x3A != 0 {
        green |= bit1 << 5;
    }
    if ohcomp & 0x30 != 0 {
        blue |= bit2 << 6;
    }
    if ohcomp & 0x3A != 0 {
        blue |= bit3 << 5;
    }
    if ohcomp & 0x3D != 0 {
        scale |= bit6 << 5;
    }
    if ohcomp & 0x2D != 0 {
        scale |= bit5 << 6;
    }
    if ohcomp & 0x04 != 0 {
        scale |= bit4 << 7;
    }
    if ohcomp & 0x3B != 0 {
        red |= bit4 << 6;
    }
    if ohcomp & 0x04 != 0 {
        red |= bit3 << 6;
    }
    if ohcomp & 0x10 != 0 {
        red |= bit5 << 7;
    }
    if ohcomp & 0x0F != 0 {
        red |= bit2 << 7;
    }
    if ohcomp & 0x05 != 0 {
        red |= bit1 << 8;
    }
    if ohcomp & 0x0A != 0 {
        red |= bit0 << 8;
    }
    if ohcomp & 0x05 != 0 {
        red |= bit0 << 9;
    }
    if ohcomp & 0x02 != 0 {
        red |= bit6 << 9;
    }
    if ohcomp & 0x01 != 0 {
        red |= bit3 << 10;
    }
    if ohcomp & 0x02 != 0 {
        red |= bit5 << 10;
    }

    const SHAMTS: [i32; 6] = [1, 1, 2, 3, 4, 5];
    let shamt = SHAMTS[mode as usize];
    red <<= shamt;
    green <<= shamt;
    blue <<= shamt;
    scale <<= shamt;

    if mode != 5 {
        green = red - green;
        blue = red - blue;
    }

    if majcomp == 1 {
        std::mem::swap(&mut red, &mut green);
    }
    if majcomp == 2 {
        std::mem::swap(&mut red, &mut blue);
    }

    let red = red.clamp(0, 0xFFF);
    let green = green.clamp(0, 0xFFF);
    let blue = blue.clamp(0, 0xFFF);
    let scale = scale.clamp(0, 0xFFF);

    let e1 = IVec4::new(red << 4, green << 4, blue << 4, 0);
    let e0 = IVec4::new(
        (red - scale).max(0) << 4,
        (green - scale).max(0) << 4,
        (blue - scale).max(0) << 4,
        0,
    );
    (e0, e1)
}

/// HDR RGB direct and modal submodes.
fn unpack_hdr_rgb(v: &[i32; 6]) -> (IVec4, IVec4) {
    let majcomp = ((v[4] & 0x80) >> 7) | ((v[5] & 0x80) >> 6);

    // Direct submode: plain 8/7-bit log endpoints.
    if majcomp == 3 {
        let e0 = IVec4::new(v[0] << 8, v[2] << 8, (v[4] & 0x7F) << 9, 0);
        let e1 = IVec4::new(v[1] << 8, v[3] << 8, (v[5] & 0x7F) << 9, 0);
        return (e0, e1);
    }

    let mode = ((v[1] & 0x80) >> 7) | ((v[2] & 0x80) >> 6) | ((v[3] & 0x80) >> 5);

    let mut va = v[0] | ((v[1] & 0x40) << 2);
    let mut vb0 = v[2] & 0x3F;
    let mut vb1 = v[3] & 0x3F;
    let mut vc = v[1] & 0x3F;
    let mut vd0 = v[4] & 0x7F;
    let mut vd1 = v[5] & 0x7F;

    const DBITS: [u32; 8] = [7, 6, 7, 6, 5, 6, 5, 6];
    vd0 = sign_extend(vd0, DBITS[mode as usize]);
    vd1 = sign_extend(vd1, DBITS[mode as usize]);

    let x0 = (v[2] >> 6) & 1;
    let x1 = (v[3] >> 6) & 1;
    let x2 = (v[4] >> 6) & 1;
    let x3 = (v[5] >> 6) & 1;
    let x4 = (v[4] >> 5) & 1;
    let x5 = (v[5] >> 5) & 1;

    let ohm = 1 << mode;
    if ohm & 0x30 != 0 {
        va |= x0 << 9;
    }
    if ohm & 0x0A != 0 {
        va |= x2 << 9;
    }
    if ohm & 0x30 != 0 {
        va |= x4 << 10;
    }
    if ohm & 0x13 != 0 {
        va |= x5 << 10;
    }
    if ohm & 0x08 != 0 {
        va |= x2 << 10;
    }
    if ohm & 0x20 != 0 {
        va |= x2 << 11;
    }
    if ohm & 0x10 != 0 {
        va |= x5 << 11;
    }

    if ohm & 0x3D != 0 {
        vb0 |= x0 << 6;
        vb1 |= x1 << 6;
    }
    if ohm & 0x11 != 0 {
        vb0 |= x2 << 7;
        vb1 |= x3 << 7;
    }

    if ohm & 0x08 != 0 {
        vc |= x0 << 6;
    }
    if ohm & 0x35 != 0 {
        vc |= x3 << 6;
    }
    if ohm & 0x04 != 0 {
        vc |= x1 << 7;
    }

    const MODE_SCALE: [i32; 8] = [0, 0, 1, 1, 2, 2, 3, 2];
    let shift = MODE_SCALE[mode as usize];
    va <<= shift;
    vb0 <<= shift;
    vb1 <<= shift;
    vc <<= shift;
    vd0 <<= shift;
    vd1 <<= shift;

    let mut red1 = va;
    let mut green1 = va - vb0;
    let mut blue1 = va - vb1;
    let mut red0 = va - vc;
    let mut green0 = va - vb0 - vc - vd0;
    let mut blue0 = va - vb1 - vc - vd1;

    if majcomp == 1 {
        std::mem::swap(&mut red0, &mut green0);
        std::mem::swap(&mut red1, &mut green1);
    }
    if majcomp == 2 {
        std::mem::swap(&mut red0, &mut blue0);
        std::mem::swap(&mut red1, &mut blue1);
    }

    let e0 = IVec4::new(
        red0.clamp(0, 0xFFF) << 4,
        green0.clamp(0, 0xFFF) << 4,
        blue0.clamp(0, 0xFFF) << 4,
        0,
    );
    let e1 = IVec4::new(
        red1.clamp(0, 0xFFF) << 4,
        green1.clamp(0, 0xFFF) << 4,
        blue1.clamp(0, 0xFFF) << 4,
        0,
    );
    (e0, e1)
}

/// HDR alpha pair: direct 7-bit mode or base-plus-delta modes.
fn unpack_hdr_alpha(v6: i32, v7: i32) -> (i32, i32) {
    let mode = ((v6 >> 7) & 1) | ((v7 >> 6) & 2);
    let mut v6 = v6 & 0x7F;
    let mut v7 = v7 & 0x7F;

    if mode == 3 {
        return (v6 << 5 << 4, v7 << 5 << 4);
    }

    v6 |= (v7 << (mode + 1)) & 0x780;
    v7 &= 0x3F >> mode;
    v7 ^= 0x20 >> mode;
    v7 -= 0x20 >> mode;
    v6 <<= 4 - mode;
    v7 <<= 4 - mode;
    v7 += v6;
    v7 = v7.clamp(0, 0xFFF);
    (v6 << 4, v7 << 4)
}

// ---------------------------------------------------------------------------
// Packing

/// Quantizes `target` (0..=255) such that the unquantized result keeps the
/// bits selected by `mask` equal to `required`. Falls back to the plain
/// nearest value if no level satisfies the mask.
fn quantize_masked(target: i32, mask: u8, required: u8, quant: QuantMethod) -> u8 {
    let tables = color_tables();
    let unquant = &tables.unquant[quant as usize];
    let levels = quant.levels();

    let mut best: Option<(u32, u8)> = None;
    for packed in 0..levels {
        let u = unquant[packed as usize];
        if u & mask != required {
            continue;
        }
        let dist = (target - i32::from(u)).unsigned_abs();
        if best.map_or(true, |(d, _)| dist < d) {
            best = Some((dist, packed as u8));
        }
    }
    match best {
        Some((_, packed)) => packed,
        None => tables.quant[quant as usize][clamp255(target) as usize],
    }
}

fn quantize(target: i32, quant: QuantMethod) -> u8 {
    color_tables().quant[quant as usize][clamp255(target) as usize]
}

/// One candidate encoding during packing.
struct Candidate {
    format: EndpointFormat,
    values: [u8; 8],
}

fn candidate_error(
    candidate: &Candidate,
    quant: QuantMethod,
    want0: Vec4,
    want1: Vec4,
    profile: Profile,
) -> f32 {
    let Some(unpacked) = unpack_color_endpoints(profile, candidate.format, quant, &candidate.values)
    else {
        return f32::INFINITY;
    };
    let got0 = unpacked.e0.as_vec4();
    let got1 = unpacked.e1.as_vec4();
    (got0 - want0).length_squared() + (got1 - want1).length_squared()
}

/// Scales a 16-bit working-domain color to the 8-bit packing domain.
fn to_u8_domain(c: Vec4) -> IVec4 {
    let scaled = (c * (1.0 / 257.0) + Vec4::splat(0.5)).min(Vec4::splat(255.0));
    IVec4::new(
        scaled.x as i32,
        scaled.y as i32,
        scaled.z as i32,
        scaled.w as i32,
    )
}

fn push_rgb_direct(
    candidates: &mut Vec<Candidate>,
    c0: IVec4,
    c1: IVec4,
    quant: QuantMethod,
    format: EndpointFormat,
) {
    let tables = color_tables();
    let uqt = &tables.unquant[quant as usize];

    // Nudge the quantized endpoints until the decoder's sum ordering keeps
    // them unswapped.
    let mut addon0 = 0i32;
    let mut addon1 = 0i32;
    for attempt in 0..8 {
        let q0 = [
            quantize(c0.x + addon0, quant),
            quantize(c0.y + addon0, quant),
            quantize(c0.z + addon0, quant),
        ];
        let q1 = [
            quantize(c1.x + addon1, quant),
            quantize(c1.y + addon1, quant),
            quantize(c1.z + addon1, quant),
        ];
        let s0: i32 = q0.iter().map(|&v| i32::from(uqt[v as usize])).sum();
        let s1: i32 = q1.iter().map(|&v| i32::from(uqt[v as usize])).sum();
        if s1 >= s0 || attempt == 7 {
            candidates.push(Candidate {
                format,
                values: [q0[0], q1[0], q0[1], q1[1], q0[2], q1[2], 0, 0],
            });
            return;
        }
        addon0 -= 4;
        addon1 += 4;
    }
}

fn push_rgb_blue_contract(
    candidates: &mut Vec<Candidate>,
    c0: IVec4,
    c1: IVec4,
    quant: QuantMethod,
    format: EndpointFormat,
) {
    // Invert the decoder's blue contraction; endpoints swap roles so the
    // decoder's sum test routes through the contracting branch.
    let r0 = 2 * c0.x - c0.z;
    let g0 = 2 * c0.y - c0.z;
    let r1 = 2 * c1.x - c1.z;
    let g1 = 2 * c1.y - c1.z;
    for v in [r0, g0, r1, g1] {
        if !(0..=255).contains(&v) {
            return;
        }
    }

    let q = [
        quantize(r1, quant),
        quantize(r0, quant),
        quantize(g1, quant),
        quantize(g0, quant),
        quantize(c1.z, quant),
        quantize(c0.z, quant),
    ];
    candidates.push(Candidate {
        format,
        values: [q[0], q[1], q[2], q[3], q[4], q[5], 0, 0],
    });
}

fn push_rgb_delta(
    candidates: &mut Vec<Candidate>,
    c0: IVec4,
    c1: IVec4,
    quant: QuantMethod,
    format: EndpointFormat,
) {
    // Base stored at half precision with the delta bit-packed beside it.
    let mut values = [0u8; 8];
    let tables = color_tables();
    let uqt = &tables.unquant[quant as usize];

    for (i, (b, e)) in [(c0.x, c1.x), (c0.y, c1.y), (c0.z, c1.z)].iter().enumerate() {
        let base = *b;
        // v0 carries base bits 7..1 in its top bits; bit 0 is free.
        let v0 = quantize_masked(
            (base << 1) & 0xFF,
            0xFE,
            ((base << 1) & 0xFE) as u8,
            quant,
        );
        let base_low = i32::from(uqt[v0 as usize]) >> 1;

        let delta = (*e - (base_low | (base & 0x80))).clamp(-32, 31);
        let v1_target = ((base & 0x80) | ((delta & 0x3F) << 1)) & 0xFF;
        let v1 = quantize_masked(v1_target, 0xFE, v1_target as u8, quant);

        values[i * 2] = v0;
        values[i * 2 + 1] = v1;
    }
    candidates.push(Candidate { format, values });
}

/// Packs one pair of color endpoints as effectively as possible.
///
/// The caller requests a base `format`; with `allow_variants` the packer
/// may return the delta variant of the same class when it reconstructs
/// better. Multi-partition blocks pass `false`, because the color quant
/// level is implied by whether all partition formats match and must be
/// known before packing. `rgbs_color` carries the same-chroma color with
/// its scale factor in the fourth lane; `rgbo_color` the HDR offset-form
/// color.
pub(crate) fn pack_color_endpoints(
    profile: Profile,
    color0: Vec4,
    color1: Vec4,
    rgbs_color: Vec4,
    rgbo_color: Vec4,
    format: EndpointFormat,
    quant: QuantMethod,
    allow_variants: bool,
) -> (EndpointFormat, [u8; 8]) {
    let c0 = to_u8_domain(color0);
    let c1 = to_u8_domain(color1);
    let mut candidates: Vec<Candidate> = Vec::new();

    match format {
        EndpointFormat::Luminance | EndpointFormat::LuminanceDelta => {
            let l0 = (c0.x + c0.y + c0.z) / 3;
            let l1 = (c1.x + c1.y + c1.z) / 3;
            candidates.push(Candidate {
                format: EndpointFormat::Luminance,
                values: [quantize(l0, quant), quantize(l1, quant), 0, 0, 0, 0, 0, 0],
            });

            if l1 >= l0 {
                let delta = (l1 - l0).min(63);
                let v0 = quantize_masked(
                    (l0 & 0x3F) << 2,
                    0xFC,
                    (((l0 & 0x3F) << 2) & 0xFC) as u8,
                    quant,
                );
                let v1_target = (l0 & 0xC0) | delta;
                let v1 = quantize_masked(v1_target, 0xFF, v1_target as u8, quant);
                candidates.push(Candidate {
                    format: EndpointFormat::LuminanceDelta,
                    values: [v0, v1, 0, 0, 0, 0, 0, 0],
                });
            }
        }

        EndpointFormat::LuminanceAlpha | EndpointFormat::LuminanceAlphaDelta => {
            let l0 = (c0.x + c0.y + c0.z) / 3;
            let l1 = (c1.x + c1.y + c1.z) / 3;
            candidates.push(Candidate {
                format: EndpointFormat::LuminanceAlpha,
                values: [
                    quantize(l0, quant),
                    quantize(l1, quant),
                    quantize(c0.w, quant),
                    quantize(c1.w, quant),
                    0,
                    0,
                    0,
                    0,
                ],
            });
        }

        EndpointFormat::RgbScale => {
            let base = to_u8_domain(rgbs_color);
            let scale = (rgbs_color.w * 256.0 + 0.5).clamp(0.0, 255.0) as i32;
            candidates.push(Candidate {
                format: EndpointFormat::RgbScale,
                values: [
                    quantize(base.x, quant),
                    quantize(base.y, quant),
                    quantize(base.z, quant),
                    quantize(scale, quant),
                    0,
                    0,
                    0,
                    0,
                ],
            });
        }

        EndpointFormat::RgbScaleAlpha => {
            let base = to_u8_domain(rgbs_color);
            let scale = (rgbs_color.w * 256.0 + 0.5).clamp(0.0, 255.0) as i32;
            candidates.push(Candidate {
                format: EndpointFormat::RgbScaleAlpha,
                values: [
                    quantize(base.x, quant),
                    quantize(base.y, quant),
                    quantize(base.z, quant),
                    quantize(scale, quant),
                    quantize(c0.w, quant),
                    quantize(c1.w, quant),
                    0,
                    0,
                ],
            });
        }

        EndpointFormat::Rgb | EndpointFormat::RgbDelta => {
            push_rgb_direct(&mut candidates, c0, c1, quant, EndpointFormat::Rgb);
            push_rgb_blue_contract(&mut candidates, c0, c1, quant, EndpointFormat::Rgb);
            push_rgb_delta(&mut candidates, c0, c1, quant, EndpointFormat::RgbDelta);
        }

        EndpointFormat::Rgba | EndpointFormat::RgbaDelta => {
            let mut rgb: Vec<Candidate> = Vec::new();
            push_rgb_direct(&mut rgb, c0, c1, quant, EndpointFormat::Rgba);
            push_rgb_blue_contract(&mut rgb, c0, c1, quant, EndpointFormat::Rgba);
            push_rgb_delta(&mut rgb, c0, c1, quant, EndpointFormat::RgbaDelta);
            for mut cand in rgb {
                cand.values[6] = quantize(c0.w, quant);
                cand.values[7] = quantize(c1.w, quant);
                candidates.push(cand);
            }
        }

        EndpointFormat::HdrLuminanceLargeRange | EndpointFormat::HdrLuminanceSmallRange => {
            let y0 = ((color0.x + color0.y + color0.z) / 3.0) as i32 >> 8;
            let y1 = ((color1.x + color1.y + color1.z) / 3.0) as i32 >> 8;
            candidates.push(Candidate {
                format: EndpointFormat::HdrLuminanceLargeRange,
                values: [
                    quantize(y0.min(y1), quant),
                    quantize(y0.max(y1), quant),
                    0,
                    0,
                    0,
                    0,
                    0,
                    0,
                ],
            });
        }

        EndpointFormat::HdrRgbScale => {
            candidates.push(pack_hdr_rgbo(rgbo_color, quant));
        }

        EndpointFormat::HdrRgb => {
            candidates.push(pack_hdr_rgb_direct(color0, color1, quant, EndpointFormat::HdrRgb));
        }

        EndpointFormat::HdrRgbLdrAlpha => {
            let mut cand =
                pack_hdr_rgb_direct(color0, color1, quant, EndpointFormat::HdrRgbLdrAlpha);
            cand.values[6] = quantize(c0.w, quant);
            cand.values[7] = quantize(c1.w, quant);
            candidates.push(cand);
        }

        EndpointFormat::HdrRgba => {
            let mut cand = pack_hdr_rgb_direct(color0, color1, quant, EndpointFormat::HdrRgba);
            // Direct alpha submode: both top bits set.
            cand.values[6] =
                quantize_masked(0x80 | ((color0.w as i32 >> 9) & 0x7F), 0x80, 0x80, quant);
            cand.values[7] =
                quantize_masked(0x80 | ((color1.w as i32 >> 9) & 0x7F), 0x80, 0x80, quant);
            candidates.push(cand);
        }
    }

    if !allow_variants {
        candidates.retain(|c| c.format == format);
    }

    debug_assert!(!candidates.is_empty());
    let mut best = 0;
    let mut best_error = f32::INFINITY;
    for (i, cand) in candidates.iter().enumerate() {
        let err = candidate_error(cand, quant, color0, color1, profile);
        if err < best_error {
            best_error = err;
            best = i;
        }
    }
    let chosen = candidates.swap_remove(best);
    (chosen.format, chosen.values)
}

/// HDR offset-form pack, submode 5 (no chroma folding, widest offsets).
fn pack_hdr_rgbo(rgbo: Vec4, quant: QuantMethod) -> Candidate {
    // 12-bit log domain.
    let r = (rgbo.x as i32 >> 4).clamp(0, 0xFFF);
    let g = (rgbo.y as i32 >> 4).clamp(0, 0xFFF);
    let b = (rgbo.z as i32 >> 4).clamp(0, 0xFFF);
    let s = (rgbo.w as i32 >> 4).clamp(0, 0xFFF);

    // Submode 5 stores plain 6/5-bit fields shifted by 5, with the mode
    // signalled through modeval bits 0xF.
    let rq = (r >> 5).clamp(0, 0x3F);
    let gq = (g >> 5).clamp(0, 0x1F);
    let bq = (b >> 5).clamp(0, 0x1F);
    let sq = (s >> 5).clamp(0, 0x1F);

    let v0 = 0xC0 | rq; // modeval low bits "11"
    let v1 = 0x80 | gq; // modeval bit 2
    let v2 = 0x80 | bq; // modeval bit 3
    let v3 = sq;

    Candidate {
        format: EndpointFormat::HdrRgbScale,
        values: [
            quantize_masked(v0, 0xC0, 0xC0, quant),
            quantize_masked(v1, 0x80 | 0x60, 0x80, quant),
            quantize_masked(v2, 0x80 | 0x60, 0x80, quant),
            quantize_masked(v3, 0xE0, 0x00, quant),
            0,
            0,
            0,
            0,
        ],
    }
}

/// HDR RGB pack, direct submode (both major-component bits set).
fn pack_hdr_rgb_direct(
    color0: Vec4,
    color1: Vec4,
    quant: QuantMethod,
    format: EndpointFormat,
) -> Candidate {
    let comp = |v: f32, shift: u32| -> i32 { ((v as i32) >> shift).clamp(0, 0xFF) };

    let v0 = comp(color0.x, 8);
    let v1 = comp(color1.x, 8);
    let v2 = comp(color0.y, 8);
    let v3 = comp(color1.y, 8);
    let v4 = 0x80 | (comp(color0.z, 9) & 0x7F);
    let v5 = 0x80 | (comp(color1.z, 9) & 0x7F);

    Candidate {
        format,
        values: [
            quantize(v0, quant),
            quantize(v1, quant),
            quantize(v2, quant),
            quantize(v3, quant),
            quantize_masked(v4, 0x80, 0x80, quant),
            quantize_masked(v5, 0x80, 0x80, quant),
            0,
            0,
        ],
    }
}
