//! Endpoint format selection.
//!
//! Given ideal endpoints and the bit budget left after weight encoding,
//! pick the endpoint format for every partition. Cheaper formats spend
//! fewer integers, buying a finer color quantization for what they do
//! store; the chooser weighs that against the structural error each format
//! bakes in (dropping alpha, forcing gray, forcing same-chroma).

use glam::Vec4;

use crate::block::{ErrorWeightBlock, ImageBlock};
use crate::block_size::BLOCK_MAX_PARTITIONS;
use crate::color::EndpointFormat;
use crate::config::Profile;
use crate::ideal::Endpoints;
use crate::partition::PartitionInfo;
use crate::quant::{quant_mode_for_bits, QuantMethod};

/// Estimated errors of the structural encoding choices for one partition.
#[derive(Clone, Copy, Default)]
pub(crate) struct EncodingChoiceErrors {
    /// Error of snapping the partition to a line through the origin.
    pub rgb_scale_error: f32,
    /// Error of forcing `R == G == B`.
    pub luminance_error: f32,
    /// Error of dropping alpha and decoding the default 1.0.
    pub alpha_drop_error: f32,
    /// Whether the endpoint pair is close enough for delta encoding.
    pub can_offset_encode: bool,
    /// Whether blue contraction keeps both endpoints in range.
    pub can_blue_contract: bool,
}

/// Computes the encoding choice errors for every partition.
pub(crate) fn compute_encoding_choice_errors(
    blk: &ImageBlock,
    pi: &PartitionInfo,
    ewb: &ErrorWeightBlock,
    ep: &Endpoints,
) -> [EncodingChoiceErrors; BLOCK_MAX_PARTITIONS] {
    let mut out = [EncodingChoiceErrors::default(); BLOCK_MAX_PARTITIONS];

    for partition in 0..pi.partition_count as usize {
        let texels = pi.texels(partition);

        // Same-chroma direction through the origin.
        let mut rgb_sum = Vec4::ZERO;
        for &t in texels {
            let t = t as usize;
            let mut c = blk.texel(t);
            c.w = 0.0;
            rgb_sum += c * ewb.texel_weight[t];
        }
        let samec_dir = rgb_sum.normalize_or_zero();

        let mut rgb_scale_error = 0.0f32;
        let mut luminance_error = 0.0f32;
        let mut alpha_drop_error = 0.0f32;

        for &t in texels {
            let t = t as usize;
            let mut rgb = blk.texel(t);
            let alpha = rgb.w;
            rgb.w = 0.0;
            let w = ewb.error_weights[t];
            let w_rgb = (w.x + w.y + w.z) * (1.0 / 3.0);

            let along = rgb.dot(samec_dir);
            rgb_scale_error += w_rgb * (rgb - samec_dir * along).length_squared();

            let lum = (rgb.x + rgb.y + rgb.z) * (1.0 / 3.0);
            luminance_error += w_rgb
                * ((rgb.x - lum) * (rgb.x - lum)
                    + (rgb.y - lum) * (rgb.y - lum)
                    + (rgb.z - lum) * (rgb.z - lum));

            let alpha_diff = alpha - 65535.0;
            alpha_drop_error += w.w * alpha_diff * alpha_diff;
        }

        let e0 = ep.endpt0[partition];
        let e1 = ep.endpt1[partition];
        let diff = (e1 - e0).abs();
        let can_offset_encode =
            diff.x < 7864.0 && diff.y < 7864.0 && diff.z < 7864.0 && diff.w < 7864.0;

        let in_range = |v: f32| (0.0..=65535.0).contains(&v);
        let can_blue_contract = in_range(2.0 * e0.x - e0.z)
            && in_range(2.0 * e0.y - e0.z)
            && in_range(2.0 * e1.x - e1.z)
            && in_range(2.0 * e1.y - e1.z);

        out[partition] = EncodingChoiceErrors {
            rgb_scale_error,
            luminance_error,
            alpha_drop_error,
            can_offset_encode,
            can_blue_contract,
        };
    }

    out
}

/// The outcome of format selection for one candidate block mode.
///
/// The color quant level is not part of the choice: it is implied by the
/// bit budget of the final layout and derived again at packing time.
#[derive(Clone, Copy)]
pub(crate) struct FormatChoice {
    pub formats: [EndpointFormat; BLOCK_MAX_PARTITIONS],
    pub est_error: f32,
}

/// Estimated squared error per texel component introduced by quantizing an
/// endpoint at the given level.
fn baseline_quant_error(quant: QuantMethod) -> f32 {
    let steps = (quant.levels() - 1) as f32;
    (65536.0 * 65536.0 / 18.0) / (steps * steps)
}

/// The best format of a given class for one partition, with the structural
/// error that choice accepts.
fn best_format_of_class(
    profile: Profile,
    class: u8,
    ece: &EncodingChoiceErrors,
    uses_alpha: bool,
) -> (EndpointFormat, f32) {
    if profile.is_hdr() {
        let alpha_fmt = if profile.is_hdr_alpha() {
            EndpointFormat::HdrRgba
        } else {
            EndpointFormat::HdrRgbLdrAlpha
        };
        return match class {
            0 => (
                EndpointFormat::HdrLuminanceLargeRange,
                ece.luminance_error + ece.alpha_drop_error,
            ),
            1 => (
                EndpointFormat::HdrRgbScale,
                ece.rgb_scale_error + ece.alpha_drop_error,
            ),
            2 => (EndpointFormat::HdrRgb, ece.alpha_drop_error),
            _ => (alpha_fmt, 0.0),
        };
    }

    match class {
        0 => (
            EndpointFormat::Luminance,
            ece.luminance_error + ece.alpha_drop_error,
        ),
        1 => {
            let la = (EndpointFormat::LuminanceAlpha, ece.luminance_error);
            let rs = (
                EndpointFormat::RgbScale,
                ece.rgb_scale_error + ece.alpha_drop_error,
            );
            if uses_alpha && la.1 <= rs.1 {
                la
            } else {
                rs
            }
        }
        2 => {
            let rgb = (EndpointFormat::Rgb, ece.alpha_drop_error);
            let rsa = (EndpointFormat::RgbScaleAlpha, ece.rgb_scale_error);
            if uses_alpha && rsa.1 < rgb.1 {
                rsa
            } else {
                rgb
            }
        }
        _ => (EndpointFormat::Rgba, 0.0),
    }
}

/// Picks the best per-partition endpoint formats for a bit budget.
///
/// `color_bits_matched` is the number of bits left for endpoint values when
/// every partition shares one format; differing formats cost another
/// `3 * partitions - 4` bits of endpoint-mode metadata. Returns `None` when
/// no combination leaves a legal color quantization.
pub(crate) fn choose_endpoint_formats(
    profile: Profile,
    pi: &PartitionInfo,
    blk: &ImageBlock,
    ece: &[EncodingChoiceErrors; BLOCK_MAX_PARTITIONS],
    color_bits_matched: u32,
) -> Option<FormatChoice> {
    let partition_count = pi.partition_count as usize;
    let uses_alpha = !blk.is_constant_channel(3);

    // Per partition, the best format and structural error for each class.
    let mut per_class = [[(EndpointFormat::Rgba, 0.0f32); 4]; BLOCK_MAX_PARTITIONS];
    for p in 0..partition_count {
        for class in 0..4u8 {
            per_class[p][class as usize] =
                best_format_of_class(profile, class, &ece[p], uses_alpha);
        }
    }

    let extra_bits = if partition_count > 1 {
        3 * partition_count as u32 - 4
    } else {
        0
    };

    let mut best: Option<FormatChoice> = None;
    let combos = 4usize.pow(partition_count as u32);
    for combo in 0..combos {
        let mut classes = [0u8; BLOCK_MAX_PARTITIONS];
        let mut min_class = 3u8;
        let mut max_class = 0u8;
        for p in 0..partition_count {
            classes[p] = ((combo >> (2 * p)) & 3) as u8;
            min_class = min_class.min(classes[p]);
            max_class = max_class.max(classes[p]);
        }
        // Partition classes must stay within one step of each other on the
        // wire.
        if max_class - min_class > 1 {
            continue;
        }

        let mut formats = [EndpointFormat::Rgba; BLOCK_MAX_PARTITIONS];
        let mut structural = 0.0f32;
        let mut pairs = 0u32;
        for p in 0..partition_count {
            let (format, err) = per_class[p][classes[p] as usize];
            formats[p] = format;
            structural += err;
            pairs += u32::from(classes[p]) + 1;
        }

        let matched = formats[..partition_count]
            .iter()
            .all(|&f| f == formats[0]);
        let bits = if matched {
            color_bits_matched
        } else {
            if color_bits_matched < extra_bits {
                continue;
            }
            color_bits_matched - extra_bits
        };

        let Some(quant) = quant_mode_for_bits(pairs, bits) else {
            continue;
        };

        let quant_cost =
            baseline_quant_error(quant) * blk.texel_count as f32 * partition_count as f32;
        let est_error = structural + quant_cost;

        if best.map_or(true, |b| est_error < b.est_error) {
            best = Some(FormatChoice { formats, est_error });
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{compute_error_weights, BlockInputModifiers};
    use crate::block_size::BlockSizeDescriptor;
    use crate::config::{Config, Preset};

    fn make_block(colors: impl Fn(usize) -> Vec4) -> (ImageBlock, ErrorWeightBlock) {
        let config = Config::new(Profile::Ldr, 4, 4, 1, Preset::Medium).unwrap();
        let mut blk = ImageBlock::new();
        blk.texel_count = 16;
        let mut min = Vec4::splat(f32::INFINITY);
        let mut max = Vec4::splat(f32::NEG_INFINITY);
        for t in 0..16 {
            let c = colors(t);
            blk.data_r[t] = c.x;
            blk.data_g[t] = c.y;
            blk.data_b[t] = c.z;
            blk.data_a[t] = c.w;
            min = min.min(c);
            max = max.max(c);
        }
        blk.data_min = min;
        blk.data_max = max;
        let ewb = compute_error_weights(&config, &blk, &vec![1.0; 16], &BlockInputModifiers::NONE);
        (blk, ewb)
    }

    #[test]
    fn gray_blocks_have_low_luminance_error() {
        let bsd = BlockSizeDescriptor::new(4, 4, 1, true, 0.5);
        let pi = bsd.partition_info(1, 0);
        let (blk, ewb) = make_block(|t| Vec4::new(t as f32 * 4000.0, t as f32 * 4000.0, t as f32 * 4000.0, 65535.0));
        let ece = compute_encoding_choice_errors(&blk, pi, &ewb, &Endpoints::new());
        assert!(ece[0].luminance_error < 1.0);
        // A colorful block is the opposite.
        let (blk2, ewb2) = make_block(|t| Vec4::new(t as f32 * 4000.0, 0.0, 60000.0, 65535.0));
        let ece2 = compute_encoding_choice_errors(&blk2, pi, &ewb2, &Endpoints::new());
        assert!(ece2[0].luminance_error > ece[0].luminance_error);
    }

    #[test]
    fn opaque_blocks_drop_alpha_for_free() {
        let bsd = BlockSizeDescriptor::new(4, 4, 1, true, 0.5);
        let pi = bsd.partition_info(1, 0);
        let (blk, ewb) = make_block(|t| Vec4::new(t as f32 * 4000.0, 500.0, 100.0, 65535.0));
        let ece = compute_encoding_choice_errors(&blk, pi, &ewb, &Endpoints::new());
        assert_eq!(ece[0].alpha_drop_error, 0.0);

        let choice = choose_endpoint_formats(Profile::Ldr, pi, &blk, &ece, 40).unwrap();
        // With alpha constant at 1.0 an RGB-class format wins.
        assert!(matches!(
            choice.formats[0],
            EndpointFormat::Rgb | EndpointFormat::RgbScale | EndpointFormat::Luminance
        ));
    }

    #[test]
    fn transparent_blocks_keep_alpha() {
        let bsd = BlockSizeDescriptor::new(4, 4, 1, true, 0.5);
        let pi = bsd.partition_info(1, 0);
        let (blk, ewb) = make_block(|t| {
            Vec4::new(
                t as f32 * 4000.0,
                30000.0,
                10000.0,
                t as f32 * 4000.0,
            )
        });
        let ece = compute_encoding_choice_errors(&blk, pi, &ewb, &Endpoints::new());
        assert!(ece[0].alpha_drop_error > 0.0);

        let choice = choose_endpoint_formats(Profile::Ldr, pi, &blk, &ece, 80).unwrap();
        assert!(matches!(
            choice.formats[0],
            EndpointFormat::Rgba | EndpointFormat::RgbScaleAlpha | EndpointFormat::LuminanceAlpha
        ));
    }

    #[test]
    fn tiny_budgets_yield_none() {
        let bsd = BlockSizeDescriptor::new(4, 4, 1, true, 0.5);
        let pi = bsd.partition_info(1, 0);
        let (blk, ewb) = make_block(|t| Vec4::new(t as f32 * 4000.0, 0.0, 0.0, 65535.0));
        let ece = compute_encoding_choice_errors(&blk, pi, &ewb, &Endpoints::new());
        assert!(choose_endpoint_formats(Profile::Ldr, pi, &blk, &ece, 3).is_none());
    }

    #[test]
    fn hdr_profile_selects_hdr_formats() {
        let bsd = BlockSizeDescriptor::new(4, 4, 1, true, 0.5);
        let pi = bsd.partition_info(1, 0);
        let (blk, ewb) = make_block(|t| Vec4::new(t as f32 * 4000.0, 2000.0, 1000.0, 65535.0));
        let ece = compute_encoding_choice_errors(&blk, pi, &ewb, &Endpoints::new());
        let choice = choose_endpoint_formats(Profile::Hdr, pi, &blk, &ece, 60).unwrap();
        assert!(choice.formats[0].is_rgb_hdr());
    }
}
