//! Ideal endpoint and weight computation.
//!
//! For each partition the solver fits a line through the error-weighted mean
//! along the dominant color direction. Each texel's ideal weight is its
//! projection onto that line, remapped to `[0, 1]`; the per-texel error
//! scale captures how much a unit weight error costs, which is what the
//! decimation and quantization stages minimize against.

use glam::Vec4;

use crate::block::{ErrorWeightBlock, ImageBlock};
use crate::block_size::{BLOCK_MAX_PARTITIONS, BLOCK_MAX_TEXELS};
use crate::decimation::DecimationInfo;
use crate::partition::PartitionInfo;

/// The color endpoint pairs for up to four partitions.
#[derive(Clone, Copy)]
pub(crate) struct Endpoints {
    pub partition_count: u8,
    pub endpt0: [Vec4; BLOCK_MAX_PARTITIONS],
    pub endpt1: [Vec4; BLOCK_MAX_PARTITIONS],
}

impl Endpoints {
    pub fn new() -> Self {
        Endpoints {
            partition_count: 1,
            endpt0: [Vec4::ZERO; BLOCK_MAX_PARTITIONS],
            endpt1: [Vec4::ZERO; BLOCK_MAX_PARTITIONS],
        }
    }
}

/// Ideal endpoints plus per-texel weights for one weight plane.
#[derive(Clone)]
pub(crate) struct EndpointsAndWeights {
    pub ep: Endpoints,
    /// Ideal weight per texel in `[0, 1]`.
    pub weights: [f32; BLOCK_MAX_TEXELS],
    /// Cost of a unit weight error per texel.
    pub weight_error_scale: [f32; BLOCK_MAX_TEXELS],
    /// True if every active error scale is identical, enabling the fast
    /// quantizer path.
    pub is_constant_weight_error_scale: bool,
}

impl EndpointsAndWeights {
    pub fn new() -> Self {
        EndpointsAndWeights {
            ep: Endpoints::new(),
            weights: [0.0; BLOCK_MAX_TEXELS],
            weight_error_scale: [0.0; BLOCK_MAX_TEXELS],
            is_constant_weight_error_scale: true,
        }
    }
}

/// The mean and dominant direction of one partition.
#[derive(Clone, Copy, Default)]
pub(crate) struct PartitionMetrics {
    pub avg: Vec4,
    pub dir: Vec4,
}

/// Computes error-weighted means and dominant directions over all four
/// components. Directions are not normalized.
pub(crate) fn compute_avgs_and_dirs_4_comp(
    pi: &PartitionInfo,
    blk: &ImageBlock,
    ewb: &ErrorWeightBlock,
    pm: &mut [PartitionMetrics; BLOCK_MAX_PARTITIONS],
) {
    for partition in 0..pi.partition_count as usize {
        let texels = pi.texels(partition);

        let mut weight_sum = 1e-17f32;
        let mut avg_sum = Vec4::ZERO;
        for &t in texels {
            let w = ewb.texel_weight[t as usize];
            weight_sum += w;
            avg_sum += blk.texel(t as usize) * w;
        }
        let avg = avg_sum / weight_sum;

        // Accumulate sign-bucketed offsets; the largest bucket is a stable
        // stand-in for the principal axis without iterating.
        let mut sum_xp = Vec4::ZERO;
        let mut sum_yp = Vec4::ZERO;
        let mut sum_zp = Vec4::ZERO;
        let mut sum_wp = Vec4::ZERO;
        for &t in texels {
            let w = ewb.texel_weight[t as usize];
            let d = (blk.texel(t as usize) - avg) * w;
            if d.x > 0.0 {
                sum_xp += d;
            }
            if d.y > 0.0 {
                sum_yp += d;
            }
            if d.z > 0.0 {
                sum_zp += d;
            }
            if d.w > 0.0 {
                sum_wp += d;
            }
        }

        let mut best = sum_xp;
        let mut best_len = sum_xp.length_squared();
        for cand in [sum_yp, sum_zp, sum_wp] {
            let len = cand.length_squared();
            if len > best_len {
                best = cand;
                best_len = len;
            }
        }

        pm[partition] = PartitionMetrics { avg, dir: best };
    }
}

/// As [`compute_avgs_and_dirs_4_comp`], ignoring `omitted` (its lane is
/// zeroed in both the mean and the direction).
pub(crate) fn compute_avgs_and_dirs_3_comp(
    pi: &PartitionInfo,
    blk: &ImageBlock,
    ewb: &ErrorWeightBlock,
    omitted: usize,
    pm: &mut [PartitionMetrics; BLOCK_MAX_PARTITIONS],
) {
    let zero_lane = |mut v: Vec4| -> Vec4 {
        match omitted {
            0 => v.x = 0.0,
            1 => v.y = 0.0,
            2 => v.z = 0.0,
            _ => v.w = 0.0,
        }
        v
    };

    for partition in 0..pi.partition_count as usize {
        let texels = pi.texels(partition);

        let mut weight_sum = 1e-17f32;
        let mut avg_sum = Vec4::ZERO;
        for &t in texels {
            let w = ewb.texel_weight_omitting(t as usize, omitted);
            weight_sum += w;
            avg_sum += zero_lane(blk.texel(t as usize)) * w;
        }
        let avg = avg_sum / weight_sum;

        let mut sums = [Vec4::ZERO; 3];
        for &t in texels {
            let w = ewb.texel_weight_omitting(t as usize, omitted);
            let d = (zero_lane(blk.texel(t as usize)) - avg) * w;
            let lanes = [d.x, d.y, d.z, d.w];
            let mut li = 0;
            for c in 0..4 {
                if c == omitted {
                    continue;
                }
                if lanes[c] > 0.0 {
                    sums[li] += d;
                }
                li += 1;
            }
        }

        let mut best = sums[0];
        let mut best_len = sums[0].length_squared();
        for cand in [sums[1], sums[2]] {
            let len = cand.length_squared();
            if len > best_len {
                best = cand;
                best_len = len;
            }
        }

        pm[partition] = PartitionMetrics { avg, dir: best };
    }
}

/// Specialization of the three-component variant for RGB data, the common
/// case during partition search.
pub(crate) fn compute_avgs_and_dirs_3_comp_rgb(
    pi: &PartitionInfo,
    blk: &ImageBlock,
    ewb: &ErrorWeightBlock,
    pm: &mut [PartitionMetrics; BLOCK_MAX_PARTITIONS],
) {
    compute_avgs_and_dirs_3_comp(pi, blk, ewb, 3, pm);
}

fn fit_line_weights(
    blk: &ImageBlock,
    texels: &[u8],
    avg: Vec4,
    dir: Vec4,
    scale_weight: impl Fn(usize) -> f32,
    ei: &mut EndpointsAndWeights,
    partition: usize,
) {
    // Orient the line so weights increase with overall intensity.
    let mut dir = dir;
    if dir.x + dir.y + dir.z + dir.w < 0.0 {
        dir = -dir;
    }
    let len = dir.length();
    let b = if len > 1e-10 { dir / len } else { Vec4::ZERO };

    let mut low = 1e10f32;
    let mut high = -1e10f32;
    for &t in texels {
        let param = (blk.texel(t as usize) - avg).dot(b);
        ei.weights[t as usize] = param;
        low = low.min(param);
        high = high.max(param);
    }

    if high <= low {
        low = 0.0;
        high = 1e-7;
    }

    ei.ep.endpt0[partition] = avg + b * low;
    ei.ep.endpt1[partition] = avg + b * high;

    let scale = high - low;
    let scale_inv = 1.0 / scale;
    let length_squared = scale * scale;
    for &t in texels {
        let t = t as usize;
        ei.weights[t] = ((ei.weights[t] - low) * scale_inv).clamp(0.0, 1.0);
        ei.weight_error_scale[t] = length_squared * scale_weight(t);
    }
}

/// Computes ideal endpoints and weights for a single weight plane.
pub(crate) fn compute_ideal_colors_and_weights_1plane(
    blk: &ImageBlock,
    ewb: &ErrorWeightBlock,
    pi: &PartitionInfo,
    ei: &mut EndpointsAndWeights,
) {
    let mut pm = [PartitionMetrics::default(); BLOCK_MAX_PARTITIONS];
    compute_avgs_and_dirs_4_comp(pi, blk, ewb, &mut pm);

    ei.ep.partition_count = pi.partition_count;
    for partition in 0..pi.partition_count as usize {
        fit_line_weights(
            blk,
            pi.texels(partition),
            pm[partition].avg,
            pm[partition].dir,
            |t| ewb.texel_weight[t],
            ei,
            partition,
        );
    }

    update_constant_scale_flag(ei, blk.texel_count as usize);
}

/// Computes ideal endpoints and weights for two planes. `plane2_component`
/// carries its own weight plane; the remaining three components share
/// plane 1. Dual-plane encoding always uses a single partition.
pub(crate) fn compute_ideal_colors_and_weights_2planes(
    blk: &ImageBlock,
    ewb: &ErrorWeightBlock,
    pi: &PartitionInfo,
    plane2_component: usize,
    ei1: &mut EndpointsAndWeights,
    ei2: &mut EndpointsAndWeights,
) {
    debug_assert_eq!(pi.partition_count, 1);
    let texels = pi.texels(0);

    let mut pm = [PartitionMetrics::default(); BLOCK_MAX_PARTITIONS];
    compute_avgs_and_dirs_3_comp(pi, blk, ewb, plane2_component, &mut pm);

    ei1.ep.partition_count = 1;
    fit_line_weights(
        blk,
        texels,
        pm[0].avg,
        pm[0].dir,
        |t| ewb.texel_weight_omitting(t, plane2_component),
        ei1,
        0,
    );

    // Plane 2 is a straight min/max fit of the isolated component.
    let component = |t: usize| -> f32 {
        match plane2_component {
            0 => blk.data_r[t],
            1 => blk.data_g[t],
            2 => blk.data_b[t],
            _ => blk.data_a[t],
        }
    };

    let mut low = f32::INFINITY;
    let mut high = f32::NEG_INFINITY;
    for &t in texels {
        let v = component(t as usize);
        low = low.min(v);
        high = high.max(v);
    }
    if high <= low {
        high = low + 1e-7;
    }

    let scale = high - low;
    let scale_inv = 1.0 / scale;
    let length_squared = scale * scale;

    ei2.ep.partition_count = 1;
    ei2.ep.endpt0[0] = ei1.ep.endpt0[0];
    ei2.ep.endpt1[0] = ei1.ep.endpt1[0];
    match plane2_component {
        0 => {
            ei2.ep.endpt0[0].x = low;
            ei2.ep.endpt1[0].x = high;
            ei1.ep.endpt0[0].x = low;
            ei1.ep.endpt1[0].x = high;
        }
        1 => {
            ei2.ep.endpt0[0].y = low;
            ei2.ep.endpt1[0].y = high;
            ei1.ep.endpt0[0].y = low;
            ei1.ep.endpt1[0].y = high;
        }
        2 => {
            ei2.ep.endpt0[0].z = low;
            ei2.ep.endpt1[0].z = high;
            ei1.ep.endpt0[0].z = low;
            ei1.ep.endpt1[0].z = high;
        }
        _ => {
            ei2.ep.endpt0[0].w = low;
            ei2.ep.endpt1[0].w = high;
            ei1.ep.endpt0[0].w = low;
            ei1.ep.endpt1[0].w = high;
        }
    }

    for &t in texels {
        let t = t as usize;
        ei2.weights[t] = ((component(t) - low) * scale_inv).clamp(0.0, 1.0);
        ei2.weight_error_scale[t] = length_squared * ewb.channel_weight(t, plane2_component);
    }

    let texel_count = blk.texel_count as usize;
    update_constant_scale_flag(ei1, texel_count);
    update_constant_scale_flag(ei2, texel_count);
}

fn update_constant_scale_flag(ei: &mut EndpointsAndWeights, texel_count: usize) {
    let first = ei.weight_error_scale[0];
    ei.is_constant_weight_error_scale = ei.weight_error_scale[..texel_count]
        .iter()
        .all(|&s| s == first);
}

/// Recomputes the ideal endpoint colors for a fixed quantized weight set.
///
/// After decimation and quantization the weights the decoder will actually
/// see differ from the ideal ones, so the optimal endpoints shift. This
/// solves the per-partition weighted least-squares system directly, and
/// also refreshes the same-chroma (`rgbs`) and offset-form (`rgbo`) colors
/// used by the scale-based endpoint formats.
///
/// `plane2` optionally carries the second weight plane and its component.
pub(crate) fn recompute_ideal_colors(
    blk: &ImageBlock,
    ewb: &ErrorWeightBlock,
    pi: &PartitionInfo,
    di: &DecimationInfo,
    plane1_uvalues: &[f32],
    plane2: Option<(&[f32], u8)>,
    ep: &mut Endpoints,
    rgbs_vectors: &mut [Vec4; BLOCK_MAX_PARTITIONS],
    rgbo_vectors: &mut [Vec4; BLOCK_MAX_PARTITIONS],
) {
    use glam::Vec4Swizzles;

    for partition in 0..pi.partition_count as usize {
        let mut s00 = Vec4::ZERO;
        let mut s01 = Vec4::ZERO;
        let mut s11 = Vec4::ZERO;
        let mut b0 = Vec4::ZERO;
        let mut b1 = Vec4::ZERO;

        for &t in pi.texels(partition) {
            let t = t as usize;
            let l1 = di.infill(plane1_uvalues, t);
            let lam = match plane2 {
                Some((uvalues, component)) => {
                    let l2 = di.infill(uvalues, t);
                    let mut v = Vec4::splat(l1);
                    match component {
                        0 => v.x = l2,
                        1 => v.y = l2,
                        2 => v.z = l2,
                        _ => v.w = l2,
                    }
                    v
                }
                None => Vec4::splat(l1),
            };

            let w = ewb.error_weights[t];
            let om = Vec4::ONE - lam;
            let c = blk.texel(t);

            s00 += w * om * om;
            s01 += w * om * lam;
            s11 += w * lam * lam;
            b0 += w * c * om;
            b1 += w * c * lam;
        }

        let det = s00 * s11 - s01 * s01;
        let valid = det.abs().cmpgt(Vec4::splat(1e-10));
        let safe_det = Vec4::select(valid, det, Vec4::ONE);

        let e0 = ((b0 * s11 - b1 * s01) / safe_det).clamp(Vec4::ZERO, Vec4::splat(65535.0));
        let e1 = ((b1 * s00 - b0 * s01) / safe_det).clamp(Vec4::ZERO, Vec4::splat(65535.0));

        ep.endpt0[partition] = Vec4::select(valid, e0, ep.endpt0[partition]);
        ep.endpt1[partition] = Vec4::select(valid, e1, ep.endpt1[partition]);

        // Same-chroma color: the high endpoint with the scale that best
        // reproduces the low endpoint along it.
        let high = ep.endpt1[partition];
        let low = ep.endpt0[partition];
        let denom = high.xyz().length_squared().max(1e-10);
        let scale = (low.xyz().dot(high.xyz()) / denom).clamp(0.0, 1.0);
        rgbs_vectors[partition] = Vec4::new(high.x, high.y, high.z, scale);

        // Offset-form color for the HDR scale format.
        let offset = ((high.x - low.x) + (high.y - low.y) + (high.z - low.z)) / 3.0;
        rgbo_vectors[partition] = Vec4::new(high.x, high.y, high.z, offset.max(0.0));
    }
}

/// The error of using a decimated, quantized weight set for one plane,
/// relative to the ideal per-texel weights.
pub(crate) fn compute_error_of_weight_set_1plane(
    eai: &EndpointsAndWeights,
    di: &DecimationInfo,
    dec_weight_quant_uvalue: &[f32],
) -> f32 {
    let mut error = 0.0f32;
    for texel in 0..di.texel_count as usize {
        let actual = di.infill(dec_weight_quant_uvalue, texel);
        let diff = actual - eai.weights[texel];
        error += diff * diff * eai.weight_error_scale[texel];
    }
    error
}

/// Two-plane variant of [`compute_error_of_weight_set_1plane`].
pub(crate) fn compute_error_of_weight_set_2planes(
    eai1: &EndpointsAndWeights,
    eai2: &EndpointsAndWeights,
    di: &DecimationInfo,
    dec_weights_plane1: &[f32],
    dec_weights_plane2: &[f32],
) -> f32 {
    compute_error_of_weight_set_1plane(eai1, di, dec_weights_plane1)
        + compute_error_of_weight_set_1plane(eai2, di, dec_weights_plane2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::compute_error_weights;
    use crate::block::BlockInputModifiers;
    use crate::block_size::BlockSizeDescriptor;
    use crate::config::{Config, Preset, Profile};

    fn gradient_block(bsd: &BlockSizeDescriptor) -> ImageBlock {
        let mut blk = ImageBlock::new();
        blk.texel_count = bsd.texel_count;
        let xdim = bsd.xdim as usize;
        for y in 0..bsd.ydim as usize {
            for x in 0..xdim {
                let t = y * xdim + x;
                blk.data_r[t] = x as f32 * 5000.0;
                blk.data_g[t] = 0.0;
                blk.data_b[t] = 0.0;
                blk.data_a[t] = 65535.0;
            }
        }
        blk.data_min = glam::Vec4::new(0.0, 0.0, 0.0, 65535.0);
        blk.data_max = glam::Vec4::new((xdim - 1) as f32 * 5000.0, 0.0, 0.0, 65535.0);
        blk
    }

    #[test]
    fn gradient_weights_are_monotonic() {
        let config = Config::new(Profile::Ldr, 6, 6, 1, Preset::Medium).unwrap();
        let bsd = BlockSizeDescriptor::new(6, 6, 1, true, 0.5);
        let blk = gradient_block(&bsd);
        let ewb = compute_error_weights(&config, &blk, &vec![1.0; 36], &BlockInputModifiers::NONE);

        let mut ei = EndpointsAndWeights::new();
        compute_ideal_colors_and_weights_1plane(&blk, &ewb, bsd.partition_info(1, 0), &mut ei);

        // Weights rise from the left edge to the right edge of each row.
        for y in 0..6 {
            for x in 1..6 {
                assert!(ei.weights[y * 6 + x] >= ei.weights[y * 6 + x - 1]);
            }
        }
        assert_eq!(ei.weights[0], 0.0);
        assert_eq!(ei.weights[5], 1.0);
        assert!(ei.is_constant_weight_error_scale);

        // Endpoints sit on the red axis.
        assert!(ei.ep.endpt0[0].x < ei.ep.endpt1[0].x);
        assert!(ei.ep.endpt0[0].y.abs() < 1.0);
    }

    #[test]
    fn two_plane_split_isolates_component() {
        let config = Config::new(Profile::Ldr, 4, 4, 1, Preset::Medium).unwrap();
        let bsd = BlockSizeDescriptor::new(4, 4, 1, true, 0.5);

        let mut blk = ImageBlock::new();
        blk.texel_count = 16;
        for t in 0..16 {
            blk.data_r[t] = (t % 4) as f32 * 10000.0;
            blk.data_g[t] = 30000.0;
            blk.data_b[t] = 30000.0;
            blk.data_a[t] = (t / 4) as f32 * 20000.0;
        }
        let ewb = compute_error_weights(&config, &blk, &vec![1.0; 16], &BlockInputModifiers::NONE);

        let mut ei1 = EndpointsAndWeights::new();
        let mut ei2 = EndpointsAndWeights::new();
        compute_ideal_colors_and_weights_2planes(
            &blk,
            &ewb,
            bsd.partition_info(1, 0),
            3,
            &mut ei1,
            &mut ei2,
        );

        // Plane 2 weights track the alpha ramp by row.
        assert_eq!(ei2.weights[0], 0.0);
        assert_eq!(ei2.weights[12], 1.0);
        assert!((ei2.weights[4] - 1.0 / 3.0).abs() < 1e-5);
        // Plane 2 endpoints carry the alpha extremes.
        assert_eq!(ei2.ep.endpt0[0].w, 0.0);
        assert_eq!(ei2.ep.endpt1[0].w, 60000.0);
    }

    #[test]
    fn weight_set_error_is_zero_for_exact_weights() {
        let config = Config::new(Profile::Ldr, 6, 6, 1, Preset::Medium).unwrap();
        let bsd = BlockSizeDescriptor::new(6, 6, 1, true, 0.5);
        let blk = gradient_block(&bsd);
        let ewb = compute_error_weights(&config, &blk, &vec![1.0; 36], &BlockInputModifiers::NONE);

        let mut ei = EndpointsAndWeights::new();
        compute_ideal_colors_and_weights_1plane(&blk, &ewb, bsd.partition_info(1, 0), &mut ei);

        // Find the direct 6x6 decimation table.
        let di_idx = bsd
            .decimation_tables
            .iter()
            .position(|di| di.is_direct())
            .unwrap();
        let di = &bsd.decimation_tables[di_idx];
        let err = compute_error_of_weight_set_1plane(&ei, di, &ei.weights[..36]);
        assert!(err < 1e-3, "error {err}");
    }
}
