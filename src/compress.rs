//! Block compression driver.
//!
//! For each block the driver walks the encoding search space in order of
//! expected payoff: constant-color detection, one partition with one or two
//! weight planes, then two to four partitions. Every stage keeps the best
//! candidate it has seen and each stage can end the search early when the
//! error already beats the preset's quality target.

use glam::Vec4;

use crate::bise;
use crate::block::{ErrorWeightBlock, ImageBlock};
use crate::block_size::{
    BlockSizeDescriptor, BLOCK_MAX_PARTITIONS, ERROR_CALC_DEFAULT, MAX_TRIAL_CANDIDATES,
    WEIGHTS_PLANE2_OFFSET,
};
use crate::config::{Config, Flags};
use crate::decompress::decompress_symbolic_block;
use crate::format_select::{choose_endpoint_formats, compute_encoding_choice_errors};
use crate::ideal::{
    compute_error_of_weight_set_1plane, compute_error_of_weight_set_2planes,
    compute_ideal_colors_and_weights_1plane, compute_ideal_colors_and_weights_2planes,
    recompute_ideal_colors, Endpoints, EndpointsAndWeights,
};
use crate::mathutil::float_to_sf16;
use crate::partition_search::find_best_partition_candidates;
use crate::quant::quant_mode_for_bits;
use crate::symbolic::{NonConstBlock, SymbolicBlock};
use crate::weight_quant::{
    compute_ideal_weights_for_decimation, compute_quantized_weights_for_decimation,
};

/// Preallocated scratch reused across blocks by one worker thread.
pub(crate) struct CompressionWorkingBuffers {
    decode_scratch: ImageBlock,
}

impl CompressionWorkingBuffers {
    pub fn new() -> Self {
        CompressionWorkingBuffers {
            decode_scratch: ImageBlock::new(),
        }
    }
}

/// The weighted squared error between a candidate encoding and the block,
/// as the decoder will actually reconstruct it.
fn compute_symbolic_block_error(
    config: &Config,
    bsd: &BlockSizeDescriptor,
    scb: &SymbolicBlock,
    blk: &ImageBlock,
    ewb: &ErrorWeightBlock,
    tmp: &mut ImageBlock,
) -> f32 {
    decompress_symbolic_block(config.profile, bsd, scb, tmp);

    let mut error = 0.0f32;
    for t in 0..blk.texel_count as usize {
        let decoded = tmp.texel(t);
        // RGBM data cannot represent a zero multiplier; reject encodings
        // that produce one.
        if config.flags.contains(Flags::MAP_RGBM) && decoded.w < 1.0 {
            return ERROR_CALC_DEFAULT;
        }
        let diff = decoded - blk.texel(t);
        error += (ewb.error_weights[t] * diff * diff).element_sum();
    }
    error
}

/// One ranked `(block mode, weight-set error)` pair from the cheap pass.
#[derive(Clone, Copy)]
struct ModeCandidate {
    packed_index: u16,
    error: f32,
}

/// Keeps the `limit` lowest-error candidates in insertion-sorted order.
fn push_candidate(candidates: &mut Vec<ModeCandidate>, limit: usize, cand: ModeCandidate) {
    let pos = candidates
        .iter()
        .position(|c| cand.error < c.error)
        .unwrap_or(candidates.len());
    if pos < limit {
        candidates.insert(pos, cand);
        candidates.truncate(limit);
    }
}

/// Per-decimation-mode cache of solved grid weights for the current ideal
/// weight set.
struct DecimationCache {
    solved: Vec<bool>,
    values: Vec<f32>,
    sigs: Vec<f32>,
}

impl DecimationCache {
    fn new(mode_count: usize) -> Self {
        DecimationCache {
            solved: vec![false; mode_count],
            values: vec![0.0; mode_count * 64],
            sigs: vec![0.0; mode_count * 64],
        }
    }

    fn get(
        &mut self,
        bsd: &BlockSizeDescriptor,
        eai: &EndpointsAndWeights,
        dm: usize,
    ) -> &[f32] {
        if !self.solved[dm] {
            let di = bsd.decimation_info(dm as u8);
            compute_ideal_weights_for_decimation(
                eai,
                di,
                &mut self.values[dm * 64..dm * 64 + 64],
                &mut self.sigs[dm * 64..dm * 64 + 64],
            );
            self.solved[dm] = true;
        }
        &self.values[dm * 64..dm * 64 + 64]
    }
}

struct TrialContext<'a> {
    config: &'a Config,
    bsd: &'a BlockSizeDescriptor,
    blk: &'a ImageBlock,
    ewb: &'a ErrorWeightBlock,
}

/// Runs the full trial pipeline for one partitioning and plane layout:
/// cheap mode ranking, format selection, endpoint packing and iterative
/// refinement. Updates `best` whenever a candidate improves on it.
#[allow(clippy::too_many_arguments)]
fn trial_partitioning(
    ctx: &TrialContext,
    partition_count: u32,
    partition_index: u32,
    plane2_component: Option<u8>,
    only_always_modes: bool,
    tmp: &mut ImageBlock,
    best: &mut SymbolicBlock,
    best_error: &mut f32,
) {
    let config = ctx.config;
    let bsd = ctx.bsd;
    let blk = ctx.blk;
    let ewb = ctx.ewb;
    let pi = bsd.partition_info(partition_count, partition_index);

    // Ideal endpoints and weights for this layout.
    let mut ei1 = EndpointsAndWeights::new();
    let mut ei2 = EndpointsAndWeights::new();
    if let Some(component) = plane2_component {
        compute_ideal_colors_and_weights_2planes(
            blk,
            ewb,
            pi,
            usize::from(component),
            &mut ei1,
            &mut ei2,
        );
    } else {
        compute_ideal_colors_and_weights_1plane(blk, ewb, pi, &mut ei1);
    }

    let ece = compute_encoding_choice_errors(blk, pi, ewb, &ei1.ep);

    // Cheap pass: score every eligible block mode by its weight-set error.
    let is_dual = plane2_component.is_some();
    let mode_limit = if only_always_modes {
        bsd.always_block_mode_count
    } else {
        bsd.block_modes.len()
    };

    let mut cache1 = DecimationCache::new(bsd.decimation_modes.len());
    let mut cache2 = DecimationCache::new(if is_dual { bsd.decimation_modes.len() } else { 0 });

    let limit = (config.tune_candidate_limit as usize).min(MAX_TRIAL_CANDIDATES);
    let mut candidates: Vec<ModeCandidate> = Vec::with_capacity(limit + 1);

    for packed_index in 0..mode_limit {
        let bm = &bsd.block_modes[packed_index];
        if bm.is_dual_plane != is_dual || !bm.percentile_hit {
            continue;
        }

        let dm = bsd.decimation_mode(bm.decimation_mode);
        let maxprec = if is_dual {
            dm.maxprec_2planes
        } else {
            dm.maxprec_1plane
        };
        if maxprec < 0 || (bm.quant_mode as i8) > maxprec {
            continue;
        }

        let di = bsd.decimation_info(bm.decimation_mode);
        let dm_index = bm.decimation_mode as usize;

        let mut uvalues1 = [0.0f32; 64];
        let mut pvalues1 = [0u8; 64];
        {
            let ideal1 = cache1.get(bsd, &ei1, dm_index);
            compute_quantized_weights_for_decimation(
                di,
                0.0,
                1.0,
                ideal1,
                &mut uvalues1,
                &mut pvalues1,
                bm.quant_mode,
            );
        }

        let error = if is_dual {
            let mut uvalues2 = [0.0f32; 64];
            let mut pvalues2 = [0u8; 64];
            let ideal2 = cache2.get(bsd, &ei2, dm_index);
            compute_quantized_weights_for_decimation(
                di,
                0.0,
                1.0,
                ideal2,
                &mut uvalues2,
                &mut pvalues2,
                bm.quant_mode,
            );
            compute_error_of_weight_set_2planes(&ei1, &ei2, di, &uvalues1, &uvalues2)
        } else {
            compute_error_of_weight_set_1plane(&ei1, di, &uvalues1)
        };

        push_candidate(
            &mut candidates,
            limit,
            ModeCandidate {
                packed_index: packed_index as u16,
                error,
            },
        );
    }

    // Full trial with format selection and refinement for the survivors.
    for cand in &candidates {
        let bm = bsd.block_mode(cand.packed_index);
        let di = bsd.decimation_info(bm.decimation_mode);
        let dm_index = bm.decimation_mode as usize;
        let weight_count = di.weight_count as usize;
        let stored_weights = weight_count * if is_dual { 2 } else { 1 };
        let weight_bits = bise::sequence_bitcount(stored_weights as u32, bm.quant_mode);

        let mut uvalues1 = [0.0f32; 64];
        let mut pvalues1 = [0u8; 64];
        let mut uvalues2 = [0.0f32; 64];
        let mut pvalues2 = [0u8; 64];
        {
            let ideal1 = cache1.get(bsd, &ei1, dm_index);
            compute_quantized_weights_for_decimation(
                di,
                0.0,
                1.0,
                ideal1,
                &mut uvalues1,
                &mut pvalues1,
                bm.quant_mode,
            );
        }
        if is_dual {
            let ideal2 = cache2.get(bsd, &ei2, dm_index);
            compute_quantized_weights_for_decimation(
                di,
                0.0,
                1.0,
                ideal2,
                &mut uvalues2,
                &mut pvalues2,
                bm.quant_mode,
            );
        }

        // Bit budget for endpoint values, assuming matched formats.
        let config_bits = if partition_count == 1 { 17 } else { 29 };
        let ccs_bits = if is_dual { 2 } else { 0 };
        let total_used = config_bits + ccs_bits + weight_bits;
        if total_used >= 128 {
            continue;
        }
        let color_bits_matched = 128 - total_used;

        let Some(choice) =
            choose_endpoint_formats(config.profile, pi, blk, &ece, color_bits_matched)
        else {
            continue;
        };

        // Refinement: pack, measure, re-derive endpoints from the actual
        // quantized weights, and stop as soon as a pass fails to improve.
        let mut ep = ei1.ep;
        if is_dual {
            // The two-plane solver splits endpoint ownership; plane 2's
            // component lives in ei2 but both agree by construction.
            ep.partition_count = 1;
        }
        let mut rgbs = [Vec4::ZERO; BLOCK_MAX_PARTITIONS];
        let mut rgbo = [Vec4::ZERO; BLOCK_MAX_PARTITIONS];
        for p in 0..partition_count as usize {
            let high = ep.endpt1[p];
            let low = ep.endpt0[p];
            let denom = (high.x * high.x + high.y * high.y + high.z * high.z).max(1e-10);
            let scale = ((low.x * high.x + low.y * high.y + low.z * high.z) / denom)
                .clamp(0.0, 1.0);
            rgbs[p] = Vec4::new(high.x, high.y, high.z, scale);
            let offset = ((high.x - low.x) + (high.y - low.y) + (high.z - low.z)) / 3.0;
            rgbo[p] = Vec4::new(high.x, high.y, high.z, offset.max(0.0));
        }

        for _ in 0..=config.tune_refinement_limit {
            let Some(scb) = pack_trial(
                config,
                partition_count,
                partition_index,
                bm.mode_index,
                plane2_component,
                color_bits_matched,
                &choice.formats,
                &ep,
                &rgbs,
                &rgbo,
                &pvalues1,
                &pvalues2,
                weight_count,
            ) else {
                break;
            };

            let error = compute_symbolic_block_error(config, bsd, &scb, blk, ewb, tmp);
            if error < *best_error {
                *best_error = error;
                let mut scb = scb;
                if let SymbolicBlock::NonConst(ref mut b) = scb {
                    b.errorval = error;
                }
                *best = scb;
            } else {
                break;
            }

            recompute_ideal_colors(
                blk,
                ewb,
                pi,
                di,
                &uvalues1,
                plane2_component.map(|c| (&uvalues2[..], c)),
                &mut ep,
                &mut rgbs,
                &mut rgbo,
            );
        }
    }
}

/// Packs one trial into a symbolic block. Returns `None` when the format
/// layout leaves no legal color quantization.
///
/// The color quant level is never stored explicitly; the decoder derives
/// it from the bit budget of the final layout. Single-partition packs may
/// therefore upgrade formats to their delta variants (same class, same
/// budget), while multi-partition packs must keep the requested formats so
/// the matched/unmatched budget stays as planned.
#[allow(clippy::too_many_arguments)]
fn pack_trial(
    config: &Config,
    partition_count: u32,
    partition_index: u32,
    mode_index: u16,
    plane2_component: Option<u8>,
    color_bits_matched: u32,
    formats: &[crate::color::EndpointFormat; BLOCK_MAX_PARTITIONS],
    ep: &Endpoints,
    rgbs: &[Vec4; BLOCK_MAX_PARTITIONS],
    rgbo: &[Vec4; BLOCK_MAX_PARTITIONS],
    pvalues1: &[u8; 64],
    pvalues2: &[u8; 64],
    weight_count: usize,
) -> Option<SymbolicBlock> {
    let extra_bits = if partition_count > 1 {
        3 * partition_count - 4
    } else {
        0
    };

    let matched = formats[..partition_count as usize]
        .iter()
        .all(|&f| f == formats[0]);
    let bits = if matched {
        color_bits_matched
    } else {
        color_bits_matched.checked_sub(extra_bits)?
    };
    let pairs: u32 = formats[..partition_count as usize]
        .iter()
        .map(|f| u32::from(f.class()) + 1)
        .sum();
    let quant = quant_mode_for_bits(pairs, bits)?;

    let allow_variants = partition_count == 1;
    let mut packed_formats = [crate::color::EndpointFormat::Luminance; BLOCK_MAX_PARTITIONS];
    let mut color_values = [[0u8; 8]; BLOCK_MAX_PARTITIONS];
    for p in 0..partition_count as usize {
        let (actual, values) = crate::color::pack_color_endpoints(
            config.profile,
            ep.endpt0[p],
            ep.endpt1[p],
            rgbs[p],
            rgbo[p],
            formats[p],
            quant,
            allow_variants,
        );
        debug_assert!(allow_variants || actual == formats[p]);
        packed_formats[p] = actual;
        color_values[p] = values;
    }

    let mut weights = [0u8; 64];
    weights[..weight_count].copy_from_slice(&pvalues1[..weight_count]);
    if plane2_component.is_some() {
        weights[WEIGHTS_PLANE2_OFFSET..WEIGHTS_PLANE2_OFFSET + weight_count]
            .copy_from_slice(&pvalues2[..weight_count]);
    }

    Some(SymbolicBlock::NonConst(Box::new(NonConstBlock {
        partition_count: partition_count as u8,
        partition_index: partition_index as u16,
        block_mode: mode_index,
        quant_mode: quant,
        color_formats: packed_formats,
        color_values,
        plane2_component,
        weights,
        errorval: 0.0,
    })))
}

/// Compresses one image block into symbolic form.
pub(crate) fn compress_block(
    config: &Config,
    bsd: &BlockSizeDescriptor,
    blk: &ImageBlock,
    ewb: &ErrorWeightBlock,
    tmpbuf: &mut CompressionWorkingBuffers,
) -> SymbolicBlock {
    // Constant-color blocks encode exactly.
    if blk.is_constant() {
        return if config.profile.is_hdr() {
            SymbolicBlock::ConstF16([
                float_to_sf16(blk.origin_texel.x),
                float_to_sf16(blk.origin_texel.y),
                float_to_sf16(blk.origin_texel.z),
                float_to_sf16(blk.origin_texel.w),
            ])
        } else {
            SymbolicBlock::ConstU16([
                (blk.data_r[0] + 0.5) as u16,
                (blk.data_g[0] + 0.5) as u16,
                (blk.data_b[0] + 0.5) as u16,
                (blk.data_a[0] + 0.5) as u16,
            ])
        };
    }

    let tmp = &mut tmpbuf.decode_scratch;
    let ctx = TrialContext {
        config,
        bsd,
        blk,
        ewb,
    };

    let mut best = SymbolicBlock::Error;
    let mut best_error = ERROR_CALC_DEFAULT;

    // Error target derived from the preset's dB limit; searching harder
    // than this buys nothing visible. The target scales with the block's
    // accumulated error weight so weighted and unweighted runs behave the
    // same.
    let texel_count = blk.texel_count as f32;
    let target_error = {
        let rms = 65535.0 / 10f32.powf(config.tune_db_limit / 20.0);
        let ws = ewb.block_error_weight_sum;
        let weight_scale = (ws.x + ws.y + ws.z + ws.w) / (4.0 * texel_count);
        rms * rms * texel_count * weight_scale
    };

    // 1 partition, 1 plane.
    trial_partitioning(&ctx, 1, 0, None, false, tmp, &mut best, &mut best_error);
    if best_error < target_error {
        return best;
    }

    // 1 partition, 2 planes. Components are tried in order of decreasing
    // range; the preset decides how many are worth visiting.
    let range = blk.data_max - blk.data_min;
    let mut components = [0u8, 1, 2, 3];
    components.sort_by(|&a, &b| {
        let ra = [range.x, range.y, range.z, range.w][a as usize];
        let rb = [range.x, range.y, range.z, range.w][b as usize];
        rb.total_cmp(&ra)
    });
    let plane2_trials = (config.tune_two_plane_early_limit * 4.0).round().max(1.0) as usize;

    for &component in components.iter().take(plane2_trials) {
        if blk.grayscale && component < 3 {
            continue;
        }
        if blk.is_constant_channel(component as usize) {
            continue;
        }
        trial_partitioning(
            &ctx,
            1,
            0,
            Some(component),
            false,
            tmp,
            &mut best,
            &mut best_error,
        );
        if best_error < target_error {
            return best;
        }
    }

    // 2..4 partitions, 1 plane. The fastest presets only sweep the
    // always-enabled mode prefix for the higher partition counts, and all
    // presets give up on 3 and 4 partitions when 2 could not keep pace
    // with the single-partition encoding.
    let one_partition_error = best_error;
    for partition_count in 2..=4u32 {
        let only_always = partition_count >= 3 && config.tune_partition_limit <= 8;
        let (best_uncor, best_samec) = find_best_partition_candidates(
            bsd,
            blk,
            ewb,
            partition_count,
            config.tune_partition_limit,
        );

        trial_partitioning(
            &ctx,
            partition_count,
            best_uncor,
            None,
            only_always,
            tmp,
            &mut best,
            &mut best_error,
        );
        if best_samec != best_uncor {
            trial_partitioning(
                &ctx,
                partition_count,
                best_samec,
                None,
                only_always,
                tmp,
                &mut best,
                &mut best_error,
            );
        }
        if best_error < target_error {
            return best;
        }
        if partition_count == 2 {
            let improvement = one_partition_error - best_error;
            if improvement * config.tune_partition_early_limit < one_partition_error * 0.05 {
                break;
            }
        }
    }

    // A single-partition class-0 encoding always fits, so the search can
    // never come up empty.
    debug_assert!(!best.is_error());
    best
}
