//! Weight decimation and quantization.
//!
//! Once ideal per-texel weights exist, a candidate block mode needs them
//! expressed on its decimated grid and quantized to its weight alphabet.
//! The grid solve starts from a reverse bilinear average and then walks
//! each grid weight toward its target while the weighted L2 error keeps
//! dropping.

use crate::block_size::BLOCK_MAX_WEIGHTS;
use crate::decimation::DecimationInfo;
use crate::ideal::EndpointsAndWeights;
use crate::quant::{weight_tables, QuantMethod};

/// Step size for the grid refinement walk, in ideal-weight units.
const REFINE_STEP: f32 = 0.25 / 64.0 * 16.0;

/// Maximum refinement sweeps; the walk normally stalls much earlier.
const REFINE_MAX_SWEEPS: u32 = 4;

/// Computes ideal (still unquantized) weights for a decimated grid.
///
/// `dec_weight_ideal_value` receives one weight per grid point in `[0, 1]`;
/// `dec_weight_ideal_sig` the accumulated significance of each grid point.
pub(crate) fn compute_ideal_weights_for_decimation(
    eai: &EndpointsAndWeights,
    di: &DecimationInfo,
    dec_weight_ideal_value: &mut [f32],
    dec_weight_ideal_sig: &mut [f32],
) {
    let weight_count = di.weight_count as usize;
    debug_assert!(weight_count <= BLOCK_MAX_WEIGHTS);
    debug_assert!(dec_weight_ideal_value.len() >= weight_count);

    // Direct grids copy straight through.
    if di.is_direct() {
        for texel in 0..di.texel_count as usize {
            dec_weight_ideal_value[texel] = eai.weights[texel];
            dec_weight_ideal_sig[texel] = eai.weight_error_scale[texel];
        }
        return;
    }

    // Initial estimate: significance-weighted average of the ideal weights
    // of every texel this grid point contributes to.
    for w in 0..weight_count {
        let mut weight_sum = 1e-10f32;
        let mut value_sum = 0.0f32;
        for slot in 0..di.weight_texel_count[w] as usize {
            let texel = di.weight_texels[w][slot] as usize;
            let contrib = di.weights_texel_contrib[w][slot];
            let sig = contrib * eai.weight_error_scale[texel];
            weight_sum += sig;
            value_sum += sig * eai.weights[texel];
        }
        dec_weight_ideal_value[w] = value_sum / weight_sum;
        dec_weight_ideal_sig[w] = weight_sum;
    }

    // Refinement: nudge each grid weight toward lower global error. Only
    // the texels touching the weight change, so the error delta is local.
    let mut infill = [0.0f32; crate::block_size::BLOCK_MAX_TEXELS];
    for texel in 0..di.texel_count as usize {
        infill[texel] = di.infill(&dec_weight_ideal_value[..weight_count], texel);
    }

    for _ in 0..REFINE_MAX_SWEEPS {
        let mut improved = false;

        for w in 0..weight_count {
            let current = dec_weight_ideal_value[w];

            let mut best_step = 0.0f32;
            let mut best_delta = 0.0f32;
            for step in [REFINE_STEP, -REFINE_STEP] {
                let candidate = (current + step).clamp(0.0, 1.0);
                if candidate == current {
                    continue;
                }
                let actual_step = candidate - current;

                let mut delta = 0.0f32;
                for slot in 0..di.weight_texel_count[w] as usize {
                    let texel = di.weight_texels[w][slot] as usize;
                    let contrib = di.weights_texel_contrib[w][slot];
                    let old_err = infill[texel] - eai.weights[texel];
                    let new_err = old_err + actual_step * contrib;
                    delta +=
                        (new_err * new_err - old_err * old_err) * eai.weight_error_scale[texel];
                }
                if delta < best_delta {
                    best_delta = delta;
                    best_step = actual_step;
                }
            }

            if best_step != 0.0 {
                dec_weight_ideal_value[w] = current + best_step;
                for slot in 0..di.weight_texel_count[w] as usize {
                    let texel = di.weight_texels[w][slot] as usize;
                    infill[texel] += best_step * di.weights_texel_contrib[w][slot];
                }
                improved = true;
            }
        }

        if !improved {
            break;
        }
    }
}

/// Quantizes a decimated weight set.
///
/// Each weight is scaled to the `[0, 64]` quantization domain and snapped
/// to the closer of its two neighboring representable levels. Outputs the
/// unquantized result as a float in `[0, 1]` (what the decoder will see)
/// and the packed value for the bit stream.
pub(crate) fn compute_quantized_weights_for_decimation(
    di: &DecimationInfo,
    low_bound: f32,
    high_bound: f32,
    dec_weight_ideal_value: &[f32],
    dec_weight_quant_uvalue: &mut [f32],
    dec_weight_quant_pvalue: &mut [u8],
    quant_level: QuantMethod,
) {
    debug_assert!((quant_level as usize) < crate::quant::WEIGHT_QUANT_COUNT);
    let table = &weight_tables()[quant_level as usize];
    let weight_count = di.weight_count as usize;

    let low = low_bound.min(high_bound);
    let range = (high_bound - low).max(1e-10);
    let scale = 64.0 / range;

    for w in 0..weight_count {
        let scaled = (dec_weight_ideal_value[w] - low) * scale;
        let (pvalue, uvalue) = table.quantize(scaled);
        dec_weight_quant_pvalue[w] = pvalue;
        dec_weight_quant_uvalue[w] = f32::from(uvalue) * (1.0 / 64.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimation::build_decimation_info_2d;
    use crate::ideal::EndpointsAndWeights;

    fn ramp_ideal(texel_count: usize) -> EndpointsAndWeights {
        let mut eai = EndpointsAndWeights::new();
        for t in 0..texel_count {
            eai.weights[t] = t as f32 / (texel_count - 1) as f32;
            eai.weight_error_scale[t] = 1.0;
        }
        eai
    }

    #[test]
    fn direct_grid_copies_weights() {
        let di = build_decimation_info_2d(4, 4, 4, 4);
        let eai = ramp_ideal(16);
        let mut values = [0.0f32; 64];
        let mut sigs = [0.0f32; 64];
        compute_ideal_weights_for_decimation(&eai, &di, &mut values, &mut sigs);
        for t in 0..16 {
            assert_eq!(values[t], eai.weights[t]);
        }
    }

    #[test]
    fn decimated_solve_tracks_ramp() {
        let di = build_decimation_info_2d(8, 8, 4, 4);
        let mut eai = EndpointsAndWeights::new();
        for y in 0..8 {
            for x in 0..8 {
                eai.weights[y * 8 + x] = x as f32 / 7.0;
                eai.weight_error_scale[y * 8 + x] = 1.0;
            }
        }
        let mut values = [0.0f32; 64];
        let mut sigs = [0.0f32; 64];
        compute_ideal_weights_for_decimation(&eai, &di, &mut values, &mut sigs);

        // Grid columns must be ascending, endpoints near 0 and 1.
        for gy in 0..4 {
            let row = &values[gy * 4..gy * 4 + 4];
            assert!(row.windows(2).all(|w| w[1] >= w[0] - 1e-5), "{row:?}");
            assert!(row[0] < 0.1);
            assert!(row[3] > 0.9);
        }
    }

    #[test]
    fn refinement_does_not_increase_error() {
        let di = build_decimation_info_2d(6, 6, 3, 3);
        let mut eai = EndpointsAndWeights::new();
        for t in 0..36 {
            // A wavy pattern the coarse grid cannot represent exactly.
            eai.weights[t] = 0.5 + 0.5 * ((t as f32) * 0.7).sin();
            eai.weight_error_scale[t] = 1.0 + (t % 3) as f32;
        }

        let mut values = [0.0f32; 64];
        let mut sigs = [0.0f32; 64];
        compute_ideal_weights_for_decimation(&eai, &di, &mut values, &mut sigs);
        let refined_err = crate::ideal::compute_error_of_weight_set_1plane(&eai, &di, &values);

        // Compare against the plain averaging estimate without refinement.
        let mut naive = [0.0f32; 64];
        for w in 0..di.weight_count as usize {
            let mut weight_sum = 1e-10f32;
            let mut value_sum = 0.0f32;
            for slot in 0..di.weight_texel_count[w] as usize {
                let texel = di.weight_texels[w][slot] as usize;
                let sig = di.weights_texel_contrib[w][slot] * eai.weight_error_scale[texel];
                weight_sum += sig;
                value_sum += sig * eai.weights[texel];
            }
            naive[w] = value_sum / weight_sum;
        }
        let naive_err = crate::ideal::compute_error_of_weight_set_1plane(&eai, &di, &naive);

        assert!(refined_err <= naive_err + 1e-6);
    }

    #[test]
    fn quantization_emits_matching_pairs() {
        let di = build_decimation_info_2d(4, 4, 4, 4);
        let eai = ramp_ideal(16);
        let mut values = [0.0f32; 64];
        let mut sigs = [0.0f32; 64];
        compute_ideal_weights_for_decimation(&eai, &di, &mut values, &mut sigs);

        let mut uvalues = [0.0f32; 64];
        let mut pvalues = [0u8; 64];
        compute_quantized_weights_for_decimation(
            &di,
            0.0,
            1.0,
            &values,
            &mut uvalues,
            &mut pvalues,
            QuantMethod::Q6,
        );

        let table = &weight_tables()[QuantMethod::Q6 as usize];
        for w in 0..16 {
            assert!(pvalues[w] < 6);
            let expect = f32::from(table.unquant[pvalues[w] as usize]) / 64.0;
            assert_eq!(uvalues[w], expect);
            // Nearest-level error is at most half the largest step.
            assert!((uvalues[w] - values[w]).abs() <= 7.0 / 64.0);
        }
    }
}
