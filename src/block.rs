//! Per-block working data.

use glam::Vec4;

use crate::block_size::{BlockSizeDescriptor, BLOCK_MAX_TEXELS};
use crate::config::{Config, Flags};

/// One block of texels in structure-of-arrays float form.
///
/// LDR data lives in `[0, 65535]` as scaled UNORM; HDR data uses the
/// log representation over the same range. The `*_lns` flags record which
/// representation each texel uses; during compression they are uniform
/// across the block, during decompression they can vary per texel.
pub(crate) struct ImageBlock {
    pub data_r: [f32; BLOCK_MAX_TEXELS],
    pub data_g: [f32; BLOCK_MAX_TEXELS],
    pub data_b: [f32; BLOCK_MAX_TEXELS],
    pub data_a: [f32; BLOCK_MAX_TEXELS],

    /// The unscaled input of texel 0, used for constant-color encoding.
    pub origin_texel: Vec4,
    pub data_min: Vec4,
    pub data_max: Vec4,
    /// Whether `R == G == B` for every texel.
    pub grayscale: bool,

    pub rgb_lns: [bool; BLOCK_MAX_TEXELS],
    pub alpha_lns: [bool; BLOCK_MAX_TEXELS],

    /// When set, the data arrays hold final component values rather than
    /// the scaled working domain (used by FP16 constant blocks, which can
    /// carry values the working domain cannot).
    pub data_is_decoded: bool,

    pub xpos: u32,
    pub ypos: u32,
    pub zpos: u32,
    pub texel_count: u8,
}

impl ImageBlock {
    pub fn new() -> Self {
        ImageBlock {
            data_r: [0.0; BLOCK_MAX_TEXELS],
            data_g: [0.0; BLOCK_MAX_TEXELS],
            data_b: [0.0; BLOCK_MAX_TEXELS],
            data_a: [0.0; BLOCK_MAX_TEXELS],
            origin_texel: Vec4::ZERO,
            data_min: Vec4::ZERO,
            data_max: Vec4::ZERO,
            grayscale: false,
            rgb_lns: [false; BLOCK_MAX_TEXELS],
            alpha_lns: [false; BLOCK_MAX_TEXELS],
            data_is_decoded: false,
            xpos: 0,
            ypos: 0,
            zpos: 0,
            texel_count: 0,
        }
    }

    /// The RGBA value of one texel.
    #[inline]
    pub fn texel(&self, index: usize) -> Vec4 {
        Vec4::new(
            self.data_r[index],
            self.data_g[index],
            self.data_b[index],
            self.data_a[index],
        )
    }

    /// Whether a component has the same value in every texel.
    pub fn is_constant_channel(&self, channel: usize) -> bool {
        match channel {
            0 => self.data_min.x == self.data_max.x,
            1 => self.data_min.y == self.data_max.y,
            2 => self.data_min.z == self.data_max.z,
            _ => self.data_min.w == self.data_max.w,
        }
    }

    /// Whether the whole block is one color.
    pub fn is_constant(&self) -> bool {
        self.data_min == self.data_max
    }
}

/// Per-texel, per-component error weights for one block.
pub(crate) struct ErrorWeightBlock {
    pub error_weights: [Vec4; BLOCK_MAX_TEXELS],
    /// The mean of the four component weights, the scalar significance used
    /// by the weight solvers.
    pub texel_weight: [f32; BLOCK_MAX_TEXELS],
    /// Sum of all component weights, used to scale block-level error
    /// thresholds.
    pub block_error_weight_sum: Vec4,
}

impl ErrorWeightBlock {
    pub fn new() -> Self {
        ErrorWeightBlock {
            error_weights: [Vec4::ZERO; BLOCK_MAX_TEXELS],
            texel_weight: [0.0; BLOCK_MAX_TEXELS],
            block_error_weight_sum: Vec4::ZERO,
        }
    }

    /// Mean error weight over the three components other than `omitted`.
    #[inline]
    pub fn texel_weight_omitting(&self, texel: usize, omitted: usize) -> f32 {
        let w = self.error_weights[texel];
        let sum = w.x + w.y + w.z + w.w;
        let lane = match omitted {
            0 => w.x,
            1 => w.y,
            2 => w.z,
            _ => w.w,
        };
        (sum - lane) * (1.0 / 3.0)
    }

    /// Error weight of a single component.
    #[inline]
    pub fn channel_weight(&self, texel: usize, channel: usize) -> f32 {
        let w = self.error_weights[texel];
        match channel {
            0 => w.x,
            1 => w.y,
            2 => w.z,
            _ => w.w,
        }
    }
}

/// Per-texel deblocking weights for a block footprint.
///
/// Texels close to the block edge receive extra significance so that block
/// seams stay less visible. A zero configuration weight yields all-ones.
pub(crate) fn expand_deblock_weights(config: &Config, bsd: &BlockSizeDescriptor) -> Vec<f32> {
    let xdim = bsd.xdim as u32;
    let ydim = bsd.ydim as u32;
    let zdim = bsd.zdim as u32;

    let mut weights = Vec::with_capacity(bsd.texel_count as usize);
    if config.b_deblock_weight <= 0.0 {
        weights.resize(bsd.texel_count as usize, 1.0);
        return weights;
    }

    let center_x = (xdim - 1) as f32 * 0.5;
    let center_y = (ydim - 1) as f32 * 0.5;
    let center_z = (zdim - 1) as f32 * 0.5;

    for z in 0..zdim {
        for y in 0..ydim {
            for x in 0..xdim {
                let dx = (x as f32 - center_x) / xdim as f32;
                let dy = (y as f32 - center_y) / ydim as f32;
                let dz = if zdim > 1 {
                    (z as f32 - center_z) / zdim as f32
                } else {
                    0.0
                };
                let dist = (dx * dx + dy * dy + dz * dz).sqrt() * 2.0;
                weights.push(1.0 + config.b_deblock_weight * dist * dist);
            }
        }
    }
    weights
}

/// Optional per-block context from the image pre-pass.
pub(crate) struct BlockInputModifiers<'a> {
    /// Local RGBA average per texel, in block texel order.
    pub averages: Option<&'a [Vec4]>,
    /// Local RGBA variance per texel, in block texel order.
    pub variances: Option<&'a [Vec4]>,
    /// Local alpha average per texel, in block texel order.
    pub alpha_averages: Option<&'a [f32]>,
}

impl BlockInputModifiers<'_> {
    pub const NONE: BlockInputModifiers<'static> = BlockInputModifiers {
        averages: None,
        variances: None,
        alpha_averages: None,
    };
}

/// Computes the error-weight block for one image block.
pub(crate) fn compute_error_weights(
    config: &Config,
    blk: &ImageBlock,
    deblock: &[f32],
    modifiers: &BlockInputModifiers,
) -> ErrorWeightBlock {
    let mut ewb = ErrorWeightBlock::new();
    let texel_count = blk.texel_count as usize;

    let channel_weights = Vec4::new(
        config.cw_r_weight,
        config.cw_g_weight,
        config.cw_b_weight,
        config.cw_a_weight,
    );

    let mut weight_sum = Vec4::ZERO;

    for i in 0..texel_count {
        let mut w = channel_weights * deblock[i];

        if config.flags.contains(Flags::USE_PERCEPTUAL) {
            if let (Some(variances), Some(averages)) = (modifiers.variances, modifiers.averages) {
                // Flat regions show artifacts first, so weight them up in
                // inverse proportion to the local contrast (stdev relative
                // to the local mean).
                let stdev = variances[i].max(Vec4::ZERO).powf(0.5);
                let mean = averages[i].abs() + Vec4::splat(0.05);
                let damp = (Vec4::ONE + stdev / mean * 4.0).recip();
                w *= damp;
            }
        }

        if config.flags.contains(Flags::USE_ALPHA_WEIGHT) {
            let alpha = match modifiers.alpha_averages {
                Some(averages) => averages[i],
                None => blk.data_a[i],
            };
            let scale = (alpha / 65535.0).clamp(0.05, 1.0);
            w = Vec4::new(w.x * scale, w.y * scale, w.z * scale, w.w);
        }

        ewb.error_weights[i] = w;
        ewb.texel_weight[i] = (w.x + w.y + w.z + w.w) * 0.25;
        weight_sum += w;
    }

    ewb.block_error_weight_sum = weight_sum;
    ewb
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Preset, Profile};

    fn test_config() -> Config {
        Config::new(Profile::Ldr, 4, 4, 1, Preset::Medium).unwrap()
    }

    #[test]
    fn uniform_weights_without_options() {
        let config = test_config();
        let bsd = BlockSizeDescriptor::new(4, 4, 1, true, 0.5);
        let deblock = expand_deblock_weights(&config, &bsd);
        assert!(deblock.iter().all(|&w| w == 1.0));

        let mut blk = ImageBlock::new();
        blk.texel_count = 16;
        let ewb = compute_error_weights(&config, &blk, &deblock, &BlockInputModifiers::NONE);
        for i in 0..16 {
            assert_eq!(ewb.error_weights[i], Vec4::ONE);
            assert_eq!(ewb.texel_weight[i], 1.0);
        }
    }

    #[test]
    fn deblock_boosts_edges() {
        let mut config = test_config();
        config.b_deblock_weight = 1.0;
        let bsd = BlockSizeDescriptor::new(4, 4, 1, true, 0.5);
        let deblock = expand_deblock_weights(&config, &bsd);
        // Corner texel 0 gets more weight than a center texel.
        assert!(deblock[0] > deblock[5]);
        assert!(deblock.iter().all(|&w| w >= 1.0));
    }

    #[test]
    fn subset_weight_helpers() {
        let mut ewb = ErrorWeightBlock::new();
        ewb.error_weights[3] = Vec4::new(1.0, 2.0, 3.0, 4.0);
        assert!((ewb.texel_weight_omitting(3, 3) - 2.0).abs() < 1e-6);
        assert!((ewb.texel_weight_omitting(3, 0) - 3.0).abs() < 1e-6);
        assert_eq!(ewb.channel_weight(3, 2), 3.0);
    }
}
