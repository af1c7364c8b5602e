//! Weight-grid decimation tables.
//!
//! ASTC can store weights on a grid coarser than the texel grid; each texel
//! weight is then rebuilt by interpolating up to four stored weights with
//! integer factors that sum to 16. The factor computation is part of the wire
//! format. Tables here also carry the weight-to-texel transpose used by the
//! ideal-weight solver when it projects texel weights back onto the grid.

use crate::block_size::{BLOCK_MAX_TEXELS, BLOCK_MAX_WEIGHTS};

/// Sum of the integer interpolation factors for one texel.
pub(crate) const WEIGHTS_TEXEL_SUM: u32 = 16;

/// Interpolation tables for a single weight-grid shape within one block
/// footprint.
pub(crate) struct DecimationInfo {
    pub texel_count: u8,
    pub weight_count: u8,
    pub weight_x: u8,
    pub weight_y: u8,
    pub weight_z: u8,

    /// How many stored weights contribute to each texel (1..=4).
    pub texel_weight_count: [u8; BLOCK_MAX_TEXELS],
    /// The grid indices of the contributing weights, per tap. Unused taps
    /// point at weight 0 with factor 0.
    pub texel_weights_4t: [[u8; BLOCK_MAX_TEXELS]; 4],
    /// The integer interpolation factor per tap, `0..=16`.
    pub texel_weights_int_4t: [[u8; BLOCK_MAX_TEXELS]; 4],
    /// The same factors as floats in `0..=1`.
    pub texel_weights_float_4t: [[f32; BLOCK_MAX_TEXELS]; 4],

    /// How many texels each stored weight contributes to.
    pub weight_texel_count: [u8; BLOCK_MAX_WEIGHTS],
    /// The texels each stored weight contributes to.
    pub weight_texels: [[u8; BLOCK_MAX_TEXELS]; BLOCK_MAX_WEIGHTS],
    /// The contribution factor of the weight for each of those texels.
    pub weights_texel_contrib: [[f32; BLOCK_MAX_TEXELS]; BLOCK_MAX_WEIGHTS],
}

impl DecimationInfo {
    fn new(texel_count: u8, wx: u8, wy: u8, wz: u8) -> Box<Self> {
        Box::new(DecimationInfo {
            texel_count,
            weight_count: wx * wy * wz,
            weight_x: wx,
            weight_y: wy,
            weight_z: wz,
            texel_weight_count: [0; BLOCK_MAX_TEXELS],
            texel_weights_4t: [[0; BLOCK_MAX_TEXELS]; 4],
            texel_weights_int_4t: [[0; BLOCK_MAX_TEXELS]; 4],
            texel_weights_float_4t: [[0.0; BLOCK_MAX_TEXELS]; 4],
            weight_texel_count: [0; BLOCK_MAX_WEIGHTS],
            weight_texels: [[0; BLOCK_MAX_TEXELS]; BLOCK_MAX_WEIGHTS],
            weights_texel_contrib: [[0.0; BLOCK_MAX_TEXELS]; BLOCK_MAX_WEIGHTS],
        })
    }

    /// Whether the grid stores one weight per texel.
    pub fn is_direct(&self) -> bool {
        self.texel_count == self.weight_count
    }

    /// Interpolates the weight for `texel` from decimated grid `weights`.
    #[inline]
    pub fn infill(&self, weights: &[f32], texel: usize) -> f32 {
        (weights[self.texel_weights_4t[0][texel] as usize] * self.texel_weights_float_4t[0][texel]
            + weights[self.texel_weights_4t[1][texel] as usize]
                * self.texel_weights_float_4t[1][texel])
            + (weights[self.texel_weights_4t[2][texel] as usize]
                * self.texel_weights_float_4t[2][texel]
                + weights[self.texel_weights_4t[3][texel] as usize]
                    * self.texel_weights_float_4t[3][texel])
    }

    /// Integer infill used by the decoder, with `0..=64` grid weights.
    #[inline]
    pub fn infill_int(&self, weights: &[i32], texel: usize) -> i32 {
        let sum = weights[self.texel_weights_4t[0][texel] as usize]
            * i32::from(self.texel_weights_int_4t[0][texel])
            + weights[self.texel_weights_4t[1][texel] as usize]
                * i32::from(self.texel_weights_int_4t[1][texel])
            + weights[self.texel_weights_4t[2][texel] as usize]
                * i32::from(self.texel_weights_int_4t[2][texel])
            + weights[self.texel_weights_4t[3][texel] as usize]
                * i32::from(self.texel_weights_int_4t[3][texel]);
        (sum + 8) >> 4
    }

    fn push_texel_weight(&mut self, texel: usize, grid_index: u8, factor: u8) {
        if factor == 0 {
            return;
        }
        let tap = self.texel_weight_count[texel] as usize;
        debug_assert!(tap < 4);
        self.texel_weights_4t[tap][texel] = grid_index;
        self.texel_weights_int_4t[tap][texel] = factor;
        self.texel_weights_float_4t[tap][texel] = f32::from(factor) / WEIGHTS_TEXEL_SUM as f32;
        self.texel_weight_count[texel] = tap as u8 + 1;

        let w = grid_index as usize;
        let slot = self.weight_texel_count[w] as usize;
        self.weight_texels[w][slot] = texel as u8;
        self.weights_texel_contrib[w][slot] = f32::from(factor) / WEIGHTS_TEXEL_SUM as f32;
        self.weight_texel_count[w] = slot as u8 + 1;
    }
}

/// The position of texel `pos` on an `n`-point weight grid for a block
/// dimension of `dim` texels, as an `int.4` fixed-point value.
fn grid_position(dim: u32, n: u32, pos: u32) -> u32 {
    let scale = (1024 + dim / 2) / (dim - 1);
    (scale * pos * (n - 1) + 32) >> 6
}

/// Builds the decimation tables for a 2D weight grid.
pub(crate) fn build_decimation_info_2d(
    xdim: u32,
    ydim: u32,
    x_weights: u32,
    y_weights: u32,
) -> Box<DecimationInfo> {
    debug_assert!(x_weights >= 2 && x_weights <= xdim);
    debug_assert!(y_weights >= 2 && y_weights <= ydim);
    debug_assert!(x_weights * y_weights <= BLOCK_MAX_WEIGHTS as u32);

    let texel_count = (xdim * ydim) as u8;
    let mut di = DecimationInfo::new(texel_count, x_weights as u8, y_weights as u8, 1);

    for y in 0..ydim {
        for x in 0..xdim {
            let texel = (y * xdim + x) as usize;

            let xw = grid_position(xdim, x_weights, x);
            let yw = grid_position(ydim, y_weights, y);
            let x_int = xw >> 4;
            let y_int = yw >> 4;
            let x_frac = xw & 0xF;
            let y_frac = yw & 0xF;

            let base = y_int * x_weights + x_int;
            let qweights = [base, base + 1, base + x_weights, base + x_weights + 1];

            let w11 = (x_frac * y_frac + 8) >> 4;
            let factors = [
                WEIGHTS_TEXEL_SUM as i32 - x_frac as i32 - y_frac as i32 + w11 as i32,
                x_frac as i32 - w11 as i32,
                y_frac as i32 - w11 as i32,
                w11 as i32,
            ];

            for (&qw, &factor) in qweights.iter().zip(&factors) {
                debug_assert!(factor >= 0);
                di.push_texel_weight(texel, qw as u8, factor as u8);
            }
            // Texels landing exactly on a grid point use fewer than four
            // taps; the unused slots stay at weight 0 with factor 0.
            debug_assert!(di.texel_weight_count[texel] >= 1);
        }
    }

    di
}

/// Builds the decimation tables for a 3D weight grid.
///
/// The 3D infill is a simplex interpolation: the three fractional offsets
/// are ranked and converted into four taps along the dominant corner path.
pub(crate) fn build_decimation_info_3d(
    xdim: u32,
    ydim: u32,
    zdim: u32,
    x_weights: u32,
    y_weights: u32,
    z_weights: u32,
) -> Box<DecimationInfo> {
    debug_assert!(x_weights * y_weights * z_weights <= BLOCK_MAX_WEIGHTS as u32);

    let texel_count = (xdim * ydim * zdim) as u8;
    let mut di = DecimationInfo::new(
        texel_count,
        x_weights as u8,
        y_weights as u8,
        z_weights as u8,
    );

    for z in 0..zdim {
        for y in 0..ydim {
            for x in 0..xdim {
                let texel = ((z * ydim + y) * xdim + x) as usize;

                let xw = grid_position(xdim, x_weights, x);
                let yw = grid_position(ydim, y_weights, y);
                let zw = grid_position(zdim, z_weights, z);
                let x_int = xw >> 4;
                let y_int = yw >> 4;
                let z_int = zw >> 4;
                let fs = xw & 0xF;
                let ft = yw & 0xF;
                let fp = zw & 0xF;

                let base = (z_int * y_weights + y_int) * x_weights + x_int;
                let step_x = 1;
                let step_y = x_weights;
                let step_z = x_weights * y_weights;

                // Rank the fractional offsets to pick the simplex corners.
                // Ties go to the later axis, matching the format's strict
                // greater-than comparisons.
                let mut order = [(fs, 0u32, step_x), (ft, 1, step_y), (fp, 2, step_z)];
                order.sort_by(|a, b| (b.0, b.1).cmp(&(a.0, a.1)));
                let (f1, _, s1) = order[0];
                let (f2, _, s2) = order[1];
                let (f3, _, s3) = order[2];

                let qweights = [base, base + s1, base + s1 + s2, base + s1 + s2 + s3];
                let factors = [WEIGHTS_TEXEL_SUM - f1, f1 - f2, f2 - f3, f3];

                for (&qw, &factor) in qweights.iter().zip(&factors) {
                    di.push_texel_weight(texel, qw as u8, factor as u8);
                }
                debug_assert!(di.texel_weight_count[texel] >= 1);
            }
        }
    }

    di
}
