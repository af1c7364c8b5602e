//! Regional averages and variances.
//!
//! A pre-pass over the whole image computes, for every texel, the local
//! RGBA average and variance inside a box kernel, plus an alpha-only
//! average with its own radius. The results feed the perceptual and
//! alpha-scaled error weighting during compression. Sums come from a
//! summed-area table, so the cost is independent of the kernel radius.

use glam::Vec4;

use crate::config::Swizzle;
use crate::image::{apply_swizzle, ImageView};

/// Per-texel outputs of the pre-pass, in image raster order.
pub(crate) struct InputAverages {
    pub averages: Vec<Vec4>,
    pub variances: Vec<Vec4>,
    pub alpha_averages: Vec<f32>,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

/// Summed-area table over one Z slice, with one guard row and column.
struct SummedArea {
    sums: Vec<Vec4>,
    sq_sums: Vec<Vec4>,
    width: usize,
}

impl SummedArea {
    fn build(img: &ImageView, z: u32, swz: Swizzle) -> Self {
        let w = img.width() as usize;
        let h = img.height() as usize;
        let stride = w + 1;
        let mut sums = vec![Vec4::ZERO; stride * (h + 1)];
        let mut sq_sums = vec![Vec4::ZERO; stride * (h + 1)];

        for y in 0..h {
            let mut row = Vec4::ZERO;
            let mut row_sq = Vec4::ZERO;
            for x in 0..w {
                let t = apply_swizzle(img.texel(x as u32, y as u32, z), swz);
                row += t;
                row_sq += t * t;
                let i = (y + 1) * stride + (x + 1);
                sums[i] = sums[i - stride] + row;
                sq_sums[i] = sq_sums[i - stride] + row_sq;
            }
        }

        SummedArea {
            sums,
            sq_sums,
            width: w,
        }
    }

    /// Box sums over the half-open rectangle `[x0, x1) x [y0, y1)`.
    fn query(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> (Vec4, Vec4) {
        let stride = self.width + 1;
        let a = y0 * stride + x0;
        let b = y0 * stride + x1;
        let c = y1 * stride + x0;
        let d = y1 * stride + x1;
        (
            self.sums[d] - self.sums[b] - self.sums[c] + self.sums[a],
            self.sq_sums[d] - self.sq_sums[b] - self.sq_sums[c] + self.sq_sums[a],
        )
    }
}

/// Computes the pre-pass for the whole image.
///
/// 3D images filter each Z slice independently; the alpha radius may
/// differ from the RGBA radius. A radius of zero yields the texel itself,
/// which keeps the downstream weighting code uniform.
pub(crate) fn compute_averages_and_variances(
    img: &ImageView,
    avg_var_radius: u32,
    alpha_radius: u32,
    swz: Swizzle,
) -> InputAverages {
    let w = img.width() as usize;
    let h = img.height() as usize;
    let d = img.depth() as usize;
    let texels = w * h * d;

    let mut out = InputAverages {
        averages: vec![Vec4::ZERO; texels],
        variances: vec![Vec4::ZERO; texels],
        alpha_averages: vec![0.0; texels],
        width: img.width(),
        height: img.height(),
        depth: img.depth(),
    };

    for z in 0..d {
        let table = SummedArea::build(img, z as u32, swz);
        let slice_base = z * w * h;

        for y in 0..h {
            for x in 0..w {
                let i = slice_base + y * w + x;

                // Kernel window clamped to the image bounds.
                let r = avg_var_radius as usize;
                let x0 = x.saturating_sub(r);
                let y0 = y.saturating_sub(r);
                let x1 = (x + r + 1).min(w);
                let y1 = (y + r + 1).min(h);
                let count = ((x1 - x0) * (y1 - y0)) as f32;

                let (sum, sq_sum) = table.query(x0, y0, x1, y1);
                let avg = sum / count;
                let var = (sq_sum / count - avg * avg).max(Vec4::ZERO);
                out.averages[i] = avg;
                out.variances[i] = var;

                let ra = alpha_radius as usize;
                let ax0 = x.saturating_sub(ra);
                let ay0 = y.saturating_sub(ra);
                let ax1 = (x + ra + 1).min(w);
                let ay1 = (y + ra + 1).min(h);
                let acount = ((ax1 - ax0) * (ay1 - ay0)) as f32;
                let (asum, _) = table.query(ax0, ay0, ax1, ay1);
                out.alpha_averages[i] = asum.w / acount;
            }
        }
    }

    out
}

impl InputAverages {
    /// Gathers per-texel values for one block, clamping coordinates at the
    /// image edge like the block fetch does.
    #[allow(clippy::too_many_arguments)]
    pub fn gather_block(
        &self,
        xpos: u32,
        ypos: u32,
        zpos: u32,
        xdim: u32,
        ydim: u32,
        zdim: u32,
        averages: &mut Vec<Vec4>,
        variances: &mut Vec<Vec4>,
        alpha_averages: &mut Vec<f32>,
    ) {
        averages.clear();
        variances.clear();
        alpha_averages.clear();
        for bz in 0..zdim {
            let z = (zpos + bz).min(self.depth - 1) as usize;
            for by in 0..ydim {
                let y = (ypos + by).min(self.height - 1) as usize;
                for bx in 0..xdim {
                    let x = (xpos + bx).min(self.width - 1) as usize;
                    let i = (z * self.height as usize + y) * self.width as usize + x;
                    averages.push(self.averages[i]);
                    variances.push(self.variances[i]);
                    alpha_averages.push(self.alpha_averages[i] * 65535.0);
                }
            }
        }
    }
}
