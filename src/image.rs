//! Image views and per-block texel transfer.

use glam::Vec4;

use crate::block::ImageBlock;
use crate::block_size::BlockSizeDescriptor;
use crate::config::{Profile, Swizzle, SwizzleComponent};
use crate::mathutil::{float_to_lns, lns_to_sf16, sf16_to_float};
use crate::Error;

/// A read-only view of interleaved RGBA `f32` texel data.
#[derive(Clone, Copy)]
pub struct ImageView<'a> {
    data: &'a [f32],
    width: u32,
    height: u32,
    depth: u32,
}

impl<'a> ImageView<'a> {
    /// Wraps `data` as a `width x height x depth` RGBA image.
    pub fn new(data: &'a [f32], width: u32, height: u32, depth: u32) -> Result<Self, Error> {
        if width == 0 || height == 0 || depth == 0 {
            return Err(Error::BadParam("image dimensions must be non-zero"));
        }
        let needed = width as usize * height as usize * depth as usize * 4;
        if data.len() < needed {
            return Err(Error::BufferTooSmall {
                needed: needed * 4,
                provided: data.len() * 4,
            });
        }
        Ok(Self {
            data,
            width,
            height,
            depth,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }
    pub fn height(&self) -> u32 {
        self.height
    }
    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub(crate) fn texel(&self, x: u32, y: u32, z: u32) -> Vec4 {
        let i = ((z as usize * self.height as usize + y as usize) * self.width as usize
            + x as usize)
            * 4;
        Vec4::new(self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3])
    }
}

/// A mutable view of interleaved RGBA `f32` texel data.
pub struct ImageViewMut<'a> {
    data: &'a mut [f32],
    width: u32,
    height: u32,
    depth: u32,
}

impl<'a> ImageViewMut<'a> {
    /// Wraps `data` as a `width x height x depth` RGBA image.
    pub fn new(data: &'a mut [f32], width: u32, height: u32, depth: u32) -> Result<Self, Error> {
        if width == 0 || height == 0 || depth == 0 {
            return Err(Error::BadParam("image dimensions must be non-zero"));
        }
        let needed = width as usize * height as usize * depth as usize * 4;
        if data.len() < needed {
            return Err(Error::BufferTooSmall {
                needed: needed * 4,
                provided: data.len() * 4,
            });
        }
        Ok(Self {
            data,
            width,
            height,
            depth,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }
    pub fn height(&self) -> u32 {
        self.height
    }
    pub fn depth(&self) -> u32 {
        self.depth
    }

    fn set_texel(&mut self, x: u32, y: u32, z: u32, v: Vec4) {
        let i = ((z as usize * self.height as usize + y as usize) * self.width as usize
            + x as usize)
            * 4;
        self.data[i] = v.x;
        self.data[i + 1] = v.y;
        self.data[i + 2] = v.z;
        self.data[i + 3] = v.w;
    }
}

fn swizzle_component(texel: Vec4, component: SwizzleComponent) -> f32 {
    match component {
        SwizzleComponent::R => texel.x,
        SwizzleComponent::G => texel.y,
        SwizzleComponent::B => texel.z,
        SwizzleComponent::A => texel.w,
        SwizzleComponent::Zero => 0.0,
        SwizzleComponent::One => 1.0,
        // Placeholder; reconstructed after the full texel is known.
        SwizzleComponent::Z => 0.0,
    }
}

pub(crate) fn apply_swizzle(texel: Vec4, swz: Swizzle) -> Vec4 {
    Vec4::new(
        swizzle_component(texel, swz.r),
        swizzle_component(texel, swz.g),
        swizzle_component(texel, swz.b),
        swizzle_component(texel, swz.a),
    )
}

/// Reconstructs a unit-vector Z from X and Y for normal map swizzles.
fn reconstruct_z(x: f32, y: f32) -> f32 {
    let nx = x * 2.0 - 1.0;
    let ny = y * 2.0 - 1.0;
    let nz = (1.0 - nx * nx - ny * ny).max(0.0).sqrt();
    nz * 0.5 + 0.5
}

/// Fetches one block of texels from the input image into working form.
///
/// Texels beyond the image edge replicate the nearest edge texel so they
/// compress consistently; their influence is removed again by the
/// error-weight pass. NaN inputs load as zero; the return value reports
/// whether any were seen.
pub(crate) fn fetch_image_block(
    profile: Profile,
    img: &ImageView,
    bsd: &BlockSizeDescriptor,
    blk: &mut ImageBlock,
    xpos: u32,
    ypos: u32,
    zpos: u32,
    swz: Swizzle,
) -> bool {
    let mut saw_nan = false;
    let mut idx = 0usize;

    let mut min = Vec4::splat(f32::INFINITY);
    let mut max = Vec4::splat(f32::NEG_INFINITY);
    let mut grayscale = true;

    let rgb_lns = profile.is_hdr();
    let alpha_lns = profile.is_hdr_alpha();

    for bz in 0..bsd.zdim as u32 {
        let z = (zpos + bz).min(img.depth - 1);
        for by in 0..bsd.ydim as u32 {
            let y = (ypos + by).min(img.height - 1);
            for bx in 0..bsd.xdim as u32 {
                let x = (xpos + bx).min(img.width - 1);

                let mut texel = apply_swizzle(img.texel(x, y, z), swz);
                if texel.is_nan() {
                    saw_nan = true;
                    texel = Vec4::select(texel.is_nan_mask(), Vec4::ZERO, texel);
                }

                if idx == 0 {
                    blk.origin_texel = texel;
                }

                // Scale into the working domain: UNORM16 for LDR data, the
                // log representation for HDR data.
                let r = if rgb_lns {
                    float_to_lns(texel.x)
                } else {
                    texel.x.clamp(0.0, 1.0) * 65535.0
                };
                let g = if rgb_lns {
                    float_to_lns(texel.y)
                } else {
                    texel.y.clamp(0.0, 1.0) * 65535.0
                };
                let b = if rgb_lns {
                    float_to_lns(texel.z)
                } else {
                    texel.z.clamp(0.0, 1.0) * 65535.0
                };
                let a = if alpha_lns {
                    float_to_lns(texel.w)
                } else {
                    texel.w.clamp(0.0, 1.0) * 65535.0
                };

                blk.data_r[idx] = r;
                blk.data_g[idx] = g;
                blk.data_b[idx] = b;
                blk.data_a[idx] = a;
                blk.rgb_lns[idx] = rgb_lns;
                blk.alpha_lns[idx] = alpha_lns;

                let v = Vec4::new(r, g, b, a);
                min = min.min(v);
                max = max.max(v);
                grayscale &= r == g && g == b;

                idx += 1;
            }
        }
    }

    blk.texel_count = bsd.texel_count;
    blk.data_min = min;
    blk.data_max = max;
    blk.grayscale = grayscale;
    blk.xpos = xpos;
    blk.ypos = ypos;
    blk.zpos = zpos;

    saw_nan
}

/// Writes one decoded block of texels back into the output image, skipping
/// texels beyond the image edge.
pub(crate) fn write_image_block(
    img: &mut ImageViewMut,
    blk: &ImageBlock,
    bsd: &BlockSizeDescriptor,
    xpos: u32,
    ypos: u32,
    zpos: u32,
    swz: Swizzle,
) {
    let mut idx = 0usize;
    for bz in 0..bsd.zdim as u32 {
        let z = zpos + bz;
        for by in 0..bsd.ydim as u32 {
            let y = ypos + by;
            for bx in 0..bsd.xdim as u32 {
                let x = xpos + bx;
                let i = idx;
                idx += 1;
                if x >= img.width || y >= img.height || z >= img.depth {
                    continue;
                }

                // Working domain back to f32 component values.
                let decode = |v: f32, lns: bool| -> f32 {
                    if blk.data_is_decoded || v.is_nan() {
                        v
                    } else if lns {
                        sf16_to_float(lns_to_sf16(v.clamp(0.0, 65535.0) as u16))
                    } else {
                        v / 65535.0
                    }
                };
                let texel = Vec4::new(
                    decode(blk.data_r[i], blk.rgb_lns[i]),
                    decode(blk.data_g[i], blk.rgb_lns[i]),
                    decode(blk.data_b[i], blk.rgb_lns[i]),
                    decode(blk.data_a[i], blk.alpha_lns[i]),
                );

                let mut out = apply_swizzle(texel, swz);
                if swz.r == SwizzleComponent::Z {
                    out.x = reconstruct_z(texel.x, texel.w);
                }
                if swz.g == SwizzleComponent::Z {
                    out.y = reconstruct_z(texel.x, texel.w);
                }
                if swz.b == SwizzleComponent::Z {
                    out.z = reconstruct_z(texel.x, texel.w);
                }

                img.set_texel(x, y, z, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_size::BlockSizeDescriptor;

    #[test]
    fn view_validates_length() {
        let data = vec![0.0f32; 4 * 4 * 4];
        assert!(ImageView::new(&data, 4, 4, 1).is_ok());
        assert!(ImageView::new(&data, 8, 8, 1).is_err());
    }

    #[test]
    fn fetch_scales_and_clamps() {
        let bsd = BlockSizeDescriptor::new(4, 4, 1, true, 0.5);
        let mut data = vec![0.0f32; 4 * 4 * 4];
        data[0] = 1.0; // R of texel 0
        data[1] = 0.5;
        data[3] = 2.0; // out-of-range alpha

        let img = ImageView::new(&data, 4, 4, 1).unwrap();
        let mut blk = ImageBlock::new();
        let saw_nan =
            fetch_image_block(Profile::Ldr, &img, &bsd, &mut blk, 0, 0, 0, Swizzle::RGBA);

        assert!(!saw_nan);
        assert_eq!(blk.data_r[0], 65535.0);
        assert!((blk.data_g[0] - 0.5 * 65535.0).abs() < 1.0);
        assert_eq!(blk.data_a[0], 65535.0);
        assert!(!blk.grayscale);
    }

    #[test]
    fn fetch_replicates_edge_texels() {
        let bsd = BlockSizeDescriptor::new(4, 4, 1, true, 0.5);
        // A 3x3 image compressed with 4x4 blocks.
        let mut data = vec![0.25f32; 3 * 3 * 4];
        for texel in data.chunks_mut(4) {
            texel[3] = 1.0;
        }
        let img = ImageView::new(&data, 3, 3, 1).unwrap();
        let mut blk = ImageBlock::new();
        fetch_image_block(Profile::Ldr, &img, &bsd, &mut blk, 0, 0, 0, Swizzle::RGBA);

        // The replicated fourth column matches the third.
        for row in 0..4 {
            assert_eq!(blk.data_r[row * 4 + 3], blk.data_r[row * 4 + 2]);
        }
    }

    #[test]
    fn nan_texels_load_as_zero() {
        let bsd = BlockSizeDescriptor::new(4, 4, 1, true, 0.5);
        let mut data = vec![0.5f32; 4 * 4 * 4];
        data[4] = f32::NAN;
        let img = ImageView::new(&data, 4, 4, 1).unwrap();
        let mut blk = ImageBlock::new();
        let saw_nan =
            fetch_image_block(Profile::Ldr, &img, &bsd, &mut blk, 0, 0, 0, Swizzle::RGBA);
        assert!(saw_nan);
        assert_eq!(blk.data_r[1], 0.0);
    }
}
