//! Symbolic block decompression.

use glam::IVec4;

use crate::block::ImageBlock;
use crate::block_size::{BlockSizeDescriptor, BLOCK_MAX_TEXELS, WEIGHTS_PLANE2_OFFSET};
use crate::color::unpack_color_endpoints;
use crate::config::Profile;
use crate::mathutil::sf16_to_float;
use crate::quant::weight_tables;
use crate::symbolic::SymbolicBlock;

/// Fills a block with the profile's error color: opaque magenta for LDR,
/// NaN for HDR.
fn fill_error_color(profile: Profile, texel_count: usize, blk: &mut ImageBlock) {
    if profile.is_hdr() {
        for i in 0..texel_count {
            blk.data_r[i] = f32::NAN;
            blk.data_g[i] = f32::NAN;
            blk.data_b[i] = f32::NAN;
            blk.data_a[i] = f32::NAN;
            blk.rgb_lns[i] = false;
            blk.alpha_lns[i] = false;
        }
    } else {
        for i in 0..texel_count {
            blk.data_r[i] = 65535.0;
            blk.data_g[i] = 0.0;
            blk.data_b[i] = 65535.0;
            blk.data_a[i] = 65535.0;
            blk.rgb_lns[i] = false;
            blk.alpha_lns[i] = false;
        }
    }
}

/// Decompresses a symbolic block into texel values in the working domain.
pub(crate) fn decompress_symbolic_block(
    profile: Profile,
    bsd: &BlockSizeDescriptor,
    scb: &SymbolicBlock,
    blk: &mut ImageBlock,
) {
    let texel_count = bsd.texel_count as usize;
    blk.texel_count = bsd.texel_count;
    // The scratch block is reused across blocks; only the FP16 constant
    // path below re-arms the pass-through flag.
    blk.data_is_decoded = false;

    match scb {
        SymbolicBlock::Error => fill_error_color(profile, texel_count, blk),

        SymbolicBlock::ConstU16(color) => {
            for i in 0..texel_count {
                blk.data_r[i] = f32::from(color[0]);
                blk.data_g[i] = f32::from(color[1]);
                blk.data_b[i] = f32::from(color[2]);
                blk.data_a[i] = f32::from(color[3]);
                blk.rgb_lns[i] = false;
                blk.alpha_lns[i] = false;
            }
        }

        SymbolicBlock::ConstF16(color) => {
            // FP16 constants only exist in the HDR profiles.
            if !profile.is_hdr() {
                fill_error_color(profile, texel_count, blk);
                return;
            }
            // Decode through FP16 and mark the data as final so the image
            // writer passes it straight through.
            let r = sf16_to_float(color[0]);
            let g = sf16_to_float(color[1]);
            let b = sf16_to_float(color[2]);
            let a = sf16_to_float(color[3]);
            for i in 0..texel_count {
                blk.data_r[i] = r;
                blk.data_g[i] = g;
                blk.data_b[i] = b;
                blk.data_a[i] = a;
                blk.rgb_lns[i] = false;
                blk.alpha_lns[i] = false;
            }
            blk.data_is_decoded = true;
            return;
        }

        SymbolicBlock::NonConst(block) => {
            let Some(packed_index) = bsd.packed_index_of(block.block_mode) else {
                fill_error_color(profile, texel_count, blk);
                return;
            };
            let bm = bsd.block_mode(packed_index);
            let di = bsd.decimation_info(bm.decimation_mode);
            let pi = bsd.partition_info(
                u32::from(block.partition_count),
                u32::from(block.partition_index),
            );

            // Unquantize the stored weight grid to the 0..=64 domain, then
            // interpolate one weight per texel and plane.
            let table = &weight_tables()[bm.quant_mode as usize];
            debug_assert_eq!(table.method, bm.quant_mode);
            let mut grid1 = [0i32; 64];
            let mut grid2 = [0i32; 64];
            for i in 0..di.weight_count as usize {
                debug_assert!(block.weights[i] < table.levels);
                grid1[i] = i32::from(table.unquant[block.weights[i] as usize]);
                if block.plane2_component.is_some() {
                    grid2[i] =
                        i32::from(table.unquant[block.weights[WEIGHTS_PLANE2_OFFSET + i] as usize]);
                }
            }

            let mut weights1 = [0i32; BLOCK_MAX_TEXELS];
            let mut weights2 = [0i32; BLOCK_MAX_TEXELS];
            for t in 0..texel_count {
                weights1[t] = di.infill_int(&grid1, t);
                if block.plane2_component.is_some() {
                    weights2[t] = di.infill_int(&grid2, t);
                }
            }

            // Endpoints per partition.
            let mut e0 = [IVec4::ZERO; 4];
            let mut e1 = [IVec4::ZERO; 4];
            let mut rgb_hdr = [false; 4];
            let mut alpha_hdr = [false; 4];
            for p in 0..block.partition_count as usize {
                match unpack_color_endpoints(
                    profile,
                    block.color_formats[p],
                    block.quant_mode,
                    &block.color_values[p],
                ) {
                    Some(unpacked) => {
                        e0[p] = unpacked.e0;
                        e1[p] = unpacked.e1;
                        rgb_hdr[p] = unpacked.rgb_hdr;
                        alpha_hdr[p] = unpacked.alpha_hdr;
                    }
                    None => {
                        fill_error_color(profile, texel_count, blk);
                        return;
                    }
                }
            }

            let plane2_mask: IVec4 = match block.plane2_component {
                Some(0) => IVec4::new(1, 0, 0, 0),
                Some(1) => IVec4::new(0, 1, 0, 0),
                Some(2) => IVec4::new(0, 0, 1, 0),
                Some(_) => IVec4::new(0, 0, 0, 1),
                None => IVec4::ZERO,
            };

            for t in 0..texel_count {
                let p = pi.partition_of_texel[t] as usize;
                let w1 = IVec4::splat(weights1[t]);
                let w = if block.plane2_component.is_some() {
                    let w2 = IVec4::splat(weights2[t]);
                    w1 * (IVec4::ONE - plane2_mask) + w2 * plane2_mask
                } else {
                    w1
                };

                let color =
                    (e0[p] * (IVec4::splat(64) - w) + e1[p] * w + IVec4::splat(32)) >> 6i32;

                blk.data_r[t] = color.x as f32;
                blk.data_g[t] = color.y as f32;
                blk.data_b[t] = color.z as f32;
                blk.data_a[t] = color.w as f32;
                blk.rgb_lns[t] = rgb_hdr[p];
                blk.alpha_lns[t] = alpha_hdr[p];
            }
        }
    }
}
