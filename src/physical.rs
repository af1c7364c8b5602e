//! Symbolic to physical block conversion and back.
//!
//! The 128-bit block packs the mode and partition metadata from bit 0
//! upward and the weight stream from bit 127 downward (bit-reversed).
//! Fields that only exist for some configurations, the extra endpoint-mode
//! bits and the dual-plane component selector, sit directly below the
//! weight stream. `physical_to_symbolic` accepts arbitrary bytes and maps
//! every malformed configuration to the error block instead of failing.

use crate::bise;
use crate::block_size::{BlockSizeDescriptor, WEIGHTS_PLANE2_OFFSET};
use crate::color::EndpointFormat;
use crate::quant::{quant_mode_for_bits, MAX_ENDPOINT_PAIRS};
use crate::symbolic::{NonConstBlock, SymbolicBlock};

#[inline]
fn read_bits(block: u128, count: u32, offset: u32) -> u32 {
    ((block >> offset) as u32) & ((1u32 << count) - 1)
}

#[inline]
fn write_bits(block: &mut u128, value: u32, count: u32, offset: u32) {
    debug_assert!(value < (1 << count));
    *block |= (value as u128) << offset;
}

/// Converts a symbolic block into its 16-byte physical encoding.
pub(crate) fn symbolic_to_physical(bsd: &BlockSizeDescriptor, scb: &SymbolicBlock) -> [u8; 16] {
    match scb {
        // An all-zero block has a reserved mode and decodes as an error.
        SymbolicBlock::Error => [0u8; 16],
        SymbolicBlock::ConstF16(color) => pack_constant_block(bsd, color, true),
        SymbolicBlock::ConstU16(color) => pack_constant_block(bsd, color, false),
        SymbolicBlock::NonConst(block) => pack_nonconst_block(bsd, block),
    }
}

fn pack_constant_block(bsd: &BlockSizeDescriptor, color: &[u16; 4], f16: bool) -> [u8; 16] {
    let mut block: u128 = 0x1FC;
    if f16 {
        block |= 0x200;
    }

    // All-ones extent coordinates mean "no void extent hint".
    if bsd.is_3d() {
        block |= ((1u128 << 54) - 1) << 10;
    } else {
        block |= 0b11 << 10;
        block |= ((1u128 << 52) - 1) << 12;
    }

    for (i, &c) in color.iter().enumerate() {
        write_bits(&mut block, u32::from(c), 16, 64 + 16 * i as u32);
    }

    block.to_le_bytes()
}

fn pack_nonconst_block(bsd: &BlockSizeDescriptor, scb: &NonConstBlock) -> [u8; 16] {
    let packed_index = bsd
        .packed_index_of(scb.block_mode)
        .expect("symbolic block with an illegal block mode");
    let bm = bsd.block_mode(packed_index);
    let di = bsd.decimation_info(bm.decimation_mode);

    let weight_count = di.weight_count as usize;
    let is_dual = bm.is_dual_plane;
    let stored_weights = weight_count * if is_dual { 2 } else { 1 };
    let weight_bits = bise::sequence_bitcount(stored_weights as u32, bm.quant_mode);

    // Weights are stored bit-reversed from the top of the block.
    let mut weight_buf = [0u8; 64];
    if is_dual {
        for i in 0..weight_count {
            weight_buf[2 * i] = scb.weights[i];
            weight_buf[2 * i + 1] = scb.weights[WEIGHTS_PLANE2_OFFSET + i];
        }
    } else {
        weight_buf[..weight_count].copy_from_slice(&scb.weights[..weight_count]);
    }

    let mut weight_stream: u128 = 0;
    bise::encode_ise(
        bm.quant_mode,
        &weight_buf[..stored_weights],
        &mut weight_stream,
        0,
    );

    let mut block = weight_stream.reverse_bits();
    write_bits(&mut block, u32::from(scb.block_mode), 11, 0);

    let partition_count = u32::from(scb.partition_count);
    write_bits(&mut block, partition_count - 1, 2, 11);

    let mut below_weights = 128 - weight_bits;
    let color_start;

    if partition_count > 1 {
        write_bits(&mut block, u32::from(scb.partition_index), 10, 13);

        let formats = &scb.color_formats[..partition_count as usize];
        if scb.color_formats_matched() {
            write_bits(&mut block, (formats[0] as u32) << 2, 6, 23);
        } else {
            // Mixed formats: classes may differ by at most one. The shared
            // class selector and the per-partition bits straddle the fixed
            // field and the area below the weights.
            let min_class = formats.iter().map(|f| f.class()).min().unwrap();
            let base = u32::from(min_class) + 1;
            debug_assert!(formats.iter().all(|f| {
                let c = u32::from(f.class());
                c >= base - 1 && c <= base
            }));

            let mut cem = base;
            for (j, f) in formats.iter().enumerate() {
                let c = u32::from(f.class()) - (base - 1);
                cem |= c << (2 + j);
            }
            for (j, f) in formats.iter().enumerate() {
                let m = (*f as u32) & 3;
                cem |= m << (2 + partition_count as usize + 2 * j);
            }

            let extra_bits = 3 * partition_count - 4;
            below_weights -= extra_bits;
            write_bits(&mut block, cem >> 6, extra_bits, below_weights);
            write_bits(&mut block, cem & 0x3F, 6, 23);
        }
        color_start = 29;
    } else {
        write_bits(&mut block, scb.color_formats[0] as u32, 4, 13);
        color_start = 17;
    }

    if let Some(component) = scb.plane2_component {
        below_weights -= 2;
        write_bits(&mut block, u32::from(component), 2, below_weights);
    }

    // Endpoint values, all partitions concatenated.
    let mut color_values = [0u8; 2 * MAX_ENDPOINT_PAIRS];
    let mut value_count = 0;
    for p in 0..partition_count as usize {
        let n = scb.color_formats[p].value_count();
        color_values[value_count..value_count + n].copy_from_slice(&scb.color_values[p][..n]);
        value_count += n;
    }
    debug_assert!(
        color_start + bise::sequence_bitcount(value_count as u32, scb.quant_mode) <= below_weights
    );
    bise::encode_ise(
        scb.quant_mode,
        &color_values[..value_count],
        &mut block,
        color_start,
    );

    block.to_le_bytes()
}

/// Converts a 16-byte physical block into symbolic form.
///
/// Total over all inputs: malformed encodings produce
/// [`SymbolicBlock::Error`], never a panic or an out-of-range field.
pub(crate) fn physical_to_symbolic(bsd: &BlockSizeDescriptor, data: [u8; 16]) -> SymbolicBlock {
    let block = u128::from_le_bytes(data);
    let block_mode = read_bits(block, 11, 0);

    if block_mode & 0x1FF == 0x1FC {
        return unpack_constant_block(bsd, block);
    }

    let Some(packed_index) = bsd.packed_index_of(block_mode as u16) else {
        return SymbolicBlock::Error;
    };
    let bm = *bsd.block_mode(packed_index);
    let di = bsd.decimation_info(bm.decimation_mode);

    let partition_count = read_bits(block, 2, 11) + 1;
    if bm.is_dual_plane && partition_count == 4 {
        return SymbolicBlock::Error;
    }

    let weight_count = di.weight_count as usize;
    let stored_weights = weight_count * if bm.is_dual_plane { 2 } else { 1 };
    let weight_bits = bise::sequence_bitcount(stored_weights as u32, bm.quant_mode);

    let mut below_weights = 128 - weight_bits;
    let color_start;
    let mut color_formats = [EndpointFormat::Luminance; 4];

    if partition_count > 1 {
        let cem = read_bits(block, 6, 23);
        if cem & 3 == 0 {
            let format = EndpointFormat::try_from((cem >> 2) as u8).unwrap();
            for f in color_formats.iter_mut().take(partition_count as usize) {
                *f = format;
            }
        } else {
            let base = cem & 3;
            let extra_bits = 3 * partition_count - 4;
            if below_weights < extra_bits {
                return SymbolicBlock::Error;
            }
            below_weights -= extra_bits;
            let full = cem | (read_bits(block, extra_bits, below_weights) << 6);

            for (j, f) in color_formats
                .iter_mut()
                .take(partition_count as usize)
                .enumerate()
            {
                let class_bit = (full >> (2 + j)) & 1;
                let m = (full >> (2 + partition_count as usize + 2 * j)) & 3;
                let class = base - 1 + class_bit;
                *f = EndpointFormat::try_from((class << 2 | m) as u8).unwrap();
            }
        }
        color_start = 29;
    } else {
        color_formats[0] = EndpointFormat::try_from(read_bits(block, 4, 13) as u8).unwrap();
        color_start = 17;
    }

    let plane2_component = if bm.is_dual_plane {
        if below_weights < 2 {
            return SymbolicBlock::Error;
        }
        below_weights -= 2;
        Some(read_bits(block, 2, below_weights) as u8)
    } else {
        None
    };

    let value_count: usize = color_formats[..partition_count as usize]
        .iter()
        .map(|f| f.value_count())
        .sum();
    if value_count > 2 * MAX_ENDPOINT_PAIRS {
        return SymbolicBlock::Error;
    }

    if below_weights < color_start {
        return SymbolicBlock::Error;
    }
    let color_bits = below_weights - color_start;
    let Some(quant_mode) = quant_mode_for_bits(value_count as u32 / 2, color_bits) else {
        return SymbolicBlock::Error;
    };

    let mut all_values = [0u8; 2 * MAX_ENDPOINT_PAIRS];
    bise::decode_ise(
        quant_mode,
        block,
        color_start,
        &mut all_values[..value_count],
    );

    let mut color_values = [[0u8; 8]; 4];
    let mut offset = 0;
    for p in 0..partition_count as usize {
        let n = color_formats[p].value_count();
        color_values[p][..n].copy_from_slice(&all_values[offset..offset + n]);
        offset += n;
    }

    let mut weight_buf = [0u8; 64];
    bise::decode_ise(
        bm.quant_mode,
        block.reverse_bits(),
        0,
        &mut weight_buf[..stored_weights],
    );

    let mut weights = [0u8; 64];
    if bm.is_dual_plane {
        for i in 0..weight_count {
            weights[i] = weight_buf[2 * i];
            weights[WEIGHTS_PLANE2_OFFSET + i] = weight_buf[2 * i + 1];
        }
    } else {
        weights[..weight_count].copy_from_slice(&weight_buf[..weight_count]);
    }

    SymbolicBlock::NonConst(Box::new(NonConstBlock {
        partition_count: partition_count as u8,
        partition_index: if partition_count > 1 {
            read_bits(block, 10, 13) as u16
        } else {
            0
        },
        block_mode: block_mode as u16,
        quant_mode,
        color_formats,
        color_values,
        plane2_component,
        weights,
        errorval: 0.0,
    }))
}

fn unpack_constant_block(bsd: &BlockSizeDescriptor, block: u128) -> SymbolicBlock {
    // Void extent coordinates must be ordered unless they are the all-ones
    // "no extent" marker.
    if bsd.is_3d() {
        let coords = read_bits_u64(block, 54, 10);
        if coords != (1u64 << 54) - 1 {
            for axis in 0..3 {
                let low = (coords >> (18 * axis)) & 0x1FF;
                let high = (coords >> (18 * axis + 9)) & 0x1FF;
                if low >= high {
                    return SymbolicBlock::Error;
                }
            }
        }
    } else {
        let coords = read_bits_u64(block, 52, 12);
        if coords != (1u64 << 52) - 1 {
            for axis in 0..2 {
                let low = (coords >> (26 * axis)) & 0x1FFF;
                let high = (coords >> (26 * axis + 13)) & 0x1FFF;
                if low >= high {
                    return SymbolicBlock::Error;
                }
            }
        }
    }

    let mut color = [0u16; 4];
    for (i, c) in color.iter_mut().enumerate() {
        *c = read_bits(block, 16, 64 + 16 * i as u32) as u16;
    }

    if block & 0x200 != 0 {
        SymbolicBlock::ConstF16(color)
    } else {
        SymbolicBlock::ConstU16(color)
    }
}

#[inline]
fn read_bits_u64(block: u128, count: u32, offset: u32) -> u64 {
    ((block >> offset) as u64) & ((1u64 << count) - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_size::BlockSizeDescriptor;

    fn test_bsd() -> Box<BlockSizeDescriptor> {
        BlockSizeDescriptor::new(6, 6, 1, false, 1.0)
    }

    #[test]
    fn constant_blocks_round_trip() {
        let bsd = test_bsd();
        let color = [1234u16, 0, 65535, 32768];

        let scb = SymbolicBlock::ConstU16(color);
        let phys = symbolic_to_physical(&bsd, &scb);
        match physical_to_symbolic(&bsd, phys) {
            SymbolicBlock::ConstU16(c) => assert_eq!(c, color),
            _ => panic!("expected a constant block"),
        }

        let scb = SymbolicBlock::ConstF16(color);
        let phys = symbolic_to_physical(&bsd, &scb);
        match physical_to_symbolic(&bsd, phys) {
            SymbolicBlock::ConstF16(c) => assert_eq!(c, color),
            _ => panic!("expected a constant block"),
        }
    }

    #[test]
    fn error_blocks_stay_errors() {
        let bsd = test_bsd();
        let phys = symbolic_to_physical(&bsd, &SymbolicBlock::Error);
        assert!(physical_to_symbolic(&bsd, phys).is_error());
    }

    fn sample_nonconst(bsd: &BlockSizeDescriptor) -> Box<NonConstBlock> {
        // Use the first enabled single-plane mode.
        let bm = bsd
            .block_modes
            .iter()
            .find(|m| !m.is_dual_plane)
            .expect("no single-plane mode");
        let di = bsd.decimation_info(bm.decimation_mode);

        let mut weights = [0u8; 64];
        let levels = bm.quant_mode.levels() as u8;
        for (i, w) in weights.iter_mut().take(di.weight_count as usize).enumerate() {
            *w = (i as u8 * 3 + 1) % levels;
        }

        // The color quant level is implied by the bit budget, so the block
        // must carry exactly the level the decoder will derive.
        let weight_bits =
            crate::bise::sequence_bitcount(u32::from(di.weight_count), bm.quant_mode);
        let color_bits = 128 - weight_bits - 17;
        let quant = crate::quant::quant_mode_for_bits(3, color_bits).unwrap();

        let mut color_values = [[0u8; 8]; 4];
        let color_levels = quant.levels() as u8;
        for (i, v) in color_values[0][..6].iter_mut().enumerate() {
            *v = (i as u8 * 37 + 5) % color_levels;
        }

        Box::new(NonConstBlock {
            partition_count: 1,
            partition_index: 0,
            block_mode: bm.mode_index,
            quant_mode: quant,
            color_formats: [crate::color::EndpointFormat::Rgb; 4],
            color_values,
            plane2_component: None,
            weights,
            errorval: 0.0,
        })
    }

    #[test]
    fn nonconst_blocks_round_trip() {
        let bsd = test_bsd();
        let scb = sample_nonconst(&bsd);

        // The color quant level must match what the bit budget dictates for
        // the round trip to be exact; recompute it the way the packer's
        // consumer does.
        let phys = symbolic_to_physical(&bsd, &SymbolicBlock::NonConst(scb.clone()));
        let decoded = physical_to_symbolic(&bsd, phys);
        let SymbolicBlock::NonConst(out) = decoded else {
            panic!("expected nonconst");
        };

        assert_eq!(out.block_mode, scb.block_mode);
        assert_eq!(out.partition_count, 1);
        assert_eq!(out.color_formats[0], scb.color_formats[0]);
        assert_eq!(out.plane2_component, None);

        let bm = bsd.block_mode(bsd.packed_index_of(scb.block_mode).unwrap());
        let di = bsd.decimation_info(bm.decimation_mode);
        assert_eq!(
            &out.weights[..di.weight_count as usize],
            &scb.weights[..di.weight_count as usize]
        );

        // Re-pack must reproduce the identical bytes.
        let phys2 = symbolic_to_physical(&bsd, &SymbolicBlock::NonConst(out));
        assert_eq!(phys, phys2);
    }

    #[test]
    fn arbitrary_bytes_never_panic() {
        let bsd = test_bsd();
        let bsd3 = BlockSizeDescriptor::new(4, 4, 4, false, 1.0);
        let mut state = 0xDEADBEEFu64;
        for _ in 0..2000 {
            let mut data = [0u8; 16];
            for b in &mut data {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                *b = (state >> 56) as u8;
            }
            let scb = physical_to_symbolic(&bsd, data);
            let _ = physical_to_symbolic(&bsd3, data);

            // A successful decode must re-encode to a block that decodes to
            // the same content: dead bits are canonicalized to zero, but the
            // meaningful fields are stable after one round trip.
            if let SymbolicBlock::NonConst(ref b) = scb {
                let phys = symbolic_to_physical(&bsd, &SymbolicBlock::NonConst(b.clone()));
                match physical_to_symbolic(&bsd, phys) {
                    SymbolicBlock::NonConst(again) => {
                        assert_eq!(again.block_mode, b.block_mode);
                        assert_eq!(again.partition_count, b.partition_count);
                        assert_eq!(again.partition_index, b.partition_index);
                        assert_eq!(again.quant_mode, b.quant_mode);
                        assert_eq!(again.color_formats, b.color_formats);
                        assert_eq!(again.color_values, b.color_values);
                        assert_eq!(again.weights, b.weights);
                        assert_eq!(again.plane2_component, b.plane2_component);
                        // And the second round trip is byte-exact.
                        let phys2 =
                            symbolic_to_physical(&bsd, &SymbolicBlock::NonConst(again.clone()));
                        assert_eq!(phys, phys2);
                    }
                    _ => panic!("re-encoded block failed to decode"),
                }
            }
        }
    }
}
