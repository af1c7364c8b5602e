//! Block size descriptors.
//!
//! A block size descriptor aggregates everything the codec needs to know
//! about one block footprint: which of the 2048 physical block modes are
//! legal, the decimation tables those modes reference, and the partition
//! tables for 1 to 4 partitions. Descriptors are built once per context and
//! never change afterwards.

use crate::bise;
use crate::decimation::{self, DecimationInfo};
use crate::partition::{self, PartitionInfo, PARTITION_COUNT};
use crate::quant::QuantMethod;

/// The maximum number of partitions a block can use.
pub(crate) const BLOCK_MAX_PARTITIONS: usize = 4;

/// The maximum number of texels a block can hold (6x6x6).
pub(crate) const BLOCK_MAX_TEXELS: usize = 216;

/// The maximum number of texels sampled for partition-search clustering.
pub(crate) const BLOCK_MAX_KMEANS_TEXELS: usize = 64;

/// The maximum number of stored weights in a block.
pub(crate) const BLOCK_MAX_WEIGHTS: usize = 64;

/// The maximum number of stored weights per plane in dual-plane modes.
pub(crate) const BLOCK_MAX_WEIGHTS_2PLANE: usize = BLOCK_MAX_WEIGHTS / 2;

/// The fewest weight bits a legal encoding can spend.
pub(crate) const BLOCK_MIN_WEIGHT_BITS: u32 = 24;

/// The most weight bits a legal encoding can spend.
pub(crate) const BLOCK_MAX_WEIGHT_BITS: u32 = 96;

/// Marker for an unused entry in the packed block mode remap table.
pub(crate) const BLOCK_BAD_MODE: u16 = 0xFFFF;

/// The offset of plane-2 weights in shared weight arrays.
pub(crate) const WEIGHTS_PLANE2_OFFSET: usize = BLOCK_MAX_WEIGHTS_2PLANE;

/// The number of physical block modes.
pub(crate) const MAX_BLOCK_MODES: usize = 2048;

/// Initial value for error minimization.
pub(crate) const ERROR_CALC_DEFAULT: f32 = 1e30;

/// The most encoding candidates kept for full trial per mode family.
pub(crate) const MAX_TRIAL_CANDIDATES: usize = 4;

/// Modes at or below this centile are "always" modes, searched even by the
/// fastest presets.
const ALWAYS_PERCENTILE: f32 = 0.05;

/// Metadata for one enabled block mode.
#[derive(Clone, Copy)]
pub(crate) struct BlockMode {
    /// The physical 11-bit block mode index.
    pub mode_index: u16,
    /// Index into the descriptor's packed decimation mode list.
    pub decimation_mode: u8,
    /// The weight quantization level.
    pub quant_mode: QuantMethod,
    pub is_dual_plane: bool,
    /// Whether the current search preset includes this mode.
    pub percentile_hit: bool,
}

/// Metadata for one enabled decimation mode.
#[derive(Clone, Copy)]
pub(crate) struct DecimationMode {
    pub weight_x: u8,
    pub weight_y: u8,
    pub weight_z: u8,
    /// Highest weight quant level usable with one plane, or -1.
    pub maxprec_1plane: i8,
    /// Highest weight quant level usable with two planes, or -1.
    pub maxprec_2planes: i8,
    /// Whether any enabled block mode references this decimation mode.
    pub percentile_hit: bool,
}

/// Data tables for a single block size.
pub struct BlockSizeDescriptor {
    pub(crate) xdim: u8,
    pub(crate) ydim: u8,
    pub(crate) zdim: u8,
    pub(crate) texel_count: u8,

    pub(crate) block_modes: Vec<BlockMode>,
    pub(crate) always_block_mode_count: usize,
    /// Physical mode index -> packed index, or [`BLOCK_BAD_MODE`].
    pub(crate) block_mode_packed_index: Box<[u16; MAX_BLOCK_MODES]>,

    pub(crate) decimation_modes: Vec<DecimationMode>,
    pub(crate) decimation_tables: Vec<Box<DecimationInfo>>,

    /// `[0]` is the synthetic single-partition entry, followed by the 1024
    /// partitionings for each of 2, 3 and 4 partitions.
    pub(crate) partitions: Vec<PartitionInfo>,

    /// Sample texels for partition-search clustering.
    pub(crate) kmeans_texels: Vec<u8>,
}

/// A decoded block mode, before legality filtering.
struct DecodedMode {
    weight_x: u32,
    weight_y: u32,
    weight_z: u32,
    is_dual_plane: bool,
    quant_index: u32,
}

/// Decodes an 11-bit 2D block mode field. Returns `None` for reserved
/// encodings.
fn decode_block_mode_2d(block_mode: u32) -> Option<DecodedMode> {
    let mut base_quant = (block_mode >> 4) & 1;
    let h = (block_mode >> 9) & 1;
    let d = (block_mode >> 10) & 1;
    let a = (block_mode >> 5) & 0x3;

    let x_weights;
    let y_weights;

    if block_mode & 3 != 0 {
        base_quant |= (block_mode & 3) << 1;
        let b = (block_mode >> 7) & 3;
        match (block_mode >> 2) & 3 {
            0 => {
                x_weights = b + 4;
                y_weights = a + 2;
            }
            1 => {
                x_weights = b + 8;
                y_weights = a + 2;
            }
            2 => {
                x_weights = a + 2;
                y_weights = b + 8;
            }
            _ => {
                let b = b & 1;
                if block_mode & 0x100 != 0 {
                    x_weights = b + 2;
                    y_weights = a + 2;
                } else {
                    x_weights = a + 2;
                    y_weights = b + 6;
                }
            }
        }
    } else {
        base_quant |= ((block_mode >> 2) & 3) << 1;
        if (block_mode >> 2) & 3 == 0 {
            return None;
        }
        match (block_mode >> 7) & 3 {
            0 => {
                x_weights = 12;
                y_weights = a + 2;
            }
            1 => {
                x_weights = a + 2;
                y_weights = 12;
            }
            2 => {
                // B reuses the precision and plane bits for these grids.
                let b = (block_mode >> 9) & 3;
                x_weights = a + 6;
                y_weights = b + 6;
                return Some(DecodedMode {
                    weight_x: x_weights,
                    weight_y: y_weights,
                    weight_z: 1,
                    is_dual_plane: false,
                    quant_index: base_quant - 2,
                });
            }
            _ => match (block_mode >> 5) & 3 {
                0 => {
                    x_weights = 6;
                    y_weights = 10;
                }
                1 => {
                    x_weights = 10;
                    y_weights = 6;
                }
                _ => return None,
            },
        }
    }

    let quant_index = (base_quant - 2) + 6 * h;
    Some(DecodedMode {
        weight_x: x_weights,
        weight_y: y_weights,
        weight_z: 1,
        is_dual_plane: d != 0,
        quant_index,
    })
}

/// Decodes an 11-bit 3D block mode field. Returns `None` for reserved
/// encodings.
fn decode_block_mode_3d(block_mode: u32) -> Option<DecodedMode> {
    let mut base_quant = (block_mode >> 4) & 1;
    let mut h = (block_mode >> 9) & 1;
    let mut d = (block_mode >> 10) & 1;
    let a = (block_mode >> 5) & 0x3;

    let x_weights;
    let y_weights;
    let z_weights;

    if block_mode & 3 != 0 {
        base_quant |= (block_mode & 3) << 1;
        let b = (block_mode >> 7) & 3;
        let c = (block_mode >> 2) & 0x3;
        x_weights = a + 2;
        y_weights = b + 2;
        z_weights = c + 2;
    } else {
        base_quant |= ((block_mode >> 2) & 3) << 1;
        if (block_mode >> 2) & 3 == 0 {
            return None;
        }
        let b = (block_mode >> 9) & 3;
        match (block_mode >> 7) & 3 {
            0 => {
                x_weights = 6;
                y_weights = b + 2;
                z_weights = a + 2;
                d = 0;
                h = 0;
            }
            1 => {
                x_weights = a + 2;
                y_weights = 6;
                z_weights = b + 2;
                d = 0;
                h = 0;
            }
            2 => {
                x_weights = a + 2;
                y_weights = b + 2;
                z_weights = 6;
                d = 0;
                h = 0;
            }
            _ => {
                let (x, y, z) = match (block_mode >> 5) & 3 {
                    0 => (6, 2, 2),
                    1 => (2, 6, 2),
                    2 => (2, 2, 6),
                    _ => return None,
                };
                x_weights = x;
                y_weights = y;
                z_weights = z;
            }
        }
    }

    let quant_index = (base_quant - 2) + 6 * h;
    Some(DecodedMode {
        weight_x: x_weights,
        weight_y: y_weights,
        weight_z: z_weights,
        is_dual_plane: d != 0,
        quant_index,
    })
}

fn decode_block_mode(block_mode: u32, is_3d: bool) -> Option<DecodedMode> {
    if is_3d {
        decode_block_mode_3d(block_mode)
    } else {
        decode_block_mode_2d(block_mode)
    }
}

/// The raw usefulness score a mode's centile rank is derived from. Lower is
/// better: grids near half the texel density dominate real encodings, with
/// a mild preference for mid-range weight precision. Single-plane modes
/// outrank dual-plane ones at the same shape.
fn mode_score(texel_count: u32, weight_count: u32, quant_index: u32, dual: bool) -> f32 {
    let density = weight_count as f32 / texel_count as f32;
    let density_score = (density - 0.55).abs();
    let quant_score = (quant_index as f32 - 6.0).abs() / 24.0;
    let dual_score = if dual { 0.2 } else { 0.0 };
    density_score + quant_score + dual_score
}

impl BlockSizeDescriptor {
    /// Builds the descriptor for one block footprint.
    ///
    /// With `can_omit_modes` set, block modes whose usefulness centile is
    /// above `mode_cutoff` are dropped entirely; otherwise all legal modes
    /// are kept (required when decoding data produced elsewhere) and the
    /// cutoff only controls the `percentile_hit` search flag.
    pub(crate) fn new(
        xdim: u32,
        ydim: u32,
        zdim: u32,
        can_omit_modes: bool,
        mode_cutoff: f32,
    ) -> Box<BlockSizeDescriptor> {
        let texel_count = xdim * ydim * zdim;
        let is_3d = zdim > 1;

        // Sample texels for clustering, evenly spread over the block.
        let kmeans_count = (texel_count as usize).min(BLOCK_MAX_KMEANS_TEXELS);
        let kmeans_texels: Vec<u8> = if texel_count as usize <= BLOCK_MAX_KMEANS_TEXELS {
            (0..texel_count as u8).collect()
        } else {
            (0..BLOCK_MAX_KMEANS_TEXELS)
                .map(|i| ((i as u32 * texel_count) / BLOCK_MAX_KMEANS_TEXELS as u32) as u8)
                .collect()
        };
        debug_assert_eq!(kmeans_texels.len(), kmeans_count);

        // First pass: decode and filter all 2048 physical modes.
        struct Candidate {
            mode_index: u16,
            decoded: DecodedMode,
            score: f32,
            percentile: f32,
        }
        let mut candidates: Vec<Candidate> = Vec::new();
        for mode_index in 0..MAX_BLOCK_MODES as u32 {
            let Some(decoded) = decode_block_mode(mode_index, is_3d) else {
                continue;
            };

            if decoded.weight_x > xdim || decoded.weight_y > ydim || decoded.weight_z > zdim {
                continue;
            }

            let weight_count = decoded.weight_x * decoded.weight_y * decoded.weight_z;
            let planes = if decoded.is_dual_plane { 2 } else { 1 };
            if (weight_count * planes) as usize > BLOCK_MAX_WEIGHTS {
                continue;
            }
            if decoded.is_dual_plane && weight_count as usize > BLOCK_MAX_WEIGHTS_2PLANE {
                continue;
            }

            let weight_bits = bise::sequence_bitcount_raw(weight_count * planes, decoded.quant_index);
            if !(BLOCK_MIN_WEIGHT_BITS..=BLOCK_MAX_WEIGHT_BITS).contains(&weight_bits) {
                continue;
            }

            let score = mode_score(
                texel_count,
                weight_count * planes,
                decoded.quant_index,
                decoded.is_dual_plane,
            );
            candidates.push(Candidate {
                mode_index: mode_index as u16,
                decoded,
                score,
                percentile: 0.0,
            });
        }

        // Convert raw scores into centiles by rank. 3D footprints have no
        // empirical ranking data and use a flat table instead.
        if is_3d {
            for c in &mut candidates {
                c.percentile = 0.0;
            }
        } else {
            let mut order: Vec<usize> = (0..candidates.len()).collect();
            order.sort_by(|&a, &b| {
                candidates[a]
                    .score
                    .total_cmp(&candidates[b].score)
                    .then(candidates[a].mode_index.cmp(&candidates[b].mode_index))
            });
            let div = (candidates.len().max(2) - 1) as f32;
            for (rank, &i) in order.iter().enumerate() {
                candidates[i].percentile = rank as f32 / div;
            }
        }

        // Second pass: assemble the packed tables, "always" modes first.
        let mut decimation_modes: Vec<DecimationMode> = Vec::new();
        let mut decimation_tables: Vec<Box<DecimationInfo>> = Vec::new();
        let mut block_modes: Vec<BlockMode> = Vec::new();
        let mut block_mode_packed_index = Box::new([BLOCK_BAD_MODE; MAX_BLOCK_MODES]);

        let mut find_decimation_mode = |dm: &mut Vec<DecimationMode>,
                                        dt: &mut Vec<Box<DecimationInfo>>,
                                        wx: u32,
                                        wy: u32,
                                        wz: u32|
         -> u8 {
            if let Some(i) = dm
                .iter()
                .position(|m| (m.weight_x, m.weight_y, m.weight_z) == (wx as u8, wy as u8, wz as u8))
            {
                return i as u8;
            }

            let info = if is_3d {
                decimation::build_decimation_info_3d(xdim, ydim, zdim, wx, wy, wz)
            } else {
                decimation::build_decimation_info_2d(xdim, ydim, wx, wy)
            };
            let weight_count = u32::from(info.weight_count);

            let mut maxprec_1plane = -1i8;
            let mut maxprec_2planes = -1i8;
            for level in 0..crate::quant::WEIGHT_QUANT_COUNT as u8 {
                let quant = QuantMethod::from_index(level);
                let bits1 = bise::sequence_bitcount(weight_count, quant);
                if (BLOCK_MIN_WEIGHT_BITS..=BLOCK_MAX_WEIGHT_BITS).contains(&bits1) {
                    maxprec_1plane = level as i8;
                }
                let bits2 = bise::sequence_bitcount(2 * weight_count, quant);
                if weight_count as usize <= BLOCK_MAX_WEIGHTS_2PLANE
                    && (BLOCK_MIN_WEIGHT_BITS..=BLOCK_MAX_WEIGHT_BITS).contains(&bits2)
                {
                    maxprec_2planes = level as i8;
                }
            }

            dm.push(DecimationMode {
                weight_x: wx as u8,
                weight_y: wy as u8,
                weight_z: wz as u8,
                maxprec_1plane,
                maxprec_2planes,
                percentile_hit: false,
            });
            dt.push(info);
            (dm.len() - 1) as u8
        };

        candidates.sort_by(|a, b| {
            let a_always = a.percentile <= ALWAYS_PERCENTILE;
            let b_always = b.percentile <= ALWAYS_PERCENTILE;
            b_always
                .cmp(&a_always)
                .then(a.mode_index.cmp(&b.mode_index))
        });

        let mut always_block_mode_count = 0;
        for c in &candidates {
            let hit = c.percentile <= mode_cutoff;
            if can_omit_modes && !hit {
                continue;
            }

            let dm_index = find_decimation_mode(
                &mut decimation_modes,
                &mut decimation_tables,
                c.decoded.weight_x,
                c.decoded.weight_y,
                c.decoded.weight_z,
            );
            if hit {
                decimation_modes[dm_index as usize].percentile_hit = true;
            }

            if c.percentile <= ALWAYS_PERCENTILE {
                always_block_mode_count += 1;
            }
            block_mode_packed_index[c.mode_index as usize] = block_modes.len() as u16;
            block_modes.push(BlockMode {
                mode_index: c.mode_index,
                decimation_mode: dm_index,
                quant_mode: QuantMethod::from_index(c.decoded.quant_index as u8),
                is_dual_plane: c.decoded.is_dual_plane,
                percentile_hit: hit,
            });
        }

        // Partition tables: the synthetic single entry plus 1024 each for
        // 2, 3 and 4 partitions.
        let mut partitions = Vec::with_capacity(1 + 3 * PARTITION_COUNT);
        partitions.push(partition::build_partition_info(
            xdim,
            ydim,
            zdim,
            1,
            0,
            &kmeans_texels,
        ));
        for count in 2..=4u32 {
            for seed in 0..PARTITION_COUNT as u32 {
                partitions.push(partition::build_partition_info(
                    xdim,
                    ydim,
                    zdim,
                    count,
                    seed,
                    &kmeans_texels,
                ));
            }
        }

        Box::new(BlockSizeDescriptor {
            xdim: xdim as u8,
            ydim: ydim as u8,
            zdim: zdim as u8,
            texel_count: texel_count as u8,
            block_modes,
            always_block_mode_count,
            block_mode_packed_index,
            decimation_modes,
            decimation_tables,
            partitions,
            kmeans_texels,
        })
    }

    pub(crate) fn is_3d(&self) -> bool {
        self.zdim > 1
    }

    /// The block mode for a *packed* index.
    pub(crate) fn block_mode(&self, packed_index: u16) -> &BlockMode {
        &self.block_modes[packed_index as usize]
    }

    /// Looks up a physical mode index; `None` if the mode is not legal for
    /// this footprint.
    pub(crate) fn packed_index_of(&self, mode_index: u16) -> Option<u16> {
        let packed = self.block_mode_packed_index[mode_index as usize];
        if packed == BLOCK_BAD_MODE {
            None
        } else {
            Some(packed)
        }
    }

    pub(crate) fn decimation_info(&self, decimation_mode: u8) -> &DecimationInfo {
        &self.decimation_tables[decimation_mode as usize]
    }

    pub(crate) fn decimation_mode(&self, decimation_mode: u8) -> &DecimationMode {
        &self.decimation_modes[decimation_mode as usize]
    }

    /// The partition info for `(partition_count, seed)`.
    pub(crate) fn partition_info(&self, partition_count: u32, seed: u32) -> &PartitionInfo {
        debug_assert!((1..=4).contains(&partition_count));
        debug_assert!((seed as usize) < PARTITION_COUNT);
        if partition_count == 1 {
            &self.partitions[0]
        } else {
            &self.partitions[1 + (partition_count as usize - 2) * PARTITION_COUNT + seed as usize]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_index_round_trips() {
        let bsd = BlockSizeDescriptor::new(6, 6, 1, false, 1.0);
        assert!(!bsd.block_modes.is_empty());
        for (packed, mode) in bsd.block_modes.iter().enumerate() {
            assert_eq!(
                bsd.block_mode_packed_index[mode.mode_index as usize],
                packed as u16
            );
        }
        let stored = bsd
            .block_mode_packed_index
            .iter()
            .filter(|&&i| i != BLOCK_BAD_MODE)
            .count();
        assert_eq!(stored, bsd.block_modes.len());
    }

    #[test]
    fn modes_respect_weight_limits() {
        for &(x, y) in &[(4u32, 4u32), (8, 8), (12, 12)] {
            let bsd = BlockSizeDescriptor::new(x, y, 1, false, 1.0);
            for mode in &bsd.block_modes {
                let di = bsd.decimation_info(mode.decimation_mode);
                let planes = if mode.is_dual_plane { 2 } else { 1 };
                let weights = u32::from(di.weight_count) * planes;
                assert!(weights <= BLOCK_MAX_WEIGHTS as u32);
                let bits = bise::sequence_bitcount(weights, mode.quant_mode);
                assert!((BLOCK_MIN_WEIGHT_BITS..=BLOCK_MAX_WEIGHT_BITS).contains(&bits));
                assert!(u32::from(di.weight_x) <= x);
                assert!(u32::from(di.weight_y) <= y);
            }
        }
    }

    #[test]
    fn always_modes_form_a_prefix() {
        let bsd = BlockSizeDescriptor::new(8, 8, 1, false, 1.0);
        assert!(bsd.always_block_mode_count > 0);
        assert!(bsd.always_block_mode_count < bsd.block_modes.len());
        for mode in &bsd.block_modes[..bsd.always_block_mode_count] {
            assert!(mode.percentile_hit);
        }
    }

    #[test]
    fn cutoff_shrinks_the_mode_set() {
        let all = BlockSizeDescriptor::new(6, 6, 1, true, 1.0);
        let some = BlockSizeDescriptor::new(6, 6, 1, true, 0.3);
        assert!(some.block_modes.len() < all.block_modes.len());
        assert!(!some.block_modes.is_empty());
    }

    #[test]
    fn partition_tables_are_complete() {
        let bsd = BlockSizeDescriptor::new(4, 4, 1, true, 0.5);
        assert_eq!(bsd.partitions.len(), 1 + 3 * PARTITION_COUNT);
        assert_eq!(bsd.partition_info(1, 0).partition_count, 1);
        for count in 2..=4 {
            let pi = bsd.partition_info(count, 500);
            assert_eq!(pi.partition_count, count as u8);
        }
    }

    #[test]
    fn known_2d_mode_decodes() {
        // Mode 0x4D: a plain 2D mode.
        let m = decode_block_mode_2d(0x4D).unwrap();
        assert!(m.weight_x >= 2 && m.weight_y >= 2);
        // The all-zero mode is reserved.
        assert!(decode_block_mode_2d(0).is_none());
    }

    #[test]
    fn descriptor_3d_builds() {
        let bsd = BlockSizeDescriptor::new(3, 3, 3, false, 1.0);
        assert!(bsd.is_3d());
        assert!(!bsd.block_modes.is_empty());
        for mode in &bsd.block_modes {
            let di = bsd.decimation_info(mode.decimation_mode);
            assert!(u32::from(di.weight_z) <= 3);
        }
    }
}
