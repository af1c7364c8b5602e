//! Partition candidate search.
//!
//! Trying all 1024 seeds with a full line fit would dominate compression
//! time, so the search first clusters the block's sample texels with a few
//! k-means rounds, ranks every seed by how well its coverage bitmaps agree
//! with the clustering, and only runs the expensive two-line scoring on the
//! best ranked seeds. Scoring produces two winners: the best seed assuming
//! uncorrelated chroma, and the best assuming chroma correlated through the
//! origin (the RGBS family of endpoint formats).

use glam::Vec4;

use crate::block::{ErrorWeightBlock, ImageBlock};
use crate::block_size::{BlockSizeDescriptor, BLOCK_MAX_PARTITIONS};
use crate::ideal::{compute_avgs_and_dirs_3_comp_rgb, compute_avgs_and_dirs_4_comp, PartitionMetrics};
use crate::partition::PARTITION_COUNT;

const PERMS_2: [[usize; 4]; 2] = [[0, 1, 2, 3], [1, 0, 2, 3]];
const PERMS_3: [[usize; 4]; 6] = [
    [0, 1, 2, 3],
    [0, 2, 1, 3],
    [1, 0, 2, 3],
    [1, 2, 0, 3],
    [2, 0, 1, 3],
    [2, 1, 0, 3],
];
const PERMS_4: [[usize; 4]; 24] = [
    [0, 1, 2, 3],
    [0, 1, 3, 2],
    [0, 2, 1, 3],
    [0, 2, 3, 1],
    [0, 3, 1, 2],
    [0, 3, 2, 1],
    [1, 0, 2, 3],
    [1, 0, 3, 2],
    [1, 2, 0, 3],
    [1, 2, 3, 0],
    [1, 3, 0, 2],
    [1, 3, 2, 0],
    [2, 0, 1, 3],
    [2, 0, 3, 1],
    [2, 1, 0, 3],
    [2, 1, 3, 0],
    [2, 3, 0, 1],
    [2, 3, 1, 0],
    [3, 0, 1, 2],
    [3, 0, 2, 1],
    [3, 1, 0, 2],
    [3, 1, 2, 0],
    [3, 2, 0, 1],
    [3, 2, 1, 0],
];

fn permutations(partition_count: u32) -> &'static [[usize; 4]] {
    match partition_count {
        2 => &PERMS_2,
        3 => &PERMS_3,
        _ => &PERMS_4,
    }
}

/// The number of texel assignments two partitionings disagree on, under the
/// best relabeling of partitions.
fn mismatch_count(a: &[u64; 4], b: &[u64; 4], partition_count: u32) -> u32 {
    let mut best = u32::MAX;
    for perm in permutations(partition_count) {
        let mut count = 0;
        for p in 0..partition_count as usize {
            count += (a[p] ^ b[perm[p]]).count_ones();
        }
        best = best.min(count);
    }
    best
}

/// Clusters the block's sample texels into `partition_count` groups and
/// returns the coverage bitmap of each group.
fn kmeans_cluster_bitmaps(
    bsd: &BlockSizeDescriptor,
    blk: &ImageBlock,
    partition_count: u32,
) -> [u64; 4] {
    let samples = &bsd.kmeans_texels;
    let k = partition_count as usize;

    // Farthest-point seeding from the first sample texel keeps the
    // clustering deterministic.
    let mut centers = [Vec4::ZERO; BLOCK_MAX_PARTITIONS];
    centers[0] = blk.texel(samples[0] as usize);
    for c in 1..k {
        let mut best_texel = samples[0];
        let mut best_dist = -1.0f32;
        for &t in samples {
            let texel = blk.texel(t as usize);
            let mut min_dist = f32::INFINITY;
            for center in centers.iter().take(c) {
                min_dist = min_dist.min((texel - *center).length_squared());
            }
            if min_dist > best_dist {
                best_dist = min_dist;
                best_texel = t;
            }
        }
        centers[c] = blk.texel(best_texel as usize);
    }

    let mut assignment = [0u8; 64];
    for _ in 0..3 {
        // Assign
        for (i, &t) in samples.iter().enumerate() {
            let texel = blk.texel(t as usize);
            let mut best = 0u8;
            let mut best_dist = f32::INFINITY;
            for (c, center) in centers.iter().enumerate().take(k) {
                let dist = (texel - *center).length_squared();
                if dist < best_dist {
                    best_dist = dist;
                    best = c as u8;
                }
            }
            assignment[i] = best;
        }

        // Update
        let mut sums = [Vec4::ZERO; BLOCK_MAX_PARTITIONS];
        let mut counts = [0u32; BLOCK_MAX_PARTITIONS];
        for (i, &t) in samples.iter().enumerate() {
            let c = assignment[i] as usize;
            sums[c] += blk.texel(t as usize);
            counts[c] += 1;
        }
        for c in 0..k {
            if counts[c] > 0 {
                centers[c] = sums[c] / counts[c] as f32;
            }
        }
    }

    let mut bitmaps = [0u64; 4];
    for (i, _) in samples.iter().enumerate() {
        bitmaps[assignment[i] as usize] |= 1u64 << i;
    }
    bitmaps
}

/// Squared point-to-line distances summed per partition for the two line
/// hypotheses.
fn score_partitioning(
    bsd: &BlockSizeDescriptor,
    blk: &ImageBlock,
    ewb: &ErrorWeightBlock,
    partition_count: u32,
    seed: u32,
    uses_alpha: bool,
) -> (f32, f32) {
    let pi = bsd.partition_info(partition_count, seed);

    let mut pm = [PartitionMetrics::default(); BLOCK_MAX_PARTITIONS];
    if uses_alpha {
        compute_avgs_and_dirs_4_comp(pi, blk, ewb, &mut pm);
    } else {
        compute_avgs_and_dirs_3_comp_rgb(pi, blk, ewb, &mut pm);
    }

    let mut uncor_error = 0.0f32;
    let mut samec_error = 0.0f32;

    for partition in 0..partition_count as usize {
        let avg = pm[partition].avg;
        let uncor_dir = pm[partition].dir.normalize_or_zero();
        let samec_dir = avg.normalize_or_zero();

        for &t in pi.texels(partition) {
            let t = t as usize;
            let texel = blk.texel(t);
            let w = ewb.texel_weight[t];

            let rel = texel - avg;
            let along = rel.dot(uncor_dir);
            uncor_error += w * (rel - uncor_dir * along).length_squared();

            let along_origin = texel.dot(samec_dir);
            samec_error += w * (texel - samec_dir * along_origin).length_squared();
        }
    }

    (uncor_error, samec_error)
}

/// Finds the best partitioning seeds to trial for a block.
///
/// Returns `(best_uncorrelated_seed, best_same_chroma_seed)`. Seeds with
/// empty partitions and duplicate partitionings are skipped; they are valid
/// encodings but never worth search time.
pub(crate) fn find_best_partition_candidates(
    bsd: &BlockSizeDescriptor,
    blk: &ImageBlock,
    ewb: &ErrorWeightBlock,
    partition_count: u32,
    partition_search_limit: u32,
) -> (u32, u32) {
    debug_assert!((2..=4).contains(&partition_count));

    let cluster_bitmaps = kmeans_cluster_bitmaps(bsd, blk, partition_count);

    // Rank all seeds by disagreement with the clustering.
    let mut ranked: Vec<(u32, u32)> = (0..PARTITION_COUNT as u32)
        .map(|seed| {
            let pi = bsd.partition_info(partition_count, seed);
            (
                mismatch_count(&pi.coverage_bitmaps, &cluster_bitmaps, partition_count),
                seed,
            )
        })
        .collect();
    ranked.sort_unstable();

    let uses_alpha = !blk.is_constant_channel(3);

    let mut best_uncor = (f32::INFINITY, 0u32);
    let mut best_samec = (f32::INFINITY, 0u32);
    let mut seen: Vec<[u64; 4]> = Vec::new();
    let mut evaluated = 0u32;

    for &(_, seed) in &ranked {
        if evaluated >= partition_search_limit {
            break;
        }

        let pi = bsd.partition_info(partition_count, seed);
        if pi.partition_count as u32 != partition_count || pi.has_empty_partition() {
            continue;
        }

        // Canonicalize bitmaps so relabeled duplicates are caught too.
        let mut canonical = pi.coverage_bitmaps;
        canonical.sort_unstable();
        if seen.contains(&canonical) {
            continue;
        }
        seen.push(canonical);

        let (uncor, samec) =
            score_partitioning(bsd, blk, ewb, partition_count, seed, uses_alpha);
        if uncor < best_uncor.0 {
            best_uncor = (uncor, seed);
        }
        if samec < best_samec.0 {
            best_samec = (samec, seed);
        }
        evaluated += 1;
    }

    (best_uncor.1, best_samec.1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{compute_error_weights, BlockInputModifiers, ImageBlock};
    use crate::config::{Config, Preset, Profile};

    fn split_block(bsd: &BlockSizeDescriptor) -> ImageBlock {
        // Left half red, right half blue.
        let mut blk = ImageBlock::new();
        blk.texel_count = bsd.texel_count;
        let xdim = bsd.xdim as usize;
        for y in 0..bsd.ydim as usize {
            for x in 0..xdim {
                let t = y * xdim + x;
                if x < xdim / 2 {
                    blk.data_r[t] = 65535.0;
                } else {
                    blk.data_b[t] = 65535.0;
                }
                blk.data_a[t] = 65535.0;
            }
        }
        blk.data_min = Vec4::new(0.0, 0.0, 0.0, 65535.0);
        blk.data_max = Vec4::new(65535.0, 0.0, 65535.0, 65535.0);
        blk
    }

    #[test]
    fn two_partition_split_is_found() {
        let config = Config::new(Profile::Ldr, 8, 8, 1, Preset::Medium).unwrap();
        let bsd = BlockSizeDescriptor::new(8, 8, 1, true, 0.75);
        let blk = split_block(&bsd);
        let ewb = compute_error_weights(&config, &blk, &vec![1.0; 64], &BlockInputModifiers::NONE);

        let (uncor_seed, _) = find_best_partition_candidates(&bsd, &blk, &ewb, 2, 100);

        // The chosen partitioning must actually separate the halves.
        let pi = bsd.partition_info(2, uncor_seed);
        let mut crossings = 0;
        for y in 0..8 {
            for x in 0..8 {
                let t = y * 8 + x;
                let left = pi.partition_of_texel[t] == pi.partition_of_texel[y * 8];
                if (x < 4) != left {
                    crossings += 1;
                }
            }
        }
        assert!(crossings <= 8, "partition crosses the split {crossings} times");
    }

    #[test]
    fn mismatch_counts_relabelings_as_equal() {
        let a = [0xFF00u64, 0x00FF, 0, 0];
        let b = [0x00FFu64, 0xFF00, 0, 0];
        assert_eq!(mismatch_count(&a, &b, 2), 0);
        let c = [0xF00Fu64, 0x0FF0, 0, 0];
        assert!(mismatch_count(&a, &c, 2) > 0);
    }

    #[test]
    fn kmeans_splits_bimodal_blocks() {
        let bsd = BlockSizeDescriptor::new(8, 8, 1, true, 0.75);
        let blk = split_block(&bsd);
        let bitmaps = kmeans_cluster_bitmaps(&bsd, &blk, 2);
        assert_ne!(bitmaps[0], 0);
        assert_ne!(bitmaps[1], 0);
        assert_eq!(bitmaps[0] | bitmaps[1], u64::MAX);
        assert_eq!(bitmaps[0] & bitmaps[1], 0);
    }
}
