//! Partition table generation.
//!
//! ASTC defines 1024 candidate partitionings for each of the 2/3/4 partition
//! counts, selected by a seeded hash of the texel position. The hash is part
//! of the wire format: a decoder must reproduce it exactly, so the functions
//! here follow the format specification bit for bit. Some seeds produce
//! duplicate partitionings or leave a partition empty; both are valid
//! encodings, but the compressor skips them during search by comparing the
//! coverage bitmaps stored here.

use crate::block_size::{BLOCK_MAX_KMEANS_TEXELS, BLOCK_MAX_PARTITIONS, BLOCK_MAX_TEXELS};

/// The number of partitionings per partition count.
pub(crate) const PARTITION_COUNT: usize = 1024;

/// The texel-to-partition map and derived lookup data for one partitioning.
pub(crate) struct PartitionInfo {
    /// The number of partitions used by this partitioning.
    pub partition_count: u8,
    /// The number of texels in each partition.
    pub partition_texel_count: [u8; BLOCK_MAX_PARTITIONS],
    /// The partition of each texel.
    pub partition_of_texel: [u8; BLOCK_MAX_TEXELS],
    /// The texels of each partition, `partition_texel_count` entries each.
    pub texels_of_partition: [[u8; BLOCK_MAX_TEXELS]; BLOCK_MAX_PARTITIONS],
    /// Canonical coverage pattern over the sample texels, used to detect
    /// duplicate partitionings during search.
    pub coverage_bitmaps: [u64; BLOCK_MAX_PARTITIONS],
}

impl PartitionInfo {
    fn new() -> Self {
        PartitionInfo {
            partition_count: 1,
            partition_texel_count: [0; BLOCK_MAX_PARTITIONS],
            partition_of_texel: [0; BLOCK_MAX_TEXELS],
            texels_of_partition: [[0; BLOCK_MAX_TEXELS]; BLOCK_MAX_PARTITIONS],
            coverage_bitmaps: [0; BLOCK_MAX_PARTITIONS],
        }
    }

    /// The texels assigned to `partition`.
    pub fn texels(&self, partition: usize) -> &[u8] {
        &self.texels_of_partition[partition][..self.partition_texel_count[partition] as usize]
    }

    /// Whether any partition ended up without texels.
    pub fn has_empty_partition(&self) -> bool {
        self.partition_texel_count[..self.partition_count as usize]
            .iter()
            .any(|&c| c == 0)
    }
}

/// The full-avalanche hash the partition function is built on.
fn hash52(mut p: u32) -> u32 {
    p ^= p >> 15;
    p = p.wrapping_sub(p << 17);
    p = p.wrapping_add(p << 7);
    p = p.wrapping_add(p << 4);
    p ^= p >> 5;
    p = p.wrapping_add(p << 16);
    p ^= p >> 7;
    p ^= p >> 3;
    p ^= p << 6;
    p ^= p >> 17;
    p
}

/// Computes the partition of one texel. This is the format's partition
/// selection function and must not be altered.
pub(crate) fn select_partition(
    seed: u32,
    mut x: u32,
    mut y: u32,
    mut z: u32,
    partition_count: u32,
    small_block: bool,
) -> u8 {
    if partition_count <= 1 {
        return 0;
    }

    // Blocks with under 31 texels sample the pattern at double resolution.
    if small_block {
        x <<= 1;
        y <<= 1;
        z <<= 1;
    }

    let seed = seed + (partition_count - 1) * 1024;
    let rnum = hash52(seed);

    let mut s1 = (rnum & 0xF) as u32;
    let mut s2 = ((rnum >> 4) & 0xF) as u32;
    let mut s3 = ((rnum >> 8) & 0xF) as u32;
    let mut s4 = ((rnum >> 12) & 0xF) as u32;
    let mut s5 = ((rnum >> 16) & 0xF) as u32;
    let mut s6 = ((rnum >> 20) & 0xF) as u32;
    let mut s7 = ((rnum >> 24) & 0xF) as u32;
    let mut s8 = ((rnum >> 28) & 0xF) as u32;
    let mut s9 = ((rnum >> 18) & 0xF) as u32;
    let mut s10 = ((rnum >> 22) & 0xF) as u32;
    let mut s11 = ((rnum >> 26) & 0xF) as u32;
    let mut s12 = (((rnum >> 30) | (rnum << 2)) & 0xF) as u32;

    s1 *= s1;
    s2 *= s2;
    s3 *= s3;
    s4 *= s4;
    s5 *= s5;
    s6 *= s6;
    s7 *= s7;
    s8 *= s8;
    s9 *= s9;
    s10 *= s10;
    s11 *= s11;
    s12 *= s12;

    let (sh1, sh2) = if seed & 1 != 0 {
        (
            if seed & 2 != 0 { 4 } else { 5 },
            if partition_count == 3 { 6 } else { 5 },
        )
    } else {
        (
            if partition_count == 3 { 6 } else { 5 },
            if seed & 2 != 0 { 4 } else { 5 },
        )
    };
    let sh3 = if seed & 0x10 != 0 { sh1 } else { sh2 };

    s1 >>= sh1;
    s2 >>= sh2;
    s3 >>= sh1;
    s4 >>= sh2;
    s5 >>= sh1;
    s6 >>= sh2;
    s7 >>= sh1;
    s8 >>= sh2;
    s9 >>= sh3;
    s10 >>= sh3;
    s11 >>= sh3;
    s12 >>= sh3;

    let a = (s1 * x + s2 * y + s11 * z + (rnum >> 14)) & 0x3F;
    let b = (s3 * x + s4 * y + s12 * z + (rnum >> 10)) & 0x3F;
    let mut c = (s5 * x + s6 * y + s9 * z + (rnum >> 6)) & 0x3F;
    let mut d = (s7 * x + s8 * y + s10 * z + (rnum >> 2)) & 0x3F;

    if partition_count <= 3 {
        d = 0;
    }
    if partition_count <= 2 {
        c = 0;
    }

    if a >= b && a >= c && a >= d {
        0
    } else if b >= c && b >= d {
        1
    } else if c >= d {
        2
    } else {
        3
    }
}

/// Builds the partition info for one `(partition_count, seed)` pair.
///
/// `kmeans_texels` is the sample-texel list the block size descriptor uses
/// for coverage bitmaps on blocks with more than 64 texels.
pub(crate) fn build_partition_info(
    xdim: u32,
    ydim: u32,
    zdim: u32,
    partition_count: u32,
    seed: u32,
    kmeans_texels: &[u8],
) -> PartitionInfo {
    let texel_count = (xdim * ydim * zdim) as usize;
    debug_assert!(texel_count <= BLOCK_MAX_TEXELS);

    let mut pi = PartitionInfo::new();
    pi.partition_count = partition_count as u8;

    let small_block = xdim * ydim * zdim < 31;

    let mut texel = 0usize;
    for z in 0..zdim {
        for y in 0..ydim {
            for x in 0..xdim {
                let part = select_partition(seed, x, y, z, partition_count, small_block);
                pi.partition_of_texel[texel] = part;
                let p = part as usize;
                pi.texels_of_partition[p][pi.partition_texel_count[p] as usize] = texel as u8;
                pi.partition_texel_count[p] += 1;
                texel += 1;
            }
        }
    }

    if texel_count <= 64 {
        for t in 0..texel_count {
            let p = pi.partition_of_texel[t] as usize;
            pi.coverage_bitmaps[p] |= 1u64 << t;
        }
    } else {
        debug_assert!(kmeans_texels.len() <= BLOCK_MAX_KMEANS_TEXELS);
        for (i, &t) in kmeans_texels.iter().enumerate() {
            let p = pi.partition_of_texel[t as usize] as usize;
            pi.coverage_bitmaps[p] |= 1u64 << i;
        }
    }

    pi
}
