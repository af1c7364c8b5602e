//! End-to-end compression and decompression scenarios.

use astc::{Config, Context, ImageView, ImageViewMut, Preset, Profile, Swizzle};

fn compress_decompress(
    ctx: &Context,
    pixels: &[f32],
    width: u32,
    height: u32,
    threads: u32,
) -> (Vec<u8>, Vec<f32>) {
    let image = ImageView::new(pixels, width, height, 1).unwrap();
    let mut compressed = vec![0u8; ctx.compressed_size(width, height, 1)];
    ctx.compress_image(&image, Swizzle::RGBA, &mut compressed, threads)
        .unwrap();

    let mut decoded = vec![0.0f32; pixels.len()];
    let mut out = ImageViewMut::new(&mut decoded, width, height, 1).unwrap();
    ctx.decompress_image(&compressed, &mut out, Swizzle::RGBA, threads)
        .unwrap();

    (compressed, decoded)
}

fn psnr(a: &[f32], b: &[f32]) -> f64 {
    let mut sum_sq = 0.0f64;
    for (&x, &y) in a.iter().zip(b) {
        let d = (x - y) as f64;
        sum_sq += d * d;
    }
    let mse = sum_sq / a.len() as f64;
    -10.0 * mse.max(1e-30).log10()
}

#[test]
fn solid_color_ldr_block() {
    let config = Config::new(Profile::Ldr, 4, 4, 1, Preset::Medium).unwrap();
    let ctx = Context::new(config).unwrap();

    let color = [128.0 / 255.0, 64.0 / 255.0, 32.0 / 255.0, 1.0];
    let mut pixels = Vec::new();
    for _ in 0..16 {
        pixels.extend_from_slice(&color);
    }

    let (compressed, decoded) = compress_decompress(&ctx, &pixels, 4, 4, 1);

    // A constant block must use the void-extent encoding: low nine mode
    // bits all set except bit 1, with the UNORM16 flag clear.
    let mode = u16::from_le_bytes([compressed[0], compressed[1]]);
    assert_eq!(mode & 0x1FF, 0x1FC, "not a constant-color block");
    assert_eq!(mode & 0x200, 0, "LDR constants use the UNORM16 form");

    // UNORM round trip is exact for 8-bit data.
    for texel in decoded.chunks(4) {
        for c in 0..4 {
            assert!(
                (texel[c] - color[c]).abs() < 0.5 / 65535.0,
                "channel {c}: {} vs {}",
                texel[c],
                color[c]
            );
        }
    }
}

#[test]
fn solid_color_hdr_block() {
    let config = Config::new(Profile::Hdr, 4, 4, 1, Preset::Medium).unwrap();
    let ctx = Context::new(config).unwrap();

    // All components exactly representable in FP16.
    let color = [1.5f32, 0.25, 0.0, 1.0];
    let mut pixels = Vec::new();
    for _ in 0..16 {
        pixels.extend_from_slice(&color);
    }

    let (compressed, decoded) = compress_decompress(&ctx, &pixels, 4, 4, 1);

    let mode = u16::from_le_bytes([compressed[0], compressed[1]]);
    assert_eq!(mode & 0x1FF, 0x1FC);
    assert_ne!(mode & 0x200, 0, "HDR constants use the FP16 form");

    // FP16-representable values decode bit-exactly.
    for texel in decoded.chunks(4) {
        assert_eq!(texel, &color[..]);
    }
}

#[test]
fn gradient_ldr_block() {
    let config = Config::new(Profile::Ldr, 6, 6, 1, Preset::Medium).unwrap();
    let ctx = Context::new(config).unwrap();

    let mut pixels = Vec::new();
    for _y in 0..6 {
        for x in 0..6 {
            pixels.extend_from_slice(&[(x as f32 * 51.0) / 255.0, 0.0, 0.0, 1.0]);
        }
    }

    let (compressed, decoded) = compress_decompress(&ctx, &pixels, 6, 6, 1);
    assert!(psnr(&pixels, &decoded) >= 45.0, "psnr {}", psnr(&pixels, &decoded));

    // Re-compressing the decoded block must produce the identical bytes:
    // the physical <-> symbolic mapping is stable.
    let image = ImageView::new(&pixels, 6, 6, 1).unwrap();
    let mut again = vec![0u8; 16];
    ctx.compress_image(&image, Swizzle::RGBA, &mut again, 1).unwrap();
    assert_eq!(compressed, again);
}

#[test]
fn two_color_block_reconstructs_without_bleed() {
    // A left-red/right-blue split looks like a partitioning case, but the
    // two colors are collinear in color space, so a single-partition
    // encoding can reconstruct them exactly and the encoder is free to
    // pick it. This test therefore only requires bleed-free
    // reconstruction; `partitioned_content_encodes_with_partitions`
    // below covers content that genuinely needs a partitioned encoding.
    let config = Config::new(Profile::Ldr, 8, 8, 1, Preset::Thorough).unwrap();
    let ctx = Context::new(config).unwrap();

    let mut pixels = Vec::new();
    for _y in 0..8 {
        for x in 0..8 {
            if x < 4 {
                pixels.extend_from_slice(&[1.0, 0.0, 0.0, 1.0]);
            } else {
                pixels.extend_from_slice(&[0.0, 0.0, 1.0, 1.0]);
            }
        }
    }

    let (_, decoded) = compress_decompress(&ctx, &pixels, 8, 8, 1);

    // Near-zero cross-channel bleed: red stays red, blue stays blue.
    for (i, texel) in decoded.chunks(4).enumerate() {
        let x = i % 8;
        if x < 4 {
            assert!(texel[0] > 0.95 && texel[2] < 0.05, "texel {i}: {texel:?}");
        } else {
            assert!(texel[2] > 0.95 && texel[0] < 0.05, "texel {i}: {texel:?}");
        }
    }
}

#[test]
fn partitioned_content_encodes_with_partitions() {
    // Two halves ramping along different color axes force a partitioned
    // encoding; the partition count field sits at bits 11..13 of the block.
    let config = Config::new(Profile::Ldr, 8, 8, 1, Preset::Thorough).unwrap();
    let ctx = Context::new(config).unwrap();

    let mut pixels = Vec::new();
    for y in 0..8 {
        for x in 0..8 {
            if x < 4 {
                pixels.extend_from_slice(&[x as f32 * 0.18, 0.0, 0.0, 1.0]);
            } else {
                pixels.extend_from_slice(&[0.0, 1.0, y as f32 * 0.12, 1.0]);
            }
        }
    }

    let (compressed, decoded) = compress_decompress(&ctx, &pixels, 8, 8, 1);
    assert!(psnr(&pixels, &decoded) >= 30.0);

    let mode = u16::from_le_bytes([compressed[0], compressed[1]]);
    assert_ne!(mode & 0x1FF, 0x1FC, "not a constant block");
    let partition_count = ((mode >> 11) & 0x3) + 1;
    assert!(partition_count >= 2, "chose {partition_count} partitions");
}

#[test]
fn parallel_compression_is_deterministic() {
    let config = Config::new(Profile::Ldr, 6, 6, 1, Preset::Fast).unwrap();
    let ctx = Context::new(config).unwrap();

    // A 48x30 image with mixed content.
    let width = 48u32;
    let height = 30u32;
    let mut pixels = Vec::new();
    for y in 0..height {
        for x in 0..width {
            let fx = x as f32 / width as f32;
            let fy = y as f32 / height as f32;
            pixels.extend_from_slice(&[
                fx,
                (fx * 9.0 + fy * 5.0).sin() * 0.5 + 0.5,
                fy,
                1.0 - fx * 0.5,
            ]);
        }
    }

    let image = ImageView::new(&pixels, width, height, 1).unwrap();
    let size = ctx.compressed_size(width, height, 1);

    let mut reference = vec![0u8; size];
    ctx.compress_image(&image, Swizzle::RGBA, &mut reference, 1)
        .unwrap();

    for threads in [2u32, 8, 32] {
        let mut output = vec![0u8; size];
        ctx.compress_image(&image, Swizzle::RGBA, &mut output, threads)
            .unwrap();
        assert_eq!(reference, output, "thread count {threads}");
    }
}

#[test]
fn arbitrary_data_decodes_without_errors() {
    let config = Config::new(Profile::Ldr, 4, 4, 1, Preset::Fast).unwrap();
    let ctx = Context::new(config).unwrap();

    // Deterministic pseudo-random compressed data.
    let mut state = 0x243F6A8885A308D3u64;
    let blocks = 64;
    let mut data = vec![0u8; blocks * 16];
    for b in &mut data {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        *b = (state >> 56) as u8;
    }

    let mut decoded = vec![0.0f32; 32 * 32 * 4];
    let mut out = ImageViewMut::new(&mut decoded, 32, 32, 1).unwrap();
    ctx.decompress_image(&data, &mut out, Swizzle::RGBA, 2).unwrap();

    // Every texel is either valid data or the error color; never NaN in
    // the LDR profile.
    assert!(decoded.iter().all(|v| v.is_finite()));
}

#[test]
fn full_image_round_trip_quality() {
    let config = Config::new(Profile::Ldr, 6, 6, 1, Preset::Medium).unwrap();
    let ctx = Context::new(config).unwrap();

    let width = 24u32;
    let height = 24u32;
    let mut pixels = Vec::new();
    for y in 0..height {
        for x in 0..width {
            let fx = x as f32 / (width - 1) as f32;
            let fy = y as f32 / (height - 1) as f32;
            pixels.extend_from_slice(&[fx, fy, 1.0 - fx, 1.0]);
        }
    }

    let (_, decoded) = compress_decompress(&ctx, &pixels, width, height, 2);
    let quality = psnr(&pixels, &decoded);
    assert!(quality >= 38.0, "psnr {quality}");
}

#[test]
fn three_d_block_round_trip() {
    let config = Config::new(Profile::Ldr, 3, 3, 3, Preset::Medium).unwrap();
    let ctx = Context::new(config).unwrap();

    let mut pixels = Vec::new();
    for z in 0..3 {
        for _y in 0..3 {
            for x in 0..3 {
                pixels.extend_from_slice(&[
                    x as f32 / 2.0,
                    z as f32 / 2.0,
                    0.25,
                    1.0,
                ]);
            }
        }
    }

    let image = ImageView::new(&pixels, 3, 3, 3).unwrap();
    let mut compressed = vec![0u8; ctx.compressed_size(3, 3, 3)];
    ctx.compress_image(&image, Swizzle::RGBA, &mut compressed, 1)
        .unwrap();

    let mut decoded = vec![0.0f32; pixels.len()];
    let mut out = ImageViewMut::new(&mut decoded, 3, 3, 3).unwrap();
    ctx.decompress_image(&compressed, &mut out, Swizzle::RGBA, 1)
        .unwrap();

    assert!(psnr(&pixels, &decoded) >= 30.0);
}

#[test]
fn buffer_size_errors() {
    let config = Config::new(Profile::Ldr, 4, 4, 1, Preset::Fast).unwrap();
    let ctx = Context::new(config).unwrap();

    let pixels = vec![0.5f32; 8 * 8 * 4];
    let image = ImageView::new(&pixels, 8, 8, 1).unwrap();

    let mut too_small = vec![0u8; 16];
    let err = ctx
        .compress_image(&image, Swizzle::RGBA, &mut too_small, 1)
        .unwrap_err();
    assert!(matches!(err, astc::Error::BufferTooSmall { needed: 64, .. }));
}
