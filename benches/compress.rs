use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::{Rng, SeedableRng};

use astc::{Config, Context, ImageView, ImageViewMut, Preset, Profile, Swizzle};

fn gradient_image(width: u32, height: u32) -> Vec<f32> {
    let mut pixels = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            let fx = x as f32 / width as f32;
            let fy = y as f32 / height as f32;
            pixels.extend_from_slice(&[fx, fy, (fx * 7.0).sin() * 0.5 + 0.5, 1.0]);
        }
    }
    pixels
}

fn noise_image(width: u32, height: u32) -> Vec<f32> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    (0..width * height * 4).map(|_| rng.gen_range(0.0..1.0)).collect()
}

fn bench_compress(c: &mut Criterion) {
    const SIZE: u32 = 96;
    let gradient = gradient_image(SIZE, SIZE);
    let noise = noise_image(SIZE, SIZE);

    let mut group = c.benchmark_group("compress_6x6");
    for (name, pixels) in [("gradient", &gradient), ("noise", &noise)] {
        for preset in [Preset::Fastest, Preset::Medium] {
            let config = Config::new(Profile::Ldr, 6, 6, 1, preset).unwrap();
            let ctx = Context::new(config).unwrap();
            let image = ImageView::new(pixels, SIZE, SIZE, 1).unwrap();
            let mut out = vec![0u8; ctx.compressed_size(SIZE, SIZE, 1)];

            group.bench_function(format!("{name}/{preset:?}"), |b| {
                b.iter(|| {
                    ctx.compress_image(black_box(&image), Swizzle::RGBA, &mut out, 1)
                        .unwrap();
                    black_box(&out);
                })
            });
        }
    }
    group.finish();
}

fn bench_decompress(c: &mut Criterion) {
    const SIZE: u32 = 96;
    let pixels = gradient_image(SIZE, SIZE);

    let config = Config::new(Profile::Ldr, 6, 6, 1, Preset::Medium).unwrap();
    let ctx = Context::new(config).unwrap();
    let image = ImageView::new(&pixels, SIZE, SIZE, 1).unwrap();
    let mut compressed = vec![0u8; ctx.compressed_size(SIZE, SIZE, 1)];
    ctx.compress_image(&image, Swizzle::RGBA, &mut compressed, 1)
        .unwrap();

    let mut decoded = vec![0.0f32; pixels.len()];
    c.bench_function("decompress_6x6", |b| {
        b.iter(|| {
            let mut out = ImageViewMut::new(&mut decoded, SIZE, SIZE, 1).unwrap();
            ctx.decompress_image(black_box(&compressed), &mut out, Swizzle::RGBA, 1)
                .unwrap();
            black_box(&decoded);
        })
    });
}

criterion_group!(benches, bench_compress, bench_decompress);
criterion_main!(benches);
