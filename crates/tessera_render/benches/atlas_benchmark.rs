//! Benchmark for atlas packing and sprite batching.
//!
//! TARGET: 10,000 mixed-size sprites packed, drawn and flushed per frame
//!
//! Run with: cargo bench --package tessera_render --bench atlas_benchmark

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tessera_render::atlas::Skyline;
use tessera_render::{Renderer, RendererConfig, RgbImage, Size, SoftwareFactory, Vec2};

/// Deterministic sprite sizes between 4 and 67 pixels.
fn sprite_sizes(count: usize) -> Vec<(u32, u32)> {
    let mut state = 0x9E37_79B9_u32;
    (0..count)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (4 + state % 64, 4 + (state >> 8) % 64)
        })
        .collect()
}

fn benchmark_skyline_insert(c: &mut Criterion) {
    let sizes = sprite_sizes(1_000);

    let mut group = c.benchmark_group("skyline");
    group.throughput(Throughput::Elements(sizes.len() as u64));
    group.bench_function("insert_1000_mixed", |b| {
        b.iter(|| {
            let mut skyline = Skyline::new(Size::new(2048, 2048));
            for &(w, h) in &sizes {
                black_box(skyline.insert(w, h));
            }
            black_box(skyline.occupancy())
        });
    });
    group.finish();
}

fn benchmark_atlas_repack(c: &mut Criterion) {
    let mut group = c.benchmark_group("atlas_repack");
    group.sample_size(20);

    for count in [500usize, 2_000] {
        let images: Vec<_> = sprite_sizes(count)
            .into_iter()
            .map(|(w, h)| RgbImage::new(Size::new(w, h)))
            .collect();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &images, |b, images| {
            b.iter(|| {
                let mut renderer = bench_renderer();
                for image in images {
                    renderer.draw(image, Vec2::new(0.0, 0.0)).ok();
                }
                renderer.flush().ok();
                black_box(renderer.repack_atlases().ok())
            });
        });
    }
    group.finish();
}

fn bench_renderer() -> Renderer {
    let factory = SoftwareFactory::full();
    let mut config = RendererConfig::default();
    config.screen.width = 64;
    config.screen.height = 64;
    config.atlas.page_size = 1024;
    config.atlas.max_sprite_size = 128;
    config.atlas.max_pages = 64;
    Renderer::new(config, &[&factory]).expect("software backend")
}

fn benchmark_frame(c: &mut Criterion) {
    let sprites: Vec<_> = sprite_sizes(10_000)
        .into_iter()
        .map(|(w, h)| RgbImage::new(Size::new(w.min(32), h.min(32))))
        .collect();
    let mut renderer = bench_renderer();

    let mut group = c.benchmark_group("frame");
    group.sample_size(10);
    group.throughput(Throughput::Elements(sprites.len() as u64));
    group.bench_function("draw_flush_10k_sprites", |b| {
        b.iter(|| {
            for (i, sprite) in sprites.iter().enumerate() {
                let x = (i % 64) as f32;
                let y = (i / 64 % 64) as f32;
                renderer.draw(sprite, Vec2::new(x, y)).ok();
            }
            black_box(renderer.flush().ok())
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    benchmark_skyline_insert,
    benchmark_atlas_repack,
    benchmark_frame,
);
criterion_main!(benches);
