//! Fracture pipeline benchmarks (criterion - wall-clock time).
//!
//! Run all:    cargo bench --manifest-path benchmarks/Cargo.toml --bench fracture
//! Filter:     cargo bench --manifest-path benchmarks/Cargo.toml --bench fracture -- codebook

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use deepfracture::field::VolumetricField;
use deepfracture::mesh::surface_nets::surface_nets;
use deepfracture::model::{Codebook, Tensor};
use deepfracture::physics::{BodyDesc, BodyShape};
use deepfracture::segmentation::{Segmenter, WatershedParams, WatershedSegmenter};
use deepfracture::{BodyId, ImpactEvent, ImpactEventAggregator, PhysicsBackend, PhysicsConfig, RigidBodyWorld};
use glam::{Quat, Vec3};

fn pseudo_random(seed: u32, len: usize) -> Vec<f32> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (state >> 8) as f32 / (1u32 << 24) as f32 * 2.0 - 1.0
        })
        .collect()
}

/// Two touching balls, positive inside.
fn dumbbell(resolution: usize) -> VolumetricField {
    VolumetricField::from_fn(resolution, |p| {
        let a = 0.4 - (p - Vec3::new(-0.35, 0.0, 0.0)).length();
        let b = 0.4 - (p - Vec3::new(0.35, 0.0, 0.0)).length();
        a.max(b)
    })
}

// ---------------------------------------------------------------------------
// Codebook lookup
// ---------------------------------------------------------------------------

fn bench_codebook(c: &mut Criterion) {
    let mut group = c.benchmark_group("codebook/nearest");
    let dim = 132;
    for &rows in &[512, 2048, 8192] {
        let book = Codebook::from_tensor(&Tensor::new(vec![rows, dim], pseudo_random(7, rows * dim)))
            .expect("valid codebook");
        let query = pseudo_random(11, dim);
        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, _| {
            b.iter(|| book.nearest(&query, None));
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Watershed
// ---------------------------------------------------------------------------

fn bench_watershed(c: &mut Criterion) {
    let mut group = c.benchmark_group("watershed/dumbbell");
    group.sample_size(20);
    for &resolution in &[32, 64] {
        let image = dumbbell(resolution).discretize();
        let params = WatershedParams::default();
        group.bench_with_input(BenchmarkId::from_parameter(resolution), &resolution, |b, _| {
            b.iter(|| WatershedSegmenter.segment(&image, &params));
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Surface extraction
// ---------------------------------------------------------------------------

fn bench_surface_nets(c: &mut Criterion) {
    let mut group = c.benchmark_group("surface_nets/dumbbell");
    for &resolution in &[32, 64, 128] {
        let field = dumbbell(resolution);
        group.bench_with_input(BenchmarkId::from_parameter(resolution), &resolution, |b, &r| {
            b.iter(|| surface_nets(field.data(), r));
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Simulation step and impact aggregation
// ---------------------------------------------------------------------------

fn setup_stack(n: usize) -> RigidBodyWorld {
    let mut world = RigidBodyWorld::new(PhysicsConfig::default());
    world
        .create_body(
            &BodyDesc::fixed(BodyShape::Cuboid {
                half_extents: Vec3::new(50.0, 0.5, 50.0),
            })
            .with_pose(Vec3::new(0.0, -0.5, 0.0), Quat::IDENTITY),
        )
        .expect("floor");
    let side = (n as f32).sqrt().ceil() as usize;
    for i in 0..n {
        let (x, z) = ((i % side) as f32 * 1.5, (i / side) as f32 * 1.5);
        world
            .create_body(
                &BodyDesc::dynamic(
                    BodyShape::Cuboid {
                        half_extents: Vec3::splat(0.5),
                    },
                    1.0,
                )
                .with_pose(Vec3::new(x, 0.49, z), Quat::IDENTITY),
            )
            .expect("box");
    }
    world
}

fn bench_runtime(c: &mut Criterion) {
    {
        let mut group = c.benchmark_group("runtime/step_resting_boxes");
        group.sample_size(30);
        for &n in &[50, 200] {
            group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
                b.iter_batched(
                    || setup_stack(n),
                    |mut world| {
                        world.step(1.0 / 250.0);
                        world.contacts()
                    },
                    criterion::BatchSize::LargeInput,
                );
            });
        }
        group.finish();
    }

    {
        let mut group = c.benchmark_group("runtime/aggregate");
        for &contacts in &[100, 1000] {
            let tracked: Vec<BodyId> = (1..=20).map(BodyId).collect();
            let impulses = pseudo_random(3, contacts);
            let events: Vec<ImpactEvent> = impulses
                .iter()
                .enumerate()
                .map(|(i, imp)| {
                    let a = BodyId(1 + (i % 20) as u64);
                    ImpactEvent::new(a, BodyId(0), Vec3::ZERO, Vec3::Y, imp.abs() * 3000.0)
                })
                .collect();
            group.bench_with_input(BenchmarkId::from_parameter(contacts), &contacts, |b, _| {
                b.iter(|| ImpactEventAggregator::aggregate(&events, &tracked));
            });
        }
        group.finish();
    }
}

criterion_group!(
    benches,
    bench_codebook,
    bench_watershed,
    bench_surface_nets,
    bench_runtime
);
criterion_main!(benches);
