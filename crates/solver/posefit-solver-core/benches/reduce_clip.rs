use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use posefit_motion_core::MotionClip;
use posefit_solver_core::{reduce_clip, ReductionConfig, ReductionProfile};
use posefit_test_fixtures::clips;

/// Twenty independently phased bones, dense over `frames`.
fn dense_clip(frames: u32) -> MotionClip {
    let mut clip = MotionClip::new("bench");
    for b in 0..20 {
        let name = format!("bone_{b}");
        let wave = clips::wave(&name, frames + b);
        for (bone, track) in wave.bones {
            for mut key in track.into_values().skip(b as usize) {
                key.frame -= b;
                clip.insert(&bone, key);
            }
        }
    }
    clip
}

fn bench_reduce(c: &mut Criterion) {
    let mut group = c.benchmark_group("reduce_clip");
    for frames in [300u32, 1800] {
        let clip = dense_clip(frames);
        for profile in [ReductionProfile::Narrow, ReductionProfile::Wide] {
            let config = ReductionConfig::default().with_profile(profile);
            group.bench_with_input(
                BenchmarkId::new(format!("{profile:?}"), frames),
                &clip,
                |b, clip| b.iter(|| reduce_clip(black_box(clip), black_box(&config))),
            );
        }
    }
    group.finish();
}

criterion_group!(benches, bench_reduce);
criterion_main!(benches);
