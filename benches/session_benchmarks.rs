//! Performance benchmarks for the display session
//!
//! Covers the hot client paths: routed display calls, layer updates and the
//! validate/commit cycle on a headless core.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use hwc_session::cwb::{CwbCallback, CwbStatus};
use hwc_session::headless::HeadlessCore;
use hwc_session::types::{
    BlendMode, BufferHandle, CwbConfig, DisplayId, PixelFormat, PowerMode, Rect,
};
use hwc_session::{HwcSession, SessionConfig};
use std::sync::{Arc, Weak};

fn powered_session() -> Arc<HwcSession> {
    let core = HeadlessCore::new(1);
    let session = HwcSession::new(core, SessionConfig::default()).expect("session starts");
    session.set_power_mode(0, PowerMode::On).expect("power on");
    session.wait_for_power_transition(0).expect("power settles");
    session
}

/// Routed queries through the slot and alias resolution
fn bench_display_calls(c: &mut Criterion) {
    let session = powered_session();
    let mut group = c.benchmark_group("display_calls");

    group.bench_function("get_active_config", |b| {
        b.iter(|| black_box(session.get_active_config(black_box(0))))
    });
    group.bench_function("get_power_mode", |b| {
        b.iter(|| black_box(session.get_power_mode(black_box(0))))
    });
    group.bench_function("bad_display", |b| {
        b.iter(|| black_box(session.get_display_name(black_box(999))))
    });

    group.finish();
}

/// Layer setters with growing stacks
fn bench_layer_updates(c: &mut Criterion) {
    let mut group = c.benchmark_group("layer_updates");

    for layer_count in [1usize, 8, 32].iter() {
        let session = powered_session();
        let layers: Vec<_> = (0..*layer_count)
            .map(|_| session.create_layer(0).expect("layer"))
            .collect();

        group.bench_function(format!("update_{}_layers", layer_count), |b| {
            b.iter(|| {
                for (z, &layer) in layers.iter().enumerate() {
                    let frame = Rect::new(0, 0, 540, 1200);
                    let _ = black_box(session.set_layer_display_frame(0, layer, frame));
                    let _ = black_box(session.set_layer_z_order(0, layer, z as u32));
                    let _ = black_box(session.set_layer_blend_mode(0, layer, BlendMode::Premultiplied));
                }
            })
        });
    }

    group.finish();
}

/// Full validate + commit of a frame
fn bench_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit");

    for layer_count in [0usize, 4, 16].iter() {
        let session = powered_session();
        for _ in 0..*layer_count {
            session.create_layer(0).expect("layer");
        }

        group.bench_function(format!("commit_{}_layers", layer_count), |b| {
            b.iter(|| {
                let outcome = session.commit_or_prepare(0, false);
                if let Ok(o) = &outcome {
                    if o.needs_commit {
                        let _ = session.accept_display_changes(0);
                        let _ = black_box(session.commit_or_prepare(0, false));
                    }
                }
                let _ = black_box(outcome);
            })
        });
    }

    group.finish();
}

struct Discard;

impl CwbCallback for Discard {
    fn on_cwb_done(&self, _display: DisplayId, _status: CwbStatus, _buffer: &BufferHandle) {}
}

/// Posting a capture request, including queue bookkeeping
fn bench_capture_post(c: &mut Criterion) {
    let session = powered_session();
    let callback: Arc<dyn CwbCallback> = Arc::new(Discard);
    let weak: Weak<dyn CwbCallback> = Arc::downgrade(&callback);
    let mut next_id = 0u64;

    c.bench_function("cwb_post_buffer", |b| {
        b.iter_batched(
            || {
                next_id += 1;
                BufferHandle::new(next_id, 1080, 2400, PixelFormat::Rgba8888)
            },
            |buffer| {
                let _ = black_box(session.post_buffer(0, &CwbConfig::default(), &buffer, weak.clone()));
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(
    benches,
    bench_display_calls,
    bench_layer_updates,
    bench_commit,
    bench_capture_post
);
criterion_main!(benches);
