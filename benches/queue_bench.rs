use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::time::Duration;

use lan_voice_rooms::audio::buffer::{apply_gain, AudioFrame, AudioFrameQueue};
use lan_voice_rooms::audio::pipeline::fill_output_block;
use lan_voice_rooms::transport::drop_oldest_queue;

const BLOCK: usize = 1764;

fn bench_frame_queue_push_pop(c: &mut Criterion) {
    let queue = AudioFrameQueue::new(200);
    let samples = vec![0.25f32; BLOCK];

    c.bench_function("frame_queue_push_pop", |b| {
        b.iter(|| {
            queue.push(AudioFrame::from_samples(black_box(samples.clone())));
            black_box(queue.pop())
        })
    });
}

fn bench_frame_queue_overflow(c: &mut Criterion) {
    let queue = AudioFrameQueue::new(200);
    for _ in 0..200 {
        queue.push(AudioFrame::from_samples(vec![0.0; BLOCK]));
    }
    let samples = vec![0.25f32; BLOCK];

    c.bench_function("frame_queue_push_evicting", |b| {
        b.iter(|| queue.push(AudioFrame::from_samples(black_box(samples.clone()))))
    });
}

fn bench_output_block(c: &mut Criterion) {
    let queue = AudioFrameQueue::new(200);
    let mut out = vec![0.0f32; BLOCK];

    c.bench_function("fill_output_block", |b| {
        b.iter(|| {
            queue.push(AudioFrame::from_samples(vec![0.5; BLOCK]));
            fill_output_block(&queue, black_box(&mut out))
        })
    });

    c.bench_function("fill_output_block_silence", |b| {
        b.iter(|| fill_output_block(&queue, black_box(&mut out)))
    });
}

fn bench_apply_gain(c: &mut Criterion) {
    let samples: Vec<f32> = (0..BLOCK).map(|i| (i as f32 / BLOCK as f32) * 2.0 - 1.0).collect();

    c.bench_function("apply_gain", |b| {
        b.iter(|| apply_gain(black_box(&samples), black_box(0.7)))
    });
}

fn bench_boundary_submit(c: &mut Criterion) {
    let (tx, rx) = drop_oldest_queue::<Vec<f32>>("bench", 1000, Duration::from_millis(10));
    let samples = vec![0.25f32; BLOCK];

    c.bench_function("boundary_submit_receive", |b| {
        b.iter(|| {
            tx.submit(black_box(samples.clone()));
            black_box(rx.try_receive())
        })
    });
}

criterion_group!(
    benches,
    bench_frame_queue_push_pop,
    bench_frame_queue_overflow,
    bench_output_block,
    bench_apply_gain,
    bench_boundary_submit
);
criterion_main!(benches);
