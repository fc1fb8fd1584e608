// Copyright (c) 2026 Adrian Robinson. All rights reserved.
// Licensed under the MIT License. See LICENSE file in the project root for full license information.

use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use stream_sketches::*;

fn setup_hll(n: u64) -> (HllSketch, HllSketch) {
    let mut a = HllSketch::new(12, TargetHllType::Hll4).unwrap();
    let mut b = HllSketch::new(12, TargetHllType::Hll4).unwrap();
    for i in 0..n {
        a.update_u64(i);
        b.update_u64(i + n / 2); // Some overlap
    }
    (a, b)
}

fn setup_theta(n: u64) -> (CompactThetaSketch, CompactThetaSketch) {
    let mut a = UpdateThetaSketch::new();
    let mut b = UpdateThetaSketch::new();
    for i in 0..n {
        a.update_u64(i);
        b.update_u64(i + n / 2);
    }
    (a.compact(), b.compact())
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("HLL Merge");
    for n in [1_000u64, 100_000].iter() {
        let (a, b) = setup_hll(*n);

        group.bench_function(format!("Union (N={})", n), |bencher| {
            bencher.iter(|| {
                let mut union = HllUnion::new(12).unwrap();
                union.update(black_box(&a));
                union.update(black_box(&b));
                union.sketch(TargetHllType::Hll4)
            })
        });

        let bytes_a = a.to_capnp_bytes();
        let bytes_b = b.to_capnp_bytes();

        group.bench_function(format!("Merge From Readers (N={})", n), |bencher| {
            bencher.iter(|| {
                let reader_a = HllReader::new(&bytes_a);
                let reader_b = HllReader::new(&bytes_b);
                HllSketch::merge_from_readers(black_box(&[reader_a, reader_b])).unwrap()
            })
        });

        let json_a = serde_json::to_value(&a).unwrap();
        let json_b = serde_json::to_value(&b).unwrap();

        group.bench_function(format!("Full JSON Merge Cycle (N={})", n), |bencher| {
            bencher.iter(|| {
                SerdeCapnpBridge::merge_json_values(
                    SketchType::Hll,
                    black_box(&[json_a.clone(), json_b.clone()]),
                )
                .unwrap()
            })
        });
    }
    group.finish();

    let mut group = c.benchmark_group("Theta Set Operations");
    for n in [1_000u64, 100_000].iter() {
        let (a, b) = setup_theta(*n);

        group.bench_function(format!("Union (N={})", n), |bencher| {
            bencher.iter(|| {
                let mut union = ThetaUnion::new(12).unwrap();
                union.update(black_box(&a)).unwrap();
                union.update(black_box(&b)).unwrap();
                union.sketch()
            })
        });

        group.bench_function(format!("Intersection (N={})", n), |bencher| {
            bencher.iter(|| {
                let mut intersection = ThetaIntersection::new();
                intersection.update(black_box(&a)).unwrap();
                intersection.update(black_box(&b)).unwrap();
                intersection.sketch()
            })
        });

        group.bench_function(format!("A-not-B (N={})", n), |bencher| {
            bencher.iter(|| ThetaANotB::compute(black_box(&a), black_box(&b)).unwrap())
        });
    }
    group.finish();

    let mut group = c.benchmark_group("KLL Merge");
    for n in [1_000u64, 100_000].iter() {
        let mut a = KllDoubleSketch::with_seed(200, 1).unwrap();
        let mut b = KllDoubleSketch::with_seed(200, 2).unwrap();
        for i in 0..*n {
            a.update(i as f64);
            b.update((i * 3) as f64);
        }

        group.bench_function(format!("Standard Merge (N={})", n), |bencher| {
            bencher.iter(|| {
                let mut a_clone = a.clone();
                a_clone.merge(black_box(&b));
                a_clone
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_merge);
criterion_main!(benches);
