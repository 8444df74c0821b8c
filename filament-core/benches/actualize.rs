//! Hot-path benchmarks: recomputation along a chain and invalidation over a
//! wide fan-out.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use filament_core::Runtime;

fn chain_recompute(c: &mut Criterion) {
    c.bench_function("actualize chain of 64", |b| {
        let rt = Runtime::new();
        let base = rt.input("base", 0i64);
        let mut last = rt.cell("n0", move |scope, _| scope.get(base));
        for i in 1..64 {
            let prev = last;
            last = rt.cell(format!("n{i}"), move |scope, _| Ok(scope.get(prev)? + 1));
        }

        let mut n = 0i64;
        b.iter(|| {
            n += 1;
            base.set(&rt, n).expect("writable");
            black_box(last.get(&rt).expect("chain computes"))
        });
    });
}

fn fanout_early_cutoff(c: &mut Criterion) {
    c.bench_function("early cutoff over fan-out of 256", |b| {
        let rt = Runtime::new();
        let base = rt.input("base", 0i64);
        // All leaves read a derived value that never changes, so a base
        // write only pays for check resolution, not recomputation.
        let stable = rt.cell("stable", move |scope, _| Ok(scope.get(base)? / i64::MAX));
        let leaves: Vec<_> = (0..256)
            .map(|i| rt.cell(format!("leaf{i}"), move |scope, _| scope.get(stable)))
            .collect();
        for leaf in &leaves {
            let _ = leaf.get(&rt);
        }

        let mut n = 0i64;
        b.iter(|| {
            n += 1;
            base.set(&rt, n).expect("writable");
            for leaf in &leaves {
                black_box(leaf.get(&rt).expect("leaf computes"));
            }
        });
    });
}

criterion_group!(benches, chain_recompute, fanout_early_cutoff);
criterion_main!(benches);
