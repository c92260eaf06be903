//! Dispatch Performance Benchmarks
//!
//! Measures the three tiers a send can take and what it costs to fall
//! between them.
//!
//! # Benchmark Categories
//!
//! 1. **Send Tiers**: inline cache hit vs lookup cache hit vs uncached slow path
//! 2. **MRO Depth**: lookup cost as the answering ancestor moves further away
//! 3. **Overload Resolution**: scoring cost against overload count
//! 4. **Polymorphic Sites**: dispatch cost with 1, 2, 4 and too many receivers
//!
//! # Performance Targets
//!
//! - Monomorphic IC hit: a key comparison and one stamp check over the body
//! - Lookup cache hit: one sharded map read over the IC hit
//! - Slow path: proportional to MRO depth and overload count

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use mosaic_core::{ModuleId, Value, intern};
use mosaic_runtime::{ConversionStrategy, DispatchKind, NativeOverload, Visibility};
use mosaic_vm::{CallSiteId, DispatchConfig, Dispatcher, Message};

// =============================================================================
// Benchmark Helpers
// =============================================================================

fn dispatcher(options: &[&str]) -> Dispatcher {
    let config = DispatchConfig::resolve(options, true).expect("valid options");
    Dispatcher::new(config).expect("builtins install")
}

fn define_nullary(d: &Dispatcher, owner: ModuleId, name: &str) {
    let overload = NativeOverload::builder().build(|_| Ok(Value::Nil)).unwrap();
    d.graph()
        .register_method(owner, intern(name), Visibility::Public, DispatchKind::InstanceLevel, vec![overload])
        .unwrap();
}

/// A chain of `depth` classes below Object with `speak` on the topmost one.
fn deep_chain(d: &Dispatcher, depth: usize) -> ModuleId {
    let mut current = d.graph().define_type("Level0", None, &[]).unwrap();
    define_nullary(d, current, "speak");
    for level in 1..depth {
        let name = format!("Level{}", level);
        current = d.graph().define_type(&name, Some(current), &[]).unwrap();
    }
    current
}

// =============================================================================
// Send Tier Benchmarks
// =============================================================================

fn bench_send_tiers(c: &mut Criterion) {
    let mut group = c.benchmark_group("send_tiers");

    let cases: [(&str, &[&str]); 3] = [
        ("ic_hit", &[]),
        ("lookup_cache_hit", &["ic=off"]),
        ("slow_path", &["ic=off", "method_cache=off"]),
    ];

    for (label, options) in cases {
        let d = dispatcher(options);
        let leaf = deep_chain(&d, 4);
        let receiver = Value::object(leaf);
        let site = CallSiteId::new(1, 0);
        let message = Message::new(&receiver, "speak");
        d.dispatch_at(site, &message).unwrap();

        group.bench_function(label, |b| {
            b.iter(|| black_box(d.dispatch_at(site, black_box(&message)).unwrap()))
        });
    }

    group.finish();
}

// =============================================================================
// MRO Depth Benchmarks
// =============================================================================

fn bench_mro_depth(c: &mut Criterion) {
    let mut group = c.benchmark_group("mro_depth");

    for depth in [1usize, 4, 16, 64] {
        let d = dispatcher(&["ic=off", "method_cache=off"]);
        let leaf = deep_chain(&d, depth);
        let receiver = Value::object(leaf);
        let message = Message::new(&receiver, "speak");

        group.bench_with_input(BenchmarkId::new("uncached", depth), &depth, |b, _| {
            b.iter(|| black_box(d.dispatch(black_box(&message)).unwrap()))
        });
    }

    group.finish();
}

// =============================================================================
// Overload Resolution Benchmarks
// =============================================================================

fn bench_overload_count(c: &mut Criterion) {
    let mut group = c.benchmark_group("overload_resolution");

    for count in [1usize, 4, 16] {
        let d = dispatcher(&["ic=off"]);
        let int = d.builtins().integer;
        let string = d.builtins().string;
        let calc = d.graph().define_type("Calc", None, &[]).unwrap();

        // Only the last overload accepts an Integer exactly.
        let mut overloads: Vec<NativeOverload> = (1..count)
            .map(|_| {
                NativeOverload::builder()
                    .required(string, ConversionStrategy::ExactOnly)
                    .build(|_| Ok(Value::Nil))
                    .unwrap()
            })
            .collect();
        overloads.push(
            NativeOverload::builder()
                .required(int, ConversionStrategy::ExactOnly)
                .build(|args| Ok(args.arg(0).clone()))
                .unwrap(),
        );
        d.graph()
            .register_method(calc, intern("f"), Visibility::Public, DispatchKind::InstanceLevel, overloads)
            .unwrap();

        let receiver = Value::object(calc);
        let args = [Value::Int(7)];
        let message = Message::new(&receiver, "f").args(&args);

        group.bench_with_input(BenchmarkId::new("resolve", count), &count, |b, _| {
            b.iter(|| black_box(d.resolve(black_box(&message)).unwrap()))
        });
    }

    group.finish();
}

// =============================================================================
// Polymorphic Site Benchmarks
// =============================================================================

fn bench_polymorphic_sites(c: &mut Criterion) {
    let mut group = c.benchmark_group("call_site_receivers");

    for receivers in [1usize, 2, 4, 8] {
        let d = dispatcher(&[]);
        let objects: Vec<Value> = (0..receivers)
            .map(|i| {
                let class = d.graph().define_type(&format!("Shape{}", i), None, &[]).unwrap();
                define_nullary(&d, class, "area");
                Value::object(class)
            })
            .collect();
        let site = CallSiteId::new(2, 0);
        for obj in &objects {
            d.dispatch_at(site, &Message::new(obj, "area")).unwrap();
        }

        group.bench_with_input(BenchmarkId::new("round_robin", receivers), &receivers, |b, _| {
            let mut i = 0;
            b.iter(|| {
                let obj = &objects[i % objects.len()];
                i += 1;
                black_box(d.dispatch_at(site, &Message::new(obj, "area")).unwrap())
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_send_tiers,
    bench_mro_depth,
    bench_overload_count,
    bench_polymorphic_sites
);
criterion_main!(benches);
