use std::hint::black_box;
use criterion::{criterion_group, criterion_main, Criterion};
use game_engine_bindings::classes::{Animation, AnimationLibrary, ClassDB, Node2D};
use game_engine_bindings::mock::MockEngine;
use game_engine_bindings::values::EngineVariant;
use game_engine_bindings::{Array, EngineClass, GString, StringName, Variant, VariantType};
use glam::Vec2;

fn bench_method_ptrcall(c: &mut Criterion) {
    let _engine = MockEngine::install();
    let node = ClassDB::singleton()
        .and_then(|db| db.instantiate_managed("Node2D"))
        .map(Node2D::from_managed)
        .unwrap();

    c.bench_function("node2d_set_get_position", |b| {
        let mut x = 0.0_f32;
        b.iter(|| {
            x += 1.0;
            node.set_position(Vec2::new(x, -x)).unwrap();
            black_box(node.get_position().unwrap());
        });
    });

    node.managed().end().unwrap();
}

fn bench_singleton_cache(c: &mut Criterion) {
    let _engine = MockEngine::install();

    c.bench_function("class_db_singleton_cached", |b| {
        b.iter(|| black_box(ClassDB::singleton().unwrap()));
    });
}

fn bench_variant_conversion(c: &mut Criterion) {
    let _engine = MockEngine::install();
    let values = [
        Variant::Int(42),
        Variant::from(Vec2::new(1.0, 2.0)),
        Variant::String(GString::from("player_name")),
    ];

    c.bench_function("variant_host_engine_round_trip", |b| {
        b.iter(|| {
            for value in &values {
                let engine = EngineVariant::from_host(value).unwrap();
                black_box(engine.to_host().unwrap());
            }
        });
    });
}

fn bench_engine_array(c: &mut Criterion) {
    let _engine = MockEngine::install();

    c.bench_function("engine_array_push_iterate_100", |b| {
        b.iter(|| {
            let mut array = Array::typed_engine(VariantType::Int).unwrap();
            for i in 0..100_i64 {
                array.push(i).unwrap();
            }
            let sum: i64 = array
                .iter()
                .unwrap()
                .filter_map(|v| v.try_to::<i64>().ok())
                .sum();
            black_box(sum);
        });
    });

    c.bench_function("host_array_to_engine_100", |b| {
        let host: Array = (0..100_i64).map(Variant::from).collect();
        b.iter(|| black_box(host.to_engine_backed().unwrap()));
    });
}

fn bench_string_name(c: &mut Criterion) {
    let _engine = MockEngine::install();

    c.bench_function("string_name_engine_new", |b| {
        b.iter(|| black_box(StringName::new_engine("animation_added").unwrap()));
    });
}

fn bench_animation_library(c: &mut Criterion) {
    let _engine = MockEngine::install();
    let library = AnimationLibrary::new().unwrap();
    for i in 0..32 {
        library.add_animation(format!("clip_{}", i).as_str(), &Animation::new().unwrap()).unwrap();
    }

    c.bench_function("animation_library_lookup", |b| {
        b.iter(|| {
            black_box(library.has_animation("clip_17").unwrap());
            black_box(library.get_animation("clip_17").unwrap());
        });
    });

    c.bench_function("animation_library_list", |b| {
        b.iter(|| black_box(library.get_animation_list().unwrap()));
    });
}

criterion_group!(
    benches,
    bench_method_ptrcall,
    bench_singleton_cache,
    bench_variant_conversion,
    bench_engine_array,
    bench_string_name,
    bench_animation_library
);
criterion_main!(benches);
