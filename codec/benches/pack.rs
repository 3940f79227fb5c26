use std::sync::Arc;

use codec::{
    CodecLimits, EntityIndex, EntitySerial, EntityState, PackConfig, PackEngine, PropValue, Tick,
};
use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use schema::{ClassId, PropCodec, PropDef, SchemaRegistry, TableDef};

const PROPS: u32 = 32;

fn registry() -> Arc<SchemaRegistry> {
    let mut table = TableDef::new("Unit");
    for i in 0..PROPS {
        table = table.prop(PropDef::scalar(format!("p{i}"), i * 4, PropCodec::sint(20)));
    }
    let mut builder = SchemaRegistry::builder();
    builder.register(table);
    Arc::new(builder.build().expect("bench schema"))
}

fn world(entities: usize) -> Vec<Vec<PropValue>> {
    (0..entities)
        .map(|e| (0..PROPS).map(|p| PropValue::SInt(i64::from(p) + e as i64)).collect())
        .collect()
}

fn bench_pack(c: &mut Criterion) {
    let registry = registry();
    let hash = registry.classes()[0].hash();
    let offsets = [8u32, 40];
    let mut group = c.benchmark_group("pack_tick");

    for fast_path in [true, false] {
        let label = if fast_path { "fast" } else { "slow" };
        group.bench_with_input(BenchmarkId::new(label, 512), &fast_path, |b, &fast_path| {
            b.iter_batched(
                || {
                    let config = PackConfig {
                        fast_path,
                        parallel: false,
                        ..PackConfig::default()
                    };
                    let mut engine =
                        PackEngine::new(Arc::clone(&registry), config, CodecLimits::default())
                            .expect("engine");
                    let mut values = world(512);
                    let states: Vec<_> = values
                        .iter()
                        .enumerate()
                        .map(|(i, v)| {
                            EntityState::new(
                                EntityIndex::new(i as u32),
                                EntitySerial::new(1),
                                ClassId::new(0),
                                v,
                            )
                        })
                        .collect();
                    engine.pack_tick(Tick::new(1), &states).expect("first tick");
                    drop(states);
                    for v in &mut values {
                        v[2] = PropValue::SInt(-7);
                        v[10] = PropValue::SInt(99);
                    }
                    (engine, values)
                },
                |(mut engine, values)| {
                    let states: Vec<_> = values
                        .iter()
                        .enumerate()
                        .map(|(i, v)| {
                            EntityState::new(
                                EntityIndex::new(i as u32),
                                EntitySerial::new(1),
                                ClassId::new(0),
                                v,
                            )
                            .with_changed_offsets(hash, &offsets)
                        })
                        .collect();
                    engine.pack_tick(Tick::new(2), &states).expect("second tick")
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(pack_benches, bench_pack);
criterion_main!(pack_benches);
