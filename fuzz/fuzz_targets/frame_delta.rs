#![no_main]

use std::sync::Arc;

use bitstream::BitReader;
use codec::{
    read_frame_delta, CodecLimits, EntityIndex, EntitySerial, EntityState, ObserverView,
    PackConfig, PackEngine, PropValue, Tick,
};
use libfuzzer_sys::fuzz_target;
use schema::{ClassId, PropCodec, PropDef, SchemaRegistry, TableDef};

fuzz_target!(|data: &[u8]| {
    let mut builder = SchemaRegistry::builder();
    builder.register(
        TableDef::new("Unit")
            .prop(PropDef::scalar("x", 0, PropCodec::sint(16)))
            .prop(PropDef::scalar("alive", 4, PropCodec::bool())),
    );
    let Ok(registry) = builder.build() else {
        return;
    };
    let Ok(mut engine) = PackEngine::new(
        Arc::new(registry),
        PackConfig::for_testing(),
        CodecLimits::for_testing(),
    ) else {
        return;
    };
    let values = vec![PropValue::SInt(3), PropValue::Bool(true)];
    let state = EntityState::new(
        EntityIndex::new(0),
        EntitySerial::new(1),
        ClassId::new(0),
        &values,
    );
    if engine.pack_tick(Tick::new(1), &[state]).is_err() {
        return;
    }

    let mut view = ObserverView::new();
    let mut reader = BitReader::new(data);
    let _ = read_frame_delta(engine.registry(), engine.baselines(), &mut view, &mut reader);
});
