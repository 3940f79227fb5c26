#![no_main]

use bitstream::BitReader;
use codec::Tick;
use libfuzzer_sys::fuzz_target;
use strtab::{InsertOrigin, StringTable, TableConfig, TableId};

fuzz_target!(|data: &[u8]| {
    let config = TableConfig {
        max_entries: 64,
        ..TableConfig::default()
    };
    let Ok(mut table) = StringTable::new(TableId::new(0), "fuzz", config) else {
        return;
    };
    let _ = table.insert(InsertOrigin::Server, "models/player.mdl", Some(b"seed"));
    let _ = table.set_tick(Tick::new(1));

    let mut reader = BitReader::new(data);
    let _ = table.parse_update(&mut reader);
    assert!(table.len() <= table.capacity() as usize);
});
