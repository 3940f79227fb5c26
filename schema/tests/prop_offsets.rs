use std::collections::BTreeSet;

use proptest::prelude::*;
use schema::{PropCodec, PropDef, PropIndex, SchemaRegistry, TableDef};

#[derive(Clone, Debug)]
enum Field {
    Scalar { offset: u32 },
    Array { offset: u32, stride: u32, count: u16 },
}

fn field() -> impl Strategy<Value = Field> {
    prop_oneof![
        (0u32..64).prop_map(|offset| Field::Scalar { offset }),
        (0u32..64, 1u32..9, 1u16..5).prop_map(|(offset, stride, count)| Field::Array {
            offset,
            stride,
            count,
        }),
    ]
}

fn build(fields: &[Field]) -> SchemaRegistry {
    let mut root = TableDef::new("Sample");
    for (i, field) in fields.iter().enumerate() {
        root = root.prop(match *field {
            Field::Scalar { offset } => PropDef::scalar(format!("f{i}"), offset, PropCodec::uint(8)),
            Field::Array {
                offset,
                stride,
                count,
            } => PropDef::array(format!("f{i}"), offset, stride, count, PropCodec::uint(8)),
        });
    }
    let mut builder = SchemaRegistry::builder();
    builder.register(root);
    builder.build().unwrap()
}

/// Expected absolute offset of every flattened property, in index order.
fn expected_offsets(fields: &[Field]) -> Vec<u32> {
    let mut offsets = Vec::new();
    for field in fields {
        match *field {
            Field::Scalar { offset } => offsets.push(offset),
            Field::Array {
                offset,
                stride,
                count,
            } => offsets.extend((0..u32::from(count)).map(|i| offset + i * stride)),
        }
    }
    offsets
}

proptest! {
    #[test]
    fn prop_offset_lookup_returns_every_index(fields in prop::collection::vec(field(), 1..12)) {
        let registry = build(&fields);
        let class = &registry.classes()[0];
        let offsets = expected_offsets(&fields);
        prop_assert_eq!(class.prop_count(), offsets.len());

        for (index, prop) in class.props().iter().enumerate() {
            prop_assert_eq!(prop.offset, offsets[index]);
        }
        for offset in 0..=offsets.iter().copied().max().unwrap_or(0) + 1 {
            let found: BTreeSet<u16> = class.offset_map().lookup(offset).map(PropIndex::get).collect();
            let expected: BTreeSet<u16> = offsets
                .iter()
                .enumerate()
                .filter(|(_, o)| **o == offset)
                .map(|(i, _)| i as u16)
                .collect();
            prop_assert_eq!(found, expected, "offset {}", offset);
        }
    }

    #[test]
    fn prop_hash_is_stable_across_rebuilds(fields in prop::collection::vec(field(), 1..12)) {
        let a = build(&fields);
        let b = build(&fields);
        prop_assert_eq!(a.hash(), b.hash());
        prop_assert_eq!(a.classes()[0].hash(), b.classes()[0].hash());
    }
}
