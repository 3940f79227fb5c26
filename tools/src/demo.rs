//! Demo classes used by the simulator and the schema dump.

use std::sync::Arc;

use schema::{ClassId, PropCodec, PropDef, SchemaRegistry, SchemaResult, TableDef};
use serde::Serialize;

pub const SHIP: ClassId = ClassId::new(0);
pub const PICKUP: ClassId = ClassId::new(1);

pub const POS_MIN: i64 = -100_000;
pub const POS_MAX: i64 = 100_000;
pub const VEL_MIN: i64 = -2_000;
pub const VEL_MAX: i64 = 2_000;

/// Memory offsets of the ship's flattened properties, in index order.
pub const SHIP_OFFSETS: [u32; 12] = [0, 4, 8, 12, 16, 20, 24, 28, 32, 36, 40, 44];
/// Memory offsets of the pickup's flattened properties, in index order.
pub const PICKUP_OFFSETS: [u32; 5] = [0, 4, 8, 12, 16];

pub mod ship {
    pub const ORIGIN_X: usize = 0;
    pub const ORIGIN_Y: usize = 1;
    pub const VEL_X: usize = 2;
    pub const VEL_Y: usize = 3;
    pub const HEALTH: usize = 4;
    pub const ARMOR: usize = 5;
    pub const FIRING: usize = 6;
    pub const AMMO: usize = 7;
    pub const AMMO_SLOTS: usize = 4;
    pub const RELOAD_AT: usize = 11;
}

pub mod pickup {
    pub const KIND: usize = 0;
    pub const ORIGIN_X: usize = 1;
    pub const ORIGIN_Y: usize = 2;
    pub const RESPAWN_AT: usize = 3;
    pub const ACTIVE: usize = 4;
}

fn vector(min: i64, max: i64) -> Arc<TableDef> {
    Arc::new(
        TableDef::new("Vector")
            .prop(PropDef::scalar("x", 0, PropCodec::fixed_point(min, max, 100)))
            .prop(PropDef::scalar("y", 4, PropCodec::fixed_point(min, max, 100))),
    )
}

/// Builds the demo registry: a ship and a pickup class.
pub fn registry() -> SchemaResult<Arc<SchemaRegistry>> {
    let mut builder = SchemaRegistry::builder();
    builder.register(
        TableDef::new("Ship")
            .prop(PropDef::table("origin", 0, vector(POS_MIN, POS_MAX)))
            .prop(PropDef::table("velocity", 8, vector(VEL_MIN, VEL_MAX)))
            .prop(PropDef::scalar("health", 16, PropCodec::uint(8)))
            .prop(PropDef::scalar("armor", 20, PropCodec::uint(8)))
            .prop(PropDef::scalar("firing", 24, PropCodec::bool()))
            .prop(PropDef::array("ammo", 28, 4, 4, PropCodec::uint(6)))
            .prop(PropDef::scalar("reload_at", 44, PropCodec::var_sint()).tick_relative()),
    );
    builder.register(
        TableDef::new("Pickup")
            .prop(PropDef::scalar("kind", 0, PropCodec::uint(4)))
            .prop(PropDef::table("origin", 4, vector(POS_MIN, POS_MAX)))
            .prop(PropDef::scalar("respawn_at", 12, PropCodec::var_sint()).tick_relative())
            .prop(PropDef::scalar("active", 16, PropCodec::bool())),
    );
    Ok(Arc::new(builder.build()?))
}

/// JSON view of a registry's flattened layout.
#[derive(Debug, Serialize)]
pub struct SchemaDump {
    pub hash: String,
    pub classes: Vec<ClassDump>,
}

#[derive(Debug, Serialize)]
pub struct ClassDump {
    pub id: ClassId,
    pub name: String,
    pub hash: String,
    pub props: Vec<schema::FlatProp>,
}

#[must_use]
pub fn dump(registry: &SchemaRegistry) -> SchemaDump {
    SchemaDump {
        hash: format!("{:016x}", registry.hash()),
        classes: registry
            .classes()
            .iter()
            .map(|class| ClassDump {
                id: class.id(),
                name: class.name().to_string(),
                hash: format!("{:016x}", class.hash()),
                props: class.props().to_vec(),
            })
            .collect(),
    }
}
