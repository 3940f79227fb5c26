//! Deterministic synthetic world run through the packing engine and a
//! replicated string table.

use std::collections::VecDeque;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use bitstream::{BitReader, BitWriter};
use codec::{
    read_frame_delta, write_frame_delta, CodecLimits, EntityIndex, EntitySerial, EntityState,
    FrameSnapshot, ObserverView, PackConfig, PackEngine, PackStats, PropValue, Tick,
};
use schema::ClassId;
use serde::{Deserialize, Serialize};
use strtab::{
    InsertOrigin, MirrorSync, StringIndex, StringTable, TableConfig, TableHandle, TableId,
    TableRegistry,
};

use crate::demo::{self, pickup, ship, PICKUP, PICKUP_OFFSETS, SHIP, SHIP_OFFSETS};

const TARGET: &str = "deltapack::sim";

/// Simulation parameters, loadable from JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub ships: u32,
    pub pickups: u32,
    pub ticks: u32,
    pub seed: u64,
    /// How many ticks the delayed observer lags behind.
    pub observer_delay: u32,
    pub pack: PackConfig,
    pub limits: CodecLimits,
    pub table: TableConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            ships: 48,
            pickups: 16,
            ticks: 300,
            seed: 1,
            observer_delay: 16,
            pack: PackConfig::default(),
            limits: CodecLimits::default(),
            table: TableConfig {
                max_entries: 256,
                ..TableConfig::default()
            },
        }
    }
}

impl SimConfig {
    /// Small sequential run with validation on.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            ships: 12,
            pickups: 4,
            ticks: 80,
            seed: 7,
            observer_delay: 5,
            pack: PackConfig::for_testing(),
            limits: CodecLimits::for_testing(),
            table: TableConfig {
                max_entries: 32,
                ..TableConfig::default()
            },
        }
    }

    fn entity_count(&self) -> usize {
        self.ships as usize + self.pickups as usize
    }

    /// Checks that the world fits the configured limits.
    ///
    /// # Errors
    ///
    /// Fails for an empty world, zero ticks, or more entities than the
    /// engine or the string table can hold.
    pub fn validate(&self) -> Result<()> {
        let entities = self.entity_count();
        if entities == 0 || self.ticks == 0 {
            bail!("simulation needs at least one entity and one tick");
        }
        if entities > self.limits.max_entities {
            bail!(
                "{entities} entities exceed engine limit {}",
                self.limits.max_entities
            );
        }
        if entities > self.table.max_entries as usize {
            bail!(
                "{entities} entities exceed string table capacity {}",
                self.table.max_entries
            );
        }
        Ok(())
    }
}

/// Outcome of a simulation run.
#[derive(Debug, Clone, Serialize)]
pub struct SimReport {
    pub ships: u32,
    pub pickups: u32,
    pub ticks: u32,
    pub seed: u64,
    pub fast_path: bool,
    pub parallel: bool,
    pub stats: PackStats,
    pub baselines: usize,
    pub blob_bytes_total: u64,
    pub delta_bytes_total: u64,
    pub avg_delta_bytes: u64,
    pub p95_delta_bytes: u64,
    pub avg_pack_us: u64,
    pub p95_pack_us: u64,
    pub entities_removed: u64,
    pub observer_mismatches: u64,
    pub table_entries: usize,
    pub table_update_bytes: u64,
    pub restore_checks: u64,
    pub restore_mismatches: u64,
    pub mirror_in_sync: bool,
    pub client_in_sync: bool,
    #[serde(skip)]
    delta_sizes: Vec<u64>,
    #[serde(skip)]
    pack_us: Vec<u64>,
}

impl SimReport {
    fn new(config: &SimConfig) -> Self {
        Self {
            ships: config.ships,
            pickups: config.pickups,
            ticks: config.ticks,
            seed: config.seed,
            fast_path: config.pack.fast_path,
            parallel: config.pack.parallel,
            stats: PackStats::default(),
            baselines: 0,
            blob_bytes_total: 0,
            delta_bytes_total: 0,
            avg_delta_bytes: 0,
            p95_delta_bytes: 0,
            avg_pack_us: 0,
            p95_pack_us: 0,
            entities_removed: 0,
            observer_mismatches: 0,
            table_entries: 0,
            table_update_bytes: 0,
            restore_checks: 0,
            restore_mismatches: 0,
            mirror_in_sync: false,
            client_in_sync: false,
            delta_sizes: Vec::new(),
            pack_us: Vec::new(),
        }
    }

    fn finalize(&mut self) {
        if !self.delta_sizes.is_empty() {
            self.avg_delta_bytes = self.delta_bytes_total / self.delta_sizes.len() as u64;
            self.p95_delta_bytes = p95(&mut self.delta_sizes);
        }
        if !self.pack_us.is_empty() {
            let total: u64 = self.pack_us.iter().sum();
            self.avg_pack_us = total / self.pack_us.len() as u64;
            self.p95_pack_us = p95(&mut self.pack_us);
        }
    }

    /// Returns `true` when every consistency check passed.
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        self.observer_mismatches == 0
            && self.restore_mismatches == 0
            && self.stats.validation_mismatches == 0
            && self.mirror_in_sync
            && self.client_in_sync
    }
}

fn p95(values: &mut [u64]) -> u64 {
    values.sort_unstable();
    let idx = ((values.len() as f64) * 0.95).ceil() as usize;
    let idx = idx.saturating_sub(1).min(values.len() - 1);
    values[idx]
}

struct Rng {
    state: u64,
}

impl Rng {
    const fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u32(&mut self) -> u32 {
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1);
        (self.state >> 32) as u32
    }

    fn chance(&mut self, one_in: u32) -> bool {
        self.next_u32() % one_in == 0
    }

    fn range_i64(&mut self, min: i64, max: i64) -> i64 {
        let span = (max - min).unsigned_abs() + 1;
        let value = u64::from(self.next_u32()) % span;
        min + value as i64
    }
}

const fn fixed(value: PropValue) -> i64 {
    match value {
        PropValue::FixedPoint(v) | PropValue::SInt(v) | PropValue::VarSInt(v) => v,
        PropValue::UInt(v) | PropValue::VarUInt(v) => v as i64,
        PropValue::Bool(v) => v as i64,
    }
}

struct SimEntity {
    class: ClassId,
    serial: EntitySerial,
    values: Vec<PropValue>,
    /// Memory offsets written this tick.
    offsets: Vec<u32>,
    spawned: bool,
    present: bool,
    /// Tick at which an absent entity comes back.
    respawn: u32,
    name: StringIndex,
}

impl SimEntity {
    fn spawn(class: ClassId, values: Vec<PropValue>) -> Self {
        Self {
            class,
            serial: EntitySerial::new(1),
            values,
            offsets: Vec::new(),
            spawned: true,
            present: true,
            respawn: 0,
            name: StringIndex::INVALID,
        }
    }

    fn layout(&self) -> &'static [u32] {
        if self.class == SHIP {
            &SHIP_OFFSETS
        } else {
            &PICKUP_OFFSETS
        }
    }

    fn set(&mut self, prop: usize, value: PropValue) {
        if self.values[prop] != value {
            self.values[prop] = value;
            self.offsets.push(self.layout()[prop]);
        }
    }

    fn get(&self, prop: usize) -> i64 {
        fixed(self.values[prop])
    }

    fn loadout(&self) -> Vec<u8> {
        if self.class == SHIP {
            vec![
                self.get(ship::HEALTH) as u8,
                self.get(ship::ARMOR) as u8,
                u8::from(self.get(ship::FIRING) != 0),
            ]
        } else {
            vec![self.get(pickup::KIND) as u8, u8::from(self.present)]
        }
    }

    fn state(&self, index: u32, hash: u64) -> EntityState<'_> {
        let state = EntityState::new(
            EntityIndex::new(index),
            self.serial,
            self.class,
            &self.values,
        );
        if self.spawned {
            state.replaced()
        } else if self.offsets.is_empty() {
            state.clean()
        } else {
            state.with_changed_offsets(hash, &self.offsets)
        }
    }
}

struct World {
    rng: Rng,
    entities: Vec<SimEntity>,
}

impl World {
    fn new(config: &SimConfig) -> Self {
        let mut rng = Rng::new(config.seed);
        let mut entities = Vec::with_capacity(config.entity_count());
        for _ in 0..config.ships {
            let values = vec![
                PropValue::FixedPoint(rng.range_i64(demo::POS_MIN / 2, demo::POS_MAX / 2)),
                PropValue::FixedPoint(rng.range_i64(demo::POS_MIN / 2, demo::POS_MAX / 2)),
                PropValue::FixedPoint(rng.range_i64(demo::VEL_MIN / 10, demo::VEL_MAX / 10)),
                PropValue::FixedPoint(rng.range_i64(demo::VEL_MIN / 10, demo::VEL_MAX / 10)),
                PropValue::UInt(100),
                PropValue::UInt(50),
                PropValue::Bool(false),
                PropValue::UInt(63),
                PropValue::UInt(63),
                PropValue::UInt(63),
                PropValue::UInt(63),
                PropValue::VarSInt(0),
            ];
            entities.push(SimEntity::spawn(SHIP, values));
        }
        for _ in 0..config.pickups {
            let values = pickup_values(&mut rng, 0);
            entities.push(SimEntity::spawn(PICKUP, values));
        }
        Self { rng, entities }
    }

    /// Clears per-tick change tracking once a tick has been packed.
    fn settle(&mut self) {
        for entity in &mut self.entities {
            entity.offsets.clear();
            entity.spawned = false;
        }
    }

    fn step(&mut self, tick: u32) -> u64 {
        let mut removed = 0;
        for entity in &mut self.entities {
            if entity.class == SHIP {
                step_ship(entity, &mut self.rng, tick);
            } else if step_pickup(entity, &mut self.rng, tick) {
                removed += 1;
            }
        }
        removed
    }
}

fn pickup_values(rng: &mut Rng, respawn_at: i64) -> Vec<PropValue> {
    vec![
        PropValue::UInt(u64::from(rng.next_u32() % 16)),
        PropValue::FixedPoint(rng.range_i64(demo::POS_MIN / 2, demo::POS_MAX / 2)),
        PropValue::FixedPoint(rng.range_i64(demo::POS_MIN / 2, demo::POS_MAX / 2)),
        PropValue::VarSInt(respawn_at),
        PropValue::Bool(true),
    ]
}

fn step_ship(entity: &mut SimEntity, rng: &mut Rng, tick: u32) {
    let tick = i64::from(tick);
    for (pos, vel) in [(ship::ORIGIN_X, ship::VEL_X), (ship::ORIGIN_Y, ship::VEL_Y)] {
        let mut v = entity.get(vel);
        if rng.chance(20) {
            v = (v + rng.range_i64(-100, 100)).clamp(demo::VEL_MIN, demo::VEL_MAX);
        }
        let p = (entity.get(pos) + v).clamp(demo::POS_MIN, demo::POS_MAX);
        if p == demo::POS_MIN || p == demo::POS_MAX {
            v = -v;
        }
        entity.set(pos, PropValue::FixedPoint(p));
        entity.set(vel, PropValue::FixedPoint(v));
    }

    if rng.chance(10) {
        let firing = entity.get(ship::FIRING) == 0;
        entity.set(ship::FIRING, PropValue::Bool(firing));
    }
    let reload_at = entity.get(ship::RELOAD_AT);
    if reload_at == tick {
        for slot in 0..ship::AMMO_SLOTS {
            entity.set(ship::AMMO + slot, PropValue::UInt(63));
        }
    }
    if entity.get(ship::FIRING) != 0 {
        let slot = ship::AMMO + (rng.next_u32() as usize % ship::AMMO_SLOTS);
        let ammo = entity.get(slot);
        if ammo > 0 {
            entity.set(slot, PropValue::UInt((ammo - 1) as u64));
        } else if reload_at < tick {
            entity.set(ship::RELOAD_AT, PropValue::VarSInt(tick + 30));
        }
    }

    if rng.chance(30) {
        let hit = rng.range_i64(1, 20);
        let armor = entity.get(ship::ARMOR);
        let absorbed = hit.min(armor);
        entity.set(ship::ARMOR, PropValue::UInt((armor - absorbed) as u64));
        let health = (entity.get(ship::HEALTH) - (hit - absorbed)).max(0);
        entity.set(ship::HEALTH, PropValue::UInt(health as u64));
    } else if rng.chance(5) {
        let health = (entity.get(ship::HEALTH) + 1).min(100);
        entity.set(ship::HEALTH, PropValue::UInt(health as u64));
    }
}

/// Returns `true` if the pickup was collected this tick.
fn step_pickup(item: &mut SimEntity, rng: &mut Rng, tick: u32) -> bool {
    if !item.present {
        if tick >= item.respawn {
            item.values = pickup_values(rng, i64::from(tick));
            item.serial = EntitySerial::new(item.serial.raw().wrapping_add(1));
            item.present = true;
            item.spawned = true;
        }
        return false;
    }
    if rng.chance(150) {
        item.present = false;
        item.respawn = tick + 20;
        item.set(pickup::RESPAWN_AT, PropValue::VarSInt(i64::from(item.respawn)));
        return true;
    }
    if rng.chance(25) {
        let active = item.get(pickup::ACTIVE) == 0;
        item.set(pickup::ACTIVE, PropValue::Bool(active));
    }
    false
}

/// String tables of the run: a history-tracking primary with an immediate
/// in-process mirror, plus a remote client fed by incremental updates.
struct Tables {
    registry: TableRegistry,
    primary: TableHandle,
    mirror: TableHandle,
    client: StringTable,
    acked: Option<Tick>,
    recorded: VecDeque<(u32, Vec<Option<Vec<u8>>>)>,
}

impl Tables {
    fn new(config: &SimConfig, world: &mut World) -> Result<Self> {
        let mut registry = TableRegistry::new();
        let server = registry.create_container();
        let local = registry.create_container();
        registry
            .container_mut(server)
            .context("server container")?
            .enable_rollback()?;
        registry.start_level();

        let primary = registry
            .container_mut(server)
            .context("server container")?
            .create_table("loadouts", config.table.clone())?;
        let mirror_config = TableConfig {
            history: false,
            ..config.table.clone()
        };
        let mirror = registry
            .container_mut(local)
            .context("local container")?
            .create_table("loadouts", mirror_config.clone())?;
        let primary = TableHandle::new(server, primary);
        let mirror = TableHandle::new(local, mirror);
        registry.link_mirror(primary, mirror, MirrorSync::Immediate)?;

        for (i, entity) in world.entities.iter_mut().enumerate() {
            let name = if entity.class == SHIP {
                format!("ship/{i}")
            } else {
                format!("pickup/{i}")
            };
            entity.name = registry.insert(
                primary,
                InsertOrigin::Server,
                &name,
                Some(&entity.loadout()),
            )?;
        }
        registry.end_level();

        Ok(Self {
            registry,
            primary,
            mirror,
            client: StringTable::new(TableId::new(0), "loadouts", mirror_config)?,
            acked: None,
            recorded: VecDeque::new(),
        })
    }

    fn primary(&self) -> Result<&StringTable> {
        self.registry.table(self.primary).context("primary table")
    }

    fn update(&mut self, tick: u32, world: &World, report: &mut SimReport) -> Result<()> {
        let now = Tick::new(tick);
        self.registry.set_tick(now)?;
        for entity in &world.entities {
            self.registry
                .set_payload(self.primary, entity.name, now, Some(&entity.loadout()))?;
        }

        let update = self.primary()?.encode_update(self.acked)?;
        report.table_update_bytes += update.data.len() as u64;
        self.client.set_tick(now)?;
        self.client.apply_update(&update)?;
        self.acked = Some(now);

        let current = payloads(self.primary()?);
        self.recorded.push_back((tick, current));
        Ok(())
    }

    /// Restores the primary to `tick - delay` and compares with what was
    /// recorded then, then returns it to the live tick.
    fn check_delayed(&mut self, tick: u32, delay: u32, report: &mut SimReport) -> Result<()> {
        while self.recorded.len() > delay as usize + 1 {
            self.recorded.pop_front();
        }
        let Some(replay) = tick.checked_sub(delay) else {
            return Ok(());
        };
        let Some((_, expected)) = self.recorded.iter().find(|(t, _)| *t == replay) else {
            return Ok(());
        };
        let handle = self.primary;
        let table = self
            .registry
            .container_mut(handle.container)
            .and_then(|container| container.table_mut(handle.table))
            .context("primary table")?;
        table.restore_tick(Tick::new(replay));
        let view = payloads(table);
        table.restore_tick(Tick::new(tick));

        report.restore_checks += 1;
        let matches = view.len() == expected.len()
            && view.iter().zip(expected).all(|(seen, recorded)| seen == recorded);
        if !matches {
            report.restore_mismatches += 1;
            tracing::warn!(target: TARGET, tick, replay, "sim.restore_mismatch");
        }
        Ok(())
    }
}

fn payloads(table: &StringTable) -> Vec<Option<Vec<u8>>> {
    table.iter().map(|(_, _, p)| p.map(<[u8]>::to_vec)).collect()
}

/// Runs the simulation described by `config`.
///
/// # Errors
///
/// Fails on invalid configuration, on a fatal pack error, or on any string
/// table or delta error. Consistency problems are counted in the report.
pub fn run(config: &SimConfig) -> Result<SimReport> {
    config.validate()?;
    let registry = demo::registry().context("build demo schema")?;
    let hashes: Vec<u64> = registry.classes().iter().map(|class| class.hash()).collect();
    let mut engine = PackEngine::new(registry, config.pack.clone(), config.limits.clone())
        .context("create pack engine")?;

    let mut world = World::new(config);
    let mut tables = Tables::new(config, &mut world)?;
    let mut report = SimReport::new(config);
    let mut view = ObserverView::new();
    let mut acked: Option<FrameSnapshot> = None;

    for tick in 1..=config.ticks {
        report.entities_removed += world.step(tick);

        let states: Vec<EntityState<'_>> = world
            .entities
            .iter()
            .enumerate()
            .filter(|(_, entity)| entity.present)
            .map(|(i, entity)| {
                let hash = hashes[usize::from(entity.class.get())];
                entity.state(i as u32, hash)
            })
            .collect();

        let start = Instant::now();
        let frame = engine
            .pack_tick(Tick::new(tick), &states)
            .with_context(|| format!("pack tick {tick}"))?;
        report.pack_us.push(start.elapsed().as_micros() as u64);
        report.blob_bytes_total += frame.encoded_bytes() as u64;
        drop(states);

        let delta_bytes = replicate(&engine, &frame, acked.as_ref(), &mut view)?;
        report.delta_bytes_total += delta_bytes;
        report.delta_sizes.push(delta_bytes);
        report.observer_mismatches += observer_mismatches(&world, &view);
        acked = Some(frame);
        world.settle();

        tables.update(tick, &world, &mut report)?;
        tables.check_delayed(tick, config.observer_delay, &mut report)?;
        tracing::trace!(target: TARGET, tick, delta_bytes, "sim.tick");
    }

    let primary = payloads(tables.primary()?);
    let mirror = tables
        .registry
        .table(tables.mirror)
        .context("mirror table")?;
    report.mirror_in_sync = payloads(mirror) == primary;
    report.client_in_sync = payloads(&tables.client) == primary;
    report.table_entries = primary.len();
    report.stats = engine.stats();
    report.baselines = engine.baselines().len();
    report.finalize();
    tracing::info!(
        target: TARGET,
        ticks = report.ticks,
        packed = report.stats.packed(),
        delta_bytes = report.delta_bytes_total,
        consistent = report.is_consistent(),
        "sim.finished"
    );
    Ok(report)
}

/// Serializes `frame` for observer 0 and applies it to `view`.
fn replicate(
    engine: &PackEngine,
    frame: &FrameSnapshot,
    acked: Option<&FrameSnapshot>,
    view: &mut ObserverView,
) -> Result<u64> {
    let slots = frame.len() + acked.map_or(0, FrameSnapshot::len);
    let mut buf = vec![0u8; frame.encoded_bytes() + 64 * slots + 64];
    let mut writer = BitWriter::new(&mut buf);
    write_frame_delta(frame, acked, engine.baselines(), 0, &mut writer)
        .context("write frame delta")?;
    let bits = writer.bits_written();
    let len = writer.finish();

    let mut reader = BitReader::with_bit_len(&buf[..len], bits);
    read_frame_delta(engine.registry(), engine.baselines(), view, &mut reader)
        .context("read frame delta")?;
    Ok(len as u64)
}

fn observer_mismatches(world: &World, view: &ObserverView) -> u64 {
    let mut mismatches = 0;
    let mut present = 0;
    for (i, entity) in world.entities.iter().enumerate() {
        if !entity.present {
            continue;
        }
        present += 1;
        let seen = view.entity(EntityIndex::new(i as u32));
        if seen.map_or(true, |seen| seen.serial != entity.serial || seen.values != entity.values) {
            mismatches += 1;
        }
    }
    if view.len() != present {
        mismatches += 1;
    }
    mismatches
}
