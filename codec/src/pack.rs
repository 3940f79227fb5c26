//! The entity packing engine.

use std::sync::Arc;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use schema::{ClassSchema, PropIndex, SchemaRegistry};

use crate::baseline::BaselineStore;
use crate::blob::{ChangedProps, EncodedProps, PackedBlob};
use crate::changeframe::ChangeFrameList;
use crate::config::{PackConfig, ReplicationMode};
use crate::encode::{diff_props, encode_full, encode_incremental, freeze, PropsView};
use crate::entity::EntityState;
use crate::error::{CodecError, CodecResult};
use crate::limits::CodecLimits;
use crate::scratch::PackScratch;
use crate::snapshot::{FrameSnapshot, PackFailure, PackPath, SnapshotEntry};
use crate::stats::{PackStats, TickCounters};
use crate::types::{EntityIndex, RecipientMask, Tick};

const TARGET: &str = "deltapack::pack";

/// Produces one [`PackedBlob`] per entity per tick, reusing or incrementally
/// updating the entity's previous blob where possible.
///
/// Ticks are packed strictly in order. Entities within a tick are packed
/// independently and, with [`PackConfig::parallel`], across a worker pool.
#[derive(Debug)]
pub struct PackEngine {
    registry: Arc<SchemaRegistry>,
    baselines: Arc<BaselineStore>,
    config: PackConfig,
    limits: CodecLimits,
    pool: Option<ThreadPool>,
    previous: Vec<Option<Arc<PackedBlob>>>,
    scratch: PackScratch,
    counters: TickCounters,
    totals: PackStats,
    last_tick: Option<Tick>,
}

impl PackEngine {
    /// Creates an engine with its own baseline store.
    pub fn new(
        registry: Arc<SchemaRegistry>,
        config: PackConfig,
        limits: CodecLimits,
    ) -> CodecResult<Self> {
        let baselines = Arc::new(BaselineStore::new(registry.len()));
        Self::with_baselines(registry, baselines, config, limits)
    }

    /// Creates an engine that publishes into a shared baseline store.
    pub fn with_baselines(
        registry: Arc<SchemaRegistry>,
        baselines: Arc<BaselineStore>,
        config: PackConfig,
        limits: CodecLimits,
    ) -> CodecResult<Self> {
        let pool = match (config.parallel, config.worker_threads) {
            (true, Some(threads)) => Some(
                ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|i| format!("deltapack-pack-{i}"))
                    .build()
                    .map_err(|err| CodecError::WorkerPool {
                        reason: err.to_string(),
                    })?,
            ),
            _ => None,
        };
        Ok(Self {
            registry,
            baselines,
            scratch: PackScratch::new(limits.max_packed_bytes),
            previous: vec![None; limits.max_entities],
            config,
            limits,
            pool,
            counters: TickCounters::default(),
            totals: PackStats::default(),
            last_tick: None,
        })
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    #[must_use]
    pub const fn baselines(&self) -> &Arc<BaselineStore> {
        &self.baselines
    }

    #[must_use]
    pub const fn config(&self) -> &PackConfig {
        &self.config
    }

    #[must_use]
    pub const fn limits(&self) -> &CodecLimits {
        &self.limits
    }

    /// Lifetime counters.
    #[must_use]
    pub const fn stats(&self) -> PackStats {
        self.totals
    }

    #[must_use]
    pub const fn last_tick(&self) -> Option<Tick> {
        self.last_tick
    }

    /// Most recent blob packed for the entity slot.
    #[must_use]
    pub fn previous(&self, index: EntityIndex) -> Option<&Arc<PackedBlob>> {
        self.previous.get(index.as_usize()).and_then(Option::as_ref)
    }

    /// Packs every entity for `tick`.
    ///
    /// Per-entity failures are reported in the snapshot and do not stop other
    /// entities. A failed entity whose serial is unchanged keeps its previous
    /// blob in the snapshot as [`PackPath::Carried`]. A fatal error (see [`CodecError::is_fatal`]) aborts the whole
    /// tick and leaves the engine's previous blobs untouched.
    pub fn pack_tick(
        &mut self,
        tick: Tick,
        entities: &[EntityState<'_>],
    ) -> CodecResult<FrameSnapshot> {
        self.check_tick(tick, true)?;

        let mut failures = Vec::new();
        let mut seen = vec![false; self.limits.max_entities];
        let mut jobs = Vec::with_capacity(entities.len());
        for state in entities {
            let index = state.index;
            let error = match seen.get_mut(index.as_usize()) {
                None => CodecError::EntityOutOfRange {
                    index,
                    max: self.limits.max_entities,
                },
                Some(slot) if *slot => CodecError::DuplicateEntity { index },
                Some(slot) => {
                    *slot = true;
                    jobs.push(state);
                    continue;
                }
            };
            tracing::warn!(target: TARGET, entity = index.raw(), %error, "pack.entity_rejected");
            failures.push(PackFailure { index, error });
        }

        let ctx = PackContext {
            registry: &self.registry,
            baselines: &self.baselines,
            config: &self.config,
            counters: &self.counters,
            tick,
        };
        let previous = &self.previous;
        let prev_of = |state: &EntityState<'_>| previous.get(state.index.as_usize()).and_then(Option::as_ref);

        let results: Vec<(EntityIndex, CodecResult<(Arc<PackedBlob>, PackPath)>)> =
            if self.config.parallel {
                let capacity = self.limits.max_packed_bytes;
                let work = || {
                    jobs.par_iter()
                        .copied()
                        .map_init(
                            || PackScratch::new(capacity),
                            |scratch, state| (state.index, ctx.pack(state, prev_of(state), scratch)),
                        )
                        .collect()
                };
                match &self.pool {
                    Some(pool) => pool.install(work),
                    None => work(),
                }
            } else {
                let scratch = &mut self.scratch;
                jobs.iter()
                    .copied()
                    .map(|state| (state.index, ctx.pack(state, prev_of(state), scratch)))
                    .collect()
            };

        let mut stats = PackStats::default();
        let mut entries = Vec::with_capacity(results.len());
        for (index, result) in results {
            match result {
                Ok((blob, path)) => {
                    stats.record(path);
                    entries.push(SnapshotEntry { index, blob, path });
                }
                Err(error) if error.is_fatal() => {
                    tracing::error!(
                        target: TARGET,
                        tick = tick.raw(),
                        entity = index.raw(),
                        %error,
                        "pack.tick_aborted"
                    );
                    self.counters.drain_into(&mut PackStats::default());
                    return Err(error);
                }
                Err(error) => {
                    tracing::warn!(target: TARGET, entity = index.raw(), %error, "pack.entity_failed");
                    failures.push(PackFailure { index, error });
                }
            }
        }
        self.counters.drain_into(&mut stats);
        stats.failures = failures.len() as u64;

        // A failed entity keeps its last good blob so observers hold on to it.
        for failure in &failures {
            let index = failure.index;
            if entries.iter().any(|entry| entry.index == index) {
                continue;
            }
            let serial = entities.iter().find(|state| state.index == index).map(|state| state.serial);
            let carried = self
                .previous
                .get(index.as_usize())
                .and_then(Option::as_ref)
                .filter(|old| Some(old.serial()) == serial);
            if let Some(old) = carried {
                entries.push(SnapshotEntry {
                    index,
                    blob: Arc::clone(old),
                    path: PackPath::Carried,
                });
            }
        }

        let mut next = vec![None; self.limits.max_entities];
        for failure in &failures {
            let i = failure.index.as_usize();
            if let (Some(slot), Some(old)) = (next.get_mut(i), self.previous.get_mut(i)) {
                *slot = old.take();
            }
        }
        for entry in &entries {
            next[entry.index.as_usize()] = Some(Arc::clone(&entry.blob));
        }
        self.previous = next;
        self.totals += stats;
        self.last_tick = Some(tick);

        tracing::trace!(
            target: TARGET,
            tick = tick.raw(),
            reused = stats.reused,
            fast = stats.fast,
            slow = stats.slow,
            full = stats.full,
            failures = stats.failures,
            "pack.tick"
        );
        Ok(FrameSnapshot::new(tick, entries, failures, stats))
    }

    /// Packs a single entity against its previous blob.
    ///
    /// `tick` may repeat the last packed tick but never go back.
    pub fn pack_entity(
        &mut self,
        tick: Tick,
        state: &EntityState<'_>,
    ) -> CodecResult<(Arc<PackedBlob>, PackPath)> {
        self.check_tick(tick, false)?;
        let slot = state.index.as_usize();
        if slot >= self.previous.len() {
            return Err(CodecError::EntityOutOfRange {
                index: state.index,
                max: self.limits.max_entities,
            });
        }

        let ctx = PackContext {
            registry: &self.registry,
            baselines: &self.baselines,
            config: &self.config,
            counters: &self.counters,
            tick,
        };
        let result = ctx.pack(state, self.previous[slot].as_ref(), &mut self.scratch);
        let mut stats = PackStats::default();
        self.counters.drain_into(&mut stats);
        match &result {
            Ok((blob, path)) => {
                stats.record(*path);
                self.previous[slot] = Some(Arc::clone(blob));
                self.last_tick = Some(tick);
            }
            Err(error) if !error.is_fatal() => stats.failures += 1,
            Err(_) => {}
        }
        self.totals += stats;
        result
    }

    /// Forgets every previous blob, e.g. on level unload. Baselines persist.
    pub fn reset(&mut self) {
        self.previous.fill(None);
        self.last_tick = None;
    }

    /// Drops all baselines so the next pack of each class recreates them.
    pub fn clear_baselines(&mut self) {
        match Arc::get_mut(&mut self.baselines) {
            Some(store) => store.clear(),
            None => self.baselines = Arc::new(BaselineStore::new(self.registry.len())),
        }
    }

    fn check_tick(&self, tick: Tick, strict: bool) -> CodecResult<()> {
        match self.last_tick {
            Some(previous) if tick < previous || (strict && tick == previous) => {
                Err(CodecError::TickNotMonotonic {
                    previous,
                    current: tick,
                })
            }
            _ => Ok(()),
        }
    }
}

/// Shared, read-only state for packing one tick.
struct PackContext<'e> {
    registry: &'e SchemaRegistry,
    baselines: &'e BaselineStore,
    config: &'e PackConfig,
    counters: &'e TickCounters,
    tick: Tick,
}

impl PackContext<'_> {
    fn pack(
        &self,
        state: &EntityState<'_>,
        prev: Option<&Arc<PackedBlob>>,
        scratch: &mut PackScratch,
    ) -> CodecResult<(Arc<PackedBlob>, PackPath)> {
        let class = self
            .registry
            .class(state.class)
            .ok_or(CodecError::UnknownClass { class: state.class })?;
        self.ensure_baseline(class, state, scratch)?;

        let prev = prev.filter(|p| p.serial() == state.serial && p.class().id() == class.id());
        let Some(prev) = prev else {
            let bits = encode_full(class, state.source, self.tick, &mut scratch.buf, &mut scratch.prop_bits)?;
            let encoded = freeze(&scratch.buf, bits, &scratch.prop_bits, None);
            let blob = PackedBlob::new(
                state.serial,
                Arc::clone(class),
                self.tick,
                encoded,
                ChangedProps::All,
                state.recipients,
                Some(ChangeFrameList::new(class.prop_count(), self.tick)),
            );
            return Ok((Arc::new(blob), PackPath::Full));
        };
        let prev_view = PropsView::of(prev.encoded(), prev.tick());

        if !state.dirty && !self.config.always_reverify {
            if prev.recipients() == state.recipients {
                return Ok((Arc::clone(prev), PackPath::Reused));
            }
            let blob = self.next_blob(class, state, prev, prev.tick(), prev.encoded().clone(), Vec::new());
            return Ok((blob, PackPath::Reused));
        }

        if let Some(offsets) = self.fast_offsets(class, state) {
            match encode_incremental(class, state.source, self.tick, prev_view, prev.encoded(), offsets, scratch)? {
                Some((encoded, changed)) => {
                    if self.config.validate {
                        self.validate(class, state, prev, &changed, scratch);
                    }
                    let blob = self.finish(class, state, prev, encoded, changed);
                    return Ok((blob, PackPath::Fast));
                }
                None => {
                    self.counters.fast_fallback();
                    tracing::debug!(
                        target: TARGET,
                        class = class.name(),
                        entity = state.index.raw(),
                        "pack.fast_fallback"
                    );
                }
            }
        }

        let bits = encode_full(class, state.source, self.tick, &mut scratch.buf, &mut scratch.prop_bits)?;
        let current = PropsView {
            data: &scratch.buf[..bits.div_ceil(8)],
            prop_bits: &scratch.prop_bits,
            tick: self.tick,
        };
        let changed = diff_props(class, prev_view, current);
        if !state.dirty {
            report_unflagged(class, state, &changed);
        }
        let encoded = if changed.is_empty() {
            prev.encoded().clone()
        } else {
            freeze(&scratch.buf, bits, &scratch.prop_bits, Some(prev.encoded()))
        };
        Ok((self.finish(class, state, prev, encoded, changed), PackPath::Slow))
    }

    fn fast_offsets<'s>(&self, class: &ClassSchema, state: &EntityState<'s>) -> Option<&'s [u32]> {
        if !self.config.fast_path || state.full_replace {
            return None;
        }
        let changed = state.changed_offsets?;
        (changed.schema_hash == class.hash()).then_some(changed.offsets)
    }

    fn ensure_baseline(
        &self,
        class: &Arc<ClassSchema>,
        state: &EntityState<'_>,
        scratch: &mut PackScratch,
    ) -> CodecResult<()> {
        if self.baselines.index_for(class.id()).is_some() {
            return Ok(());
        }
        self.baselines
            .ensure(class.id(), || {
                let bits = encode_full(
                    class,
                    state.source,
                    self.tick,
                    &mut scratch.verify,
                    &mut scratch.verify_bits,
                )?;
                let encoded = freeze(&scratch.verify, bits, &scratch.verify_bits, None);
                Ok(PackedBlob::new(
                    state.serial,
                    Arc::clone(class),
                    self.tick,
                    encoded,
                    ChangedProps::All,
                    RecipientMask::ALL,
                    None,
                ))
            })
            .map(|_| ())
    }

    /// Reuses `prev` when nothing changed for the same recipients.
    fn finish(
        &self,
        class: &Arc<ClassSchema>,
        state: &EntityState<'_>,
        prev: &Arc<PackedBlob>,
        encoded: EncodedProps,
        changed: Vec<PropIndex>,
    ) -> Arc<PackedBlob> {
        if changed.is_empty() && prev.recipients() == state.recipients {
            return Arc::clone(prev);
        }
        let tick = if changed.is_empty() { prev.tick() } else { self.tick };
        self.next_blob(class, state, prev, tick, encoded, changed)
    }

    fn next_blob(
        &self,
        class: &Arc<ClassSchema>,
        state: &EntityState<'_>,
        prev: &PackedBlob,
        tick: Tick,
        encoded: EncodedProps,
        changed: Vec<PropIndex>,
    ) -> Arc<PackedBlob> {
        let carried = match self.config.mode {
            ReplicationMode::SingleConsumer => prev.steal_change_frames(),
            ReplicationMode::MultiObserver => prev.snapshot_change_frames(),
        };
        let mut frames = carried
            .filter(|list| list.len() == class.prop_count())
            .unwrap_or_else(|| ChangeFrameList::new(class.prop_count(), self.tick));
        frames.mark_changed(&changed, self.tick);
        Arc::new(PackedBlob::new(
            state.serial,
            Arc::clone(class),
            tick,
            encoded,
            ChangedProps::List(changed),
            state.recipients,
            Some(frames),
        ))
    }

    /// Re-runs the full diff and logs disagreement with the fast path.
    fn validate(
        &self,
        class: &ClassSchema,
        state: &EntityState<'_>,
        prev: &PackedBlob,
        fast: &[PropIndex],
        scratch: &mut PackScratch,
    ) {
        let bits = match encode_full(
            class,
            state.source,
            self.tick,
            &mut scratch.verify,
            &mut scratch.verify_bits,
        ) {
            Ok(bits) => bits,
            Err(error) => {
                tracing::warn!(target: TARGET, entity = state.index.raw(), %error, "pack.validation_failed");
                return;
            }
        };
        let slow = diff_props(
            class,
            PropsView::of(prev.encoded(), prev.tick()),
            PropsView {
                data: &scratch.verify[..bits.div_ceil(8)],
                prop_bits: &scratch.verify_bits,
                tick: self.tick,
            },
        );

        let mut mismatches = 0;
        for prop in class.props().iter().filter(|p| !p.flags.tick_relative) {
            let in_fast = fast.binary_search(&prop.index).is_ok();
            let in_slow = slow.binary_search(&prop.index).is_ok();
            if in_fast != in_slow {
                mismatches += 1;
                tracing::warn!(
                    target: TARGET,
                    class = class.name(),
                    entity = state.index.raw(),
                    prop = %prop.name,
                    fast = in_fast,
                    slow = in_slow,
                    "pack.validation_mismatch"
                );
            }
        }
        if mismatches > 0 {
            self.counters.validation_mismatch(mismatches);
        }
    }
}

fn report_unflagged(class: &ClassSchema, state: &EntityState<'_>, changed: &[PropIndex]) {
    let unflagged = changed
        .iter()
        .filter(|index| class.prop(**index).is_some_and(|p| !p.flags.tick_relative))
        .count();
    if unflagged > 0 {
        tracing::warn!(
            target: TARGET,
            class = class.name(),
            entity = state.index.raw(),
            props = unflagged,
            "pack.unflagged_change"
        );
    }
}

#[cfg(test)]
mod tests {
    use schema::{PropCodec, PropDef, TableDef};

    use super::*;
    use crate::types::EntitySerial;
    use crate::value::PropValue;

    fn registry() -> Arc<SchemaRegistry> {
        let mut builder = SchemaRegistry::builder();
        builder.register(
            TableDef::new("Mover")
                .prop(PropDef::scalar("x", 0, PropCodec::sint(16)))
                .prop(PropDef::scalar("y", 4, PropCodec::sint(16)))
                .prop(PropDef::scalar("hp", 8, PropCodec::var_uint())),
        );
        Arc::new(builder.build().unwrap())
    }

    fn engine() -> PackEngine {
        PackEngine::new(registry(), PackConfig::for_testing(), CodecLimits::for_testing()).unwrap()
    }

    fn values(x: i64, y: i64, hp: u64) -> Vec<PropValue> {
        vec![PropValue::SInt(x), PropValue::SInt(y), PropValue::VarUInt(hp)]
    }

    fn state(values: &Vec<PropValue>) -> EntityState<'_> {
        EntityState::new(
            EntityIndex::new(3),
            EntitySerial::new(1),
            schema::ClassId::new(0),
            values,
        )
    }

    #[test]
    fn first_pack_is_full_and_creates_baseline() {
        let mut engine = engine();
        let v = values(1, 2, 3);
        let (blob, path) = engine.pack_entity(Tick::new(1), &state(&v)).unwrap();
        assert_eq!(path, PackPath::Full);
        assert_eq!(blob.changed(), &ChangedProps::All);
        assert_eq!(engine.baselines().len(), 1);
        assert!(engine.previous(EntityIndex::new(3)).is_some());
    }

    #[test]
    fn clean_entity_reuses_previous() {
        let mut engine = engine();
        let v = values(1, 2, 3);
        let (first, _) = engine.pack_entity(Tick::new(1), &state(&v)).unwrap();
        let (second, path) = engine.pack_entity(Tick::new(2), &state(&v).clean()).unwrap();
        assert_eq!(path, PackPath::Reused);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn fast_path_uses_offsets() {
        let mut engine = engine();
        let hash = engine.registry().classes()[0].hash();
        let before = values(1, 2, 3);
        engine.pack_entity(Tick::new(1), &state(&before)).unwrap();

        let after = values(1, 9, 3);
        let offsets = [4];
        let (blob, path) = engine
            .pack_entity(Tick::new(2), &state(&after).with_changed_offsets(hash, &offsets))
            .unwrap();
        assert_eq!(path, PackPath::Fast);
        assert_eq!(blob.changed(), &ChangedProps::List(vec![PropIndex::new(1)]));
        assert_eq!(engine.stats().validation_mismatches, 0);
    }

    #[test]
    fn stale_schema_hash_uses_slow_path() {
        let mut engine = engine();
        engine.pack_entity(Tick::new(1), &state(&values(1, 2, 3))).unwrap();
        let after = values(5, 2, 3);
        let offsets = [0];
        let (_, path) = engine
            .pack_entity(Tick::new(2), &state(&after).with_changed_offsets(0xdead, &offsets))
            .unwrap();
        assert_eq!(path, PackPath::Slow);
    }

    #[test]
    fn tick_must_advance() {
        let mut engine = engine();
        let v = values(1, 2, 3);
        engine.pack_tick(Tick::new(5), &[state(&v)]).unwrap();
        assert!(matches!(
            engine.pack_tick(Tick::new(5), &[state(&v)]),
            Err(CodecError::TickNotMonotonic { .. })
        ));
    }

    #[test]
    fn duplicate_and_out_of_range_are_per_entity() {
        let mut engine = engine();
        let v = values(1, 2, 3);
        let far = EntityState::new(EntityIndex::new(1000), EntitySerial::new(1), schema::ClassId::new(0), &v);
        let snapshot = engine.pack_tick(Tick::new(1), &[state(&v), state(&v), far]).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.failures().len(), 2);
        assert_eq!(snapshot.stats().failures, 2);
    }
}
