//! The replicated string table.

use std::collections::HashMap;
use std::fmt::{self, Write as _};
use std::sync::Arc;

use codec::Tick;

use crate::config::{InsertOrigin, LockPolicy, TableConfig, MAX_PAYLOAD_BYTES, MAX_STRING_BYTES};
use crate::entry::{Entry, Payload, PayloadWrite};
use crate::error::{StringTableError, StringTableResult};
use crate::types::{StringIndex, TableId};

const TARGET: &str = "deltapack::strtab";

/// What a change callback is told about an entry.
#[derive(Debug, Clone, Copy)]
pub struct ChangeEvent<'a> {
    pub table: &'a str,
    pub index: StringIndex,
    pub string: &'a str,
    pub payload: Option<&'a [u8]>,
}

/// Callback invoked when an entry is added or its payload changes.
pub type ChangeCallback = Arc<dyn Fn(&ChangeEvent<'_>) + Send + Sync>;

/// A table of unique strings with optional binary payloads.
///
/// Entries get dense indices in insertion order. Every entry remembers the
/// tick it was created and last changed at, which is what incremental
/// updates are computed from. With history enabled, each entry also keeps
/// its payload over time so the table can be viewed as of an earlier tick.
pub struct StringTable {
    id: TableId,
    name: String,
    config: TableConfig,
    entries: Vec<Entry>,
    lookup: HashMap<String, StringIndex>,
    tick: Tick,
    last_changed_tick: Tick,
    locked: bool,
    callback: Option<ChangeCallback>,
}

impl fmt::Debug for StringTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StringTable")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("config", &self.config)
            .field("len", &self.entries.len())
            .field("tick", &self.tick)
            .field("last_changed_tick", &self.last_changed_tick)
            .field("locked", &self.locked)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl StringTable {
    /// Creates an empty, unlocked table at tick 0.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` fails [`TableConfig::validate`].
    pub fn new(id: TableId, name: impl Into<String>, config: TableConfig) -> StringTableResult<Self> {
        let name = name.into();
        config.validate(&name)?;
        Ok(Self {
            id,
            name,
            config,
            entries: Vec::new(),
            lookup: HashMap::new(),
            tick: Tick::default(),
            last_changed_tick: Tick::default(),
            locked: false,
            callback: None,
        })
    }

    #[must_use]
    pub const fn id(&self) -> TableId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn config(&self) -> &TableConfig {
        &self.config
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.config.max_entries
    }

    /// Tick that inserts and container-driven writes are stamped with.
    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    #[must_use]
    pub const fn last_changed_tick(&self) -> Tick {
        self.last_changed_tick
    }

    /// Returns `true` if anything changed after `tick`.
    #[must_use]
    pub fn changed_since(&self, tick: Tick) -> bool {
        self.last_changed_tick > tick
    }

    #[must_use]
    pub const fn is_locked(&self) -> bool {
        self.locked
    }

    #[must_use]
    pub const fn history_enabled(&self) -> bool {
        self.config.history
    }

    /// Advances the table tick.
    ///
    /// # Errors
    ///
    /// Returns [`StringTableError::TickRegression`] if `tick` is older than
    /// the current tick.
    pub fn set_tick(&mut self, tick: Tick) -> StringTableResult<()> {
        if tick < self.tick {
            return Err(StringTableError::TickRegression {
                table: self.name.clone(),
                latest: self.tick,
                requested: tick,
            });
        }
        self.tick = tick;
        Ok(())
    }

    /// Sets the lock state and returns the previous one.
    pub fn lock(&mut self, locked: bool) -> bool {
        std::mem::replace(&mut self.locked, locked)
    }

    /// Turns on payload history. Once on, it stays on.
    ///
    /// # Errors
    ///
    /// Returns [`StringTableError::HistoryAfterInsert`] if the table already
    /// has entries.
    pub fn enable_history(&mut self) -> StringTableResult<()> {
        if !self.entries.is_empty() {
            return Err(StringTableError::HistoryAfterInsert {
                table: self.name.clone(),
            });
        }
        self.config.history = true;
        Ok(())
    }

    pub fn set_callback(&mut self, callback: ChangeCallback) {
        self.callback = Some(callback);
    }

    pub fn clear_callback(&mut self) {
        self.callback = None;
    }

    /// Adds `string`, or finds it if present, and returns its index.
    ///
    /// An existing string keeps its index whoever asks; a payload passed
    /// along is written to it at the table tick.
    ///
    /// # Errors
    ///
    /// Fails if the string is empty or contains NUL, if the payload does
    /// not fit, if the table is full, if a client insert is not allowed,
    /// or if the table is locked under [`LockPolicy::Strict`].
    pub fn insert(
        &mut self,
        origin: InsertOrigin,
        string: &str,
        payload: Option<&[u8]>,
    ) -> StringTableResult<StringIndex> {
        if string.is_empty() || string.len() > MAX_STRING_BYTES || string.contains('\0') {
            return Err(StringTableError::InvalidString);
        }
        let payload = self.normalize(payload)?;

        if let Some(&index) = self.lookup.get(string) {
            if payload.is_some() {
                self.write(index, self.tick, payload)?;
            }
            return Ok(index);
        }

        if origin == InsertOrigin::Client && !self.config.allow_client_inserts {
            tracing::warn!(target: TARGET, table = %self.name, string, "strtab.insert_rejected");
            return Err(StringTableError::ClientInsertRejected {
                table: self.name.clone(),
            });
        }
        if self.locked {
            if self.config.lock_policy == LockPolicy::Strict {
                tracing::warn!(target: TARGET, table = %self.name, string, "strtab.insert_rejected");
                return Err(StringTableError::Locked {
                    table: self.name.clone(),
                });
            }
            tracing::warn!(target: TARGET, table = %self.name, string, "strtab.insert_while_locked");
        }
        if self.entries.len() >= self.config.max_entries as usize {
            tracing::warn!(
                target: TARGET,
                table = %self.name,
                string,
                capacity = self.config.max_entries,
                "strtab.insert_rejected"
            );
            return Err(StringTableError::TableFull {
                table: self.name.clone(),
                capacity: self.config.max_entries,
            });
        }

        let index = self.push(Entry::new(
            string.to_string(),
            payload,
            self.tick,
            self.config.history,
        ));
        self.record_insert(index);
        Ok(index)
    }

    /// Writes the payload of an entry at `tick`.
    ///
    /// Returns `true` if the current payload changed. The table tick moves
    /// forward to `tick` if it is newer.
    ///
    /// # Errors
    ///
    /// Fails for an unknown index, an oversized payload, or a history write
    /// older than the entry's newest record.
    pub fn set_payload(
        &mut self,
        index: StringIndex,
        tick: Tick,
        payload: Option<&[u8]>,
    ) -> StringTableResult<bool> {
        let payload = self.normalize(payload)?;
        self.tick = self.tick.max(tick);
        self.write(index, tick, payload)
    }

    #[must_use]
    pub fn find(&self, string: &str) -> Option<StringIndex> {
        self.lookup.get(string).copied()
    }

    #[must_use]
    pub fn string(&self, index: StringIndex) -> Option<&str> {
        self.entries.get(index.as_usize()).map(Entry::string)
    }

    #[must_use]
    pub fn payload(&self, index: StringIndex) -> Option<&[u8]> {
        self.entries.get(index.as_usize()).and_then(Entry::payload)
    }

    /// Tick the entry's current payload was written at.
    #[must_use]
    pub fn tick_changed(&self, index: StringIndex) -> Option<Tick> {
        self.entries.get(index.as_usize()).map(Entry::tick_changed)
    }

    /// Number of history records kept for an entry.
    #[must_use]
    pub fn history_len(&self, index: StringIndex) -> usize {
        self.entries.get(index.as_usize()).map_or(0, Entry::history_len)
    }

    /// Iterates `(index, string, payload)` in index order.
    ///
    /// Entries the current view predates are skipped.
    pub fn iter(&self) -> impl Iterator<Item = (StringIndex, &str, Option<&[u8]>)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.exists())
            .map(|(i, entry)| (index_of(i), entry.string(), entry.payload()))
    }

    /// Entries created or changed after `since`; all entries for `None`.
    ///
    /// Entries the current view predates are never listed.
    pub fn changed_entries(&self, since: Option<Tick>) -> impl Iterator<Item = StringIndex> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.exists())
            .filter(move |(_, entry)| since.map_or(true, |tick| entry.tick_changed() > tick))
            .map(|(i, _)| index_of(i))
    }

    /// Shows every history-tracked entry as it was at `tick`.
    ///
    /// History itself is left untouched, so any later tick can be restored
    /// again. Entries created after `tick` drop out of [`iter`](Self::iter)
    /// and of updates until a later tick is restored.
    pub fn restore_tick(&mut self, tick: Tick) {
        let mut last_changed = Tick::default();
        let mut restored = 0usize;
        for entry in &mut self.entries {
            if entry.restore(tick).is_some() {
                restored += 1;
            }
            if entry.exists() {
                last_changed = last_changed.max(entry.tick_changed());
            }
        }
        self.last_changed_tick = last_changed;
        tracing::debug!(target: TARGET, table = %self.name, tick = tick.raw(), restored, "strtab.restore_tick");
    }

    /// Duplicates every entry into `mirror`, value for value.
    ///
    /// # Errors
    ///
    /// Returns [`StringTableError::MirrorNotEmpty`] unless `mirror` is empty,
    /// and [`StringTableError::TableFull`] if it is too small.
    pub fn copy_into(&self, mirror: &mut Self) -> StringTableResult<()> {
        if !mirror.is_empty() {
            return Err(StringTableError::MirrorNotEmpty {
                table: mirror.name.clone(),
            });
        }
        if self.entries.len() > mirror.config.max_entries as usize {
            return Err(StringTableError::TableFull {
                table: mirror.name.clone(),
                capacity: mirror.config.max_entries,
            });
        }
        for entry in &self.entries {
            mirror.push(Entry::with_ticks(
                entry.string().to_string(),
                entry.shared_payload(),
                entry.tick_created(),
                entry.tick_changed(),
                mirror.config.history,
            ));
        }
        mirror.tick = mirror.tick.max(self.tick);
        mirror.last_changed_tick = mirror.last_changed_tick.max(self.last_changed_tick);
        Ok(())
    }

    /// Brings one entry of `mirror` up to date with this table.
    ///
    /// # Errors
    ///
    /// Fails if `index` is unknown here, or the mirror cannot take the entry.
    pub(crate) fn mirror_entry(&self, mirror: &mut Self, index: StringIndex) -> StringTableResult<()> {
        let entry = self.entry(index)?;
        let tick = entry.tick_changed();
        mirror.tick = mirror.tick.max(tick);
        if index.as_usize() < mirror.entries.len() {
            mirror.write(index, tick, entry.shared_payload())?;
            return Ok(());
        }
        if index.as_usize() != mirror.entries.len() {
            return Err(StringTableError::InvalidIndex {
                table: mirror.name.clone(),
                index,
            });
        }
        if mirror.entries.len() >= mirror.config.max_entries as usize {
            return Err(StringTableError::TableFull {
                table: mirror.name.clone(),
                capacity: mirror.config.max_entries,
            });
        }
        mirror.push(Entry::with_ticks(
            entry.string().to_string(),
            entry.shared_payload(),
            entry.tick_created(),
            tick,
            mirror.config.history,
        ));
        mirror.last_changed_tick = mirror.last_changed_tick.max(tick);
        mirror.notify(index);
        Ok(())
    }

    /// Brings `mirror` up to date with every entry changed after `since`.
    ///
    /// Returns the number of entries visited.
    ///
    /// # Errors
    ///
    /// Fails like [`mirror_entry`](Self::mirror_entry); entries already
    /// applied stay applied.
    pub fn sync_mirror(&self, mirror: &mut Self, since: Option<Tick>) -> StringTableResult<usize> {
        let mut count = 0;
        for index in self.changed_entries(since) {
            self.mirror_entry(mirror, index)?;
            count += 1;
        }
        mirror.tick = mirror.tick.max(self.tick);
        Ok(count)
    }

    /// Invokes the change callback for entries changed after `since`.
    pub fn trigger_callbacks(&self, since: Option<Tick>) {
        let Some(callback) = &self.callback else {
            return;
        };
        for index in self.changed_entries(since) {
            if let Some(event) = self.event(index) {
                callback(&event);
            }
        }
    }

    /// Human-readable listing of the table.
    #[must_use]
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} {}: {}/{} entries, tick {}, last changed {}{}",
            self.name,
            self.id,
            self.entries.len(),
            self.config.max_entries,
            self.tick,
            self.last_changed_tick,
            if self.locked { ", locked" } else { "" },
        );
        for (i, entry) in self.entries.iter().enumerate() {
            let _ = write!(
                out,
                "  {i}: {} ({} payload bytes, changed {}",
                entry.string(),
                entry.payload().map_or(0, <[u8]>::len),
                entry.tick_changed(),
            );
            if self.config.history {
                let _ = write!(out, ", {} history records", entry.history_len());
            }
            if !entry.exists() {
                out.push_str(", absent");
            }
            out.push_str(")\n");
        }
        out
    }

    pub(crate) fn entry(&self, index: StringIndex) -> StringTableResult<&Entry> {
        self.entries
            .get(index.as_usize())
            .ok_or_else(|| StringTableError::InvalidIndex {
                table: self.name.clone(),
                index,
            })
    }

    pub(crate) fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Validates a payload against the table layout.
    ///
    /// Fixed-size payloads are zero-padded and bits past the size cleared.
    pub(crate) fn normalize(&self, payload: Option<&[u8]>) -> StringTableResult<Payload> {
        let Some(bytes) = payload.filter(|bytes| !bytes.is_empty()) else {
            return Ok(None);
        };
        let max_bytes = self.config.fixed_payload_bytes().unwrap_or(MAX_PAYLOAD_BYTES);
        if bytes.len() > max_bytes {
            return Err(StringTableError::PayloadSize {
                table: self.name.clone(),
                max_bytes,
                actual_bytes: bytes.len(),
            });
        }
        let Some(bits) = self.config.fixed_payload_bits else {
            return Ok(Some(Arc::from(bytes)));
        };
        let mut fixed = bytes.to_vec();
        fixed.resize(max_bytes, 0);
        let tail = bits % 8;
        if tail != 0 {
            if let Some(last) = fixed.last_mut() {
                *last &= 0xFFu8 << (8 - tail);
            }
        }
        Ok(Some(Arc::from(fixed)))
    }

    pub(crate) fn write(
        &mut self,
        index: StringIndex,
        tick: Tick,
        payload: Payload,
    ) -> StringTableResult<bool> {
        let name = &self.name;
        let entry = self
            .entries
            .get_mut(index.as_usize())
            .ok_or_else(|| StringTableError::InvalidIndex {
                table: name.clone(),
                index,
            })?;
        match entry.set_payload(tick, payload) {
            PayloadWrite::Changed => {
                self.last_changed_tick = self.last_changed_tick.max(tick);
                self.notify(index);
                Ok(true)
            }
            PayloadWrite::Unchanged => Ok(false),
            PayloadWrite::Regressed { latest } => Err(StringTableError::TickRegression {
                table: self.name.clone(),
                latest,
                requested: tick,
            }),
        }
    }

    pub(crate) fn push(&mut self, entry: Entry) -> StringIndex {
        let index = index_of(self.entries.len());
        self.lookup.insert(entry.string().to_string(), index);
        self.entries.push(entry);
        index
    }

    pub(crate) fn record_insert(&mut self, index: StringIndex) {
        self.last_changed_tick = self.last_changed_tick.max(self.tick);
        self.notify(index);
    }

    fn event(&self, index: StringIndex) -> Option<ChangeEvent<'_>> {
        self.entries.get(index.as_usize()).map(|entry| ChangeEvent {
            table: &self.name,
            index,
            string: entry.string(),
            payload: entry.payload(),
        })
    }

    fn notify(&self, index: StringIndex) {
        if let (Some(callback), Some(event)) = (&self.callback, self.event(index)) {
            callback(&event);
        }
    }
}

/// Entry positions are bounded by [`MAX_TABLE_ENTRIES`](crate::config::MAX_TABLE_ENTRIES).
#[allow(clippy::cast_possible_truncation)]
const fn index_of(position: usize) -> StringIndex {
    StringIndex::new(position as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn table(config: TableConfig) -> StringTable {
        StringTable::new(TableId::new(0), "models", config).unwrap()
    }

    fn history_config() -> TableConfig {
        TableConfig {
            history: true,
            ..TableConfig::for_testing()
        }
    }

    #[test]
    fn insert_deduplicates_by_value() {
        let mut t = table(TableConfig::for_testing());
        let a = t.insert(InsertOrigin::Server, "a.mdl", None).unwrap();
        let b = t.insert(InsertOrigin::Server, "b.mdl", None).unwrap();
        let again = t.insert(InsertOrigin::Server, "a.mdl", Some(b"x")).unwrap();
        assert_eq!(a, StringIndex::new(0));
        assert_eq!(b, StringIndex::new(1));
        assert_eq!(again, a);
        assert_eq!(t.len(), 2);
        assert_eq!(t.payload(a), Some(&b"x"[..]));
    }

    #[test]
    fn full_table_rejects_new_strings_only() {
        let mut t = table(TableConfig {
            max_entries: 2,
            ..TableConfig::for_testing()
        });
        t.insert(InsertOrigin::Server, "a", None).unwrap();
        t.insert(InsertOrigin::Server, "b", None).unwrap();
        assert!(matches!(
            t.insert(InsertOrigin::Server, "c", None),
            Err(StringTableError::TableFull { capacity: 2, .. })
        ));
        assert_eq!(t.insert(InsertOrigin::Server, "a", None).unwrap(), StringIndex::new(0));
    }

    #[test]
    fn client_inserts_follow_config() {
        let mut t = table(TableConfig::for_testing());
        let a = t.insert(InsertOrigin::Server, "a", None).unwrap();
        assert!(matches!(
            t.insert(InsertOrigin::Client, "b", None),
            Err(StringTableError::ClientInsertRejected { .. })
        ));
        assert_eq!(t.insert(InsertOrigin::Client, "a", None).unwrap(), a);

        let mut open = table(TableConfig {
            allow_client_inserts: true,
            ..TableConfig::for_testing()
        });
        assert!(open.insert(InsertOrigin::Client, "b", None).is_ok());
    }

    #[test]
    fn lock_policy_strict_rejects_advisory_accepts() {
        let mut strict = table(TableConfig::for_testing());
        assert!(!strict.lock(true));
        assert!(matches!(
            strict.insert(InsertOrigin::Server, "a", None),
            Err(StringTableError::Locked { .. })
        ));
        assert!(strict.lock(false));
        assert!(strict.insert(InsertOrigin::Server, "a", None).is_ok());

        let mut advisory = table(TableConfig::default());
        advisory.lock(true);
        assert!(advisory.insert(InsertOrigin::Server, "a", None).is_ok());
    }

    #[test]
    fn invalid_strings_are_rejected() {
        let mut t = table(TableConfig::for_testing());
        assert_eq!(
            t.insert(InsertOrigin::Server, "", None),
            Err(StringTableError::InvalidString)
        );
        assert_eq!(
            t.insert(InsertOrigin::Server, "a\0b", None),
            Err(StringTableError::InvalidString)
        );
    }

    #[test]
    fn set_payload_tracks_last_changed_tick() {
        let mut t = table(TableConfig::for_testing());
        t.set_tick(Tick::new(3)).unwrap();
        let a = t.insert(InsertOrigin::Server, "a", None).unwrap();
        assert_eq!(t.last_changed_tick(), Tick::new(3));
        assert!(t.changed_since(Tick::new(2)));
        assert!(!t.changed_since(Tick::new(3)));

        assert!(t.set_payload(a, Tick::new(6), Some(b"p")).unwrap());
        assert!(!t.set_payload(a, Tick::new(7), Some(b"p")).unwrap());
        assert_eq!(t.last_changed_tick(), Tick::new(6));
        assert_eq!(t.tick_changed(a), Some(Tick::new(6)));
        assert_eq!(t.tick(), Tick::new(7));
        assert!(t.set_payload(StringIndex::new(9), Tick::new(7), None).is_err());
    }

    #[test]
    fn set_tick_is_monotonic() {
        let mut t = table(TableConfig::for_testing());
        t.set_tick(Tick::new(5)).unwrap();
        assert!(matches!(
            t.set_tick(Tick::new(4)),
            Err(StringTableError::TickRegression { .. })
        ));
        assert_eq!(t.tick(), Tick::new(5));
    }

    #[test]
    fn history_rollback_restores_views() {
        let mut t = table(history_config());
        t.set_tick(Tick::new(5)).unwrap();
        let k = t.insert(InsertOrigin::Server, "k", Some(b"v1")).unwrap();
        t.set_payload(k, Tick::new(10), Some(b"v2")).unwrap();

        t.restore_tick(Tick::new(7));
        assert_eq!(t.payload(k), Some(&b"v1"[..]));
        assert_eq!(t.last_changed_tick(), Tick::new(5));
        t.restore_tick(Tick::new(12));
        assert_eq!(t.payload(k), Some(&b"v2"[..]));
        t.restore_tick(Tick::new(2));
        assert_eq!(t.payload(k), None);
        assert_eq!(t.history_len(k), 2);
    }

    #[test]
    fn restore_before_creation_hides_entry() {
        let mut t = table(history_config());
        t.set_tick(Tick::new(1)).unwrap();
        let early = t.insert(InsertOrigin::Server, "early", Some(b"e")).unwrap();
        t.set_tick(Tick::new(10)).unwrap();
        let future = t.insert(InsertOrigin::Server, "future", Some(b"f")).unwrap();

        t.restore_tick(Tick::new(3));
        assert_eq!(t.last_changed_tick(), Tick::new(1));
        assert!(!t.changed_since(Tick::new(2)));
        assert_eq!(t.payload(future), None);
        assert_eq!(t.tick_changed(future), Some(Tick::default()));
        let strings: Vec<&str> = t.iter().map(|(_, s, _)| s).collect();
        assert_eq!(strings, ["early"]);
        assert_eq!(t.changed_entries(None).collect::<Vec<_>>(), [early]);
        assert!(t.dump().contains("future (0 payload bytes, changed 0, 1 history records, absent)"));

        t.restore_tick(Tick::new(10));
        assert_eq!(t.last_changed_tick(), Tick::new(10));
        assert_eq!(t.changed_entries(Some(Tick::new(3))).collect::<Vec<_>>(), [future]);
        assert_eq!(t.iter().count(), 2);
    }

    #[test]
    fn same_tick_writes_coalesce() {
        let mut t = table(history_config());
        let k = t.insert(InsertOrigin::Server, "k", Some(b"a")).unwrap();
        t.set_payload(k, Tick::new(4), Some(b"b")).unwrap();
        t.set_payload(k, Tick::new(4), Some(b"c")).unwrap();
        assert_eq!(t.history_len(k), 2);
        t.restore_tick(Tick::new(4));
        assert_eq!(t.payload(k), Some(&b"c"[..]));
    }

    #[test]
    fn history_must_be_enabled_before_inserts() {
        let mut t = table(TableConfig::for_testing());
        t.insert(InsertOrigin::Server, "a", None).unwrap();
        assert!(matches!(
            t.enable_history(),
            Err(StringTableError::HistoryAfterInsert { .. })
        ));
    }

    #[test]
    fn fixed_payloads_are_padded_and_masked() {
        let mut t = table(TableConfig {
            fixed_payload_bits: Some(12),
            ..TableConfig::for_testing()
        });
        let a = t.insert(InsertOrigin::Server, "a", Some(&[0xAB])).unwrap();
        assert_eq!(t.payload(a), Some(&[0xAB, 0x00][..]));
        t.set_payload(a, Tick::new(1), Some(&[0xFF, 0xFF])).unwrap();
        assert_eq!(t.payload(a), Some(&[0xFF, 0xF0][..]));
        assert!(matches!(
            t.set_payload(a, Tick::new(2), Some(&[1, 2, 3])),
            Err(StringTableError::PayloadSize { max_bytes: 2, .. })
        ));
    }

    #[test]
    fn copy_into_duplicates_values_and_ticks() {
        let mut t = table(TableConfig::for_testing());
        t.set_tick(Tick::new(2)).unwrap();
        let a = t.insert(InsertOrigin::Server, "a", Some(b"1")).unwrap();
        t.insert(InsertOrigin::Server, "b", None).unwrap();
        t.set_payload(a, Tick::new(8), Some(b"2")).unwrap();

        let mut mirror = StringTable::new(TableId::new(1), "mirror", TableConfig::for_testing()).unwrap();
        t.copy_into(&mut mirror).unwrap();
        assert_eq!(mirror.iter().collect::<Vec<_>>(), t.iter().collect::<Vec<_>>());
        assert_eq!(mirror.tick_changed(a), Some(Tick::new(8)));
        assert_eq!(mirror.last_changed_tick(), Tick::new(8));
        assert!(matches!(
            t.copy_into(&mut mirror),
            Err(StringTableError::MirrorNotEmpty { .. })
        ));
    }

    #[test]
    fn sync_mirror_applies_only_recent_changes() {
        let mut t = table(TableConfig::for_testing());
        let mut mirror = StringTable::new(TableId::new(1), "mirror", TableConfig::for_testing()).unwrap();
        let a = t.insert(InsertOrigin::Server, "a", None).unwrap();
        assert_eq!(t.sync_mirror(&mut mirror, None).unwrap(), 1);

        t.set_tick(Tick::new(4)).unwrap();
        t.set_payload(a, Tick::new(4), Some(b"x")).unwrap();
        t.insert(InsertOrigin::Server, "b", None).unwrap();
        assert_eq!(t.sync_mirror(&mut mirror, Some(Tick::new(0))).unwrap(), 2);
        assert_eq!(mirror.iter().collect::<Vec<_>>(), t.iter().collect::<Vec<_>>());
        assert_eq!(mirror.tick(), Tick::new(4));
    }

    #[test]
    fn callbacks_fire_on_change_and_on_trigger() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut t = table(TableConfig::for_testing());
        let sink = Arc::clone(&seen);
        t.set_callback(Arc::new(move |event: &ChangeEvent<'_>| {
            sink.lock().unwrap().push((event.index, event.string.to_string()));
        }));

        let a = t.insert(InsertOrigin::Server, "a", None).unwrap();
        t.set_tick(Tick::new(3)).unwrap();
        t.insert(InsertOrigin::Server, "b", None).unwrap();
        assert_eq!(seen.lock().unwrap().len(), 2);

        seen.lock().unwrap().clear();
        t.trigger_callbacks(Some(Tick::new(1)));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(StringIndex::new(1), "b".to_string())]
        );
        t.set_payload(a, Tick::new(3), Some(b"z")).unwrap();
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn dump_lists_entries() {
        let mut t = table(history_config());
        t.insert(InsertOrigin::Server, "alpha", Some(b"123")).unwrap();
        let dump = t.dump();
        assert!(dump.starts_with("models #0: 1/16 entries"));
        assert!(dump.contains("0: alpha (3 payload bytes"));
        assert!(dump.contains("1 history records"));
    }
}
