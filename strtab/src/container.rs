//! A named set of string tables sharing tick and lock state.

use codec::Tick;

use crate::config::TableConfig;
use crate::error::{StringTableError, StringTableResult};
use crate::table::StringTable;
use crate::types::TableId;
use crate::wire::TableUpdate;

const TARGET: &str = "deltapack::strtab";

/// Maximum number of tables in one container.
pub const MAX_TABLES: usize = 32;

/// Owns the string tables of one session.
///
/// A new container is locked and does not allow table creation; the level
/// lifecycle opens it for setup and closes it again.
#[derive(Debug)]
pub struct StringTableContainer {
    tables: Vec<StringTable>,
    allow_creation: bool,
    locked: bool,
    rollback: bool,
    tick: Tick,
}

impl Default for StringTableContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl StringTableContainer {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tables: Vec::new(),
            allow_creation: false,
            locked: true,
            rollback: false,
            tick: Tick::new(0),
        }
    }

    /// Allows or forbids [`create_table`](Self::create_table); returns the previous state.
    pub fn allow_creation(&mut self, allow: bool) -> bool {
        std::mem::replace(&mut self.allow_creation, allow)
    }

    #[must_use]
    pub const fn creation_allowed(&self) -> bool {
        self.allow_creation
    }

    /// Turns on history for every table created from now on.
    ///
    /// # Errors
    ///
    /// Returns [`StringTableError::RollbackAfterCreate`] if tables exist.
    pub fn enable_rollback(&mut self) -> StringTableResult<()> {
        if !self.tables.is_empty() {
            return Err(StringTableError::RollbackAfterCreate);
        }
        self.rollback = true;
        Ok(())
    }

    #[must_use]
    pub const fn rollback_enabled(&self) -> bool {
        self.rollback
    }

    /// Creates a table stamped with the container tick and lock state.
    ///
    /// # Errors
    ///
    /// Fails if creation is not allowed, the name is taken, the container
    /// is full, or `config` is invalid.
    pub fn create_table(&mut self, name: &str, mut config: TableConfig) -> StringTableResult<TableId> {
        if !self.allow_creation {
            return Err(StringTableError::CreationNotAllowed {
                name: name.to_string(),
            });
        }
        if self.find_table(name).is_some() {
            return Err(StringTableError::DuplicateTable {
                name: name.to_string(),
            });
        }
        if self.tables.len() >= MAX_TABLES {
            return Err(StringTableError::TooManyTables { max: MAX_TABLES });
        }

        config.history |= self.rollback;
        let id = TableId::new(self.tables.len() as u16);
        let mut table = StringTable::new(id, name, config)?;
        table.set_tick(self.tick)?;
        table.lock(self.locked);
        tracing::debug!(
            target: TARGET,
            table = name,
            id = id.raw(),
            capacity = table.capacity(),
            history = table.history_enabled(),
            "strtab.table_created"
        );
        self.tables.push(table);
        Ok(id)
    }

    /// Finds a table by name, ignoring ASCII case.
    #[must_use]
    pub fn find_table(&self, name: &str) -> Option<TableId> {
        self.tables
            .iter()
            .find(|table| table.name().eq_ignore_ascii_case(name))
            .map(StringTable::id)
    }

    #[must_use]
    pub fn table(&self, id: TableId) -> Option<&StringTable> {
        self.tables.get(id.as_usize())
    }

    pub fn table_mut(&mut self, id: TableId) -> Option<&mut StringTable> {
        self.tables.get_mut(id.as_usize())
    }

    #[must_use]
    pub fn tables(&self) -> &[StringTable] {
        &self.tables
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    /// Locks or unlocks every table; returns the previous container state.
    pub fn lock(&mut self, locked: bool) -> bool {
        for table in &mut self.tables {
            table.lock(locked);
        }
        std::mem::replace(&mut self.locked, locked)
    }

    #[must_use]
    pub const fn is_locked(&self) -> bool {
        self.locked
    }

    /// Advances the container and every table to `tick`.
    ///
    /// # Errors
    ///
    /// Returns [`StringTableError::TickRegression`] if `tick` is older than
    /// the container tick or any table tick.
    pub fn set_tick(&mut self, tick: Tick) -> StringTableResult<()> {
        if tick < self.tick {
            return Err(StringTableError::TickRegression {
                table: String::from("*"),
                latest: self.tick,
                requested: tick,
            });
        }
        for table in &mut self.tables {
            table.set_tick(tick)?;
        }
        self.tick = tick;
        Ok(())
    }

    /// Shows every table as of `tick`. See [`StringTable::restore_tick`].
    pub fn restore_tick(&mut self, tick: Tick) {
        for table in &mut self.tables {
            table.restore_tick(tick);
        }
    }

    /// Returns `true` if any table changed after `tick`.
    #[must_use]
    pub fn changed_since(&self, tick: Tick) -> bool {
        self.tables.iter().any(|table| table.changed_since(tick))
    }

    /// Encodes an update for every table with changes after `since`.
    ///
    /// With `since = None`, every non-empty table is dumped in full.
    ///
    /// # Errors
    ///
    /// Propagates [`StringTable::encode_update`] errors.
    pub fn write_updates(&self, since: Option<Tick>) -> StringTableResult<Vec<TableUpdate>> {
        self.tables
            .iter()
            .filter(|table| since.map_or(!table.is_empty(), |tick| table.changed_since(tick)))
            .map(|table| table.encode_update(since))
            .collect()
    }

    /// Applies updates produced by [`write_updates`](Self::write_updates).
    ///
    /// Returns the number of entry records applied.
    ///
    /// # Errors
    ///
    /// Fails on the first unknown table or corrupt update.
    pub fn apply_updates(&mut self, updates: &[TableUpdate]) -> StringTableResult<u32> {
        let mut applied = 0;
        for update in updates {
            let table = self
                .table_mut(update.table)
                .ok_or(StringTableError::UnknownTable { table: update.table })?;
            applied += table.apply_update(update)?;
        }
        Ok(applied)
    }

    /// Fires change callbacks for tables changed after `since`.
    pub fn trigger_callbacks(&self, since: Option<Tick>) {
        for table in &self.tables {
            if since.map_or(true, |tick| table.changed_since(tick)) {
                table.trigger_callbacks(since);
            }
        }
    }

    pub fn remove_all_tables(&mut self) {
        self.tables.clear();
    }

    #[must_use]
    pub fn dump(&self) -> String {
        self.tables.iter().map(StringTable::dump).collect()
    }

    /// Borrows one table for reading and another for writing.
    pub(crate) fn table_pair(
        &mut self,
        source: TableId,
        target: TableId,
    ) -> StringTableResult<(&StringTable, &mut StringTable)> {
        let (s, t) = (source.as_usize(), target.as_usize());
        if s == t {
            return Err(StringTableError::InvalidMirror {
                reason: "table cannot mirror itself",
            });
        }
        let len = self.tables.len();
        if s >= len {
            return Err(StringTableError::UnknownTable { table: source });
        }
        if t >= len {
            return Err(StringTableError::UnknownTable { table: target });
        }
        if s < t {
            let (lo, hi) = self.tables.split_at_mut(t);
            Ok((&lo[s], &mut hi[0]))
        } else {
            let (lo, hi) = self.tables.split_at_mut(s);
            Ok((&hi[0], &mut lo[t]))
        }
    }
}
