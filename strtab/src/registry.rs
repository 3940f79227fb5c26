//! Containers, the level lifecycle and mirror links.

use codec::Tick;

use crate::config::{InsertOrigin, MirrorSync};
use crate::container::StringTableContainer;
use crate::error::{StringTableError, StringTableResult};
use crate::table::StringTable;
use crate::types::{ContainerId, StringIndex, TableHandle};

const TARGET: &str = "deltapack::strtab";

/// Maximum number of mirrors fed by one table.
pub const MAX_MIRRORS_PER_TABLE: usize = 2;

/// A primary table feeding a mirror table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MirrorLink {
    pub primary: TableHandle,
    pub mirror: TableHandle,
    pub sync: MirrorSync,
}

/// Owns string table containers and the links between their tables.
///
/// Mirrors are referenced by handle, never owned, so removing a container
/// drops every link that touches it. Writes made through the registry reach
/// [`MirrorSync::Immediate`] mirrors at once; everything else catches up in
/// [`reconcile_mirrors`](Self::reconcile_mirrors).
#[derive(Debug, Default)]
pub struct TableRegistry {
    containers: Vec<Option<StringTableContainer>>,
    links: Vec<MirrorLink>,
    in_level: bool,
}

impl TableRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_container(&mut self) -> ContainerId {
        let id = ContainerId::new(self.containers.len() as u32);
        let mut container = StringTableContainer::new();
        if self.in_level {
            container.allow_creation(true);
            container.lock(false);
        }
        self.containers.push(Some(container));
        id
    }

    /// Removes a container and every mirror link touching it.
    pub fn remove_container(&mut self, id: ContainerId) -> Option<StringTableContainer> {
        let container = self.containers.get_mut(id.raw() as usize)?.take()?;
        let before = self.links.len();
        self.links
            .retain(|link| link.primary.container != id && link.mirror.container != id);
        tracing::debug!(
            target: TARGET,
            container = id.raw(),
            unlinked = before - self.links.len(),
            "strtab.container_removed"
        );
        Some(container)
    }

    #[must_use]
    pub fn container(&self, id: ContainerId) -> Option<&StringTableContainer> {
        self.containers.get(id.raw() as usize)?.as_ref()
    }

    /// Direct access to a container.
    ///
    /// Writes made here bypass immediate mirroring and reach mirrors on the
    /// next [`reconcile_mirrors`](Self::reconcile_mirrors).
    pub fn container_mut(&mut self, id: ContainerId) -> Option<&mut StringTableContainer> {
        self.containers.get_mut(id.raw() as usize)?.as_mut()
    }

    pub fn containers(&self) -> impl Iterator<Item = (ContainerId, &StringTableContainer)> {
        self.containers.iter().enumerate().filter_map(|(i, slot)| {
            slot.as_ref()
                .map(|container| (ContainerId::new(i as u32), container))
        })
    }

    #[must_use]
    pub fn table(&self, handle: TableHandle) -> Option<&StringTable> {
        self.container(handle.container)?.table(handle.table)
    }

    /// Opens every container for level setup.
    ///
    /// Tables and links from the previous level are dropped; containers
    /// accept new tables and inserts until [`end_level`](Self::end_level).
    pub fn start_level(&mut self) {
        self.links.clear();
        for container in self.containers.iter_mut().flatten() {
            container.remove_all_tables();
            container.allow_creation(true);
            container.lock(false);
        }
        self.in_level = true;
        tracing::debug!(target: TARGET, "strtab.level_started");
    }

    /// Closes table creation and locks every table.
    pub fn end_level(&mut self) {
        for container in self.containers.iter_mut().flatten() {
            container.allow_creation(false);
            container.lock(true);
        }
        self.in_level = false;
        tracing::debug!(target: TARGET, "strtab.level_ended");
    }

    #[must_use]
    pub const fn in_level(&self) -> bool {
        self.in_level
    }

    /// Links `mirror` to `primary` and copies the current contents across.
    ///
    /// # Errors
    ///
    /// Fails if either table is unknown, the tables are the same, the
    /// primary already feeds [`MAX_MIRRORS_PER_TABLE`] mirrors, or the
    /// mirror is not empty.
    pub fn link_mirror(
        &mut self,
        primary: TableHandle,
        mirror: TableHandle,
        sync: MirrorSync,
    ) -> StringTableResult<()> {
        if self.links.iter().any(|link| link.primary == primary && link.mirror == mirror) {
            return Err(StringTableError::InvalidMirror {
                reason: "tables are already linked",
            });
        }
        if self.mirrors_of(primary).count() >= MAX_MIRRORS_PER_TABLE {
            return Err(StringTableError::InvalidMirror {
                reason: "too many mirrors for table",
            });
        }
        let (source, target) = self.pair_mut(primary, mirror)?;
        source.copy_into(target)?;
        self.links.push(MirrorLink {
            primary,
            mirror,
            sync,
        });
        Ok(())
    }

    /// Removes a link; returns `true` if it existed.
    pub fn unlink_mirror(&mut self, primary: TableHandle, mirror: TableHandle) -> bool {
        let before = self.links.len();
        self.links
            .retain(|link| !(link.primary == primary && link.mirror == mirror));
        before != self.links.len()
    }

    pub fn mirrors_of(&self, primary: TableHandle) -> impl Iterator<Item = &MirrorLink> {
        self.links.iter().filter(move |link| link.primary == primary)
    }

    #[must_use]
    pub fn links(&self) -> &[MirrorLink] {
        &self.links
    }

    /// Inserts into a table and feeds immediate mirrors.
    ///
    /// # Errors
    ///
    /// Fails like [`StringTable::insert`], or if a mirror cannot follow.
    pub fn insert(
        &mut self,
        handle: TableHandle,
        origin: InsertOrigin,
        string: &str,
        payload: Option<&[u8]>,
    ) -> StringTableResult<StringIndex> {
        let index = self.table_mut(handle)?.insert(origin, string, payload)?;
        self.propagate(handle, index)?;
        Ok(index)
    }

    /// Writes a payload and feeds immediate mirrors.
    ///
    /// # Errors
    ///
    /// Fails like [`StringTable::set_payload`], or if a mirror cannot follow.
    pub fn set_payload(
        &mut self,
        handle: TableHandle,
        index: StringIndex,
        tick: Tick,
        payload: Option<&[u8]>,
    ) -> StringTableResult<bool> {
        let changed = self.table_mut(handle)?.set_payload(index, tick, payload)?;
        if changed {
            self.propagate(handle, index)?;
        }
        Ok(changed)
    }

    /// Advances every container to `tick`.
    ///
    /// # Errors
    ///
    /// Stops at the first container that rejects the tick.
    pub fn set_tick(&mut self, tick: Tick) -> StringTableResult<()> {
        for container in self.containers.iter_mut().flatten() {
            container.set_tick(tick)?;
        }
        Ok(())
    }

    /// Brings every mirror up to date with entries changed after `since`.
    ///
    /// Returns the number of entries visited.
    ///
    /// # Errors
    ///
    /// Stops at the first link that fails; earlier links stay synchronized.
    pub fn reconcile_mirrors(&mut self, since: Option<Tick>) -> StringTableResult<usize> {
        let links = self.links.clone();
        let mut visited = 0;
        for link in links {
            let (source, target) = self.pair_mut(link.primary, link.mirror)?;
            visited += source.sync_mirror(target, since)?;
        }
        tracing::trace!(target: TARGET, links = self.links.len(), visited, "strtab.mirrors_reconciled");
        Ok(visited)
    }

    fn propagate(&mut self, primary: TableHandle, index: StringIndex) -> StringTableResult<()> {
        let immediate: Vec<TableHandle> = self
            .mirrors_of(primary)
            .filter(|link| link.sync == MirrorSync::Immediate)
            .map(|link| link.mirror)
            .collect();
        for mirror in immediate {
            let (source, target) = self.pair_mut(primary, mirror)?;
            source.mirror_entry(target, index)?;
        }
        Ok(())
    }

    fn table_mut(&mut self, handle: TableHandle) -> StringTableResult<&mut StringTable> {
        self.container_mut(handle.container)
            .ok_or(StringTableError::UnknownContainer {
                container: handle.container,
            })?
            .table_mut(handle.table)
            .ok_or(StringTableError::UnknownTable {
                table: handle.table,
            })
    }

    /// Borrows `source` for reading and `target` for writing.
    fn pair_mut(
        &mut self,
        source: TableHandle,
        target: TableHandle,
    ) -> StringTableResult<(&StringTable, &mut StringTable)> {
        let unknown = |container| StringTableError::UnknownContainer { container };
        if source.container == target.container {
            return self
                .container_mut(source.container)
                .ok_or_else(|| unknown(source.container))?
                .table_pair(source.table, target.table);
        }

        let (s, t) = (source.container.raw() as usize, target.container.raw() as usize);
        let len = self.containers.len();
        if s >= len {
            return Err(unknown(source.container));
        }
        if t >= len {
            return Err(unknown(target.container));
        }
        let (source_slot, target_slot) = if s < t {
            let (lo, hi) = self.containers.split_at_mut(t);
            (&lo[s], &mut hi[0])
        } else {
            let (lo, hi) = self.containers.split_at_mut(s);
            (&hi[0], &mut lo[t])
        };
        let source_table = source_slot
            .as_ref()
            .ok_or_else(|| unknown(source.container))?
            .table(source.table)
            .ok_or(StringTableError::UnknownTable {
                table: source.table,
            })?;
        let target_table = target_slot
            .as_mut()
            .ok_or_else(|| unknown(target.container))?
            .table_mut(target.table)
            .ok_or(StringTableError::UnknownTable {
                table: target.table,
            })?;
        Ok((source_table, target_table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableConfig;

    fn setup() -> (TableRegistry, TableHandle, TableHandle) {
        let mut registry = TableRegistry::new();
        let server = registry.create_container();
        let local = registry.create_container();
        registry.start_level();
        let primary = registry
            .container_mut(server)
            .unwrap()
            .create_table("models", TableConfig::default())
            .unwrap();
        let mirror = registry
            .container_mut(local)
            .unwrap()
            .create_table("models", TableConfig::default())
            .unwrap();
        (
            registry,
            TableHandle::new(server, primary),
            TableHandle::new(local, mirror),
        )
    }

    #[test]
    fn level_lifecycle_opens_and_closes_containers() {
        let (mut registry, primary, _) = setup();
        assert!(registry.in_level());
        registry.end_level();
        let container = registry.container(primary.container).unwrap();
        assert!(container.is_locked());
        assert!(!container.creation_allowed());
        assert_eq!(container.len(), 1);

        registry.start_level();
        assert!(registry.container(primary.container).unwrap().is_empty());
    }

    #[test]
    fn link_copies_existing_entries() {
        let (mut registry, primary, mirror) = setup();
        registry
            .insert(primary, InsertOrigin::Server, "hero.mdl", Some(b"1"))
            .unwrap();
        registry.link_mirror(primary, mirror, MirrorSync::Periodic).unwrap();
        let copied = registry.table(mirror).unwrap();
        assert_eq!(copied.find("hero.mdl"), Some(StringIndex::new(0)));
        assert!(matches!(
            registry.link_mirror(primary, mirror, MirrorSync::Periodic),
            Err(StringTableError::InvalidMirror { .. })
        ));
    }

    #[test]
    fn immediate_mirror_follows_writes() {
        let (mut registry, primary, mirror) = setup();
        registry.link_mirror(primary, mirror, MirrorSync::Immediate).unwrap();
        let a = registry
            .insert(primary, InsertOrigin::Server, "a", None)
            .unwrap();
        registry.set_payload(primary, a, Tick::new(3), Some(b"x")).unwrap();
        assert_eq!(registry.table(mirror).unwrap().payload(a), Some(&b"x"[..]));
    }

    #[test]
    fn periodic_mirror_waits_for_reconcile() {
        let (mut registry, primary, mirror) = setup();
        registry.link_mirror(primary, mirror, MirrorSync::Periodic).unwrap();
        registry
            .insert(primary, InsertOrigin::Server, "a", None)
            .unwrap();
        assert!(registry.table(mirror).unwrap().is_empty());
        assert_eq!(registry.reconcile_mirrors(None).unwrap(), 1);
        assert_eq!(registry.table(mirror).unwrap().len(), 1);
    }

    #[test]
    fn removing_a_container_unlinks_its_mirrors() {
        let (mut registry, primary, mirror) = setup();
        registry.link_mirror(primary, mirror, MirrorSync::Immediate).unwrap();
        assert!(registry.remove_container(mirror.container).is_some());
        assert!(registry.links().is_empty());
        assert!(registry.container(mirror.container).is_none());
        registry
            .insert(primary, InsertOrigin::Server, "a", None)
            .unwrap();
    }

    #[test]
    fn mirrors_per_table_are_bounded() {
        let (mut registry, primary, mirror) = setup();
        let local = mirror.container;
        let container = registry.container_mut(local).unwrap();
        let second = container.create_table("models2", TableConfig::default()).unwrap();
        let third = container.create_table("models3", TableConfig::default()).unwrap();
        registry.link_mirror(primary, mirror, MirrorSync::Immediate).unwrap();
        registry
            .link_mirror(primary, TableHandle::new(local, second), MirrorSync::Periodic)
            .unwrap();
        assert!(registry
            .link_mirror(primary, TableHandle::new(local, third), MirrorSync::Periodic)
            .is_err());
        assert!(registry.unlink_mirror(primary, mirror));
        assert!(!registry.unlink_mirror(primary, mirror));
    }
}
