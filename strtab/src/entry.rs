//! A single table entry and its payload history.

use std::sync::Arc;

use codec::Tick;

/// Shared payload bytes. `None` stands for "no payload".
pub(crate) type Payload = Option<Arc<[u8]>>;

#[derive(Debug, Clone, PartialEq, Eq)]
struct HistoryRecord {
    tick: Tick,
    payload: Payload,
}

/// Outcome of a payload write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PayloadWrite {
    Changed,
    Unchanged,
    /// The write is older than the newest history record.
    Regressed { latest: Tick },
}

#[derive(Debug, Clone)]
pub(crate) struct Entry {
    string: String,
    payload: Payload,
    tick_created: Tick,
    tick_changed: Tick,
    history: Option<Vec<HistoryRecord>>,
    /// Restored to a tick before the entry was created.
    absent: bool,
}

impl Entry {
    pub(crate) fn new(string: String, payload: Payload, tick: Tick, history: bool) -> Self {
        Self::with_ticks(string, payload, tick, tick, history)
    }

    /// Entry whose creation and last change happened at different ticks.
    pub(crate) fn with_ticks(
        string: String,
        payload: Payload,
        tick_created: Tick,
        tick_changed: Tick,
        history: bool,
    ) -> Self {
        let history = history.then(|| {
            vec![HistoryRecord {
                tick: tick_changed,
                payload: payload.clone(),
            }]
        });
        Self {
            string,
            payload,
            tick_created,
            tick_changed,
            history,
            absent: false,
        }
    }

    pub(crate) fn string(&self) -> &str {
        &self.string
    }

    pub(crate) fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    pub(crate) fn shared_payload(&self) -> Payload {
        self.payload.clone()
    }

    pub(crate) const fn tick_created(&self) -> Tick {
        self.tick_created
    }

    pub(crate) const fn tick_changed(&self) -> Tick {
        self.tick_changed
    }

    /// `false` while restored to a tick before the entry was created.
    pub(crate) const fn exists(&self) -> bool {
        !self.absent
    }

    pub(crate) fn history_len(&self) -> usize {
        self.history.as_ref().map_or(0, Vec::len)
    }

    /// Writes `payload` at `tick`, recording it in history when enabled.
    ///
    /// A write at the tick of the newest record replaces that record.
    pub(crate) fn set_payload(&mut self, tick: Tick, payload: Payload) -> PayloadWrite {
        let changed = self.payload != payload;
        if let Some(history) = &mut self.history {
            match history.last().map(|record| record.tick) {
                Some(latest) if latest == tick => {
                    if let Some(last) = history.last_mut() {
                        last.payload = payload.clone();
                    }
                }
                _ if !changed => return PayloadWrite::Unchanged,
                Some(latest) if tick < latest => return PayloadWrite::Regressed { latest },
                _ => history.push(HistoryRecord {
                    tick,
                    payload: payload.clone(),
                }),
            }
        }

        self.absent = false;
        if !changed {
            return PayloadWrite::Unchanged;
        }
        self.payload = payload;
        self.tick_changed = tick;
        PayloadWrite::Changed
    }

    /// Points the current view at the newest record not after `tick`.
    ///
    /// Before the entry was created it becomes absent: no payload and a
    /// zero change tick, so updates skip it. Returns the tick of the view,
    /// or `None` when history is disabled.
    pub(crate) fn restore(&mut self, tick: Tick) -> Option<Tick> {
        let history = self.history.as_ref()?;
        let at = history.partition_point(|record| record.tick <= tick);
        self.absent = false;
        match at.checked_sub(1).map(|i| &history[i]) {
            Some(record) => {
                self.payload = record.payload.clone();
                self.tick_changed = record.tick;
            }
            None if tick < self.tick_created => {
                self.payload = None;
                self.tick_changed = Tick::default();
                self.absent = true;
            }
            None => {
                self.payload = None;
                self.tick_changed = self.tick_created;
            }
        }
        Some(self.tick_changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(s: &str) -> Payload {
        Some(Arc::from(s.as_bytes()))
    }

    #[test]
    fn history_append_and_restore() {
        let mut entry = Entry::new("k".into(), bytes("v1"), Tick::new(5), true);
        assert_eq!(
            entry.set_payload(Tick::new(10), bytes("v2")),
            PayloadWrite::Changed
        );
        assert_eq!(entry.history_len(), 2);

        assert_eq!(entry.restore(Tick::new(7)), Some(Tick::new(5)));
        assert_eq!(entry.payload(), Some(&b"v1"[..]));
        assert_eq!(entry.restore(Tick::new(12)), Some(Tick::new(10)));
        assert_eq!(entry.payload(), Some(&b"v2"[..]));
        assert_eq!(entry.restore(Tick::new(2)), Some(Tick::default()));
        assert_eq!(entry.payload(), None);
        assert!(!entry.exists());
        assert_eq!(entry.history_len(), 2);

        entry.restore(Tick::new(5));
        assert!(entry.exists());
        assert_eq!(entry.payload(), Some(&b"v1"[..]));
    }

    #[test]
    fn mirrored_entry_without_early_record_still_exists() {
        let mut entry = Entry::with_ticks("k".into(), bytes("v"), Tick::new(2), Tick::new(6), true);
        assert_eq!(entry.restore(Tick::new(4)), Some(Tick::new(2)));
        assert!(entry.exists());
        assert_eq!(entry.payload(), None);
    }

    #[test]
    fn same_tick_write_replaces_newest_record() {
        let mut entry = Entry::new("k".into(), bytes("a"), Tick::new(3), true);
        entry.set_payload(Tick::new(4), bytes("b"));
        entry.set_payload(Tick::new(4), bytes("c"));
        assert_eq!(entry.history_len(), 2);
        assert_eq!(entry.payload(), Some(&b"c"[..]));
        entry.restore(Tick::new(4));
        assert_eq!(entry.payload(), Some(&b"c"[..]));
    }

    #[test]
    fn unchanged_write_is_noop() {
        let mut entry = Entry::new("k".into(), bytes("a"), Tick::new(3), true);
        assert_eq!(
            entry.set_payload(Tick::new(9), bytes("a")),
            PayloadWrite::Unchanged
        );
        assert_eq!(entry.history_len(), 1);
        assert_eq!(entry.tick_changed(), Tick::new(3));
    }

    #[test]
    fn older_write_is_rejected() {
        let mut entry = Entry::new("k".into(), bytes("a"), Tick::new(8), true);
        assert_eq!(
            entry.set_payload(Tick::new(2), bytes("b")),
            PayloadWrite::Regressed {
                latest: Tick::new(8)
            }
        );
        assert_eq!(entry.payload(), Some(&b"a"[..]));
    }

    #[test]
    fn without_history_restore_is_unavailable() {
        let mut entry = Entry::new("k".into(), bytes("a"), Tick::new(1), false);
        assert_eq!(
            entry.set_payload(Tick::new(2), bytes("b")),
            PayloadWrite::Changed
        );
        assert_eq!(entry.history_len(), 0);
        assert_eq!(entry.restore(Tick::new(1)), None);
        assert_eq!(entry.payload(), Some(&b"b"[..]));
    }
}
