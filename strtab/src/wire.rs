//! Update wire format for string tables.
//!
//! An update is a varint entry count followed by one record per entry:
//!
//! ```text
//! [1]  sequential flag; if 0, [entry_bits] explicit index
//! [1]  string flag; if 1:
//!        [1] prefix flag; if 1, [5] history slot + [5] shared length
//!        NUL-terminated string (the remainder after a shared prefix)
//! [1]  payload flag; if 1:
//!        fixed tables: exactly `fixed_payload_bits` bits
//!        otherwise:    [14] byte length + bytes
//! ```
//!
//! Strings are sent only to observers that may not have them yet. Both sides
//! keep the last 32 strings of the update so a string can borrow a prefix
//! of at least 3 bytes from one of them.

use std::collections::VecDeque;

use bitstream::{BitReader, BitWriter};
use codec::Tick;

use crate::config::MAX_STRING_BYTES;
use crate::entry::Entry;
use crate::error::{StringTableError, StringTableResult};
use crate::table::StringTable;
use crate::types::{StringIndex, TableId};

const RECENT_STRINGS: usize = 32;
const SLOT_BITS: u8 = 5;
const PREFIX_BITS: u8 = 5;
const MAX_PREFIX: usize = (1 << PREFIX_BITS) - 1;
const MIN_PREFIX: usize = 3;
const PAYLOAD_LEN_BITS: u8 = 14;

/// An encoded update for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableUpdate {
    pub table: TableId,
    /// Number of entry records in `data`.
    pub entries: u32,
    pub data: Vec<u8>,
    pub bit_len: usize,
}

/// The last strings sent in an update, truncated to the longest usable prefix.
#[derive(Debug, Default)]
struct RecentStrings {
    strings: VecDeque<Vec<u8>>,
}

impl RecentStrings {
    /// Slot and length of the longest usable shared prefix.
    fn best_prefix(&self, string: &str) -> Option<(usize, usize)> {
        let mut best: Option<(usize, usize)> = None;
        for (slot, recent) in self.strings.iter().enumerate() {
            let mut shared = recent
                .iter()
                .zip(string.as_bytes())
                .take_while(|(a, b)| a == b)
                .count()
                .min(MAX_PREFIX);
            while !string.is_char_boundary(shared) {
                shared -= 1;
            }
            if shared >= MIN_PREFIX && best.map_or(true, |(_, len)| shared > len) {
                best = Some((slot, shared));
            }
        }
        best
    }

    fn prefix(&self, slot: usize, len: usize) -> Option<&[u8]> {
        self.strings.get(slot).and_then(|recent| recent.get(..len))
    }

    fn push(&mut self, string: &str) {
        if self.strings.len() == RECENT_STRINGS {
            self.strings.pop_front();
        }
        let bytes = string.as_bytes();
        self.strings.push_back(bytes[..bytes.len().min(MAX_PREFIX)].to_vec());
    }
}

impl StringTable {
    /// Writes every entry changed after `since` to `writer`.
    ///
    /// `since` is the tick the observer last acknowledged; `None` writes a
    /// full dump. Returns the number of entry records written.
    ///
    /// # Errors
    ///
    /// Returns [`StringTableError::Bitstream`] if the writer runs out of room.
    pub fn write_update(&self, since: Option<Tick>, writer: &mut BitWriter<'_>) -> StringTableResult<u32> {
        let changed: Vec<StringIndex> = self.changed_entries(since).collect();
        let count = u32::try_from(changed.len()).map_err(|_| StringTableError::CorruptUpdate {
            table: self.name().to_string(),
            reason: "too many entries",
        })?;
        writer.write_varu32(count)?;

        let entry_bits = self.config().entry_bits();
        let mut last: Option<u32> = None;
        let mut recent = RecentStrings::default();
        for index in changed {
            let entry = self.entry(index)?;
            let sequential = last.map_or(0, |l| l + 1) == index.raw();
            writer.write_bit(sequential)?;
            if !sequential {
                writer.write_bits(u64::from(index.raw()), entry_bits)?;
            }
            last = Some(index.raw());

            let send_string = since.map_or(true, |ack| entry.tick_created() >= ack);
            writer.write_bit(send_string)?;
            if send_string {
                write_string(writer, &recent, entry.string())?;
                recent.push(entry.string());
            }

            self.write_payload(writer, entry)?;
        }
        Ok(count)
    }

    /// Applies an update produced by [`write_update`](Self::write_update).
    ///
    /// Payload writes are stamped with the table tick. Returns the number of
    /// entry records read.
    ///
    /// # Errors
    ///
    /// Returns [`StringTableError::CorruptUpdate`] for indices out of range,
    /// new entries that skip an index or carry no string, and strings that
    /// disagree with the entry they name. Records before the failing one stay
    /// applied.
    pub fn parse_update(&mut self, reader: &mut BitReader<'_>) -> StringTableResult<u32> {
        let count = reader.read_varu32()?;
        if count > self.capacity() {
            return Err(self.corrupt("entry count exceeds capacity"));
        }

        let entry_bits = self.config().entry_bits();
        let mut last: Option<u32> = None;
        let mut recent = RecentStrings::default();
        for _ in 0..count {
            let index = if reader.read_bit()? {
                last.map_or(0, |l| l + 1)
            } else {
                reader.read_bits(entry_bits)? as u32
            };
            if index >= self.capacity() {
                return Err(self.corrupt("entry index out of range"));
            }
            last = Some(index);

            let string = if reader.read_bit()? {
                let string = self.read_string(reader, &recent)?;
                recent.push(&string);
                Some(string)
            } else {
                None
            };
            let payload = self.read_payload(reader)?;
            self.apply_record(StringIndex::new(index), string, payload.as_deref())?;
        }
        Ok(count)
    }

    /// Encodes [`write_update`](Self::write_update) into an owned buffer.
    ///
    /// # Errors
    ///
    /// Propagates [`write_update`](Self::write_update) errors.
    pub fn encode_update(&self, since: Option<Tick>) -> StringTableResult<TableUpdate> {
        let mut buf = vec![0u8; self.update_size_hint(since)];
        let mut writer = BitWriter::new(&mut buf);
        let entries = self.write_update(since, &mut writer)?;
        let bit_len = writer.bits_written();
        let len = writer.finish();
        buf.truncate(len);
        Ok(TableUpdate {
            table: self.id(),
            entries,
            data: buf,
            bit_len,
        })
    }

    /// Applies an owned update.
    ///
    /// # Errors
    ///
    /// Propagates [`parse_update`](Self::parse_update) errors.
    pub fn apply_update(&mut self, update: &TableUpdate) -> StringTableResult<u32> {
        let mut reader = BitReader::with_bit_len(&update.data, update.bit_len);
        self.parse_update(&mut reader)
    }

    /// Upper bound on the encoded size of an update, in bytes.
    fn update_size_hint(&self, since: Option<Tick>) -> usize {
        let per_entry: usize = self
            .changed_entries(since)
            .filter_map(|index| self.entry(index).ok())
            .map(|entry| 4 + entry.string().len() + 1 + 2 + entry.payload().map_or(0, <[u8]>::len))
            .sum();
        per_entry + 8
    }

    fn write_payload(&self, writer: &mut BitWriter<'_>, entry: &Entry) -> StringTableResult<()> {
        let Some(bytes) = entry.payload() else {
            writer.write_bit(false)?;
            return Ok(());
        };
        writer.write_bit(true)?;
        match self.config().fixed_payload_bits {
            Some(bits) => writer.write_bit_range(bytes, 0, usize::from(bits))?,
            None => {
                writer.write_bits(bytes.len() as u64, PAYLOAD_LEN_BITS)?;
                writer.write_bytes(bytes)?;
            }
        }
        Ok(())
    }

    fn read_payload(&self, reader: &mut BitReader<'_>) -> StringTableResult<Option<Vec<u8>>> {
        if !reader.read_bit()? {
            return Ok(None);
        }
        let bytes = match self.config().fixed_payload_bits {
            Some(bits) => {
                let mut remaining = usize::from(bits);
                let mut out = vec![0u8; remaining.div_ceil(8)];
                for byte in &mut out {
                    let take = remaining.min(8);
                    *byte = (reader.read_bits(take as u8)? as u8) << (8 - take);
                    remaining -= take;
                }
                out
            }
            None => {
                let len = reader.read_bits(PAYLOAD_LEN_BITS)? as usize;
                reader.read_bytes(len)?
            }
        };
        Ok(Some(bytes))
    }

    fn read_string(&self, reader: &mut BitReader<'_>, recent: &RecentStrings) -> StringTableResult<String> {
        if !reader.read_bit()? {
            return Ok(reader.read_cstr(MAX_STRING_BYTES)?);
        }
        let slot = reader.read_bits(SLOT_BITS)? as usize;
        let len = reader.read_bits(PREFIX_BITS)? as usize;
        let suffix = reader.read_cstr(MAX_STRING_BYTES)?;
        let prefix = recent
            .prefix(slot, len)
            .ok_or_else(|| self.corrupt("unknown string prefix"))?;
        let mut bytes = prefix.to_vec();
        bytes.extend_from_slice(suffix.as_bytes());
        String::from_utf8(bytes).map_err(|_| self.corrupt("string is not utf-8"))
    }

    fn apply_record(
        &mut self,
        index: StringIndex,
        string: Option<String>,
        payload: Option<&[u8]>,
    ) -> StringTableResult<()> {
        let payload = self.normalize(payload)?;
        if index.as_usize() < self.len() {
            if string
                .as_deref()
                .is_some_and(|s| self.string(index) != Some(s))
            {
                return Err(self.corrupt("string does not match entry"));
            }
            self.write(index, self.tick(), payload)?;
            return Ok(());
        }
        if index.as_usize() != self.len() {
            return Err(self.corrupt("entry index skips ahead"));
        }
        let Some(string) = string else {
            return Err(self.corrupt("new entry without string"));
        };
        if string.is_empty() || self.find(&string).is_some() {
            return Err(self.corrupt("new entry string is empty or duplicate"));
        }
        let entry = Entry::new(string, payload, self.tick(), self.history_enabled());
        self.push(entry);
        self.record_insert(index);
        Ok(())
    }

    fn corrupt(&self, reason: &'static str) -> StringTableError {
        StringTableError::CorruptUpdate {
            table: self.name().to_string(),
            reason,
        }
    }
}

fn write_string(writer: &mut BitWriter<'_>, recent: &RecentStrings, string: &str) -> StringTableResult<()> {
    match recent.best_prefix(string) {
        Some((slot, len)) => {
            writer.write_bit(true)?;
            writer.write_bits(slot as u64, SLOT_BITS)?;
            writer.write_bits(len as u64, PREFIX_BITS)?;
            writer.write_cstr(&string[len..])?;
        }
        None => {
            writer.write_bit(false)?;
            writer.write_cstr(string)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InsertOrigin, TableConfig};

    fn table(name: &str, config: TableConfig) -> StringTable {
        StringTable::new(TableId::new(0), name, config).unwrap()
    }

    fn roundtrip(source: &StringTable, target: &mut StringTable, since: Option<Tick>) -> u32 {
        let update = source.encode_update(since).unwrap();
        target.apply_update(&update).unwrap()
    }

    #[test]
    fn recent_strings_pick_longest_prefix() {
        let mut recent = RecentStrings::default();
        recent.push("models/props/crate.mdl");
        recent.push("models/player/hero.mdl");
        assert_eq!(recent.best_prefix("models/player/villain.mdl"), Some((1, 14)));
        assert_eq!(recent.best_prefix("mo"), None);
        assert_eq!(recent.best_prefix("sounds/door.wav"), None);
    }

    #[test]
    fn recent_strings_cap_prefix_and_slots() {
        let mut recent = RecentStrings::default();
        let long = "x".repeat(60);
        recent.push(&long);
        assert_eq!(recent.best_prefix(&long), Some((0, MAX_PREFIX)));
        for i in 0..RECENT_STRINGS {
            recent.push(&format!("s{i}"));
        }
        assert_eq!(recent.strings.len(), RECENT_STRINGS);
        assert_eq!(recent.best_prefix(&long), None);
    }

    #[test]
    fn prefix_respects_char_boundaries() {
        let mut recent = RecentStrings::default();
        recent.push("abcé");
        // "é" is two bytes; only the first matches "è".
        assert_eq!(recent.best_prefix("abcè"), Some((0, 3)));
    }

    #[test]
    fn full_dump_recreates_table() {
        let mut source = table("models", TableConfig::default());
        source.insert(InsertOrigin::Server, "models/player/hero.mdl", Some(b"\x01\x02")).unwrap();
        source.insert(InsertOrigin::Server, "models/player/villain.mdl", None).unwrap();
        source.insert(InsertOrigin::Server, "sounds/é.wav", Some(&[7; 300])).unwrap();

        let mut target = table("models", TableConfig::default());
        assert_eq!(roundtrip(&source, &mut target, None), 3);
        assert_eq!(target.iter().collect::<Vec<_>>(), source.iter().collect::<Vec<_>>());
    }

    #[test]
    fn incremental_update_sends_changes_only() {
        let mut source = table("models", TableConfig::default());
        let mut target = table("models", TableConfig::default());
        let a = source.insert(InsertOrigin::Server, "alpha", None).unwrap();
        source.insert(InsertOrigin::Server, "beta", None).unwrap();
        roundtrip(&source, &mut target, None);

        source.set_tick(Tick::new(5)).unwrap();
        source.set_payload(a, Tick::new(5), Some(b"new")).unwrap();
        source.insert(InsertOrigin::Server, "gamma", Some(b"g")).unwrap();

        target.set_tick(Tick::new(5)).unwrap();
        assert_eq!(roundtrip(&source, &mut target, Some(Tick::new(1))), 2);
        assert_eq!(target.iter().collect::<Vec<_>>(), source.iter().collect::<Vec<_>>());
        assert_eq!(target.tick_changed(a), Some(Tick::new(5)));
    }

    #[test]
    fn strings_of_old_entries_are_not_resent() {
        let mut source = table("models", TableConfig::default());
        let a = source.insert(InsertOrigin::Server, "a-rather-long-string-name", None).unwrap();
        source.set_tick(Tick::new(9)).unwrap();
        source.set_payload(a, Tick::new(9), Some(b"1")).unwrap();

        let with_string = source.encode_update(None).unwrap();
        let without = source.encode_update(Some(Tick::new(4))).unwrap();
        assert_eq!(without.entries, 1);
        assert!(without.bit_len + 8 * 20 < with_string.bit_len);
    }

    #[test]
    fn fixed_payloads_use_exact_bits() {
        let config = TableConfig {
            fixed_payload_bits: Some(12),
            ..TableConfig::default()
        };
        let mut source = table("lights", config.clone());
        source.insert(InsertOrigin::Server, "l0", Some(&[0xAB, 0xCD])).unwrap();
        let mut target = table("lights", config);
        roundtrip(&source, &mut target, None);
        assert_eq!(target.payload(StringIndex::new(0)), Some(&[0xAB, 0xC0][..]));
    }

    #[test]
    fn sparse_indices_use_explicit_index() {
        let mut source = table("models", TableConfig::default());
        for name in ["a", "b", "c", "d"] {
            source.insert(InsertOrigin::Server, name, None).unwrap();
        }
        let mut target = table("models", TableConfig::default());
        roundtrip(&source, &mut target, None);

        source.set_tick(Tick::new(3)).unwrap();
        source.set_payload(StringIndex::new(1), Tick::new(3), Some(b"b")).unwrap();
        source.set_payload(StringIndex::new(3), Tick::new(3), Some(b"d")).unwrap();
        assert_eq!(roundtrip(&source, &mut target, Some(Tick::new(0))), 2);
        assert_eq!(target.payload(StringIndex::new(3)), Some(&b"d"[..]));
        assert_eq!(target.payload(StringIndex::new(0)), None);
    }

    #[test]
    fn new_entry_must_be_next_index() {
        let mut source = table("models", TableConfig::default());
        source.insert(InsertOrigin::Server, "a", None).unwrap();
        source.insert(InsertOrigin::Server, "b", None).unwrap();
        let update = source.encode_update(None).unwrap();

        // A target that already holds a different first string disagrees.
        let mut target = table("models", TableConfig::default());
        target.insert(InsertOrigin::Server, "z", None).unwrap();
        assert!(matches!(
            target.apply_update(&update),
            Err(StringTableError::CorruptUpdate { .. })
        ));
    }

    #[test]
    fn truncated_update_is_a_bitstream_error() {
        let mut source = table("models", TableConfig::default());
        source.insert(InsertOrigin::Server, "alpha", Some(b"payload")).unwrap();
        let mut update = source.encode_update(None).unwrap();
        update.bit_len -= 12;
        let mut target = table("models", TableConfig::default());
        assert!(matches!(
            target.apply_update(&update),
            Err(StringTableError::Bitstream(_))
        ));
    }
}
