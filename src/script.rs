//! The allocation script: an ordered, bounded record of every allocation a
//! build performs, plus the operations used to assemble it from nested
//! containers and to compare a replay against it.
//!
//! Records are stored in the order their allocations happened. The `level`
//! of a record is the nesting depth of the container that made it, so the
//! sequence splits into contiguous runs: a nested container's records
//! directly follow the allocation of the node that triggered them.

use std::collections::HashSet;

use crate::{
    alive::AliveCounts,
    error::ScriptError,
    event::EventRecord,
    identifier::Identifier,
    shared_value::ShareHook,
};

/// An ordered sequence of [EventRecord]s with a fixed maximum length.
///
/// # Examples
///
/// ```rust
/// # use script_allocators::{event::EventRecord, identifier::Identifier, script::Script};
///
/// let mut script = Script::new(2);
/// let handle = script.add_entry(
///     EventRecord::allocation::<u32>(8, Identifier::first())
/// ).unwrap();
/// script.mark_deallocated(handle);
/// script.add_entry(EventRecord::allocation::<u32>(16, Identifier::first())).unwrap();
/// script.finalize();
///
/// assert!(script.records()[0].deallocated);
/// assert!(script.records()[1].last_for_owner);
/// assert!(script.add_entry(EventRecord::default()).is_err());
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Script {
    records: Vec<EventRecord>,
    capacity: usize,
    next_owner: Identifier,
    level: usize,
}

impl Script {
    /// An empty script able to hold `capacity` records.
    pub fn new(capacity: usize) -> Self {
        Script {
            records: Vec::with_capacity(capacity),
            capacity,
            next_owner: Identifier::first(),
            level: 0,
        }
    }

    /// Appends `record` at the next free slot, stamped with the script's
    /// current level, and returns the handle of the stored record.
    pub fn add_entry(&mut self, mut record: EventRecord) -> Result<Identifier, ScriptError> {
        if self.records.len() >= self.capacity {
            return Err(ScriptError::CapacityExceeded { capacity: self.capacity });
        }

        let handle = Identifier::from_index(self.records.len())?;
        record.level = self.level;
        record.handle = Some(handle);
        self.records.push(record);

        Ok(handle)
    }

    /// Appends every record of `other`, shifting its owners past the ones
    /// already handed out by this script.
    ///
    /// Handles of merged records are cleared, they only meant something to
    /// `other`. An empty `other` still reserves one owner identifier.
    pub fn merge(&mut self, other: &Script) -> Result<(), ScriptError> {
        if self.records.len() + other.records.len() > self.capacity {
            return Err(ScriptError::CapacityExceeded { capacity: self.capacity });
        }

        let offset = self.next_owner;
        self.records.extend(other.records.iter().map(|record| EventRecord {
            handle: None,
            owner: record.owner.offset_by(offset),
            ..*record
        }));
        self.next_owner = Identifier::new(offset.raw() + other.next_owner.raw() + 1);

        Ok(())
    }

    /// The contiguous run starting at `start` whose records share the level
    /// of the record at `start`.
    pub fn extract_level_run(&self, start: usize) -> Script {
        let mut result = Script::new(self.capacity);
        let Some(first) = self.records.get(start) else {
            return result;
        };

        result.level = first.level;
        result.records.extend(
            self.records[start..]
                .iter()
                .take_while(|record| record.level == first.level)
                .copied()
        );

        result
    }

    /// Marks the record issued under `handle` as freed and clears its handle.
    ///
    /// Returns the index of the record, or `None` when no record carries
    /// `handle`.
    pub fn mark_deallocated(&mut self, handle: Identifier) -> Option<usize> {
        let index = self.position_of(handle)?;
        let record = &mut self.records[index];
        record.handle = None;
        record.deallocated = true;

        Some(index)
    }

    /// Stamps every record with `level`; records appended afterwards get
    /// the same level.
    pub fn set_level(&mut self, level: usize) {
        self.level = level;
        for record in self.records.iter_mut() {
            record.level = level;
        }
    }

    /// Flags the last record of each owner and clears every handle.
    ///
    /// After this the script describes a build, not a particular run of it.
    pub fn finalize(&mut self) {
        let mut seen = HashSet::new();

        for record in self.records.iter_mut().rev() {
            if seen.insert(record.owner) {
                record.last_for_owner = true;
            }
            record.handle = None;
        }
    }

    /// Index of the record issued under `handle`.
    pub fn position_of(&self, handle: Identifier) -> Option<usize> {
        self.records.iter().position(|record| record.handle == Some(handle))
    }

    /// Copy of the record at `index` without its handle.
    pub fn info(&self, index: usize) -> Option<EventRecord> {
        self.records.get(index).map(|record| EventRecord { handle: None, ..*record })
    }

    /// Alive blocks of the leading run, grouped by size class.
    ///
    /// Deallocated records do not need storage once construction is over
    /// and contribute nothing.
    pub fn alive_counts(&self) -> AliveCounts {
        let mut result = AliveCounts::new();

        let Some(first) = self.records.first() else {
            return result;
        };
        for record in self.records.iter().take_while(|record| record.level == first.level) {
            if record.is_alive() {
                result.add(record.element_size, record.count, 1);
            }
        }

        result
    }

    /// Every allocation the ethalon freed has been freed here too.
    pub fn all_deallocated(&self, ethalon: &Script) -> bool {
        ethalon.records.iter()
            .enumerate()
            .filter(|(_, expected)| expected.deallocated)
            .all(|(index, _)| self.is_deallocated(index))
    }

    /// The script reproduces the ethalon entirely.
    pub fn all_finished(&self, ethalon: &Script) -> bool {
        self.len() == ethalon.len() && self.all_deallocated(ethalon)
    }

    /// Every ethalon event for elements of `element_size` has been
    /// reached, and freed when the ethalon freed it.
    pub fn finished(&self, ethalon: &Script, element_size: usize) -> bool {
        let last = ethalon.records.iter()
            .rposition(|record| record.element_size == element_size);
        if let Some(last) = last {
            if self.len() <= last {
                return false;
            }
        }

        ethalon.records.iter()
            .enumerate()
            .filter(|(_, expected)| expected.element_size == element_size && expected.deallocated)
            .all(|(index, _)| self.is_deallocated(index))
    }

    /// Every ethalon event of `owner` has been reached, and freed when the
    /// ethalon freed it.
    pub fn finished_for_owner(&self, ethalon: &Script, owner: Identifier) -> bool {
        for (index, expected) in ethalon.records.iter().enumerate() {
            if expected.owner != owner {
                continue;
            }
            if self.len() <= index {
                return false;
            }
            if expected.deallocated && !self.records[index].deallocated {
                return false;
            }
        }

        true
    }

    fn is_deallocated(&self, index: usize) -> bool {
        self.records.get(index).is_some_and(|record| record.deallocated)
    }

    /// Reserves the next owner identifier.
    pub fn advance_owner(&mut self) {
        self.next_owner = Identifier::next(self.next_owner);
    }

    /// The identifier the next allocator sharing this script will own.
    pub fn next_owner(&self) -> Identifier {
        self.next_owner
    }

    /// Level stamped on records appended from now on.
    pub fn level(&self) -> usize {
        self.level
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// `true` when nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Maximum number of records.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The stored records, oldest first.
    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    /// Record at `index`.
    pub fn get(&self, index: usize) -> Option<&EventRecord> {
        self.records.get(index)
    }

    /// Iterates over the stored records, oldest first.
    pub fn iter(&self) -> std::slice::Iter<'_, EventRecord> {
        self.records.iter()
    }
}

impl ShareHook for Script {
    fn on_share(&mut self) {
        self.advance_owner();
    }
}

impl<'a> IntoIterator for &'a Script {
    type Item = &'a EventRecord;
    type IntoIter = std::slice::Iter<'a, EventRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn record<T>(count: usize, owner: i32) -> EventRecord {
        EventRecord::allocation::<T>(count, Identifier::new(owner))
    }

    #[test]
    pub fn add_entry_test() {
        let mut script = Script::new(2);

        let first = script.add_entry(record::<u8>(1, 0)).unwrap();
        let second = script.add_entry(record::<u8>(2, 0)).unwrap();

        assert_eq!(first, Identifier::new(0));
        assert_eq!(second, Identifier::new(1));
        assert_eq!(script.records()[1].handle, Some(second));
        assert_eq!(script.position_of(second), Some(1));
        assert_eq!(
            script.add_entry(record::<u8>(3, 0)),
            Err(ScriptError::CapacityExceeded { capacity: 2 })
        );
        assert_eq!(script.len(), 2);
    }

    #[test]
    pub fn add_entry_stamps_level_test() {
        let mut script = Script::new(4);
        script.set_level(2);
        script.add_entry(record::<u8>(1, 0)).unwrap();

        assert_eq!(script.records()[0].level, 2);
    }

    #[test]
    pub fn merge_remaps_owners_test() {
        let mut parent = Script::new(8);
        parent.add_entry(record::<u8>(1, 0)).unwrap();
        parent.advance_owner();

        let mut child = Script::new(8);
        child.add_entry(record::<u16>(2, 0)).unwrap();
        child.advance_owner();
        child.add_entry(record::<u16>(3, 1)).unwrap();

        parent.merge(&child).unwrap();

        let owners: Vec<_> = parent.iter().map(|record| record.owner.raw()).collect();
        assert_eq!(owners, vec![0, 1, 2]);
        assert_eq!(parent.next_owner(), Identifier::new(3));
        assert!(parent.iter().all(|record| record.handle.is_none()));
    }

    #[test]
    pub fn merge_empty_reserves_owner_test() {
        let mut parent = Script::new(2);
        parent.merge(&Script::new(2)).unwrap();
        parent.merge(&Script::new(2)).unwrap();

        assert!(parent.is_empty());
        assert_eq!(parent.next_owner(), Identifier::new(2));
    }

    #[test]
    pub fn merge_capacity_test() {
        let mut parent = Script::new(1);
        parent.add_entry(record::<u8>(1, 0)).unwrap();

        let mut child = Script::new(1);
        child.add_entry(record::<u8>(1, 0)).unwrap();

        assert!(parent.merge(&child).is_err());
        assert_eq!(parent.len(), 1);
    }

    #[test]
    pub fn extract_level_run_test() {
        let mut script = Script::new(8);
        script.add_entry(record::<u8>(1, 0)).unwrap();
        script.add_entry(record::<u8>(2, 0)).unwrap();
        script.set_level(0);

        let mut nested = Script::new(8);
        nested.set_level(1);
        nested.add_entry(record::<u32>(3, 0)).unwrap();
        script.merge(&nested).unwrap();
        script.add_entry(record::<u8>(4, 0)).unwrap();

        let leading = script.extract_level_run(0);
        assert_eq!(leading.len(), 2);
        assert_eq!(leading.level(), 0);

        let inner = script.extract_level_run(2);
        assert_eq!(inner.len(), 1);
        assert_eq!(inner.records()[0].count, 3);

        let trailing = script.extract_level_run(3);
        assert_eq!(trailing.records()[0].count, 4);

        assert!(script.extract_level_run(9).is_empty());
    }

    #[test]
    pub fn mark_deallocated_test() {
        let mut script = Script::new(4);
        script.add_entry(record::<u8>(1, 0)).unwrap();
        let handle = script.add_entry(record::<u8>(2, 0)).unwrap();
        let before = script.clone();

        assert_eq!(script.mark_deallocated(handle), Some(1));
        assert!(script.records()[1].deallocated);
        assert!(script.records()[1].handle.is_none());

        //freeing twice does not match anything
        assert_eq!(script.mark_deallocated(handle), None);
        assert_eq!(script.mark_deallocated(Identifier::new(7)), None);
        assert_ne!(before, script);
    }

    #[test]
    pub fn finalize_flags_last_per_owner_test() {
        let mut script = Script::new(8);
        script.add_entry(record::<u8>(1, 0)).unwrap();
        script.add_entry(record::<u8>(1, 1)).unwrap();
        script.add_entry(record::<u8>(2, 0)).unwrap();
        script.add_entry(record::<u8>(1, 2)).unwrap();
        script.add_entry(record::<u8>(2, 1)).unwrap();
        script.finalize();

        let flags: Vec<_> = script.iter().map(|record| record.last_for_owner).collect();
        assert_eq!(flags, vec![false, false, true, true, true]);
        assert!(script.iter().all(|record| record.handle.is_none()));

        let mut owners: Vec<_> = script.iter()
            .filter(|record| record.last_for_owner)
            .map(|record| record.owner)
            .collect();
        owners.sort();
        owners.dedup();
        assert_eq!(owners.len(), 3);
    }

    #[test]
    pub fn alive_counts_leading_run_test() {
        let mut script = Script::new(8);
        let freed = script.add_entry(record::<u32>(4, 0)).unwrap();
        script.add_entry(record::<u32>(8, 0)).unwrap();
        script.add_entry(record::<u64>(2, 0)).unwrap();
        script.mark_deallocated(freed);

        let mut nested = Script::new(8);
        nested.set_level(1);
        nested.add_entry(record::<u8>(5, 0)).unwrap();
        script.merge(&nested).unwrap();

        let counts = script.alive_counts();
        assert_eq!(counts.total_blocks(), 2);
        assert_eq!(counts.elements(4), 8);
        assert_eq!(counts.elements(8), 2);
        assert_eq!(counts.elements(1), 0);
    }

    #[test]
    pub fn completion_predicates_test() {
        let mut ethalon = Script::new(4);
        let freed = ethalon.add_entry(record::<u16>(4, 0)).unwrap();
        ethalon.add_entry(record::<u16>(8, 0)).unwrap();
        ethalon.add_entry(record::<u64>(1, 1)).unwrap();
        ethalon.mark_deallocated(freed);
        ethalon.finalize();

        let mut live = Script::new(4);
        let first = live.add_entry(record::<u16>(4, 0)).unwrap();
        live.add_entry(record::<u16>(8, 0)).unwrap();

        assert!(!live.finished_for_owner(&ethalon, Identifier::new(0)));
        assert!(!live.finished(&ethalon, 2));
        assert!(!live.all_deallocated(&ethalon));

        live.mark_deallocated(first);
        assert!(live.finished_for_owner(&ethalon, Identifier::new(0)));
        assert!(live.finished(&ethalon, 2));
        assert!(live.all_deallocated(&ethalon));
        assert!(!live.finished_for_owner(&ethalon, Identifier::new(1)));
        assert!(!live.finished(&ethalon, 8));
        assert!(!live.all_finished(&ethalon));

        live.add_entry(record::<u64>(1, 1)).unwrap();
        assert!(live.finished_for_owner(&ethalon, Identifier::new(1)));
        assert!(live.all_finished(&ethalon));
    }

    #[test]
    pub fn share_hook_advances_owner_test() {
        let mut script = Script::new(0);
        script.on_share();
        script.on_share();

        assert_eq!(script.next_owner(), Identifier::new(2));
    }
}
