//! Tallying how many blocks of each shape are still alive once a build
//! completes. The result sizes the fixed storage of the replay pass.

use std::fmt::Display;

use crate::{identifier::Identifier, script::Script};

/// The shape of one allocation request: `count` elements of
/// `element_size` bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SizeClass {
    /// `size_of` the element type.
    pub element_size: usize,
    /// Elements per block.
    pub count: usize,
}

impl SizeClass {
    /// Shape of a request for `count` elements of `T`.
    pub fn of<T>(count: usize) -> Self {
        SizeClass { element_size: std::mem::size_of::<T>(), count }
    }

    /// Bytes covered by one block of this class.
    pub fn bytes(self) -> usize {
        self.element_size * self.count
    }

    /// Bytes one block occupies once padded to `align`.
    pub fn padded_bytes(self, align: usize) -> usize {
        self.bytes().next_multiple_of(align)
    }
}

impl Display for SizeClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.count, self.element_size)
    }
}

/// Number of alive blocks per [SizeClass].
///
/// # Examples
///
/// ```rust
/// # use script_allocators::alive::AliveCounts;
///
/// let mut counts = AliveCounts::new();
/// counts.add(4, 10, 1);
/// counts.add(1, 40, 2);
///
/// assert_eq!(counts.blocks(40), 3);
/// assert_eq!(counts.elements(4), 10);
/// assert_eq!(counts.total_blocks(), 3);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AliveCounts {
    entries: Vec<(SizeClass, usize)>,
}

impl AliveCounts {
    /// An empty table.
    pub fn new() -> Self {
        AliveCounts { entries: Vec::new() }
    }

    /// Tallies every level run of a finalized script.
    ///
    /// Nested containers keep their buffers in the produced value as well,
    /// so each run contributes its own [alive_counts](Script::alive_counts).
    pub fn tally(script: &Script) -> Self {
        let mut result = AliveCounts::new();
        let mut offset = 0;

        while offset < script.len() {
            let run = script.extract_level_run(offset);
            result.absorb(&run.alive_counts());
            offset += run.len();
        }

        result
    }

    /// Alive blocks recorded for `owner`, wherever they sit in `script`.
    pub fn for_owner(script: &Script, owner: Identifier) -> Self {
        let mut result = AliveCounts::new();

        for record in script.iter().filter(|record| record.owner == owner && record.is_alive()) {
            result.add(record.element_size, record.count, 1);
        }

        result
    }

    /// Adds `blocks` blocks of `count` elements of `element_size` bytes.
    pub fn add(&mut self, element_size: usize, count: usize, blocks: usize) {
        let class = SizeClass { element_size, count };
        match self.entries.iter_mut().find(|(entry, _)| *entry == class) {
            Some((_, existing)) => *existing += blocks,
            None => self.entries.push((class, blocks)),
        }
    }

    /// Adds every entry of `other`.
    pub fn absorb(&mut self, other: &AliveCounts) {
        for (class, blocks) in other.iter() {
            self.add(class.element_size, class.count, blocks);
        }
    }

    /// Alive blocks of exactly `class`.
    pub fn blocks_of(&self, class: SizeClass) -> usize {
        self.entries.iter()
            .find(|(entry, _)| *entry == class)
            .map_or(0, |(_, blocks)| *blocks)
    }

    /// Alive blocks covering exactly `bytes` bytes.
    pub fn blocks(&self, bytes: usize) -> usize {
        self.entries.iter()
            .filter(|(class, _)| class.bytes() == bytes)
            .map(|(_, blocks)| blocks)
            .sum()
    }

    /// Alive elements of `element_size` bytes, across every block.
    pub fn elements(&self, element_size: usize) -> usize {
        self.entries.iter()
            .filter(|(class, _)| class.element_size == element_size)
            .map(|(class, blocks)| class.count * blocks)
            .sum()
    }

    /// Alive blocks of every class.
    pub fn total_blocks(&self) -> usize {
        self.entries.iter().map(|(_, blocks)| blocks).sum()
    }

    /// Bytes of storage needed when every block is padded to `align`.
    pub fn total_bytes(&self, align: usize) -> usize {
        self.entries.iter()
            .map(|(class, blocks)| class.padded_bytes(align) * blocks)
            .sum()
    }

    /// Iterates over `(class, blocks)` pairs in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (SizeClass, usize)> + '_ {
        self.entries.iter().copied()
    }

    /// `true` when no block has to survive.
    pub fn is_empty(&self) -> bool {
        self.total_blocks() == 0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::event::EventRecord;

    #[test]
    pub fn add_merges_classes_test() {
        let mut counts = AliveCounts::new();
        counts.add(8, 2, 1);
        counts.add(8, 2, 3);
        counts.add(8, 4, 1);

        assert_eq!(counts.blocks_of(SizeClass { element_size: 8, count: 2 }), 4);
        assert_eq!(counts.blocks(16), 4);
        assert_eq!(counts.blocks(32), 1);
        assert_eq!(counts.elements(8), 12);
        assert_eq!(counts.iter().count(), 2);
    }

    #[test]
    pub fn total_bytes_pads_blocks_test() {
        let mut counts = AliveCounts::new();
        counts.add(1, 3, 2);
        counts.add(4, 4, 1);

        assert_eq!(counts.total_bytes(16), 16 * 2 + 16);
        assert_eq!(counts.total_bytes(1), 3 * 2 + 16);
    }

    #[test]
    pub fn tally_covers_nested_runs_test() {
        let mut root = Script::new(8);
        root.add_entry(EventRecord::allocation::<u64>(3, Identifier::first())).unwrap();

        let mut nested = Script::new(8);
        nested.set_level(1);
        let freed = nested.add_entry(EventRecord::allocation::<u8>(4, Identifier::first())).unwrap();
        nested.add_entry(EventRecord::allocation::<u8>(8, Identifier::first())).unwrap();
        nested.mark_deallocated(freed);

        root.merge(&nested).unwrap();
        root.merge(&nested).unwrap();
        root.finalize();

        let leading = root.alive_counts();
        assert_eq!(leading.total_blocks(), 1);

        let all = AliveCounts::tally(&root);
        assert_eq!(all.total_blocks(), 3);
        assert_eq!(all.blocks(8), 2);
        assert_eq!(all.blocks(24), 1);
        assert_eq!(all.blocks_of(SizeClass::of::<u8>(8)), 2);
        assert_eq!(all.blocks_of(SizeClass::of::<u8>(4)), 0);
    }

    #[test]
    pub fn for_owner_test() {
        let mut script = Script::new(8);
        script.add_entry(EventRecord::allocation::<u32>(2, Identifier::new(0))).unwrap();
        let freed = script.add_entry(EventRecord::allocation::<u32>(4, Identifier::new(1))).unwrap();
        script.add_entry(EventRecord::allocation::<u32>(8, Identifier::new(1))).unwrap();
        script.mark_deallocated(freed);

        let owned = AliveCounts::for_owner(&script, Identifier::new(1));
        assert_eq!(owned.total_blocks(), 1);
        assert_eq!(owned.blocks_of(SizeClass::of::<u32>(8)), 1);
        assert!(AliveCounts::for_owner(&script, Identifier::INVALID).is_empty());
    }

    #[test]
    pub fn empty_script_test() {
        let counts = AliveCounts::tally(&Script::new(0));
        assert!(counts.is_empty());
        assert_eq!(counts.total_bytes(16), 0);
    }
}
