//! Virtual Address Map
//!
//! A byte-addressable, read-only view of a core dump: the set of mapped
//! ranges with their permissions and (where the dump kept them) byte images.
//! All discovery code reads the dump through this map, either via the
//! fallback-returning [`Reader`] cursor or via [`VirtualAddressMap::find_mapped_image`]
//! for contiguous string/object images.

mod dump;
mod range;
mod reader;

pub use dump::{CoreDump, DumpError};
pub use range::MappedRange;
pub use reader::Reader;

use byteorder::{ByteOrder, LE};

/// Pointer width of the dumped process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordSize {
    U32,
    U64,
}

impl WordSize {
    pub fn bytes(self) -> u64 {
        match self {
            WordSize::U32 => 4,
            WordSize::U64 => 8,
        }
    }

    /// Decode one little-endian word at `offset` in `bytes`, zero-extended.
    pub fn read_at(self, bytes: &[u8], offset: u64) -> Option<u64> {
        let offset = usize::try_from(offset).ok()?;
        match self {
            WordSize::U32 => bytes.get(offset..offset + 4).map(|b| LE::read_u32(b) as u64),
            WordSize::U64 => bytes.get(offset..offset + 8).map(LE::read_u64),
        }
    }
}

/// Read-only view of the dump's mapped address space.
pub struct VirtualAddressMap {
    ranges: Vec<MappedRange>,
    word: WordSize,
}

impl VirtualAddressMap {
    /// Build a map from a set of ranges. Ranges are sorted by base address
    /// and must not overlap.
    pub fn new(word: WordSize, mut ranges: Vec<MappedRange>) -> Self {
        ranges.sort_by_key(|r| r.base);
        debug_assert!(ranges.windows(2).all(|w| w[0].limit <= w[1].base));
        Self { ranges, word }
    }

    pub fn word(&self) -> WordSize {
        self.word
    }

    /// Pointer width in bytes.
    pub fn word_bytes(&self) -> u64 {
        self.word.bytes()
    }

    pub fn ranges(&self) -> &[MappedRange] {
        &self.ranges
    }

    /// Find the range containing `addr`.
    pub fn find(&self, addr: u64) -> Option<&MappedRange> {
        let idx = self.find_index(addr)?;
        Some(&self.ranges[idx])
    }

    pub(crate) fn find_index(&self, addr: u64) -> Option<usize> {
        let idx = self
            .ranges
            .partition_point(|r| r.limit <= addr);
        (idx < self.ranges.len() && self.ranges[idx].contains(addr)).then_some(idx)
    }

    /// The contiguous readable image starting at `addr`, up to the end of
    /// its range. `None` when `addr` is unmapped or its pages were not kept
    /// in the dump.
    pub fn find_mapped_image(&self, addr: u64) -> Option<&[u8]> {
        let range = self.find(addr)?;
        if !range.is_readable() {
            return None;
        }
        let data = range.data.as_deref()?;
        let offset = usize::try_from(addr - range.base).ok()?;
        data.get(offset..)
    }

    /// A fresh read cursor over this map.
    pub fn reader(&self) -> Reader<'_> {
        Reader::new(self)
    }
}
