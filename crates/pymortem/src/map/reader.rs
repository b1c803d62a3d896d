//! Read Cursor
//!
//! A cheap value-typed cursor over the [`VirtualAddressMap`]. Reads never
//! fail: an unmapped or imageless address yields the caller's fallback, so
//! validation predicates reject bad candidates without error plumbing.
//! Multiple readers can coexist to hold independent positions during
//! structural walks.

use byteorder::{ByteOrder, LE};

use super::{VirtualAddressMap, WordSize};

/// Fallback-returning read cursor. Caches the last range hit, since walks
/// overwhelmingly stay within one range.
#[derive(Clone)]
pub struct Reader<'a> {
    map: &'a VirtualAddressMap,
    cached: Option<usize>,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(map: &'a VirtualAddressMap) -> Self {
        Self { map, cached: None }
    }

    fn bytes_at(&mut self, addr: u64, len: u64) -> Option<&'a [u8]> {
        let idx = match self.cached {
            Some(idx) if self.map.ranges()[idx].contains(addr) => idx,
            _ => {
                let idx = self.map.find_index(addr)?;
                self.cached = Some(idx);
                idx
            }
        };
        let range = &self.map.ranges()[idx];
        if !range.is_readable() || len > range.limit - addr {
            return None;
        }
        let data = range.data.as_deref()?;
        let offset = usize::try_from(addr - range.base).ok()?;
        data.get(offset..offset + len as usize)
    }

    /// Read one machine word at `addr`, or `fallback` if unreadable.
    pub fn read_word(&mut self, addr: u64, fallback: u64) -> u64 {
        let word = self.map.word();
        match self.bytes_at(addr, word.bytes()) {
            Some(bytes) => match word {
                WordSize::U32 => LE::read_u32(bytes) as u64,
                WordSize::U64 => LE::read_u64(bytes),
            },
            None => fallback,
        }
    }

    /// Read a `u32` at `addr`, or `fallback` if unreadable.
    pub fn read_u32(&mut self, addr: u64, fallback: u32) -> u32 {
        match self.bytes_at(addr, 4) {
            Some(bytes) => LE::read_u32(bytes),
            None => fallback,
        }
    }
}
