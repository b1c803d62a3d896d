//! Virtual Memory Partition
//!
//! A claim registry over the dump's address space: discovery phases reserve
//! labelled ranges (such as allocator arenas) so that later classification
//! passes know which bytes are already spoken for. Claims never overlap; a
//! conflicting claim is refused, not merged.

use crate::map::VirtualAddressMap;

/// One labelled reservation.
#[derive(Debug, Clone)]
pub struct Claim {
    pub base: u64,
    pub size: u64,
    pub label: &'static str,
    pub is_anchor_source: bool,
}

/// Claim registry over one address map.
pub struct VirtualMemoryPartition<'a> {
    map: &'a VirtualAddressMap,
    claims: Vec<Claim>,
}

impl<'a> VirtualMemoryPartition<'a> {
    pub fn new(map: &'a VirtualAddressMap) -> Self {
        Self {
            map,
            claims: Vec::new(),
        }
    }

    /// The address map this partition covers.
    pub fn address_map(&self) -> &'a VirtualAddressMap {
        self.map
    }

    /// Reserve `[base, base + size)` under `label`. Returns `false` without
    /// registering anything if the range is empty or intersects an existing
    /// claim.
    pub fn claim_range(
        &mut self,
        base: u64,
        size: u64,
        label: &'static str,
        is_anchor_source: bool,
    ) -> bool {
        let Some(limit) = base.checked_add(size) else {
            return false;
        };
        if size == 0 {
            return false;
        }
        let overlaps = self
            .claims
            .iter()
            .any(|c| base < c.base + c.size && c.base < limit);
        if overlaps {
            return false;
        }
        self.claims.push(Claim {
            base,
            size,
            label,
            is_anchor_source,
        });
        true
    }

    pub fn claims(&self) -> &[Claim] {
        &self.claims
    }
}
