//! Arena Table Search and Enumeration
//!
//! The allocator keeps a flat array of fixed-size arena descriptors in the
//! interpreter's data segment, reached through a single pointer variable.
//! Neither has a symbol, so the pointer is found by brute force: every
//! word-aligned word of the module's writable data is treated as a candidate
//! pointer and the target must survive a self-consistency ladder over the
//! descriptor geometry. The candidate explaining the most descriptors wins.

use crate::modules::Module;
use crate::python::resolver::{Resolver, BAD, PYTHON_ARENA};

impl Resolver<'_, '_> {
    /// Search one module's writable data for the arena descriptor array,
    /// then run the downstream phases anchored on the winning range.
    pub(crate) fn find_arena_table_and_types(&mut self, module: &Module) {
        let map = self.map;
        let mut module_reader = map.reader();
        let mut reader = map.reader();
        let word = self.word;

        let mut best_base = 0u64;
        let mut best_limit = 0u64;

        for range in module.ranges.iter().filter(|r| r.is_writable()) {
            let base = range.base;
            // The module directory underreports data-segment limits; extend
            // to the end of the same-permission region in the address map.
            let limit = map
                .find(range.limit - 1)
                .map(|r| r.limit)
                .unwrap_or(range.limit);

            let mut module_addr = base;
            while module_addr < limit {
                let arena_struct0 = module_reader.read_word(module_addr, BAD);
                module_addr += word;
                if arena_struct0 == 0 || arena_struct0 & (word - 1) != 0 {
                    continue;
                }

                // The first arena is never given back; a live table starts
                // with an allocated descriptor.
                let arena0 = reader.read_word(arena_struct0, BAD);
                if arena0 == 0 || arena0 & (word - 1) != 0 {
                    continue;
                }
                let pools_limit0 =
                    reader.read_word(arena_struct0.wrapping_add(self.pools_limit_offset), BAD);
                if pools_limit0 & 0xfff != 0 || pools_limit0 < arena0 {
                    continue;
                }
                let num_free_pools0 = reader
                    .read_u32(arena_struct0.wrapping_add(self.num_free_pools_offset), 0xbad);
                let max_pools0 =
                    reader.read_u32(arena_struct0.wrapping_add(self.max_pools_offset), 0xbad);
                if max_pools0 == 0 || num_free_pools0 > max_pools0 {
                    continue;
                }

                // Pools on the available list have been used and recycled;
                // the remainder of the free count is the never-used tail
                // past the pools limit.
                let mut never_used0 = num_free_pools0 as u64;
                let first_available =
                    reader.read_word(arena_struct0.wrapping_add(self.available_pools_offset), BAD);
                if first_available != 0 {
                    let mut pool = first_available;
                    while pool != 0 {
                        if pool & 0xfff != 0 || never_used0 == 0 {
                            break;
                        }
                        never_used0 -= 1;
                        pool = reader.read_word(pool.wrapping_add(2 * word), BAD);
                    }
                    if pool != 0 {
                        continue;
                    }
                }

                let used_pools0 = max_pools0 as u64 - never_used0;
                if used_pools0 == 0 {
                    continue;
                }
                let pool_size = ((pools_limit0 - arena0) / used_pools0) & !0xfff;
                if pool_size == 0 {
                    continue;
                }
                if pools_limit0 & (pool_size - 1) != 0 {
                    continue;
                }

                let mut arena_size = (max_pools0 as u64).wrapping_mul(pool_size);
                if arena0 & (pool_size - 1) != 0 {
                    // The unaligned head page is discarded, costing a pool.
                    arena_size = arena_size.wrapping_add(pool_size);
                }
                let max_pools_if_aligned = arena_size / pool_size;
                let max_pools_if_not_aligned = max_pools_if_aligned - 1;

                // Walk forward while descriptors stay consistent with the
                // derived geometry.
                let mut arena_struct = arena_struct0.wrapping_add(self.arena_struct_size);
                let mut free_list_trailer_found = false;
                loop {
                    let arena = reader.read_word(arena_struct, BAD);
                    let next = reader.read_word(arena_struct.wrapping_add(self.next_offset), BAD);
                    if arena == 0 {
                        // Free descriptor: only the next link is live, and it
                        // must stay inside the array at descriptor stride.
                        if next != 0 {
                            if next < arena_struct0
                                || (next - arena_struct0) % self.arena_struct_size != 0
                            {
                                break;
                            }
                        } else if free_list_trailer_found {
                            break;
                        } else {
                            free_list_trailer_found = true;
                        }
                    } else {
                        let num_free_pools = reader
                            .read_u32(arena_struct.wrapping_add(self.num_free_pools_offset), 0xbad);
                        let max_pools =
                            reader.read_u32(arena_struct.wrapping_add(self.max_pools_offset), 0xbad);
                        let expected = if arena & (pool_size - 1) == 0 {
                            max_pools_if_aligned
                        } else {
                            max_pools_if_not_aligned
                        };
                        if max_pools as u64 != expected || num_free_pools > max_pools {
                            break;
                        }
                        let pools_limit =
                            reader.read_word(arena_struct.wrapping_add(self.pools_limit_offset), BAD);
                        if pools_limit < arena
                            || pools_limit > arena.wrapping_add(arena_size)
                            || pools_limit & (pool_size - 1) != 0
                        {
                            break;
                        }
                        // The next/prev links of allocated descriptors may be
                        // residue from before allocation; not checked.
                    }
                    arena_struct = arena_struct.wrapping_add(self.arena_struct_size);
                }

                if arena_struct < arena_struct0 {
                    continue;
                }

                // Retract over a ragged tail: a free descriptor whose next
                // link points above the tentative limit is past the real end
                // of the array.
                let mut array_limit = arena_struct;
                let mut tail = arena_struct - self.arena_struct_size;
                while tail > arena_struct0 {
                    if reader.read_word(tail, BAD) == 0
                        && reader.read_word(tail.wrapping_add(self.next_offset), BAD) > array_limit
                    {
                        array_limit = tail;
                    }
                    tail -= self.arena_struct_size;
                }

                let num_valid = (array_limit - arena_struct0) / self.arena_struct_size;
                if self.arena_struct_count < num_valid {
                    self.arena_struct_count = num_valid;
                    self.arena_struct_array = arena_struct0;
                    self.arena_struct_array_limit = array_limit;
                    self.pool_size = pool_size;
                    self.arena_size = arena_size;
                    self.max_pools_if_aligned = max_pools_if_aligned;
                    self.max_pools_if_not_aligned = max_pools_if_not_aligned;
                    best_base = base;
                    best_limit = limit;
                }
            }
        }

        self.enumerate_arenas();

        if self.arena_struct_count != 0 {
            self.find_types(best_base, best_limit);
            if self.type_type != 0 {
                self.find_gc_lists(best_base, best_limit);
                self.find_dynamic_types();
            }
        }
    }

    /// Count active arenas, claim their ranges, and build the index set
    /// ordered by arena address for ownership queries.
    fn enumerate_arenas(&mut self) {
        let map = self.map;
        let mut reader = map.reader();

        let mut arena_struct = self.arena_struct_array;
        while arena_struct < self.arena_struct_array_limit {
            let arena = reader.read_word(arena_struct, 0);
            if arena != 0 {
                self.num_arenas += 1;
                if arena & (self.pool_size - 1) != 0 {
                    self.all_arenas_aligned = false;
                }
            }
            arena_struct += self.arena_struct_size;
        }

        self.active_indices.reserve(self.num_arenas as usize);
        let mut arena_struct = self.arena_struct_array;
        while arena_struct < self.arena_struct_array_limit {
            let arena = reader.read_word(arena_struct, 0);
            if arena != 0 {
                let index = (arena_struct - self.arena_struct_array) / self.arena_struct_size;
                self.active_indices.push(index as u32);
                // An arena is a source of allocations, not an anchor area.
                if self.all_arenas_aligned
                    && !self
                        .partition
                        .claim_range(arena, self.arena_size, PYTHON_ARENA, false)
                {
                    eprintln!(
                        "Warning: python arena at 0x{:x} was already claimed as something else.",
                        arena
                    );
                }
            }
            arena_struct += self.arena_struct_size;
        }

        let array = self.arena_struct_array;
        let stride = self.arena_struct_size;
        self.active_indices
            .sort_by_key(|&index| reader.read_word(array + index as u64 * stride, BAD));
    }
}
