//! GC List Discovery and Dynamically Allocated Types
//!
//! The collector anchors its tracked objects on circular doubly-linked
//! lists whose head sentinels sit in the interpreter's data segment. A head
//! is recognized purely structurally (both neighbors point back at it), and
//! confirmed by the first node carrying a type-tagged object behind its GC
//! header. Heap-allocated types only ever appear on these lists, so walking
//! them completes the type registry; the walk also yields the one offset
//! that exists only in heap type objects.

use crate::python::resolver::{Resolver, BAD};
use crate::python::version::{gc_header_size, MajorVersion};

impl Resolver<'_, '_> {
    /// Scan the module writable range for non-empty GC list heads.
    /// Derives the GC header size by trial when the version left it open.
    pub(crate) fn find_gc_lists(&mut self, base: u64, limit: u64) {
        self.gc_header_size = gc_header_size(self.version, self.word);

        let map = self.map;
        let mut reader = map.reader();
        let mut other = map.reader();
        let word = self.word;
        let header_v2 = 4 * word;
        let header_v3 = 3 * word;

        let list_candidate_limit = limit - 2 * word;
        let mut list_candidate = base;
        while list_candidate < list_candidate_limit {
            let head = list_candidate;
            list_candidate += word;

            let first_entry = reader.read_word(head, 0);
            if first_entry == 0 || first_entry == head {
                continue;
            }
            if other.read_word(first_entry.wrapping_add(word), 0) != head {
                continue;
            }
            let last_entry = reader.read_word(head + word, 0);
            if last_entry == 0 || last_entry == head {
                continue;
            }
            if other.read_word(last_entry, 0) != head {
                continue;
            }

            let mut found_list = false;
            if self.gc_header_size == 0 {
                for header in [header_v2, header_v3] {
                    let object_type =
                        other.read_word(first_entry.wrapping_add(header + word), 0);
                    if object_type != 0
                        && other.read_word(object_type.wrapping_add(word), 0) == self.type_type
                    {
                        found_list = true;
                        self.gc_header_size = header;
                        break;
                    }
                }
            } else {
                let object_type = other
                    .read_word(first_entry.wrapping_add(self.gc_header_size + word), 0);
                found_list = object_type != 0
                    && other.read_word(object_type.wrapping_add(word), 0) == self.type_type;
            }
            if found_list {
                self.non_empty_gc_lists.push(head);
                // The two head pointers are consumed.
                list_candidate += 2 * word;
            }
        }
    }

    /// Walk every discovered list and register the heap types on it. For
    /// the newer layout, also derive the cached-keys offset the first time
    /// a heap type exposes one.
    pub(crate) fn find_dynamic_types(&mut self) {
        let mut need_cached_keys = self.version != MajorVersion::V2;
        let map = self.map;
        let mut reader = map.reader();
        let mut other = map.reader();
        let word = self.word;

        for list_head in self.non_empty_gc_lists.clone() {
            let mut prev_node = list_head;
            let mut node = reader.read_word(list_head, list_head);
            while node != list_head {
                if reader.read_word(node.wrapping_add(word), 0) != prev_node {
                    eprintln!(
                        "Warning: GC list at 0x{:x} is ill-formed near 0x{:x}.",
                        list_head, node
                    );
                    break;
                }
                prev_node = node;

                let type_candidate = node.wrapping_add(self.gc_header_size);
                if !self.types.has_type(type_candidate)
                    && self.is_a_type_type(reader.read_word(type_candidate.wrapping_add(word), 0))
                {
                    self.types.register_type(type_candidate, "");
                    if need_cached_keys {
                        // Heap type objects carry a pointer to a cached key
                        // table near the end of the type body. The table is
                        // recognized by shape: refcount 1, power-of-two
                        // size, usable fraction one less, live count within.
                        let mut keys_offset = self.type_size.saturating_sub(0x10 * word);
                        while keys_offset < self.type_size {
                            let offset = keys_offset;
                            keys_offset += word;

                            let keys_candidate =
                                reader.read_word(type_candidate.wrapping_add(offset), BAD);
                            if keys_candidate & (word - 1) != 0 {
                                continue;
                            }
                            // The refcount of a type's cached key table is
                            // almost always exactly one, and one witness is
                            // all the offset derivation needs.
                            if other.read_word(keys_candidate, 0) != 1 {
                                continue;
                            }
                            let size = other.read_word(keys_candidate.wrapping_add(word), 0);
                            if size == 0 || !size.is_power_of_two() {
                                continue;
                            }
                            let usable =
                                other.read_word(keys_candidate.wrapping_add(3 * word), BAD);
                            if size - 1 != usable {
                                continue;
                            }
                            if usable
                                < other.read_word(keys_candidate.wrapping_add(4 * word), !0)
                            {
                                continue;
                            }
                            self.cached_keys_in_heap_type = offset;
                            need_cached_keys = false;
                            break;
                        }
                    }
                }
                node = reader.read_word(node, list_head);
            }
        }
    }
}
