//! Fundamental Type Discovery and Offset Calibration
//!
//! The meta-type is the only object in the dump whose type pointer refers to
//! itself, and its immediate neighborhood pins down every other anchor: the
//! root object type, the dictionary type, and the field offsets that differ
//! between interpreter versions. The search walks allocator blocks inside
//! active arenas until one block's type chain produces a self-consistent
//! set; one wrong guess fails the ladder and the walk moves on.

use crate::python::resolver::{Resolver, BAD};
use crate::python::version::{DictStrOffsets, MajorVersion};

impl Resolver<'_, '_> {
    /// Scan allocator blocks for the meta-type and commit all fundamental
    /// anchors. `base..limit` is the module writable range that produced
    /// the arena table; every anchor must live inside it.
    ///
    /// Normally converges within the first few blocks of the first pool.
    pub(crate) fn find_types(&mut self, base: u64, limit: u64) {
        if self.version == MajorVersion::Unknown {
            eprintln!("Warning: the major python version was not derived from module paths.");
            eprintln!("An attempt will be made to derive the needed offsets.");
        }
        let map = self.map;
        let mut reader = map.reader();
        let word = self.word;

        // Active arenas in address order.
        let indices = self.active_indices.clone();
        for &index in &indices {
            let arena_struct = self.arena_struct_array + index as u64 * self.arena_struct_size;
            let arena = reader.read_word(arena_struct, 0);
            if arena == 0 {
                continue;
            }
            let first_pool = arena.wrapping_add(self.pool_size - 1) & !(self.pool_size - 1);
            let pools_limit = arena.wrapping_add(self.arena_size) & !(self.pool_size - 1);

            let mut pool = first_pool;
            while pool < pools_limit {
                let this_pool = pool;
                pool += self.pool_size;

                // An in-use pool has a non-zero reference count word.
                if reader.read_u32(this_pool, 0) == 0 {
                    continue;
                }
                let unused = reader.read_u32(this_pool + 0x2c, 0) as u64;
                if unused >= self.pool_size {
                    continue;
                }
                let block_size = self.pool_size - unused;
                let pool_limit = this_pool + self.pool_size;

                let mut block = this_pool + 0x30;
                while block + block_size <= pool_limit {
                    let this_block = block;
                    block += block_size;

                    let candidate_type = reader.read_word(this_block + word, BAD);
                    if candidate_type == 0 || candidate_type & (word - 1) != 0 {
                        continue;
                    }
                    let candidate_type_type =
                        reader.read_word(candidate_type.wrapping_add(2 * word), BAD);
                    if candidate_type_type & (word - 1) != 0 {
                        continue;
                    }
                    // The meta-type is its own type.
                    if candidate_type_type
                        != reader.read_word(candidate_type_type.wrapping_add(word), 0)
                    {
                        continue;
                    }
                    if candidate_type_type < base || candidate_type_type >= limit {
                        continue;
                    }
                    let type_size =
                        reader.read_word(candidate_type_type + 4 * word, !0);
                    if limit - candidate_type_type < type_size {
                        continue;
                    }

                    if self.probe_base_offset(candidate_type_type, type_size, base, limit) {
                        return;
                    }
                }
            }
        }
    }

    /// Probe for the base-type offset inside the meta-type and, on success,
    /// commit the anchors and run the remaining module-range phases.
    /// Returns true when the outer search should stop, successful or not.
    fn probe_base_offset(
        &mut self,
        candidate_type_type: u64,
        type_size: u64,
        base: u64,
        limit: u64,
    ) -> bool {
        let map = self.map;
        let mut reader = map.reader();
        let word = self.word;

        let mut base_in_type = 0x18 * word;
        while base_in_type < type_size.saturating_sub(0x10) {
            let offset = base_in_type;
            base_in_type += word;

            let candidate_object_type = reader.read_word(candidate_type_type + offset, BAD);
            if candidate_object_type & (word - 1) != 0 {
                continue;
            }
            let candidate_dict = reader.read_word(candidate_type_type + offset + word, BAD);
            if candidate_dict & (word - 1) != 0 {
                continue;
            }
            if reader.read_word(candidate_object_type.wrapping_add(word), 0)
                != candidate_type_type
            {
                continue;
            }
            // The root object type has no base.
            if reader.read_word(candidate_object_type.wrapping_add(offset), BAD) != 0 {
                continue;
            }
            let candidate_dict_type = reader.read_word(candidate_dict.wrapping_add(word), 0);
            if reader.read_word(candidate_dict_type.wrapping_add(word), BAD)
                != candidate_type_type
            {
                continue;
            }
            // dict inherits from object.
            if reader.read_word(candidate_dict_type.wrapping_add(offset), BAD)
                != candidate_object_type
            {
                continue;
            }

            self.type_type = candidate_type_type;
            self.type_size = type_size;
            self.base_in_type = offset;
            self.object_type = candidate_object_type;
            self.dict_in_type = offset + word;
            self.getset_in_type = offset - word;
            self.dict_type = candidate_dict_type;
            self.types.register_type(self.type_type, "type");
            self.types.register_type(self.object_type, "object");
            self.types.register_type(self.dict_type, "dict");

            // The meta-type's dict is never empty and its keys are strings,
            // which pins the dict and str offsets.
            if !self.calibrate_dict_and_str(candidate_dict) {
                return true;
            }

            self.find_static_types(base, limit);

            let builtins_dict = if self.triples_in_dict_keys > 0 {
                self.find_python3_builtins(base, limit)
            } else {
                self.find_python2_builtins(base, limit)
            };
            if builtins_dict != 0 {
                self.register_builtin_types(builtins_dict);
            }
            return true;
        }
        false
    }

    /// Choose dict/str offsets for the tagged version, or by trial when the
    /// version is unknown. Verifies against the meta-type's dict.
    fn calibrate_dict_and_str(&mut self, dict_for_type_type: u64) -> bool {
        let word = self.word;
        match self.version {
            MajorVersion::V2 => {
                self.apply_dict_str_offsets(DictStrOffsets::python2(word));
                if !self.check_dict_and_str_offsets(dict_for_type_type) {
                    eprintln!("Warning: failed to confirm dict and str offsets for python2.");
                    return false;
                }
            }
            MajorVersion::V3 => {
                self.apply_dict_str_offsets(DictStrOffsets::python3(word));
                if !self.check_dict_and_str_offsets(dict_for_type_type) {
                    eprintln!("Warning: failed to confirm dict and str offsets for python3.");
                    return false;
                }
            }
            MajorVersion::Unknown => {
                self.apply_dict_str_offsets(DictStrOffsets::python2(word));
                if !self.check_dict_and_str_offsets(dict_for_type_type) {
                    self.apply_dict_str_offsets(DictStrOffsets::python3(word));
                    if !self.check_dict_and_str_offsets(dict_for_type_type) {
                        eprintln!(
                            "Warning: failed to determine offsets for python dict and str."
                        );
                        return false;
                    }
                }
            }
        }
        true
    }

    fn apply_dict_str_offsets(&mut self, offsets: DictStrOffsets) {
        self.keys_in_dict = offsets.keys_in_dict;
        self.triples_in_dict_keys = offsets.triples_in_dict_keys;
        self.cstring_in_str = offsets.cstring_in_str;
    }

    /// Verify the candidate dict/str offsets: the meta-type's dict always
    /// carries an 8-byte string key `__base__`. A hit also yields the str
    /// type object.
    fn check_dict_and_str_offsets(&mut self, dict_for_type_type: u64) -> bool {
        let map = self.map;
        let mut reader = map.reader();
        let word = self.word;

        let dict_keys = reader.read_word(dict_for_type_type.wrapping_add(self.keys_in_dict), BAD);
        if dict_keys & (word - 1) != 0 {
            return false;
        }
        // Capacity lives in the key table for the newer layout and is
        // mask + 1 in the dict itself for the older one.
        let capacity = if self.triples_in_dict_keys > 0 {
            let capacity = reader.read_word(dict_keys.wrapping_add(word), !0);
            if capacity == !0 {
                return false;
            }
            capacity
        } else {
            let mask = reader.read_word(dict_for_type_type.wrapping_add(4 * word), !0);
            if mask == !0 {
                return false;
            }
            mask + 1
        };
        if capacity.checked_mul(3 * word).is_none() {
            return false;
        }

        let triples = dict_keys.wrapping_add(self.triples_in_dict_keys);
        for i in 0..capacity {
            let this_triple = triples.wrapping_add(i * 3 * word);
            if reader.read_word(this_triple, 0) == 0 {
                continue;
            }
            if reader.read_word(this_triple.wrapping_add(2 * word), 0) == 0 {
                continue;
            }
            let str_candidate = reader.read_word(this_triple.wrapping_add(word), 0);
            if str_candidate == 0 {
                continue;
            }
            let Some(image) = map.find_mapped_image(str_candidate) else {
                continue;
            };
            if (image.len() as u64) < self.cstring_in_str + 2 {
                continue;
            }
            let Some(length) = map.word().read_at(image, 2 * word) else {
                continue;
            };
            if length != 8 {
                continue;
            }
            if (image.len() as u64) < self.cstring_in_str + length + 1 {
                continue;
            }
            let cstring = self.cstring_in_str as usize;
            if image[cstring + length as usize] != 0 {
                continue;
            }
            if &image[cstring..cstring + 8] == b"__base__" {
                let Some(str_type) = map.word().read_at(image, word) else {
                    continue;
                };
                self.str_type = str_type;
                self.types.register_type(str_type, "str");
                return true;
            }
        }
        false
    }

    /// Linear scan of the module's writable range for type objects whose
    /// meta pointer is the discovered meta-type. Names arrive later from
    /// the builtins dict.
    fn find_static_types(&mut self, base: u64, limit: u64) {
        let map = self.map;
        let mut reader = map.reader();
        let mut base_type_reader = map.reader();
        let word = self.word;

        let candidate_limit = limit - self.type_size + 1;
        let mut candidate = base;
        while candidate < candidate_limit {
            if !self.types.has_type(candidate)
                && reader.read_word(candidate + word, BAD) == self.type_type
            {
                let base_type = reader.read_word(candidate + self.base_in_type, 0);
                if base_type != 0 {
                    if base_type == self.object_type
                        || self.types.has_type(base_type)
                        || base_type_reader.read_word(base_type.wrapping_add(word), 0)
                            == self.type_type
                    {
                        self.types.register_type(candidate, "");
                        // Skip most of the type body.
                        candidate += self.base_in_type;
                        continue;
                    }
                } else if candidate != self.object_type {
                    // Some types legitimately have no base besides the root
                    // object type; a plausible getset table distinguishes
                    // them from stray matches.
                    let getset = reader.read_word(candidate + self.getset_in_type, 0);
                    if getset >= base && getset < limit {
                        self.types.register_type(candidate, "");
                    }
                }
            }
            candidate += word;
        }
    }
}
