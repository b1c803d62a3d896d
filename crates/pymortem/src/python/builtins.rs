//! Builtins Harvest
//!
//! Statically allocated types are registered without names because the name
//! strings often live in file-backed pages the dump did not keep. The
//! builtins dictionary maps name strings to type objects, so any name whose
//! string did survive can be recovered from there. Locating that dictionary
//! is version-specific: the newer layout is recognized by its values, the
//! older one through the module table's `__builtin__` entry.

use crate::python::resolver::{Resolver, BAD};

impl Resolver<'_, '_> {
    /// Find the builtins dict by scanning the module range for a pointer to
    /// a dict whose values include all three fundamental types.
    pub(crate) fn find_python3_builtins(&mut self, base: u64, limit: u64) -> u64 {
        let map = self.map;
        let mut reader = map.reader();
        let mut dict_reader = map.reader();
        let word = self.word;

        let mut dict_ref_candidate = base;
        while dict_ref_candidate < limit {
            let this_ref = dict_ref_candidate;
            dict_ref_candidate += word;

            let dict_candidate = reader.read_word(this_ref, BAD);
            if dict_candidate & (word - 1) != 0 {
                continue;
            }
            if dict_reader.read_word(dict_candidate.wrapping_add(word), BAD) != self.dict_type {
                continue;
            }
            let keys =
                dict_reader.read_word(dict_candidate.wrapping_add(self.keys_in_dict), BAD);
            if keys & (word - 1) != 0 {
                continue;
            }
            let capacity = dict_reader.read_word(keys.wrapping_add(word), !0);
            if capacity >= 0x200 {
                // We don't expect that many built-ins.
                continue;
            }

            let first_value = keys.wrapping_add(self.triples_in_dict_keys + 2 * word);
            let mut found_type_type = false;
            let mut found_object_type = false;
            let mut found_dict_type = false;
            for i in 0..capacity {
                let type_candidate =
                    dict_reader.read_word(first_value.wrapping_add(i * 3 * word), BAD);
                if type_candidate == self.type_type {
                    found_type_type = true;
                } else if type_candidate == self.object_type {
                    found_object_type = true;
                } else if type_candidate == self.dict_type {
                    found_dict_type = true;
                }
            }
            if found_type_type && found_object_type && found_dict_type {
                return dict_candidate;
            }
        }
        0
    }

    /// Find the builtins dict through the module table: the dict-valued
    /// entry whose key string is `__builtin__`.
    pub(crate) fn find_python2_builtins(&mut self, base: u64, limit: u64) -> u64 {
        let map = self.map;
        let mut reader = map.reader();
        let mut dict_reader = map.reader();
        let word = self.word;

        let mut dict_ref_candidate = base;
        while dict_ref_candidate < limit {
            let this_ref = dict_ref_candidate;
            dict_ref_candidate += word;

            let outer_dict = reader.read_word(this_ref, BAD);
            if outer_dict & (word - 1) != 0 {
                continue;
            }
            if dict_reader.read_word(outer_dict.wrapping_add(word), BAD) != self.dict_type {
                continue;
            }
            let keys = dict_reader.read_word(outer_dict.wrapping_add(self.keys_in_dict), BAD);
            if keys & (word - 1) != 0 {
                continue;
            }
            let mask = dict_reader.read_word(outer_dict.wrapping_add(4 * word), !0);
            if mask == !0 {
                continue;
            }
            let capacity = mask + 1;
            if capacity.checked_mul(3 * word).is_none() {
                continue;
            }

            let first_key = keys.wrapping_add(self.triples_in_dict_keys + word);
            let mut builtins_dict = 0;
            for i in 0..capacity {
                let key_slot = first_key.wrapping_add(i * 3 * word);
                let dict_candidate = dict_reader.read_word(key_slot.wrapping_add(word), BAD);
                if dict_candidate == 0 {
                    continue;
                }
                if dict_reader.read_word(dict_candidate.wrapping_add(word), BAD)
                    != self.dict_type
                {
                    continue;
                }
                let str_candidate = dict_reader.read_word(key_slot, BAD);
                if str_candidate == 0 || str_candidate & (word - 1) != 0 {
                    continue;
                }
                let Some(image) = map.find_mapped_image(str_candidate) else {
                    continue;
                };
                if (image.len() as u64) < self.cstring_in_str + 12 {
                    continue;
                }
                let cstring = self.cstring_in_str as usize;
                if &image[cstring..cstring + 11] == b"__builtin__" && image[cstring + 11] == 0 {
                    builtins_dict = dict_candidate;
                }
            }
            if builtins_dict != 0 {
                return builtins_dict;
            }
        }
        0
    }

    /// Walk the builtins dict and name every type-valued entry whose key
    /// string image survived in the dump.
    pub(crate) fn register_builtin_types(&mut self, builtins_dict: u64) {
        let map = self.map;
        let mut reader = map.reader();
        let word = self.word;

        let keys = reader.read_word(builtins_dict.wrapping_add(self.keys_in_dict), BAD);
        if keys & (word - 1) != 0 {
            return;
        }
        let capacity = if self.triples_in_dict_keys == 0 {
            reader
                .read_word(builtins_dict.wrapping_add(4 * word), !0)
                .wrapping_add(1)
        } else {
            let capacity = reader.read_word(keys.wrapping_add(word), !0);
            if capacity == !0 {
                return;
            }
            capacity
        };
        if capacity.checked_mul(3 * word).is_none() {
            return;
        }

        let triples = keys.wrapping_add(self.triples_in_dict_keys);
        for i in 0..capacity {
            let triple = triples.wrapping_add(i * 3 * word);
            let key = reader.read_word(triple.wrapping_add(word), 0);
            if key == 0 {
                continue;
            }
            let value = reader.read_word(triple.wrapping_add(2 * word), 0);
            if value == 0 {
                continue;
            }
            let Some(image) = map.find_mapped_image(key) else {
                continue;
            };
            if (image.len() as u64) < self.cstring_in_str + 2 {
                continue;
            }
            if map.word().read_at(image, word) != Some(self.str_type) {
                continue;
            }
            let Some(length) = map.word().read_at(image, 2 * word) else {
                continue;
            };
            let Some(needed) = self
                .cstring_in_str
                .checked_add(length)
                .and_then(|n| n.checked_add(1))
            else {
                continue;
            };
            if (image.len() as u64) < needed {
                continue;
            }
            let cstring = self.cstring_in_str as usize;
            if image[cstring + length as usize] != 0 {
                continue;
            }
            if reader.read_word(value.wrapping_add(word), 0) != self.type_type {
                continue;
            }
            let name = String::from_utf8_lossy(&image[cstring..cstring + length as usize]);
            self.types.register_type(value, &name);
        }
    }
}
