//! Interpreter Version Tagging
//!
//! The two supported major versions differ in dictionary, string and GC
//! header layout. Each variant carries its offset constants; `Unknown`
//! dispatches by trial-and-validate.

/// Major version of the dumped interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MajorVersion {
    V2,
    V3,
    /// Not derivable from module paths, or a conflict between them.
    Unknown,
}

/// Field offsets that differ between dictionary/string layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DictStrOffsets {
    /// Offset of the key-table pointer inside a dict object.
    pub keys_in_dict: u64,
    /// Offset of the (hash, key, value) triple table inside the key table.
    pub triples_in_dict_keys: u64,
    /// Offset of the inline C string inside a str object.
    pub cstring_in_str: u64,
}

impl DictStrOffsets {
    pub fn python2(word: u64) -> Self {
        Self {
            keys_in_dict: 5 * word,
            triples_in_dict_keys: 0,
            cstring_in_str: 0x24,
        }
    }

    pub fn python3(word: u64) -> Self {
        Self {
            keys_in_dict: 3 * word,
            triples_in_dict_keys: 4 * word,
            cstring_in_str: 6 * word,
        }
    }
}

/// GC header size preceding a tracked object, by version. Zero when the
/// version is unknown; the list scan then derives it by trial.
pub fn gc_header_size(version: MajorVersion, word: u64) -> u64 {
    match version {
        MajorVersion::V2 => 4 * word,
        MajorVersion::V3 => 3 * word,
        MajorVersion::Unknown => 0,
    }
}
