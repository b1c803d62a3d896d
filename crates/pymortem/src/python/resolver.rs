//! Resolver State and Entry Point
//!
//! Owns everything discovered about the dumped interpreter and runs the
//! discovery phases exactly once. Accessors are meaningful only after
//! [`Resolver::resolve`]; before that they hold the zero / unknown
//! sentinels. Discovery failures never raise: later phases short-circuit
//! and the sentinels remain.

use crate::map::VirtualAddressMap;
use crate::modules::{Module, ModuleDirectory};
use crate::partition::VirtualMemoryPartition;
use crate::python::version::MajorVersion;
use crate::typedir::TypeDirectory;

/// Sentinel for offsets that were not resolved.
pub const UNKNOWN_OFFSET: u64 = !0;

/// Fallback for raw reads whose target may be unmapped: non-zero and odd,
/// so every alignment predicate rejects it.
pub(crate) const BAD: u64 = 0xbad;

/// Partition label for claimed allocator arenas.
pub(crate) const PYTHON_ARENA: &str = "python arena";

/// Single-shot discovery engine over one dump.
pub struct Resolver<'p, 'a> {
    pub(crate) modules: &'p ModuleDirectory,
    pub(crate) partition: &'p mut VirtualMemoryPartition<'a>,
    pub(crate) types: &'p mut TypeDirectory,
    pub(crate) map: &'a VirtualAddressMap,
    /// Pointer width of the dump, in bytes.
    pub(crate) word: u64,

    pub(crate) version: MajorVersion,
    library_path: String,
    executable_path: String,
    resolved: bool,

    // Arena descriptor field offsets, fixed by the pointer width.
    arena_offset: u64,
    pub(crate) pools_limit_offset: u64,
    pub(crate) num_free_pools_offset: u64,
    pub(crate) max_pools_offset: u64,
    pub(crate) available_pools_offset: u64,
    pub(crate) next_offset: u64,
    prev_offset: u64,
    pub(crate) arena_struct_size: u64,

    // Arena table and geometry.
    pub(crate) num_arenas: u64,
    pub(crate) arena_struct_array: u64,
    pub(crate) arena_struct_count: u64,
    pub(crate) arena_struct_array_limit: u64,
    pub(crate) arena_size: u64,
    pub(crate) pool_size: u64,
    pub(crate) max_pools_if_aligned: u64,
    pub(crate) max_pools_if_not_aligned: u64,
    pub(crate) all_arenas_aligned: bool,
    pub(crate) active_indices: Vec<u32>,

    // Fundamental type anchors.
    pub(crate) type_type: u64,
    pub(crate) type_size: u64,
    pub(crate) base_in_type: u64,
    pub(crate) object_type: u64,
    pub(crate) dict_in_type: u64,
    pub(crate) getset_in_type: u64,
    pub(crate) dict_type: u64,
    pub(crate) keys_in_dict: u64,
    pub(crate) triples_in_dict_keys: u64,
    pub(crate) str_type: u64,
    pub(crate) cstring_in_str: u64,

    // Garbage-collection layout.
    pub(crate) non_empty_gc_lists: Vec<u64>,
    pub(crate) gc_header_size: u64,
    pub(crate) cached_keys_in_heap_type: u64,
}

impl<'p, 'a> Resolver<'p, 'a> {
    pub fn new(
        modules: &'p ModuleDirectory,
        partition: &'p mut VirtualMemoryPartition<'a>,
        types: &'p mut TypeDirectory,
    ) -> Self {
        let map = partition.address_map();
        let word = map.word_bytes();
        let pools_limit_offset = word;
        let num_free_pools_offset = pools_limit_offset + word;
        let max_pools_offset = num_free_pools_offset + 4;
        let available_pools_offset = max_pools_offset + 4;
        let next_offset = available_pools_offset + word;
        let prev_offset = next_offset + word;
        Self {
            modules,
            partition,
            types,
            map,
            word,
            version: MajorVersion::Unknown,
            library_path: String::new(),
            executable_path: String::new(),
            resolved: false,
            arena_offset: 0,
            pools_limit_offset,
            num_free_pools_offset,
            max_pools_offset,
            available_pools_offset,
            next_offset,
            prev_offset,
            arena_struct_size: prev_offset + word,
            num_arenas: 0,
            arena_struct_array: 0,
            arena_struct_count: 0,
            arena_struct_array_limit: 0,
            arena_size: 0,
            pool_size: 0,
            max_pools_if_aligned: 0,
            max_pools_if_not_aligned: 0,
            all_arenas_aligned: true,
            active_indices: Vec::new(),
            type_type: 0,
            type_size: 0,
            base_in_type: UNKNOWN_OFFSET,
            object_type: 0,
            dict_in_type: UNKNOWN_OFFSET,
            getset_in_type: UNKNOWN_OFFSET,
            dict_type: 0,
            keys_in_dict: UNKNOWN_OFFSET,
            triples_in_dict_keys: UNKNOWN_OFFSET,
            str_type: 0,
            cstring_in_str: UNKNOWN_OFFSET,
            non_empty_gc_lists: Vec::new(),
            gc_header_size: 0,
            cached_keys_in_heap_type: UNKNOWN_OFFSET,
        }
    }

    /// Run all discovery phases. Must be called exactly once, and only
    /// after the module directory is resolved; both are caller bugs and
    /// terminate the process.
    pub fn resolve(&mut self) {
        if self.resolved {
            panic!("Resolver::resolve called twice");
        }
        if !self.modules.is_resolved() {
            panic!("Resolver::resolve called before the module directory was resolved");
        }

        let dir = self.modules;
        let mut library: Option<&Module> = None;
        let mut executable: Option<&Module> = None;
        for module in dir.iter() {
            if library.is_none() && module.path.contains("libpython") {
                self.library_path = module.path.clone();
                library = Some(module);
            }
            if executable.is_none()
                && (module.path.contains("/python") || module.path.starts_with("python"))
            {
                self.executable_path = module.path.clone();
                executable = Some(module);
            }
        }

        if library.is_some() {
            if self.library_path.contains("libpython3") {
                self.version = MajorVersion::V3;
            } else if self.library_path.contains("libpython2") {
                self.version = MajorVersion::V2;
            }
        }
        if executable.is_some() {
            if self.executable_path.contains("python3") {
                match self.version {
                    MajorVersion::V2 => {
                        eprintln!(
                            "Warning: version derived from executable conflicts with the one \
                             derived from the library."
                        );
                        self.version = MajorVersion::Unknown;
                    }
                    MajorVersion::V3 => {}
                    MajorVersion::Unknown => self.version = MajorVersion::V3,
                }
            }
            if self.executable_path.contains("python2") {
                match self.version {
                    MajorVersion::V2 => {}
                    MajorVersion::V3 => {
                        eprintln!(
                            "Warning: version derived from executable conflicts with the one \
                             derived from the library."
                        );
                        self.version = MajorVersion::Unknown;
                    }
                    MajorVersion::Unknown => self.version = MajorVersion::V2,
                }
            }
        }

        if let Some(module) = library {
            self.find_arena_table_and_types(module);
        }
        if let Some(module) = executable {
            if self.arena_struct_array == 0 {
                self.find_arena_table_and_types(module);
            }
        }
        self.resolved = true;
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    pub fn version(&self) -> MajorVersion {
        self.version
    }

    pub fn library_path(&self) -> &str {
        &self.library_path
    }

    pub fn executable_path(&self) -> &str {
        &self.executable_path
    }

    /// The descriptor owning `addr`, or 0 when no active arena contains it.
    /// Binary search over the active indices, ordered by arena address.
    pub fn arena_struct_for(&self, addr: u64) -> u64 {
        if self.active_indices.is_empty() {
            return 0;
        }
        let mut reader = self.map.reader();
        let mut first = 0usize;
        let mut left = self.active_indices.len();
        while left != 0 {
            let half = left / 2;
            let mid = first + half;
            let arena_struct =
                self.arena_struct_array + self.active_indices[mid] as u64 * self.arena_struct_size;
            let arena = reader.read_word(arena_struct, BAD);
            if arena.wrapping_add(self.arena_size) <= addr {
                first = mid + 1;
                left -= half + 1;
            } else {
                if arena <= addr {
                    return arena_struct;
                }
                left = half;
            }
        }
        0
    }

    /// Whether `type_object`'s base chain reaches the meta-type. Bounded to
    /// defend against cyclic or corrupted chains.
    pub fn is_a_type_type(&self, type_object: u64) -> bool {
        let mut reader = self.map.reader();
        let mut current = type_object;
        let mut depth = 0;
        while current != 0 {
            if current == self.type_type {
                return true;
            }
            depth += 1;
            if depth == 100 {
                eprintln!(
                    "Warning: excessive depth for probable type object 0x{:x}.",
                    type_object
                );
                break;
            }
            current = reader.read_word(current.wrapping_add(self.base_in_type), 0);
        }
        false
    }

    pub fn has_type(&self, addr: u64) -> bool {
        self.types.has_type(addr)
    }

    pub fn type_name(&self, addr: u64) -> Option<&str> {
        self.types.type_name(addr)
    }

    // Arena descriptor layout.

    pub fn arena_offset(&self) -> u64 {
        self.arena_offset
    }

    pub fn pools_limit_offset(&self) -> u64 {
        self.pools_limit_offset
    }

    pub fn num_free_pools_offset(&self) -> u64 {
        self.num_free_pools_offset
    }

    pub fn max_pools_offset(&self) -> u64 {
        self.max_pools_offset
    }

    pub fn available_pools_offset(&self) -> u64 {
        self.available_pools_offset
    }

    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    pub fn prev_offset(&self) -> u64 {
        self.prev_offset
    }

    pub fn arena_struct_size(&self) -> u64 {
        self.arena_struct_size
    }

    // Arena table and geometry.

    pub fn num_arenas(&self) -> u64 {
        self.num_arenas
    }

    pub fn arena_struct_array(&self) -> u64 {
        self.arena_struct_array
    }

    pub fn arena_struct_count(&self) -> u64 {
        self.arena_struct_count
    }

    pub fn arena_struct_array_limit(&self) -> u64 {
        self.arena_struct_array_limit
    }

    pub fn arena_size(&self) -> u64 {
        self.arena_size
    }

    pub fn pool_size(&self) -> u64 {
        self.pool_size
    }

    pub fn max_pools_if_aligned(&self) -> u64 {
        self.max_pools_if_aligned
    }

    pub fn max_pools_if_not_aligned(&self) -> u64 {
        self.max_pools_if_not_aligned
    }

    pub fn all_arenas_aligned(&self) -> bool {
        self.all_arenas_aligned
    }

    pub fn active_indices(&self) -> &[u32] {
        &self.active_indices
    }

    // Fundamental type anchors.

    pub fn type_type(&self) -> u64 {
        self.type_type
    }

    pub fn type_size(&self) -> u64 {
        self.type_size
    }

    pub fn base_in_type(&self) -> u64 {
        self.base_in_type
    }

    pub fn object_type(&self) -> u64 {
        self.object_type
    }

    pub fn dict_in_type(&self) -> u64 {
        self.dict_in_type
    }

    pub fn getset_in_type(&self) -> u64 {
        self.getset_in_type
    }

    pub fn dict_type(&self) -> u64 {
        self.dict_type
    }

    pub fn keys_in_dict(&self) -> u64 {
        self.keys_in_dict
    }

    pub fn triples_in_dict_keys(&self) -> u64 {
        self.triples_in_dict_keys
    }

    pub fn str_type(&self) -> u64 {
        self.str_type
    }

    pub fn cstring_in_str(&self) -> u64 {
        self.cstring_in_str
    }

    // Garbage-collection layout.

    pub fn non_empty_gc_lists(&self) -> &[u64] {
        &self.non_empty_gc_lists
    }

    pub fn gc_header_size(&self) -> u64 {
        self.gc_header_size
    }

    pub fn cached_keys_in_heap_type(&self) -> u64 {
        self.cached_keys_in_heap_type
    }
}
