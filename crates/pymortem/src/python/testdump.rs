//! Synthetic Dump Construction
//!
//! Test-only builders that assemble complete fake core images in memory:
//! a module data segment holding the arena-table pointer and the static
//! type objects, a heap holding the descriptor array, dictionaries and GC
//! nodes, and an arena region with one in-use pool whose first block
//! anchors the type search. Each builder returns the addresses it chose so
//! tests can assert against them.

use crate::map::{MappedRange, VirtualAddressMap, WordSize};
use crate::modules::ModuleDirectory;

use byteorder::{ByteOrder, LE};

/// An absolute-addressed byte buffer destined to become one mapped range.
pub struct Mem {
    base: u64,
    word: WordSize,
    bytes: Vec<u8>,
}

impl Mem {
    pub fn new(base: u64, size: usize, word: WordSize) -> Self {
        Self {
            base,
            word,
            bytes: vec![0; size],
        }
    }

    /// Write one machine word at an absolute address.
    pub fn w(&mut self, addr: u64, value: u64) {
        let offset = (addr - self.base) as usize;
        match self.word {
            WordSize::U32 => {
                assert!(value <= u32::MAX as u64, "value {value:#x} exceeds 32 bits");
                LE::write_u32(&mut self.bytes[offset..offset + 4], value as u32);
            }
            WordSize::U64 => LE::write_u64(&mut self.bytes[offset..offset + 8], value),
        }
    }

    /// Write a `u32` at an absolute address.
    pub fn u(&mut self, addr: u64, value: u32) {
        let offset = (addr - self.base) as usize;
        LE::write_u32(&mut self.bytes[offset..offset + 4], value);
    }

    /// Write raw bytes at an absolute address.
    pub fn b(&mut self, addr: u64, bytes: &[u8]) {
        let offset = (addr - self.base) as usize;
        self.bytes[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    fn into_range(self, perms: &str) -> MappedRange {
        MappedRange {
            base: self.base,
            limit: self.base + self.bytes.len() as u64,
            perms: perms.to_string(),
            data: Some(self.bytes),
        }
    }
}

/// Collects ranges and module attributions into a map/directory pair.
pub struct DumpBuilder {
    word: WordSize,
    ranges: Vec<MappedRange>,
    modules: ModuleDirectory,
}

impl DumpBuilder {
    pub fn new(word: WordSize) -> Self {
        Self {
            word,
            ranges: Vec::new(),
            modules: ModuleDirectory::new(),
        }
    }

    pub fn mem(&mut self, mem: Mem, perms: &str) {
        self.ranges.push(mem.into_range(perms));
    }

    pub fn module(&mut self, path: &str, base: u64, limit: u64, perms: &str) {
        self.modules.add_range(path, base, limit, perms);
    }

    pub fn build(mut self) -> (VirtualAddressMap, ModuleDirectory) {
        self.modules.resolve();
        (VirtualAddressMap::new(self.word, self.ranges), self.modules)
    }
}

/// GC list population for the 64-bit dump.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum GcLists {
    None,
    /// One well-formed single-node list carrying a heap type.
    Single,
    /// The single-node list plus a two-node list whose second node has a
    /// corrupted back link.
    SingleAndCorrupt,
}

pub struct V3Spec {
    pub arena: u64,
    pub exe_path: Option<&'static str>,
    pub map_builtin_keys: bool,
    pub gc: GcLists,
}

impl Default for V3Spec {
    fn default() -> Self {
        Self {
            arena: V3_ARENA_ALIGNED,
            exe_path: None,
            map_builtin_keys: true,
            gc: GcLists::None,
        }
    }
}

pub const V3_ARENA_ALIGNED: u64 = 0xa0_0000;
pub const V3_ARENA_UNALIGNED: u64 = 0xa0_0800;

const V3_MODULE_BASE: u64 = 0x60_0000;
const V3_MODULE_DIR_LIMIT: u64 = 0x60_2000;
const V3_HEAP_BASE: u64 = 0x90_0000;
const V3_UNMAPPED_KEYS: u64 = 0x30_0000;

pub struct V3Dump {
    pub map: VirtualAddressMap,
    pub modules: ModuleDirectory,
    pub arena: u64,
    pub arena_table: u64,
    pub type_type: u64,
    pub object_type: u64,
    pub dict_type: u64,
    pub str_type: u64,
    pub list_type: u64,
    /// (name, key string address, type object address)
    pub builtins: Vec<(&'static str, u64, u64)>,
    pub gc_heads: Vec<u64>,
    pub heap_type: u64,
    pub second_heap_type: u64,
    pub abandoned_heap_type: u64,
}

/// Assemble a 64-bit dump in the current interpreter layout.
pub fn v3_dump(spec: V3Spec) -> V3Dump {
    let word = WordSize::U64;
    let mb = V3_MODULE_BASE;
    let heap = V3_HEAP_BASE;

    let tt = mb + 0x400;
    let ot = mb + 0x600;
    let dt = mb + 0x700;
    let st = mb + 0x800;
    let lt = mb + 0x900;
    let ptr_table = mb + 0x2100;
    let ptr_builtins = mb + 0x2200;
    let gc1 = mb + 0x2400;
    let gc2 = mb + 0x2420;

    let at = heap;
    let td = heap + 0x100;
    let tk = heap + 0x200;
    let bs = heap + 0x400;
    let bd = heap + 0x500;
    let bk = heap + 0x600;
    let n1 = heap + 0x1000;
    let na = heap + 0x1200;
    let nb = heap + 0x1400;
    let ko = heap + 0x1800;

    let type_size = 0x180u64;
    let base_in_type = 0xc0u64;
    let arena = spec.arena;
    let aligned = arena & 0xfff == 0;

    let mut module = Mem::new(mb, 0x3000, word);
    // Meta-type: self-referential, with the root object type and its own
    // attribute dict right at the base-offset pair.
    module.w(tt + 8, tt);
    module.w(tt + 0x10, tt);
    module.w(tt + 0x20, type_size);
    module.w(tt + base_in_type, ot);
    module.w(tt + base_in_type + 8, td);
    module.w(ot + 8, tt);
    module.w(dt + 8, tt);
    module.w(dt + base_in_type, ot);
    module.w(st + 8, tt);
    module.w(st + base_in_type, ot);
    module.w(lt + 8, tt);
    module.w(lt + base_in_type, ot);
    module.w(ptr_table, at);
    module.w(ptr_builtins, bd);

    let mut gc_heads = Vec::new();
    if spec.gc != GcLists::None {
        module.w(gc1, n1);
        module.w(gc1 + 8, n1);
        gc_heads.push(gc1);
    }
    if spec.gc == GcLists::SingleAndCorrupt {
        module.w(gc2, na);
        module.w(gc2 + 8, nb);
        gc_heads.push(gc2);
    }

    let mut heap_mem = Mem::new(heap, 0x4000, word);
    // Descriptor 0 is the live arena; descriptors 1 and 2 are free with
    // null links, ending the walk.
    if aligned {
        // Two free pools sit on the available list, two more never used.
        heap_mem.w(at, arena);
        heap_mem.w(at + 8, arena + 0x3e000);
        heap_mem.u(at + 0x10, 4);
        heap_mem.u(at + 0x14, 64);
        heap_mem.w(at + 0x18, arena + 0x3c000);
    } else {
        heap_mem.w(at, arena);
        heap_mem.w(at + 8, 0xa4_0000);
        heap_mem.u(at + 0x10, 0);
        heap_mem.u(at + 0x14, 63);
    }

    // Meta-type attribute dict with an 8-entry key table; entry 1 is
    // ("__base__", object).
    heap_mem.w(td + 8, dt);
    heap_mem.w(td + 0x18, tk);
    heap_mem.w(tk + 8, 8);
    heap_mem.w(tk + 0x38, 0x1111);
    heap_mem.w(tk + 0x40, bs);
    heap_mem.w(tk + 0x48, ot);
    heap_mem.w(bs + 8, st);
    heap_mem.w(bs + 0x10, 8);
    heap_mem.b(bs + 0x30, b"__base__\0");

    // Builtins dict: five type-valued entries.
    let names: [(&str, u64); 5] = [
        ("type", tt),
        ("object", ot),
        ("dict", dt),
        ("str", st),
        ("list", lt),
    ];
    heap_mem.w(bd + 8, dt);
    heap_mem.w(bd + 0x18, bk);
    heap_mem.w(bk + 8, 8);
    let mut builtins = Vec::new();
    for (i, (name, value)) in names.iter().enumerate() {
        let key_addr = if spec.map_builtin_keys {
            let key_addr = heap + 0x700 + i as u64 * 0x40;
            heap_mem.w(key_addr + 8, st);
            heap_mem.w(key_addr + 0x10, name.len() as u64);
            heap_mem.b(key_addr + 0x30, name.as_bytes());
            key_addr
        } else {
            V3_UNMAPPED_KEYS + i as u64 * 0x40
        };
        let triple = bk + 0x20 + i as u64 * 0x18;
        heap_mem.w(triple, 0x10 + i as u64);
        heap_mem.w(triple + 8, key_addr);
        heap_mem.w(triple + 0x10, *value);
        builtins.push((*name, key_addr, *value));
    }

    // GC nodes: heap types follow a three-word header. The first carries a
    // recognizable cached key table; the corrupt list's second node has a
    // poisoned back link.
    let t1 = n1 + 0x18;
    let ta = na + 0x18;
    let tb = nb + 0x18;
    if spec.gc != GcLists::None {
        heap_mem.w(n1, gc1);
        heap_mem.w(n1 + 8, gc1);
        heap_mem.w(t1 + 8, tt);
        heap_mem.w(t1 + 0x140, ko);
        heap_mem.w(ko, 1);
        heap_mem.w(ko + 8, 8);
        heap_mem.w(ko + 0x18, 7);
        heap_mem.w(ko + 0x20, 5);
    }
    if spec.gc == GcLists::SingleAndCorrupt {
        heap_mem.w(na, nb);
        heap_mem.w(na + 8, gc2);
        heap_mem.w(ta + 8, tt);
        heap_mem.w(nb, gc2);
        heap_mem.w(nb + 8, 0xdead000);
        heap_mem.w(tb + 8, tt);
    }

    // One in-use pool whose first block is typed; the free pools on the
    // available list are linked through their third word.
    let arena_region_base = arena & !0xfff;
    let mut arena_mem = Mem::new(arena_region_base, 0x40000, word);
    let pool = (arena + 0xfff) & !0xfff;
    arena_mem.u(pool, 1);
    arena_mem.u(pool + 0x2c, 0x1000 - 0x40);
    arena_mem.w(pool + 0x38, tt);
    if aligned {
        arena_mem.w(arena + 0x3c000 + 0x10, arena + 0x3d000);
    }

    let mut builder = DumpBuilder::new(word);
    builder.mem(module, "rw-p");
    builder.mem(heap_mem, "rw-p");
    builder.mem(arena_mem, "rw-p");
    // The module directory underreports the data segment; the map knows
    // the true extent.
    builder.module(
        "/usr/lib/libpython3.10.so",
        mb,
        V3_MODULE_DIR_LIMIT,
        "rw-p",
    );
    if let Some(exe) = spec.exe_path {
        builder.module(exe, 0x70_0000, 0x70_1000, "rw-p");
    }
    let (map, modules) = builder.build();

    V3Dump {
        map,
        modules,
        arena,
        arena_table: at,
        type_type: tt,
        object_type: ot,
        dict_type: dt,
        str_type: st,
        list_type: lt,
        builtins,
        gc_heads,
        heap_type: t1,
        second_heap_type: ta,
        abandoned_heap_type: tb,
    }
}

const V2_MODULE_BASE: u64 = 0x50_0000;
const V2_MODULE_LIMIT: u64 = 0x50_3000;
const V2_HEAP_BASE: u64 = 0x80_0000;

pub const V2_ARENA_LOW: u64 = 0xa0_0000;
pub const V2_ARENA_HIGH: u64 = 0xa8_0000;

pub struct V2Dump {
    pub map: VirtualAddressMap,
    pub modules: ModuleDirectory,
    pub arena_table: u64,
    pub type_type: u64,
    pub object_type: u64,
    pub dict_type: u64,
    pub str_type: u64,
    pub cell_type: u64,
    /// (name, key string address, type object address)
    pub builtins: Vec<(&'static str, u64, u64)>,
    pub gc_head: u64,
    pub heap_type: u64,
}

/// Assemble a 32-bit dump in the legacy layout: two active arenas separated
/// by a free descriptor, a modules dict leading to the builtins dict, and
/// one single-node GC list.
pub fn v2_dump() -> V2Dump {
    let word = WordSize::U32;
    let mb = V2_MODULE_BASE;
    let heap = V2_HEAP_BASE;

    let tt = mb + 0x400;
    let ot = mb + 0x600;
    let dt = mb + 0x700;
    let st = mb + 0x800;
    let ct = mb + 0x900;
    let ptr_table = mb + 0x2100;
    let ptr_modules = mb + 0x2200;
    let gc1 = mb + 0x2400;

    let at = heap;
    let td = heap + 0x100;
    let tk = heap + 0x200;
    let bs = heap + 0x400;
    let md = heap + 0x500;
    let mk = heap + 0x600;
    let sb = heap + 0x700;
    let bd = heap + 0x800;
    let bk = heap + 0x900;
    let n1 = heap + 0x1000;

    let type_size = 0xc0u64;
    let base_in_type = 0x60u64;

    let mut module = Mem::new(mb, 0x3000, word);
    module.w(tt + 4, tt);
    module.w(tt + 8, tt);
    module.w(tt + 0x10, type_size);
    module.w(tt + base_in_type, ot);
    module.w(tt + base_in_type + 4, td);
    module.w(ot + 4, tt);
    module.w(dt + 4, tt);
    module.w(dt + base_in_type, ot);
    module.w(st + 4, tt);
    module.w(st + base_in_type, ot);
    // A legacy no-base type, recognized through its getset table.
    module.w(ct + 4, tt);
    module.w(ct + base_in_type - 4, mb + 0x10);
    module.w(ptr_table, at);
    module.w(ptr_modules, md);
    module.w(gc1, n1);
    module.w(gc1 + 4, n1);

    let mut heap_mem = Mem::new(heap, 0x4000, word);
    // Descriptors at 28-byte stride: high arena, free, low arena, free.
    let stride = 0x1c;
    heap_mem.w(at, V2_ARENA_HIGH);
    heap_mem.w(at + 4, V2_ARENA_HIGH + 0x40000);
    heap_mem.u(at + 8, 0);
    heap_mem.u(at + 12, 64);
    heap_mem.w(at + 2 * stride, V2_ARENA_LOW);
    heap_mem.w(at + 2 * stride + 4, V2_ARENA_LOW + 0x40000);
    heap_mem.u(at + 2 * stride + 8, 0);
    heap_mem.u(at + 2 * stride + 12, 64);

    // Meta-type dict: mask-based capacity, triples directly in the key table.
    heap_mem.w(td + 4, dt);
    heap_mem.w(td + 0x10, 7);
    heap_mem.w(td + 0x14, tk);
    heap_mem.w(tk + 0xc, 0x11);
    heap_mem.w(tk + 0x10, bs);
    heap_mem.w(tk + 0x14, ot);
    heap_mem.w(bs + 4, st);
    heap_mem.w(bs + 8, 8);
    heap_mem.b(bs + 0x24, b"__base__\0");

    // Modules dict: one entry, "__builtin__" -> builtins dict.
    heap_mem.w(md + 4, dt);
    heap_mem.w(md + 0x10, 3);
    heap_mem.w(md + 0x14, mk);
    heap_mem.w(mk + 0xc, 0x77);
    heap_mem.w(mk + 0x10, sb);
    heap_mem.w(mk + 0x14, bd);
    heap_mem.w(sb + 4, st);
    heap_mem.w(sb + 8, 11);
    heap_mem.b(sb + 0x24, b"__builtin__\0");

    let names: [(&str, u64); 5] = [
        ("type", tt),
        ("object", ot),
        ("dict", dt),
        ("str", st),
        ("cell", ct),
    ];
    heap_mem.w(bd + 4, dt);
    heap_mem.w(bd + 0x10, 7);
    heap_mem.w(bd + 0x14, bk);
    let mut builtins = Vec::new();
    for (i, (name, value)) in names.iter().enumerate() {
        let key_addr = heap + 0xa00 + i as u64 * 0x40;
        heap_mem.w(key_addr + 4, st);
        heap_mem.w(key_addr + 8, name.len() as u64);
        heap_mem.b(key_addr + 0x24, name.as_bytes());
        let triple = bk + i as u64 * 0xc;
        heap_mem.w(triple, 0x20 + i as u64);
        heap_mem.w(triple + 4, key_addr);
        heap_mem.w(triple + 8, *value);
        builtins.push((*name, key_addr, *value));
    }

    // Single-node GC list; the tracked object follows a four-word header.
    let t1 = n1 + 0x10;
    heap_mem.w(n1, gc1);
    heap_mem.w(n1 + 4, gc1);
    heap_mem.w(t1 + 4, tt);

    // Both arenas fully used: 64 aligned pools each. Only the low arena's
    // first pool carries the anchor block.
    let mut low_arena = Mem::new(V2_ARENA_LOW, 0x40000, word);
    low_arena.u(V2_ARENA_LOW, 1);
    low_arena.u(V2_ARENA_LOW + 0x2c, 0x1000 - 0x40);
    low_arena.w(V2_ARENA_LOW + 0x34, tt);
    let high_arena = Mem::new(V2_ARENA_HIGH, 0x40000, word);

    let mut builder = DumpBuilder::new(word);
    builder.mem(module, "rw-p");
    builder.mem(heap_mem, "rw-p");
    builder.mem(low_arena, "rw-p");
    builder.mem(high_arena, "rw-p");
    builder.module("/usr/lib/libpython2.7.so", mb, V2_MODULE_LIMIT, "rw-p");
    let (map, modules) = builder.build();

    V2Dump {
        map,
        modules,
        arena_table: at,
        type_type: tt,
        object_type: ot,
        dict_type: dt,
        str_type: st,
        cell_type: ct,
        builtins,
        gc_head: gc1,
        heap_type: t1,
    }
}
