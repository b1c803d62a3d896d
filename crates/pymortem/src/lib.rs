//! # pymortem
//!
//! Post-mortem discovery of a Python runtime's private allocator metadata and
//! fundamental type objects from a core dump, without debug symbols.
//!
//! Given a virtual-address map of the dump and a directory of loaded modules,
//! the resolver locates the interpreter's arena descriptor table, derives the
//! pool/arena geometry, finds the self-referential meta-type (and with it the
//! `object`, `dict` and `str` type objects), enumerates statically and
//! dynamically allocated types, and records every non-empty garbage-collection
//! tracking list.
//!
//! ## Example
//!
//! ```no_run
//! use pymortem::{CoreDump, Resolver, TypeDirectory, VirtualMemoryPartition};
//!
//! # fn main() -> Result<(), pymortem::DumpError> {
//! let dump = CoreDump::open("core.4242", "core.4242.maps")?;
//! let mut partition = VirtualMemoryPartition::new(&dump.map);
//! let mut types = TypeDirectory::new();
//!
//! let mut resolver = Resolver::new(&dump.modules, &mut partition, &mut types);
//! resolver.resolve();
//!
//! println!("pool size: {:#x}", resolver.pool_size());
//! println!("meta-type at {:#x}", resolver.type_type());
//! for (addr, name) in types.iter() {
//!     println!("{addr:#x} {name}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod map;
pub mod modules;
pub mod partition;
pub mod python;
pub mod typedir;

pub use map::{CoreDump, DumpError, MappedRange, Reader, VirtualAddressMap, WordSize};
pub use modules::{Module, ModuleDirectory, ModuleRange};
pub use partition::{Claim, VirtualMemoryPartition};
pub use python::{MajorVersion, Resolver, UNKNOWN_OFFSET};
pub use typedir::TypeDirectory;
