//! Python Runtime Discovery
//!
//! Reverse-engineers the interpreter's allocator metadata and type
//! infrastructure from a dump:
//!
//! - identify the `libpython` library and `python` executable modules and a
//!   tentative major version
//! - locate the arena descriptor table by scanning module data for a pointer
//!   whose target survives a geometry self-consistency ladder
//! - derive pool and arena geometry, enumerate active arenas, claim them
//! - find the self-referential meta-type inside the first arena's pools and
//!   anchor the `object`, `dict` and `str` type objects from it
//! - calibrate dictionary and string field offsets for the detected version
//! - harvest statically allocated types and builtin type names
//! - discover non-empty GC tracking lists and the heap types on them
//!
//! All phases run once inside [`Resolver::resolve`]; everything discovered
//! is exposed through read-only accessors afterwards.

mod arenas;
mod builtins;
mod gc;
mod resolver;
#[cfg(test)]
mod testdump;
mod types;
mod version;

pub use resolver::{Resolver, UNKNOWN_OFFSET};
pub use version::MajorVersion;
