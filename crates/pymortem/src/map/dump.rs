//! Core Dump Loading
//!
//! Loads a raw core file plus a maps sidecar into a [`VirtualAddressMap`]
//! and a [`ModuleDirectory`]. Two sidecar formats are accepted:
//!
//! - Linux `/proc/pid/maps` lines: `START-END PERMS OFFSET DEV INODE [PATH]`
//! - a bare range format: `0xSTART 0xEND SIZE FILE_OFFSET`
//!
//! Unparseable lines are skipped; ranges whose bytes fall outside the core
//! file are kept without an image (the usual shape of a truncated dump).

use memmap2::Mmap;
use std::fs::File;
use std::path::{Path, PathBuf};

use super::{MappedRange, VirtualAddressMap, WordSize};
use crate::modules::ModuleDirectory;

/// Errors raised while loading a dump from disk.
#[derive(Debug, thiserror::Error)]
pub enum DumpError {
    #[error("failed to open {path:?}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to mmap {path:?}")]
    Mmap {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("maps file {path:?} describes no mapped ranges")]
    EmptyMaps { path: PathBuf },
}

/// One parsed maps-file line.
#[derive(Debug, Clone, PartialEq, Eq)]
struct MapsRecord {
    start: u64,
    end: u64,
    perms: String,
    file_offset: u64,
    path: Option<String>,
}

/// A core file loaded into memory together with its module directory.
pub struct CoreDump {
    pub map: VirtualAddressMap,
    pub modules: ModuleDirectory,
}

impl CoreDump {
    /// Open a core file with its maps sidecar, inferring the pointer width
    /// from the address magnitudes.
    pub fn open<P: AsRef<Path>>(core_path: P, maps_path: P) -> Result<Self, DumpError> {
        let maps_path = maps_path.as_ref();
        let text = std::fs::read_to_string(maps_path).map_err(|source| DumpError::Open {
            path: maps_path.to_path_buf(),
            source,
        })?;
        let records = parse_maps_text(&text);
        if records.is_empty() {
            return Err(DumpError::EmptyMaps {
                path: maps_path.to_path_buf(),
            });
        }
        let word = infer_word_size(&records);
        Self::from_records(core_path.as_ref(), records, word)
    }

    /// As [`CoreDump::open`], with an explicit pointer width.
    pub fn open_with_word<P: AsRef<Path>>(
        core_path: P,
        maps_path: P,
        word: WordSize,
    ) -> Result<Self, DumpError> {
        let maps_path = maps_path.as_ref();
        let text = std::fs::read_to_string(maps_path).map_err(|source| DumpError::Open {
            path: maps_path.to_path_buf(),
            source,
        })?;
        Self::from_records(core_path.as_ref(), parse_maps_text(&text), word)
    }

    fn from_records(
        core_path: &Path,
        records: Vec<MapsRecord>,
        word: WordSize,
    ) -> Result<Self, DumpError> {
        let file = File::open(core_path).map_err(|source| DumpError::Open {
            path: core_path.to_path_buf(),
            source,
        })?;
        // Safety: the mapping is private and read-only; the file is a dump
        // artifact, not expected to be concurrently rewritten.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|source| DumpError::Mmap {
            path: core_path.to_path_buf(),
            source,
        })?;

        let mut ranges = Vec::with_capacity(records.len());
        let mut modules = ModuleDirectory::new();
        for record in records {
            if record.end <= record.start {
                continue;
            }
            let size = record.end - record.start;
            let lo = usize::try_from(record.file_offset).ok();
            let hi = lo.and_then(|lo| lo.checked_add(size as usize));
            let data = match (lo, hi) {
                (Some(lo), Some(hi)) if hi <= mmap.len() => Some(mmap[lo..hi].to_vec()),
                _ => None,
            };
            ranges.push(MappedRange {
                base: record.start,
                limit: record.end,
                perms: record.perms.clone(),
                data,
            });
            if let Some(path) = record.path {
                modules.add_range(&path, record.start, record.end, &record.perms);
            }
        }
        modules.resolve();

        Ok(CoreDump {
            map: VirtualAddressMap::new(word, ranges),
            modules,
        })
    }
}

fn infer_word_size(records: &[MapsRecord]) -> WordSize {
    if records.iter().any(|r| r.end > u32::MAX as u64) {
        WordSize::U64
    } else {
        WordSize::U32
    }
}

fn parse_maps_text(text: &str) -> Vec<MapsRecord> {
    text.lines().filter_map(parse_maps_line).collect()
}

fn parse_maps_line(line: &str) -> Option<MapsRecord> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let parts: Vec<&str> = line.split_whitespace().collect();

    if parts[0].starts_with("0x") {
        // Bare range format: 0xSTART 0xEND SIZE FILE_OFFSET
        if parts.len() < 4 {
            return None;
        }
        let start = u64::from_str_radix(parts[0].trim_start_matches("0x"), 16).ok()?;
        let end = u64::from_str_radix(parts[1].trim_start_matches("0x"), 16).ok()?;
        let file_offset = u64::from_str_radix(parts[3].trim_start_matches("0x"), 16).ok()?;
        return Some(MapsRecord {
            start,
            end,
            perms: "rw-p".to_string(),
            file_offset,
            path: None,
        });
    }

    // /proc/pid/maps format
    let (start_text, end_text) = parts[0].split_once('-')?;
    let start = u64::from_str_radix(start_text, 16).ok()?;
    let end = u64::from_str_radix(end_text, 16).ok()?;
    let perms = parts.get(1)?.to_string();
    let file_offset = parts
        .get(2)
        .and_then(|s| u64::from_str_radix(s, 16).ok())
        .unwrap_or(0);
    let path = parts.get(5).map(|s| s.to_string());
    Some(MapsRecord {
        start,
        end,
        perms,
        file_offset,
        path,
    })
}
