//! Directories. A directory is an ordinary file whose content is a fixed
//! table of [`DirEntry`] slots; deletion tombstones a slot in place and the
//! table never grows. The type bit takes part in lookups, so a file and a
//! directory may share a name within one parent.

use log::debug;

use crate::bitmap::FreeMap;
use crate::block_cache::SectorIo;
use crate::file::OpenFile;
use crate::layout::{DirEntry, FileHeader};
use crate::{DIR_ENTRY_SIZE, DIR_TABLE_BYTES, NUM_DIR_ENTRIES};

pub struct Directory {
    table: Vec<DirEntry>,
}

impl Directory {
    /// An empty table of [`NUM_DIR_ENTRIES`] slots.
    pub fn new() -> Self {
        Self {
            table: (0..NUM_DIR_ENTRIES).map(|_| DirEntry::empty()).collect(),
        }
    }

    /// Bulk-read the table from the directory's backing file.
    pub fn fetch_from(file: &OpenFile) -> Self {
        let mut buf = [0u8; DIR_TABLE_BYTES];
        assert_eq!(
            file.read_at(0, &mut buf),
            DIR_TABLE_BYTES,
            "directory file shorter than its table"
        );
        Self {
            table: buf.chunks_exact(DIR_ENTRY_SIZE).map(DirEntry::parse).collect(),
        }
    }

    /// Bulk-write the table into the directory's backing file.
    pub fn write_back(&self, file: &mut OpenFile) {
        let mut buf = [0u8; DIR_TABLE_BYTES];
        for (slot, entry) in buf.chunks_exact_mut(DIR_ENTRY_SIZE).zip(&self.table) {
            entry.write_to(slot);
        }
        assert_eq!(
            file.write_at(0, &buf),
            DIR_TABLE_BYTES,
            "directory file shorter than its table"
        );
    }

    /// Header sector of the entry called `name` with the given type, if
    /// present.
    pub fn find(&self, name: &str, is_dir: bool) -> Option<u32> {
        self.table
            .iter()
            .find(|entry| entry.in_use() && entry.is_dir() == is_dir && entry.name() == name)
            .map(DirEntry::sector)
    }

    /// Record `name` in the first free slot, reusing tombstones. Fails on
    /// a same-type duplicate or a full table.
    pub fn add(&mut self, name: &str, sector: u32, is_dir: bool) -> bool {
        if self.find(name, is_dir).is_some() {
            return false;
        }
        match self.table.iter_mut().find(|entry| !entry.in_use()) {
            Some(slot) => {
                *slot = DirEntry::new(name, sector, is_dir);
                true
            }
            None => false,
        }
    }

    /// Tombstone the entry called `name` with the given type. The entry's
    /// sectors are the caller's to free.
    pub fn remove(&mut self, name: &str, is_dir: bool) -> bool {
        match self
            .table
            .iter_mut()
            .find(|entry| entry.in_use() && entry.is_dir() == is_dir && entry.name() == name)
        {
            Some(entry) => {
                entry.clear();
                true
            }
            None => false,
        }
    }

    /// Free everything reachable from this directory and tombstone every
    /// entry. Subdirectories are emptied before their own sectors go back
    /// to the map. The directory's own sectors stay allocated.
    pub fn remove_all(&mut self, io: &SectorIo, free_map: &mut FreeMap) {
        for entry in self.table.iter_mut().filter(|entry| entry.in_use()) {
            debug!("recursively removing {}", entry.name());
            let mut header = if entry.is_dir() {
                let file = OpenFile::open(io.clone(), entry.sector());
                let mut sub = Directory::fetch_from(&file);
                sub.remove_all(io, free_map);
                file.into_header()
            } else {
                FileHeader::fetch_from(io, entry.sector())
            };
            header.deallocate(free_map);
            assert!(
                free_map.test(entry.sector()),
                "directory entry points at a sector the map says is free"
            );
            free_map.clear(entry.sector());
            entry.clear();
        }
    }

    /// Names of the live entries, in table order.
    pub fn list(&self) -> Vec<String> {
        self.table
            .iter()
            .filter(|entry| entry.in_use())
            .map(|entry| entry.name().to_owned())
            .collect()
    }

    /// Append one line per reachable entry to `out`, in table order, two
    /// spaces of indent per level, directories suffixed with `/`.
    pub fn recursively_list(&self, io: &SectorIo, depth: usize, out: &mut Vec<String>) {
        for entry in self.table.iter().filter(|entry| entry.in_use()) {
            let mut line = "  ".repeat(depth);
            line.push_str(entry.name());
            if entry.is_dir() {
                line.push('/');
            }
            out.push(line);
            if entry.is_dir() {
                let sub = Directory::fetch_from(&OpenFile::open(io.clone(), entry.sector()));
                sub.recursively_list(io, depth + 1, out);
            }
        }
    }

}

impl Default for Directory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_lookup_keeps_files_and_dirs_apart() {
        let mut dir = Directory::new();
        assert!(dir.add("x", 5, false));
        assert!(dir.add("x", 6, true));
        assert_eq!(dir.find("x", false), Some(5));
        assert_eq!(dir.find("x", true), Some(6));
        assert!(!dir.add("x", 7, false), "same-type duplicate");
    }

    #[test]
    fn remove_tombstones_and_add_reuses_the_slot() {
        let mut dir = Directory::new();
        for i in 0..NUM_DIR_ENTRIES {
            assert!(dir.add(&format!("f{i}"), i as u32 + 2, false));
        }
        assert!(!dir.add("late", 99, false), "table is full");
        assert!(dir.remove("f3", false));
        assert!(!dir.remove("f3", false), "already gone");
        assert!(dir.add("late", 99, false));
        assert_eq!(dir.find("late", false), Some(99));
        assert_eq!(dir.list().len(), NUM_DIR_ENTRIES);
    }

    #[test]
    fn list_preserves_table_order() {
        let mut dir = Directory::new();
        dir.add("b", 2, false);
        dir.add("a", 3, true);
        assert_eq!(dir.list(), ["b", "a"]);
    }
}
