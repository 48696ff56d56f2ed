//! The file-system façade: format/mount, path resolution, the create /
//! mkdir / open / remove / list operations, and the fixed open-file
//! descriptor table with its `-1`-sentinel shim.
//!
//! Every mutation fetches the free map and the directories it needs,
//! changes them in memory, and only starts writing once the last fallible
//! step has passed; a failed operation leaves the disk untouched. Writes
//! land in header → directory → free-map order and are flushed before the
//! operation returns.

use std::sync::Arc;

use log::{debug, info};

use crate::bitmap::FreeMap;
use crate::block_cache::SectorIo;
use crate::block_dev::BlockDevice;
use crate::directory::Directory;
use crate::error::{FsError, Result};
use crate::file::OpenFile;
use crate::layout::{level_for, FileHeader};
use crate::{
    DIR_TABLE_BYTES, FILE_OPEN_LIMIT, FREE_MAP_SECTOR, PATH_NAME_MAX_LEN, ROOT_DIR_SECTOR,
    SECTOR_SIZE,
};

/// Byte length of the free-map file for a disk of `num_sectors` sectors.
fn free_map_bytes(num_sectors: usize) -> usize {
    num_sectors.div_ceil(8)
}

/// Outcome of a path walk: the terminal component's header sector, the
/// directory it was found in (`None` for the root itself), and its name.
struct Resolved<'a> {
    sector: u32,
    parent: Option<u32>,
    name: &'a str,
}

/// Header facts for one path, for inspection and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderStat {
    pub length: usize,
    pub data_sectors: usize,
    pub level: usize,
    pub child_sectors: Vec<u32>,
}

pub struct FileSystem {
    io: SectorIo,
    num_sectors: usize,
    /// The two system files stay open for the life of the mount.
    free_map_file: OpenFile,
    root_dir_file: OpenFile,
    open_files: [Option<OpenFile>; FILE_OPEN_LIMIT],
}

impl FileSystem {
    /// Mount the file system on `device`, formatting it first when asked.
    pub fn new(device: Arc<dyn BlockDevice>, num_sectors: usize, format: bool) -> Result<Self> {
        let io = SectorIo::new(device);
        if format {
            Self::format(&io, num_sectors)?;
        }
        let free_map_file = OpenFile::open(io.clone(), FREE_MAP_SECTOR);
        let root_dir_file = OpenFile::open(io.clone(), ROOT_DIR_SECTOR);
        info!("mounted: {num_sectors} sectors of {SECTOR_SIZE} bytes");
        Ok(Self {
            io,
            num_sectors,
            free_map_file,
            root_dir_file,
            open_files: std::array::from_fn(|_| None),
        })
    }

    /// Lay down an empty file system: the reserved headers at sectors 0
    /// and 1, then the free-map and root-directory contents behind them.
    fn format(io: &SectorIo, num_sectors: usize) -> Result<()> {
        info!("formatting: {num_sectors} sectors");
        let mut free_map = FreeMap::new(num_sectors);
        free_map.mark(FREE_MAP_SECTOR);
        free_map.mark(ROOT_DIR_SECTOR);
        let map_header = FileHeader::allocate(&mut free_map, free_map_bytes(num_sectors))?;
        let dir_header = FileHeader::allocate(&mut free_map, DIR_TABLE_BYTES)?;
        // The headers must be on disk before the two system files can be
        // opened.
        map_header.write_back(io, FREE_MAP_SECTOR);
        dir_header.write_back(io, ROOT_DIR_SECTOR);
        let mut free_map_file = OpenFile::open(io.clone(), FREE_MAP_SECTOR);
        let mut root_dir_file = OpenFile::open(io.clone(), ROOT_DIR_SECTOR);
        Directory::new().write_back(&mut root_dir_file);
        free_map.write_back(&mut free_map_file);
        io.sync_all();
        Ok(())
    }

    /// Create a file of fixed `size` bytes at `path`.
    pub fn create(&mut self, path: &str, size: usize) -> Result<()> {
        debug!("create {path} ({size} bytes)");
        self.create_entry(path, false, size)
    }

    /// Create an empty directory at `path`.
    pub fn mkdir(&mut self, path: &str) -> Result<()> {
        debug!("mkdir {path}");
        self.create_entry(path, true, DIR_TABLE_BYTES)
    }

    fn create_entry(&mut self, path: &str, is_dir: bool, size: usize) -> Result<()> {
        if level_for(size).is_none() {
            return Err(FsError::TooLarge);
        }
        let (parent_sector, name) = self.resolve_parent(path)?;
        let mut parent = self.fetch_dir(parent_sector);
        // creation refuses a name present as either type
        if parent.find(name, false).is_some() || parent.find(name, true).is_some() {
            return Err(FsError::Exists);
        }
        let mut free_map = FreeMap::fetch_from(&self.free_map_file, self.num_sectors);
        let header_sector = free_map.find_and_set().ok_or(FsError::NoSpace)?;
        let header = FileHeader::allocate(&mut free_map, size)?;
        if !parent.add(name, header_sector, is_dir) {
            // nothing has been written; the dirtied in-memory map is
            // simply discarded
            return Err(FsError::DirFull);
        }
        header.write_back(&self.io, header_sector);
        if is_dir {
            let mut new_dir_file = OpenFile::open(self.io.clone(), header_sector);
            Directory::new().write_back(&mut new_dir_file);
        }
        self.write_dir(parent_sector, &parent);
        free_map.write_back(&mut self.free_map_file);
        self.io.sync_all();
        Ok(())
    }

    /// Open `path`, trying a file first and then a directory.
    pub fn open(&self, path: &str) -> Result<OpenFile> {
        let found = self
            .resolve(path, false)
            .or_else(|_| self.resolve(path, true))?;
        Ok(OpenFile::open(self.io.clone(), found.sector))
    }

    /// Remove `path`. Without `recursive` the path must name a file; with
    /// it, a directory is emptied bottom-up and then unlinked from its
    /// parent (the root is only emptied).
    pub fn remove(&mut self, path: &str, recursive: bool) -> Result<()> {
        if recursive {
            self.remove_recursive(path)
        } else {
            self.remove_file(path)
        }
    }

    fn remove_file(&mut self, path: &str) -> Result<()> {
        let found = self.resolve(path, false)?;
        let parent_sector = found.parent.ok_or(FsError::NotFound)?;
        let mut free_map = FreeMap::fetch_from(&self.free_map_file, self.num_sectors);
        Self::return_sectors(&self.io, &mut free_map, found.sector);
        let mut parent = self.fetch_dir(parent_sector);
        assert!(parent.remove(found.name, false), "resolved entry vanished");
        self.write_dir(parent_sector, &parent);
        free_map.write_back(&mut self.free_map_file);
        self.io.sync_all();
        debug!("removed file {path}");
        Ok(())
    }

    fn remove_recursive(&mut self, path: &str) -> Result<()> {
        let found = match self.resolve(path, true) {
            Ok(found) => found,
            // not a directory: fall back to plain file removal
            Err(FsError::NotFound) => return self.remove_file(path),
            Err(other) => return Err(other),
        };
        let mut free_map = FreeMap::fetch_from(&self.free_map_file, self.num_sectors);
        let mut dir = self.fetch_dir(found.sector);
        dir.remove_all(&self.io, &mut free_map);
        match found.parent {
            Some(parent_sector) => {
                Self::return_sectors(&self.io, &mut free_map, found.sector);
                let mut parent = self.fetch_dir(parent_sector);
                assert!(parent.remove(found.name, true), "resolved entry vanished");
                self.write_dir(parent_sector, &parent);
            }
            None => {
                // the root directory itself survives, emptied
                self.write_dir(found.sector, &dir);
            }
        }
        free_map.write_back(&mut self.free_map_file);
        self.io.sync_all();
        debug!("recursively removed {path}");
        Ok(())
    }

    /// Enumerate the directory at `path`, one line per entry. The
    /// recursive form indents two spaces per level and suffixes
    /// directories with `/`; both forms keep table order.
    pub fn list(&self, path: &str, recursive: bool) -> Result<Vec<String>> {
        let found = self.resolve(path, true)?;
        let dir = self.fetch_dir(found.sector);
        if recursive {
            let mut lines = Vec::new();
            dir.recursively_list(&self.io, 0, &mut lines);
            Ok(lines)
        } else {
            Ok(dir.list())
        }
    }

    /// Inspect the header behind `path` (file first, then directory).
    pub fn stat(&self, path: &str) -> Result<HeaderStat> {
        let found = self
            .resolve(path, false)
            .or_else(|_| self.resolve(path, true))?;
        let header = FileHeader::fetch_from(&self.io, found.sector);
        Ok(HeaderStat {
            length: header.len(),
            data_sectors: header.num_data_sectors(),
            level: header.level(),
            child_sectors: header.child_sectors().to_vec(),
        })
    }

    /// Sectors still unallocated on the disk.
    pub fn num_free_sectors(&self) -> usize {
        FreeMap::fetch_from(&self.free_map_file, self.num_sectors).num_clear()
    }

    // ---- the open-file descriptor table (syscall shim) ----
    //
    // The shim keeps the classic contract: ids are small integers, every
    // failure is -1, and the kinds behind a failure only show up in the
    // log.

    /// Open `path` into the descriptor table. Returns the new id, or -1
    /// when the table is full or the path does not resolve.
    pub fn open_file(&mut self, path: &str) -> i32 {
        let Some(slot) = self.open_files.iter().position(Option::is_none) else {
            debug!("open {path}: descriptor table full");
            return -1;
        };
        match self.open(path) {
            Ok(file) => {
                self.open_files[slot] = Some(file);
                slot as i32
            }
            Err(err) => {
                debug!("open {path}: {err}");
                -1
            }
        }
    }

    /// Read up to `buf.len()` bytes at the descriptor's seek position,
    /// advancing it. Returns the byte count, or -1 for a bad id.
    pub fn read_file(&mut self, id: i32, buf: &mut [u8]) -> i32 {
        match self.handle_mut(id) {
            Some(file) => file.read(buf) as i32,
            None => -1,
        }
    }

    /// Write `buf` at the descriptor's seek position, advancing it.
    /// Returns the byte count, or -1 for a bad id.
    pub fn write_file(&mut self, id: i32, buf: &[u8]) -> i32 {
        match self.handle_mut(id) {
            Some(file) => file.write(buf) as i32,
            None => -1,
        }
    }

    /// Close a descriptor. Returns 1, or -1 for a bad id.
    pub fn close_file(&mut self, id: i32) -> i32 {
        if self.handle_mut(id).is_none() {
            return -1;
        }
        self.open_files[id as usize] = None;
        1
    }

    fn handle_mut(&mut self, id: i32) -> Option<&mut OpenFile> {
        usize::try_from(id)
            .ok()
            .filter(|&index| index < FILE_OPEN_LIMIT)
            .and_then(|index| self.open_files[index].as_mut())
    }

    // ---- path resolution ----

    /// Split an absolute path into components, rejecting over-long paths.
    /// Empty components collapse, so `/d/` equals `/d`.
    fn split_path(path: &str) -> Result<Vec<&str>> {
        if path.len() >= PATH_NAME_MAX_LEN {
            return Err(FsError::PathTooLong);
        }
        if !path.starts_with('/') {
            return Err(FsError::NotFound);
        }
        Ok(path.split('/').filter(|part| !part.is_empty()).collect())
    }

    /// Walk `path` expecting the terminal component to carry the given
    /// type; every earlier component must be a directory.
    fn resolve<'a>(&self, path: &'a str, is_dir: bool) -> Result<Resolved<'a>> {
        let parts = Self::split_path(path)?;
        if parts.is_empty() {
            // the root itself
            return if is_dir {
                Ok(Resolved {
                    sector: ROOT_DIR_SECTOR,
                    parent: None,
                    name: "",
                })
            } else {
                Err(FsError::NotFound)
            };
        }
        let mut parent = ROOT_DIR_SECTOR;
        let mut sector = ROOT_DIR_SECTOR;
        for (depth, &name) in parts.iter().enumerate() {
            let dir = self.fetch_dir(sector);
            let want_dir = if depth == parts.len() - 1 { is_dir } else { true };
            parent = sector;
            sector = dir.find(name, want_dir).ok_or(FsError::NotFound)?;
        }
        Ok(Resolved {
            sector,
            parent: Some(parent),
            name: parts[parts.len() - 1],
        })
    }

    /// Resolve all but the terminal component, for creation: the parent
    /// directory's header sector plus the leaf name.
    fn resolve_parent<'a>(&self, path: &'a str) -> Result<(u32, &'a str)> {
        let parts = Self::split_path(path)?;
        let Some((&leaf, dirs)) = parts.split_last() else {
            // the path names the root, which always exists
            return Err(FsError::Exists);
        };
        let mut sector = ROOT_DIR_SECTOR;
        for &name in dirs {
            let dir = self.fetch_dir(sector);
            sector = dir.find(name, true).ok_or(FsError::NotFound)?;
        }
        Ok((sector, leaf))
    }

    /// Fetch the directory table at `sector`. The root reads through its
    /// always-open file; any other directory is opened for the call.
    fn fetch_dir(&self, sector: u32) -> Directory {
        if sector == ROOT_DIR_SECTOR {
            Directory::fetch_from(&self.root_dir_file)
        } else {
            Directory::fetch_from(&OpenFile::open(self.io.clone(), sector))
        }
    }

    /// Write a directory table back to `sector`, the root through its
    /// always-open file.
    fn write_dir(&mut self, sector: u32, dir: &Directory) {
        if sector == ROOT_DIR_SECTOR {
            dir.write_back(&mut self.root_dir_file);
        } else {
            dir.write_back(&mut OpenFile::open(self.io.clone(), sector));
        }
    }

    /// Give a removed object's sectors back: the header sector itself,
    /// then everything below the header.
    fn return_sectors(io: &SectorIo, free_map: &mut FreeMap, header_sector: u32) {
        assert!(
            free_map.test(header_sector),
            "removing a sector the map says is free"
        );
        free_map.clear(header_sector);
        let mut header = FileHeader::fetch_from(io, header_sector);
        header.deallocate(free_map);
    }
}
