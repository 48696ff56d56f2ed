//! On-disk data structures: the file header (one sector per tree node) and
//! the directory entry (one packed 16-byte slot of a directory table).

use crate::bitmap::FreeMap;
use crate::block_cache::SectorIo;
use crate::error::{FsError, Result};
use crate::{
    DIR_ENTRY_SIZE, FILE_NAME_MAX_LEN, INVALID_SECTOR, MAX_SIZE, NUM_DIRECT, SECTOR_SIZE,
};

/// Sectors needed to hold `bytes` bytes of data.
pub(crate) fn sectors_for(bytes: usize) -> usize {
    bytes.div_ceil(SECTOR_SIZE)
}

/// Indirection depth for a file of `size` bytes, or `None` when the size
/// exceeds the largest representable file.
pub fn level_for(size: usize) -> Option<usize> {
    MAX_SIZE.iter().position(|&cap| size <= cap)
}

/// A file header. On disk it occupies exactly one sector: the byte count,
/// the data-sector count, and up to [`NUM_DIRECT`] child sectors, with
/// unused trailing slots set to [`INVALID_SECTOR`]. A level-0 header points
/// straight at data sectors; a deeper header points at child headers, each
/// covering one `MAX_SIZE[level - 1]`-byte chunk of the file, left to right.
///
/// In memory a header also carries its fetched children and a flat
/// logical-to-physical mapping of every leaf data sector in file order.
/// The mapping is derived state, rebuilt by [`FileHeader::allocate`] and
/// [`FileHeader::fetch_from`] and never persisted; it is what makes
/// [`FileHeader::byte_to_sector`] a single lookup.
pub struct FileHeader {
    num_bytes: usize,
    /// In-use child slots: data sectors at level 0, child header sectors
    /// at deeper levels. File order.
    sectors: Vec<u32>,
    /// Fetched child headers, parallel to `sectors`. Empty at level 0.
    children: Vec<FileHeader>,
    /// Leaf data sectors of the whole subtree in file order.
    mapping: Vec<u32>,
}

impl FileHeader {
    /// Build a fresh header for a file body of `size` bytes, taking every
    /// needed sector from `free_map`. The header's own sector is the
    /// caller's to allocate.
    ///
    /// The exact cost (data sectors plus child header sectors) is checked
    /// against the map up front, so a failure leaves the map untouched.
    pub fn allocate(free_map: &mut FreeMap, size: usize) -> Result<Self> {
        let level = level_for(size).ok_or(FsError::TooLarge)?;
        if free_map.num_clear() < Self::total_sectors_level(size, level) {
            return Err(FsError::NoSpace);
        }
        Ok(Self::allocate_level(free_map, size, level))
    }

    fn allocate_level(free_map: &mut FreeMap, size: usize, level: usize) -> Self {
        let mut header = Self {
            num_bytes: size,
            sectors: Vec::new(),
            children: Vec::new(),
            mapping: Vec::new(),
        };
        if level == 0 {
            for _ in 0..sectors_for(size) {
                let sector = free_map
                    .find_and_set()
                    .expect("free map exhausted after the cost pre-check");
                header.sectors.push(sector);
            }
            header.mapping = header.sectors.clone();
        } else {
            let mut remaining = size;
            while remaining > 0 {
                let chunk = remaining.min(MAX_SIZE[level - 1]);
                let sector = free_map
                    .find_and_set()
                    .expect("free map exhausted after the cost pre-check");
                // depth is always re-derived from the byte count, so the
                // child must classify by its own size; a short tail sits
                // shallower than level - 1
                let child = Self::allocate_level(
                    free_map,
                    chunk,
                    level_for(chunk).expect("chunk bounded by a level cap"),
                );
                header.mapping.extend_from_slice(&child.mapping);
                header.sectors.push(sector);
                header.children.push(child);
                remaining -= chunk;
            }
        }
        header
    }

    /// Exact number of sectors a file body of `size` bytes consumes: its
    /// data sectors plus every child header sector below the root header.
    pub fn total_sectors(size: usize) -> usize {
        let level = level_for(size).expect("size exceeds the deepest level");
        Self::total_sectors_level(size, level)
    }

    fn total_sectors_level(size: usize, level: usize) -> usize {
        if level == 0 {
            return sectors_for(size);
        }
        let mut total = 0;
        let mut remaining = size;
        while remaining > 0 {
            let chunk = remaining.min(MAX_SIZE[level - 1]);
            total += 1
                + Self::total_sectors_level(
                    chunk,
                    level_for(chunk).expect("chunk bounded by a level cap"),
                );
            remaining -= chunk;
        }
        total
    }

    /// Return every sector below this header to `free_map`. The header's
    /// own sector is the caller's to clear.
    pub fn deallocate(&mut self, free_map: &mut FreeMap) {
        if self.level() == 0 {
            for &sector in &self.sectors {
                assert!(free_map.test(sector), "freeing a data sector not marked in use");
                free_map.clear(sector);
            }
        } else {
            for (child, &sector) in self.children.iter_mut().zip(&self.sectors) {
                child.deallocate(free_map);
                assert!(free_map.test(sector), "freeing a header sector not marked in use");
                free_map.clear(sector);
            }
        }
        self.num_bytes = 0;
        self.sectors.clear();
        self.children.clear();
        self.mapping.clear();
    }

    /// Read the header stored at `sector`, recursing into child headers
    /// and rebuilding the flat leaf mapping.
    pub fn fetch_from(io: &SectorIo, sector: u32) -> Self {
        let (num_bytes, num_data_sectors, slots) = io.read(sector as usize, |buf| {
            let word =
                |index: usize| i32::from_le_bytes(buf[4 * index..4 * index + 4].try_into().unwrap());
            let slots: Vec<i32> = (2..2 + NUM_DIRECT).map(word).collect();
            (word(0), word(1), slots)
        });
        let num_bytes = usize::try_from(num_bytes).expect("negative byte count on disk");
        let level = level_for(num_bytes).expect("on-disk byte count exceeds the deepest level");
        let mut header = Self {
            num_bytes,
            sectors: Vec::new(),
            children: Vec::new(),
            mapping: Vec::new(),
        };
        for &slot in slots.iter().take_while(|&&slot| slot != INVALID_SECTOR) {
            let child_sector = slot as u32;
            if level == 0 {
                header.mapping.push(child_sector);
            } else {
                let child = Self::fetch_from(io, child_sector);
                header.mapping.extend_from_slice(&child.mapping);
                header.children.push(child);
            }
            header.sectors.push(child_sector);
        }
        assert_eq!(
            header.num_data_sectors(),
            num_data_sectors as usize,
            "stored sector count disagrees with the byte count"
        );
        assert_eq!(header.mapping.len(), header.num_data_sectors());
        header
    }

    /// Write this header (and, below level 0, its children) back to disk.
    /// Leaf data sectors are not touched; file content goes through the
    /// open-file layer.
    pub fn write_back(&self, io: &SectorIo, sector: u32) {
        io.modify(sector as usize, |buf| {
            let mut put = |index: usize, value: i32| {
                buf[4 * index..4 * index + 4].copy_from_slice(&value.to_le_bytes());
            };
            put(0, self.num_bytes as i32);
            put(1, self.num_data_sectors() as i32);
            for slot in 0..NUM_DIRECT {
                put(
                    2 + slot,
                    self.sectors.get(slot).map_or(INVALID_SECTOR, |&s| s as i32),
                );
            }
        });
        if self.level() > 0 {
            for (child, &child_sector) in self.children.iter().zip(&self.sectors) {
                child.write_back(io, child_sector);
            }
        }
    }

    /// Physical sector holding the byte at `offset`.
    pub fn byte_to_sector(&self, offset: usize) -> u32 {
        let logical = offset / SECTOR_SIZE;
        assert!(
            logical < self.mapping.len(),
            "offset {offset} beyond the last data sector"
        );
        self.mapping[logical]
    }

    /// File length in bytes.
    pub fn len(&self) -> usize {
        self.num_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.num_bytes == 0
    }

    /// Count of leaf data sectors the file occupies.
    pub fn num_data_sectors(&self) -> usize {
        sectors_for(self.num_bytes)
    }

    /// Indirection depth of this header.
    pub fn level(&self) -> usize {
        level_for(self.num_bytes).expect("header byte count exceeds the deepest level")
    }

    /// In-use child slots, in file order.
    pub fn child_sectors(&self) -> &[u32] {
        &self.sectors
    }

    /// Fetched child headers. Empty at level 0.
    pub fn children(&self) -> &[FileHeader] {
        &self.children
    }
}

/// One slot of a directory table. Serialized form is [`DIR_ENTRY_SIZE`]
/// bytes: the type bit, the in-use bit, the header sector, then the
/// NUL-terminated name.
#[derive(Clone, Debug)]
pub struct DirEntry {
    is_dir: bool,
    in_use: bool,
    sector: u32,
    name: [u8; FILE_NAME_MAX_LEN + 1],
}

impl DirEntry {
    /// An unused slot.
    pub fn empty() -> Self {
        Self {
            is_dir: false,
            in_use: false,
            sector: 0,
            name: [0; FILE_NAME_MAX_LEN + 1],
        }
    }

    /// A live entry. Names longer than [`FILE_NAME_MAX_LEN`] bytes are cut
    /// at a character boundary, as the table stores fixed-width names.
    pub fn new(name: &str, sector: u32, is_dir: bool) -> Self {
        let mut stored = [0u8; FILE_NAME_MAX_LEN + 1];
        let mut len = 0;
        for ch in name.chars() {
            if len + ch.len_utf8() > FILE_NAME_MAX_LEN {
                break;
            }
            len += ch.encode_utf8(&mut stored[len..]).len();
        }
        Self {
            is_dir,
            in_use: true,
            sector,
            name: stored,
        }
    }

    pub(crate) fn parse(buf: &[u8]) -> Self {
        let mut name = [0u8; FILE_NAME_MAX_LEN + 1];
        name.copy_from_slice(&buf[6..DIR_ENTRY_SIZE]);
        Self {
            is_dir: buf[0] != 0,
            in_use: buf[1] != 0,
            sector: i32::from_le_bytes(buf[2..6].try_into().unwrap()) as u32,
            name,
        }
    }

    pub(crate) fn write_to(&self, buf: &mut [u8]) {
        buf[0] = self.is_dir as u8;
        buf[1] = self.in_use as u8;
        buf[2..6].copy_from_slice(&(self.sector as i32).to_le_bytes());
        buf[6..DIR_ENTRY_SIZE].copy_from_slice(&self.name);
    }

    pub fn name(&self) -> &str {
        let len = self
            .name
            .iter()
            .position(|&byte| byte == 0)
            .unwrap_or(FILE_NAME_MAX_LEN);
        core::str::from_utf8(&self.name[..len]).expect("entry name is not UTF-8")
    }

    pub fn in_use(&self) -> bool {
        self.in_use
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    pub fn sector(&self) -> u32 {
        self.sector
    }

    /// Tombstone this slot.
    pub(crate) fn clear(&mut self) {
        self.in_use = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_dev::BlockDevice;
    use std::sync::Arc;

    struct MemDisk(spin::Mutex<Vec<u8>>);

    impl MemDisk {
        fn new(sectors: usize) -> Arc<Self> {
            Arc::new(Self(spin::Mutex::new(vec![0; sectors * SECTOR_SIZE])))
        }

        fn sector(&self, id: usize) -> Vec<u8> {
            self.0.lock()[id * SECTOR_SIZE..(id + 1) * SECTOR_SIZE].to_vec()
        }
    }

    impl BlockDevice for MemDisk {
        fn read_sector(&self, sector_id: usize, buf: &mut [u8]) {
            let data = self.0.lock();
            buf.copy_from_slice(&data[sector_id * SECTOR_SIZE..(sector_id + 1) * SECTOR_SIZE]);
        }

        fn write_sector(&self, sector_id: usize, buf: &[u8]) {
            let mut data = self.0.lock();
            data[sector_id * SECTOR_SIZE..(sector_id + 1) * SECTOR_SIZE].copy_from_slice(buf);
        }
    }

    #[test]
    fn level_thresholds() {
        assert_eq!(level_for(0), Some(0));
        assert_eq!(level_for(MAX_SIZE[0]), Some(0));
        assert_eq!(level_for(MAX_SIZE[0] + 1), Some(1));
        assert_eq!(level_for(MAX_SIZE[1]), Some(1));
        assert_eq!(level_for(MAX_SIZE[1] + 1), Some(2));
        assert_eq!(level_for(MAX_SIZE[3]), Some(3));
        assert_eq!(level_for(MAX_SIZE[3] + 1), None);
    }

    #[test]
    fn total_sectors_counts_internal_headers() {
        // direct files cost exactly their data sectors
        assert_eq!(FileHeader::total_sectors(0), 0);
        assert_eq!(FileHeader::total_sectors(1), 1);
        assert_eq!(FileHeader::total_sectors(MAX_SIZE[0]), NUM_DIRECT);
        // 4000 bytes: two child headers, 30 + 2 data sectors
        assert_eq!(FileHeader::total_sectors(4000), 2 + 30 + 2);
        // one byte past a full level-0 file: a full child plus a one-sector child
        assert_eq!(
            FileHeader::total_sectors(MAX_SIZE[0] + 1),
            (1 + NUM_DIRECT) + (1 + 1)
        );
        // a one-byte tail behind a full level-1 chunk is a level-0 child:
        // one header and one data sector, no intermediate header
        assert_eq!(
            FileHeader::total_sectors(MAX_SIZE[1] + 1),
            (1 + NUM_DIRECT * (1 + NUM_DIRECT)) + (1 + 1)
        );
    }

    #[test]
    fn a_short_tail_sits_at_its_own_level() {
        let mut free_map = FreeMap::new(2048);
        let header = FileHeader::allocate(&mut free_map, MAX_SIZE[1] + 1).unwrap();
        assert_eq!(header.level(), 2);
        assert_eq!(header.children.len(), 2);
        assert_eq!(header.children[0].level(), 1);
        assert_eq!(header.children[1].level(), 0);
        assert_eq!(header.children[1].len(), 1);
        assert_eq!(header.mapping.len(), header.num_data_sectors());
    }

    #[test]
    fn shallow_tail_survives_a_disk_round_trip() {
        let disk = MemDisk::new(1024);
        let io = SectorIo::new(disk.clone());
        let mut free_map = FreeMap::new(1024);
        let own = free_map.find_and_set().unwrap();
        let header = FileHeader::allocate(&mut free_map, MAX_SIZE[1] + 1).unwrap();
        header.write_back(&io, own);
        io.sync_all();

        let fetched = FileHeader::fetch_from(&io, own);
        assert_eq!(fetched.len(), header.len());
        assert_eq!(fetched.mapping, header.mapping);
        assert_eq!(fetched.children()[1].level(), 0);

        let baseline = free_map.num_clear();
        let mut fetched = fetched;
        fetched.deallocate(&mut free_map);
        free_map.clear(own);
        assert_eq!(
            free_map.num_clear(),
            baseline + FileHeader::total_sectors(MAX_SIZE[1] + 1) + 1
        );
    }

    #[test]
    fn allocate_builds_the_mapping_in_file_order() {
        let mut free_map = FreeMap::new(2048);
        let header = FileHeader::allocate(&mut free_map, 4000).unwrap();
        assert_eq!(header.level(), 1);
        assert_eq!(header.num_data_sectors(), 32);
        assert_eq!(header.mapping.len(), 32);
        assert_eq!(header.children.len(), 2);
        assert_eq!(header.children[0].len(), MAX_SIZE[0]);
        assert_eq!(header.children[1].len(), 160);
        // every leaf is distinct and marked in the map
        for &sector in &header.mapping {
            assert!(free_map.test(sector));
        }
    }

    #[test]
    fn allocate_rejects_oversize_and_exhaustion() {
        let mut free_map = FreeMap::new(8);
        assert!(matches!(
            FileHeader::allocate(&mut free_map, MAX_SIZE[3] + 1),
            Err(FsError::TooLarge)
        ));
        let before = free_map.num_clear();
        assert!(matches!(
            FileHeader::allocate(&mut free_map, 20 * SECTOR_SIZE),
            Err(FsError::NoSpace)
        ));
        assert_eq!(free_map.num_clear(), before);
    }

    #[test]
    fn header_survives_a_disk_round_trip() {
        let disk = MemDisk::new(64);
        let io = SectorIo::new(disk.clone());
        let mut free_map = FreeMap::new(64);
        let own = free_map.find_and_set().unwrap();
        let header = FileHeader::allocate(&mut free_map, 5 * SECTOR_SIZE + 17).unwrap();
        header.write_back(&io, own);
        io.sync_all();

        let fetched = FileHeader::fetch_from(&io, own);
        assert_eq!(fetched.len(), header.len());
        assert_eq!(fetched.mapping, header.mapping);

        // writing a fetched header back reproduces the sector byte for byte
        let before = disk.sector(own as usize);
        fetched.write_back(&io, own);
        io.sync_all();
        assert_eq!(disk.sector(own as usize), before);
    }

    #[test]
    fn deallocate_returns_every_sector() {
        let mut free_map = FreeMap::new(2048);
        let baseline = free_map.num_clear();
        let mut header = FileHeader::allocate(&mut free_map, MAX_SIZE[0] + 1).unwrap();
        assert!(free_map.num_clear() < baseline);
        header.deallocate(&mut free_map);
        assert_eq!(free_map.num_clear(), baseline);
    }

    #[test]
    fn dir_entry_packs_and_truncates() {
        let entry = DirEntry::new("abc", 7, true);
        let mut buf = [0u8; DIR_ENTRY_SIZE];
        entry.write_to(&mut buf);
        let parsed = DirEntry::parse(&buf);
        assert!(parsed.in_use() && parsed.is_dir());
        assert_eq!(parsed.sector(), 7);
        assert_eq!(parsed.name(), "abc");

        let long = DirEntry::new("abcdefghijkl", 1, false);
        assert_eq!(long.name(), "abcdefghi");
    }
}
