//! A simulated disk-backed file system: hierarchical directories, files
//! addressed through multi-level file headers, and a persistent free-sector
//! map, all on top of a fixed-geometry sector device.

extern crate lru;

mod bitmap;
mod block_cache;
mod block_dev;
mod directory;
mod error;
mod file;
mod fs;
mod layout;

pub use bitmap::FreeMap;
pub use block_cache::SectorIo;
pub use block_dev::BlockDevice;
pub use directory::Directory;
pub use error::{FsError, Result};
pub use file::OpenFile;
pub use fs::{FileSystem, HeaderStat};
pub use layout::{level_for, DirEntry, FileHeader};

/// Bytes per disk sector.
pub const SECTOR_SIZE: usize = 128;
/// Marks an unused child slot in an on-disk file header.
pub const INVALID_SECTOR: i32 = -1;
/// Child pointers per header: whatever fits in one sector after the two
/// header words.
pub const NUM_DIRECT: usize = (SECTOR_SIZE - 2 * 4) / 4;
/// Maximum depth of the header tree.
pub const LEVEL_LIMIT: usize = 4;
/// Largest file representable by a header of each level.
pub const MAX_SIZE: [usize; LEVEL_LIMIT] = [
    NUM_DIRECT * SECTOR_SIZE,
    NUM_DIRECT * NUM_DIRECT * SECTOR_SIZE,
    NUM_DIRECT * NUM_DIRECT * NUM_DIRECT * SECTOR_SIZE,
    NUM_DIRECT * NUM_DIRECT * NUM_DIRECT * NUM_DIRECT * SECTOR_SIZE,
];

/// Sector holding the free-map file header.
pub const FREE_MAP_SECTOR: u32 = 0;
/// Sector holding the root directory file header.
pub const ROOT_DIR_SECTOR: u32 = 1;

/// Entries in every directory table.
pub const NUM_DIR_ENTRIES: usize = 64;
/// Longest stored file name, excluding the terminating NUL.
pub const FILE_NAME_MAX_LEN: usize = 9;
/// Serialized size of one directory entry.
pub const DIR_ENTRY_SIZE: usize = 16;
/// Byte length of a directory's payload.
pub const DIR_TABLE_BYTES: usize = NUM_DIR_ENTRIES * DIR_ENTRY_SIZE;
/// Longest accepted path, separators included.
pub const PATH_NAME_MAX_LEN: usize = 256;
/// Capacity of the open-file descriptor table.
pub const FILE_OPEN_LIMIT: usize = 20;
