//! Sector cache between the file-system structures and the device driver.
//! Reads and writes go through cached copies; dirty sectors reach the disk
//! on eviction, on drop, or when an operation flushes with [`SectorIo::sync_all`].

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use spin::Mutex;

use crate::{BlockDevice, SECTOR_SIZE};

/// Upper bound on cached sectors per file system.
const CACHE_CAPACITY: usize = 16;

/// One cached sector: a copy of the on-disk bytes plus a dirty flag.
struct SectorCache {
    data: [u8; SECTOR_SIZE],
    sector_id: usize,
    device: Arc<dyn BlockDevice>,
    modified: bool,
}

impl SectorCache {
    fn new(sector_id: usize, device: Arc<dyn BlockDevice>) -> Self {
        let mut data = [0; SECTOR_SIZE];
        device.read_sector(sector_id, &mut data);
        Self {
            data,
            sector_id,
            device,
            modified: false,
        }
    }

    fn sync(&mut self) {
        if self.modified {
            self.modified = false;
            self.device.write_sector(self.sector_id, &self.data);
        }
    }
}

impl Drop for SectorCache {
    fn drop(&mut self) {
        self.sync();
    }
}

struct SectorCacheManager {
    caches: LruCache<usize, Arc<Mutex<SectorCache>>>,
    device: Arc<dyn BlockDevice>,
}

impl SectorCacheManager {
    fn get(&mut self, sector_id: usize) -> Arc<Mutex<SectorCache>> {
        if let Some(cache) = self.caches.get(&sector_id) {
            return Arc::clone(cache);
        }
        let cache = Arc::new(Mutex::new(SectorCache::new(
            sector_id,
            Arc::clone(&self.device),
        )));
        if let Some((_, evicted)) = self.caches.push(sector_id, Arc::clone(&cache)) {
            // the victim must reach the disk before it leaves the cache
            evicted.lock().sync();
        }
        cache
    }
}

/// Shared handle to one file system's sector cache. Cloning is cheap; all
/// disk access above the driver goes through a handle.
#[derive(Clone)]
pub struct SectorIo {
    manager: Arc<Mutex<SectorCacheManager>>,
}

impl SectorIo {
    pub fn new(device: Arc<dyn BlockDevice>) -> Self {
        Self {
            manager: Arc::new(Mutex::new(SectorCacheManager {
                caches: LruCache::new(NonZeroUsize::new(CACHE_CAPACITY).unwrap()),
                device,
            })),
        }
    }

    /// Run `f` over the cached contents of `sector_id`.
    pub fn read<V>(&self, sector_id: usize, f: impl FnOnce(&[u8; SECTOR_SIZE]) -> V) -> V {
        let cache = self.manager.lock().get(sector_id);
        let guard = cache.lock();
        f(&guard.data)
    }

    /// Run `f` over the cached contents of `sector_id`, marking it dirty.
    pub fn modify<V>(&self, sector_id: usize, f: impl FnOnce(&mut [u8; SECTOR_SIZE]) -> V) -> V {
        let cache = self.manager.lock().get(sector_id);
        let mut guard = cache.lock();
        guard.modified = true;
        f(&mut guard.data)
    }

    /// Flush every dirty cached sector to the device.
    pub fn sync_all(&self) {
        let mut manager = self.manager.lock();
        for (_, cache) in manager.caches.iter_mut() {
            cache.lock().sync();
        }
    }
}
