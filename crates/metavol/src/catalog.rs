//! Per-volume catalog
//!
//! The catalog occupies the first page of a volume and records where every
//! other region lives. It is hand-encoded with a magic signature and a
//! crc32c trailer so a stale or torn page is detected before any other
//! region is trusted.
//!
//! Page layout, little-endian:
//!
//! ```text
//! magic(8) version(4) kind(1) pad(3) last_lpn(8) max_file_count(4)
//! [region: kind(1) pad(7) base(8) pages(8)] x 3
//! crc32c(4) over all preceding bytes
//! ```

use crate::page_store::PageStore;
use bytes::{Buf, BufMut};
use metavol_common::{Error, Lpn, RegionKind, Result, VolumeKind};
use std::sync::Arc;
use tracing::debug;

const CATALOG_MAGIC: u64 = u64::from_le_bytes(*b"METAVCAT");
const CATALOG_VERSION: u32 = 1;

const REGION_ORDER: [RegionKind; 3] = [
    RegionKind::Catalog,
    RegionKind::InodeHeader,
    RegionKind::InodeTable,
];

/// Placement of one region inside the volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct RegionEntry {
    pub base_lpn: Lpn,
    pub pages: u64,
}

/// In-memory catalog state plus its persistence routines.
pub struct CatalogManager {
    store: Arc<dyn PageStore>,
    volume: VolumeKind,
    base_lpn: Lpn,
    last_lpn: Lpn,
    max_file_count: u32,
    regions: [RegionEntry; 3],
    registered: usize,
}

impl CatalogManager {
    pub fn new(
        store: Arc<dyn PageStore>,
        volume: VolumeKind,
        base_lpn: Lpn,
        last_lpn: Lpn,
        max_file_count: u32,
    ) -> Self {
        Self {
            store,
            volume,
            base_lpn,
            last_lpn,
            max_file_count,
            regions: [RegionEntry::default(); 3],
            registered: 0,
        }
    }

    /// The catalog itself always spans one page.
    pub const PAGES: u64 = 1;

    pub fn register_region(&mut self, kind: RegionKind, base_lpn: Lpn, pages: u64) {
        let idx = Self::index(kind);
        self.regions[idx] = RegionEntry { base_lpn, pages };
        self.registered |= 1 << idx;
    }

    #[must_use]
    pub fn region(&self, kind: RegionKind) -> RegionEntry {
        self.regions[Self::index(kind)]
    }

    #[must_use]
    pub fn last_lpn(&self) -> Lpn {
        self.last_lpn
    }

    #[must_use]
    pub fn max_file_count(&self) -> u32 {
        self.max_file_count
    }

    fn index(kind: RegionKind) -> usize {
        match kind {
            RegionKind::Catalog => 0,
            RegionKind::InodeHeader => 1,
            RegionKind::InodeTable => 2,
        }
    }

    fn encode(&self) -> Vec<u8> {
        let page = self.store.page_size();
        let mut buf = Vec::with_capacity(page);
        buf.put_u64_le(CATALOG_MAGIC);
        buf.put_u32_le(CATALOG_VERSION);
        buf.put_u8(match self.volume {
            VolumeKind::SsdBacked => 0,
            VolumeKind::NvramBacked => 1,
        });
        buf.put_bytes(0, 3);
        buf.put_u64_le(self.last_lpn);
        buf.put_u32_le(self.max_file_count);
        for (idx, kind) in REGION_ORDER.iter().enumerate() {
            buf.put_u8(match kind {
                RegionKind::Catalog => 0,
                RegionKind::InodeHeader => 1,
                RegionKind::InodeTable => 2,
            });
            buf.put_bytes(0, 7);
            let entry = self.regions[idx];
            buf.put_u64_le(entry.base_lpn);
            buf.put_u64_le(entry.pages);
        }
        let checksum = crc32c::crc32c(&buf);
        buf.put_u32_le(checksum);
        buf.resize(page, 0);
        buf
    }

    fn decode(&mut self, buf: &[u8]) -> Result<()> {
        let payload_len = 8 + 4 + 4 + 8 + 4 + 3 * 24;
        let mut cur = buf;

        let magic = cur.get_u64_le();
        if magic != CATALOG_MAGIC {
            return Err(Error::corrupt_volume(format!(
                "catalog magic mismatch on {} volume",
                self.volume
            )));
        }
        let version = cur.get_u32_le();
        if version != CATALOG_VERSION {
            return Err(Error::corrupt_volume(format!(
                "unsupported catalog version {version}"
            )));
        }
        let kind_byte = cur.get_u8();
        cur.advance(3);
        let expected = match self.volume {
            VolumeKind::SsdBacked => 0,
            VolumeKind::NvramBacked => 1,
        };
        if kind_byte != expected {
            return Err(Error::corrupt_volume(format!(
                "catalog written for a different volume kind ({kind_byte})"
            )));
        }
        let last_lpn = cur.get_u64_le();
        let max_file_count = cur.get_u32_le();

        let mut regions = [RegionEntry::default(); 3];
        for entry in &mut regions {
            // Region tag plus padding; position fixes the kind.
            cur.advance(8);
            entry.base_lpn = cur.get_u64_le();
            entry.pages = cur.get_u64_le();
        }

        let stored = cur.get_u32_le();
        let computed = crc32c::crc32c(&buf[..payload_len]);
        if stored != computed {
            return Err(Error::corrupt_volume(format!(
                "catalog checksum mismatch: stored {stored:#x}, computed {computed:#x}"
            )));
        }

        self.last_lpn = last_lpn;
        self.max_file_count = max_file_count;
        self.regions = regions;
        self.registered = (1 << REGION_ORDER.len()) - 1;
        Ok(())
    }

    /// Persist the catalog to its home page.
    pub fn store(&self) -> Result<()> {
        if self.registered != (1 << REGION_ORDER.len()) - 1 {
            return Err(Error::invalid_parameter(
                "catalog stored before all regions were registered",
            ));
        }
        self.write_to(self.volume, self.base_lpn)
    }

    /// Load and verify the catalog from its home page.
    pub fn load(&mut self) -> Result<()> {
        self.read_from(self.volume, self.base_lpn)
    }

    /// Persist a copy of the catalog to an arbitrary location, for the
    /// backup window on the SSD volume.
    pub fn write_to(&self, volume: VolumeKind, base_lpn: Lpn) -> Result<()> {
        let buf = self.encode();
        self.store
            .write_pages(volume, base_lpn, &buf, Self::PAGES)?;
        debug!(volume = %volume, lpn = base_lpn, "catalog stored");
        Ok(())
    }

    /// Load and verify the catalog from an arbitrary location.
    pub fn read_from(&mut self, volume: VolumeKind, base_lpn: Lpn) -> Result<()> {
        let mut buf = vec![0u8; self.store.page_size()];
        self.store
            .read_pages(volume, base_lpn, &mut buf, Self::PAGES)?;
        self.decode(&buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_store::MemPageStore;

    fn manager(store: Arc<MemPageStore>) -> CatalogManager {
        let mut cat = CatalogManager::new(store, VolumeKind::SsdBacked, 0, 1023, 16);
        cat.register_region(RegionKind::Catalog, 0, 1);
        cat.register_region(RegionKind::InodeHeader, 1, 4);
        cat.register_region(RegionKind::InodeTable, 5, 16);
        cat
    }

    #[test]
    fn test_store_load_roundtrip() {
        let store = Arc::new(MemPageStore::new(4096, 1024, 64));
        let cat = manager(store.clone());
        cat.store().unwrap();

        let mut loaded = CatalogManager::new(store, VolumeKind::SsdBacked, 0, 0, 0);
        loaded.load().unwrap();
        assert_eq!(loaded.last_lpn(), 1023);
        assert_eq!(loaded.max_file_count(), 16);
        assert_eq!(
            loaded.region(RegionKind::InodeTable),
            RegionEntry {
                base_lpn: 5,
                pages: 16
            }
        );
    }

    #[test]
    fn test_blank_page_is_corrupt() {
        let store = Arc::new(MemPageStore::new(4096, 1024, 64));
        let mut cat = CatalogManager::new(store, VolumeKind::SsdBacked, 0, 0, 0);
        let err = cat.load().unwrap_err();
        assert!(matches!(err, Error::CorruptVolume(_)));
    }

    #[test]
    fn test_bitflip_is_corrupt() {
        let store = Arc::new(MemPageStore::new(4096, 1024, 64));
        manager(store.clone()).store().unwrap();

        let mut page = store.page_snapshot(VolumeKind::SsdBacked, 0);
        page[40] ^= 0x01;
        store
            .write_pages(VolumeKind::SsdBacked, 0, &page, 1)
            .unwrap();

        let mut loaded = CatalogManager::new(store, VolumeKind::SsdBacked, 0, 0, 0);
        let err = loaded.load().unwrap_err();
        assert!(matches!(err, Error::CorruptVolume(_)));
    }

    #[test]
    fn test_wrong_volume_kind_rejected() {
        let store = Arc::new(MemPageStore::new(4096, 1024, 64));
        manager(store.clone()).store().unwrap();

        // Copy the SSD catalog page onto the NVRAM volume and load it as
        // an NVRAM catalog.
        let page = store.page_snapshot(VolumeKind::SsdBacked, 0);
        store
            .write_pages(VolumeKind::NvramBacked, 0, &page, 1)
            .unwrap();
        let mut loaded = CatalogManager::new(store, VolumeKind::NvramBacked, 0, 0, 0);
        assert!(loaded.load().is_err());
    }

    #[test]
    fn test_store_requires_all_regions() {
        let store = Arc::new(MemPageStore::new(4096, 1024, 64));
        let mut cat = CatalogManager::new(store, VolumeKind::SsdBacked, 0, 1023, 16);
        cat.register_region(RegionKind::Catalog, 0, 1);
        assert!(cat.store().is_err());
    }
}
