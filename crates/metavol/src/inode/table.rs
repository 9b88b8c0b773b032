//! Inode table region
//!
//! One page per slot, so a single file's create or delete persists exactly
//! one table page. Slot occupancy is owned by the header bitmap; the table
//! never reads a slot the bitmap does not mark in use.

use crate::inode::entry::InodeEntry;
use crate::page_store::PageStore;
use crate::region;
use metavol_common::{Error, Lpn, Result, VolumeKind};
use std::sync::Arc;

pub struct InodeTable {
    store: Arc<dyn PageStore>,
    volume: VolumeKind,
    base_lpn: Lpn,
    slots: Vec<Option<InodeEntry>>,
}

impl InodeTable {
    /// Pages needed for `max_file_count` slots.
    #[must_use]
    pub fn region_pages(max_file_count: u32) -> u64 {
        u64::from(max_file_count) * Self::PAGES_PER_SLOT
    }

    const PAGES_PER_SLOT: u64 = 1;

    pub fn new(
        store: Arc<dyn PageStore>,
        volume: VolumeKind,
        base_lpn: Lpn,
        max_file_count: u32,
    ) -> Self {
        Self {
            store,
            volume,
            base_lpn,
            slots: vec![None; max_file_count as usize],
        }
    }

    #[must_use]
    pub fn entry(&self, slot: u32) -> Option<&InodeEntry> {
        self.slots.get(slot as usize).and_then(Option::as_ref)
    }

    pub fn set_entry(&mut self, slot: u32, entry: InodeEntry) -> Result<()> {
        let cell = self
            .slots
            .get_mut(slot as usize)
            .ok_or_else(|| Error::invalid_parameter(format!("slot {slot} out of range")))?;
        *cell = Some(entry);
        Ok(())
    }

    pub fn clear_entry(&mut self, slot: u32) -> Result<InodeEntry> {
        self.slots
            .get_mut(slot as usize)
            .and_then(Option::take)
            .ok_or_else(|| Error::not_found(format!("inode slot {slot}")))
    }

    pub fn clear_all(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
    }

    fn slot_lpn(&self, base: Lpn, slot: u32) -> Lpn {
        base + u64::from(slot) * Self::PAGES_PER_SLOT
    }

    /// Persist one slot to its page in the home region.
    pub fn store_slot(&self, slot: u32) -> Result<()> {
        self.store_slot_to(slot, self.volume, self.base_lpn)
    }

    /// Persist one slot into an arbitrary table window.
    pub fn store_slot_to(&self, slot: u32, volume: VolumeKind, base: Lpn) -> Result<()> {
        let entry = self
            .entry(slot)
            .ok_or_else(|| Error::not_found(format!("inode slot {slot}")))?;
        region::store_region(
            self.store.as_ref(),
            volume,
            self.slot_lpn(base, slot),
            Self::PAGES_PER_SLOT,
            entry,
        )
    }

    /// Load one slot from its page in the home region.
    pub fn load_slot(&mut self, slot: u32) -> Result<()> {
        self.load_slot_from(slot, self.volume, self.base_lpn)
    }

    /// Load one slot from an arbitrary table window.
    pub fn load_slot_from(&mut self, slot: u32, volume: VolumeKind, base: Lpn) -> Result<()> {
        let entry: InodeEntry = region::load_region(
            self.store.as_ref(),
            volume,
            self.slot_lpn(base, slot),
            Self::PAGES_PER_SLOT,
        )?;
        if entry.slot != slot {
            return Err(Error::corrupt_volume(format!(
                "slot {slot} holds an entry recorded for slot {}",
                entry.slot
            )));
        }
        self.set_entry(slot, entry)
    }

    /// In-use entries, lowest slot first.
    pub fn iter_entries(&self) -> impl Iterator<Item = &InodeEntry> {
        self.slots.iter().filter_map(Option::as_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_store::MemPageStore;
    use metavol_common::Extent;

    fn entry(slot: u32) -> InodeEntry {
        InodeEntry {
            fd: slot,
            name: format!("file-{slot}"),
            byte_size: 100,
            data_chunk_size: 4032,
            volume: VolumeKind::NvramBacked,
            slot,
            extents: vec![Extent::new(u64::from(slot) * 8, 8)],
        }
    }

    #[test]
    fn test_slot_store_load() {
        let store = Arc::new(MemPageStore::new(512, 64, 64));
        let mut table = InodeTable::new(store.clone(), VolumeKind::NvramBacked, 4, 8);
        table.set_entry(2, entry(2)).unwrap();
        table.store_slot(2).unwrap();

        let mut other = InodeTable::new(store, VolumeKind::NvramBacked, 4, 8);
        other.load_slot(2).unwrap();
        assert_eq!(other.entry(2), Some(&entry(2)));
        assert!(other.entry(3).is_none());
    }

    #[test]
    fn test_slot_mismatch_detected() {
        let store = Arc::new(MemPageStore::new(512, 64, 64));
        let mut table = InodeTable::new(store.clone(), VolumeKind::NvramBacked, 4, 8);
        table.set_entry(1, entry(1)).unwrap();
        table.store_slot(1).unwrap();

        // Copy slot 1's page onto slot 3 and load it as slot 3.
        let page = store.page_snapshot(VolumeKind::NvramBacked, 5);
        store
            .write_pages(VolumeKind::NvramBacked, 7, &page, 1)
            .unwrap();
        let mut other = InodeTable::new(store, VolumeKind::NvramBacked, 4, 8);
        assert!(matches!(
            other.load_slot(3).unwrap_err(),
            Error::CorruptVolume(_)
        ));
    }

    #[test]
    fn test_clear_entry() {
        let store = Arc::new(MemPageStore::new(512, 64, 64));
        let mut table = InodeTable::new(store, VolumeKind::NvramBacked, 4, 8);
        table.set_entry(0, entry(0)).unwrap();
        let removed = table.clear_entry(0).unwrap();
        assert_eq!(removed.fd, 0);
        assert!(table.clear_entry(0).is_err());
    }
}
