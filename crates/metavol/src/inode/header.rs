//! Inode header region
//!
//! Holds the slot occupancy bitmap and the volume-wide allocated-extents
//! snapshot. The free-slot queue is derived from the bitmap at load time
//! and never persisted.

use crate::page_store::PageStore;
use crate::region;
use metavol_common::{Error, Extent, Lpn, Result, VolumeKind};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct HeaderContent {
    total_slots: u32,
    /// Lifetime create count, for observability
    total_files_created: u64,
    /// One bit per slot, LSB-first within each byte
    in_use: Vec<u8>,
    /// Every allocated run in the file-data span, lowest-first
    allocated: Vec<Extent>,
}

pub struct InodeHeader {
    store: Arc<dyn PageStore>,
    volume: VolumeKind,
    base_lpn: Lpn,
    pages: u64,
    content: HeaderContent,
    free_slots: VecDeque<u32>,
}

impl InodeHeader {
    /// Pages needed for the header with a worst-case snapshot.
    #[must_use]
    pub fn region_pages(page_size: usize, max_file_count: u32, snapshot_capacity: usize) -> u64 {
        let worst = 64
            + u64::from(max_file_count).div_ceil(8)
            + snapshot_capacity as u64 * (std::mem::size_of::<Extent>() as u64);
        worst.div_ceil(page_size as u64)
    }

    pub fn new(
        store: Arc<dyn PageStore>,
        volume: VolumeKind,
        base_lpn: Lpn,
        pages: u64,
        max_file_count: u32,
    ) -> Self {
        Self {
            store,
            volume,
            base_lpn,
            pages,
            content: HeaderContent {
                total_slots: max_file_count,
                total_files_created: 0,
                in_use: vec![0u8; (max_file_count as usize).div_ceil(8)],
                allocated: Vec::new(),
            },
            free_slots: (0..max_file_count).collect(),
        }
    }

    #[must_use]
    pub fn pages(&self) -> u64 {
        self.pages
    }

    #[must_use]
    pub fn is_in_use(&self, slot: u32) -> bool {
        let byte = (slot / 8) as usize;
        byte < self.content.in_use.len() && self.content.in_use[byte] & (1 << (slot % 8)) != 0
    }

    #[must_use]
    pub fn in_use_count(&self) -> u32 {
        self.content.total_slots - self.free_slots.len() as u32
    }

    /// Lowest free slot without consuming it.
    #[must_use]
    pub fn peek_free_slot(&self) -> Option<u32> {
        self.free_slots.front().copied()
    }

    /// Consume a free slot and mark it in use.
    pub fn take_slot(&mut self) -> Result<u32> {
        let slot = self
            .free_slots
            .pop_front()
            .ok_or_else(|| Error::not_found("free inode slot"))?;
        self.set_bit(slot, true)?;
        self.content.total_files_created += 1;
        Ok(slot)
    }

    /// Mark a slot free again and return it to the queue.
    pub fn put_slot(&mut self, slot: u32) -> Result<()> {
        self.set_bit(slot, false)?;
        self.free_slots.push_back(slot);
        Ok(())
    }

    /// Undo a [`take_slot`](Self::take_slot) that never reached persistence.
    pub fn untake_slot(&mut self, slot: u32) -> Result<()> {
        self.set_bit(slot, false)?;
        self.content.total_files_created -= 1;
        self.free_slots.push_front(slot);
        Ok(())
    }

    fn set_bit(&mut self, slot: u32, value: bool) -> Result<()> {
        if slot >= self.content.total_slots {
            return Err(Error::invalid_parameter(format!("slot {slot} out of range")));
        }
        if self.is_in_use(slot) == value {
            return Err(Error::invalid_parameter(format!(
                "slot {slot} occupancy already {value}"
            )));
        }
        let mask = 1u8 << (slot % 8);
        let byte = &mut self.content.in_use[(slot / 8) as usize];
        if value {
            *byte |= mask;
        } else {
            *byte &= !mask;
        }
        Ok(())
    }

    /// Replace the allocated-extents snapshot.
    pub fn set_allocated(&mut self, allocated: Vec<Extent>) {
        self.content.allocated = allocated;
    }

    #[must_use]
    pub fn allocated(&self) -> &[Extent] {
        &self.content.allocated
    }

    /// Slots marked in use, lowest-first.
    pub fn in_use_slots(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.content.total_slots).filter(|s| self.is_in_use(*s))
    }

    pub fn store(&self) -> Result<()> {
        self.store_to(self.volume, self.base_lpn)
    }

    pub fn store_to(&self, volume: VolumeKind, base_lpn: Lpn) -> Result<()> {
        region::store_region(self.store.as_ref(), volume, base_lpn, self.pages, &self.content)
    }

    pub fn load(&mut self) -> Result<()> {
        self.load_from(self.volume, self.base_lpn)
    }

    pub fn load_from(&mut self, volume: VolumeKind, base_lpn: Lpn) -> Result<()> {
        let content: HeaderContent =
            region::load_region(self.store.as_ref(), volume, base_lpn, self.pages)?;
        if content.in_use.len() != (content.total_slots as usize).div_ceil(8) {
            return Err(Error::corrupt_volume("inode header bitmap length mismatch"));
        }
        self.content = content;
        self.free_slots = (0..self.content.total_slots)
            .filter(|s| !self.is_in_use_content(*s))
            .collect();
        Ok(())
    }

    fn is_in_use_content(&self, slot: u32) -> bool {
        self.content.in_use[(slot / 8) as usize] & (1 << (slot % 8)) != 0
    }

    /// Reset to the freshly formatted state.
    pub fn reset(&mut self) {
        let slots = self.content.total_slots;
        self.content = HeaderContent {
            total_slots: slots,
            total_files_created: 0,
            in_use: vec![0u8; (slots as usize).div_ceil(8)],
            allocated: Vec::new(),
        };
        self.free_slots = (0..slots).collect();
    }
}
