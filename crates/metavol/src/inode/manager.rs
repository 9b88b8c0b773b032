//! Inode manager: slot occupancy, descriptors, and the extent allocator
//! for one volume, with save/load and backup/restore of both inode regions.

use crate::catalog::RegionEntry;
use crate::extent_alloc::ExtentAllocator;
use crate::fd_alloc::FdAllocator;
use crate::inode::entry::InodeEntry;
use crate::inode::header::InodeHeader;
use crate::inode::table::InodeTable;
use crate::page_store::PageStore;
use metavol_common::{
    Error, Extent, FileDescriptor, FileInfo, FileNameKey, InodeInfo, Lpn, MetaVolConfig, Result,
    VolumeKind, file_name_key,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct InodeManager {
    volume: VolumeKind,
    config: MetaVolConfig,
    pub(crate) header: InodeHeader,
    pub(crate) table: InodeTable,
    pub(crate) fd_alloc: FdAllocator,
    pub(crate) extent_alloc: ExtentAllocator,
    /// Descriptors currently open through the file-control surface
    active: HashSet<FileDescriptor>,
    slot_of: HashMap<FileDescriptor, u32>,
}

impl InodeManager {
    pub fn new(
        store: Arc<dyn PageStore>,
        volume: VolumeKind,
        config: MetaVolConfig,
        header_region: RegionEntry,
        table_region: RegionEntry,
        file_base: Lpn,
        last_lpn: Lpn,
        fd_base: FileDescriptor,
    ) -> Self {
        let max_files = config.max_file_count;
        Self {
            volume,
            header: InodeHeader::new(
                store.clone(),
                volume,
                header_region.base_lpn,
                header_region.pages,
                max_files,
            ),
            table: InodeTable::new(store, volume, table_region.base_lpn, max_files),
            fd_alloc: FdAllocator::new(fd_base, max_files),
            extent_alloc: ExtentAllocator::new(
                file_base,
                last_lpn,
                config.extent_granularity,
                config.extent_slots_per_inode,
            ),
            active: HashSet::new(),
            slot_of: HashMap::new(),
            config,
        }
    }

    #[must_use]
    pub fn volume(&self) -> VolumeKind {
        self.volume
    }

    #[must_use]
    pub fn config(&self) -> &MetaVolConfig {
        &self.config
    }

    /// Shift the file-data span upward, before any file exists. The SSD
    /// volume does this to reserve the NVRAM backup window.
    pub fn rebase_file_span(&mut self, new_base: Lpn) -> Result<()> {
        self.extent_alloc.rebase(new_base)
    }

    #[must_use]
    pub fn file_base_lpn(&self) -> Lpn {
        self.extent_alloc.file_base()
    }

    #[must_use]
    pub fn available_pages(&self) -> u64 {
        self.extent_alloc.available_pages()
    }

    #[must_use]
    pub fn largest_free_run(&self) -> u64 {
        self.extent_alloc.largest_free_run()
    }

    /// Highest LPN owned by any file, or the last metadata-region page
    /// when no file holds space. Bounds the span outer scans must cover.
    #[must_use]
    pub fn last_allocated_lpn(&self) -> Lpn {
        self.extent_alloc
            .snapshot_allocated()
            .last()
            .map_or(self.extent_alloc.file_base() - 1, Extent::last)
    }

    /// Free capacity in bytes, counting only whole allocation units.
    #[must_use]
    pub fn available_bytes(&self) -> u64 {
        let g = self.config.extent_granularity;
        (self.available_pages() / g) * g * self.config.data_chunk_size
    }

    /// Fraction of the file-data span currently allocated, in percent.
    #[must_use]
    pub fn utilization_pct(&self) -> u64 {
        let span = self.extent_alloc.last_lpn() - self.extent_alloc.file_base() + 1;
        (span - self.available_pages()) * 100 / span
    }

    #[must_use]
    pub fn file_count(&self) -> u32 {
        self.header.in_use_count()
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    #[must_use]
    pub fn owns_fd(&self, fd: FileDescriptor) -> bool {
        self.slot_of.contains_key(&fd)
    }

    pub fn find_fd(&self, key: FileNameKey) -> Option<FileDescriptor> {
        self.fd_alloc.find(key)
    }

    fn entry_of(&self, fd: FileDescriptor) -> Result<&InodeEntry> {
        let slot = self
            .slot_of
            .get(&fd)
            .ok_or_else(|| Error::not_found(format!("file descriptor {fd}")))?;
        self.table
            .entry(*slot)
            .ok_or_else(|| Error::corrupt_volume(format!("slot {slot} mapped but empty")))
    }

    pub fn file_size(&self, fd: FileDescriptor) -> Result<u64> {
        Ok(self.entry_of(fd)?.byte_size)
    }

    pub fn data_chunk_size(&self, fd: FileDescriptor) -> Result<u64> {
        Ok(self.entry_of(fd)?.data_chunk_size)
    }

    pub fn file_base(&self, fd: FileDescriptor) -> Result<Lpn> {
        Ok(self.entry_of(fd)?.base_lpn())
    }

    pub fn inode_info(&self, fd: FileDescriptor) -> Result<InodeInfo> {
        Ok(self.entry_of(fd)?.to_info())
    }

    pub fn file_extents(&self, fd: FileDescriptor) -> Result<Vec<Extent>> {
        Ok(self.entry_of(fd)?.extents.clone())
    }

    pub fn list_files(&self) -> Vec<FileInfo> {
        self.table
            .iter_entries()
            .map(|e| FileInfo {
                fd: e.fd,
                name: e.name.clone(),
                byte_size: e.byte_size,
                volume: e.volume,
            })
            .collect()
    }

    /// Mark a file active. A file can be open at most once.
    pub fn open_file(&mut self, key: FileNameKey) -> Result<FileDescriptor> {
        let fd = self
            .fd_alloc
            .find(key)
            .ok_or_else(|| Error::not_found(format!("file name key {key:#x}")))?;
        if !self.active.insert(fd) {
            return Err(Error::AlreadyOpen(fd));
        }
        Ok(fd)
    }

    pub fn close_file(&mut self, fd: FileDescriptor) -> Result<()> {
        if !self.active.remove(&fd) {
            return Err(Error::not_found(format!("open file descriptor {fd}")));
        }
        Ok(())
    }

    #[must_use]
    pub fn is_active(&self, fd: FileDescriptor) -> bool {
        self.active.contains(&fd)
    }

    pub(crate) fn bind_slot(&mut self, fd: FileDescriptor, slot: u32) {
        self.slot_of.insert(fd, slot);
    }

    pub(crate) fn unbind_slot(&mut self, fd: FileDescriptor) -> Option<u32> {
        self.slot_of.remove(&fd)
    }

    /// Persist the header and every in-use table slot to the home regions.
    pub fn save(&mut self) -> Result<()> {
        self.header
            .set_allocated(self.extent_alloc.snapshot_allocated());
        self.header.store()?;
        let slots: Vec<u32> = self.header.in_use_slots().collect();
        for slot in slots {
            self.table.store_slot(slot)?;
        }
        debug!(volume = %self.volume, files = self.file_count(), "inode content saved");
        Ok(())
    }

    /// Load the header and the in-use table slots, then rebuild all
    /// derived state.
    pub fn load(&mut self) -> Result<()> {
        self.header.load()?;
        let slots: Vec<u32> = self.header.in_use_slots().collect();
        for slot in &slots {
            self.table.load_slot(*slot)?;
        }
        self.rebuild_runtime_state()
    }

    /// Persist both inode regions into a backup window on another volume.
    pub fn backup_to(
        &mut self,
        volume: VolumeKind,
        header_base: Lpn,
        table_base: Lpn,
    ) -> Result<()> {
        self.header
            .set_allocated(self.extent_alloc.snapshot_allocated());
        self.header.store_to(volume, header_base)?;
        let slots: Vec<u32> = self.header.in_use_slots().collect();
        for slot in slots {
            self.table.store_slot_to(slot, volume, table_base)?;
        }
        debug!(volume = %self.volume, target = %volume, "inode content backed up");
        Ok(())
    }

    /// Rebuild this volume's inode state from a backup window, then write
    /// it back to the home regions.
    pub fn restore_from(
        &mut self,
        volume: VolumeKind,
        header_base: Lpn,
        table_base: Lpn,
    ) -> Result<()> {
        self.header.load_from(volume, header_base)?;
        self.table.clear_all();
        let slots: Vec<u32> = self.header.in_use_slots().collect();
        for slot in &slots {
            self.table.load_slot_from(*slot, volume, table_base)?;
        }
        self.rebuild_runtime_state()?;
        self.save()
    }

    fn rebuild_runtime_state(&mut self) -> Result<()> {
        self.extent_alloc
            .restore_allocated(self.header.allocated())?;
        self.fd_alloc.reset();
        self.slot_of.clear();
        self.active.clear();
        for slot in self.header.in_use_slots().collect::<Vec<_>>() {
            let entry = self
                .table
                .entry(slot)
                .ok_or_else(|| Error::corrupt_volume(format!("slot {slot} marked but not loaded")))?
                .clone();
            self.fd_alloc
                .restore(file_name_key(&entry.name), entry.fd)?;
            self.slot_of.insert(entry.fd, slot);
        }
        Ok(())
    }

    /// Drop all volatile state, as when the volume closes.
    pub fn reset_runtime_state(&mut self) {
        if !self.active.is_empty() {
            warn!(
                volume = %self.volume,
                active = self.active.len(),
                "resetting with files still active"
            );
        }
        self.table.clear_all();
        self.header.reset();
        self.fd_alloc.reset();
        self.slot_of.clear();
        self.active.clear();
    }
}
