//! One metadata volume: catalog, inode regions, and the file-data span,
//! driven through a small lifecycle state machine.
//!
//! Region placement, in pages from LPN 0:
//!
//! ```text
//! [ catalog | inode header | inode table | file data ... ]
//! ```
//!
//! The SSD volume additionally reserves a backup window at the start of
//! its file-data span, sized to hold the NVRAM volume's catalog and inode
//! regions, and shifts its own file base past the window.

use crate::catalog::{CatalogManager, RegionEntry};
use crate::inode::{InodeCreator, InodeDeleter, InodeManager};
use crate::page_store::PageStore;
use metavol_common::{
    Error, Extent, FileDescriptor, FileInfo, FileNameKey, FileProperties, InodeInfo, Lpn,
    MAX_FILE_NAME_LEN, MetaVolConfig, RegionKind, Result, VolumeKind,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lifecycle of a volume. `Error` is terminal; every other state is
/// reached through the transitions the methods enforce.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VolumeState {
    /// Constructed, placement not yet computed
    Default,
    /// Placement computed, media not touched
    Init,
    /// Formatted or loaded, not serving
    Created,
    Open,
    Closed,
    Error,
}

/// The window inside the SSD file-data span that holds the NVRAM
/// volume's regions across a power loss.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackupRegion {
    pub base_lpn: Lpn,
    pub catalog_pages: u64,
    pub header_pages: u64,
    pub table_pages: u64,
}

impl BackupRegion {
    #[must_use]
    pub fn catalog_base(&self) -> Lpn {
        self.base_lpn
    }

    #[must_use]
    pub fn header_base(&self) -> Lpn {
        self.base_lpn + self.catalog_pages
    }

    #[must_use]
    pub fn table_base(&self) -> Lpn {
        self.header_base() + self.header_pages
    }

    #[must_use]
    pub fn total_pages(&self) -> u64 {
        self.catalog_pages + self.header_pages + self.table_pages
    }
}

pub struct MetaVolume {
    kind: VolumeKind,
    state: VolumeState,
    store: Arc<dyn PageStore>,
    config: MetaVolConfig,
    catalog: CatalogManager,
    inodes: InodeManager,
    /// Present on the SSD volume only
    backup_region: Option<BackupRegion>,
}

impl MetaVolume {
    /// Compute region placement over `[0, last_lpn]` and build the
    /// managers. The volume ends in `Init`; nothing touches the media.
    pub fn new(
        store: Arc<dyn PageStore>,
        kind: VolumeKind,
        config: MetaVolConfig,
        last_lpn: Lpn,
    ) -> Result<Self> {
        config.validate()?;
        let page_size = store.page_size();
        let max_files = config.max_file_count;

        let catalog_pages = CatalogManager::PAGES;
        let header_pages = crate::inode::header::InodeHeader::region_pages(
            page_size,
            max_files,
            config.snapshot_extent_capacity,
        );
        let table_pages = crate::inode::table::InodeTable::region_pages(max_files);

        let header_base = catalog_pages;
        let table_base = header_base + header_pages;
        let natural_file_base = table_base + table_pages;

        let backup_region = match kind {
            VolumeKind::SsdBacked => Some(BackupRegion {
                base_lpn: natural_file_base,
                catalog_pages,
                header_pages,
                table_pages,
            }),
            VolumeKind::NvramBacked => None,
        };
        let file_base = natural_file_base
            + backup_region.map_or(0, |r| r.total_pages());
        if file_base + config.extent_granularity > last_lpn + 1 {
            return Err(Error::invalid_parameter(format!(
                "{kind} volume of {} pages leaves no file-data span",
                last_lpn + 1
            )));
        }

        let mut catalog =
            CatalogManager::new(store.clone(), kind, 0, last_lpn, max_files);
        catalog.register_region(RegionKind::Catalog, 0, catalog_pages);
        catalog.register_region(RegionKind::InodeHeader, header_base, header_pages);
        catalog.register_region(RegionKind::InodeTable, table_base, table_pages);

        let fd_base = match kind {
            VolumeKind::NvramBacked => 0,
            VolumeKind::SsdBacked => max_files,
        };
        let mut inodes = InodeManager::new(
            store.clone(),
            kind,
            config.clone(),
            RegionEntry {
                base_lpn: header_base,
                pages: header_pages,
            },
            RegionEntry {
                base_lpn: table_base,
                pages: table_pages,
            },
            natural_file_base,
            last_lpn,
            fd_base,
        );
        if file_base != natural_file_base {
            inodes.rebase_file_span(file_base)?;
        }

        debug!(
            volume = %kind,
            file_base,
            last_lpn,
            "volume placement computed"
        );
        Ok(Self {
            kind,
            state: VolumeState::Init,
            store,
            config,
            catalog,
            inodes,
            backup_region,
        })
    }

    #[must_use]
    pub fn kind(&self) -> VolumeKind {
        self.kind
    }

    #[must_use]
    pub fn state(&self) -> VolumeState {
        self.state
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == VolumeState::Open
    }

    /// Backup window descriptor; `None` on the NVRAM volume.
    #[must_use]
    pub fn backup_region(&self) -> Option<BackupRegion> {
        self.backup_region
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state == VolumeState::Open {
            Ok(())
        } else {
            Err(Error::VolumeNotOpen(self.kind))
        }
    }

    /// Format the volume: write the catalog and an empty inode header.
    pub fn create(&mut self) -> Result<()> {
        if self.state != VolumeState::Init {
            return Err(Error::invalid_parameter(format!(
                "create from state {:?}",
                self.state
            )));
        }
        self.catalog.store()?;
        self.inodes.save()?;
        self.state = VolumeState::Created;
        info!(volume = %self.kind, "volume formatted");
        Ok(())
    }

    /// Load the catalog and inode regions from the media and start
    /// serving. A verification failure is terminal for the volume.
    pub fn open(&mut self) -> Result<()> {
        if !matches!(self.state, VolumeState::Init | VolumeState::Created) {
            return Err(Error::invalid_parameter(format!(
                "open from state {:?}",
                self.state
            )));
        }
        if let Err(e) = self.load_content() {
            self.state = VolumeState::Error;
            return Err(e);
        }
        self.state = VolumeState::Open;
        info!(volume = %self.kind, files = self.inodes.file_count(), "volume opened");
        Ok(())
    }

    fn load_content(&mut self) -> Result<()> {
        self.catalog.load()?;
        self.inodes.load()
    }

    /// Rebuild a volatile volume from the backup window on the SSD
    /// volume, rewrite the home regions, and start serving.
    pub fn open_from_backup(&mut self, backup: &BackupRegion) -> Result<()> {
        if !matches!(self.state, VolumeState::Init | VolumeState::Created) {
            return Err(Error::invalid_parameter(format!(
                "restore from state {:?}",
                self.state
            )));
        }
        if let Err(e) = self.restore_content(backup) {
            self.state = VolumeState::Error;
            return Err(e);
        }
        self.state = VolumeState::Open;
        info!(
            volume = %self.kind,
            files = self.inodes.file_count(),
            "volume restored from backup"
        );
        Ok(())
    }

    fn restore_content(&mut self, backup: &BackupRegion) -> Result<()> {
        // The backed-up catalog carries this volume's kind even though it
        // sits on the SSD volume.
        self.catalog
            .read_from(VolumeKind::SsdBacked, backup.catalog_base())?;
        self.inodes.restore_from(
            VolumeKind::SsdBacked,
            backup.header_base(),
            backup.table_base(),
        )?;
        self.catalog.store()
    }

    /// Persist and stop serving. Closing a volume that is not open is a
    /// no-op. Open files keep the volume open.
    ///
    /// `backup` is supplied for the volatile volume so its content
    /// survives the power-off inside the SSD backup window.
    pub fn close(&mut self, backup: Option<&BackupRegion>) -> Result<()> {
        if self.state != VolumeState::Open {
            return Ok(());
        }
        let active = self.inodes.active_count();
        if active > 0 {
            warn!(volume = %self.kind, active, "close refused, files still open");
            return Err(Error::StillActive {
                active_files: active,
            });
        }
        self.inodes.save()?;
        if let Some(backup) = backup {
            self.catalog
                .write_to(VolumeKind::SsdBacked, backup.catalog_base())?;
            self.inodes.backup_to(
                VolumeKind::SsdBacked,
                backup.header_base(),
                backup.table_base(),
            )?;
        }
        self.inodes.reset_runtime_state();
        self.state = VolumeState::Closed;
        info!(volume = %self.kind, "volume closed");
        Ok(())
    }

    /// Whether a file of `byte_size` bytes should land on this volume.
    ///
    /// The byte-addressable volume accepts any file it can hold when the
    /// file's properties favor it. The block volume keeps one allocation
    /// unit of slack so metadata updates never consume the last unit.
    #[must_use]
    pub fn is_storable(&self, byte_size: u64, properties: FileProperties) -> bool {
        let required = self.config.pages_for_bytes(byte_size);
        let available = self.inodes.available_pages();
        if self.kind == VolumeKind::NvramBacked && properties.favors_byte_addressable() {
            return required <= available;
        }
        let g = self.config.extent_granularity;
        self.config.round_up_to_granularity(required) < (available / g) * g
    }

    pub fn create_file(&mut self, name: &str, byte_size: u64) -> Result<FileDescriptor> {
        self.ensure_open()?;
        validate_file_name(name)?;
        if byte_size == 0 {
            return Err(Error::invalid_parameter("zero-byte file"));
        }
        InodeCreator::new(&mut self.inodes).execute(name, byte_size)
    }

    pub fn delete_file(&mut self, name: &str) -> Result<FileDescriptor> {
        self.ensure_open()?;
        InodeDeleter::new(&mut self.inodes).execute(name)
    }

    /// Discard a file's data pages, keeping the file itself. Falls back
    /// to zero-fill when the store cannot trim.
    pub fn trim_file(&mut self, name: &str) -> Result<()> {
        self.ensure_open()?;
        let fd = self
            .inodes
            .find_fd(metavol_common::file_name_key(name))
            .ok_or_else(|| Error::not_found(format!("file {name}")))?;
        let extents = self.inodes.file_extents(fd)?;
        for ext in extents {
            match self.store.trim_pages(self.kind, ext.start_lpn, ext.count) {
                Ok(()) => {}
                Err(Error::Unsupported(_)) => self.zero_fill(&ext)?,
                Err(e) => return Err(e),
            }
        }
        debug!(volume = %self.kind, name, fd, "file trimmed");
        Ok(())
    }

    fn zero_fill(&self, ext: &Extent) -> Result<()> {
        let zeros = vec![0u8; self.store.page_size()];
        for lpn in ext.start_lpn..ext.end() {
            self.store.write_pages(self.kind, lpn, &zeros, 1)?;
        }
        Ok(())
    }

    pub fn open_file(&mut self, key: FileNameKey) -> Result<FileDescriptor> {
        self.ensure_open()?;
        self.inodes.open_file(key)
    }

    pub fn close_file(&mut self, fd: FileDescriptor) -> Result<()> {
        self.ensure_open()?;
        self.inodes.close_file(fd)
    }

    pub fn find_fd(&self, key: FileNameKey) -> Option<FileDescriptor> {
        self.inodes.find_fd(key)
    }

    #[must_use]
    pub fn owns_fd(&self, fd: FileDescriptor) -> bool {
        self.inodes.owns_fd(fd)
    }

    pub fn file_size(&self, fd: FileDescriptor) -> Result<u64> {
        self.ensure_open()?;
        self.inodes.file_size(fd)
    }

    pub fn data_chunk_size(&self, fd: FileDescriptor) -> Result<u64> {
        self.ensure_open()?;
        self.inodes.data_chunk_size(fd)
    }

    pub fn file_base_lpn(&self, fd: FileDescriptor) -> Result<Lpn> {
        self.ensure_open()?;
        self.inodes.file_base(fd)
    }

    pub fn inode_info(&self, fd: FileDescriptor) -> Result<InodeInfo> {
        self.ensure_open()?;
        self.inodes.inode_info(fd)
    }

    pub fn list_files(&self) -> Vec<FileInfo> {
        self.inodes.list_files()
    }

    #[must_use]
    pub fn available_bytes(&self) -> u64 {
        self.inodes.available_bytes()
    }

    #[must_use]
    pub fn utilization_pct(&self) -> u64 {
        self.inodes.utilization_pct()
    }

    #[must_use]
    pub fn file_count(&self) -> u32 {
        self.inodes.file_count()
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inodes.active_count()
    }

    /// Biggest contiguous free run in the file-data span, in pages.
    #[must_use]
    pub fn largest_free_run(&self) -> u64 {
        self.inodes.largest_free_run()
    }

    /// Highest LPN any file currently occupies; scans past this page
    /// cannot meet live data.
    #[must_use]
    pub fn last_valid_lpn(&self) -> Lpn {
        self.inodes.last_allocated_lpn()
    }
}

fn validate_file_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_parameter("empty file name"));
    }
    if name.len() > MAX_FILE_NAME_LEN {
        return Err(Error::invalid_parameter(format!(
            "file name longer than {MAX_FILE_NAME_LEN} bytes"
        )));
    }
    Ok(())
}
