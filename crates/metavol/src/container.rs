//! Volume container: owns both volumes of one array and routes every
//! file-control operation to the right one.
//!
//! Iteration order matters twice. On open the SSD volume must come up
//! first so its backup window is known before the NVRAM volume restores
//! from it. On close the SSD volume saves first and the NVRAM volume then
//! writes its backup through the shared page store into the window.

use crate::page_store::PageStore;
use crate::volume::{BackupRegion, MetaVolume};
use metavol_common::{
    Error, FileControlOp, FileControlReply, FileDescriptor, FileInfo, FileNameKey,
    FileProperties, Lpn, MetaVolConfig, Result, VolumeKind, file_name_key,
};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

pub struct MetaVolumeContainer {
    store: Arc<dyn PageStore>,
    config: MetaVolConfig,
    /// Keyed by kind; `VolumeKind`'s ordering puts the SSD volume first.
    volumes: BTreeMap<VolumeKind, MetaVolume>,
    backup: Option<BackupRegion>,
}

impl MetaVolumeContainer {
    pub fn new(store: Arc<dyn PageStore>, config: MetaVolConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            volumes: BTreeMap::new(),
            backup: None,
        })
    }

    /// Construct a volume over `[0, last_lpn]`. The media is untouched
    /// until [`format_all`](Self::format_all) or
    /// [`open_all`](Self::open_all).
    pub fn add_volume(&mut self, kind: VolumeKind, last_lpn: Lpn) -> Result<()> {
        if self.volumes.contains_key(&kind) {
            return Err(Error::already_exists(format!("{kind} volume")));
        }
        let volume = MetaVolume::new(self.store.clone(), kind, self.config.clone(), last_lpn)?;
        self.volumes.insert(kind, volume);
        Ok(())
    }

    #[must_use]
    pub fn volume_count(&self) -> usize {
        self.volumes.len()
    }

    fn volume(&self, kind: VolumeKind) -> Result<&MetaVolume> {
        self.volumes
            .get(&kind)
            .ok_or_else(|| Error::not_found(format!("{kind} volume")))
    }

    fn volume_mut(&mut self, kind: VolumeKind) -> Result<&mut MetaVolume> {
        self.volumes
            .get_mut(&kind)
            .ok_or_else(|| Error::not_found(format!("{kind} volume")))
    }

    /// Format every registered volume.
    pub fn format_all(&mut self) -> Result<()> {
        for volume in self.volumes.values_mut() {
            volume.create()?;
        }
        info!(volumes = self.volumes.len(), "all volumes formatted");
        Ok(())
    }

    /// Open every volume, SSD first. After an unclean shutdown the
    /// NVRAM volume is rebuilt from the backup window instead of its own
    /// (lost) pages.
    pub fn open_all(&mut self, clean_shutdown: bool) -> Result<()> {
        let mut backup = None;
        for (kind, volume) in &mut self.volumes {
            match kind {
                VolumeKind::SsdBacked => {
                    volume.open()?;
                    backup = volume.backup_region();
                }
                VolumeKind::NvramBacked => {
                    if clean_shutdown {
                        volume.open()?;
                    } else {
                        let backup = backup.as_ref().ok_or_else(|| {
                            Error::not_found("backup window for restore")
                        })?;
                        volume.open_from_backup(backup)?;
                    }
                }
            }
        }
        self.backup = backup;
        info!(clean_shutdown, "all volumes open");
        Ok(())
    }

    /// Close every volume, SSD first. Any volume with active files keeps
    /// the whole container open.
    pub fn close_all(&mut self) -> Result<()> {
        let active: usize = self.volumes.values().map(MetaVolume::active_count).sum();
        if active > 0 {
            return Err(Error::StillActive {
                active_files: active,
            });
        }
        let backup = self.backup;
        for (kind, volume) in &mut self.volumes {
            let window = match kind {
                VolumeKind::NvramBacked => backup.as_ref(),
                VolumeKind::SsdBacked => None,
            };
            volume.close(window)?;
        }
        info!("all volumes closed");
        Ok(())
    }

    fn volume_of_name(&self, key: FileNameKey) -> Option<VolumeKind> {
        self.volumes
            .iter()
            .find(|(_, v)| v.find_fd(key).is_some())
            .map(|(k, _)| *k)
    }

    fn volume_of_fd(&self, fd: FileDescriptor) -> Option<VolumeKind> {
        self.volumes
            .iter()
            .find(|(_, v)| v.owns_fd(fd))
            .map(|(k, _)| *k)
    }

    /// Pick the volume for a new file: the byte-addressable volume when
    /// it can hold the file, the block volume otherwise.
    fn determine_volume(&self, byte_size: u64, properties: FileProperties) -> Result<VolumeKind> {
        for kind in [VolumeKind::NvramBacked, VolumeKind::SsdBacked] {
            if let Some(volume) = self.volumes.get(&kind) {
                if volume.is_storable(byte_size, properties) {
                    return Ok(kind);
                }
            }
        }
        let requested_pages = self
            .config
            .round_up_to_granularity(self.config.pages_for_bytes(byte_size));
        Err(Error::NotEnoughSpace {
            requested_pages,
            available_pages: self
                .volumes
                .values()
                .map(MetaVolume::largest_free_run)
                .max()
                .unwrap_or(0),
        })
    }

    pub fn create_file(
        &mut self,
        name: &str,
        byte_size: u64,
        properties: FileProperties,
    ) -> Result<(FileDescriptor, VolumeKind)> {
        let key = file_name_key(name);
        if let Some(kind) = self.volume_of_name(key) {
            return Err(Error::already_exists(format!(
                "file {name} on {kind} volume"
            )));
        }
        if byte_size == 0 {
            return Err(Error::invalid_parameter("zero-byte file"));
        }
        let kind = self.determine_volume(byte_size, properties)?;
        let fd = self.volume_mut(kind)?.create_file(name, byte_size)?;
        debug!(name, fd, volume = %kind, "file placed");
        Ok((fd, kind))
    }

    pub fn delete_file(&mut self, name: &str) -> Result<FileDescriptor> {
        let kind = self
            .volume_of_name(file_name_key(name))
            .ok_or_else(|| Error::not_found(format!("file {name}")))?;
        self.volume_mut(kind)?.delete_file(name)
    }

    pub fn trim_file(&mut self, name: &str) -> Result<()> {
        let kind = self
            .volume_of_name(file_name_key(name))
            .ok_or_else(|| Error::not_found(format!("file {name}")))?;
        self.volume_mut(kind)?.trim_file(name)
    }

    pub fn open_file(&mut self, name: &str) -> Result<FileDescriptor> {
        let key = file_name_key(name);
        let kind = self
            .volume_of_name(key)
            .ok_or_else(|| Error::not_found(format!("file {name}")))?;
        self.volume_mut(kind)?.open_file(key)
    }

    pub fn close_file(&mut self, fd: FileDescriptor) -> Result<()> {
        let kind = self
            .volume_of_fd(fd)
            .ok_or_else(|| Error::not_found(format!("file descriptor {fd}")))?;
        self.volume_mut(kind)?.close_file(fd)
    }

    fn with_fd_volume<T>(
        &self,
        fd: FileDescriptor,
        f: impl FnOnce(&MetaVolume) -> Result<T>,
    ) -> Result<T> {
        let kind = self
            .volume_of_fd(fd)
            .ok_or_else(|| Error::not_found(format!("file descriptor {fd}")))?;
        f(self.volume(kind)?)
    }

    /// Free capacity in bytes across both volumes, whole allocation
    /// units only.
    #[must_use]
    pub fn available_space(&self) -> u64 {
        self.volumes.values().map(MetaVolume::available_bytes).sum()
    }

    #[must_use]
    pub fn list_files(&self) -> Vec<FileInfo> {
        self.volumes
            .values()
            .flat_map(MetaVolume::list_files)
            .collect()
    }

    /// Serve one file-control request.
    pub fn handle(&mut self, op: FileControlOp) -> Result<FileControlReply> {
        match op {
            FileControlOp::CreateFile {
                name,
                byte_size,
                properties,
            } => {
                let (fd, volume) = self.create_file(&name, byte_size, properties)?;
                Ok(FileControlReply::Created { fd, volume })
            }
            FileControlOp::DeleteFile { name } => {
                let fd = self.delete_file(&name)?;
                Ok(FileControlReply::Deleted { fd })
            }
            FileControlOp::TrimFile { name } => {
                self.trim_file(&name)?;
                Ok(FileControlReply::Trimmed)
            }
            FileControlOp::OpenFile { name } => {
                let fd = self.open_file(&name)?;
                Ok(FileControlReply::Opened { fd })
            }
            FileControlOp::CloseFile { fd } => {
                self.close_file(fd)?;
                Ok(FileControlReply::Closed)
            }
            FileControlOp::GetFileSize { fd } => {
                self.with_fd_volume(fd, |v| v.file_size(fd)).map(FileControlReply::FileSize)
            }
            FileControlOp::GetDataChunkSize { fd } => self
                .with_fd_volume(fd, |v| v.data_chunk_size(fd))
                .map(FileControlReply::DataChunkSize),
            FileControlOp::GetFileBaseLpn { fd } => self
                .with_fd_volume(fd, |v| v.file_base_lpn(fd))
                .map(FileControlReply::BaseLpn),
            FileControlOp::GetInodeInfo { fd } => self
                .with_fd_volume(fd, |v| v.inode_info(fd))
                .map(|info| FileControlReply::Inode(Box::new(info))),
            FileControlOp::GetAvailableSpace => {
                Ok(FileControlReply::AvailableSpace(self.available_space()))
            }
            FileControlOp::ListFiles => Ok(FileControlReply::FileList(self.list_files())),
        }
    }
}

/// Cloneable handle sharing one container across threads.
#[derive(Clone)]
pub struct SharedContainer {
    inner: Arc<RwLock<MetaVolumeContainer>>,
}

impl SharedContainer {
    #[must_use]
    pub fn new(container: MetaVolumeContainer) -> Self {
        Self {
            inner: Arc::new(RwLock::new(container)),
        }
    }

    pub fn handle(&self, op: FileControlOp) -> Result<FileControlReply> {
        self.inner.write().handle(op)
    }

    /// Read-only access for queries.
    pub fn with_read<T>(&self, f: impl FnOnce(&MetaVolumeContainer) -> T) -> T {
        f(&self.inner.read())
    }

    /// Exclusive access for lifecycle operations.
    pub fn with_write<T>(&self, f: impl FnOnce(&mut MetaVolumeContainer) -> T) -> T {
        f(&mut self.inner.write())
    }
}
