//! One inode: the persisted record of a metadata file

use metavol_common::{Extent, FileDescriptor, InodeInfo, Lpn, VolumeKind, INVALID_LPN};
use serde::{Deserialize, Serialize};

/// Persisted per-file record. One table slot holds exactly one entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InodeEntry {
    pub fd: FileDescriptor,
    pub name: String,
    pub byte_size: u64,
    pub data_chunk_size: u64,
    pub volume: VolumeKind,
    /// Index of the table slot holding this entry
    pub slot: u32,
    /// Page runs owned by the file, lowest-first
    pub extents: Vec<Extent>,
}

impl InodeEntry {
    /// Total pages owned by the file.
    #[must_use]
    pub fn pages(&self) -> u64 {
        self.extents.iter().map(|e| e.count).sum()
    }

    /// First page of the file, or [`INVALID_LPN`] for a zero-extent file.
    #[must_use]
    pub fn base_lpn(&self) -> Lpn {
        self.extents
            .first()
            .map_or(INVALID_LPN, |e| e.start_lpn)
    }

    #[must_use]
    pub fn to_info(&self) -> InodeInfo {
        InodeInfo {
            fd: self.fd,
            name: self.name.clone(),
            byte_size: self.byte_size,
            data_chunk_size: self.data_chunk_size,
            base_lpn: self.base_lpn(),
            extents: self.extents.clone(),
            volume: self.volume,
        }
    }
}
