//! Core type definitions for MetaVol
//!
//! Logical page addressing, extents, volume/region kinds, file properties,
//! and the request/completion payloads exchanged with the dispatch layer.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh64::xxh64;

/// Logical page number: offset into a volume's logical page space.
pub type Lpn = u64;

/// Marker for an unassigned LPN.
pub const INVALID_LPN: Lpn = Lpn::MAX;

/// Small integer handle for an open metadata file.
pub type FileDescriptor = u32;

/// Hash key derived from a file name.
pub type FileNameKey = u64;

/// Maximum accepted file name length in bytes.
pub const MAX_FILE_NAME_LEN: usize = 127;

/// Compute the lookup key for a file name.
#[must_use]
pub fn file_name_key(name: &str) -> FileNameKey {
    xxh64(name.as_bytes(), 0)
}

/// The two physically distinct metadata volumes managed per array.
///
/// Declaration order matters: iteration in `Ord` order visits the SSD
/// volume first, which seeds the NVRAM backup window (see the container).
#[derive(
    Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum VolumeKind {
    /// Block-addressed volume; also hosts the NVRAM backup region.
    #[display("ssd")]
    SsdBacked,
    /// Byte-addressable volume; restored from the SSD backup after an
    /// unclean restart.
    #[display("nvram")]
    NvramBacked,
}

/// On-volume metadata regions, in placement order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegionKind {
    Catalog,
    InodeHeader,
    InodeTable,
}

/// A contiguous run of logical pages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Extent {
    /// First LPN of the run
    pub start_lpn: Lpn,
    /// Number of pages in the run; never zero in a live extent
    pub count: u64,
}

impl Extent {
    /// Create a new extent
    #[must_use]
    pub const fn new(start_lpn: Lpn, count: u64) -> Self {
        Self { start_lpn, count }
    }

    /// First LPN past the end of the run
    #[must_use]
    pub const fn end(&self) -> Lpn {
        self.start_lpn + self.count
    }

    /// Last LPN covered by the run
    #[must_use]
    pub const fn last(&self) -> Lpn {
        self.start_lpn + self.count - 1
    }

    /// Check if this extent contains an LPN
    #[must_use]
    pub const fn contains(&self, lpn: Lpn) -> bool {
        lpn >= self.start_lpn && lpn < self.end()
    }

    /// Check if two extents overlap
    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.start_lpn < other.end() && other.start_lpn < self.end()
    }

    /// Merge with another extent if the two runs touch
    #[must_use]
    pub fn try_merge(&self, other: &Self) -> Option<Self> {
        if self.end() == other.start_lpn {
            Some(Self::new(self.start_lpn, self.count + other.count))
        } else if other.end() == self.start_lpn {
            Some(Self::new(other.start_lpn, self.count + other.count))
        } else {
            None
        }
    }
}

/// Expected access pattern of a metadata file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessPattern {
    #[default]
    Default,
    /// Sub-page updates dominate
    ByteIntensive,
    /// Small block I/O dominates
    SmallBlock,
}

/// Read/write balance of a metadata file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IoDominance {
    #[default]
    ReadDominant,
    WriteDominant,
}

/// Placement hints attached to a file at creation time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileProperties {
    pub access: AccessPattern,
    pub dominance: IoDominance,
}

impl FileProperties {
    /// Whether the file profits from the byte-addressable volume enough
    /// that the looser NVRAM acceptance threshold applies.
    #[must_use]
    pub fn favors_byte_addressable(&self) -> bool {
        !matches!(self.access, AccessPattern::Default)
            || matches!(self.dominance, IoDominance::WriteDominant)
    }
}

/// Per-file metadata snapshot returned through the query surface.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeInfo {
    pub fd: FileDescriptor,
    pub name: String,
    pub byte_size: u64,
    pub data_chunk_size: u64,
    pub base_lpn: Lpn,
    pub extents: Vec<Extent>,
    pub volume: VolumeKind,
}

/// One row of the file-list completion payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub fd: FileDescriptor,
    pub name: String,
    pub byte_size: u64,
    pub volume: VolumeKind,
}

/// A file-control request from the dispatch layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FileControlOp {
    CreateFile {
        name: String,
        byte_size: u64,
        properties: FileProperties,
    },
    DeleteFile {
        name: String,
    },
    TrimFile {
        name: String,
    },
    OpenFile {
        name: String,
    },
    CloseFile {
        fd: FileDescriptor,
    },
    GetFileSize {
        fd: FileDescriptor,
    },
    GetDataChunkSize {
        fd: FileDescriptor,
    },
    GetFileBaseLpn {
        fd: FileDescriptor,
    },
    GetInodeInfo {
        fd: FileDescriptor,
    },
    GetAvailableSpace,
    ListFiles,
}

/// The completion payload matching a [`FileControlOp`]; the payload shape
/// is determined by the operation kind and decoded exhaustively.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FileControlReply {
    Created { fd: FileDescriptor, volume: VolumeKind },
    Deleted { fd: FileDescriptor },
    Trimmed,
    Opened { fd: FileDescriptor },
    Closed,
    FileSize(u64),
    DataChunkSize(u64),
    BaseLpn(Lpn),
    Inode(Box<InodeInfo>),
    AvailableSpace(u64),
    FileList(Vec<FileInfo>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extent_basic() {
        let extent = Extent::new(10, 5);
        assert_eq!(extent.end(), 15);
        assert_eq!(extent.last(), 14);
        assert!(extent.contains(10));
        assert!(extent.contains(14));
        assert!(!extent.contains(15));
    }

    #[test]
    fn test_extent_merge() {
        let a = Extent::new(0, 8);
        let b = Extent::new(8, 8);
        assert_eq!(a.try_merge(&b), Some(Extent::new(0, 16)));
        assert_eq!(b.try_merge(&a), Some(Extent::new(0, 16)));

        let c = Extent::new(24, 8);
        assert!(a.try_merge(&c).is_none());
    }

    #[test]
    fn test_extent_overlap() {
        let a = Extent::new(0, 16);
        assert!(a.overlaps(&Extent::new(8, 16)));
        assert!(!a.overlaps(&Extent::new(16, 8)));
    }

    #[test]
    fn test_name_key_stable() {
        assert_eq!(file_name_key("segment.map"), file_name_key("segment.map"));
        assert_ne!(file_name_key("segment.map"), file_name_key("segment.ctx"));
    }

    #[test]
    fn test_volume_kind_order() {
        // SSD must sort first: open/close iterate in this order.
        assert!(VolumeKind::SsdBacked < VolumeKind::NvramBacked);
    }

    #[test]
    fn test_properties_threshold() {
        assert!(!FileProperties::default().favors_byte_addressable());
        let journalish = FileProperties {
            access: AccessPattern::ByteIntensive,
            dominance: IoDominance::WriteDominant,
        };
        assert!(journalish.favors_byte_addressable());
    }
}
