//! Metadata-volume layer of a log-structured storage array
//!
//! Each array carries two metadata volumes: a block-addressed SSD volume
//! and a byte-addressable NVRAM volume. Files are placed by size and
//! access properties, tracked through per-volume inode regions, and the
//! NVRAM volume's content survives power loss inside a backup window
//! reserved on the SSD volume.
//!
//! Entry points: [`MetaVolumeContainer`] for a whole array,
//! [`MetaVolume`] for a single volume, and the [`PageStore`] trait for
//! the page I/O the layer runs on.

pub mod catalog;
pub mod container;
pub mod extent_alloc;
pub mod fd_alloc;
pub mod inode;
pub mod page_store;
pub mod region;
pub mod volume;

pub use catalog::CatalogManager;
pub use container::{MetaVolumeContainer, SharedContainer};
pub use extent_alloc::ExtentAllocator;
pub use fd_alloc::FdAllocator;
pub use inode::{InodeEntry, InodeManager};
pub use page_store::{MemPageStore, PageStore};
pub use volume::{BackupRegion, MetaVolume, VolumeState};

pub use metavol_common::{Error, MetaVolConfig, Result};
