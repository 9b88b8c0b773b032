//! Inode bookkeeping for one metadata volume
//!
//! The header region carries the slot bitmap and allocated-extents
//! snapshot; the table region carries one inode per page. The manager
//! composes both with the descriptor and extent allocators.

pub mod entry;
pub mod header;
pub mod manager;
pub mod ops;
pub mod table;

pub use entry::InodeEntry;
pub use manager::InodeManager;
pub use ops::{InodeCreator, InodeDeleter};
