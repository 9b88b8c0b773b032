//! Two-phase create and delete
//!
//! Both operations mutate in-memory state first and persist second. A
//! persist failure during create rolls every in-memory step back, so the
//! volume keeps serving from the last durable state. A persist failure
//! during delete keeps the in-memory removal and surfaces the error; the
//! stale on-media record is overwritten by the next save.

use crate::inode::entry::InodeEntry;
use crate::inode::manager::InodeManager;
use metavol_common::{Error, FileDescriptor, Result, file_name_key};
use tracing::{debug, error};

pub struct InodeCreator<'a> {
    mgr: &'a mut InodeManager,
}

impl<'a> InodeCreator<'a> {
    pub fn new(mgr: &'a mut InodeManager) -> Self {
        Self { mgr }
    }

    pub fn execute(self, name: &str, byte_size: u64) -> Result<FileDescriptor> {
        let mgr = self.mgr;
        let key = file_name_key(name);
        let pages = mgr.config().pages_for_bytes(byte_size);
        let extents = mgr.extent_alloc.allocate(pages)?;

        let fd = match mgr.fd_alloc.allocate(key) {
            Ok(fd) => fd,
            Err(e) => {
                for ext in &extents {
                    mgr.extent_alloc.release(ext.start_lpn, ext.count);
                }
                return Err(e);
            }
        };

        let slot = match mgr.header.take_slot() {
            Ok(slot) => slot,
            Err(e) => {
                let _ = mgr.fd_alloc.free(key, fd);
                for ext in &extents {
                    mgr.extent_alloc.release(ext.start_lpn, ext.count);
                }
                return Err(e);
            }
        };

        let entry = InodeEntry {
            fd,
            name: name.to_owned(),
            byte_size,
            data_chunk_size: mgr.config().data_chunk_size,
            volume: mgr.volume(),
            slot,
            extents: extents.clone(),
        };
        mgr.table.set_entry(slot, entry)?;
        mgr.bind_slot(fd, slot);

        if let Err(e) = Self::persist(mgr, slot, pages) {
            error!(volume = %mgr.volume(), name, "create persist failed, rolling back");
            mgr.unbind_slot(fd);
            let _ = mgr.table.clear_entry(slot);
            mgr.header.untake_slot(slot)?;
            let _ = mgr.fd_alloc.free(key, fd);
            for ext in &extents {
                mgr.extent_alloc.release(ext.start_lpn, ext.count);
            }
            return Err(e);
        }

        debug!(volume = %mgr.volume(), name, fd, slot, pages, "file created");
        Ok(fd)
    }

    fn persist(mgr: &mut InodeManager, slot: u32, pages: u64) -> Result<()> {
        // The header region is sized for a bounded snapshot; refuse a
        // create that would push the volume past that bound.
        let snapshot = mgr.extent_alloc.snapshot_allocated();
        if snapshot.len() > mgr.config().snapshot_extent_capacity {
            return Err(Error::NotEnoughSpace {
                requested_pages: pages,
                available_pages: mgr.largest_free_run(),
            });
        }
        mgr.table.store_slot(slot)?;
        mgr.header.set_allocated(snapshot);
        mgr.header.store()
    }
}

pub struct InodeDeleter<'a> {
    mgr: &'a mut InodeManager,
}

impl<'a> InodeDeleter<'a> {
    pub fn new(mgr: &'a mut InodeManager) -> Self {
        Self { mgr }
    }

    pub fn execute(self, name: &str) -> Result<FileDescriptor> {
        let mgr = self.mgr;
        let key = file_name_key(name);
        let fd = mgr
            .fd_alloc
            .find(key)
            .ok_or_else(|| Error::not_found(format!("file {name}")))?;
        if mgr.is_active(fd) {
            return Err(Error::StillActive { active_files: 1 });
        }

        let slot = mgr
            .unbind_slot(fd)
            .ok_or_else(|| Error::corrupt_volume(format!("descriptor {fd} has no slot")))?;
        let entry = mgr.table.clear_entry(slot)?;
        for ext in &entry.extents {
            mgr.extent_alloc.release(ext.start_lpn, ext.count);
        }
        mgr.header.put_slot(slot)?;
        mgr.fd_alloc.free(key, fd)?;

        // The slot page itself need not be rewritten; the cleared bitmap
        // bit makes it unreachable.
        mgr.header
            .set_allocated(mgr.extent_alloc.snapshot_allocated());
        if let Err(e) = mgr.header.store() {
            error!(volume = %mgr.volume(), name, "delete persisted partially");
            return Err(e);
        }

        debug!(volume = %mgr.volume(), name, fd, slot, "file deleted");
        Ok(fd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::RegionEntry;
    use crate::page_store::MemPageStore;
    use metavol_common::{Extent, MetaVolConfig, VolumeKind};
    use std::sync::Arc;

    fn setup() -> (Arc<MemPageStore>, InodeManager) {
        let store = Arc::new(MemPageStore::new(512, 128, 128));
        let config = MetaVolConfig {
            page_size: 512,
            data_chunk_size: 448,
            extent_granularity: 8,
            extent_slots_per_inode: 4,
            snapshot_extent_capacity: 16,
            max_file_count: 8,
        };
        let mgr = InodeManager::new(
            store.clone(),
            VolumeKind::NvramBacked,
            config,
            RegionEntry {
                base_lpn: 1,
                pages: 2,
            },
            RegionEntry {
                base_lpn: 3,
                pages: 8,
            },
            11,
            127,
            0,
        );
        (store, mgr)
    }

    #[test]
    fn test_create_then_lookup() {
        let (_, mut mgr) = setup();
        let fd = InodeCreator::new(&mut mgr).execute("vsa.map", 1000).unwrap();
        assert_eq!(mgr.find_fd(file_name_key("vsa.map")), Some(fd));
        assert_eq!(mgr.file_size(fd).unwrap(), 1000);
        // 1000 bytes over 448-byte chunks is 3 pages, rounded to 8.
        assert_eq!(mgr.file_extents(fd).unwrap(), vec![Extent::new(11, 8)]);
        assert_eq!(mgr.available_pages(), 117 - 8);
    }

    #[test]
    fn test_duplicate_create_releases_extents() {
        let (_, mut mgr) = setup();
        InodeCreator::new(&mut mgr).execute("a", 100).unwrap();
        let before = mgr.available_pages();
        assert!(InodeCreator::new(&mut mgr).execute("a", 100).is_err());
        assert_eq!(mgr.available_pages(), before);
    }

    #[test]
    fn test_delete_is_inverse_of_create() {
        let (_, mut mgr) = setup();
        let before = mgr.available_pages();
        InodeCreator::new(&mut mgr).execute("tmp", 5000).unwrap();
        let fd = InodeDeleter::new(&mut mgr).execute("tmp").unwrap();
        assert_eq!(mgr.available_pages(), before);
        assert!(!mgr.owns_fd(fd));
        assert_eq!(mgr.file_count(), 0);
        assert!(InodeDeleter::new(&mut mgr).execute("tmp").is_err());
    }

    #[test]
    fn test_delete_refused_while_active() {
        let (_, mut mgr) = setup();
        InodeCreator::new(&mut mgr).execute("busy", 100).unwrap();
        mgr.open_file(file_name_key("busy")).unwrap();
        assert!(matches!(
            InodeDeleter::new(&mut mgr).execute("busy"),
            Err(Error::StillActive { .. })
        ));
    }

    #[test]
    fn test_create_persist_failure_rolls_back() {
        let (store, mut mgr) = setup();
        let before = mgr.available_pages();
        store.fail_next_writes(1);
        let err = InodeCreator::new(&mut mgr).execute("lost", 100).unwrap_err();
        assert!(matches!(err, Error::PersistFailed(_)));

        assert_eq!(mgr.available_pages(), before);
        assert_eq!(mgr.file_count(), 0);
        assert!(mgr.find_fd(file_name_key("lost")).is_none());
        // The same name creates cleanly afterwards with the same resources.
        let fd = InodeCreator::new(&mut mgr).execute("lost", 100).unwrap();
        assert_eq!(fd, 0);
        assert_eq!(mgr.file_extents(fd).unwrap(), vec![Extent::new(11, 8)]);
    }

    #[test]
    fn test_delete_persist_failure_keeps_removal() {
        let (store, mut mgr) = setup();
        InodeCreator::new(&mut mgr).execute("doomed", 100).unwrap();
        store.fail_next_writes(1);
        let err = InodeDeleter::new(&mut mgr).execute("doomed").unwrap_err();
        assert!(matches!(err, Error::PersistFailed(_)));
        // In-memory removal stands.
        assert!(mgr.find_fd(file_name_key("doomed")).is_none());
        assert_eq!(mgr.file_count(), 0);
    }

    #[test]
    fn test_fragmented_file_respects_extent_limit() {
        let (_, mut mgr) = setup();
        // Fragment the span: eight 8-page files, delete every other one.
        for name in ["a", "b", "c", "d", "e", "f", "g", "h"] {
            InodeCreator::new(&mut mgr).execute(name, 100).unwrap();
        }
        for name in ["a", "c", "e", "g"] {
            InodeDeleter::new(&mut mgr).execute(name).unwrap();
        }
        // Five free runs: four 8-page holes plus the 53-page tail.
        assert_eq!(mgr.available_pages(), 85);

        // 80 pages fit, but only across five runs; the inode holds four.
        let err = InodeCreator::new(&mut mgr)
            .execute("wide", 80 * 448)
            .unwrap_err();
        assert!(err.is_out_of_space());
        assert_eq!(mgr.available_pages(), 85);
    }
}
