//! End-to-end lifecycle tests over an in-memory page store: format,
//! serve, close, and both restart flavors.

use metavol::{MemPageStore, MetaVolConfig, MetaVolumeContainer};
use metavol_common::{
    AccessPattern, Error, FileControlOp, FileControlReply, FileProperties, IoDominance,
    VolumeKind,
};
use std::sync::Arc;

fn config() -> MetaVolConfig {
    MetaVolConfig {
        page_size: 512,
        data_chunk_size: 448,
        extent_granularity: 8,
        extent_slots_per_inode: 8,
        snapshot_extent_capacity: 16,
        max_file_count: 8,
    }
}

fn journal_props() -> FileProperties {
    FileProperties {
        access: AccessPattern::ByteIntensive,
        dominance: IoDominance::WriteDominant,
    }
}

fn build(store: Arc<MemPageStore>) -> MetaVolumeContainer {
    let mut c = MetaVolumeContainer::new(store, config()).unwrap();
    c.add_volume(VolumeKind::SsdBacked, 511).unwrap();
    c.add_volume(VolumeKind::NvramBacked, 127).unwrap();
    c
}

#[test]
fn files_survive_clean_restart() {
    let store = Arc::new(MemPageStore::new(512, 512, 128));

    let mut c = build(store.clone());
    c.format_all().unwrap();
    c.open_all(true).unwrap();
    let (wal_fd, wal_vol) = c.create_file("wal", 1000, journal_props()).unwrap();
    let (map_fd, map_vol) = c
        .create_file("segmap", 150 * 448, FileProperties::default())
        .unwrap();
    assert_eq!(wal_vol, VolumeKind::NvramBacked);
    assert_eq!(map_vol, VolumeKind::SsdBacked);
    let space_before = c.available_space();
    c.close_all().unwrap();

    // Same media, new process.
    let mut c = build(store);
    c.open_all(true).unwrap();
    assert_eq!(c.open_file("wal").unwrap(), wal_fd);
    assert_eq!(c.open_file("segmap").unwrap(), map_fd);
    assert_eq!(c.available_space(), space_before);
    assert_eq!(
        c.handle(FileControlOp::GetFileSize { fd: map_fd }).unwrap(),
        FileControlReply::FileSize(150 * 448)
    );
    c.close_file(wal_fd).unwrap();
    c.close_file(map_fd).unwrap();
    c.close_all().unwrap();
}

#[test]
fn nvram_content_restored_after_power_loss() {
    let store = Arc::new(MemPageStore::new(512, 512, 128));

    let mut c = build(store.clone());
    c.format_all().unwrap();
    c.open_all(true).unwrap();
    let (wal_fd, _) = c.create_file("wal", 2000, journal_props()).unwrap();
    let wal_info = c
        .handle(FileControlOp::GetInodeInfo { fd: wal_fd })
        .unwrap();
    c.create_file("ckpt", 150 * 448, FileProperties::default())
        .unwrap();
    c.close_all().unwrap();

    // Power loss: the byte-addressable volume forgets everything.
    store.wipe_volume(VolumeKind::NvramBacked);

    let mut c = build(store);
    c.open_all(false).unwrap();
    let fd = c.open_file("wal").unwrap();
    assert_eq!(fd, wal_fd);
    let restored = c.handle(FileControlOp::GetInodeInfo { fd }).unwrap();
    assert_eq!(restored, wal_info);
    c.close_file(fd).unwrap();

    // The restored volume keeps serving: allocate more on it.
    let (fd2, vol) = c.create_file("wal2", 1000, journal_props()).unwrap();
    assert_eq!(vol, VolumeKind::NvramBacked);
    assert_ne!(fd2, fd);
    c.close_all().unwrap();
}

#[test]
fn wiped_nvram_without_backup_flag_fails_open() {
    let store = Arc::new(MemPageStore::new(512, 512, 128));
    let mut c = build(store.clone());
    c.format_all().unwrap();
    c.open_all(true).unwrap();
    c.close_all().unwrap();

    store.wipe_volume(VolumeKind::NvramBacked);

    // Claiming a clean shutdown makes the NVRAM volume read its own
    // wiped pages, which the catalog check rejects.
    let mut c = build(store);
    let err = c.open_all(true).unwrap_err();
    assert!(matches!(err, Error::CorruptVolume(_)));
}

#[test]
fn block_volume_keeps_one_unit_of_slack() {
    // A volume with exactly ten free file-data pages.
    let cfg = MetaVolConfig {
        max_file_count: 4,
        snapshot_extent_capacity: 8,
        ..config()
    };
    // Regions: catalog 1 + header 1 + table 4 end at page 6; ten pages
    // of file data follow.
    let store = Arc::new(MemPageStore::new(512, 64, 16));
    let mut c = MetaVolumeContainer::new(store, cfg).unwrap();
    c.add_volume(VolumeKind::NvramBacked, 15).unwrap();
    c.format_all().unwrap();
    c.open_all(true).unwrap();

    // One page short of a second allocation unit: a plain file whose
    // rounded size equals the last whole unit is refused.
    let err = c
        .create_file("plain", 449, FileProperties::default())
        .unwrap_err();
    assert!(err.is_out_of_space());

    // The byte-addressable threshold accepts the same file.
    let (_, vol) = c.create_file("hot", 449, journal_props()).unwrap();
    assert_eq!(vol, VolumeKind::NvramBacked);
    c.close_all().unwrap();
}

#[test]
fn active_files_block_shutdown() {
    let store = Arc::new(MemPageStore::new(512, 512, 128));
    let mut c = build(store);
    c.format_all().unwrap();
    c.open_all(true).unwrap();
    c.create_file("held", 100, journal_props()).unwrap();
    let fd = c.open_file("held").unwrap();

    assert!(matches!(
        c.close_all().unwrap_err(),
        Error::StillActive { active_files: 1 }
    ));
    // Still serving after the refused shutdown.
    assert_eq!(
        c.handle(FileControlOp::GetFileSize { fd }).unwrap(),
        FileControlReply::FileSize(100)
    );
    c.close_file(fd).unwrap();
    c.close_all().unwrap();
}

#[test]
fn delete_and_trim_through_the_request_surface() {
    let store = Arc::new(MemPageStore::new(512, 512, 128).without_trim());
    let mut c = build(store);
    c.format_all().unwrap();
    c.open_all(true).unwrap();

    c.handle(FileControlOp::CreateFile {
        name: "scratch".into(),
        byte_size: 800,
        properties: journal_props(),
    })
    .unwrap();
    assert_eq!(
        c.handle(FileControlOp::TrimFile {
            name: "scratch".into()
        })
        .unwrap(),
        FileControlReply::Trimmed
    );

    let reply = c
        .handle(FileControlOp::DeleteFile {
            name: "scratch".into(),
        })
        .unwrap();
    assert!(matches!(reply, FileControlReply::Deleted { .. }));
    assert!(matches!(
        c.handle(FileControlOp::OpenFile {
            name: "scratch".into()
        }),
        Err(Error::NotFound(_))
    ));
    c.close_all().unwrap();
}
