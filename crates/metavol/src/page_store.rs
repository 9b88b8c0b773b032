//! Page-storage collaborator interface
//!
//! The raw page subsystem lives outside this layer; the core only needs
//! page-granular, volume-kind-scoped reads, writes, and trims. All calls are
//! synchronous from this layer's point of view.
//!
//! [`MemPageStore`] is the in-crate implementation used by tests and
//! bring-up tooling. It keeps one page array per volume kind behind a lock
//! and can inject write failures and trim unavailability so persist-failure
//! and trim-fallback paths are exercisable.

use metavol_common::{Error, Lpn, Result, VolumeKind};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Synchronous page I/O scoped to one array's volumes.
pub trait PageStore: Send + Sync {
    /// Size of one logical page in bytes.
    fn page_size(&self) -> usize;

    /// Read `pages` pages starting at `start_lpn` into `buf`.
    ///
    /// `buf` must hold exactly `pages * page_size` bytes.
    fn read_pages(&self, volume: VolumeKind, start_lpn: Lpn, buf: &mut [u8], pages: u64)
    -> Result<()>;

    /// Write `pages` pages starting at `start_lpn` from `buf`.
    fn write_pages(&self, volume: VolumeKind, start_lpn: Lpn, buf: &[u8], pages: u64)
    -> Result<()>;

    /// Hardware trim of a page range. Implementations that cannot trim
    /// return [`Error::Unsupported`]; the caller falls back to zero-fill.
    fn trim_pages(&self, volume: VolumeKind, start_lpn: Lpn, pages: u64) -> Result<()>;
}

/// In-memory page store backing both volumes of one array.
pub struct MemPageStore {
    page_size: usize,
    volumes: HashMap<VolumeKind, RwLock<Vec<u8>>>,
    capacity: HashMap<VolumeKind, u64>,
    /// Countdown of writes to fail, for persist-failure tests
    fail_writes: AtomicU64,
    supports_trim: bool,
}

impl MemPageStore {
    /// Allocate zeroed backing for both volume kinds.
    #[must_use]
    pub fn new(page_size: usize, ssd_pages: u64, nvram_pages: u64) -> Self {
        let mut volumes = HashMap::new();
        let mut capacity = HashMap::new();
        for (kind, pages) in [
            (VolumeKind::SsdBacked, ssd_pages),
            (VolumeKind::NvramBacked, nvram_pages),
        ] {
            volumes.insert(kind, RwLock::new(vec![0u8; page_size * pages as usize]));
            capacity.insert(kind, pages);
        }
        Self {
            page_size,
            volumes,
            capacity,
            fail_writes: AtomicU64::new(0),
            supports_trim: true,
        }
    }

    /// Disable hardware trim so callers must take the zero-fill fallback.
    #[must_use]
    pub fn without_trim(mut self) -> Self {
        self.supports_trim = false;
        self
    }

    /// Fail the next `count` writes with a persist error.
    pub fn fail_next_writes(&self, count: u64) {
        self.fail_writes.store(count, Ordering::SeqCst);
    }

    /// Zero every page of one volume, simulating volatile-memory loss
    /// across an unclean restart.
    pub fn wipe_volume(&self, volume: VolumeKind) {
        if let Some(pages) = self.volumes.get(&volume) {
            pages.write().fill(0);
        }
    }

    /// Raw read of one page, for test assertions.
    #[must_use]
    pub fn page_snapshot(&self, volume: VolumeKind, lpn: Lpn) -> Vec<u8> {
        let pages = self.volumes.get(&volume).expect("volume exists");
        let offset = lpn as usize * self.page_size;
        pages.read()[offset..offset + self.page_size].to_vec()
    }

    fn check_range(&self, volume: VolumeKind, start_lpn: Lpn, pages: u64) -> Result<()> {
        let cap = *self
            .capacity
            .get(&volume)
            .ok_or_else(|| Error::not_found(format!("volume {volume}")))?;
        if start_lpn + pages > cap {
            return Err(Error::invalid_parameter(format!(
                "page range [{start_lpn}, {}) beyond volume {volume} capacity {cap}",
                start_lpn + pages
            )));
        }
        Ok(())
    }
}

impl PageStore for MemPageStore {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn read_pages(
        &self,
        volume: VolumeKind,
        start_lpn: Lpn,
        buf: &mut [u8],
        pages: u64,
    ) -> Result<()> {
        self.check_range(volume, start_lpn, pages)?;
        let len = pages as usize * self.page_size;
        if buf.len() != len {
            return Err(Error::invalid_parameter(format!(
                "read buffer is {} bytes, expected {len}",
                buf.len()
            )));
        }
        let data = self.volumes[&volume].read();
        let offset = start_lpn as usize * self.page_size;
        buf.copy_from_slice(&data[offset..offset + len]);
        Ok(())
    }

    fn write_pages(
        &self,
        volume: VolumeKind,
        start_lpn: Lpn,
        buf: &[u8],
        pages: u64,
    ) -> Result<()> {
        self.check_range(volume, start_lpn, pages)?;
        let len = pages as usize * self.page_size;
        if buf.len() != len {
            return Err(Error::invalid_parameter(format!(
                "write buffer is {} bytes, expected {len}",
                buf.len()
            )));
        }
        if self
            .fail_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::persist_failed(format!(
                "injected write failure at lpn {start_lpn}"
            )));
        }
        let mut data = self.volumes[&volume].write();
        let offset = start_lpn as usize * self.page_size;
        data[offset..offset + len].copy_from_slice(buf);
        Ok(())
    }

    fn trim_pages(&self, volume: VolumeKind, start_lpn: Lpn, pages: u64) -> Result<()> {
        if !self.supports_trim {
            return Err(Error::Unsupported("trim".into()));
        }
        self.check_range(volume, start_lpn, pages)?;
        let mut data = self.volumes[&volume].write();
        let offset = start_lpn as usize * self.page_size;
        let len = pages as usize * self.page_size;
        data[offset..offset + len].fill(0);
        Ok(())
    }
}
