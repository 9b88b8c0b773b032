//! Fixed-region serialization helpers
//!
//! The inode header and table live in fixed page windows. Content is
//! bincode-encoded into a zero-padded buffer spanning the whole window, so
//! every store writes the same page count and every load reads it back.
//! bincode tolerates trailing zero padding on decode.

use crate::page_store::PageStore;
use metavol_common::{Error, Lpn, Result, VolumeKind};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Serialize `content` and write it to `pages` pages at `base_lpn`.
pub fn store_region<T: Serialize>(
    store: &dyn PageStore,
    volume: VolumeKind,
    base_lpn: Lpn,
    pages: u64,
    content: &T,
) -> Result<()> {
    let len = pages as usize * store.page_size();
    let encoded = bincode::serialize(content)
        .map_err(|e| Error::persist_failed(format!("region encode: {e}")))?;
    if encoded.len() > len {
        return Err(Error::persist_failed(format!(
            "region content is {} bytes, window holds {len}",
            encoded.len()
        )));
    }
    let mut buf = vec![0u8; len];
    buf[..encoded.len()].copy_from_slice(&encoded);
    store.write_pages(volume, base_lpn, &buf, pages)
}

/// Read `pages` pages at `base_lpn` and deserialize the content.
pub fn load_region<T: DeserializeOwned>(
    store: &dyn PageStore,
    volume: VolumeKind,
    base_lpn: Lpn,
    pages: u64,
) -> Result<T> {
    let len = pages as usize * store.page_size();
    let mut buf = vec![0u8; len];
    store.read_pages(volume, base_lpn, &mut buf, pages)?;
    bincode::deserialize(&buf).map_err(|e| Error::corrupt_volume(format!("region decode: {e}")))
}
