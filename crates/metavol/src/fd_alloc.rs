//! File-descriptor allocation and name lookup
//!
//! Each volume hands out descriptors from its own disjoint range so a
//! descriptor alone identifies the owning volume. Free descriptors are
//! reissued lowest-first. Name lookup goes through the hashed name key.

use metavol_common::{Error, FileDescriptor, FileNameKey, Result};
use std::collections::{BTreeSet, HashMap};

pub struct FdAllocator {
    /// First descriptor of this volume's range
    base: FileDescriptor,
    capacity: u32,
    free: BTreeSet<FileDescriptor>,
    lookup: HashMap<FileNameKey, FileDescriptor>,
}

impl FdAllocator {
    #[must_use]
    pub fn new(base: FileDescriptor, capacity: u32) -> Self {
        Self {
            base,
            capacity,
            free: (base..base + capacity).collect(),
            lookup: HashMap::new(),
        }
    }

    /// Bind `key` to the lowest free descriptor.
    pub fn allocate(&mut self, key: FileNameKey) -> Result<FileDescriptor> {
        if self.lookup.contains_key(&key) {
            return Err(Error::already_exists(format!("file name key {key:#x}")));
        }
        let fd = *self
            .free
            .iter()
            .next()
            .ok_or_else(|| Error::not_found("free file descriptor"))?;
        self.free.remove(&fd);
        self.lookup.insert(key, fd);
        Ok(fd)
    }

    /// Release a descriptor and its name binding.
    pub fn free(&mut self, key: FileNameKey, fd: FileDescriptor) -> Result<()> {
        match self.lookup.remove(&key) {
            Some(bound) if bound == fd => {
                self.free.insert(fd);
                Ok(())
            }
            Some(bound) => {
                // Wrong pairing; put the binding back untouched.
                self.lookup.insert(key, bound);
                Err(Error::invalid_parameter(format!(
                    "descriptor {fd} does not match binding {bound}"
                )))
            }
            None => Err(Error::not_found(format!("file name key {key:#x}"))),
        }
    }

    #[must_use]
    pub fn find(&self, key: FileNameKey) -> Option<FileDescriptor> {
        self.lookup.get(&key).copied()
    }

    #[must_use]
    pub fn contains(&self, fd: FileDescriptor) -> bool {
        fd >= self.base && fd < self.base + self.capacity && !self.free.contains(&fd)
    }

    /// Re-mark a descriptor as in use during volume bring-up.
    pub fn restore(&mut self, key: FileNameKey, fd: FileDescriptor) -> Result<()> {
        if !self.free.remove(&fd) {
            return Err(Error::corrupt_volume(format!(
                "descriptor {fd} restored twice or outside range"
            )));
        }
        self.lookup.insert(key, fd);
        Ok(())
    }

    /// Drop all bindings, as when the volume closes.
    pub fn reset(&mut self) {
        self.free = (self.base..self.base + self.capacity).collect();
        self.lookup.clear();
    }

    #[must_use]
    pub fn in_use(&self) -> usize {
        self.capacity as usize - self.free.len()
    }
}
