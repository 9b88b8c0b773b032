//! Free-extent allocator for a volume's file-data span
//!
//! Tracks the span `[file_base, last_lpn]` as a sorted, coalesced free list.
//! Allocation rounds requests up to the configured granularity and consumes
//! free runs lowest-first, splitting the final run when it is larger than
//! the remainder. Release inserts back with merge on both sides, so a fully
//! released span collapses to one extent.

use metavol_common::{Error, Extent, Lpn, Result};
use tracing::debug;

pub struct ExtentAllocator {
    /// First LPN of the managed span
    file_base: Lpn,
    /// Last LPN of the managed span, inclusive
    last_lpn: Lpn,
    /// Free runs, sorted by start and never touching
    free_list: Vec<Extent>,
    available_pages: u64,
    granularity: u64,
    /// Most extents a single allocation may return
    max_fragments: usize,
}

impl ExtentAllocator {
    #[must_use]
    pub fn new(file_base: Lpn, last_lpn: Lpn, granularity: u64, max_fragments: usize) -> Self {
        let count = last_lpn - file_base + 1;
        Self {
            file_base,
            last_lpn,
            free_list: vec![Extent::new(file_base, count)],
            available_pages: count,
            granularity,
            max_fragments,
        }
    }

    #[must_use]
    pub fn file_base(&self) -> Lpn {
        self.file_base
    }

    #[must_use]
    pub fn last_lpn(&self) -> Lpn {
        self.last_lpn
    }

    /// Pages currently free, before granularity rounding.
    #[must_use]
    pub fn available_pages(&self) -> u64 {
        self.available_pages
    }

    /// Length of the largest single free run.
    #[must_use]
    pub fn largest_free_run(&self) -> u64 {
        self.free_list.iter().map(|e| e.count).max().unwrap_or(0)
    }

    /// Allocate `pages` pages, rounded up to the granularity.
    ///
    /// Returns the consumed runs lowest-first. On any failure the free list
    /// is left exactly as it was.
    pub fn allocate(&mut self, pages: u64) -> Result<Vec<Extent>> {
        if pages == 0 {
            return Err(Error::invalid_parameter("zero-page allocation"));
        }
        let mut remaining = pages.div_ceil(self.granularity) * self.granularity;
        if remaining > self.available_pages {
            return Err(Error::NotEnoughSpace {
                requested_pages: remaining,
                available_pages: self.available_pages,
            });
        }

        // Plan the walk without touching the free list so an over-
        // fragmented request leaves no trace.
        let mut taken = Vec::new();
        let mut consumed_runs = 0;
        let mut split = None;
        while remaining > 0 {
            let run = self.free_list[consumed_runs];
            if run.count <= remaining {
                taken.push(run);
                remaining -= run.count;
                consumed_runs += 1;
            } else {
                taken.push(Extent::new(run.start_lpn, remaining));
                split = Some(Extent::new(run.start_lpn + remaining, run.count - remaining));
                remaining = 0;
            }
        }

        if taken.len() > self.max_fragments {
            debug!(
                fragments = taken.len(),
                limit = self.max_fragments,
                "allocation too fragmented, refused"
            );
            return Err(Error::NotEnoughSpace {
                requested_pages: pages,
                available_pages: self.largest_free_run(),
            });
        }

        if let Some(tail) = split {
            self.free_list[consumed_runs] = tail;
        }
        self.free_list.drain(..consumed_runs);
        self.available_pages -= taken.iter().map(|e| e.count).sum::<u64>();
        Ok(taken)
    }

    /// Return a run to the free list, merging with neighbors.
    pub fn release(&mut self, start_lpn: Lpn, count: u64) {
        if count == 0 {
            return;
        }
        let released = Extent::new(start_lpn, count);
        let pos = self
            .free_list
            .partition_point(|e| e.start_lpn < released.start_lpn);

        // Merge into the predecessor if the runs touch.
        let merged_left = if pos > 0 {
            match self.free_list[pos - 1].try_merge(&released) {
                Some(joined) => {
                    self.free_list[pos - 1] = joined;
                    true
                }
                None => false,
            }
        } else {
            false
        };
        if merged_left {
            // The grown predecessor may now touch the successor.
            if pos < self.free_list.len() {
                if let Some(joined) = self.free_list[pos - 1].try_merge(&self.free_list[pos]) {
                    self.free_list[pos - 1] = joined;
                    self.free_list.remove(pos);
                }
            }
        } else if pos < self.free_list.len() && released.end() == self.free_list[pos].start_lpn {
            self.free_list[pos] = Extent::new(released.start_lpn, released.count + self.free_list[pos].count);
        } else {
            self.free_list.insert(pos, released);
        }
        self.available_pages += count;
    }

    /// The complement of the free list over the managed span: every run
    /// currently owned by some file, lowest-first.
    #[must_use]
    pub fn snapshot_allocated(&self) -> Vec<Extent> {
        let mut allocated = Vec::new();
        let mut cursor = self.file_base;
        for free in &self.free_list {
            if free.start_lpn > cursor {
                allocated.push(Extent::new(cursor, free.start_lpn - cursor));
            }
            cursor = free.end();
        }
        if cursor <= self.last_lpn {
            allocated.push(Extent::new(cursor, self.last_lpn - cursor + 1));
        }
        allocated
    }

    /// Rebuild the free list from a persisted allocated-extents snapshot.
    pub fn restore_allocated(&mut self, allocated: &[Extent]) -> Result<()> {
        let mut free = Vec::new();
        let mut cursor = self.file_base;
        for used in allocated {
            if used.start_lpn < cursor {
                return Err(Error::corrupt_volume(format!(
                    "allocated extent at {} overlaps or is unsorted",
                    used.start_lpn
                )));
            }
            if used.count == 0 || used.end() > self.last_lpn + 1 {
                return Err(Error::corrupt_volume(format!(
                    "allocated extent [{}, {}) outside managed span",
                    used.start_lpn,
                    used.end()
                )));
            }
            if used.start_lpn > cursor {
                free.push(Extent::new(cursor, used.start_lpn - cursor));
            }
            cursor = used.end();
        }
        if cursor <= self.last_lpn {
            free.push(Extent::new(cursor, self.last_lpn - cursor + 1));
        }
        self.available_pages = free.iter().map(|e| e.count).sum();
        self.free_list = free;
        Ok(())
    }

    /// Shift the start of the managed span. Only legal while the whole
    /// span is free; used when the file-data region is finalized after
    /// region placement.
    pub fn rebase(&mut self, new_base: Lpn) -> Result<()> {
        if self.available_pages != self.last_lpn - self.file_base + 1 {
            return Err(Error::invalid_parameter(
                "cannot rebase an allocator with live allocations",
            ));
        }
        if new_base > self.last_lpn {
            return Err(Error::invalid_parameter("new base beyond span end"));
        }
        self.file_base = new_base;
        let count = self.last_lpn - new_base + 1;
        self.free_list = vec![Extent::new(new_base, count)];
        self.available_pages = count;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alloc_100() -> ExtentAllocator {
        ExtentAllocator::new(0, 99, 8, 32)
    }

    #[test]
    fn test_fresh_span_is_one_run() {
        let a = alloc_100();
        assert_eq!(a.available_pages(), 100);
        assert_eq!(a.snapshot_allocated(), vec![]);
    }

    #[test]
    fn test_allocate_rounds_up() {
        let mut a = alloc_100();
        let got = a.allocate(47).unwrap();
        assert_eq!(got, vec![Extent::new(0, 48)]);
        assert_eq!(a.available_pages(), 52);
    }

    #[test]
    fn test_release_restores_single_run() {
        let mut a = alloc_100();
        let got = a.allocate(47).unwrap();
        for e in got {
            a.release(e.start_lpn, e.count);
        }
        assert_eq!(a.available_pages(), 100);
        assert_eq!(a.largest_free_run(), 100);
    }

    #[test]
    fn test_fragmented_allocation_spans_runs() {
        let mut a = alloc_100();
        let first = a.allocate(72).unwrap();
        assert_eq!(first, vec![Extent::new(0, 72)]);
        assert_eq!(a.available_pages(), 28);

        a.release(16, 8);
        a.release(32, 8);
        assert_eq!(a.available_pages(), 44);

        // 17 rounds to 24 and walks three separated runs, lowest first.
        let got = a.allocate(17).unwrap();
        assert_eq!(
            got,
            vec![Extent::new(16, 8), Extent::new(32, 8), Extent::new(72, 8)]
        );
        assert_eq!(a.available_pages(), 20);
    }

    #[test]
    fn test_split_of_last_run() {
        let mut a = alloc_100();
        let whole = a.allocate(100).unwrap();
        assert_eq!(whole.len(), 1);
        a.release(16, 8);
        a.release(32, 16);

        let got = a.allocate(16).unwrap();
        assert_eq!(got, vec![Extent::new(16, 8), Extent::new(32, 8)]);
        // The second run was split; its tail stays free.
        assert_eq!(a.available_pages(), 8);
        assert_eq!(a.largest_free_run(), 8);
    }

    #[test]
    fn test_not_enough_space_leaves_state_intact() {
        let mut a = alloc_100();
        a.allocate(96).unwrap();
        let err = a.allocate(8).unwrap_err();
        assert!(err.is_out_of_space());
        assert_eq!(a.available_pages(), 4);
    }

    #[test]
    fn test_fragment_limit_rolls_back() {
        let mut a = ExtentAllocator::new(0, 99, 8, 2);
        a.allocate(100).unwrap();
        a.release(16, 8);
        a.release(32, 8);
        a.release(72, 8);

        let err = a.allocate(24).unwrap_err();
        assert!(err.is_out_of_space());
        // Nothing was consumed.
        assert_eq!(a.available_pages(), 24);
        assert_eq!(a.allocate(8).unwrap(), vec![Extent::new(16, 8)]);
    }

    #[test]
    fn test_release_merges_both_sides() {
        let mut a = alloc_100();
        a.allocate(100).unwrap();
        a.release(0, 8);
        a.release(16, 8);
        a.release(8, 8);
        assert_eq!(a.largest_free_run(), 24);
        assert_eq!(a.snapshot_allocated(), vec![Extent::new(24, 76)]);
    }

    #[test]
    fn test_snapshot_and_restore_are_inverse() {
        let mut a = alloc_100();
        a.allocate(100).unwrap();
        a.release(8, 16);
        a.release(48, 8);
        let snapshot = a.snapshot_allocated();

        let mut b = alloc_100();
        b.restore_allocated(&snapshot).unwrap();
        assert_eq!(b.available_pages(), a.available_pages());
        assert_eq!(b.snapshot_allocated(), snapshot);
    }

    #[test]
    fn test_restore_rejects_overlap() {
        let mut a = alloc_100();
        let bad = vec![Extent::new(0, 16), Extent::new(8, 8)];
        assert!(a.restore_allocated(&bad).is_err());
    }

    #[test]
    fn test_rebase_shrinks_span() {
        let mut a = alloc_100();
        a.rebase(40).unwrap();
        assert_eq!(a.file_base(), 40);
        assert_eq!(a.available_pages(), 60);
        assert_eq!(a.allocate(8).unwrap(), vec![Extent::new(40, 8)]);
    }

    #[test]
    fn test_rebase_rejected_with_live_allocations() {
        let mut a = alloc_100();
        a.allocate(8).unwrap();
        assert!(a.rebase(40).is_err());
    }

    #[test]
    fn test_random_alloc_release_conserves_pages() {
        use rand::Rng;
        use rand::SeedableRng;
        let mut rng = rand::rngs::StdRng::seed_from_u64(0x9e37);
        let mut a = ExtentAllocator::new(0, 1023, 8, 64);
        let mut live: Vec<Extent> = Vec::new();

        for _ in 0..500 {
            if rng.gen_bool(0.6) || live.is_empty() {
                let want = rng.gen_range(1..=64);
                if let Ok(got) = a.allocate(want) {
                    live.extend(got);
                }
            } else {
                let idx = rng.gen_range(0..live.len());
                let e = live.swap_remove(idx);
                a.release(e.start_lpn, e.count);
            }
            let live_pages: u64 = live.iter().map(|e| e.count).sum();
            assert_eq!(a.available_pages() + live_pages, 1024);
        }

        for e in live.drain(..) {
            a.release(e.start_lpn, e.count);
        }
        assert_eq!(a.available_pages(), 1024);
        assert_eq!(a.largest_free_run(), 1024);
    }
}
