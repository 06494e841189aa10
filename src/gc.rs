//! Garbage collection (C5): reclaiming `Erased`/`Bad` pages back to `Free` by erasing
//! their physical sector, bounded per call and randomized in scan order for wear
//! leveling, plus a cooperative pump for running GC incrementally off the caller's
//! own loop instead of blocking it for an unbounded amount of time.

use rand::Rng;

use crate::codec::Status;
use crate::fat::Fat;
use crate::flash::{Flash, FlashAdapter};
use crate::api::Result;

/// Scans the page map for up to `budget` reclaimable (`Erased` or `Bad`) pages,
/// starting from a random offset and wrapping once, erasing each one's sector and
/// marking it `Free`. Returns the number of pages actually reclaimed, which may be
/// less than `budget` if fewer reclaimable pages exist.
pub(crate) fn gc<F: Flash>(
    fat: &mut Fat,
    flash: &mut FlashAdapter<F>,
    rng: &mut impl Rng,
    budget: usize,
) -> Result<usize> {
    let n = fat.page_map.len();
    if n == 0 || budget == 0 {
        return Ok(0);
    }
    let start = rng.gen_range(0..n);
    let order = (0..n).map(|i| (start + i) % n);

    let mut reclaimed = 0;
    for idx in order {
        if reclaimed >= budget {
            break;
        }
        if matches!(fat.page_map[idx], Status::Erased | Status::Bad) {
            let addr = flash.start() + idx as u32 * crate::api::PAGE as u32;
            flash.erase_sector(addr)?;
            fat.mark_page(idx, Status::Free);
            reclaimed += 1;
            log::debug!("gc reclaimed page {idx}");
        }
    }
    Ok(reclaimed)
}

/// State for a cooperative, non-blocking GC pass: driven one page at a time by
/// repeated calls to [`tick`], so a caller on a single-threaded event loop can
/// interleave it with other work instead of stalling on a single `gc()` call.
#[derive(Debug, Default)]
pub(crate) struct AsyncGc {
    /// Remaining page indices to examine, in scan order; `None` means idle.
    cursor: Option<std::vec::IntoIter<usize>>,
}

impl AsyncGc {
    /// Starts (or restarts) an async pass over the whole page map from a random
    /// offset. A pass already in progress is discarded.
    pub(crate) fn start(&mut self, page_count: usize, rng: &mut impl Rng) {
        if page_count == 0 {
            self.cursor = None;
            return;
        }
        let start = rng.gen_range(0..page_count);
        let order: Vec<usize> = (0..page_count).map(|i| (start + i) % page_count).collect();
        self.cursor = Some(order.into_iter());
    }

    pub(crate) fn is_running(&self) -> bool { self.cursor.is_some() }

    /// Examines the next page in the current pass, reclaiming it if it's dirty.
    /// Returns `Ok(true)` while the pass is still running, `Ok(false)` once it has
    /// finished (including if none was running).
    pub(crate) fn tick<F: Flash>(&mut self, fat: &mut Fat, flash: &mut FlashAdapter<F>) -> Result<bool> {
        let Some(iter) = self.cursor.as_mut() else { return Ok(false) };
        match iter.next() {
            Some(idx) => {
                if matches!(fat.page_map[idx], Status::Erased | Status::Bad) {
                    let addr = flash.start() + idx as u32 * crate::api::PAGE as u32;
                    flash.erase_sector(addr)?;
                    fat.mark_page(idx, Status::Free);
                    log::debug!("async gc reclaimed page {idx}");
                }
                Ok(true)
            }
            None => {
                self.cursor = None;
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash::MemFlash;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn setup(page_count: usize) -> (Fat, FlashAdapter<MemFlash>) {
        let page_bytes = crate::api::PAGE;
        let dev = MemFlash::new(page_bytes * page_count);
        let flash = FlashAdapter::new(dev, 0, (page_bytes * page_count) as u32).unwrap();
        (Fat::blank(page_count), flash)
    }

    #[test]
    fn gc_reclaims_dirty_pages_up_to_budget() {
        let (mut fat, mut flash) = setup(4);
        fat.mark_page(0, Status::Erased);
        fat.mark_page(1, Status::Bad);
        fat.mark_page(2, Status::Erased);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let reclaimed = gc(&mut fat, &mut flash, &mut rng, 2).unwrap();
        assert_eq!(reclaimed, 2);
        let free_count = fat.page_map.iter().filter(|&&s| s == Status::Free).count();
        assert_eq!(free_count, 3); // page 3 was already free, plus 2 reclaimed
    }

    #[test]
    fn gc_is_noop_when_nothing_dirty() {
        let (mut fat, mut flash) = setup(4);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        assert_eq!(gc(&mut fat, &mut flash, &mut rng, 10).unwrap(), 0);
    }

    #[test]
    fn async_gc_ticks_through_whole_pass_then_idles() {
        let (mut fat, mut flash) = setup(4);
        fat.mark_page(1, Status::Erased);
        fat.mark_page(3, Status::Bad);
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut agc = AsyncGc::default();
        agc.start(4, &mut rng);
        assert!(agc.is_running());
        let mut ticks = 0;
        while agc.tick(&mut fat, &mut flash).unwrap() {
            ticks += 1;
        }
        assert_eq!(ticks, 4);
        assert!(!agc.is_running());
        assert!(fat.page_map.iter().all(|&s| s == Status::Free));
    }

    #[test]
    fn async_gc_tick_without_start_is_noop() {
        let (mut fat, mut flash) = setup(2);
        let mut agc = AsyncGc::default();
        assert_eq!(agc.tick(&mut fat, &mut flash).unwrap(), false);
    }
}
