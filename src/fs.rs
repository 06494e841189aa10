//! The file system façade (C4): owns the flash adapter, clock, FAT and GC state
//! behind a single `Rc<RefCell<_>>`, and exposes the public, single-process API.
//!
//! Page ordering convention used when reconstructing the FAT at `init()`: every page
//! but the last in a file's span chain is, by construction, completely full (writes
//! only allocate a continuation once the current page is full), so its `size` field is
//! written as [`crate::api::SIZE_FULL`] and its actual byte count is derived from page
//! geometry. Only the last page in the chain carries a literal byte count, which is the
//! one place `size == 0` genuinely means "zero bytes" rather than "full".

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::api::{
    validate_filename, Dimensions, FileListEntry, FileRef, FreeSpace, FsError, Mode, Result, Stats,
    DEFAULT_AUTO_GC_THRESHOLD, FREE_SPACE_HEURISTIC_BYTES, PAGE, SIZE_FULL, SIZE_PROVISIONAL,
};
use crate::clock::Clock;
use crate::codec::{self, Status};
use crate::fat::Fat;
use crate::flash::{Flash, FlashAdapter};
use crate::gc::{self, AsyncGc};
use crate::handle::File;

pub(crate) struct Inner<F: Flash, C: Clock> {
    pub(crate) flash: FlashAdapter<F>,
    clock: C,
    pub(crate) fat: Fat,
    rng: ChaCha8Rng,
    auto_gc_threshold: usize,
    async_gc: AsyncGc,
    open_files: HashSet<u16>,
}

impl<F: Flash, C: Clock> Inner<F, C> {
    fn page_addr(&self, idx: usize) -> u32 { self.flash.start() + idx as u32 * PAGE as u32 }

    /// The two-pass-plus-GC allocator described in the design notes: scan
    /// `[start, len)` then `[0, start)`; if both come up empty, run a bounded GC pass
    /// and retry, up to twice, before giving up.
    fn get_free_page(&mut self) -> Result<usize> {
        for attempt in 0..3 {
            if let Some(idx) = self.fat.find_free_page(&mut self.rng) {
                return Ok(idx);
            }
            if attempt == 2 {
                break;
            }
            let budget = 2 * self.auto_gc_threshold.max(1);
            let reclaimed = gc::gc(&mut self.fat, &mut self.flash, &mut self.rng, budget)?;
            if reclaimed == 0 {
                break;
            }
        }
        Err(FsError::NoFreeSpace)
    }

    /// Starts an async GC pass once free pages drop to (or below) the configured
    /// threshold, unless a pass is already running. Never blocks: this only seeds
    /// `async_gc`'s cursor, the actual sector erases happen one per `gc_tick`.
    fn maybe_auto_gc(&mut self) {
        let free = self.fat.page_map.iter().filter(|&&s| s == Status::Free).count();
        if free <= self.auto_gc_threshold && !self.async_gc.is_running() {
            self.async_gc.start(self.fat.page_map.len(), &mut self.rng);
        }
    }

    /// Allocates and writes the head page for `id`'s file. Deferred until the first
    /// byte is actually written so a file that's opened for write and closed without
    /// ever writing anything is never persisted (no page is allocated for it at all).
    fn allocate_head_page(&mut self, id: u16) -> Result<()> {
        let info = self.fat.get(FileRef::Id(id))?;
        let name = info.fname.ok_or(FsError::FileNotFound)?;
        let idx = self.get_free_page()?;
        self.fat.add_page(id, idx as u32);
        let header = codec::encode_head(id, SIZE_PROVISIONAL, info.created, &name);
        self.flash.write(self.page_addr(idx), &header, crate::flash::VerifyMode::Post)?;
        self.fat.mark_page(idx, Status::Used);
        Ok(())
    }

    /// Writes `data` at the end of `id`'s current content, allocating continuation
    /// pages as each fills up. Returns the number of bytes written (always
    /// `data.len()` on success).
    pub(crate) fn write_append(&mut self, id: u16, data: &[u8]) -> Result<usize> {
        if self.fat.span_of(id) == 0 {
            self.allocate_head_page(id)?;
        }
        let mut remaining = data;
        while !remaining.is_empty() {
            let (last_idx, last_size) = self.fat.last_page(id).ok_or(FsError::FileNotFound)?;
            let span = self.fat.span_of(id);
            let name_len = if span == 1 {
                self.fat.get(FileRef::Id(id))?.fname.map(|n| n.len()).unwrap_or(0)
            } else {
                0
            };
            let hlen = codec::header_len(span - 1, name_len);
            let cap = codec::payload_capacity(PAGE, hlen);
            let used = last_size as usize;
            let room = cap - used;

            if room == 0 {
                self.finalize_page(id, last_idx, used)?;
                let idx = self.get_free_page()?;
                self.fat.add_page(id, idx as u32);
                let new_span = self.fat.span_of(id) - 1;
                let header = codec::encode_continuation(id, new_span, SIZE_PROVISIONAL);
                self.flash.write(self.page_addr(idx), &header, crate::flash::VerifyMode::Post)?;
                self.fat.mark_page(idx, Status::Used);
                continue;
            }

            let chunk_len = room.min(remaining.len());
            let chunk = &remaining[..chunk_len];
            let offset = hlen + used;
            self.flash.write(
                self.page_addr(last_idx as usize) + offset as u32,
                chunk,
                crate::flash::VerifyMode::Post,
            )?;
            self.fat.add_size_to_last_span(id, chunk_len as u16);
            remaining = &remaining[chunk_len..];
        }
        Ok(data.len())
    }

    /// Programs the finalize buffer over a page's `size` field: `SIZE_FULL` if the
    /// page was completely filled, otherwise the literal byte count.
    fn finalize_page(&mut self, id: u16, idx: u32, used: usize) -> Result<()> {
        let span = self.fat.span_of(id);
        let name_len = if span == 1 {
            self.fat.get(FileRef::Id(id))?.fname.map(|n| n.len()).unwrap_or(0)
        } else {
            0
        };
        let hlen = codec::header_len(span - 1, name_len);
        let cap = codec::payload_capacity(PAGE, hlen);
        let size_field = if used == cap { SIZE_FULL } else { used as u16 };
        let fin = codec::encode_finalize(size_field);
        self.flash.write(self.page_addr(idx as usize), &fin, crate::flash::VerifyMode::None)?;
        Ok(())
    }

    pub(crate) fn read_at(&mut self, id: u16, pos: u64, len: usize) -> Result<Vec<u8>> {
        let info = self.fat.get(FileRef::Id(id))?;
        let total = info.size_total;
        let start = pos.min(total);
        let want = (len as u64).min(total - start) as usize;
        let mut out = Vec::with_capacity(want);
        let mut consumed_before: u64 = 0;
        for (span_idx, (&page_idx, &size)) in info.pages.iter().zip(info.sizes.iter()).enumerate() {
            let page_start = consumed_before;
            let page_end = consumed_before + size as u64;
            consumed_before = page_end;
            if out.len() >= want {
                break;
            }
            if page_end <= start {
                continue;
            }
            let hlen = if span_idx == 0 {
                codec::header_len(0, info.fname.as_deref().unwrap_or_default().len())
            } else {
                codec::header_len(1, 0)
            };
            let in_page_start = start.saturating_sub(page_start) as usize;
            let in_page_len = ((page_end.min(start + want as u64)) - page_start.max(start)) as usize;
            let addr = self.page_addr(page_idx as usize) + (hlen + in_page_start) as u32;
            let bytes = self.flash.read(addr, in_page_len)?;
            out.extend_from_slice(&bytes);
        }
        Ok(out)
    }

    pub(crate) fn close(&mut self, id: u16, mode: Mode) -> Result<()> {
        if mode == Mode::Write {
            if let Some((idx, size)) = self.fat.last_page(id) {
                self.finalize_page(id, idx, size as usize)?;
            } else {
                // never wrote a byte: no page was ever allocated, so there is
                // nothing on the medium to finalize, and the file is not persisted.
                if let Some(name) = self.fat.get(FileRef::Id(id))?.fname {
                    self.fat.remove_file(&name)?;
                }
            }
        }
        self.open_files.remove(&id);
        self.maybe_auto_gc();
        Ok(())
    }
}

/// A log-structured, wear-leveling file system over a raw SPI NOR flash region.
///
/// `F` is the raw driver collaborator ([`Flash`]); `C` is the wall-clock capability
/// used to stamp file creation times. Cloning a `FileSystem` is cheap and shares all
/// state with the original (see `Rc<RefCell<_>>` in [`Inner`]).
pub struct FileSystem<F: Flash, C: Clock> {
    inner: Rc<RefCell<Inner<F, C>>>,
}

impl<F: Flash, C: Clock> Clone for FileSystem<F, C> {
    fn clone(&self) -> Self { FileSystem { inner: Rc::clone(&self.inner) } }
}

impl<F: Flash, C: Clock> FileSystem<F, C> {
    /// Builds a file system over `[start, end)` of `flash`, seeded with an explicit
    /// PRNG seed for reproducible wear-leveling in tests. Does not scan the medium;
    /// call [`Self::init`] afterward.
    pub fn new(flash: F, start: u32, end: u32, clock: C, rng_seed: u64) -> Result<Self> {
        let adapter = FlashAdapter::new(flash, start, end)?;
        let page_count = adapter.page_count();
        let inner = Inner {
            flash: adapter,
            clock,
            fat: Fat::blank(page_count),
            rng: ChaCha8Rng::seed_from_u64(rng_seed),
            auto_gc_threshold: DEFAULT_AUTO_GC_THRESHOLD,
            async_gc: AsyncGc::default(),
            open_files: HashSet::new(),
        };
        Ok(FileSystem { inner: Rc::new(RefCell::new(inner)) })
    }

    /// Scans every page of the managed region and rebuilds the FAT from scratch.
    /// `progress` is called after each page, with `(pages_scanned, total_pages)`.
    pub fn init(&self, mut progress: Option<impl FnMut(usize, usize)>) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if !inner.open_files.is_empty() {
            return Err(FsError::FileOpen);
        }
        let page_count = inner.fat.page_map.len();

        struct Seen {
            span: u16,
            size: u16,
            name: Option<String>,
            created: Option<u32>,
        }
        let mut by_id: std::collections::HashMap<u16, Vec<(usize, Seen)>> = std::collections::HashMap::new();

        for idx in 0..page_count {
            let addr = inner.page_addr(idx);
            let buf = inner.flash.read(addr, crate::api::MAX_HEADER_LEN.min(PAGE))?;
            let d = codec::decode(&buf);
            inner.fat.mark_page(idx, d.status);
            if d.status == Status::Used {
                by_id.entry(d.id).or_default().push((
                    idx,
                    Seen { span: d.span, size: d.size, name: d.name, created: d.created },
                ));
            }
            if let Some(cb) = progress.as_mut() {
                cb(idx + 1, page_count);
            }
        }

        for (id, mut pages) in by_id {
            pages.sort_by_key(|(_, s)| s.span);
            let head = pages.iter().find(|(_, s)| s.span == 0);
            let (name, created) = match head {
                Some((_, s)) => (s.name.clone(), s.created.unwrap_or(0)),
                None => (None, 0),
            };
            let last_span = pages.last().map(|(_, s)| s.span).unwrap_or(0);
            let mut page_idxs = Vec::with_capacity(pages.len());
            let mut sizes = Vec::with_capacity(pages.len());
            for (idx, s) in &pages {
                let name_len = name.as_deref().map(|n| n.len()).unwrap_or(0);
                let hlen = codec::header_len(s.span, name_len);
                let cap = codec::payload_capacity(PAGE, hlen);
                let bytes = if s.span == last_span {
                    if s.size == SIZE_PROVISIONAL { 0 } else { s.size as usize }
                } else if s.size == SIZE_FULL {
                    cap
                } else {
                    s.size as usize
                };
                page_idxs.push(*idx as u32);
                sizes.push(bytes as u16);
            }
            if let Some(name) = name {
                inner.fat.names.insert(name, id);
                inner.fat.insert_orphan(id, page_idxs, sizes);
                inner.fat.entries.get_mut(&id).unwrap().created = created;
            } else {
                inner.fat.insert_orphan(id, page_idxs, sizes);
            }
        }
        Ok(())
    }

    pub fn dimensions(&self) -> Dimensions {
        let inner = self.inner.borrow();
        let size = inner.flash.end() - inner.flash.start();
        let pages = inner.flash.page_count();
        Dimensions { size, len: pages, start: inner.flash.start(), end: inner.flash.end(), pages }
    }

    pub fn file_list(&self, by_date: bool) -> Vec<FileListEntry> { self.inner.borrow().fat.file_list(by_date) }

    pub fn file_exists(&self, name: &str) -> bool { self.inner.borrow().fat.file_exists(FileRef::Name(name)) }

    pub fn is_file_open(&self, name: &str) -> bool {
        let inner = self.inner.borrow();
        match inner.fat.names.get(name) {
            Some(id) => inner.open_files.contains(id),
            None => false,
        }
    }

    pub fn file_size(&self, name: &str) -> Result<u64> {
        Ok(self.inner.borrow().fat.get(FileRef::Name(name))?.size_total)
    }

    pub fn created(&self, name: &str) -> Result<u32> { Ok(self.inner.borrow().fat.get(FileRef::Name(name))?.created) }

    pub fn open(&self, name: &str, mode: &str) -> Result<File<F, C>> {
        validate_filename(name)?;
        let mode = Mode::parse(mode)?;
        let mut inner = self.inner.borrow_mut();

        let (id, created) = match mode {
            Mode::Read => {
                let info = inner.fat.get(FileRef::Name(name))?;
                if inner.open_files.contains(&info.id) {
                    return Err(FsError::FileOpen);
                }
                (info.id, info.created)
            }
            Mode::Write => {
                if inner.fat.file_exists(FileRef::Name(name)) {
                    return Err(FsError::FileExists);
                }
                let now = inner.clock.now_secs();
                // registers the name/id and creation time in the FAT only; the head
                // page itself isn't allocated until the first `write()` call.
                let id = inner.fat.get_file_id(name, now)?;
                (id, now)
            }
        };
        inner.open_files.insert(id);
        drop(inner);
        Ok(File::new(Rc::clone(&self.inner), id, name.to_string(), mode, created))
    }

    fn erase_one(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        let info = inner.fat.get(FileRef::Name(name))?;
        if inner.open_files.contains(&info.id) {
            return Err(FsError::FileOpen);
        }
        let mut pages = Vec::new();
        inner.fat.for_each_page(FileRef::Id(info.id), |idx| pages.push(idx))?;
        for idx in pages {
            let marker = codec::encode_erase_marker();
            let addr = inner.page_addr(idx as usize);
            inner.flash.write(addr, &marker, crate::flash::VerifyMode::None)?;
            inner.fat.mark_page(idx as usize, Status::Erased);
        }
        inner.fat.remove_file(name)?;
        inner.maybe_auto_gc();
        Ok(())
    }

    pub fn erase_file(&self, name: &str) -> Result<()> { self.erase_one(name) }

    /// Erases every current file. A file with an open handle is skipped (logged,
    /// not propagated as an error) so the rest still get erased.
    pub fn erase_files(&self) -> Result<()> {
        let names: Vec<String> = self.inner.borrow().fat.names.keys().cloned().collect();
        for name in names {
            if let Err(e) = self.erase_one(&name) {
                if e == FsError::FileOpen {
                    log::error!("erase_files: skipping '{name}', a handle is still open");
                } else {
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Physically erases every sector in the managed region and replaces the FAT
    /// with a blank one, so every page ends `Free`. Fails outright if any handle is
    /// open anywhere in the file system.
    pub fn erase_all(&self) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if !inner.open_files.is_empty() {
            return Err(FsError::FileOpen);
        }
        let page_count = inner.fat.page_map.len();
        for idx in 0..page_count {
            let addr = inner.page_addr(idx);
            inner.flash.erase_sector(addr)?;
        }
        inner.fat = Fat::blank(page_count);
        Ok(())
    }

    pub fn get_free_space(&self) -> FreeSpace {
        let inner = self.inner.borrow();
        let stats = inner.fat.stats();
        let free = stats.free as u64 * FREE_SPACE_HEURISTIC_BYTES;
        let freeable = (stats.free + stats.erased + stats.bad) as u64 * FREE_SPACE_HEURISTIC_BYTES;
        FreeSpace { free, freeable }
    }

    pub fn stats(&self) -> Stats { self.inner.borrow().fat.stats() }

    pub fn set_auto_gc(&self, threshold: usize) { self.inner.borrow_mut().auto_gc_threshold = threshold; }

    /// Runs a bounded synchronous GC pass. `budget` defaults to twice the configured
    /// auto-GC threshold when `None`. Returns the number of pages reclaimed.
    pub fn gc(&self, budget: Option<usize>) -> Result<usize> {
        let mut inner = self.inner.borrow_mut();
        let budget = budget.unwrap_or_else(|| 2 * inner.auto_gc_threshold.max(1));
        let Inner { fat, flash, rng, .. } = &mut *inner;
        gc::gc(fat, flash, rng, budget)
    }

    /// Starts a cooperative GC pass driven by repeated [`Self::gc_tick`] calls.
    pub fn gc_async_start(&self) {
        let mut inner = self.inner.borrow_mut();
        let page_count = inner.fat.page_map.len();
        let Inner { async_gc, rng, .. } = &mut *inner;
        async_gc.start(page_count, rng);
    }

    /// Advances the in-progress async GC pass by one page. Returns `Ok(true)` while
    /// more work remains, `Ok(false)` once the pass is done (or none was started).
    pub fn gc_tick(&self) -> Result<bool> {
        let mut inner = self.inner.borrow_mut();
        let Inner { fat, flash, async_gc, .. } = &mut *inner;
        async_gc.tick(fat, flash)
    }
}
