//! The in-memory file allocation table (C3): name/id index, per-file page and size
//! lists, the page-status map, and the randomized free-page scan.

use std::collections::HashMap;

use rand::Rng;

use crate::api::{FileListEntry, FileRef, FsError, Result, ID_MAX, ID_MIN};
use crate::codec::Status;

/// Everything the FAT knows about one file.
#[derive(Debug, Clone, Default)]
pub(crate) struct FileEntry {
    pub(crate) pages: Vec<u32>,
    pub(crate) sizes: Vec<u16>,
    pub(crate) created: u32,
}

impl FileEntry {
    fn size_total(&self) -> u64 { self.sizes.iter().map(|&s| s as u64).sum() }
}

/// Full detail returned by [`Fat::get`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FileInfo {
    pub(crate) id: u16,
    pub(crate) fname: Option<String>,
    pub(crate) pages: Vec<u32>,
    pub(crate) sizes: Vec<u16>,
    pub(crate) size_total: u64,
    pub(crate) created: u32,
}

pub(crate) struct Fat {
    pub(crate) names: HashMap<String, u16>,
    pub(crate) entries: HashMap<u16, FileEntry>,
    pub(crate) page_map: Vec<Status>,
    next_id: u16,
}

impl Fat {
    /// Blank FAT: `page_count` pages, all `Free`, no files.
    pub(crate) fn blank(page_count: usize) -> Self {
        Fat {
            names: HashMap::new(),
            entries: HashMap::new(),
            page_map: vec![Status::Free; page_count],
            next_id: ID_MIN,
        }
    }

    fn resolve(&self, r: FileRef) -> Option<u16> {
        match r {
            FileRef::Name(name) => self.names.get(name).copied(),
            FileRef::Id(id) => if self.entries.contains_key(&id) { Some(id) } else { None },
        }
    }

    pub(crate) fn file_exists(&self, r: FileRef) -> bool { self.resolve(r).is_some() }

    pub(crate) fn get(&self, r: FileRef) -> Result<FileInfo> {
        let id = self.resolve(r).ok_or(FsError::FileNotFound)?;
        let entry = self.entries.get(&id).expect("id resolved but missing entry");
        let fname = self.names.iter().find(|(_, &v)| v == id).map(|(k, _)| k.clone());
        Ok(FileInfo {
            id,
            fname,
            pages: entry.pages.clone(),
            sizes: entry.sizes.clone(),
            size_total: entry.size_total(),
            created: entry.created,
        })
    }

    /// Returns the id for `name`, minting a fresh one with an empty record if it
    /// doesn't already exist (used by `open(name, "w")`).
    pub(crate) fn get_file_id(&mut self, name: &str, created: u32) -> Result<u16> {
        if let Some(&id) = self.names.get(name) {
            return Ok(id);
        }
        let id = self.mint_id()?;
        self.names.insert(name.to_string(), id);
        self.entries.insert(id, FileEntry { pages: Vec::new(), sizes: Vec::new(), created });
        Ok(id)
    }

    fn mint_id(&mut self) -> Result<u16> {
        let start = self.next_id;
        loop {
            let candidate = self.next_id;
            self.next_id = if self.next_id >= ID_MAX { ID_MIN } else { self.next_id + 1 };
            if !self.entries.contains_key(&candidate) {
                return Ok(candidate);
            }
            if self.next_id == start {
                // every id in [ID_MIN, ID_MAX] is in use.
                return Err(FsError::NoFreeSpace);
            }
        }
    }

    pub(crate) fn file_list(&self, by_date: bool) -> Vec<FileListEntry> {
        let mut out: Vec<FileListEntry> = self
            .names
            .iter()
            .map(|(fname, &id)| {
                let entry = &self.entries[&id];
                FileListEntry { id, fname: fname.clone(), size: entry.size_total(), created: entry.created }
            })
            .collect();
        if by_date {
            out.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.fname.cmp(&b.fname)));
        } else {
            out.sort_by(|a, b| a.fname.cmp(&b.fname));
        }
        out
    }

    pub(crate) fn mark_page(&mut self, idx: usize, status: Status) { self.page_map[idx] = status; }

    pub(crate) fn add_page(&mut self, id: u16, idx: u32) {
        let entry = self.entries.get_mut(&id).expect("add_page on unknown id");
        entry.pages.push(idx);
        entry.sizes.push(0);
    }

    pub(crate) fn add_size_to_last_span(&mut self, id: u16, bytes: u16) {
        let entry = self.entries.get_mut(&id).expect("add_size_to_last_span on unknown id");
        *entry.sizes.last_mut().expect("file has no pages yet") += bytes;
    }

    pub(crate) fn last_page(&self, id: u16) -> Option<(u32, u16)> {
        let entry = self.entries.get(&id)?;
        Some((*entry.pages.last()?, *entry.sizes.last()?))
    }

    pub(crate) fn span_of(&self, id: u16) -> u16 {
        self.entries.get(&id).map(|e| e.pages.len() as u16).unwrap_or(0)
    }

    /// Drops all FAT bookkeeping for `name`'s file, freeing no pages (the caller is
    /// responsible for marking them `Erased` via `mark_page` first).
    pub(crate) fn remove_file(&mut self, name: &str) -> Result<u16> {
        let id = self.names.remove(name).ok_or(FsError::FileNotFound)?;
        self.entries.remove(&id);
        Ok(id)
    }

    /// Drops bookkeeping for an id that was never reachable by name (an orphan
    /// discovered at scan time that has pages but no head page).
    pub(crate) fn insert_orphan(&mut self, id: u16, pages: Vec<u32>, sizes: Vec<u16>) {
        self.entries.insert(id, FileEntry { pages, sizes, created: 0 });
    }

    pub(crate) fn for_each_page(&self, r: FileRef, mut cb: impl FnMut(u32)) -> Result<()> {
        let id = self.resolve(r).ok_or(FsError::FileNotFound)?;
        for &idx in &self.entries[&id].pages {
            cb(idx);
        }
        Ok(())
    }

    pub(crate) fn stats(&self) -> crate::api::Stats {
        let mut s = crate::api::Stats::default();
        for st in &self.page_map {
            match st {
                Status::Free => s.free += 1,
                Status::Used => s.used += 1,
                Status::Erased => s.erased += 1,
                Status::Bad => s.bad += 1,
            }
        }
        s
    }

    /// Scans `[start, start + range)` of the page map (not wrapping) for the first
    /// `Free` slot.
    fn scan_free(&self, start: usize, len: usize) -> Option<usize> {
        self.page_map[start..start + len].iter().position(|&s| s == Status::Free).map(|p| p + start)
    }

    /// The allocator half of `get_free_page`: a pure in-memory scan from a random
    /// start, wrapping once. Does not perform GC; the caller (`FileSystem`) retries
    /// with GC if this returns `None`.
    pub(crate) fn find_free_page(&self, rng: &mut impl Rng) -> Option<usize> {
        let n = self.page_map.len();
        if n == 0 {
            return None;
        }
        let start = rng.gen_range(0..n);
        self.scan_free(start, n - start).or_else(|| self.scan_free(0, start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::ChaCha8Rng;
    use rand::SeedableRng;

    #[test]
    fn blank_fat_is_all_free() {
        let fat = Fat::blank(4);
        assert_eq!(fat.page_map.len(), 4);
        assert!(fat.page_map.iter().all(|&s| s == Status::Free));
    }

    #[test]
    fn mint_id_skips_sentinels_and_increments() {
        let mut fat = Fat::blank(4);
        let a = fat.get_file_id("a", 0).unwrap();
        let b = fat.get_file_id("b", 0).unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_ne!(a, 0);
        assert_ne!(a, 0xFFFF);
    }

    #[test]
    fn get_file_id_is_stable_for_existing_name() {
        let mut fat = Fat::blank(4);
        let a = fat.get_file_id("a", 0).unwrap();
        let a2 = fat.get_file_id("a", 0).unwrap();
        assert_eq!(a, a2);
    }

    #[test]
    fn file_list_sorts_by_name_by_default() {
        let mut fat = Fat::blank(4);
        fat.get_file_id("zeta", 10).unwrap();
        fat.get_file_id("alpha", 20).unwrap();
        let names: Vec<_> = fat.file_list(false).into_iter().map(|e| e.fname).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn file_list_sorts_by_date_when_requested() {
        let mut fat = Fat::blank(4);
        fat.get_file_id("zeta", 10).unwrap();
        fat.get_file_id("alpha", 5).unwrap();
        let names: Vec<_> = fat.file_list(true).into_iter().map(|e| e.fname).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn get_fails_for_unknown_file() {
        let fat = Fat::blank(4);
        assert_eq!(fat.get(FileRef::Name("nope")).unwrap_err(), FsError::FileNotFound);
    }

    #[test]
    fn remove_file_drops_entry() {
        let mut fat = Fat::blank(4);
        fat.get_file_id("a", 0).unwrap();
        fat.remove_file("a").unwrap();
        assert!(!fat.file_exists(FileRef::Name("a")));
        assert_eq!(fat.remove_file("a").unwrap_err(), FsError::FileNotFound);
    }

    #[test]
    fn find_free_page_wraps_around() {
        let mut fat = Fat::blank(8);
        for i in 0..7 {
            fat.mark_page(i, Status::Used);
        }
        // only page 7 is free; any random start must still find it via wraparound.
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(fat.find_free_page(&mut rng), Some(7));
    }

    #[test]
    fn find_free_page_none_when_full() {
        let mut fat = Fat::blank(4);
        for i in 0..4 {
            fat.mark_page(i, Status::Used);
        }
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        assert_eq!(fat.find_free_page(&mut rng), None);
    }

    #[test]
    fn orphan_is_reachable_by_id_not_name() {
        let mut fat = Fat::blank(4);
        fat.insert_orphan(5, vec![2], vec![100]);
        assert!(fat.file_exists(FileRef::Id(5)));
        assert!(!fat.file_exists(FileRef::Name("anything")));
        assert!(fat.file_list(false).is_empty());
    }
}
