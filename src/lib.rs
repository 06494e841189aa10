//! A log-structured, wear-leveling file system for raw SPI NOR flash.
//!
//! Files are a chain of 4 KiB pages, each carrying a small header (id, span, byte
//! count, and for the first page, name and creation time). Deleting a file never
//! erases its pages directly; it marks them logically dead and leaves reclaiming the
//! underlying sectors to garbage collection, which spreads wear by scanning for
//! reclaimable pages from a randomized starting point rather than always starting at
//! page zero.
//!
//! ```no_run
//! use spanfs::{FileSystem, MemFlash, SystemClock};
//!
//! let flash = MemFlash::new(64 * spanfs::PAGE);
//! let fs = FileSystem::new(flash, 0, (64 * spanfs::PAGE) as u32, SystemClock, 0xC0FFEE)?;
//! fs.init(None::<fn(usize, usize)>)?;
//!
//! let mut f = fs.open("greeting.txt", "w")?;
//! f.write(b"hello")?;
//! f.close()?;
//! # Ok::<(), spanfs::FsError>(())
//! ```

mod api;
mod clock;
mod codec;
mod fat;
mod flash;
mod fs;
mod gc;
mod handle;

pub use api::{
    Dimensions, FileListEntry, FreeSpace, FsError, Mode, Result, Stats, DEFAULT_AUTO_GC_THRESHOLD,
    FREE_SPACE_HEURISTIC_BYTES, MAX_FNAME, PAGE,
};
pub use clock::{Clock, FixedClock, SystemClock};
pub use flash::{Flash, MemFlash, VerifyMode};
pub use fs::FileSystem;
pub use handle::File;
