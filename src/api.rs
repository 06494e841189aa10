//! Shared constants and the error type used across every component.

use std::fmt;

/// Page/sector size. The design assumes 4096 but is parameterizable by the embedder
/// through [`crate::FileSystem::new`]'s region bounds; the constant here is the default
/// most SPI NOR parts use for their erase sectors.
pub const PAGE: usize = 4096;

/// Maximum length, in bytes, of a file name.
pub const MAX_FNAME: usize = 64;

/// Header length shared by every page: `id` (2B) + `span` (2B) + `size` (2B).
pub(crate) const COMMON_HEADER_LEN: usize = 6;
/// Additional header bytes carried only by the head page (span 0): `created` (4B) +
/// `name_len` (1B).
pub(crate) const HEAD_EXTRA_LEN: usize = 5;
/// Largest possible header: common + head-extra + MAX_FNAME.
pub(crate) const MAX_HEADER_LEN: usize = COMMON_HEADER_LEN + HEAD_EXTRA_LEN + MAX_FNAME;

/// Reserved id meaning "page never written" (raw erased flash).
pub(crate) const ID_FREE: u16 = 0xFFFF;
/// Reserved id meaning "page logically deleted".
pub(crate) const ID_ERASED: u16 = 0;
/// First id ever minted.
pub(crate) const ID_MIN: u16 = 1;
/// Last valid id (inclusive); 0xFFFF is reserved for `ID_FREE`.
pub(crate) const ID_MAX: u16 = 0xFFFE;

/// `size` field sentinel meaning "page is open, never finalized".
pub(crate) const SIZE_PROVISIONAL: u16 = 0xFFFF;
/// `size` field sentinel meaning "page is fully used; compute payload from geometry".
pub(crate) const SIZE_FULL: u16 = 0;

/// Default number of free pages below which auto-GC kicks in.
pub const DEFAULT_AUTO_GC_THRESHOLD: usize = 4;

/// Conservative estimate of usable payload bytes per page, used only for the
/// `get_free_space` heuristic (a continuation page's true capacity is `PAGE - 6`; this
/// undershoots it to account for head-page overhead across a typical file mix).
pub const FREE_SPACE_HEURISTIC_BYTES: u64 = 4000;

/// Every error this crate can return. Callers are expected to match on the variant,
/// not on the `Display` text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// An operation that requires no open handles was attempted while one or more
    /// files were open.
    FileOpen,
    /// The handle was already closed.
    FileClosed,
    /// No file exists under that name or id.
    FileNotFound,
    /// `open(name, "w")` was called on a name that already has a closed file.
    FileExists,
    /// A write was attempted on a handle opened in read mode.
    FileWriteR,
    /// `open` was called with a mode other than `"r"` or `"w"`.
    UnknownMode,
    /// The region bounds are not sector-aligned, empty, or out of device range.
    InvalidSpiflashAddress,
    /// `write` was called with data that can't be interpreted as bytes.
    InvalidWriteData,
    /// No free page could be found, even after a GC pass.
    NoFreeSpace,
    /// A file name was empty or longer than `MAX_FNAME`.
    InvalidFilename,
    /// A parameter (e.g. a `seek` offset) was out of range.
    InvalidParameters,
    /// A flash program or verify operation reported a mismatch.
    Validation,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FsError::FileOpen => "FILE_OPEN",
            FsError::FileClosed => "FILE_CLOSED",
            FsError::FileNotFound => "FILE_NOT_FOUND",
            FsError::FileExists => "FILE_EXISTS",
            FsError::FileWriteR => "FILE_WRITE_R",
            FsError::UnknownMode => "UNKNOWN_MODE",
            FsError::InvalidSpiflashAddress => "INVALID_SPIFLASH_ADDRESS",
            FsError::InvalidWriteData => "INVALID_WRITE_DATA",
            FsError::NoFreeSpace => "NO_FREE_SPACE",
            FsError::InvalidFilename => "INVALID_FILENAME",
            FsError::InvalidParameters => "INVALID_PARAMETERS",
            FsError::Validation => "VALIDATION",
        };
        f.write_str(s)
    }
}

impl std::error::Error for FsError {}

pub type Result<T> = std::result::Result<T, FsError>;

/// A reference to a file, by name or by id. `Fat` methods accept anything that
/// converts into this so callers can pass either a `&str` or a raw id.
#[derive(Debug, Clone, Copy)]
pub enum FileRef<'a> {
    Name(&'a str),
    Id(u16),
}

impl<'a> From<&'a str> for FileRef<'a> {
    fn from(name: &'a str) -> Self { FileRef::Name(name) }
}

impl<'a> From<&'a String> for FileRef<'a> {
    fn from(name: &'a String) -> Self { FileRef::Name(name.as_str()) }
}

impl From<u16> for FileRef<'static> {
    fn from(id: u16) -> Self { FileRef::Id(id) }
}

/// Open mode for [`crate::FileSystem::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Read,
    Write,
}

impl Mode {
    pub(crate) fn parse(s: &str) -> Result<Mode> {
        match s {
            "r" => Ok(Mode::Read),
            "w" => Ok(Mode::Write),
            _ => Err(FsError::UnknownMode),
        }
    }
}

pub(crate) fn validate_filename(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_FNAME {
        Err(FsError::InvalidFilename)
    } else {
        Ok(())
    }
}

/// Snapshot of device geometry, returned by [`crate::FileSystem::dimensions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    /// Total bytes in the managed region (`end - start`).
    pub size: u32,
    /// Page count of the managed region. Kept distinct in name from `pages` only for
    /// source fidelity; both fields report the same value (see DESIGN.md).
    pub len: usize,
    pub start: u32,
    pub end: u32,
    pub pages: usize,
}

/// One entry of [`crate::FileSystem::file_list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileListEntry {
    pub id: u16,
    pub fname: String,
    pub size: u64,
    pub created: u32,
}

/// Free-space estimate returned by [`crate::FileSystem::get_free_space`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeSpace {
    /// Bytes estimated available from `FREE` pages alone.
    pub free: u64,
    /// Bytes estimated available from `FREE` plus reclaimable (`ERASED`/`BAD`) pages.
    pub freeable: u64,
}

/// Page status counts, returned by [`crate::FileSystem::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stats {
    pub free: usize,
    pub used: usize,
    pub erased: usize,
    pub bad: usize,
}
