//! The open-file handle (C6): a cursor plus mode over a file id, sharing the file
//! system's state through the same `Rc<RefCell<_>>` so that closing, erasing, or GC
//! triggered elsewhere stays consistent with any handle still alive.

use std::cell::RefCell;
use std::rc::Rc;

use crate::api::{FsError, Mode, Result};
use crate::clock::Clock;
use crate::flash::Flash;
use crate::fs::Inner;

/// A handle returned by [`crate::FileSystem::open`]. Behaves like a plain byte
/// stream: `write` always appends, `read` advances an independent cursor, and `seek`
/// only affects that read cursor (see design notes).
pub struct File<F: Flash, C: Clock> {
    fs: Rc<RefCell<Inner<F, C>>>,
    id: u16,
    name: String,
    mode: Mode,
    created: u32,
    r_pos: u64,
    w_pos: u64,
    closed: bool,
}

impl<F: Flash, C: Clock> File<F, C> {
    pub(crate) fn new(fs: Rc<RefCell<Inner<F, C>>>, id: u16, name: String, mode: Mode, created: u32) -> Self {
        File { fs, id, name, mode, created, r_pos: 0, w_pos: 0, closed: false }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            Err(FsError::FileClosed)
        } else {
            Ok(())
        }
    }

    pub fn name(&self) -> &str { &self.name }

    pub fn mode(&self) -> Mode { self.mode }

    /// Total bytes written to this file so far.
    pub fn len(&self) -> Result<u64> {
        self.check_open()?;
        Ok(self.fs.borrow().fat.get(self.id.into())?.size_total)
    }

    pub fn created(&self) -> u32 { self.created }

    /// Current read-cursor position.
    pub fn tell(&self) -> Result<u64> {
        self.check_open()?;
        Ok(self.r_pos)
    }

    /// Whether the read cursor has reached the end of the file's current content.
    pub fn eof(&self) -> Result<bool> {
        self.check_open()?;
        Ok(self.r_pos >= self.len()?)
    }

    /// Moves the read cursor. Does not affect where the next `write` lands (writes
    /// always append). `pos` must be within `[0, len()]`.
    pub fn seek(&mut self, pos: u64) -> Result<()> {
        self.check_open()?;
        let len = self.len()?;
        if pos > len {
            return Err(FsError::InvalidParameters);
        }
        self.r_pos = pos;
        Ok(())
    }

    /// Reads up to `max_len` bytes from the current cursor, advancing it. Returns
    /// fewer bytes at end of file, and an empty vector once the cursor is at `len()`.
    pub fn read(&mut self, max_len: usize) -> Result<Vec<u8>> {
        self.check_open()?;
        let data = self.fs.borrow_mut().read_at(self.id, self.r_pos, max_len)?;
        self.r_pos += data.len() as u64;
        Ok(data)
    }

    /// Appends `data` to the file. Only valid for handles opened in write mode.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.check_open()?;
        if self.mode != Mode::Write {
            return Err(FsError::FileWriteR);
        }
        let n = self.fs.borrow_mut().write_append(self.id, data)?;
        self.w_pos += n as u64;
        Ok(n)
    }

    /// Finalizes the file (if opened for write) and releases the open-handle slot.
    /// Further use of the handle fails with [`FsError::FileClosed`].
    pub fn close(&mut self) -> Result<()> {
        self.check_open()?;
        self.fs.borrow_mut().close(self.id, self.mode)?;
        self.closed = true;
        Ok(())
    }
}

impl<F: Flash, C: Clock> Drop for File<F, C> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.fs.borrow_mut().close(self.id, self.mode) {
                log::warn!("error closing file {} on drop: {e}", self.name);
            }
        }
    }
}
