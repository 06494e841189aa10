//! The page codec (C2): serializes and parses the per-page header, and classifies a
//! page's status from its raw bytes.

use crate::api::{COMMON_HEADER_LEN, HEAD_EXTRA_LEN, ID_ERASED, ID_FREE, MAX_FNAME, MAX_HEADER_LEN};

/// A page's classification, derived purely from its header bytes. See SPEC_FULL.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Free,
    Used,
    Erased,
    Bad,
}

/// The decoded fields of a page header. `name`/`created` are only populated for head
/// pages (`span == 0`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DecodedHeader {
    pub(crate) status: Status,
    pub(crate) id: u16,
    pub(crate) span: u16,
    pub(crate) size: u16,
    pub(crate) created: Option<u32>,
    pub(crate) name: Option<String>,
}

/// Header length that `id`'s page occupies, given its span. Only the head page
/// (span 0) carries `created`/`name_len`/`name`; every other page's header is just
/// the 6-byte common prefix.
pub(crate) fn header_len(span: u16, name_len: usize) -> usize {
    if span == 0 { COMMON_HEADER_LEN + HEAD_EXTRA_LEN + name_len } else { COMMON_HEADER_LEN }
}

/// Usable payload bytes in a page with the given header length.
pub(crate) fn payload_capacity(page_size: usize, header_len: usize) -> usize { page_size - header_len }

/// Builds the header buffer for a freshly allocated head page (span 0). `size`
/// should be [`crate::api::SIZE_PROVISIONAL`] until the page is finalized.
pub(crate) fn encode_head(id: u16, size: u16, created: u32, name: &str) -> Vec<u8> {
    debug_assert!(!name.is_empty() && name.len() <= MAX_FNAME);
    let mut buf = Vec::with_capacity(COMMON_HEADER_LEN + HEAD_EXTRA_LEN + name.len());
    buf.extend_from_slice(&id.to_le_bytes());
    buf.extend_from_slice(&0u16.to_le_bytes()); // span
    buf.extend_from_slice(&size.to_le_bytes());
    buf.extend_from_slice(&created.to_le_bytes());
    buf.push(name.len() as u8);
    buf.extend_from_slice(name.as_bytes());
    buf
}

/// Builds the header buffer for a continuation page (span > 0).
pub(crate) fn encode_continuation(id: u16, span: u16, size: u16) -> Vec<u8> {
    debug_assert!(span > 0);
    let mut buf = Vec::with_capacity(COMMON_HEADER_LEN);
    buf.extend_from_slice(&id.to_le_bytes());
    buf.extend_from_slice(&span.to_le_bytes());
    buf.extend_from_slice(&size.to_le_bytes());
    buf
}

/// Builds the finalization buffer for a page's `size` field: `id`/`span` are written
/// as `0xFFFF`, which is a no-op AND-program against whatever is already stored there,
/// so only `size` actually changes. Must be written with [`crate::flash::VerifyMode::None`].
pub(crate) fn encode_finalize(size: u16) -> Vec<u8> {
    let mut buf = Vec::with_capacity(COMMON_HEADER_LEN);
    buf.extend_from_slice(&0xFFFFu16.to_le_bytes());
    buf.extend_from_slice(&0xFFFFu16.to_le_bytes());
    buf.extend_from_slice(&size.to_le_bytes());
    buf
}

/// Builds the all-zero buffer written over a page's header area to logically delete
/// it (`erase_file`). Covers the full maximum header width regardless of this page's
/// actual header length, matching the source's "program a zero-filled block over the
/// whole header area" behavior.
pub(crate) fn encode_erase_marker() -> Vec<u8> { vec![0u8; MAX_HEADER_LEN] }

/// Parses a page's header from its first `MAX_HEADER_LEN` bytes (or fewer; a short
/// read is treated as if the missing bytes were absent head-page fields).
pub(crate) fn decode(buf: &[u8]) -> DecodedHeader {
    let id = u16::from_le_bytes([buf[0], buf[1]]);
    let span = u16::from_le_bytes([buf[2], buf[3]]);
    let size = u16::from_le_bytes([buf[4], buf[5]]);

    if id == ID_FREE {
        return if span == 0xFFFF && size == 0xFFFF {
            DecodedHeader { status: Status::Free, id, span, size, created: None, name: None }
        } else {
            DecodedHeader { status: Status::Bad, id, span, size, created: None, name: None }
        };
    }

    if id == ID_ERASED {
        return if span == 0 && size == 0 {
            DecodedHeader { status: Status::Erased, id, span, size, created: None, name: None }
        } else {
            DecodedHeader { status: Status::Bad, id, span, size, created: None, name: None }
        };
    }

    // id is in 1..=0xFFFE here.
    if span == 0 {
        if buf.len() < COMMON_HEADER_LEN + HEAD_EXTRA_LEN {
            return DecodedHeader { status: Status::Bad, id, span, size, created: None, name: None };
        }
        let created = u32::from_le_bytes([buf[6], buf[7], buf[8], buf[9]]);
        let name_len = buf[10] as usize;
        if name_len == 0 || name_len > MAX_FNAME || buf.len() < COMMON_HEADER_LEN + HEAD_EXTRA_LEN + name_len {
            return DecodedHeader { status: Status::Bad, id, span, size, created: None, name: None };
        }
        match std::str::from_utf8(&buf[11..11 + name_len]) {
            Ok(name) => DecodedHeader {
                status: Status::Used,
                id,
                span,
                size,
                created: Some(created),
                name: Some(name.to_string()),
            },
            Err(_) => DecodedHeader { status: Status::Bad, id, span, size, created: None, name: None },
        }
    } else {
        DecodedHeader { status: Status::Used, id, span, size, created: None, name: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_len_differs_head_vs_continuation() {
        assert_eq!(header_len(0, 8), 6 + 5 + 8);
        assert_eq!(header_len(1, 8), 6);
    }

    #[test]
    fn round_trip_head_header() {
        let buf = encode_head(42, 0xFFFF, 1_700_000_000, "test.txt");
        let d = decode(&buf);
        assert_eq!(d.status, Status::Used);
        assert_eq!(d.id, 42);
        assert_eq!(d.span, 0);
        assert_eq!(d.size, 0xFFFF);
        assert_eq!(d.created, Some(1_700_000_000));
        assert_eq!(d.name.as_deref(), Some("test.txt"));
    }

    #[test]
    fn round_trip_continuation_header() {
        let buf = encode_continuation(42, 1, 0);
        let d = decode(&buf);
        assert_eq!(d.status, Status::Used);
        assert_eq!(d.id, 42);
        assert_eq!(d.span, 1);
        assert_eq!(d.size, 0);
        assert_eq!(d.name, None);
    }

    #[test]
    fn all_ff_decodes_free() {
        let buf = vec![0xFFu8; MAX_HEADER_LEN];
        assert_eq!(decode(&buf).status, Status::Free);
    }

    #[test]
    fn all_zero_decodes_erased() {
        let buf = vec![0u8; MAX_HEADER_LEN];
        assert_eq!(decode(&buf).status, Status::Erased);
    }

    #[test]
    fn id_free_with_other_fields_set_is_bad() {
        let mut buf = vec![0xFFu8; MAX_HEADER_LEN];
        buf[2] = 0x01; // span no longer 0xFFFF
        assert_eq!(decode(&buf).status, Status::Bad);
    }

    #[test]
    fn id_erased_with_other_fields_set_is_bad() {
        let mut buf = vec![0u8; MAX_HEADER_LEN];
        buf[4] = 0x01; // size no longer 0
        assert_eq!(decode(&buf).status, Status::Bad);
    }

    #[test]
    fn head_page_with_bad_name_len_is_bad() {
        let mut buf = encode_head(7, 0, 0, "x");
        buf[10] = 0; // name_len == 0 is invalid
        assert_eq!(decode(&buf).status, Status::Bad);
    }

    #[test]
    fn finalize_buffer_is_noop_on_id_span() {
        let head = encode_head(9, 0xFFFF, 0, "a");
        let fin = encode_finalize(3);
        // simulate AND-programming by hand, as MemFlash would.
        let mut stored = head.clone();
        for (dst, &src) in stored.iter_mut().zip(fin.iter()) {
            *dst &= src;
        }
        let d = decode(&stored);
        assert_eq!(d.id, 9);
        assert_eq!(d.span, 0);
        assert_eq!(d.size, 3);
    }
}
