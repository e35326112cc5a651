//! On-disk page header shared by every page kind the buffer manager caches.

use crate::error::{CredbError, Result};

/// Page identifier. Page 0 is reserved for the superblock/meta page.
pub type PageNo = u32;

const MAGIC: [u8; 4] = *b"CRDB";
const HDR_LEN: usize = 16;

/// Discriminates the page kinds the pager is generic over (§9 "Polymorphic pages").
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PageKind {
    /// A block of the per-shard append-only event log.
    LogBlock = 1,
    /// An object directory node (key -> chain head mapping).
    ObjectDirectory = 2,
    /// A secondary index node.
    IndexNode = 3,
    /// The buffer manager's own free-list / superblock page.
    Meta = 4,
}

impl TryFrom<u8> for PageKind {
    type Error = CredbError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(PageKind::LogBlock),
            2 => Ok(PageKind::ObjectDirectory),
            3 => Ok(PageKind::IndexNode),
            4 => Ok(PageKind::Meta),
            _ => Err(CredbError::integrity("unknown page kind byte")),
        }
    }
}

/// Fixed-size header prepended to every serialized page image.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct PageHeader {
    /// The page's own identity, redundantly stored for corruption detection.
    pub page_no: PageNo,
    /// Discriminates how the remaining bytes are interpreted.
    pub kind: PageKind,
    /// CRC32 of the payload that follows the header, computed over the
    /// header with `crc32` zeroed.
    pub crc32: u32,
}

impl PageHeader {
    /// Encodes this header and the given payload into a page-sized buffer,
    /// computing and filling in the checksum.
    pub fn encode(page_no: PageNo, kind: PageKind, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HDR_LEN + payload.len());
        buf.extend_from_slice(&MAGIC);
        buf.push(kind as u8);
        buf.push(0);
        buf.extend_from_slice(&page_no.to_le_bytes());
        buf.extend_from_slice(&[0u8; 4]); // crc32 placeholder
        buf.extend_from_slice(payload);
        let crc = crc32fast::hash(&buf[HDR_LEN..]);
        buf[12..16].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes the header and returns it alongside the payload slice,
    /// verifying the magic, the declared page number, and the checksum.
    pub fn decode(buf: &[u8], expected_page_no: PageNo) -> Result<(Self, &[u8])> {
        if buf.len() < HDR_LEN {
            return Err(CredbError::integrity("page buffer shorter than header"));
        }
        if buf[0..4] != MAGIC {
            return Err(CredbError::integrity("bad page magic"));
        }
        let kind = PageKind::try_from(buf[4])?;
        let page_no = PageNo::from_le_bytes(buf[6..10].try_into().unwrap());
        if page_no != expected_page_no {
            return Err(CredbError::integrity("page number mismatch"));
        }
        let stored_crc = u32::from_le_bytes(buf[12..16].try_into().unwrap());
        let payload = &buf[HDR_LEN..];
        let actual_crc = crc32fast::hash(payload);
        if actual_crc != stored_crc {
            return Err(CredbError::integrity("page checksum mismatch"));
        }
        Ok((
            PageHeader {
                page_no,
                kind,
                crc32: stored_crc,
            },
            payload,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let encoded = PageHeader::encode(7, PageKind::LogBlock, b"hello world");
        let (hdr, payload) = PageHeader::decode(&encoded, 7).unwrap();
        assert_eq!(hdr.page_no, 7);
        assert_eq!(hdr.kind, PageKind::LogBlock);
        assert_eq!(payload, b"hello world");
    }

    #[test]
    fn rejects_corrupted_payload() {
        let mut encoded = PageHeader::encode(1, PageKind::IndexNode, b"payload");
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        assert!(PageHeader::decode(&encoded, 1).is_err());
    }

    #[test]
    fn rejects_wrong_page_no() {
        let encoded = PageHeader::encode(1, PageKind::IndexNode, b"payload");
        assert!(PageHeader::decode(&encoded, 2).is_err());
    }
}
