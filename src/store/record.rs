//! Record codec - the stanza wire format
//!
//! A stanza is the unit of storage:
//! ```text
//! [u16 descriptor_len]
//! [descriptor: header_offset, header_size, data_offset, data_size (u64 LE each)]
//! [metadata bytes]   at stanza_start + 2 + descriptor_len + header_offset
//! [payload bytes]    at stanza_start + 2 + descriptor_len + data_offset
//! ```
//! The descriptor carries its own length prefix so it may grow in future
//! versions; readers trust the prefix, never a fixed struct size. This module
//! is pure byte transformation with no I/O.

use crate::{Error, Result};

/// Serialized size of the current descriptor version
pub const DESCRIPTOR_LEN: u16 = 32;

/// Upper bound on a plausible descriptor length. A prefix above this (or of
/// zero) means we are decoding garbage, e.g. bytes past the commit pointer.
pub const MAX_DESCRIPTOR_LEN: u16 = 4096;

/// Fixed-layout descriptor at the head of every stanza.
///
/// Offsets are relative to the end of the descriptor, so decoding never
/// depends on the stanza's absolute position in the file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Descriptor {
    /// Offset of the metadata record, relative to descriptor end
    pub header_offset: u64,
    /// Length of the metadata record in bytes
    pub header_size: u64,
    /// Offset of the payload, relative to descriptor end
    pub data_offset: u64,
    /// Length of the payload in bytes
    pub data_size: u64,
}

impl Descriptor {
    /// Descriptor for a freshly laid-out stanza: metadata first, payload
    /// immediately after.
    pub fn for_lengths(header_size: u64, data_size: u64) -> Self {
        Descriptor {
            header_offset: 0,
            header_size,
            data_offset: header_size,
            data_size,
        }
    }

    /// Parse a descriptor from `bytes`, which must start at the 2-byte
    /// length prefix. Returns the descriptor and the declared length.
    pub fn decode(bytes: &[u8]) -> Result<(Descriptor, u16)> {
        if bytes.len() < 2 {
            return Err(Error::MalformedRecord(
                "truncated descriptor length prefix".into(),
            ));
        }
        let len = u16::from_le_bytes(bytes[0..2].try_into().unwrap());
        Self::validate_len(len)?;

        let body = &bytes[2..];
        if body.len() < len as usize {
            return Err(Error::MalformedRecord(format!(
                "descriptor declares {} bytes, only {} available",
                len,
                body.len()
            )));
        }

        // Trailing descriptor bytes beyond the fields we know are from a
        // newer writer and are ignored.
        let desc = Descriptor {
            header_offset: u64::from_le_bytes(body[0..8].try_into().unwrap()),
            header_size: u64::from_le_bytes(body[8..16].try_into().unwrap()),
            data_offset: u64::from_le_bytes(body[16..24].try_into().unwrap()),
            data_size: u64::from_le_bytes(body[24..32].try_into().unwrap()),
        };
        desc.validate_regions(len)?;

        Ok((desc, len))
    }

    /// Sanity-check a declared descriptor length before trusting it.
    pub fn validate_len(len: u16) -> Result<()> {
        if len < DESCRIPTOR_LEN || len > MAX_DESCRIPTOR_LEN {
            return Err(Error::MalformedRecord(format!(
                "implausible descriptor length {}",
                len
            )));
        }
        Ok(())
    }

    /// Total stanza size on disk, including the length prefix.
    pub fn stanza_size(&self, descriptor_len: u16) -> u64 {
        2 + descriptor_len as u64 + self.header_size + self.data_size
    }

    fn validate_regions(&self, descriptor_len: u16) -> Result<()> {
        let region = self
            .header_size
            .checked_add(self.data_size)
            .ok_or_else(|| Error::MalformedRecord("region sizes overflow".into()))?;
        let header_end = self
            .header_offset
            .checked_add(self.header_size)
            .ok_or_else(|| Error::MalformedRecord("metadata region overflows".into()))?;
        let data_end = self
            .data_offset
            .checked_add(self.data_size)
            .ok_or_else(|| Error::MalformedRecord("payload region overflows".into()))?;
        if header_end > region || data_end > region {
            return Err(Error::MalformedRecord(format!(
                "descriptor (len {}) places a region outside its stanza",
                descriptor_len
            )));
        }
        Ok(())
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.header_offset.to_le_bytes());
        out.extend_from_slice(&self.header_size.to_le_bytes());
        out.extend_from_slice(&self.data_offset.to_le_bytes());
        out.extend_from_slice(&self.data_size.to_le_bytes());
    }
}

/// Lay out a complete stanza for `metadata` and `payload`.
pub fn encode_stanza(metadata: &[u8], payload: &[u8]) -> Vec<u8> {
    let desc = Descriptor::for_lengths(metadata.len() as u64, payload.len() as u64);
    let mut out =
        Vec::with_capacity(2 + DESCRIPTOR_LEN as usize + metadata.len() + payload.len());
    out.extend_from_slice(&DESCRIPTOR_LEN.to_le_bytes());
    desc.encode_into(&mut out);
    out.extend_from_slice(metadata);
    out.extend_from_slice(payload);
    out
}
