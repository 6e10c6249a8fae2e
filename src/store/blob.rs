//! Blob store - the public append/read entity
//!
//! Composes the record codec and the file backend. A single writer appends
//! stanzas; any number of readers fetch metadata or payload by base offset
//! or walk the committed entries in append order. The persisted commit
//! pointer is the only synchronization variable: `write` makes its stanza
//! durable first and publishes the pointer last, so readers never observe a
//! torn or half-written entry.

use crate::store::backend::FileBackend;
use crate::store::record::{self, Descriptor};
use crate::{Error, Result, RESERVED_REGION_SIZE};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Everything a caller needs to stream a payload straight from the backing
/// file descriptor to a socket with `sendfile(2)`. Disclosure only; no I/O
/// happens here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendfileParams {
    /// Path of the backing blob file
    pub path: PathBuf,
    /// Absolute byte offset of the payload within the file
    pub offset: u64,
    /// Payload length in bytes
    pub size: u64,
}

/// An append-only blob store backed by a single file.
pub struct Blob {
    backend: FileBackend,
}

impl Blob {
    /// Open `path` read-write, creating and initializing it if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Blob {
            backend: FileBackend::open_or_create(path, false)?,
        })
    }

    /// Open `path` read-only. `write` and `write_from_file` will fail with
    /// `ReadOnly`.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Blob {
            backend: FileBackend::open_or_create(path, true)?,
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        self.backend.path()
    }

    /// Logical size: the commit pointer. Counts the reserved region and all
    /// committed stanzas; undefined trailing bytes are excluded.
    pub fn size(&self) -> u64 {
        self.backend.commit_pointer()
    }

    /// Number of publishes performed over the file's lifetime. Informational.
    pub fn write_count(&self) -> u64 {
        self.backend.write_count()
    }

    /// Append a stanza and return its base offset.
    ///
    /// The stanza bytes are written and flushed before the commit pointer is
    /// published, so a failure or crash at any point before the publish
    /// leaves the store exactly as it was: the partial stanza is invisible
    /// and the next successful append overwrites it.
    pub fn write(&self, metadata: &[u8], payload: &[u8]) -> Result<u64> {
        let stanza = record::encode_stanza(metadata, payload);
        let base = self.backend.commit_pointer();

        self.backend.write_at(base, &stanza)?;
        self.backend.flush()?;
        self.backend.publish(base + stanza.len() as u64)?;

        debug!(base, stanza_len = stanza.len(), "appended stanza");
        Ok(base)
    }

    /// Read the opaque metadata record of the entry at `base_offset`.
    pub fn read_header(&self, base_offset: u64) -> Result<Bytes> {
        let (desc, len) = self.read_descriptor(base_offset)?;
        let start = base_offset + 2 + len as u64 + desc.header_offset;
        let bytes = self.backend.read_at(start, desc.header_size as usize)?;
        Ok(Bytes::from(bytes))
    }

    /// Read the payload of the entry at `base_offset`. Returns the bytes and
    /// their length.
    pub fn read_data(&self, base_offset: u64) -> Result<(Bytes, u64)> {
        let (desc, len) = self.read_descriptor(base_offset)?;
        let start = base_offset + 2 + len as u64 + desc.data_offset;
        let bytes = self.backend.read_at(start, desc.data_size as usize)?;
        Ok((Bytes::from(bytes), desc.data_size))
    }

    /// Payload length of the entry at `base_offset`, without reading it.
    pub fn data_size(&self, base_offset: u64) -> Result<u64> {
        let (desc, _) = self.read_descriptor(base_offset)?;
        Ok(desc.data_size)
    }

    /// The byte range of the payload at `base_offset`, for zero-copy
    /// delivery from the file descriptor.
    pub fn read_sendfile_params(&self, base_offset: u64) -> Result<SendfileParams> {
        let (desc, len) = self.read_descriptor(base_offset)?;
        Ok(SendfileParams {
            path: self.backend.path().to_path_buf(),
            offset: base_offset + 2 + len as u64 + desc.data_offset,
            size: desc.data_size,
        })
    }

    /// Base offset of the entry following the one at `base_offset`. Returns
    /// exactly the commit pointer when called on the last entry.
    pub fn next_base_offset(&self, base_offset: u64) -> Result<u64> {
        let (desc, len) = self.read_descriptor(base_offset)?;
        Ok(base_offset + desc.stanza_size(len))
    }

    /// Export the payload at `base_offset` into its own file at `dest`.
    pub fn read_to_file(&self, base_offset: u64, dest: impl AsRef<Path>) -> Result<()> {
        let (data, size) = self.read_data(base_offset)?;
        std::fs::write(&dest, &data)?;
        debug!(base = base_offset, size, dest = %dest.as_ref().display(), "exported payload");
        Ok(())
    }

    /// Append the entire contents of `source` as a payload, with the given
    /// metadata record. Same publish protocol as [`Blob::write`].
    pub fn write_from_file(&self, source: impl AsRef<Path>, metadata: &[u8]) -> Result<u64> {
        let payload = std::fs::read(&source)?;
        trace!(source = %source.as_ref().display(), len = payload.len(), "importing payload");
        self.write(metadata, &payload)
    }

    /// Iterate over committed entries in append order, yielding each entry's
    /// base offset and metadata record.
    ///
    /// The commit pointer is snapshotted at construction: entries appended
    /// after this call are not observed. Multiple iterators may coexist and
    /// advance independently.
    pub fn entries(&self) -> Entries<'_> {
        Entries {
            blob: self,
            offset: RESERVED_REGION_SIZE,
            end: self.size(),
        }
    }

    /// Flush any buffered writes to durable storage.
    pub fn flush(&self) -> Result<()> {
        self.backend.flush()
    }

    fn read_descriptor(&self, base_offset: u64) -> Result<(Descriptor, u16)> {
        let size = self.size();
        if base_offset < RESERVED_REGION_SIZE || base_offset >= size {
            return Err(Error::OutOfRange {
                offset: base_offset,
                size,
            });
        }
        let prefix = self.backend.read_at(base_offset, 2)?;
        let len = u16::from_le_bytes(prefix[0..2].try_into().unwrap());
        Descriptor::validate_len(len)?;
        if base_offset + 2 + len as u64 > size {
            return Err(Error::MalformedRecord(format!(
                "descriptor at {} extends past the committed size {}",
                base_offset, size
            )));
        }

        let mut stanza_head = prefix;
        stanza_head.extend(self.backend.read_at(base_offset + 2, len as usize)?);
        let (desc, len) = Descriptor::decode(&stanza_head)?;

        // A committed stanza ends at or before the commit pointer; an extent
        // past it means the descriptor is corrupt, and trusting it would
        // interpret undefined trailing bytes
        let end = base_offset
            .checked_add(desc.stanza_size(len))
            .ok_or_else(|| Error::MalformedRecord("stanza extent overflows".into()))?;
        if end > size {
            return Err(Error::MalformedRecord(format!(
                "stanza at {} extends to {}, past the committed size {}",
                base_offset, end, size
            )));
        }
        Ok((desc, len))
    }
}

impl Drop for Blob {
    fn drop(&mut self) {
        // Best-effort flush on teardown; read-only handles have nothing
        // buffered
        if !self.backend.is_read_only() {
            let _ = self.backend.flush();
        }
    }
}

/// One committed entry as seen by the iterator: its identity and its opaque
/// metadata record. Payloads are deliberately not read; fetch them by offset
/// with [`Blob::read_data`] or size them with [`Blob::data_size`].
#[derive(Clone, Debug)]
pub struct Entry {
    pub base_offset: u64,
    pub header: Bytes,
}

/// Forward-only iterator over committed entries, used by the external index
/// to rebuild itself after a restart. Restart by calling [`Blob::entries`]
/// again.
pub struct Entries<'a> {
    blob: &'a Blob,
    offset: u64,
    end: u64,
}

impl Iterator for Entries<'_> {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.end {
            return None;
        }
        let base = self.offset;
        let step = self
            .blob
            .read_header(base)
            .and_then(|header| Ok((header, self.blob.next_base_offset(base)?)));
        match step {
            Ok((header, next)) => {
                self.offset = next;
                Some(Ok(Entry {
                    base_offset: base,
                    header,
                }))
            }
            Err(e) => {
                // A malformed stanza below the commit pointer means
                // corruption; stop rather than loop on it
                self.offset = self.end;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_read_roundtrip() {
        let dir = tempdir().unwrap();
        let blob = Blob::open(dir.path().join("test.blob")).unwrap();

        let offset = blob.write(b"tile:0,0,L5", b"pixel data").unwrap();
        assert_eq!(offset, RESERVED_REGION_SIZE);

        assert_eq!(blob.read_header(offset).unwrap(), &b"tile:0,0,L5"[..]);
        let (data, size) = blob.read_data(offset).unwrap();
        assert_eq!(data, &b"pixel data"[..]);
        assert_eq!(size, 10);
        assert_eq!(blob.data_size(offset).unwrap(), 10);
    }

    #[test]
    fn test_monotonic_identity() {
        let dir = tempdir().unwrap();
        let blob = Blob::open(dir.path().join("test.blob")).unwrap();

        let o1 = blob.write(b"a", b"first").unwrap();
        let o2 = blob.write(b"b", b"second payload").unwrap();

        assert!(o2 > o1);
        assert_eq!(o2, blob.next_base_offset(o1).unwrap());
        assert_eq!(blob.next_base_offset(o2).unwrap(), blob.size());
    }

    #[test]
    fn test_iterator_completeness_and_order() {
        let dir = tempdir().unwrap();
        let blob = Blob::open(dir.path().join("test.blob")).unwrap();

        let metas: Vec<String> = (0..5).map(|i| format!("tile:{},0,L1", i)).collect();
        let mut offsets = Vec::new();
        for meta in &metas {
            offsets.push(blob.write(meta.as_bytes(), b"data").unwrap());
        }

        let entries: Vec<Entry> = blob.entries().collect::<Result<_>>().unwrap();
        assert_eq!(entries.len(), 5);
        for (i, entry) in entries.iter().enumerate() {
            assert_eq!(entry.base_offset, offsets[i]);
            assert_eq!(entry.header, metas[i].as_bytes());
        }
    }

    #[test]
    fn test_snapshot_isolation() {
        let dir = tempdir().unwrap();
        let blob = Blob::open(dir.path().join("test.blob")).unwrap();

        blob.write(b"one", b"1").unwrap();
        let mut iter = blob.entries();
        blob.write(b"two", b"2").unwrap();

        assert_eq!(iter.next().unwrap().unwrap().header, &b"one"[..]);
        assert!(iter.next().is_none());

        // A fresh iterator sees both
        assert_eq!(blob.entries().count(), 2);
    }

    #[test]
    fn test_empty_store_boundaries() {
        let dir = tempdir().unwrap();
        let blob = Blob::open(dir.path().join("test.blob")).unwrap();

        assert_eq!(blob.size(), RESERVED_REGION_SIZE);
        assert_eq!(blob.entries().count(), 0);
        assert!(matches!(
            blob.read_header(RESERVED_REGION_SIZE),
            Err(Error::OutOfRange { .. })
        ));
        assert!(matches!(
            blob.read_data(blob.size() + 100),
            Err(Error::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_offset_at_size_is_out_of_range() {
        let dir = tempdir().unwrap();
        let blob = Blob::open(dir.path().join("test.blob")).unwrap();

        blob.write(b"m", b"d").unwrap();
        assert!(matches!(
            blob.read_header(blob.size()),
            Err(Error::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_read_only_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.blob");

        let offset;
        {
            let blob = Blob::open(&path).unwrap();
            offset = blob.write(b"meta", b"payload").unwrap();
        }

        let blob = Blob::open_read_only(&path).unwrap();
        assert_eq!(blob.read_header(offset).unwrap(), &b"meta"[..]);
        assert!(matches!(blob.write(b"x", b"y"), Err(Error::ReadOnly)));
    }

    #[test]
    fn test_sendfile_params() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.blob");
        let blob = Blob::open(&path).unwrap();

        let offset = blob.write(b"meta", b"payload").unwrap();
        let params = blob.read_sendfile_params(offset).unwrap();

        assert_eq!(params.path, path);
        assert_eq!(params.size, 7);

        // The disclosed range must hold exactly the payload bytes
        let raw = std::fs::read(&path).unwrap();
        let start = params.offset as usize;
        assert_eq!(&raw[start..start + params.size as usize], b"payload");
    }

    #[test]
    fn test_import_export_files() {
        let dir = tempdir().unwrap();
        let blob = Blob::open(dir.path().join("test.blob")).unwrap();

        let source = dir.path().join("tile.bin");
        std::fs::write(&source, vec![0xAB; 512]).unwrap();

        let offset = blob.write_from_file(&source, b"tile:1,2,L3").unwrap();
        assert_eq!(blob.data_size(offset).unwrap(), 512);
        assert_eq!(blob.read_header(offset).unwrap(), &b"tile:1,2,L3"[..]);

        let dest = dir.path().join("exported.bin");
        blob.read_to_file(offset, &dest).unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), vec![0xAB; 512]);
    }

    #[test]
    fn test_corrupt_descriptor_sizes_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.blob");

        let r0;
        {
            let blob = Blob::open(&path).unwrap();
            r0 = blob.write(b"meta", b"payload").unwrap();
        }

        // Corrupt the committed descriptor's data_size so the stanza claims
        // to extend past the commit pointer, and plant garbage there
        let mut raw = std::fs::read(&path).unwrap();
        let pos = (r0 + 2 + 24) as usize;
        let data_size = u64::from_le_bytes(raw[pos..pos + 8].try_into().unwrap());
        raw[pos..pos + 8].copy_from_slice(&(data_size + 100).to_le_bytes());
        raw.extend_from_slice(&[0xFF; 200]);
        std::fs::write(&path, &raw).unwrap();

        let blob = Blob::open(&path).unwrap();

        // No read path may hand back bytes beyond the commit pointer
        assert!(matches!(
            blob.read_data(r0),
            Err(Error::MalformedRecord(_))
        ));
        assert!(matches!(
            blob.read_header(r0),
            Err(Error::MalformedRecord(_))
        ));
        assert!(matches!(
            blob.next_base_offset(r0),
            Err(Error::MalformedRecord(_))
        ));
        assert!(matches!(
            blob.read_sendfile_params(r0),
            Err(Error::MalformedRecord(_))
        ));
    }

    #[test]
    fn test_iterator_surfaces_malformed_stanza_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.blob");

        {
            let blob = Blob::open(&path).unwrap();
            blob.write(b"one", b"1").unwrap();
            blob.write(b"two", b"2").unwrap();
        }

        // Zero the first stanza's length prefix below the commit pointer
        let mut raw = std::fs::read(&path).unwrap();
        let base = RESERVED_REGION_SIZE as usize;
        raw[base..base + 2].copy_from_slice(&0u16.to_le_bytes());
        std::fs::write(&path, &raw).unwrap();

        let blob = Blob::open_read_only(&path).unwrap();
        let mut iter = blob.entries();
        assert!(matches!(
            iter.next(),
            Some(Err(Error::MalformedRecord(_)))
        ));
        // Corruption is surfaced once, then iteration terminates
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_read_only_rejects_write_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.blob");
        {
            let blob = Blob::open(&path).unwrap();
            blob.write(b"meta", b"payload").unwrap();
        }

        let source = dir.path().join("tile.bin");
        std::fs::write(&source, b"bytes").unwrap();

        let blob = Blob::open_read_only(&path).unwrap();
        assert!(matches!(
            blob.write_from_file(&source, b"meta"),
            Err(Error::ReadOnly)
        ));
        assert_eq!(blob.entries().count(), 1);
    }

    #[test]
    fn test_write_count_increments() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.blob");

        {
            let blob = Blob::open(&path).unwrap();
            assert_eq!(blob.write_count(), 0);
            blob.write(b"a", b"1").unwrap();
            blob.write(b"b", b"2").unwrap();
            assert_eq!(blob.write_count(), 2);
        }

        let blob = Blob::open_read_only(&path).unwrap();
        assert_eq!(blob.write_count(), 2);
    }
}
