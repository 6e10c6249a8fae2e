//! File backend - positioned I/O over the single backing file
//!
//! Owns the file handle and the reserved header region:
//! ```text
//! [0..8)   u64 LE  commit_pointer   first unwritten committed byte
//! [8..16)  u64 LE  write_count      bumped on every publish
//! [16..24) u64 LE  reserved         future use, round-trips unchanged
//! ```
//! Bytes at or beyond the commit pointer are undefined and are never
//! interpreted. Publishing a new pointer is the single atomic step that
//! makes an appended stanza visible.

use crate::{Error, Result, RESERVED_REGION_SIZE};
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Clone, Copy, Debug)]
struct Header {
    commit_ptr: u64,
    write_count: u64,
    reserved: u64,
}

impl Header {
    fn to_bytes(self) -> [u8; RESERVED_REGION_SIZE as usize] {
        let mut buf = [0u8; RESERVED_REGION_SIZE as usize];
        buf[0..8].copy_from_slice(&self.commit_ptr.to_le_bytes());
        buf[8..16].copy_from_slice(&self.write_count.to_le_bytes());
        buf[16..24].copy_from_slice(&self.reserved.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8; RESERVED_REGION_SIZE as usize]) -> Self {
        Header {
            commit_ptr: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            write_count: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            reserved: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
        }
    }
}

/// Positioned read/write access to the blob file plus the persisted
/// commit pointer.
pub struct FileBackend {
    path: PathBuf,
    file: RwLock<File>,
    header: RwLock<Header>,
    read_only: bool,
}

impl FileBackend {
    /// Open `path`, creating and initializing it when absent or empty (in
    /// read-write mode). An existing file must carry a well-formed reserved
    /// region.
    pub fn open_or_create(path: impl AsRef<Path>, read_only: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .create(!read_only)
            .open(&path)?;

        let len = file.metadata()?.len();
        let header = if len == 0 {
            let header = Header {
                commit_ptr: RESERVED_REGION_SIZE,
                write_count: 0,
                reserved: 0,
            };
            if !read_only {
                file.write_all(&header.to_bytes())?;
                file.sync_all()?;
            }
            header
        } else if len < RESERVED_REGION_SIZE {
            return Err(Error::MalformedRecord(format!(
                "file is {} bytes, shorter than the reserved region",
                len
            )));
        } else {
            let mut buf = [0u8; RESERVED_REGION_SIZE as usize];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut buf)?;
            let header = Header::from_bytes(&buf);
            if header.commit_ptr < RESERVED_REGION_SIZE {
                return Err(Error::MalformedRecord(format!(
                    "commit pointer {} inside the reserved region",
                    header.commit_ptr
                )));
            }
            header
        };

        debug!(
            path = %path.display(),
            commit_ptr = header.commit_ptr,
            write_count = header.write_count,
            read_only,
            "opened blob file"
        );

        Ok(FileBackend {
            path,
            file: RwLock::new(file),
            header: RwLock::new(header),
            read_only,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Read exactly `len` bytes at `offset`. A short read surfaces as `Io`.
    pub fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Write `bytes` at `offset`. Fails with `ReadOnly` on a read-only
    /// handle. Does not flush.
    pub fn write_at(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(bytes)?;
        Ok(())
    }

    /// Force buffered writes to durable storage.
    pub fn flush(&self) -> Result<()> {
        self.file.write().sync_all()?;
        Ok(())
    }

    pub fn commit_pointer(&self) -> u64 {
        self.header.read().commit_ptr
    }

    pub fn write_count(&self) -> u64 {
        self.header.read().write_count
    }

    /// Persist `new_ptr` as the commit pointer and bump the write counter.
    ///
    /// This is the publish step and must be the last action of any append:
    /// the stanza bytes below `new_ptr` must already be durable. The counter
    /// lands first and the 8-byte pointer goes down in a single write, so a
    /// crash can never leave a torn pointer.
    pub fn publish(&self, new_ptr: u64) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        let mut header = self.header.write();
        let next = Header {
            commit_ptr: new_ptr,
            write_count: header.write_count + 1,
            reserved: header.reserved,
        };
        {
            let mut file = self.file.write();
            file.seek(SeekFrom::Start(8))?;
            file.write_all(&next.write_count.to_le_bytes())?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&next.commit_ptr.to_le_bytes())?;
            file.sync_all()?;
        }
        *header = next;
        Ok(())
    }
}
