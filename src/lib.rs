//! # tileblob
//!
//! An append-only, single-file blob store for variable-sized tiled data
//! records.
//!
//! Each entry is a *stanza*: a small self-describing descriptor followed by
//! an opaque metadata record and an opaque payload. Entries are identified by
//! their *base offset* -- the byte offset of the stanza within the file --
//! which is stable for the life of the file. A persisted *commit pointer* in
//! the file header marks the boundary between committed stanzas and undefined
//! trailing bytes, making every append all-or-nothing from a reader's
//! perspective: a crash mid-write leaves the pointer untouched and the
//! partial stanza invisible.
//!
//! ## Example
//!
//! ```ignore
//! use tileblob::Blob;
//!
//! let blob = Blob::open("tiles.blob")?;
//! let offset = blob.write(b"tile:0,0,L5", &payload)?;
//! let (data, len) = blob.read_data(offset)?;
//! for entry in blob.entries() {
//!     let entry = entry?;
//!     println!("{}: {} bytes", entry.base_offset, entry.header.len());
//! }
//! ```

mod error;
pub mod store;

pub use error::{Error, Result};
pub use store::{Blob, Descriptor, Entries, Entry, SendfileParams};

/// Size in bytes of the reserved header region at the start of a blob file.
///
/// Three little-endian u64 words: the commit pointer, a monotonically
/// increasing write counter, and a reserved word for future use. The first
/// stanza starts immediately after this region.
pub const RESERVED_REGION_SIZE: u64 = 24;
