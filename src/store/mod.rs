//! Append-only blob storage
//!
//! This module implements the storage layer: a pure record codec, a file
//! backend that owns the handle and the persisted commit pointer, and the
//! public [`Blob`] store composing the two.

mod backend;
mod blob;
mod record;

pub use blob::{Blob, Entries, Entry, SendfileParams};
pub use record::Descriptor;
