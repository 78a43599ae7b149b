//! # spillset storage
//!
//! Backing store handles and storage locations for spilled segments.
//!
//! This crate provides the lowest-level storage abstraction for spillset.
//! Backends are **opaque byte stores** - they do not interpret the data
//! they store. Each backend holds exactly one segment blob.
//!
//! ## Design Principles
//!
//! - A backend is written once (append), then read (read_at) any number of times
//! - Rewriting a blob means truncating it first
//! - No knowledge of segment formats or element encodings
//! - Locations create, reopen, list and release backends inside a namespace
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and as a stand-in for a remote store entry
//! - [`FileBackend`] - One file on a local or mounted file system
//!
//! ## Available Locations
//!
//! - [`DirectoryLocation`] - A directory; namespaces are sub-directories
//! - [`MemoryLocation`] - A shared in-process store with configurable capacity
//!
//! ## Example
//!
//! ```rust
//! use spillset_storage::{MemoryLocation, StoreLocation};
//!
//! let location = MemoryLocation::new("scratch");
//! let mut backend = location.create("set-1", "spill-00000001.seg").unwrap();
//! let offset = backend.append(b"hello world").unwrap();
//! assert_eq!(backend.read_at(offset, 11).unwrap(), b"hello world");
//! assert_eq!(location.list("set-1").unwrap(), vec!["spill-00000001.seg"]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod location;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use location::{Capacity, DirectoryLocation, MemoryLocation, StoreLocation};
pub use memory::InMemoryBackend;
