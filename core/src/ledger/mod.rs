//! Per-group append-only event log plus content-addressed blob store
//! (spec §4.1). Sole mutator of on-disk group state; readers use
//! independent file handles and never observe a partial line.

pub mod blob;
pub mod filter;
pub mod store;

pub use blob::BlobStore;
pub use filter::{ReadFilter, ReadResult};
pub use store::{FsyncPolicy, LedgerStore};
