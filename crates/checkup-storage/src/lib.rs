//! checkup-storage: where completed batches are kept.
//!
//! Only the `fs` backend exists: one JSON file per batch plus an
//! `index.json` mapping file names to the time they were written.

pub mod fs;

pub use fs::FsStorage;
