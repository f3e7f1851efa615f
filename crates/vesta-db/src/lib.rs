//! Vesta DB - The archive's append-only download log and directory layout.
//!
//! There is no database engine: the log is a flat, replayable file and every
//! view of it is rebuilt by a linear scan.

pub mod archive;
pub mod layout;
pub mod log;

pub use archive::{human_bytes, Archive, DeleteStats, DiskUsage};
pub use layout::{ArchiveLayout, LOG_FILE};
pub use log::{ArchiveLog, CompactionStats, LogWriter, Records};
