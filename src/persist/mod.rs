//! Persistence: write-ahead log and snapshots.
//!
//! Inserts and deletes append to the WAL (incremental path); snapshots
//! capture the full index image through the blob store and let the WAL be
//! truncated. On open, the snapshot is loaded first and the WAL replayed on
//! top of it.

/// Snapshot save/load with CRC32 integrity and structural validation.
pub mod snapshot;
/// Framed, fsync'd append-only log of mutations.
pub mod wal;

pub use snapshot::{Snapshot, SnapshotHeader};
pub use wal::{ReplayStats, WalEntry, WriteAheadLog};
