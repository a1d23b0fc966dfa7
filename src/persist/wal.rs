//! Synchronous write-ahead log for crash recovery.
//!
//! Every mutation is appended here before being applied in memory, giving
//! the incremental-append path for inserts; periodic snapshots plus
//! truncation reclaim the log. Each entry is framed as
//! `[u32 length BE][u32 CRC32 BE][bincode payload]` and fsync'd before the
//! append returns.

use crate::config;
use crate::error::Result;
use crate::record::MetadataValue;
use crate::VectorId;
use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::PathBuf;

/// A single mutation entry, replayable on startup.
#[derive(Debug, Serialize, Deserialize)]
pub enum WalEntry {
    /// Insert (or overwrite) a vector with its metadata.
    Insert {
        id: VectorId,
        vector: Vec<f32>,
        metadata: HashMap<String, MetadataValue>,
    },
    /// Tombstone a vector by id.
    Delete { id: VectorId },
}

/// Diagnostic statistics from a WAL replay.
#[derive(Debug, Default)]
pub struct ReplayStats {
    /// Entries successfully deserialized.
    pub applied: usize,
    /// Entries skipped due to deserialization errors (CRC was valid).
    pub skipped: usize,
    /// CRC mismatches encountered; replay stops at the first.
    pub crc_errors: usize,
    /// Whether replay ended on a truncated entry.
    pub truncated: bool,
}

/// Append-only write-ahead log with CRC32 integrity framing.
///
/// Appends serialize under a mutex; [`freeze`](WriteAheadLog::freeze) takes
/// an exclusive gate that blocks appends for the duration of a snapshot +
/// truncate.
pub struct WriteAheadLog {
    writer: Mutex<BufWriter<File>>,
    write_gate: RwLock<()>,
    path: PathBuf,
}

impl WriteAheadLog {
    /// Open or create the log file in append mode.
    pub fn open(data_dir: &std::path::Path) -> Result<Self> {
        fs::create_dir_all(data_dir)?;
        let path = data_dir.join(config::WAL_FILE_NAME);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            write_gate: RwLock::new(()),
            path,
        })
    }

    /// Append an entry: serialize, write, flush, fsync.
    pub fn append(&self, entry: &WalEntry) -> Result<()> {
        let framed = frame(entry)?;
        let _gate = self.write_gate.read();
        let mut w = self.writer.lock();
        w.write_all(&framed)?;
        w.flush()?;
        w.get_mut().sync_all()?;
        Ok(())
    }

    /// Read all entries sequentially, verifying checksums.
    ///
    /// Corruption stops replay at the damaged entry rather than failing:
    /// everything before it is durable state worth recovering.
    pub fn replay(&self) -> Result<(Vec<WalEntry>, ReplayStats)> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);
        let mut entries = Vec::new();
        let mut stats = ReplayStats::default();
        let mut header = [0u8; 8];

        loop {
            match reader.read_exact(&mut header) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
            let stored_crc = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);

            let mut payload = vec![0u8; len];
            match reader.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    tracing::warn!("WAL truncated mid-entry, stopping replay");
                    stats.truncated = true;
                    break;
                }
                Err(e) => return Err(e.into()),
            }

            if crc32fast::hash(&payload) != stored_crc {
                tracing::warn!("WAL entry CRC mismatch, stopping replay");
                stats.crc_errors += 1;
                break;
            }
            match bincode::deserialize::<WalEntry>(&payload) {
                Ok(entry) => {
                    entries.push(entry);
                    stats.applied += 1;
                }
                Err(e) => {
                    tracing::warn!("WAL entry deserialization failed, skipping: {e}");
                    stats.skipped += 1;
                }
            }
        }

        Ok((entries, stats))
    }

    /// Take the exclusive write gate, blocking appends. Hold the guard
    /// across snapshot + truncate.
    pub fn freeze(&self) -> RwLockWriteGuard<'_, ()> {
        self.write_gate.write()
    }

    /// Truncate the log and reopen in append mode.
    pub fn truncate(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        let truncated = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        truncated.sync_all()?;
        *writer = BufWriter::new(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?,
        );
        Ok(())
    }
}

/// `[u32 len BE][u32 crc32 BE][bincode payload]`
fn frame(entry: &WalEntry) -> Result<Vec<u8>> {
    let bytes = bincode::serialize(entry)?;
    let mut framed = Vec::with_capacity(8 + bytes.len());
    framed.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    framed.extend_from_slice(&crc32fast::hash(&bytes).to_be_bytes());
    framed.extend_from_slice(&bytes);
    Ok(framed)
}
