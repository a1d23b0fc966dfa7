//! Index snapshots through the blob store.
//!
//! A snapshot is the durable image of everything except the vector records
//! themselves (those live under their own blob keys): a header describing
//! the index shape, the graph topology (node table), the quantized code
//! arena, and the internal-id → vector-id table. The bincode payload
//! carries a CRC32 footer; loading verifies it and the structural
//! invariants before the state is trusted.

use crate::config;
use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use crate::graph::ProximityGraph;
use crate::quantization::{Codebook, QuantizerConfig};
use crate::store::BlobStore;
use crate::VectorId;
use serde::{Deserialize, Serialize};

/// Bump on any incompatible layout change.
const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Magic bytes preceding the CRC32 footer.
const SNAPSHOT_CRC_MAGIC: &[u8; 4] = b"QVR1";

/// Snapshot header: the index shape and the codebook generation the code
/// arena was produced under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub format_version: u32,
    pub dimension: usize,
    pub metric: DistanceMetric,
    pub quantizer: QuantizerConfig,
    pub codebook_generation: u64,
}

/// Durable image of the index (vector records excluded).
#[derive(Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub header: SnapshotHeader,
    /// Node table: topology, layers, liveness, entry point.
    pub graph: ProximityGraph,
    pub codebook: Option<Codebook>,
    /// Code arena, `code_len` bytes per node; empty without a codebook.
    pub codes: Vec<u8>,
    /// Vector table: internal id → caller id, parallel to the node table.
    pub internal_to_id: Vec<VectorId>,
}

/// Serialize and store the snapshot: `[bincode][magic][CRC32 BE]`,
/// atomically replacing the previous one.
pub fn save(snapshot: &Snapshot, blobs: &dyn BlobStore) -> Result<()> {
    let payload = bincode::serialize(snapshot)?;
    let crc = crc32fast::hash(&payload);

    let mut out = Vec::with_capacity(payload.len() + 8);
    out.extend_from_slice(&payload);
    out.extend_from_slice(SNAPSHOT_CRC_MAGIC);
    out.extend_from_slice(&crc.to_be_bytes());

    blobs.write(config::SNAPSHOT_KEY, &out)?;
    tracing::info!(
        "saved snapshot: {} nodes, {} bytes, CRC32={crc:#010x}",
        snapshot.graph.node_count(),
        payload.len()
    );
    Ok(())
}

/// Load and verify the snapshot, if one exists.
pub fn load(blobs: &dyn BlobStore) -> Result<Option<Snapshot>> {
    let raw = match blobs.read(config::SNAPSHOT_KEY)? {
        Some(raw) => raw,
        None => return Ok(None),
    };

    if raw.len() < 8 || &raw[raw.len() - 8..raw.len() - 4] != SNAPSHOT_CRC_MAGIC {
        return Err(Error::Corrupt("snapshot missing CRC footer".into()));
    }
    let payload = &raw[..raw.len() - 8];
    let stored_crc = u32::from_be_bytes([
        raw[raw.len() - 4],
        raw[raw.len() - 3],
        raw[raw.len() - 2],
        raw[raw.len() - 1],
    ]);
    let computed_crc = crc32fast::hash(payload);
    if computed_crc != stored_crc {
        return Err(Error::Corrupt(format!(
            "snapshot CRC32 mismatch: stored {stored_crc:#010x}, computed {computed_crc:#010x}"
        )));
    }

    let snapshot: Snapshot = bincode::deserialize(payload)?;
    if snapshot.header.format_version != SNAPSHOT_FORMAT_VERSION {
        return Err(Error::Corrupt(format!(
            "unsupported snapshot format version {}",
            snapshot.header.format_version
        )));
    }
    validate(&snapshot)?;

    tracing::info!(
        "loaded snapshot: {} nodes ({} tombstoned)",
        snapshot.graph.node_count(),
        snapshot.graph.tombstone_count()
    );
    Ok(Some(snapshot))
}

/// Structural validation beyond the checksum. A failure here means the
/// topology cannot be trusted: surfaced as `InternalInconsistency`, which
/// flags the index for rebuild — never silently repaired.
fn validate(snapshot: &Snapshot) -> Result<()> {
    let nc = snapshot.graph.node_count();

    snapshot
        .graph
        .validate()
        .map_err(Error::InternalInconsistency)?;

    if snapshot.internal_to_id.len() != nc {
        return Err(Error::InternalInconsistency(format!(
            "vector table length {} != node count {nc}",
            snapshot.internal_to_id.len()
        )));
    }

    match &snapshot.codebook {
        Some(cb) => {
            if cb.generation != snapshot.header.codebook_generation {
                return Err(Error::InternalInconsistency(format!(
                    "codebook generation {} != header generation {}",
                    cb.generation, snapshot.header.codebook_generation
                )));
            }
            let expected = nc * cb.code_len();
            if snapshot.codes.len() != expected {
                return Err(Error::InternalInconsistency(format!(
                    "code arena length {} != node_count({nc}) * code_len({})",
                    snapshot.codes.len(),
                    cb.code_len()
                )));
            }
        }
        None => {
            if !snapshot.codes.is_empty() {
                return Err(Error::InternalInconsistency(
                    "code arena present without a codebook".into(),
                ));
            }
        }
    }

    Ok(())
}

/// Build a snapshot header for the current index shape.
pub fn header(
    dimension: usize,
    metric: DistanceMetric,
    quantizer: QuantizerConfig,
    codebook_generation: u64,
) -> SnapshotHeader {
    SnapshotHeader {
        format_version: SNAPSHOT_FORMAT_VERSION,
        dimension,
        metric,
        quantizer,
        codebook_generation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphConfig;
    use crate::store::MemoryBlobStore;

    fn tiny_snapshot() -> Snapshot {
        let mut graph = ProximityGraph::new(GraphConfig::default());
        graph.neighbors.push(vec![vec![1]]);
        graph.layers.push(0);
        graph.deleted.push(false);
        graph.neighbors.push(vec![vec![0]]);
        graph.layers.push(0);
        graph.deleted.push(false);
        graph.entry_point = Some(0);

        Snapshot {
            header: header(4, DistanceMetric::Euclidean, QuantizerConfig::None, 0),
            graph,
            codebook: None,
            codes: Vec::new(),
            internal_to_id: vec![10, 20],
        }
    }

    #[test]
    fn test_save_load_roundtrip() {
        let blobs = MemoryBlobStore::new();
        save(&tiny_snapshot(), &blobs).unwrap();
        let loaded = load(&blobs).unwrap().unwrap();
        assert_eq!(loaded.internal_to_id, vec![10, 20]);
        assert_eq!(loaded.graph.node_count(), 2);
        assert_eq!(loaded.header.dimension, 4);
    }

    #[test]
    fn test_load_missing_returns_none() {
        let blobs = MemoryBlobStore::new();
        assert!(load(&blobs).unwrap().is_none());
    }

    #[test]
    fn test_corrupted_payload_is_detected() {
        let blobs = MemoryBlobStore::new();
        save(&tiny_snapshot(), &blobs).unwrap();

        let mut raw = blobs.read(config::SNAPSHOT_KEY).unwrap().unwrap();
        raw[3] ^= 0xFF;
        blobs.write(config::SNAPSHOT_KEY, &raw).unwrap();

        let err = load(&blobs).unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)), "got {err:?}");
    }

    #[test]
    fn test_structurally_invalid_snapshot_is_rejected() {
        let blobs = MemoryBlobStore::new();
        let mut snap = tiny_snapshot();
        snap.internal_to_id.pop(); // vector table no longer parallel
        save(&snap, &blobs).unwrap();

        let err = load(&blobs).unwrap_err();
        assert!(matches!(err, Error::InternalInconsistency(_)), "got {err:?}");
    }
}
