//! The vector index: administrative surface and engine wiring.
//!
//! [`VectorIndex`] composes the vector store, quantizer, and proximity
//! graph behind a single handle. All state lives in an [`IndexData`] guarded
//! by a `RwLock`: searches run concurrently under the read lock against a
//! consistent view, while writers (insert/delete/retrain/compact) serialize
//! under the write lock — a node becomes visible to readers only with all
//! of its edges installed.
//!
//! An `InternalInconsistency` (broken entry point, dangling reference,
//! missing record) flips the index into read-only mode: searches keep
//! working where possible, mutations fail, and the index is flagged for
//! rebuild. Nothing is auto-repaired, since that could mask data loss.

use crate::config;
use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use crate::graph::{self, GraphConfig, ProximityGraph, VisitedSet};
use crate::persist::{snapshot, Snapshot, WalEntry, WriteAheadLog};
use crate::quantization::{CodeScorer, Codebook, QuantizerConfig};
use crate::query::{self, SearchParams, SearchResult};
use crate::record::{MetadataValue, VectorRecord};
use crate::store::{BlobStore, FileBlobStore, MemoryBlobStore, VectorStore};
use crate::VectorId;
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Per-index settings, fixed at creation and recorded in the snapshot
/// header. Dimensionality never changes after creation; changing it means a
/// full reindex.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct IndexConfig {
    pub dimension: usize,
    pub metric: DistanceMetric,
    pub quantizer: QuantizerConfig,
    pub graph: GraphConfig,
    /// Seed for level draws and k-means initialization; a fixed seed and
    /// insertion order reproduce the topology exactly.
    pub seed: u64,
}

impl IndexConfig {
    pub fn new(dimension: usize, metric: DistanceMetric) -> Self {
        Self {
            dimension,
            metric,
            quantizer: QuantizerConfig::None,
            graph: GraphConfig::default(),
            seed: config::DEFAULT_RNG_SEED,
        }
    }

    pub fn with_quantizer(mut self, quantizer: QuantizerConfig) -> Self {
        self.quantizer = quantizer;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.dimension == 0 || self.dimension > config::MAX_DIMENSION {
            return Err(Error::InvalidConfig(format!(
                "dimension must be in 1..={}, got {}",
                config::MAX_DIMENSION,
                self.dimension
            )));
        }
        if self.graph.m < 2 {
            return Err(Error::InvalidConfig(format!(
                "graph M must be at least 2, got {}",
                self.graph.m
            )));
        }
        if self.graph.ef_construction == 0 || self.graph.max_layers == 0 {
            return Err(Error::InvalidConfig(
                "ef_construction and max_layers must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Point-in-time index statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexStats {
    /// Live (searchable) vectors.
    pub node_count: usize,
    /// Tombstoned vectors awaiting compaction.
    pub tombstone_count: usize,
    /// Mean layer-0 out-degree over all nodes.
    pub avg_degree: f32,
    /// Live nodes per top layer; `histogram[l]` counts nodes whose top
    /// layer is `l`.
    pub layer_histogram: Vec<usize>,
    /// Whether the tombstone ratio has crossed the compaction threshold.
    pub needs_compaction: bool,
}

/// All mutable index state, guarded by the handle's `RwLock`.
pub(crate) struct IndexData {
    pub(crate) config: IndexConfig,
    pub(crate) store: VectorStore,
    pub(crate) graph: ProximityGraph,
    /// Current codebook generation; `None` until trained.
    pub(crate) codebook: Option<Arc<Codebook>>,
    /// Code arena parallel to the node table, `code_len` bytes per node.
    pub(crate) codes: Vec<u8>,
    pub(crate) id_to_internal: HashMap<VectorId, u32>,
    pub(crate) internal_to_id: Vec<VectorId>,
    rng: StdRng,
    visited: VisitedSet,
    wal: Option<WriteAheadLog>,
    blobs: Arc<dyn BlobStore>,
}

/// Look up a node's full-precision vector through the store.
///
/// Records and graph nodes are only ever updated together under the write
/// lock, so a live node without a record is an internal bug, not a state a
/// caller can produce.
fn stored_vector<'a>(store: &'a VectorStore, internal_to_id: &[VectorId], node: u32) -> &'a [f32] {
    let id = internal_to_id[node as usize];
    &store
        .get(id)
        .expect("graph node has a stored record")
        .vector
}

/// Distance oracle over full-precision vectors.
pub(crate) struct ExactOracle<'a> {
    metric: DistanceMetric,
    store: &'a VectorStore,
    internal_to_id: &'a [VectorId],
    query: &'a [f32],
}

impl<'a> ExactOracle<'a> {
    pub(crate) fn new(data: &'a IndexData, query: &'a [f32]) -> Self {
        Self {
            metric: data.config.metric,
            store: &data.store,
            internal_to_id: &data.internal_to_id,
            query,
        }
    }
}

impl graph::DistanceOracle for ExactOracle<'_> {
    fn to_query(&self, node: u32) -> f32 {
        self.metric
            .distance(self.query, stored_vector(self.store, self.internal_to_id, node))
    }

    fn between(&self, a: u32, b: u32) -> f32 {
        self.metric.distance(
            stored_vector(self.store, self.internal_to_id, a),
            stored_vector(self.store, self.internal_to_id, b),
        )
    }
}

/// Distance oracle over quantized codes: query-to-node distances go through
/// the per-query scorer (ADC table or asymmetric scalar kernels);
/// node-to-node distances fall back to exact vectors, since they are only
/// consulted off the hot path (pruning and repair).
pub(crate) struct QuantizedOracle<'a> {
    scorer: CodeScorer<'a>,
    codes: &'a [u8],
    code_len: usize,
    exact: ExactOracle<'a>,
}

impl<'a> QuantizedOracle<'a> {
    pub(crate) fn new(data: &'a IndexData, codebook: &'a Codebook, query: &'a [f32]) -> Self {
        Self {
            scorer: codebook.scorer(data.config.metric, query),
            codes: &data.codes,
            code_len: codebook.code_len(),
            exact: ExactOracle::new(data, query),
        }
    }
}

impl graph::DistanceOracle for QuantizedOracle<'_> {
    fn to_query(&self, node: u32) -> f32 {
        let start = node as usize * self.code_len;
        self.scorer.score(&self.codes[start..start + self.code_len])
    }

    fn between(&self, a: u32, b: u32) -> f32 {
        self.exact.between(a, b)
    }
}

impl IndexData {
    fn new(config: IndexConfig, blobs: Arc<dyn BlobStore>, wal: Option<WriteAheadLog>) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            graph: ProximityGraph::new(config.graph.clone()),
            store: VectorStore::new(Arc::clone(&blobs)),
            codebook: None,
            codes: Vec::new(),
            id_to_internal: HashMap::new(),
            internal_to_id: Vec::new(),
            rng,
            visited: VisitedSet::default(),
            wal,
            blobs,
            config,
        }
    }

    fn check_insert(&self, id: VectorId, vector: &[f32], overwrite: bool) -> Result<()> {
        if vector.len() != self.config.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.config.dimension,
                actual: vector.len(),
            });
        }
        if !overwrite && self.id_to_internal.contains_key(&id) {
            return Err(Error::DuplicateId(id));
        }
        Ok(())
    }

    /// Insert a vector: persist the record, encode its code, link it into
    /// the graph, and publish the id mappings. Overwrite is
    /// delete-then-insert; there is no partial update.
    fn apply_insert(
        &mut self,
        id: VectorId,
        vector: Vec<f32>,
        metadata: HashMap<String, MetadataValue>,
        overwrite: bool,
    ) -> Result<()> {
        self.check_insert(id, &vector, overwrite)?;
        if let Some(&existing) = self.id_to_internal.get(&id) {
            self.graph.mark_deleted(existing);
            self.id_to_internal.remove(&id);
        }

        let code = self.codebook.as_ref().map(|cb| cb.encode(&vector));
        let oracle_query = vector.clone();
        self.store
            .put(id, VectorRecord::with_metadata(vector, metadata))?;

        let oracle = ExactOracle {
            metric: self.config.metric,
            store: &self.store,
            internal_to_id: &self.internal_to_id,
            query: &oracle_query,
        };
        let internal =
            graph::insert::insert(&mut self.graph, &oracle, &mut self.rng, &mut self.visited)?;

        if let Some(code) = code {
            self.codes.extend_from_slice(&code);
        }
        self.internal_to_id.push(id);
        self.id_to_internal.insert(id, internal);
        debug_assert_eq!(self.internal_to_id.len(), self.graph.node_count());
        Ok(())
    }

    /// Tombstone a vector. O(1): edges stay intact for traversal stability,
    /// and the record stays in the store until compaction so the node can
    /// still serve as a waypoint.
    fn apply_delete(&mut self, id: VectorId) -> Result<()> {
        let internal = *self.id_to_internal.get(&id).ok_or(Error::NotFound(id))?;
        self.graph.mark_deleted(internal);
        self.id_to_internal.remove(&id);
        Ok(())
    }

    fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            header: snapshot::header(
                self.config.dimension,
                self.config.metric,
                self.config.quantizer,
                self.codebook.as_ref().map_or(0, |cb| cb.generation),
            ),
            graph: self.graph.clone(),
            codebook: self.codebook.as_deref().cloned(),
            codes: self.codes.clone(),
            internal_to_id: self.internal_to_id.clone(),
        }
    }

    /// Snapshot to the blob store and truncate the WAL under its gate.
    fn persist(&self) -> Result<()> {
        let snap = self.to_snapshot();
        match &self.wal {
            Some(wal) => {
                let _gate = wal.freeze();
                snapshot::save(&snap, self.blobs.as_ref())?;
                wal.truncate()
            }
            None => snapshot::save(&snap, self.blobs.as_ref()),
        }
    }
}

/// A thread-safe handle to a vector index. Cloning produces another handle
/// to the same shared state.
#[derive(Clone)]
pub struct VectorIndex {
    data: Arc<RwLock<IndexData>>,
    read_only: Arc<AtomicBool>,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("read_only", &self.read_only.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl VectorIndex {
    /// Create a fresh index over the given blob store, without a WAL.
    /// Use [`open`](VectorIndex::open) for crash-recoverable indexes.
    pub fn create(config: IndexConfig, blobs: Arc<dyn BlobStore>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            data: Arc::new(RwLock::new(IndexData::new(config, blobs, None))),
            read_only: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Create an ephemeral in-memory index. Convenient for tests and
    /// short-lived workloads.
    pub fn in_memory(config: IndexConfig) -> Result<Self> {
        Self::create(config, Arc::new(MemoryBlobStore::new()))
    }

    /// Open (or create) a durable index: blob store and WAL under
    /// `data_dir`. Loads the snapshot if one exists, replays the WAL on
    /// top, and removes orphaned vector records left by an interrupted
    /// compaction.
    pub fn open_dir<P: AsRef<Path>>(config: IndexConfig, data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        let blobs: Arc<dyn BlobStore> = Arc::new(FileBlobStore::new(data_dir.join("blobs"))?);
        Self::open(config, blobs, data_dir)
    }

    /// Open (or create) a durable index over an explicit blob store, with
    /// the WAL in `data_dir`.
    pub fn open(
        config: IndexConfig,
        blobs: Arc<dyn BlobStore>,
        data_dir: &Path,
    ) -> Result<Self> {
        config.validate()?;
        let wal = WriteAheadLog::open(data_dir)?;
        let mut data = IndexData::new(config, Arc::clone(&blobs), Some(wal));

        if let Some(snap) = snapshot::load(blobs.as_ref())? {
            if snap.header.dimension != data.config.dimension
                || snap.header.metric != data.config.metric
                || snap.header.quantizer != data.config.quantizer
            {
                return Err(Error::InvalidConfig(format!(
                    "persisted index shape (dim {}, {:?}) does not match requested (dim {}, {:?})",
                    snap.header.dimension,
                    snap.header.metric,
                    data.config.dimension,
                    data.config.metric,
                )));
            }
            data.graph = snap.graph;
            data.codebook = snap.codebook.map(Arc::new);
            data.codes = snap.codes;
            data.internal_to_id = snap.internal_to_id;
            for (node, &id) in data.internal_to_id.iter().enumerate() {
                if !data.graph.deleted[node] {
                    data.id_to_internal.insert(id, node as u32);
                }
            }
        }

        data.store.load_all()?;

        // Every live node must have a record of the right shape.
        for (node, &id) in data.internal_to_id.iter().enumerate() {
            if data.graph.deleted[node] {
                continue;
            }
            match data.store.get(id) {
                Some(rec) if rec.vector.len() == data.config.dimension => {}
                Some(rec) => {
                    return Err(Error::InternalInconsistency(format!(
                        "record {id} has dimension {}, index expects {}",
                        rec.vector.len(),
                        data.config.dimension
                    )))
                }
                None => {
                    return Err(Error::InternalInconsistency(format!(
                        "live node {node} (id {id}) has no stored record"
                    )))
                }
            }
        }

        // Replay mutations logged after the snapshot.
        let (entries, stats) = data
            .wal
            .as_ref()
            .expect("WAL opened above")
            .replay()?;
        for entry in entries {
            match entry {
                WalEntry::Insert {
                    id,
                    vector,
                    metadata,
                } => {
                    if let Err(e) = data.apply_insert(id, vector, metadata, true) {
                        tracing::warn!("skipping unreplayable WAL insert for {id}: {e}");
                    }
                }
                WalEntry::Delete { id } => match data.apply_delete(id) {
                    Ok(()) | Err(Error::NotFound(_)) => {}
                    Err(e) => return Err(e),
                },
            }
        }
        if stats.applied > 0 || stats.truncated || stats.crc_errors > 0 {
            tracing::info!(
                "WAL replay: {} applied, {} skipped, {} CRC errors",
                stats.applied,
                stats.skipped,
                stats.crc_errors
            );
        }

        // Drop records no graph node references (interrupted compaction).
        let referenced: std::collections::HashSet<VectorId> =
            data.internal_to_id.iter().copied().collect();
        let orphans: Vec<VectorId> = data
            .store
            .iter()
            .map(|(id, _)| id)
            .filter(|id| !referenced.contains(id))
            .collect();
        for id in orphans {
            if let Err(e) = data.store.remove(id) {
                tracing::warn!("failed to remove orphaned record {id}: {e}");
            }
        }

        Ok(Self {
            data: Arc::new(RwLock::new(data)),
            read_only: Arc::new(AtomicBool::new(false)),
        })
    }

    fn guard_writable(&self) -> Result<()> {
        if self.read_only.load(Ordering::Acquire) {
            return Err(Error::ReadOnly);
        }
        Ok(())
    }

    fn poison(&self) {
        if !self.read_only.swap(true, Ordering::AcqRel) {
            tracing::error!("internal inconsistency detected; index is now read-only and flagged for rebuild");
        }
    }

    /// Insert a vector under a caller-assigned id. Fails with
    /// `DuplicateId` if the id is live and `DimensionMismatch` on
    /// wrong-length input; either way the graph is left unchanged.
    pub fn insert(&self, id: VectorId, vector: Vec<f32>) -> Result<()> {
        self.do_insert(id, vector, HashMap::new(), false)
    }

    /// Insert with metadata for post-filtered search.
    pub fn insert_with_metadata(
        &self,
        id: VectorId,
        vector: Vec<f32>,
        metadata: HashMap<String, MetadataValue>,
    ) -> Result<()> {
        self.do_insert(id, vector, metadata, false)
    }

    /// Insert, replacing any live vector under the same id
    /// (delete-then-insert semantics).
    pub fn insert_overwrite(
        &self,
        id: VectorId,
        vector: Vec<f32>,
        metadata: HashMap<String, MetadataValue>,
    ) -> Result<()> {
        self.do_insert(id, vector, metadata, true)
    }

    fn do_insert(
        &self,
        id: VectorId,
        vector: Vec<f32>,
        metadata: HashMap<String, MetadataValue>,
        overwrite: bool,
    ) -> Result<()> {
        self.guard_writable()?;
        let mut data = self.data.write();
        data.check_insert(id, &vector, overwrite)?;
        if let Some(wal) = &data.wal {
            wal.append(&WalEntry::Insert {
                id,
                vector: vector.clone(),
                metadata: metadata.clone(),
            })?;
        }
        data.apply_insert(id, vector, metadata, overwrite)
    }

    /// Tombstone a vector. Returns `NotFound` if the id is not live.
    pub fn delete(&self, id: VectorId) -> Result<()> {
        self.guard_writable()?;
        let mut data = self.data.write();
        if !data.id_to_internal.contains_key(&id) {
            return Err(Error::NotFound(id));
        }
        if let Some(wal) = &data.wal {
            wal.append(&WalEntry::Delete { id })?;
        }
        data.apply_delete(id)
    }

    /// Approximate nearest-neighbor search: up to `k` live vectors,
    /// ascending by exact distance. Searching an empty index returns an
    /// empty result, not an error.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        params: &SearchParams<'_>,
    ) -> Result<SearchResult> {
        let data = self.data.read();
        let result = query::execute_search(&data, query, k, params);
        drop(data);
        if let Err(Error::InternalInconsistency(_)) = &result {
            self.poison();
        }
        result
    }

    /// Fetch a stored record by id. `None` for missing or tombstoned ids.
    pub fn get(&self, id: VectorId) -> Option<VectorRecord> {
        let data = self.data.read();
        if !data.id_to_internal.contains_key(&id) {
            return None;
        }
        data.store.get(id).cloned()
    }

    /// Whether a live vector exists under this id.
    pub fn contains(&self, id: VectorId) -> bool {
        self.data.read().id_to_internal.contains_key(&id)
    }

    /// Number of live vectors.
    pub fn len(&self) -> usize {
        self.data.read().graph.live_count()
    }

    /// Whether the index holds no live vectors.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Train a new codebook generation over `sample` and re-encode every
    /// stored vector under it. Training itself runs outside the write lock
    /// (it is a pure function of the sample); only the swap + re-encode
    /// serialize with other writers. Returns the new generation.
    pub fn train_quantizer(&self, sample: &[Vec<f32>]) -> Result<u64> {
        self.guard_writable()?;
        let (quantizer_cfg, dim, seed, seen_generation) = {
            let data = self.data.read();
            (
                data.config.quantizer,
                data.config.dimension,
                data.config.seed,
                data.codebook.as_ref().map_or(0, |cb| cb.generation),
            )
        };
        for v in sample {
            if v.len() != dim {
                return Err(Error::DimensionMismatch {
                    expected: dim,
                    actual: v.len(),
                });
            }
        }

        let mut rng = StdRng::seed_from_u64(seed.wrapping_add(seen_generation + 1));
        let kind = quantizer_cfg.train(sample, dim, &mut rng)?;

        let mut data = self.data.write();
        let generation = data.codebook.as_ref().map_or(0, |cb| cb.generation) + 1;
        let codebook = Codebook { generation, kind };

        let mut codes = Vec::with_capacity(data.graph.node_count() * codebook.code_len());
        for node in 0..data.graph.node_count() as u32 {
            let v = stored_vector(&data.store, &data.internal_to_id, node);
            codes.extend_from_slice(&codebook.encode(v));
        }
        data.codes = codes;
        data.codebook = Some(Arc::new(codebook));
        tracing::info!(
            "installed codebook generation {generation}, re-encoded {} vectors",
            data.graph.node_count()
        );
        Ok(generation)
    }

    /// Purge tombstoned nodes, repair edges that pointed at them, reclaim
    /// their records, and rewrite the snapshot. Returns the number of
    /// purged nodes.
    pub fn compact(&self) -> Result<usize> {
        self.guard_writable()?;
        let mut guard = self.data.write();
        // Reborrow so field borrows can be split across the guard.
        let data = &mut *guard;
        if data.graph.tombstone_count() == 0 {
            return Ok(0);
        }

        // Ids whose record should be reclaimed: purged nodes whose id was
        // not re-inserted under a new node.
        let reclaim: Vec<VectorId> = (0..data.graph.node_count())
            .filter(|&n| data.graph.deleted[n])
            .map(|n| data.internal_to_id[n])
            .filter(|id| !data.id_to_internal.contains_key(id))
            .collect();

        let outcome = {
            let metric = data.config.metric;
            let store = &data.store;
            let internal_to_id = &data.internal_to_id;
            graph::compact::compact(&mut data.graph, |a, b| {
                metric.distance(
                    stored_vector(store, internal_to_id, a),
                    stored_vector(store, internal_to_id, b),
                )
            })
        };

        // Remap the parallel tables to the surviving dense ids.
        let code_len = data.codebook.as_ref().map_or(0, |cb| cb.code_len());
        let mut new_internal_to_id = Vec::with_capacity(data.graph.node_count());
        let mut new_codes = Vec::with_capacity(data.graph.node_count() * code_len);
        for (old, mapping) in outcome.remap.iter().enumerate() {
            if mapping.is_some() {
                new_internal_to_id.push(data.internal_to_id[old]);
                if code_len > 0 {
                    new_codes.extend_from_slice(&data.codes[old * code_len..(old + 1) * code_len]);
                }
            }
        }
        data.internal_to_id = new_internal_to_id;
        data.codes = new_codes;
        for internal in data.id_to_internal.values_mut() {
            *internal = outcome.remap[*internal as usize]
                .expect("live nodes survive compaction");
        }

        if let Err(e) = data.graph.validate() {
            self.poison();
            return Err(Error::InternalInconsistency(format!(
                "post-compaction validation failed: {e}"
            )));
        }

        // Durable image first; record reclamation after. A crash in between
        // leaves orphaned records, which `open` sweeps.
        data.persist()?;
        for id in reclaim {
            if let Err(e) = data.store.remove(id) {
                tracing::warn!("failed to reclaim record {id}: {e}");
            }
        }

        Ok(outcome.purged)
    }

    /// Write a snapshot and truncate the WAL.
    pub fn flush(&self) -> Result<()> {
        let data = self.data.write();
        data.persist()
    }

    /// Decode a stored vector's quantized code back to an approximate
    /// vector. Diagnostics only; `None` without a codebook or for a
    /// missing id.
    pub fn decode_stored(&self, id: VectorId) -> Option<Vec<f32>> {
        let data = self.data.read();
        let codebook = data.codebook.as_ref()?;
        let &internal = data.id_to_internal.get(&id)?;
        let len = codebook.code_len();
        let start = internal as usize * len;
        Some(codebook.decode(&data.codes[start..start + len]))
    }

    /// Current codebook generation; 0 until a quantizer is trained.
    pub fn codebook_generation(&self) -> u64 {
        self.data
            .read()
            .codebook
            .as_ref()
            .map_or(0, |cb| cb.generation)
    }

    /// Whether the index was flagged read-only by an internal
    /// inconsistency.
    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }

    /// Point-in-time statistics.
    pub fn stats(&self) -> IndexStats {
        let data = self.data.read();
        let total = data.graph.node_count();
        let tombstones = data.graph.tombstone_count();
        IndexStats {
            node_count: total - tombstones,
            tombstone_count: tombstones,
            avg_degree: data.graph.avg_degree(),
            layer_histogram: data.graph.layer_histogram(),
            needs_compaction: total > 0
                && tombstones as f32 / total as f32 > config::COMPACTION_THRESHOLD,
        }
    }
}
