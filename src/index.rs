use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use ordered_float::OrderedFloat;
use serde::Deserialize;
use tracing::{debug, info};

use crate::model::{
    IndexFile, IndexRecord, Metadata, NewRecord, SearchHit, DEFAULT_NAMESPACE, INDEX_VERSION,
};
use crate::storage;
use crate::vector::{self, VectorDefect};

pub const DEFAULT_TOP_K: usize = 10;

pub type IndexResult<T> = Result<T, IndexError>;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("dimension mismatch: index holds {expected}-d vectors, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid vector: {0}")]
    InvalidVector(VectorDefect),

    #[error("unsupported index file version {found} (this build reads {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("corrupt index file {}: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("failed to read index file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to persist index to {}: {source}", .path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("index serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Insert + nearest-neighbor capability, so a smarter structure can replace
/// the flat scan without touching retrieval callers.
pub trait VectorStore: Send + Sync {
    fn insert_batch(&self, records: Vec<NewRecord>) -> IndexResult<Vec<u64>>;

    fn search(
        &self,
        query: &[f32],
        namespace: Option<&str>,
        top_k: usize,
    ) -> IndexResult<Vec<SearchHit>>;

    fn dimension(&self) -> Option<usize>;
}

#[derive(Debug, Clone)]
struct Snapshot {
    file: IndexFile,
    dimension: Option<usize>,
}

impl Snapshot {
    fn empty(dimension: Option<usize>) -> Self {
        Self {
            file: IndexFile::default(),
            dimension,
        }
    }
}

/// Flat, namespace-partitioned embeddings index backed by one JSON file.
///
/// Readers grab the current `Arc<Snapshot>` and scan it without holding any
/// lock. Writers serialize on `writer`, build the next snapshot, persist it,
/// and only then publish it, so memory never runs ahead of disk.
pub struct VectorIndex {
    path: PathBuf,
    configured_dimension: Option<usize>,
    state: RwLock<Arc<Snapshot>>,
    writer: Mutex<()>,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("VectorIndex")
            .field("path", &self.path)
            .field("records", &snapshot.file.items.len())
            .field("dimension", &snapshot.dimension)
            .finish()
    }
}

impl VectorIndex {
    /// Open the index stored at `path`. A missing file yields an empty index.
    ///
    /// `dimension` pins the dimensionality up front; otherwise the first
    /// stored (or inserted) vector decides it.
    pub fn load(path: impl Into<PathBuf>, dimension: Option<usize>) -> IndexResult<Self> {
        let path = path.into();
        let snapshot = read_snapshot(&path, dimension)?;
        info!(
            path = %path.display(),
            records = snapshot.file.items.len(),
            dimension = ?snapshot.dimension,
            "vector index loaded"
        );
        Ok(Self {
            path,
            configured_dimension: dimension,
            state: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(()),
        })
    }

    /// Re-read the backing file, replacing the in-memory state.
    pub fn reload(&self) -> IndexResult<()> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let snapshot = read_snapshot(&self.path, self.configured_dimension)?;
        self.publish(snapshot);
        Ok(())
    }

    /// Write the current state to disk atomically.
    pub fn persist(&self) -> IndexResult<()> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let snapshot = self.snapshot();
        self.write_file(&snapshot.file)
    }

    pub fn insert(
        &self,
        text: impl Into<String>,
        vector: Vec<f32>,
        namespace: Option<&str>,
        metadata: Metadata,
    ) -> IndexResult<u64> {
        let record = NewRecord {
            text: text.into(),
            vector,
            namespace: namespace.unwrap_or(DEFAULT_NAMESPACE).to_string(),
            metadata,
        };
        let ids = self.commit(vec![record])?;
        ids.into_iter().next().ok_or_else(|| IndexError::Corrupt {
            path: self.path.clone(),
            reason: "insert produced no id".to_string(),
        })
    }

    /// All-or-nothing: one bad record rejects the whole batch and nothing is
    /// written.
    pub fn insert_batch(&self, records: Vec<NewRecord>) -> IndexResult<Vec<u64>> {
        self.commit(records)
    }

    /// Top `top_k` records by cosine similarity, best first, ties broken by
    /// ascending id. `namespace = None` searches every namespace.
    pub fn search(
        &self,
        query: &[f32],
        namespace: Option<&str>,
        top_k: usize,
    ) -> IndexResult<Vec<SearchHit>> {
        vector::validate(query).map_err(IndexError::InvalidVector)?;
        let snapshot = self.snapshot();

        match snapshot.dimension {
            Some(expected) if expected != query.len() => {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    actual: query.len(),
                })
            }
            Some(_) => {}
            None => return Ok(Vec::new()),
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        // top_k comes straight from callers; never size the heap past the data.
        let capacity = top_k.min(snapshot.file.items.len()).saturating_add(1);
        let mut best: BinaryHeap<Reverse<Candidate>> = BinaryHeap::with_capacity(capacity);
        let candidates = snapshot
            .file
            .items
            .iter()
            .enumerate()
            .filter(|(_, r)| namespace.map_or(true, |ns| r.namespace == ns));

        for (pos, record) in candidates {
            let candidate = Candidate {
                score: OrderedFloat(vector::cosine_similarity(query, &record.vector)),
                id: record.id,
                pos,
            };
            if best.len() < top_k {
                best.push(Reverse(candidate));
            } else if let Some(Reverse(worst)) = best.peek() {
                if candidate > *worst {
                    best.pop();
                    best.push(Reverse(candidate));
                }
            }
        }

        // Ascending order of Reverse<_> is descending order of Candidate.
        let hits = best
            .into_sorted_vec()
            .into_iter()
            .map(|Reverse(c)| {
                let record = &snapshot.file.items[c.pos];
                SearchHit {
                    id: record.id,
                    text: record.text.clone(),
                    score: c.score.into_inner(),
                    namespace: record.namespace.clone(),
                    metadata: record.metadata.clone(),
                }
            })
            .collect();
        Ok(hits)
    }

    /// Whole-index rebuild: drops every record. `next_id` survives so ids are
    /// never handed out twice.
    pub fn clear(&self) -> IndexResult<()> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.snapshot();
        let mut next = Snapshot::empty(self.configured_dimension);
        next.file.next_id = current.file.next_id;
        self.write_file(&next.file)?;
        self.publish(next);
        info!(path = %self.path.display(), "vector index cleared");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.snapshot().file.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimension(&self) -> Option<usize> {
        self.snapshot().dimension
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record count per namespace.
    pub fn namespaces(&self) -> BTreeMap<String, usize> {
        let snapshot = self.snapshot();
        let mut counts = BTreeMap::new();
        for record in &snapshot.file.items {
            *counts.entry(record.namespace.clone()).or_insert(0) += 1;
        }
        counts
    }

    fn commit(&self, records: Vec<NewRecord>) -> IndexResult<Vec<u64>> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.snapshot();

        // 1. Validate everything before touching state
        let mut dimension = current.dimension;
        for record in &records {
            vector::validate(&record.vector).map_err(IndexError::InvalidVector)?;
            match dimension {
                Some(expected) if expected != record.vector.len() => {
                    return Err(IndexError::DimensionMismatch {
                        expected,
                        actual: record.vector.len(),
                    })
                }
                Some(_) => {}
                None => dimension = Some(record.vector.len()),
            }
        }
        if records.is_empty() {
            return Ok(Vec::new());
        }

        // 2. Build the next snapshot off to the side
        let mut next = (*current).clone();
        next.dimension = dimension;
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            let id = next.file.next_id;
            next.file.next_id += 1;
            let namespace = if record.namespace.is_empty() {
                DEFAULT_NAMESPACE.to_string()
            } else {
                record.namespace
            };
            next.file.items.push(IndexRecord {
                id,
                text: record.text,
                vector: record.vector,
                namespace,
                metadata: record.metadata,
            });
            ids.push(id);
        }

        // 3. Disk first, then publish
        self.write_file(&next.file)?;
        self.publish(next);

        debug!(path = %self.path.display(), inserted = ids.len(), "records committed");
        Ok(ids)
    }

    fn write_file(&self, file: &IndexFile) -> IndexResult<()> {
        let bytes = serde_json::to_vec_pretty(file)?;
        storage::write_atomic(&self.path, &bytes).map_err(|source| IndexError::Persistence {
            path: self.path.clone(),
            source,
        })
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, snapshot: Snapshot) {
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(snapshot);
    }
}

impl VectorStore for VectorIndex {
    fn insert_batch(&self, records: Vec<NewRecord>) -> IndexResult<Vec<u64>> {
        VectorIndex::insert_batch(self, records)
    }

    fn search(
        &self,
        query: &[f32],
        namespace: Option<&str>,
        top_k: usize,
    ) -> IndexResult<Vec<SearchHit>> {
        VectorIndex::search(self, query, namespace, top_k)
    }

    fn dimension(&self) -> Option<usize> {
        VectorIndex::dimension(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Candidate {
    score: OrderedFloat<f32>,
    id: u64,
    pos: usize,
}

// Greater means better: higher score, then lower id.
impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .cmp(&other.score)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Deserialize)]
struct VersionHeader {
    version: u32,
}

fn read_snapshot(path: &Path, configured: Option<usize>) -> IndexResult<Snapshot> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no index file yet, starting empty");
            return Ok(Snapshot::empty(configured));
        }
        Err(source) => {
            return Err(IndexError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let corrupt = |reason: String| IndexError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };

    // Check the version before the full schema so a future format is
    // reported as such rather than as garbage.
    let header: VersionHeader = serde_json::from_slice(&bytes).map_err(|e| corrupt(e.to_string()))?;
    if header.version != INDEX_VERSION {
        return Err(IndexError::UnsupportedVersion {
            found: header.version,
            expected: INDEX_VERSION,
        });
    }
    let file: IndexFile = serde_json::from_slice(&bytes).map_err(|e| corrupt(e.to_string()))?;

    let mut dimension = configured;
    let mut last_id: Option<u64> = None;
    for record in &file.items {
        if record.id >= file.next_id {
            return Err(corrupt(format!(
                "record {} is not below next_id {}",
                record.id, file.next_id
            )));
        }
        if last_id.map_or(false, |last| record.id <= last) {
            return Err(corrupt(format!("record {} is out of order or duplicated", record.id)));
        }
        last_id = Some(record.id);

        vector::validate(&record.vector)
            .map_err(|defect| corrupt(format!("record {}: {}", record.id, defect)))?;
        match dimension {
            Some(expected) if expected != record.vector.len() => {
                if configured == Some(expected) {
                    return Err(IndexError::DimensionMismatch {
                        expected,
                        actual: record.vector.len(),
                    });
                }
                return Err(corrupt(format!(
                    "record {} has {} dimensions, expected {}",
                    record.id,
                    record.vector.len(),
                    expected
                )));
            }
            Some(_) => {}
            None => dimension = Some(record.vector.len()),
        }
    }

    Ok(Snapshot { file, dimension })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::thread;

    fn open(dir: &tempfile::TempDir) -> VectorIndex {
        VectorIndex::load(dir.path().join("index.json"), None).unwrap()
    }

    #[test]
    fn nearest_neighbor_in_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let index = open(&dir);
        index
            .insert("the sky is blue", vec![1.0, 0.0, 0.0], Some("ns1"), Metadata::new())
            .unwrap();
        index
            .insert("grass is green", vec![0.0, 1.0, 0.0], Some("ns1"), Metadata::new())
            .unwrap();

        let hits = index.search(&[1.0, 0.0, 0.0], Some("ns1"), 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "the sky is blue");
        assert_relative_eq!(hits[0].score, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn unknown_namespace_and_empty_index_return_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let index = open(&dir);
        assert!(index.search(&[1.0, 0.0], Some("nowhere"), 5).unwrap().is_empty());

        index.insert("a", vec![1.0, 0.0], Some("ns1"), Metadata::new()).unwrap();
        assert!(index.search(&[1.0, 0.0], Some("nowhere"), 5).unwrap().is_empty());
        assert!(index.search(&[1.0, 0.0], Some("ns1"), 0).unwrap().is_empty());
    }

    #[test]
    fn returns_every_record_ordered_with_id_tie_break() {
        let dir = tempfile::tempdir().unwrap();
        let index = open(&dir);
        let ids = index
            .insert_batch(vec![
                NewRecord::new("diag", vec![1.0, 1.0]).in_namespace("ns"),
                NewRecord::new("x-axis", vec![1.0, 0.0]).in_namespace("ns"),
                NewRecord::new("x-axis again", vec![2.0, 0.0]).in_namespace("ns"),
                NewRecord::new("y-axis", vec![0.0, 1.0]).in_namespace("ns"),
                NewRecord::new("elsewhere", vec![1.0, 0.0]).in_namespace("other"),
            ])
            .unwrap();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);

        let hits = index.search(&[1.0, 0.0], Some("ns"), 10).unwrap();
        let order: Vec<u64> = hits.iter().map(|h| h.id).collect();
        // Two exact matches tie at 1.0, lower id first.
        assert_eq!(order, vec![1, 2, 0, 3]);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));

        let everywhere = index.search(&[1.0, 0.0], None, 10).unwrap();
        assert_eq!(everywhere.len(), 5);
        assert_eq!(everywhere[2].id, 4);
    }

    #[test]
    fn oversized_top_k_returns_everything() {
        let dir = tempfile::tempdir().unwrap();
        let index = open(&dir);
        index.insert("a", vec![1.0, 0.0], None, Metadata::new()).unwrap();
        index.insert("b", vec![0.0, 1.0], None, Metadata::new()).unwrap();
        index.insert("c", vec![1.0, 1.0], None, Metadata::new()).unwrap();

        for top_k in [1usize << 40, usize::MAX] {
            let hits = index.search(&[1.0, 0.0], None, top_k).unwrap();
            let order: Vec<u64> = hits.iter().map(|h| h.id).collect();
            assert_eq!(order, vec![0, 2, 1]);
        }
    }

    #[test]
    fn first_insert_fixes_dimension() {
        let dir = tempfile::tempdir().unwrap();
        let index = open(&dir);
        index.insert("a", vec![1.0, 0.0, 0.0], None, Metadata::new()).unwrap();

        let err = index.insert("b", vec![1.0, 0.0], None, Metadata::new()).unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { expected: 3, actual: 2 }));

        let err = index.search(&[1.0], None, 3).unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { expected: 3, actual: 1 }));
    }

    #[test]
    fn configured_dimension_applies_before_first_insert() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::load(dir.path().join("index.json"), Some(4)).unwrap();
        let err = index.insert("a", vec![1.0, 0.0], None, Metadata::new()).unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { expected: 4, actual: 2 }));
    }

    #[test]
    fn rejects_malformed_vectors() {
        let dir = tempfile::tempdir().unwrap();
        let index = open(&dir);
        let err = index.insert("nan", vec![f32::NAN, 1.0], None, Metadata::new()).unwrap_err();
        assert!(matches!(err, IndexError::InvalidVector(_)));
        let err = index.insert("empty", vec![], None, Metadata::new()).unwrap_err();
        assert!(matches!(err, IndexError::InvalidVector(VectorDefect::Empty)));
        assert!(index.is_empty());
    }

    #[test]
    fn batch_is_all_or_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let index = VectorIndex::load(&path, None).unwrap();

        let err = index
            .insert_batch(vec![
                NewRecord::new("ok", vec![1.0, 0.0]),
                NewRecord::new("ok too", vec![0.0, 1.0]),
                NewRecord::new("bad", vec![0.0, 1.0, 2.0]),
            ])
            .unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { expected: 2, actual: 3 }));
        assert!(index.is_empty());
        assert_eq!(index.dimension(), None);
        assert!(!path.exists());

        let ids = index.insert_batch(vec![NewRecord::new("ok", vec![1.0, 0.0])]).unwrap();
        assert_eq!(ids, vec![0]);
    }

    #[test]
    fn reload_reconstructs_inserted_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let mut meta = Metadata::new();
        meta.insert("source".into(), serde_json::json!("notes.md"));

        let index = VectorIndex::load(&path, None).unwrap();
        index.insert("first", vec![0.5, 0.5], Some("ns"), Metadata::new()).unwrap();
        let id = index.insert("second", vec![0.25, -1.0], Some("ns"), meta.clone()).unwrap();
        drop(index);

        let reopened = VectorIndex::load(&path, None).unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.dimension(), Some(2));
        let hit = reopened
            .search(&[0.25, -1.0], Some("ns"), 1)
            .unwrap()
            .remove(0);
        assert_eq!(hit.id, id);
        assert_eq!(hit.text, "second");
        assert_eq!(hit.metadata, meta);

        let file: IndexFile = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(file.version, INDEX_VERSION);
        assert_eq!(file.next_id, 2);
        assert_eq!(file.items[1].vector, vec![0.25, -1.0]);

        // Ids keep climbing after a reload.
        let next = reopened.insert("third", vec![1.0, 1.0], None, Metadata::new()).unwrap();
        assert_eq!(next, 2);
    }

    #[test]
    fn rejects_unknown_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        fs::write(&path, r#"{"version": 99, "whatever": true}"#).unwrap();
        let err = VectorIndex::load(&path, None).unwrap_err();
        assert!(matches!(err, IndexError::UnsupportedVersion { found: 99, .. }));
    }

    #[test]
    fn rejects_ids_at_or_above_next_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        fs::write(
            &path,
            r#"{"version":1,"next_id":1,"items":[
                {"id":0,"text":"a","vector":[1.0],"namespace":"default","metadata":{}},
                {"id":1,"text":"b","vector":[1.0],"namespace":"default","metadata":{}}
            ]}"#,
        )
        .unwrap();
        let err = VectorIndex::load(&path, None).unwrap_err();
        assert!(matches!(err, IndexError::Corrupt { .. }));
    }

    #[test]
    fn concurrent_inserts_get_distinct_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let index = Arc::new(VectorIndex::load(&path, None).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let index = Arc::clone(&index);
                thread::spawn(move || {
                    (0..10)
                        .map(|i| {
                            index
                                .insert(
                                    format!("t{}-{}", t, i),
                                    vec![t as f32 + 1.0, i as f32],
                                    None,
                                    Metadata::new(),
                                )
                                .unwrap()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 80);

        let reopened = VectorIndex::load(&path, None).unwrap();
        assert_eq!(reopened.len(), 80);
    }

    #[test]
    fn failed_persist_keeps_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        let path = data_dir.join("index.json");
        let index = VectorIndex::load(&path, None).unwrap();
        index.insert("kept", vec![1.0, 0.0], None, Metadata::new()).unwrap();

        // Move the data directory away and put a plain file in its place so
        // the next write cannot land.
        let moved = dir.path().join("data-moved");
        fs::rename(&data_dir, &moved).unwrap();
        fs::write(&data_dir, b"not a directory").unwrap();

        let err = index.insert("lost", vec![0.0, 1.0], None, Metadata::new()).unwrap_err();
        assert!(matches!(err, IndexError::Persistence { .. }));
        assert_eq!(index.len(), 1);

        // The last good file is still intact and loadable.
        let survivor = VectorIndex::load(moved.join("index.json"), None).unwrap();
        assert_eq!(survivor.len(), 1);

        // Once the disk is back, the failed write did not burn an id.
        fs::remove_file(&data_dir).unwrap();
        fs::rename(&moved, &data_dir).unwrap();
        let id = index.insert("retry", vec![0.0, 1.0], None, Metadata::new()).unwrap();
        assert_eq!(id, 1);
    }

    #[test]
    fn stray_temp_file_from_crash_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let index = VectorIndex::load(&path, None).unwrap();
        index.insert("a", vec![1.0, 0.0], None, Metadata::new()).unwrap();

        // A crash between temp write and rename leaves a half-written sibling.
        fs::write(dir.path().join(".index.json.deadbeef.tmp"), b"{\"version\":1,\"nex").unwrap();

        let reopened = VectorIndex::load(&path, None).unwrap();
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn clear_keeps_id_counter() {
        let dir = tempfile::tempdir().unwrap();
        let index = open(&dir);
        index.insert("a", vec![1.0, 0.0], None, Metadata::new()).unwrap();
        index.insert("b", vec![0.0, 1.0], None, Metadata::new()).unwrap();
        index.clear().unwrap();

        assert!(index.is_empty());
        assert_eq!(index.dimension(), None);
        let id = index.insert("c", vec![1.0, 2.0, 3.0], None, Metadata::new()).unwrap();
        assert_eq!(id, 2);
    }

    #[test]
    fn namespace_counts() {
        let dir = tempfile::tempdir().unwrap();
        let index = open(&dir);
        index
            .insert_batch(vec![
                NewRecord::new("a", vec![1.0]).in_namespace("alpha"),
                NewRecord::new("b", vec![1.0]).in_namespace("alpha"),
                NewRecord::new("c", vec![1.0]),
            ])
            .unwrap();
        let counts = index.namespaces();
        assert_eq!(counts.get("alpha"), Some(&2));
        assert_eq!(counts.get(DEFAULT_NAMESPACE), Some(&1));
    }
}
