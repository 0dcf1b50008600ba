use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::StoreError;

const MAGIC: &[u8; 4] = b"ANN1";

/// Flat `label -> vector` map with cosine ranking and atomic save/load.
///
/// Grounded on the teacher's `hnsw_index.rs` stub (`HnswIndex::index`,
/// a no-op placeholder); this builds out the full contract spec.md
/// requires while keeping the brute-force cosine search the teacher's own
/// `SqliteRepo::search` era code used ("naive: return first N"). `hnsw_rs`
/// (already a `chunking-store` dependency) remains the stated upgrade path
/// noted in DESIGN.md rather than adopted here, since spec.md explicitly
/// allows either and the flat map is far easier to test exhaustively.
pub struct AnnIndex {
    vectors: RwLock<HashMap<u64, Vec<f32>>>,
    dimension: RwLock<Option<usize>>,
    dimension_mismatches: AtomicU64,
}

impl Default for AnnIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl AnnIndex {
    pub fn new() -> Self {
        Self {
            vectors: RwLock::new(HashMap::new()),
            dimension: RwLock::new(None),
            dimension_mismatches: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.vectors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimension_mismatches(&self) -> u64 {
        self.dimension_mismatches.load(Ordering::Relaxed)
    }

    /// Adds or replaces the vector for `label`. Rejects an empty vector.
    /// The first successful `add` fixes the index's expected dimension;
    /// later calls with a different length are rejected rather than
    /// silently accepted (they would corrupt cosine comparisons).
    pub fn add(&self, label: u64, vector: &[f32]) -> Result<(), StoreError> {
        if vector.is_empty() {
            return Err(StoreError::Validation("vector must not be empty".into()));
        }
        {
            let mut dim = self.dimension.write();
            match *dim {
                Some(d) if d != vector.len() => {
                    self.dimension_mismatches.fetch_add(1, Ordering::Relaxed);
                    return Err(StoreError::Validation(format!(
                        "vector dimension {} does not match index dimension {}",
                        vector.len(),
                        d
                    )));
                }
                Some(_) => {}
                None => *dim = Some(vector.len()),
            }
        }
        self.vectors.write().insert(label, vector.to_vec());
        Ok(())
    }

    pub fn delete(&self, label: u64) {
        self.vectors.write().remove(&label);
    }

    /// Returns at most `k` `(label, cosine_score)` pairs sorted by score
    /// descending, ties broken by ascending label. Vectors whose dimension
    /// does not match `query` are skipped and counted.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(u64, f32)> {
        if k == 0 || query.is_empty() {
            return Vec::new();
        }
        // Snapshot candidates under the read lock, then release it before
        // scoring/sorting (spec.md §4.2's locking contract).
        let candidates: Vec<(u64, Vec<f32>)> = {
            let guard = self.vectors.read();
            guard.iter().map(|(l, v)| (*l, v.clone())).collect()
        };

        let mut scored: Vec<(u64, f32)> = Vec::with_capacity(candidates.len());
        for (label, vec) in &candidates {
            if vec.len() != query.len() {
                self.dimension_mismatches.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            scored.push((*label, cosine_similarity(query, vec)));
        }

        scored.sort_by(|a, b| match b.1.partial_cmp(&a.1) {
            Some(std::cmp::Ordering::Equal) | None => a.0.cmp(&b.0),
            Some(ord) => ord,
        });
        scored.truncate(k);
        scored
    }

    /// Atomic write: `path.tmp` then fsync then rename, so concurrent
    /// readers of `path` see either the old or the new complete file.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let tmp_path = tmp_path_for(path);
        {
            let file = File::create(&tmp_path).map_err(io_err)?;
            let mut writer = BufWriter::new(file);
            let guard = self.vectors.read();
            writer.write_all(MAGIC).map_err(io_err)?;
            writer.write_all(&(guard.len() as u64).to_le_bytes()).map_err(io_err)?;
            for (label, vector) in guard.iter() {
                writer.write_all(&label.to_le_bytes()).map_err(io_err)?;
                writer.write_all(&(vector.len() as u32).to_le_bytes()).map_err(io_err)?;
                for value in vector {
                    writer.write_all(&value.to_le_bytes()).map_err(io_err)?;
                }
            }
            writer.flush().map_err(io_err)?;
            writer.get_ref().sync_all().map_err(io_err)?;
        }
        fs::rename(&tmp_path, path).map_err(io_err)?;
        Ok(())
    }

    /// No-op if `path` does not exist.
    pub fn load(&self, path: &Path) -> Result<(), StoreError> {
        if !path.exists() {
            return Ok(());
        }
        let file = File::open(path).map_err(io_err)?;
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic).map_err(io_err)?;
        if &magic != MAGIC {
            return Err(StoreError::Validation(format!(
                "{} is not a recognized ANN index file",
                path.display()
            )));
        }

        let count = read_u64(&mut reader)?;
        let mut loaded = HashMap::with_capacity(count as usize);
        let mut dim = None;
        for _ in 0..count {
            let label = read_u64(&mut reader)?;
            let vec_len = read_u32(&mut reader)? as usize;
            let mut vector = Vec::with_capacity(vec_len);
            for _ in 0..vec_len {
                vector.push(read_f32(&mut reader)?);
            }
            dim = dim.or(Some(vec_len));
            loaded.insert(label, vector);
        }

        *self.vectors.write() = loaded;
        *self.dimension.write() = dim;
        Ok(())
    }

    /// Releases resources. Safe to call once; the flat map holds no
    /// external handles, so this is currently a formality kept for
    /// interface symmetry with implementations that do (e.g. a real HNSW
    /// graph backed by mmap).
    pub fn close(&self) {
        self.vectors.write().clear();
    }
}

fn tmp_path_for(path: &Path) -> std::path::PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(".tmp");
    std::path::PathBuf::from(s)
}

fn io_err(e: io::Error) -> StoreError {
    StoreError::Validation(format!("ann index io error: {e}"))
}

fn read_u64<R: Read>(r: &mut R) -> Result<u64, StoreError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf).map_err(io_err)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32, StoreError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).map_err(io_err)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_f32<R: Read>(r: &mut R) -> Result<f32, StoreError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).map_err(io_err)?;
    Ok(f32::from_le_bytes(buf))
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0f32;
    let mut norm_a = 0f32;
    let mut norm_b = 0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_orders_by_score_then_label() {
        let idx = AnnIndex::new();
        idx.add(3, &[1.0, 0.0]).unwrap();
        idx.add(1, &[1.0, 0.0]).unwrap();
        idx.add(2, &[0.0, 1.0]).unwrap();
        let hits = idx.search(&[1.0, 0.0], 10);
        assert_eq!(hits[0].0, 1); // tie between 1 and 3, label 1 wins
        assert_eq!(hits[1].0, 3);
        assert!(hits[0].1 > hits[2].1);
    }

    #[test]
    fn k_zero_returns_empty() {
        let idx = AnnIndex::new();
        idx.add(1, &[1.0]).unwrap();
        assert!(idx.search(&[1.0], 0).is_empty());
    }

    #[test]
    fn mismatched_dimension_is_skipped_and_counted() {
        let idx = AnnIndex::new();
        idx.add(1, &[1.0, 0.0]).unwrap();
        let hits = idx.search(&[1.0, 0.0, 0.0], 10);
        assert!(hits.is_empty());
        assert_eq!(idx.dimension_mismatches(), 1);
    }

    #[test]
    fn rejects_empty_vector() {
        let idx = AnnIndex::new();
        assert!(idx.add(1, &[]).is_err());
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.ann");
        let idx = AnnIndex::new();
        idx.add(1, &[1.0, 2.0, 3.0]).unwrap();
        idx.add(2, &[4.0, 5.0, 6.0]).unwrap();
        idx.save(&path).unwrap();

        let loaded = AnnIndex::new();
        loaded.load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        let hits = loaded.search(&[1.0, 2.0, 3.0], 1);
        assert_eq!(hits[0].0, 1);
    }

    #[test]
    fn load_missing_file_is_noop() {
        let idx = AnnIndex::new();
        idx.load(Path::new("/nonexistent/path.ann")).unwrap();
        assert_eq!(idx.len(), 0);
    }
}
