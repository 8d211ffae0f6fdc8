use dashmap::mapref::entry::Entry as Slot;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

struct Entry {
    generation: u64,
    vector: Arc<Vec<f32>>,
}

/// Concurrent cache of knowledge item embeddings, keyed by item id.
///
/// Absence of an entry means "not computed yet". Every entry is tagged with the
/// generation that wrote it; `reset` bumps the generation so a writer still
/// working on the previous knowledge base can no longer publish into the new one.
#[derive(Default)]
pub struct EmbeddingStore {
    entries: DashMap<String, Entry>,
    generation: AtomicU64,
}

impl EmbeddingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Embedding of `id` in the current generation, if computed.
    pub fn get(&self, id: &str) -> Option<Arc<Vec<f32>>> {
        let current = self.generation();
        let entry = self.entries.get(id)?;
        (entry.generation == current).then(|| entry.vector.clone())
    }

    /// Store a vector computed for `generation`. Returns false when that
    /// generation is no longer current and the vector was discarded.
    ///
    /// The generation is checked again under the entry's shard lock, so a
    /// writer that loses a race with `reset` never replaces a newer vector.
    pub fn insert(&self, generation: u64, id: impl Into<String>, vector: Vec<f32>) -> bool {
        if generation != self.generation() {
            return false;
        }
        let id = id.into();
        let dims = vector.len();
        let entry = Entry {
            generation,
            vector: Arc::new(vector),
        };

        match self.entries.entry(id) {
            Slot::Occupied(mut slot) => {
                if slot.get().generation > generation || generation != self.generation() {
                    return false;
                }
                debug!("Caching embedding for {} ({} dims)", slot.key(), dims);
                slot.insert(entry);
            }
            Slot::Vacant(slot) => {
                if generation != self.generation() {
                    return false;
                }
                debug!("Caching embedding for {} ({} dims)", slot.key(), dims);
                slot.insert(entry);
            }
        }
        true
    }

    /// Drop every vector and start a new generation, returning its number.
    pub fn reset(&self) -> u64 {
        let next = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.entries.clear();
        info!("Embedding store cleared, generation {}", next);
        next
    }

    /// Number of vectors usable by readers.
    pub fn len(&self) -> usize {
        let current = self.generation();
        self.entries
            .iter()
            .filter(|e| e.value().generation == current)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let store = EmbeddingStore::new();
        let generation = store.generation();
        assert!(store.insert(generation, "qa_001", vec![1.0, 2.0]));

        assert_eq!(store.get("qa_001").unwrap().as_slice(), &[1.0, 2.0]);
        assert!(store.get("qa_002").is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_reset_makes_old_vectors_unreachable() {
        let store = EmbeddingStore::new();
        let old = store.generation();
        store.insert(old, "qa_001", vec![1.0]);

        let new = store.reset();
        assert_ne!(old, new);
        assert!(store.get("qa_001").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_stale_writer_is_ignored() {
        let store = EmbeddingStore::new();
        let old = store.generation();
        store.reset();

        assert!(!store.insert(old, "qa_001", vec![1.0]));
        assert!(store.get("qa_001").is_none());
    }

    #[test]
    fn test_stale_writer_never_replaces_newer_vector() {
        let store = EmbeddingStore::new();
        let old = store.generation();
        let new = store.reset();
        assert!(store.insert(new, "qa_001", vec![2.0]));

        assert!(!store.insert(old, "qa_001", vec![1.0]));
        assert_eq!(store.get("qa_001").unwrap().as_slice(), &[2.0]);
    }

    #[test]
    fn test_racing_reset_leaves_only_current_vectors() {
        let store = Arc::new(EmbeddingStore::new());
        let old = store.generation();

        let stale_writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                for round in 0..200 {
                    for i in 0..10 {
                        store.insert(old, format!("qa_{:03}", i), vec![-(round as f32)]);
                    }
                }
            })
        };

        let new = store.reset();
        for i in 0..10 {
            assert!(store.insert(new, format!("qa_{:03}", i), vec![i as f32]));
        }
        stale_writer.join().unwrap();

        assert_eq!(store.len(), 10);
        for i in 0..10 {
            assert_eq!(store.get(&format!("qa_{:03}", i)).unwrap()[0], i as f32);
        }
    }

    #[test]
    fn test_concurrent_readers_and_writer() {
        let store = Arc::new(EmbeddingStore::new());
        let generation = store.generation();

        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                for i in 0..500 {
                    store.insert(generation, format!("qa_{:03}", i), vec![i as f32]);
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..500 {
                        if let Some(v) = store.get(&format!("qa_{:03}", i)) {
                            assert_eq!(v[0], i as f32);
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(store.len(), 500);
    }
}
