//! AlgorithmRegistry - epoch-swapped directory of published algorithm output
//!
//! Workers publish a new epoch (graph handle plus every algorithm's output
//! buffer) as one unit. The registry serves any number of concurrent
//! readers and a single writer.
//!
//! # Architecture
//!
//! - The whole snapshot (graph, algorithm sequence, name index, epoch id)
//!   lives behind one `RwLock`, so readers never see a graph from one
//!   epoch paired with algorithms from another
//! - Readers hold a `RegistryReader` (the read guard) for the duration of
//!   a request; everything they look up borrows from it
//! - `update_algs` tears down the retired epoch while still holding the
//!   write lock, so no reader can observe a buffer being released
//!
//! # Usage
//!
//! ```no_run
//! use shmrpc::registry::{AlgorithmRegistry, AlgorithmSet};
//!
//! let registry = AlgorithmRegistry::new();
//! registry.update_algs(None, Some(AlgorithmSet::new(Vec::new())));
//!
//! let reader = registry.acquire_read();
//! assert_eq!(reader.get_num_algs(), 0);
//! assert!(reader.graph().is_none());
//! ```

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard};

use crate::error::{Result, ServerError};
use crate::graph::GraphHandle;
use crate::schema::{self, ColumnLayout};
use crate::shm::SharedBuffer;

/// Output of one running algorithm for one epoch.
#[derive(Debug)]
pub struct AlgorithmState {
    pub name: String,
    /// Layout description, e.g. `"dl pagerank label"`
    pub data_description: String,
    /// Location the buffer was mapped from
    pub data_loc: String,
    /// Bytes per vertex across all columns
    pub data_per_vertex: usize,
    /// Elements per column
    pub vertex_count: usize,
    data: SharedBuffer,
}

impl AlgorithmState {
    /// Attach a worker's output buffer.
    ///
    /// Fails if the buffer is shorter than `data_per_vertex * vertex_count`.
    pub fn new(
        name: impl Into<String>,
        data_description: impl Into<String>,
        data: SharedBuffer,
        data_per_vertex: usize,
        vertex_count: usize,
    ) -> Result<Self> {
        let name = name.into();
        let required = data_per_vertex
            .checked_mul(vertex_count)
            .ok_or_else(|| ServerError::ResourceExhausted(format!("buffer size overflow for '{}'", name)))?;
        if data.len() < required {
            return Err(ServerError::ColumnOutOfBounds {
                offset: 0,
                len: required,
                buffer_len: data.len(),
            });
        }

        Ok(Self {
            data_loc: data.location().to_string(),
            name,
            data_description: data_description.into(),
            data_per_vertex,
            vertex_count,
            data,
        })
    }

    pub fn data(&self) -> &[u8] {
        self.data.as_bytes()
    }

    /// Resolve a named column of this algorithm's output.
    pub fn column_layout(&self, column: &str) -> Result<ColumnLayout> {
        schema::resolve_layout(&self.data_description, self.vertex_count, column)
    }
}

/// Ordered algorithm states plus a name index into the same sequence.
#[derive(Debug, Default)]
pub struct AlgorithmSet {
    algs: Vec<AlgorithmState>,
    by_name: HashMap<String, usize>,
}

impl AlgorithmSet {
    /// Build the name index from the sequence. On duplicate names the
    /// later entry wins the name lookup; both remain positionally visible.
    pub fn new(algs: Vec<AlgorithmState>) -> Self {
        let by_name = algs
            .iter()
            .enumerate()
            .map(|(i, alg)| (alg.name.clone(), i))
            .collect();
        Self { algs, by_name }
    }

    pub fn len(&self) -> usize {
        self.algs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.algs.is_empty()
    }
}

#[derive(Default)]
struct Snapshot {
    epoch: u64,
    graph: Option<GraphHandle>,
    algs: Option<AlgorithmSet>,
}

/// Registry of the current epoch.
///
/// Constructed explicitly and shared by reference (usually `Arc`).
pub struct AlgorithmRegistry {
    snapshot: RwLock<Snapshot>,
}

impl Default for AlgorithmRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AlgorithmRegistry {
    /// Empty registry: no graph, no algorithms, epoch 0.
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Snapshot::default()),
        }
    }

    /// Take a shared read hold on the current snapshot.
    ///
    /// Dropping the returned reader releases the hold.
    pub fn acquire_read(&self) -> RegistryReader<'_> {
        RegistryReader {
            guard: self.snapshot.read().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Install a new epoch.
    ///
    /// Under the write lock: release the previous graph handle, release
    /// and destroy every previously published algorithm state, install
    /// the new graph and algorithm set, and advance the epoch. Nothing in
    /// the section can fail. `None` marks the graph or algorithms as
    /// unavailable.
    pub fn update_algs(&self, graph: Option<GraphHandle>, algs: Option<AlgorithmSet>) {
        tracing::debug!(
            location = graph.as_ref().map(|g| g.location()),
            size = graph.as_ref().map(|g| g.size()),
            algorithms = algs.as_ref().map(|a| a.len()),
            "update_algs called"
        );

        let mut snapshot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);

        drop(snapshot.graph.take());
        if let Some(old) = snapshot.algs.take() {
            for alg in old.algs {
                tracing::trace!(name = %alg.name, loc = %alg.data_loc, "retiring algorithm state");
                drop(alg);
            }
        }

        snapshot.graph = graph;
        snapshot.algs = algs;
        snapshot.epoch += 1;

        tracing::debug!(epoch = snapshot.epoch, "epoch installed");
    }

    /// Current epoch id (one read acquisition).
    pub fn epoch(&self) -> u64 {
        self.acquire_read().epoch()
    }
}

/// Read hold on one epoch of the registry.
pub struct RegistryReader<'a> {
    guard: RwLockReadGuard<'a, Snapshot>,
}

impl<'a> RegistryReader<'a> {
    /// Id of the snapshot this reader observes
    pub fn epoch(&self) -> u64 {
        self.guard.epoch
    }

    pub fn graph(&self) -> Option<&GraphHandle> {
        self.guard.graph.as_ref()
    }

    /// Graph handle, or `GraphUnavailable`.
    pub fn require_graph(&self) -> Result<&GraphHandle> {
        self.graph().ok_or(ServerError::GraphUnavailable)
    }

    pub fn get_num_algs(&self) -> usize {
        self.guard.algs.as_ref().map_or(0, |a| a.len())
    }

    pub fn get_alg(&self, index: usize) -> Option<&AlgorithmState> {
        self.guard.algs.as_ref().and_then(|a| a.algs.get(index))
    }

    pub fn get_alg_by_name(&self, name: &str) -> Option<&AlgorithmState> {
        let set = self.guard.algs.as_ref()?;
        set.by_name.get(name).and_then(|&i| set.algs.get(i))
    }

    /// Algorithm state by name, or `AlgorithmNotRunning`.
    pub fn require_alg(&self, name: &str) -> Result<&AlgorithmState> {
        self.get_alg_by_name(name)
            .ok_or_else(|| ServerError::AlgorithmNotRunning(name.to_string()))
    }

    pub fn has_alg(&self, name: &str) -> bool {
        self.guard
            .algs
            .as_ref()
            .is_some_and(|a| a.by_name.contains_key(name))
    }

    /// Algorithm names in positional order
    pub fn list_algorithms(&self) -> Vec<String> {
        self.guard
            .algs
            .as_ref()
            .map(|a| a.algs.iter().map(|alg| alg.name.clone()).collect())
            .unwrap_or_default()
    }

    /// Release the read hold.
    pub fn release(self) {}
}

#[cfg(test)]
mod registry_tests {
    use super::*;
    use crate::graph::MemoryGraph;

    fn i64_column(name: &str, values: &[i64]) -> AlgorithmState {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_ne_bytes()).collect();
        AlgorithmState::new(
            name,
            "l label",
            SharedBuffer::from_vec(format!("{}_data", name), bytes),
            8,
            values.len(),
        )
        .unwrap()
    }

    fn graph(location: &str, nv: usize) -> GraphHandle {
        GraphHandle::new(location, 0, Box::new(MemoryGraph::new(nv)))
    }

    #[test]
    fn test_empty_registry() {
        let registry = AlgorithmRegistry::new();
        let reader = registry.acquire_read();

        assert_eq!(reader.epoch(), 0);
        assert_eq!(reader.get_num_algs(), 0);
        assert!(reader.get_alg(0).is_none());
        assert!(reader.get_alg_by_name("cc").is_none());
        assert!(!reader.has_alg("cc"));
        assert!(matches!(reader.require_graph(), Err(ServerError::GraphUnavailable)));
    }

    #[test]
    fn test_lookup_by_index_and_name() {
        let registry = AlgorithmRegistry::new();
        registry.update_algs(
            Some(graph("graph_1", 4)),
            Some(AlgorithmSet::new(vec![
                i64_column("cc", &[0, 0, 1, 1]),
                i64_column("louvain", &[3, 3, 3, 3]),
            ])),
        );

        let reader = registry.acquire_read();
        assert_eq!(reader.epoch(), 1);
        assert_eq!(reader.get_num_algs(), 2);
        assert_eq!(reader.get_alg(1).unwrap().name, "louvain");
        assert_eq!(reader.get_alg_by_name("cc").unwrap().vertex_count, 4);
        assert!(reader.has_alg("louvain"));
        assert!(!reader.has_alg("pagerank"));
        assert_eq!(reader.list_algorithms(), vec!["cc", "louvain"]);
        assert_eq!(reader.graph().unwrap().location(), "graph_1");
    }

    #[test]
    fn test_update_replaces_whole_snapshot() {
        let registry = AlgorithmRegistry::new();
        registry.update_algs(
            Some(graph("graph_1", 4)),
            Some(AlgorithmSet::new(vec![i64_column("cc", &[0, 0, 1, 1])])),
        );
        registry.update_algs(
            Some(graph("graph_2", 4)),
            Some(AlgorithmSet::new(vec![i64_column("louvain", &[1, 1, 1, 1])])),
        );

        let reader = registry.acquire_read();
        assert_eq!(reader.epoch(), 2);
        assert!(!reader.has_alg("cc"));
        assert!(reader.has_alg("louvain"));
        assert_eq!(reader.graph().unwrap().location(), "graph_2");
    }

    #[test]
    fn test_null_update_degrades_to_not_found() {
        let registry = AlgorithmRegistry::new();
        registry.update_algs(
            Some(graph("graph_1", 4)),
            Some(AlgorithmSet::new(vec![i64_column("cc", &[0, 0, 1, 1])])),
        );
        registry.update_algs(None, None);

        let reader = registry.acquire_read();
        assert!(reader.graph().is_none());
        assert_eq!(reader.get_num_algs(), 0);
        assert!(matches!(
            reader.require_alg("cc"),
            Err(ServerError::AlgorithmNotRunning(name)) if name == "cc"
        ));
    }

    #[test]
    fn test_duplicate_name_resolves_to_last() {
        let set = AlgorithmSet::new(vec![i64_column("cc", &[1]), i64_column("cc", &[2])]);
        let registry = AlgorithmRegistry::new();
        registry.update_algs(None, Some(set));

        let reader = registry.acquire_read();
        assert_eq!(reader.get_num_algs(), 2);
        assert_eq!(reader.get_alg_by_name("cc").unwrap().data(), &2i64.to_ne_bytes());
    }

    #[test]
    fn test_algorithm_state_rejects_short_buffer() {
        let result = AlgorithmState::new("cc", "l label", SharedBuffer::from_vec("x", vec![0; 8]), 8, 2);
        assert!(matches!(result, Err(ServerError::ColumnOutOfBounds { len: 16, buffer_len: 8, .. })));
    }

    #[test]
    fn test_concurrent_readers() {
        use std::sync::Arc;
        use std::thread;

        let registry = Arc::new(AlgorithmRegistry::new());
        registry.update_algs(None, Some(AlgorithmSet::new(vec![i64_column("cc", &[0; 8])])));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for _ in 0..100 {
                        let reader = registry.acquire_read();
                        assert!(reader.has_alg("cc"));
                        reader.release();
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
    }
}
