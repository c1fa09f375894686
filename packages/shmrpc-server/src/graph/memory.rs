//! MemoryGraph - in-process adjacency store
//!
//! Mirrors the live graph from the mutation stream. The server keeps one
//! mutable instance and publishes a clone of it as each epoch's graph.

use std::collections::{BTreeMap, HashMap};

use crate::batch::{EdgeBatch, VertexId};
use crate::error::{Result, ServerError};
use crate::graph::{EdgeData, GraphStore};

#[derive(Debug, Clone)]
pub struct MemoryGraph {
    /// Outgoing adjacency, indexed by vertex id
    adjacency: Vec<BTreeMap<VertexId, EdgeData>>,
    names: HashMap<String, VertexId>,
    ids: HashMap<VertexId, String>,
    edge_count: usize,
    /// Batches applied so far; used as edge timestamps
    batches_applied: i64,
}

impl MemoryGraph {
    /// Create an empty graph with a fixed vertex id space.
    pub fn new(max_vertices: usize) -> Self {
        Self {
            adjacency: vec![BTreeMap::new(); max_vertices],
            names: HashMap::new(),
            ids: HashMap::new(),
            edge_count: 0,
            batches_applied: 0,
        }
    }

    fn check_vertex(&self, id: VertexId) -> Result<usize> {
        if self.contains_vertex(id) {
            Ok(id as usize)
        } else {
            Err(ServerError::InvalidParameter(format!(
                "vertex {} outside 0..{}",
                id,
                self.adjacency.len()
            )))
        }
    }

    /// Insert or refresh the edge `src -> dst`.
    pub fn insert_edge(&mut self, src: VertexId, dst: VertexId, weight: i64) -> Result<()> {
        let s = self.check_vertex(src)?;
        self.check_vertex(dst)?;
        let now = self.batches_applied;

        match self.adjacency[s].get_mut(&dst) {
            Some(edge) => {
                edge.weight = weight;
                edge.time_recent = now;
            }
            None => {
                self.adjacency[s].insert(dst, EdgeData { weight, time_first: now, time_recent: now });
                self.edge_count += 1;
            }
        }
        Ok(())
    }

    /// Remove `src -> dst`; returns whether the edge existed.
    pub fn delete_edge(&mut self, src: VertexId, dst: VertexId) -> Result<bool> {
        let s = self.check_vertex(src)?;
        self.check_vertex(dst)?;
        let removed = self.adjacency[s].remove(&dst).is_some();
        if removed {
            self.edge_count -= 1;
        }
        Ok(removed)
    }

    /// Bind `name` to `id`, replacing any previous binding of either.
    pub fn map_vertex(&mut self, name: &str, id: VertexId) -> Result<()> {
        self.check_vertex(id)?;
        if let Some(old) = self.ids.insert(id, name.to_string()) {
            self.names.remove(&old);
        }
        if let Some(old_id) = self.names.insert(name.to_string(), id) {
            if old_id != id {
                self.ids.remove(&old_id);
            }
        }
        Ok(())
    }

    /// Apply deletions, then insertions, of one batch.
    ///
    /// Edges with endpoints outside the id space are skipped and counted.
    pub fn apply_batch(&mut self, batch: &EdgeBatch) -> usize {
        self.batches_applied += 1;
        let mut skipped = 0;

        for del in &batch.deletions {
            if self.delete_edge(del.source, del.destination).is_err() {
                skipped += 1;
            }
        }
        for ins in &batch.insertions {
            if self.insert_edge(ins.source, ins.destination, ins.weight).is_err() {
                skipped += 1;
            }
        }

        if skipped > 0 {
            tracing::warn!("apply_batch: skipped {} edges outside vertex range", skipped);
        }
        skipped
    }
}

impl GraphStore for MemoryGraph {
    fn vertex_count(&self) -> usize {
        self.adjacency.len()
    }

    fn edge_count(&self) -> usize {
        self.edge_count
    }

    fn for_each_edge(&self, vertex: VertexId, f: &mut dyn FnMut(VertexId, &EdgeData)) {
        if let Some(edges) = usize::try_from(vertex).ok().and_then(|v| self.adjacency.get(v)) {
            for (dst, data) in edges {
                f(*dst, data);
            }
        }
    }

    fn lookup_id(&self, name: &str) -> Option<VertexId> {
        self.names.get(name).copied()
    }

    fn vertex_name(&self, id: VertexId) -> Option<String> {
        self.ids.get(&id).cloned()
    }
}
