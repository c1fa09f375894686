//! Edge mutation batches delivered by the graph stream

use serde::{Deserialize, Serialize};

/// Vertex identifier in the graph store.
pub type VertexId = i64;

/// Directed edge as an ordered (src, dst) pair.
pub type EdgePair = (VertexId, VertexId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeInsertion {
    pub source: VertexId,
    pub destination: VertexId,
    #[serde(default = "default_weight")]
    pub weight: i64,
}

fn default_weight() -> i64 {
    1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeDeletion {
    pub source: VertexId,
    pub destination: VertexId,
}

/// One batch of graph mutations, applied atomically by the stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeBatch {
    #[serde(default)]
    pub insertions: Vec<EdgeInsertion>,
    #[serde(default)]
    pub deletions: Vec<EdgeDeletion>,
}

impl EdgeBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(mut self, source: VertexId, destination: VertexId) -> Self {
        self.insertions.push(EdgeInsertion { source, destination, weight: 1 });
        self
    }

    pub fn delete(mut self, source: VertexId, destination: VertexId) -> Self {
        self.deletions.push(EdgeDeletion { source, destination });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.insertions.is_empty() && self.deletions.is_empty()
    }
}
