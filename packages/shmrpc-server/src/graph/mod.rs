//! Graph store API and the per-epoch graph handle

pub mod memory;

pub use memory::MemoryGraph;

use serde::{Deserialize, Serialize};

use crate::batch::VertexId;
use crate::shm::SharedBuffer;

/// Payload carried by an edge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeData {
    pub weight: i64,
    /// Batch sequence number of the first insertion
    pub time_first: i64,
    /// Batch sequence number of the latest insertion
    pub time_recent: i64,
}

/// Read access to the graph store.
///
/// Send + Sync required: handles are shared by every reader of the registry.
pub trait GraphStore: Send + Sync {
    /// Vertex id space; valid ids are `0..vertex_count()`
    fn vertex_count(&self) -> usize;

    /// Number of live directed edges
    fn edge_count(&self) -> usize;

    /// Visit every outgoing edge of `vertex`.
    fn for_each_edge(&self, vertex: VertexId, f: &mut dyn FnMut(VertexId, &EdgeData));

    /// Outgoing edges of `vertex` as (neighbor, data) pairs
    fn incident_edges(&self, vertex: VertexId) -> Vec<(VertexId, EdgeData)> {
        let mut out = Vec::new();
        self.for_each_edge(vertex, &mut |dst, data| out.push((dst, *data)));
        out
    }

    /// Resolve a vertex name to its id
    fn lookup_id(&self, name: &str) -> Option<VertexId>;

    /// Reverse of `lookup_id`
    fn vertex_name(&self, id: VertexId) -> Option<String>;

    fn contains_vertex(&self, id: VertexId) -> bool {
        id >= 0 && (id as usize) < self.vertex_count()
    }
}

/// Graph published for one epoch.
///
/// Identified by the location and size of its shared-memory image. The
/// optional mapping is released when the handle is dropped, which the
/// registry does only inside its exclusive section.
pub struct GraphHandle {
    location: String,
    size: u64,
    store: Box<dyn GraphStore>,
    _mapping: Option<SharedBuffer>,
}

impl GraphHandle {
    pub fn new(location: impl Into<String>, size: u64, store: Box<dyn GraphStore>) -> Self {
        Self {
            location: location.into(),
            size,
            store,
            _mapping: None,
        }
    }

    /// Keep `mapping` alive for as long as this handle is published.
    pub fn with_mapping(mut self, mapping: SharedBuffer) -> Self {
        self._mapping = Some(mapping);
        self
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn store(&self) -> &dyn GraphStore {
        &*self.store
    }
}

impl std::fmt::Debug for GraphHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphHandle")
            .field("location", &self.location)
            .field("size", &self.size)
            .field("vertices", &self.store.vertex_count())
            .field("edges", &self.store.edge_count())
            .finish()
    }
}
