//! shmrpc - RPC serving layer for a streaming graph-analytics engine
//!
//! Analytic workers publish per-vertex results into shared-memory
//! buffers. This crate keeps the current epoch of those buffers (plus the
//! graph) in an [`AlgorithmRegistry`], decodes typed columns out of them,
//! and maintains incremental community-subgraph sessions that clients
//! register once and then poll for edge deltas.

pub mod batch;
pub mod column;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod graph;
pub mod metrics;
pub mod params;
pub mod protocol;
pub mod registry;
pub mod schema;
pub mod session;
pub mod shm;

pub use batch::{EdgeBatch, EdgePair, VertexId};
pub use column::{ColumnValue, TypedColumnView};
pub use config::ServerConfig;
pub use dispatch::{Dispatcher, EpochUpdate};
pub use error::{Result, ServerError};
pub use graph::{GraphHandle, GraphStore, MemoryGraph};
pub use registry::{AlgorithmRegistry, AlgorithmSet, AlgorithmState, RegistryReader};
pub use session::{CommunitySubgraph, Delta, SessionManager};
pub use shm::SharedBuffer;
