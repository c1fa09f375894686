//! Per-client streaming sessions

pub mod community;
pub mod manager;

pub use community::{induced_edges, CommunitySubgraph, Delta, SessionState};
pub use manager::{SessionId, SessionInfo, SessionManager};
