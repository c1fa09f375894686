//! CommunitySubgraph - incrementally maintained community of one vertex
//!
//! A client names an algorithm, one of its integral label columns, and a
//! source vertex. The session tracks every vertex sharing the source's
//! label and the edges induced among them. Registration returns the full
//! induced subgraph once; afterwards each mutation batch queues edge
//! insertions and deletions that the client drains by polling.
//!
//! Labels are read from the registry's current epoch on every call, so a
//! worker publishing new labels moves vertices in or out of the community
//! on the next update even if the batch itself is empty of relevant edges.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::Serialize;

use crate::batch::{EdgeBatch, EdgePair, VertexId};
use crate::column::TypedColumnView;
use crate::error::{Result, ServerError};
use crate::graph::GraphStore;
use crate::registry::RegistryReader;
use crate::schema::{ColumnLayout, ElementType};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unregistered,
    Registered,
    Updating,
    Idle,
    Expired,
}

/// Edges queued since the last poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Delta {
    pub insertions: Vec<EdgePair>,
    pub deletions: Vec<EdgePair>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.insertions.is_empty() && self.deletions.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
struct ResolvedColumn {
    epoch: u64,
    layout: ColumnLayout,
}

/// Session state for one client's community subgraph.
#[derive(Debug)]
pub struct CommunitySubgraph {
    source: VertexId,
    algorithm_name: String,
    column_name: String,
    resolved: Option<ResolvedColumn>,
    /// Epoch the initial subgraph was computed from
    registered_epoch: u64,
    members: BTreeSet<VertexId>,
    pending_insertions: BTreeSet<EdgePair>,
    pending_deletions: BTreeSet<EdgePair>,
    last_activity: Instant,
    state: SessionState,
}

impl CommunitySubgraph {
    pub fn new(algorithm_name: impl Into<String>, column_name: impl Into<String>, source: VertexId) -> Self {
        Self {
            source,
            algorithm_name: algorithm_name.into(),
            column_name: column_name.into(),
            resolved: None,
            registered_epoch: 0,
            members: BTreeSet::new(),
            pending_insertions: BTreeSet::new(),
            pending_deletions: BTreeSet::new(),
            last_activity: Instant::now(),
            state: SessionState::Unregistered,
        }
    }

    pub fn source(&self) -> VertexId {
        self.source
    }

    pub fn algorithm_name(&self) -> &str {
        &self.algorithm_name
    }

    pub fn column_name(&self) -> &str {
        &self.column_name
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn registered_epoch(&self) -> u64 {
        self.registered_epoch
    }

    pub fn members(&self) -> &BTreeSet<VertexId> {
        &self.members
    }

    pub fn pending_insertions(&self) -> &BTreeSet<EdgePair> {
        &self.pending_insertions
    }

    pub fn pending_deletions(&self) -> &BTreeSet<EdgePair> {
        &self.pending_deletions
    }

    /// Resolve the label column for the reader's epoch.
    ///
    /// The layout is memoized per epoch; the returned view borrows from
    /// the reader.
    fn label_column<'r>(&mut self, reader: &'r RegistryReader<'_>) -> Result<TypedColumnView<'r>> {
        let alg = reader.require_alg(&self.algorithm_name)?;

        let layout = match self.resolved {
            Some(r) if r.epoch == reader.epoch() => r.layout,
            _ => {
                let layout = alg.column_layout(&self.column_name)?;
                if layout.element_type != ElementType::I64 {
                    return Err(ServerError::ColumnTypeMismatch {
                        column: self.column_name.clone(),
                        expected: ElementType::I64.code(),
                        actual: layout.element_type.code(),
                    });
                }
                self.resolved = Some(ResolvedColumn { epoch: reader.epoch(), layout });
                layout
            }
        };

        layout.bind(alg.data())
    }

    /// Compute the initial community and its induced subgraph.
    ///
    /// The returned edges are reported once; pending sets start empty.
    pub fn register(&mut self, reader: &RegistryReader<'_>) -> Result<Vec<EdgePair>> {
        let graph = reader.require_graph()?.store();
        let labels = self.label_column(reader)?;

        let source = index_in(&labels, self.source).ok_or_else(|| {
            ServerError::InvalidParameter(format!(
                "source {} outside 0..{}",
                self.source,
                labels.len()
            ))
        })?;

        let label = labels.get_int64(source);
        tracing::debug!(source = self.source, ?label, algorithm = %self.algorithm_name, "registering community subgraph");

        self.members = scan_community(&labels, source).into_iter().collect();
        self.pending_insertions.clear();
        self.pending_deletions.clear();

        let subgraph = induced_edges(graph, &self.members);

        self.registered_epoch = reader.epoch();
        self.state = SessionState::Registered;
        self.reset_timeout();
        Ok(subgraph)
    }

    /// Fold one mutation batch into the pending sets.
    ///
    /// Passes run in a fixed order: batch deletions, batch insertions,
    /// membership shrink, membership growth. A pair queued for deletion
    /// may be queued for insertion again by a later pass; both are
    /// reported.
    pub fn update(&mut self, reader: &RegistryReader<'_>, batch: &EdgeBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        if self.state == SessionState::Unregistered || self.state == SessionState::Expired {
            return Err(ServerError::InvalidParameter(format!(
                "session for source {} is not registered",
                self.source
            )));
        }

        // The initial subgraph already reflects every batch up to this epoch
        if reader.epoch() <= self.registered_epoch {
            tracing::trace!(epoch = reader.epoch(), registered = self.registered_epoch, "update: batch predates registration");
            return Ok(());
        }

        let graph = reader.require_graph()?.store();
        let labels = self.label_column(reader)?;
        let Some(source) = index_in(&labels, self.source) else {
            return Err(ServerError::InvalidParameter(format!(
                "source {} outside 0..{}",
                self.source,
                labels.len()
            )));
        };

        self.state = SessionState::Updating;

        // An edge between two tracked vertices was on the client's view
        for del in &batch.deletions {
            if self.members.contains(&del.source) && self.members.contains(&del.destination) {
                self.pending_deletions.insert((del.source, del.destination));
            }
        }

        // Judged on current labels, not on the tracked set
        let mut skipped = 0usize;
        for ins in &batch.insertions {
            match (index_in(&labels, ins.source), index_in(&labels, ins.destination)) {
                (Some(s), Some(d)) => {
                    if labels.equal(s, d) {
                        self.pending_insertions.insert((ins.source, ins.destination));
                    }
                }
                _ => skipped += 1,
            }
        }
        if skipped > 0 {
            tracing::warn!(source = self.source, "update: skipped {} insertions outside label range", skipped);
        }

        // Vertices that left the community retract every tracked edge
        // touching them. Edges are directed, so incoming ones count too.
        let departed: BTreeSet<VertexId> = self
            .members
            .iter()
            .copied()
            .filter(|&v| index_in(&labels, v).map_or(true, |i| !labels.equal(source, i)))
            .collect();
        if !departed.is_empty() {
            let members = &self.members;
            let deletions = &mut self.pending_deletions;
            for &u in members {
                graph.for_each_edge(u, &mut |dst, _| {
                    if (departed.contains(&u) || departed.contains(&dst)) && members.contains(&dst) {
                        deletions.insert((u, dst));
                    }
                });
            }
            self.members.retain(|v| !departed.contains(v));
        }

        // New members report every edge between them and the community
        let joined: BTreeSet<VertexId> = scan_community(&labels, source)
            .into_iter()
            .filter(|v| !self.members.contains(v))
            .collect();
        if !joined.is_empty() {
            self.members.extend(joined.iter().copied());
            let members = &self.members;
            let insertions = &mut self.pending_insertions;
            for &u in members {
                graph.for_each_edge(u, &mut |dst, _| {
                    let in_community = index_in(&labels, dst).is_some_and(|d| labels.equal(source, d));
                    if (joined.contains(&u) || joined.contains(&dst)) && in_community {
                        insertions.insert((u, dst));
                    }
                });
            }
        }

        self.state = SessionState::Idle;
        Ok(())
    }

    /// Drain the pending sets and refresh the activity timestamp.
    pub fn poll(&mut self) -> Delta {
        let delta = Delta {
            insertions: std::mem::take(&mut self.pending_insertions).into_iter().collect(),
            deletions: std::mem::take(&mut self.pending_deletions).into_iter().collect(),
        };
        if self.state == SessionState::Registered {
            self.state = SessionState::Idle;
        }
        self.reset_timeout();
        delta
    }

    pub fn reset_timeout(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Whether the session has been idle for longer than `timeout` at `now`.
    pub fn is_expired(&self, timeout: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_activity) > timeout
    }

    pub fn expire(&mut self) {
        self.state = SessionState::Expired;
    }
}

/// Column index of `v`, if it lies inside the column.
fn index_in(labels: &TypedColumnView<'_>, v: VertexId) -> Option<usize> {
    usize::try_from(v).ok().filter(|&i| i < labels.len())
}

/// Every vertex sharing the label of `source`, ascending.
fn scan_community(labels: &TypedColumnView<'_>, source: usize) -> Vec<VertexId> {
    (0..labels.len())
        .into_par_iter()
        .filter(|&i| labels.equal(source, i))
        .map(|i| i as VertexId)
        .collect()
}

/// Edges of `graph` with both endpoints in `members`.
pub fn induced_edges(graph: &dyn GraphStore, members: &BTreeSet<VertexId>) -> Vec<EdgePair> {
    let mut edges = Vec::new();
    for &v in members {
        graph.for_each_edge(v, &mut |dst, _| {
            if members.contains(&dst) {
                edges.push((v, dst));
            }
        });
    }
    edges
}
