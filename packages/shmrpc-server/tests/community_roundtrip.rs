//! Incremental community state agrees with a fresh registration
//!
//! A client starts from the registration subgraph and, after every
//! update, removes the polled deletions and then adds the polled
//! insertions. After any sequence of batches and label changes:
//! - the tracked members equal the members of a fresh registration
//! - every edge of the fresh subgraph is on the client's view
//! - any extra edge on the view between members is gone from the store
//!
//! Insertions are judged on labels alone, so the client view may also
//! hold edges between vertices outside the community.

use std::collections::BTreeSet;

use proptest::prelude::*;

use shmrpc::batch::{EdgeBatch, EdgePair};
use shmrpc::graph::{GraphHandle, GraphStore, MemoryGraph};
use shmrpc::registry::{AlgorithmRegistry, AlgorithmSet, AlgorithmState};
use shmrpc::session::CommunitySubgraph;
use shmrpc::shm::SharedBuffer;

const N: i64 = 6;

fn publish(registry: &AlgorithmRegistry, graph: &MemoryGraph, labels: &[i64]) {
    let bytes: Vec<u8> = labels.iter().flat_map(|v| v.to_ne_bytes()).collect();
    let alg = AlgorithmState::new("cc", "l label", SharedBuffer::from_vec("cc", bytes), 8, labels.len()).unwrap();
    registry.update_algs(
        Some(GraphHandle::new("graph", 0, Box::new(graph.clone()))),
        Some(AlgorithmSet::new(vec![alg])),
    );
}

#[derive(Debug, Clone)]
struct Step {
    insertions: Vec<(i64, i64)>,
    deletions: Vec<(i64, i64)>,
    labels: Vec<i64>,
}

fn edge() -> impl Strategy<Value = (i64, i64)> {
    (0..N, 0..N)
}

fn labels() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(0..3i64, N as usize)
}

fn step() -> impl Strategy<Value = Step> {
    (
        prop::collection::vec(edge(), 1..4),
        prop::collection::vec(edge(), 0..4),
        labels(),
    )
        .prop_map(|(insertions, deletions, labels)| Step { insertions, deletions, labels })
}

proptest! {
    #[test]
    fn prop_incremental_matches_fresh(
        initial in prop::collection::vec(edge(), 0..12),
        initial_labels in labels(),
        source in 0..N,
        steps in prop::collection::vec(step(), 1..6),
    ) {
        let registry = AlgorithmRegistry::new();
        let mut graph = MemoryGraph::new(N as usize);
        for (s, d) in &initial {
            graph.insert_edge(*s, *d, 1).unwrap();
        }
        publish(&registry, &graph, &initial_labels);

        let mut session = CommunitySubgraph::new("cc", "label", source);
        let mut view: BTreeSet<EdgePair> = session
            .register(&registry.acquire_read())
            .unwrap()
            .into_iter()
            .collect();

        for step in &steps {
            let mut batch = EdgeBatch::new();
            for (s, d) in &step.deletions {
                batch = batch.delete(*s, *d);
            }
            for (s, d) in &step.insertions {
                batch = batch.insert(*s, *d);
            }
            graph.apply_batch(&batch);
            publish(&registry, &graph, &step.labels);

            session.update(&registry.acquire_read(), &batch).unwrap();
            let delta = session.poll();
            for e in &delta.deletions {
                view.remove(e);
            }
            view.extend(delta.insertions.iter().copied());

            let mut fresh = CommunitySubgraph::new("cc", "label", source);
            let fresh_edges: BTreeSet<EdgePair> = fresh
                .register(&registry.acquire_read())
                .unwrap()
                .into_iter()
                .collect();
            prop_assert_eq!(session.members(), fresh.members());

            let members = session.members();
            let on_members: BTreeSet<EdgePair> = view
                .iter()
                .copied()
                .filter(|(s, d)| members.contains(s) && members.contains(d))
                .collect();
            prop_assert!(fresh_edges.is_subset(&on_members), "missing edges: {:?}", fresh_edges.difference(&on_members).collect::<Vec<_>>());

            for (s, d) in on_members.difference(&fresh_edges) {
                let mut present = false;
                graph.for_each_edge(*s, &mut |dst, _| present |= dst == *d);
                prop_assert!(!present, "edge ({}, {}) in store but not in fresh subgraph", s, d);
            }
        }
    }
}
