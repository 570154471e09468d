// Copyright (c) The canopy Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared node registry and tree construction.
//!
//! The registry maps event handles to nodes under construction. Producer
//! threads mutate it concurrently while the build runs; entries are never
//! removed mid-run, since a late output or finish event must still find
//! the nodes of ancestors that already resolved. Once the event stream is
//! complete the registry is frozen, single-threaded, into the sorted
//! immutable tree.

use crate::{
    errors::EventError,
    events::{EventHandle, HandleId, OperationMetadata},
    failures::UNKNOWN_FAILURE,
    output_filter::{NoiseCategory, apply_noise_filter, truncate_lines},
};
use canopy_metadata::{NodeKind, TestNode, TestOutcome};
use indexmap::IndexSet;
use std::{
    collections::{HashMap, hash_map::Entry},
    mem,
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock},
};
use tracing::trace;

const SHARD_COUNT: usize = 16;

// A panicking producer thread must not lose the rest of the tree, so
// poisoned locks are recovered rather than propagated.
fn lock_mutex<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A fixed-shard concurrent map keyed by handle id.
///
/// Lookups take a shared lock on a single shard and insertion is atomic
/// per handle, so unrelated branches of the tree never contend on a
/// global lock.
pub(super) struct ShardedMap<V> {
    shards: [RwLock<HashMap<HandleId, V>>; SHARD_COUNT],
}

impl<V: Clone> ShardedMap<V> {
    pub(super) fn new() -> Self {
        Self {
            shards: std::array::from_fn(|_| RwLock::new(HashMap::new())),
        }
    }

    fn shard(&self, id: HandleId) -> &RwLock<HashMap<HandleId, V>> {
        &self.shards[(id.as_u64() % SHARD_COUNT as u64) as usize]
    }

    pub(super) fn get(&self, id: HandleId) -> Option<V> {
        self.shard(id)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Returns the value for `id`, inserting a fresh one if absent. The
    /// boolean is true if this call inserted.
    pub(super) fn get_or_insert_with(&self, id: HandleId, make: impl FnOnce() -> V) -> (V, bool) {
        let mut shard = self
            .shard(id)
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match shard.entry(id) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => (entry.insert(make()).clone(), true),
        }
    }

    pub(super) fn remove(&self, id: HandleId) -> Option<V> {
        self.shard(id)
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    /// Removes and returns every entry. Call only once producers are
    /// quiescent.
    pub(super) fn drain(&self) -> Vec<(HandleId, V)> {
        self.shards
            .iter()
            .flat_map(|shard| {
                shard
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .drain()
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

/// One node of the tree under construction.
///
/// Shared between the registry, the parent's child list, and possibly the
/// root set. All mutable state sits behind a per-node mutex, which also
/// serializes appends to the node's child list.
#[derive(Debug)]
pub(super) struct NodeCell {
    id: HandleId,
    state: Mutex<NodeState>,
}

#[derive(Debug)]
struct NodeState {
    display_name: String,
    kind: NodeKind,
    /// True while the node exists only because a finish or output event
    /// outran its start event.
    provisional: bool,
    outcome: TestOutcome,
    failure_message: Option<String>,
    /// Stream-tagged raw lines, unfiltered until the finalize pass.
    raw_output: Vec<String>,
    children: Vec<Arc<NodeCell>>,
}

impl NodeCell {
    fn new(id: HandleId, display_name: String, kind: NodeKind, provisional: bool) -> Self {
        Self {
            id,
            state: Mutex::new(NodeState {
                display_name,
                kind,
                provisional,
                outcome: TestOutcome::Unknown,
                failure_message: None,
                raw_output: Vec::new(),
                children: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, NodeState> {
        lock_mutex(&self.state)
    }

    pub(super) fn kind(&self) -> NodeKind {
        self.lock().kind
    }

    /// Fills in the name and kind of a defensively created node, at most
    /// once.
    fn upgrade_provisional(&self, display_name: &str, kind: NodeKind) {
        let mut state = self.lock();
        if state.provisional {
            state.display_name = display_name.to_owned();
            state.kind = kind;
            state.provisional = false;
        }
    }

    fn push_child(&self, child: Arc<NodeCell>) {
        self.lock().children.push(child);
    }

    fn record_outcome(
        &self,
        outcome: TestOutcome,
        failure_message: Option<String>,
    ) -> Result<(), EventError> {
        let mut state = self.lock();
        if state.outcome.is_terminal() {
            return Err(EventError::OutcomeAlreadyRecorded {
                handle: self.id,
                existing: state.outcome,
                incoming: outcome,
            });
        }
        state.outcome = outcome;
        state.failure_message = failure_message;
        Ok(())
    }

    pub(super) fn append_raw_output(&self, lines: Vec<String>) {
        if !lines.is_empty() {
            self.lock().raw_output.extend(lines);
        }
    }
}

/// Counters and diagnostics accumulated during the finalize walk.
#[derive(Debug, Default)]
pub(super) struct FinalizeStats {
    /// Atomic tests by terminal outcome.
    pub(super) passed: usize,
    pub(super) failed: usize,
    pub(super) skipped: usize,
    /// Nodes of any kind whose finish event never arrived.
    pub(super) unresolved: usize,
    /// True if any node in the tree reports `Failed`.
    pub(super) any_failed_node: bool,
    /// Noise categories that matched at least one line, in rule order.
    pub(super) matched_noise: IndexSet<NoiseCategory>,
}

pub(super) struct NodeRegistry {
    nodes: ShardedMap<Arc<NodeCell>>,
    roots: Mutex<Vec<Arc<NodeCell>>>,
}

impl NodeRegistry {
    pub(super) fn new() -> Self {
        Self {
            nodes: ShardedMap::new(),
            roots: Mutex::new(Vec::new()),
        }
    }

    pub(super) fn get(&self, id: HandleId) -> Option<Arc<NodeCell>> {
        self.nodes.get(id)
    }

    /// Registers the node for a start event.
    ///
    /// Duplicate starts reuse the existing node; a node created
    /// defensively by an out-of-order finish or output event is upgraded
    /// with the start event's name and kind.
    pub(super) fn on_start(
        &self,
        handle: &EventHandle,
        display_name: &str,
        metadata: &OperationMetadata,
    ) {
        let kind = metadata.infer_kind();
        let (node, inserted) = self.nodes.get_or_insert_with(handle.id(), || {
            Arc::new(NodeCell::new(
                handle.id(),
                display_name.to_owned(),
                kind,
                false,
            ))
        });
        if inserted {
            self.link(handle, &node);
        } else {
            node.upgrade_provisional(display_name, kind);
        }
    }

    /// Records a finish event, creating the node if its start has not
    /// arrived yet.
    pub(super) fn on_finish(
        &self,
        handle: &EventHandle,
        outcome: TestOutcome,
        failure_message: Option<String>,
    ) -> Result<Arc<NodeCell>, EventError> {
        if !outcome.is_terminal() {
            return Err(EventError::NonTerminalFinish {
                handle: handle.id(),
                outcome,
            });
        }
        let node = self.lookup_or_provisional(handle);
        node.record_outcome(outcome, failure_message)?;
        Ok(node)
    }

    fn lookup_or_provisional(&self, handle: &EventHandle) -> Arc<NodeCell> {
        let (node, inserted) = self.nodes.get_or_insert_with(handle.id(), || {
            Arc::new(NodeCell::new(
                handle.id(),
                format!("<unnamed {}>", handle.id()),
                NodeKind::Suite,
                true,
            ))
        });
        if inserted {
            trace!(handle = %handle.id(), "created provisional node for out-of-order event");
            self.link(handle, &node);
        }
        node
    }

    /// Links a freshly inserted node to its parent, or to the root set if
    /// the parent handle has no registry entry yet.
    fn link(&self, handle: &EventHandle, node: &Arc<NodeCell>) {
        match handle.parent().and_then(|parent| self.nodes.get(parent.id())) {
            Some(parent) => parent.push_child(Arc::clone(node)),
            None => lock_mutex(&self.roots).push(Arc::clone(node)),
        }
    }

    /// Freezes the registry into the final sorted tree.
    ///
    /// Producers must be quiescent; this runs on a single thread with no
    /// further synchronization concerns.
    pub(super) fn finalize(
        self,
        include_output_for_passed: bool,
        max_output_lines: usize,
        stats: &mut FinalizeStats,
    ) -> Vec<TestNode> {
        let roots = self
            .roots
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        let mut root_nodes: Vec<TestNode> = roots
            .iter()
            .map(|cell| freeze(cell, include_output_for_passed, max_output_lines, stats))
            .collect();
        root_nodes.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        root_nodes
    }
}

/// Converts one cell and its subtree into the immutable result form,
/// applying the output retention policy and clearing transient buffers.
fn freeze(
    cell: &NodeCell,
    include_output_for_passed: bool,
    max_output_lines: usize,
    stats: &mut FinalizeStats,
) -> TestNode {
    let (display_name, kind, outcome, failure_message, raw_output, child_cells) = {
        let mut state = cell.lock();
        (
            mem::take(&mut state.display_name),
            state.kind,
            state.outcome,
            state.failure_message.take(),
            mem::take(&mut state.raw_output),
            mem::take(&mut state.children),
        )
    };

    if kind == NodeKind::Test {
        match outcome {
            TestOutcome::Passed => stats.passed += 1,
            TestOutcome::Failed => stats.failed += 1,
            TestOutcome::Skipped => stats.skipped += 1,
            TestOutcome::Unknown => {}
        }
    }
    if !outcome.is_terminal() {
        stats.unresolved += 1;
    }
    if outcome.is_failed() {
        stats.any_failed_node = true;
    }

    let output_lines = if outcome.is_failed() || include_output_for_passed {
        let filtered = apply_noise_filter(raw_output);
        for category in filtered.matched {
            stats.matched_noise.insert(category);
        }
        truncate_lines(filtered.lines, max_output_lines)
    } else {
        Vec::new()
    };

    // A failed node always carries a failure message, even if the finish
    // event reported no failure records.
    let failure_message = match (outcome.is_failed(), failure_message) {
        (true, None) => Some(UNKNOWN_FAILURE.to_owned()),
        (true, message) => message,
        (false, _) => None,
    };

    let mut children: Vec<TestNode> = child_cells
        .iter()
        .map(|child| freeze(child, include_output_for_passed, max_output_lines, stats))
        .collect();
    children.sort_by(|a, b| a.display_name.cmp(&b.display_name));

    TestNode {
        display_name,
        kind,
        outcome,
        failure_message,
        output_lines,
        children,
    }
}
