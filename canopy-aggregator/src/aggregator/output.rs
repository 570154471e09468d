// Copyright (c) The canopy Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Buffering of raw output lines per in-flight atomic test.
//!
//! Output events arrive against handles nested somewhere below the test
//! that produced them — a JVM, a framework wrapper, an output-capture
//! operation. The associator resolves each event to its nearest enclosing
//! registered atomic test and buffers the raw stream-tagged lines there.
//! Filtering and truncation wait until finalize time, so noise rules see
//! the fully assembled buffer and truncation operates on the final count.

use super::registry::{NodeRegistry, ShardedMap};
use crate::events::{EventHandle, HandleId, OutputStream};
use canopy_metadata::NodeKind;
use std::{
    mem,
    sync::{Arc, Mutex, PoisonError},
};
use tracing::trace;

pub(super) struct OutputAssociator {
    buffers: ShardedMap<Arc<Mutex<Vec<String>>>>,
}

impl OutputAssociator {
    pub(super) fn new() -> Self {
        Self {
            buffers: ShardedMap::new(),
        }
    }

    /// Attributes `text` to the nearest enclosing atomic test and buffers
    /// it, one stream-tagged line per raw line.
    ///
    /// Output with no registered test ancestor is dropped; that is not an
    /// error, just untraceable build-level chatter.
    pub(super) fn on_output(
        &self,
        registry: &NodeRegistry,
        handle: &EventHandle,
        stream: OutputStream,
        text: &str,
    ) {
        let Some(test_id) = nearest_test(registry, handle) else {
            trace!(handle = %handle.id(), "dropping output with no enclosing test");
            return;
        };
        let (buffer, _) = self
            .buffers
            .get_or_insert_with(test_id, || Arc::new(Mutex::new(Vec::new())));
        let mut buffer = buffer.lock().unwrap_or_else(PoisonError::into_inner);
        for line in text.lines() {
            buffer.push(format!("{} {line}", stream.tag()));
        }
    }

    /// Removes and returns the buffer for a finished test.
    pub(super) fn drain(&self, id: HandleId) -> Vec<String> {
        self.buffers
            .remove(id)
            .map(|buffer| mem::take(&mut *buffer.lock().unwrap_or_else(PoisonError::into_inner)))
            .unwrap_or_default()
    }

    /// Drains every remaining buffer: tests whose finish event never
    /// arrived, or output delivered after it. Call only at finalize time.
    pub(super) fn drain_all(&self) -> Vec<(HandleId, Vec<String>)> {
        self.buffers
            .drain()
            .into_iter()
            .map(|(id, buffer)| {
                let lines =
                    mem::take(&mut *buffer.lock().unwrap_or_else(PoisonError::into_inner));
                (id, lines)
            })
            .collect()
    }
}

/// Walks `handle.parent` upward to the nearest registered `Test`-kind
/// node. The output handle itself is never a test handle.
fn nearest_test(registry: &NodeRegistry, handle: &EventHandle) -> Option<HandleId> {
    handle
        .ancestors()
        .map(|ancestor| ancestor.id())
        .find(|id| registry.get(*id).is_some_and(|node| node.kind() == NodeKind::Test))
}
