// Copyright (c) The canopy Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by canopy.

use crate::events::HandleId;
use canopy_metadata::TestOutcome;
use thiserror::Error;

/// An error that occurred while connecting to or invoking the external
/// build process.
///
/// This is the only error [`run_aggregation`](crate::run_aggregation)
/// propagates: callers get either a well-formed tree or this, never a
/// partial tree.
#[derive(Clone, Debug, Error)]
#[error("build invocation failed: {message}")]
pub struct BuildInvocationError {
    /// Human-readable cause summary.
    pub message: String,

    /// Optional diagnostic detail, e.g. the connector's own report.
    pub detail: Option<String>,
}

impl BuildInvocationError {
    /// Creates an error with a message and no detail.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            detail: None,
        }
    }

    /// Attaches diagnostic detail.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// An error while processing a single event.
///
/// These are logged and discarded by the aggregator: one malformed event
/// must never lose the rest of the tree.
#[derive(Clone, Debug, Error)]
pub enum EventError {
    /// A finish event carried a non-terminal outcome.
    #[error("finish event for {handle} carried non-terminal outcome `{outcome}`")]
    NonTerminalFinish {
        /// The offending handle.
        handle: HandleId,
        /// The outcome the event carried.
        outcome: TestOutcome,
    },

    /// A finish event arrived for a node whose outcome was already
    /// recorded.
    #[error("outcome for {handle} already recorded as `{existing}`, ignoring `{incoming}`")]
    OutcomeAlreadyRecorded {
        /// The offending handle.
        handle: HandleId,
        /// The outcome recorded earlier.
        existing: TestOutcome,
        /// The outcome the duplicate event carried.
        incoming: TestOutcome,
    },
}
