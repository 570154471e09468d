// Copyright (c) The canopy Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test lifecycle events and the build-side boundary.
//!
//! Events are produced by a [`BuildEventSource`] during one synchronous
//! build invocation and consumed by an [`Aggregator`](crate::Aggregator).
//! The source may deliver events from multiple worker threads at once; the
//! only ordering guarantee is that a handle's own start event is delivered
//! before its own finish event.

use crate::errors::BuildInvocationError;
use canopy_metadata::{NodeKind, TestOutcome};
use std::{fmt, sync::Arc};

/// Identity of one operation instance in the event stream.
///
/// Used as a map key and for nothing else.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct HandleId(u64);

impl HandleId {
    /// Creates a handle id from the raw value assigned by the event source.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw id.
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

/// An opaque identifier for one event-producing operation instance.
///
/// Handles are compared by [`HandleId`] and expose a non-owning view of
/// their parent, used only for upward lookups while attributing output.
/// The handle graph delivered by the event source is assumed acyclic;
/// failure cause chains are a different graph and get an explicit cycle
/// guard instead (see [`crate::failures::significant_cause`]).
#[derive(Clone, Debug)]
pub struct EventHandle {
    id: HandleId,
    parent: Option<Arc<EventHandle>>,
}

impl EventHandle {
    /// Creates a handle with no parent.
    pub fn root(id: HandleId) -> Arc<Self> {
        Arc::new(Self { id, parent: None })
    }

    /// Creates a handle nested under `parent`.
    pub fn child_of(id: HandleId, parent: &Arc<EventHandle>) -> Arc<Self> {
        Arc::new(Self {
            id,
            parent: Some(Arc::clone(parent)),
        })
    }

    /// Returns this handle's id.
    pub fn id(&self) -> HandleId {
        self.id
    }

    /// Returns this handle's parent, if it has one.
    pub fn parent(&self) -> Option<&Arc<EventHandle>> {
        self.parent.as_ref()
    }

    /// Iterates over this handle's ancestors, nearest first.
    pub fn ancestors(&self) -> Ancestors<'_> {
        Ancestors {
            next: self.parent.as_ref(),
        }
    }
}

/// Iterator over a handle's ancestors, nearest first.
///
/// Returned by [`EventHandle::ancestors`].
#[derive(Clone, Debug)]
pub struct Ancestors<'a> {
    next: Option<&'a Arc<EventHandle>>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a Arc<EventHandle>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.parent.as_ref();
        Some(current)
    }
}

/// How much of an execution unit an operation represents, as reported by
/// the event source.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum TestGranularity {
    /// A single, non-divisible execution unit.
    Atomic,

    /// An operation that groups other operations.
    Composite,

    /// The event source did not say.
    #[default]
    Unknown,
}

/// Metadata attached to a start event, consumed exactly once to classify
/// the new node.
#[derive(Clone, Debug, Default)]
pub struct OperationMetadata {
    /// Whether the operation is atomic or composite.
    pub granularity: TestGranularity,

    /// The suite name, if the event source reported one.
    pub suite_name: Option<String>,

    /// The class name, if the operation has class identity.
    pub class_name: Option<String>,

    /// The method name, if the operation has method identity.
    pub method_name: Option<String>,
}

impl OperationMetadata {
    /// Classifies the operation this metadata describes.
    ///
    /// Atomic operations are tests. Composite operations with class
    /// identity but no method identity are classes. Everything else,
    /// including ambiguous metadata, is a suite.
    pub fn infer_kind(&self) -> NodeKind {
        match self.granularity {
            TestGranularity::Atomic => NodeKind::Test,
            TestGranularity::Composite | TestGranularity::Unknown => {
                if self.class_name.is_some() && self.method_name.is_none() {
                    NodeKind::Class
                } else {
                    NodeKind::Suite
                }
            }
        }
    }
}

/// The stream a captured output line was written to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OutputStream {
    /// Standard output.
    Stdout,

    /// Standard error.
    Stderr,
}

impl OutputStream {
    /// Returns the tag prepended to each line from this stream.
    pub fn tag(self) -> &'static str {
        match self {
            OutputStream::Stdout => "[stdout]",
            OutputStream::Stderr => "[stderr]",
        }
    }
}

/// One failure reported for a finished operation.
///
/// A single test may report several of these, e.g. an assertion failure
/// plus an exception thrown during cleanup.
#[derive(Clone, Debug, Default)]
pub struct FailureRecord {
    /// Short summary, usually a single line.
    pub message: Option<String>,

    /// Longer description, often a stack trace or a comparison dump.
    pub description: Option<String>,
}

impl FailureRecord {
    /// Creates a record with only a message.
    pub fn from_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            description: None,
        }
    }
}

/// A test lifecycle event.
#[derive(Clone, Debug)]
pub enum TestEvent {
    /// An operation started.
    Started {
        /// The operation's handle.
        handle: Arc<EventHandle>,

        /// Human-readable label for the operation.
        display_name: String,

        /// Classification metadata, consumed at node construction.
        metadata: OperationMetadata,
    },

    /// An operation finished.
    Finished {
        /// The operation's handle.
        handle: Arc<EventHandle>,

        /// The reported outcome. Terminal outcomes only; a finish event
        /// carrying [`TestOutcome::Unknown`] is malformed and is dropped.
        outcome: TestOutcome,

        /// The failures reported for the operation, possibly empty.
        failures: Vec<FailureRecord>,
    },

    /// An operation produced output.
    ///
    /// The handle is never an atomic test itself; it is nested somewhere
    /// below one.
    Output {
        /// The producing operation's handle.
        handle: Arc<EventHandle>,

        /// Which stream the text was written to.
        stream: OutputStream,

        /// The raw captured text, possibly spanning multiple lines.
        text: String,
    },
}

/// One frame of a [`FailureChain`].
#[derive(Clone, Debug)]
pub struct FailureFrame {
    /// The failure's type name, as reported over the wire.
    pub type_name: String,

    /// The failure's message, if it had one.
    pub message: Option<String>,

    /// Index of the frame this one was caused by.
    pub cause: Option<usize>,
}

impl FailureFrame {
    /// Creates a frame with no cause link.
    pub fn new(type_name: impl Into<String>, message: Option<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message,
            cause: None,
        }
    }
}

/// The cause chain delivered with a failed build.
///
/// Frames reference their cause by index into the chain, which keeps
/// wire-delivered aliases — and, defensively, cycles — representable.
/// Frame 0 is the failure the build invocation itself reported.
#[derive(Clone, Debug, Default)]
pub struct FailureChain {
    frames: Vec<FailureFrame>,
}

impl FailureChain {
    /// Creates a chain holding a single frame.
    pub fn single(type_name: impl Into<String>, message: Option<String>) -> Self {
        Self {
            frames: vec![FailureFrame::new(type_name, message)],
        }
    }

    /// Appends a frame and returns its index.
    pub fn push(&mut self, frame: FailureFrame) -> usize {
        self.frames.push(frame);
        self.frames.len() - 1
    }

    /// Returns the frame at `index`, if it exists.
    pub fn frame(&self, index: usize) -> Option<&FailureFrame> {
        self.frames.get(index)
    }

    /// Returns the entry frame the build reported, if any.
    pub fn entry(&self) -> Option<&FailureFrame> {
        self.frames.first()
    }

    /// Returns true if the chain has no frames.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// The overall result of one build invocation, available only after the
/// event source returns.
#[derive(Clone, Debug)]
pub struct BuildOutcome {
    /// Whether the build as a whole succeeded.
    pub success: bool,

    /// The triggering failure chain, when the build failed.
    pub failure: Option<FailureChain>,
}

impl BuildOutcome {
    /// A successful build.
    pub fn succeeded() -> Self {
        Self {
            success: true,
            failure: None,
        }
    }

    /// A failed build with the given cause chain.
    pub fn failed(failure: FailureChain) -> Self {
        Self {
            success: false,
            failure: Some(failure),
        }
    }
}

/// Consumer half of the event stream.
///
/// Implemented by [`Aggregator`](crate::Aggregator). Implementations must
/// tolerate concurrent invocation from arbitrary threads; errors while
/// processing an individual event are handled internally and never
/// propagate back to the producer.
pub trait EventConsumer: Sync {
    /// Handles one event.
    fn handle_event(&self, event: TestEvent);
}

/// One synchronous build invocation that delivers test events.
///
/// This is the boundary to the external build-execution collaborator.
/// Implementations run the build to completion, pushing events into the
/// consumer as they are observed — potentially from multiple worker
/// threads concurrently — and report the overall outcome afterwards.
pub trait BuildEventSource {
    /// Runs the build, delivering events to `consumer`.
    ///
    /// An `Err` means the build process could not be invoked or died
    /// underneath us; events already delivered are discarded by the
    /// caller.
    fn run(&self, consumer: &dyn EventConsumer) -> Result<BuildOutcome, BuildInvocationError>;
}
