// Copyright (c) The canopy Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core aggregation logic for canopy.
//!
//! This crate consumes the unordered, concurrently delivered stream of
//! test lifecycle events produced by one build invocation and
//! reconstructs a deterministic, filtered, size-bounded result tree
//! (suite → class → test) suitable for machine consumption. The result
//! types live in [`canopy_metadata`]; the build-side boundary is the
//! [`events::BuildEventSource`] trait.
//!
//! The usual entry point is [`run_aggregation`]:
//!
//! ```ignore
//! let run = run_aggregation(&connector, AggregateOptions::default())?;
//! for root in &run.root_nodes {
//!     println!("{}: {}", root.display_name, root.outcome);
//! }
//! ```

mod aggregator;
pub mod errors;
pub mod events;
pub mod failures;
pub mod output_filter;

pub use aggregator::{AggregateOptions, Aggregator, DEFAULT_OUTPUT_LINE_LIMIT, run_aggregation};
