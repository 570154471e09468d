// Copyright (c) The canopy Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hierarchical aggregation of test lifecycle events.
//!
//! The main structure in this module is [`Aggregator`]; most callers go
//! through [`run_aggregation`].

mod imp;
mod output;
mod registry;

pub use imp::{AggregateOptions, Aggregator, DEFAULT_OUTPUT_LINE_LIMIT, run_aggregation};
