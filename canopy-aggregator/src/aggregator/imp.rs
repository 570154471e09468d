// Copyright (c) The canopy Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The aggregator itself: event consumption, finalization, and note
//! generation.

use super::{
    output::OutputAssociator,
    registry::{FinalizeStats, NodeRegistry},
};
use crate::{
    errors::{BuildInvocationError, EventError},
    events::{BuildEventSource, BuildOutcome, EventConsumer, TestEvent},
    failures::{format_primary_failure, significant_cause},
};
use canopy_metadata::{AggregatedRun, NodeKind};
use debug_ignore::DebugIgnore;
use swrite::{SWrite, swrite};
use tracing::{debug, warn};

/// Default per-test cap on retained output lines.
pub const DEFAULT_OUTPUT_LINE_LIMIT: usize = 100;

/// Options for one aggregation run.
#[derive(Clone, Debug)]
pub struct AggregateOptions {
    /// Retain output for passing tests too, not only failing ones.
    pub include_output_for_passed: bool,

    /// Per-test cap on retained output lines; 0 disables truncation.
    pub max_output_lines: usize,

    /// Test-selection filters the caller asked the build to apply.
    ///
    /// Used only for note generation; the filtering itself happens inside
    /// the build invocation.
    pub selection_filters: Vec<String>,

    /// True if general-purpose noisy arguments were stripped from the
    /// invocation. Used only for note generation.
    pub noisy_args_stripped: bool,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self {
            include_output_for_passed: false,
            max_output_lines: DEFAULT_OUTPUT_LINE_LIMIT,
            selection_filters: Vec::new(),
            noisy_args_stripped: false,
        }
    }
}

/// Consumes one build's test event stream and reconstructs the result
/// tree.
///
/// While the build runs, the aggregator is a shared [`EventConsumer`]:
/// producer threads feed it events in any order across distinct handles,
/// and errors on individual events are logged and dropped without
/// disturbing the rest of the stream. Once the build invocation returns,
/// [`finalize`](Self::finalize) consumes the aggregator on a single
/// thread and emits the sorted, immutable [`AggregatedRun`].
#[derive(Debug)]
pub struct Aggregator {
    options: AggregateOptions,
    registry: DebugIgnore<NodeRegistry>,
    associator: DebugIgnore<OutputAssociator>,
}

impl Aggregator {
    /// Creates an aggregator for one run.
    pub fn new(options: AggregateOptions) -> Self {
        Self {
            options,
            registry: DebugIgnore(NodeRegistry::new()),
            associator: DebugIgnore(OutputAssociator::new()),
        }
    }

    fn process_event(&self, event: TestEvent) -> Result<(), EventError> {
        match event {
            TestEvent::Started {
                handle,
                display_name,
                metadata,
            } => {
                self.registry.on_start(&handle, &display_name, &metadata);
                Ok(())
            }
            TestEvent::Finished {
                handle,
                outcome,
                failures,
            } => {
                let failure_message = outcome
                    .is_failed()
                    .then(|| format_primary_failure(&failures));
                let node = self.registry.on_finish(&handle, outcome, failure_message)?;
                if node.kind() == NodeKind::Test {
                    // The test is done; its buffer moves onto the node and
                    // is destroyed.
                    node.append_raw_output(self.associator.drain(handle.id()));
                }
                Ok(())
            }
            TestEvent::Output {
                handle,
                stream,
                text,
            } => {
                self.associator
                    .on_output(&self.registry, &handle, stream, &text);
                Ok(())
            }
        }
    }

    /// Finalizes the run against the build's overall outcome.
    ///
    /// Must be called only after the build invocation has returned, with
    /// no producer threads remaining.
    pub fn finalize(self, outcome: BuildOutcome) -> AggregatedRun {
        debug!("event stream complete, finalizing");
        let Self {
            options,
            registry: DebugIgnore(registry),
            associator: DebugIgnore(associator),
        } = self;

        // Buffers that never saw their test's finish event, or output
        // that arrived after it, still belong on the node.
        for (id, lines) in associator.drain_all() {
            if let Some(node) = registry.get(id) {
                node.append_raw_output(lines);
            }
        }

        let mut stats = FinalizeStats::default();
        let root_nodes = registry.finalize(
            options.include_output_for_passed,
            options.max_output_lines,
            &mut stats,
        );
        let notes = build_notes(&options, &stats, &outcome);

        AggregatedRun {
            root_nodes,
            overall_success: outcome.success,
            notes,
        }
    }
}

impl EventConsumer for Aggregator {
    fn handle_event(&self, event: TestEvent) {
        if let Err(error) = self.process_event(event) {
            // One malformed event must not lose the rest of the tree.
            warn!(%error, "discarding test event");
        }
    }
}

/// Runs one build invocation and aggregates its test events.
///
/// A failure to invoke the build propagates as
/// [`BuildInvocationError`] with no tree attached; events that were
/// already delivered are discarded. Everything else — including a build
/// that ran and failed — produces a well-formed [`AggregatedRun`].
pub fn run_aggregation(
    source: &dyn BuildEventSource,
    options: AggregateOptions,
) -> Result<AggregatedRun, BuildInvocationError> {
    let aggregator = Aggregator::new(options);
    let outcome = source.run(&aggregator)?;
    Ok(aggregator.finalize(outcome))
}

fn build_notes(
    options: &AggregateOptions,
    stats: &FinalizeStats,
    outcome: &BuildOutcome,
) -> String {
    let mut lines: Vec<String> = Vec::new();

    if options.noisy_args_stripped {
        lines.push("general-purpose build arguments were stripped from the invocation".to_owned());
    }
    if !options.selection_filters.is_empty() {
        lines.push(format!(
            "test selection filters requested: {}",
            options.selection_filters.join(", ")
        ));
    }
    lines.push(
        if options.include_output_for_passed {
            "output retained for passed and failed tests"
        } else {
            "output retained only for failed tests"
        }
        .to_owned(),
    );
    lines.push(match options.max_output_lines {
        0 => "per-test output is unlimited".to_owned(),
        limit => format!("per-test output limited to {limit} lines"),
    });
    if !stats.matched_noise.is_empty() {
        let mut line = "noise filters applied: ".to_owned();
        for (i, category) in stats.matched_noise.iter().enumerate() {
            if i > 0 {
                swrite!(line, ", ");
            }
            swrite!(line, "{category}");
        }
        lines.push(line);
    }

    let mut summary = format!(
        "tests: {} passed, {} failed, {} skipped",
        stats.passed, stats.failed, stats.skipped
    );
    if stats.unresolved > 0 {
        swrite!(summary, "; {} nodes never finished", stats.unresolved);
    }
    lines.push(summary);

    if !outcome.success {
        match outcome.failure.as_ref().and_then(significant_cause) {
            Some(cause) => {
                let mut line = format!("build failed: {}", cause.type_name);
                if let Some(message) = &cause.message {
                    swrite!(line, ": {message}");
                }
                lines.push(line);
            }
            None => lines.push("build failed with no reported cause".to_owned()),
        }
        if !stats.any_failed_node {
            lines.push(
                "inconsistent state: the build reported failure but no node in the tree failed"
                    .to_owned(),
            );
        }
    } else if stats.any_failed_node {
        lines.push(
            "inconsistent state: the build reported success but the tree contains failed nodes"
                .to_owned(),
        );
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::FailureChain;
    use indexmap::IndexSet;

    fn stats() -> FinalizeStats {
        FinalizeStats {
            passed: 2,
            failed: 1,
            skipped: 0,
            unresolved: 0,
            any_failed_node: true,
            matched_noise: IndexSet::from(["blank lines", "task progress"]),
        }
    }

    #[test]
    fn notes_cover_policy_and_failure() {
        let options = AggregateOptions {
            noisy_args_stripped: true,
            selection_filters: vec!["com.example.*".to_owned()],
            ..AggregateOptions::default()
        };
        let outcome = BuildOutcome::failed(FailureChain::single(
            "org.gradle.api.tasks.VerificationException",
            Some("There were failing tests.".to_owned()),
        ));

        let notes = build_notes(&options, &stats(), &outcome);
        let lines: Vec<_> = notes.lines().collect();
        assert_eq!(
            lines,
            [
                "general-purpose build arguments were stripped from the invocation",
                "test selection filters requested: com.example.*",
                "output retained only for failed tests",
                "per-test output limited to 100 lines",
                "noise filters applied: blank lines, task progress",
                "tests: 2 passed, 1 failed, 0 skipped",
                "build failed: org.gradle.api.tasks.VerificationException: There were failing tests.",
            ],
        );
    }

    #[test]
    fn notes_flag_inconsistency_in_both_directions() {
        let mut quiet = stats();
        quiet.any_failed_node = false;
        quiet.failed = 0;
        let failed_build = BuildOutcome::failed(FailureChain::single(
            "org.gradle.tooling.BuildException",
            None,
        ));
        let notes = build_notes(&AggregateOptions::default(), &quiet, &failed_build);
        assert!(notes.contains(
            "inconsistent state: the build reported failure but no node in the tree failed"
        ));

        let notes = build_notes(&AggregateOptions::default(), &stats(), &BuildOutcome::succeeded());
        assert!(notes.contains(
            "inconsistent state: the build reported success but the tree contains failed nodes"
        ));
    }

    #[test]
    fn unlimited_output_is_reported() {
        let options = AggregateOptions {
            max_output_lines: 0,
            ..AggregateOptions::default()
        };
        let notes = build_notes(&options, &stats(), &BuildOutcome::succeeded());
        assert!(notes.contains("per-test output is unlimited"));
    }
}
