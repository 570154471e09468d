// Copyright (c) The canopy Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Machine-readable result model for [canopy](https://crates.io/crates/canopy-aggregator).
//!
//! This crate defines the serializable test result tree produced by one
//! aggregation run: suites, classes and atomic tests, each with an outcome,
//! an optional failure message, and retained output lines. The types here
//! are the stable boundary consumed by transport layers; the logic that
//! builds them lives in `canopy-aggregator`.
//!
//! All orderings are deterministic: a node's children are sorted by display
//! name, as are the roots of the tree. Sibling nodes sharing a display name
//! keep their relative insertion order (the sort is stable); such trees are
//! not byte-reproducible across reorderings of the input events, which is a
//! known limitation of the event source's naming.

use serde::{Deserialize, Serialize};

/// The classification of a node in the result tree.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    /// A grouping node: a test task, a run, or any composite operation that
    /// is not a class.
    Suite,

    /// A test class: a composite operation with class identity but no
    /// method identity.
    Class,

    /// An atomic test: a single test method or case, not further divisible.
    Test,
}

impl NodeKind {
    /// Returns the kind as a static string, matching the serialized form.
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Suite => "suite",
            NodeKind::Class => "class",
            NodeKind::Test => "test",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The final outcome of one node.
///
/// Outcomes transition from [`Unknown`](Self::Unknown) to a terminal state
/// exactly once, when the node's finish event is processed. A node that is
/// still `Unknown` in a finalized tree never received its finish event.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestOutcome {
    /// No finish event has been processed for this node.
    #[default]
    Unknown,

    /// The node finished successfully.
    Passed,

    /// The node finished with one or more failures.
    Failed,

    /// The node was skipped.
    Skipped,
}

impl TestOutcome {
    /// Returns the outcome as a static string, matching the serialized form.
    pub fn as_str(self) -> &'static str {
        match self {
            TestOutcome::Unknown => "unknown",
            TestOutcome::Passed => "passed",
            TestOutcome::Failed => "failed",
            TestOutcome::Skipped => "skipped",
        }
    }

    /// Returns true if this outcome is terminal (a finish event was seen).
    pub fn is_terminal(self) -> bool {
        !matches!(self, TestOutcome::Unknown)
    }

    /// Returns true if this outcome is [`Failed`](Self::Failed).
    pub fn is_failed(self) -> bool {
        matches!(self, TestOutcome::Failed)
    }
}

impl std::fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One node of the aggregated result tree.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestNode {
    /// Human-readable label reported by the event source.
    ///
    /// Not guaranteed to be unique across siblings.
    pub display_name: String,

    /// The node's classification, decided once when the node was created.
    pub kind: NodeKind,

    /// The node's final outcome.
    pub outcome: TestOutcome,

    /// The primary failure, formatted for humans.
    ///
    /// Present if and only if `outcome` is [`TestOutcome::Failed`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,

    /// Retained output lines, stream-tagged, noise-filtered and truncated.
    ///
    /// Empty unless the retention policy applied to this node.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_lines: Vec<String>,

    /// Child nodes, sorted by display name.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TestNode>,
}

impl TestNode {
    /// Creates a new node with the given name and kind, outcome
    /// [`TestOutcome::Unknown`], and no children or output.
    pub fn new(display_name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            display_name: display_name.into(),
            kind,
            outcome: TestOutcome::Unknown,
            failure_message: None,
            output_lines: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Adds a child node.
    pub fn add_child(&mut self, child: TestNode) -> &mut Self {
        self.children.push(child);
        self
    }

    /// Iterates over this node and all of its descendants, depth-first.
    pub fn iter_tree(&self) -> impl Iterator<Item = &TestNode> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            stack.extend(node.children.iter().rev());
            Some(node)
        })
    }
}

/// The result of one aggregation run.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AggregatedRun {
    /// The entry points of the result tree, sorted by display name.
    pub root_nodes: Vec<TestNode>,

    /// Whether the build as a whole reported success.
    ///
    /// May disagree with the tree's own outcomes; disagreements are
    /// surfaced in `notes` rather than resolved.
    pub overall_success: bool,

    /// Free-text diagnostic summary for the run: applied filters, retention
    /// policy, truncation limit, and — on failure — the significant cause.
    pub notes: String,
}

impl AggregatedRun {
    /// Iterates over every node in the run, depth-first across all roots.
    pub fn iter_nodes(&self) -> impl Iterator<Item = &TestNode> {
        self.root_nodes.iter().flat_map(TestNode::iter_tree)
    }

    /// Counts the atomic test nodes with the given outcome.
    pub fn count_tests(&self, outcome: TestOutcome) -> usize {
        self.iter_nodes()
            .filter(|node| node.kind == NodeKind::Test && node.outcome == outcome)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case(NodeKind::Suite, "suite"; "suite")]
    #[test_case(NodeKind::Class, "class"; "class")]
    #[test_case(NodeKind::Test, "test"; "test")]
    fn node_kind_str(kind: NodeKind, expected: &str) {
        assert_eq!(kind.as_str(), expected);
        assert_eq!(
            serde_json::to_value(kind).unwrap(),
            serde_json::Value::String(expected.to_owned()),
        );
    }

    #[test]
    fn outcome_terminality() {
        assert!(!TestOutcome::Unknown.is_terminal());
        assert!(TestOutcome::Passed.is_terminal());
        assert!(TestOutcome::Failed.is_terminal());
        assert!(TestOutcome::Skipped.is_terminal());
        assert_eq!(TestOutcome::default(), TestOutcome::Unknown);
    }

    #[test]
    fn serialized_shape() {
        let mut root = TestNode::new("ExampleSuite", NodeKind::Suite);
        root.outcome = TestOutcome::Passed;
        let mut test = TestNode::new("shouldWork", NodeKind::Test);
        test.outcome = TestOutcome::Failed;
        test.failure_message = Some("assertion failed".to_owned());
        test.output_lines = vec!["[stdout] boom".to_owned()];
        root.add_child(test);

        let run = AggregatedRun {
            root_nodes: vec![root],
            overall_success: false,
            notes: "output retained only for failed tests".to_owned(),
        };

        // Optional fields are elided entirely, not serialized as null/[].
        let json = serde_json::to_value(&run).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "root-nodes": [{
                    "display-name": "ExampleSuite",
                    "kind": "suite",
                    "outcome": "passed",
                    "children": [{
                        "display-name": "shouldWork",
                        "kind": "test",
                        "outcome": "failed",
                        "failure-message": "assertion failed",
                        "output-lines": ["[stdout] boom"],
                    }],
                }],
                "overall-success": false,
                "notes": "output retained only for failed tests",
            }),
        );

        let roundtrip: AggregatedRun = serde_json::from_value(json).unwrap();
        assert_eq!(roundtrip, run);
    }

    #[test]
    fn tree_iteration_and_counts() {
        let mut root = TestNode::new("root", NodeKind::Suite);
        let mut class = TestNode::new("ClassA", NodeKind::Class);
        let mut passed = TestNode::new("a", NodeKind::Test);
        passed.outcome = TestOutcome::Passed;
        let mut failed = TestNode::new("b", NodeKind::Test);
        failed.outcome = TestOutcome::Failed;
        class.add_child(passed);
        class.add_child(failed);
        root.add_child(class);

        let run = AggregatedRun {
            root_nodes: vec![root],
            overall_success: false,
            notes: String::new(),
        };

        let names: Vec<_> = run.iter_nodes().map(|n| n.display_name.as_str()).collect();
        assert_eq!(names, ["root", "ClassA", "a", "b"]);
        assert_eq!(run.count_tests(TestOutcome::Passed), 1);
        assert_eq!(run.count_tests(TestOutcome::Failed), 1);
        assert_eq!(run.count_tests(TestOutcome::Skipped), 0);
    }
}
