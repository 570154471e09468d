// Copyright (c) The canopy Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Failure selection, formatting, and cause-chain resolution.
//!
//! A finished test can report several failures (an assertion plus, say, an
//! exception out of `@AfterEach`); [`format_primary_failure`] picks the
//! one worth showing. A failed build delivers a chain of wrapped causes;
//! [`significant_cause`] digs out the frame that actually explains it.

use crate::events::{FailureChain, FailureFrame, FailureRecord};
use aho_corasick::AhoCorasick;
use std::{collections::HashSet, sync::LazyLock};

/// Emitted when a test failed but reported no failure records.
pub const UNKNOWN_FAILURE: &str = "unknown failure reason";

/// Hard cap on a formatted failure message.
pub const MAX_FAILURE_MESSAGE_LEN: usize = 2048;

/// Description lines appended below the message before eliding the rest.
const MAX_DESCRIPTION_LINES: usize = 5;

/// Keywords that mark a failure record as the primary one. Matched
/// case-insensitively as substrings of the message or description.
const PRIMARY_KEYWORDS: &[&str] = &["assert", "comparison", "expected", "exception"];

static KEYWORD_MATCHER: LazyLock<AhoCorasick> = LazyLock::new(|| {
    AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(PRIMARY_KEYWORDS)
        .expect("keyword set is a valid pattern list")
});

fn mentions_keyword(record: &FailureRecord) -> bool {
    record
        .message
        .as_deref()
        .is_some_and(|text| KEYWORD_MATCHER.is_match(text))
        || record
            .description
            .as_deref()
            .is_some_and(|text| KEYWORD_MATCHER.is_match(text))
}

fn select_primary(records: &[FailureRecord]) -> Option<&FailureRecord> {
    records
        .iter()
        .find(|record| mentions_keyword(record))
        .or_else(|| records.first())
}

/// Returns the first non-blank trimmed line, and whether more non-blank
/// lines follow it.
fn leading_line(text: &str) -> (Option<&str>, bool) {
    let mut nonblank = text.lines().map(str::trim).filter(|line| !line.is_empty());
    let first = nonblank.next();
    (first, nonblank.next().is_some())
}

/// Selects and formats the primary failure for one finished test.
///
/// The chosen record's message contributes its first line, with an
/// ellipsis marker if the message was multi-line. If the description's
/// leading line is not already contained in the message, up to
/// [`MAX_DESCRIPTION_LINES`] non-blank description lines follow,
/// indented. The result is capped at [`MAX_FAILURE_MESSAGE_LEN`]
/// characters.
pub fn format_primary_failure(records: &[FailureRecord]) -> String {
    let Some(record) = select_primary(records) else {
        return UNKNOWN_FAILURE.to_owned();
    };

    let message = record.message.as_deref().unwrap_or("");
    let (message_line, message_has_more) = leading_line(message);

    let mut formatted = match message_line {
        Some(line) => {
            let mut out = line.to_owned();
            if message_has_more {
                out.push_str("...");
            }
            out
        }
        // No usable message: lead with the description's first line so the
        // caller still gets something meaningful.
        None => match record.description.as_deref().and_then(|d| leading_line(d).0) {
            Some(line) => line.to_owned(),
            None => return UNKNOWN_FAILURE.to_owned(),
        },
    };

    if let Some(description) = record.description.as_deref() {
        let adds_information = leading_line(description)
            .0
            .is_some_and(|prefix| !formatted.contains(prefix) && !message.contains(prefix));
        if adds_information {
            let mut appended = 0;
            let mut elided = false;
            for line in description.lines().map(str::trim).filter(|l| !l.is_empty()) {
                if appended == MAX_DESCRIPTION_LINES {
                    elided = true;
                    break;
                }
                formatted.push_str("\n    ");
                formatted.push_str(line);
                appended += 1;
            }
            if elided {
                formatted.push_str("\n    ...");
            }
        }
    }

    cap_length(&mut formatted);
    formatted
}

fn cap_length(text: &mut String) {
    if text.len() > MAX_FAILURE_MESSAGE_LEN {
        let mut end = MAX_FAILURE_MESSAGE_LEN;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
}

/// Cause-chain frames deeper than this are not examined.
const MAX_CAUSE_DEPTH: usize = 20;

/// Type names that explain a build failure on their own. Finding one of
/// these ends the walk immediately.
const SIGNIFICANT_TYPES: &[&str] = &[
    "org.gradle.api.tasks.VerificationException",
    "org.gradle.api.internal.tasks.testing.TestSuiteExecutionException",
    "org.gradle.api.internal.tasks.compile.CompilationFailedException",
    "org.gradle.process.internal.ExecException",
];

/// Wrapper types that never explain anything by themselves.
const WRAPPER_TYPES: &[&str] = &[
    "org.gradle.tooling.BuildException",
    "org.gradle.tooling.GradleConnectionException",
    "org.gradle.api.tasks.TaskExecutionException",
    "org.gradle.internal.exceptions.LocationAwareException",
    "org.gradle.api.GradleException",
    "java.lang.RuntimeException",
];

/// Walks a failure chain to its most informative frame.
///
/// The walk follows cause links from the entry frame, stopping at the
/// first frame whose type is known-significant. Frames that are at least
/// not known wrappers are kept as the best answer so far while the walk
/// continues, since a more specific cause may be nested deeper. The walk
/// is bounded: a revisited frame (cycle) or a chain deeper than
/// [`MAX_CAUSE_DEPTH`] ends it with the best answer so far, and a chain
/// made of nothing but wrappers falls back to the entry frame.
pub fn significant_cause(chain: &FailureChain) -> Option<&FailureFrame> {
    let entry = chain.entry()?;
    let mut best: Option<&FailureFrame> = None;
    let mut visited = HashSet::new();
    let mut index = 0;

    for _ in 0..=MAX_CAUSE_DEPTH {
        if !visited.insert(index) {
            // Cycle in the wire-delivered chain; never loop.
            break;
        }
        let Some(frame) = chain.frame(index) else {
            // Dangling cause index.
            break;
        };
        let type_name = frame.type_name.as_str();
        if SIGNIFICANT_TYPES.contains(&type_name) {
            return Some(frame);
        }
        if !WRAPPER_TYPES.contains(&type_name) {
            best = Some(frame);
        }
        match frame.cause {
            Some(cause) => index = cause,
            None => break,
        }
    }

    best.or(Some(entry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn record(message: Option<&str>, description: Option<&str>) -> FailureRecord {
        FailureRecord {
            message: message.map(str::to_owned),
            description: description.map(str::to_owned),
        }
    }

    #[test]
    fn empty_set_yields_sentinel() {
        assert_eq!(format_primary_failure(&[]), UNKNOWN_FAILURE);
        assert_eq!(format_primary_failure(&[record(None, None)]), UNKNOWN_FAILURE);
    }

    #[test]
    fn keyword_record_beats_first_record() {
        let records = [
            record(Some("test framework exited abnormally"), None),
            record(Some("expected: <3> but was: <4>"), None),
        ];
        assert_eq!(format_primary_failure(&records), "expected: <3> but was: <4>");
    }

    #[test]
    fn falls_back_to_first_record_without_keywords() {
        let records = [
            record(Some("something odd happened"), None),
            record(Some("also odd"), None),
        ];
        assert_eq!(format_primary_failure(&records), "something odd happened");
    }

    #[test]
    fn keyword_match_is_case_insensitive_and_checks_description() {
        let records = [
            record(Some("cleanup issue"), None),
            record(Some("primary"), Some("java.lang.AssertionError: boom")),
        ];
        assert_eq!(
            format_primary_failure(&records),
            "primary\n    java.lang.AssertionError: boom"
        );
    }

    #[test]
    fn multiline_message_keeps_first_line_with_ellipsis() {
        let records = [record(Some("assertion failed\nat Foo.java:12"), None)];
        assert_eq!(format_primary_failure(&records), "assertion failed...");
    }

    #[test]
    fn description_appended_when_it_adds_information() {
        let records = [record(
            Some("assertion failed"),
            Some("expected: <a>\nbut was: <b>\n\nat Foo.test(Foo.java:9)"),
        )];
        assert_eq!(
            format_primary_failure(&records),
            indoc! {"
                assertion failed
                    expected: <a>
                    but was: <b>
                    at Foo.test(Foo.java:9)"
            },
        );
    }

    #[test]
    fn description_skipped_when_contained_in_message() {
        let records = [record(
            Some("assertion failed: expected true"),
            Some("expected true"),
        )];
        assert_eq!(
            format_primary_failure(&records),
            "assertion failed: expected true"
        );
    }

    #[test]
    fn long_description_is_elided_after_five_lines() {
        let description = (1..=8)
            .map(|n| format!("frame {n}"))
            .collect::<Vec<_>>()
            .join("\n");
        let records = [record(Some("assertion failed"), Some(&description))];
        assert_eq!(
            format_primary_failure(&records),
            "assertion failed\n    frame 1\n    frame 2\n    frame 3\n    frame 4\n    frame 5\n    ...",
        );
    }

    #[test]
    fn formatted_failure_is_hard_capped() {
        let records = [record(Some(&"x".repeat(5000)), None)];
        let formatted = format_primary_failure(&records);
        assert_eq!(formatted.len(), MAX_FAILURE_MESSAGE_LEN);
    }

    fn chain_of(types: &[&str]) -> FailureChain {
        let mut chain = FailureChain::default();
        for (i, ty) in types.iter().enumerate() {
            let mut frame = FailureFrame::new(*ty, Some(format!("message {i}")));
            if i + 1 < types.len() {
                frame.cause = Some(i + 1);
            }
            chain.push(frame);
        }
        chain
    }

    #[test]
    fn significant_type_wins_over_deeper_frames() {
        let chain = chain_of(&[
            "org.gradle.tooling.BuildException",
            "org.gradle.api.tasks.VerificationException",
            "java.lang.AssertionError",
        ]);
        let cause = significant_cause(&chain).unwrap();
        assert_eq!(cause.type_name, "org.gradle.api.tasks.VerificationException");
    }

    #[test]
    fn deeper_non_wrapper_replaces_shallower_one() {
        let chain = chain_of(&[
            "org.gradle.tooling.BuildException",
            "java.lang.IllegalStateException",
            "java.lang.AssertionError",
        ]);
        let cause = significant_cause(&chain).unwrap();
        assert_eq!(cause.type_name, "java.lang.AssertionError");
    }

    #[test]
    fn all_wrappers_falls_back_to_entry() {
        let chain = chain_of(&[
            "org.gradle.tooling.BuildException",
            "org.gradle.api.tasks.TaskExecutionException",
            "java.lang.RuntimeException",
        ]);
        let cause = significant_cause(&chain).unwrap();
        assert_eq!(cause.type_name, "org.gradle.tooling.BuildException");
    }

    #[test]
    fn self_referential_chain_terminates() {
        // A frame naming itself as its own cause must not loop the walk.
        let mut chain = FailureChain::default();
        let mut frame =
            FailureFrame::new("org.gradle.tooling.BuildException", Some("looped".to_owned()));
        frame.cause = Some(0);
        chain.push(frame);

        let cause = significant_cause(&chain).unwrap();
        assert_eq!(cause.type_name, "org.gradle.tooling.BuildException");
    }

    #[test]
    fn two_frame_cycle_terminates_with_best_so_far() {
        let mut chain = FailureChain::default();
        let mut wrapper = FailureFrame::new("org.gradle.tooling.BuildException", None);
        wrapper.cause = Some(1);
        let mut inner = FailureFrame::new("java.lang.IllegalStateException", None);
        inner.cause = Some(0);
        chain.push(wrapper);
        chain.push(inner);

        let cause = significant_cause(&chain).unwrap();
        assert_eq!(cause.type_name, "java.lang.IllegalStateException");
    }

    #[test]
    fn depth_bound_stops_unbounded_chains() {
        let types: Vec<String> = (0..50)
            .map(|i| format!("com.example.Wrapper{i}"))
            .collect();
        let refs: Vec<&str> = types.iter().map(String::as_str).collect();
        let chain = chain_of(&refs);
        // Non-wrapper frames keep replacing the best answer until the depth
        // bound; the walk must stop within it.
        let cause = significant_cause(&chain).unwrap();
        assert_eq!(cause.type_name, format!("com.example.Wrapper{MAX_CAUSE_DEPTH}"));
    }

    #[test]
    fn empty_chain_has_no_cause() {
        assert!(significant_cause(&FailureChain::default()).is_none());
    }

    #[test]
    fn dangling_cause_index_stops_cleanly() {
        let mut chain = FailureChain::default();
        let mut frame = FailureFrame::new("java.lang.IllegalStateException", None);
        frame.cause = Some(7);
        chain.push(frame);
        let cause = significant_cause(&chain).unwrap();
        assert_eq!(cause.type_name, "java.lang.IllegalStateException");
    }
}
