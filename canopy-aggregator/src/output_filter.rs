// Copyright (c) The canopy Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Noise filtering and head/tail truncation for captured output.
//!
//! Both passes run at finalize time, after a test's output has been fully
//! assembled: filtering first, so truncation operates on the surviving
//! line count.

/// A category of noise, used for diagnostics in the run notes.
pub type NoiseCategory = &'static str;

/// One rule of the noise filter.
struct NoiseRule {
    category: NoiseCategory,
    matcher: Matcher,
}

enum Matcher {
    /// The line has no content besides its stream tag.
    Blank,
    /// The line's content starts with the pattern.
    Prefix(&'static str),
    /// The line's content contains the pattern.
    Contains(&'static str),
}

/// The fixed rule set, in match order.
///
/// Patterns are matched against the line content after the stream tag, so
/// a rule applies to both stdout and stderr lines.
const NOISE_RULES: &[NoiseRule] = &[
    NoiseRule {
        category: "blank lines",
        matcher: Matcher::Blank,
    },
    NoiseRule {
        category: "task progress",
        matcher: Matcher::Prefix("> Task :"),
    },
    NoiseRule {
        category: "cache statistics",
        matcher: Matcher::Contains("actionable task"),
    },
    NoiseRule {
        category: "cache statistics",
        matcher: Matcher::Prefix("Reusing configuration cache"),
    },
    NoiseRule {
        category: "JVM option pickup",
        matcher: Matcher::Prefix("Picked up JAVA_TOOL_OPTIONS"),
    },
    NoiseRule {
        category: "JVM option pickup",
        matcher: Matcher::Prefix("Picked up _JAVA_OPTIONS"),
    },
    NoiseRule {
        category: "logger configuration",
        matcher: Matcher::Prefix("SLF4J:"),
    },
    NoiseRule {
        category: "dependency downloads",
        matcher: Matcher::Prefix("Download "),
    },
];

/// Strips the stream tag from a buffered line, leaving its content.
fn content_of(line: &str) -> &str {
    for tag in ["[stdout]", "[stderr]"] {
        if let Some(rest) = line.strip_prefix(tag) {
            return rest.strip_prefix(' ').unwrap_or(rest);
        }
    }
    line
}

impl NoiseRule {
    fn matches(&self, line: &str) -> bool {
        let content = content_of(line);
        match self.matcher {
            Matcher::Blank => content.trim().is_empty(),
            Matcher::Prefix(pattern) => content.starts_with(pattern),
            Matcher::Contains(pattern) => content.contains(pattern),
        }
    }
}

/// The result of one filtering pass.
#[derive(Clone, Debug, Default)]
pub struct FilterOutcome {
    /// Lines that survived, in their original order.
    pub lines: Vec<String>,

    /// Categories of the rules that matched at least one line, in rule
    /// order, deduplicated.
    pub matched: Vec<NoiseCategory>,
}

/// Drops known-noise lines from a fully assembled output buffer.
///
/// Non-matching lines pass through unchanged, in original order.
pub fn apply_noise_filter(lines: Vec<String>) -> FilterOutcome {
    let mut outcome = FilterOutcome::default();
    for line in lines {
        match NOISE_RULES.iter().find(|rule| rule.matches(&line)) {
            Some(rule) => {
                if !outcome.matched.contains(&rule.category) {
                    outcome.matched.push(rule.category);
                }
            }
            None => outcome.lines.push(line),
        }
    }
    outcome
}

fn truncation_marker(omitted: usize) -> String {
    format!("... ({omitted} lines truncated) ...")
}

/// Bounds `lines` to a maximum count, preserving head and tail.
///
/// A `limit` of 0 disables truncation. When truncation applies with
/// `limit > 1`, the result holds the first `limit / 2` lines, a marker
/// stating how many lines were omitted, then the last `limit - limit / 2`
/// lines — `limit + 1` elements in total. A `limit` of 1 collapses the
/// whole sequence into a single marker line.
pub fn truncate_lines(lines: Vec<String>, limit: usize) -> Vec<String> {
    if limit == 0 || lines.len() <= limit {
        return lines;
    }
    if limit == 1 {
        return vec![truncation_marker(lines.len())];
    }

    let head = limit / 2;
    let tail = limit - head;
    let omitted = lines.len() - head - tail;

    let mut truncated = Vec::with_capacity(limit + 1);
    truncated.extend_from_slice(&lines[..head]);
    truncated.push(truncation_marker(omitted));
    truncated.extend_from_slice(&lines[lines.len() - tail..]);
    truncated
}
