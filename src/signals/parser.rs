//! Signal parsing from worker output.
//!
//! Recognition is by literal bracket marker: the candidate at the earliest
//! byte offset wins, so an output containing several markers parses
//! deterministically to the first one in reading order. Markers are
//! case-sensitive; an output with no recognized marker is `Ambiguous`.

use super::types::{Signal, SplitTask, WorkerDecision};
use regex::Regex;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    AlreadyComplete,
    Approved,
    Issues,
    MissingTests,
    Critical,
    BlockedWithReason,
    BlockedBare,
    Decision,
    Proceed,
    Escalate,
    Split,
    NoSplit,
    Suggestions,
    Polished,
}

/// Every recognized marker token. `[BLOCKED` and `[DECISION` have bracketed
/// payloads, so their tokens end at the colon.
const MARKER_TABLE: &[(&str, Marker)] = &[
    ("[ALREADY_COMPLETE]", Marker::AlreadyComplete),
    ("[APPROVED]", Marker::Approved),
    ("[ISSUES]", Marker::Issues),
    ("[MISSING_TESTS]", Marker::MissingTests),
    ("[CRITICAL]", Marker::Critical),
    ("[BLOCKED:", Marker::BlockedWithReason),
    ("[BLOCKED]", Marker::BlockedBare),
    ("[DECISION:", Marker::Decision),
    ("[PROCEED]", Marker::Proceed),
    ("[ESCALATE]", Marker::Escalate),
    ("[SPLIT]", Marker::Split),
    ("[NO_SPLIT]", Marker::NoSplit),
    ("[SUGGESTIONS]", Marker::Suggestions),
    ("[POLISHED]", Marker::Polished),
];

static BULLET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-*]|\d+[.)])\s*(?:\[[ xX!]\]\s*)?(.+)$").unwrap());

static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^#{1,6}\s+(.+)$").unwrap());

static DECISION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[DECISION:\s*([^\]]+)\]").unwrap());

/// Parse raw worker output into a `Signal`.
pub fn parse_signal(text: &str) -> Signal {
    let mut found: Option<(usize, &str, Marker)> = None;
    for &(token, marker) in MARKER_TABLE {
        if let Some(pos) = text.find(token)
            && found.is_none_or(|(best, _, _)| pos < best)
        {
            found = Some((pos, token, marker));
        }
    }

    let Some((pos, token, marker)) = found else {
        return Signal::Ambiguous(text.to_string());
    };
    let after = &text[pos + token.len()..];

    match marker {
        Marker::AlreadyComplete | Marker::Polished => Signal::AlreadyComplete,
        Marker::Approved => Signal::Approved,
        Marker::Issues => Signal::Issues(after.trim().to_string()),
        Marker::MissingTests => Signal::MissingTests(after.trim().to_string()),
        Marker::Critical => Signal::Critical(after.trim().to_string()),
        Marker::BlockedBare => Signal::Blocked(nonempty_or(after.trim(), "no reason given")),
        Marker::BlockedWithReason => match after.find(']') {
            Some(end) => Signal::Blocked(nonempty_or(after[..end].trim(), "no reason given")),
            None => Signal::Blocked(nonempty_or(after.trim(), "no reason given")),
        },
        Marker::Decision => match after.find(']') {
            Some(end) => Signal::Decision {
                topic: after[..end].trim().to_string(),
                detail: after[end + 1..].trim().to_string(),
            },
            None => Signal::Decision {
                topic: after.trim().to_string(),
                detail: String::new(),
            },
        },
        Marker::Proceed => Signal::ProceedWithPlan(after.trim().to_string()),
        Marker::Escalate => Signal::Escalate(after.trim().to_string()),
        Marker::Split => Signal::Split(parse_split_body(after)),
        Marker::NoSplit => Signal::NoSplit,
        Marker::Suggestions => {
            let (quick_wins, deferred) = parse_suggestions_body(after);
            Signal::Suggestions {
                quick_wins,
                deferred,
            }
        }
    }
}

fn nonempty_or(s: &str, fallback: &str) -> String {
    if s.is_empty() {
        fallback.to_string()
    } else {
        s.to_string()
    }
}

/// Extract subtasks from a split-check body.
///
/// Prefers a `## Subtasks` section when present; each bullet starts a subtask
/// and following plain lines are its description.
fn parse_split_body(body: &str) -> Vec<SplitTask> {
    let section = section_after_heading(body, "subtasks").unwrap_or(body);

    let mut tasks: Vec<SplitTask> = Vec::new();
    let mut description: Vec<String> = Vec::new();

    for line in section.lines() {
        if HEADING_RE.is_match(line) {
            continue;
        }
        if let Some(cap) = BULLET_RE.captures(line) {
            flush_description(&mut tasks, &mut description);
            tasks.push(SplitTask::new(cap[1].trim(), ""));
        } else if !line.trim().is_empty() && !tasks.is_empty() {
            description.push(line.trim().to_string());
        }
    }
    flush_description(&mut tasks, &mut description);
    tasks
}

fn flush_description(tasks: &mut [SplitTask], description: &mut Vec<String>) {
    if let Some(last) = tasks.last_mut()
        && !description.is_empty()
    {
        last.description = description.join("\n");
    }
    description.clear();
}

/// Split a suggestions body into quick wins and deferred items.
///
/// Bullets under a `Quick Wins` heading (or before any heading) are quick
/// wins; bullets under a `Deferred` heading are deferred. With no bullets at
/// all, the whole body is one quick win.
fn parse_suggestions_body(body: &str) -> (Vec<String>, Vec<String>) {
    #[derive(PartialEq)]
    enum Section {
        QuickWins,
        Deferred,
    }

    let mut section = Section::QuickWins;
    let mut quick_wins = Vec::new();
    let mut deferred = Vec::new();
    let mut saw_bullet = false;

    for line in body.lines() {
        if let Some(cap) = HEADING_RE.captures(line) {
            let title = cap[1].trim().to_lowercase();
            if title.starts_with("quick win") {
                section = Section::QuickWins;
            } else if title.starts_with("deferred") {
                section = Section::Deferred;
            }
            continue;
        }
        if let Some(cap) = BULLET_RE.captures(line) {
            saw_bullet = true;
            let item = cap[1].trim().to_string();
            match section {
                Section::QuickWins => quick_wins.push(item),
                Section::Deferred => deferred.push(item),
            }
        }
    }

    if !saw_bullet {
        let trimmed = body.trim();
        if !trimmed.is_empty() {
            quick_wins.push(trimmed.to_string());
        }
    }
    (quick_wins, deferred)
}

fn section_after_heading<'a>(body: &'a str, heading: &str) -> Option<&'a str> {
    let mut offset = 0;
    let mut start: Option<usize> = None;
    for line in body.lines() {
        let line_start = offset;
        offset += line.len() + 1;
        if let Some(cap) = HEADING_RE.captures(line) {
            if let Some(s) = start {
                // next heading ends the section
                return Some(&body[s..line_start]);
            }
            if cap[1].trim().to_lowercase().starts_with(heading) {
                start = Some(offset.min(body.len()));
            }
        }
    }
    start.map(|s| &body[s..])
}

/// Extract every `[DECISION: topic]` block from worker output.
///
/// Blocks carry optional `Decision:` / `Reasoning:` / `Alternatives:` fields;
/// a blank line ends the current field, and a block with no `Decision:` field
/// uses its first plain line as the decision.
pub fn extract_decisions(text: &str) -> Vec<WorkerDecision> {
    let matches: Vec<_> = DECISION_RE.captures_iter(text).collect();
    let mut decisions = Vec::with_capacity(matches.len());

    for (i, cap) in matches.iter().enumerate() {
        let topic = cap[1].trim().to_string();
        let block_start = cap.get(0).map(|m| m.end()).unwrap_or(0);
        let block_end = matches
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(text.len());
        decisions.push(parse_decision_block(topic, &text[block_start..block_end]));
    }
    decisions
}

fn parse_decision_block(topic: String, block: &str) -> WorkerDecision {
    #[derive(Clone, Copy, PartialEq)]
    enum Field {
        Decision,
        Reasoning,
        Alternatives,
    }

    let mut decision = String::new();
    let mut reasoning = String::new();
    let mut alternatives = String::new();
    let mut current: Option<Field> = None;

    for line in block.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            current = None;
            continue;
        }
        let (field, rest) = if let Some(rest) = strip_field_prefix(trimmed, "decision:") {
            (Some(Field::Decision), rest)
        } else if let Some(rest) = strip_field_prefix(trimmed, "reasoning:") {
            (Some(Field::Reasoning), rest)
        } else if let Some(rest) = strip_field_prefix(trimmed, "alternatives:") {
            (Some(Field::Alternatives), rest)
        } else {
            (None, trimmed)
        };

        match (field, current) {
            (Some(f), _) => {
                current = Some(f);
                append_field(
                    match f {
                        Field::Decision => &mut decision,
                        Field::Reasoning => &mut reasoning,
                        Field::Alternatives => &mut alternatives,
                    },
                    rest,
                );
            }
            (None, Some(f)) => append_field(
                match f {
                    Field::Decision => &mut decision,
                    Field::Reasoning => &mut reasoning,
                    Field::Alternatives => &mut alternatives,
                },
                rest,
            ),
            (None, None) => {
                if decision.is_empty() {
                    decision = rest.to_string();
                }
            }
        }
    }

    WorkerDecision {
        topic,
        decision,
        reasoning,
        alternatives,
    }
}

fn strip_field_prefix<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let head = line.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(line[prefix.len()..].trim())
    } else {
        None
    }
}

fn append_field(field: &mut String, text: &str) {
    if text.is_empty() {
        return;
    }
    if !field.is_empty() {
        field.push(' ');
    }
    field.push_str(text);
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================
    // parse_signal: basic markers
    // =========================================

    #[test]
    fn test_parse_approved() {
        let signal = parse_signal("[APPROVED]\nClean implementation, tests pass.");
        assert_eq!(signal, Signal::Approved);
    }

    #[test]
    fn test_parse_approved_with_preamble() {
        let signal = parse_signal("Review finished.\n\n[APPROVED]");
        assert_eq!(signal, Signal::Approved);
    }

    #[test]
    fn test_parse_already_complete() {
        let signal = parse_signal("[ALREADY_COMPLETE]\nThe endpoint exists since commit abc123.");
        assert_eq!(signal, Signal::AlreadyComplete);
    }

    #[test]
    fn test_parse_polished_maps_to_already_complete() {
        let signal = parse_signal("[POLISHED]\nNothing worth changing.");
        assert_eq!(signal, Signal::AlreadyComplete);
    }

    #[test]
    fn test_parse_issues_carries_details() {
        let signal = parse_signal("[ISSUES]\n1. Missing error handling in fetch()\n2. Typo");
        match signal {
            Signal::Issues(details) => {
                assert!(details.contains("Missing error handling"));
                assert!(details.contains("Typo"));
            }
            other => panic!("Expected Issues, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_missing_tests() {
        let signal = parse_signal("[MISSING_TESTS]\nNo coverage for the retry path.");
        match signal {
            Signal::MissingTests(details) => assert!(details.contains("retry path")),
            other => panic!("Expected MissingTests, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_critical() {
        let signal = parse_signal("[CRITICAL]\nSQL injection in the search handler.");
        match signal {
            Signal::Critical(details) => assert!(details.contains("SQL injection")),
            other => panic!("Expected Critical, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_blocked_with_reason() {
        let signal = parse_signal("[BLOCKED: missing credentials]");
        assert_eq!(signal, Signal::Blocked("missing credentials".to_string()));
    }

    #[test]
    fn test_parse_blocked_reason_runs_to_bracket() {
        let signal = parse_signal("[BLOCKED: auth: no token]\nextra detail here");
        assert_eq!(signal, Signal::Blocked("auth: no token".to_string()));
    }

    #[test]
    fn test_parse_blocked_bare() {
        let signal = parse_signal("[BLOCKED]");
        assert_eq!(signal, Signal::Blocked("no reason given".to_string()));
    }

    #[test]
    fn test_parse_blocked_bare_with_trailing_text() {
        let signal = parse_signal("[BLOCKED]\nneed a database migration first");
        assert_eq!(
            signal,
            Signal::Blocked("need a database migration first".to_string())
        );
    }

    #[test]
    fn test_parse_decision_topic_and_detail() {
        let signal = parse_signal("[DECISION: storage-engine]\nWent with sled for zero-config.");
        assert_eq!(
            signal,
            Signal::Decision {
                topic: "storage-engine".to_string(),
                detail: "Went with sled for zero-config.".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_proceed() {
        let signal = parse_signal("[PROCEED]\nRetry with a narrower diff.");
        assert_eq!(
            signal,
            Signal::ProceedWithPlan("Retry with a narrower diff.".to_string())
        );
    }

    #[test]
    fn test_parse_escalate() {
        let signal = parse_signal("[ESCALATE]\nThis needs a human to rotate the deploy key.");
        match signal {
            Signal::Escalate(reasoning) => assert!(reasoning.contains("rotate the deploy key")),
            other => panic!("Expected Escalate, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_no_split() {
        assert_eq!(parse_signal("[NO_SPLIT]\nSmall enough."), Signal::NoSplit);
    }

    // =========================================
    // parse_signal: ambiguity and ordering
    // =========================================

    #[test]
    fn test_parse_no_marker_is_ambiguous() {
        let signal = parse_signal("I refactored the code and everything looks fine now.");
        match signal {
            Signal::Ambiguous(raw) => assert!(raw.contains("refactored")),
            other => panic!("Expected Ambiguous, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_empty_output_is_ambiguous() {
        assert!(matches!(parse_signal(""), Signal::Ambiguous(_)));
    }

    #[test]
    fn test_parse_lowercase_marker_not_recognized() {
        assert!(matches!(parse_signal("[approved]"), Signal::Ambiguous(_)));
    }

    #[test]
    fn test_first_marker_wins_in_reading_order() {
        let signal = parse_signal("[ISSUES]\nNeeds work.\nEarlier draft said [APPROVED].");
        assert!(matches!(signal, Signal::Issues(_)));

        let signal = parse_signal("[APPROVED]\nEarlier draft said [ISSUES].");
        assert_eq!(signal, Signal::Approved);
    }

    #[test]
    fn test_first_marker_wins_is_deterministic() {
        let text = "preamble [CRITICAL] mid [BLOCKED: x] tail";
        for _ in 0..10 {
            assert!(matches!(parse_signal(text), Signal::Critical(_)));
        }
    }

    #[test]
    fn test_no_split_not_mistaken_for_split() {
        // "[NO_SPLIT]" must not match the "[SPLIT]" token by substring.
        assert_eq!(parse_signal("[NO_SPLIT]"), Signal::NoSplit);
    }

    // =========================================
    // parse_signal: structured bodies
    // =========================================

    #[test]
    fn test_parse_split_with_subtasks_section() {
        let text = "[SPLIT]\nToo large for one pass.\n\n## Subtasks\n\n- Add schema migration\n  with a rollback step\n- Wire the new column into the API\n";
        match parse_signal(text) {
            Signal::Split(tasks) => {
                assert_eq!(tasks.len(), 2);
                assert_eq!(tasks[0].title, "Add schema migration");
                assert!(tasks[0].description.contains("rollback step"));
                assert_eq!(tasks[1].title, "Wire the new column into the API");
            }
            other => panic!("Expected Split, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_split_without_section_heading() {
        let text = "[SPLIT]\n1. First piece\n2. Second piece";
        match parse_signal(text) {
            Signal::Split(tasks) => {
                assert_eq!(tasks.len(), 2);
                assert_eq!(tasks[0].title, "First piece");
            }
            other => panic!("Expected Split, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_split_with_no_bullets_is_empty() {
        match parse_signal("[SPLIT]\nIt should be split somehow.") {
            Signal::Split(tasks) => assert!(tasks.is_empty()),
            other => panic!("Expected Split, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_split_section_ends_at_next_heading() {
        let text =
            "[SPLIT]\n## Subtasks\n- Only this one\n## Notes\n- This bullet is not a subtask\n";
        match parse_signal(text) {
            Signal::Split(tasks) => {
                assert_eq!(tasks.len(), 1);
                assert_eq!(tasks[0].title, "Only this one");
            }
            other => panic!("Expected Split, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_suggestions_with_sections() {
        let text = "[SUGGESTIONS]\n\n## Quick Wins\n- Inline the helper\n- Fix the log message\n\n## Deferred\n- Extract a crate for the parser\n";
        match parse_signal(text) {
            Signal::Suggestions {
                quick_wins,
                deferred,
            } => {
                assert_eq!(quick_wins.len(), 2);
                assert_eq!(quick_wins[0], "Inline the helper");
                assert_eq!(deferred, vec!["Extract a crate for the parser"]);
            }
            other => panic!("Expected Suggestions, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_suggestions_without_headings_all_quick_wins() {
        let text = "[SUGGESTIONS]\n- Tighten the error message\n- Remove dead import";
        match parse_signal(text) {
            Signal::Suggestions {
                quick_wins,
                deferred,
            } => {
                assert_eq!(quick_wins.len(), 2);
                assert!(deferred.is_empty());
            }
            other => panic!("Expected Suggestions, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_suggestions_prose_only() {
        match parse_signal("[SUGGESTIONS]\nConsider renaming the module.") {
            Signal::Suggestions {
                quick_wins,
                deferred,
            } => {
                assert_eq!(quick_wins, vec!["Consider renaming the module."]);
                assert!(deferred.is_empty());
            }
            other => panic!("Expected Suggestions, got {:?}", other),
        }
    }

    // =========================================
    // extract_decisions
    // =========================================

    #[test]
    fn test_extract_single_decision() {
        let text = "[DECISION: http-client]\nDecision: use the built-in fetch wrapper\nReasoning: one less dependency\nAlternatives: reqwest-style client\n";
        let decisions = extract_decisions(text);
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].topic, "http-client");
        assert_eq!(decisions[0].decision, "use the built-in fetch wrapper");
        assert_eq!(decisions[0].reasoning, "one less dependency");
        assert_eq!(decisions[0].alternatives, "reqwest-style client");
    }

    #[test]
    fn test_extract_multiple_decisions() {
        let text = "[DECISION: schema]\nDecision: add a nullable column\n\n[DECISION: naming]\nDecision: keep the legacy field name\n";
        let decisions = extract_decisions(text);
        assert_eq!(decisions.len(), 2);
        assert_eq!(decisions[0].topic, "schema");
        assert_eq!(decisions[1].topic, "naming");
        assert_eq!(decisions[1].decision, "keep the legacy field name");
    }

    #[test]
    fn test_extract_decision_without_fields_uses_first_line() {
        let text = "[DECISION: retries]\nCapped at three attempts per task.\n";
        let decisions = extract_decisions(text);
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].decision, "Capped at three attempts per task.");
        assert!(decisions[0].reasoning.is_empty());
    }

    #[test]
    fn test_extract_decision_multiline_field() {
        let text = "[DECISION: layout]\nDecision: split state from log\nbecause they have different write patterns\n\ntrailing prose not part of any field\n";
        let decisions = extract_decisions(text);
        assert_eq!(decisions.len(), 1);
        assert_eq!(
            decisions[0].decision,
            "split state from log because they have different write patterns"
        );
    }

    #[test]
    fn test_extract_no_decisions() {
        assert!(extract_decisions("plain output, nothing recorded").is_empty());
    }
}
