use lazy_static::lazy_static;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::status::ReviewStatus;

// -------------------------------------------------------------------------------------------------
// SuppressionNote
// -------------------------------------------------------------------------------------------------
/// One in-source suppression annotation, extracted from a source file.
///
/// `line` is the line the annotation covers: the first non-comment, non-blank line below the
/// annotation block. `checkers` lists the checker names the annotation applies to; an empty list
/// or the literal entry `all` covers every checker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SuppressionNote {
    pub line: u64,
    pub checkers: Vec<String>,
    pub status: ReviewStatus,
    pub comment: String,
}

impl SuppressionNote {
    /// Does this annotation cover a report of `checker` at `line`?
    pub fn covers(&self, line: u64, checker: &str) -> bool {
        self.line == line
            && (self.checkers.is_empty()
                || self.checkers.iter().any(|c| c == "all" || c == checker))
    }
}

// -------------------------------------------------------------------------------------------------
// scanner
// -------------------------------------------------------------------------------------------------

lazy_static! {
    /// Recognizes the four suppression directives, an optional bracketed checker list, and the
    /// trailing free-text justification.
    static ref DIRECTIVE: Regex = Regex::new(
        r"bugbook_(suppress|false_positive|intentional|confirmed)\b\s*(?:\[([^\]]*)\])?\s*(.*)"
    )
    .expect("directive pattern should compile");
}

fn directive_status(keyword: &str) -> ReviewStatus {
    match keyword {
        // `suppress` is the historic spelling of `false_positive`
        "suppress" | "false_positive" => ReviewStatus::FalsePositive,
        "intentional" => ReviewStatus::Intentional,
        "confirmed" => ReviewStatus::Confirmed,
        _ => unreachable!("keyword alternatives are fixed by the directive pattern"),
    }
}

/// Scanner state: either looking for a directive, or consuming the comment lines of a
/// suppression block until the target report line.
enum State {
    Seeking,
    InSuppressionBlock,
}

/// Extract the comment text of a line, if it is a comment line.
///
/// Handles `//`, `#`, and `/* ... */` comments, including continuation lines of a multi-line
/// block comment. Returns the updated in-block flag and the comment text.
fn comment_text(line: &str, in_block: bool) -> (bool, Option<String>) {
    let trimmed = line.trim();

    if in_block {
        let (text, still_open) = match trimmed.find("*/") {
            Some(idx) => (&trimmed[..idx], false),
            None => (trimmed, true),
        };
        let text = text.trim_start_matches('*').trim();
        return (still_open, Some(text.to_string()));
    }

    if let Some(rest) = trimmed.strip_prefix("//") {
        return (false, Some(rest.trim_start_matches('/').trim().to_string()));
    }
    if let Some(rest) = trimmed.strip_prefix('#') {
        return (false, Some(rest.trim().to_string()));
    }
    if let Some(rest) = trimmed.strip_prefix("/*") {
        let (text, still_open) = match rest.find("*/") {
            Some(idx) => (&rest[..idx], false),
            None => (rest, true),
        };
        return (still_open, Some(text.trim().to_string()));
    }

    (false, None)
}

fn parse_checker_list(list: Option<&str>) -> Vec<String> {
    match list {
        None => Vec::new(),
        Some(list) => list
            .split(',')
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect(),
    }
}

/// Scan source text for suppression annotations.
///
/// The scanner has two states. In `Seeking` it looks for a comment line containing a directive
/// keyword. A directive starts a suppression block: subsequent contiguous comment lines extend
/// the justification text, a blank line abandons the block, and the first non-comment, non-blank
/// line is the target report line the annotation covers. Several directives stacked above one
/// line each produce their own note covering that line.
pub fn scan_source(text: &str) -> Vec<SuppressionNote> {
    let mut notes = Vec::new();
    let mut pending: Vec<SuppressionNote> = Vec::new();
    let mut state = State::Seeking;
    let mut in_block_comment = false;

    for (idx, line) in text.lines().enumerate() {
        let line_no = (idx + 1) as u64;
        let (still_in_block, comment) = comment_text(line, in_block_comment);
        in_block_comment = still_in_block;

        match comment {
            Some(comment) => {
                if let Some(caps) = DIRECTIVE.captures(&comment) {
                    let keyword = caps.get(1).expect("keyword group always present").as_str();
                    let checkers = parse_checker_list(caps.get(2).map(|m| m.as_str()));
                    let comment = caps.get(3).map(|m| m.as_str().trim()).unwrap_or("");
                    pending.push(SuppressionNote {
                        line: 0,
                        checkers,
                        status: directive_status(keyword),
                        comment: comment.to_string(),
                    });
                    state = State::InSuppressionBlock;
                } else if matches!(state, State::InSuppressionBlock) && !comment.is_empty() {
                    // Continuation of the justification text.
                    if let Some(last) = pending.last_mut() {
                        if !last.comment.is_empty() {
                            last.comment.push(' ');
                        }
                        last.comment.push_str(&comment);
                    }
                }
            }
            None => {
                if line.trim().is_empty() {
                    // A blank line between the annotation and the report line voids the block.
                    pending.clear();
                    state = State::Seeking;
                } else {
                    for mut note in pending.drain(..) {
                        note.line = line_no;
                        notes.push(note);
                    }
                    state = State::Seeking;
                }
            }
        }
    }

    notes
}
