//! Bounded-effort recovery for near-valid generation payloads.
//!
//! Strict parse first, then one truncation-repair attempt at the last complete
//! element boundary. Anything beyond that is the caller's problem (one full
//! regeneration, then the diagnostic fallback). Never unbounded.

use serde::de::DeserializeOwned;

use review_core::model::QuestionDraft;

use crate::error::GenerationError;

/// Parse a generation payload, tolerating a truncated `questions` array.
pub(crate) fn parse_with_repair<T: DeserializeOwned>(raw: &str) -> Result<T, GenerationError> {
    match serde_json::from_str(raw) {
        Ok(value) => Ok(value),
        Err(strict_err) => {
            let repaired = repair_truncated(raw)
                .ok_or_else(|| GenerationError::Malformed(strict_err.to_string()))?;
            serde_json::from_str(&repaired).map_err(|e| GenerationError::Malformed(e.to_string()))
        }
    }
}

/// Best-effort repair of a truncated `{"questions":[...]}` payload.
///
/// Locates the last fully-closed element of the first top-level array,
/// truncates there (discarding any dangling partial element), and re-closes
/// the array and the object. Returns `None` when no complete element exists.
pub(crate) fn repair_truncated(raw: &str) -> Option<String> {
    let bytes = raw.as_bytes();
    let mut in_string = false;
    let mut escaped = false;
    let mut depth = 0usize;
    let mut array_depth: Option<usize> = None;
    let mut last_complete: Option<usize> = None;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => {
                depth += 1;
                if b == b'[' && array_depth.is_none() {
                    array_depth = Some(depth);
                }
            }
            b'}' | b']' => {
                depth = depth.saturating_sub(1);
                if b == b'}' && array_depth == Some(depth) {
                    last_complete = Some(i + 1);
                }
            }
            _ => {}
        }
    }

    let cut = last_complete?;
    let mut repaired = raw[..cut].to_owned();
    repaired.push_str("]}");
    Some(repaired)
}

/// Fixed placeholder drafts served when generation output is unrecoverable,
/// so a live session always has content to show.
pub(crate) fn diagnostic_drafts(count: usize) -> Vec<QuestionDraft> {
    let templates = [
        QuestionDraft::open_response(
            "We hit a snag generating new questions. What topic were you reviewing? Jot it down and we'll pick it up from there.",
            "Any short note about the current topic.",
        ),
        QuestionDraft::open_response(
            "Question generation is temporarily unavailable. Summarize the last answer you gave in one sentence.",
            "A one-sentence recap of the previous answer.",
        ),
        QuestionDraft::open_response(
            "While we reconnect, recall one fact from this material that you found surprising.",
            "Any fact from the material.",
        ),
    ];
    templates.into_iter().cycle().take(count.max(1)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Payload {
        questions: Vec<serde_json::Value>,
    }

    #[test]
    fn strict_parse_passes_through() {
        let parsed: Payload = parse_with_repair(r#"{"questions":[{"a":1}]}"#).unwrap();
        assert_eq!(parsed.questions.len(), 1);
    }

    #[test]
    fn repairs_missing_closing_brackets() {
        let repaired = repair_truncated(r#"{"questions":[{"a":1},{"b":2}"#).unwrap();
        assert_eq!(repaired, r#"{"questions":[{"a":1},{"b":2}]}"#);
    }

    #[test]
    fn discards_dangling_partial_element() {
        let repaired = repair_truncated(r#"{"questions":[{"a":1},{"b":2},{"c":"#).unwrap();
        assert_eq!(repaired, r#"{"questions":[{"a":1},{"b":2}]}"#);
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_the_scan() {
        let repaired = repair_truncated(r#"{"questions":[{"a":"x } y"},{"b":"#).unwrap();
        assert_eq!(repaired, r#"{"questions":[{"a":"x } y"}]}"#);
    }

    #[test]
    fn no_complete_element_means_no_repair() {
        assert!(repair_truncated(r#"{"questions":[{"a":"#).is_none());
        assert!(repair_truncated("garbage").is_none());
    }

    #[test]
    fn parse_with_repair_recovers_truncated_payload() {
        let parsed: Payload = parse_with_repair(r#"{"questions":[{"a":1},{"b":2}"#).unwrap();
        assert_eq!(parsed.questions.len(), 2);
    }

    #[test]
    fn diagnostic_drafts_never_empty() {
        assert_eq!(diagnostic_drafts(0).len(), 1);
        assert_eq!(diagnostic_drafts(5).len(), 5);
    }
}
