//! Checks applied to compactor output before it may be committed.

use crate::error::ValidationError;
use ember_rs_memory::MemoryDocument;
use log::{debug, warn};
use regex::Regex;
use std::sync::LazyLock;

static CODE_FENCE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)\A```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```\z").ok());

/// Remove a surrounding markdown code fence (```` ```json ```` or ```` ``` ````)
/// and surrounding whitespace.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(fence) = CODE_FENCE.as_ref() else {
        return trimmed;
    };
    match fence.captures(trimmed).and_then(|caps| caps.get(1)) {
        Some(body) => body.as_str().trim(),
        None => trimmed,
    }
}

/// Turn raw compactor output into a document that is safe to commit.
///
/// The unfenced candidate text must fit within `max_bytes`, parse as a
/// complete document and satisfy the field invariants. Its canonical form
/// must fit as well.
pub fn validate_candidate(raw: &str, max_bytes: usize) -> Result<MemoryDocument, ValidationError> {
    let body = strip_code_fences(raw);
    if body.is_empty() {
        return Err(ValidationError::Empty);
    }
    if body.len() > max_bytes {
        return Err(ValidationError::TooLarge {
            size: body.len(),
            max: max_bytes,
        });
    }
    let document: MemoryDocument =
        serde_json::from_str(body).map_err(ValidationError::Malformed)?;
    document.validate().map_err(ValidationError::Invalid)?;

    let size = document
        .serialized_len()
        .map_err(ValidationError::Invalid)?;
    if size > max_bytes {
        return Err(ValidationError::TooLarge {
            size,
            max: max_bytes,
        });
    }
    if document.metadata.total_memories != document.memories.len() {
        warn!(
            "candidate memory count mismatch (declared={}, actual={})",
            document.metadata.total_memories,
            document.memories.len()
        );
    }
    debug!(
        "candidate accepted (bytes={}, memories={})",
        size,
        document.memories.len()
    );
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const DOC: &str = r#"{"version":"1.0","metadata":{"total_memories":1},"user_profile":{"name":"Ana"},"memories":[{"id":"m1","type":"fact","summary":"likes tea","importance":0.8}],"recent_context":{"last_topic":"tea"}}"#;

    #[test]
    fn strips_json_and_bare_fences() {
        assert_eq!(strip_code_fences("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("  ```\n{\"a\":1}\n```  \n"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```json{}```"), "{}");
        assert_eq!(strip_code_fences("  {}  "), "{}");
    }

    #[test]
    fn accepts_fenced_document() {
        let raw = format!("```json\n{DOC}\n```");
        let document = validate_candidate(&raw, 10 * 1024).expect("valid");
        assert_eq!(document.user_profile.name, "Ana");
        assert_eq!(document.memories.len(), 1);
    }

    #[test]
    fn rejects_empty_and_prose() {
        assert!(matches!(
            validate_candidate("```json\n```", 10 * 1024),
            Err(ValidationError::Empty)
        ));
        assert!(matches!(
            validate_candidate("Sure! Here is your memory.", 10 * 1024),
            Err(ValidationError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_field_violations() {
        let raw = DOC.replace("0.8", "1.8");
        assert!(matches!(
            validate_candidate(&raw, 10 * 1024),
            Err(ValidationError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_oversized_document() {
        let raw = DOC.replace("likes tea", &"x".repeat(12 * 1024));
        match validate_candidate(&raw, 10 * 1024) {
            Err(ValidationError::TooLarge { size, max }) => {
                assert!(size > max);
                assert_eq!(max, 10 * 1024);
            }
            other => panic!("expected TooLarge, got {other:?}"),
        }
    }

    #[test]
    fn rejects_padded_candidate_even_when_compact_form_fits() {
        let padded = DOC.replace(",", &format!(",{}", " ".repeat(3 * 1024)));
        assert!(padded.len() > 10 * 1024);
        assert!(DOC.len() < 10 * 1024);
        match validate_candidate(&padded, 10 * 1024) {
            Err(ValidationError::TooLarge { size, .. }) => assert_eq!(size, padded.len()),
            other => panic!("expected TooLarge, got {other:?}"),
        }
    }

    #[test]
    fn fence_and_trailing_whitespace_do_not_count_toward_size() {
        let canonical = MemoryDocument::from_json(DOC)
            .expect("doc")
            .serialized_len()
            .expect("len");
        let max = canonical.max(DOC.len());
        let raw = format!("```json\n{DOC}\n```{}", "\n".repeat(4096));
        assert!(raw.len() > max);
        assert!(validate_candidate(&raw, max).is_ok());
    }

    #[test]
    fn accepts_numeric_age_and_fractional_compression_level() {
        let raw = DOC
            .replace(r#""name":"Ana""#, r#""name":"Ana","age":30"#)
            .replace(r#""total_memories":1"#, r#""total_memories":1,"compression_level":1.5"#);
        let document = validate_candidate(&raw, 10 * 1024).expect("valid");
        assert_eq!(document.user_profile.age.as_deref(), Some("30"));
        assert_eq!(document.metadata.compression_level, 2);
    }
}
