use ember_rs_memory::{MemoryDocument, MemoryItem, MemoryKind, Preference};

/// A small valid document whose memory ids and topic carry `tag`.
pub fn sample_document(tag: &str) -> MemoryDocument {
    let mut document = MemoryDocument::empty();
    document.metadata.created_at = "2026-01-01T00:00:00Z".to_string();
    document.metadata.last_updated = "2026-01-02T00:00:00Z".to_string();
    document.metadata.total_memories = 1;
    document.user_profile.name = "Ana".to_string();
    document.user_profile.preferences.push(Preference {
        kind: "drink".to_string(),
        value: "tea".to_string(),
        weight: 0.9,
    });
    document.memories.push(MemoryItem {
        id: format!("mem_{tag}"),
        kind: MemoryKind::Preference,
        summary: format!("prefers tea ({tag})"),
        importance: 0.8,
        timestamp: "2026-01-02T00:00:00Z".to_string(),
        context: "chat".to_string(),
    });
    document.recent_context.last_topic = tag.to_string();
    document
}

/// Canonical JSON of [`sample_document`].
pub fn sample_document_json(tag: &str) -> String {
    serde_json::to_string(&sample_document(tag)).unwrap_or_default()
}

/// Well-formed document JSON whose canonical size is about `bytes`.
pub fn oversized_document_json(bytes: usize) -> String {
    let mut document = sample_document("big");
    document.memories[0].summary = "x".repeat(bytes);
    serde_json::to_string(&document).unwrap_or_default()
}
