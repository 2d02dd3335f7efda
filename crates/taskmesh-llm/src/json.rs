use taskmesh_core::{MeshError, MeshResult};

/// Extracts a JSON value from a model reply.
///
/// Model replies rarely arrive as bare JSON: they come wrapped in fenced
/// code blocks or surrounded by prose. This tries, in order: the whole
/// text, the contents of the first fenced block, and the widest
/// brace-delimited span.
pub fn extract_json(text: &str) -> MeshResult<serde_json::Value> {
    let trimmed = text.trim();

    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    if let Some(fenced) = fenced_block(trimmed) {
        if let Ok(value) = serde_json::from_str(fenced.trim()) {
            return Ok(value);
        }
    }

    if let (Some(open), Some(close)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if open < close {
            if let Ok(value) = serde_json::from_str(&trimmed[open..=close]) {
                return Ok(value);
            }
        }
    }

    let preview: String = trimmed.chars().take(200).collect();
    Err(MeshError::Llm(format!(
        "reply does not contain parseable JSON: {preview}"
    )))
}

/// The contents of the first ``` fenced block, if any.
fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    // Skip a language tag like `json` on the fence line.
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(&body[..end])
}
