use regex::Regex;
use std::sync::LazyLock;

/// Opening fence with optional language tag, body, closing fence.
static FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[ \t]*([A-Za-z0-9_+-]*)[ \t]*\r?\n?(.*?)```").unwrap());

/// A fenced code block found in free text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FencedBlock<'a> {
    /// Language tag, lowercased by the caller if needed; empty when absent
    pub lang: &'a str,
    /// Text between the fences, trimmed
    pub body: &'a str,
    /// Byte offset of the opening fence
    pub start: usize,
}

/// All fenced blocks in order of appearance.
pub fn extract_fenced_blocks(text: &str) -> Vec<FencedBlock<'_>> {
    FENCE
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some(FencedBlock {
                lang: caps.get(1).map_or("", |m| m.as_str()),
                body: caps.get(2).map_or("", |m| m.as_str()).trim(),
                start: whole.start(),
            })
        })
        .collect()
}

/// Remove the code fences around a structured document.
///
/// Text without fences is returned trimmed. When fences are present the body
/// of the last block tagged `json` is returned, then the last block whose body
/// opens an object or array, then the first block. Prose and quoted code
/// snippets around a fenced document are dropped.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let blocks = extract_fenced_blocks(trimmed);
    let chosen = blocks
        .iter()
        .rev()
        .find(|b| b.lang.eq_ignore_ascii_case("json"))
        .or_else(|| blocks.iter().rev().find(|b| b.body.starts_with(['{', '['])))
        .or_else(|| blocks.first());
    if let Some(block) = chosen {
        return block.body;
    }
    // Unterminated fence: drop the opening line
    if let Some(rest) = trimmed.strip_prefix("```") {
        return match rest.find('\n') {
            Some(idx) => rest[idx + 1..].trim(),
            None => rest.trim(),
        };
    }
    trimmed
}

/// The last JSON-looking block of a report.
///
/// Prefers the last fenced block tagged `json` (or untagged with a body that
/// starts with `{`). Falls back to the last top-level `{...}` span in the text.
pub fn last_json_block(text: &str) -> Option<&str> {
    json_block_candidates(text).into_iter().next()
}

/// Every JSON-looking block of a report, last first.
///
/// Fenced blocks tagged `json` (or untagged with a body that starts with `{`)
/// come newest to oldest, followed by the last top-level `{...}` span when it
/// is not one of them.
pub fn json_block_candidates(text: &str) -> Vec<&str> {
    let mut candidates: Vec<&str> = extract_fenced_blocks(text)
        .into_iter()
        .rev()
        .filter(|b| b.lang.eq_ignore_ascii_case("json") || (b.lang.is_empty() && b.body.starts_with('{')))
        .map(|b| b.body)
        .collect();
    if let Some(span) = last_brace_span(text)
        && !candidates.contains(&span)
    {
        candidates.push(span);
    }
    candidates
}

/// Last balanced `{...}` span, ignoring braces inside double-quoted strings.
fn last_brace_span(text: &str) -> Option<&str> {
    let end = text.rfind('}')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut idx = end + 1;

    // Walk backwards; escapes are rare enough in verdict blocks that a simple
    // backslash check is sufficient.
    while idx > 0 {
        idx -= 1;
        let b = bytes[idx];
        if b == b'"' && (idx == 0 || bytes[idx - 1] != b'\\') {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }
        match b {
            b'}' => depth += 1,
            b'{' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[idx..=end]);
                }
            }
            _ => {}
        }
    }
    None
}
