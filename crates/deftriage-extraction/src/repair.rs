//! Lenient JSON repair
//!
//! Reasoning output is close to JSON more often than it is JSON. The repair
//! pass is a single tokenizer walk that rewrites the usual slips:
//! single-quoted strings, unquoted keys and bare words, Python literals,
//! trailing or missing commas, raw newlines inside strings, comments and
//! unclosed brackets. Valid JSON is never touched.

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::fence::strip_code_fences;

const EXCERPT_LEN: usize = 200;

/// The document could not be turned into the requested structure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("could not parse structured document: {reason}")]
pub struct RepairError {
    pub reason: String,
    /// Leading part of the offending input, for diagnostics
    pub excerpt: String,
}

impl RepairError {
    fn new(reason: impl Into<String>, input: &str) -> Self {
        Self {
            reason: reason.into(),
            excerpt: input.chars().take(EXCERPT_LEN).collect(),
        }
    }
}

/// Repair almost-JSON into JSON.
///
/// Input that already parses is returned unchanged, which makes the function
/// idempotent on anything it manages to fix.
pub fn repair_json(input: &str) -> String {
    if is_valid(input) {
        return input.to_string();
    }

    let stripped = strip_code_fences(input);
    if is_valid(stripped) {
        return stripped.to_string();
    }

    let normalized = normalize_quotes(bracket_region(stripped));
    if is_valid(&normalized) {
        return normalized;
    }

    Repairer::new(&normalized).run()
}

/// Deserialize `input`, repairing it first when strict parsing fails.
///
/// # Errors
///
/// Returns [`RepairError`] when the input is empty or still unparseable
/// after repair.
pub fn parse_lenient<T: DeserializeOwned>(input: &str) -> Result<T, RepairError> {
    if input.trim().is_empty() {
        return Err(RepairError::new("document is empty", input));
    }

    if let Ok(value) = serde_json::from_str::<T>(input) {
        return Ok(value);
    }

    let repaired = repair_json(input);
    serde_json::from_str::<T>(&repaired).map_err(|e| RepairError::new(e.to_string(), input))
}

fn is_valid(text: &str) -> bool {
    !text.trim().is_empty() && serde_json::from_str::<serde_json::Value>(text).is_ok()
}

/// From the first opening bracket to the last matching closer.
///
/// Without a closer the tail is kept so the repairer can close it.
fn bracket_region(text: &str) -> &str {
    let Some(start) = text.find(['{', '[']) else {
        return text;
    };
    let closer = if text[start..].starts_with('{') { '}' } else { ']' };
    match text.rfind(closer) {
        Some(end) if end > start => &text[start..=end],
        _ => &text[start..],
    }
}

fn normalize_quotes(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{00AB}' | '\u{00BB}' => '"',
            '\u{2018}' | '\u{2019}' | '\u{201A}' => '\'',
            other => other,
        })
        .collect()
}

struct Repairer {
    chars: Vec<char>,
    pos: usize,
    out: String,
    /// Expected closers of the open containers
    stack: Vec<char>,
}

impl Repairer {
    fn new(text: &str) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: 0,
            out: String::with_capacity(text.len() + 16),
            stack: Vec::new(),
        }
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn run(mut self) -> String {
        while let Some(c) = self.peek(0) {
            match c {
                '"' | '\'' => {
                    self.separate_values();
                    self.string(c);
                }
                '{' | '[' => {
                    self.separate_values();
                    self.stack.push(if c == '{' { '}' } else { ']' });
                    self.out.push(c);
                    self.pos += 1;
                }
                '}' | ']' => {
                    self.close(c);
                    self.pos += 1;
                }
                ',' => {
                    // Collapse doubled commas and leading commas
                    if !matches!(self.last_significant(), Some(',' | '{' | '[') | None) {
                        self.out.push(',');
                    }
                    self.pos += 1;
                }
                ':' => {
                    self.out.push(':');
                    self.pos += 1;
                }
                '/' if matches!(self.peek(1), Some('/' | '*')) => self.comment(),
                '#' => self.comment(),
                c if c.is_whitespace() => {
                    self.out.push(c);
                    self.pos += 1;
                }
                _ => {
                    self.separate_values();
                    self.bare_word();
                }
            }
        }

        while let Some(closer) = self.stack.last().copied() {
            self.close(closer);
        }
        self.out.trim().to_string()
    }

    fn last_significant(&self) -> Option<char> {
        self.out.chars().rev().find(|c| !c.is_whitespace())
    }

    fn expecting_key(&self) -> bool {
        self.stack.last() == Some(&'}') && matches!(self.last_significant(), Some('{' | ','))
    }

    /// Insert a comma when a value directly follows another value.
    fn separate_values(&mut self) {
        if self.stack.is_empty() {
            return;
        }
        if let Some(last) = self.last_significant()
            && (matches!(last, '"' | '}' | ']' | '.') || last.is_ascii_alphanumeric())
        {
            self.out.push(',');
        }
    }

    fn drop_trailing_comma(&mut self) {
        let trimmed_len = self.out.trim_end().len();
        if self.out[..trimmed_len].ends_with(',') {
            self.out.truncate(trimmed_len - 1);
        }
    }

    fn close(&mut self, closer: char) {
        if !self.stack.contains(&closer) {
            // Stray closer
            return;
        }
        while let Some(expected) = self.stack.pop() {
            self.drop_trailing_comma();
            if self.last_significant() == Some(':') {
                self.out.push_str("null");
            }
            self.out.push(expected);
            if expected == closer {
                break;
            }
        }
    }

    fn comment(&mut self) {
        if self.peek(0) == Some('/') && self.peek(1) == Some('*') {
            self.pos += 2;
            while let Some(c) = self.peek(0) {
                if c == '*' && self.peek(1) == Some('/') {
                    self.pos += 2;
                    return;
                }
                self.pos += 1;
            }
            return;
        }
        while let Some(c) = self.peek(0) {
            if c == '\n' {
                return;
            }
            self.pos += 1;
        }
    }

    fn string(&mut self, quote: char) {
        self.pos += 1;
        self.out.push('"');
        while let Some(c) = self.peek(0) {
            self.pos += 1;
            match c {
                c if c == quote => {
                    self.out.push('"');
                    return;
                }
                '\\' => match self.peek(0) {
                    Some(next @ ('"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' | 'u')) => {
                        self.out.push('\\');
                        self.out.push(next);
                        self.pos += 1;
                    }
                    Some('\'') => {
                        self.out.push('\'');
                        self.pos += 1;
                    }
                    _ => self.out.push_str("\\\\"),
                },
                '"' => self.out.push_str("\\\""),
                '\n' => self.out.push_str("\\n"),
                '\r' => self.out.push_str("\\r"),
                '\t' => self.out.push_str("\\t"),
                c if (c as u32) < 0x20 => self.out.push_str(&format!("\\u{:04x}", c as u32)),
                c => self.out.push(c),
            }
        }
        // Unterminated
        self.out.push('"');
    }

    fn bare_word(&mut self) {
        let key = self.expecting_key();
        let numeric = !key && self.peek(0).is_some_and(|c| c.is_ascii_digit() || c == '-');
        let start = self.pos;
        while let Some(c) = self.peek(0) {
            let stop = match c {
                ',' | '}' | ']' | '\n' => true,
                ':' => key,
                '{' | '[' | '"' => key,
                c if c.is_whitespace() => numeric,
                _ => false,
            };
            if stop {
                break;
            }
            self.pos += 1;
        }
        if self.pos == start {
            // Lone structural character that cannot start a value
            self.pos += 1;
            return;
        }

        let word: String = self.chars[start..self.pos].iter().collect();
        let word = word.trim();
        self.out.push_str(&literal(word, key));
    }
}

fn literal(word: &str, key: bool) -> String {
    if !key {
        match word {
            "true" | "True" | "TRUE" => return "true".to_string(),
            "false" | "False" | "FALSE" => return "false".to_string(),
            "null" | "None" | "NULL" | "Null" | "nil" | "undefined" => return "null".to_string(),
            _ => {}
        }
        if serde_json::from_str::<serde_json::Number>(word).is_ok() {
            return word.to_string();
        }
    }
    serde_json::Value::String(word.to_string()).to_string()
}
