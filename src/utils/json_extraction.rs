//! JSON extraction for completion replies.
//!
//! Models frequently wrap the requested object in a markdown fence or put a
//! sentence of prose around it. Extraction tries, in order:
//! 1. A ```json fenced block, then any fenced block
//! 2. The whole reply when it is itself a JSON object
//! 3. The largest balanced JSON object anywhere in the reply (later wins ties)
//!
//! A reply that opens an object but never closes it is reported as truncated
//! so callers can say so in their error message.
//!
//! ```
//! use pipeline_forge::utils::json_extraction::{extract_json_object, JsonExtraction};
//!
//! let reply = "Sure! {\"taskType\": \"NLP\", \"projectName\": \"Review Sentiment\"}";
//! let JsonExtraction::Found(json) = extract_json_object(reply) else { panic!() };
//! assert!(json.starts_with('{'));
//! ```

use std::sync::OnceLock;

use regex::Regex;

/// Outcome of looking for a JSON object in a reply.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonExtraction {
    /// A complete object that parses as JSON.
    Found(String),
    /// An object was opened but the reply ended before it closed.
    Truncated {
        partial_json: String,
        unclosed_braces: usize,
    },
    /// Nothing object-like in the reply.
    NotFound,
}

impl JsonExtraction {
    /// Returns the extracted JSON if extraction succeeded.
    pub fn json(&self) -> Option<&str> {
        match self {
            JsonExtraction::Found(json) => Some(json),
            _ => None,
        }
    }
}

fn fenced_block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"```([A-Za-z0-9_-]*)[ \t]*\r?\n?([\s\S]*?)```").expect("static regex is valid")
    })
}

/// Looks for a JSON object in a completion reply.
pub fn extract_json_object(content: &str) -> JsonExtraction {
    let trimmed = content.trim();

    // json-tagged fences first, then untagged/other fences
    let mut fenced: Vec<(bool, &str)> = fenced_block_regex()
        .captures_iter(trimmed)
        .filter_map(|caps| {
            let lang = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            caps.get(2)
                .map(|body| (lang.eq_ignore_ascii_case("json"), body.as_str().trim()))
        })
        .collect();
    fenced.sort_by_key(|(is_json, _)| !*is_json);
    for (_, body) in fenced {
        if let Some(json) = first_object(body) {
            return JsonExtraction::Found(json);
        }
    }

    if trimmed.starts_with('{') && is_json_object(trimmed) {
        return JsonExtraction::Found(trimmed.to_string());
    }

    if let Some(json) = largest_object(trimmed) {
        return JsonExtraction::Found(json);
    }

    match trimmed.find('{') {
        Some(start) => {
            let unclosed = unclosed_braces(&trimmed[start..]);
            if unclosed > 0 {
                JsonExtraction::Truncated {
                    partial_json: trimmed[start..].to_string(),
                    unclosed_braces: unclosed,
                }
            } else {
                JsonExtraction::NotFound
            }
        }
        None => JsonExtraction::NotFound,
    }
}

fn is_json_object(candidate: &str) -> bool {
    matches!(
        serde_json::from_str::<serde_json::Value>(candidate),
        Ok(serde_json::Value::Object(_))
    )
}

fn first_object(content: &str) -> Option<String> {
    let start = content.find('{')?;
    let end = find_matching_brace(&content[start..])?;
    let candidate = &content[start..=start + end];
    is_json_object(candidate).then(|| candidate.to_string())
}

fn largest_object(content: &str) -> Option<String> {
    content
        .char_indices()
        .filter(|(_, c)| *c == '{')
        .filter_map(|(start, _)| {
            let end = find_matching_brace(&content[start..])?;
            let candidate = &content[start..=start + end];
            is_json_object(candidate).then_some((start, candidate))
        })
        .max_by(|(pos_a, a), (pos_b, b)| a.len().cmp(&b.len()).then(pos_a.cmp(pos_b)))
        .map(|(_, json)| json.to_string())
}

/// Index of the `}` closing the object that opens at the start of `s`.
///
/// Braces inside string literals (including escaped quotes) are ignored.
pub fn find_matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn unclosed_braces(s: &str) -> usize {
    let mut depth: isize = 0;
    let mut in_string = false;
    let mut escape_next = false;
    for c in s.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => depth -= 1,
            _ => {}
        }
    }
    depth.max(0) as usize
}
