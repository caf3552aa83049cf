//! `{{placeholder}}` prompt templates.
//!
//! Placeholders name a dotted path into the flow's serialized input, e.g.
//! `{{dataset.datasetName}}`. Strings are substituted verbatim; any other
//! JSON value is substituted as compact JSON.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

/// Errors raised while rendering a template.
#[derive(Debug, Error, PartialEq)]
pub enum TemplateError {
    #[error("unknown placeholder '{{{{{0}}}}}'")]
    UnknownPlaceholder(String),

    #[error("template input must be a JSON object, got {0}")]
    InputNotObject(&'static str),
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.]+)\s*\}\}").expect("static regex is valid"))
}

/// A prompt with `{{path}}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    source: String,
}

impl PromptTemplate {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Placeholder paths in order of appearance, duplicates included.
    pub fn placeholders(&self) -> Vec<&str> {
        placeholder_regex()
            .captures_iter(&self.source)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
            .collect()
    }

    /// Renders the template against `input`.
    ///
    /// Fails on the first placeholder that does not resolve, so a typo in a
    /// template never reaches the completion service.
    pub fn render(&self, input: &Value) -> Result<String, TemplateError> {
        if !input.is_object() {
            return Err(TemplateError::InputNotObject(json_kind(input)));
        }

        let mut rendered = String::with_capacity(self.source.len());
        let mut last = 0;
        for caps in placeholder_regex().captures_iter(&self.source) {
            let (Some(whole), Some(path)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let value = lookup(input, path.as_str())
                .ok_or_else(|| TemplateError::UnknownPlaceholder(path.as_str().to_string()))?;
            rendered.push_str(&self.source[last..whole.start()]);
            match value {
                Value::String(s) => rendered.push_str(s),
                other => rendered.push_str(&other.to_string()),
            }
            last = whole.end();
        }
        rendered.push_str(&self.source[last..]);
        Ok(rendered)
    }
}

fn lookup<'a>(input: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(input, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_strings_verbatim() {
        let template = PromptTemplate::new("Classify: {{prompt}}");
        let rendered = template
            .render(&json!({"prompt": "detect spam \"emails\""}))
            .expect("render");
        assert_eq!(rendered, "Classify: detect spam \"emails\"");
    }

    #[test]
    fn test_render_nested_paths_and_json_values() {
        let template = PromptTemplate::new(
            "Task {{ taskType }} on {{dataset.datasetName}} shape={{profile.shape}} first={{profile.shape.0}}",
        );
        let input = json!({
            "taskType": "Tabular",
            "dataset": {"datasetName": "titanic"},
            "profile": {"shape": [891, 12]}
        });
        assert_eq!(
            template.render(&input).expect("render"),
            "Task Tabular on titanic shape=[891,12] first=891"
        );
    }

    #[test]
    fn test_unknown_placeholder_is_an_error() {
        let template = PromptTemplate::new("{{prompt}} {{missing.path}}");
        assert_eq!(
            template.render(&json!({"prompt": "x"})),
            Err(TemplateError::UnknownPlaceholder("missing.path".to_string()))
        );
    }

    #[test]
    fn test_input_must_be_object() {
        let template = PromptTemplate::new("{{prompt}}");
        assert_eq!(
            template.render(&json!("just a string")),
            Err(TemplateError::InputNotObject("a string"))
        );
    }

    #[test]
    fn test_single_braces_untouched() {
        let template = PromptTemplate::new("Return {\"a\": {{value}}}");
        assert_eq!(
            template.render(&json!({"value": 3})).expect("render"),
            "Return {\"a\": 3}"
        );
        assert_eq!(template.placeholders(), vec!["value"]);
    }
}
