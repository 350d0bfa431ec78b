//! Lenient JSON extraction from model output.
//!
//! Models wrap JSON in code fences, surround it with prose, write Python's
//! `None`/`True`/`False`, and leave trailing commas. Everything goes through
//! [`parse_json`] so each capability sees the same cleanup.

use crate::error::{PageIndexError, Result};
use regex::Regex;
use serde::de::DeserializeOwned;
use std::sync::LazyLock;

static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([\]}])").expect("static regex"));
static PYTHON_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(None|True|False)\b").expect("static regex"));

/// Extract JSON from potentially markdown-wrapped response.
pub fn extract_json(response: &str) -> String {
    let response = response.trim();

    // Check for ```json code block
    if let Some(rest) = response.strip_prefix("```json") {
        if let Some(end) = rest.rfind("```") {
            return rest[..end].trim().to_string();
        }
    }

    // Check for ``` code block
    if response.starts_with("```") {
        if let Some(end) = response.rfind("```") {
            let start = response.find('\n').map(|n| n + 1).unwrap_or(3);
            if end > start {
                return response[start..end].trim().to_string();
            }
        }
    }

    // Find the outermost JSON array or object, whichever opens first
    let array = response.find('[').zip(response.rfind(']'));
    let object = response.find('{').zip(response.rfind('}'));
    let span = match (array, object) {
        (Some(a), Some(o)) => Some(if a.0 < o.0 { a } else { o }),
        (a, o) => a.or(o),
    };
    if let Some((start, end)) = span {
        if end > start {
            return response[start..=end].to_string();
        }
    }

    response.to_string()
}

/// Replace Python literals outside string values and drop trailing commas.
pub fn repair_json(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    let mut segment = String::new();
    let mut in_string = false;
    let mut escaped = false;

    for ch in json.chars() {
        if in_string {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
        } else if ch == '"' {
            out.push_str(&fix_bare(&segment));
            segment.clear();
            out.push(ch);
            in_string = true;
        } else {
            segment.push(ch);
        }
    }
    out.push_str(&fix_bare(&segment));

    TRAILING_COMMA.replace_all(&out, "$1").into_owned()
}

fn fix_bare(segment: &str) -> String {
    PYTHON_LITERAL
        .replace_all(segment, |caps: &regex::Captures| match &caps[1] {
            "None" => "null",
            "True" => "true",
            _ => "false",
        })
        .into_owned()
}

/// Parse a model response into `T`, cleaning it up first.
pub fn parse_json<T: DeserializeOwned>(response: &str) -> Result<T> {
    let extracted = extract_json(response);
    if let Ok(value) = serde_json::from_str::<T>(&extracted) {
        return Ok(value);
    }

    serde_json::from_str::<T>(&repair_json(&extracted)).map_err(|e| {
        PageIndexError::LlmParse(format!(
            "{}. Response: {}",
            e,
            response.chars().take(200).collect::<String>()
        ))
    })
}

/// Read a yes/no answer from a named field.
pub fn parse_yes_no(response: &str, field: &str) -> Result<bool> {
    let value: serde_json::Value = parse_json(response)?;
    match value.get(field) {
        Some(serde_json::Value::String(s)) => Ok(s.trim().eq_ignore_ascii_case("yes")),
        Some(serde_json::Value::Bool(b)) => Ok(*b),
        _ => Err(PageIndexError::LlmParse(format!(
            "missing '{}' in response",
            field
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_extract_json_plain() {
        let response = r#"[{"title": "Test"}]"#;
        assert_eq!(extract_json(response), r#"[{"title": "Test"}]"#);
    }

    #[test]
    fn test_extract_json_markdown() {
        let response = r#"```json
[{"title": "Test"}]
```"#;
        assert_eq!(extract_json(response), r#"[{"title": "Test"}]"#);
    }

    #[test]
    fn test_extract_json_with_text() {
        let response = r#"Here's the structure:
[{"title": "Test"}]
That's the result."#;
        assert_eq!(extract_json(response), r#"[{"title": "Test"}]"#);
    }

    #[test]
    fn test_extract_json_object_containing_array() {
        let response = r#"Answer: {"node_list": ["0001", "0003"]}"#;
        assert_eq!(
            extract_json(response),
            r#"{"node_list": ["0001", "0003"]}"#
        );
    }

    #[test]
    fn test_repair_none_and_trailing_commas() {
        let raw = r#"{"structure": None, "title": "None of the above", "page": 4,}"#;
        let repaired = repair_json(raw);
        assert_eq!(
            repaired,
            r#"{"structure": null, "title": "None of the above", "page": 4}"#
        );
    }

    #[test]
    fn test_parse_json_noisy_response() {
        #[derive(Deserialize)]
        struct Item {
            title: String,
            page: Option<u32>,
        }

        let response = "```json\n[\n  {\"title\": \"Article 1\", \"page\": None},\n  {\"title\": \"Article 2\", \"page\": 7},\n]\n```";
        let items: Vec<Item> = parse_json(response).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "Article 1");
        assert!(items[0].page.is_none());
        assert_eq!(items[1].page, Some(7));
    }

    #[test]
    fn test_parse_json_failure_is_parse_error() {
        let err = parse_json::<Vec<String>>("no json here").unwrap_err();
        assert!(matches!(err, PageIndexError::LlmParse(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_parse_yes_no() {
        let response = r#"{"thinking": "it is there", "answer": "Yes"}"#;
        assert!(parse_yes_no(response, "answer").unwrap());
        let response = r#"{"toc_detected": "no",}"#;
        assert!(!parse_yes_no(response, "toc_detected").unwrap());
        assert!(parse_yes_no(r#"{"other": 1}"#, "answer").is_err());
    }
}
