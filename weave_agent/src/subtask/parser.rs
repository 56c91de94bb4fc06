//! Parsing of model responses into thoughts, actions and answers.
//!
//! Expected shape:
//!
//! ```text
//! Thought: I need the sum first
//! Actions: [{"tag": "a1", "name": "calculator", "path": "add", "input": {"a": 1, "b": 2}}]
//! ```
//!
//! or a final `Answer: ...`. The JSON block may be surrounded by prose,
//! wrapped in a fenced code block, be a single object instead of an array,
//! and contain raw newlines inside string values. Anything that still
//! fails to decode becomes a synthetic `error` action instead of an `Err`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::LazyLock;
use thiserror::Error;

/// Name and path of the synthetic action produced by a parse failure.
pub const ERROR_ACTION_NAME: &str = "error";

static THOUGHT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)Thought:\s*(.*?)(?:\n\s*(?:Actions?|Answer)\s*:|\n\s*```|$)").unwrap()
});

static ACTIONS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*Actions?[ \t]*:").unwrap());

static ANSWER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\bAnswer\s*:\s*(.*)$").unwrap());

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"```(?:json)?").unwrap());

/// Recoverable failure to decode the actions block.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionParseError {
    /// The block is missing or is not valid JSON.
    #[error("Actions JSON decoding error: {0}")]
    InvalidJson(String),

    /// The JSON does not describe actions.
    #[error("Actions validation error: {0}")]
    InvalidAction(String),
}

/// One requested tool call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionCall {
    /// Caller-supplied tag used to match results to requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Tool name
    pub name: String,
    /// Activity name
    #[serde(alias = "activity")]
    pub path: String,
    /// Structured input
    #[serde(default)]
    pub input: Value,
}

impl ActionCall {
    /// Synthetic action carrying a parse failure back to the model.
    pub fn parse_error(error: &ActionParseError) -> Self {
        Self {
            tag: None,
            name: ERROR_ACTION_NAME.to_string(),
            path: ERROR_ACTION_NAME.to_string(),
            input: json!({ "error": error.to_string() }),
        }
    }

    /// Whether this is the synthetic parse-failure action.
    pub fn is_parse_error(&self) -> bool {
        self.name == ERROR_ACTION_NAME && self.path == ERROR_ACTION_NAME
    }

    /// `name.path`, used in logs and observations.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.name, self.path)
    }
}

/// Parsed model response.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedResponse {
    /// Free-text reasoning
    pub thought: Option<String>,
    /// Requested actions; a single synthetic error action on parse failure
    pub actions: Vec<ActionCall>,
    /// Final answer when no actions were requested
    pub answer: Option<String>,
    /// Decoding failure, if any
    pub error: Option<ActionParseError>,
}

impl ParsedResponse {
    /// A response with no actions ends the loop.
    pub fn is_final(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Parses a raw model response.
///
/// # Example
///
/// ```
/// use weave_agent::subtask::parser::parse_response;
///
/// let parsed = parse_response(
///     "Thought: add them\nActions: [{\"name\": \"calc\", \"path\": \"add\", \"input\": {\"a\": 1}}]",
/// );
/// assert_eq!(parsed.thought.as_deref(), Some("add them"));
/// assert_eq!(parsed.actions[0].path, "add");
/// ```
pub fn parse_response(text: &str) -> ParsedResponse {
    let thought = THOUGHT_RE
        .captures(text)
        .map(|c| c[1].trim().to_string())
        .filter(|t| !t.is_empty());

    let answer_match = ANSWER_RE.captures(text);
    let answer_start = answer_match
        .as_ref()
        .and_then(|c| c.get(0))
        .map(|m| m.start());
    let answer = answer_match.map(|c| c[1].trim().to_string());

    // A marker with no JSON after it is prose, not a tool request.
    let actions_end = ACTIONS_RE
        .find(text)
        .filter(|m| answer_start.map_or(true, |a| m.start() < a))
        .map(|m| m.end())
        .filter(|&end| text[end..].contains(['{', '[']));

    if let Some(start) = actions_end {
        return match parse_actions(&text[start..]) {
            Ok(actions) if actions.is_empty() => ParsedResponse {
                thought,
                answer: Some(answer.unwrap_or_else(|| text.trim().to_string())),
                ..Default::default()
            },
            Ok(actions) => ParsedResponse {
                thought,
                actions,
                ..Default::default()
            },
            Err(error) => ParsedResponse {
                thought,
                actions: vec![ActionCall::parse_error(&error)],
                error: Some(error),
                ..Default::default()
            },
        };
    }

    if answer.is_none() {
        if let Some(fence) = FENCE_RE.find(text) {
            if let Ok(actions) = parse_actions(&text[fence.end()..]) {
                if !actions.is_empty() {
                    return ParsedResponse {
                        thought,
                        actions,
                        ..Default::default()
                    };
                }
            }
        }
    }

    ParsedResponse {
        thought,
        answer: Some(answer.unwrap_or_else(|| text.trim().to_string())),
        ..Default::default()
    }
}

/// Decodes the first JSON block of `segment` as one or many actions.
pub fn parse_actions(segment: &str) -> Result<Vec<ActionCall>, ActionParseError> {
    let block = extract_json_block(segment)
        .ok_or_else(|| ActionParseError::InvalidJson("no complete JSON block found".to_string()))?;
    let value: Value = serde_json::from_str(&escape_control_chars(block))
        .map_err(|e| ActionParseError::InvalidJson(e.to_string()))?;

    let items = match value {
        Value::Array(items) => items,
        object @ Value::Object(_) => vec![object],
        other => {
            return Err(ActionParseError::InvalidAction(format!(
                "expected an action object or array, got {}",
                other
            )))
        }
    };

    items
        .into_iter()
        .map(|item| {
            serde_json::from_value::<ActionCall>(item)
                .map_err(|e| ActionParseError::InvalidAction(e.to_string()))
        })
        .collect()
}

/// Returns the first JSON value embedded in `text`.
///
/// Every `{` or `[` is tried as a start position until one yields a
/// complete, decodable block.
pub fn extract_json(text: &str) -> Option<Value> {
    text.char_indices()
        .filter(|(_, c)| *c == '{' || *c == '[')
        .find_map(|(i, _)| {
            let block = extract_json_block(&text[i..])?;
            serde_json::from_str(&escape_control_chars(block)).ok()
        })
}

/// Slices the first balanced `{...}` or `[...]` block, ignoring brackets
/// inside string literals.
fn extract_json_block(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[start..start + offset + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Escapes raw control characters that appear inside string literals.
fn escape_control_chars(block: &str) -> String {
    let mut out = String::with_capacity(block.len());
    let mut in_string = false;
    let mut escaped = false;

    for c in block.chars() {
        if in_string {
            if escaped {
                escaped = false;
                out.push(c);
                continue;
            }
            match c {
                '\\' => {
                    escaped = true;
                    out.push(c);
                }
                '"' => {
                    in_string = false;
                    out.push(c);
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
                c => out.push(c),
            }
        } else {
            if c == '"' {
                in_string = true;
            }
            out.push(c);
        }
    }
    out
}
