use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::recipes::ActionKind;

/// Next action chosen by the oracle. Consumed immediately, never persisted.
///
/// Models are loose with types, so scalars are coerced rather than rejected:
/// `"result": 42` reads as `"42"` and `"seconds": "3"` as `3.0`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Decision {
    #[serde(default, deserialize_with = "lenient_action")]
    pub action: ActionKind,
    #[serde(default, deserialize_with = "lenient_string")]
    pub selector: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub text: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "lenient_seconds")]
    pub seconds: Option<f64>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(
        default,
        rename = "result",
        alias = "result_text",
        deserialize_with = "lenient_string"
    )]
    pub result_text: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub reason: Option<String>,
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

fn lenient_seconds<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Non-string actions read as missing.
fn lenient_action<'de, D>(deserializer: D) -> Result<ActionKind, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => ActionKind::from(s),
        _ => ActionKind::default(),
    })
}

impl Decision {
    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            action: ActionKind::Fail,
            reason: Some(reason.into()),
            ..Default::default()
        }
    }

    fn has_action(&self) -> bool {
        !matches!(&self.action, ActionKind::Unknown(name) if name.trim().is_empty())
    }

    /// Parse an oracle response. Never errors: anything unusable becomes a `fail`.
    pub fn parse(raw: &str) -> Self {
        let Some(value) = extract_json_object(raw) else {
            return Self::fail(format!("oracle returned invalid JSON: {}", excerpt(raw, 200)));
        };
        match serde_json::from_value::<Decision>(value) {
            Ok(decision) if decision.has_action() => decision,
            Ok(_) => Self::fail(format!("oracle decision has no action: {}", excerpt(raw, 200))),
            Err(e) => Self::fail(format!(
                "oracle decision did not match the action schema ({}): {}",
                e,
                excerpt(raw, 200)
            )),
        }
    }
}

pub(crate) fn excerpt(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Find a JSON object in free-form model output.
///
/// Order: the body of the first fenced code block, then the whole text, then the
/// first `{` from which a complete JSON object parses.
pub fn extract_json_object(text: &str) -> Option<Value> {
    if let Some(block) = fenced_block(text) {
        if let Some(obj) = parse_object(block).or_else(|| scan_for_object(block)) {
            return Some(obj);
        }
    }
    parse_object(text).or_else(|| scan_for_object(text))
}

fn parse_object(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(v @ Value::Object(_)) => Some(v),
        _ => None,
    }
}

fn scan_for_object(text: &str) -> Option<Value> {
    for (idx, _) in text.match_indices('{') {
        let mut stream = serde_json::Deserializer::from_str(&text[idx..]).into_iter::<Value>();
        if let Some(Ok(v @ Value::Object(_))) = stream.next() {
            return Some(v);
        }
    }
    None
}

/// Body of the first ``` fence (language tag skipped).
fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_tag = &text[start + 3..];
    let body_start = after_tag.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_tag[body_start..];
    let end = body.find("```").unwrap_or(body.len());
    let block = body[..end].trim();
    (!block.is_empty()).then_some(block)
}
