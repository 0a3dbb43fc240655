use serde_json::{Map, Value};
use tracing::warn;

use crate::browser::{BrowserSession, InteractionFault};
use crate::recipes::ExtractFields;

/// Read each field's selector off the current page.
///
/// 0 matches -> null, 1 -> trimmed string, N -> list of N trimmed strings. A
/// fault on one field nulls that field only.
pub async fn extract_fields(
    browser: &dyn BrowserSession,
    fields: &ExtractFields,
) -> Map<String, Value> {
    let mut data = Map::new();
    for (name, selector) in fields {
        let value = match extract_one(browser, selector).await {
            Ok(value) => value,
            Err(e) => {
                warn!(field = %name, selector = %selector, "Extract field failed: {}", e);
                Value::Null
            }
        };
        data.insert(name.clone(), value);
    }
    data
}

async fn extract_one(browser: &dyn BrowserSession, selector: &str) -> Result<Value, InteractionFault> {
    let elements = browser.find(selector).await?;
    let mut texts = Vec::with_capacity(elements.len());
    for element in &elements {
        texts.push(browser.element_text(element).await?.trim().to_string());
    }
    Ok(match texts.len() {
        0 => Value::Null,
        1 => Value::String(texts.remove(0)),
        _ => Value::Array(texts.into_iter().map(Value::String).collect()),
    })
}
