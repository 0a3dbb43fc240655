use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::browser::traffic::DiscoveredApi;
use crate::recipes::{ActionKind, RecipeFingerprint};

/// One entry of a crawl trace. Immutable once pushed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplorationStep {
    /// 1-based, strictly increasing within one run.
    pub index: u32,
    /// Page URL once the step's action has run, in both exploration and replay.
    pub url: String,
    pub action: ActionKind,
    pub selector: Option<String>,
    pub text: Option<String>,
    pub data: Option<Value>,
    pub result_text: Option<String>,
    pub reason: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlResult {
    pub success: bool,
    pub data: Option<Map<String, Value>>,
    pub result_text: Option<String>,
    pub error: Option<String>,
    pub steps: Vec<ExplorationStep>,
    pub used_recipe: bool,
    pub fingerprint: Option<RecipeFingerprint>,
    /// A stored recipe broke and exploration took over.
    pub ai_fallback_used: bool,
    pub recipe_generated: bool,
    pub discovered_apis: Vec<DiscoveredApi>,
}

impl CrawlResult {
    pub fn failed(error: impl Into<String>, steps: Vec<ExplorationStep>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            steps,
            ..Default::default()
        }
    }
}

/// Per-call knobs for `SmartCrawler::crawl`.
#[derive(Debug, Clone, Default)]
pub struct CrawlOptions {
    /// Values for `{name}` placeholders in recipe text/url templates.
    pub variables: HashMap<String, String>,
    /// Skip any stored recipe and explore (refreshes a stale recipe).
    pub force_exploration: bool,
    /// Save a full-page screenshot here before the session closes.
    pub screenshot: Option<PathBuf>,
}

/// Turn an oracle `data` value into result data; non-objects are wrapped.
pub(crate) fn data_map(value: Option<Value>) -> Option<Map<String, Value>> {
    match value? {
        Value::Object(map) => Some(map),
        Value::Null => None,
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            Some(map)
        }
    }
}
