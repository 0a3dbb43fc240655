use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Short stable cache key for a (domain, goal) pair (16 hex chars of blake3).
pub type RecipeFingerprint = String;

/// Field name -> CSS selector.
pub type ExtractFields = BTreeMap<String, String>;

const FINGERPRINT_LEN: usize = 16;

/// Lowercase, trim, collapse internal whitespace.
pub fn normalize_goal(goal: &str) -> String {
    goal.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn fingerprint(domain: &str, goal: &str) -> RecipeFingerprint {
    let key = format!("{}::{}", domain, normalize_goal(goal));
    let mut hex = blake3::hash(key.as_bytes()).to_hex().to_string();
    hex.truncate(FINGERPRINT_LEN);
    hex
}

/// Every action either a recipe or the oracle can name. Unrecognized names are
/// kept verbatim so they can be reported back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActionKind {
    Goto,
    Click,
    Type,
    ScrollDown,
    ScrollUp,
    Wait,
    Extract,
    Done,
    Fail,
    Unknown(String),
}

impl ActionKind {
    pub fn as_str(&self) -> &str {
        match self {
            ActionKind::Goto => "goto",
            ActionKind::Click => "click",
            ActionKind::Type => "type",
            ActionKind::ScrollDown => "scroll_down",
            ActionKind::ScrollUp => "scroll_up",
            ActionKind::Wait => "wait",
            ActionKind::Extract => "extract",
            ActionKind::Done => "done",
            ActionKind::Fail => "fail",
            ActionKind::Unknown(s) => s,
        }
    }

    /// Actions allowed inside a persisted recipe.
    pub fn is_replayable(&self) -> bool {
        !matches!(
            self,
            ActionKind::Done | ActionKind::Fail | ActionKind::Unknown(_)
        )
    }
}

impl Default for ActionKind {
    fn default() -> Self {
        ActionKind::Unknown(String::new())
    }
}

impl From<String> for ActionKind {
    fn from(raw: String) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "goto" => ActionKind::Goto,
            "click" => ActionKind::Click,
            "type" => ActionKind::Type,
            "scroll_down" => ActionKind::ScrollDown,
            "scroll_up" => ActionKind::ScrollUp,
            "wait" => ActionKind::Wait,
            "extract" => ActionKind::Extract,
            "done" => ActionKind::Done,
            "fail" => ActionKind::Fail,
            _ => ActionKind::Unknown(raw),
        }
    }
}

impl From<ActionKind> for String {
    fn from(kind: ActionKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_wait_after() -> f64 {
    1.0
}

/// Explicit `null` reads the same as an absent key.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn null_as_default_wait_after<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or_else(default_wait_after))
}

/// A single deterministic step in a recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeStep {
    #[serde(default)]
    pub action: ActionKind,
    #[serde(default)]
    pub selector: Option<String>,
    /// Tried in order after `selector` matches nothing.
    #[serde(default, deserialize_with = "null_as_default")]
    pub fallback_selectors: Vec<String>,
    /// Supports `{variable}` placeholders.
    #[serde(default)]
    pub text: Option<String>,
    /// Supports `{variable}` placeholders.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub seconds: Option<f64>,
    #[serde(default)]
    pub extract_fields: Option<ExtractFields>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    /// Failure doesn't abort the recipe.
    #[serde(default, deserialize_with = "null_as_default")]
    pub optional: bool,
    /// Settle delay in seconds after the action.
    #[serde(
        default = "default_wait_after",
        deserialize_with = "null_as_default_wait_after"
    )]
    pub wait_after: f64,
}

impl RecipeStep {
    pub fn new(action: ActionKind) -> Self {
        Self {
            action,
            selector: None,
            fallback_selectors: Vec::new(),
            text: None,
            url: None,
            seconds: None,
            extract_fields: None,
            description: String::new(),
            optional: false,
            wait_after: default_wait_after(),
        }
    }
}

/// What happened on one replay attempt, as far as the counters care.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayOutcome {
    Succeeded,
    /// The replay broke and exploration took over.
    FellBack,
}

/// A deterministic recipe generated from an oracle-guided crawl.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    #[serde(alias = "recipe_id")]
    pub fingerprint: RecipeFingerprint,
    pub domain: String,
    #[serde(alias = "goal")]
    pub goal_text: String,
    pub start_url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub steps: Vec<RecipeStep>,
    #[serde(default)]
    pub extract_fields: Option<ExtractFields>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub last_used: i64,
    #[serde(default)]
    pub times_used: u32,
    #[serde(default)]
    pub times_succeeded: u32,
    #[serde(default)]
    pub ai_fallback_count: u32,
    #[serde(default = "default_version")]
    pub version: u32,
}

fn default_version() -> u32 {
    1
}

impl Recipe {
    /// Returns the recipe with counters advanced for `outcome`. Steps are untouched.
    pub fn with_outcome(&self, outcome: ReplayOutcome, now: i64) -> Recipe {
        let mut next = self.clone();
        next.times_used = next.times_used.saturating_add(1);
        match outcome {
            ReplayOutcome::Succeeded => {
                next.times_succeeded = next.times_succeeded.saturating_add(1);
            }
            ReplayOutcome::FellBack => {
                next.ai_fallback_count = next.ai_fallback_count.saturating_add(1);
            }
        }
        next.last_used = now;
        next
    }

    /// "succeeded/used", as shown by `--list-recipes`.
    pub fn success_rate(&self) -> String {
        format!("{}/{}", self.times_succeeded, self.times_used)
    }
}
