//! The single action handler shared by recipe replay and oracle exploration.

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::browser::{BrowserSession, ElementHandle, InteractionFault};
use crate::recipes::{ActionKind, RecipeStep};

use super::decision::Decision;

pub const SCROLL_AMOUNT: i64 = 600;
const DEFAULT_WAIT_SECS: f64 = 2.0;
const PRE_INTERACTION_SETTLE: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    #[error("No element found for selector: {selector} (+ {fallbacks} fallbacks)")]
    NoMatch { selector: String, fallbacks: usize },
    #[error("{action} requires a {field}")]
    MissingField {
        action: ActionKind,
        field: &'static str,
    },
    #[error("Unknown action: {0}")]
    UnknownAction(String),
    #[error(transparent)]
    Interaction(#[from] InteractionFault),
}

/// A fully resolved action: templates substituted, delays chosen.
#[derive(Debug, Clone)]
pub struct ActionRequest<'a> {
    pub kind: &'a ActionKind,
    pub selector: Option<&'a str>,
    pub fallback_selectors: &'a [String],
    pub text: Option<String>,
    pub url: Option<String>,
    pub seconds: Option<f64>,
    pub wait_after: Duration,
}

impl<'a> ActionRequest<'a> {
    pub fn from_step(step: &'a RecipeStep, variables: &HashMap<String, String>) -> Self {
        Self {
            kind: &step.action,
            selector: step.selector.as_deref(),
            fallback_selectors: &step.fallback_selectors,
            text: step.text.as_deref().map(|t| substitute(t, variables)),
            url: step.url.as_deref().map(|u| substitute(u, variables)),
            seconds: step.seconds,
            wait_after: secs(step.wait_after),
        }
    }

    /// Oracle actions carry no fallbacks and use fixed settle delays per kind.
    pub fn from_decision(decision: &'a Decision) -> Self {
        let wait_after = match decision.action {
            ActionKind::Goto => Duration::from_secs(2),
            ActionKind::Click => Duration::from_secs(1),
            _ => Duration::from_millis(500),
        };
        Self {
            kind: &decision.action,
            selector: decision.selector.as_deref(),
            fallback_selectors: &[],
            text: decision.text.clone(),
            url: decision.url.clone(),
            seconds: decision.seconds,
            wait_after,
        }
    }
}

/// Seconds to a Duration, treating negative or non-finite values as zero.
pub fn secs(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}

/// Replace each `{name}` with `variables[name]`; unknown placeholders stay as-is.
pub fn substitute(template: &str, variables: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let name = &after[..close];
                match variables.get(name) {
                    Some(value) => {
                        out.push_str(value);
                        rest = &after[close + 1..];
                    }
                    None => {
                        out.push('{');
                        rest = after;
                    }
                }
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// First element of the first candidate selector that matches anything.
pub async fn resolve_element(
    browser: &dyn BrowserSession,
    selector: Option<&str>,
    fallbacks: &[String],
) -> Result<ElementHandle, StepError> {
    let candidates = selector
        .into_iter()
        .chain(fallbacks.iter().map(String::as_str))
        .filter(|s| !s.trim().is_empty());

    for candidate in candidates {
        match browser.find(candidate).await {
            Ok(mut found) if !found.is_empty() => {
                if Some(candidate) != selector {
                    debug!(selector = ?selector, fallback = candidate, "matched via fallback selector");
                }
                return Ok(found.swap_remove(0));
            }
            Ok(_) => {}
            Err(e) => debug!(selector = candidate, "selector lookup failed: {}", e),
        }
    }

    Err(StepError::NoMatch {
        selector: selector.unwrap_or_default().to_string(),
        fallbacks: fallbacks.len(),
    })
}

/// Execute one action against the browser. `extract`, `done` and `fail` have no
/// browser side effect here.
pub async fn perform(
    browser: &dyn BrowserSession,
    req: &ActionRequest<'_>,
) -> Result<(), StepError> {
    match req.kind {
        ActionKind::Goto => {
            let url = req
                .url
                .as_deref()
                .filter(|u| !u.is_empty())
                .ok_or(StepError::MissingField {
                    action: ActionKind::Goto,
                    field: "url",
                })?;
            browser.navigate(url).await?;
            tokio::time::sleep(req.wait_after).await;
        }
        ActionKind::Click => {
            let element = resolve_element(browser, req.selector, req.fallback_selectors).await?;
            browser.scroll_into_view(&element).await?;
            tokio::time::sleep(PRE_INTERACTION_SETTLE).await;
            browser.click(&element).await?;
            tokio::time::sleep(req.wait_after).await;
        }
        ActionKind::Type => {
            let element = resolve_element(browser, req.selector, req.fallback_selectors).await?;
            browser.scroll_into_view(&element).await?;
            tokio::time::sleep(PRE_INTERACTION_SETTLE).await;
            browser
                .type_text(&element, req.text.as_deref().unwrap_or_default())
                .await?;
            tokio::time::sleep(req.wait_after).await;
        }
        ActionKind::ScrollDown => {
            browser.scroll_by(SCROLL_AMOUNT).await?;
            tokio::time::sleep(req.wait_after).await;
        }
        ActionKind::ScrollUp => {
            browser.scroll_by(-SCROLL_AMOUNT).await?;
            tokio::time::sleep(req.wait_after).await;
        }
        ActionKind::Wait => {
            tokio::time::sleep(secs(req.seconds.unwrap_or(DEFAULT_WAIT_SECS))).await;
        }
        ActionKind::Extract | ActionKind::Done | ActionKind::Fail => {}
        ActionKind::Unknown(name) => return Err(StepError::UnknownAction(name.clone())),
    }
    Ok(())
}
