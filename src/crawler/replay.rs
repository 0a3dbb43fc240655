use std::collections::HashMap;

use anyhow::{Context, Result};
use serde_json::Map;
use tracing::{info, warn};

use crate::browser::BrowserSession;
use crate::recipes::{ActionKind, Recipe, RecipeStore, ReplayOutcome};

use super::actions::{perform, ActionRequest};
use super::extract::extract_fields;
use super::types::{CrawlResult, ExplorationStep};

/// Replay a stored recipe. Counters are persisted only on full success; the
/// caller owns the fallback bookkeeping.
pub async fn run_recipe(
    browser: &dyn BrowserSession,
    store: &RecipeStore,
    recipe: &Recipe,
    variables: &HashMap<String, String>,
) -> CrawlResult {
    let mut trace = Vec::new();
    match replay_steps(browser, recipe, variables, &mut trace).await {
        Ok(Ok(data)) => {
            let updated = recipe.with_outcome(ReplayOutcome::Succeeded, chrono::Utc::now().timestamp());
            if let Err(e) = store.save(&updated).await {
                warn!(fingerprint = %recipe.fingerprint, "Failed to persist recipe counters: {:#}", e);
            }
            info!(
                fingerprint = %recipe.fingerprint,
                steps = recipe.steps.len(),
                "Recipe replay succeeded"
            );
            CrawlResult {
                success: true,
                data: (!data.is_empty()).then_some(data),
                result_text: Some(format!(
                    "Recipe executed successfully ({} steps)",
                    recipe.steps.len()
                )),
                steps: trace,
                used_recipe: true,
                fingerprint: Some(recipe.fingerprint.clone()),
                ..Default::default()
            }
        }
        Ok(Err(step_failure)) => {
            warn!(fingerprint = %recipe.fingerprint, "{}", step_failure);
            CrawlResult {
                used_recipe: true,
                fingerprint: Some(recipe.fingerprint.clone()),
                ..CrawlResult::failed(step_failure, trace)
            }
        }
        Err(e) => {
            warn!(fingerprint = %recipe.fingerprint, "Recipe replay aborted: {:#}", e);
            CrawlResult {
                used_recipe: true,
                fingerprint: Some(recipe.fingerprint.clone()),
                ..CrawlResult::failed(format!("{:#}", e), trace)
            }
        }
    }
}

/// Outer `Err` is an unexpected fault; inner `Err` is a required step failing.
async fn replay_steps(
    browser: &dyn BrowserSession,
    recipe: &Recipe,
    variables: &HashMap<String, String>,
    trace: &mut Vec<ExplorationStep>,
) -> Result<std::result::Result<Map<String, serde_json::Value>, String>> {
    let starts_with_goto = matches!(
        recipe.steps.first().map(|s| &s.action),
        Some(ActionKind::Goto)
    );
    if !starts_with_goto {
        browser
            .navigate(&recipe.start_url)
            .await
            .with_context(|| format!("navigate to start url {}", recipe.start_url))?;
    }

    for (i, step) in recipe.steps.iter().enumerate() {
        let index = i as u32 + 1;
        let outcome = perform(browser, &ActionRequest::from_step(step, variables)).await;
        let url = browser.current_url().await.context("read current url")?;

        trace.push(ExplorationStep {
            index,
            url,
            action: step.action.clone(),
            selector: step.selector.clone(),
            text: step.text.clone(),
            data: None,
            result_text: None,
            reason: (!step.description.is_empty()).then(|| step.description.clone()),
            error: outcome.as_ref().err().map(ToString::to_string),
        });

        if let Err(e) = outcome {
            if step.optional {
                info!(step = index, action = %step.action, "Optional step failed, continuing: {}", e);
                continue;
            }
            return Ok(Err(format!("Recipe step {} failed: {}", index, e)));
        }
    }

    let mut data = Map::new();
    if let Some(fields) = &recipe.extract_fields {
        data.extend(extract_fields(browser, fields).await);
    }
    for fields in recipe.steps.iter().filter_map(|s| s.extract_fields.as_ref()) {
        data.extend(extract_fields(browser, fields).await);
    }
    Ok(Ok(data))
}
