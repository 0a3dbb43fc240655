use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

use crate::llm::DecisionOracle;
use crate::recipes::types::null_as_default;
use crate::recipes::{fingerprint, ActionKind, ExtractFields, Recipe, RecipeStep, RecipeStore};

use super::decision::{excerpt, extract_json_object};
use super::prompts::RECIPE_PROMPT;
use super::types::ExplorationStep;

#[derive(Debug, Deserialize)]
struct RecipeDraft {
    #[serde(default, deserialize_with = "null_as_default")]
    steps: Vec<RecipeStep>,
    #[serde(default)]
    extract_fields: Option<ExtractFields>,
}

/// Distill a successful exploration into a stored recipe. Best effort: any
/// failure is logged and yields `None`.
pub async fn synthesize(
    oracle: &dyn DecisionOracle,
    store: &RecipeStore,
    domain: &str,
    goal: &str,
    start_url: &str,
    trace: &[ExplorationStep],
) -> Option<Recipe> {
    match try_synthesize(oracle, store, domain, goal, start_url, trace).await {
        Ok(recipe) => {
            info!(
                fingerprint = %recipe.fingerprint,
                steps = recipe.steps.len(),
                "Generated recipe"
            );
            Some(recipe)
        }
        Err(e) => {
            warn!(domain, goal, "Recipe synthesis failed: {:#}", e);
            None
        }
    }
}

async fn try_synthesize(
    oracle: &dyn DecisionOracle,
    store: &RecipeStore,
    domain: &str,
    goal: &str,
    start_url: &str,
    trace: &[ExplorationStep],
) -> Result<Recipe> {
    let raw = oracle
        .decide(RECIPE_PROMPT, &transcript(domain, goal, start_url, trace))
        .await
        .context("recipe generation request failed")?;

    let value = extract_json_object(&raw)
        .with_context(|| format!("recipe generation returned invalid JSON: {}", excerpt(&raw, 300)))?;
    let draft: RecipeDraft =
        serde_json::from_value(value).context("recipe draft did not match the recipe schema")?;
    validate(&draft)?;

    let now = chrono::Utc::now().timestamp();
    let recipe = Recipe {
        fingerprint: fingerprint(domain, goal),
        domain: domain.to_string(),
        goal_text: goal.to_string(),
        start_url: start_url.to_string(),
        steps: draft.steps,
        extract_fields: draft.extract_fields.filter(|f| !f.is_empty()),
        created_at: now,
        last_used: now,
        times_used: 1,
        times_succeeded: 1,
        ai_fallback_count: 0,
        version: 1,
    };
    store.save(&recipe).await?;
    Ok(recipe)
}

fn validate(draft: &RecipeDraft) -> Result<()> {
    let has_fields = draft.extract_fields.as_ref().is_some_and(|f| !f.is_empty());
    if draft.steps.is_empty() && !has_fields {
        bail!("recipe has no steps and no extract fields");
    }

    for (i, step) in draft.steps.iter().enumerate() {
        let n = i + 1;
        if !step.action.is_replayable() {
            bail!("step {} has non-replayable action '{}'", n, step.action);
        }
        let blank = |v: &Option<String>| v.as_deref().map_or(true, |s| s.trim().is_empty());
        match step.action {
            ActionKind::Click | ActionKind::Type if blank(&step.selector) => {
                bail!("step {} ({}) has no selector", n, step.action)
            }
            ActionKind::Goto if blank(&step.url) => bail!("step {} (goto) has no url", n),
            _ => {}
        }
    }
    Ok(())
}

/// Plain-text account of the session handed to the recipe prompt.
pub fn transcript(domain: &str, goal: &str, start_url: &str, trace: &[ExplorationStep]) -> String {
    let mut out = format!(
        "GOAL: {}\nSTART URL: {}\nDOMAIN: {}\n\nSUCCESSFUL CRAWL STEPS:\n",
        goal, start_url, domain
    );
    for step in trace {
        let mut line = format!("  Step {}: {}", step.index, step.action);
        if let Some(selector) = &step.selector {
            line.push_str(&format!(" selector='{}'", selector));
        }
        if let Some(text) = &step.text {
            line.push_str(&format!(" text='{}'", text));
        }
        if step.url != start_url {
            line.push_str(&format!(" url='{}'", step.url));
        }
        if let Some(data) = &step.data {
            line.push_str(&format!(" data={}", data));
        }
        if let Some(reason) = &step.reason {
            line.push_str(&format!(" - {}", reason));
        }
        if let Some(error) = &step.error {
            line.push_str(&format!(" [ERROR: {}]", error));
        }
        out.push_str(&line);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::testing::ScriptedOracle;
    use serde_json::json;

    fn step(index: u32, action: ActionKind, url: &str) -> ExplorationStep {
        ExplorationStep {
            index,
            url: url.to_string(),
            action,
            selector: None,
            text: None,
            data: None,
            result_text: None,
            reason: None,
            error: None,
        }
    }

    #[test]
    fn test_transcript_lines() {
        let mut click = step(1, ActionKind::Click, "https://shop.test/");
        click.selector = Some("#buy".to_string());
        click.reason = Some("open product".to_string());
        click.error = Some("Element became stale".to_string());
        let mut extract = step(2, ActionKind::Extract, "https://shop.test/item");
        extract.data = Some(json!({"price": "$42"}));

        let text = transcript("shop.test", "find price", "https://shop.test/", &[click, extract]);
        assert!(text.starts_with("GOAL: find price\nSTART URL: https://shop.test/\nDOMAIN: shop.test\n"));
        assert!(text.contains(
            "  Step 1: click selector='#buy' - open product [ERROR: Element became stale]\n"
        ));
        assert!(text.contains("  Step 2: extract url='https://shop.test/item' data={\"price\":\"$42\"}\n"));
    }

    #[tokio::test]
    async fn test_synthesizes_and_saves() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecipeStore::new(dir.path());
        let oracle = ScriptedOracle::new(&[r##"```json
{"steps": [
  {"action": "goto", "url": "https://shop.test/"},
  {"action": "click", "selector": "#buy", "fallback_selectors": [".buy"], "optional": true}
], "extract_fields": {"price": ".price"}}
```"##]);

        let recipe = synthesize(&oracle, &store, "shop.test", "Find Price", "https://shop.test/", &[])
            .await
            .unwrap();
        assert_eq!(recipe.fingerprint, fingerprint("shop.test", "find price"));
        assert_eq!(recipe.steps.len(), 2);
        assert!(recipe.steps[1].optional);
        assert_eq!(recipe.version, 1);
        assert_eq!((recipe.times_used, recipe.times_succeeded), (1, 1));
        assert_eq!(recipe.created_at, recipe.last_used);
        assert_eq!(store.load(&recipe.fingerprint).await.unwrap(), recipe);
    }

    #[tokio::test]
    async fn test_draft_with_explicit_nulls() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecipeStore::new(dir.path());
        let oracle = ScriptedOracle::new(&[r##"{"steps": [
  {"action": "goto", "url": "https://shop.test/", "selector": null, "fallback_selectors": null},
  {"action": "click", "selector": "#buy", "fallback_selectors": null, "description": null,
   "optional": null, "wait_after": null}
], "extract_fields": null}"##]);

        let recipe = synthesize(&oracle, &store, "shop.test", "g", "https://shop.test/", &[])
            .await
            .unwrap();
        assert!(recipe.steps[1].fallback_selectors.is_empty());
        assert!(!recipe.steps[1].optional);
        assert_eq!(recipe.steps[1].wait_after, 1.0);
        assert!(recipe.extract_fields.is_none());
    }

    #[tokio::test]
    async fn test_rejects_invalid_drafts() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecipeStore::new(dir.path());
        for reply in [
            "no json here",
            r#"{"steps": []}"#,
            r#"{"steps": [{"action": "done"}]}"#,
            r#"{"steps": [{"action": "click"}]}"#,
            r#"{"steps": [{"action": "goto", "url": "  "}]}"#,
            r#"{"steps": [{"action": "hover", "selector": "a"}]}"#,
        ] {
            let oracle = ScriptedOracle::new(&[reply]);
            let recipe = synthesize(&oracle, &store, "shop.test", "g", "https://shop.test/", &[]).await;
            assert!(recipe.is_none(), "accepted {}", reply);
        }
        assert!(store.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_fields_only_recipe_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecipeStore::new(dir.path());
        let oracle = ScriptedOracle::new(&[r#"{"extract_fields": {"title": "h1"}}"#]);
        let recipe = synthesize(&oracle, &store, "shop.test", "g", "https://shop.test/", &[]).await;
        assert!(recipe.unwrap().steps.is_empty());
    }
}
