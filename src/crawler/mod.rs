pub mod actions;
pub mod decision;
pub mod explore;
pub mod extract;
pub mod prompts;
pub mod replay;
pub mod synth;
#[cfg(test)]
pub mod testing;
pub mod types;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::browser::traffic::TrafficAnalyzer;
use crate::browser::{BrowserLauncher, BrowserSession};
use crate::llm::DecisionOracle;
use crate::recipes::{fingerprint, Recipe, RecipeStore, ReplayOutcome};
use crate::summarize::PageSummarizer;

use explore::Explorer;
pub use types::{CrawlOptions, CrawlResult, ExplorationStep};

/// Host of `url`, with `:port` when one is given explicitly.
pub fn domain_of(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(match parsed.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Launches a session into `slot` unless one is already open.
async fn open_session<'a>(
    launcher: &dyn BrowserLauncher,
    slot: &'a mut Option<Box<dyn BrowserSession>>,
) -> Result<&'a dyn BrowserSession> {
    if slot.is_none() {
        *slot = Some(launcher.launch().await.context("launch browser")?);
    }
    slot.as_deref().context("browser session unavailable")
}

/// Routes each goal to a stored recipe or to oracle-guided exploration, and
/// learns a recipe from every successful exploration.
pub struct SmartCrawler {
    store: RecipeStore,
    oracle: Arc<dyn DecisionOracle>,
    launcher: Arc<dyn BrowserLauncher>,
    summarizer: Arc<dyn PageSummarizer>,
    analyzer: Option<Arc<dyn TrafficAnalyzer>>,
    max_steps: u32,
    session: Option<Box<dyn BrowserSession>>,
}

impl SmartCrawler {
    pub fn new(
        store: RecipeStore,
        oracle: Arc<dyn DecisionOracle>,
        launcher: Arc<dyn BrowserLauncher>,
        summarizer: Arc<dyn PageSummarizer>,
        max_steps: u32,
    ) -> Self {
        Self {
            store,
            oracle,
            launcher,
            summarizer,
            analyzer: None,
            max_steps,
            session: None,
        }
    }

    /// Probe discovered API endpoints at the end of each crawl.
    pub fn with_analyzer(mut self, analyzer: Arc<dyn TrafficAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    pub fn store(&self) -> &RecipeStore {
        &self.store
    }

    /// Never returns `Err`: every failure ends up in the returned result. The
    /// browser session is closed before returning.
    pub async fn crawl(&mut self, goal: &str, start_url: &str, options: &CrawlOptions) -> CrawlResult {
        let Some(domain) = domain_of(start_url) else {
            warn!(start_url, "Refusing to crawl an unparsable start URL");
            return CrawlResult::failed(format!("invalid start URL: {}", start_url), Vec::new());
        };
        let fp = fingerprint(&domain, goal);
        info!(goal, domain = %domain, fingerprint = %fp, "Starting crawl");

        let mut result = self.route(&domain, goal, start_url, &fp, options).await;
        result.fingerprint = Some(fp);
        self.finish(result, options).await
    }

    async fn route(
        &mut self,
        domain: &str,
        goal: &str,
        start_url: &str,
        fp: &str,
        options: &CrawlOptions,
    ) -> CrawlResult {
        let mut fell_back = false;

        if options.force_exploration {
            info!(fingerprint = fp, "Forced exploration, skipping stored recipe");
        } else if let Some(recipe) = self.store.load(fp).await {
            info!(fingerprint = fp, steps = recipe.steps.len(), "Recipe hit, replaying");
            let result = match open_session(self.launcher.as_ref(), &mut self.session).await {
                Ok(browser) => {
                    replay::run_recipe(browser, &self.store, &recipe, &options.variables).await
                }
                Err(e) => CrawlResult::failed(format!("{:#}", e), Vec::new()),
            };
            if result.success {
                return result;
            }

            warn!(
                fingerprint = fp,
                error = result.error.as_deref().unwrap_or_default(),
                "Recipe failed, falling back to exploration"
            );
            self.record_fallback(&recipe).await;
            self.close().await;
            fell_back = true;
        }

        let mut result = match open_session(self.launcher.as_ref(), &mut self.session).await {
            Ok(browser) => {
                Explorer {
                    browser,
                    oracle: self.oracle.as_ref(),
                    summarizer: self.summarizer.as_ref(),
                    max_steps: self.max_steps,
                }
                .run(goal, start_url)
                .await
            }
            Err(e) => CrawlResult::failed(format!("{:#}", e), Vec::new()),
        };
        result.ai_fallback_used = fell_back;

        if result.success {
            info!("Exploration succeeded, generating recipe");
            let recipe = synth::synthesize(
                self.oracle.as_ref(),
                &self.store,
                domain,
                goal,
                start_url,
                &result.steps,
            )
            .await;
            result.recipe_generated = recipe.is_some();
            if !result.recipe_generated {
                warn!("Recipe generation failed, exploration result still stands");
            }
        }
        result
    }

    async fn record_fallback(&self, recipe: &Recipe) {
        let updated = recipe.with_outcome(ReplayOutcome::FellBack, chrono::Utc::now().timestamp());
        if let Err(e) = self.store.save(&updated).await {
            warn!(fingerprint = %recipe.fingerprint, "Failed to persist fallback counters: {:#}", e);
        }
    }

    /// Screenshot and API discovery are best effort; the session is always closed.
    async fn finish(&mut self, mut result: CrawlResult, options: &CrawlOptions) -> CrawlResult {
        if let Some(browser) = self.session.as_deref() {
            if let Some(path) = &options.screenshot {
                match browser.screenshot(path).await {
                    Ok(()) => info!(path = ?path, "Saved screenshot"),
                    Err(e) => warn!(path = ?path, "Screenshot failed: {}", e),
                }
            }
            if let Some(analyzer) = &self.analyzer {
                match (browser.network_traffic().await, browser.cookies().await) {
                    (Ok(traffic), Ok(cookies)) => {
                        result.discovered_apis = analyzer.discover(&traffic, &cookies).await;
                        info!(count = result.discovered_apis.len(), "API discovery finished");
                    }
                    (Err(e), _) | (_, Err(e)) => warn!("API discovery skipped: {}", e),
                }
            }
        }
        self.close().await;
        result
    }

    /// Tear down the browser session. Safe to call repeatedly.
    pub async fn close(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.close().await {
                warn!("Browser close failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipes::{ActionKind, RecipeStep};
    use serde_json::json;
    use super::testing::{Call, IdentitySummarizer, MockBrowser, MockLauncher, ScriptedOracle};

    const GOAL: &str = "find price";
    const START: &str = "https://example.com/";
    const RECIPE_REPLY: &str = r#"{"steps": [{"action": "goto", "url": "https://example.com/"}], "extract_fields": {"price": ".price"}}"#;

    fn crawler(
        dir: &std::path::Path,
        launcher: &MockLauncher,
        oracle: &ScriptedOracle,
    ) -> SmartCrawler {
        SmartCrawler::new(
            RecipeStore::new(dir),
            Arc::new(oracle.clone()),
            Arc::new(launcher.clone()),
            Arc::new(IdentitySummarizer),
            5,
        )
    }

    fn stored_recipe(steps: Vec<RecipeStep>) -> Recipe {
        Recipe {
            fingerprint: fingerprint("example.com", GOAL),
            domain: "example.com".to_string(),
            goal_text: GOAL.to_string(),
            start_url: START.to_string(),
            steps,
            extract_fields: Some([("price".to_string(), ".price".to_string())].into()),
            created_at: 100,
            last_used: 100,
            times_used: 3,
            times_succeeded: 3,
            ai_fallback_count: 0,
            version: 1,
        }
    }

    fn click(selector: &str, fallbacks: &[&str]) -> RecipeStep {
        let mut step = RecipeStep::new(ActionKind::Click);
        step.selector = Some(selector.to_string());
        step.fallback_selectors = fallbacks.iter().map(|s| s.to_string()).collect();
        step
    }

    #[test]
    fn test_domain_of() {
        assert_eq!(domain_of("https://example.com/a?b=c").as_deref(), Some("example.com"));
        assert_eq!(domain_of("http://localhost:8080/").as_deref(), Some("localhost:8080"));
        assert!(domain_of("not a url").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_miss_explores_and_learns_recipe() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = MockLauncher::new(MockBrowser::new());
        let oracle = ScriptedOracle::new(&[r#"{"action":"done","result":"$42"}"#, RECIPE_REPLY]);
        let mut crawler = crawler(dir.path(), &launcher, &oracle);

        let result = crawler.crawl(GOAL, START, &CrawlOptions::default()).await;
        assert!(result.success);
        assert!(!result.used_recipe);
        assert!(!result.ai_fallback_used);
        assert!(result.recipe_generated);
        assert_eq!(result.result_text.as_deref(), Some("$42"));

        let fp = fingerprint("example.com", GOAL);
        assert_eq!(result.fingerprint.as_deref(), Some(fp.as_str()));
        let stored = crawler.store().load(&fp).await.unwrap();
        assert_eq!(stored.times_used, 1);
        assert_eq!(stored.goal_text, GOAL);
        assert_eq!(launcher.browser.calls().last(), Some(&Call::Close));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_replays_with_fallback_selector() {
        let dir = tempfile::tempdir().unwrap();
        let browser = MockBrowser::new()
            .with_elements("button.buy", &["Buy"])
            .with_elements(".price", &["$42"]);
        let launcher = MockLauncher::new(browser);
        let oracle = ScriptedOracle::new(&[]);
        let mut crawler = crawler(dir.path(), &launcher, &oracle);
        let recipe = stored_recipe(vec![click("#buy-now", &["button.buy"])]);
        crawler.store().save(&recipe).await.unwrap();

        let result = crawler.crawl(GOAL, START, &CrawlOptions::default()).await;
        assert!(result.success, "{:?}", result.error);
        assert!(result.used_recipe);
        assert_eq!(result.data.unwrap()["price"], json!("$42"));
        assert!(oracle.prompts().is_empty());
        assert!(launcher.browser.calls().contains(&Call::Click("button.buy".to_string())));

        let stored = crawler.store().load(&recipe.fingerprint).await.unwrap();
        assert_eq!(stored.times_used, 4);
        assert_eq!(stored.times_succeeded, 4);
        assert_eq!(stored.ai_fallback_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_broken_recipe_falls_back_to_exploration() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = MockLauncher::new(MockBrowser::new());
        // no recipe reply: synthesis fails and the fallback counters survive
        let oracle = ScriptedOracle::new(&[r#"{"action":"done","result":"$42"}"#]);
        let mut crawler = crawler(dir.path(), &launcher, &oracle);
        let recipe = stored_recipe(vec![click("#gone", &[])]);
        crawler.store().save(&recipe).await.unwrap();

        let result = crawler.crawl(GOAL, START, &CrawlOptions::default()).await;
        assert!(result.success);
        assert!(result.ai_fallback_used);
        assert!(!result.used_recipe);
        assert!(!result.recipe_generated);
        assert_eq!(launcher.launches(), 2);

        let stored = crawler.store().load(&recipe.fingerprint).await.unwrap();
        assert_eq!(stored.times_used, 4);
        assert_eq!(stored.times_succeeded, 3);
        assert_eq!(stored.ai_fallback_count, 1);
        assert!(stored.last_used > 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_exploration_skips_recipe() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = MockLauncher::new(MockBrowser::new().with_elements("#buy", &["Buy"]));
        let oracle = ScriptedOracle::new(&[r#"{"action":"done","result":"fresh"}"#, RECIPE_REPLY]);
        let mut crawler = crawler(dir.path(), &launcher, &oracle);
        crawler.store().save(&stored_recipe(vec![click("#buy", &[])])).await.unwrap();

        let options = CrawlOptions {
            force_exploration: true,
            ..Default::default()
        };
        let result = crawler.crawl(GOAL, START, &options).await;
        assert!(result.success);
        assert!(!result.used_recipe);
        assert!(!result.ai_fallback_used);
        assert_eq!(result.result_text.as_deref(), Some("fresh"));
        assert!(!launcher.browser.calls().contains(&Call::Click("#buy".to_string())));
        assert!(result.recipe_generated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_exploration_is_not_learned() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = MockLauncher::new(MockBrowser::new());
        let oracle = ScriptedOracle::new(&["```json\n{oops\n```"]);
        let mut crawler = crawler(dir.path(), &launcher, &oracle);

        let result = crawler.crawl(GOAL, START, &CrawlOptions::default()).await;
        assert!(!result.success);
        assert!(!result.recipe_generated);
        assert!(result.error.unwrap().starts_with("oracle returned invalid JSON"));
        assert!(crawler.store().list().await.is_empty());
        assert_eq!(oracle.prompts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_start_url() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = MockLauncher::new(MockBrowser::new());
        let oracle = ScriptedOracle::new(&[]);
        let mut crawler = crawler(dir.path(), &launcher, &oracle);

        let result = crawler.crawl(GOAL, "::nope::", &CrawlOptions::default()).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("invalid start URL"));
        assert_eq!(launcher.launches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_screenshot_then_close() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = MockLauncher::new(MockBrowser::new());
        let oracle = ScriptedOracle::new(&[r#"{"action":"fail","reason":"captcha"}"#]);
        let mut crawler = crawler(dir.path(), &launcher, &oracle);
        let shot = dir.path().join("shot.png");

        let options = CrawlOptions {
            screenshot: Some(shot.clone()),
            ..Default::default()
        };
        let result = crawler.crawl(GOAL, START, &options).await;
        assert_eq!(result.error.as_deref(), Some("captcha"));
        let calls = launcher.browser.calls();
        let n = calls.len();
        assert_eq!(calls[n - 2], Call::Screenshot(shot.display().to_string()));
        assert_eq!(calls[n - 1], Call::Close);

        crawler.close().await;
        assert_eq!(
            launcher.browser.calls().iter().filter(|c| **c == Call::Close).count(),
            1
        );
    }
}
