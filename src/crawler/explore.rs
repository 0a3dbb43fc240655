use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::browser::BrowserSession;
use crate::llm::DecisionOracle;
use crate::recipes::ActionKind;
use crate::summarize::PageSummarizer;

use super::actions::{perform, ActionRequest};
use super::decision::Decision;
use super::prompts::NAVIGATION_PROMPT;
use super::types::{data_map, CrawlResult, ExplorationStep};

const START_SETTLE: Duration = Duration::from_secs(2);
const HISTORY_WINDOW: usize = 10;

pub struct Explorer<'a> {
    pub browser: &'a dyn BrowserSession,
    pub oracle: &'a dyn DecisionOracle,
    pub summarizer: &'a dyn PageSummarizer,
    pub max_steps: u32,
}

impl Explorer<'_> {
    /// Oracle-guided navigation from `start_url` until `done`, `fail` or the
    /// step bound. The trace is kept for recipe synthesis.
    pub async fn run(&self, goal: &str, start_url: &str) -> CrawlResult {
        info!(goal, start_url, max_steps = self.max_steps, "Starting exploration");
        let mut trace = Vec::new();
        match self.explore(goal, start_url, &mut trace).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Exploration aborted: {:#}", e);
                CrawlResult::failed(format!("{:#}", e), trace)
            }
        }
    }

    async fn explore(
        &self,
        goal: &str,
        start_url: &str,
        trace: &mut Vec<ExplorationStep>,
    ) -> Result<CrawlResult> {
        self.browser
            .navigate(start_url)
            .await
            .with_context(|| format!("navigate to {}", start_url))?;
        tokio::time::sleep(START_SETTLE).await;

        for index in 1..=self.max_steps {
            let url = self.browser.current_url().await.context("read current url")?;
            let html = self.browser.page_html().await.context("read page html")?;
            let page = format!("CURRENT URL: {}\n\n{}", url, self.summarizer.summarize(&html));

            let raw = self
                .oracle
                .decide(NAVIGATION_PROMPT, &user_prompt(goal, &page, trace))
                .await
                .context("oracle request failed")?;
            let decision = Decision::parse(&raw);
            info!(
                step = index,
                max_steps = self.max_steps,
                action = %decision.action,
                reason = decision.reason.as_deref().unwrap_or_default(),
                "Oracle decided"
            );

            let mut step = ExplorationStep {
                index,
                url,
                action: decision.action.clone(),
                selector: decision.selector.clone(),
                text: decision.text.clone(),
                data: decision.data.clone(),
                result_text: decision.result_text.clone(),
                reason: decision.reason.clone(),
                error: None,
            };

            match decision.action {
                ActionKind::Done => {
                    trace.push(step);
                    return Ok(CrawlResult {
                        success: true,
                        data: data_map(decision.data),
                        result_text: decision.result_text,
                        steps: std::mem::take(trace),
                        ..Default::default()
                    });
                }
                ActionKind::Fail => {
                    let reason = decision
                        .reason
                        .unwrap_or_else(|| "oracle gave up without a reason".to_string());
                    step.error = Some(reason.clone());
                    trace.push(step);
                    return Ok(CrawlResult::failed(reason, std::mem::take(trace)));
                }
                ActionKind::Extract => trace.push(step),
                _ => {
                    if let Err(e) = perform(self.browser, &ActionRequest::from_decision(&decision)).await {
                        debug!(step = index, "Action error: {}", e);
                        step.error = Some(e.to_string());
                    }
                    match self.browser.current_url().await {
                        Ok(after) => step.url = after,
                        Err(e) => debug!(step = index, "Could not re-read url: {}", e),
                    }
                    trace.push(step);
                }
            }
        }

        Ok(CrawlResult::failed(
            format!("max steps reached ({})", self.max_steps),
            std::mem::take(trace),
        ))
    }
}

fn user_prompt(goal: &str, page: &str, trace: &[ExplorationStep]) -> String {
    let mut parts = Vec::new();
    if !trace.is_empty() {
        parts.push("Previous actions this session:".to_string());
        let start = trace.len().saturating_sub(HISTORY_WINDOW);
        for (i, step) in trace[start..].iter().enumerate() {
            parts.push(format!(
                "  {}. {} - {}",
                i + 1,
                step.action,
                step.reason.as_deref().unwrap_or_default()
            ));
            if let Some(error) = &step.error {
                parts.push(format!("     ERROR: {}", error));
            }
        }
        parts.push(String::new());
    }
    parts.push(format!("GOAL: {}", goal));
    parts.push(String::new());
    parts.push(page.to_string());
    parts.push(String::new());
    parts.push("What is the next action?".to_string());
    parts.join("\n")
}
