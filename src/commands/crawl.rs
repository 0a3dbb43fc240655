use std::fmt::Write;

use crate::crawler::{CrawlOptions, CrawlResult, SmartCrawler};

const RULE_WIDTH: usize = 60;
const PREVIEW_CHARS: usize = 200;

pub async fn run(crawler: &mut SmartCrawler, url: &str, goal: &str, options: &CrawlOptions) {
    let result = crawler.crawl(goal, url, options).await;
    print!("{}", render(&result));
}

/// Human-readable report printed after a crawl.
pub fn render(result: &CrawlResult) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    let mut out = String::new();

    let _ = writeln!(out, "\n{}", rule);
    let _ = writeln!(out, "SUCCESS: {}", result.success);
    let _ = writeln!(out, "USED RECIPE: {}", result.used_recipe);
    if result.ai_fallback_used {
        let _ = writeln!(out, "FELL BACK TO EXPLORATION: true");
    }
    let _ = writeln!(out, "RECIPE GENERATED: {}", result.recipe_generated);
    if let Some(fp) = &result.fingerprint {
        let _ = writeln!(out, "FINGERPRINT: {}", fp);
    }
    if let Some(text) = &result.result_text {
        let _ = writeln!(out, "RESULT: {}", text);
    }
    if let Some(data) = &result.data {
        let pretty = serde_json::to_string_pretty(data).unwrap_or_default();
        let _ = writeln!(out, "DATA: {}", pretty);
    }
    if let Some(error) = &result.error {
        let _ = writeln!(out, "ERROR: {}", error);
    }

    let _ = writeln!(out, "STEPS: {}", result.steps.len());
    for step in &result.steps {
        let _ = write!(
            out,
            "  {}. {} - {}",
            step.index,
            step.action,
            step.reason.as_deref().unwrap_or_default()
        );
        if let Some(error) = &step.error {
            let _ = write!(out, " [ERROR: {}]", error);
        }
        out.push('\n');
    }

    if !result.discovered_apis.is_empty() {
        let _ = writeln!(out, "\n{}", rule);
        let _ = writeln!(
            out,
            "DISCOVERED API ENDPOINTS ({}):",
            result.discovered_apis.len()
        );
        for (i, api) in result.discovered_apis.iter().enumerate() {
            let _ = writeln!(out, "\n  {}. [{}] {} {}", i + 1, api.auth_label(), api.method, api.url);
            let _ = writeln!(out, "     Content-Type: {}", api.content_type);
            if let Some(preview) = &api.response_preview {
                let preview: String = preview
                    .chars()
                    .take(PREVIEW_CHARS)
                    .map(|c| if c == '\n' { ' ' } else { c })
                    .collect();
                let _ = writeln!(out, "     Preview: {}", preview);
            }
            if !api.notes.is_empty() {
                let _ = writeln!(out, "     Notes: {}", api.notes);
            }
        }
    }
    out
}
