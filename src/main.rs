mod browser;
mod commands;
mod config;
mod crawler;
mod llm;
mod recipes;
mod summarize;

use std::sync::Arc;

use clap::Parser;
use tracing::{info, Level};

use browser::chromium::ChromiumLauncher;
use browser::traffic::HttpProbeAnalyzer;
use commands::Cli;
use config::CrawlerConfig;
use crawler::{CrawlOptions, SmartCrawler};
use llm::LlmClient;
use recipes::RecipeStore;
use summarize::TextSummarizer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    // Load env
    let _ = dotenv::dotenv();
    let mut config = CrawlerConfig::from_env();
    if let Some(dir) = &cli.recipes_dir {
        config.recipes_dir = dir.clone();
    }
    if let Some(max_steps) = cli.max_steps {
        config.max_steps = max_steps;
    }
    if cli.headful {
        config.headless = false;
    }

    // management commands need neither the LLM nor a browser
    let store = RecipeStore::new(&config.recipes_dir);
    if cli.list_recipes {
        commands::recipes::list(&store).await;
        return Ok(());
    }
    if let Some(fp) = &cli.delete_recipe {
        commands::recipes::delete(&store, fp).await;
        return Ok(());
    }

    let llm_client = Arc::new(LlmClient::from_env()?);
    info!(model = llm_client.model(), "LLM client initialized");

    let mut crawler = SmartCrawler::new(
        store,
        llm_client,
        Arc::new(ChromiumLauncher::new(config.headless, config.chrome_path.clone())),
        Arc::new(TextSummarizer::new(config.summary_max_chars)),
        config.max_steps,
    );
    if config.api_discovery {
        crawler = crawler.with_analyzer(Arc::new(HttpProbeAnalyzer::new()?));
    }

    // clap enforces both positionals unless a management flag is set
    let (Some(url), Some(goal)) = (cli.url.as_deref(), cli.goal.as_deref()) else {
        anyhow::bail!("URL and GOAL are required");
    };
    let options = CrawlOptions {
        variables: cli.vars.iter().cloned().collect(),
        force_exploration: cli.force_exploration,
        screenshot: cli.screenshot.clone(),
    };
    info!(
        recipes_dir = ?crawler.store().dir(),
        max_steps = config.max_steps,
        headless = config.headless,
        "Starting smart crawler"
    );
    commands::crawl::run(&mut crawler, url, goal, &options).await;
    crawler.close().await;

    Ok(())
}
