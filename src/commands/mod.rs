pub mod crawl;
pub mod recipes;

use std::path::PathBuf;

use clap::Parser;

/// Self-learning web crawler: replays stored recipes, explores with an LLM
/// when none fits, and learns a recipe from every successful exploration.
#[derive(Debug, Parser)]
#[command(name = "smart-crawler", version)]
pub struct Cli {
    /// Starting URL.
    #[arg(required_unless_present_any = ["list_recipes", "delete_recipe"])]
    pub url: Option<String>,

    /// What to find or accomplish.
    #[arg(required_unless_present_any = ["list_recipes", "delete_recipe"])]
    pub goal: Option<String>,

    /// Exploration step bound (overrides MAX_STEPS).
    #[arg(long)]
    pub max_steps: Option<u32>,

    /// Ignore any stored recipe and explore.
    #[arg(long, visible_alias = "force-ai")]
    pub force_exploration: bool,

    /// Run with a visible browser window.
    #[arg(long)]
    pub headful: bool,

    /// Recipe template variable, repeatable.
    #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
    pub vars: Vec<(String, String)>,

    /// Save a full-page screenshot here when the crawl ends.
    #[arg(long)]
    pub screenshot: Option<PathBuf>,

    /// Recipe directory (overrides RECIPES_DIR).
    #[arg(long)]
    pub recipes_dir: Option<PathBuf>,

    /// Debug-level logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// List saved recipes and exit.
    #[arg(long)]
    pub list_recipes: bool,

    /// Delete a recipe by fingerprint and exit.
    #[arg(long, value_name = "FINGERPRINT")]
    pub delete_recipe: Option<String>,
}

fn parse_var(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}
