use std::path::PathBuf;

/// Crawler settings. Env values are read once at startup; CLI flags override them.
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    pub recipes_dir: PathBuf,
    pub max_steps: u32,
    pub headless: bool,
    pub chrome_path: Option<PathBuf>,
    pub summary_max_chars: usize,
    pub api_discovery: bool,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            recipes_dir: PathBuf::from("./recipes"),
            max_steps: 25,
            headless: true,
            chrome_path: None,
            summary_max_chars: 50_000,
            api_discovery: true,
        }
    }
}

impl CrawlerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let recipes_dir = dotenv::var("RECIPES_DIR")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.recipes_dir);
        let max_steps = dotenv::var("MAX_STEPS")
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok())
            .unwrap_or(defaults.max_steps);
        let headless = dotenv::var("HEADLESS")
            .ok()
            .and_then(|s| parse_flag(&s))
            .unwrap_or(defaults.headless);
        let chrome_path = dotenv::var("CHROME_PATH")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);
        let summary_max_chars = dotenv::var("PAGE_SUMMARY_MAX_CHARS")
            .ok()
            .and_then(|s| s.trim().parse::<usize>().ok())
            .unwrap_or(defaults.summary_max_chars);
        let api_discovery = dotenv::var("API_DISCOVERY")
            .ok()
            .and_then(|s| parse_flag(&s))
            .unwrap_or(defaults.api_discovery);

        Self {
            recipes_dir,
            max_steps,
            headless,
            chrome_path,
            summary_max_chars,
            api_discovery,
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
