use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::NetworkEntry;

const SKIP_EXTENSIONS: &[&str] = &[
    "css", "js", "png", "jpg", "jpeg", "gif", "svg", "woff", "woff2", "ttf", "ico", "map",
    "webp", "mp4", "mp3", "webm", "avif",
];
const MAX_CANDIDATES: usize = 15;
const PREVIEW_CHARS: usize = 2000;
const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/144.0.0.0 Safari/537.36";

/// An endpoint seen in page traffic, with how it can be called directly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredApi {
    pub url: String,
    pub method: String,
    pub content_type: String,
    pub status_code: u16,
    pub response_preview: Option<String>,
    pub works_without_auth: bool,
    pub works_with_cookies: bool,
    pub cookies_needed: Vec<String>,
    pub request_headers: HashMap<String, String>,
    pub post_data: Option<String>,
    pub notes: String,
}

impl DiscoveredApi {
    pub fn auth_label(&self) -> &'static str {
        if self.works_without_auth {
            "NO AUTH"
        } else if self.works_with_cookies {
            "COOKIES"
        } else {
            "AUTH REQUIRED"
        }
    }
}

#[async_trait]
pub trait TrafficAnalyzer: Send + Sync {
    async fn discover(
        &self,
        traffic: &[NetworkEntry],
        cookies: &HashMap<String, String>,
    ) -> Vec<DiscoveredApi>;
}

/// Keep successful XHR/fetch/JSON-ish requests, deduplicated by path.
pub fn api_candidates(traffic: &[NetworkEntry]) -> Vec<&NetworkEntry> {
    let mut seen_paths = HashSet::new();
    traffic
        .iter()
        .filter(|entry| looks_like_api(entry))
        .filter(|entry| seen_paths.insert(path_of(&entry.url)))
        .take(MAX_CANDIDATES)
        .collect()
}

fn path_of(raw: &str) -> String {
    url::Url::parse(raw)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| raw.to_string())
}

fn looks_like_api(entry: &NetworkEntry) -> bool {
    if entry.url.starts_with("data:") || entry.url.starts_with("chrome-extension:") {
        return false;
    }
    if !(200..400).contains(&entry.status) {
        return false;
    }

    let path = path_of(&entry.url).to_lowercase();
    let ext = path
        .rsplit('/')
        .next()
        .and_then(|last| last.rsplit_once('.'))
        .map(|(_, ext)| ext);
    if ext.is_some_and(|ext| SKIP_EXTENSIONS.contains(&ext)) {
        return false;
    }

    let mime = entry.mime_type.as_deref().unwrap_or("").to_lowercase();
    let resource_type = entry.resource_type.to_lowercase();
    mime.contains("json")
        || resource_type == "xhr"
        || resource_type == "fetch"
        || path.contains("/api/")
        || path.contains("/graphql")
        || path.contains("/rest/")
}

/// Replays GET candidates over plain HTTP, first bare and then with the
/// browser's cookies, to classify what auth they need.
pub struct HttpProbeAnalyzer {
    client: reqwest::Client,
}

impl HttpProbeAnalyzer {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }

    /// Returns the body on a 200 with a non-trivial payload.
    async fn probe(&self, url: &str, cookie_header: Option<&str>) -> Option<String> {
        let mut req = self.client.get(url);
        if let Some(cookies) = cookie_header {
            req = req.header(reqwest::header::COOKIE, cookies);
        }
        let resp = req.send().await.ok()?;
        if resp.status() != reqwest::StatusCode::OK {
            return None;
        }
        let body = resp.text().await.ok()?;
        (body.len() > 10).then_some(body)
    }
}

#[async_trait]
impl TrafficAnalyzer for HttpProbeAnalyzer {
    async fn discover(
        &self,
        traffic: &[NetworkEntry],
        cookies: &HashMap<String, String>,
    ) -> Vec<DiscoveredApi> {
        let candidates = api_candidates(traffic);
        if candidates.is_empty() {
            return Vec::new();
        }

        let cookie_header = (!cookies.is_empty()).then(|| {
            cookies
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("; ")
        });

        let mut discovered = Vec::new();
        for entry in candidates {
            let mut api = DiscoveredApi {
                url: entry.url.clone(),
                method: entry.method.to_uppercase(),
                content_type: entry.mime_type.clone().unwrap_or_default(),
                status_code: entry.status,
                ..Default::default()
            };

            match api.method.as_str() {
                "GET" => {
                    if let Some(body) = self.probe(&entry.url, None).await {
                        api.works_without_auth = true;
                        api.response_preview = Some(body.chars().take(PREVIEW_CHARS).collect());
                        api.notes = "No auth needed".to_string();
                    } else if let Some(header) = cookie_header.as_deref() {
                        if let Some(body) = self.probe(&entry.url, Some(header)).await {
                            api.works_with_cookies = true;
                            api.cookies_needed = cookies.keys().cloned().collect();
                            api.cookies_needed.sort();
                            api.response_preview =
                                Some(body.chars().take(PREVIEW_CHARS).collect());
                            api.notes = "Works with browser cookies".to_string();
                        }
                    }
                    if !api.works_without_auth && !api.works_with_cookies {
                        api.notes = "Requires auth, could not call directly".to_string();
                    }
                }
                "POST" => {
                    api.request_headers = entry
                        .request_headers
                        .iter()
                        .filter(|(k, _)| {
                            matches!(
                                k.to_lowercase().as_str(),
                                "content-type" | "accept" | "authorization" | "x-csrf-token"
                            )
                        })
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    api.post_data = entry.post_data.clone();
                    api.notes = "POST, saved headers/body for manual testing".to_string();
                }
                other => debug!(method = other, url = %entry.url, "not probing"),
            }

            discovered.push(api);
        }

        info!(count = discovered.len(), "Discovered API endpoints from network traffic");
        for api in &discovered {
            info!("  {} {} [{}]", api.method, api.url, api.auth_label());
        }
        discovered
    }
}
