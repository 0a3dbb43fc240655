//! Browser capability used by the crawler.
//!
//! `BrowserLauncher` opens sessions; a `BrowserSession` is one tab owned by a
//! single crawl. Every call returns `InteractionFault` on failure so callers can
//! turn it into a trace entry instead of propagating it.

pub mod chromium;
pub mod traffic;

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The closed set of ways a browser interaction can fail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InteractionFault {
    #[error("Element not found: {0}")]
    ElementNotFound(String),
    #[error("Click intercepted: {0}")]
    ClickIntercepted(String),
    #[error("Element became stale")]
    StaleElement,
    #[error("Action error: {0}")]
    Action(String),
}

/// A matched element, addressed by the selector that found it and its
/// position among the matches. Re-resolved on every use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle {
    pub selector: String,
    pub index: usize,
}

/// One request observed while the page was loaded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkEntry {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    /// e.g. "xhr", "fetch", "script".
    #[serde(default)]
    pub resource_type: String,
    #[serde(default)]
    pub status: u16,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub request_headers: HashMap<String, String>,
    #[serde(default)]
    pub post_data: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), InteractionFault>;
    /// Zero or more matches, in document order.
    async fn find(&self, selector: &str) -> Result<Vec<ElementHandle>, InteractionFault>;
    async fn scroll_into_view(&self, element: &ElementHandle) -> Result<(), InteractionFault>;
    /// Positive scrolls down.
    async fn scroll_by(&self, amount: i64) -> Result<(), InteractionFault>;
    async fn click(&self, element: &ElementHandle) -> Result<(), InteractionFault>;
    /// Clears existing content, then types `text`.
    async fn type_text(&self, element: &ElementHandle, text: &str) -> Result<(), InteractionFault>;
    /// Visible text, untrimmed.
    async fn element_text(&self, element: &ElementHandle) -> Result<String, InteractionFault>;
    async fn current_url(&self) -> Result<String, InteractionFault>;
    async fn page_html(&self) -> Result<String, InteractionFault>;
    async fn network_traffic(&self) -> Result<Vec<NetworkEntry>, InteractionFault>;
    async fn cookies(&self) -> Result<HashMap<String, String>, InteractionFault>;
    async fn screenshot(&self, path: &Path) -> Result<(), InteractionFault>;
    async fn close(self: Box<Self>) -> Result<(), InteractionFault>;
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> anyhow::Result<Box<dyn BrowserSession>>;
}
