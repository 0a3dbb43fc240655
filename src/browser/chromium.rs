//! Chromium backend via chromiumoxide.
//!
//! Interactions run as evaluated JavaScript against `document.querySelectorAll`,
//! so an `ElementHandle` is just `(selector, index)`. Network traffic comes
//! from CDP `Network` events recorded for the whole life of the tab.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventRequestWillBeSent, EventResponseReceived, Request,
};
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{BrowserLauncher, BrowserSession, ElementHandle, InteractionFault, NetworkEntry};

pub struct ChromiumLauncher {
    headless: bool,
    chrome_path: Option<PathBuf>,
}

impl ChromiumLauncher {
    pub fn new(headless: bool, chrome_path: Option<PathBuf>) -> Self {
        Self {
            headless,
            chrome_path,
        }
    }

    async fn start(&self, headless: bool) -> Result<ChromiumSession> {
        let mut builder = BrowserConfig::builder()
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-blink-features=AutomationControlled")
            .window_size(1366, 900);
        if !headless {
            builder = builder.with_head();
        }
        if let Some(path) = &self.chrome_path {
            builder = builder.chrome_executable(path);
        }
        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .context("failed to open tab")?;

        let traffic = Arc::new(Mutex::new(TrafficLog::default()));
        let capture_task = spawn_capture(&page, traffic.clone()).await?;

        Ok(ChromiumSession {
            browser,
            page,
            handler_task,
            capture_task,
            traffic,
        })
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>> {
        if self.headless {
            info!("Starting Chromium (headless)...");
            match self.start(true).await {
                Ok(session) => return Ok(Box::new(session)),
                Err(e) => warn!("Headless launch failed ({e:#}), falling back to headful..."),
            }
        }
        info!("Starting Chromium (headful)...");
        Ok(Box::new(self.start(false).await?))
    }
}

pub struct ChromiumSession {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
    capture_task: JoinHandle<()>,
    traffic: Arc<Mutex<TrafficLog>>,
}

/// Requests joined with their responses by CDP request id, in request order.
#[derive(Debug, Default)]
struct TrafficLog {
    order: Vec<String>,
    entries: HashMap<String, NetworkEntry>,
}

impl TrafficLog {
    /// A redirect reuses its request id; the latest hop replaces the entry.
    fn record_request(&mut self, request_id: &str, entry: NetworkEntry) {
        if self.entries.insert(request_id.to_string(), entry).is_none() {
            self.order.push(request_id.to_string());
        }
    }

    fn record_response(&mut self, request_id: &str, status: u16, mime_type: &str, resource_type: &str) {
        if let Some(entry) = self.entries.get_mut(request_id) {
            entry.status = status;
            entry.mime_type = (!mime_type.is_empty()).then(|| mime_type.to_string());
            entry.resource_type = resource_type.to_lowercase();
        }
    }

    fn snapshot(&self) -> Vec<NetworkEntry> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id).cloned())
            .collect()
    }
}

fn header_map(headers: &serde_json::Value) -> HashMap<String, String> {
    headers
        .as_object()
        .map(|obj| {
            obj.iter()
                .map(|(k, v)| {
                    let value = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
                    (k.clone(), value)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Post body from the base64 `postDataEntries` of a request.
fn post_data(request: &Request) -> Option<String> {
    let entries = request.post_data_entries.as_ref()?;
    let mut bytes = Vec::new();
    for entry in entries.iter().filter_map(|e| e.bytes.as_ref()) {
        let encoded: &str = entry.as_ref();
        match BASE64_STANDARD.decode(encoded) {
            Ok(decoded) => bytes.extend(decoded),
            Err(e) => debug!(url = %request.url, "undecodable post data: {}", e),
        }
    }
    (!bytes.is_empty()).then(|| String::from_utf8_lossy(&bytes).into_owned())
}

fn request_entry(event: &EventRequestWillBeSent) -> NetworkEntry {
    NetworkEntry {
        url: event.request.url.clone(),
        method: event.request.method.clone(),
        resource_type: event
            .r#type
            .as_ref()
            .map(|t| AsRef::<str>::as_ref(t).to_lowercase())
            .unwrap_or_default(),
        status: 0,
        mime_type: None,
        request_headers: header_map(event.request.headers.inner()),
        post_data: post_data(&event.request),
    }
}

/// Enable the Network domain and record its events into `traffic` until the
/// tab goes away.
async fn spawn_capture(page: &Page, traffic: Arc<Mutex<TrafficLog>>) -> Result<JoinHandle<()>> {
    let mut requests = page
        .event_listener::<EventRequestWillBeSent>()
        .await
        .context("failed to listen for requests")?;
    let mut responses = page
        .event_listener::<EventResponseReceived>()
        .await
        .context("failed to listen for responses")?;
    page.execute(EnableParams::default())
        .await
        .context("failed to enable network events")?;

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(event) = requests.next() => {
                    let entry = request_entry(&event);
                    if let Ok(mut log) = traffic.lock() {
                        log.record_request(event.request_id.as_ref(), entry);
                    }
                }
                Some(event) = responses.next() => {
                    let status = u16::try_from(event.response.status).unwrap_or(0);
                    if let Ok(mut log) = traffic.lock() {
                        log.record_response(
                            event.request_id.as_ref(),
                            status,
                            &event.response.mime_type,
                            event.r#type.as_ref(),
                        );
                    }
                }
                else => break,
            }
        }
    }))
}

fn js_str(s: &str) -> String {
    // serde_json string encoding is a valid JS string literal
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

/// Expression resolving `handle` to an element or null.
fn element_expr(handle: &ElementHandle) -> String {
    format!(
        "document.querySelectorAll({})[{}]",
        js_str(&handle.selector),
        handle.index
    )
}

impl ChromiumSession {
    async fn eval<T: DeserializeOwned>(&self, script: String) -> Result<T, InteractionFault> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| InteractionFault::Action(e.to_string()))?;
        result
            .into_value::<T>()
            .map_err(|e| InteractionFault::Action(format!("bad JS result: {e:?}")))
    }

    /// Runs `body` with `el` bound; `body` returns a status string.
    async fn with_element(
        &self,
        handle: &ElementHandle,
        body: &str,
    ) -> Result<String, InteractionFault> {
        let script = format!(
            "(() => {{ const el = {}; if (!el) return 'stale'; {} }})()",
            element_expr(handle),
            body
        );
        let status: String = self.eval(script).await?;
        if status == "stale" {
            return Err(InteractionFault::StaleElement);
        }
        Ok(status)
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn navigate(&self, url: &str) -> Result<(), InteractionFault> {
        self.page
            .goto(url)
            .await
            .map_err(|e| InteractionFault::Action(format!("navigation to {url} failed: {e}")))?;
        if let Err(e) = self.page.wait_for_navigation().await {
            debug!(url, "wait for navigation failed: {}", e);
        }
        debug!(url, "navigated");
        Ok(())
    }

    async fn find(&self, selector: &str) -> Result<Vec<ElementHandle>, InteractionFault> {
        let script = format!(
            "(() => {{ try {{ return document.querySelectorAll({}).length; }} catch (e) {{ return -1; }} }})()",
            js_str(selector)
        );
        let count: i64 = self.eval(script).await?;
        if count < 0 {
            return Err(InteractionFault::ElementNotFound(format!(
                "invalid selector: {selector}"
            )));
        }
        Ok((0..count as usize)
            .map(|index| ElementHandle {
                selector: selector.to_string(),
                index,
            })
            .collect())
    }

    async fn scroll_into_view(&self, element: &ElementHandle) -> Result<(), InteractionFault> {
        self.with_element(
            element,
            "el.scrollIntoView({block: 'center', inline: 'center'}); return 'ok';",
        )
        .await
        .map(|_| ())
    }

    async fn scroll_by(&self, amount: i64) -> Result<(), InteractionFault> {
        let _: bool = self
            .eval(format!("(() => {{ window.scrollBy(0, {amount}); return true; }})()"))
            .await?;
        Ok(())
    }

    async fn click(&self, element: &ElementHandle) -> Result<(), InteractionFault> {
        let status = self
            .with_element(
                element,
                "const r = el.getBoundingClientRect(); \
                 const top = document.elementFromPoint(r.left + r.width / 2, r.top + r.height / 2); \
                 if (top && top !== el && !el.contains(top) && !top.contains(el)) \
                   return 'intercepted:' + top.tagName.toLowerCase() + (top.id ? '#' + top.id : ''); \
                 el.click(); return 'ok';",
            )
            .await?;
        match status.strip_prefix("intercepted:") {
            Some(by) => Err(InteractionFault::ClickIntercepted(format!(
                "{} would receive the click",
                by
            ))),
            None => Ok(()),
        }
    }

    async fn type_text(&self, element: &ElementHandle, text: &str) -> Result<(), InteractionFault> {
        let body = format!(
            "el.focus(); \
             if ('value' in el) {{ el.value = ''; el.value = {text}; }} \
             else if (el.isContentEditable) {{ el.textContent = {text}; }} \
             else return 'readonly'; \
             el.dispatchEvent(new Event('input', {{bubbles: true}})); \
             el.dispatchEvent(new Event('change', {{bubbles: true}})); \
             return 'ok';",
            text = js_str(text)
        );
        let status = self.with_element(element, &body).await?;
        if status == "readonly" {
            return Err(InteractionFault::Action(format!(
                "element {} does not accept text",
                element.selector
            )));
        }
        Ok(())
    }

    async fn element_text(&self, element: &ElementHandle) -> Result<String, InteractionFault> {
        self.with_element(element, "return el.innerText || el.textContent || '';")
            .await
    }

    async fn current_url(&self) -> Result<String, InteractionFault> {
        let url = self
            .page
            .url()
            .await
            .map_err(|e| InteractionFault::Action(e.to_string()))?
            .map(|u| u.to_string())
            .unwrap_or_default();
        Ok(url)
    }

    async fn page_html(&self) -> Result<String, InteractionFault> {
        self.eval("document.documentElement.outerHTML".to_string())
            .await
    }

    async fn network_traffic(&self) -> Result<Vec<NetworkEntry>, InteractionFault> {
        self.traffic
            .lock()
            .map(|log| log.snapshot())
            .map_err(|_| InteractionFault::Action("traffic log poisoned".to_string()))
    }

    async fn cookies(&self) -> Result<HashMap<String, String>, InteractionFault> {
        let cookies = self
            .page
            .get_cookies()
            .await
            .map_err(|e| InteractionFault::Action(e.to_string()))?;
        Ok(cookies.into_iter().map(|c| (c.name, c.value)).collect())
    }

    async fn screenshot(&self, path: &Path) -> Result<(), InteractionFault> {
        self.page
            .save_screenshot(ScreenshotParams::builder().full_page(true).build(), path)
            .await
            .map_err(|e| InteractionFault::Action(format!("screenshot failed: {e}")))?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), InteractionFault> {
        let ChromiumSession {
            mut browser,
            page,
            handler_task,
            capture_task,
            traffic: _,
        } = *self;
        let _ = page.close().await;
        if let Err(e) = browser.close().await {
            warn!("Browser close failed: {}", e);
        }
        let _ = browser.wait().await;
        capture_task.abort();
        handler_task.abort();
        debug!("Chromium session closed");
        Ok(())
    }
}
