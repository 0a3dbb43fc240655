//! In-memory browser and scripted oracle for crawler tests.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::browser::{
    BrowserLauncher, BrowserSession, ElementHandle, InteractionFault, NetworkEntry,
};
use crate::llm::DecisionOracle;
use crate::summarize::PageSummarizer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Navigate(String),
    Click(String),
    Type(String, String),
    ScrollBy(i64),
    Screenshot(String),
    Close,
}

#[derive(Default)]
struct PageState {
    url: String,
    html: String,
    /// selector -> texts of matching elements
    elements: HashMap<String, Vec<String>>,
    find_faults: HashMap<String, InteractionFault>,
    click_faults: HashMap<String, InteractionFault>,
    calls: Vec<Call>,
}

/// Static page whose selectors match exactly the registered strings. Clones
/// share state, so a test can keep a handle after giving one to the crawler.
#[derive(Clone, Default)]
pub struct MockBrowser {
    state: Arc<Mutex<PageState>>,
}

impl MockBrowser {
    pub fn new() -> Self {
        let browser = Self::default();
        browser.state.lock().unwrap().url = "about:blank".to_string();
        browser
    }

    pub fn with_elements(self, selector: &str, texts: &[&str]) -> Self {
        self.state.lock().unwrap().elements.insert(
            selector.to_string(),
            texts.iter().map(|t| t.to_string()).collect(),
        );
        self
    }

    pub fn with_html(self, html: &str) -> Self {
        self.state.lock().unwrap().html = html.to_string();
        self
    }

    pub fn with_find_fault(self, selector: &str, fault: InteractionFault) -> Self {
        self.state
            .lock()
            .unwrap()
            .find_faults
            .insert(selector.to_string(), fault);
        self
    }

    pub fn with_click_fault(self, selector: &str, fault: InteractionFault) -> Self {
        self.state
            .lock()
            .unwrap()
            .click_faults
            .insert(selector.to_string(), fault);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn text_of(&self, element: &ElementHandle) -> Result<String, InteractionFault> {
        let state = self.state.lock().unwrap();
        state
            .elements
            .get(&element.selector)
            .and_then(|texts| texts.get(element.index))
            .cloned()
            .ok_or(InteractionFault::StaleElement)
    }
}

#[async_trait]
impl BrowserSession for MockBrowser {
    async fn navigate(&self, url: &str) -> Result<(), InteractionFault> {
        self.record(Call::Navigate(url.to_string()));
        self.state.lock().unwrap().url = url.to_string();
        Ok(())
    }

    async fn find(&self, selector: &str) -> Result<Vec<ElementHandle>, InteractionFault> {
        let state = self.state.lock().unwrap();
        if let Some(fault) = state.find_faults.get(selector) {
            return Err(fault.clone());
        }
        let count = state.elements.get(selector).map_or(0, Vec::len);
        Ok((0..count)
            .map(|index| ElementHandle {
                selector: selector.to_string(),
                index,
            })
            .collect())
    }

    async fn scroll_into_view(&self, element: &ElementHandle) -> Result<(), InteractionFault> {
        self.text_of(element).map(|_| ())
    }

    async fn scroll_by(&self, amount: i64) -> Result<(), InteractionFault> {
        self.record(Call::ScrollBy(amount));
        Ok(())
    }

    async fn click(&self, element: &ElementHandle) -> Result<(), InteractionFault> {
        if let Some(fault) = self.state.lock().unwrap().click_faults.get(&element.selector) {
            return Err(fault.clone());
        }
        self.record(Call::Click(element.selector.clone()));
        Ok(())
    }

    async fn type_text(&self, element: &ElementHandle, text: &str) -> Result<(), InteractionFault> {
        self.record(Call::Type(element.selector.clone(), text.to_string()));
        Ok(())
    }

    async fn element_text(&self, element: &ElementHandle) -> Result<String, InteractionFault> {
        self.text_of(element)
    }

    async fn current_url(&self) -> Result<String, InteractionFault> {
        Ok(self.state.lock().unwrap().url.clone())
    }

    async fn page_html(&self) -> Result<String, InteractionFault> {
        Ok(self.state.lock().unwrap().html.clone())
    }

    async fn network_traffic(&self) -> Result<Vec<NetworkEntry>, InteractionFault> {
        Ok(Vec::new())
    }

    async fn cookies(&self) -> Result<HashMap<String, String>, InteractionFault> {
        Ok(HashMap::new())
    }

    async fn screenshot(&self, path: &Path) -> Result<(), InteractionFault> {
        self.record(Call::Screenshot(path.display().to_string()));
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), InteractionFault> {
        self.record(Call::Close);
        Ok(())
    }
}

/// Hands out clones of one shared `MockBrowser` and counts launches.
#[derive(Clone, Default)]
pub struct MockLauncher {
    pub browser: MockBrowser,
    launches: Arc<Mutex<u32>>,
}

impl MockLauncher {
    pub fn new(browser: MockBrowser) -> Self {
        Self {
            browser,
            launches: Arc::default(),
        }
    }

    pub fn launches(&self) -> u32 {
        *self.launches.lock().unwrap()
    }
}

#[async_trait]
impl BrowserLauncher for MockLauncher {
    async fn launch(&self) -> anyhow::Result<Box<dyn BrowserSession>> {
        *self.launches.lock().unwrap() += 1;
        Ok(Box::new(self.browser.clone()))
    }
}

/// Replies from a fixed script, recording every prompt it is given. Running
/// out of script is a transport error.
#[derive(Clone, Default)]
pub struct ScriptedOracle {
    replies: Arc<Mutex<VecDeque<String>>>,
    prompts: Arc<Mutex<Vec<(String, String)>>>,
}

impl ScriptedOracle {
    pub fn new(replies: &[&str]) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies.iter().map(|r| r.to_string()).collect())),
            prompts: Arc::default(),
        }
    }

    pub fn prompts(&self) -> Vec<(String, String)> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl DecisionOracle for ScriptedOracle {
    async fn decide(&self, system_prompt: &str, user_prompt: &str) -> anyhow::Result<String> {
        self.prompts
            .lock()
            .unwrap()
            .push((system_prompt.to_string(), user_prompt.to_string()));
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("oracle script exhausted"))
    }
}

/// Passes HTML through untouched.
pub struct IdentitySummarizer;

impl PageSummarizer for IdentitySummarizer {
    fn summarize(&self, html: &str) -> String {
        html.to_string()
    }
}
