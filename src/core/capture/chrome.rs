use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use headless_chrome::browser::tab::{RequestInterceptor, RequestPausedDecision};
use headless_chrome::browser::transport::{SessionId, Transport};
use headless_chrome::protocol::cdp::Fetch::events::RequestPausedEvent;
use headless_chrome::protocol::cdp::Fetch::{RequestPattern, RequestStage};
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::driver::{BrowserDriver, DriverFactory, InterceptedRequest};

const WINDOW_SIZE: (u32, u32) = (1280, 900);
const IDLE_TIMEOUT: Duration = Duration::from_secs(600);

pub struct ChromeDriverFactory {
    headless: bool,
}

impl ChromeDriverFactory {
    pub fn new(headless: bool) -> Self {
        Self { headless }
    }
}

#[async_trait]
impl DriverFactory for ChromeDriverFactory {
    async fn launch(&self) -> Result<Box<dyn BrowserDriver>> {
        let headless = self.headless;
        let (browser, tab) = tokio::task::spawn_blocking(move || -> Result<(Browser, Arc<Tab>)> {
            let options = LaunchOptions::default_builder()
                .headless(headless)
                .sandbox(false)
                .window_size(Some(WINDOW_SIZE))
                .idle_browser_timeout(IDLE_TIMEOUT)
                .build()
                .map_err(|e| anyhow!("invalid browser launch options: {}", e))?;
            let browser = Browser::new(options)?;
            let tab = browser.new_tab()?;
            Ok((browser, tab))
        })
        .await
        .context("browser launch task failed")??;

        Ok(Box::new(ChromeDriver {
            browser: Some(browser),
            tab,
            forwarder: None,
        }))
    }
}

/// Chrome over the DevTools protocol. Every call hops to the blocking pool.
pub struct ChromeDriver {
    browser: Option<Browser>,
    tab: Arc<Tab>,
    forwarder: Option<JoinHandle<()>>,
}

impl ChromeDriver {
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Arc<Tab>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let tab = self.tab.clone();
        tokio::task::spawn_blocking(move || f(tab))
            .await
            .context("browser task failed")?
    }
}

fn header_strings(value: serde_json::Value) -> BTreeMap<String, String> {
    value
        .as_object()
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl BrowserDriver for ChromeDriver {
    async fn open(&mut self, url: &str) -> Result<()> {
        let url = url.to_string();
        self.blocking(move |tab| {
            tab.navigate_to(&url)?.wait_until_navigated()?;
            Ok(())
        })
        .await
    }

    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<()> {
        let selector = selector.to_string();
        self.blocking(move |tab| {
            tab.wait_for_element_with_custom_timeout(&selector, timeout)?;
            Ok(())
        })
        .await
    }

    async fn is_present(&mut self, selector: &str) -> Result<bool> {
        let selector = selector.to_string();
        self.blocking(move |tab| Ok(tab.find_element(&selector).is_ok()))
            .await
    }

    async fn click(&mut self, selector: &str, index: usize) -> Result<()> {
        let selector = selector.to_string();
        self.blocking(move |tab| {
            let elements = tab.find_elements(&selector)?;
            let element = elements
                .get(index)
                .ok_or_else(|| anyhow!("only {} matches for {}", elements.len(), selector))?;
            element.click()?;
            Ok(())
        })
        .await
    }

    async fn attribute(&mut self, selector: &str, name: &str) -> Result<Option<String>> {
        let selector = selector.to_string();
        let name = name.to_string();
        self.blocking(move |tab| {
            let element = tab.find_element(&selector)?;
            element.get_attribute_value(&name)
        })
        .await
    }

    async fn intercept(
        &mut self,
        url_fragment: &str,
    ) -> Result<mpsc::UnboundedReceiver<InterceptedRequest>> {
        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<(String, BTreeMap<String, String>)>();
        // Also matches sibling paths; the worker keeps only the read endpoint itself.
        let pattern = format!("*{}*", url_fragment);

        let interceptor: Arc<dyn RequestInterceptor + Send + Sync> = Arc::new(
            move |_transport: Arc<Transport>, _session: SessionId, event: RequestPausedEvent| {
                let request = &event.params.request;
                let headers = serde_json::to_value(&request.headers)
                    .map(header_strings)
                    .unwrap_or_default();
                let _ = raw_tx.send((request.url.clone(), headers));
                RequestPausedDecision::Continue(None)
            },
        );

        self.blocking(move |tab| {
            let patterns = [RequestPattern {
                url_pattern: Some(pattern),
                resource_Type: None,
                request_stage: Some(RequestStage::Request),
            }];
            tab.enable_fetch(Some(&patterns), None)?;
            tab.enable_request_interception(interceptor)?;
            Ok(())
        })
        .await?;

        // Cookies are read after the fact so the jar reflects the logged-in session.
        let (tx, rx) = mpsc::unbounded_channel();
        let tab = self.tab.clone();
        self.forwarder = Some(tokio::spawn(async move {
            while let Some((url, headers)) = raw_rx.recv().await {
                let tab = tab.clone();
                let cookies = tokio::task::spawn_blocking(move || tab.get_cookies())
                    .await
                    .ok()
                    .and_then(|r| r.ok())
                    .unwrap_or_default()
                    .into_iter()
                    .map(|c| (c.name, c.value))
                    .collect();
                debug!("Intercepted {}", url);
                if tx
                    .send(InterceptedRequest {
                        url,
                        headers,
                        cookies,
                    })
                    .is_err()
                {
                    break;
                }
            }
        }));

        Ok(rx)
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        if let Some(browser) = self.browser.take() {
            tokio::task::spawn_blocking(move || drop(browser))
                .await
                .context("browser shutdown task failed")?;
        }
        Ok(())
    }
}

impl Drop for ChromeDriver {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}
