use anyhow::{Result, bail};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;

/// A request observed in the browser whose URL matched an interception.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterceptedRequest {
    pub url: String,
    pub headers: BTreeMap<String, String>,
    /// Browser cookie jar at interception time.
    pub cookies: Vec<(String, String)>,
}

/// The browser operations the login flow needs.
#[async_trait]
pub trait BrowserDriver: Send {
    async fn open(&mut self, url: &str) -> Result<()>;
    /// Resolve once `selector` matches, or fail after `timeout`.
    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<()>;
    async fn is_present(&mut self, selector: &str) -> Result<bool>;
    /// Click the `index`-th (zero-based) element matching `selector`.
    async fn click(&mut self, selector: &str, index: usize) -> Result<()>;
    async fn attribute(&mut self, selector: &str, name: &str) -> Result<Option<String>>;
    /// Start reporting every request whose URL contains `url_fragment`.
    async fn intercept(
        &mut self,
        url_fragment: &str,
    ) -> Result<mpsc::UnboundedReceiver<InterceptedRequest>>;
    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserDriver>>;
}

/// Used when the binary is built without the `browser` feature.
pub struct UnavailableDriverFactory;

#[async_trait]
impl DriverFactory for UnavailableDriverFactory {
    async fn launch(&self) -> Result<Box<dyn BrowserDriver>> {
        bail!("browser automation is not available in this build (enable the `browser` feature)")
    }
}

/// The factory matching how this binary was compiled.
pub fn default_factory(headless: bool) -> std::sync::Arc<dyn DriverFactory> {
    #[cfg(feature = "browser")]
    {
        std::sync::Arc::new(super::chrome::ChromeDriverFactory::new(headless))
    }
    #[cfg(not(feature = "browser"))]
    {
        let _ = headless;
        std::sync::Arc::new(UnavailableDriverFactory)
    }
}
