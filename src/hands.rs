//! Browser session: attach to the user's Chrome, or launch a visible one.

use anyhow::Result;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Persistent browser session. Created once and reused for all tasks.
pub struct BrowserSession {
    _browser: Browser,
    pub tab: Arc<Tab>,
}

impl BrowserSession {
    /// Attach to a Chrome already listening on its debug port, else launch a
    /// visible instance. Guidance only makes sense in a browser the user can
    /// see and operate, so headless mode is never used.
    pub fn connect_or_launch(debug_url: &str) -> Result<Self> {
        if let Ok(browser) = Browser::connect(debug_url.to_string()) {
            info!("attached to running Chrome at {debug_url}");
            let existing = {
                let tabs_lock = browser.get_tabs();
                let tabs = tabs_lock.lock().unwrap();
                tabs.first().cloned()
            };
            let tab = match existing {
                Some(tab) => tab,
                None => browser.new_tab()?,
            };
            return Ok(Self {
                _browser: browser,
                tab,
            });
        }

        info!("no running Chrome found, launching one");
        let options = LaunchOptions {
            headless: false,
            args: vec![
                OsStr::new("--no-first-run"),
                OsStr::new("--no-default-browser-check"),
                OsStr::new("--disable-infobars"),
            ],
            idle_browser_timeout: Duration::from_secs(60),
            ..Default::default()
        };

        let browser = Browser::new(options)
            .map_err(|e| anyhow::anyhow!("browser launch failed: {e}"))?;
        let tab = browser.new_tab()?;
        tab.navigate_to("about:blank")?;

        Ok(Self {
            _browser: browser,
            tab,
        })
    }

    /// Open a starting page before the first task.
    pub fn navigate(&self, url: &str) -> Result<()> {
        self.tab.navigate_to(url)?;
        self.tab.wait_for_element("body")?;
        Ok(())
    }
}
