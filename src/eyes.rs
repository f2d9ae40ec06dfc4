//! View capture: rasterized screenshot plus interactive-element scan.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use headless_chrome::Tab;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use std::sync::Arc;
use tracing::debug;

use crate::error::{GuideError, Result};
use crate::types::{ElementDescriptor, Snapshot};

/// Supplies fresh observations of the live view. Every call re-observes from
/// scratch; nothing is cached between iterations because the page mutates
/// underneath us.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Rasterize the view and enumerate its interactive elements.
    async fn capture(&self) -> Result<Snapshot>;

    /// Re-enumerate interactive elements without rasterizing.
    async fn scan(&self) -> Result<Vec<ElementDescriptor>>;
}

/// JavaScript injected into the page to enumerate interactive elements.
/// NON-DESTRUCTIVE apart from stamping a `data-guide-id` attribute, which is
/// how later phases address the same node.
///
/// The script:
///   1. Collects links, buttons, form controls, explicit button roles and
///      elements carrying an inline click handler.
///   2. Keeps only elements with positive rendered width and height.
///   3. Stamps sequential data-guide-id attributes in document order.
///   4. Emits one JSON record per element with a best-effort label
///      (innerText, else value, else placeholder, else ARIA label).
const SCAN_JS: &str = r#"
(() => {
  const SELECTOR = 'a, button, input, textarea, select, [role="button"], [onclick]';
  const out = [];
  let id = 0;
  for (const el of document.querySelectorAll(SELECTOR)) {
    const rect = el.getBoundingClientRect();
    if (rect.width <= 0 || rect.height <= 0) continue;
    const gid = 'g' + (id++);
    el.setAttribute('data-guide-id', gid);
    let label = (el.innerText || '').trim();
    if (!label) label = el.value || el.placeholder || el.getAttribute('aria-label') || '';
    out.push({
      guideId: gid,
      id: el.id || null,
      class_name: typeof el.className === 'string' && el.className ? el.className : null,
      text: label ? String(label).trim().slice(0, 120) : null,
      tagName: el.tagName.toLowerCase(),
      location: {
        x: Math.round(rect.x),
        y: Math.round(rect.y),
        width: Math.round(rect.width),
        height: Math.round(rect.height),
      },
    });
  }
  return JSON.stringify(out);
})()
"#;

/// Observes the page of one browser tab.
pub struct Eyes {
    tab: Arc<Tab>,
}

impl Eyes {
    pub fn new(tab: Arc<Tab>) -> Self {
        Self { tab }
    }
}

#[async_trait]
impl SnapshotSource for Eyes {
    async fn capture(&self) -> Result<Snapshot> {
        let tab = self.tab.clone();
        tokio::task::spawn_blocking(move || capture_blocking(&tab))
            .await
            .map_err(|e| GuideError::Internal(format!("capture task panicked: {e}")))?
    }

    async fn scan(&self) -> Result<Vec<ElementDescriptor>> {
        let tab = self.tab.clone();
        tokio::task::spawn_blocking(move || scan_blocking(&tab))
            .await
            .map_err(|e| GuideError::Internal(format!("scan task panicked: {e}")))?
    }
}

fn capture_blocking(tab: &Arc<Tab>) -> Result<Snapshot> {
    let png = tab
        .capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
        .map_err(|e| GuideError::Capture(format!("screenshot failed: {e}")))?;
    let image_base64 = format!("data:image/png;base64,{}", BASE64.encode(&png));

    let elements = scan_blocking(tab)?;
    debug!(elements = elements.len(), "captured snapshot");

    Ok(Snapshot {
        image_base64,
        elements,
    })
}

fn scan_blocking(tab: &Arc<Tab>) -> Result<Vec<ElementDescriptor>> {
    let result = tab
        .evaluate(SCAN_JS, false)
        .map_err(|e| GuideError::Capture(format!("element scan failed: {e}")))?;
    let raw = result
        .value
        .and_then(|v| v.as_str().map(String::from))
        .ok_or_else(|| GuideError::Capture("element scan returned no data".into()))?;
    serde_json::from_str(&raw)
        .map_err(|e| GuideError::Capture(format!("element scan returned invalid JSON: {e}")))
}
