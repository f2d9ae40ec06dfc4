//! On-page guidance presentation: highlight, anchored callout, dismissal.

use async_trait::async_trait;
use headless_chrome::Tab;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::controller::CancelToken;
use crate::error::{GuideError, Result};
use crate::types::{Directive, Dismissal, GuidanceSession, Tone};

/// Presents guidance in the live view and reports how it was dismissed.
#[async_trait]
pub trait Presenter: Send + Sync {
    /// Highlight the session's target, show the directive's message anchored
    /// to it, and wait until the user performs the expected interaction, the
    /// timeout elapses, the target leaves the view, or the task is cancelled.
    /// The highlight and callout are removed before returning, whatever the
    /// outcome. Calling this while a session is still undismissed is a
    /// programming error.
    async fn present(
        &self,
        directive: &Directive,
        session: &mut GuidanceSession,
        cancel: &CancelToken,
    ) -> Result<Dismissal>;

    /// Non-anchored, auto-expiring notification. Used when a directive could
    /// not be grounded in the view (warning) and on task completion (info).
    async fn toast(&self, message: &str, tone: Tone) -> Result<()>;
}

/// Highlights the target and anchors the callout below it, with an arrow
/// back to the target. The expected interaction removes the callout, which
/// is what the dismissal poll watches for. The previous outline is stashed
/// on the element so it can be restored.
const PRESENT_JS: &str = r#"
(() => {
  const target = document.querySelector(__SELECTOR__);
  if (!target) return false;
  target.scrollIntoView({ block: 'center' });
  target.dataset.guidePrevOutline = target.style.outline || '';
  target.dataset.guidePrevOffset = target.style.outlineOffset || '';
  target.style.outline = '3px solid #FF5722';
  target.style.outlineOffset = '2px';

  const callout = document.createElement('div');
  callout.className = 'guide-callout';
  callout.textContent = __MESSAGE__;
  Object.assign(callout.style, {
    position: 'absolute',
    backgroundColor: 'rgba(255, 87, 34, 0.92)',
    border: '2px solid #FF5722',
    color: '#fff',
    padding: '12px 24px',
    borderRadius: '12px',
    boxShadow: '0 8px 12px rgba(0, 0, 0, 0.4)',
    fontSize: '16px',
    fontWeight: 'bold',
    textAlign: 'center',
    maxWidth: '320px',
    zIndex: '2147483647',
  });

  const rect = target.getBoundingClientRect();
  callout.style.left = (rect.left + window.scrollX) + 'px';
  callout.style.top = (rect.bottom + window.scrollY + 15) + 'px';

  const arrow = document.createElement('div');
  Object.assign(arrow.style, {
    position: 'absolute',
    width: '0',
    height: '0',
    borderLeft: '10px solid transparent',
    borderRight: '10px solid transparent',
    borderBottom: '10px solid rgba(255, 87, 34, 0.92)',
    top: '-10px',
    left: 'calc(50% - 15px)',
  });
  callout.appendChild(arrow);
  document.body.appendChild(callout);

  target.addEventListener(__ACTION__, () => {
    const open = document.querySelector('.guide-callout');
    if (open) open.remove();
  }, { once: true });
  return true;
})()
"#;

const POLL_JS: &str = r#"
(() => {
  if (!document.querySelector(__SELECTOR__)) return 'gone';
  if (!document.querySelector('.guide-callout')) return 'acted';
  return 'waiting';
})()
"#;

const CLEANUP_JS: &str = r#"
(() => {
  const open = document.querySelector('.guide-callout');
  if (open) open.remove();
  const target = document.querySelector(__SELECTOR__);
  if (target) {
    target.style.outline = target.dataset.guidePrevOutline || '';
    target.style.outlineOffset = target.dataset.guidePrevOffset || '';
    delete target.dataset.guidePrevOutline;
    delete target.dataset.guidePrevOffset;
  }
  return true;
})()
"#;

const TOAST_JS: &str = r#"
(() => {
  const toast = document.createElement('div');
  toast.className = 'guide-toast';
  toast.textContent = __MESSAGE__;
  Object.assign(toast.style, {
    position: 'fixed',
    top: '16px',
    right: '16px',
    backgroundColor: __COLOR__,
    color: '#fff',
    padding: '12px 20px',
    borderRadius: '10px',
    boxShadow: '0 8px 12px rgba(0, 0, 0, 0.4)',
    fontSize: '15px',
    fontWeight: 'bold',
    maxWidth: '360px',
    zIndex: '2147483647',
  });
  document.body.appendChild(toast);
  setTimeout(() => toast.remove(), 5000);
  return true;
})()
"#;

/// Renders guidance into one browser tab.
pub struct Overlay {
    tab: Arc<Tab>,
    timeout: Duration,
    poll_interval: Duration,
}

impl Overlay {
    pub fn new(tab: Arc<Tab>, timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            tab,
            timeout,
            poll_interval,
        }
    }
}

#[async_trait]
impl Presenter for Overlay {
    async fn present(
        &self,
        directive: &Directive,
        session: &mut GuidanceSession,
        cancel: &CancelToken,
    ) -> Result<Dismissal> {
        debug_assert!(!session.dismissed, "presenting an already-dismissed session");

        let selector = session.target.selector();
        let present_js = PRESENT_JS
            .replace("__SELECTOR__", &quote(&selector))
            .replace("__MESSAGE__", &quote(&callout_text(directive)))
            .replace("__ACTION__", &quote(directive.interaction()));
        let poll_js = POLL_JS.replace("__SELECTOR__", &quote(&selector));
        let cleanup_js = CLEANUP_JS.replace("__SELECTOR__", &quote(&selector));

        let tab = self.tab.clone();
        let cancel = cancel.clone();
        let timeout = self.timeout;
        let poll_interval = self.poll_interval;

        // The CDP calls are blocking, so the whole wait runs off the async
        // threads.
        let dismissal = tokio::task::spawn_blocking(move || -> Result<Dismissal> {
            let shown = tab
                .evaluate(&present_js, false)
                .map_err(|e| GuideError::Capture(format!("guidance injection failed: {e}")))?
                .value
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if !shown {
                // Target vanished between resolution and presentation.
                return Ok(Dismissal::TargetGone);
            }

            let started = Instant::now();
            let outcome = loop {
                if cancel.is_cancelled() {
                    break Dismissal::Cancelled;
                }
                if started.elapsed() >= timeout {
                    break Dismissal::TimedOut;
                }
                match tab.evaluate(&poll_js, false) {
                    Ok(result) => match result.value.as_ref().and_then(|v| v.as_str()) {
                        Some("gone") => break Dismissal::TargetGone,
                        Some("acted") => break Dismissal::Acted,
                        _ => {}
                    },
                    Err(e) => {
                        // The page likely navigated away under the callout.
                        warn!("dismissal poll failed, treating target as gone: {e}");
                        break Dismissal::TargetGone;
                    }
                }
                std::thread::sleep(poll_interval);
            };

            // Cleanup failures must never mask the dismissal outcome.
            if let Err(e) = tab.evaluate(&cleanup_js, false) {
                warn!("guidance cleanup failed: {e}");
            }
            Ok(outcome)
        })
        .await
        .map_err(|e| GuideError::Internal(format!("presentation task panicked: {e}")))??;

        session.dismiss();
        debug!(?dismissal, "guidance session ended");
        Ok(dismissal)
    }

    async fn toast(&self, message: &str, tone: Tone) -> Result<()> {
        let color = match tone {
            Tone::Info => "rgba(34, 197, 94, 0.95)",
            Tone::Warning => "rgba(245, 158, 11, 0.95)",
        };
        let toast_js = TOAST_JS
            .replace("__MESSAGE__", &quote(message))
            .replace("__COLOR__", &quote(color));

        let tab = self.tab.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = tab.evaluate(&toast_js, false) {
                warn!("toast injection failed: {e}");
            }
        })
        .await
        .map_err(|e| GuideError::Internal(format!("toast task panicked: {e}")))?;
        Ok(())
    }
}

/// Callout body: the directive message, plus the text to enter for "type"
/// interactions.
fn callout_text(directive: &Directive) -> String {
    match directive.value.as_deref() {
        Some(value) if directive.interaction() == "type" => {
            format!("{} (enter: {value})", directive.message)
        }
        _ => directive.message.clone(),
    }
}

/// Quote a string as a JavaScript literal.
fn quote(text: &str) -> String {
    serde_json::json!(text).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directive(message: &str, action: Option<&str>, value: Option<&str>) -> Directive {
        Directive {
            target_id: None,
            target_class: None,
            target_text: None,
            message: message.into(),
            action: action.map(String::from),
            value: value.map(String::from),
            is_complete: false,
        }
    }

    #[test]
    fn scripts_embed_quoted_values() {
        let script = PRESENT_JS
            .replace("__SELECTOR__", &quote("[data-guide-id=\"g3\"]"))
            .replace("__MESSAGE__", &quote("Click \"Save\"\nthen wait"))
            .replace("__ACTION__", &quote("click"));

        assert!(!script.contains("__SELECTOR__"));
        assert!(!script.contains("__MESSAGE__"));
        assert!(!script.contains("__ACTION__"));
        assert!(script.contains(r#""[data-guide-id=\"g3\"]""#));
        assert!(script.contains(r#""Click \"Save\"\nthen wait""#));
    }

    #[test]
    fn callout_text_appends_value_for_type_interactions() {
        let d = directive("Search for rust", Some("type"), Some("rust tutorial"));
        assert_eq!(callout_text(&d), "Search for rust (enter: rust tutorial)");

        let d = directive("Click Search", None, Some("ignored"));
        assert_eq!(callout_text(&d), "Click Search");
    }
}
