use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::resolver::ResolvedTarget;

/// Viewport-relative box of one interactive element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// One interactive element recorded by a scan of the live view.
///
/// Serializes to the wire shape the guidance service expects (`class_name`,
/// `tagName`, `location`). `guide_id` stays local: the scan stamps the element
/// with a `data-guide-id` attribute so later phases can address the same node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementDescriptor {
    #[serde(rename = "guideId", skip_serializing)]
    pub guide_id: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "class_name", default)]
    pub class_name: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(rename = "tagName")]
    pub tag: String,
    pub location: BoundingBox,
}

/// One capture of the current view: rasterized image plus the interactive
/// elements visible at capture time. Created fresh each iteration and owned
/// by it; never reused across iterations.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub image_base64: String,
    pub elements: Vec<ElementDescriptor>,
}

/// The guidance service's instruction for the next step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Directive {
    #[serde(rename = "id", default)]
    pub target_id: Option<String>,
    #[serde(rename = "class_name", default)]
    pub target_class: Option<String>,
    #[serde(rename = "text", default)]
    pub target_text: Option<String>,
    pub message: String,
    #[serde(default)]
    pub action: Option<String>,
    /// Text to enter when the expected interaction is "type".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Canonical completion flag; older service revisions sent `isFinished`.
    #[serde(rename = "isComplete", alias = "isFinished", default)]
    pub is_complete: bool,
}

impl Directive {
    /// Interaction the user is expected to perform on the target.
    pub fn interaction(&self) -> &str {
        self.action
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .unwrap_or("click")
    }

    pub fn target_id_hint(&self) -> Option<&str> {
        non_blank(self.target_id.as_deref())
    }

    pub fn target_class_hint(&self) -> Option<&str> {
        non_blank(self.target_class.as_deref())
    }

    pub fn target_text_hint(&self) -> Option<&str> {
        non_blank(self.target_text.as_deref())
    }

    /// Whether any target hint is present. Blank hints count as absent.
    pub fn has_target_hint(&self) -> bool {
        self.target_id_hint().is_some()
            || self.target_class_hint().is_some()
            || self.target_text_hint().is_some()
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Why a guidance session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dismissal {
    /// The user performed the expected interaction on the target.
    Acted,
    /// The wait timed out before the user acted.
    TimedOut,
    /// The target left the live view while the callout was up.
    TargetGone,
    /// The task was cancelled mid-wait.
    Cancelled,
}

/// Visual flavor of a non-anchored notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Info,
    Warning,
}

/// Transient state for one presented callout. Owned by the loop controller
/// and handed to the presenter for exactly one presentation; at most one
/// session exists at a time.
#[derive(Debug, Clone)]
pub struct GuidanceSession {
    pub target: ResolvedTarget,
    pub created_at: Instant,
    pub dismissed: bool,
}

impl GuidanceSession {
    pub fn new(target: ResolvedTarget) -> Self {
        Self {
            target,
            created_at: Instant::now(),
            dismissed: false,
        }
    }

    pub fn dismiss(&mut self) {
        self.dismissed = true;
    }
}

pub const MAX_STEPS_PER_TASK: usize = 25;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn element() -> ElementDescriptor {
        ElementDescriptor {
            guide_id: "g0".into(),
            id: Some("submit-btn".into()),
            class_name: Some("btn btn-primary".into()),
            text: Some("Submit".into()),
            tag: "button".into(),
            location: BoundingBox {
                x: 10,
                y: 20,
                width: 80,
                height: 30,
            },
        }
    }

    #[test]
    fn element_serializes_to_wire_shape_without_guide_id() {
        let value = serde_json::to_value(element()).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "submit-btn",
                "class_name": "btn btn-primary",
                "text": "Submit",
                "tagName": "button",
                "location": {"x": 10, "y": 20, "width": 80, "height": 30},
            })
        );
    }

    #[test]
    fn directive_parses_canonical_completion_flag() {
        let directive: Directive = serde_json::from_str(
            r#"{"id":null,"class_name":null,"text":"Submit","message":"Click Submit","action":"click","isComplete":true}"#,
        )
        .unwrap();
        assert!(directive.is_complete);
        assert_eq!(directive.target_text.as_deref(), Some("Submit"));
    }

    #[test]
    fn directive_accepts_legacy_is_finished_flag() {
        let directive: Directive =
            serde_json::from_str(r#"{"message":"All done","isFinished":true}"#).unwrap();
        assert!(directive.is_complete);
    }

    #[test]
    fn directive_defaults_to_click_and_incomplete() {
        let directive: Directive = serde_json::from_str(r#"{"message":"Press it"}"#).unwrap();
        assert!(!directive.is_complete);
        assert_eq!(directive.interaction(), "click");
    }

    #[test]
    fn blank_hints_count_as_absent() {
        let directive: Directive = serde_json::from_str(
            r#"{"id":"","class_name":"   ","text":null,"message":"No anchor here"}"#,
        )
        .unwrap();
        assert!(!directive.has_target_hint());
    }
}
