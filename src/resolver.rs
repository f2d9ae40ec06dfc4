//! Maps a directive's target hints to one concrete element in the live view.
//!
//! Resolution is a strict priority cascade: structural hints (id, class) are
//! trusted over free text, and earlier rungs always win even when a later
//! rung would find a closer textual match. Ties within a rung break by
//! document order. The result is valid only for the iteration whose scan
//! produced it; the view is assumed to mutate between iterations.

use serde::Serialize;
use tracing::debug;

use crate::types::{Directive, ElementDescriptor};

/// Which cascade rung produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchStrategy {
    Id,
    ExactClass,
    ClassToken,
    TextSubstring,
    FuzzyText,
}

impl MatchStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            MatchStrategy::Id => "id",
            MatchStrategy::ExactClass => "exact-class",
            MatchStrategy::ClassToken => "class-token",
            MatchStrategy::TextSubstring => "text-substring",
            MatchStrategy::FuzzyText => "fuzzy-text",
        }
    }
}

/// A live reference to exactly one element in the current view.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTarget {
    pub element: ElementDescriptor,
    pub strategy: MatchStrategy,
}

impl ResolvedTarget {
    /// CSS selector addressing the live node this descriptor was scanned from.
    pub fn selector(&self) -> String {
        format!("[data-guide-id=\"{}\"]", self.element.guide_id)
    }
}

/// Resolve a directive against a fresh scan of the live view.
///
/// Cascade, short-circuiting on the first match:
/// 1. element id equals the id hint
/// 2. full class string equals the class hint
/// 3. any single token of the class hint, tried in token order
/// 4. first element whose lowercased label contains the text hint
/// 5. first element whose label contains every word of the text hint
///
/// A directive with no hints at all resolves to `None` without scanning.
pub fn resolve(directive: &Directive, elements: &[ElementDescriptor]) -> Option<ResolvedTarget> {
    if !directive.has_target_hint() {
        debug!("directive carries no target hints, nothing to resolve");
        return None;
    }

    if let Some(id) = directive.target_id_hint() {
        if let Some(element) = elements.iter().find(|e| e.id.as_deref() == Some(id)) {
            return Some(hit(element, MatchStrategy::Id));
        }
    }

    if let Some(class) = directive.target_class_hint() {
        if let Some(element) = elements
            .iter()
            .find(|e| e.class_name.as_deref().map(str::trim) == Some(class))
        {
            return Some(hit(element, MatchStrategy::ExactClass));
        }
        for token in class.split_whitespace() {
            let matched = elements.iter().find(|e| {
                e.class_name
                    .as_deref()
                    .is_some_and(|c| c.split_whitespace().any(|t| t == token))
            });
            if let Some(element) = matched {
                return Some(hit(element, MatchStrategy::ClassToken));
            }
        }
    }

    if let Some(text) = directive.target_text_hint() {
        let needle = text.to_lowercase();
        if let Some(element) = elements.iter().find(|e| label(e).contains(&needle)) {
            return Some(hit(element, MatchStrategy::TextSubstring));
        }
        let words: Vec<&str> = needle.split_whitespace().collect();
        let matched = elements.iter().find(|e| {
            let l = label(e);
            !words.is_empty() && words.iter().all(|w| l.contains(w))
        });
        if let Some(element) = matched {
            return Some(hit(element, MatchStrategy::FuzzyText));
        }
    }

    debug!("no element matched the directive's hints");
    None
}

fn hit(element: &ElementDescriptor, strategy: MatchStrategy) -> ResolvedTarget {
    debug!(
        strategy = strategy.name(),
        guide_id = %element.guide_id,
        "resolved target"
    );
    ResolvedTarget {
        element: element.clone(),
        strategy,
    }
}

fn label(element: &ElementDescriptor) -> String {
    element.text.as_deref().unwrap_or("").trim().to_lowercase()
}
