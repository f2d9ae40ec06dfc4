//! guidepost walks a person through a multi-step task in their own browser.
//!
//! Each iteration captures the current page (screenshot plus interactive
//! elements), asks a remote reasoning service for the next step, grounds the
//! reply in a live element, and anchors a callout to it until the user acts,
//! repeating until the service reports the task complete.
//!
//! Module overview:
//! - [`eyes`]: view capture (screenshot + interactive-element scan)
//! - [`brain`]: client for the remote reasoning service
//! - [`resolver`]: hint-to-element priority cascade
//! - [`overlay`]: on-page highlight, callout and toasts
//! - [`controller`]: the loop state machine and cancellation
//! - [`face`]: local web panel for entering tasks and watching progress
//! - [`hands`]: attach-or-launch Chrome session

pub mod brain;
pub mod controller;
pub mod error;
pub mod eyes;
pub mod face;
pub mod hands;
pub mod overlay;
pub mod resolver;
pub mod types;

pub use brain::{Brain, DirectiveSource};
pub use controller::{CancelToken, LoopController, LoopEvent, LoopPolicy, LoopState, TaskOutcome};
pub use error::{GuideError, Result};
pub use eyes::{Eyes, SnapshotSource};
pub use hands::BrowserSession;
pub use overlay::{Overlay, Presenter};
pub use resolver::{MatchStrategy, ResolvedTarget, resolve};
pub use types::{
    BoundingBox, Directive, Dismissal, ElementDescriptor, GuidanceSession, Snapshot, Tone,
};
