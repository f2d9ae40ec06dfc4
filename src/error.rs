//! Error taxonomy for the guidance loop.
//!
//! A resolution miss is deliberately not represented here: failing to ground
//! a directive in the live view is a normal outcome, handled by the
//! presenter, not an error.

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GuideError>;

#[derive(Debug, Error)]
pub enum GuideError {
    /// The view could not be rasterized or its elements enumerated.
    #[error("view capture failed: {0}")]
    Capture(String),

    /// Network-layer failure talking to the guidance service.
    #[error("guidance service request failed: {0}")]
    Transport(String),

    /// The guidance service did not answer within the configured timeout.
    #[error("guidance service did not answer within {0:?}")]
    Timeout(Duration),

    /// The response could not be parsed into a directive.
    #[error("guidance service returned a malformed directive: {0}")]
    Protocol(String),

    /// The task ran for the configured maximum number of iterations without
    /// the service signalling completion.
    #[error("step limit reached ({0}) before the task completed")]
    StepLimit(usize),

    /// `start` was called while another task was running.
    #[error("a guided task is already running")]
    Busy,

    /// Runtime fault outside the loop's own taxonomy.
    #[error("internal error: {0}")]
    Internal(String),
}
