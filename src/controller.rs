//! The guidance loop: capture, query, resolve, present, cool down, repeat.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::brain::DirectiveSource;
use crate::error::{GuideError, Result};
use crate::eyes::SnapshotSource;
use crate::overlay::Presenter;
use crate::resolver;
use crate::types::{Dismissal, GuidanceSession, MAX_STEPS_PER_TASK, Tone};

/// Where the loop currently is. One task instance is strictly sequential:
/// no two suspension points are ever pending at once, and snapshot N is only
/// captured after guidance N-1 has been dismissed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    Capturing,
    Querying,
    Resolving,
    Presenting,
    Cooling,
    Done,
    Failed,
    Cancelled,
}

impl LoopState {
    pub fn name(&self) -> &'static str {
        match self {
            LoopState::Idle => "idle",
            LoopState::Capturing => "capturing",
            LoopState::Querying => "querying",
            LoopState::Resolving => "resolving",
            LoopState::Presenting => "presenting",
            LoopState::Cooling => "cooling",
            LoopState::Done => "done",
            LoopState::Failed => "failed",
            LoopState::Cancelled => "cancelled",
        }
    }
}

/// Timing and safety knobs for a task run.
#[derive(Debug, Clone)]
pub struct LoopPolicy {
    /// Delay between a dismissed guidance session and the next capture.
    pub cooldown: Duration,
    /// How long a callout waits for the user before giving up.
    pub guidance_timeout: Duration,
    /// Granularity of dismissal, cancellation and cooldown waits. Bounded so
    /// waits stay responsive without busy-looping.
    pub poll_interval: Duration,
    /// Hard ceiling on iterations per task.
    pub max_steps: usize,
}

impl Default for LoopPolicy {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(1),
            guidance_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
            max_steps: MAX_STEPS_PER_TASK,
        }
    }
}

/// Cooperative cancellation flag, observed at every suspension point
/// boundary and inside the presenter's dismissal poll.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Events streamed to observers (the web panel) while a task runs.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoopEvent {
    State { state: LoopState },
    Guidance { step: usize, message: String },
    Miss { message: String },
    Done { message: String },
    Failed { message: String },
    Cancelled,
}

/// How a task run ended, short of a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Done,
    Cancelled,
}

/// Drives one task at a time through the perception-action loop. The other
/// components are stateless collaborators; all sequencing lives here.
pub struct LoopController<S, D, P> {
    eyes: S,
    brain: D,
    presenter: P,
    policy: LoopPolicy,
    cancel: CancelToken,
    state: Mutex<LoopState>,
    events: broadcast::Sender<LoopEvent>,
}

impl<S, D, P> LoopController<S, D, P>
where
    S: SnapshotSource,
    D: DirectiveSource,
    P: Presenter,
{
    pub fn new(eyes: S, brain: D, presenter: P, policy: LoopPolicy) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            eyes,
            brain,
            presenter,
            policy,
            cancel: CancelToken::new(),
            state: Mutex::new(LoopState::Idle),
            events,
        }
    }

    /// Handle for requesting cancellation of the running task.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LoopEvent> {
        self.events.subscribe()
    }

    /// Sender side of the event stream, for wiring up observers.
    pub fn events(&self) -> broadcast::Sender<LoopEvent> {
        self.events.clone()
    }

    pub fn state(&self) -> LoopState {
        *self.state.lock().unwrap()
    }

    /// Run one task to completion, failure, or cancellation.
    ///
    /// Rejected with [`GuideError::Busy`] while another task is running.
    /// There is no partial-task resume: after the terminal state has been
    /// reported the controller returns to Idle, and a failed or cancelled
    /// task can only be retried from scratch.
    pub async fn start(&self, task: &str) -> Result<TaskOutcome> {
        {
            let mut state = self.state.lock().unwrap();
            if *state != LoopState::Idle {
                return Err(GuideError::Busy);
            }
            *state = LoopState::Capturing;
        }
        self.cancel.reset();

        let result = self.run(task).await;
        let outcome = match result {
            Ok(TaskOutcome::Done) => {
                self.set_state(LoopState::Done);
                info!(task, "guided task complete");
                Ok(TaskOutcome::Done)
            }
            Ok(TaskOutcome::Cancelled) => {
                self.set_state(LoopState::Cancelled);
                self.emit(LoopEvent::Cancelled);
                info!(task, "guided task cancelled");
                Ok(TaskOutcome::Cancelled)
            }
            Err(error) => {
                self.set_state(LoopState::Failed);
                self.emit(LoopEvent::Failed {
                    message: error.to_string(),
                });
                warn!(task, "guided task failed: {error}");
                Err(error)
            }
        };

        // Terminal state has been reported; ready for the next task.
        self.set_state(LoopState::Idle);
        outcome
    }

    async fn run(&self, task: &str) -> Result<TaskOutcome> {
        info!(task, "starting guided task");
        let mut step = 0usize;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(TaskOutcome::Cancelled);
            }
            if step >= self.policy.max_steps {
                return Err(GuideError::StepLimit(self.policy.max_steps));
            }
            step += 1;

            self.set_state(LoopState::Capturing);
            let snapshot = self.eyes.capture().await?;

            if self.cancel.is_cancelled() {
                return Ok(TaskOutcome::Cancelled);
            }
            self.set_state(LoopState::Querying);
            let directive = self.brain.next_directive(task, &snapshot).await?;

            if self.cancel.is_cancelled() {
                return Ok(TaskOutcome::Cancelled);
            }
            self.set_state(LoopState::Resolving);
            // Hintless directives resolve to a miss without touching the view.
            // A failing re-scan also counts as a miss: the view may be
            // mid-mutation and will be re-observed next iteration.
            let resolved = if directive.has_target_hint() {
                match self.eyes.scan().await {
                    Ok(elements) => resolver::resolve(&directive, &elements),
                    Err(error) => {
                        warn!("live scan failed during resolution: {error}");
                        None
                    }
                }
            } else {
                None
            };

            self.set_state(LoopState::Presenting);
            match resolved {
                Some(target) => {
                    self.emit(LoopEvent::Guidance {
                        step,
                        message: directive.message.clone(),
                    });
                    let mut session = GuidanceSession::new(target);
                    let dismissal = self
                        .presenter
                        .present(&directive, &mut session, &self.cancel)
                        .await?;
                    debug_assert!(session.dismissed);
                    if dismissal == Dismissal::Cancelled {
                        return Ok(TaskOutcome::Cancelled);
                    }
                }
                None => {
                    self.emit(LoopEvent::Miss {
                        message: directive.message.clone(),
                    });
                    self.presenter
                        .toast(&directive.message, Tone::Warning)
                        .await?;
                }
            }

            if directive.is_complete {
                self.emit(LoopEvent::Done {
                    message: directive.message.clone(),
                });
                self.presenter.toast(&directive.message, Tone::Info).await?;
                return Ok(TaskOutcome::Done);
            }

            self.set_state(LoopState::Cooling);
            if !self.cool_down().await {
                return Ok(TaskOutcome::Cancelled);
            }
        }
    }

    /// Inter-iteration delay, sliced so cancellation is observed within one
    /// poll interval. Returns false when cancelled.
    async fn cool_down(&self) -> bool {
        let mut waited = Duration::ZERO;
        while waited < self.policy.cooldown {
            if self.cancel.is_cancelled() {
                return false;
            }
            let slice = self.policy.poll_interval.min(self.policy.cooldown - waited);
            tokio::time::sleep(slice).await;
            waited += slice;
        }
        !self.cancel.is_cancelled()
    }

    fn set_state(&self, state: LoopState) {
        *self.state.lock().unwrap() = state;
        self.emit(LoopEvent::State { state });
    }

    fn emit(&self, event: LoopEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, Directive, ElementDescriptor, Snapshot};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn element(guide_id: &str, id: &str) -> ElementDescriptor {
        ElementDescriptor {
            guide_id: guide_id.into(),
            id: Some(id.into()),
            class_name: None,
            text: Some("Next".into()),
            tag: "button".into(),
            location: BoundingBox {
                x: 0,
                y: 0,
                width: 40,
                height: 20,
            },
        }
    }

    fn directive(target_id: Option<&str>, is_complete: bool) -> Directive {
        Directive {
            target_id: target_id.map(String::from),
            target_class: None,
            target_text: None,
            message: "do the next step".into(),
            action: None,
            value: None,
            is_complete,
        }
    }

    struct ScriptedEyes {
        elements: Vec<ElementDescriptor>,
        captures: AtomicUsize,
        fail_capture: bool,
    }

    impl ScriptedEyes {
        fn seeing(elements: Vec<ElementDescriptor>) -> Self {
            Self {
                elements,
                captures: AtomicUsize::new(0),
                fail_capture: false,
            }
        }

        fn broken() -> Self {
            Self {
                elements: Vec::new(),
                captures: AtomicUsize::new(0),
                fail_capture: true,
            }
        }
    }

    #[async_trait]
    impl SnapshotSource for ScriptedEyes {
        async fn capture(&self) -> Result<Snapshot> {
            self.captures.fetch_add(1, Ordering::SeqCst);
            if self.fail_capture {
                return Err(GuideError::Capture("view is restricted".into()));
            }
            Ok(Snapshot {
                image_base64: "data:image/png;base64,AA==".into(),
                elements: self.elements.clone(),
            })
        }

        async fn scan(&self) -> Result<Vec<ElementDescriptor>> {
            Ok(self.elements.clone())
        }
    }

    struct ScriptedBrain {
        directives: Mutex<VecDeque<Directive>>,
        queries: AtomicUsize,
    }

    impl ScriptedBrain {
        fn replying(directives: Vec<Directive>) -> Self {
            Self {
                directives: Mutex::new(directives.into()),
                queries: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl DirectiveSource for ScriptedBrain {
        async fn next_directive(&self, _task: &str, _snapshot: &Snapshot) -> Result<Directive> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            self.directives
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| GuideError::Protocol("script exhausted".into()))
        }
    }

    /// Presenter that pretends the user acts after `dwell`, while observing
    /// cancellation at a 10ms poll like the real overlay.
    struct ScriptedPresenter {
        dwell: Duration,
        presented: AtomicUsize,
        toasts: Mutex<Vec<(String, Tone)>>,
        cleaned: AtomicBool,
    }

    impl ScriptedPresenter {
        fn acting_after(dwell: Duration) -> Self {
            Self {
                dwell,
                presented: AtomicUsize::new(0),
                toasts: Mutex::new(Vec::new()),
                cleaned: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl Presenter for ScriptedPresenter {
        async fn present(
            &self,
            _directive: &Directive,
            session: &mut GuidanceSession,
            cancel: &CancelToken,
        ) -> Result<Dismissal> {
            self.presented.fetch_add(1, Ordering::SeqCst);
            let started = Instant::now();
            let outcome = loop {
                if cancel.is_cancelled() {
                    break Dismissal::Cancelled;
                }
                if started.elapsed() >= self.dwell {
                    break Dismissal::Acted;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            };
            self.cleaned.store(true, Ordering::SeqCst);
            session.dismiss();
            Ok(outcome)
        }

        async fn toast(&self, message: &str, tone: Tone) -> Result<()> {
            self.toasts.lock().unwrap().push((message.into(), tone));
            Ok(())
        }
    }

    fn fast_policy() -> LoopPolicy {
        LoopPolicy {
            cooldown: Duration::from_millis(20),
            guidance_timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(5),
            max_steps: MAX_STEPS_PER_TASK,
        }
    }

    #[tokio::test]
    async fn two_incomplete_directives_then_complete_means_three_cycles_and_done() {
        let controller = LoopController::new(
            ScriptedEyes::seeing(vec![element("g0", "next-btn")]),
            ScriptedBrain::replying(vec![
                directive(Some("next-btn"), false),
                directive(Some("next-btn"), false),
                directive(Some("next-btn"), true),
            ]),
            ScriptedPresenter::acting_after(Duration::from_millis(5)),
            fast_policy(),
        );
        let mut events = controller.subscribe();

        let outcome = controller.start("three step task").await.unwrap();

        assert_eq!(outcome, TaskOutcome::Done);
        assert_eq!(controller.eyes.captures.load(Ordering::SeqCst), 3);
        assert_eq!(controller.brain.queries.load(Ordering::SeqCst), 3);
        assert_eq!(controller.presenter.presented.load(Ordering::SeqCst), 3);
        assert_eq!(controller.state(), LoopState::Idle);

        let mut reached_done = false;
        while let Ok(event) = events.try_recv() {
            if matches!(
                event,
                LoopEvent::State {
                    state: LoopState::Done
                }
            ) {
                reached_done = true;
            }
        }
        assert!(reached_done);
    }

    #[tokio::test]
    async fn unmatchable_directive_is_followed_by_another_cycle() {
        let controller = LoopController::new(
            ScriptedEyes::seeing(vec![element("g0", "next-btn")]),
            ScriptedBrain::replying(vec![
                directive(Some("no-such-element"), false),
                directive(Some("next-btn"), true),
            ]),
            ScriptedPresenter::acting_after(Duration::from_millis(5)),
            fast_policy(),
        );

        let outcome = controller.start("task with a miss").await.unwrap();

        assert_eq!(outcome, TaskOutcome::Done);
        assert_eq!(controller.brain.queries.load(Ordering::SeqCst), 2);
        // The miss produced a warning toast, the completion an info toast.
        let toasts = controller.presenter.toasts.lock().unwrap();
        assert_eq!(toasts[0].1, Tone::Warning);
        assert_eq!(toasts.last().unwrap().1, Tone::Info);
    }

    #[tokio::test]
    async fn cancel_mid_presentation_resolves_promptly_and_cleans_up() {
        let controller = Arc::new(LoopController::new(
            ScriptedEyes::seeing(vec![element("g0", "next-btn")]),
            ScriptedBrain::replying(vec![directive(Some("next-btn"), false)]),
            ScriptedPresenter::acting_after(Duration::from_secs(30)),
            fast_policy(),
        ));

        let runner = controller.clone();
        let handle = tokio::spawn(async move { runner.start("long task").await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let cancelled_at = Instant::now();
        controller.cancel_token().cancel();
        let outcome = handle.await.unwrap().unwrap();

        assert_eq!(outcome, TaskOutcome::Cancelled);
        assert!(cancelled_at.elapsed() < Duration::from_secs(1));
        assert!(controller.presenter.cleaned.load(Ordering::SeqCst));
        assert_eq!(controller.state(), LoopState::Idle);
    }

    #[tokio::test]
    async fn second_start_while_running_is_rejected() {
        let controller = Arc::new(LoopController::new(
            ScriptedEyes::seeing(vec![element("g0", "next-btn")]),
            ScriptedBrain::replying(vec![directive(Some("next-btn"), true)]),
            ScriptedPresenter::acting_after(Duration::from_millis(300)),
            fast_policy(),
        ));

        let runner = controller.clone();
        let handle = tokio::spawn(async move { runner.start("first").await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = controller.start("second").await;
        assert!(matches!(second, Err(GuideError::Busy)));

        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn step_limit_fails_the_task() {
        let endless: Vec<Directive> = (0..10).map(|_| directive(Some("next-btn"), false)).collect();
        let controller = LoopController::new(
            ScriptedEyes::seeing(vec![element("g0", "next-btn")]),
            ScriptedBrain::replying(endless),
            ScriptedPresenter::acting_after(Duration::from_millis(1)),
            LoopPolicy {
                max_steps: 3,
                ..fast_policy()
            },
        );

        let error = controller.start("never ending").await.unwrap_err();
        assert!(matches!(error, GuideError::StepLimit(3)));
        assert_eq!(controller.brain.queries.load(Ordering::SeqCst), 3);
        assert_eq!(controller.state(), LoopState::Idle);
    }

    #[tokio::test]
    async fn capture_failure_aborts_without_querying() {
        let controller = LoopController::new(
            ScriptedEyes::broken(),
            ScriptedBrain::replying(vec![directive(Some("next-btn"), true)]),
            ScriptedPresenter::acting_after(Duration::from_millis(1)),
            fast_policy(),
        );

        let error = controller.start("blind task").await.unwrap_err();
        assert!(matches!(error, GuideError::Capture(_)));
        assert_eq!(controller.brain.queries.load(Ordering::SeqCst), 0);
    }
}
