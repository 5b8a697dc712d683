//! Cooperative task runner.
//!
//! A [`Workflow`] is a sequence of stages. [`CooperativeTask`] runs one stage
//! per [`CooperativeTask::advance`] call; between stages it checks whether a
//! cancellation was requested through the [`TaskHandle`] and, if so, unwinds
//! the workflow instead of running the next stage. A stage that has started
//! is never interrupted from the outside, but a stage may watch the signal
//! itself (see [`PendingCompletion`]).

use crate::error::BuildError;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Suspension points between stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    ExecutorResolved,
    ConfigResolved,
    CompilerReady,
    ProgressAttached,
    Compiled,
}

/// Result of running one stage.
#[derive(Debug)]
pub enum Step<T> {
    /// The stage finished; more stages follow.
    Suspend(Checkpoint),
    /// The workflow produced its result.
    Done(T),
}

/// A workflow driven stage by stage.
#[allow(async_fn_in_trait)]
pub trait Workflow {
    type Output;

    /// Name used in log lines.
    fn name(&self) -> &'static str;

    /// Run the next stage.
    ///
    /// `signal` fires when cancellation is requested. Stages that wait on
    /// external events should race against it and return
    /// [`BuildError::Cancelled`].
    async fn advance(&mut self, signal: &CancellationToken) -> Result<Step<Self::Output>, BuildError>;

    /// Release every resource acquired so far. Called once, after the last
    /// stage failed or was cancelled.
    async fn unwind(&mut self);
}

/// Handle to a running task. Cheap to clone.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: u64,
    name: &'static str,
    token: CancellationToken,
}

impl TaskHandle {
    fn new(name: &'static str) -> Self {
        Self {
            id: next_id(),
            name,
            token: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Request cancellation. Takes effect at the next suspension point.
    pub fn cancel(&self, reason: &str) {
        if !self.token.is_cancelled() {
            debug!(task = self.name, id = self.id, reason, "cancellation requested");
        }
        self.token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token that fires on cancellation.
    #[must_use]
    pub fn signal(&self) -> &CancellationToken {
        &self.token
    }
}

/// Drives a [`Workflow`] with cooperative cancellation.
pub struct CooperativeTask<W: Workflow> {
    workflow: W,
    handle: TaskHandle,
    checkpoint: Option<Checkpoint>,
    finished: bool,
}

impl<W: Workflow> CooperativeTask<W> {
    #[must_use]
    pub fn new(workflow: W) -> Self {
        let handle = TaskHandle::new(workflow.name());
        Self {
            workflow,
            handle,
            checkpoint: None,
            finished: false,
        }
    }

    #[must_use]
    pub fn handle(&self) -> TaskHandle {
        self.handle.clone()
    }

    /// Last suspension point reached.
    #[must_use]
    pub fn checkpoint(&self) -> Option<Checkpoint> {
        self.checkpoint
    }

    /// Run the next stage, or unwind if cancellation was requested.
    pub async fn advance(&mut self) -> Result<Step<W::Output>, BuildError> {
        if self.finished {
            return Err(BuildError::Finished);
        }
        if self.handle.is_cancelled() {
            return Err(self.abort(BuildError::Cancelled).await);
        }

        match self.workflow.advance(&self.handle.token).await {
            Ok(Step::Suspend(checkpoint)) => {
                trace!(task = self.handle.name, ?checkpoint, "suspended");
                self.checkpoint = Some(checkpoint);
                Ok(Step::Suspend(checkpoint))
            }
            Ok(Step::Done(output)) => {
                self.finished = true;
                Ok(Step::Done(output))
            }
            Err(e) => Err(self.abort(e).await),
        }
    }

    /// Advance until the workflow is done.
    pub async fn run(mut self) -> Result<W::Output, BuildError> {
        loop {
            if let Step::Done(output) = self.advance().await? {
                return Ok(output);
            }
        }
    }

    async fn abort(&mut self, error: BuildError) -> BuildError {
        self.finished = true;
        debug!(
            task = self.handle.name,
            checkpoint = ?self.checkpoint,
            cancelled = error.is_cancellation(),
            "unwinding"
        );
        self.workflow.unwind().await;
        error
    }
}

/// An outstanding wait that can be rejected from outside the task.
///
/// Derived from the task's signal, so cancelling the task rejects it too.
#[derive(Debug, Clone)]
pub struct PendingCompletion {
    id: u64,
    token: CancellationToken,
}

impl PendingCompletion {
    #[must_use]
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            id: next_id(),
            token: parent.child_token(),
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Reject the wait. Idempotent.
    pub fn reject(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the wait has been rejected.
    pub async fn rejected(&self) {
        self.token.cancelled().await;
    }
}
