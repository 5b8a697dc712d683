//! Public entry points: `build`, `start` and `bail`.
//!
//! The [`Orchestrator`] records the task it is currently driving, the
//! pending wait for the first compile and the open dev middleware in one
//! state slot, so `bail` can reach all three from outside the task.

mod build;
mod start;

use crate::compiler::Compiler;
use crate::dev::DevMiddleware;
use crate::error::BuildError;
use crate::presets::Presets;
use crate::router::Router;
use crate::stats::SharedStats;
use crate::task::{CooperativeTask, PendingCompletion, TaskHandle};
use build::BuildWorkflow;
use start::StartWorkflow;
use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Inputs of one `build` or `start` invocation.
#[derive(Clone)]
pub struct BuildOptions {
    pub start_time: Instant,
    pub presets: Arc<dyn Presets>,
    pub router: Option<Arc<dyn Router>>,
    /// Surface the raw stats of a failed compile instead of a summary.
    pub debug: bool,
}

impl BuildOptions {
    #[must_use]
    pub fn new(presets: Arc<dyn Presets>) -> Self {
        Self {
            start_time: Instant::now(),
            presets,
            router: None,
            debug: false,
        }
    }

    #[must_use]
    pub fn with_router(mut self, router: Arc<dyn Router>) -> Self {
        self.router = Some(router);
        self
    }

    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    #[must_use]
    pub fn with_start_time(mut self, start_time: Instant) -> Self {
        self.start_time = start_time;
        self
    }
}

impl fmt::Debug for BuildOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildOptions")
            .field("start_time", &self.start_time)
            .field("router", &self.router.is_some())
            .field("debug", &self.debug)
            .finish_non_exhaustive()
    }
}

/// Successful result of `build` or `start`.
#[derive(Debug)]
pub struct BuildOutcome {
    pub stats: SharedStats,
    pub total_time: Duration,
    /// Stops what this invocation left running, and nothing else.
    pub cancel: CancelHandle,
}

/// What a workflow hands back to the orchestrator.
pub(crate) struct Completed {
    stats: SharedStats,
    server: Option<Arc<DevMiddleware>>,
}

#[derive(Clone)]
enum CancelTarget {
    /// Everything the orchestrator has recorded, like [`Orchestrator::bail`].
    Orchestrator,
    /// The dev middleware one invocation opened, if any.
    Outcome(Option<Arc<DevMiddleware>>),
}

/// Stops work started by an [`Orchestrator`].
///
/// The handle in a [`BuildOutcome`] only closes what that invocation left
/// running. [`Orchestrator::cancel_handle`] hands out one that bails.
#[derive(Clone)]
pub struct CancelHandle {
    state: State,
    target: CancelTarget,
}

impl CancelHandle {
    pub async fn cancel(&self) {
        match &self.target {
            CancelTarget::Orchestrator => self.state.bail().await,
            CancelTarget::Outcome(Some(server)) => {
                self.state.release_server(server);
                match server.close().await {
                    Ok(()) => debug!("closed dev middleware"),
                    Err(e) => warn!(error = %e, "Unable to close preview build!"),
                }
            }
            CancelTarget::Outcome(None) => {}
        }
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = match &self.target {
            CancelTarget::Orchestrator => "orchestrator",
            CancelTarget::Outcome(Some(_)) => "server",
            CancelTarget::Outcome(None) => "nothing",
        };
        f.debug_struct("CancelHandle")
            .field("target", &target)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct Slots {
    task: Option<TaskHandle>,
    pending: Option<PendingCompletion>,
    server: Option<Arc<DevMiddleware>>,
}

/// Orchestrator state shared with running workflows.
#[derive(Clone, Default)]
pub(crate) struct State {
    slots: Arc<Mutex<Slots>>,
}

impl State {
    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self, task: TaskHandle) {
        if let Some(previous) = self.lock().task.replace(task) {
            debug!(task = previous.name(), id = previous.id(), "superseded");
        }
    }

    /// Forget `id` unless another task has replaced it already.
    fn finish(&self, id: u64) {
        let mut slots = self.lock();
        if slots.task.as_ref().is_some_and(|task| task.id() == id) {
            slots.task = None;
        }
    }

    fn current_task(&self) -> Option<TaskHandle> {
        self.lock().task.clone()
    }

    pub(crate) fn set_pending(&self, pending: PendingCompletion) {
        self.lock().pending = Some(pending);
    }

    pub(crate) fn clear_pending(&self, id: u64) {
        let mut slots = self.lock();
        if slots.pending.as_ref().is_some_and(|pending| pending.id() == id) {
            slots.pending = None;
        }
    }

    pub(crate) fn open_server(&self, server: Arc<DevMiddleware>) {
        if self.lock().server.replace(server).is_some() {
            debug!("replaced the recorded dev middleware");
        }
    }

    /// Forget `server` if it is still the recorded one.
    fn release_server(&self, server: &Arc<DevMiddleware>) {
        let mut slots = self.lock();
        if slots.server.as_ref().is_some_and(|open| Arc::ptr_eq(open, server)) {
            slots.server = None;
        }
    }

    async fn bail(&self) {
        let (task, pending, server) = {
            let mut slots = self.lock();
            (slots.task.take(), slots.pending.take(), slots.server.take())
        };

        if let Some(task) = task {
            task.cancel("bail");
        }
        if let Some(pending) = pending {
            pending.reject();
        }
        if let Some(server) = server {
            match server.close().await {
                Ok(()) => warn!("Force closed preview build"),
                Err(e) => warn!(error = %e, "Unable to close preview build!"),
            }
        }
    }
}

/// Drives the compiler through `build` and `start`.
pub struct Orchestrator {
    compiler: Arc<dyn Compiler>,
    state: State,
    exit_code: AtomicI32,
    modules_estimate: Arc<AtomicUsize>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(compiler: Arc<dyn Compiler>) -> Self {
        Self {
            compiler,
            state: State::default(),
            exit_code: AtomicI32::new(0),
            modules_estimate: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Compile once.
    ///
    /// Any failure other than a cancellation sets the exit code to 1.
    pub async fn build(&self, options: BuildOptions) -> Result<BuildOutcome, BuildError> {
        let start_time = options.start_time;
        let task = CooperativeTask::new(BuildWorkflow::new(Arc::clone(&self.compiler), options));
        let id = task.handle().id();

        self.state.begin(task.handle());
        let result = task.run().await;
        self.state.finish(id);

        match result {
            Ok(completed) => Ok(self.outcome(completed, start_time)),
            Err(e) => {
                if !e.is_cancellation() {
                    self.exit_code.store(1, Ordering::Release);
                }
                Err(e)
            }
        }
    }

    /// Start watching and serve the result through the router.
    ///
    /// Resolves once the first compile settles. The watcher keeps running
    /// until [`Orchestrator::bail`] or the outcome's [`CancelHandle`] stops
    /// it, even when that first compile failed.
    pub async fn start(&self, options: BuildOptions) -> Result<BuildOutcome, BuildError> {
        let Some(router) = options.router.clone() else {
            return Err(BuildError::MissingRouter);
        };
        let start_time = options.start_time;
        let task = CooperativeTask::new(StartWorkflow::new(
            Arc::clone(&self.compiler),
            options,
            router,
            self.state.clone(),
            Arc::clone(&self.modules_estimate),
        ));
        let id = task.handle().id();

        self.state.begin(task.handle());
        let result = task.run().await;
        self.state.finish(id);

        result.map(|completed| self.outcome(completed, start_time))
    }

    /// Like [`Orchestrator::start`], but bail if the first compile takes
    /// longer than `timeout`.
    pub async fn start_within(
        &self,
        options: BuildOptions,
        timeout: Duration,
    ) -> Result<BuildOutcome, BuildError> {
        let start = self.start(options);
        tokio::pin!(start);

        tokio::select! {
            result = &mut start => return result,
            () = tokio::time::sleep(timeout) => {}
        }

        warn!(?timeout, "first compile did not finish in time");
        self.bail().await;
        match start.await {
            Ok(_) => Err(BuildError::TimedOut(timeout)),
            Err(e) if e.is_cancellation() => Err(BuildError::TimedOut(timeout)),
            Err(e) => Err(e),
        }
    }

    /// Stop whatever is running. Never fails; calling it with nothing
    /// running does nothing.
    pub async fn bail(&self) {
        self.state.bail().await;
    }

    /// Handle performing [`Orchestrator::bail`] from elsewhere.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            state: self.state.clone(),
            target: CancelTarget::Orchestrator,
        }
    }

    /// Task currently recorded as in flight.
    #[must_use]
    pub fn current_task(&self) -> Option<TaskHandle> {
        self.state.current_task()
    }

    /// Process exit code: 1 after a failed `build`, 0 otherwise.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::Acquire)
    }

    fn outcome(&self, completed: Completed, start_time: Instant) -> BuildOutcome {
        BuildOutcome {
            stats: completed.stats,
            total_time: start_time.elapsed(),
            cancel: CancelHandle {
                state: self.state.clone(),
                target: CancelTarget::Outcome(completed.server),
            },
        }
    }
}
