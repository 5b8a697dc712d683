use super::{BuildOptions, Completed, State};
use crate::compiler::{Compiler, CompilerHandle};
use crate::config::BundlerConfig;
use crate::dev::DevMiddleware;
use crate::error::BuildError;
use crate::presets::{check_compiler_version, resolve_bundler_config, ConfigType};
use crate::progress::ProgressReporter;
use crate::router::Router;
use crate::stats::SharedStats;
use crate::task::{Checkpoint, PendingCompletion, Step, Workflow};
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    ResolveExecutor,
    ResolveConfig,
    ConfigureCompiler,
    AttachProgress,
    Watch,
    Evaluate,
}

/// Watch mode behind the dev server.
pub(super) struct StartWorkflow {
    compiler: Arc<dyn Compiler>,
    options: BuildOptions,
    router: Arc<dyn Router>,
    state: State,
    modules_estimate: Arc<AtomicUsize>,
    stage: Stage,
    config: BundlerConfig,
    handle: Option<Box<dyn CompilerHandle>>,
    server: Option<Arc<DevMiddleware>>,
    stats: Option<SharedStats>,
}

impl StartWorkflow {
    pub(super) fn new(
        compiler: Arc<dyn Compiler>,
        options: BuildOptions,
        router: Arc<dyn Router>,
        state: State,
        modules_estimate: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            compiler,
            options,
            router,
            state,
            modules_estimate,
            stage: Stage::ResolveExecutor,
            config: BundlerConfig::default(),
            handle: None,
            server: None,
            stats: None,
        }
    }

    /// Start watching, mount the middleware and wait for the first compile.
    async fn watch(&mut self, signal: &CancellationToken) -> Result<Option<SharedStats>, BuildError> {
        let handle = self.handle.take().ok_or(BuildError::Finished)?;
        let session = handle.watch()?;

        let server = DevMiddleware::new(session, &self.config);
        self.server = Some(Arc::clone(&server));
        self.state.open_server(Arc::clone(&server));
        server.attach(self.router.as_ref());

        let pending = PendingCompletion::new(signal);
        self.state.set_pending(pending.clone());

        let settled = tokio::select! {
            biased;
            () = pending.rejected() => Err(BuildError::Cancelled),
            stats = server.wait_until_valid() => Ok(stats),
        };

        self.state.clear_pending(pending.id());
        settled
    }
}

impl Workflow for StartWorkflow {
    type Output = Completed;

    fn name(&self) -> &'static str {
        "start"
    }

    async fn advance(&mut self, signal: &CancellationToken) -> Result<Step<Completed>, BuildError> {
        match self.stage {
            Stage::ResolveExecutor => {
                check_compiler_version(self.options.presets.as_ref(), self.compiler.as_ref())
                    .await?;
                self.stage = Stage::ResolveConfig;
                Ok(Step::Suspend(Checkpoint::ExecutorResolved))
            }
            Stage::ResolveConfig => {
                self.config =
                    resolve_bundler_config(self.options.presets.as_ref(), ConfigType::Development)
                        .await?;
                self.stage = Stage::ConfigureCompiler;
                Ok(Step::Suspend(Checkpoint::ConfigResolved))
            }
            Stage::ConfigureCompiler => {
                let Some(handle) = self.compiler.configure(&self.config) else {
                    let err = BuildError::MissingCompiler {
                        name: self.config.display_name().to_string(),
                    };
                    error!("{err}");
                    return Err(err);
                };
                self.handle = Some(handle);
                self.stage = Stage::AttachProgress;
                Ok(Step::Suspend(Checkpoint::CompilerReady))
            }
            Stage::AttachProgress => {
                let reporter = ProgressReporter::new(self.options.start_time)
                    .with_modules_estimate(Arc::clone(&self.modules_estimate))
                    .attach(self.router.as_ref());
                if let Some(handle) = self.handle.as_mut() {
                    handle.on_progress(reporter.handler());
                }
                self.stage = Stage::Watch;
                Ok(Step::Suspend(Checkpoint::ProgressAttached))
            }
            Stage::Watch => {
                self.stats = self.watch(signal).await?;
                self.stage = Stage::Evaluate;
                Ok(Step::Suspend(Checkpoint::Compiled))
            }
            Stage::Evaluate => {
                let stats = self.stats.take().ok_or(BuildError::NoStats)?;
                if stats.has_errors() {
                    // The watcher stays up to retry on the next change; bail
                    // closes it through the state slot.
                    self.server = None;
                    return Err(BuildError::Diagnostics(stats));
                }
                Ok(Step::Done(Completed {
                    stats,
                    server: self.server.take(),
                }))
            }
        }
    }

    async fn unwind(&mut self) {
        self.handle = None;
        self.stats = None;
        if let Some(server) = self.server.take() {
            match server.close().await {
                Ok(()) => debug!("closed dev middleware"),
                Err(e) => warn!(error = %e, "Unable to close preview build!"),
            }
        }
    }
}
