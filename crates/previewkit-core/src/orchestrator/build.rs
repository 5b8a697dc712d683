use super::{BuildOptions, Completed};
use crate::compiler::{Compiler, CompilerHandle};
use crate::config::BundlerConfig;
use crate::error::BuildError;
use crate::presets::{check_compiler_version, resolve_bundler_config, ConfigType};
use crate::stats::{aggregate, SharedStats};
use crate::task::{Checkpoint, Step, Workflow};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    ResolveExecutor,
    ResolveConfig,
    ConfigureCompiler,
    Run,
    Evaluate,
}

/// One-shot compile.
pub(super) struct BuildWorkflow {
    compiler: Arc<dyn Compiler>,
    options: BuildOptions,
    stage: Stage,
    config: BundlerConfig,
    handle: Option<Box<dyn CompilerHandle>>,
    stats: Option<SharedStats>,
}

impl BuildWorkflow {
    pub(super) fn new(compiler: Arc<dyn Compiler>, options: BuildOptions) -> Self {
        Self {
            compiler,
            options,
            stage: Stage::ResolveExecutor,
            config: BundlerConfig::default(),
            handle: None,
            stats: None,
        }
    }

    fn evaluate(&self, stats: SharedStats) -> Result<Completed, BuildError> {
        let preference = self.config.stats.as_ref();

        if stats.has_errors() {
            error!("=> Failed to build the preview");
            let summary = aggregate(stats.as_ref(), preference);
            for message in summary.errors.iter().chain(&summary.warnings) {
                error!("{message}");
            }
            return Err(if self.options.debug {
                BuildError::Diagnostics(stats)
            } else {
                BuildError::CompileFailed
            });
        }

        trace!(
            elapsed_ms = self.options.start_time.elapsed().as_millis(),
            "=> Preview built"
        );
        if stats.has_warnings() {
            for message in aggregate(stats.as_ref(), preference).warnings {
                warn!("{message}");
            }
        }

        Ok(Completed { stats, server: None })
    }
}

impl Workflow for BuildWorkflow {
    type Output = Completed;

    fn name(&self) -> &'static str {
        "build"
    }

    async fn advance(&mut self, _signal: &CancellationToken) -> Result<Step<Completed>, BuildError> {
        match self.stage {
            Stage::ResolveExecutor => {
                check_compiler_version(self.options.presets.as_ref(), self.compiler.as_ref())
                    .await?;
                self.stage = Stage::ResolveConfig;
                Ok(Step::Suspend(Checkpoint::ExecutorResolved))
            }
            Stage::ResolveConfig => {
                info!("=> Compiling preview..");
                self.config =
                    resolve_bundler_config(self.options.presets.as_ref(), ConfigType::Production)
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
                self.stage = Stage::Run;
                Ok(Step::Suspend(Checkpoint::CompilerReady))
            }
            Stage::Run => {
                let handle = self.handle.take().ok_or(BuildError::Finished)?;
                match handle.run().await {
                    Ok(stats) => {
                        self.stats = Some(stats);
                        self.stage = Stage::Evaluate;
                        Ok(Step::Suspend(Checkpoint::Compiled))
                    }
                    Err(e) => {
                        error!("=> Failed to build the preview");
                        error!("{e}");
                        Err(BuildError::Invocation(e))
                    }
                }
            }
            Stage::Evaluate => {
                let stats = self.stats.take().ok_or(BuildError::NoStats)?;
                self.evaluate(stats).map(Step::Done)
            }
        }
    }

    async fn unwind(&mut self) {
        self.handle = None;
        self.stats = None;
    }
}
