#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

pub mod compiler;
pub mod config;
pub mod dev;
pub mod error;
pub mod orchestrator;
pub mod presets;
pub mod progress;
pub mod router;
pub mod stats;
pub mod task;
pub mod version;

pub use compiler::{
    Compiler, CompilerError, CompilerHandle, ProcessCompiler, ProgressHandler, ProgressUpdate,
    WatchSession,
};
pub use config::{BundlerConfig, Config};
pub use dev::DevMiddleware;
pub use error::{BuildError, ConfigError};
pub use orchestrator::{BuildOptions, BuildOutcome, CancelHandle, Orchestrator};
pub use presets::{JsonPresets, Presets};
pub use progress::ProgressReporter;
pub use router::{PreviewRouter, Router};
pub use stats::{SharedStats, StaticStats, Stats, StatsJson, StatsPreference};
pub use task::{Checkpoint, CooperativeTask, PendingCompletion, TaskHandle};
pub use version::VERSION;
