//! Compiler capability consumed by the orchestrator.
//!
//! The bundler itself is opaque: the orchestrator only needs to construct a
//! handle from a resolved [`BundlerConfig`], subscribe to its progress, and
//! either run it once or put it in watch mode.
//!
//! ## Implementations
//!
//! - [`ProcessCompiler`] - drives an external bundler executable over a
//!   line-delimited JSON protocol

pub mod process;

pub use process::ProcessCompiler;

use crate::config::BundlerConfig;
use crate::stats::SharedStats;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

/// A progress tick from the compiler.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    /// Completion between 0 and 1.
    pub percentage: f64,
    /// Free-text description of the current phase.
    pub message: String,
    /// `(done, total)` module counts, when the compiler knows them.
    pub modules: Option<(usize, usize)>,
}

/// Callback receiving progress ticks. Must return quickly.
pub type ProgressHandler = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Factory for compiler handles.
pub trait Compiler: Send + Sync {
    /// Compiler name (e.g., "webpack", "process").
    fn name(&self) -> &str;

    /// Version of the underlying bundler.
    fn version(&self) -> semver::Version;

    /// Construct a handle for `config`.
    ///
    /// Returns `None` when no compiler can be built at runtime; the caller
    /// reports that as a missing compiler.
    fn configure(&self, config: &BundlerConfig) -> Option<Box<dyn CompilerHandle>>;
}

/// A configured compiler instance.
pub trait CompilerHandle: Send {
    /// Subscribe to progress ticks. Replaces any previous handler.
    fn on_progress(&mut self, handler: ProgressHandler);

    /// Compile once and report the result.
    fn run(self: Box<Self>) -> BoxFuture<'static, Result<SharedStats, CompilerError>>;

    /// Start watching; every rebuild is reported through the session.
    fn watch(self: Box<Self>) -> Result<Box<dyn WatchSession>, CompilerError>;
}

/// A compiler running in watch mode.
pub trait WatchSession: Send + Sync {
    /// Wait for the next rebuild to settle.
    ///
    /// Returns `None` once the session has ended.
    fn next_stats(&self) -> BoxFuture<'_, Option<SharedStats>>;

    /// Stop watching and release the compiler.
    fn close(&self) -> BoxFuture<'_, Result<(), CompilerError>>;
}

/// Error reported by the compiler itself, distinct from compile diagnostics.
#[derive(Debug)]
pub struct CompilerError {
    /// Error code.
    pub code: &'static str,
    /// Human-readable error message.
    pub message: String,
}

impl CompilerError {
    /// Create a new compiler error.
    #[must_use]
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// The compiler process could not be started.
    #[must_use]
    pub fn spawn_failed(message: impl Into<String>) -> Self {
        Self::new("COMPILER_SPAWN_FAILED", message)
    }

    /// Create an I/O error.
    #[must_use]
    pub fn io_error(message: impl Into<String>) -> Self {
        Self::new("COMPILER_IO_ERROR", message)
    }

    /// The compiler stopped without reporting a result.
    #[must_use]
    pub fn exited(message: impl Into<String>) -> Self {
        Self::new("COMPILER_EXITED", message)
    }
}

impl fmt::Display for CompilerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CompilerError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compiler_error_display() {
        let error = CompilerError::exited("status 3");
        assert!(error.to_string().contains("COMPILER_EXITED"));
        assert!(error.to_string().contains("status 3"));
    }
}
