use crate::compiler::CompilerError;
use crate::stats::SharedStats;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure while resolving the bundler configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid value for `{aspect}`: {source}")]
    InvalidAspect {
        aspect: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid bundler version requirement `{requirement}`: {source}")]
    InvalidVersionRequirement {
        requirement: String,
        #[source]
        source: semver::Error,
    },

    #[error("{0}")]
    Other(String),
}

impl ConfigError {
    #[must_use]
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

/// Failure of a `build` or `start` invocation.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{name}: missing compiler at runtime!")]
    MissingCompiler { name: String },

    #[error(transparent)]
    Invocation(#[from] CompilerError),

    /// The compile had errors; details were logged.
    #[error("=> Bundler failed, learn more with --debug-bundler")]
    CompileFailed,

    /// The compile had errors; the raw stats are attached for rendering.
    #[error("compilation finished with errors")]
    Diagnostics(SharedStats),

    #[error("no stats after building preview")]
    NoStats,

    #[error("`start` needs a router to attach the dev middleware to")]
    MissingRouter,

    #[error("first compile did not finish within {0:?}")]
    TimedOut(Duration),

    /// The task was stopped through `bail`. Not a build defect.
    #[error("build cancelled")]
    Cancelled,

    #[error("task already finished")]
    Finished,
}

impl BuildError {
    /// Whether this error is a requested stop rather than a failure.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Raw stats carried by a diagnostics failure.
    #[must_use]
    pub fn stats(&self) -> Option<&SharedStats> {
        match self {
            Self::Diagnostics(stats) => Some(stats),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::StaticStats;

    #[test]
    fn test_missing_compiler_message() {
        let err = BuildError::MissingCompiler {
            name: "demo".to_string(),
        };
        assert_eq!(err.to_string(), "demo: missing compiler at runtime!");
    }

    #[test]
    fn test_cancellation_is_not_a_failure() {
        assert!(BuildError::Cancelled.is_cancellation());
        assert!(!BuildError::CompileFailed.is_cancellation());
    }

    #[test]
    fn test_stats_accessor() {
        let err = BuildError::Diagnostics(StaticStats::from_error("bad").into_shared());
        assert!(err.stats().is_some_and(|s| s.has_errors()));
        assert!(BuildError::NoStats.stats().is_none());
    }
}
