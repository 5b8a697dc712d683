//! Compile result inspection.
//!
//! A compiler reports each pass through a [`Stats`] object. Callers never read
//! it directly for diagnostics: [`aggregate`] normalizes the configured
//! verbosity first, so errors and warnings are always requested no matter how
//! the verbosity was spelled in the bundler configuration.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Result of one compile pass.
pub trait Stats: fmt::Debug + Send + Sync {
    /// Whether the pass produced at least one error.
    fn has_errors(&self) -> bool;

    /// Whether the pass produced at least one warning.
    fn has_warnings(&self) -> bool;

    /// Render the diagnostics selected by `options`.
    fn to_json(&self, options: &StatsOptions) -> StatsJson;
}

/// Stats shared between the orchestrator, the dev middleware and callers.
pub type SharedStats = Arc<dyn Stats>;

/// Errors and warnings of a compile pass, in the order the compiler produced them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsJson {
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Verbosity as written in the bundler configuration.
///
/// Bundlers accept either a named preset (`"minimal"`), a boolean toggle or a
/// full options object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatsPreference {
    Toggle(bool),
    Preset(String),
    Explicit(StatsOptionsInput),
}

/// Options object form of [`StatsPreference`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsOptionsInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warnings: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Canonical verbosity handed to [`Stats::to_json`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
    pub errors: bool,
    pub warnings: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for StatsOptions {
    fn default() -> Self {
        Self {
            preset: None,
            errors: true,
            warnings: true,
            extra: Map::new(),
        }
    }
}

impl StatsPreference {
    /// Collapse any representation into [`StatsOptions`] with errors and
    /// warnings switched on.
    #[must_use]
    pub fn normalize(&self) -> StatsOptions {
        let (preset, extra) = match self {
            Self::Toggle(true) => (Some("normal".to_string()), Map::new()),
            Self::Toggle(false) => (Some("none".to_string()), Map::new()),
            Self::Preset(name) => (Some(name.clone()), Map::new()),
            // `errors`/`warnings` from the input are dropped on purpose: they
            // are forced on below.
            Self::Explicit(input) => (input.preset.clone(), input.extra.clone()),
        };

        StatsOptions {
            preset,
            extra,
            ..StatsOptions::default()
        }
    }
}

/// Normalize `preference` and extract the errors and warnings of `stats`.
#[must_use]
pub fn aggregate(stats: &dyn Stats, preference: Option<&StatsPreference>) -> StatsJson {
    let options = preference.map_or_else(StatsOptions::default, StatsPreference::normalize);
    stats.to_json(&options)
}

/// Stats backed by plain lists of messages.
///
/// Used by compiler adapters that receive diagnostics as text, and to turn a
/// single error message into something diagnostics renderers understand.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticStats {
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl StaticStats {
    #[must_use]
    pub fn new(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self { errors, warnings }
    }

    /// Stats holding a single error and no warnings.
    #[must_use]
    pub fn from_error(message: impl Into<String>) -> Self {
        Self::new(vec![message.into()], Vec::new())
    }

    #[must_use]
    pub fn into_shared(self) -> SharedStats {
        Arc::new(self)
    }
}

impl Stats for StaticStats {
    fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    fn to_json(&self, options: &StatsOptions) -> StatsJson {
        StatsJson {
            errors: if options.errors {
                self.errors.clone()
            } else {
                Vec::new()
            },
            warnings: if options.warnings {
                self.warnings.clone()
            } else {
                Vec::new()
            },
        }
    }
}
