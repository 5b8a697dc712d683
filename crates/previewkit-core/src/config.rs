use crate::stats::StatsPreference;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// Default presets file name, looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "previewkit.json";

/// Runtime configuration for the previewkit CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Current working directory.
    pub cwd: PathBuf,

    /// Whether to emit JSON logs.
    pub json_logs: bool,

    /// Verbosity level (0 = INFO, 1 = DEBUG, 2+ = TRACE).
    pub verbosity: u8,

    /// Surface raw compiler stats instead of a summarized error.
    pub debug_bundler: bool,

    /// Presets file (defaults to `previewkit.json` in `cwd`).
    pub config_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            json_logs: false,
            verbosity: 0,
            debug_bundler: false,
            config_file: None,
        }
    }
}

impl Config {
    /// Create a new config with the given working directory.
    #[must_use]
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            cwd,
            ..Default::default()
        }
    }

    /// Set verbosity level.
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set JSON log output.
    #[must_use]
    pub fn with_json_logs(mut self, json: bool) -> Self {
        self.json_logs = json;
        self
    }

    /// Surface raw compiler stats on failure.
    #[must_use]
    pub fn with_debug_bundler(mut self, debug: bool) -> Self {
        self.debug_bundler = debug;
        self
    }

    /// Use an explicit presets file.
    #[must_use]
    pub fn with_config_file(mut self, path: Option<PathBuf>) -> Self {
        self.config_file = path;
        self
    }

    /// Presets file to load, relative paths resolved against `cwd`.
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        match &self.config_file {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => self.cwd.join(path),
            None => self.cwd.join(CONFIG_FILE_NAME),
        }
    }
}

/// Resolved configuration handed to the compiler.
///
/// Only the keys the orchestrator reads are modelled; everything else is kept
/// in `rest` and passed through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundlerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,

    #[serde(default)]
    pub output: OutputOptions,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<StatsPreference>,

    #[serde(default)]
    pub watch_options: WatchOptions,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typescript_options: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub babel_options: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework_options: Option<Value>,

    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl BundlerConfig {
    /// Name used in log lines and error messages.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("preview")
    }
}

/// Where the compiler emits assets and where they are served from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputOptions {
    #[serde(default = "default_output_path")]
    pub path: PathBuf,

    #[serde(default = "default_public_path")]
    pub public_path: String,
}

fn default_output_path() -> PathBuf {
    PathBuf::from("storybook-static")
}

fn default_public_path() -> String {
    "/".to_string()
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            path: default_output_path(),
            public_path: default_public_path(),
        }
    }
}

/// Watch-mode tuning forwarded to the compiler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate_timeout_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignored: Vec<String>,
}
