//! External bundler driven over stdin/stdout.
//!
//! The child process receives the resolved [`BundlerConfig`] as JSON on stdin
//! and `PREVIEWKIT_MODE=run|watch` in its environment. It reports back with
//! newline-delimited JSON events on stdout:
//!
//! ```text
//! {"type":"progress","percentage":0.5,"message":"building","modules":[3,10]}
//! {"type":"done","errors":[],"warnings":["deprecated API X"]}
//! ```
//!
//! In `run` mode the first `done` event is the result. In `watch` mode every
//! `done` event is one rebuild. Lines that are not events are logged at debug
//! level and otherwise ignored; stderr is drained into the log as well.

use super::{Compiler, CompilerError, CompilerHandle, ProgressHandler, ProgressUpdate, WatchSession};
use crate::config::BundlerConfig;
use crate::stats::{SharedStats, StaticStats};
use futures::future::BoxFuture;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Environment variable telling the child which mode it runs in.
pub const MODE_ENV: &str = "PREVIEWKIT_MODE";

const RUN_MODE: &str = "run";
const WATCH_MODE: &str = "watch";

/// Event written by the child on stdout.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum CompilerEvent {
    Progress {
        percentage: f64,
        #[serde(default)]
        message: String,
        #[serde(default)]
        modules: Option<(usize, usize)>,
    },
    Done {
        #[serde(default)]
        errors: Vec<String>,
        #[serde(default)]
        warnings: Vec<String>,
    },
}

fn parse_event(line: &str) -> Option<CompilerEvent> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

/// Compiler backed by an external executable.
#[derive(Debug, Clone)]
pub struct ProcessCompiler {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    version: semver::Version,
}

impl ProcessCompiler {
    /// Create a compiler that launches `program` with `args`.
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            cwd: None,
            version: semver::Version::new(0, 0, 0),
        }
    }

    /// Run the child in `cwd` instead of the current directory.
    #[must_use]
    pub fn with_cwd(mut self, cwd: PathBuf) -> Self {
        self.cwd = Some(cwd);
        self
    }

    /// Declare the bundler version the executable wraps.
    #[must_use]
    pub fn with_version(mut self, version: semver::Version) -> Self {
        self.version = version;
        self
    }
}

impl Compiler for ProcessCompiler {
    fn name(&self) -> &str {
        &self.program
    }

    fn version(&self) -> semver::Version {
        self.version.clone()
    }

    fn configure(&self, config: &BundlerConfig) -> Option<Box<dyn CompilerHandle>> {
        let program = match &self.cwd {
            Some(cwd) => which::which_in(&self.program, std::env::var_os("PATH"), cwd),
            None => which::which(&self.program),
        };
        let program = match program {
            Ok(path) => path,
            Err(e) => {
                debug!(program = %self.program, error = %e, "compiler executable not found");
                return None;
            }
        };
        let payload = serde_json::to_vec(config).ok()?;

        Some(Box::new(ProcessHandle {
            program,
            args: self.args.clone(),
            cwd: self.cwd.clone(),
            payload,
            progress: None,
        }))
    }
}

/// A configured, not yet started child process.
struct ProcessHandle {
    program: PathBuf,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    payload: Vec<u8>,
    progress: Option<ProgressHandler>,
}

impl ProcessHandle {
    /// Spawn the child, feed it the config and return its stdout lines.
    fn spawn(&self, mode: &str) -> Result<(Child, Lines<BufReader<ChildStdout>>), CompilerError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env(MODE_ENV, mode)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|e| {
            CompilerError::spawn_failed(format!("{}: {e}", self.program.display()))
        })?;
        debug!(pid = child.id().unwrap_or(0), mode, "spawned compiler");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CompilerError::io_error("failed to capture stdout"))?;

        // The child may exit without reading its config, so the write must not
        // hold up the caller.
        if let Some(mut stdin) = child.stdin.take() {
            let payload = self.payload.clone();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&payload).await {
                    debug!(error = %e, "compiler did not read its config");
                }
            });
        }

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "previewkit::compiler", "{line}");
                }
            });
        }

        Ok((child, BufReader::new(stdout).lines()))
    }
}

fn report_progress(handler: Option<&ProgressHandler>, event: CompilerEvent) -> Option<StaticStats> {
    match event {
        CompilerEvent::Progress {
            percentage,
            message,
            modules,
        } => {
            if let Some(handler) = handler {
                handler(ProgressUpdate {
                    percentage,
                    message,
                    modules,
                });
            }
            None
        }
        CompilerEvent::Done { errors, warnings } => Some(StaticStats::new(errors, warnings)),
    }
}

impl CompilerHandle for ProcessHandle {
    fn on_progress(&mut self, handler: ProgressHandler) {
        self.progress = Some(handler);
    }

    fn run(self: Box<Self>) -> BoxFuture<'static, Result<SharedStats, CompilerError>> {
        Box::pin(async move {
            let (mut child, mut lines) = self.spawn(RUN_MODE)?;
            let mut result = None;

            // Keep reading after `done` so the child never blocks on a full pipe.
            while let Some(line) = lines
                .next_line()
                .await
                .map_err(|e| CompilerError::io_error(e.to_string()))?
            {
                match parse_event(&line) {
                    Some(event) => {
                        if let Some(stats) = report_progress(self.progress.as_ref(), event) {
                            if result.is_none() {
                                result = Some(stats);
                            }
                        }
                    }
                    None => debug!(target: "previewkit::compiler", "{line}"),
                }
            }

            let status = child
                .wait()
                .await
                .map_err(|e| CompilerError::io_error(e.to_string()))?;

            match result {
                Some(stats) => Ok(stats.into_shared()),
                None => Err(CompilerError::exited(format!(
                    "compiler exited ({status}) without reporting a result"
                ))),
            }
        })
    }

    fn watch(self: Box<Self>) -> Result<Box<dyn WatchSession>, CompilerError> {
        let (child, lines) = self.spawn(WATCH_MODE)?;
        Ok(Box::new(ProcessSession {
            child: Mutex::new(Some(child)),
            lines: Mutex::new(lines),
            progress: self.progress,
            closed: AtomicBool::new(false),
        }))
    }
}

/// A child process running in watch mode.
struct ProcessSession {
    child: Mutex<Option<Child>>,
    lines: Mutex<Lines<BufReader<ChildStdout>>>,
    progress: Option<ProgressHandler>,
    closed: AtomicBool,
}

impl WatchSession for ProcessSession {
    fn next_stats(&self) -> BoxFuture<'_, Option<SharedStats>> {
        Box::pin(async move {
            let mut lines = self.lines.lock().await;
            loop {
                if self.closed.load(Ordering::Acquire) {
                    return None;
                }
                match lines.next_line().await {
                    Ok(Some(line)) => match parse_event(&line) {
                        Some(event) => {
                            if let Some(stats) = report_progress(self.progress.as_ref(), event) {
                                return Some(stats.into_shared());
                            }
                        }
                        None => debug!(target: "previewkit::compiler", "{line}"),
                    },
                    Ok(None) => return None,
                    Err(e) => {
                        warn!(error = %e, "lost compiler output");
                        return None;
                    }
                }
            }
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), CompilerError>> {
        Box::pin(async move {
            self.closed.store(true, Ordering::Release);
            let Some(mut child) = self.child.lock().await.take() else {
                return Ok(());
            };
            if child
                .try_wait()
                .map_err(|e| CompilerError::io_error(e.to_string()))?
                .is_some()
            {
                return Ok(());
            }
            child
                .kill()
                .await
                .map_err(|e| CompilerError::io_error(format!("failed to stop compiler: {e}")))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_progress_event() {
        let event = parse_event(
            r#"{"type":"progress","percentage":0.5,"message":"building","modules":[3,10]}"#,
        );
        assert_eq!(
            event,
            Some(CompilerEvent::Progress {
                percentage: 0.5,
                message: "building".to_string(),
                modules: Some((3, 10)),
            })
        );
    }

    #[test]
    fn test_parse_done_event_defaults() {
        let event = parse_event(r#"{"type":"done"}"#);
        assert_eq!(
            event,
            Some(CompilerEvent::Done {
                errors: Vec::new(),
                warnings: Vec::new(),
            })
        );
    }

    #[test]
    fn test_parse_ignores_plain_output() {
        assert_eq!(parse_event("webpack 5.0.0 compiled"), None);
        assert_eq!(parse_event(r#"{"type":"unknown"}"#), None);
        assert_eq!(parse_event("{not json"), None);
    }

    #[test]
    fn test_missing_program_is_missing_compiler() {
        let compiler = ProcessCompiler::new("previewkit-no-such-bundler-xyz", Vec::new());
        assert!(compiler.configure(&BundlerConfig::default()).is_none());
    }

    #[test]
    fn test_report_progress_forwards_ticks() {
        use std::sync::{Arc, Mutex as StdMutex};

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: ProgressHandler = Arc::new(move |update| sink.lock().unwrap().push(update));

        let stats = report_progress(
            Some(&handler),
            CompilerEvent::Progress {
                percentage: 0.25,
                message: "resolving".to_string(),
                modules: None,
            },
        );

        assert!(stats.is_none());
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(seen.lock().unwrap()[0].message, "resolving");
    }
}
