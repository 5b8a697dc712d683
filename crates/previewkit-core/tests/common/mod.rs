//! Shared fixtures for orchestrator tests.

#![allow(dead_code)]

use futures::future::BoxFuture;
use previewkit_core::config::BundlerConfig;
use previewkit_core::{
    Compiler, CompilerError, CompilerHandle, ConfigError, JsonPresets, Presets, ProgressHandler,
    SharedStats, StaticStats, WatchSession,
};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::MakeWriter;

/// Counts what the orchestrator did with the compiler.
#[derive(Default)]
pub struct Calls {
    pub configured: AtomicUsize,
    pub runs: AtomicUsize,
    pub watches: AtomicUsize,
    pub closes: AtomicUsize,
    pub watching: Notify,
    progress: Mutex<Option<ProgressHandler>>,
}

impl Calls {
    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    /// Progress handler the orchestrator registered.
    pub fn progress(&self) -> Option<ProgressHandler> {
        self.progress.lock().unwrap().clone()
    }
}

#[derive(Clone)]
enum RunResult {
    Stats(SharedStats),
    Fail(&'static str),
}

/// Receivers handed to watch sessions, one per session in order.
type Feeds = Arc<Mutex<VecDeque<mpsc::Receiver<SharedStats>>>>;

/// Compiler double with scripted results.
pub struct MockCompiler {
    pub calls: Arc<Calls>,
    /// `configure` calls left that produce no handle; `usize::MAX` for all.
    misses: AtomicUsize,
    run: RunResult,
    feeds: Feeds,
}

impl MockCompiler {
    fn with_run(run: RunResult) -> Self {
        Self {
            calls: Arc::new(Calls::default()),
            misses: AtomicUsize::new(0),
            run,
            feeds: Feeds::default(),
        }
    }

    /// `run` reports `stats`.
    pub fn returning(stats: SharedStats) -> Self {
        Self::with_run(RunResult::Stats(stats))
    }

    /// `run` fails with an invocation error.
    pub fn failing(message: &'static str) -> Self {
        Self::with_run(RunResult::Fail(message))
    }

    /// `configure` never produces a handle.
    pub fn missing() -> Self {
        Self::returning(StaticStats::default().into_shared()).missing_first(usize::MAX)
    }

    /// The first `count` calls to `configure` produce no handle.
    pub fn missing_first(self, count: usize) -> Self {
        self.misses.store(count, Ordering::SeqCst);
        self
    }

    /// The watch session reports whatever is sent on the returned channel.
    pub fn watching() -> (Self, mpsc::Sender<SharedStats>) {
        let (compiler, mut senders) = Self::watching_sessions(1);
        (compiler, senders.remove(0))
    }

    /// Like [`MockCompiler::watching`], with one channel per session.
    pub fn watching_sessions(count: usize) -> (Self, Vec<mpsc::Sender<SharedStats>>) {
        let compiler = Self::returning(StaticStats::default().into_shared());
        let mut senders = Vec::with_capacity(count);
        {
            let mut feeds = compiler.feeds.lock().unwrap();
            for _ in 0..count {
                let (tx, rx) = mpsc::channel(8);
                feeds.push_back(rx);
                senders.push(tx);
            }
        }
        (compiler, senders)
    }
}

impl Compiler for MockCompiler {
    fn name(&self) -> &str {
        "mock"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(5, 0, 0)
    }

    fn configure(&self, _config: &BundlerConfig) -> Option<Box<dyn CompilerHandle>> {
        let missed = self
            .misses
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                0 => None,
                usize::MAX => Some(usize::MAX),
                n => Some(n - 1),
            })
            .is_ok();
        if missed {
            return None;
        }
        self.calls.configured.fetch_add(1, Ordering::SeqCst);
        Some(Box::new(MockHandle {
            calls: Arc::clone(&self.calls),
            run: self.run.clone(),
            feeds: Arc::clone(&self.feeds),
        }))
    }
}

struct MockHandle {
    calls: Arc<Calls>,
    run: RunResult,
    feeds: Feeds,
}

impl CompilerHandle for MockHandle {
    fn on_progress(&mut self, handler: ProgressHandler) {
        *self.calls.progress.lock().unwrap() = Some(handler);
    }

    fn run(self: Box<Self>) -> BoxFuture<'static, Result<SharedStats, CompilerError>> {
        Box::pin(async move {
            self.calls.runs.fetch_add(1, Ordering::SeqCst);
            match self.run {
                RunResult::Stats(stats) => Ok(stats),
                RunResult::Fail(message) => Err(CompilerError::exited(message)),
            }
        })
    }

    fn watch(self: Box<Self>) -> Result<Box<dyn WatchSession>, CompilerError> {
        self.calls.watches.fetch_add(1, Ordering::SeqCst);
        let rx = self
            .feeds
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| mpsc::channel(1).1);
        self.calls.watching.notify_one();
        Ok(Box::new(MockSession {
            calls: self.calls,
            rx: tokio::sync::Mutex::new(rx),
            stop: CancellationToken::new(),
        }))
    }
}

struct MockSession {
    calls: Arc<Calls>,
    rx: tokio::sync::Mutex<mpsc::Receiver<SharedStats>>,
    stop: CancellationToken,
}

impl WatchSession for MockSession {
    fn next_stats(&self) -> BoxFuture<'_, Option<SharedStats>> {
        Box::pin(async move {
            let mut rx = self.rx.lock().await;
            tokio::select! {
                () = self.stop.cancelled() => None,
                stats = rx.recv() => stats,
            }
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), CompilerError>> {
        Box::pin(async move {
            self.calls.closes.fetch_add(1, Ordering::SeqCst);
            self.stop.cancel();
            Ok(())
        })
    }
}

/// Presets naming the bundler configuration `name`.
pub fn presets_named(name: &str) -> Arc<dyn Presets> {
    let presets = JsonPresets::from_value(
        PathBuf::from("."),
        json!({ "bundler": { "name": name } }),
    )
    .unwrap();
    Arc::new(presets)
}

/// Presets whose `bundler` aspect blocks until released.
#[derive(Default)]
pub struct GatedPresets {
    pub entered: Notify,
    pub release: Notify,
}

impl Presets for GatedPresets {
    fn apply<'a>(
        &'a self,
        aspect: &'a str,
        initial: Value,
        _options: &'a Value,
    ) -> BoxFuture<'a, Result<Value, ConfigError>> {
        Box::pin(async move {
            if aspect == "bundler" {
                self.entered.notify_one();
                self.release.notified().await;
            }
            Ok(initial)
        })
    }
}

/// Log sink for asserting on emitted lines.
#[derive(Clone, Default)]
pub struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for Capture {
    type Writer = Capture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Identity of a shared stats object.
pub fn same_stats(a: &SharedStats, b: &SharedStats) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a).cast::<()>(),
        Arc::as_ptr(b).cast::<()>(),
    )
}
