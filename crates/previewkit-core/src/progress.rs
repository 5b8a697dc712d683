//! Build progress republished to remote UIs.
//!
//! The compiler reports raw ticks through a [`ProgressHandler`]. The reporter
//! normalizes them and pushes them to every client connected to
//! [`PROGRESS_ROUTE`] over a websocket. Delivery is fire-and-forget: the
//! handler never waits, and ticks nobody listens to are dropped.

use crate::compiler::{ProgressHandler, ProgressUpdate};
use crate::router::{push_events, Router};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::debug;

/// Websocket route serving progress events.
pub const PROGRESS_ROUTE: &str = "/__progress";

const CHANNEL_CAPACITY: usize = 64;

/// Normalized progress event as sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    /// Completion between 0 and 1.
    pub value: f64,
    pub text: String,
    /// Total modules in this compile, or the previous compile's total while
    /// the compiler has not reported one yet.
    pub modules_count: Option<usize>,
    /// Time since the workflow started.
    pub elapsed_ms: u64,
}

/// Turns compiler ticks into [`ProgressEvent`]s.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: broadcast::Sender<ProgressEvent>,
    start_time: Instant,
    modules_estimate: Arc<AtomicUsize>,
}

impl ProgressReporter {
    #[must_use]
    pub fn new(start_time: Instant) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            start_time,
            modules_estimate: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Share the module-count estimate with earlier reporters.
    #[must_use]
    pub fn with_modules_estimate(mut self, estimate: Arc<AtomicUsize>) -> Self {
        self.modules_estimate = estimate;
        self
    }

    /// Mount the progress channel on `router`, replacing an earlier reporter.
    #[must_use]
    pub fn attach(self, router: &dyn Router) -> Self {
        router.attach(PROGRESS_ROUTE, self.routes());
        self
    }

    /// Routes serving the progress channel.
    #[must_use]
    pub fn routes(&self) -> axum::Router {
        axum::Router::new()
            .route(PROGRESS_ROUTE, get(progress_socket))
            .with_state(self.tx.clone())
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    /// Handler to register with the compiler.
    #[must_use]
    pub fn handler(&self) -> ProgressHandler {
        let reporter = self.clone();
        Arc::new(move |update| reporter.publish(update))
    }

    /// Last known total module count.
    #[must_use]
    pub fn modules_estimate(&self) -> Option<usize> {
        match self.modules_estimate.load(Ordering::Relaxed) {
            0 => None,
            n => Some(n),
        }
    }

    /// Normalize `update` and send it to connected clients.
    pub fn publish(&self, update: ProgressUpdate) {
        let value = if update.percentage.is_nan() {
            0.0
        } else {
            update.percentage.clamp(0.0, 1.0)
        };

        let modules_count = match update.modules {
            Some((_, total)) if total > 0 => {
                self.modules_estimate.store(total, Ordering::Relaxed);
                Some(total)
            }
            _ => self.modules_estimate(),
        };

        let event = ProgressEvent {
            value,
            text: update.message,
            modules_count,
            elapsed_ms: u64::try_from(self.start_time.elapsed().as_millis()).unwrap_or(u64::MAX),
        };

        if value >= 1.0 {
            debug!(
                elapsed_ms = event.elapsed_ms,
                modules = ?event.modules_count,
                "compile finished"
            );
        }

        // No receivers is fine.
        let _ = self.tx.send(event);
    }
}

async fn progress_socket(
    ws: WebSocketUpgrade,
    State(tx): State<broadcast::Sender<ProgressEvent>>,
) -> impl IntoResponse {
    let rx = tx.subscribe();
    ws.on_upgrade(move |socket| push_events(socket, rx, None))
}
