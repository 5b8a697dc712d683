//! Dev middleware over a compiler watch session.
//!
//! [`DevMiddleware`] owns the watch session. A background pump turns every
//! settled rebuild into the latest [`WatchState`] and a [`HotEvent`] for
//! connected clients. Emitted assets are served from the configured output
//! directory under the configured public path.

use crate::compiler::{CompilerError, WatchSession};
use crate::config::BundlerConfig;
use crate::router::{push_events, Router};
use crate::stats::{aggregate, SharedStats, Stats, StatsPreference};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tower_http::services::ServeDir;
use tracing::debug;

/// Websocket route publishing hot-update events.
pub const HOT_ROUTE: &str = "/__hmr";

/// Router slot holding the emitted assets.
pub const ASSETS_SLOT: &str = "assets";

const CHANNEL_CAPACITY: usize = 16;

/// Message sent to hot-update clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum HotEvent {
    /// A rebuild settled.
    Built {
        errors: Vec<String>,
        warnings: Vec<String>,
    },
    /// The watcher stopped; no further rebuilds will follow.
    Closed,
}

impl HotEvent {
    fn built(stats: &dyn Stats, preference: Option<&StatsPreference>) -> Self {
        let summary = aggregate(stats, preference);
        Self::Built {
            errors: summary.errors,
            warnings: summary.warnings,
        }
    }
}

/// What the watcher has produced so far.
#[derive(Debug, Clone)]
pub enum WatchState {
    /// No compile has settled yet.
    Pending,
    /// Result of the most recent compile.
    Valid(SharedStats),
    /// The session ended.
    Ended,
}

/// Dev server middleware backed by a running watch session.
pub struct DevMiddleware {
    session: Arc<dyn WatchSession>,
    latest: Arc<watch::Sender<WatchState>>,
    hot: broadcast::Sender<HotEvent>,
    pump: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    output_path: PathBuf,
    public_path: String,
    stats: Option<StatsPreference>,
}

impl fmt::Debug for DevMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DevMiddleware")
            .field("output_path", &self.output_path)
            .field("public_path", &self.public_path)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl DevMiddleware {
    /// Take over `session` and start following its rebuilds.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(session: Box<dyn WatchSession>, config: &BundlerConfig) -> Arc<Self> {
        let session: Arc<dyn WatchSession> = Arc::from(session);
        let (latest, _) = watch::channel(WatchState::Pending);
        let latest = Arc::new(latest);
        let (hot, _) = broadcast::channel(CHANNEL_CAPACITY);

        let pump = tokio::spawn(pump(
            Arc::clone(&session),
            Arc::clone(&latest),
            hot.clone(),
            config.stats.clone(),
        ));

        Arc::new(Self {
            session,
            latest,
            hot,
            pump: Mutex::new(Some(pump)),
            closed: AtomicBool::new(false),
            output_path: config.output.path.clone(),
            public_path: config.output.public_path.clone(),
            stats: config.stats.clone(),
        })
    }

    /// Wait until the first compile settles.
    ///
    /// Returns `None` if the session ends (or is closed) before that.
    pub async fn wait_until_valid(&self) -> Option<SharedStats> {
        let mut rx = self.latest.subscribe();
        let state = rx
            .wait_for(|state| !matches!(state, WatchState::Pending))
            .await
            .ok()?
            .clone();
        match state {
            WatchState::Valid(stats) => Some(stats),
            WatchState::Pending | WatchState::Ended => None,
        }
    }

    /// Current watch state.
    #[must_use]
    pub fn state(&self) -> WatchState {
        self.latest.borrow().clone()
    }

    /// Stop the watcher. Calling it again does nothing.
    pub async fn close(&self) -> Result<(), CompilerError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let pump = self
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(pump) = pump {
            pump.abort();
        }

        let result = self.session.close().await;
        self.latest.send_replace(WatchState::Ended);
        let _ = self.hot.send(HotEvent::Closed);
        debug!(closed = result.is_ok(), "dev middleware closed");
        result
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mount assets and hot updates on `router`, replacing an earlier
    /// middleware's routes.
    pub fn attach(&self, router: &dyn Router) {
        router.attach(ASSETS_SLOT, self.asset_routes());
        router.attach(HOT_ROUTE, self.hot_routes());
    }

    /// Routes serving emitted assets under the public path.
    #[must_use]
    pub fn asset_routes(&self) -> axum::Router {
        let serve = ServeDir::new(&self.output_path);
        match mount_prefix(&self.public_path) {
            Some(prefix) => axum::Router::new().nest_service(&prefix, serve),
            None => axum::Router::new().fallback_service(serve),
        }
    }

    /// Routes serving the hot-update channel.
    #[must_use]
    pub fn hot_routes(&self) -> axum::Router {
        let state = HotState {
            hot: self.hot.clone(),
            latest: self.latest.subscribe(),
            stats: self.stats.clone(),
        };
        axum::Router::new()
            .route(HOT_ROUTE, get(hot_socket))
            .with_state(state)
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<HotEvent> {
        self.hot.subscribe()
    }
}

/// Path to nest assets under, or `None` when they are served from the root.
fn mount_prefix(public_path: &str) -> Option<String> {
    if public_path.contains("://") {
        return None;
    }
    let trimmed = public_path.trim_matches('/');
    if trimmed.is_empty() {
        None
    } else {
        Some(format!("/{trimmed}"))
    }
}

async fn pump(
    session: Arc<dyn WatchSession>,
    latest: Arc<watch::Sender<WatchState>>,
    hot: broadcast::Sender<HotEvent>,
    preference: Option<StatsPreference>,
) {
    while let Some(stats) = session.next_stats().await {
        let event = HotEvent::built(stats.as_ref(), preference.as_ref());
        debug!(
            errors = stats.has_errors(),
            warnings = stats.has_warnings(),
            "rebuild settled"
        );
        latest.send_replace(WatchState::Valid(stats));
        let _ = hot.send(event);
    }
    latest.send_replace(WatchState::Ended);
    let _ = hot.send(HotEvent::Closed);
}

#[derive(Clone)]
struct HotState {
    hot: broadcast::Sender<HotEvent>,
    latest: watch::Receiver<WatchState>,
    stats: Option<StatsPreference>,
}

async fn hot_socket(ws: WebSocketUpgrade, State(state): State<HotState>) -> impl IntoResponse {
    let rx = state.hot.subscribe();
    let initial = match &*state.latest.borrow() {
        WatchState::Valid(stats) => Some(HotEvent::built(stats.as_ref(), state.stats.as_ref())),
        WatchState::Ended => Some(HotEvent::Closed),
        WatchState::Pending => None,
    };
    ws.on_upgrade(move |socket| push_events(socket, rx, initial))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::StaticStats;
    use axum::body::Body;
    use axum::http::StatusCode;
    use futures::future::BoxFuture;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    struct ChannelSession {
        rx: tokio::sync::Mutex<mpsc::Receiver<SharedStats>>,
        stop: CancellationToken,
        closes: Arc<AtomicUsize>,
    }

    impl WatchSession for ChannelSession {
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
                self.closes.fetch_add(1, Ordering::SeqCst);
                self.stop.cancel();
                Ok(())
            })
        }
    }

    fn session() -> (Box<dyn WatchSession>, mpsc::Sender<SharedStats>, Arc<AtomicUsize>) {
        let (tx, rx) = mpsc::channel(4);
        let closes = Arc::new(AtomicUsize::new(0));
        let session = ChannelSession {
            rx: tokio::sync::Mutex::new(rx),
            stop: CancellationToken::new(),
            closes: Arc::clone(&closes),
        };
        (Box::new(session), tx, closes)
    }

    async fn status_of(router: axum::Router, uri: &str) -> StatusCode {
        let request = axum::http::Request::builder()
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        router.oneshot(request).await.unwrap().status()
    }

    #[tokio::test]
    async fn test_wait_until_valid_returns_first_result() {
        let (session, tx, _) = session();
        let dev = DevMiddleware::new(session, &BundlerConfig::default());

        let stats = StaticStats::new(Vec::new(), vec!["w".into()]).into_shared();
        tx.send(Arc::clone(&stats)).await.unwrap();

        let settled = dev.wait_until_valid().await.unwrap();
        assert!(std::ptr::eq(
            Arc::as_ptr(&settled).cast::<()>(),
            Arc::as_ptr(&stats).cast::<()>()
        ));
    }

    #[tokio::test]
    async fn test_hot_event_follows_rebuilds() {
        let (session, tx, _) = session();
        let dev = DevMiddleware::new(session, &BundlerConfig::default());
        let mut events = dev.subscribe();

        tx.send(StaticStats::from_error("boom").into_shared())
            .await
            .unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            HotEvent::Built {
                errors: vec!["boom".to_string()],
                warnings: Vec::new(),
            }
        );
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (session, _tx, closes) = session();
        let dev = DevMiddleware::new(session, &BundlerConfig::default());

        dev.close().await.unwrap();
        dev.close().await.unwrap();

        assert!(dev.is_closed());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(matches!(dev.state(), WatchState::Ended));
    }

    #[tokio::test]
    async fn test_close_releases_waiters() {
        let (session, _tx, _) = session();
        let dev = DevMiddleware::new(session, &BundlerConfig::default());

        let waiter = {
            let dev = Arc::clone(&dev);
            tokio::spawn(async move { dev.wait_until_valid().await })
        };
        tokio::task::yield_now().await;
        dev.close().await.unwrap();

        assert!(waiter.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_assets_served_from_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<html></html>").unwrap();

        let mut config = BundlerConfig::default();
        config.output.path = dir.path().to_path_buf();
        let (session, _tx, _) = session();
        let dev = DevMiddleware::new(session, &config);

        assert_eq!(status_of(dev.asset_routes(), "/index.html").await, StatusCode::OK);
        dev.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_assets_served_under_public_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.js"), "export {}").unwrap();

        let mut config = BundlerConfig::default();
        config.output.path = dir.path().to_path_buf();
        config.output.public_path = "/assets/".to_string();
        let (session, _tx, _) = session();
        let dev = DevMiddleware::new(session, &config);

        assert_eq!(status_of(dev.asset_routes(), "/assets/main.js").await, StatusCode::OK);
        assert_eq!(status_of(dev.asset_routes(), "/main.js").await, StatusCode::NOT_FOUND);
        dev.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_reattach_replaces_previous_middleware() {
        let router = crate::router::PreviewRouter::new();
        let (first, _tx, _) = session();
        let first = DevMiddleware::new(first, &BundlerConfig::default());
        first.attach(&router);
        first.close().await.unwrap();

        let (second, _tx, _) = session();
        let second = DevMiddleware::new(second, &BundlerConfig::default());
        second.attach(&router);

        assert_eq!(router.attached(), 2);
        assert_ne!(status_of(router.snapshot(), HOT_ROUTE).await, StatusCode::NOT_FOUND);
        second.close().await.unwrap();
    }

    #[test]
    fn test_mount_prefix() {
        assert_eq!(mount_prefix("/"), None);
        assert_eq!(mount_prefix(""), None);
        assert_eq!(mount_prefix("assets/"), Some("/assets".to_string()));
        assert_eq!(mount_prefix("https://cdn.example.com/"), None);
    }

    #[test]
    fn test_hot_event_shape() {
        let json = serde_json::to_value(HotEvent::Closed).unwrap();
        assert_eq!(json["action"], "closed");
    }
}
