//! Router capability the orchestrator mounts middleware on.
//!
//! Middleware is an `axum::Router` fragment mounted under a named slot.
//! [`PreviewRouter`] merges the fragments of every slot and dispatches
//! requests to the current merge, so routes attached after the server started
//! listening are served immediately. Attaching to an occupied slot replaces
//! the fragment that was there.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::Request;
use axum::response::Response;
use serde::Serialize;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast::{self, error::RecvError};
use tower::ServiceExt;
use tracing::{debug, warn};

/// Something middleware can be attached to.
pub trait Router: Send + Sync {
    /// Mount `middleware` under `slot`, replacing whatever `slot` held.
    fn attach(&self, slot: &'static str, middleware: axum::Router);
}

#[derive(Default)]
struct Mounted {
    slots: BTreeMap<&'static str, axum::Router>,
    merged: axum::Router,
}

/// Router that accepts attachments while it is already serving.
#[derive(Clone, Default)]
pub struct PreviewRouter {
    mounted: Arc<RwLock<Mounted>>,
}

impl PreviewRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The merged router as it is right now.
    #[must_use]
    pub fn snapshot(&self) -> axum::Router {
        self.mounted
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .merged
            .clone()
    }

    /// Number of occupied slots.
    #[must_use]
    pub fn attached(&self) -> usize {
        self.mounted
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .slots
            .len()
    }

    /// A service that routes each request through the latest snapshot.
    #[must_use]
    pub fn into_service(self) -> axum::Router {
        axum::Router::new().fallback(move |request: Request| {
            let routes = self.snapshot();
            async move {
                let response: Result<Response, Infallible> = routes.oneshot(request).await;
                match response {
                    Ok(response) => response,
                    Err(never) => match never {},
                }
            }
        })
    }
}

impl Router for PreviewRouter {
    fn attach(&self, slot: &'static str, middleware: axum::Router) {
        let mut mounted = self.mounted.write().unwrap_or_else(PoisonError::into_inner);
        let mut slots = mounted.slots.clone();
        if slots.insert(slot, middleware).is_some() {
            debug!(slot, "replacing mounted middleware");
        }

        match merge_slots(&slots) {
            Some(merged) => {
                mounted.slots = slots;
                mounted.merged = merged;
            }
            None => warn!(slot, "middleware overlaps another slot; keeping the previous routes"),
        }
    }
}

/// Merge every fragment, or `None` when two of them claim the same route.
fn merge_slots(slots: &BTreeMap<&'static str, axum::Router>) -> Option<axum::Router> {
    // axum reports overlapping routes by panicking inside `merge`.
    panic::catch_unwind(AssertUnwindSafe(|| {
        slots
            .values()
            .cloned()
            .fold(axum::Router::new(), |merged, fragment| merged.merge(fragment))
    }))
    .ok()
}

/// Forward events from `rx` to a websocket client as JSON text frames.
///
/// `initial` is sent first when present. The loop ends when the client goes
/// away or the channel closes; lagging clients skip the events they missed.
pub(crate) async fn push_events<T>(
    mut socket: WebSocket,
    mut rx: broadcast::Receiver<T>,
    initial: Option<T>,
) where
    T: Serialize + Clone,
{
    if let Some(event) = initial {
        if send_json(&mut socket, &event).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => {
                    if send_json(&mut socket, &event).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "push channel lagged");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

async fn send_json<T: Serialize>(socket: &mut WebSocket, event: &T) -> Result<(), axum::Error> {
    match serde_json::to_string(event) {
        Ok(json) => socket.send(Message::Text(json)).await,
        Err(e) => {
            debug!(error = %e, "dropping unserializable event");
            Ok(())
        }
    }
}
