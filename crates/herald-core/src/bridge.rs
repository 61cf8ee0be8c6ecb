//! Plugin boundary.
//!
//! The [`PluginBridge`] is the only thing outside collaborators talk to. Its
//! methods are split into two traits by caller:
//!
//! | Trait | Caller | Methods |
//! |---|---|---|
//! | [`PushReceiver`] | transport layer | `on_push`, `on_raw_push` |
//! | [`UiBinding`] | UI binding layer | `on_listener_attached`, `on_listener_detached`, `on_launched_from_click`, `on_launched_from_click_raw` |
//! | (direct methods) | host app | `register_background_handlers`, `resume` |
//!
//! # Architecture
//!
//! ```text
//! Transport ──▶ Arc<dyn PushReceiver>
//!                     ↕ (implemented by PluginBridge)
//! UI layer  ──▶ Arc<dyn UiBinding>
//!                     ↕
//! Host app  ──▶ Arc<PluginBridge> ──▶ NotificationRouter
//! ```
//!
//! Nothing here returns an error to the transport: bad input is logged and
//! dropped, and the returned [`Route`] is informational only.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::callback::CallbackHandles;
use crate::error::ContextResult;
use crate::listener::{ListenerSink, ListenerToken};
use crate::payload::NotificationPayload;
use crate::router::{NotificationRouter, Route};

/// Entry point for the transport layer, called once per received push.
#[async_trait]
pub trait PushReceiver: Send + Sync {
    /// Accepts one parsed payload.
    async fn on_push(&self, payload: NotificationPayload) -> Route;

    /// Accepts one payload as raw JSON bytes.
    ///
    /// Anything that is not a JSON object is logged and dropped.
    async fn on_raw_push(&self, data: &[u8]) -> Route {
        match NotificationPayload::from_slice(data) {
            Ok(payload) => self.on_push(payload).await,
            Err(e) => {
                warn!(error = %e, len = data.len(), "Discarding malformed push payload");
                Route::Dropped
            }
        }
    }
}

/// Entry point for the UI binding layer.
#[async_trait]
pub trait UiBinding: Send + Sync {
    /// A UI event subscriber became live.
    async fn on_listener_attached(&self, sink: Arc<dyn ListenerSink>) -> ListenerToken;

    /// The subscriber identified by `token` went away.
    fn on_listener_detached(&self, token: ListenerToken) -> bool;

    /// The app was launched by tapping a notification.
    async fn on_launched_from_click(&self, payload: NotificationPayload) -> Route;

    /// Like [`on_launched_from_click`](Self::on_launched_from_click) for a
    /// stringified payload. Empty or unparseable input is ignored.
    async fn on_launched_from_click_raw(&self, data: &str) -> Option<Route> {
        if data.trim().is_empty() {
            return None;
        }
        match NotificationPayload::from_json_str(data) {
            Ok(payload) => Some(self.on_launched_from_click(payload).await),
            Err(e) => {
                warn!(error = %e, "Ignoring unparseable click payload");
                None
            }
        }
    }
}

// =============================================================================
// Plugin Bridge
// =============================================================================

/// Adapter from outside collaborators onto a [`NotificationRouter`].
#[derive(Debug, Clone)]
pub struct PluginBridge {
    router: Arc<NotificationRouter>,
}

impl PluginBridge {
    pub fn new(router: Arc<NotificationRouter>) -> Self {
        Self { router }
    }

    pub fn router(&self) -> &Arc<NotificationRouter> {
        &self.router
    }

    /// Registers the background entry point and handler, starting the
    /// background context if it is not running yet.
    pub fn register_background_handlers(&self, handles: CallbackHandles) -> ContextResult<()> {
        info!(entry = %handles.entry, handler = %handles.handler, "Registering background handlers");
        self.router.register_background_handlers(handles)
    }

    /// Starts the background context from previously persisted handles.
    pub fn resume(&self) -> ContextResult<()> {
        self.router.resume()
    }
}

// =============================================================================
// PushReceiver impl — called by transport layer
// =============================================================================

#[async_trait]
impl PushReceiver for PluginBridge {
    async fn on_push(&self, payload: NotificationPayload) -> Route {
        debug!(fields = payload.len(), "Push received");
        self.router.deliver(payload).await
    }
}

// =============================================================================
// UiBinding impl — called by UI binding layer
// =============================================================================

#[async_trait]
impl UiBinding for PluginBridge {
    async fn on_listener_attached(&self, sink: Arc<dyn ListenerSink>) -> ListenerToken {
        self.router.attach_listener(&sink).await
    }

    fn on_listener_detached(&self, token: ListenerToken) -> bool {
        self.router.detach_listener(token)
    }

    async fn on_launched_from_click(&self, payload: NotificationPayload) -> Route {
        debug!(fields = payload.len(), "App launched from notification click");
        self.router.on_notification_click(payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::CallbackRegistry;
    use crate::listener::ChannelSink;
    use crate::payload::CLICKED_KEY;
    use crate::store::MemoryStore;
    use serde_json::Value;

    fn bridge() -> PluginBridge {
        let router = NotificationRouter::from_store(MemoryStore::shared(), CallbackRegistry::new());
        PluginBridge::new(Arc::new(router))
    }

    #[tokio::test]
    async fn test_raw_push_is_parsed_and_routed() {
        let bridge = bridge();
        let route = bridge.on_raw_push(br#"{"message":"hi"}"#).await;

        assert_eq!(route, Route::Queued);
        let queued = bridge.router().queue().peek().unwrap();
        assert_eq!(queued[0].message(), Some("hi"));
    }

    #[tokio::test]
    async fn test_malformed_raw_push_is_dropped() {
        let bridge = bridge();

        assert_eq!(bridge.on_raw_push(b"not json").await, Route::Dropped);
        assert_eq!(bridge.on_raw_push(b"\"just a string\"").await, Route::Dropped);
        assert!(bridge.router().queue().is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_raw_click_handling() {
        let bridge = bridge();

        assert_eq!(bridge.on_launched_from_click_raw("").await, None);
        assert_eq!(bridge.on_launched_from_click_raw("{broken").await, None);
        assert!(!bridge.router().has_pending_click());

        let route = bridge
            .on_launched_from_click_raw(r#"{"message":"open"}"#)
            .await;
        assert_eq!(route, Some(Route::Deferred));

        let (sink, mut events) = ChannelSink::pair();
        bridge.on_listener_attached(sink.clone()).await;
        let event: Value = serde_json::from_str(&events.try_recv().unwrap()).unwrap();
        assert_eq!(event["message"], "open");
        assert_eq!(event[CLICKED_KEY], true);
    }

    #[tokio::test]
    async fn test_click_from_pairs() {
        let bridge = bridge();
        let (sink, mut events) = ChannelSink::pair();
        let token = bridge.on_listener_attached(sink.clone()).await;

        let payload = NotificationPayload::from_pairs([("message", "extras")]);
        assert_eq!(bridge.on_launched_from_click(payload).await, Route::Listener);
        assert!(events.try_recv().is_ok());

        assert!(bridge.on_listener_detached(token));
        assert!(!bridge.on_listener_detached(token));
    }
}
