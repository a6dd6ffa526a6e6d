use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{json, Value};

use crate::analysis::{DeepResult, FastResult};

/// Notification delivered to the subscribers of a track
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisEvent {
    FastDone {
        track_id: String,
        result: Box<FastResult>,
    },
    DeepDone {
        track_id: String,
        result: Box<DeepResult>,
    },
    Error {
        track_id: String,
        message: String,
    },
}

impl AnalysisEvent {
    pub fn track_id(&self) -> &str {
        match self {
            Self::FastDone { track_id, .. } | Self::DeepDone { track_id, .. } | Self::Error { track_id, .. } => {
                track_id
            }
        }
    }

    /// Wire name of the event type
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FastDone { .. } => "FAST_DONE",
            Self::DeepDone { .. } => "DEEP_DONE",
            Self::Error { .. } => "ERROR",
        }
    }

    /// `{type, trackId, data}` envelope as delivered to UI listeners
    pub fn to_json(&self) -> Value {
        let data = match self {
            Self::FastDone { result, .. } => serde_json::to_value(result.as_ref()),
            Self::DeepDone { result, .. } => serde_json::to_value(result.as_ref()),
            Self::Error { message, .. } => Ok(json!({ "message": message })),
        }
        .unwrap_or(Value::Null);

        json!({
            "type": self.kind(),
            "trackId": self.track_id(),
            "data": data,
        })
    }
}

pub type EventHandler = Arc<dyn Fn(&AnalysisEvent) + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe later
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Per-track handler lists
#[derive(Default)]
pub(crate) struct Subscribers {
    next_id: AtomicU64,
    handlers: Mutex<HashMap<String, Vec<(SubscriptionId, EventHandler)>>>,
}

impl Subscribers {
    pub fn subscribe<F>(&self, track_id: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&AnalysisEvent) + Send + Sync + 'static,
    {
        let handler: EventHandler = Arc::new(handler);
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(track_id.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    pub fn unsubscribe(&self, track_id: &str, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(list) = handlers.get_mut(track_id) else {
            return false;
        };

        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(track_id);
        }
        removed
    }

    /// Call every handler registered for the event's track
    ///
    /// Handlers run outside the lock, so they may subscribe or unsubscribe.
    /// A panicking handler is logged and does not stop the others.
    pub fn notify(&self, event: &AnalysisEvent) -> usize {
        let handlers: Vec<EventHandler> = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event.track_id())
            .map(|list| list.iter().map(|(_, handler)| Arc::clone(handler)).collect())
            .unwrap_or_default();

        if handlers.is_empty() {
            tracing::debug!(track_id = %event.track_id(), kind = event.kind(), "No subscribers for event");
        }

        for handler in &handlers {
            if panic::catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                tracing::error!(track_id = %event.track_id(), kind = event.kind(), "Event handler panicked");
            }
        }
        handlers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AnalysisStatus;
    use std::sync::atomic::AtomicUsize;

    fn error_event(track_id: &str) -> AnalysisEvent {
        AnalysisEvent::Error {
            track_id: track_id.to_string(),
            message: "boom".to_string(),
        }
    }

    #[test]
    fn test_notify_only_reaches_track_subscribers() {
        let subscribers = Subscribers::default();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        subscribers.subscribe("a", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(subscribers.notify(&error_event("a")), 1);
        assert_eq!(subscribers.notify(&error_event("b")), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let subscribers = Subscribers::default();
        let first = subscribers.subscribe("a", |_| {});
        let second = subscribers.subscribe("a", |_| {});
        assert_ne!(first, second);

        assert!(subscribers.unsubscribe("a", first));
        assert!(!subscribers.unsubscribe("a", first));
        assert_eq!(subscribers.notify(&error_event("a")), 1);
        assert!(subscribers.unsubscribe("a", second));
        assert_eq!(subscribers.notify(&error_event("a")), 0);
    }

    #[test]
    fn test_panicking_handler_does_not_stop_others() {
        let subscribers = Subscribers::default();
        let hits = Arc::new(AtomicUsize::new(0));

        subscribers.subscribe("a", |_| panic!("handler failure"));
        let counter = Arc::clone(&hits);
        subscribers.subscribe("a", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        subscribers.notify(&error_event("a"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_json_envelope() {
        let event = AnalysisEvent::FastDone {
            track_id: "t1".to_string(),
            result: Box::new(FastResult::unanalyzed(5.0, AnalysisStatus::Fast)),
        };
        let json = event.to_json();
        assert_eq!(json["type"], "FAST_DONE");
        assert_eq!(json["trackId"], "t1");
        assert_eq!(json["data"]["status"], "fast");

        let json = error_event("t2").to_json();
        assert_eq!(json["type"], "ERROR");
        assert_eq!(json["data"]["message"], "boom");
    }
}
