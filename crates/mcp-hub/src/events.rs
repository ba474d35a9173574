//! Registry lifecycle events: "a simple synchronous
//! subscription list. Handlers must not block. Failures in handlers are
//! logged but do not propagate."

use std::sync::Arc;

use mcp_core::ConnectionState;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub enum ServerEvent {
    ServerRegistered { name: String },
    ServerUnregistered { name: String },
    StateChanged { name: String, state: ConnectionState },
}

pub type EventHandler = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
    handlers: Mutex<Vec<EventHandler>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, handler: EventHandler) {
        self.handlers.lock().await.push(handler);
    }

    /// Invokes every handler in turn; a panicking handler is caught and
    /// logged so one bad subscriber can't take down the registry.
    pub async fn publish(&self, event: ServerEvent) {
        let handlers = self.handlers.lock().await.clone();
        for handler in handlers {
            let event = event.clone();
            if let Err(panic) =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(&event)))
            {
                tracing::error!("event handler panicked: {panic:?}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn all_subscribers_receive_events() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c1 = count.clone();
        bus.subscribe(Arc::new(move |_event| {
            c1.fetch_add(1, Ordering::SeqCst);
        }))
        .await;
        let c2 = count.clone();
        bus.subscribe(Arc::new(move |_event| {
            c2.fetch_add(1, Ordering::SeqCst);
        }))
        .await;

        bus.publish(ServerEvent::ServerRegistered { name: "db".into() })
            .await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn panicking_handler_does_not_stop_others() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe(Arc::new(|_event| panic!("boom"))).await;
        let c = count.clone();
        bus.subscribe(Arc::new(move |_event| {
            c.fetch_add(1, Ordering::SeqCst);
        }))
        .await;

        bus.publish(ServerEvent::ServerRegistered { name: "db".into() })
            .await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
