// ── Event bus ──
//
// A single string slot. Publishing overwrites it; there is no queue and
// no history. Subscribers that are already listening see every value in
// order, late subscribers only see the current one.

use tokio::sync::watch;
use tracing::debug;

use crate::signal::{Observable, ObservableStream, Subscription};

/// Configuration was saved or reloaded.
pub const CONFIG_UPDATED: &str = "config-updated";
/// Some view asked for pending edits to be saved.
pub const SAVE_REQUESTED: &str = "save-requested";
/// The user asked for all polled data to be refreshed now.
pub const REFRESH_REQUESTED: &str = "refresh-requested";

#[derive(Clone, Default)]
pub struct EventBus {
    slot: Observable<String>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, event: impl Into<String>) {
        let event = event.into();
        debug!(event = %event, "event published");
        self.slot.set(event);
    }

    /// Publish a value derived from the current one. `f` runs under the
    /// bus lock and must not read the bus.
    pub fn update(&self, f: impl FnOnce(&str) -> String) {
        self.slot.update(|current| f(current));
    }

    /// Current value; empty until the first publish.
    pub fn current(&self) -> String {
        self.slot.get()
    }

    /// Callback with the current value, then every later publish.
    pub fn subscribe(&self, callback: impl Fn(&str) + Send + Sync + 'static) -> Subscription {
        self.slot.subscribe(move |event: &String| callback(event))
    }

    pub fn watch(&self) -> watch::Receiver<String> {
        self.slot.watch()
    }

    pub fn stream(&self) -> ObservableStream<String> {
        self.slot.stream()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("current", &self.current())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn collect(bus: &EventBus) -> (Arc<Mutex<Vec<String>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = bus.subscribe(move |e| sink.lock().unwrap().push(e.to_owned()));
        (seen, sub)
    }

    #[test]
    fn listeners_see_every_event_in_order() {
        let bus = EventBus::new();
        let (a, _sa) = collect(&bus);
        let (b, _sb) = collect(&bus);

        bus.publish(CONFIG_UPDATED);
        bus.publish(SAVE_REQUESTED);

        let expected = vec![String::new(), CONFIG_UPDATED.to_owned(), SAVE_REQUESTED.to_owned()];
        assert_eq!(*a.lock().unwrap(), expected);
        assert_eq!(*b.lock().unwrap(), expected);
    }

    #[test]
    fn late_subscriber_sees_only_latest() {
        let bus = EventBus::new();
        bus.publish(CONFIG_UPDATED);
        bus.publish(REFRESH_REQUESTED);

        let (seen, _sub) = collect(&bus);
        assert_eq!(*seen.lock().unwrap(), vec![REFRESH_REQUESTED.to_owned()]);
        assert_eq!(bus.current(), REFRESH_REQUESTED);
    }

    #[test]
    fn update_derives_from_current() {
        let bus = EventBus::new();
        bus.publish("a");
        bus.update(|current| format!("{current}b"));
        assert_eq!(bus.current(), "ab");
    }

    #[tokio::test]
    async fn watch_only_keeps_latest() {
        let bus = EventBus::new();
        let mut rx = bus.watch();
        bus.publish(CONFIG_UPDATED);
        bus.publish(SAVE_REQUESTED);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), SAVE_REQUESTED);
    }
}
