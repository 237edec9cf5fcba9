//! # Live state synchronization
//!
//! Turns bus messages into a consistent in-memory view of the home.
//!
//! ```text
//! BusMessage ──► SyncEngine ──► TopicRouter ──decode──► handler
//!                                                          │
//!               ┌──────────────────────┬───────────────────┤
//!               ▼                      ▼                   ▼
//!         StateStore.write     TimeSeriesBuffer.push   TransientSignalTimer.trigger
//!               │                                          │
//!               └──────────────► ChangeFeed ◄──────────────┘
//! ```
//!
//! [`SyncCore`] owns the shared pieces and builds routers from the topic
//! table; the [`engine`] runs one of those routers against the bus inbox.

pub mod codec;
pub mod engine;
pub mod error;
pub mod history;
pub mod router;
pub mod snapshot;
pub mod state_store;
pub mod topics;
pub mod transient;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::AppConfig;

pub use engine::{SyncEngine, SyncEngineHandle};
pub use error::{DecodeError, SyncError};
pub use history::{Sample, Series, TimeSeriesBuffer};
pub use router::{DispatchOutcome, TopicHandler, TopicRouter};
pub use snapshot::DashboardSnapshot;
pub use state_store::{Change, ChangeFeed, Field, FieldValue, StateStore, Subscription};
pub use topics::TopicBinding;
pub use transient::{SignalChannel, TransientSignalTimer};

/// Store, signals and topic table for one session.
pub struct SyncCore {
    store: Arc<StateStore>,
    signals: Arc<TransientSignalTimer>,
    bindings: Vec<TopicBinding>,
    signal_duration: Duration,
}

impl SyncCore {
    pub fn new(
        bindings: Vec<TopicBinding>,
        history_capacity: usize,
        signal_duration: Duration,
    ) -> Self {
        let feed = ChangeFeed::new();
        let store = Arc::new(StateStore::with_feed(Arc::clone(&feed), history_capacity));
        let signals = Arc::new(TransientSignalTimer::new(feed));

        Self {
            store,
            signals,
            bindings,
            signal_duration,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.topic_table(),
            config.history.capacity,
            config.signal_duration(),
        )
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn signals(&self) -> &Arc<TransientSignalTimer> {
        &self.signals
    }

    /// Fresh router over the shared store and signals.
    pub fn router(&self) -> Result<TopicRouter, SyncError> {
        topics::build_router(
            &self.bindings,
            &self.store,
            &self.signals,
            self.signal_duration,
        )
    }

    /// Topics the bus adapter has to subscribe to.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.bindings.iter().map(|b| b.topic.clone()).collect();
        topics.sort();
        topics.dedup();
        topics
    }

    pub fn on_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Change) + Send + Sync + 'static,
    {
        self.store.on_change(callback)
    }

    pub fn snapshot(&self) -> DashboardSnapshot {
        DashboardSnapshot::capture(&self.store, &self.signals)
    }

    /// Cancel pending expiries, then drop every listener.
    pub fn shutdown(&self) {
        self.signals.cancel_all();
        self.store.feed().clear();
        info!("Sync core shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[tokio::test(start_paused = true)]
    async fn core_routes_and_shuts_down_cleanly() {
        let core = SyncCore::from_config(&AppConfig::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _subscription = core.on_change(move |change| sink.lock().push(change.clone()));

        let mut router = core.router().unwrap();
        assert_eq!(core.topics(), router.topics());

        router.dispatch(topics::TOPIC_SMOKE, br#"{"smoke_detected": true}"#);
        router.dispatch(topics::TOPIC_DOOR_CAMERA_IMAGE, br#"{"image": "aGVsbG8="}"#);
        assert!(core.store().read_bool(Field::SmokeDetected));
        assert!(core.signals().is_active(SignalChannel::DoorCamera));
        assert_eq!(seen.lock().len(), 2);

        core.shutdown();

        assert!(!core.signals().is_active(SignalChannel::DoorCamera));
        assert_eq!(core.signals().pending_timers(), 0);
        assert_eq!(core.store().feed().listener_count(), 0);
    }
}
