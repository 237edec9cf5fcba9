//! Sync engine with statum state machine for message dispatch
//!
//! The engine owns the only receiving end of the bus inbox, so every write to
//! the store and every signal trigger happens on one task in arrival order.
//! Per-topic ordering follows from that; topics are also serialized against
//! each other.
//!
//! # State Machine
//!
//! ```text
//! Initializing ──► Configured ──► Active ──► Deactivating ──► Deactivated
//! ```
//!
//! Shutting down cancels every transient signal before the engine lets go of
//! the inbox, so no expiry fires into a consumer that is already gone.

use std::sync::Arc;

use statum::{machine, state};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::error::SyncError;
use super::router::{DispatchOutcome, RouterStats, TopicRouter};
use super::transient::TransientSignalTimer;
use crate::mqtt::message_manager::BusMessage;

/// States for sync engine lifecycle using statum
#[state]
#[derive(Debug, Clone)]
pub enum SyncEngineState {
    Initializing, // Inbox wired, no routes yet
    Configured,   // Router installed
    Active,       // Dispatching messages
    Deactivating, // Cancelling signals
    Deactivated,  // Stopped
}

#[machine]
pub struct SyncEngine<S: SyncEngineState> {
    inbound: mpsc::Receiver<BusMessage>,
    router: Option<TopicRouter>,
    signals: Arc<TransientSignalTimer>,
    name: String,
}

impl<S: SyncEngineState> SyncEngine<S> {
    pub fn stats(&self) -> RouterStats {
        self.router
            .as_ref()
            .map(TopicRouter::stats)
            .unwrap_or_default()
    }
}

impl SyncEngine<Initializing> {
    pub fn create(
        inbound: mpsc::Receiver<BusMessage>,
        signals: Arc<TransientSignalTimer>,
        name: String,
    ) -> Self {
        info!("Initializing sync engine: {}", name);
        Self::new(inbound, None, signals, name)
    }

    /// Install the routing table. An empty table is rejected; the engine
    /// would subscribe to nothing.
    pub fn configure(mut self, router: TopicRouter) -> Result<SyncEngine<Configured>, SyncError> {
        if router.is_empty() {
            error!("No topics configured for: {}", self.name);
            return Err(SyncError::InitializationError(
                "topic table is empty".to_string(),
            ));
        }

        debug!("Routing {:?}", router.topics());
        self.router = Some(router);
        info!("Engine configured: {}", self.name);
        Ok(self.transition())
    }
}

impl SyncEngine<Configured> {
    pub fn activate(self) -> SyncEngine<Active> {
        info!("Activating sync engine: {}", self.name);
        self.transition()
    }
}

impl SyncEngine<Active> {
    /// Route one message. Decode and handler errors are contained by the
    /// router; only a missing router is reported.
    pub fn process_message(&mut self, message: &BusMessage) -> Result<DispatchOutcome, SyncError> {
        let router = match &mut self.router {
            Some(router) => router,
            None => {
                return Err(SyncError::InitializationError(
                    "No router available".to_string(),
                ))
            }
        };

        let outcome = router.dispatch(&message.topic, &message.payload);
        debug!("{} -> {}", message, outcome);
        Ok(outcome)
    }

    /// Dispatch loop; ends on the shutdown signal or when every sender of the
    /// inbox has been dropped.
    pub async fn run_until_shutdown(
        mut self,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) -> Result<SyncEngine<Deactivating>, SyncError> {
        info!("Starting dispatch loop for: {}", self.name);

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Shutdown signal received for: {}", self.name);
                    break;
                }

                message = self.inbound.recv() => match message {
                    Some(message) => {
                        if let Err(e) = self.process_message(&message) {
                            error!("Error processing message: {}", e);
                        }
                    }
                    None => {
                        warn!("Inbox closed for: {}", self.name);
                        break;
                    }
                }
            }
        }

        info!("Transitioning to Deactivating state: {}", self.name);
        Ok(self.transition())
    }
}

impl SyncEngine<Deactivating> {
    pub fn shutdown(self) -> SyncEngine<Deactivated> {
        info!("Shutting down sync engine: {}", self.name);
        self.signals.cancel_all();

        let stats = self.stats();
        info!(
            "Engine stopped: {} (handled {}, ignored {}, dropped {}, failed {})",
            self.name, stats.handled, stats.ignored, stats.dropped, stats.failed
        );
        self.transition()
    }
}

/// Owns the dispatch task. The engine inbox is created here and its sender
/// handed to the bus adapter.
#[derive(Debug)]
pub struct SyncEngineHandle {
    pub name: String,

    task_handle: Option<JoinHandle<Result<(), SyncError>>>,

    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl SyncEngineHandle {
    pub fn new(name: String) -> Self {
        Self {
            name,
            task_handle: None,
            shutdown_tx: None,
        }
    }

    /// Open an inbox of `capacity` messages and start draining it through
    /// `router`. The returned sender is what the bus adapter publishes into.
    pub fn start(
        &mut self,
        router: TopicRouter,
        signals: Arc<TransientSignalTimer>,
        capacity: usize,
    ) -> Result<mpsc::Sender<BusMessage>, SyncError> {
        let (inbox, inbox_rx) = mpsc::channel(capacity.max(1));
        let engine = SyncEngine::create(inbox_rx, signals, self.name.clone())
            .configure(router)?
            .activate();

        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let drained = engine.run_until_shutdown(stop_rx).await?;
            drained.shutdown();
            Ok(())
        });

        self.shutdown_tx = Some(stop_tx);
        self.task_handle = Some(task);
        info!("{}: inbox open ({} slots)", self.name, capacity.max(1));
        Ok(inbox)
    }

    pub fn is_running(&self) -> bool {
        self.task_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop dispatching and wait until every signal has been cancelled.
    pub async fn shutdown(&mut self) -> Result<(), SyncError> {
        let Some(task) = self.task_handle.take() else {
            debug!("{}: no dispatch task to stop", self.name);
            return Ok(());
        };

        // The loop may already have ended because the bus adapter dropped
        // its sender.
        if let Some(stop) = self.shutdown_tx.take() {
            if stop.send(()).is_err() {
                debug!("{}: dispatch loop already left", self.name);
            }
        }

        let result = task.await.map_err(|e| {
            error!("{}: dispatch task aborted: {}", self.name, e);
            SyncError::ThreadError(format!("dispatch task for {} failed: {}", self.name, e))
        })?;
        info!("{}: dispatch task joined", self.name);
        result
    }
}
