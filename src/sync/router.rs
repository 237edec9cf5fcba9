//! Topic routing table.

use std::collections::HashMap;
use std::fmt;

use tracing::{debug, trace, warn};

use super::codec::{self, Decoded, PayloadKind};
use super::error::SyncError;

/// Consumer of decoded values for one topic.
pub trait TopicHandler: Send + 'static {
    /// Decode rules the router applies before calling [`handle`](Self::handle)
    fn payload_kind(&self) -> PayloadKind;

    fn handle(&mut self, topic: &str, value: Decoded) -> Result<(), SyncError>;
}

/// What happened to one dispatched message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Decoded and accepted by the handler
    Handled,
    /// No handler registered for the topic
    Ignored,
    /// Payload failed to decode, state untouched
    Dropped,
    /// Handler rejected the decoded value
    Failed,
}

impl fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchOutcome::Handled => write!(f, "handled"),
            DispatchOutcome::Ignored => write!(f, "ignored"),
            DispatchOutcome::Dropped => write!(f, "dropped"),
            DispatchOutcome::Failed => write!(f, "failed"),
        }
    }
}

/// Running totals per outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub handled: u64,
    pub ignored: u64,
    pub dropped: u64,
    pub failed: u64,
}

impl RouterStats {
    fn record(&mut self, outcome: DispatchOutcome) {
        match outcome {
            DispatchOutcome::Handled => self.handled += 1,
            DispatchOutcome::Ignored => self.ignored += 1,
            DispatchOutcome::Dropped => self.dropped += 1,
            DispatchOutcome::Failed => self.failed += 1,
        }
    }
}

struct Route {
    kind: PayloadKind,
    handler: Box<dyn TopicHandler>,
}

/// Exact-match map from topic name to handler.
///
/// Dispatch never fails: unknown topics are ignored (a shared broker carries
/// traffic for other consumers) and undecodable payloads are logged and
/// dropped.
#[derive(Default)]
pub struct TopicRouter {
    routes: HashMap<String, Route>,
    stats: RouterStats,
}

impl TopicRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        topic: impl Into<String>,
        handler: Box<dyn TopicHandler>,
    ) -> Result<(), SyncError> {
        let topic = topic.into();
        if self.routes.contains_key(&topic) {
            return Err(SyncError::DuplicateTopic(topic));
        }

        let kind = handler.payload_kind();
        debug!("Registered {} ({:?})", topic, kind);
        self.routes.insert(topic, Route { kind, handler });
        Ok(())
    }

    pub fn dispatch(&mut self, topic: &str, payload: &[u8]) -> DispatchOutcome {
        let outcome = match self.routes.get_mut(topic) {
            None => {
                trace!("No route for {}, ignoring", topic);
                DispatchOutcome::Ignored
            }
            Some(route) => match codec::decode(&route.kind, payload) {
                Err(e) => {
                    warn!(
                        "Dropping payload on {}: {} ({} bytes)",
                        topic,
                        e,
                        payload.len()
                    );
                    DispatchOutcome::Dropped
                }
                Ok(value) => match route.handler.handle(topic, value) {
                    Ok(()) => DispatchOutcome::Handled,
                    Err(e) => {
                        warn!("Handler for {} failed: {}", topic, e);
                        DispatchOutcome::Failed
                    }
                },
            },
        };

        self.stats.record(outcome);
        outcome
    }

    /// Registered topics, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.routes.keys().cloned().collect();
        topics.sort();
        topics
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn stats(&self) -> RouterStats {
        self.stats
    }
}
