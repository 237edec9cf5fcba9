//! Auto-expiring visibility flags with debounce/extend semantics.
//!
//! A trigger makes a channel visible immediately and arms a single-shot
//! expiry. Triggering again before the expiry fires cancels the pending timer
//! and arms a new one from the latest trigger, so a burst of camera frames
//! keeps the snapshot on screen until the burst has been quiet for the full
//! duration.
//!
//! # Concurrency
//!
//! The expiry task is a second writer next to the router. Each channel keeps
//! its flag, payload, deadline and timer handle in one slot behind its own
//! mutex, together with a generation counter:
//!
//! ```text
//! trigger:  lock ─► abort old timer ─► generation += 1 ─► set state ─► spawn timer(gen)
//! expiry:   sleep ─► lock ─► generation == gen ? clear : no-op
//! ```
//!
//! An expiry that has already woken up when a newer trigger lands sees a
//! different generation and leaves the channel alone.
//!
//! A channel counts as visible through the last millisecond of its window:
//! `is_active` holds while `now <= expires_at`, and the expiry task runs one
//! millisecond after the deadline.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use super::state_store::{Change, ChangeFeed};

/// How long a camera snapshot stays on screen after the last frame.
pub const DEFAULT_SIGNAL_DURATION: Duration = Duration::from_millis(5000);

const EXPIRY_DELAY: Duration = Duration::from_millis(1);

/// Logical transient signal channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalChannel {
    DoorCamera,
    WindowCamera,
}

impl SignalChannel {
    pub const ALL: [SignalChannel; 2] = [SignalChannel::DoorCamera, SignalChannel::WindowCamera];

    fn index(self) -> usize {
        match self {
            SignalChannel::DoorCamera => 0,
            SignalChannel::WindowCamera => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SignalChannel::DoorCamera => "door_camera",
            SignalChannel::WindowCamera => "window_camera",
        }
    }
}

impl fmt::Display for SignalChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Default)]
struct ChannelSlot {
    active: bool,
    expires_at: Option<Instant>,
    payload: Option<Bytes>,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

impl ChannelSlot {
    fn is_visible(&self, now: Instant) -> bool {
        self.active && self.expires_at.is_some_and(|deadline| now <= deadline)
    }

    /// Abort the pending expiry and bump the generation so an expiry that
    /// is already running becomes a no-op.
    fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.generation = self.generation.wrapping_add(1);
    }

    fn clear(&mut self) {
        self.active = false;
        self.expires_at = None;
        self.payload = None;
    }
}

/// Point-in-time view of one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalState {
    pub channel: SignalChannel,
    pub active: bool,
    pub payload: Option<Bytes>,
    pub remaining: Option<Duration>,
}

/// Per-channel transient signals sharing the store's change feed.
///
/// Triggering spawns the expiry on the current tokio runtime.
pub struct TransientSignalTimer {
    slots: [Arc<Mutex<ChannelSlot>>; 2],
    feed: Arc<ChangeFeed>,
}

impl TransientSignalTimer {
    pub fn new(feed: Arc<ChangeFeed>) -> Self {
        Self {
            slots: [
                Arc::new(Mutex::new(ChannelSlot::default())),
                Arc::new(Mutex::new(ChannelSlot::default())),
            ],
            feed,
        }
    }

    fn slot(&self, channel: SignalChannel) -> &Arc<Mutex<ChannelSlot>> {
        &self.slots[channel.index()]
    }

    /// Show `channel` with `payload` for `duration`, replacing any pending
    /// expiry.
    pub fn trigger(&self, channel: SignalChannel, payload: Bytes, duration: Duration) {
        let slot = self.slot(channel);
        let deadline = Instant::now() + duration;

        let extended = {
            let mut guard = slot.lock();
            let extended = guard.timer.is_some();
            guard.disarm();
            guard.active = true;
            guard.expires_at = Some(deadline);
            guard.payload = Some(payload);

            let timer = tokio::spawn(expire(
                Arc::clone(slot),
                Arc::clone(&self.feed),
                channel,
                guard.generation,
                deadline,
            ));
            guard.timer = Some(timer);
            extended
        };

        if extended {
            debug!("{} extended for {:?}", channel, duration);
        } else {
            debug!("{} raised for {:?}", channel, duration);
        }
        self.feed.publish(&Change::Signal {
            channel,
            active: true,
        });
    }

    pub fn is_active(&self, channel: SignalChannel) -> bool {
        self.slot(channel).lock().is_visible(Instant::now())
    }

    /// Payload of a visible channel.
    pub fn payload(&self, channel: SignalChannel) -> Option<Bytes> {
        let guard = self.slot(channel).lock();
        if guard.is_visible(Instant::now()) {
            guard.payload.clone()
        } else {
            None
        }
    }

    pub fn state(&self, channel: SignalChannel) -> SignalState {
        let now = Instant::now();
        let guard = self.slot(channel).lock();
        let active = guard.is_visible(now);

        SignalState {
            channel,
            active,
            payload: if active { guard.payload.clone() } else { None },
            remaining: if active {
                guard
                    .expires_at
                    .map(|deadline| deadline.saturating_duration_since(now))
            } else {
                None
            },
        }
    }

    /// Deactivate `channel` now and drop its pending expiry.
    pub fn cancel(&self, channel: SignalChannel) {
        let was_active = {
            let mut guard = self.slot(channel).lock();
            let was_active = guard.active;
            guard.disarm();
            guard.clear();
            was_active
        };

        if was_active {
            debug!("{} cancelled", channel);
            self.feed.publish(&Change::Signal {
                channel,
                active: false,
            });
        }
    }

    /// Cancel every channel; used on shutdown.
    pub fn cancel_all(&self) {
        info!("Cancelling all transient signals");
        for channel in SignalChannel::ALL {
            self.cancel(channel);
        }
    }

    /// Number of expiry timers that have not fired or been cancelled yet.
    pub fn pending_timers(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| {
                slot.lock()
                    .timer
                    .as_ref()
                    .is_some_and(|timer| !timer.is_finished())
            })
            .count()
    }
}

async fn expire(
    slot: Arc<Mutex<ChannelSlot>>,
    feed: Arc<ChangeFeed>,
    channel: SignalChannel,
    generation: u64,
    deadline: Instant,
) {
    tokio::time::sleep_until(deadline + EXPIRY_DELAY).await;

    let expired = {
        let mut guard = slot.lock();
        if guard.generation == generation {
            guard.clear();
            guard.timer = None;
            true
        } else {
            false
        }
    };

    if expired {
        debug!("{} expired", channel);
        feed.publish(&Change::Signal {
            channel,
            active: false,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    fn timer_with_log() -> (TransientSignalTimer, Arc<Mutex<Vec<Change>>>, crate::sync::Subscription) {
        let feed = ChangeFeed::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let subscription = feed.subscribe(move |change| sink.lock().push(change.clone()));
        (TransientSignalTimer::new(feed), log, subscription)
    }

    fn expiries(log: &Mutex<Vec<Change>>) -> usize {
        log.lock()
            .iter()
            .filter(|change| matches!(change, Change::Signal { active: false, .. }))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn retrigger_extends_instead_of_stacking() {
        let (timer, log, _subscription) = timer_with_log();
        let channel = SignalChannel::DoorCamera;

        timer.trigger(channel, Bytes::from_static(b"frame-1"), DEFAULT_SIGNAL_DURATION);
        advance(Duration::from_millis(2000)).await;
        settle().await;
        assert!(timer.is_active(channel));

        timer.trigger(channel, Bytes::from_static(b"frame-2"), DEFAULT_SIGNAL_DURATION);

        // The first trigger's deadline (t=5000) passes without effect.
        advance(Duration::from_millis(3500)).await;
        settle().await;
        assert!(timer.is_active(channel));
        assert_eq!(expiries(&log), 0);

        // t=7000: still visible.
        advance(Duration::from_millis(1500)).await;
        settle().await;
        assert!(timer.is_active(channel));
        assert_eq!(timer.payload(channel), Some(Bytes::from_static(b"frame-2")));

        // t=7001: gone, exactly one expiry notification.
        advance(Duration::from_millis(1)).await;
        settle().await;
        assert!(!timer.is_active(channel));
        assert_eq!(timer.payload(channel), None);
        assert_eq!(expiries(&log), 1);
        assert_eq!(timer.pending_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_from_an_older_trigger_is_a_no_op() {
        let (timer, log, _subscription) = timer_with_log();
        let channel = SignalChannel::DoorCamera;

        timer.trigger(channel, Bytes::from_static(b"frame-1"), DEFAULT_SIGNAL_DURATION);
        let first_generation = timer.slot(channel).lock().generation;
        timer.trigger(channel, Bytes::from_static(b"frame-2"), DEFAULT_SIGNAL_DURATION);

        // Run the first trigger's expiry to completion as if it had woken up
        // before the second trigger aborted it.
        expire(
            Arc::clone(timer.slot(channel)),
            Arc::clone(&timer.feed),
            channel,
            first_generation,
            Instant::now(),
        )
        .await;

        assert!(timer.is_active(channel));
        assert_eq!(timer.payload(channel), Some(Bytes::from_static(b"frame-2")));
        assert_eq!(timer.pending_timers(), 1);
        assert_eq!(expiries(&log), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn single_trigger_expires_after_duration() {
        let (timer, log, _subscription) = timer_with_log();
        let channel = SignalChannel::WindowCamera;

        timer.trigger(channel, Bytes::from_static(b"img"), Duration::from_millis(500));
        assert!(timer.is_active(channel));
        assert_eq!(timer.pending_timers(), 1);

        advance(Duration::from_millis(501)).await;
        settle().await;

        assert!(!timer.is_active(channel));
        assert_eq!(timer.pending_timers(), 0);
        assert_eq!(
            log.lock().last(),
            Some(&Change::Signal {
                channel,
                active: false
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn channels_are_independent() {
        let (timer, _log, _subscription) = timer_with_log();

        timer.trigger(SignalChannel::DoorCamera, Bytes::new(), Duration::from_millis(1000));
        advance(Duration::from_millis(600)).await;
        timer.trigger(SignalChannel::WindowCamera, Bytes::new(), Duration::from_millis(1000));

        advance(Duration::from_millis(500)).await;
        settle().await;
        assert!(!timer.is_active(SignalChannel::DoorCamera));
        assert!(timer.is_active(SignalChannel::WindowCamera));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_clears_immediately_and_disarms() {
        let (timer, log, _subscription) = timer_with_log();
        let channel = SignalChannel::DoorCamera;

        timer.trigger(channel, Bytes::from_static(b"img"), DEFAULT_SIGNAL_DURATION);
        timer.cancel(channel);

        assert!(!timer.is_active(channel));
        assert_eq!(timer.payload(channel), None);
        assert_eq!(timer.pending_timers(), 0);
        assert_eq!(expiries(&log), 1);

        // The aborted timer must not fire a second notification later.
        advance(Duration::from_millis(6000)).await;
        settle().await;
        assert_eq!(expiries(&log), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_stops_every_channel() {
        let (timer, _log, _subscription) = timer_with_log();
        for channel in SignalChannel::ALL {
            timer.trigger(channel, Bytes::new(), DEFAULT_SIGNAL_DURATION);
        }
        assert_eq!(timer.pending_timers(), 2);

        timer.cancel_all();
        assert_eq!(timer.pending_timers(), 0);
        assert!(SignalChannel::ALL.iter().all(|c| !timer.is_active(*c)));
    }

    #[tokio::test(start_paused = true)]
    async fn state_reports_remaining_time() {
        let (timer, _log, _subscription) = timer_with_log();
        let channel = SignalChannel::DoorCamera;

        timer.trigger(channel, Bytes::from_static(b"img"), Duration::from_millis(5000));
        advance(Duration::from_millis(1200)).await;

        let state = timer.state(channel);
        assert!(state.active);
        assert_eq!(state.remaining, Some(Duration::from_millis(3800)));
        assert_eq!(state.payload, Some(Bytes::from_static(b"img")));
    }
}
