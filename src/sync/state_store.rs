//! Typed field storage with synchronous change notification.
//!
//! Every sensor or actuator attribute the dashboard shows lives in a [`Field`]
//! slot of the [`StateStore`]. Writes are last-write-wins and notify every
//! registered callback once the write lock has been released, so a callback
//! can read the store without deadlocking and never sees a half-applied write.
//!
//! ```text
//! router handler ──write──► StateStore ──Change──► ChangeFeed ──► callbacks
//!                                                     ▲
//! TransientSignalTimer ──────── expiry ───────────────┘
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::error::SyncError;
use super::history::{Sample, Series, TimeSeriesBuffer};
use super::transient::SignalChannel;

/// Temperature reported before the first reading arrives, in °C.
pub const DEFAULT_TEMPERATURE: f64 = 20.0;

/// A named slot in the state snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    DoorOpen,
    WindowOpen,
    MotionDetected,
    DoorMotion,
    WindowMotion,
    DoorCameraMotion,
    WindowCameraMotion,
    LightOn,
    SmokeDetected,
    Temperature,
    OutdoorTemperature,
}

impl Field {
    pub const ALL: [Field; 11] = [
        Field::DoorOpen,
        Field::WindowOpen,
        Field::MotionDetected,
        Field::DoorMotion,
        Field::WindowMotion,
        Field::DoorCameraMotion,
        Field::WindowCameraMotion,
        Field::LightOn,
        Field::SmokeDetected,
        Field::Temperature,
        Field::OutdoorTemperature,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Field::DoorOpen => "door_open",
            Field::WindowOpen => "window_open",
            Field::MotionDetected => "motion_detected",
            Field::DoorMotion => "door_motion",
            Field::WindowMotion => "window_motion",
            Field::DoorCameraMotion => "door_camera_motion",
            Field::WindowCameraMotion => "window_camera_motion",
            Field::LightOn => "light_on",
            Field::SmokeDetected => "smoke_detected",
            Field::Temperature => "temperature",
            Field::OutdoorTemperature => "outdoor_temperature",
        }
    }

    /// Declared value type of this field
    pub fn kind(self) -> ValueKind {
        match self {
            Field::Temperature | Field::OutdoorTemperature => ValueKind::Number,
            _ => ValueKind::Boolean,
        }
    }

    /// Value held before the first successful write
    pub fn default_value(self) -> FieldValue {
        match self.kind() {
            ValueKind::Boolean => FieldValue::Bool(false),
            ValueKind::Number => FieldValue::Number(DEFAULT_TEMPERATURE),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Boolean,
    Number,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Boolean => write!(f, "boolean"),
            ValueKind::Number => write!(f, "numeric"),
        }
    }
}

/// Current value of a field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Number(f64),
}

impl FieldValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            FieldValue::Bool(_) => ValueKind::Boolean,
            FieldValue::Number(_) => ValueKind::Number,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(value) => Some(*value),
            FieldValue::Number(_) => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(value) => Some(*value),
            FieldValue::Bool(_) => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool(value) => write!(f, "{value}"),
            FieldValue::Number(value) => write!(f, "{value}"),
        }
    }
}

/// Notification delivered to change listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// A field was written
    Field { field: Field, value: FieldValue },
    /// A transient signal was raised, extended or expired
    Signal { channel: SignalChannel, active: bool },
}

type Listener = Arc<dyn Fn(&Change) + Send + Sync>;

/// Registry of change callbacks shared by the store and the signal timer.
#[derive(Default)]
pub struct ChangeFeed {
    listeners: RwLock<Vec<(u64, Listener)>>,
    next_id: AtomicU64,
}

impl ChangeFeed {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a callback. It stays registered until the returned
    /// [`Subscription`] is dropped or explicitly unsubscribed.
    pub fn subscribe<F>(self: &Arc<Self>, callback: F) -> Subscription
    where
        F: Fn(&Change) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().push((id, Arc::new(callback)));
        debug!("Registered change listener {}", id);

        Subscription {
            id,
            feed: Arc::downgrade(self),
        }
    }

    /// Deliver a change to every listener registered at the time of the call.
    ///
    /// The listener list is copied out first; callbacks run without any lock
    /// held and may subscribe, unsubscribe or read the store.
    pub fn publish(&self, change: &Change) {
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        trace!("Publishing {:?} to {} listeners", change, listeners.len());
        for listener in listeners {
            listener(change);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Drop every registered listener.
    pub fn clear(&self) {
        let mut listeners = self.listeners.write();
        debug!("Clearing {} change listeners", listeners.len());
        listeners.clear();
    }

    fn remove(&self, id: u64) {
        self.listeners.write().retain(|(listener_id, _)| *listener_id != id);
        debug!("Removed change listener {}", id);
    }
}

/// Handle returned by [`StateStore::on_change`].
#[must_use = "dropping a Subscription unregisters its callback"]
pub struct Subscription {
    id: u64,
    feed: Weak<ChangeFeed>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(feed) = self.feed.upgrade() {
            feed.remove(self.id);
        }
    }
}

fn list_fields(fields: &HashMap<Field, FieldValue>) -> Vec<(Field, FieldValue)> {
    Field::ALL
        .into_iter()
        .map(|field| {
            let value = fields
                .get(&field)
                .copied()
                .unwrap_or_else(|| field.default_value());
            (field, value)
        })
        .collect()
}

/// Consistent copy of the store returned by [`StateStore::view`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoreView {
    pub fields: Vec<(Field, FieldValue)>,
    pub indoor: Vec<Sample>,
    pub outdoor: Vec<Sample>,
}

/// Current value of every tracked field plus the rolling temperature history.
pub struct StateStore {
    fields: RwLock<HashMap<Field, FieldValue>>,
    history: RwLock<HashMap<Series, TimeSeriesBuffer>>,
    feed: Arc<ChangeFeed>,
}

impl StateStore {
    pub fn new(history_capacity: usize) -> Self {
        Self::with_feed(ChangeFeed::new(), history_capacity)
    }

    pub fn with_feed(feed: Arc<ChangeFeed>, history_capacity: usize) -> Self {
        let history = Series::ALL
            .into_iter()
            .map(|series| (series, TimeSeriesBuffer::new(history_capacity)))
            .collect();

        Self {
            fields: RwLock::new(HashMap::new()),
            history: RwLock::new(history),
            feed,
        }
    }

    /// Current value of `field`, or its default if it was never written.
    pub fn read(&self, field: Field) -> FieldValue {
        self.fields
            .read()
            .get(&field)
            .copied()
            .unwrap_or_else(|| field.default_value())
    }

    pub fn read_bool(&self, field: Field) -> bool {
        self.read(field).as_bool().unwrap_or(false)
    }

    pub fn read_number(&self, field: Field) -> f64 {
        self.read(field).as_number().unwrap_or(DEFAULT_TEMPERATURE)
    }

    /// Replace the value of `field` and notify listeners.
    pub fn write(&self, field: Field, value: FieldValue) -> Result<(), SyncError> {
        if value.kind() != field.kind() {
            return Err(SyncError::FieldType {
                field,
                expected: field.kind(),
                actual: value.kind(),
            });
        }

        {
            let mut fields = self.fields.write();
            fields.insert(field, value);
        }
        debug!("{} = {}", field, value);

        self.feed.publish(&Change::Field { field, value });
        Ok(())
    }

    /// All fields read under a single lock acquisition.
    pub fn fields(&self) -> Vec<(Field, FieldValue)> {
        list_fields(&self.fields.read())
    }

    /// Write numeric fields and append their samples as one step, then
    /// notify. A [`view`](Self::view) sees either none or all of it.
    pub fn record(&self, readings: &[(Field, Series, Sample)]) -> Result<(), SyncError> {
        if let Some((field, _, _)) = readings
            .iter()
            .find(|(field, _, _)| field.kind() != ValueKind::Number)
        {
            return Err(SyncError::FieldType {
                field: *field,
                expected: field.kind(),
                actual: ValueKind::Number,
            });
        }

        {
            // Lock order: fields, then history.
            let mut fields = self.fields.write();
            let mut history = self.history.write();
            for (field, series, sample) in readings {
                fields.insert(*field, FieldValue::Number(sample.value));
                if let Some(buffer) = history.get_mut(series) {
                    buffer.push(*sample);
                }
            }
        }

        for (field, _, sample) in readings {
            let value = FieldValue::Number(sample.value);
            debug!("{} = {}", field, value);
            self.feed.publish(&Change::Field {
                field: *field,
                value,
            });
        }
        Ok(())
    }

    /// Fields and both histories under one pair of read guards.
    pub fn view(&self) -> StoreView {
        let fields = self.fields.read();
        let history = self.history.read();
        let samples = |series: Series| {
            history
                .get(&series)
                .map(TimeSeriesBuffer::snapshot)
                .unwrap_or_default()
        };

        StoreView {
            fields: list_fields(&fields),
            indoor: samples(Series::Indoor),
            outdoor: samples(Series::Outdoor),
        }
    }

    pub fn push_sample(&self, series: Series, sample: Sample) {
        if let Some(buffer) = self.history.write().get_mut(&series) {
            buffer.push(sample);
        }
    }

    /// Owned copy of the samples recorded for `series`, oldest first.
    pub fn history(&self, series: Series) -> Vec<Sample> {
        self.history
            .read()
            .get(&series)
            .map(TimeSeriesBuffer::snapshot)
            .unwrap_or_default()
    }

    pub fn on_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Change) + Send + Sync + 'static,
    {
        self.feed.subscribe(callback)
    }

    pub fn feed(&self) -> Arc<ChangeFeed> {
        Arc::clone(&self.feed)
    }
}
