//! Topic table and the handlers it builds.
//!
//! The table is data: each [`TopicBinding`] names a topic and what to do
//! with its payload. [`build_router`] turns the table into a [`TopicRouter`]
//! wired to one [`StateStore`] and one [`TransientSignalTimer`].

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::codec::{Decoded, PayloadKind};
use super::error::SyncError;
use super::history::{Sample, Series};
use super::router::{TopicHandler, TopicRouter};
use super::state_store::{Field, FieldValue, StateStore, ValueKind};
use super::transient::{SignalChannel, TransientSignalTimer};

pub const TOPIC_MOTION: &str = "home/security/motion";
pub const TOPIC_DOOR_MOTION: &str = "home/security/door/motion";
pub const TOPIC_WINDOW_MOTION: &str = "home/security/window/motion";
pub const TOPIC_DOOR: &str = "home/security/door";
pub const TOPIC_WINDOW: &str = "home/security/window";
pub const TOPIC_TEMPERATURE: &str = "home/sensors/temperature";
pub const TOPIC_DOOR_CAMERA_IMAGE: &str = "home/camera/door/image";
pub const TOPIC_DOOR_CAMERA_MOTION: &str = "home/camera/door/motion";
pub const TOPIC_WINDOW_CAMERA_IMAGE: &str = "home/camera/window/image";
pub const TOPIC_WINDOW_CAMERA_MOTION: &str = "home/camera/window/motion";
pub const TOPIC_LIGHT: &str = "home/security/light";
pub const TOPIC_SMOKE: &str = "home/security/smoke";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicAction {
    /// Write a boolean to every field in `fields`
    Flag,
    /// Write the temperature fields and record samples
    Temperature,
    /// Raise the transient signal in `channel`
    Camera,
}

/// One row of the topic table.
///
/// ```toml
/// [[topics]]
/// topic = "home/security/door"
/// action = "flag"
/// key = "door_open"
/// fields = ["door_open"]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicBinding {
    pub topic: String,
    pub action: TopicAction,
    /// JSON key holding the flag; defaults to the first field's name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<Field>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<SignalChannel>,
}

impl TopicBinding {
    pub fn flag(topic: &str, key: &str, fields: &[Field]) -> Self {
        Self {
            topic: topic.to_string(),
            action: TopicAction::Flag,
            key: Some(key.to_string()),
            fields: fields.to_vec(),
            channel: None,
        }
    }

    pub fn temperature(topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            action: TopicAction::Temperature,
            key: None,
            fields: Vec::new(),
            channel: None,
        }
    }

    pub fn camera(topic: &str, channel: SignalChannel) -> Self {
        Self {
            topic: topic.to_string(),
            action: TopicAction::Camera,
            key: None,
            fields: Vec::new(),
            channel: Some(channel),
        }
    }
}

/// Built-in table used when the configuration does not list topics.
///
/// With `mirror_door_from_motion` the motion topics also drive the matching
/// door/window field, as some dashboard deployments expect.
pub fn default_topic_table(mirror_door_from_motion: bool) -> Vec<TopicBinding> {
    let mirrored = |own: Field, mirror: Field| -> Vec<Field> {
        if mirror_door_from_motion {
            vec![own, mirror]
        } else {
            vec![own]
        }
    };

    vec![
        TopicBinding::flag(
            TOPIC_MOTION,
            "motion_detected",
            &mirrored(Field::MotionDetected, Field::DoorOpen),
        ),
        TopicBinding::flag(
            TOPIC_DOOR_MOTION,
            "motion_detected",
            &mirrored(Field::DoorMotion, Field::DoorOpen),
        ),
        TopicBinding::flag(
            TOPIC_WINDOW_MOTION,
            "motion_detected",
            &mirrored(Field::WindowMotion, Field::WindowOpen),
        ),
        TopicBinding::flag(TOPIC_DOOR, "door_open", &[Field::DoorOpen]),
        TopicBinding::flag(TOPIC_WINDOW, "window_open", &[Field::WindowOpen]),
        TopicBinding::temperature(TOPIC_TEMPERATURE),
        TopicBinding::camera(TOPIC_DOOR_CAMERA_IMAGE, SignalChannel::DoorCamera),
        TopicBinding::camera(TOPIC_WINDOW_CAMERA_IMAGE, SignalChannel::WindowCamera),
        TopicBinding::flag(
            TOPIC_DOOR_CAMERA_MOTION,
            "motion_detected",
            &[Field::DoorCameraMotion],
        ),
        TopicBinding::flag(
            TOPIC_WINDOW_CAMERA_MOTION,
            "motion_detected",
            &[Field::WindowCameraMotion],
        ),
        TopicBinding::flag(TOPIC_LIGHT, "light_on", &[Field::LightOn]),
        TopicBinding::flag(TOPIC_SMOKE, "smoke_detected", &[Field::SmokeDetected]),
    ]
}

/// Writes one decoded boolean to a set of fields.
pub struct FlagHandler {
    store: Arc<StateStore>,
    key: String,
    fields: Vec<Field>,
}

impl TopicHandler for FlagHandler {
    fn payload_kind(&self) -> PayloadKind {
        PayloadKind::flag(self.key.clone())
    }

    fn handle(&mut self, topic: &str, value: Decoded) -> Result<(), SyncError> {
        let flag = match value {
            Decoded::Flag(flag) => flag,
            other => {
                return Err(SyncError::HandlerMismatch {
                    topic: topic.to_string(),
                    reason: format!("expected a flag, got {other:?}"),
                })
            }
        };

        for field in &self.fields {
            self.store.write(*field, FieldValue::Bool(flag))?;
        }
        Ok(())
    }
}

/// Updates the temperature fields and appends to the rolling histories.
pub struct TemperatureHandler {
    store: Arc<StateStore>,
}

impl TopicHandler for TemperatureHandler {
    fn payload_kind(&self) -> PayloadKind {
        PayloadKind::Temperature
    }

    fn handle(&mut self, topic: &str, value: Decoded) -> Result<(), SyncError> {
        let (indoor, outdoor) = match value {
            Decoded::Temperature { indoor, outdoor } => (indoor, outdoor),
            other => {
                return Err(SyncError::HandlerMismatch {
                    topic: topic.to_string(),
                    reason: format!("expected a temperature, got {other:?}"),
                })
            }
        };

        let reading = Sample::now(indoor);
        let mut readings = vec![(Field::Temperature, Series::Indoor, reading)];
        if let Some(outdoor) = outdoor {
            readings.push((
                Field::OutdoorTemperature,
                Series::Outdoor,
                Sample::new(reading.timestamp, outdoor),
            ));
        }
        self.store.record(&readings)?;
        Ok(())
    }
}

/// Shows the latest camera frame for a fixed duration.
pub struct CameraHandler {
    signals: Arc<TransientSignalTimer>,
    channel: SignalChannel,
    duration: Duration,
}

impl TopicHandler for CameraHandler {
    fn payload_kind(&self) -> PayloadKind {
        PayloadKind::Image
    }

    fn handle(&mut self, topic: &str, value: Decoded) -> Result<(), SyncError> {
        let image = match value {
            Decoded::Image(image) => image,
            other => {
                return Err(SyncError::HandlerMismatch {
                    topic: topic.to_string(),
                    reason: format!("expected an image, got {other:?}"),
                })
            }
        };

        self.signals.trigger(self.channel, image, self.duration);
        Ok(())
    }
}

fn handler_for(
    binding: &TopicBinding,
    store: &Arc<StateStore>,
    signals: &Arc<TransientSignalTimer>,
    signal_duration: Duration,
) -> Result<Box<dyn TopicHandler>, SyncError> {
    let invalid = |reason: &str| {
        SyncError::InitializationError(format!("topic {}: {}", binding.topic, reason))
    };

    match binding.action {
        TopicAction::Flag => {
            let Some(first) = binding.fields.first() else {
                return Err(invalid("flag binding needs at least one field"));
            };
            if let Some(field) = binding
                .fields
                .iter()
                .find(|field| field.kind() != ValueKind::Boolean)
            {
                return Err(invalid(&format!("{field} is not a boolean field")));
            }

            let key = binding
                .key
                .clone()
                .unwrap_or_else(|| first.name().to_string());
            Ok(Box::new(FlagHandler {
                store: Arc::clone(store),
                key,
                fields: binding.fields.clone(),
            }))
        }
        TopicAction::Temperature => Ok(Box::new(TemperatureHandler {
            store: Arc::clone(store),
        })),
        TopicAction::Camera => {
            let channel = binding
                .channel
                .ok_or_else(|| invalid("camera binding needs a channel"))?;
            Ok(Box::new(CameraHandler {
                signals: Arc::clone(signals),
                channel,
                duration: signal_duration,
            }))
        }
    }
}

/// Build a router with one handler per binding.
pub fn build_router(
    bindings: &[TopicBinding],
    store: &Arc<StateStore>,
    signals: &Arc<TransientSignalTimer>,
    signal_duration: Duration,
) -> Result<TopicRouter, SyncError> {
    let mut router = TopicRouter::new();
    for binding in bindings {
        let handler = handler_for(binding, store, signals, signal_duration)?;
        router.register(binding.topic.clone(), handler)?;
    }

    info!("Topic router ready with {} topics", router.len());
    Ok(router)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::router::DispatchOutcome;
    use crate::sync::state_store::ChangeFeed;
    use crate::sync::transient::DEFAULT_SIGNAL_DURATION;
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    struct Fixture {
        store: Arc<StateStore>,
        signals: Arc<TransientSignalTimer>,
        router: TopicRouter,
    }

    fn fixture(mirror: bool) -> Fixture {
        let feed = ChangeFeed::new();
        let store = Arc::new(StateStore::with_feed(Arc::clone(&feed), 10));
        let signals = Arc::new(TransientSignalTimer::new(feed));
        let router = build_router(
            &default_topic_table(mirror),
            &store,
            &signals,
            DEFAULT_SIGNAL_DURATION,
        )
        .unwrap();
        Fixture {
            store,
            signals,
            router,
        }
    }

    #[test]
    fn temperature_updates_field_and_history_once() {
        let mut fx = fixture(false);

        let outcome = fx
            .router
            .dispatch(TOPIC_TEMPERATURE, br#"{"temperature": 21.5}"#);

        assert_eq!(outcome, DispatchOutcome::Handled);
        assert_eq!(fx.store.read_number(Field::Temperature), 21.5);
        let history = fx.store.history(Series::Indoor);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].value, 21.5);
        assert!(fx.store.history(Series::Outdoor).is_empty());
    }

    #[test]
    fn indoor_outdoor_payload_fills_both_series() {
        let mut fx = fixture(false);

        fx.router
            .dispatch(TOPIC_TEMPERATURE, br#"{"indoor": 23.0, "outdoor": 4.5}"#);

        assert_eq!(fx.store.read_number(Field::Temperature), 23.0);
        assert_eq!(fx.store.read_number(Field::OutdoorTemperature), 4.5);
        assert_eq!(fx.store.history(Series::Outdoor)[0].value, 4.5);
    }

    #[test]
    fn history_holds_last_ten_readings() {
        let mut fx = fixture(false);
        for i in 0..14 {
            let payload = format!(r#"{{"temperature": {i}}}"#);
            fx.router.dispatch(TOPIC_TEMPERATURE, payload.as_bytes());
        }

        let values: Vec<f64> = fx
            .store
            .history(Series::Indoor)
            .iter()
            .map(|s| s.value)
            .collect();
        assert_eq!(values, (4..14).map(f64::from).collect::<Vec<_>>());
    }

    #[test]
    fn malformed_payloads_leave_every_field_unchanged() {
        let mut fx = fixture(true);
        fx.router.dispatch(TOPIC_DOOR, b"true");
        fx.router.dispatch(TOPIC_TEMPERATURE, br#"{"temperature": 24}"#);
        let before = fx.store.fields();

        for binding in default_topic_table(true) {
            assert_eq!(
                fx.router.dispatch(&binding.topic, b"{\"broken\": "),
                DispatchOutcome::Dropped,
                "{}",
                binding.topic
            );
        }

        assert_eq!(fx.store.fields(), before);
        assert_eq!(fx.store.history(Series::Indoor).len(), 1);
        assert_eq!(fx.signals.pending_timers(), 0);
    }

    #[test]
    fn unregistered_topic_has_no_side_effects() {
        let mut fx = fixture(false);
        let before = fx.store.fields();

        let outcome = fx.router.dispatch("home/garage/door", b"true");

        assert_eq!(outcome, DispatchOutcome::Ignored);
        assert_eq!(fx.store.fields(), before);
        assert_eq!(fx.signals.pending_timers(), 0);
    }

    #[test]
    fn mirror_policy_controls_door_field() {
        let mut plain = fixture(false);
        plain
            .router
            .dispatch(TOPIC_MOTION, br#"{"motion_detected": true}"#);
        assert!(plain.store.read_bool(Field::MotionDetected));
        assert!(!plain.store.read_bool(Field::DoorOpen));

        let mut mirrored = fixture(true);
        mirrored
            .router
            .dispatch(TOPIC_DOOR_MOTION, br#"{"motion_detected": true}"#);
        assert!(mirrored.store.read_bool(Field::DoorMotion));
        assert!(mirrored.store.read_bool(Field::DoorOpen));
    }

    #[test]
    fn camera_motion_accepts_numeric_literal() {
        let mut fx = fixture(false);
        fx.router.dispatch(TOPIC_DOOR_CAMERA_MOTION, b"1");
        assert!(fx.store.read_bool(Field::DoorCameraMotion));
    }

    #[tokio::test(start_paused = true)]
    async fn camera_image_raises_signal() {
        let mut fx = fixture(false);
        let frame = STANDARD.encode(b"jpeg");

        let outcome = fx
            .router
            .dispatch(TOPIC_WINDOW_CAMERA_IMAGE, frame.as_bytes());

        assert_eq!(outcome, DispatchOutcome::Handled);
        assert!(fx.signals.is_active(SignalChannel::WindowCamera));
        assert!(!fx.signals.is_active(SignalChannel::DoorCamera));
        assert_eq!(
            fx.signals.payload(SignalChannel::WindowCamera).as_deref(),
            Some(&b"jpeg"[..])
        );
    }

    #[test]
    fn invalid_bindings_are_rejected() {
        let feed = ChangeFeed::new();
        let store = Arc::new(StateStore::with_feed(Arc::clone(&feed), 10));
        let signals = Arc::new(TransientSignalTimer::new(feed));

        let numeric_flag = TopicBinding::flag("t", "temperature", &[Field::Temperature]);
        let no_channel = TopicBinding {
            channel: None,
            ..TopicBinding::camera("c", SignalChannel::DoorCamera)
        };
        let duplicate = vec![
            TopicBinding::temperature("x"),
            TopicBinding::temperature("x"),
        ];

        for bindings in [vec![numeric_flag], vec![no_channel], duplicate] {
            assert!(build_router(&bindings, &store, &signals, DEFAULT_SIGNAL_DURATION).is_err());
        }
    }
}
