//! Serializable view of the whole core for a renderer.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Local};
use serde::Serialize;

use super::history::Sample;
use super::state_store::{FieldValue, StateStore};
use super::transient::{SignalChannel, TransientSignalTimer};

/// One chart point, labelled `HH:MM`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPoint {
    pub time: String,
    pub value: f64,
}

impl From<&Sample> for ChartPoint {
    fn from(sample: &Sample) -> Self {
        Self {
            time: sample.label(),
            value: sample.value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraView {
    pub channel: SignalChannel,
    pub visible: bool,
    /// Last frame, re-encoded; `None` once the signal expired
    pub image_base64: Option<String>,
    pub remaining_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardSnapshot {
    pub taken_at: DateTime<Local>,
    pub fields: BTreeMap<String, FieldValue>,
    pub indoor: Vec<ChartPoint>,
    pub outdoor: Vec<ChartPoint>,
    pub cameras: Vec<CameraView>,
}

impl DashboardSnapshot {
    pub fn capture(store: &StateStore, signals: &TransientSignalTimer) -> Self {
        let view = store.view();
        let fields = view
            .fields
            .into_iter()
            .map(|(field, value)| (field.name().to_string(), value))
            .collect();
        let chart = |samples: Vec<Sample>| -> Vec<ChartPoint> {
            samples.iter().map(ChartPoint::from).collect()
        };

        let cameras = SignalChannel::ALL
            .into_iter()
            .map(|channel| {
                let state = signals.state(channel);
                CameraView {
                    channel,
                    visible: state.active,
                    image_base64: state.payload.map(|frame| STANDARD.encode(frame)),
                    remaining_ms: state
                        .remaining
                        .map(|remaining| remaining.as_millis() as u64),
                }
            })
            .collect();

        Self {
            taken_at: Local::now(),
            fields,
            indoor: chart(view.indoor),
            outdoor: chart(view.outdoor),
            cameras,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::history::Series;
    use crate::sync::state_store::{ChangeFeed, Field};
    use bytes::Bytes;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn captures_fields_history_and_cameras() {
        let feed = ChangeFeed::new();
        let store = StateStore::with_feed(Arc::clone(&feed), 10);
        let signals = TransientSignalTimer::new(feed);

        store
            .write(Field::Temperature, FieldValue::Number(21.5))
            .unwrap();
        store.push_sample(Series::Indoor, Sample::now(21.5));
        signals.trigger(
            SignalChannel::WindowCamera,
            Bytes::from_static(b"hello"),
            Duration::from_millis(5000),
        );

        let snapshot = DashboardSnapshot::capture(&store, &signals);

        assert_eq!(snapshot.fields["temperature"], FieldValue::Number(21.5));
        assert_eq!(snapshot.fields["door_open"], FieldValue::Bool(false));
        assert_eq!(snapshot.indoor.len(), 1);
        assert!(snapshot.outdoor.is_empty());

        let window = &snapshot.cameras[1];
        assert_eq!(window.channel, SignalChannel::WindowCamera);
        assert!(window.visible);
        assert_eq!(window.image_base64.as_deref(), Some("aGVsbG8="));
        assert_eq!(window.remaining_ms, Some(5000));
        assert!(!snapshot.cameras[0].visible);

        let json = snapshot.to_json().unwrap();
        assert!(json.contains(r#""temperature":21.5"#));
        assert!(json.contains(r#""channel":"window_camera""#));
    }
}
