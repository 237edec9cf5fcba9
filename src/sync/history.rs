//! Bounded rolling history of numeric readings.

use std::collections::VecDeque;

use chrono::{DateTime, Local};
use serde::Serialize;

/// Number of samples the dashboard chart keeps.
pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

/// Which reading a history tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Series {
    Indoor,
    Outdoor,
}

impl Series {
    pub const ALL: [Series; 2] = [Series::Indoor, Series::Outdoor];
}

/// A timestamped reading. Immutable once appended.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    pub timestamp: DateTime<Local>,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: DateTime<Local>, value: f64) -> Self {
        Self { timestamp, value }
    }

    pub fn now(value: f64) -> Self {
        Self::new(Local::now(), value)
    }

    /// Chart axis label, `HH:MM`.
    pub fn label(&self) -> String {
        self.timestamp.format("%H:%M").to_string()
    }
}

/// Fixed-capacity FIFO of [`Sample`]s, oldest first.
#[derive(Debug, Clone)]
pub struct TimeSeriesBuffer {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl TimeSeriesBuffer {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append at the tail, evicting from the head until within capacity.
    pub fn push(&mut self, sample: Sample) {
        self.samples.push_back(sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    /// Owned copy of the current contents.
    pub fn snapshot(&self) -> Vec<Sample> {
        self.samples.iter().copied().collect()
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for TimeSeriesBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
