use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::{Runtime, TagValue};

pub const DEFAULT_SAMPLE_CAPACITY: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagSample {
    pub name: String,
    pub value: TagValue,
    pub runtime: Runtime,
    pub timestamp: DateTime<Utc>,
}

/// Bounded per-stream history feeding live displays. A stream is one tag on
/// one runtime. Not part of the conflict model.
#[derive(Debug, Clone)]
pub struct TagBuffer {
    capacity: usize,
    streams: HashMap<(String, Runtime), VecDeque<TagSample>>,
}

impl Default for TagBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_SAMPLE_CAPACITY)
    }
}

impl TagBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            streams: HashMap::new(),
        }
    }

    pub fn push(&mut self, sample: TagSample) {
        let ring = self
            .streams
            .entry((sample.name.clone(), sample.runtime))
            .or_default();
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(sample);
    }

    /// Oldest first.
    pub fn samples(&self, name: &str, runtime: Runtime) -> Vec<TagSample> {
        self.streams
            .get(&(name.to_string(), runtime))
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn latest(&self, name: &str, runtime: Runtime) -> Option<&TagSample> {
        self.streams
            .get(&(name.to_string(), runtime))
            .and_then(|ring| ring.back())
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str, value: f64, runtime: Runtime) -> TagSample {
        TagSample {
            name: name.into(),
            value: TagValue::Number(value),
            runtime,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_ring_keeps_most_recent() {
        let mut buffer = TagBuffer::with_capacity(3);
        for n in 0..5 {
            buffer.push(sample("Flow", n as f64, Runtime::Shadow));
        }
        let values: Vec<TagValue> = buffer
            .samples("Flow", Runtime::Shadow)
            .into_iter()
            .map(|s| s.value)
            .collect();
        assert_eq!(values, vec![2.0.into(), 3.0.into(), 4.0.into()]);
    }

    #[test]
    fn test_streams_are_per_runtime() {
        let mut buffer = TagBuffer::default();
        buffer.push(sample("Flow", 1.0, Runtime::Shadow));
        buffer.push(sample("Flow", 2.0, Runtime::Live));
        assert_eq!(buffer.stream_count(), 2);
        assert_eq!(
            buffer.latest("Flow", Runtime::Live).map(|s| s.value.clone()),
            Some(TagValue::Number(2.0))
        );
    }
}
