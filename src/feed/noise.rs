//! noise.rs
//! Synthetic readings: each channel is a base value plus uniform noise, produced as the
//! channel's declared type. Stands in for a live source when no fixture or hardware exists.

use rand::random_range;

use crate::error::FeedError;
use crate::feed::{Sample, SampleFeed};
use crate::store::value::{Value, ValueType};

#[derive(Debug, Clone)]
pub struct NoiseChannel {
    pub name: String,
    pub base: f64,
    pub noise: (f64, f64),
    pub kind: ValueType,
}

impl NoiseChannel {
    pub fn int(name: &str, base: f64, noise: (f64, f64)) -> Self {
        Self {
            name: name.to_string(),
            base,
            noise,
            kind: ValueType::Int,
        }
    }

    pub fn float(name: &str, base: f64, noise: (f64, f64)) -> Self {
        Self {
            name: name.to_string(),
            base,
            noise,
            kind: ValueType::Float,
        }
    }

    fn reading(&self) -> Value {
        let (lo, hi) = self.noise;
        let raw = if lo < hi {
            self.base + random_range(lo..hi)
        } else {
            self.base
        };
        match self.kind {
            ValueType::Int => Value::Int(raw.round() as i64),
            ValueType::Bool => Value::Bool(raw >= self.base),
            ValueType::Str => Value::Str(format!("{:.2}", raw)),
            ValueType::Float => Value::Float(raw),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NoiseFeed {
    channels: Vec<NoiseChannel>,
}

impl NoiseFeed {
    pub fn new(channels: Vec<NoiseChannel>) -> Self {
        Self { channels }
    }
}

impl SampleFeed for NoiseFeed {
    fn next_sample(&mut self) -> Result<Sample, FeedError> {
        Ok(self
            .channels
            .iter()
            .map(|c| (c.name.clone(), c.reading()))
            .collect())
    }
}
