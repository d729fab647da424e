//! Sample sources consumed by refresh-capable controllers.
//!
//! - `replay`: recorded fixture rows (CSV), looping at end of file.
//! - `noise`:  synthetic readings around a base value (live-like source for simulation).
//! - `bus`:    vehicle bus abstraction and an adapter that refreshes from it.
//!
//! Exhaustion and looping are the feed's business; a controller only calls `next_sample`.

use std::collections::BTreeMap;

use crate::error::FeedError;
use crate::store::value::Value;

pub mod replay;
pub mod noise;
pub mod bus;

/// One pull from a feed: variable name → value.
pub type Sample = BTreeMap<String, Value>;

pub trait SampleFeed: Send {
    fn next_sample(&mut self) -> Result<Sample, FeedError>;
}

impl<F: SampleFeed + ?Sized> SampleFeed for Box<F> {
    fn next_sample(&mut self) -> Result<Sample, FeedError> {
        (**self).next_sample()
    }
}
