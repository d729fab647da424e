//! battery.rs
//! Traction battery. Voltage and temperature are replayed from a recorded fixture when one
//! is available, otherwise synthesised.

use std::path::Path;

use log::{info, warn};

use crate::controller::base::{SchemaBuilder, Subsystem};
use crate::error::ControllerError;
use crate::feed::{
    SampleFeed,
    noise::{NoiseChannel, NoiseFeed},
    replay::CsvFeed,
};
use crate::store::{actions::expect_arity, value::Value, variables::Access};

pub const IDENTITY: &str = "battery";
pub const FIXTURE: &str = "battery.csv";

/// Pack voltage below which no usable charge is left.
pub const CUTOFF_VOLTAGE: i64 = 300;
pub const KM_PER_VOLT: f64 = 3.0;

pub struct Battery {
    feed: Option<Box<dyn SampleFeed>>,
}

impl Battery {
    /// Replays the fixture at `path`, falling back to synthetic readings if it cannot be loaded.
    pub fn new(path: &Path) -> Self {
        let feed: Box<dyn SampleFeed> = match CsvFeed::open(path) {
            Ok(replay) => {
                info!("[{}] replaying {} rows from {:?}", IDENTITY, replay.len(), path);
                Box::new(replay)
            }
            Err(e) => {
                warn!("[{}] no fixture at {:?} ({}); using synthetic feed", IDENTITY, path, e);
                Box::new(synthetic_feed())
            }
        };
        Self::with_feed(Some(feed))
    }

    /// `None` disables the refresh task.
    pub fn with_feed(feed: Option<Box<dyn SampleFeed>>) -> Self {
        Self { feed }
    }
}

pub fn synthetic_feed() -> NoiseFeed {
    NoiseFeed::new(vec![
        NoiseChannel::int("voltage", 400.0, (-8.0, 8.0)),
        NoiseChannel::int("temperature", 30.0, (-1.0, 1.0)),
    ])
}

pub fn estimate_range_km(voltage: i64) -> f64 {
    (voltage - CUTOFF_VOLTAGE).max(0) as f64 * KM_PER_VOLT
}

impl Subsystem for Battery {
    fn identity(&self) -> &'static str {
        IDENTITY
    }

    fn register(&self, schema: &mut SchemaBuilder) -> Result<(), ControllerError> {
        schema
            .variable("voltage", 0i64, Access::ReadWrite)?
            .variable("temperature", 0i64, Access::ReadWrite)?
            .action("estimateRange", |ctx, args| {
                expect_arity(args, 0)?;
                let voltage = ctx
                    .variables
                    .read("voltage")
                    .map_err(|e| e.to_string())?
                    .as_int()
                    .ok_or("voltage is not an integer")?;
                Ok(Value::Float(estimate_range_km(voltage)))
            })?;
        Ok(())
    }

    fn refresh_source(&mut self) -> Option<Box<dyn SampleFeed>> {
        self.feed.take()
    }
}
