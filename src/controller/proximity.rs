//! proximity.rs
//! Front/back distance sensors. Raw distances are write-only to peers; they ask for the
//! nearest obstacle instead.

use crate::controller::base::{SchemaBuilder, Subsystem};
use crate::error::ControllerError;
use crate::feed::{
    SampleFeed,
    noise::{NoiseChannel, NoiseFeed},
};
use crate::store::{actions::expect_arity, value::Value, variables::Access};

pub const IDENTITY: &str = "proximity";

pub struct Proximity {
    feed: Option<Box<dyn SampleFeed>>,
}

impl Default for Proximity {
    fn default() -> Self {
        Self::new()
    }
}

impl Proximity {
    pub fn new() -> Self {
        Self::with_feed(Some(Box::new(sensor_feed())))
    }

    pub fn with_feed(feed: Option<Box<dyn SampleFeed>>) -> Self {
        Self { feed }
    }
}

/// Distances in cm.
pub fn sensor_feed() -> NoiseFeed {
    NoiseFeed::new(vec![
        NoiseChannel::int("distanceFront", 250.0, (-50.0, 50.0)),
        NoiseChannel::int("distanceBack", 180.0, (-40.0, 40.0)),
    ])
}

impl Subsystem for Proximity {
    fn identity(&self) -> &'static str {
        IDENTITY
    }

    fn register(&self, schema: &mut SchemaBuilder) -> Result<(), ControllerError> {
        schema
            .variable("distanceFront", 0i64, Access::WriteOnly)?
            .variable("distanceBack", 0i64, Access::WriteOnly)?
            .action("nearestObstacle", |ctx, args| {
                expect_arity(args, 0)?;
                let mut nearest = i64::MAX;
                for name in ["distanceFront", "distanceBack"] {
                    let d = ctx
                        .variables
                        .read(name)
                        .map_err(|e| e.to_string())?
                        .as_int()
                        .ok_or_else(|| format!("{} is not an integer", name))?;
                    nearest = nearest.min(d);
                }
                Ok(Value::Int(nearest))
            })?;
        Ok(())
    }

    fn refresh_source(&mut self) -> Option<Box<dyn SampleFeed>> {
        self.feed.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::base::{Controller, DEFAULT_REFRESH_PERIOD};
    use crate::utils::metrics::Metrics;

    #[test]
    fn distances_are_write_only_and_nearest_is_min() {
        let c = Controller::new(Box::new(Proximity::with_feed(None)), Metrics::shared());
        c.start(DEFAULT_REFRESH_PERIOD).unwrap();

        c.set_variable("distanceFront", Value::Int(120)).unwrap();
        c.set_variable("distanceBack", Value::Int(45)).unwrap();
        assert!(matches!(
            c.get_variable("distanceFront"),
            Err(ControllerError::AccessViolation { .. })
        ));
        assert_eq!(
            c.perform_action("nearestObstacle", &[]).unwrap(),
            Value::Int(45)
        );
    }
}
