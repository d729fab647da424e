//! motor.rs
//! Drive motor: commanded speed plus read-only telemetry refreshed from a synthetic feed.

use log::info;

use crate::controller::base::{SchemaBuilder, Subsystem};
use crate::error::ControllerError;
use crate::feed::{
    SampleFeed,
    noise::{NoiseChannel, NoiseFeed},
};
use crate::store::{
    actions::{expect_arity, int_arg},
    value::Value,
    variables::Access,
};

pub const IDENTITY: &str = "motor";
/// km/h
pub const MAX_SPEED: i64 = 200;

pub struct Motor {
    feed: Option<Box<dyn SampleFeed>>,
}

impl Default for Motor {
    fn default() -> Self {
        Self::new()
    }
}

impl Motor {
    pub fn new() -> Self {
        Self::with_feed(Some(Box::new(telemetry_feed())))
    }

    /// `None` disables the refresh task.
    pub fn with_feed(feed: Option<Box<dyn SampleFeed>>) -> Self {
        Self { feed }
    }
}

pub fn telemetry_feed() -> NoiseFeed {
    NoiseFeed::new(vec![
        NoiseChannel::int("voltage", 380.0, (-5.0, 5.0)),
        NoiseChannel::int("temperature", 45.0, (-2.0, 2.0)),
        NoiseChannel::int("rpm", 3000.0, (-100.0, 100.0)),
    ])
}

impl Subsystem for Motor {
    fn identity(&self) -> &'static str {
        IDENTITY
    }

    fn register(&self, schema: &mut SchemaBuilder) -> Result<(), ControllerError> {
        schema
            .variable("speed", 0i64, Access::ReadWrite)?
            .variable("voltage", 0i64, Access::ReadOnly)?
            .variable("temperature", 0i64, Access::ReadOnly)?
            .variable("rpm", 0i64, Access::ReadOnly)?;

        schema
            .action("setSpeed", |ctx, args| {
                expect_arity(args, 1)?;
                let speed = int_arg(args, 0)?;
                if !(0..=MAX_SPEED).contains(&speed) {
                    return Err(format!("speed {} outside 0..={}", speed, MAX_SPEED));
                }
                ctx.variables
                    .write("speed", Value::Int(speed))
                    .map_err(|e| e.to_string())?;
                info!("[{}] speed set to {}", ctx.controller, speed);
                Ok(Value::Bool(true))
            })?
            .action("stop", |ctx, args| {
                expect_arity(args, 0)?;
                ctx.variables
                    .write("speed", Value::Int(0))
                    .map_err(|e| e.to_string())?;
                info!("[{}] stopped", ctx.controller);
                Ok(Value::Bool(true))
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

    fn motor() -> Controller {
        let c = Controller::new(Box::new(Motor::with_feed(None)), Metrics::shared());
        c.start(DEFAULT_REFRESH_PERIOD).unwrap();
        c
    }

    #[test]
    fn set_speed_is_bounded() {
        let c = motor();
        assert_eq!(
            c.perform_action("setSpeed", &[Value::Int(80)]).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(c.get_variable("speed").unwrap(), Value::Int(80));

        let err = c.perform_action("setSpeed", &[Value::Int(MAX_SPEED + 1)]).unwrap_err();
        assert!(matches!(err, ControllerError::ActionFailed { .. }));
        assert_eq!(c.get_variable("speed").unwrap(), Value::Int(80));

        c.perform_action("stop", &[]).unwrap();
        assert_eq!(c.get_variable("speed").unwrap(), Value::Int(0));
    }

    #[test]
    fn telemetry_is_read_only_to_peers() {
        let c = motor();
        for name in ["voltage", "temperature", "rpm"] {
            assert!(matches!(
                c.set_variable(name, Value::Int(1)),
                Err(ControllerError::AccessViolation { .. })
            ));
        }
    }

    #[test]
    fn telemetry_feed_matches_declared_types() {
        let c = motor();
        let sample = telemetry_feed().next_sample().unwrap();
        let vars = c.variables().unwrap();
        assert_eq!(crate::controller::base::apply_sample(IDENTITY, vars, &sample), 0);
        let rpm = c.get_variable("rpm").unwrap().as_int().unwrap();
        assert!((2900..=3100).contains(&rpm));
    }
}
