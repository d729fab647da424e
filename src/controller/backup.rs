//! backup.rs
//! Parking/backup sensors. No background task: peers pull a fresh bus reading with `update`.

use std::sync::Arc;

use log::debug;

use crate::controller::base::{SchemaBuilder, Subsystem, apply_sample};
use crate::error::ControllerError;
use crate::feed::bus::BusSource;
use crate::store::{actions::expect_arity, value::Value, variables::Access};

pub const IDENTITY: &str = "backup";

pub struct Backup {
    bus: Arc<dyn BusSource>,
}

impl Backup {
    pub fn new(bus: Arc<dyn BusSource>) -> Self {
        Self { bus }
    }
}

impl Subsystem for Backup {
    fn identity(&self) -> &'static str {
        IDENTITY
    }

    fn register(&self, schema: &mut SchemaBuilder) -> Result<(), ControllerError> {
        schema
            .variable("speed", 0i64, Access::ReadOnly)?
            .variable("distance", 0i64, Access::ReadOnly)?;

        let bus = self.bus.clone();
        schema.action("update", move |ctx, args| {
            expect_arity(args, 0)?;
            let sample = bus.read().map_err(|e| format!("bus read failed: {}", e))?;
            let rejected = apply_sample(ctx.controller, ctx.variables, &sample);
            debug!(
                "[{}] manual update: {} value(s), {} rejected",
                ctx.controller,
                sample.len(),
                rejected
            );
            Ok(Value::Bool(rejected == 0))
        })?;

        schema.action("idle", |ctx, args| {
            expect_arity(args, 0)?;
            ctx.variables
                .write("speed", Value::Int(0))
                .map_err(|e| e.to_string())?;
            Ok(Value::Bool(true))
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::base::{Controller, DEFAULT_REFRESH_PERIOD};
    use crate::feed::{
        bus::SimulatedBus,
        noise::{NoiseChannel, NoiseFeed},
    };
    use crate::utils::metrics::Metrics;

    fn backup() -> (Arc<SimulatedBus>, Controller) {
        let bus = Arc::new(SimulatedBus::new(Box::new(NoiseFeed::new(vec![
            NoiseChannel::int("speed", 4.0, (0.0, 0.0)),
            NoiseChannel::int("distance", 90.0, (0.0, 0.0)),
        ]))));
        let c = Controller::new(Box::new(Backup::new(bus.clone())), Metrics::shared());
        c.start(DEFAULT_REFRESH_PERIOD).unwrap();
        (bus, c)
    }

    #[test]
    fn never_runs_a_refresh_task() {
        let (_bus, c) = backup();
        assert!(!c.has_refresh_task());
        assert_eq!(c.get_variable("distance").unwrap(), Value::Int(0));
    }

    #[test]
    fn update_pulls_one_bus_sample() {
        let (_bus, c) = backup();
        assert_eq!(c.perform_action("update", &[]).unwrap(), Value::Bool(true));
        assert_eq!(c.get_variable("speed").unwrap(), Value::Int(4));
        assert_eq!(c.get_variable("distance").unwrap(), Value::Int(90));

        c.perform_action("idle", &[]).unwrap();
        assert_eq!(c.get_variable("speed").unwrap(), Value::Int(0));
    }

    #[test]
    fn update_fails_cleanly_when_bus_is_down() {
        let (bus, c) = backup();
        bus.set_online(false);
        assert!(matches!(
            c.perform_action("update", &[]),
            Err(ControllerError::ActionFailed { .. })
        ));
    }
}
