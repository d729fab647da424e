//! climate.rs
//! Cabin climate. Outside temperature comes off the vehicle bus; fan power commands are
//! forwarded to the bus before the stored value changes.

use std::sync::Arc;

use log::{info, warn};

use crate::controller::base::{SchemaBuilder, Subsystem};
use crate::error::ControllerError;
use crate::feed::{
    SampleFeed,
    bus::{BusCommand, BusFeed, BusSource},
};
use crate::store::{
    actions::{ActionContext, ActionResult, expect_arity, int_arg},
    value::Value,
    variables::{Access, VariableStore},
};

pub const IDENTITY: &str = "climate";
pub const MAX_FAN_POWER: i64 = 100;

pub struct Climate {
    bus: Arc<dyn BusSource>,
    feed: Option<Box<dyn SampleFeed>>,
}

impl Climate {
    /// Refreshes from `bus`.
    pub fn new(bus: Arc<dyn BusSource>) -> Self {
        let feed: Box<dyn SampleFeed> = Box::new(BusFeed::new(bus.clone()));
        Self::with_feed(bus, Some(feed))
    }

    /// Commands still go to `bus`; `feed` alone decides whether a refresh task runs.
    pub fn with_feed(bus: Arc<dyn BusSource>, feed: Option<Box<dyn SampleFeed>>) -> Self {
        Self { bus, feed }
    }
}

fn apply_fan_power(bus: &dyn BusSource, ctx: &ActionContext<'_>, power: i64) -> ActionResult {
    bus.write(BusCommand::new("fanPower", power))
        .map_err(|e| format!("bus refused fan power {}: {}", power, e))?;
    ctx.variables
        .write("fanPower", Value::Int(power))
        .map_err(|e| e.to_string())?;
    info!("[{}] fan power {}", ctx.controller, power);
    Ok(Value::Bool(true))
}

impl Subsystem for Climate {
    fn identity(&self) -> &'static str {
        IDENTITY
    }

    fn register(&self, schema: &mut SchemaBuilder) -> Result<(), ControllerError> {
        schema
            .variable("weatherTemperature", 0i64, Access::ReadOnly)?
            .variable("fanPower", 0i64, Access::ReadWrite)?;

        let bus = self.bus.clone();
        schema.action("setFanPower", move |ctx, args| {
            expect_arity(args, 1)?;
            let power = int_arg(args, 0)?;
            if !(0..=MAX_FAN_POWER).contains(&power) {
                return Err(format!("fan power {} outside 0..={}", power, MAX_FAN_POWER));
            }
            apply_fan_power(bus.as_ref(), ctx, power)
        })?;

        let bus = self.bus.clone();
        schema.action("idle", move |ctx, args| {
            expect_arity(args, 0)?;
            apply_fan_power(bus.as_ref(), ctx, 0)
        })?;
        Ok(())
    }

    fn refresh_source(&mut self) -> Option<Box<dyn SampleFeed>> {
        self.feed.take()
    }

    fn on_shutdown(&self, _variables: &VariableStore) -> Result<(), ControllerError> {
        if let Err(e) = self.bus.write(BusCommand::new("fanPower", 0i64)) {
            warn!("[{}] could not park fan on shutdown: {}", IDENTITY, e);
        }
        Ok(())
    }
}
