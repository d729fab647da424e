//! coordinator.rs
//! Process-lifetime owner of the registry, the channel and the dispatcher.
//!
//! Startup: controllers are built and started in a fixed order (motor, battery, climate,
//! proximity, backup). Shutdown: same order, then the request log is drained and the
//! metrics summary written.

use std::{
    fs::create_dir_all,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use log::{error, info, warn};

use crate::config::CoordinatorConfig;
use crate::controller::{
    backup::Backup,
    base::{Controller, Subsystem},
    battery::{self, Battery},
    climate::Climate,
    motor::Motor,
    proximity::Proximity,
    registry::ControllerRegistry,
};
use crate::dispatch::{channel::NetworkChannel, dispatcher::Dispatcher};
use crate::error::{ControllerError, CoordinatorError};
use crate::feed::{
    bus::SimulatedBus,
    noise::{NoiseChannel, NoiseFeed},
};
use crate::utils::{
    metrics::{Metrics, SharedMetrics, export_summary_csv, lock_metrics},
    request_log::RequestLog,
};

pub const REQUEST_LOG_FILE: &str = "requests.csv";

/// The five vehicle subsystems in startup order.
pub fn vehicle_subsystems(config: &CoordinatorConfig) -> Vec<Box<dyn Subsystem>> {
    let climate_bus = Arc::new(SimulatedBus::new(Box::new(NoiseFeed::new(vec![
        NoiseChannel::int("weatherTemperature", 18.0, (-3.0, 3.0)),
    ]))));
    let backup_bus = Arc::new(SimulatedBus::new(Box::new(NoiseFeed::new(vec![
        NoiseChannel::int("speed", 3.0, (-2.0, 2.0)),
        NoiseChannel::int("distance", 120.0, (-60.0, 60.0)),
    ]))));

    vec![
        Box::new(Motor::new()),
        Box::new(Battery::new(&config.fixture_path(battery::FIXTURE))),
        Box::new(Climate::new(climate_bus)),
        Box::new(Proximity::new()),
        Box::new(Backup::new(backup_bus)),
    ]
}

pub struct Coordinator {
    config: CoordinatorConfig,
    registry: Arc<ControllerRegistry>,
    channel: Arc<dyn NetworkChannel>,
    metrics: SharedMetrics,
    request_log: Option<Arc<RequestLog>>,
    running: Arc<AtomicBool>,
}

impl Coordinator {
    /// Builds one controller per subsystem. Duplicate identities are fatal.
    pub fn new(
        config: CoordinatorConfig,
        channel: Arc<dyn NetworkChannel>,
        subsystems: Vec<Box<dyn Subsystem>>,
    ) -> Result<Self, CoordinatorError> {
        let metrics = Metrics::shared();
        let mut registry = ControllerRegistry::new();
        for subsystem in subsystems {
            registry.add(Arc::new(Controller::new(subsystem, metrics.clone())))?;
        }

        Ok(Self {
            config,
            registry: Arc::new(registry),
            channel,
            metrics,
            request_log: None,
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn with_vehicle(
        config: CoordinatorConfig,
        channel: Arc<dyn NetworkChannel>,
    ) -> Result<Self, CoordinatorError> {
        let subsystems = vehicle_subsystems(&config);
        Self::new(config, channel, subsystems)
    }

    /// Opens the request log, then starts every controller in order. If anything fails,
    /// whatever was already started is stopped again and the error is returned.
    pub fn start(&mut self) -> Result<(), CoordinatorError> {
        info!(
            "[Coordinator] starting {} controller(s), refresh period {:?}",
            self.registry.len(),
            self.config.refresh_period
        );

        self.open_request_log()?;

        let registry = self.registry.clone();
        for (idx, controller) in registry.iter().enumerate() {
            if let Err(e) = controller.start(self.config.refresh_period) {
                error!("[Coordinator] {} failed to start: {}", controller.identity(), e);
                for started in registry.iter().take(idx) {
                    if let Err(e) = started.shutdown() {
                        warn!("[Coordinator] rollback of {} failed: {}", started.identity(), e);
                    }
                }
                self.close_request_log();
                return Err(e.into());
            }
        }

        for (name, owners) in self.registry.ambiguous_names() {
            warn!(
                "[Coordinator] '{}' is owned by {}; bare name resolves to {}",
                name,
                owners.join(", "),
                owners[0]
            );
        }

        self.running.store(true, Ordering::Release);
        info!("[Coordinator] all controllers running");
        Ok(())
    }

    fn open_request_log(&mut self) -> Result<(), CoordinatorError> {
        if !self.config.request_log {
            return Ok(());
        }
        let Some(dir) = self.config.data_dir() else {
            return Ok(());
        };
        create_dir_all(dir).map_err(|e| {
            CoordinatorError::RequestLog(format!("cannot create {:?}: {}", dir, e))
        })?;
        let log = Arc::new(RequestLog::new());
        log.start_consumer(dir.join(REQUEST_LOG_FILE))
            .map_err(CoordinatorError::RequestLog)?;
        self.request_log = Some(log);
        Ok(())
    }

    fn close_request_log(&mut self) {
        if let Some(log) = self.request_log.take()
            && let Err(e) = log.stop_consumer()
        {
            warn!("[Coordinator] request log did not stop cleanly: {}", e);
        }
    }

    /// Runs the dispatcher on the calling thread until the shutdown handle is cleared or
    /// the channel closes.
    pub fn run(&self) -> Result<u64, CoordinatorError> {
        let mut dispatcher =
            Dispatcher::new(self.registry.clone(), self.channel.clone(), self.metrics.clone())
                .with_poll_interval(self.config.poll_interval);
        if let Some(log) = &self.request_log {
            dispatcher = dispatcher.with_request_log(log.clone());
        }
        Ok(dispatcher.run(&self.running)?)
    }

    /// Clearing this flag makes `run` return.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Shuts controllers down in registration order, then flushes the request log and
    /// writes the metrics summary. Returns the first controller error, if any.
    pub fn shutdown(&mut self) -> Result<(), CoordinatorError> {
        self.running.store(false, Ordering::Release);
        info!("[Coordinator] shutting down");

        let mut first_error: Option<ControllerError> = None;
        for controller in self.registry.iter() {
            if let Err(e) = controller.shutdown() {
                error!("[Coordinator] {} shutdown failed: {}", controller.identity(), e);
                first_error.get_or_insert(e);
            }
        }

        if let Some(log) = self.request_log.take() {
            log.stop_consumer().map_err(CoordinatorError::RequestLog)?;
            if log.dropped_count() > 0 {
                warn!("[Coordinator] request log dropped {} record(s)", log.dropped_count());
            }
        }

        if let Some(dir) = self.config.data_dir() {
            if let Err(e) = export_summary_csv(&self.metrics, dir) {
                error!("[Coordinator] metrics export failed: {}", e);
            }
        }

        {
            let m = lock_metrics(&self.metrics);
            info!(
                "[Coordinator] served {} request(s), {} failed",
                m.total_requests(),
                m.total_failures()
            );
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    pub fn registry(&self) -> &Arc<ControllerRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::base::{LifecycleState, SchemaBuilder};
    use crate::dispatch::channel::LocalChannel;
    use crate::store::variables::Access;

    struct Broken;

    impl Subsystem for Broken {
        fn identity(&self) -> &'static str {
            "broken"
        }

        fn register(&self, schema: &mut SchemaBuilder) -> Result<(), ControllerError> {
            schema
                .variable("x", 0i64, Access::ReadWrite)?
                .variable("x", 0i64, Access::ReadWrite)?;
            Ok(())
        }
    }

    fn channel() -> Arc<dyn NetworkChannel> {
        Arc::new(LocalChannel::new())
    }

    #[test]
    fn vehicle_order_is_fixed() {
        let c = Coordinator::with_vehicle(CoordinatorConfig::ephemeral(), channel()).unwrap();
        let ids: Vec<&str> = c.registry().iter().map(|c| c.identity()).collect();
        assert_eq!(ids, vec!["motor", "battery", "climate", "proximity", "backup"]);
    }

    #[test]
    fn duplicate_subsystems_are_fatal() {
        let subsystems: Vec<Box<dyn Subsystem>> =
            vec![Box::new(Motor::with_feed(None)), Box::new(Motor::with_feed(None))];
        assert!(matches!(
            Coordinator::new(CoordinatorConfig::ephemeral(), channel(), subsystems),
            Err(CoordinatorError::Controller(ControllerError::DuplicateController { .. }))
        ));
    }

    #[test]
    fn failed_start_rolls_back_started_controllers() {
        let subsystems: Vec<Box<dyn Subsystem>> =
            vec![Box::new(Motor::with_feed(None)), Box::new(Broken)];
        let mut c = Coordinator::new(CoordinatorConfig::ephemeral(), channel(), subsystems).unwrap();
        assert!(matches!(
            c.start(),
            Err(CoordinatorError::Controller(ControllerError::DuplicateVariable { .. }))
        ));
        let motor = c.registry().get("motor").unwrap();
        assert_eq!(motor.state(), LifecycleState::Stopped);
    }

    #[test]
    fn request_log_failure_leaves_nothing_running() {
        // A regular file where a directory is needed makes the data dir uncreatable.
        let blocker = std::env::temp_dir().join(format!(
            "ev_systems_not_a_dir_{}_{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        std::fs::write(&blocker, b"").unwrap();
        let config = CoordinatorConfig {
            data_dir: Some(blocker.join("logs")),
            request_log: true,
            ..CoordinatorConfig::ephemeral()
        };

        let mut c = Coordinator::with_vehicle(config, channel()).unwrap();
        assert!(matches!(c.start(), Err(CoordinatorError::RequestLog(_))));
        assert!(!c.shutdown_handle().load(Ordering::Acquire));
        for controller in c.registry().iter() {
            assert_ne!(controller.state(), LifecycleState::Running, "{}", controller.identity());
            assert!(!controller.has_refresh_task(), "{}", controller.identity());
        }
        let _ = std::fs::remove_file(&blocker);
    }

    #[test]
    fn failed_start_also_closes_the_request_log() {
        let dir = std::env::temp_dir().join(format!(
            "ev_systems_rollback_{}_{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        let config = CoordinatorConfig {
            data_dir: Some(dir.clone()),
            request_log: true,
            ..CoordinatorConfig::ephemeral()
        };
        let subsystems: Vec<Box<dyn Subsystem>> =
            vec![Box::new(Motor::with_feed(None)), Box::new(Broken)];
        let mut c = Coordinator::new(config, channel(), subsystems).unwrap();
        assert!(c.start().is_err());
        assert!(c.request_log.is_none());
        assert_eq!(c.registry().get("motor").unwrap().state(), LifecycleState::Stopped);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn shutdown_stops_everything_in_order() {
        let mut c = Coordinator::with_vehicle(CoordinatorConfig::ephemeral(), channel()).unwrap();
        c.start().unwrap();
        assert!(c.shutdown_handle().load(Ordering::Acquire));
        c.shutdown().unwrap();
        assert!(!c.shutdown_handle().load(Ordering::Acquire));
        for controller in c.registry().iter() {
            assert_eq!(controller.state(), LifecycleState::Stopped);
            assert!(!controller.has_refresh_task());
        }
        assert_eq!(
            c.registry().get("battery").unwrap().get_variable("voltage").unwrap(),
            crate::store::value::Value::Int(0)
        );
    }
}
