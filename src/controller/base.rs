//! base.rs
//! Generic controller: lifecycle, variable/action delegation and the periodic refresh task.
//!
//! A `Subsystem` supplies what differs between controllers (its variables, actions,
//! refresh source and shutdown hook). `Controller` wraps one subsystem and owns
//! everything the variants share.
//!
//! Lifecycle: Initializing → Running → ShuttingDown → Stopped.
//! The refresh task is stopped cooperatively: the flag is cleared, the task notices it
//! before its next write, and `shutdown` joins it before resetting defaults.

use std::{
    fmt,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use spin_sleep::{SpinSleeper, SpinStrategy};
use thread_priority::{ThreadBuilderExt, ThreadPriority};

use crate::error::ControllerError;
use crate::feed::{Sample, SampleFeed};
use crate::store::{
    actions::{ActionContext, ActionResult, ActionTable, ActionTableBuilder},
    value::Value,
    variables::{Access, VariableStore, VariableStoreBuilder},
};
use crate::utils::metrics::{SharedMetrics, lock_metrics};

/// ~60 Hz.
pub const DEFAULT_REFRESH_PERIOD: Duration = Duration::from_micros(16_667);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Initializing,
    Running,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Initializing => "Initializing",
            LifecycleState::Running => "Running",
            LifecycleState::ShuttingDown => "ShuttingDown",
            LifecycleState::Stopped => "Stopped",
        };
        f.write_str(s)
    }
}

/// Registration surface handed to a subsystem while its controller starts.
pub struct SchemaBuilder {
    variables: VariableStoreBuilder,
    actions: ActionTableBuilder,
}

impl SchemaBuilder {
    pub fn new(identity: &str) -> Self {
        Self {
            variables: VariableStoreBuilder::new(identity),
            actions: ActionTableBuilder::new(identity),
        }
    }

    pub fn variable(
        &mut self,
        name: &str,
        initial: impl Into<Value>,
        access: Access,
    ) -> Result<&mut Self, ControllerError> {
        self.variables.register(name, initial, access)?;
        Ok(self)
    }

    pub fn action<F>(&mut self, name: &str, handler: F) -> Result<&mut Self, ControllerError>
    where
        F: Fn(&ActionContext<'_>, &[Value]) -> ActionResult + Send + Sync + 'static,
    {
        self.actions.register(name, handler)?;
        Ok(self)
    }

    fn build(self) -> Schema {
        Schema {
            variables: Arc::new(self.variables.build()),
            actions: self.actions.build(),
        }
    }
}

/// The capability set every controller variant provides.
pub trait Subsystem: Send {
    /// Stable name, unique within a registry.
    fn identity(&self) -> &'static str;

    /// Declares variables and actions. Called once, from `Controller::start`.
    fn register(&self, schema: &mut SchemaBuilder) -> Result<(), ControllerError>;

    /// Source for the background refresh task, if this subsystem refreshes.
    /// Called once, after `register`.
    fn refresh_source(&mut self) -> Option<Box<dyn SampleFeed>> {
        None
    }

    /// Runs after defaults are restored during shutdown.
    fn on_shutdown(&self, _variables: &VariableStore) -> Result<(), ControllerError> {
        Ok(())
    }
}

struct Schema {
    variables: Arc<VariableStore>,
    actions: ActionTable,
}

struct RefreshTask {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl RefreshTask {
    fn stop(self, identity: &str) {
        self.running.store(false, Ordering::Release);
        if self.handle.join().is_err() {
            error!("[{}] refresh task panicked", identity);
        }
    }
}

pub struct Controller {
    identity: &'static str,
    subsystem: Mutex<Box<dyn Subsystem>>,
    schema: OnceLock<Schema>,
    state: Mutex<LifecycleState>,
    refresh: Mutex<Option<RefreshTask>>,
    metrics: SharedMetrics,
}

impl Controller {
    pub fn new(subsystem: Box<dyn Subsystem>, metrics: SharedMetrics) -> Self {
        Self {
            identity: subsystem.identity(),
            subsystem: Mutex::new(subsystem),
            schema: OnceLock::new(),
            state: Mutex::new(LifecycleState::Initializing),
            refresh: Mutex::new(None),
            metrics,
        }
    }

    #[inline]
    pub fn identity(&self) -> &'static str {
        self.identity
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    pub fn has_refresh_task(&self) -> bool {
        self.refresh.lock().is_some()
    }

    /// Registers the subsystem's variables and actions, starts the refresh task if the
    /// subsystem has a source, and moves to `Running`.
    pub fn start(&self, period: Duration) -> Result<(), ControllerError> {
        let mut state = self.state.lock();
        if *state != LifecycleState::Initializing {
            return Err(self.lifecycle_error(*state, "start"));
        }

        let mut subsystem = self.subsystem.lock();
        let mut builder = SchemaBuilder::new(self.identity);
        subsystem.register(&mut builder)?;
        let schema = builder.build();
        let variables = schema.variables.clone();
        if self.schema.set(schema).is_err() {
            return Err(self.lifecycle_error(*state, "start"));
        }

        if let Some(feed) = subsystem.refresh_source() {
            let task = self.spawn_refresh(variables, feed, period)?;
            *self.refresh.lock() = Some(task);
        }

        *state = LifecycleState::Running;
        info!(
            "[{}] running ({} refresh)",
            self.identity,
            if self.has_refresh_task() { "with" } else { "without" }
        );
        Ok(())
    }

    /// Stops the refresh task, restores declared defaults and moves to `Stopped`.
    /// Stopping an already stopped controller is a no-op.
    pub fn shutdown(&self) -> Result<(), ControllerError> {
        {
            let mut state = self.state.lock();
            match *state {
                LifecycleState::Stopped => return Ok(()),
                LifecycleState::Initializing => {
                    *state = LifecycleState::Stopped;
                    return Ok(());
                }
                LifecycleState::ShuttingDown => {
                    return Err(self.lifecycle_error(*state, "shut down"));
                }
                LifecycleState::Running => *state = LifecycleState::ShuttingDown,
            }
        }
        info!("[{}] shutting down", self.identity);

        let task = self.refresh.lock().take();
        if let Some(task) = task {
            task.stop(self.identity);
        }

        let mut result = Ok(());
        if let Some(schema) = self.schema.get() {
            result = schema.variables.reset_defaults();
            if let Err(e) = self.subsystem.lock().on_shutdown(&schema.variables) {
                warn!("[{}] shutdown hook failed: {}", self.identity, e);
            }
        }

        *self.state.lock() = LifecycleState::Stopped;
        info!("[{}] stopped", self.identity);
        result
    }

    // ========================================================================
    // Delegation used by the dispatcher
    // ========================================================================

    pub fn get_variable(&self, name: &str) -> Result<Value, ControllerError> {
        match self.schema.get() {
            Some(schema) => schema.variables.get(name),
            None => Err(self.missing_variable(name)),
        }
    }

    pub fn set_variable(&self, name: &str, value: Value) -> Result<(), ControllerError> {
        match self.schema.get() {
            Some(schema) => schema.variables.set(name, value),
            None => Err(self.missing_variable(name)),
        }
    }

    pub fn perform_action(&self, name: &str, args: &[Value]) -> Result<Value, ControllerError> {
        match self.schema.get() {
            Some(schema) => schema.actions.invoke(name, &schema.variables, args),
            None => Err(ControllerError::ActionNotFound {
                controller: self.identity.to_string(),
                name: name.to_string(),
            }),
        }
    }

    /// True if `name` is one of this controller's variables or actions.
    pub fn owns(&self, name: &str) -> bool {
        self.schema
            .get()
            .is_some_and(|s| s.variables.contains(name) || s.actions.contains(name))
    }

    /// Every externally addressable name (variables, then actions).
    pub fn exposed_names(&self) -> Vec<String> {
        match self.schema.get() {
            Some(s) => s
                .variables
                .names()
                .chain(s.actions.names())
                .map(str::to_string)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Owner-side handle on the variable table, once started.
    pub fn variables(&self) -> Option<&Arc<VariableStore>> {
        self.schema.get().map(|s| &s.variables)
    }

    fn spawn_refresh(
        &self,
        variables: Arc<VariableStore>,
        feed: Box<dyn SampleFeed>,
        period: Duration,
    ) -> Result<RefreshTask, ControllerError> {
        let running = Arc::new(AtomicBool::new(true));
        let identity = self.identity;
        let flag = running.clone();
        let metrics = self.metrics.clone();

        let handle = thread::Builder::new()
            .name(format!("refresh-{}", identity))
            .spawn_with_priority(ThreadPriority::Max, move |priority| {
                if let Err(e) = priority {
                    debug!("[{}] running refresh at default priority: {:?}", identity, e);
                }
                run_refresh(identity, variables, feed, flag, period, metrics);
            })
            .map_err(|e| ControllerError::Spawn {
                identity: identity.to_string(),
                reason: e.to_string(),
            })?;

        Ok(RefreshTask { running, handle })
    }

    fn lifecycle_error(&self, state: LifecycleState, op: &'static str) -> ControllerError {
        ControllerError::Lifecycle {
            identity: self.identity.to_string(),
            state: state.to_string(),
            op,
        }
    }

    fn missing_variable(&self, name: &str) -> ControllerError {
        ControllerError::VariableNotFound {
            controller: self.identity.to_string(),
            name: name.to_string(),
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if let Some(task) = self.refresh.get_mut().take() {
            task.stop(self.identity);
        }
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("identity", &self.identity)
            .field("state", &self.state())
            .finish()
    }
}

/// Writes every sample entry through the owner path. Returns how many were refused.
pub fn apply_sample(identity: &str, variables: &VariableStore, sample: &Sample) -> u64 {
    let mut rejected = 0;
    for (name, value) in sample {
        if let Err(e) = variables.write(name, value.clone()) {
            debug!("[{}] sample value for '{}' refused: {}", identity, name, e);
            rejected += 1;
        }
    }
    rejected
}

/// Periodic refresh: pull one sample per period and write it into the store.
/// Releases follow an absolute schedule; a wake-up past the deadline counts as a miss.
fn run_refresh(
    identity: &'static str,
    variables: Arc<VariableStore>,
    mut feed: Box<dyn SampleFeed>,
    running: Arc<AtomicBool>,
    period: Duration,
    metrics: SharedMetrics,
) {
    let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
    let mut next_deadline = Instant::now() + period;
    let mut consecutive_errors: u64 = 0;

    while running.load(Ordering::Acquire) {
        let now = Instant::now();
        let late = if now < next_deadline {
            sleeper.sleep(next_deadline - now);
            false
        } else {
            true
        };

        // Shutdown may have started while sleeping; no write after that.
        if !running.load(Ordering::Acquire) {
            break;
        }

        let (rejected, failed) = match feed.next_sample() {
            Ok(sample) => {
                consecutive_errors = 0;
                (apply_sample(identity, &variables, &sample), false)
            }
            Err(e) => {
                if consecutive_errors == 0 {
                    warn!("[{}] feed read failed: {}", identity, e);
                } else {
                    debug!("[{}] feed read failed again: {}", identity, e);
                }
                consecutive_errors += 1;
                (0, true)
            }
        };

        {
            let mut m = lock_metrics(&metrics);
            let stats = m.refresh_mut(identity);
            stats.cycles += 1;
            stats.rejected_writes += rejected;
            if late {
                stats.misses += 1;
            }
            if failed {
                stats.feed_errors += 1;
            }
        }

        next_deadline += period;
        if late {
            // Resynchronise instead of bursting to catch up.
            let now = Instant::now();
            if next_deadline < now {
                next_deadline = now + period;
            }
        }
    }

    debug!("[{}] refresh task stopped", identity);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FeedError;
    use crate::utils::metrics::Metrics;
    use std::sync::atomic::AtomicI64;

    /// Counts up on every pull.
    struct CounterFeed {
        next: Arc<AtomicI64>,
    }

    impl SampleFeed for CounterFeed {
        fn next_sample(&mut self) -> Result<Sample, FeedError> {
            let v = self.next.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Sample::from([("voltage".to_string(), Value::Int(v))]))
        }
    }

    struct TestBattery {
        feed: Option<Box<dyn SampleFeed>>,
    }

    impl Subsystem for TestBattery {
        fn identity(&self) -> &'static str {
            "battery"
        }

        fn register(&self, schema: &mut SchemaBuilder) -> Result<(), ControllerError> {
            schema
                .variable("voltage", 0i64, Access::ReadWrite)?
                .variable("distanceFront", 0i64, Access::WriteOnly)?
                .action("double", |ctx, _| {
                    let v = ctx.variables.read("voltage").map_err(|e| e.to_string())?;
                    Ok(Value::Int(v.as_int().unwrap_or(0) * 2))
                })?;
            Ok(())
        }

        fn refresh_source(&mut self) -> Option<Box<dyn SampleFeed>> {
            self.feed.take()
        }
    }

    fn controller(feed: Option<Box<dyn SampleFeed>>) -> Controller {
        Controller::new(Box::new(TestBattery { feed }), Metrics::shared())
    }

    #[test]
    fn lifecycle_moves_forward_only() {
        let c = controller(None);
        assert_eq!(c.state(), LifecycleState::Initializing);
        c.start(DEFAULT_REFRESH_PERIOD).unwrap();
        assert_eq!(c.state(), LifecycleState::Running);
        assert!(matches!(
            c.start(DEFAULT_REFRESH_PERIOD),
            Err(ControllerError::Lifecycle { .. })
        ));
        c.shutdown().unwrap();
        assert_eq!(c.state(), LifecycleState::Stopped);
        c.shutdown().unwrap();
    }

    #[test]
    fn fresh_battery_round_trip() {
        let c = controller(None);
        c.start(DEFAULT_REFRESH_PERIOD).unwrap();
        c.set_variable("voltage", Value::Int(400)).unwrap();
        assert_eq!(c.get_variable("voltage").unwrap(), Value::Int(400));
        assert_eq!(c.perform_action("double", &[]).unwrap(), Value::Int(800));
        assert!(matches!(
            c.get_variable("distanceFront"),
            Err(ControllerError::AccessViolation { .. })
        ));
    }

    #[test]
    fn unstarted_controller_owns_nothing() {
        let c = controller(None);
        assert!(!c.owns("voltage"));
        assert!(matches!(
            c.get_variable("voltage"),
            Err(ControllerError::VariableNotFound { .. })
        ));
    }

    #[test]
    fn refresh_task_writes_until_shutdown_then_defaults_hold() {
        let counter = Arc::new(AtomicI64::new(0));
        let c = controller(Some(Box::new(CounterFeed { next: counter.clone() })));
        c.start(Duration::from_millis(1)).unwrap();
        assert!(c.has_refresh_task());

        let deadline = Instant::now() + Duration::from_secs(2);
        while counter.load(Ordering::SeqCst) < 5 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert!(counter.load(Ordering::SeqCst) >= 5);

        c.shutdown().unwrap();
        assert!(!c.has_refresh_task());
        let pulls = counter.load(Ordering::SeqCst);
        assert_eq!(c.get_variable("voltage").unwrap(), Value::Int(0));

        thread::sleep(Duration::from_millis(20));
        assert_eq!(counter.load(Ordering::SeqCst), pulls);
        assert_eq!(c.get_variable("voltage").unwrap(), Value::Int(0));
    }

    #[test]
    fn concurrent_reads_only_observe_written_values() {
        let counter = Arc::new(AtomicI64::new(0));
        let c = Arc::new(controller(Some(Box::new(CounterFeed { next: counter.clone() }))));
        c.start(Duration::from_micros(50)).unwrap();

        let reader = {
            let c = c.clone();
            let counter = counter.clone();
            thread::spawn(move || {
                let mut last = 0;
                for _ in 0..1_000 {
                    let v = c.get_variable("voltage").unwrap().as_int().unwrap();
                    // Only 0 (initial) or a value the feed already produced.
                    assert!(v >= 0 && v <= counter.load(Ordering::SeqCst));
                    assert!(v >= last);
                    last = v;
                }
            })
        };
        reader.join().unwrap();
        c.shutdown().unwrap();
    }
}
