//! bus.rs
//! Vehicle bus abstraction. The coordinator only needs `read` (one raw sample) and
//! `write` (one command, acked or refused); framing and the physical driver live elsewhere.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use crossbeam_queue::ArrayQueue;
use log::debug;
use parking_lot::Mutex;

use crate::error::{BusError, FeedError};
use crate::feed::{Sample, SampleFeed};
use crate::store::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct BusCommand {
    pub target: String,
    pub value: Value,
}

impl BusCommand {
    pub fn new(target: &str, value: impl Into<Value>) -> Self {
        Self {
            target: target.to_string(),
            value: value.into(),
        }
    }
}

pub trait BusSource: Send + Sync {
    fn read(&self) -> Result<Sample, BusError>;
    fn write(&self, command: BusCommand) -> Result<(), BusError>;
}

/// Written commands kept for inspection; older ones are overwritten past this.
pub const COMMAND_CAPACITY: usize = 256;

/// In-process bus: reads come from a wrapped feed, written commands land in a bounded
/// ring for inspection. Can be taken offline to exercise failure paths.
pub struct SimulatedBus {
    feed: Mutex<Box<dyn SampleFeed>>,
    commands: ArrayQueue<BusCommand>,
    overwritten: AtomicU64,
    online: AtomicBool,
}

impl SimulatedBus {
    pub fn new(feed: Box<dyn SampleFeed>) -> Self {
        Self {
            feed: Mutex::new(feed),
            commands: ArrayQueue::new(COMMAND_CAPACITY),
            overwritten: AtomicU64::new(0),
            online: AtomicBool::new(true),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
    }

    /// Commands written since the last drain, oldest first. At most `COMMAND_CAPACITY`.
    pub fn drain_commands(&self) -> Vec<BusCommand> {
        std::iter::from_fn(|| self.commands.pop()).collect()
    }

    pub fn pending_commands(&self) -> usize {
        self.commands.len()
    }

    /// Commands pushed out of the ring before anyone drained them.
    pub fn overwritten_count(&self) -> u64 {
        self.overwritten.load(Ordering::Relaxed)
    }
}

impl BusSource for SimulatedBus {
    fn read(&self) -> Result<Sample, BusError> {
        if !self.online.load(Ordering::Acquire) {
            return Err(BusError::Offline);
        }
        self.feed.lock().next_sample().map_err(|e| {
            debug!("[SimulatedBus] feed read failed: {}", e);
            BusError::NoSample
        })
    }

    fn write(&self, command: BusCommand) -> Result<(), BusError> {
        if !self.online.load(Ordering::Acquire) {
            return Err(BusError::Offline);
        }
        if self.commands.force_push(command).is_some() {
            self.overwritten.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

/// Refreshes a controller from a bus: each pull is one `read`.
pub struct BusFeed {
    bus: Arc<dyn BusSource>,
}

impl BusFeed {
    pub fn new(bus: Arc<dyn BusSource>) -> Self {
        Self { bus }
    }
}

impl SampleFeed for BusFeed {
    fn next_sample(&mut self) -> Result<Sample, FeedError> {
        Ok(self.bus.read()?)
    }
}
