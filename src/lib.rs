//! # EV central systems coordinator
//!
//! Owns the vehicle's subsystem controllers (motor, battery, climate, proximity, backup),
//! keeps their state fresh from background refresh tasks, and serves `get` / `set` /
//! `action` requests from peers over a network channel.
//!
//! ## Layout
//! - `store`:      typed, access-controlled variables and named actions per controller.
//! - `controller`: lifecycle + refresh task, the five subsystems, the ordered registry.
//! - `feed`:       sample sources (CSV replay, synthetic noise, vehicle bus).
//! - `dispatch`:   request/response types, channels (in-process, TCP), the main loop.
//! - `coordinator`: startup, run, shutdown.
//! - `utils`:      shared metrics and the request audit log.

pub mod config;
pub mod controller;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod feed;
pub mod store;
pub mod utils;

pub use config::CoordinatorConfig;
pub use controller::base::{Controller, LifecycleState, SchemaBuilder, Subsystem};
pub use controller::registry::ControllerRegistry;
pub use coordinator::Coordinator;
pub use dispatch::channel::{LocalChannel, LocalPeer, NetworkChannel, TcpChannel};
pub use dispatch::dispatcher::Dispatcher;
pub use dispatch::request::{CorrelationId, Failure, FailureKind, PeerId, Request, RequestKind, Response};
pub use error::{ChannelError, ConfigError, ControllerError, CoordinatorError};
pub use store::value::{Value, ValueType};
pub use store::variables::Access;
