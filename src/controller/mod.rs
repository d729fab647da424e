// Controller base, the five vehicle subsystems and the registry that orders them.
pub mod backup;
pub mod base;
pub mod battery;
pub mod climate;
pub mod motor;
pub mod proximity;
pub mod registry;
