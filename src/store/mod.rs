// Controller state: typed variables with access modes, and named actions.
// Both tables are built once while a controller starts; afterwards only values change.

pub mod value;
pub mod variables;
pub mod actions;
