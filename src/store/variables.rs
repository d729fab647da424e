//! variables.rs
//! Per-controller typed, access-controlled variable table.
//!
//! The table's shape (names, declared types, access modes, defaults) is fixed once the
//! builder is frozen; only values change afterwards. Every entry carries its own lock, so
//! the dispatcher and the owning controller's refresh task contend per variable and never
//! across the whole table.
//!
//! Two access paths:
//! - peer path (`get` / `set`): enforces access modes and declared types.
//! - owner path (`read` / `write`): enforces declared types only. Used by the refresh task,
//!   action handlers and the shutdown reset.

use std::{collections::HashMap, fmt};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::ControllerError;
use crate::store::value::{Value, ValueType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Access {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl Access {
    #[inline]
    pub fn readable(self) -> bool {
        !matches!(self, Access::WriteOnly)
    }

    #[inline]
    pub fn writable(self) -> bool {
        !matches!(self, Access::ReadOnly)
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Access::ReadOnly => "ReadOnly",
            Access::WriteOnly => "WriteOnly",
            Access::ReadWrite => "ReadWrite",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub struct VariableEntry {
    value: RwLock<Value>,
    default: Value,
    access: Access,
}

impl VariableEntry {
    fn new(initial: Value, access: Access) -> Self {
        Self {
            value: RwLock::new(initial.clone()),
            default: initial,
            access,
        }
    }

    #[inline]
    pub fn declared_type(&self) -> ValueType {
        self.default.value_type()
    }

    #[inline]
    pub fn access(&self) -> Access {
        self.access
    }

    pub fn default_value(&self) -> &Value {
        &self.default
    }
}

/// Collects registrations while a controller starts. Frozen into a [`VariableStore`].
#[derive(Debug)]
pub struct VariableStoreBuilder {
    controller: String,
    entries: HashMap<String, VariableEntry>,
    order: Vec<String>,
}

impl VariableStoreBuilder {
    pub fn new(controller: impl Into<String>) -> Self {
        Self {
            controller: controller.into(),
            entries: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Registers `name` with its initial value; the initial value fixes the declared type
    /// and becomes the default restored on shutdown.
    pub fn register(
        &mut self,
        name: &str,
        initial: impl Into<Value>,
        access: Access,
    ) -> Result<&mut Self, ControllerError> {
        if self.entries.contains_key(name) {
            return Err(ControllerError::DuplicateVariable {
                controller: self.controller.clone(),
                name: name.to_string(),
            });
        }
        self.entries
            .insert(name.to_string(), VariableEntry::new(initial.into(), access));
        self.order.push(name.to_string());
        Ok(self)
    }

    pub fn build(self) -> VariableStore {
        VariableStore {
            controller: self.controller,
            entries: self.entries,
            order: self.order,
        }
    }
}

#[derive(Debug)]
pub struct VariableStore {
    controller: String,
    entries: HashMap<String, VariableEntry>,
    order: Vec<String>,
}

impl VariableStore {
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn entry(&self, name: &str) -> Option<&VariableEntry> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn lookup(&self, name: &str) -> Result<&VariableEntry, ControllerError> {
        self.entries
            .get(name)
            .ok_or_else(|| ControllerError::VariableNotFound {
                controller: self.controller.clone(),
                name: name.to_string(),
            })
    }

    // ========================================================================
    // Peer path
    // ========================================================================

    pub fn get(&self, name: &str) -> Result<Value, ControllerError> {
        let entry = self.lookup(name)?;
        if !entry.access.readable() {
            return Err(ControllerError::AccessViolation {
                name: name.to_string(),
                access: entry.access,
                op: "read",
            });
        }
        Ok(entry.value.read().clone())
    }

    pub fn set(&self, name: &str, value: Value) -> Result<(), ControllerError> {
        let entry = self.lookup(name)?;
        if !entry.access.writable() {
            return Err(ControllerError::AccessViolation {
                name: name.to_string(),
                access: entry.access,
                op: "write",
            });
        }
        Self::store(name, entry, value)
    }

    // ========================================================================
    // Owner path
    // ========================================================================

    pub fn read(&self, name: &str) -> Result<Value, ControllerError> {
        Ok(self.lookup(name)?.value.read().clone())
    }

    pub fn write(&self, name: &str, value: Value) -> Result<(), ControllerError> {
        let entry = self.lookup(name)?;
        Self::store(name, entry, value)
    }

    /// Atomically applies `f` to the current value of `name` (owner path).
    /// Returns the value written.
    pub fn update<F>(&self, name: &str, f: F) -> Result<Value, ControllerError>
    where
        F: FnOnce(&Value) -> Value,
    {
        let entry = self.lookup(name)?;
        let mut guard = entry.value.write();
        let next = f(&guard);
        if next.value_type() != entry.declared_type() {
            return Err(ControllerError::TypeMismatch {
                name: name.to_string(),
                expected: entry.declared_type(),
                found: next.value_type(),
            });
        }
        *guard = next.clone();
        Ok(next)
    }

    /// Restores every variable to its declared default.
    pub fn reset_defaults(&self) -> Result<(), ControllerError> {
        for name in &self.order {
            let entry = self.lookup(name)?;
            Self::store(name, entry, entry.default.clone())?;
        }
        Ok(())
    }

    fn store(name: &str, entry: &VariableEntry, value: Value) -> Result<(), ControllerError> {
        if value.value_type() != entry.declared_type() {
            return Err(ControllerError::TypeMismatch {
                name: name.to_string(),
                expected: entry.declared_type(),
                found: value.value_type(),
            });
        }
        *entry.value.write() = value;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    fn battery_store() -> VariableStore {
        let mut b = VariableStoreBuilder::new("battery");
        b.register("voltage", 0i64, Access::ReadWrite).unwrap();
        b.register("temperature", 0i64, Access::ReadOnly).unwrap();
        b.register("distanceFront", 0i64, Access::WriteOnly).unwrap();
        b.build()
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut b = VariableStoreBuilder::new("battery");
        b.register("voltage", 0i64, Access::ReadWrite).unwrap();
        let err = b.register("voltage", 1i64, Access::ReadOnly).unwrap_err();
        assert!(matches!(err, ControllerError::DuplicateVariable { .. }));
    }

    #[test]
    fn set_then_get_returns_written_value() {
        let store = battery_store();
        store.set("voltage", Value::Int(400)).unwrap();
        assert_eq!(store.get("voltage").unwrap(), Value::Int(400));
    }

    #[test]
    fn read_only_rejects_peer_writes_without_mutation() {
        let store = battery_store();
        store.write("temperature", Value::Int(31)).unwrap();
        let err = store.set("temperature", Value::Int(99)).unwrap_err();
        assert!(matches!(err, ControllerError::AccessViolation { op: "write", .. }));
        assert_eq!(store.get("temperature").unwrap(), Value::Int(31));
    }

    #[test]
    fn write_only_rejects_peer_reads_but_owner_can_read() {
        let store = battery_store();
        store.set("distanceFront", Value::Int(120)).unwrap();
        let err = store.get("distanceFront").unwrap_err();
        assert!(matches!(err, ControllerError::AccessViolation { op: "read", .. }));
        assert_eq!(store.read("distanceFront").unwrap(), Value::Int(120));
    }

    #[test]
    fn type_mismatch_leaves_value_unchanged() {
        let store = battery_store();
        store.set("voltage", Value::Int(12)).unwrap();
        for wrong in [Value::Float(12.0), Value::Bool(true), Value::Str("12".into())] {
            let err = store.set("voltage", wrong.clone()).unwrap_err();
            assert!(matches!(err, ControllerError::TypeMismatch { .. }));
            let err = store.write("voltage", wrong).unwrap_err();
            assert!(matches!(err, ControllerError::TypeMismatch { .. }));
        }
        assert_eq!(store.get("voltage").unwrap(), Value::Int(12));
    }

    #[test]
    fn unknown_names_fail_with_variable_not_found() {
        let store = battery_store();
        assert!(matches!(
            store.get("rpm"),
            Err(ControllerError::VariableNotFound { .. })
        ));
        assert!(matches!(
            store.set("rpm", Value::Int(1)),
            Err(ControllerError::VariableNotFound { .. })
        ));
    }

    #[test]
    fn reset_restores_defaults_for_every_access_mode() {
        let store = battery_store();
        store.write("voltage", Value::Int(400)).unwrap();
        store.write("temperature", Value::Int(40)).unwrap();
        store.write("distanceFront", Value::Int(3)).unwrap();
        store.reset_defaults().unwrap();
        for name in ["voltage", "temperature", "distanceFront"] {
            assert_eq!(store.read(name).unwrap(), Value::Int(0));
        }
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let store = Arc::new(battery_store());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let s = store.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..1_000 {
                    s.update("voltage", |v| Value::Int(v.as_int().unwrap_or(0) + 1))
                        .unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.get("voltage").unwrap(), Value::Int(4_000));
    }
}
