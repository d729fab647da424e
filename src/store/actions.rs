//! actions.rs
//! Per-controller name → handler table.

use std::{
    collections::HashMap,
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
};

use crate::error::ControllerError;
use crate::store::value::Value;
use crate::store::variables::VariableStore;

/// What a handler sees of the controller it is bound to.
pub struct ActionContext<'a> {
    pub controller: &'a str,
    pub variables: &'a VariableStore,
}

/// Handler failures are plain messages; the table wraps them as `ActionFailed`.
pub type ActionResult = Result<Value, String>;

pub type ActionHandler = Box<dyn Fn(&ActionContext<'_>, &[Value]) -> ActionResult + Send + Sync>;

pub struct ActionTableBuilder {
    controller: String,
    handlers: HashMap<String, ActionHandler>,
}

impl ActionTableBuilder {
    pub fn new(controller: impl Into<String>) -> Self {
        Self {
            controller: controller.into(),
            handlers: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, name: &str, handler: F) -> Result<&mut Self, ControllerError>
    where
        F: Fn(&ActionContext<'_>, &[Value]) -> ActionResult + Send + Sync + 'static,
    {
        if self.handlers.contains_key(name) {
            return Err(ControllerError::DuplicateAction {
                controller: self.controller.clone(),
                name: name.to_string(),
            });
        }
        self.handlers.insert(name.to_string(), Box::new(handler));
        Ok(self)
    }

    pub fn build(self) -> ActionTable {
        ActionTable {
            controller: self.controller,
            handlers: self.handlers,
        }
    }
}

pub struct ActionTable {
    controller: String,
    handlers: HashMap<String, ActionHandler>,
}

impl ActionTable {
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Runs the handler against `variables`. A handler error or panic comes back as
    /// `ActionFailed` and never unwinds into the caller.
    pub fn invoke(
        &self,
        name: &str,
        variables: &VariableStore,
        args: &[Value],
    ) -> Result<Value, ControllerError> {
        let handler = self
            .handlers
            .get(name)
            .ok_or_else(|| ControllerError::ActionNotFound {
                controller: self.controller.clone(),
                name: name.to_string(),
            })?;

        let ctx = ActionContext {
            controller: &self.controller,
            variables,
        };

        match catch_unwind(AssertUnwindSafe(|| handler(&ctx, args))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(cause)) => Err(ControllerError::ActionFailed {
                action: name.to_string(),
                cause,
            }),
            Err(panic) => {
                let cause = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "handler panicked".to_string());
                Err(ControllerError::ActionFailed {
                    action: name.to_string(),
                    cause,
                })
            }
        }
    }
}

impl fmt::Debug for ActionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionTable")
            .field("controller", &self.controller)
            .field("actions", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

// Argument helpers shared by the controller variants.

pub fn expect_arity(args: &[Value], n: usize) -> Result<(), String> {
    if args.len() != n {
        return Err(format!("expected {} argument(s), got {}", n, args.len()));
    }
    Ok(())
}

pub fn int_arg(args: &[Value], idx: usize) -> Result<i64, String> {
    match args.get(idx) {
        Some(Value::Int(i)) => Ok(*i),
        Some(other) => Err(format!(
            "argument {} must be int, got {}",
            idx,
            other.value_type()
        )),
        None => Err(format!("missing argument {}", idx)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::variables::{Access, VariableStoreBuilder};

    fn table() -> ActionTable {
        let mut b = ActionTableBuilder::new("motor");
        b.register("double", |ctx, args| {
            let n = int_arg(args, 0)?;
            ctx.variables
                .write("speed", Value::Int(n * 2))
                .map_err(|e| e.to_string())?;
            Ok(Value::Int(n * 2))
        })
        .unwrap();
        b.register("explode", |_, _| panic!("boom")).unwrap();
        b.build()
    }

    fn vars() -> VariableStore {
        let mut b = VariableStoreBuilder::new("motor");
        b.register("speed", 0i64, Access::ReadOnly).unwrap();
        b.build()
    }

    #[test]
    fn duplicate_action_is_rejected() {
        let mut b = ActionTableBuilder::new("motor");
        b.register("stop", |_, _| Ok(Value::Bool(true))).unwrap();
        assert!(matches!(
            b.register("stop", |_, _| Ok(Value::Bool(false))),
            Err(ControllerError::DuplicateAction { .. })
        ));
    }

    #[test]
    fn handler_is_bound_to_owning_variables() {
        let vars = vars();
        let out = table().invoke("double", &vars, &[Value::Int(21)]).unwrap();
        assert_eq!(out, Value::Int(42));
        assert_eq!(vars.read("speed").unwrap(), Value::Int(42));
    }

    #[test]
    fn handler_errors_and_panics_are_wrapped() {
        let vars = vars();
        let err = table().invoke("double", &vars, &[Value::Bool(true)]).unwrap_err();
        assert!(matches!(err, ControllerError::ActionFailed { .. }));
        let err = table().invoke("explode", &vars, &[]).unwrap_err();
        match err {
            ControllerError::ActionFailed { cause, .. } => assert_eq!(cause, "boom"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unknown_action_fails_with_action_not_found() {
        assert!(matches!(
            table().invoke("fly", &vars(), &[]),
            Err(ControllerError::ActionNotFound { .. })
        ));
    }
}
