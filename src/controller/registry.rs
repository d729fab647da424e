//! registry.rs
//! Ordered set of controllers. Insertion order is start order and shutdown order.

use std::{collections::BTreeMap, sync::Arc};

use crate::controller::base::Controller;
use crate::error::ControllerError;

#[derive(Debug, Default)]
pub struct ControllerRegistry {
    controllers: Vec<Arc<Controller>>,
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, controller: Arc<Controller>) -> Result<(), ControllerError> {
        if self.get(controller.identity()).is_some() {
            return Err(ControllerError::DuplicateController {
                identity: controller.identity().to_string(),
            });
        }
        self.controllers.push(controller);
        Ok(())
    }

    pub fn get(&self, identity: &str) -> Option<&Arc<Controller>> {
        self.controllers.iter().find(|c| c.identity() == identity)
    }

    /// Resolves `name` to its owning controller and the controller-local name.
    ///
    /// `<identity>.<name>` addresses one controller directly; a bare name goes to the
    /// first controller, in registration order, that owns it.
    pub fn find_owner<'n>(
        &self,
        name: &'n str,
    ) -> Result<(&Arc<Controller>, &'n str), ControllerError> {
        if let Some((identity, local)) = name.split_once('.')
            && let Some(controller) = self.get(identity)
        {
            return if controller.owns(local) {
                Ok((controller, local))
            } else {
                Err(ControllerError::NameNotFound {
                    name: name.to_string(),
                })
            };
        }

        self.controllers
            .iter()
            .find(|c| c.owns(name))
            .map(|c| (c, name))
            .ok_or_else(|| ControllerError::NameNotFound {
                name: name.to_string(),
            })
    }

    /// Bare names owned by more than one controller, with their owners in order.
    pub fn ambiguous_names(&self) -> BTreeMap<String, Vec<&'static str>> {
        let mut owners: BTreeMap<String, Vec<&'static str>> = BTreeMap::new();
        for c in &self.controllers {
            for name in c.exposed_names() {
                owners.entry(name).or_default().push(c.identity());
            }
        }
        owners.retain(|_, ids| ids.len() > 1);
        owners
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Controller>> {
        self.controllers.iter()
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }
}
