use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use crate::object::Object;

/// Shared handle to a scope frame. Closures and call frames keep their
/// defining scope alive through it.
pub type Env = Rc<RefCell<Environment>>;

// --- Environment Definition ---

#[derive(Default)]
pub struct Environment {
    outer: Option<Env>,
    bindings: HashMap<String, Object>,
}

impl Environment {
    /// Creates a new, top-level (global) environment.
    pub fn new() -> Env {
        Rc::new(RefCell::new(Environment::default()))
    }

    /// Creates a new environment enclosed within an outer one.
    pub fn new_enclosed(outer: Env) -> Env {
        Rc::new(RefCell::new(Environment {
            outer: Some(outer),
            bindings: HashMap::new(),
        }))
    }

    /// Follows `outer` links up to the frame that has none.
    pub fn global(env: &Env) -> Env {
        let mut current = env.clone();
        loop {
            let outer = current.borrow().outer.clone();
            match outer {
                Some(outer) => current = outer,
                None => return current,
            }
        }
    }

    pub fn is_global(&self) -> bool {
        self.outer.is_none()
    }

    /// Looks up a name, checking this frame first and then walking outward.
    pub fn get(&self, name: &str) -> Option<Object> {
        match self.bindings.get(name) {
            Some(value) => Some(value.clone()),
            None => self.outer.as_ref()?.borrow().get(name),
        }
    }

    /// Binds `name` in this frame only, replacing any existing binding here.
    /// Returns the bound value.
    pub fn set(&mut self, name: impl Into<String>, value: Object) -> Object {
        self.bindings.insert(name.into(), value.clone());
        value
    }

    /// Rebinds an existing name in the innermost frame that already holds it.
    /// Returns false, binding nothing, when no frame in the chain has the name.
    pub fn assign(&mut self, name: &str, value: Object) -> bool {
        if let Some(slot) = self.bindings.get_mut(name) {
            *slot = value;
            return true;
        }
        match &self.outer {
            Some(outer) => outer.borrow_mut().assign(name, value),
            None => false,
        }
    }

    fn add_identifiers(&self, mut identifiers: HashSet<String>) -> HashSet<String> {
        identifiers.extend(self.bindings.keys().cloned());
        match &self.outer {
            Some(outer) => outer.borrow().add_identifiers(identifiers),
            None => identifiers,
        }
    }

    /// Every name visible from this frame
    pub fn get_identifiers(&self) -> HashSet<String> {
        self.add_identifiers(HashSet::new())
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.bindings.keys().collect();
        names.sort();
        f.debug_struct("Environment")
            .field("bindings", &names)
            .field("global", &self.is_global())
            .finish()
    }
}
