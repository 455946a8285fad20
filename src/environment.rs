use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{LoxError, Result};
use crate::value::Value;

/// One link in the scope chain: a name-to-value map plus an optional
/// enclosing environment.  Environments are shared (`Rc<RefCell<_>>`) because
/// closures retain the environment active at their definition site.
#[derive(Debug, Default)]
pub struct Environment {
    values: HashMap<String, Value>,
    enclosing: Option<Rc<RefCell<Environment>>>,
}

impl Environment {
    pub fn new() -> Self {
        Environment {
            values: HashMap::new(),
            enclosing: None,
        }
    }

    pub fn with_enclosing(enclosing: Rc<RefCell<Environment>>) -> Self {
        Environment {
            values: HashMap::new(),
            enclosing: Some(enclosing),
        }
    }

    /// Always succeeds; redefinition overwrites.
    pub fn define(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str, line: usize) -> Result<Value> {
        if let Some(value) = self.values.get(name) {
            Ok(value.clone())
        } else if let Some(enclosing) = &self.enclosing {
            enclosing.borrow().get(name, line)
        } else {
            Err(LoxError::runtime(
                line,
                format!("Undefined variable '{}'.", name),
            ))
        }
    }

    pub fn assign(&mut self, name: &str, value: Value, line: usize) -> Result<()> {
        if self.values.contains_key(name) {
            self.values.insert(name.to_string(), value);

            Ok(())
        } else if let Some(enclosing) = &self.enclosing {
            enclosing.borrow_mut().assign(name, value, line)
        } else {
            Err(LoxError::runtime(
                line,
                format!("Undefined variable '{}'.", name),
            ))
        }
    }

    /// The environment exactly `distance` hops up the chain.
    ///
    /// Callers pass distances certified by the resolver, which never exceed
    /// the chain length at that program point.
    pub fn ancestor(env: &Rc<RefCell<Environment>>, distance: usize) -> Rc<RefCell<Environment>> {
        let mut current = env.clone();

        for _ in 0..distance {
            let next = current.borrow().enclosing.clone();

            match next {
                Some(enclosing) => current = enclosing,
                None => return current,
            }
        }

        current
    }

    /// Read a resolver-certified local at exactly `distance` hops.
    pub fn get_at(
        env: &Rc<RefCell<Environment>>,
        distance: usize,
        name: &str,
        line: usize,
    ) -> Result<Value> {
        let target = Environment::ancestor(env, distance);

        let value = target.borrow().values.get(name).cloned();

        value.ok_or_else(|| LoxError::runtime(line, format!("Undefined variable '{}'.", name)))
    }

    /// Write a resolver-certified local at exactly `distance` hops.
    pub fn assign_at(
        env: &Rc<RefCell<Environment>>,
        distance: usize,
        name: &str,
        value: Value,
        line: usize,
    ) -> Result<()> {
        let target = Environment::ancestor(env, distance);

        let mut target = target.borrow_mut();

        if target.values.contains_key(name) {
            target.values.insert(name.to_string(), value);

            Ok(())
        } else {
            Err(LoxError::runtime(
                line,
                format!("Undefined variable '{}'.", name),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared(env: Environment) -> Rc<RefCell<Environment>> {
        Rc::new(RefCell::new(env))
    }

    #[test]
    fn define_get_and_overwrite() {
        let mut env = Environment::new();

        env.define("x", Value::Number(1.0));
        assert_eq!(env.get("x", 1).unwrap(), Value::Number(1.0));

        env.define("x", Value::Bool(true));
        assert_eq!(env.get("x", 1).unwrap(), Value::Bool(true));
    }

    #[test]
    fn get_walks_the_chain() {
        let globals = shared(Environment::new());
        globals.borrow_mut().define("x", Value::Number(42.0));

        let child = Environment::with_enclosing(globals);

        assert_eq!(child.get("x", 1).unwrap(), Value::Number(42.0));
        assert!(child.get("missing", 1).is_err());
    }

    #[test]
    fn assign_updates_the_defining_scope() {
        let globals = shared(Environment::new());
        globals.borrow_mut().define("x", Value::Number(1.0));

        let child = shared(Environment::with_enclosing(globals.clone()));
        child
            .borrow_mut()
            .assign("x", Value::Number(2.0), 1)
            .unwrap();

        assert_eq!(globals.borrow().get("x", 1).unwrap(), Value::Number(2.0));
    }

    #[test]
    fn get_at_hops_exactly() {
        let root = shared(Environment::new());
        root.borrow_mut().define("x", Value::Number(1.0));

        let middle = shared(Environment::with_enclosing(root));
        middle.borrow_mut().define("x", Value::Number(2.0));

        let leaf = shared(Environment::with_enclosing(middle));

        assert_eq!(
            Environment::get_at(&leaf, 1, "x", 1).unwrap(),
            Value::Number(2.0)
        );
        assert_eq!(
            Environment::get_at(&leaf, 2, "x", 1).unwrap(),
            Value::Number(1.0)
        );
    }

    #[test]
    fn assign_at_writes_the_certified_scope() {
        let root = shared(Environment::new());
        root.borrow_mut().define("x", Value::Number(1.0));

        let leaf = shared(Environment::with_enclosing(root.clone()));

        Environment::assign_at(&leaf, 1, "x", Value::Number(9.0), 1).unwrap();

        assert_eq!(root.borrow().get("x", 1).unwrap(), Value::Number(9.0));
    }
}
