// Environment for variable bindings and scope management.

use std::collections::HashMap;

use super::error::{ScriptError, ScriptResult};
use super::values::Value;

/// Lexically scoped bindings, implemented as a scope stack. Blocks push a
/// scope on entry and pop it on exit; `let` defines in the innermost
/// scope, assignment updates the nearest enclosing binding.
#[derive(Debug, Default)]
pub struct Environment {
    scopes: Vec<HashMap<String, Value>>,
}

impl Environment {
    pub fn new() -> Self {
        Environment {
            scopes: vec![HashMap::new()],
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    pub fn define(&mut self, name: &str, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), value);
        }
    }

    pub fn lookup(&self, name: &str) -> ScriptResult<Value> {
        for scope in self.scopes.iter().rev() {
            if let Some(value) = scope.get(name) {
                return Ok(value.clone());
            }
        }
        Err(ScriptError::UndefinedVariable(name.to_string()))
    }

    pub fn assign(&mut self, name: &str, value: Value) -> ScriptResult<()> {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(slot) = scope.get_mut(name) {
                *slot = value;
                return Ok(());
            }
        }
        Err(ScriptError::UndefinedVariable(name.to_string()))
    }
}
