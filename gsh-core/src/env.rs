//! Lexically-scoped name -> value environment (spec §3 "Environment", §4.2).
//!
//! A scope holds its own bindings plus an optional parent pointer. Two
//! scopes are "isolated" by construction: tool-call scopes (parented to the
//! tool's captured defining environment) and everything else (block, loop,
//! try/catch bodies) which are ordinary non-isolated children of the
//! enclosing scope.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::value::Value;

/// Names the evaluator binds into the global scope that are filtered out of
/// user-visible variable enumeration (§4.2, §6).
const BUILTIN_NAMES: &[&str] = &[
    "print", "log", "JSON", "env", "input", "DateTime", "Map", "Set", "gsh",
];

#[derive(Debug)]
struct EnvironmentInner {
    bindings: HashMap<String, Value>,
    parent: Option<EnvRef>,
    isolated: bool,
}

/// A shared handle to one lexical scope. Cheap to clone (an `Arc` bump);
/// tool closures hold one of these to their defining scope.
#[derive(Clone, Debug)]
pub struct EnvRef(Arc<RwLock<EnvironmentInner>>);

impl EnvRef {
    pub fn root() -> Self {
        Self(Arc::new(RwLock::new(EnvironmentInner {
            bindings: HashMap::new(),
            parent: None,
            isolated: false,
        })))
    }

    /// A non-isolated child scope: `update` on a name not found locally
    /// walks into and mutates the parent. Used for if/while/for/try/block
    /// bodies (§3 "Environment").
    pub fn child(&self) -> Self {
        Self(Arc::new(RwLock::new(EnvironmentInner {
            bindings: HashMap::new(),
            parent: Some(self.clone()),
            isolated: false,
        })))
    }

    /// An isolated child scope: `update` on a name not found locally creates
    /// a local shadow instead of mutating any parent. Used for tool call
    /// frames, parented to the tool's captured defining environment rather
    /// than the caller's scope.
    pub fn isolated_child(&self) -> Self {
        Self(Arc::new(RwLock::new(EnvironmentInner {
            bindings: HashMap::new(),
            parent: Some(self.clone()),
            isolated: true,
        })))
    }

    /// Clone copies only the current-level map, keeping the same parent.
    pub fn clone_local(&self) -> Self {
        let inner = self.0.read().unwrap();
        Self(Arc::new(RwLock::new(EnvironmentInner {
            bindings: inner.bindings.clone(),
            parent: inner.parent.clone(),
            isolated: inner.isolated,
        })))
    }

    /// Walks the parent chain looking up `name`.
    pub fn get(&self, name: &str) -> Option<Value> {
        let inner = self.0.read().unwrap();
        if let Some(v) = inner.bindings.get(name) {
            return Some(v.clone());
        }
        inner.parent.as_ref().and_then(|p| p.get(name))
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Defines `name` in the current scope only. Fails if already bound
    /// locally (§4.2).
    pub fn define(&self, name: &str, value: Value) -> Result<(), String> {
        let mut inner = self.0.write().unwrap();
        if inner.bindings.contains_key(name) {
            return Err(format!("'{}' is already defined in this scope", name));
        }
        inner.bindings.insert(name.to_string(), value);
        Ok(())
    }

    /// Always binds in the current scope, local conflicts are fine.
    pub fn set(&self, name: &str, value: Value) {
        self.0.write().unwrap().bindings.insert(name.to_string(), value);
    }

    /// Walks parents looking for an existing binding and mutates it in
    /// place. The walk stops at the first scope that either holds the name
    /// or is marked isolated: an isolated scope with no local binding
    /// creates a local shadow right there rather than reaching further out
    /// (§3 "Isolated scope"). A walk that reaches the outermost scope
    /// without ever crossing an isolation boundary or finding the name
    /// defines it there.
    pub fn update(&self, name: &str, value: Value) {
        let mut inner = self.0.write().unwrap();
        if inner.bindings.contains_key(name) || inner.isolated {
            inner.bindings.insert(name.to_string(), value);
            return;
        }
        match inner.parent.clone() {
            Some(parent) => {
                drop(inner);
                parent.update(name, value)
            }
            None => {
                inner.bindings.insert(name.to_string(), value);
            }
        }
    }

    /// Removes only the local binding.
    pub fn delete(&self, name: &str) {
        self.0.write().unwrap().bindings.remove(name);
    }

    /// Local bindings only, builtins filtered out.
    pub fn keys(&self) -> Vec<String> {
        self.0
            .read()
            .unwrap()
            .bindings
            .keys()
            .filter(|k| !BUILTIN_NAMES.contains(&k.as_str()))
            .cloned()
            .collect()
    }

    /// Transitive keys across the whole parent chain, builtins filtered out,
    /// deduplicated with the innermost binding winning.
    pub fn all_keys(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        let mut current = Some(self.clone());
        while let Some(env) = current {
            let inner = env.0.read().unwrap();
            for k in inner.bindings.keys() {
                if BUILTIN_NAMES.contains(&k.as_str()) {
                    continue;
                }
                if seen.insert(k.clone()) {
                    out.push(k.clone());
                }
            }
            current = inner.parent.clone();
        }
        out
    }

    pub fn is_isolated(&self) -> bool {
        self.0.read().unwrap().isolated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_walks_parent_chain() {
        let root = EnvRef::root();
        root.define("x", Value::Number(1.0)).unwrap();
        let child = root.child();
        child.update("x", Value::Number(2.0));
        assert_eq!(root.get("x"), Some(Value::Number(2.0)));
    }

    #[test]
    fn isolated_scope_shadows_instead_of_mutating_parent() {
        let root = EnvRef::root();
        root.define("x", Value::Number(1.0)).unwrap();
        let isolated = root.isolated_child();
        isolated.update("x", Value::Number(2.0));
        assert_eq!(root.get("x"), Some(Value::Number(1.0)));
        assert_eq!(isolated.get("x"), Some(Value::Number(2.0)));
    }

    #[test]
    fn define_fails_on_local_conflict() {
        let root = EnvRef::root();
        root.define("x", Value::Number(1.0)).unwrap();
        assert!(root.define("x", Value::Number(2.0)).is_err());
    }

    #[test]
    fn delete_only_removes_local_binding() {
        let root = EnvRef::root();
        root.define("x", Value::Number(1.0)).unwrap();
        let child = root.child();
        child.set("x", Value::Number(2.0));
        child.delete("x");
        assert_eq!(child.get("x"), Some(Value::Number(1.0)));
    }

    #[test]
    fn tool_call_mutation_does_not_leak_to_parent_scope() {
        // Simulates the isolated-scope rule a tool call frame relies on:
        // new locals defined inside never escape, and mutation of a
        // parent-only name doesn't propagate back (property 1).
        let global = EnvRef::root();
        global.define("counter", Value::Number(0.0)).unwrap();
        let call_frame = global.isolated_child();
        call_frame.define("local_only", Value::Bool(true)).unwrap();
        call_frame.update("counter", Value::Number(99.0));

        assert_eq!(global.get("counter"), Some(Value::Number(0.0)));
        assert!(global.get("local_only").is_none());
    }

    #[test]
    fn update_from_nested_block_shadows_at_the_isolation_boundary_not_the_block() {
        // A block scope (if/while/...) inside a tool call frame is
        // non-isolated, but its parent (the call frame) is. Updating a name
        // that exists nowhere should create the shadow at the call frame so
        // later statements in the tool body (outside the block) still see
        // it, while the caller's scope remains untouched.
        let global = EnvRef::root();
        let call_frame = global.isolated_child();
        let block = call_frame.child();
        block.update("counter", Value::Number(99.0));

        assert!(global.get("counter").is_none());
        assert_eq!(call_frame.get("counter"), Some(Value::Number(99.0)));
    }
}
