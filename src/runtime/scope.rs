use crate::runtime::error::{RuntimeError, RuntimeResult};
use crate::runtime::value::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// One frame of the scope chain. Closures keep their captured frame alive
/// through the shared handle, so frames form a tree rooted at the top level.
struct Scope {
    names: HashMap<String, Value>,
    parent: Option<ScopeRef>,
    test: Option<bool>,
    continuing: bool,
    breaking: bool,
    returning: bool,
}

impl Scope {
    fn new(parent: Option<ScopeRef>) -> Self {
        Self {
            names: HashMap::new(),
            parent,
            test: None,
            continuing: false,
            breaking: false,
            returning: false,
        }
    }
}

/// Shared handle to a scope frame. All lookups walk the parent chain; writes
/// follow the write-through rule unless `define` pins them to this frame.
#[derive(Clone)]
pub struct ScopeRef(Rc<RefCell<Scope>>);

impl ScopeRef {
    pub fn root() -> Self {
        ScopeRef(Rc::new(RefCell::new(Scope::new(None))))
    }

    pub fn child(&self) -> Self {
        ScopeRef(Rc::new(RefCell::new(Scope::new(Some(self.clone())))))
    }

    /// Nearest enclosing frame that holds `name`, if any.
    fn holder(&self, name: &str) -> Option<ScopeRef> {
        let mut current = self.clone();
        loop {
            let parent = {
                let scope = current.0.borrow();
                if scope.names.contains_key(name) {
                    return Some(current.clone());
                }
                scope.parent.clone()
            };
            current = parent?;
        }
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.holder(name)
            .map(|frame| frame.0.borrow().names[name].clone())
    }

    pub fn lookup(&self, name: &str) -> RuntimeResult<Value> {
        self.get(name).ok_or_else(|| RuntimeError::UndefinedVariable {
            name: name.to_string(),
        })
    }

    /// Write-through assignment: update the nearest frame already holding
    /// `name`, falling back to this frame when none does.
    pub fn put(&self, name: &str, value: Value) {
        let target = self.holder(name).unwrap_or_else(|| self.clone());
        target.0.borrow_mut().names.insert(name.to_string(), value);
    }

    /// Bind `name` in this frame only, shadowing any outer binding.
    pub fn define(&self, name: &str, value: Value) {
        self.0.borrow_mut().names.insert(name.to_string(), value);
    }

    /// Read `name` from this frame only; loop constructs use this to track
    /// their variable without being fooled by outer bindings.
    pub fn get_local(&self, name: &str) -> Option<Value> {
        self.0.borrow().names.get(name).cloned()
    }

    pub fn test(&self) -> Option<bool> {
        self.0.borrow().test
    }

    pub fn set_test(&self, value: bool) {
        self.0.borrow_mut().test = Some(value);
    }

    pub fn is_continuing(&self) -> bool {
        self.0.borrow().continuing
    }

    pub fn set_continuing(&self, value: bool) {
        self.0.borrow_mut().continuing = value;
    }

    pub fn is_breaking(&self) -> bool {
        self.0.borrow().breaking
    }

    pub fn set_breaking(&self, value: bool) {
        self.0.borrow_mut().breaking = value;
    }

    pub fn is_returning(&self) -> bool {
        self.0.borrow().returning
    }

    pub fn set_returning(&self, value: bool) {
        self.0.borrow_mut().returning = value;
    }
}
