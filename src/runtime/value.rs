use crate::runtime::error::{RuntimeError, RuntimeResult};
use crate::runtime::interpreter::Interpreter;
use crate::runtime::scope::ScopeRef;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// A native procedure: the scope is the one the call site executes in.
pub type NativeFn = fn(&mut Interpreter, &ScopeRef, Vec<Value>) -> RuntimeResult<Value>;

#[derive(Clone, Debug)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(ListValue),
    Dict(DictValue),
    Proc(ProcValue),
    Closure(ClosureValue),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Proc(_) => "procedure",
            Value::Closure(_) => "function",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Boolean coercion: nil is false, numbers test against zero, anything
    /// else refuses rather than guessing.
    pub fn truthy(&self) -> RuntimeResult<bool> {
        match self {
            Value::Nil => Ok(false),
            Value::Bool(b) => Ok(*b),
            Value::Int(i) => Ok(*i != 0),
            Value::Float(f) => Ok(*f != 0.0),
            other => Err(RuntimeError::NonBoolean {
                value: other.to_string(),
            }),
        }
    }

    /// Equality across the value kinds. Nil only equals nil but compares
    /// not-equal (without failing) against every other kind; Int and Float
    /// are numerically interchangeable; containers compare structurally;
    /// procedures and functions compare by identity.
    pub fn try_eq(&self, other: &Value) -> RuntimeResult<bool> {
        match (self, other) {
            (Value::Nil, Value::Nil) => Ok(true),
            (Value::Nil, _) | (_, Value::Nil) => Ok(false),
            (Value::Bool(a), Value::Bool(b)) => Ok(a == b),
            (Value::Int(a), Value::Int(b)) => Ok(a == b),
            (Value::Int(a), Value::Float(b)) => Ok(*a as f64 == *b),
            (Value::Float(a), Value::Int(b)) => Ok(*a == *b as f64),
            (Value::Float(a), Value::Float(b)) => Ok(a == b),
            (Value::Str(a), Value::Str(b)) => Ok(a == b),
            (Value::List(a), Value::List(b)) => {
                let lhs = a.items.borrow();
                let rhs = b.items.borrow();
                if lhs.len() != rhs.len() {
                    return Ok(false);
                }
                for (x, y) in lhs.iter().zip(rhs.iter()) {
                    if !x.try_eq(y)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            (Value::Dict(a), Value::Dict(b)) => {
                let lhs = a.entries.borrow();
                let rhs = b.entries.borrow();
                if lhs.len() != rhs.len() {
                    return Ok(false);
                }
                for ((ka, va), (kb, vb)) in lhs.iter().zip(rhs.iter()) {
                    if ka != kb || !va.try_eq(vb)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            (Value::Proc(a), Value::Proc(b)) => Ok(a.name == b.name),
            (Value::Closure(a), Value::Closure(b)) => {
                Ok(Rc::ptr_eq(&a.body.items, &b.body.items))
            }
            _ => Err(RuntimeError::IncomparableTypes {
                left: self.kind(),
                right: other.kind(),
            }),
        }
    }

    /// Ordering is defined for Bool vs Bool (false < true), numbers against
    /// each other, and Str vs Str; every other pairing fails.
    pub fn try_cmp(&self, other: &Value) -> RuntimeResult<Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Ok(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
            (Value::Int(a), Value::Float(b)) => Ok((*a as f64).total_cmp(b)),
            (Value::Float(a), Value::Int(b)) => Ok(a.total_cmp(&(*b as f64))),
            (Value::Float(a), Value::Float(b)) => Ok(a.total_cmp(b)),
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            _ => Err(RuntimeError::IncomparableTypes {
                left: self.kind(),
                right: other.kind(),
            }),
        }
    }
}

// Cross-kind comparisons collapse to "not equal" here; the fallible rules
// stay on try_eq for the eq/neq built-ins.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        self.try_eq(other).unwrap_or(false)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::List(list) => write!(f, "[{}]", list.join_spaces()),
            Value::Dict(dict) => {
                write!(f, "{{")?;
                let mut first = true;
                for (key, value) in dict.entries.borrow().iter() {
                    if !first {
                        write!(f, ", ")?;
                    }
                    first = false;
                    write!(f, "{}: {}", key.to_value(), value)?;
                }
                write!(f, "}}")
            }
            Value::Proc(proc) => write!(f, "{}", proc.name),
            Value::Closure(closure) => write!(f, "{closure}"),
        }
    }
}

/// Shared, mutable-in-place list storage. Assignment copies the handle, not
/// the contents; `copy` duplicates the backing vector.
#[derive(Clone, Debug, Default)]
pub struct ListValue {
    pub items: Rc<RefCell<Vec<Value>>>,
}

impl ListValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(items: Vec<Value>) -> Self {
        Self {
            items: Rc::new(RefCell::new(items)),
        }
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.items.borrow().get(index).cloned()
    }

    pub fn push(&self, value: Value) {
        self.items.borrow_mut().push(value);
    }

    /// Snapshot of the current contents. Evaluation runs over snapshots so a
    /// body that mutates its own code list cannot invalidate the cursor.
    pub fn to_vec(&self) -> Vec<Value> {
        self.items.borrow().clone()
    }

    pub fn join_spaces(&self) -> String {
        self.items
            .borrow()
            .iter()
            .map(|value| value.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Dictionary with canonical key ordering, so display and `keys` are stable.
#[derive(Clone, Debug, Default)]
pub struct DictValue {
    pub entries: Rc<RefCell<BTreeMap<DictKey, Value>>>,
}

impl DictValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: DictKey, value: Value) {
        self.entries.borrow_mut().insert(key, value);
    }

    pub fn get(&self, key: &DictKey) -> Option<Value> {
        self.entries.borrow().get(key).cloned()
    }

    pub fn remove(&self, key: &DictKey) -> Option<Value> {
        self.entries.borrow_mut().remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.borrow().keys().map(DictKey::to_value).collect()
    }
}

/// Hashable projection of a Value, for use as a dictionary key. Containers
/// and callables are rejected; floats are keyed by bit pattern.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DictKey {
    Nil,
    Bool(bool),
    Int(i64),
    Float(u64),
    Str(String),
}

impl DictKey {
    pub fn from_value(value: &Value) -> RuntimeResult<DictKey> {
        match value {
            Value::Nil => Ok(DictKey::Nil),
            Value::Bool(b) => Ok(DictKey::Bool(*b)),
            Value::Int(i) => Ok(DictKey::Int(*i)),
            Value::Float(x) => Ok(DictKey::Float(x.to_bits())),
            Value::Str(s) => Ok(DictKey::Str(s.clone())),
            other => Err(RuntimeError::TypeMismatch {
                message: format!("a {} cannot be a dictionary key", other.kind()),
            }),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            DictKey::Nil => Value::Nil,
            DictKey::Bool(b) => Value::Bool(*b),
            DictKey::Int(i) => Value::Int(*i),
            DictKey::Float(bits) => Value::Float(f64::from_bits(*bits)),
            DictKey::Str(s) => Value::Str(s.clone()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            DictKey::Nil => 0,
            DictKey::Bool(_) => 1,
            DictKey::Int(_) => 2,
            DictKey::Float(_) => 3,
            DictKey::Str(_) => 4,
        }
    }
}

impl Ord for DictKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (DictKey::Bool(a), DictKey::Bool(b)) => a.cmp(b),
            (DictKey::Int(a), DictKey::Int(b)) => a.cmp(b),
            (DictKey::Float(a), DictKey::Float(b)) => {
                f64::from_bits(*a).total_cmp(&f64::from_bits(*b))
            }
            (DictKey::Str(a), DictKey::Str(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for DictKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A built-in procedure, bound eagerly into the token stream at parse time.
#[derive(Clone, Copy)]
pub struct ProcValue {
    pub name: &'static str,
    pub arity: usize,
    pub code: NativeFn,
}

impl fmt::Debug for ProcValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Proc({}/{})", self.name, self.arity)
    }
}

/// A user function: parameter names (lowercased), a body token list, and the
/// scope it closed over.
#[derive(Clone)]
pub struct ClosureValue {
    pub params: Rc<Vec<String>>,
    pub body: ListValue,
    pub scope: ScopeRef,
}

impl fmt::Debug for ClosureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Closure[{}]", self.params.join(" "))
    }
}

impl fmt::Display for ClosureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fn [{}] do {} end",
            self.params.join(" "),
            self.body.join_spaces()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_follows_the_numeric_tower() {
        assert!(!Value::Nil.truthy().unwrap());
        assert!(Value::Bool(true).truthy().unwrap());
        assert!(!Value::Int(0).truthy().unwrap());
        assert!(Value::Float(0.5).truthy().unwrap());
        assert!(Value::Str("yes".into()).truthy().is_err());
    }

    #[test]
    fn nil_is_unequal_but_not_an_error() {
        assert!(Value::Nil.try_eq(&Value::Nil).unwrap());
        assert!(!Value::Nil.try_eq(&Value::Int(0)).unwrap());
        assert!(!Value::Str("a".into()).try_eq(&Value::Nil).unwrap());
    }

    #[test]
    fn mixed_numeric_comparison_works() {
        assert_eq!(
            Value::Int(2).try_cmp(&Value::Float(2.5)).unwrap(),
            Ordering::Less
        );
        assert!(Value::Int(2).try_eq(&Value::Float(2.0)).unwrap());
    }

    #[test]
    fn cross_kind_ordering_fails() {
        assert!(Value::Int(1).try_cmp(&Value::Str("1".into())).is_err());
        assert!(Value::Nil.try_cmp(&Value::Int(1)).is_err());
        assert!(Value::Bool(false)
            .try_cmp(&Value::Bool(true))
            .is_ok_and(|ord| ord == Ordering::Less));
    }

    #[test]
    fn lists_compare_structurally() {
        let a = Value::List(ListValue::from_vec(vec![Value::Int(1), Value::Int(2)]));
        let b = Value::List(ListValue::from_vec(vec![Value::Int(1), Value::Int(2)]));
        assert!(a.try_eq(&b).unwrap());
    }

    #[test]
    fn dict_keys_reject_containers() {
        assert!(DictKey::from_value(&Value::List(ListValue::new())).is_err());
        assert!(DictKey::from_value(&Value::Str("k".into())).is_ok());
    }

    #[test]
    fn canonical_display() {
        let list = Value::List(ListValue::from_vec(vec![
            Value::Int(1),
            Value::Str("two".into()),
            Value::Nil,
        ]));
        assert_eq!(list.to_string(), "[1 two nil]");
        assert_eq!(Value::Bool(false).to_string(), "false");
    }
}
