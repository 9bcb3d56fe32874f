//! Engine value domain.
//!
//! `Value` is the tagged value type the module subsystem traffics in:
//! primitives are copied, everything heap-backed is an `Rc` handle with
//! interior mutability. Handles compare by pointer identity, matching the
//! reference semantics the registry's identity invariants are stated in.
//!
//! Every heap variant is `Rc`-based and therefore `!Send`: a value belongs to
//! the execution context (thread) that created it. Crossing a worker boundary
//! goes through [`crate::clone::Payload`], never through the values
//! themselves.

use indexmap::IndexMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

/// Error type returned by native functions and other host-provided hooks.
pub type HostError = Box<dyn std::error::Error + Send + Sync>;

/// A mutable byte buffer handle.
#[derive(Clone)]
pub struct BufferRef(Rc<RefCell<Vec<u8>>>);

impl BufferRef {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Rc::new(RefCell::new(bytes)))
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    /// Copy of the current contents.
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.borrow().clone()
    }

    pub fn set(&self, index: usize, byte: u8) -> bool {
        match self.0.borrow_mut().get_mut(index) {
            Some(slot) => {
                *slot = byte;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, index: usize) -> Option<u8> {
        self.0.borrow().get(index).copied()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }
}

impl fmt::Debug for BufferRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Buffer({} bytes)", self.len())
    }
}

/// A mutable array handle.
#[derive(Clone)]
pub struct ArrayRef(Rc<RefCell<Vec<Value>>>);

impl ArrayRef {
    pub fn new(items: Vec<Value>) -> Self {
        Self(Rc::new(RefCell::new(items)))
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.0.borrow().get(index).cloned()
    }

    pub fn push(&self, value: Value) {
        self.0.borrow_mut().push(value);
    }

    pub fn set(&self, index: usize, value: Value) -> bool {
        match self.0.borrow_mut().get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Snapshot of the current elements.
    pub fn to_vec(&self) -> Vec<Value> {
        self.0.borrow().clone()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }
}

impl fmt::Debug for ArrayRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Array({} items)", self.len())
    }
}

/// A mutable plain-object handle. Property order is insertion order.
#[derive(Clone)]
pub struct ObjectRef(Rc<RefCell<IndexMap<String, Value>>>);

impl ObjectRef {
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(IndexMap::new())))
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self(Rc::new(RefCell::new(entries.into_iter().collect())))
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.borrow().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.0.borrow_mut().insert(key.into(), value);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.borrow().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    /// Property names in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.0.borrow().keys().cloned().collect()
    }

    /// Snapshot of the current entries in insertion order.
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.0
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }
}

impl Default for ObjectRef {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Object({} props)", self.len())
    }
}

struct NativeFunctionInner {
    name: String,
    call: Box<dyn Fn(&[Value]) -> Result<Value, HostError>>,
}

/// A host-provided function value.
///
/// Functions participate in the value domain (modules export them) but are
/// excluded from the structured clone domain.
#[derive(Clone)]
pub struct NativeFunction(Rc<NativeFunctionInner>);

impl NativeFunction {
    pub fn new(
        name: impl Into<String>,
        call: impl Fn(&[Value]) -> Result<Value, HostError> + 'static,
    ) -> Self {
        Self(Rc::new(NativeFunctionInner {
            name: name.into(),
            call: Box::new(call),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn call(&self, args: &[Value]) -> Result<Value, HostError> {
        (self.0.call)(args)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Function({})", self.0.name)
    }
}

/// A value as seen by module bodies and embedders.
#[derive(Clone, Debug)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Buffer(BufferRef),
    Array(ArrayRef),
    Object(ObjectRef),
    Namespace(crate::namespace::NamespaceRef),
    Function(NativeFunction),
}

impl Value {
    pub fn string(s: impl AsRef<str>) -> Self {
        Value::String(Rc::from(s.as_ref()))
    }

    pub fn number(n: f64) -> Self {
        Value::Number(n)
    }

    pub fn buffer(bytes: Vec<u8>) -> Self {
        Value::Buffer(BufferRef::new(bytes))
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(ArrayRef::new(items))
    }

    pub fn object() -> Self {
        Value::Object(ObjectRef::new())
    }

    pub fn function(
        name: impl Into<String>,
        call: impl Fn(&[Value]) -> Result<Value, HostError> + 'static,
    ) -> Self {
        Value::Function(NativeFunction::new(name, call))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayRef> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_buffer(&self) -> Option<&BufferRef> {
        match self {
            Value::Buffer(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_namespace(&self) -> Option<&crate::namespace::NamespaceRef> {
        match self {
            Value::Namespace(ns) => Some(ns),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&NativeFunction> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Human-readable type tag, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Buffer(_) => "buffer",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Namespace(_) => "module namespace",
            Value::Function(_) => "function",
        }
    }
}

/// Primitives compare by value; everything heap-backed compares by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Buffer(a), Value::Buffer(b)) => a.ptr_eq(b),
            (Value::Array(a), Value::Array(b)) => a.ptr_eq(b),
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Namespace(a), Value::Namespace(b)) => a.ptr_eq(b),
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

/// Errors converting a [`Value`] to JSON.
#[derive(Debug, Clone, Error)]
pub enum JsonError {
    #[error("cannot represent a {0} value as JSON")]
    NotRepresentable(&'static str),

    #[error("circular reference")]
    Circular,

    #[error("number {0} has no JSON representation")]
    NonFinite(f64),
}

impl Value {
    /// Build a value from embedder-supplied JSON. JSON `null` maps to
    /// [`Value::Null`]; there is no JSON spelling for `undefined`.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::string(s),
            serde_json::Value::Array(items) => {
                Value::array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Object(ObjectRef::from_entries(
                map.iter().map(|(k, v)| (k.clone(), Value::from_json(v))),
            )),
        }
    }

    /// Convert to JSON for embedder consumption.
    ///
    /// `undefined` flattens to JSON `null`. Namespaces serialize as plain
    /// objects of their entries. Functions and binary buffers have no JSON
    /// representation and error, as does any cyclic container.
    pub fn to_json(&self) -> Result<serde_json::Value, JsonError> {
        let mut seen = Vec::new();
        self.to_json_inner(&mut seen)
    }

    fn to_json_inner(&self, seen: &mut Vec<usize>) -> Result<serde_json::Value, JsonError> {
        match self {
            Value::Undefined | Value::Null => Ok(serde_json::Value::Null),
            Value::Bool(b) => Ok(serde_json::Value::Bool(*b)),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .ok_or(JsonError::NonFinite(*n)),
            Value::String(s) => Ok(serde_json::Value::String(s.to_string())),
            Value::Buffer(_) => Err(JsonError::NotRepresentable("buffer")),
            Value::Function(_) => Err(JsonError::NotRepresentable("function")),
            Value::Array(arr) => {
                enter(seen, arr.addr())?;
                let mut items = Vec::with_capacity(arr.len());
                for item in arr.to_vec() {
                    items.push(item.to_json_inner(seen)?);
                }
                seen.pop();
                Ok(serde_json::Value::Array(items))
            }
            Value::Object(obj) => {
                enter(seen, obj.addr())?;
                let mut map = serde_json::Map::new();
                for (key, value) in obj.entries() {
                    map.insert(key, value.to_json_inner(seen)?);
                }
                seen.pop();
                Ok(serde_json::Value::Object(map))
            }
            Value::Namespace(ns) => {
                enter(seen, ns.addr())?;
                let mut map = serde_json::Map::new();
                for (key, value) in ns.entries() {
                    map.insert(key, value.to_json_inner(seen)?);
                }
                seen.pop();
                Ok(serde_json::Value::Object(map))
            }
        }
    }
}

fn enter(seen: &mut Vec<usize>, addr: usize) -> Result<(), JsonError> {
    if seen.contains(&addr) {
        return Err(JsonError::Circular);
    }
    seen.push(addr);
    Ok(())
}
