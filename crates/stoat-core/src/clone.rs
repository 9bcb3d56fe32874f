//! Structured clone for the worker message channel.
//!
//! Worker boundaries deliver copies, never shared state, so a message is
//! first flattened into a [`Payload`]: an owned node graph that is `Send` and
//! carries no `Rc` handles. Encoding memoizes container pointers, which both
//! preserves aliasing (two references to one object stay one object on the
//! far side) and terminates on cyclic graphs. Values outside the clone
//! domain (functions and module namespaces) fail the encode; nothing is
//! ever silently dropped from a message.

use crate::value::{ArrayRef, BufferRef, ObjectRef, Value};
use rustc_hash::FxHashMap;
use thiserror::Error;

/// Error during message serialization or deserialization.
#[derive(Debug, Clone, Error)]
pub enum SerializationError {
    /// The value domain for messages excludes functions, namespaces, and
    /// anything else bound to its owning execution context.
    #[error("{0} values cannot cross a worker boundary")]
    NotCloneable(&'static str),

    /// A received payload did not describe a well-formed node graph.
    #[error("malformed message payload: {0}")]
    Malformed(&'static str),
}

/// One node of a flattened value graph. Container nodes refer to other nodes
/// by index into [`Payload::nodes`].
#[derive(Debug, Clone)]
enum PayloadNode {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Buffer(Vec<u8>),
    Array(Vec<usize>),
    Object(Vec<(String, usize)>),
}

/// An owned, thread-safe copy of a value, produced by [`Payload::encode`] on
/// the sending thread and turned back into a [`Value`] by [`Payload::decode`]
/// on the receiving thread.
#[derive(Debug, Clone)]
pub struct Payload {
    nodes: Vec<PayloadNode>,
    root: usize,
}

impl Payload {
    /// Flatten `value` into an owned node graph.
    ///
    /// Fails with [`SerializationError::NotCloneable`] if the graph reaches a
    /// function or a module namespace.
    pub fn encode(value: &Value) -> Result<Payload, SerializationError> {
        let mut encoder = Encoder {
            nodes: Vec::new(),
            memo: FxHashMap::default(),
        };
        let root = encoder.encode(value)?;
        Ok(Payload {
            nodes: encoder.nodes,
            root,
        })
    }

    /// Rebuild a value graph on the current thread, preserving the aliasing
    /// and cycles of the original.
    pub fn decode(&self) -> Result<Value, SerializationError> {
        if self.root >= self.nodes.len() {
            return Err(SerializationError::Malformed("root index out of range"));
        }

        // First pass: allocate a handle per node so cyclic references can be
        // wired up in the second pass.
        let shells: Vec<Value> = self
            .nodes
            .iter()
            .map(|node| match node {
                PayloadNode::Undefined => Value::Undefined,
                PayloadNode::Null => Value::Null,
                PayloadNode::Bool(b) => Value::Bool(*b),
                PayloadNode::Number(n) => Value::Number(*n),
                PayloadNode::String(s) => Value::string(s),
                PayloadNode::Buffer(bytes) => Value::Buffer(BufferRef::new(bytes.clone())),
                PayloadNode::Array(_) => Value::Array(ArrayRef::new(Vec::new())),
                PayloadNode::Object(_) => Value::Object(ObjectRef::new()),
            })
            .collect();

        // Second pass: populate containers.
        for (index, node) in self.nodes.iter().enumerate() {
            match node {
                PayloadNode::Array(items) => {
                    let Some(Value::Array(arr)) = shells.get(index) else {
                        return Err(SerializationError::Malformed("array shell missing"));
                    };
                    for &item in items {
                        let child = shells
                            .get(item)
                            .ok_or(SerializationError::Malformed("node index out of range"))?;
                        arr.push(child.clone());
                    }
                }
                PayloadNode::Object(entries) => {
                    let Some(Value::Object(obj)) = shells.get(index) else {
                        return Err(SerializationError::Malformed("object shell missing"));
                    };
                    for (key, item) in entries {
                        let child = shells
                            .get(*item)
                            .ok_or(SerializationError::Malformed("node index out of range"))?;
                        obj.set(key.clone(), child.clone());
                    }
                }
                _ => {}
            }
        }

        Ok(shells[self.root].clone())
    }
}

struct Encoder {
    nodes: Vec<PayloadNode>,
    /// Container pointer -> node index, so aliased and cyclic references
    /// encode once and decode to one identity.
    memo: FxHashMap<usize, usize>,
}

impl Encoder {
    fn encode(&mut self, value: &Value) -> Result<usize, SerializationError> {
        match value {
            Value::Undefined => Ok(self.push(PayloadNode::Undefined)),
            Value::Null => Ok(self.push(PayloadNode::Null)),
            Value::Bool(b) => Ok(self.push(PayloadNode::Bool(*b))),
            Value::Number(n) => Ok(self.push(PayloadNode::Number(*n))),
            Value::String(s) => Ok(self.push(PayloadNode::String(s.to_string()))),
            Value::Buffer(buf) => Ok(self.encode_buffer(buf)),
            Value::Array(arr) => self.encode_array(arr),
            Value::Object(obj) => self.encode_object(obj),
            Value::Namespace(_) => Err(SerializationError::NotCloneable("module namespace")),
            Value::Function(_) => Err(SerializationError::NotCloneable("function")),
        }
    }

    fn encode_buffer(&mut self, buf: &BufferRef) -> usize {
        if let Some(&index) = self.memo.get(&buf.addr()) {
            return index;
        }
        let index = self.push(PayloadNode::Buffer(buf.to_vec()));
        self.memo.insert(buf.addr(), index);
        index
    }

    fn encode_array(&mut self, arr: &ArrayRef) -> Result<usize, SerializationError> {
        if let Some(&index) = self.memo.get(&arr.addr()) {
            return Ok(index);
        }

        // Reserve the slot before descending so self-references resolve.
        let index = self.push(PayloadNode::Array(Vec::new()));
        self.memo.insert(arr.addr(), index);

        let mut items = Vec::with_capacity(arr.len());
        for item in arr.to_vec() {
            items.push(self.encode(&item)?);
        }
        self.nodes[index] = PayloadNode::Array(items);
        Ok(index)
    }

    fn encode_object(&mut self, obj: &ObjectRef) -> Result<usize, SerializationError> {
        if let Some(&index) = self.memo.get(&obj.addr()) {
            return Ok(index);
        }

        let index = self.push(PayloadNode::Object(Vec::new()));
        self.memo.insert(obj.addr(), index);

        let mut entries = Vec::with_capacity(obj.len());
        for (key, item) in obj.entries() {
            entries.push((key, self.encode(&item)?));
        }
        self.nodes[index] = PayloadNode::Object(entries);
        Ok(index)
    }

    fn push(&mut self, node: PayloadNode) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }
}
