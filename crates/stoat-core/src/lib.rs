//! stoat-core - value domain for the stoat module subsystem.
//!
//! This crate defines the values the loader traffics in ([`Value`], the
//! shared-handle containers, and module [`NamespaceRef`] objects) and the
//! structured-clone [`Payload`] used by the worker message channel.
//!
//! Values are `Rc`-based and deliberately `!Send`: an execution context and
//! everything it allocates live on one thread. The only representation that
//! crosses threads is the flattened [`Payload`].

pub mod clone;
pub mod namespace;
pub mod value;

pub use clone::{Payload, SerializationError};
pub use namespace::{DEFAULT_EXPORT, NamespaceRef};
pub use value::{
    ArrayRef, BufferRef, HostError, JsonError, NativeFunction, ObjectRef, Value,
};
