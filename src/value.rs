use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A dynamically-typed value flowing through the graph.
///
/// The original engine this crate is modeled on is written in a dynamically
/// typed host language, where a recipe's arguments and results can be any
/// object. Rust has no equivalent of that at the API boundary, so `Value` is
/// a small closed set of shapes recipes actually need (see the test recipes
/// in `src/tests.rs`), plus an `Opaque` escape hatch for host values
/// that only need to flow through the graph untouched (e.g. the drop-logging
/// fixture used by the early-reclamation test).
#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    Tuple(Arc<[Value]>),
    List(Arc<[Value]>),
    Context(Arc<BTreeMap<String, Value>>),
    Opaque(Arc<dyn OpaqueValue>),
}

/// A host value carried opaquely by a [`Value::Opaque`].
///
/// Implemented via the blanket impl below for any `Any + Send + Sync +
/// Debug` type; recipes that need to operate on the wrapped value downcast
/// through [`OpaqueValue::as_any`].
pub trait OpaqueValue: Any + Send + Sync + fmt::Debug {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + Send + Sync + fmt::Debug> OpaqueValue for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Value {
    pub fn opaque<T: Any + Send + Sync + fmt::Debug>(value: T) -> Value {
        Value::Opaque(Arc::new(value))
    }

    pub fn tuple(items: impl IntoIterator<Item = Value>) -> Value {
        Value::Tuple(items.into_iter().collect::<Vec<_>>().into())
    }

    pub fn as_bool(&self) -> bool {
        // Mirrors the host language's truthiness: `None`, `false`, zero,
        // empty strings, and empty containers are falsy.
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Tuple(items) | Value::List(items) => !items.is_empty(),
            Value::Context(map) => !map.is_empty(),
            Value::Opaque(_) => true,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn downcast_opaque<T: Any>(&self) -> Option<&T> {
        match self {
            Value::Opaque(v) => v.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(b) => write!(f, "{b:?}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item:?}")?;
                }
                write!(f, ")")
            }
            Value::List(items) => write!(f, "{items:?}"),
            Value::Context(map) => write!(f, "{map:?}"),
            Value::Opaque(v) => write!(f, "{v:?}"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Context(a), Value::Context(b)) => a == b,
            _ => false,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(Arc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(Arc::from(v.as_str()))
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect::<Vec<_>>().into())
    }
}
