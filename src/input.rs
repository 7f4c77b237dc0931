use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Error;
use crate::node::NodeInner;
use crate::value::Value;

/// A per-run, string-keyed context map. Read-only once bound; every
/// `ContextInput` placeholder that binds to it stores the same `Arc`, so
/// no synchronization is needed to read it (§5).
pub type Context = Arc<BTreeMap<String, Value>>;

/// A handle for "a value, eventually" (§3). `Clone` is cheap: `Constant`
/// clones a `Value` (itself `Arc`-backed for the non-trivial variants),
/// everything else clones a handful of `Arc`s.
#[derive(Clone)]
pub enum Input {
    Constant(Value),
    Context(Arc<ContextCell>),
    Node(Arc<NodeInner>),
    /// A positional projection into a multi-result node: `node[i]`.
    SubResult(Arc<NodeInner>, usize),
    /// A container of other Inputs used as a single positional argument.
    /// In the source this is a Constant wrapping a marker the walker and
    /// argument-preparation logic know to unwrap; here it is its own
    /// variant, per the §9 design note suggesting a sealed
    /// `SequenceOf[Input]` arm directly.
    Sequence(Arc<[Input]>),
}

impl Input {
    pub fn constant(value: impl Into<Value>) -> Input {
        Input::Constant(value.into())
    }

    pub fn sequence(items: impl IntoIterator<Item = Input>) -> Input {
        Input::Sequence(items.into_iter().collect::<Vec<_>>().into())
    }

    pub fn context(key: Option<impl Into<String>>) -> Input {
        Input::Context(Arc::new(ContextCell::new(key.map(Into::into))))
    }

    pub fn is_available(&self) -> bool {
        match self {
            Input::Constant(_) => true,
            Input::Context(cell) => cell.is_bound(),
            Input::Node(node) => node.is_available(),
            Input::SubResult(node, _) => node.is_available(),
            Input::Sequence(items) => items.iter().all(Input::is_available),
        }
    }

    pub fn get(&self) -> Result<Value, Error> {
        match self {
            Input::Constant(v) => Ok(v.clone()),
            Input::Context(cell) => cell.get(),
            Input::Node(node) => node.result_value(),
            Input::SubResult(node, index) => match node.result_value()? {
                Value::Tuple(items) => items.get(*index).cloned().ok_or_else(|| {
                    Error::Construction(format!(
                        "sub-result index {index} out of range (result had {} components)",
                        items.len()
                    ))
                }),
                other if *index == 0 => Ok(other),
                _ => Err(Error::Construction(format!(
                    "sub-result index {index} out of range for a single-valued result"
                ))),
            },
            Input::Sequence(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items.iter() {
                    values.push(item.get()?);
                }
                Ok(Value::Tuple(values.into()))
            }
        }
    }

    /// The nodes whose completion would satisfy this Input, already
    /// flattened through sub-result projections and sequences. Constants
    /// and (by the time scheduling starts) Contexts never appear here,
    /// since both are caught at wiring time if still unavailable
    /// (invariant 4).
    pub(crate) fn blocking_nodes(&self) -> Vec<Arc<NodeInner>> {
        match self {
            Input::Constant(_) | Input::Context(_) => Vec::new(),
            Input::Node(node) => {
                if node.is_available() {
                    Vec::new()
                } else {
                    vec![node.clone()]
                }
            }
            Input::SubResult(node, _) => {
                if node.is_available() {
                    Vec::new()
                } else {
                    vec![node.clone()]
                }
            }
            Input::Sequence(items) => items.iter().flat_map(Input::blocking_nodes).collect(),
        }
    }

    /// The parent node this Input ultimately reads from, for graph-walker
    /// discovery (§4.3): a sub-result projection counts as its parent, a
    /// plain Node counts as itself.
    pub(crate) fn as_node(&self) -> Option<Arc<NodeInner>> {
        match self {
            Input::Node(node) | Input::SubResult(node, _) => Some(node.clone()),
            _ => None,
        }
    }

    /// Recursively collect every Input nested in this one, for the
    /// context fix-up's "including those inside an Input sequence" rule
    /// (§4.4).
    pub(crate) fn flatten_sequences(&self) -> Vec<Input> {
        match self {
            Input::Sequence(items) => items.iter().flat_map(Input::flatten_sequences).collect(),
            other => vec![other.clone()],
        }
    }
}

/// The mutable cell backing a `ContextInput`. A placeholder may be bound
/// at most once; binding the same dict twice is a no-op, binding a second,
/// different dict is an error.
pub struct ContextCell {
    key: Option<String>,
    bound: Mutex<Option<Context>>,
}

impl ContextCell {
    pub fn new(key: Option<String>) -> Self {
        ContextCell {
            key,
            bound: Mutex::new(None),
        }
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn is_bound(&self) -> bool {
        self.bound.lock().is_some()
    }

    pub fn get(&self) -> Result<Value, Error> {
        let guard = self.bound.lock();
        let ctx = guard
            .as_ref()
            .ok_or_else(|| Error::Protocol("Context not set in get.".to_string()))?;
        match &self.key {
            None => Ok(Value::Context(ctx.clone())),
            Some(key) => ctx
                .get(key)
                .cloned()
                .ok_or_else(|| Error::Wiring(format!("Unknown context key: {key}"))),
        }
    }

    /// Bind this placeholder to the run's context. Idempotent when bound
    /// to the very same map twice (two Nodes sharing one `ContextInput`,
    /// or running the same graph's context-fixup twice); an error if a
    /// second, different map is bound.
    pub fn bind(&self, context: Context) -> Result<(), Error> {
        let mut guard = self.bound.lock();
        match guard.as_ref() {
            None => {
                *guard = Some(context);
                Ok(())
            }
            Some(existing) if Arc::ptr_eq(existing, &context) => Ok(()),
            Some(_) => Err(Error::Protocol("Context already set.".to_string())),
        }
    }
}
