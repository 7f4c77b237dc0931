use std::sync::Arc;

use crate::error::{Error, RecipeFailure};
use crate::input::Input;
use crate::node::{Node, NodeBody, NodeInner, PlainBody};
use crate::run::RunOptions;
use crate::value::Value;

/// Immutable metadata describing a named, arity-fixed computation template
/// (C2): parameter names, result names, whether the last parameter soaks
/// up extra positional arguments, and a factory that produces a fresh
/// [`NodeBody`] each time the recipe is bound into a [`Node`].
pub struct Recipe {
    name: String,
    param_names: Vec<String>,
    result_names: Vec<String>,
    variadic: bool,
    factory: Box<dyn Fn(Vec<Input>) -> Box<dyn NodeBody> + Send + Sync>,
}

impl Recipe {
    /// Build a recipe from a hand-written [`NodeBody`] factory, for
    /// recipes that need to inspect intermediate values mid-step (e.g.
    /// `or_all`'s short-circuiting scan).
    pub fn new(
        name: impl Into<String>,
        param_names: Vec<String>,
        result_names: Vec<String>,
        variadic: bool,
        factory: impl Fn(Vec<Input>) -> Box<dyn NodeBody> + Send + Sync + 'static,
    ) -> Arc<Recipe> {
        assert!(!result_names.is_empty(), "a recipe needs at least one result name");
        Arc::new(Recipe {
            name: name.into(),
            param_names,
            result_names,
            variadic,
            factory: Box::new(factory),
        })
    }

    /// Build a recipe from a plain function: wait on every argument, then
    /// call `func` with the resolved values and use its return value as
    /// the result, matching §4.1's "plain callable, auto-adapted" case.
    pub fn from_fn(
        name: impl Into<String>,
        param_names: Vec<String>,
        result_names: Vec<String>,
        variadic: bool,
        func: impl Fn(Vec<Value>) -> Result<Value, Box<dyn RecipeFailure>> + Send + Sync + 'static,
    ) -> Arc<Recipe> {
        let func = Arc::new(func);
        Recipe::new(name, param_names, result_names, variadic, move |inputs| {
            let func = func.clone();
            Box::new(PlainBody::new(inputs, move |values| func(values)))
        })
    }

    pub fn display_name(&self) -> &str {
        &self.name
    }

    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    pub fn result_names(&self) -> &[String] {
        &self.result_names
    }

    pub fn variadic(&self) -> bool {
        self.variadic
    }

    /// Wrap a raw return value per the recipe's result arity: a single
    /// result named exactly `"result"` passes the value through unwrapped;
    /// anything else expects the body to already have produced a
    /// `Value::Tuple` of the right width (the recipe's own function is
    /// responsible for building that tuple — see `next_fib` in the test
    /// scenarios, which returns `(b, a + b)` directly).
    pub fn wrap_result(&self, value: Value) -> Result<Value, Error> {
        if self.result_names.len() == 1 && self.result_names[0] == "result" {
            return Ok(value);
        }
        match &value {
            Value::Tuple(items) if items.len() == self.result_names.len() => Ok(value),
            _ => Err(Error::Protocol(format!(
                "{} must return a {}-tuple, one per result name {:?}",
                self.name,
                self.result_names.len(),
                self.result_names
            ))),
        }
    }

    /// Bind positional arguments (§4.2). Any argument count below the
    /// parameter count is only valid if the missing trailing parameters
    /// are all context parameters (name `"context"` or ending in
    /// `"_context"`), which default to a fresh Context placeholder.
    pub fn node(self: &Arc<Self>, args: Vec<Input>) -> Result<Node, Error> {
        let inputs = self.prepare_positional(args)?;
        self.build(inputs)
    }

    /// Bind arguments by parameter name. Positional and keyword forms are
    /// never mixed in the same call, by construction (they're different
    /// methods) — matching §4.2's "may not be mixed" rule.
    pub fn node_kw(self: &Arc<Self>, kwargs: Vec<(&str, Input)>) -> Result<Node, Error> {
        let mut slots: Vec<Option<Input>> = vec![None; self.param_names.len()];
        for (name, input) in kwargs {
            let idx = self
                .param_names
                .iter()
                .position(|p| p == name)
                .ok_or_else(|| Error::Construction(format!("{}: unknown keyword argument '{name}'", self.name)))?;
            if slots[idx].is_some() {
                return Err(Error::Construction(format!(
                    "{}: argument '{name}' given more than once",
                    self.name
                )));
            }
            slots[idx] = Some(input);
        }
        let supplied = slots.iter().rposition(Option::is_some).map_or(0, |i| i + 1);
        let mut args = Vec::with_capacity(supplied);
        for (idx, slot) in slots.into_iter().take(supplied).enumerate() {
            args.push(slot.ok_or_else(|| {
                Error::Construction(format!(
                    "{}: missing required argument '{}'",
                    self.name, self.param_names[idx]
                ))
            })?);
        }
        self.node(args)
    }

    /// Direct invocation: build a one-node graph and run it with the
    /// default (empty) context and the simple runner, ignoring any
    /// ambient configuration — resolved open question, see DESIGN.md.
    pub fn call(self: &Arc<Self>, args: Vec<Input>) -> Result<Value, Error> {
        let node = self.node(args)?;
        node.run(RunOptions::default())
    }

    fn prepare_positional(self: &Arc<Self>, mut args: Vec<Input>) -> Result<Vec<Input>, Error> {
        let n_params = self.param_names.len();
        if args.len() > n_params && !self.variadic {
            return Err(Error::Construction(format!(
                "{} takes {n_params} argument(s), got {}",
                self.name,
                args.len()
            )));
        }
        if args.len() < n_params {
            for param in &self.param_names[args.len()..] {
                if is_context_param(param) {
                    args.push(Input::context(context_key_for(param)));
                } else {
                    return Err(Error::Construction(format!(
                        "{}: missing required argument '{param}'",
                        self.name
                    )));
                }
            }
        }
        Ok(args)
    }

    fn build(self: &Arc<Self>, inputs: Vec<Input>) -> Result<Node, Error> {
        let body = (self.factory)(inputs.clone());
        Ok(Node(NodeInner::new(self.clone(), inputs, body)))
    }
}

pub(crate) fn is_context_param(name: &str) -> bool {
    name == "context" || name.ends_with("_context")
}

pub(crate) fn context_key_for(name: &str) -> Option<String> {
    if name == "context" {
        None
    } else {
        Some(name.trim_end_matches("_context").to_string())
    }
}
