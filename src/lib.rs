//! A small dataflow computation engine.
//!
//! Build a graph of [`Recipe`]s bound into [`Node`]s connected by [`Input`]s,
//! then hand the roots you care about to [`run`] (or call [`Node::run`] for
//! a single root). The engine discovers every node the roots transitively
//! depend on, wires up any `ContextInput` placeholders against a per-run
//! context map, and steps every node to completion — either in the
//! caller's thread ([`simple_runner`]) or across a fixed pool of worker
//! threads ([`thread_pool_runner`]).
//!
//! Recipes are ordinary Rust closures most of the time ([`Recipe::from_fn`]);
//! a recipe that needs to inspect an intermediate value before deciding
//! what to wait on next (a short-circuiting `or_all`, say) implements
//! [`NodeBody`] by hand instead.

mod clock;
mod context;
mod error;
mod input;
mod node;
mod pool_runner;
mod recipe;
mod run;
mod simple_runner;
mod value;
mod walker;

pub use clock::{Clock, FakeClock, WallClock};
pub use error::{Error, ExceptionResult, RecipeFailure};
pub use input::{Context, Input};
pub use node::{Node, NeverYieldsBody, NodeBody, PlainBody, StepResult};
pub use pool_runner::thread_pool_runner;
pub use recipe::Recipe;
pub use run::{run, RunOptions, Runner};
pub use simple_runner::simple_runner;
pub use value::{OpaqueValue, Value};

#[cfg(test)]
mod tests;

/// `ConstantInput(value)`: an Input available from birth.
pub fn constant_input(value: impl Into<Value>) -> Input {
    Input::constant(value)
}

/// `ContextInput(key)`: a placeholder bound against the run's context map.
/// `None` reads the whole map; `Some(key)` reads one entry.
pub fn context_input(key: Option<impl Into<String>>) -> Input {
    Input::context(key)
}

/// `InputSequence(items)`: a container of Inputs used as a single
/// positional argument, unwrapped by the graph walker and context fix-up
/// to discover the real dependencies inside.
pub fn input_sequence(items: impl IntoIterator<Item = Input>) -> Input {
    Input::sequence(items)
}
