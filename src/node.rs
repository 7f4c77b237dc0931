use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::clock::{Clock, WallClock};
use crate::error::{Error, ExceptionResult, RecipeFailure};
use crate::input::Input;
use crate::recipe::Recipe;
use crate::value::Value;

/// What a single step of a node's coroutine produces.
///
/// `Wait` and `Forward` are non-terminal-or-terminal in the sense the
/// source's generator protocol describes them (§4.1): `Wait` just names
/// dependencies, `Forward` is a terminal that aliases another Input instead
/// of computing a value directly. `Exhausted` models a body whose
/// underlying generator returned without ever producing a value — the
/// `noop` scenario's "No values yielded by recipe iterator." case.
pub enum StepResult {
    Wait(Vec<Input>),
    Forward(Input),
    Done(Value),
    Exhausted,
}

/// A steppable recipe body. Hand-written implementations model recipes
/// that need to inspect intermediate values before deciding what to wait on
/// next (`or_all`); [`PlainBody`] covers the common case of a function that
/// just waits on all its arguments and returns one value.
///
/// `step` takes no resume argument — unlike a host generator's
/// `send(value)`, a body re-reads the Inputs it's waiting on via
/// `Input::get` once the adapter re-steps it, rather than being handed the
/// resumed value directly. This keeps the trait object-safe and avoids
/// threading a `Value` resume parameter through implementations that don't
/// need it.
pub trait NodeBody: Send {
    fn step(&mut self) -> Result<StepResult, Box<dyn RecipeFailure>>;
}

/// The common-case body: wait on each argument in turn (skipping ones
/// already available without suspending, matching the "a single step may
/// advance without returning control" behavior used throughout the
/// schedulers), then invoke the wrapped function once all are ready.
pub struct PlainBody {
    inputs: Vec<Input>,
    values: Vec<Option<Value>>,
    next: usize,
    func: Option<Box<dyn FnOnce(Vec<Value>) -> Result<Value, Box<dyn RecipeFailure>> + Send>>,
}

impl PlainBody {
    pub fn new(
        inputs: Vec<Input>,
        func: impl FnOnce(Vec<Value>) -> Result<Value, Box<dyn RecipeFailure>> + Send + 'static,
    ) -> Self {
        let len = inputs.len();
        PlainBody {
            inputs,
            values: vec![None; len],
            next: 0,
            func: Some(Box::new(func)),
        }
    }
}

impl NodeBody for PlainBody {
    fn step(&mut self) -> Result<StepResult, Box<dyn RecipeFailure>> {
        while self.next < self.inputs.len() {
            let input = &self.inputs[self.next];
            if !input.is_available() {
                return Ok(StepResult::Wait(vec![input.clone()]));
            }
            self.values[self.next] = Some(input.get().map_err(wiring_as_body_error)?);
            self.next += 1;
        }
        let values: Vec<Value> = self.values.iter_mut().map(|v| v.take().unwrap()).collect();
        let func = self.func.take().expect("PlainBody stepped after completion");
        func(values).map(StepResult::Done)
    }
}

/// A body that never yields anything, used only to exercise the `noop`
/// protocol-error scenario.
pub struct NeverYieldsBody;

impl NodeBody for NeverYieldsBody {
    fn step(&mut self) -> Result<StepResult, Box<dyn RecipeFailure>> {
        Ok(StepResult::Exhausted)
    }
}

fn wiring_as_body_error(err: Error) -> Box<dyn RecipeFailure> {
    Box::new(WiringDuringStep(err.to_string()))
}

#[derive(Debug, PartialEq)]
struct WiringDuringStep(String);

impl fmt::Display for WiringDuringStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for WiringDuringStep {}

/// Identifies the one-shot result slot, independent of whether it holds a
/// value or an `ExceptionResult`.
enum ResultSlot {
    Empty,
    Value(Value),
    Failed(ExceptionResult),
}

struct NodeState {
    inputs: Option<Vec<Input>>,
    body: Option<Box<dyn NodeBody>>,
    result: ResultSlot,
    forwarded: Option<Input>,
    name: String,
    start_time: Option<u64>,
    end_time: Option<u64>,
    clock: Arc<dyn Clock>,
}

/// The mutable unit of execution (C3). Cheaply clonable; clones share the
/// same underlying state via `Arc`.
pub struct NodeInner {
    pub recipe: Arc<Recipe>,
    state: Mutex<NodeState>,
}

impl NodeInner {
    pub fn new(recipe: Arc<Recipe>, inputs: Vec<Input>, body: Box<dyn NodeBody>) -> Arc<NodeInner> {
        let name = recipe.display_name().to_string();
        Arc::new(NodeInner {
            recipe,
            state: Mutex::new(NodeState {
                inputs: Some(inputs),
                body: Some(body),
                result: ResultSlot::Empty,
                forwarded: None,
                name,
                start_time: None,
                end_time: None,
                clock: Arc::new(WallClock),
            }),
        })
    }

    pub fn is_available(&self) -> bool {
        !matches!(self.state.lock().result, ResultSlot::Empty)
    }

    pub fn name(&self) -> String {
        self.state.lock().name.clone()
    }

    pub fn set_name(&self, name: String) {
        self.state.lock().name = name;
    }

    pub fn set_clock(&self, clock: Arc<dyn Clock>) {
        self.state.lock().clock = clock;
    }

    pub fn start_time(&self) -> Option<u64> {
        self.state.lock().start_time
    }

    pub fn end_time(&self) -> Option<u64> {
        self.state.lock().end_time
    }

    /// The node's current inputs, if they haven't been severed yet (see
    /// `sever_inputs`). Used by the graph walker, which runs before
    /// severing.
    pub fn inputs(&self) -> Option<Vec<Input>> {
        self.state.lock().inputs.clone()
    }

    /// Drop the backward references to this node's inputs, breaking the
    /// last strong chain from a consumer back to its producers so that,
    /// combined with the weak parent reference held by the node's own
    /// adapter state, intermediate results become unreachable as soon as
    /// their unique reader has consumed them (§5 early reclamation).
    pub fn sever_inputs(&self) {
        self.state.lock().inputs = None;
    }

    /// Rewrite a single positional input in place, used by context fix-up
    /// (C5) to swap an omitted/explicit-null context argument for a bound
    /// placeholder before scheduling starts.
    pub fn set_input_at(&self, index: usize, input: Input) {
        let mut state = self.state.lock();
        let inputs = state
            .inputs
            .as_mut()
            .expect("set_input_at called after inputs were severed");
        inputs[index] = input;
    }

    pub fn result_value(&self) -> Result<Value, Error> {
        match &self.state.lock().result {
            ResultSlot::Empty => Err(Error::Protocol(format!(
                "node {} has no result yet",
                self.state.lock().name
            ))),
            ResultSlot::Value(v) => Ok(v.clone()),
            ResultSlot::Failed(exc) => Err(Error::Recipe(exc.clone())),
        }
    }

    /// For instrumentation: the raw one-element-or-empty slot, with
    /// failures exposed as an `ExceptionResult` rather than propagated.
    pub fn result_ary(&self) -> Vec<Result<Value, ExceptionResult>> {
        match &self.state.lock().result {
            ResultSlot::Empty => Vec::new(),
            ResultSlot::Value(v) => vec![Ok(v.clone())],
            ResultSlot::Failed(exc) => vec![Err(exc.clone())],
        }
    }

    fn set_result(&self, state: &mut NodeState, result: ResultSlot) {
        debug_assert!(
            matches!(state.result, ResultSlot::Empty),
            "node {} result set more than once",
            state.name
        );
        state.end_time = Some(state.clock.now());
        state.result = result;
        state.body = None;
    }

    /// Advance this node's coroutine by exactly one step, per §4.1/§4.5.
    /// Returns the blocking nodes to wait on when the node suspends, or
    /// `None` once its result has been set. A wait yielded by the body is
    /// flattened through `Input::blocking_nodes` first, so an `Input`
    /// sequence's members are resolved to the actual nodes blocking it
    /// rather than handed back as one opaque, non-Node wait entry.
    pub fn advance(self: &Arc<Self>) -> Result<Option<Vec<Arc<NodeInner>>>, Error> {
        let mut state = self.state.lock();
        if state.start_time.is_none() {
            state.start_time = Some(state.clock.now());
        }

        if let Some(forwarded) = state.forwarded.take() {
            if !forwarded.is_available() {
                // Shouldn't happen: the scheduler only resumes us once the
                // forwarded input is available. Defensive re-wait.
                let pending = forwarded.blocking_nodes();
                state.forwarded = Some(forwarded);
                return Ok(Some(pending));
            }
            let value = forwarded.get()?;
            self.set_result(&mut state, ResultSlot::Value(value));
            return Ok(None);
        }

        let body = state
            .body
            .as_mut()
            .expect("advance() called on a node that already completed");

        log::trace!("{}: stepping", state.name);

        match body.step() {
            Ok(StepResult::Wait(inputs)) => {
                let pending: Vec<Arc<NodeInner>> = inputs.iter().flat_map(Input::blocking_nodes).collect();
                Ok(Some(pending))
            }
            Ok(StepResult::Forward(input)) => {
                if input.is_available() {
                    let value = input.get()?;
                    self.set_result(&mut state, ResultSlot::Value(value));
                    Ok(None)
                } else {
                    let pending = input.blocking_nodes();
                    state.forwarded = Some(input);
                    Ok(Some(pending))
                }
            }
            Ok(StepResult::Done(value)) => match self.recipe.wrap_result(value) {
                Ok(value) => {
                    self.set_result(&mut state, ResultSlot::Value(value));
                    Ok(None)
                }
                Err(err) => {
                    let exc = ExceptionResult::new(ProtocolFailure(err.to_string()));
                    self.set_result(&mut state, ResultSlot::Failed(exc.clone()));
                    Err(Error::Recipe(exc))
                }
            },
            Ok(StepResult::Exhausted) => {
                let exc = ExceptionResult::new(ProtocolFailure(
                    "No values yielded by recipe iterator.".to_string(),
                ));
                self.set_result(&mut state, ResultSlot::Failed(exc.clone()));
                Err(Error::Recipe(exc))
            }
            Err(err) => {
                let exc = ExceptionResult(err.into());
                self.set_result(&mut state, ResultSlot::Failed(exc.clone()));
                Err(Error::Recipe(exc))
            }
        }
    }
}

#[derive(Debug, PartialEq)]
struct ProtocolFailure(String);

impl fmt::Display for ProtocolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ProtocolFailure {}

impl fmt::Debug for NodeInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.state.lock().name)
    }
}

/// A handle to a node, used as the public return type of `Recipe::node`.
/// Cheap to clone (an `Arc` bump).
#[derive(Clone)]
pub struct Node(pub(crate) Arc<NodeInner>);

impl Node {
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    pub fn name(&self) -> String {
        self.0.name()
    }

    pub fn is_available(&self) -> bool {
        self.0.is_available()
    }

    pub fn start_time(&self) -> Option<u64> {
        self.0.start_time()
    }

    pub fn end_time(&self) -> Option<u64> {
        self.0.end_time()
    }

    pub fn result_ary(&self) -> Vec<Result<Value, ExceptionResult>> {
        self.0.result_ary()
    }

    /// Sub-result projection: `node[i]` in the source. Created on demand;
    /// out-of-range indices are a construction error once the recipe's
    /// result arity is known.
    pub fn get(&self, index: usize) -> Result<Input, Error> {
        if index >= self.0.recipe.result_names().len() {
            return Err(Error::Construction(format!(
                "sub-result index {index} out of range for recipe {} with {} result(s)",
                self.0.recipe.display_name(),
                self.0.recipe.result_names().len()
            )));
        }
        Ok(Input::SubResult(self.0.clone(), index))
    }

    /// Run a one-root graph rooted at this node. Shorthand for
    /// `run(vec![Input::Node(self)], options)` followed by unwrapping the
    /// single result.
    pub fn run(&self, options: crate::run::RunOptions) -> Result<Value, Error> {
        let results = crate::run::run(vec![Input::Node(self.0.clone())], options)?;
        results.into_iter().next().unwrap().get()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Use a node's whole result as another recipe's argument. For a
/// single-result recipe this is equivalent to `node.get(0)`, but reads
/// better at a call site that doesn't care about sub-result projections.
impl From<Node> for Input {
    fn from(node: Node) -> Input {
        Input::Node(node.0)
    }
}
