use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::clock::{Clock, WallClock};
use crate::context::{bind_context, fix_context_placeholders};
use crate::error::Error;
use crate::input::{Context, Input};
use crate::node::Node;
use crate::simple_runner::simple_runner;
use crate::value::Value;
use crate::walker::{discover, rename};

/// A scheduling strategy: given the pending root nodes of a run, step them
/// to completion or return the first error. Both `simple_runner` and
/// `thread_pool_runner(n)` satisfy this signature.
pub type Runner = dyn Fn(Vec<Node>) -> Result<(), Error> + Send + Sync;

/// Options accepted by [`run`] and [`crate::node::Node::run`] (C8).
pub struct RunOptions {
    pub context: BTreeMap<String, Value>,
    pub runner: Arc<Runner>,
    /// When set, discovered nodes are appended here (in discovery order)
    /// instead of having their `inputs` severed, per the instrumentation
    /// contract in §6.
    pub debug_nodes: Option<Arc<Mutex<Vec<Node>>>>,
    pub clock: Arc<dyn Clock>,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            context: BTreeMap::new(),
            runner: Arc::new(simple_runner),
            debug_nodes: None,
            clock: Arc::new(WallClock),
        }
    }
}

impl RunOptions {
    pub fn with_context(mut self, context: BTreeMap<String, Value>) -> Self {
        self.context = context;
        self
    }

    pub fn with_runner(mut self, runner: Arc<Runner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_debug_nodes(mut self, sink: Arc<Mutex<Vec<Node>>>) -> Self {
        self.debug_nodes = Some(sink);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// The run driver (C8): discover reachable nodes, uniquify their display
/// names, wire up context placeholders, optionally strip backward
/// references for early reclamation, then hand the roots to the chosen
/// runner. On success every input in the returned vector is available.
pub fn run(inputs: Vec<Input>, options: RunOptions) -> Result<Vec<Input>, Error> {
    let context: Context = Arc::new(options.context);

    let mut roots: Vec<Node> = Vec::new();
    let mut seen: HashSet<usize> = HashSet::new();
    for input in &inputs {
        if input.is_available() {
            continue;
        }
        match input.as_node() {
            Some(node) => {
                if seen.insert(Arc::as_ptr(&node) as usize) {
                    roots.push(Node(node));
                }
            }
            None => {
                return Err(Error::Wiring(
                    "run() was given an unavailable input that is not a Node".to_string(),
                ));
            }
        }
    }

    log::debug!("run: {} root(s), {} pending", inputs.len(), roots.len());

    let nodes = discover(&inputs);
    rename(&nodes);
    fix_context_placeholders(&nodes);
    bind_context(&nodes, &context)?;

    log::debug!("run: discovered {} node(s)", nodes.len());

    match &options.debug_nodes {
        Some(sink) => {
            let mut guard = sink.lock();
            guard.extend(nodes.iter().cloned().map(Node));
        }
        None => {
            for node in &nodes {
                node.sever_inputs();
            }
        }
    }

    for node in &nodes {
        node.set_clock(options.clock.clone());
    }

    // `nodes` is a full list of strong references to every discovered node,
    // kept around only for the setup passes above. Drop it before stepping:
    // each body already holds its own clone of the Inputs it waits on, so
    // once the last node that reads an intermediate result drops that
    // Input (on completion), the intermediate itself becomes unreachable —
    // unless this Vec is still holding every node alive behind it (§5).
    drop(nodes);

    (options.runner)(roots)?;

    log::debug!("run: complete");
    Ok(inputs)
}
