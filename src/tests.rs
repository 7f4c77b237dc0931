use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
    constant_input, context_input, input_sequence, run, thread_pool_runner, Error, ExceptionResult,
    Input, NeverYieldsBody, Node, NodeBody, Recipe, RecipeFailure, RunOptions, Runner, StepResult,
    Value,
};

// --- Test-only recipes, one per scenario in SPEC_FULL.md §8. ---------------

fn next_fib_recipe() -> Arc<Recipe> {
    Recipe::from_fn(
        "next_fib",
        vec!["a".to_string(), "b".to_string()],
        vec!["a_next".to_string(), "b_next".to_string()],
        false,
        |values| -> Result<Value, Box<dyn RecipeFailure>> {
            let a = values[0].as_int().expect("a must be an int");
            let b = values[1].as_int().expect("b must be an int");
            Ok(Value::tuple([Value::Int(b), Value::Int(a + b)]))
        },
    )
}

fn area_recipe() -> Arc<Recipe> {
    Recipe::from_fn(
        "area",
        vec!["a".to_string(), "b".to_string()],
        vec!["result".to_string()],
        false,
        |values| -> Result<Value, Box<dyn RecipeFailure>> {
            let a = values[0].as_int().expect("a must be an int");
            let b = values[1].as_int().expect("b must be an int");
            Ok(Value::Int(a * b))
        },
    )
}

fn circumference_recipe() -> Arc<Recipe> {
    Recipe::from_fn(
        "circumference",
        vec!["a".to_string(), "b".to_string()],
        vec!["result".to_string()],
        false,
        |values| -> Result<Value, Box<dyn RecipeFailure>> {
            let a = values[0].as_int().expect("a must be an int");
            let b = values[1].as_int().expect("b must be an int");
            Ok(Value::Int(2 * (a + b)))
        },
    )
}

/// Unlike `PlainBody`, waits only on the condition first, then forwards to
/// whichever branch is selected — the other branch is never stepped.
struct CondBody {
    inputs: Vec<Input>,
    chosen: Option<usize>,
}

impl NodeBody for CondBody {
    fn step(&mut self) -> Result<StepResult, Box<dyn RecipeFailure>> {
        if self.chosen.is_none() {
            let c = &self.inputs[0];
            if !c.is_available() {
                return Ok(StepResult::Wait(vec![c.clone()]));
            }
            let value = c.get().expect("available input failed to resolve");
            self.chosen = Some(if value.as_bool() { 1 } else { 2 });
        }
        Ok(StepResult::Forward(self.inputs[self.chosen.unwrap()].clone()))
    }
}

fn cond_recipe() -> Arc<Recipe> {
    Recipe::new(
        "cond",
        vec!["c".to_string(), "true_input".to_string(), "false_input".to_string()],
        vec!["result".to_string()],
        false,
        |inputs| Box::new(CondBody { inputs, chosen: None }) as Box<dyn NodeBody>,
    )
}

/// Scans its arguments in order, stopping at the first truthy one (or the
/// last, if none are); never waits on arguments past the one it returns.
struct OrAllBody {
    inputs: Vec<Input>,
    next: usize,
}

impl NodeBody for OrAllBody {
    fn step(&mut self) -> Result<StepResult, Box<dyn RecipeFailure>> {
        loop {
            let input = &self.inputs[self.next];
            if !input.is_available() {
                return Ok(StepResult::Wait(vec![input.clone()]));
            }
            let value = input.get().expect("available input failed to resolve");
            let is_last = self.next == self.inputs.len() - 1;
            if value.as_bool() || is_last {
                return Ok(StepResult::Done(value));
            }
            self.next += 1;
        }
    }
}

fn or_all_recipe() -> Arc<Recipe> {
    Recipe::new(
        "or_all",
        vec!["args".to_string()],
        vec!["result".to_string()],
        true,
        |inputs| Box::new(OrAllBody { inputs, next: 0 }) as Box<dyn NodeBody>,
    )
}

fn as_items(v: Value) -> Vec<Value> {
    match v {
        Value::Tuple(items) | Value::List(items) => items.to_vec(),
        other => vec![other],
    }
}

fn add_tuple_recipe() -> Arc<Recipe> {
    Recipe::from_fn(
        "add_tuple",
        vec!["a".to_string(), "b".to_string()],
        vec!["result".to_string()],
        false,
        |mut values| -> Result<Value, Box<dyn RecipeFailure>> {
            let b = values.pop().unwrap();
            let a = values.pop().unwrap();
            let mut items = as_items(a);
            items.extend(as_items(b));
            Ok(Value::Tuple(items.into()))
        },
    )
}

fn cmul_recipe() -> Arc<Recipe> {
    Recipe::from_fn(
        "cmul",
        vec!["a".to_string(), "b_context".to_string()],
        vec!["result".to_string()],
        false,
        |values| -> Result<Value, Box<dyn RecipeFailure>> {
            let a = values[0].as_int().expect("a must be an int");
            let b = values[1].as_int().expect("b_context must be an int");
            Ok(Value::Int(a * b))
        },
    )
}

fn xkeys_recipe() -> Arc<Recipe> {
    Recipe::from_fn(
        "xkeys",
        vec!["context".to_string()],
        vec!["result".to_string()],
        false,
        |values| -> Result<Value, Box<dyn RecipeFailure>> {
            let ctx = match &values[0] {
                Value::Context(map) => map.clone(),
                other => panic!("xkeys expected a context value, got {other:?}"),
            };
            let keys: Vec<Value> = ctx.keys().cloned().map(Value::from).collect();
            Ok(Value::from(keys))
        },
    )
}

#[derive(Debug, PartialEq)]
struct BadLuck;

impl fmt::Display for BadLuck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bad luck.")
    }
}

impl std::error::Error for BadLuck {}

fn bad_luck_recipe() -> Arc<Recipe> {
    Recipe::from_fn(
        "bad_luck",
        vec![],
        vec!["result".to_string()],
        false,
        |_values| -> Result<Value, Box<dyn RecipeFailure>> { Err(Box::new(BadLuck)) },
    )
}

fn noop_recipe() -> Arc<Recipe> {
    Recipe::new(
        "noop",
        vec![],
        vec!["result".to_string()],
        false,
        |_inputs| Box::new(NeverYieldsBody) as Box<dyn NodeBody>,
    )
}

/// Drop-logging fixture for the early-reclamation regression (scenario 8):
/// pushes its value on construction, and the negated value on drop.
struct LoggingNumber {
    value: i64,
    log: Arc<Mutex<Vec<i64>>>,
}

impl LoggingNumber {
    fn new(value: i64, log: Arc<Mutex<Vec<i64>>>) -> Self {
        log.lock().push(value);
        LoggingNumber { value, log }
    }
}

impl Drop for LoggingNumber {
    fn drop(&mut self) {
        self.log.lock().push(-self.value);
    }
}

impl fmt::Debug for LoggingNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LoggingNumber({})", self.value)
    }
}

fn as_i64(v: &Value) -> i64 {
    match v {
        Value::Int(i) => *i,
        Value::Opaque(_) => v.downcast_opaque::<LoggingNumber>().expect("expected an int or LoggingNumber").value,
        other => panic!("not a number: {other:?}"),
    }
}

fn add_recipe(log: Arc<Mutex<Vec<i64>>>) -> Arc<Recipe> {
    Recipe::from_fn(
        "add",
        vec!["a".to_string(), "b".to_string()],
        vec!["result".to_string()],
        false,
        move |values| -> Result<Value, Box<dyn RecipeFailure>> {
            let a = as_i64(&values[0]);
            let b = as_i64(&values[1]);
            Ok(Value::opaque(LoggingNumber::new(a + b, log.clone())))
        },
    )
}

// --- Scenarios --------------------------------------------------------------

#[test]
fn fibonacci_chain() {
    let _logger = env_logger::try_init();
    let next_fib = next_fib_recipe();

    let n1 = next_fib.node(vec![constant_input(5), constant_input(7)]).unwrap();
    let n2 = next_fib.node(vec![n1.get(0).unwrap(), n1.get(1).unwrap()]).unwrap();
    let n3 = next_fib.node(vec![n2.get(0).unwrap(), n2.get(1).unwrap()]).unwrap();

    let results = run(vec![n3.get(0).unwrap(), n3.get(1).unwrap()], RunOptions::default()).unwrap();
    assert_eq!(results[0].get().unwrap(), Value::Int(19));
    assert_eq!(results[1].get().unwrap(), Value::Int(31));

    let n = next_fib.node(vec![constant_input(20), constant_input(30)]).unwrap();
    let b_next = n.get(1).unwrap();
    let value = run(vec![b_next], RunOptions::default()).unwrap()[0].get().unwrap();
    assert_eq!(value, Value::Int(50));
}

#[test]
fn conditional() {
    let _logger = env_logger::try_init();
    let next_fib = next_fib_recipe();
    let area = area_recipe();
    let circumference = circumference_recipe();
    let cond = cond_recipe();

    let nf = next_fib.node(vec![constant_input(5), constant_input(7)]).unwrap();
    let c = nf.get(1).unwrap();
    let area_node = area.node(vec![constant_input(5), constant_input(7)]).unwrap();
    let circ_node = circumference.node(vec![constant_input(5), constant_input(7)]).unwrap();
    let cond_node = cond.node(vec![c, area_node.into(), circ_node.into()]).unwrap();

    let result = cond_node.run(RunOptions::default()).unwrap();
    assert_eq!(result, Value::Int(35));
}

#[test]
fn or_all_short_circuits_on_first_truthy() {
    let _logger = env_logger::try_init();
    let or_all = or_all_recipe();
    let node = or_all
        .node(vec![
            constant_input(false),
            constant_input(Value::tuple(Vec::<Value>::new())),
            constant_input(Value::from(Vec::<Value>::new())),
            constant_input(33),
            constant_input(0),
            constant_input(44),
            constant_input(0.0),
        ])
        .unwrap();
    let result = node.run(RunOptions::default()).unwrap();
    assert_eq!(result, Value::Int(33));
}

#[test]
fn input_sequence_unwrapping() {
    let _logger = env_logger::try_init();
    let area = area_recipe();
    let add_tuple = add_tuple_recipe();

    let area_node = area.node(vec![constant_input(2), constant_input(3)]).unwrap();
    let seq = input_sequence(vec![constant_input(5), area_node.into()]);
    let node = add_tuple.node(vec![seq, constant_input(Value::from(vec![7_i64]))]).unwrap();

    let result = node.run(RunOptions::default()).unwrap();
    assert_eq!(result, Value::Tuple(Arc::from([Value::Int(5), Value::Int(6), Value::Int(7)])));
}

#[test]
fn context_keys_and_auto_wiring() {
    let _logger = env_logger::try_init();
    let xkeys = xkeys_recipe();
    let cmul = cmul_recipe();

    let xkeys_node = xkeys.node(vec![]).unwrap();
    let mut ctx = BTreeMap::new();
    ctx.insert("Jan".to_string(), Value::Int(0));
    ctx.insert("Feb".to_string(), Value::Int(1));
    let result = xkeys_node.run(RunOptions::default().with_context(ctx)).unwrap();
    assert_eq!(result, Value::from(vec![Value::from("Feb"), Value::from("Jan")]));

    let explicit_node = cmul.node(vec![constant_input(5), context_input(Some("x"))]).unwrap();
    let mut ctx = BTreeMap::new();
    ctx.insert("x".to_string(), Value::Int(8));
    let result = explicit_node.run(RunOptions::default().with_context(ctx)).unwrap();
    assert_eq!(result, Value::Int(40));

    let auto_node = cmul.node(vec![constant_input(5)]).unwrap();
    let mut ctx = BTreeMap::new();
    ctx.insert("b".to_string(), Value::Int(8));
    let result = auto_node.run(RunOptions::default().with_context(ctx)).unwrap();
    assert_eq!(result, Value::Int(40));
}

#[test]
fn exception_propagates_under_both_runners() {
    let _logger = env_logger::try_init();
    let area = area_recipe();
    let bad_luck = bad_luck_recipe();

    let runners: Vec<Arc<Runner>> = vec![
        Arc::new(crate::simple_runner),
        Arc::new(thread_pool_runner(3)),
    ];
    for runner in runners {
        let node = area
            .node(vec![
                bad_luck.node(vec![]).unwrap().into(),
                bad_luck.node(vec![]).unwrap().into(),
            ])
            .unwrap();
        let err = node.run(RunOptions::default().with_runner(runner)).unwrap_err();
        match err {
            Error::Recipe(exc) => assert_eq!(exc, ExceptionResult::new(BadLuck)),
            other => panic!("expected Error::Recipe, got {other:?}"),
        }
    }
}

#[test]
fn exception_visible_through_instrumentation() {
    let _logger = env_logger::try_init();
    let area = area_recipe();
    let bad_luck = bad_luck_recipe();
    let node = area
        .node(vec![
            bad_luck.node(vec![]).unwrap().into(),
            bad_luck.node(vec![]).unwrap().into(),
        ])
        .unwrap();

    let sink = Arc::new(Mutex::new(Vec::new()));
    let _ = node.run(RunOptions::default().with_debug_nodes(sink.clone()));

    let recorded = sink.lock();
    let bad_node = recorded
        .iter()
        .find(|n: &&Node| n.name().starts_with("bad_luck"))
        .expect("bad_luck node should have been discovered");
    let ary = bad_node.result_ary();
    assert_eq!(ary.len(), 1);
    match &ary[0] {
        Err(exc) => assert_eq!(*exc, ExceptionResult::new(BadLuck)),
        Ok(v) => panic!("expected a failure, got {v:?}"),
    }
}

#[test]
fn instrumentation_ordering_and_dead_branch() {
    let _logger = env_logger::try_init();
    let next_fib = next_fib_recipe();
    let area = area_recipe();
    let circumference = circumference_recipe();
    let cond = cond_recipe();

    let nf1 = next_fib.node(vec![constant_input(5), constant_input(7)]).unwrap();
    let nf2 = next_fib.node(vec![nf1.get(0).unwrap(), nf1.get(1).unwrap()]).unwrap();
    let area_node = area.node(vec![constant_input(5), constant_input(7)]).unwrap();
    let circ_node = circumference.node(vec![constant_input(5), constant_input(7)]).unwrap();
    let d = nf2.get(1).unwrap();
    let cond_node = cond.node(vec![d, area_node.clone().into(), circ_node.clone().into()]).unwrap();

    let sink = Arc::new(Mutex::new(Vec::new()));
    let result = cond_node
        .run(
            RunOptions::default()
                .with_debug_nodes(sink.clone())
                .with_clock(Arc::new(crate::FakeClock::new(10))),
        )
        .unwrap();
    assert_eq!(result, Value::Int(35));

    let names: Vec<String> = sink.lock().iter().map(Node::name).collect();
    assert_eq!(names, vec!["cond", "next_fib#1", "area", "circumference", "next_fib#2"]);

    assert!(circ_node.start_time().is_none());
    assert!(circ_node.end_time().is_none());

    for node in [&cond_node, &area_node] {
        assert!(node.start_time().is_some());
        assert!(node.end_time().is_some());
        assert!(node.start_time().unwrap() <= node.end_time().unwrap());
    }
    assert!(area_node.end_time().unwrap() <= cond_node.end_time().unwrap());
}

#[test]
fn early_reclamation_chain_of_100() {
    let _logger = env_logger::try_init();

    fn run_chain(runner: Arc<Runner>) -> Vec<i64> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let add = add_recipe(log.clone());

        let mut current: Input = constant_input(Value::opaque(LoggingNumber::new(1, log.clone())));
        let mut last_node = None;
        for _ in 0..100 {
            let node = add.node(vec![current, constant_input(1)]).unwrap();
            current = node.clone().into();
            last_node = Some(node);
        }

        let result = last_node.unwrap().run(RunOptions::default().with_runner(runner)).unwrap();
        assert_eq!(as_i64(&result), 101);
        log.lock().clone()
    }

    let mut expected = vec![1i64];
    for k in 2..=101i64 {
        expected.push(k);
        expected.push(-(k - 1));
    }

    let runners: Vec<Arc<Runner>> = vec![
        Arc::new(crate::simple_runner),
        Arc::new(thread_pool_runner(1)),
        Arc::new(thread_pool_runner(3)),
    ];
    for runner in runners {
        assert_eq!(run_chain(runner), expected);
    }
}

#[test]
fn noop_recipe_fails_the_protocol() {
    let _logger = env_logger::try_init();
    let noop = noop_recipe();
    let node = noop.node(vec![]).unwrap();
    let err = node.run(RunOptions::default()).unwrap_err();
    match err {
        Error::Recipe(exc) => assert_eq!(exc.to_string(), "No values yielded by recipe iterator."),
        other => panic!("expected Error::Recipe, got {other:?}"),
    }
}

/// Direct-call invocation (`Recipe::call`), matching the source's
/// `area(ConstantInput(5), 6) == 30` / `cond(0, 7, 8) == 8` /
/// `or_all(False, (), [], 33, 0, 44, 0.0) == 33` call-style assertions.
#[test]
fn direct_call_invocation() {
    let _logger = env_logger::try_init();
    let area = area_recipe();
    let cond = cond_recipe();
    let or_all = or_all_recipe();

    assert_eq!(area.call(vec![constant_input(5), constant_input(6)]).unwrap(), Value::Int(30));
    assert_eq!(
        cond.call(vec![constant_input(0), constant_input(7), constant_input(8)]).unwrap(),
        Value::Int(8)
    );
    assert_eq!(
        or_all
            .call(vec![
                constant_input(false),
                constant_input(Value::tuple(Vec::<Value>::new())),
                constant_input(Value::from(Vec::<Value>::new())),
                constant_input(33),
                constant_input(0),
                constant_input(44),
                constant_input(0.0),
            ])
            .unwrap(),
        Value::Int(33)
    );
}

/// Keyword-argument binding (`Recipe::node_kw`): arguments named out of
/// positional order still land in the right parameter slots.
#[test]
fn keyword_argument_binding() {
    let _logger = env_logger::try_init();
    let area = area_recipe();
    let node = area.node_kw(vec![("b", constant_input(6)), ("a", constant_input(5))]).unwrap();
    assert_eq!(node.run(RunOptions::default()).unwrap(), Value::Int(30));

    let err = area.node_kw(vec![("b", constant_input(6)), ("b", constant_input(7))])
        .unwrap_err();
    match err {
        Error::Construction(msg) => assert!(msg.contains("given more than once")),
        other => panic!("expected Error::Construction, got {other:?}"),
    }
}
