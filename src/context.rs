use std::sync::Arc;

use crate::error::Error;
use crate::input::{Context, Input};
use crate::node::NodeInner;
use crate::recipe::{context_key_for, is_context_param};

/// Step 1 of C5: for each node, for each positional input at an index
/// whose parameter name is `"context"` or ends with `"_context"` and which
/// is currently a `Constant(Value::None)` — i.e. the caller either omitted
/// a non-trailing context argument by passing an explicit null, or a
/// trailing one was left as a literal `None` rather than omitted outright
/// — replace it in place with a fresh Context placeholder (§4.4).
pub fn fix_context_placeholders(nodes: &[Arc<NodeInner>]) {
    for node in nodes {
        let Some(inputs) = node.inputs() else { continue };
        let param_names = node.recipe.param_names();
        for (index, input) in inputs.iter().enumerate() {
            let Some(param) = param_names.get(index) else { continue };
            if !is_context_param(param) {
                continue;
            }
            if matches!(input, Input::Constant(crate::value::Value::None)) {
                node.set_input_at(index, Input::context(context_key_for(param)));
            }
        }
    }
}

/// Step 2 of C5: bind every Context placeholder reachable from any
/// discovered node — recursing into Input sequences — to the run's
/// context map.
pub fn bind_context(nodes: &[Arc<NodeInner>], context: &Context) -> Result<(), Error> {
    for node in nodes {
        let Some(inputs) = node.inputs() else { continue };
        for input in &inputs {
            for leaf in input.flatten_sequences() {
                if let Input::Context(cell) = leaf {
                    cell.bind(context.clone())?;
                }
            }
        }
    }
    Ok(())
}
