use crate::error::Error;
use crate::node::Node;

/// Stack-based depth-first stepping in the caller's thread (C6). The
/// default runner.
pub fn simple_runner(pending: Vec<Node>) -> Result<(), Error> {
    let mut stack: Vec<Node> = pending;

    'outer: while let Some(top) = stack.last().cloned() {
        if top.is_available() {
            stack.pop();
            continue 'outer;
        }

        loop {
            match top.0.advance()? {
                Some(blockers) => {
                    if blockers.is_empty() {
                        // The coroutine's most recent wait token was fully
                        // satisfied already; advance it again without
                        // returning control to the outer stack loop.
                        continue;
                    }
                    for node in blockers {
                        stack.push(Node(node));
                    }
                    continue 'outer;
                }
                None => {
                    // Result was set during this step.
                    stack.pop();
                    continue 'outer;
                }
            }
        }
    }

    Ok(())
}
