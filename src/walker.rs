use std::collections::VecDeque;
use std::sync::Arc;

use fnv::{FnvHashMap, FnvHashSet};
use itertools::Itertools;

use crate::input::Input;
use crate::node::NodeInner;

/// Key a visited set on the node's address rather than any value, matching
/// the "Visited set is keyed by node identity" rule (§4.3) — two distinct
/// nodes that happen to carry equal-looking state must still be treated as
/// distinct.
fn identity(node: &Arc<NodeInner>) -> usize {
    Arc::as_ptr(node) as usize
}

/// `discover(roots)` (C4): every transitively-reachable non-available node,
/// in breadth-first-by-depth order, roots first. A sub-result projection
/// counts as its parent node; an Input sequence counts as its members.
pub fn discover(roots: &[Input]) -> Vec<Arc<NodeInner>> {
    let mut queue: VecDeque<Arc<NodeInner>> = VecDeque::new();
    let mut visited: FnvHashSet<usize> = FnvHashSet::default();
    let mut order: Vec<Arc<NodeInner>> = Vec::new();

    for root in roots {
        enqueue_roots(root, &mut queue, &mut visited);
    }

    while let Some(node) = queue.pop_front() {
        if node.is_available() {
            continue;
        }
        order.push(node.clone());
        if let Some(inputs) = node.inputs() {
            for input in &inputs {
                enqueue_roots(input, &mut queue, &mut visited);
            }
        }
    }

    order
}

fn enqueue_roots(input: &Input, queue: &mut VecDeque<Arc<NodeInner>>, visited: &mut FnvHashSet<usize>) {
    match input {
        Input::Sequence(items) => {
            for item in items.iter() {
                enqueue_roots(item, queue, visited);
            }
        }
        _ => {
            if let Some(node) = input.as_node() {
                if node.is_available() {
                    return;
                }
                let id = identity(&node);
                if visited.insert(id) {
                    queue.push_back(node);
                }
            }
        }
    }
}

/// `rename(nodes)` (C4): append `#k` suffixes so display names are unique.
/// Names occurring exactly once are untouched. For a name occurring N>1
/// times, walk the discovered order back-to-front and number occurrences
/// `#N, #N-1, …, #1` as they're encountered, so the first-discovered
/// occurrence gets `#1` (§4.3).
pub fn rename(nodes: &[Arc<NodeInner>]) {
    let counts: FnvHashMap<String, usize> = nodes.iter().map(|n| n.name()).counts().into_iter().collect();

    let mut remaining: FnvHashMap<String, usize> = counts.clone();
    for node in nodes.iter().rev() {
        let name = node.name();
        if counts[&name] <= 1 {
            continue;
        }
        let suffix = remaining[&name];
        *remaining.get_mut(&name).unwrap() -= 1;
        node.set_name(format!("{name}#{suffix}"));
    }
}
