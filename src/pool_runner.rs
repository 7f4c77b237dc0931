use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};
use fnv::{FnvHashMap, FnvHashSet};
use log::warn;

use crate::error::Error;
use crate::node::Node;

/// Messages from a worker to the coordinator (§4.6).
enum Report {
    /// The worker stepped `node`; it now needs every node in the blocker
    /// list, already filtered down to non-available nodes.
    Wait(Node, Vec<Node>),
    /// The worker stepped `node` to completion.
    Done(Node),
    /// The worker hit an error while stepping. The worker exits after
    /// sending this.
    Exc(Error),
    /// The worker dequeued a stop sentinel and is exiting cleanly.
    Exit,
}

fn node_id(node: &Node) -> usize {
    node.id()
}

/// Build a runner bound to a fixed-size worker pool (C7). `pool_size` must
/// be at least 1.
pub fn thread_pool_runner(
    pool_size: usize,
) -> impl Fn(Vec<Node>) -> Result<(), Error> + Send + Sync + 'static {
    assert!(pool_size >= 1, "thread_pool_runner requires pool_size >= 1");
    move |pending| run_pool(pending, pool_size)
}

pub(crate) fn run_pool(pending: Vec<Node>, pool_size: usize) -> Result<(), Error> {
    let (runnable_tx, runnable_rx) = unbounded::<Option<Node>>();
    let (report_tx, report_rx) = unbounded::<Report>();
    let abort = Arc::new(AtomicBool::new(false));

    let workers: Vec<_> = (0..pool_size)
        .map(|_| {
            let runnable_rx = runnable_rx.clone();
            let report_tx = report_tx.clone();
            let abort = abort.clone();
            thread::spawn(move || worker_loop(runnable_rx, report_tx, abort))
        })
        .collect();
    // Workers each hold their own clone; drop the coordinator's receiver
    // clone reference count contribution so closing only depends on the
    // workers themselves and this function.
    drop(runnable_rx);

    let mut blocked_on: FnvHashMap<usize, Vec<Node>> = FnvHashMap::default();
    let mut blocking: FnvHashMap<usize, Vec<Node>> = FnvHashMap::default();
    let mut active: FnvHashSet<usize> = FnvHashSet::default();
    let mut live_workers = pool_size;

    for node in pending {
        if !node.is_available() {
            let id = node_id(&node);
            if active.insert(id) {
                let _ = runnable_tx.send(Some(node));
            }
        }
    }

    let result = run_coordinator_loop(
        &report_rx,
        &runnable_tx,
        &mut blocked_on,
        &mut blocking,
        &mut active,
        &mut live_workers,
    );

    // Teardown: always, even on error.
    abort.store(true, Ordering::SeqCst);
    for _ in 0..pool_size {
        let _ = runnable_tx.send(None);
    }
    let mut discarded = 0u32;
    while live_workers > 0 {
        match report_rx.recv() {
            Ok(Report::Exc(_)) | Ok(Report::Exit) => live_workers -= 1,
            Ok(_) => discarded += 1,
            Err(_) => break,
        }
    }
    if discarded > 0 {
        warn!("pool runner teardown discarded {discarded} report(s) from in-flight steps");
    }
    for w in workers {
        let _ = w.join();
    }

    result?;

    if !blocked_on.is_empty() || !blocking.is_empty() {
        return Err(Error::Protocol("Unexpectedly blocked nodes in the end.".to_string()));
    }
    Ok(())
}

fn run_coordinator_loop(
    report_rx: &Receiver<Report>,
    runnable_tx: &Sender<Option<Node>>,
    blocked_on: &mut FnvHashMap<usize, Vec<Node>>,
    blocking: &mut FnvHashMap<usize, Vec<Node>>,
    active: &mut FnvHashSet<usize>,
    live_workers: &mut usize,
) -> Result<(), Error> {
    while !active.is_empty() {
        match report_rx.recv() {
            Ok(Report::Wait(node, blockers)) => {
                let nid = node_id(&node);
                active.remove(&nid);
                for blocker in &blockers {
                    let bid = node_id(blocker);
                    blocking.entry(bid).or_default().push(node.clone());
                    if !active.contains(&bid) && !blocked_on.contains_key(&bid) {
                        active.insert(bid);
                        let _ = runnable_tx.send(Some(blocker.clone()));
                    }
                }
                blocked_on.insert(nid, blockers);
            }
            Ok(Report::Done(node)) => {
                let nid = node_id(&node);
                active.remove(&nid);
                blocked_on.remove(&nid);
                if let Some(waiters) = blocking.remove(&nid) {
                    for waiter in waiters {
                        let wid = node_id(&waiter);
                        if let Some(remaining) = blocked_on.get_mut(&wid) {
                            remaining.retain(|b| node_id(b) != nid);
                            if remaining.is_empty() {
                                blocked_on.remove(&wid);
                                active.insert(wid);
                                let _ = runnable_tx.send(Some(waiter));
                            }
                        }
                    }
                }
            }
            Ok(Report::Exc(err)) => {
                *live_workers -= 1;
                return Err(err);
            }
            Ok(Report::Exit) => {
                return Err(Error::Protocol(
                    "a pool worker exited before the run completed".to_string(),
                ));
            }
            Err(_) => {
                return Err(Error::Protocol(
                    "pool worker threads disconnected unexpectedly".to_string(),
                ));
            }
        }
    }
    Ok(())
}

/// A worker thread's body: pull runnable nodes and step them until each
/// either blocks on something or completes, reporting either outcome back
/// to the coordinator. A single dequeue may step the same node several
/// times in a row — matching the simple runner's "step again without
/// returning control" behavior whenever a yielded wait list is empty after
/// filtering.
fn worker_loop(runnable_rx: Receiver<Option<Node>>, report_tx: Sender<Report>, abort: Arc<AtomicBool>) {
    loop {
        if abort.load(Ordering::SeqCst) {
            let _ = report_tx.send(Report::Exit);
            return;
        }
        let node = match runnable_rx.recv() {
            Ok(Some(node)) => node,
            Ok(None) => {
                let _ = report_tx.send(Report::Exit);
                return;
            }
            Err(_) => return,
        };

        loop {
            match node.0.advance() {
                Ok(Some(blockers)) => {
                    if blockers.is_empty() {
                        continue;
                    }
                    let blockers: Vec<Node> = blockers.into_iter().map(Node).collect();
                    let _ = report_tx.send(Report::Wait(node, blockers));
                    break;
                }
                Ok(None) => {
                    let _ = report_tx.send(Report::Done(node));
                    break;
                }
                Err(err) => {
                    let _ = report_tx.send(Report::Exc(err));
                    return;
                }
            }
        }
    }
}
