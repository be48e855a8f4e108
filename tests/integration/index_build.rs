//! Index Build Tests
//!
//! An index build registers its key, waits until every transaction that
//! was running at registration has finished, and then scans in a fresh
//! transaction. Writers that begin after registration feed the hook
//! directly, so every matching vertex reaches the hook at least once.

#![allow(missing_docs)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use penumbra::storage::index::{IndexHook, IndexKey};
use penumbra::storage::{Graph, GraphOptions, IndexBuildCfg, VersionChain, Vertex};
use penumbra::types::{Gid, LabelId, MvccError, PropId, Result};
use penumbra::Transaction;

#[derive(Default)]
struct RecordingHook {
    seen: Mutex<Vec<Gid>>,
}

impl RecordingHook {
    fn seen(&self) -> Vec<Gid> {
        let mut seen = self.seen.lock().clone();
        seen.sort();
        seen.dedup();
        seen
    }
}

impl IndexHook for RecordingHook {
    fn insert(&self, _key: IndexKey, chain: &Arc<VersionChain<Vertex>>, _vertex: &Vertex, _tx: &Transaction) {
        self.seen.lock().push(chain.gid());
    }
}

fn fast_backoff() -> GraphOptions {
    GraphOptions::new().index_build(IndexBuildCfg {
        initial_backoff_us: 100,
        max_backoff_us: 1_000,
    })
}

fn key() -> IndexKey {
    IndexKey::new(LabelId(1), PropId(1))
}

/// The scan must not start before a writer that was active at registration
/// finishes, and must then include that writer's vertex.
#[test]
fn build_waits_for_running_writer() -> Result<()> {
    let graph = Graph::open(fast_backoff());
    let writer = graph.access();
    let pending = writer.insert_vertex(None)?;
    pending.add_label(LabelId(1))?;
    pending.set_property(PropId(1), 42)?;
    let pending = pending.gid();

    let hook = Arc::new(RecordingHook::default());
    let done = Arc::new(AtomicBool::new(false));
    let builder = {
        let graph = Arc::clone(&graph);
        let hook = Arc::clone(&hook);
        let done = Arc::clone(&done);
        thread::spawn(move || -> Result<()> {
            let dba = graph.access();
            dba.build_index(key(), hook)?;
            done.store(true, Ordering::SeqCst);
            dba.commit()
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert!(!done.load(Ordering::SeqCst), "build finished while a writer was running");
    assert!(hook.seen().is_empty());

    writer.commit()?;
    builder.join().expect("builder thread panicked")?;
    assert!(done.load(Ordering::SeqCst));
    assert_eq!(hook.seen(), vec![pending]);
    assert_eq!(graph.index_keys(), vec![key()]);
    Ok(())
}

/// Two transactions building different indexes at the same time do not
/// wait on each other.
#[test]
fn concurrent_builders_do_not_deadlock() -> Result<()> {
    let graph = Graph::open(fast_backoff());
    let setup = graph.access();
    for label in 1..=2 {
        let vertex = setup.insert_vertex(None)?;
        vertex.add_label(LabelId(label))?;
        vertex.set_property(PropId(1), i64::from(label))?;
    }
    setup.commit()?;

    let handles: Vec<_> = (1..=2u32)
        .map(|label| {
            let graph = Arc::clone(&graph);
            thread::spawn(move || -> Result<Vec<Gid>> {
                let hook = Arc::new(RecordingHook::default());
                let dba = graph.access();
                dba.build_index(IndexKey::new(LabelId(label), PropId(1)), hook.clone())?;
                dba.commit()?;
                Ok(hook.seen())
            })
        })
        .collect();

    for handle in handles {
        let seen = handle.join().expect("builder thread panicked")?;
        assert_eq!(seen.len(), 1);
    }
    let mut keys = graph.index_keys();
    keys.sort_by_key(|key| key.label);
    assert_eq!(
        keys,
        vec![
            IndexKey::new(LabelId(1), PropId(1)),
            IndexKey::new(LabelId(2), PropId(1))
        ]
    );
    Ok(())
}

/// A writer that begins after registration reaches the hook through its own
/// writes, whether or not the scan also finds the vertex.
#[test]
fn later_writers_feed_the_hook() -> Result<()> {
    let graph = Graph::open(fast_backoff());
    let hook = Arc::new(RecordingHook::default());
    let builder = graph.access();
    builder.build_index(key(), hook.clone())?;
    builder.commit()?;
    assert!(hook.seen().is_empty());

    let writer = graph.access();
    let labeled_first = writer.insert_vertex(None)?;
    labeled_first.add_label(LabelId(1))?;
    labeled_first.set_property(PropId(1), "v")?;
    let unrelated = writer.insert_vertex(None)?;
    unrelated.add_label(LabelId(2))?;
    unrelated.set_property(PropId(1), "w")?;
    let labeled_first = labeled_first.gid();
    writer.commit()?;

    assert_eq!(hook.seen(), vec![labeled_first]);
    Ok(())
}

/// Registering a key twice fails for any transaction, and a failed build
/// leaves the first registration in place.
#[test]
fn duplicate_key_is_rejected() -> Result<()> {
    let graph = Graph::open(fast_backoff());
    let first = graph.access();
    first.build_index(key(), Arc::new(RecordingHook::default()))?;
    first.commit()?;

    let second = graph.access();
    assert_eq!(
        second.build_index(key(), Arc::new(RecordingHook::default())),
        Err(MvccError::IndexExists {
            label: LabelId(1),
            prop: PropId(1)
        })
    );
    second.abort()?;
    assert_eq!(graph.index_keys(), vec![key()]);
    Ok(())
}
