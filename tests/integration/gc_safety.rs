//! Garbage Collection Safety Tests
//!
//! Random interleavings of begin, update, commit, abort and collection
//! passes. After every step each open transaction must still read exactly
//! what it read before plus its own writes, and once everything is closed
//! a pass must leave only the versions a new transaction could observe.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use proptest::prelude::*;

use penumbra::storage::{GcCfg, Graph, GraphAccessor, GraphOptions};
use penumbra::types::{Gid, MvccError, PropId};

const VERTICES: usize = 3;
const SLOTS: usize = 4;
const VALUE: PropId = PropId(1);

#[derive(Debug, Clone)]
enum Operation {
    Begin,
    Update { slot: usize, vertex: usize, value: i64 },
    Commit { slot: usize },
    Abort { slot: usize },
    Collect,
}

fn arb_operation() -> impl Strategy<Value = Operation> {
    prop_oneof![
        2 => Just(Operation::Begin),
        4 => (0..SLOTS, 0..VERTICES, 1i64..1000)
            .prop_map(|(slot, vertex, value)| Operation::Update { slot, vertex, value }),
        2 => (0..SLOTS).prop_map(|slot| Operation::Commit { slot }),
        1 => (0..SLOTS).prop_map(|slot| Operation::Abort { slot }),
        2 => Just(Operation::Collect),
    ]
}

struct Open {
    dba: GraphAccessor,
    view: Vec<i64>,
    writes: BTreeMap<usize, i64>,
}

fn read(dba: &GraphAccessor, gid: Gid) -> Option<i64> {
    dba.find_vertex(gid, false)
        .ok()
        .flatten()
        .and_then(|vertex| vertex.property(VALUE))
        .and_then(|value| value.as_int())
}

fn seed() -> (Arc<Graph>, Vec<Gid>) {
    let graph = Graph::open(GraphOptions::new());
    let dba = graph.access();
    let gids = (0..VERTICES)
        .map(|_| {
            let vertex = dba.insert_vertex(None).unwrap();
            vertex.set_property(VALUE, 0).unwrap();
            vertex.gid()
        })
        .collect();
    dba.commit().unwrap();
    (graph, gids)
}

fn assert_views(slots: &[Option<Open>], gids: &[Gid]) {
    for open in slots.iter().flatten() {
        for (i, gid) in gids.iter().enumerate() {
            assert_eq!(
                read(&open.dba, *gid),
                Some(open.view[i]),
                "tx {} lost its view of vertex {}",
                open.dba.transaction().id(),
                gid
            );
        }
    }
}

fn run(ops: &[Operation]) {
    let (graph, gids) = seed();
    let mut committed = vec![0i64; VERTICES];
    let mut slots: Vec<Option<Open>> = (0..SLOTS).map(|_| None).collect();

    for op in ops {
        match *op {
            Operation::Begin => {
                if let Some(slot) = slots.iter_mut().find(|slot| slot.is_none()) {
                    *slot = Some(Open {
                        dba: graph.access(),
                        view: committed.clone(),
                        writes: BTreeMap::new(),
                    });
                }
            }
            Operation::Update { slot, vertex, value } => {
                let Some(open) = slots[slot].as_mut() else {
                    continue;
                };
                let accessor = open
                    .dba
                    .find_vertex(gids[vertex], false)
                    .unwrap()
                    .expect("vertices are never deleted");
                match accessor.set_property(VALUE, value) {
                    Ok(()) => {
                        open.dba.advance_command().unwrap();
                        open.view[vertex] = value;
                        open.writes.insert(vertex, value);
                    }
                    Err(MvccError::Serialization { .. }) => {
                        drop(accessor);
                        if let Some(open) = slots[slot].take() {
                            open.dba.abort().unwrap();
                        }
                    }
                    Err(other) => panic!("unexpected write failure: {other}"),
                }
            }
            Operation::Commit { slot } => {
                if let Some(open) = slots[slot].take() {
                    open.dba.commit().unwrap();
                    for (vertex, value) in open.writes {
                        committed[vertex] = value;
                    }
                }
            }
            Operation::Abort { slot } => {
                if let Some(open) = slots[slot].take() {
                    open.dba.abort().unwrap();
                }
            }
            Operation::Collect => {
                graph.collect_garbage();
            }
        }
        assert_views(&slots, &gids);
    }

    for open in slots.iter_mut().filter_map(Option::take) {
        open.dba.abort().unwrap();
    }
    graph.collect_garbage();

    let reader = graph.access();
    for (i, gid) in gids.iter().enumerate() {
        assert_eq!(read(&reader, *gid), Some(committed[i]));
        let chain = graph.vertex_store().get(*gid).expect("chain stays linked");
        let oldest = chain.history().last().cloned().expect("chain has a version");
        assert!(
            oldest
                .expired_by
                .map_or(true, |expirer| graph.engine().info(expirer).is_aborted()),
            "obsolete versions survived a pass with nothing running: {:?}",
            chain.history()
        );
    }
    reader.commit().unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_collection_never_hides_visible_versions(
        ops in prop::collection::vec(arb_operation(), 1..80)
    ) {
        run(&ops);
    }
}

/// A long-running reader keeps its snapshot while writers churn versions
/// and a background worker collects every millisecond.
#[test]
fn reader_survives_background_collection() {
    let graph = Graph::open(GraphOptions::new().gc(GcCfg {
        enabled: true,
        interval_ms: 1,
    }));
    let worker = graph.spawn_gc_worker().expect("collection is enabled");

    let setup = graph.access();
    let vertex = setup.insert_vertex(None).unwrap();
    vertex.set_property(VALUE, 0).unwrap();
    let gid = vertex.gid();
    drop(vertex);
    setup.commit().unwrap();

    let reader = graph.access();
    assert_eq!(read(&reader, gid), Some(0));

    let stop = Arc::new(AtomicBool::new(false));
    let writer = {
        let graph = Arc::clone(&graph);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut value: i64 = 0;
            while !stop.load(Ordering::Relaxed) {
                value += 1;
                let dba = graph.access();
                if let Some(vertex) = dba.find_vertex(gid, false).unwrap() {
                    vertex.set_property(VALUE, value).unwrap();
                }
                dba.commit().unwrap();
            }
            value
        })
    };

    let deadline = Instant::now() + Duration::from_millis(200);
    while Instant::now() < deadline {
        assert_eq!(read(&reader, gid), Some(0));
    }
    stop.store(true, Ordering::Relaxed);
    let last = writer.join().expect("writer thread panicked");
    assert_eq!(read(&reader, gid), Some(0));
    reader.commit().unwrap();
    drop(worker);

    graph.collect_garbage();
    let fresh = graph.access();
    assert_eq!(read(&fresh, gid), Some(last));
    assert_eq!(graph.vertex_store().get(gid).map(|chain| chain.len()), Some(1));
    fresh.commit().unwrap();
}
