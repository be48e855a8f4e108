//! Durability Stream Tests
//!
//! The engine publishes begin/commit/abort markers and every record write
//! to the configured sink. These tests check the ordering guarantees of
//! that stream and rebuild a second graph from it, via newline-delimited
//! JSON on disk, comparing the two states record by record.

#![allow(missing_docs)]

use std::fs;
use std::sync::Arc;

use penumbra::durability::{from_json_lines, replay, MemorySink, StateDelta};
use penumbra::storage::index::{IndexHook, IndexKey};
use penumbra::storage::{Edge, Graph, GraphOptions, VersionChain, Vertex};
use penumbra::Transaction;
use penumbra::types::{Gid, LabelId, PropId, Result, TxId, TypeId};

fn recorded_graph() -> (Arc<Graph>, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let graph = Graph::open(GraphOptions::new().sink(sink.clone()));
    (graph, sink)
}

fn dump(graph: &Arc<Graph>) -> Result<(Vec<(Gid, Vertex)>, Vec<(Gid, Edge)>)> {
    let dba = graph.access();
    let vertices = dba
        .vertices(false)?
        .iter()
        .filter_map(|v| v.record().map(|record| (v.gid(), (*record).clone())))
        .collect();
    let edges = dba
        .edges(false)?
        .iter()
        .filter_map(|e| e.record().map(|record| (e.gid(), (*record).clone())))
        .collect();
    dba.commit()?;
    Ok((vertices, edges))
}

fn position(deltas: &[StateDelta], wanted: &StateDelta) -> usize {
    deltas
        .iter()
        .position(|delta| delta == wanted)
        .unwrap_or_else(|| panic!("{wanted:?} missing from stream"))
}

/// Commit markers appear in commit order even when transactions began in
/// a different order, and every record delta sits between its own
/// transaction's begin and commit.
#[test]
fn stream_orders_markers_by_commit() -> Result<()> {
    let (graph, sink) = recorded_graph();

    let t1 = graph.access();
    let t2 = graph.access();
    let (id1, id2) = (t1.transaction().id(), t2.transaction().id());
    let v1 = t1.insert_vertex(None)?.gid();
    let v2 = t2.insert_vertex(None)?.gid();
    t2.commit()?;
    t1.commit()?;

    let deltas = sink.deltas();
    let commit1 = position(&deltas, &StateDelta::TxCommit { tx: id1 });
    let commit2 = position(&deltas, &StateDelta::TxCommit { tx: id2 });
    assert!(commit2 < commit1);

    for (tx, gid, commit) in [(id1, v1, commit1), (id2, v2, commit2)] {
        let begin = position(&deltas, &StateDelta::TxBegin { tx });
        let create = position(&deltas, &StateDelta::CreateVertex { tx, gid });
        assert!(begin < create && create < commit);
    }

    let order: Vec<TxId> = sink.committed_in_order().into_iter().map(|(tx, _)| tx).collect();
    assert_eq!(order, vec![id2, id1]);
    Ok(())
}

/// Interleaved, partly aborted history replayed through a JSON file lands
/// on exactly the committed state.
#[test]
fn replay_from_disk_reproduces_committed_state() -> Result<()> {
    let (source, sink) = recorded_graph();

    let setup = source.access();
    let alice = setup.insert_vertex(None)?;
    alice.add_label(LabelId(1))?;
    alice.set_property(PropId(1), "alice")?;
    let bob = setup.insert_vertex(None)?;
    bob.set_property(PropId(1), "bob")?;
    let carol = setup.insert_vertex(None)?;
    let (alice, bob, carol) = (alice.gid(), bob.gid(), carol.gid());
    let knows = setup.insert_edge(alice, bob, TypeId(1), None)?;
    knows.set_property(PropId(2), 2019)?;
    setup.insert_edge(bob, carol, TypeId(1), None)?;
    setup.insert_edge(carol, carol, TypeId(2), None)?;
    setup.commit()?;

    let slow = source.access();
    let fast = source.access();
    slow.find_vertex(alice, false)?
        .expect("alice is visible")
        .set_property(PropId(3), true)?;
    fast.detach_remove_vertex(carol)?;
    let dave = fast.insert_vertex(None)?.gid();
    fast.insert_edge(bob, dave, TypeId(3), None)?;
    fast.commit()?;
    slow.commit()?;

    let discarded = source.access();
    discarded.insert_vertex(None)?.add_label(LabelId(9))?;
    discarded
        .find_vertex(bob, false)?
        .expect("bob is visible")
        .remove_label(LabelId(1))?;
    discarded.abort()?;

    let cleanup = source.access();
    let mut alice_vertex = cleanup.find_vertex(alice, false)?.expect("alice is visible");
    alice_vertex.remove_property(PropId(1))?;
    alice_vertex.switch_new();
    alice_vertex.remove_label(LabelId(1))?;
    cleanup.commit()?;

    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("deltas.jsonl");
    fs::write(&path, sink.to_json_lines()?).expect("write stream");
    let text = fs::read_to_string(&path).expect("read stream");
    let deltas = from_json_lines(&text)?;
    assert_eq!(deltas, sink.deltas());

    let target = Graph::open(GraphOptions::new());
    let stats = replay(&target, &deltas)?;
    assert_eq!(stats.transactions, 4);
    assert!(stats.index_builds.is_empty());

    let (vertices, edges) = dump(&target)?;
    assert_eq!((vertices.clone(), edges.clone()), dump(&source)?);
    assert_eq!(
        vertices.iter().map(|(gid, _)| *gid).collect::<Vec<_>>(),
        vec![alice, bob, dave]
    );
    assert_eq!(edges.len(), 2);
    let alice_record = &vertices[0].1;
    assert!(alice_record.labels.is_empty());
    assert_eq!(alice_record.props.len(), 1);
    Ok(())
}

/// Replay keeps index builds in stream order for the caller to rebuild.
#[test]
fn replay_reports_index_builds() -> Result<()> {
    struct Ignore;
    impl IndexHook for Ignore {
        fn insert(&self, _key: IndexKey, _chain: &Arc<VersionChain<Vertex>>, _vertex: &Vertex, _tx: &Transaction) {}
    }

    let (source, sink) = recorded_graph();
    let dba = source.access();
    dba.insert_vertex(None)?.add_label(LabelId(1))?;
    dba.commit()?;

    let builder = source.access();
    builder.build_index(IndexKey::new(1u32, 7u32), Arc::new(Ignore))?;
    builder.build_index(IndexKey::new(2u32, 7u32), Arc::new(Ignore))?;
    builder.commit()?;

    let target = Graph::open(GraphOptions::new());
    let stats = replay(&target, &sink.deltas())?;
    assert_eq!(stats.index_builds, vec![IndexKey::new(1u32, 7u32), IndexKey::new(2u32, 7u32)]);
    assert_eq!(stats.transactions, 4);
    Ok(())
}
