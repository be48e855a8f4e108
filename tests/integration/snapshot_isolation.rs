//! Snapshot Isolation Tests
//!
//! Checks what each transaction observes while other transactions insert,
//! update and commit around it:
//! - uncommitted writes stay private (no dirty reads)
//! - a transaction's view never changes after it began (repeatable reads,
//!   no phantoms), even when the concurrent writer commits
//! - a transaction sees its own earlier commands but not its current one
//! - commit is atomic with respect to transactions that begin afterwards

#![allow(missing_docs)]

use std::sync::Arc;

use penumbra::storage::{Graph, GraphOptions, PropValue};
use penumbra::transaction::CommitInfo;
use penumbra::types::{Gid, LabelId, PropId, Result};

fn setup_graph() -> Arc<Graph> {
    Graph::open(GraphOptions::new())
}

fn seed_vertex(graph: &Arc<Graph>, value: i64) -> Result<Gid> {
    let dba = graph.access();
    let vertex = dba.insert_vertex(None)?;
    vertex.set_property(PropId(1), value)?;
    let gid = vertex.gid();
    dba.commit()?;
    Ok(gid)
}

fn read_value(graph: &Arc<Graph>, gid: Gid) -> Result<Option<i64>> {
    let dba = graph.access();
    let value = dba
        .find_vertex(gid, false)?
        .and_then(|v| v.property(PropId(1)))
        .and_then(|value| value.as_int());
    dba.commit()?;
    Ok(value)
}

/// t1 inserts E; t2 begins while t1 runs; t3 begins after t1 commits.
///
/// t2 must never see E, not even after t1 committed. t3 must see it.
#[test]
fn concurrent_insert_is_invisible_to_older_snapshot() -> Result<()> {
    let graph = setup_graph();

    let t1 = graph.access();
    let e = t1.insert_vertex(None)?.gid();
    assert!(t1.find_vertex(e, true)?.is_some(), "t1 sees its own insert");

    let t2 = graph.access();
    assert!(
        t2.transaction().snapshot().contains(t1.transaction().id()),
        "t2 began while t1 was active"
    );
    assert!(t2.find_vertex(e, false)?.is_none());
    assert!(t2.find_vertex(e, true)?.is_none());

    t1.commit()?;

    let t3 = graph.access();
    assert!(t3.find_vertex(e, false)?.is_some(), "t3 sees committed E");
    assert!(
        t2.find_vertex(e, false)?.is_none(),
        "t2 still must not see E after t1 committed"
    );
    assert_eq!(t2.vertices_count()?, 0);

    t2.commit()?;
    t3.commit()?;
    Ok(())
}

/// A reader keeps observing the value it first read while a writer
/// updates and commits the same vertex.
#[test]
fn reads_are_repeatable() -> Result<()> {
    let graph = setup_graph();
    let gid = seed_vertex(&graph, 1)?;

    let reader = graph.access();
    let first = reader.find_vertex(gid, false)?.and_then(|v| v.property(PropId(1)));
    assert_eq!(first, Some(PropValue::Int(1)));

    let writer = graph.access();
    writer
        .find_vertex(gid, false)?
        .expect("seeded vertex is visible")
        .set_property(PropId(1), 2)?;
    writer.commit()?;

    let second = reader.find_vertex(gid, false)?.and_then(|v| v.property(PropId(1)));
    assert_eq!(second, first, "reader's snapshot must not move");
    reader.commit()?;

    assert_eq!(read_value(&graph, gid)?, Some(2));
    Ok(())
}

/// Vertices inserted and committed by a concurrent transaction do not
/// appear in a running scan, and a concurrent delete does not make a
/// vertex disappear from it.
#[test]
fn scans_have_no_phantoms() -> Result<()> {
    let graph = setup_graph();
    let existing = seed_vertex(&graph, 0)?;

    let reader = graph.access();
    assert_eq!(reader.vertices(false)?.len(), 1);

    let writer = graph.access();
    for _ in 0..3 {
        writer.insert_vertex(None)?;
    }
    assert!(writer.remove_vertex(existing)?);
    writer.commit()?;

    let gids: Vec<Gid> = reader.vertices(false)?.iter().map(|v| v.gid()).collect();
    assert_eq!(gids, vec![existing]);
    reader.commit()?;

    let later = graph.access();
    assert_eq!(later.vertices_count()?, 3);
    later.commit()?;
    Ok(())
}

/// Writes of the current command become visible to the old view only after
/// advancing; the new view sees them immediately.
#[test]
fn read_your_own_writes_across_commands() -> Result<()> {
    let graph = setup_graph();
    let dba = graph.access();
    let gid = dba.insert_vertex(None)?.gid();

    assert!(dba.find_vertex(gid, false)?.is_none());
    assert!(dba.find_vertex(gid, true)?.is_some());

    dba.advance_command()?;
    let mut vertex = dba.find_vertex(gid, false)?.expect("visible after advance");
    vertex.add_label(LabelId(7))?;
    assert!(!vertex.has_label(LabelId(7)), "old view excludes current command");
    vertex.switch_new();
    assert!(vertex.has_label(LabelId(7)));

    dba.advance_command()?;
    vertex.switch_old();
    assert!(vertex.has_label(LabelId(7)));

    dba.commit()?;
    Ok(())
}

/// Once commit returns, every later transaction sees the outcome and does
/// not carry the committed id in its snapshot.
#[test]
fn commit_is_atomic_for_later_transactions() -> Result<()> {
    let graph = setup_graph();
    let writer = graph.access();
    let id = writer.transaction().id();
    for value in 0..10 {
        writer.insert_vertex(None)?.set_property(PropId(1), value)?;
    }
    assert_eq!(graph.engine().info(id), CommitInfo::Active);
    writer.commit()?;

    assert_eq!(graph.engine().info(id), CommitInfo::Committed);
    assert!(!graph.engine().global_active_transactions().contains(id));
    let reader = graph.access();
    assert!(!reader.transaction().snapshot().contains(id));
    assert_eq!(reader.vertices_count()?, 10);
    reader.commit()?;
    Ok(())
}

/// Aborted writes never become visible to anyone.
#[test]
fn aborted_writes_stay_invisible() -> Result<()> {
    let graph = setup_graph();
    let gid = seed_vertex(&graph, 5)?;

    let writer = graph.access();
    writer
        .find_vertex(gid, false)?
        .expect("seeded vertex is visible")
        .set_property(PropId(1), 6)?;
    writer.insert_vertex(None)?;
    writer.abort()?;

    assert_eq!(read_value(&graph, gid)?, Some(5));
    let reader = graph.access();
    assert_eq!(reader.vertices_count()?, 1);
    reader.commit()?;
    Ok(())
}
