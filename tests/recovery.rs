use std::path::PathBuf;

use estrato::{Graph, GraphConfig, Result};
use tempfile::{tempdir, TempDir};

fn paths(dir: &TempDir) -> (PathBuf, PathBuf) {
    (dir.path().join("graph.blk"), dir.path().join("graph.wal"))
}

fn open_graph(dir: &TempDir) -> Result<Graph> {
    let (block_path, wal_path) = paths(dir);
    Graph::open_with_config(
        &block_path,
        &wal_path,
        GraphConfig {
            arena_capacity: 1 << 20,
            max_vertices: 1 << 12,
            sync_on_commit: true,
        },
    )
}

#[test]
fn committed_state_survives_reopen() -> Result<()> {
    let dir = tempdir()?;
    let (v0, v1);
    {
        let graph = open_graph(&dir)?;
        let mut txn = graph.begin_transaction();
        v0 = txn.new_vertex(true)?;
        v1 = txn.new_vertex(true)?;
        txn.put_vertex(v0, b"a")?;
        txn.put_vertex(v1, b"b")?;
        txn.put_edge(v0, 1, v1, b"e", false)?;
        txn.commit(true)?;

        let mut txn = graph.begin_transaction();
        txn.put_edge(v0, 1, v1, b"e2", false)?;
        txn.del_vertex(v1, false)?;
        txn.commit(true)?;
    }

    let graph = open_graph(&dir)?;
    let reader = graph.begin_read_only_transaction();
    assert_eq!(reader.get_vertex(v0)?, Some(b"a".as_slice()));
    assert_eq!(reader.get_vertex(v1)?, None);
    assert_eq!(reader.get_edge(v0, 1, v1)?, Some(b"e2".as_slice()));
    assert_eq!(reader.get_edges(v0, 1, false)?.count(), 1);
    Ok(())
}

#[test]
fn uncommitted_work_is_not_replayed() -> Result<()> {
    let dir = tempdir()?;
    let (v0, v1, v2);
    {
        let graph = open_graph(&dir)?;
        let mut txn = graph.begin_transaction();
        v0 = txn.new_vertex(true)?;
        txn.put_vertex(v0, b"durable")?;
        txn.commit(true)?;

        let mut aborted = graph.begin_transaction();
        v1 = aborted.new_vertex(true)?;
        aborted.put_vertex(v1, b"rolled-back")?;
        aborted.abort();

        // Dropped mid-flight without commit.
        let mut dangling = graph.begin_transaction();
        v2 = dangling.new_vertex(true)?;
        dangling.put_vertex(v2, b"dropped")?;
        drop(dangling);
    }

    let graph = open_graph(&dir)?;
    let reader = graph.begin_read_only_transaction();
    assert_eq!(reader.get_vertex(v0)?, Some(b"durable".as_slice()));
    assert_eq!(reader.get_vertex(v1)?, None);
    assert_eq!(reader.get_vertex(v2)?, None);
    Ok(())
}

#[test]
fn versioned_history_survives_reopen() -> Result<()> {
    let dir = tempdir()?;
    let (v0, v1);
    {
        let graph = open_graph(&dir)?;
        let mut txn = graph.begin_transaction();
        v0 = txn.new_vertex(true)?;
        v1 = txn.new_vertex(true)?;
        txn.put_edge_with_version(v0, 1, v1, b"x", 10, false)?;
        txn.put_edge_with_version(v0, 1, v1, b"y", 20, false)?;
        txn.commit(true)?;
    }

    let graph = open_graph(&dir)?;
    let reader = graph.begin_read_only_transaction();
    assert_eq!(
        reader.get_edge_with_version(v0, 1, v1, 0, 15)?,
        vec![b"x".as_slice()]
    );
    let both = reader.get_edge_with_version(v0, 1, v1, 0, 25)?;
    assert_eq!(both.len(), 2);
    assert_eq!(reader.get_edge(v0, 1, v1)?, Some(b"y".as_slice()));
    Ok(())
}

#[test]
fn recycled_ids_are_available_after_reopen() -> Result<()> {
    let dir = tempdir()?;
    let v0;
    {
        let graph = open_graph(&dir)?;
        let mut txn = graph.begin_transaction();
        v0 = txn.new_vertex(true)?;
        txn.put_vertex(v0, b"short-lived")?;
        txn.commit(true)?;

        let mut txn = graph.begin_transaction();
        assert!(txn.del_vertex(v0, true)?);
        txn.commit(true)?;
    }

    let graph = open_graph(&dir)?;
    let mut txn = graph.begin_transaction();
    assert_eq!(txn.new_vertex(true)?, v0);
    txn.commit(true)?;
    Ok(())
}

#[test]
fn commits_continue_after_recovery() -> Result<()> {
    let dir = tempdir()?;
    let v0;
    {
        let graph = open_graph(&dir)?;
        let mut txn = graph.begin_transaction();
        v0 = txn.new_vertex(true)?;
        txn.put_vertex(v0, b"before")?;
        txn.commit(true)?;
    }

    let v1;
    {
        let graph = open_graph(&dir)?;
        let mut txn = graph.begin_transaction();
        v1 = txn.new_vertex(false)?;
        txn.put_vertex(v1, b"after")?;
        txn.put_edge(v0, 5, v1, b"link", false)?;
        txn.commit(true)?;
        assert_ne!(v0, v1);
    }

    let graph = open_graph(&dir)?;
    let reader = graph.begin_read_only_transaction();
    assert_eq!(reader.get_vertex(v0)?, Some(b"before".as_slice()));
    assert_eq!(reader.get_vertex(v1)?, Some(b"after".as_slice()));
    assert_eq!(reader.get_edge(v0, 5, v1)?, Some(b"link".as_slice()));
    Ok(())
}

#[test]
fn deleted_edges_stay_deleted_after_reopen() -> Result<()> {
    let dir = tempdir()?;
    let (v0, v1);
    {
        let graph = open_graph(&dir)?;
        let mut txn = graph.begin_transaction();
        v0 = txn.new_vertex(true)?;
        v1 = txn.new_vertex(true)?;
        txn.put_edge(v0, 1, v1, b"doomed", false)?;
        txn.commit(true)?;

        let mut txn = graph.begin_transaction();
        assert!(txn.del_edge(v0, 1, v1)?);
        txn.commit(true)?;
    }

    let graph = open_graph(&dir)?;
    let reader = graph.begin_read_only_transaction();
    assert_eq!(reader.get_edge(v0, 1, v1)?, None);
    assert_eq!(reader.get_edges(v0, 1, false)?.count(), 0);
    Ok(())
}
