use std::sync::mpsc;
use std::sync::Barrier;
use std::thread;

use estrato::{Graph, GraphConfig, GraphError, Result, VertexId};
use tempfile::{tempdir, TempDir};

fn open_graph(dir: &TempDir) -> Result<Graph> {
    Graph::open_with_config(
        &dir.path().join("graph.blk"),
        &dir.path().join("graph.wal"),
        GraphConfig {
            arena_capacity: 1 << 22,
            max_vertices: 1 << 12,
            sync_on_commit: false,
        },
    )
}

#[test]
fn second_writer_conflicts_after_first_commit() -> Result<()> {
    let dir = tempdir()?;
    let graph = open_graph(&dir)?;

    let mut setup = graph.begin_transaction();
    let v0 = setup.new_vertex(true)?;
    let v1 = setup.new_vertex(true)?;
    setup.commit(true)?;

    // Both start at the same epoch.
    let mut ta = graph.begin_transaction();
    let mut tb = graph.begin_transaction();

    ta.put_edge(v0, 1, v1, b"winner", false)?;
    ta.commit(true)?;

    let err = tb.put_edge(v0, 1, v1, b"loser", false).unwrap_err();
    assert!(matches!(err, GraphError::Conflict(_)));
    tb.abort();

    // State equals the winner's commit.
    let reader = graph.begin_read_only_transaction();
    assert_eq!(reader.get_edge(v0, 1, v1)?, Some(b"winner".as_slice()));
    assert_eq!(reader.get_edges(v0, 1, false)?.count(), 1);
    Ok(())
}

#[test]
fn concurrent_writer_conflicts_on_the_vertex_latch() -> Result<()> {
    let dir = tempdir()?;
    let graph = open_graph(&dir)?;

    let mut setup = graph.begin_transaction();
    let v0 = setup.new_vertex(true)?;
    let v1 = setup.new_vertex(true)?;
    setup.commit(true)?;

    let mut ta = graph.begin_transaction();
    let mut tb = graph.begin_transaction();

    ta.put_edge(v0, 1, v1, b"held", false)?;
    // ta still holds the latch on v0.
    let err = tb.put_edge(v0, 1, v1, b"blocked", false).unwrap_err();
    assert!(matches!(err, GraphError::Conflict(_)));
    tb.abort();
    ta.commit(true)?;

    let reader = graph.begin_read_only_transaction();
    assert_eq!(reader.get_edge(v0, 1, v1)?, Some(b"held".as_slice()));
    Ok(())
}

#[test]
fn vertex_writes_conflict_too() -> Result<()> {
    let dir = tempdir()?;
    let graph = open_graph(&dir)?;

    let mut setup = graph.begin_transaction();
    let v0 = setup.new_vertex(true)?;
    setup.put_vertex(v0, b"base")?;
    setup.commit(true)?;

    let mut ta = graph.begin_transaction();
    let mut tb = graph.begin_transaction();
    ta.put_vertex(v0, b"a")?;
    ta.commit(true)?;

    let err = tb.put_vertex(v0, b"b").unwrap_err();
    assert!(matches!(err, GraphError::Conflict(_)));
    tb.abort();

    let reader = graph.begin_read_only_transaction();
    assert_eq!(reader.get_vertex(v0)?, Some(b"a".as_slice()));
    Ok(())
}

#[test]
fn disjoint_writers_commit_in_parallel() -> Result<()> {
    const THREADS: usize = 4;
    const COMMITS_PER_THREAD: usize = 25;

    let dir = tempdir()?;
    let graph = open_graph(&dir)?;
    let barrier = Barrier::new(THREADS);

    thread::scope(|scope| {
        let mut handles = Vec::new();
        for t in 0..THREADS {
            let graph = &graph;
            let barrier = &barrier;
            handles.push(scope.spawn(move || -> Result<Vec<VertexId>> {
                barrier.wait();
                let mut created = Vec::new();
                for i in 0..COMMITS_PER_THREAD {
                    let mut txn = graph.begin_transaction();
                    let v = txn.new_vertex(false)?;
                    txn.put_vertex(v, format!("thread{t}-{i}").as_bytes())?;
                    txn.commit(true)?;
                    created.push(v);
                }
                Ok(created)
            }));
        }
        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.join().unwrap()?);
        }
        assert_eq!(all.len(), THREADS * COMMITS_PER_THREAD);
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), THREADS * COMMITS_PER_THREAD, "vertex ids must be unique");

        let reader = graph.begin_read_only_transaction();
        for &v in &all {
            assert!(reader.get_vertex(v)?.is_some());
        }
        Ok(())
    })
}

#[test]
fn contended_writers_make_progress_with_retry() -> Result<()> {
    const THREADS: usize = 4;
    const UPDATES_PER_THREAD: usize = 10;

    let dir = tempdir()?;
    let graph = open_graph(&dir)?;

    let mut setup = graph.begin_transaction();
    let v0 = setup.new_vertex(true)?;
    setup.put_vertex(v0, b"init")?;
    setup.commit(true)?;

    fn put_with_retry(graph: &Graph, vertex: VertexId, data: &[u8]) -> Result<()> {
        loop {
            let mut txn = graph.begin_transaction();
            match txn.put_vertex(vertex, data) {
                Ok(()) => {
                    txn.commit(true)?;
                    return Ok(());
                }
                Err(err) if err.is_conflict() => {
                    txn.abort();
                    thread::yield_now();
                }
                Err(err) => return Err(err),
            }
        }
    }

    let barrier = Barrier::new(THREADS);
    thread::scope(|scope| {
        let mut handles = Vec::new();
        for t in 0..THREADS {
            let graph = &graph;
            let barrier = &barrier;
            handles.push(scope.spawn(move || -> Result<()> {
                barrier.wait();
                for i in 0..UPDATES_PER_THREAD {
                    put_with_retry(graph, v0, format!("t{t}-u{i}").as_bytes())?;
                }
                Ok(())
            }));
        }
        for handle in handles {
            handle.join().unwrap()?;
        }
        Ok::<_, GraphError>(())
    })?;

    // Every update committed; the surviving value is one of them.
    let reader = graph.begin_read_only_transaction();
    let value = reader.get_vertex(v0)?.expect("vertex present");
    assert!(value.starts_with(b"t"));
    Ok(())
}

#[test]
fn snapshots_stay_stable_while_a_writer_churns() -> Result<()> {
    let dir = tempdir()?;
    let graph = open_graph(&dir)?;

    let mut setup = graph.begin_transaction();
    let v0 = setup.new_vertex(true)?;
    let v1 = setup.new_vertex(true)?;
    setup.put_vertex(v0, b"gen-0")?;
    setup.put_edge(v0, 1, v1, b"edge-0", false)?;
    setup.commit(true)?;

    let stop_flag = std::sync::atomic::AtomicBool::new(false);
    thread::scope(|scope| {
        let stop = &stop_flag;
        let writer = {
            let graph = &graph;
            scope.spawn(move || -> Result<()> {
                for gen in 1..=50 {
                    let mut txn = graph.begin_transaction();
                    txn.put_vertex(v0, format!("gen-{gen}").as_bytes())?;
                    txn.put_edge(v0, 1, v1, format!("edge-{gen}").as_bytes(), false)?;
                    txn.commit(true)?;
                }
                stop.store(true, std::sync::atomic::Ordering::Release);
                Ok(())
            })
        };

        let readers: Vec<_> = (0..3)
            .map(|_| {
                let graph = &graph;
                scope.spawn(move || -> Result<()> {
                    while !stop.load(std::sync::atomic::Ordering::Acquire) {
                        let txn = graph.begin_read_only_transaction();
                        let first = txn.get_vertex(v0)?.map(<[u8]>::to_vec);
                        let edge = txn.get_edge(v0, 1, v1)?.map(<[u8]>::to_vec);
                        // Re-reads within one snapshot are identical.
                        assert_eq!(txn.get_vertex(v0)?.map(<[u8]>::to_vec), first);
                        assert_eq!(txn.get_edge(v0, 1, v1)?.map(<[u8]>::to_vec), edge);
                        // The generations of vertex and edge never diverge
                        // within a snapshot: both were written together.
                        let vertex_gen = first.expect("vertex visible");
                        let edge_gen = edge.expect("edge visible");
                        assert_eq!(&vertex_gen[4..], &edge_gen[5..], "snapshot tore a commit");
                    }
                    Ok(())
                })
            })
            .collect();

        writer.join().unwrap()?;
        for reader in readers {
            reader.join().unwrap()?;
        }
        Ok(())
    })
}

#[test]
fn wait_visible_commits_are_seen_across_threads() -> Result<()> {
    let dir = tempdir()?;
    let graph = open_graph(&dir)?;
    let (sender, receiver) = mpsc::channel::<VertexId>();

    thread::scope(|scope| {
        let writer = {
            let graph = &graph;
            scope.spawn(move || -> Result<()> {
                for i in 0..20 {
                    let mut txn = graph.begin_transaction();
                    let v = txn.new_vertex(false)?;
                    txn.put_vertex(v, format!("visible-{i}").as_bytes())?;
                    txn.commit(true)?;
                    sender.send(v).expect("receiver alive");
                }
                Ok(())
            })
        };

        let graph = &graph;
        for _ in 0..20 {
            let v = receiver.recv().expect("sender alive");
            // A read begun after finish_commit(wait_visible) observes it.
            let reader = graph.begin_read_only_transaction();
            assert!(reader.get_vertex(v)?.is_some(), "commit not visible for {v}");
        }
        writer.join().unwrap()?;
        Ok(())
    })
}
