//! End-to-end engine behavior over an in-memory corpus.

use sift_core::{
    CancelToken, EngineBuilder, FileId, IndexDefinition, IndexInput, IndexName, InputMap,
    MemoryCorpus, Scope, SiftError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Word index whose indexer invocations are counted.
fn counted_word_index(name: &str, calls: Arc<AtomicUsize>) -> IndexDefinition {
    IndexDefinition::new(name, 1, move |input: &IndexInput<'_>| {
        calls.fetch_add(1, Ordering::SeqCst);
        let text = String::from_utf8_lossy(input.content);
        let mut map = InputMap::new();
        for word in text.split_whitespace() {
            map.insert(word.as_bytes().to_vec(), Vec::new());
        }
        Ok(map)
    })
}

fn word_index(name: &str) -> IndexDefinition {
    counted_word_index(name, Arc::new(AtomicUsize::new(0)))
}

fn files_for(engine: &sift_core::Engine, name: &IndexName, word: &str) -> Vec<FileId> {
    engine
        .get_containing_files(name, word.as_bytes(), &Scope::Everything)
        .unwrap()
}

#[test]
fn indexing_unchanged_file_twice_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let corpus = Arc::new(MemoryCorpus::new());
    corpus.insert(FileId::new(1), "a.txt", "alpha beta");

    let calls = Arc::new(AtomicUsize::new(0));
    let engine = EngineBuilder::new(dir.path(), corpus.clone())
        .register(counted_word_index("words", calls.clone()))
        .open()
        .unwrap();
    let name = IndexName::from("words");

    engine.ensure_up_to_date(&name, &Scope::Everything).unwrap();
    let first_calls = calls.load(Ordering::SeqCst);
    let first = files_for(&engine, &name, "alpha");
    assert_eq!(first, vec![FileId::new(1)]);

    // A second pass over an unchanged corpus re-runs nothing and stores
    // nothing new.
    engine.ensure_up_to_date(&name, &Scope::Everything).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), first_calls);
    assert_eq!(files_for(&engine, &name, "alpha"), first);
    assert_eq!(engine.status(&name).unwrap().key_count, 2);

    engine.close().unwrap();
}

#[test]
fn stamps_survive_reopen_without_reindexing() {
    let dir = TempDir::new().unwrap();
    let corpus = Arc::new(MemoryCorpus::new());
    corpus.insert(FileId::new(1), "a.txt", "alpha beta");
    corpus.insert(FileId::new(2), "b.txt", "gamma");
    let name = IndexName::from("words");

    {
        let engine = EngineBuilder::new(dir.path(), corpus.clone())
            .register(word_index("words"))
            .open()
            .unwrap();
        engine.ensure_up_to_date(&name, &Scope::Everything).unwrap();
        engine.close().unwrap();
    }

    let calls = Arc::new(AtomicUsize::new(0));
    let engine = EngineBuilder::new(dir.path(), corpus)
        .register(counted_word_index("words", calls.clone()))
        .open()
        .unwrap();

    // Everything is current from the previous run: data answers queries
    // and the indexer never runs.
    engine.ensure_up_to_date(&name, &Scope::Everything).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(files_for(&engine, &name, "gamma"), vec![FileId::new(2)]);

    engine.close().unwrap();
}

#[test]
fn concurrent_events_merge_with_removed_winning() {
    let dir = TempDir::new().unwrap();
    let corpus = Arc::new(MemoryCorpus::new());
    corpus.insert(FileId::new(1), "a.txt", "alpha");

    let engine = EngineBuilder::new(dir.path(), corpus.clone())
        .register(word_index("words"))
        .open()
        .unwrap();
    let name = IndexName::from("words");
    engine.ensure_up_to_date(&name, &Scope::Everything).unwrap();

    // Concurrent writers hammer the same file; one of them removes it.
    corpus.remove(FileId::new(1));
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                if i == 3 {
                    engine.record_file_removed(FileId::new(1));
                } else {
                    engine.record_file_event(FileId::new(1), true);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(engine.pending_changes(), 1);

    engine.ensure_up_to_date(&name, &Scope::Everything).unwrap();
    assert!(files_for(&engine, &name, "alpha").is_empty());

    engine.close().unwrap();
}

#[test]
fn rebuild_pass_leaves_every_file_current() {
    let dir = TempDir::new().unwrap();
    let corpus = Arc::new(MemoryCorpus::new());
    for i in 1..=20 {
        corpus.insert(FileId::new(i), format!("f{i}.txt"), format!("common word{i}"));
    }

    let engine = EngineBuilder::new(dir.path(), corpus)
        .register(word_index("words"))
        .open()
        .unwrap();
    let name = IndexName::from("words");
    engine.ensure_up_to_date(&name, &Scope::Everything).unwrap();

    engine.schedule_rebuild(&name).unwrap();
    assert!(engine.status(&name).unwrap().rebuild_pending);
    assert!(matches!(
        engine.get_containing_files(&name, b"common", &Scope::Everything),
        Err(SiftError::RebuildPending { .. })
    ));

    engine.ensure_up_to_date(&name, &Scope::Everything).unwrap();
    let status = engine.status(&name).unwrap();
    assert!(!status.rebuild_pending);
    assert_eq!(status.dirty_files, 0);
    assert_eq!(files_for(&engine, &name, "common").len(), 20);

    engine.close().unwrap();
}

#[test]
fn identical_content_is_indexed_once() {
    let dir = TempDir::new().unwrap();
    let corpus = Arc::new(MemoryCorpus::new());
    corpus.insert(FileId::new(1), "gen/a.rs", "generated body");
    corpus.insert(FileId::new(2), "gen/b.rs", "generated body");
    corpus.insert(FileId::new(3), "gen/c.rs", "different body");

    let calls = Arc::new(AtomicUsize::new(0));
    let config = sift_core::EngineConfig {
        verify_snapshot_cache: false,
        ..Default::default()
    };
    let engine = EngineBuilder::new(dir.path(), corpus)
        .with_config(config)
        .register(counted_word_index("words", calls.clone()).content_addressed())
        .open()
        .unwrap();
    let name = IndexName::from("words");

    engine.ensure_up_to_date(&name, &Scope::Everything).unwrap();

    // Two of the three files share content: the indexer runs once per
    // distinct content, not once per file.
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let mut hits = files_for(&engine, &name, "generated");
    hits.sort_unstable();
    assert_eq!(hits, vec![FileId::new(1), FileId::new(2)]);

    engine.close().unwrap();
}

#[test]
fn intersection_matches_exactly_the_shared_files() {
    let dir = TempDir::new().unwrap();
    let corpus = Arc::new(MemoryCorpus::new());
    corpus.insert(FileId::new(1), "a.txt", "k1 k2");
    corpus.insert(FileId::new(2), "b.txt", "k1");
    corpus.insert(FileId::new(3), "c.txt", "k2");
    corpus.insert(FileId::new(4), "d.txt", "k1 k2 k3");
    corpus.insert(FileId::new(5), "e.txt", "unrelated");

    let engine = EngineBuilder::new(dir.path(), corpus)
        .register(word_index("words"))
        .open()
        .unwrap();
    let name = IndexName::from("words");
    engine.ensure_up_to_date(&name, &Scope::Everything).unwrap();

    let keys = vec![b"k1".to_vec(), b"k2".to_vec()];
    let mut both = Vec::new();
    let completed = engine
        .process_files_containing_all_keys(&name, &keys, &Scope::Everything, |file, values| {
            assert_eq!(values.len(), 2);
            both.push(file);
            true
        })
        .unwrap();
    assert!(completed);
    both.sort_unstable();
    assert_eq!(both, vec![FileId::new(1), FileId::new(4)]);

    // Disjoint keys intersect to nothing.
    let keys = vec![b"k3".to_vec(), b"unrelated".to_vec()];
    let mut none = Vec::new();
    engine
        .process_files_containing_all_keys(&name, &keys, &Scope::Everything, |file, _| {
            none.push(file);
            true
        })
        .unwrap();
    assert!(none.is_empty());

    // Short-circuiting visitor.
    let keys = vec![b"k1".to_vec()];
    let mut seen = 0;
    let completed = engine
        .process_files_containing_all_keys(&name, &keys, &Scope::Everything, |_, _| {
            seen += 1;
            false
        })
        .unwrap();
    assert!(!completed);
    assert_eq!(seen, 1);

    engine.close().unwrap();
}

#[test]
fn incremental_scenario_with_deletion() {
    let dir = TempDir::new().unwrap();
    let corpus = Arc::new(MemoryCorpus::new());
    let (a, b, c) = (FileId::new(1), FileId::new(2), FileId::new(3));
    corpus.insert(a, "a.txt", "hello world");
    corpus.insert(b, "b.txt", "hello there");
    corpus.insert(c, "c.txt", "nothing here");

    let calls = Arc::new(AtomicUsize::new(0));
    let engine = EngineBuilder::new(dir.path(), corpus.clone())
        .register(counted_word_index("words", calls.clone()))
        .open()
        .unwrap();
    let name = IndexName::from("words");

    engine.ensure_up_to_date(&name, &Scope::Everything).unwrap();
    let mut hello = files_for(&engine, &name, "hello");
    hello.sort_unstable();
    assert_eq!(hello, vec![a, b]);
    let after_build = calls.load(Ordering::SeqCst);

    // Delete B and re-run one incremental pass.
    corpus.remove(b);
    engine.record_file_removed(b);
    engine.ensure_up_to_date(&name, &Scope::Everything).unwrap();

    assert_eq!(files_for(&engine, &name, "hello"), vec![a]);
    assert_eq!(files_for(&engine, &name, "there"), Vec::<FileId>::new());
    assert_eq!(files_for(&engine, &name, "world"), vec![a]);
    assert_eq!(files_for(&engine, &name, "nothing"), vec![c]);
    // Removal produces an empty map without running the indexer; A and C
    // were not touched at all.
    assert_eq!(calls.load(Ordering::SeqCst), after_build);

    engine.close().unwrap();
}

#[test]
fn cancellation_keeps_applied_state_and_requeues_the_rest() {
    let dir = TempDir::new().unwrap();
    let corpus = Arc::new(MemoryCorpus::new());
    for i in 1..=10 {
        corpus.insert(FileId::new(i), format!("f{i}.txt"), format!("word{i}"));
    }

    let engine = EngineBuilder::new(dir.path(), corpus)
        .register(word_index("words"))
        .open()
        .unwrap();
    let name = IndexName::from("words");

    let cancel = CancelToken::new();
    cancel.cancel();
    let result = engine.ensure_up_to_date_cancellable(&name, &Scope::Everything, &cancel);
    assert!(matches!(result, Err(SiftError::Cancelled)));

    // A later un-cancelled pass finishes the queued work.
    engine.ensure_up_to_date(&name, &Scope::Everything).unwrap();
    assert_eq!(engine.status(&name).unwrap().dirty_files, 0);
    assert_eq!(files_for(&engine, &name, "word7"), vec![FileId::new(7)]);

    engine.close().unwrap();
}

#[test]
fn schema_bump_invalidates_whole_index() {
    let dir = TempDir::new().unwrap();
    let corpus = Arc::new(MemoryCorpus::new());
    corpus.insert(FileId::new(1), "a.txt", "alpha");
    let name = IndexName::from("words");

    {
        let engine = EngineBuilder::new(dir.path(), corpus.clone())
            .register(word_index("words"))
            .open()
            .unwrap();
        engine.ensure_up_to_date(&name, &Scope::Everything).unwrap();
        engine.close().unwrap();
    }

    // Reopen with a bumped schema version.
    let bumped = IndexDefinition::new("words", 2, |input: &IndexInput<'_>| {
        let mut map = InputMap::new();
        for word in String::from_utf8_lossy(input.content).split_whitespace() {
            map.insert(format!("v2:{word}").into_bytes(), Vec::new());
        }
        Ok(map)
    });
    let engine = EngineBuilder::new(dir.path(), corpus)
        .register(bumped)
        .open()
        .unwrap();

    assert!(engine.status(&name).unwrap().rebuild_pending);
    engine.ensure_up_to_date(&name, &Scope::Everything).unwrap();
    assert_eq!(files_for(&engine, &name, "v2:alpha"), vec![FileId::new(1)]);
    assert!(files_for(&engine, &name, "alpha").is_empty());

    engine.close().unwrap();
}

#[test]
fn unclean_shutdown_wipes_the_root() {
    let dir = TempDir::new().unwrap();
    let corpus = Arc::new(MemoryCorpus::new());
    corpus.insert(FileId::new(1), "a.txt", "alpha");
    let name = IndexName::from("words");

    {
        let engine = EngineBuilder::new(dir.path(), corpus.clone())
            .register(word_index("words"))
            .open()
            .unwrap();
        engine.ensure_up_to_date(&name, &Scope::Everything).unwrap();
        // Dropped without close(): the dirty marker stays behind.
    }

    let engine = EngineBuilder::new(dir.path(), corpus)
        .register(word_index("words"))
        .open()
        .unwrap();
    // The wiped root forces a fresh build.
    assert!(engine.status(&name).unwrap().rebuild_pending);
    engine.ensure_up_to_date(&name, &Scope::Everything).unwrap();
    assert_eq!(files_for(&engine, &name, "alpha"), vec![FileId::new(1)]);

    engine.close().unwrap();
}

#[test]
fn transient_content_is_speculative() {
    let dir = TempDir::new().unwrap();
    let corpus = Arc::new(MemoryCorpus::new());
    let file = FileId::new(1);
    corpus.insert(file, "a.txt", "saved words");

    let engine = EngineBuilder::new(dir.path(), corpus)
        .register(word_index("words"))
        .open()
        .unwrap();
    let name = IndexName::from("words");
    engine.ensure_up_to_date(&name, &Scope::Everything).unwrap();
    assert_eq!(files_for(&engine, &name, "saved"), vec![file]);

    // Unsaved editor content replaces the file's view of the index...
    engine.set_transient_content(file, "draft words");
    engine.ensure_up_to_date(&name, &Scope::Everything).unwrap();
    assert_eq!(files_for(&engine, &name, "draft"), vec![file]);
    assert!(files_for(&engine, &name, "saved").is_empty());
    assert_eq!(files_for(&engine, &name, "words"), vec![file]);

    // ...until it is abandoned, which restores the durable state.
    engine.clear_transient_content(file);
    engine.ensure_up_to_date(&name, &Scope::Everything).unwrap();
    assert_eq!(files_for(&engine, &name, "saved"), vec![file]);
    assert!(files_for(&engine, &name, "draft").is_empty());

    engine.close().unwrap();
}

#[test]
fn scoped_queries_filter_files() {
    let dir = TempDir::new().unwrap();
    let corpus = Arc::new(MemoryCorpus::new());
    corpus.insert(FileId::new(1), "a.txt", "shared");
    corpus.insert(FileId::new(2), "b.txt", "shared");

    let engine = EngineBuilder::new(dir.path(), corpus)
        .register(word_index("words"))
        .open()
        .unwrap();
    let name = IndexName::from("words");
    engine.ensure_up_to_date(&name, &Scope::Everything).unwrap();

    let scope = Scope::files([FileId::new(2)]);
    assert_eq!(
        engine
            .get_containing_files(&name, b"shared", &scope)
            .unwrap(),
        vec![FileId::new(2)]
    );

    engine.close().unwrap();
}
