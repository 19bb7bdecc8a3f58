//! End-to-end loads against the memory-mapped store.

mod common;

use tempfile::TempDir;

use audiopack::{
    BulkLoader, DATA_FILE_NAME, DEFAULT_INDEX_KEY, FileLock, HEADER_SIZE, KIB, KeyIndex,
    LOAD_LOCK_FILE_NAME, LoadError, LoadObserver, LoaderConfig, Manifest, MappedStore,
    NoopObserver, Pressure, RECORD_HEADER_SIZE, SkippedRecord, StoreError, StoreReader,
};

use common::{manifest_for, manifest_text, store_dir, uniform_sources, write_sources};

#[derive(Default)]
struct Recorder {
    generations: Vec<(u64, u64)>,
    growth: Vec<(u64, u64, Pressure)>,
    skipped: Vec<String>,
    commits: Vec<usize>,
}

impl LoadObserver for Recorder {
    fn on_generation(&mut self, generation: u64, capacity: u64) {
        self.generations.push((generation, capacity));
    }

    fn on_commit(&mut self, committed: usize) {
        self.commits.push(committed);
    }

    fn on_skip(&mut self, record: &SkippedRecord) {
        self.skipped.push(record.key.clone());
    }

    fn on_growth(&mut self, from: u64, to: u64, pressure: Pressure) {
        self.growth.push((from, to, pressure));
    }
}

fn small_config() -> LoaderConfig {
    LoaderConfig::default()
        .initial_capacity(64 * KIB)
        .shrink_floor(4 * KIB)
}

fn read_index(store: &std::path::Path) -> Option<KeyIndex> {
    let reader = StoreReader::open(store).unwrap();
    KeyIndex::read_from(&reader, DEFAULT_INDEX_KEY).unwrap()
}

#[test]
fn unreadable_source_is_skipped_and_left_out_of_the_index() {
    let temp = TempDir::new().unwrap();
    let sources = write_sources(temp.path(), &[("a", 512), ("c", 700)]);
    let missing = temp.path().join("audio/b.wav");
    let manifest = Manifest::parse(&manifest_text(&[
        ("a", sources[0].path.as_path()),
        ("b", missing.as_path()),
        ("c", sources[1].path.as_path()),
    ]))
    .unwrap();
    let store = store_dir(&temp);

    let mut recorder = Recorder::default();
    let report = BulkLoader::new(small_config())
        .load(&manifest, &store, &mut recorder)
        .unwrap();

    assert_eq!(report.keys, vec!["a", "c"]);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].key, "b");
    assert_eq!(report.skipped[0].line, 2);
    assert_eq!(recorder.skipped, vec!["b"]);

    let reader = StoreReader::open(&store).unwrap();
    assert_eq!(reader.len(), 3, "a, c and the sentinel");
    assert_eq!(reader.get(b"a"), Some(sources[0].bytes.as_slice()));
    assert_eq!(reader.get(b"c"), Some(sources[1].bytes.as_slice()));
    assert!(!reader.contains_key(b"b"));
    let index = KeyIndex::read_from(&reader, DEFAULT_INDEX_KEY)
        .unwrap()
        .unwrap();
    assert_eq!(index.keys, vec!["a", "c"]);
}

#[test]
fn growth_replays_manifest_until_everything_fits() {
    let temp = TempDir::new().unwrap();
    let sources = uniform_sources(temp.path(), 40, 3000);
    let manifest = Manifest::parse(&manifest_for(&sources)).unwrap();
    let store = store_dir(&temp);

    let config = LoaderConfig::default()
        .initial_capacity(16 * KIB)
        .batch_size(7);
    let mut recorder = Recorder::default();
    let report = BulkLoader::new(config)
        .load(&manifest, &store, &mut recorder)
        .unwrap();

    assert!(report.generations > 1);
    assert_eq!(recorder.growth.len() as u64, report.generations - 1);
    for (from, to, pressure) in &recorder.growth {
        assert_eq!(*pressure, Pressure::CapacityExhausted);
        assert_eq!(*to, from * 2);
    }
    assert!(report.processed >= 40);
    assert!(report.store_generation >= 1);

    let expected: Vec<&str> = sources.iter().map(|source| source.key.as_str()).collect();
    assert_eq!(report.keys, expected);

    let reader = StoreReader::open(&store).unwrap();
    assert!(reader.header().committed_end <= reader.header().reserved_capacity);
    for source in &sources {
        assert_eq!(
            reader.get(source.key.as_bytes()),
            Some(source.bytes.as_slice())
        );
    }
    let index = KeyIndex::read_from(&reader, DEFAULT_INDEX_KEY)
        .unwrap()
        .unwrap();
    assert_eq!(index.keys, expected);
}

#[test]
fn rerunning_a_finished_load_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let sources = uniform_sources(temp.path(), 12, 4096);
    let manifest = Manifest::parse(&manifest_for(&sources)).unwrap();
    let store = store_dir(&temp);
    let loader = BulkLoader::new(small_config().initial_capacity(256 * KIB));

    let first = loader.load(&manifest, &store, &mut NoopObserver).unwrap();
    let first_end = StoreReader::open(&store).unwrap().header().committed_end;

    let second = loader.load(&manifest, &store, &mut NoopObserver).unwrap();
    assert_eq!(first.keys, second.keys);

    let reader = StoreReader::open(&store).unwrap();
    assert_eq!(reader.len(), sources.len() + 1);
    // Only the index is rewritten; record payloads are not appended again.
    assert!(reader.header().committed_end - first_end < 4096);
    for source in &sources {
        assert_eq!(
            reader.get(source.key.as_bytes()),
            Some(source.bytes.as_slice())
        );
    }
}

#[test]
fn batches_commit_every_batch_size_records() {
    let temp = TempDir::new().unwrap();
    let sources = uniform_sources(temp.path(), 25, 256);
    let manifest = Manifest::parse(&manifest_for(&sources)).unwrap();
    let store = store_dir(&temp);

    let mut recorder = Recorder::default();
    let report = BulkLoader::new(small_config().batch_size(10))
        .load(&manifest, &store, &mut recorder)
        .unwrap();

    assert_eq!(recorder.commits, vec![10, 20, 25]);
    // Three record batches plus the index transaction.
    assert_eq!(report.commits, 4);
    assert_eq!(report.generations, 1);
    assert_eq!(recorder.generations.len(), 1);
}

#[test]
fn empty_manifest_still_writes_an_empty_index() {
    let temp = TempDir::new().unwrap();
    let store = store_dir(&temp);
    let config = LoaderConfig::default().initial_capacity_floor(32 * KIB);

    let report = BulkLoader::new(config)
        .load(&Manifest::default(), &store, &mut NoopObserver)
        .unwrap();

    assert!(report.keys.is_empty());
    assert_eq!(report.reserved_capacity, 32 * KIB);
    let index = read_index(&store).unwrap();
    assert!(index.is_empty());
}

#[test]
fn first_capacity_is_sized_from_the_manifest_payload() {
    let temp = TempDir::new().unwrap();
    let sources = uniform_sources(temp.path(), 30, 2000);
    let manifest = Manifest::parse(&manifest_for(&sources)).unwrap();
    let store = store_dir(&temp);

    let mut recorder = Recorder::default();
    let report = BulkLoader::new(LoaderConfig::default())
        .load(&manifest, &store, &mut recorder)
        .unwrap();

    assert_eq!(recorder.generations[0], (1, 30 * 2000));
    // Record headers and the header page do not fit in the raw payload sum.
    assert!(report.generations > 1);
    assert_eq!(report.keys.len(), 30);
}

#[test]
fn tiny_payload_sum_is_raised_to_the_store_minimum() {
    let temp = TempDir::new().unwrap();
    let sources = write_sources(temp.path(), &[("short", 100)]);
    let manifest = Manifest::parse(&manifest_for(&sources)).unwrap();
    let store = store_dir(&temp);

    let mut recorder = Recorder::default();
    let report = BulkLoader::new(LoaderConfig::default())
        .load(&manifest, &store, &mut recorder)
        .unwrap();

    assert_eq!(
        recorder.generations[0].1,
        (HEADER_SIZE + RECORD_HEADER_SIZE) as u64
    );
    assert_eq!(report.keys, vec!["short"]);
}

#[test]
fn missing_or_empty_sources_fall_back_to_the_capacity_floor() {
    let temp = TempDir::new().unwrap();
    let sources = write_sources(temp.path(), &[("silence", 0)]);
    let gone = temp.path().join("audio/gone.wav");
    let lost = temp.path().join("audio/lost.wav");
    let manifest = Manifest::parse(&manifest_text(&[
        ("gone", gone.as_path()),
        ("silence", sources[0].path.as_path()),
        ("lost", lost.as_path()),
    ]))
    .unwrap();
    let store = store_dir(&temp);

    let mut recorder = Recorder::default();
    let report = BulkLoader::new(LoaderConfig::default().initial_capacity_floor(48 * KIB))
        .load(&manifest, &store, &mut recorder)
        .unwrap();

    assert_eq!(recorder.generations, vec![(1, 48 * KIB)]);
    assert_eq!(report.keys, vec!["silence"]);
    assert_eq!(recorder.skipped, vec!["gone", "lost"]);
    let reader = StoreReader::open(&store).unwrap();
    assert_eq!(reader.get(b"silence"), Some(&b""[..]));
}

#[test]
fn manifest_using_the_sentinel_key_is_rejected_before_any_store_io() {
    let temp = TempDir::new().unwrap();
    let sources = write_sources(temp.path(), &[("a", 16)]);
    let manifest = Manifest::parse(&manifest_text(&[
        ("a", sources[0].path.as_path()),
        (DEFAULT_INDEX_KEY, sources[0].path.as_path()),
    ]))
    .unwrap();
    let store = store_dir(&temp);

    match BulkLoader::new(small_config()).load(&manifest, &store, &mut NoopObserver) {
        Err(LoadError::ReservedKey { line, key }) => {
            assert_eq!(line, 2);
            assert_eq!(key, DEFAULT_INDEX_KEY);
        }
        other => panic!("expected ReservedKey, got {other:?}"),
    }
    assert!(!store.join(DATA_FILE_NAME).exists());
}

#[test]
fn custom_index_key_is_honoured() {
    let temp = TempDir::new().unwrap();
    let sources = write_sources(temp.path(), &[("x", 64), ("y", 64)]);
    let manifest = Manifest::parse(&manifest_for(&sources)).unwrap();
    let store = store_dir(&temp);

    BulkLoader::new(small_config().index_key("@index"))
        .load(&manifest, &store, &mut NoopObserver)
        .unwrap();

    let reader = StoreReader::open(&store).unwrap();
    assert!(!reader.contains_key(DEFAULT_INDEX_KEY.as_bytes()));
    let index = KeyIndex::read_from(&reader, "@index").unwrap().unwrap();
    assert_eq!(index.keys, vec!["x", "y"]);
}

#[test]
fn second_loader_fails_fast_while_a_load_is_running() {
    let temp = TempDir::new().unwrap();
    let sources = write_sources(temp.path(), &[("a", 64)]);
    let manifest = Manifest::parse(&manifest_for(&sources)).unwrap();
    let store = store_dir(&temp);
    std::fs::create_dir_all(&store).unwrap();

    let _running = FileLock::open_exclusive(&store.join(LOAD_LOCK_FILE_NAME)).unwrap();
    match BulkLoader::new(small_config()).load(&manifest, &store, &mut NoopObserver) {
        Err(LoadError::Store {
            committed: 0,
            source: StoreError::Locked { .. },
        }) => {}
        other => panic!("expected Locked, got {other:?}"),
    }
}

#[test]
fn loader_fails_fast_when_another_writer_holds_the_store() {
    let temp = TempDir::new().unwrap();
    let sources = write_sources(temp.path(), &[("a", 64)]);
    let manifest = Manifest::parse(&manifest_for(&sources)).unwrap();
    let store = store_dir(&temp);

    let _writer = MappedStore::open(&store, 64 * KIB).unwrap();
    let err = BulkLoader::new(small_config())
        .load(&manifest, &store, &mut NoopObserver)
        .unwrap_err();
    assert!(matches!(
        err,
        LoadError::Store {
            source: StoreError::Locked { .. },
            ..
        }
    ));
    assert_eq!(err.committed_records(), Some(0));
}

#[test]
fn load_file_reports_malformed_manifest_lines() {
    let temp = TempDir::new().unwrap();
    let manifest_path = temp.path().join("wav.scp");
    std::fs::write(&manifest_path, "a /tmp/a.wav\nbroken-line\n").unwrap();

    match BulkLoader::new(small_config()).load_file(
        &manifest_path,
        &store_dir(&temp),
        &mut NoopObserver,
    ) {
        Err(LoadError::MalformedManifest { line, content }) => {
            assert_eq!(line, 2);
            assert_eq!(content, "broken-line");
        }
        other => panic!("expected MalformedManifest, got {other:?}"),
    }
    assert!(!store_dir(&temp).exists());
}
