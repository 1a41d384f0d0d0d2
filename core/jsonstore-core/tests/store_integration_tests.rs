// Store integration tests
//
// End-to-end checks across repository, readers and dataset: write/read
// round trips, rotation, archive handling and the parallel index build.

use chrono::{Duration, TimeZone, Utc};
use jsonstore_core::config::{Column, DatasetConfig, Mode, RepositoryConfig, Rotation};
use jsonstore_core::dataset::Dataset;
use jsonstore_core::dump::{IMPORT_DIR, IMPORTED_DIR, ManualClock, OWN_DIR, Repository};
use jsonstore_core::handle::Handle;
use jsonstore_core::reader::DumpReader;
use jsonstore_core::record::{self, Record, record_of};
use jsonstore_core::storage::compression::{CompressionLevel, gzip_bytes};
use serde_json::json;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

// ─── Helpers ────────────────────────────────────────────

fn user(i: usize) -> Record {
    record_of([
        ("id", json!(i)),
        ("screen_name", json!(format!("User{i}"))),
        ("bio", json!(format!("bio of user {i}, ünïcödé"))),
        ("tags", json!(["a", "b"])),
    ])
}

fn clock_at(y: i32, m: u32, d: u32, h: u32) -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()))
}

fn dataset_config(root: &Path, mode: Mode, workers: usize) -> DatasetConfig {
    DatasetConfig::new(
        RepositoryConfig::new(root, "users_").with_mode(mode),
        vec![Column::case_sensitive("id"), Column::case_insensitive("screen_name")],
    )
    .with_concurrency(workers)
    .with_queue_capacity(8)
}

fn write_dump(path: &Path, lines: &[String]) {
    let mut text = lines.join("\n");
    text.push('\n');
    fs::write(path, text).unwrap();
}

// ═══════════════════════════════════════════════════════════
// Round trips
// ═══════════════════════════════════════════════════════════

#[test]
fn write_then_read_handle_round_trip() {
    for mode in [Mode::Rewritable, Mode::Compressed] {
        let dir = tempdir().unwrap();
        let repo = Repository::open(RepositoryConfig::new(dir.path(), "rt_").with_mode(mode)).unwrap();

        let handles: Vec<(Record, Handle)> = (0..50)
            .map(|i| {
                let r = user(i);
                let h = repo.write(&r).unwrap();
                (r, h)
            })
            .collect();
        for (r, h) in &handles {
            assert_eq!(&h.record().unwrap(), r);
        }
        assert_eq!(handles[0].1.is_lazy(), mode == Mode::Rewritable);
    }
}

#[test]
fn handle_offsets_address_exact_lines() {
    let dir = tempdir().unwrap();
    let repo = Repository::open(RepositoryConfig::new(dir.path(), "off_")).unwrap();
    let written: Vec<_> = (0..200).map(|i| (user(i), repo.write(&user(i)).unwrap())).collect();

    let bytes = fs::read(repo.current_dump_path().unwrap()).unwrap();
    for (r, h) in &written {
        let (_, offset, length) = h.location().unwrap();
        let line = &bytes[offset as usize..offset as usize + length];
        assert!(!line.contains(&b'\n'));
        assert_eq!(&record::parse_line("dump", line).unwrap(), r);
    }
}

#[test]
fn scan_sees_records_in_append_order() {
    let dir = tempdir().unwrap();
    let repo = Repository::open(RepositoryConfig::new(dir.path(), "ord_")).unwrap();
    for i in 0..100 {
        repo.write(&user(i)).unwrap();
    }
    let path = repo.current_dump_path().unwrap();
    let offsets: Vec<u64> = repo
        .iterate(&path)
        .unwrap()
        .map(|s| s.unwrap().offset.unwrap())
        .collect();
    assert_eq!(offsets.len(), 100);
    assert!(offsets.windows(2).all(|w| w[0] < w[1]));
}

// ═══════════════════════════════════════════════════════════
// Rotation
// ═══════════════════════════════════════════════════════════

#[test]
fn rotation_splits_records_between_files() {
    for mode in [Mode::Rewritable, Mode::Compressed] {
        let dir = tempdir().unwrap();
        let clock = clock_at(2026, 6, 30, 20);
        let config = RepositoryConfig::new(dir.path(), "rot_").with_mode(mode);
        let repo = Repository::open_with_clock(config, clock.clone()).unwrap();

        for i in 0..3 {
            repo.write(&user(i)).unwrap();
        }
        let june = repo.current_dump_path().unwrap();
        clock.advance(Duration::hours(6));
        for i in 3..5 {
            repo.write(&user(i)).unwrap();
        }
        let july = repo.current_dump_path().unwrap();
        repo.await_conversions();

        let dumps: Vec<_> = repo.get_own_dumps(usize::MAX).unwrap().into_iter().collect();
        assert_eq!(dumps.len(), 2);
        assert_eq!(dumps[1], july);
        assert!(july.exists());

        let old_records: Vec<Record> = DumpReader::open_path(&dumps[0], mode, 1024)
            .unwrap()
            .map(|s| (*s.unwrap().record).clone())
            .collect();
        assert_eq!(old_records, (0..3).map(user).collect::<Vec<_>>());
        let new_records = DumpReader::open_path(&july, mode, 1024).unwrap().count();
        assert_eq!(new_records, 2);

        match mode {
            Mode::Compressed => {
                assert!(!june.exists());
                assert!(dumps[0].to_string_lossy().ends_with(".txt.gz"));
            }
            Mode::Rewritable => assert_eq!(dumps[0], june),
        }
    }
}

#[test]
fn daily_rotation_uses_day_suffix() {
    let dir = tempdir().unwrap();
    let clock = clock_at(2026, 2, 27, 12);
    let config = RepositoryConfig::new(dir.path(), "day_").with_rotation(Rotation::Daily);
    let repo = Repository::open_with_clock(config, clock.clone()).unwrap();
    for _ in 0..3 {
        repo.write(&user(0)).unwrap();
        clock.advance(Duration::days(1));
    }
    let names: Vec<String> = repo
        .get_own_dumps(usize::MAX)
        .unwrap()
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy()[..12].to_string())
        .collect();
    assert_eq!(names, vec!["day_20260227", "day_20260228", "day_20260301"]);
}

// ═══════════════════════════════════════════════════════════
// Archives
// ═══════════════════════════════════════════════════════════

#[test]
fn corrupt_archive_is_excluded_from_index() {
    jsonstore_core::logging::init_test();
    let dir = tempdir().unwrap();
    let own = dir.path().join(OWN_DIR);
    fs::create_dir_all(&own).unwrap();
    fs::write(
        own.join("users_202401_00000001.txt.gz"),
        gzip_bytes(b"{\"id\":1,\"screen_name\":\"Old\"}\n", CompressionLevel::Best).unwrap(),
    )
    .unwrap();
    fs::write(own.join("users_202402_00000002.txt.gz"), b"\x1f\x8bnot really").unwrap();

    let dataset = Dataset::open_with_config(dataset_config(dir.path(), Mode::Rewritable, 2)).unwrap();
    assert!(own.join("users_202401_00000001.txt").exists());
    assert!(own.join("users_202402_00000002.txt.gz.invalid").exists());
    assert_eq!(dataset.size(), 1);
    assert!(dataset.lookup("id", 1).unwrap().unwrap().is_lazy());
}

#[test]
fn compressed_dataset_reads_archives_by_stream() {
    let dir = tempdir().unwrap();
    let own = dir.path().join(OWN_DIR);
    fs::create_dir_all(&own).unwrap();
    let lines: Vec<String> = (0..20)
        .map(|i| record::to_line(&user(i)).map(|l| String::from_utf8(l).unwrap()).unwrap())
        .collect();
    write_dump(&own.join("users_202301_00000003.txt"), &lines);

    let dataset = Dataset::open_with_config(dataset_config(dir.path(), Mode::Compressed, 3)).unwrap();
    // the old dump was archived before indexing
    assert!(own.join("users_202301_00000003.txt.gz").exists());
    assert_eq!(dataset.size(), 20);
    let found = dataset.get("screen_name", "user7").unwrap().unwrap();
    assert_eq!(found, user(7));
    assert!(matches!(
        dataset.lookup("id", 7).unwrap().unwrap(),
        Handle::Capsule { .. }
    ));
}

// ═══════════════════════════════════════════════════════════
// Dataset
// ═══════════════════════════════════════════════════════════

#[test]
fn every_record_is_indexed_for_any_worker_count() {
    let dir = tempdir().unwrap();
    let own = dir.path().join(OWN_DIR);
    fs::create_dir_all(&own).unwrap();
    let mut id = 0;
    for f in 0..4 {
        let lines: Vec<String> = (0..500)
            .map(|_| {
                id += 1;
                format!("{{\"id\":{id},\"screen_name\":\"n{id}\"}}")
            })
            .collect();
        write_dump(&own.join(format!("users_20250{}_0000000{f}.txt", f + 1)), &lines);
    }

    for workers in [1, 2, 7, 32] {
        let dataset = Dataset::open_with_config(dataset_config(dir.path(), Mode::Rewritable, workers)).unwrap();
        assert_eq!(dataset.size(), 2000, "workers = {workers}");
        assert!(dataset.lookup("id", 1).unwrap().is_some());
        assert!(dataset.lookup("id", 2000).unwrap().is_some());
        assert!(dataset.lookup("id", 2001).unwrap().is_none());
    }
}

#[test]
fn one_malformed_line_among_thousand() {
    jsonstore_core::logging::init_test();
    let dir = tempdir().unwrap();
    let own = dir.path().join(OWN_DIR);
    fs::create_dir_all(&own).unwrap();
    let lines: Vec<String> = (0..1000)
        .map(|i| {
            if i == 123 {
                "{\"id\": 123, \"screen_name\": ".to_string()
            } else {
                format!("{{\"id\":{i},\"screen_name\":\"n{i}\"}}")
            }
        })
        .collect();
    write_dump(&own.join("users_202405_00000009.txt"), &lines);

    let dataset = Dataset::open_with_config(dataset_config(dir.path(), Mode::Rewritable, 4)).unwrap();
    assert_eq!(dataset.size(), 999);
    assert!(dataset.lookup("id", 123).unwrap().is_none());
    assert!(dataset.lookup("id", 124).unwrap().is_some());
}

#[test]
fn duplicate_keys_resolve_to_earliest_record_on_rebuild() {
    let dir = tempdir().unwrap();
    let own = dir.path().join(OWN_DIR);
    fs::create_dir_all(&own).unwrap();
    write_dump(
        &own.join("users_202404_00000001.txt"),
        &[
            "{\"id\":1,\"screen_name\":\"Foo\",\"v\":\"older file\"}".to_string(),
        ],
    );
    let lines: Vec<String> = (0..300)
        .map(|i| format!("{{\"id\":1,\"screen_name\":\"FOO\",\"v\":{i}}}"))
        .collect();
    write_dump(&own.join("users_202405_00000001.txt"), &lines);

    for workers in [1, 8] {
        let dataset = Dataset::open_with_config(dataset_config(dir.path(), Mode::Rewritable, workers)).unwrap();
        let found = dataset.get("screen_name", "foo").unwrap().unwrap();
        assert_eq!(found["v"], json!("older file"));
        assert_eq!(dataset.size(), 1);
    }
}

#[test]
fn put_unique_keeps_first_and_still_appends() {
    let dir = tempdir().unwrap();
    let dataset = Dataset::open_with_config(dataset_config(dir.path(), Mode::Rewritable, 2)).unwrap();

    let first = record_of([("id", json!(9)), ("screen_name", json!("Foo"))]);
    let second = record_of([("id", json!(9)), ("screen_name", json!("foo")), ("late", json!(true))]);
    dataset.put_unique(&first).unwrap();
    dataset.put_unique(&second).unwrap();

    assert_eq!(dataset.get("id", 9).unwrap().unwrap(), first);
    assert_eq!(dataset.get("screen_name", "FOO").unwrap().unwrap(), first);
    let path = dataset.repository().current_dump_path().unwrap();
    assert_eq!(fs::read_to_string(path).unwrap().lines().count(), 2);
}

#[test]
fn case_sensitive_column_keeps_variants_apart() {
    let dir = tempdir().unwrap();
    let config = DatasetConfig::new(
        RepositoryConfig::new(dir.path(), "cs_"),
        vec![Column::case_sensitive("exact"), Column::case_insensitive("folded")],
    );
    let dataset = Dataset::open_with_config(config).unwrap();
    dataset
        .put_unique(&record_of([("exact", json!("Foo")), ("folded", json!("Foo"))]))
        .unwrap();
    dataset
        .put_unique(&record_of([("exact", json!("foo")), ("folded", json!("foo"))]))
        .unwrap();

    let exact_upper = dataset.lookup("exact", "Foo").unwrap().unwrap();
    let exact_lower = dataset.lookup("exact", "foo").unwrap().unwrap();
    assert!(!exact_upper.same_record(&exact_lower));
    let folded_upper = dataset.lookup("folded", "Foo").unwrap().unwrap();
    let folded_lower = dataset.lookup("folded", "foo").unwrap().unwrap();
    assert!(folded_upper.same_record(&folded_lower));
    assert!(folded_upper.same_record(&exact_upper));
}

#[test]
fn imports_are_appended_and_shifted() {
    let dir = tempdir().unwrap();
    let import = dir.path().join(IMPORT_DIR);
    fs::create_dir_all(&import).unwrap();
    write_dump(
        &import.join("users_202403_00000005.txt"),
        &[
            "{\"id\":100,\"screen_name\":\"Remote\",\"$U\":\"peer-a\"}".to_string(),
            "garbage".to_string(),
            "{\"id\":101,\"screen_name\":\"Other\"}".to_string(),
        ],
    );

    let dataset = Dataset::open_with_config(dataset_config(dir.path(), Mode::Rewritable, 2)).unwrap();
    assert!(!import.join("users_202403_00000005.txt").exists());
    assert!(dir.path().join(IMPORTED_DIR).join("users_202403_00000005.txt").exists());
    assert_eq!(dataset.size(), 2);
    assert_eq!(
        dataset.get("id", 100).unwrap().unwrap(),
        record_of([("id", json!(100)), ("screen_name", json!("Remote"))])
    );
    dataset.close().unwrap();

    // the replayed records now live in the own log
    let reopened = Dataset::open_with_config(dataset_config(dir.path(), Mode::Rewritable, 2)).unwrap();
    assert_eq!(reopened.size(), 2);
    assert!(reopened.repository().get_import_dumps(usize::MAX).unwrap().is_empty());
}

#[test]
fn concurrent_put_unique_and_lookup() {
    let dir = tempdir().unwrap();
    let dataset = Arc::new(
        Dataset::open_with_config(dataset_config(dir.path(), Mode::Rewritable, 2)).unwrap(),
    );

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let dataset = Arc::clone(&dataset);
            std::thread::spawn(move || {
                for i in 0..250 {
                    let id = t * 250 + i;
                    let h = dataset.put_unique(&user(id)).unwrap();
                    let found = dataset.lookup("id", id).unwrap().unwrap();
                    assert!(found.same_record(&h));
                }
            })
        })
        .collect();
    for w in writers {
        w.join().unwrap();
    }
    assert_eq!(dataset.size(), 1000);
    assert_eq!(dataset.get("id", 777).unwrap().unwrap(), user(777));
}
