use cjinx_core::error::StoreError;
use cjinx_core::record::{CorruptionRecord, RecordState};
use cjinx_core::store::{JsonRecordStore, RecordStore};
use std::fs;
use std::path::{Path, PathBuf};

fn rec(path: &str, block: u64, state: RecordState) -> CorruptionRecord {
    CorruptionRecord {
        path: PathBuf::from(path),
        mtime: 1_696_000_000.123_456,
        device: "/dev/sdb1".into(),
        block,
        offset: 0,
        original: 0x41,
        modified: 0xC1,
        state,
        created_utc: "2026-10-18T09:00:00+00:00".into(),
    }
}

#[test]
fn open_creates_parent_and_empty_document() {
    let td = tempfile::tempdir().unwrap();
    let db = td.path().join("nested/dir/records.json");
    let store = JsonRecordStore::open(&db).unwrap();
    assert_eq!(store.path(), db.as_path());
    assert!(db.is_file());
    let doc: serde_json::Value = serde_json::from_slice(&fs::read(&db).unwrap()).unwrap();
    assert_eq!(doc["version"], 1);
    assert!(store.get_all().unwrap().is_empty());
}

#[test]
fn records_survive_reopen() {
    let td = tempfile::tempdir().unwrap();
    let db = td.path().join("records.json");
    let mut store = JsonRecordStore::open(&db).unwrap();
    let a = rec("/data/a", 10, RecordState::Committed);
    let b = rec("/data/b", 20, RecordState::Staged);
    store.insert(a.clone()).unwrap();
    store.insert(b.clone()).unwrap();
    drop(store);

    let store = JsonRecordStore::open(&db).unwrap();
    assert_eq!(store.get_all().unwrap(), vec![a.clone(), b]);
    assert_eq!(store.get_by_filename(Path::new("/data/a")).unwrap(), Some(a));
    assert_eq!(store.get_by_filename(Path::new("/data/zzz")).unwrap(), None);
}

#[test]
fn duplicate_path_is_rejected() {
    let td = tempfile::tempdir().unwrap();
    let mut store = JsonRecordStore::open(td.path().join("r.json")).unwrap();
    store.insert(rec("/data/a", 1, RecordState::Committed)).unwrap();
    let err = store.insert(rec("/data/a", 2, RecordState::Committed)).unwrap_err();
    assert!(matches!(err, StoreError::Duplicate(p) if p == Path::new("/data/a")));
    assert_eq!(store.get_all().unwrap().len(), 1);
}

#[test]
fn delete_reports_whether_anything_went() {
    let td = tempfile::tempdir().unwrap();
    let mut store = JsonRecordStore::open(td.path().join("r.json")).unwrap();
    store.insert(rec("/data/a", 1, RecordState::Committed)).unwrap();
    assert!(store.delete_by_filename(Path::new("/data/a")).unwrap());
    assert!(!store.delete_by_filename(Path::new("/data/a")).unwrap());
    assert!(store.get_all().unwrap().is_empty());
}

#[test]
fn mark_committed_flips_state() {
    let td = tempfile::tempdir().unwrap();
    let mut store = JsonRecordStore::open(td.path().join("r.json")).unwrap();
    store.insert(rec("/data/a", 1, RecordState::Staged)).unwrap();
    store.mark_committed(Path::new("/data/a")).unwrap();
    assert!(store.get_by_filename(Path::new("/data/a")).unwrap().unwrap().is_committed());
    assert!(matches!(store.mark_committed(Path::new("/data/b")), Err(StoreError::Missing(_))));
}

#[test]
fn blank_file_reads_as_empty_and_garbage_is_an_error() {
    let td = tempfile::tempdir().unwrap();
    let db = td.path().join("r.json");
    fs::write(&db, "  \n").unwrap();
    let store = JsonRecordStore::open(&db).unwrap();
    assert!(store.get_all().unwrap().is_empty());

    fs::write(&db, "{ not json").unwrap();
    assert!(matches!(store.get_all(), Err(StoreError::Json { .. })));
}

#[test]
fn records_without_state_load_as_committed() {
    let td = tempfile::tempdir().unwrap();
    let db = td.path().join("r.json");
    fs::write(
        &db,
        r#"{"version":1,"records":[{"path":"/data/old","mtime":1.5,"device":"/dev/sda1","block":7,"offset":0,"original":65,"modified":193}]}"#,
    )
    .unwrap();
    let store = JsonRecordStore::open(&db).unwrap();
    let r = store.get_by_filename(Path::new("/data/old")).unwrap().unwrap();
    assert_eq!(r.state, RecordState::Committed);
    assert_eq!((r.block, r.original, r.modified), (7, 0x41, 0xC1));
}

#[test]
fn no_temp_files_left_behind() {
    let td = tempfile::tempdir().unwrap();
    let mut store = JsonRecordStore::open(td.path().join("r.json")).unwrap();
    for i in 0..5 {
        store.insert(rec(&format!("/data/{i}"), i, RecordState::Committed)).unwrap();
    }
    let mut names: Vec<String> = fs::read_dir(td.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["r.json".to_string(), "r.json.lock".to_string()]);
}

#[test]
fn unknown_format_version_is_refused_and_left_alone() {
    let td = tempfile::tempdir().unwrap();
    let db = td.path().join("r.json");
    let future = r#"{"version":2,"records":[]}"#;
    fs::write(&db, future).unwrap();
    let mut store = JsonRecordStore::open(&db).unwrap();

    assert!(matches!(
        store.get_all(),
        Err(StoreError::Version { found: 2, expected: 1, .. })
    ));
    assert!(matches!(
        store.insert(rec("/data/a", 1, RecordState::Committed)),
        Err(StoreError::Version { .. })
    ));
    assert_eq!(fs::read_to_string(&db).unwrap(), future);
}
