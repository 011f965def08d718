use cjinx_core::watch::{wait_for_arrival, ArrivalFilter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn flat_filter_accepts_direct_children_only() {
    let td = tempfile::tempdir().unwrap();
    let f = ArrivalFilter::new(td.path(), "*.bin", false).unwrap();
    assert_eq!(f.dir(), td.path());
    assert!(f.matches(&td.path().join("x.bin")));
    assert!(!f.matches(&td.path().join("x.txt")));
    assert!(!f.matches(&td.path().join("sub/x.bin")));
    assert!(!f.matches(std::path::Path::new("/elsewhere/x.bin")));
}

#[test]
fn recursive_filter_accepts_whole_subtree() {
    let td = tempfile::tempdir().unwrap();
    let f = ArrivalFilter::new(td.path(), "part-??.dat", true).unwrap();
    assert!(f.matches(&td.path().join("part-01.dat")));
    assert!(f.matches(&td.path().join("a/b/part-99.dat")));
    assert!(!f.matches(&td.path().join("a/part-100.dat")));
}

#[test]
fn missing_directory_is_refused() {
    let td = tempfile::tempdir().unwrap();
    assert!(ArrivalFilter::new(&td.path().join("nope"), "*", false).unwrap_err().is_precondition());
}

#[test]
fn shutdown_flag_ends_the_wait() {
    let td = tempfile::tempdir().unwrap();
    let f = ArrivalFilter::new(td.path(), "*", false).unwrap();
    let stop = AtomicBool::new(true);
    assert_eq!(wait_for_arrival(&f, &stop).unwrap(), None);
}

#[test]
fn written_file_is_reported() {
    let td = tempfile::tempdir().unwrap();
    let f = ArrivalFilter::new(td.path(), "*.bin", false).unwrap();
    let target = td.path().join("arrived.bin");
    let ignored = td.path().join("ignored.txt");
    let stop = Arc::new(AtomicBool::new(false));

    let writer = {
        let (target, ignored) = (target.clone(), ignored.clone());
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(300));
            std::fs::write(ignored, b"no").unwrap();
            std::fs::write(target, b"yes").unwrap();
        })
    };
    let guard = {
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(10));
            stop.store(true, Ordering::Relaxed);
        })
    };

    let got = wait_for_arrival(&f, &stop).unwrap();
    writer.join().unwrap();
    assert_eq!(got, Some(target));
    drop(guard);
}
