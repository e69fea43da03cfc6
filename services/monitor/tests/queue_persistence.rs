/// Pending-queue persistence across a restart.
///
/// Graceful shutdown serializes both queues to the state directory; startup
/// recovers them with identical contents and consumes the files.
use monitor::storage::{PendingInference, PendingPage, PendingQueues};

#[test]
fn queues_are_recovered_with_identical_contents() {
    let dir = tempfile::tempdir().expect("create temp dir");

    let queues = PendingQueues::new();
    for i in 0..5 {
        queues.inference().push(PendingInference {
            mrn: format!("10{i:02}"),
            timestamp: format!("2024010112000{i}"),
        });
    }
    queues.pages().push(PendingPage {
        mrn: "2001".to_owned(),
        timestamp: "20240102130000".to_owned(),
    });

    let inference_before = queues.inference().clone();
    let pages_before = queues.pages().clone();

    queues.persist(dir.path()).expect("persist");
    let restored = PendingQueues::load(dir.path()).expect("load");

    assert_eq!(*restored.inference(), inference_before);
    assert_eq!(*restored.pages(), pages_before);
}

#[test]
fn persisted_files_are_consumed_on_load() {
    let dir = tempfile::tempdir().expect("create temp dir");

    let queues = PendingQueues::new();
    queues.inference().push(PendingInference {
        mrn: "1001".to_owned(),
        timestamp: "20240101120000".to_owned(),
    });
    queues.persist(dir.path()).expect("persist");

    let _restored = PendingQueues::load(dir.path()).expect("first load");
    let empty = PendingQueues::load(dir.path()).expect("second load");
    assert!(empty.inference().is_empty());
    assert!(empty.pages().is_empty());
}

#[test]
fn empty_queues_persist_and_restore_empty() {
    let dir = tempfile::tempdir().expect("create temp dir");
    PendingQueues::new().persist(dir.path()).expect("persist");
    let restored = PendingQueues::load(dir.path()).expect("load");
    assert!(restored.inference().is_empty());
    assert!(restored.pages().is_empty());
}
