use plc_telemetry::{
    metrics, new_connection_id, record_frame_received, record_transaction_cancelled,
    record_transaction_completed, record_transaction_failed, record_transaction_submitted,
    record_worker_panic,
};

#[test]
fn connection_ids_are_unique() {
    let first = new_connection_id();
    let second = new_connection_id();
    assert!(!first.is_empty());
    assert_ne!(first, second);
}

#[test]
fn counters_only_grow() {
    let before = metrics().snapshot();
    record_frame_received();
    record_worker_panic();
    let after = metrics().snapshot();
    assert!(after.frames_received > before.frames_received);
    assert!(after.worker_panics > before.worker_panics);
}

#[test]
fn transaction_counters_track_outcomes() {
    let before = metrics().snapshot();
    record_transaction_submitted();
    record_transaction_completed();
    record_transaction_failed();
    record_transaction_cancelled();
    let after = metrics().snapshot();
    assert!(after.transactions_submitted > before.transactions_submitted);
    assert!(after.transactions_completed > before.transactions_completed);
    assert!(after.transactions_failed > before.transactions_failed);
    assert!(after.transactions_cancelled > before.transactions_cancelled);
}
