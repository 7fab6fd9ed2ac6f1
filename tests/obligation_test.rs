use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use obligation::{Obligation, WaitError};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn waits_for_a_background_fulfillment() {
    init_logging();
    let (cell, writer) = Obligation::<u32, String>::create();
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        writer.fulfill(42).unwrap();
    });
    let start = Instant::now();
    assert_eq!(cell.value().unwrap(), 42);
    let elapsed = start.elapsed();
    assert!(
        elapsed >= Duration::from_millis(150),
        "woke before the producer settled: {elapsed:?}"
    );
    assert!(elapsed < Duration::from_secs(2), "woke far too late: {elapsed:?}");
}

#[test]
fn timeout_is_not_early_and_leaves_the_cell_pending() {
    init_logging();
    let (cell, _writer) = Obligation::<u32, String>::create();
    let start = Instant::now();
    assert_eq!(
        cell.value_timeout(Duration::from_millis(300)),
        Err(WaitError::Timeout)
    );
    let elapsed = start.elapsed();
    assert!(
        elapsed >= Duration::from_millis(300),
        "gave up before the deadline: {elapsed:?}"
    );
    assert!(
        elapsed < Duration::from_secs(2),
        "overshot the deadline: {elapsed:?}"
    );
    assert!(cell.is_pending());
}

#[test]
fn rejection_cause_keeps_its_identity_across_threads_and_chains() {
    init_logging();
    let cause = Arc::new("disk on fire".to_string());
    let (cell, writer) = Obligation::<u32, Arc<String>>::create();
    let derived = cell.then(|x| Ok(x + 1));
    let settled = Arc::clone(&cause);
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        writer.reject(settled).unwrap();
    });
    let err = derived.value().unwrap_err();
    let seen = err.cause().expect("rejection carries a cause");
    assert!(Arc::ptr_eq(seen, &cause));
}

#[test]
fn chained_transforms_resolve_in_one_read() {
    init_logging();
    let (cell, writer) = Obligation::<i64, String>::create();
    let derived = cell.then(|x| Ok(x - 5)).then(|x| Ok(x + 1300));
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        writer.fulfill(42).unwrap();
    });
    let start = Instant::now();
    assert_eq!(derived.value().unwrap(), 1337);
    let elapsed = start.elapsed();
    assert!(
        elapsed >= Duration::from_millis(150),
        "woke before the producer settled: {elapsed:?}"
    );
    assert!(
        elapsed < Duration::from_secs(2),
        "each chain stage waited on its own: {elapsed:?}"
    );
}

#[test]
fn a_transform_returning_an_obligation_is_waited_through() {
    init_logging();
    let (cell, writer) = Obligation::<i64, String>::create();
    let derived = cell.then(|x| {
        Obligation::create_with(|inner| {
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(100));
                inner.fulfill(x + 15).unwrap();
            });
        })
    });
    writer.fulfill(42).unwrap();
    assert_eq!(derived.value().unwrap(), 57);
}

#[test]
fn join_feeds_the_transform_in_upstream_order() {
    init_logging();
    let (slow, slow_writer) = Obligation::<u32, String>::create();
    let (fast, fast_writer) = Obligation::<u32, String>::create();
    let joined = Obligation::on([slow, fast]).then(|sides| Ok(sides[0] * 10 + sides[1]));
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(150));
        slow_writer.fulfill(1).unwrap();
    });
    fast_writer.fulfill(2).unwrap();
    assert_eq!(joined.value().unwrap(), 12);
}

#[test]
fn every_reader_sees_the_same_result() {
    init_logging();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let (cell, writer) = Obligation::<u64, String>::create();
    let derived = cell.then(move |x| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(x * x)
    });
    let readers: Vec<_> = (0..16)
        .map(|_| {
            let derived = derived.clone();
            thread::spawn(move || derived.value().unwrap())
        })
        .collect();
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        writer.fulfill(12).unwrap();
    });
    for reader in readers {
        assert_eq!(reader.join().unwrap(), 144);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
