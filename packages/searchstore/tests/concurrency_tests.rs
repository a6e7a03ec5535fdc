//! Concurrent producers racing commits
//!
//! Every intent enqueued while commits are running must be sent exactly
//! once: either in a captured batch or in a later one.

mod common;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use common::*;
use parking_lot::Mutex;
use searchstore::{
    ActionQueue, BatchExecutionContext, BulkConfig, EngineOp, InMemoryEngine, WriteIntent,
};
use serde_json::json;

const PRODUCERS: usize = 8;
const PER_PRODUCER: usize = 400;

// ═══════════════════════════════════════════════════════════════════════════
// Write Queue
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_concurrent_enqueue_and_commit_loses_nothing() {
    let engine = InMemoryEngine::new();
    let queue = Arc::new(ActionQueue::new());
    let barrier = Arc::new(Barrier::new(PRODUCERS + 1));
    let done = Arc::new(AtomicBool::new(false));
    let committed = Arc::new(Mutex::new(Vec::new()));
    let bulk = BulkConfig {
        worker_count: 3,
        chunk_size: 64,
    };

    let committer = {
        let engine = engine.clone();
        let queue = Arc::clone(&queue);
        let barrier = Arc::clone(&barrier);
        let done = Arc::clone(&done);
        let committed = Arc::clone(&committed);
        thread::spawn(move || {
            barrier.wait();
            while !done.load(Ordering::SeqCst) {
                let outcome = queue.commit(&engine, bulk).unwrap();
                committed
                    .lock()
                    .extend(outcome.items.into_iter().map(|item| item.id));
            }
        })
    };

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let queue = Arc::clone(&queue);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..PER_PRODUCER {
                    let id = format!("p{p}-{i}");
                    queue.enqueue(WriteIntent::index("thing", &id, doc(json!({"p": p, "i": i}))));
                }
            })
        })
        .collect();

    for producer in producers {
        producer.join().unwrap();
    }
    done.store(true, Ordering::SeqCst);
    committer.join().unwrap();

    // Whatever the committer didn't capture is still pending
    let rest = queue.commit(&engine, bulk).unwrap();
    let mut all = Arc::try_unwrap(committed).unwrap().into_inner();
    all.extend(rest.items.into_iter().map(|item| item.id));

    let unique: HashSet<&String> = all.iter().collect();
    assert_eq!(all.len(), PRODUCERS * PER_PRODUCER, "no intent sent twice");
    assert_eq!(unique.len(), PRODUCERS * PER_PRODUCER, "no intent lost");
    assert!(queue.is_empty());
    assert_eq!(engine.doc_count("thing"), PRODUCERS * PER_PRODUCER);
}

#[test]
fn test_per_producer_order_survives_concurrent_commit() {
    let engine = InMemoryEngine::new();
    let queue = Arc::new(ActionQueue::new());
    let barrier = Arc::new(Barrier::new(2));

    let producer = {
        let queue = Arc::clone(&queue);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            for i in 0..1000 {
                queue.enqueue(WriteIntent::index("thing", &format!("{i:05}"), doc(json!({}))));
            }
        })
    };

    barrier.wait();
    let mut sent = Vec::new();
    for _ in 0..20 {
        sent.extend(
            queue
                .commit(&engine, BulkConfig::default())
                .unwrap()
                .items
                .into_iter()
                .map(|item| item.id),
        );
    }
    producer.join().unwrap();
    sent.extend(
        queue
            .commit(&engine, BulkConfig::default())
            .unwrap()
            .items
            .into_iter()
            .map(|item| item.id),
    );

    let expected: Vec<String> = (0..1000).map(|i| format!("{i:05}")).collect();
    assert_eq!(sent, expected);
}

// ═══════════════════════════════════════════════════════════════════════════
// Query Registration
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_concurrent_query_registration() {
    let engine = InMemoryEngine::new();
    searchstore::SearchEngine::index(&engine, "thing", "1", &json!({"n": 1})).unwrap();
    let context = Arc::new(BatchExecutionContext::new(BulkConfig::default()));
    let barrier = Arc::new(Barrier::new(PRODUCERS));

    let handles: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let context = Arc::clone(&context);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..25 {
                    context.register_query(
                        format!("q-{p}-{i}"),
                        "thing",
                        json!({"query": {"match_all": {}}, "size": 0}),
                        None,
                    );
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(context.pending_queries(), PRODUCERS * 25);
    let results = context.batch_query(&engine).unwrap();
    assert_eq!(results.len(), PRODUCERS * 25);
    assert_eq!(engine.call_count(EngineOp::Msearch), 1);
    assert_eq!(context.pending_queries(), 0);
}
