//! Deferred value graph tests over the public API
//!
//! Covers composition shapes the unit tests don't: diamond dependencies,
//! mixed map/join DAGs, settlement arriving from multiple threads, and the
//! typed wrapper end to end.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use stratus::{Fault, Output, OutputHandle, Settled};

fn resolved_value(handle: &OutputHandle) -> Value {
    match handle.peek() {
        Some(Settled::Resolved(v)) => v,
        other => panic!("expected resolved, got {:?}", other),
    }
}

#[test]
fn diamond_dependency_fires_tip_once() {
    let root = OutputHandle::pending("root");
    let left = root.map_value("left", |v| Ok(json!(v.as_i64().unwrap() * 2)));
    let right = root.map_value("right", |v| Ok(json!(v.as_i64().unwrap() + 10)));

    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    let tip = OutputHandle::combine("tip", &[left, right], move |values| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(json!(
            values[0].as_i64().unwrap() + values[1].as_i64().unwrap()
        ))
    });

    root.resolve(json!(3)).unwrap();

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(resolved_value(&tip), json!(19)); // 3*2 + 3+10
}

#[test]
fn diamond_failure_reaches_tip_through_both_arms() {
    let root = OutputHandle::pending("root");
    let left = root.map_value("left", Ok);
    let right = root.map_value("right", Ok);
    let tip = OutputHandle::join("tip", &[left, right]);

    root.fail(Fault::new("provisioning rejected", "root")).unwrap();

    match tip.peek() {
        Some(Settled::Failed(f)) => {
            assert_eq!(f.origin(), "root");
            assert!(f.message().contains("provisioning rejected"));
        }
        other => panic!("expected failed, got {:?}", other),
    }
}

#[test]
fn join_of_mixed_settled_and_pending_inputs() {
    let a = OutputHandle::resolved("a", json!("already"));
    let b = OutputHandle::pending("b");
    let all = OutputHandle::join("ab", &[a, b.clone()]);

    assert!(all.peek().is_none());
    b.resolve(json!("later")).unwrap();
    assert_eq!(resolved_value(&all), json!(["already", "later"]));
}

#[test]
fn settlement_from_worker_threads_reaches_combinator() {
    let inputs: Vec<OutputHandle> = (0..16)
        .map(|i| OutputHandle::pending(format!("in{}", i)))
        .collect();
    let all = OutputHandle::join("all", &inputs);

    let threads: Vec<_> = inputs
        .iter()
        .enumerate()
        .map(|(i, h)| {
            let h = h.clone();
            std::thread::spawn(move || h.resolve(json!(i)).unwrap())
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    let values = resolved_value(&all);
    let expected: Vec<i64> = (0..16).collect();
    let got: Vec<i64> = values
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_i64().unwrap())
        .collect();
    assert_eq!(got, expected);
}

#[test]
fn fault_identifies_failed_input_among_siblings() {
    let a = OutputHandle::pending("storage-account");
    let b = OutputHandle::pending("key-vault");
    let c = OutputHandle::pending("log-workspace");
    let all = OutputHandle::join("all", &[a.clone(), b.clone(), c.clone()]);

    b.fail(Fault::new("SKU not available", "key-vault")).unwrap();
    a.resolve(json!(1)).unwrap();
    c.fail(Fault::new("second failure", "log-workspace")).unwrap();

    // first fault wins and names its origin; later sibling faults are not
    // leaked into the composite
    match all.peek() {
        Some(Settled::Failed(f)) => {
            assert_eq!(f.origin(), "key-vault");
            assert!(f.message().contains("SKU not available"));
        }
        other => panic!("expected failed, got {:?}", other),
    }
}

#[tokio::test]
async fn typed_chain_end_to_end() {
    let base: Output<String> = Output::pending("region");
    let upper = base.map("region.upper", |s: String| s.to_uppercase());
    let tagged = upper.map("region.tagged", |s: String| format!("az-{}", s));

    base.resolve("eastus".to_string()).unwrap();

    assert_eq!(tagged.get().await.unwrap(), "az-EASTUS");
}

#[tokio::test]
async fn typed_get_surfaces_fault() {
    let out: Output<i64> = Output::pending("doomed");
    out.fail(Fault::new("network timeout", "doomed")).unwrap();

    let fault = out.get().await.unwrap_err();
    assert!(fault.message().contains("network timeout"));
}

#[tokio::test]
async fn settled_future_observes_failure() {
    let handle = OutputHandle::pending("late-failure");
    let waiter = {
        let h = handle.clone();
        tokio::spawn(async move { h.settled().await })
    };
    tokio::task::yield_now().await;
    handle.fail(Fault::new("boom", "late-failure")).unwrap();

    match waiter.await.unwrap() {
        Settled::Failed(f) => assert_eq!(f.origin(), "late-failure"),
        other => panic!("expected failed, got {:?}", other),
    }
}
