//! Integration test: request multiplexing under concurrency.
//!
//! Requests issued concurrently on one connection may complete out of
//! order; every future must resolve with the response carrying its own
//! id.

use periscope_client::CallArg;
use periscope_integration_tests::{warehouse_runtime, Harness};

#[tokio::test]
async fn concurrent_invocations_correlate() {
    let harness = Harness::start(warehouse_runtime()).await;
    let proxy = harness
        .client
        .create("Warehouse.Crate", [CallArg::from(0)])
        .await
        .expect("create");

    // Fifty concurrent unit increments; each response is the running
    // total at some point, and the final weight is exact.
    let mut joins = Vec::new();
    for _ in 0..50 {
        let proxy = proxy.clone();
        joins.push(tokio::spawn(async move {
            proxy
                .invoke("AddWeight", [CallArg::from(1)])
                .await
                .expect("invoke")
                .expect("non-void")
                .as_i64()
                .expect("integer")
        }));
    }

    let mut seen = Vec::new();
    for join in joins {
        seen.push(join.await.expect("join"));
    }
    seen.sort_unstable();
    let expected: Vec<i64> = (1..=50).collect();
    assert_eq!(seen, expected, "every increment observed exactly once");

    let weight = proxy.get_property("Weight").await.expect("property");
    assert_eq!(weight.as_i64(), Some(50));

    harness.shutdown().await;
}

#[tokio::test]
async fn mixed_verbs_interleave_without_crosstalk() {
    let mut runtime = warehouse_runtime();
    runtime.new_instance("Warehouse.Crate", None).expect("alloc");
    let harness = Harness::start(runtime).await;

    let client = harness.client.clone();
    let pings = tokio::spawn({
        let client = client.clone();
        async move {
            for _ in 0..20 {
                client.ping().await.expect("ping");
            }
        }
    });
    let walks = tokio::spawn({
        let client = client.clone();
        async move {
            for _ in 0..20 {
                let walk = client.heap(Some("Warehouse.Crate"), false).await.expect("heap");
                assert_eq!(walk.objects.len(), 1);
            }
        }
    });
    let dumps = tokio::spawn({
        let client = client.clone();
        async move {
            for _ in 0..20 {
                let descriptor = client.get_type("Warehouse.Manifest").await.expect("type");
                assert_eq!(descriptor.full_name, "Warehouse.Manifest");
            }
        }
    });

    pings.await.expect("pings");
    walks.await.expect("walks");
    dumps.await.expect("dumps");

    harness.shutdown().await;
}

#[tokio::test]
async fn static_invocations_share_state() {
    let harness = Harness::start(warehouse_runtime()).await;

    let first = harness
        .client
        .invoke_static("Warehouse.Depot", "Open", [])
        .await
        .expect("invoke")
        .expect("non-void");
    let second = harness
        .client
        .invoke_static("Warehouse.Depot", "Open", [])
        .await
        .expect("invoke")
        .expect("non-void");
    assert_eq!(first.as_i64(), Some(1));
    assert_eq!(second.as_i64(), Some(2));

    let count = harness
        .client
        .get_static_field("Warehouse.Depot", "OpenCount")
        .await
        .expect("static field");
    assert_eq!(count.as_i64(), Some(2));

    harness.shutdown().await;
}
