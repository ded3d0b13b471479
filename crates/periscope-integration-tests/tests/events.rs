//! Integration test: event subscription end to end.
//!
//! A matching event firing in the target produces exactly one callback
//! per firing; unsubscribing stops delivery.

use std::time::Duration;

use periscope_client::{CallArg, ClientValue};
use periscope_integration_tests::{warehouse_runtime, Harness};

#[tokio::test]
async fn event_fires_once_per_raise() {
    let harness = Harness::start(warehouse_runtime()).await;

    let proxy = harness
        .client
        .create("Warehouse.Crate", [CallArg::from(5)])
        .await
        .expect("create");
    proxy
        .set_field("label", CallArg::from("west dock"))
        .await
        .expect("label");

    let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel();
    let subscription = harness
        .client
        .subscribe(&proxy, "Sealed", move |stamp, values| {
            let _ = events_tx.send((stamp, values));
        })
        .await
        .expect("subscribe");

    // Each Seal raises the event once.
    for _ in 0..3 {
        proxy
            .invoke("Seal", [CallArg::from("inspector-7")])
            .await
            .expect("seal");
    }

    for _ in 0..3 {
        let (stamp, values) = tokio::time::timeout(Duration::from_secs(5), events_rx.recv())
            .await
            .expect("callback within timeout")
            .expect("channel open");
        assert!(stamp > 0);
        // The wrapper shape is (sender, args).
        assert_eq!(values.len(), 2);
        match &values[0] {
            ClientValue::Object(sender) => {
                assert_eq!(sender.type_name(), "Warehouse.Crate");
                // Argument stamps are frozen to the event time.
            }
            other => unreachable!("sender must be an object proxy, got {other:?}"),
        }
        assert_eq!(values[1].as_str(), Some("west dock"));
    }

    // No spurious extra callbacks.
    assert!(
        tokio::time::timeout(Duration::from_millis(300), events_rx.recv())
            .await
            .is_err(),
        "exactly one callback per firing"
    );

    subscription.unsubscribe().await.expect("unsubscribe");
    proxy
        .invoke("Seal", [CallArg::from("inspector-7")])
        .await
        .expect("seal");
    assert!(
        tokio::time::timeout(Duration::from_millis(300), events_rx.recv())
            .await
            .is_err(),
        "no callbacks after unsubscribe"
    );

    harness.shutdown().await;
}

#[tokio::test]
async fn two_subscribers_both_receive() {
    let harness = Harness::start(warehouse_runtime()).await;
    let proxy = harness
        .client
        .create("Warehouse.Crate", [CallArg::from(1)])
        .await
        .expect("create");

    let (tx_a, mut rx_a) = tokio::sync::mpsc::unbounded_channel();
    let (tx_b, mut rx_b) = tokio::sync::mpsc::unbounded_channel();
    let sub_a = harness
        .client
        .subscribe(&proxy, "Sealed", move |_, _| {
            let _ = tx_a.send(());
        })
        .await
        .expect("subscribe a");
    let sub_b = harness
        .client
        .subscribe(&proxy, "Sealed", move |_, _| {
            let _ = tx_b.send(());
        })
        .await
        .expect("subscribe b");
    assert_ne!(sub_a.token(), sub_b.token());

    proxy
        .invoke("Seal", [CallArg::from("x")])
        .await
        .expect("seal");

    tokio::time::timeout(Duration::from_secs(5), rx_a.recv())
        .await
        .expect("a notified")
        .expect("open");
    tokio::time::timeout(Duration::from_secs(5), rx_b.recv())
        .await
        .expect("b notified")
        .expect("open");

    harness.shutdown().await;
}
