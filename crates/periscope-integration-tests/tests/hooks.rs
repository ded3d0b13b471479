//! Integration test: method hooking end to end.
//!
//! Each invocation in the target produces a callback carrying the
//! original instance and arguments; unhooking removes the interceptor.

use std::time::Duration;

use periscope_client::{CallArg, ClientValue};
use periscope_integration_tests::{warehouse_runtime, Harness};
use periscope_types::HookPosition;

#[tokio::test]
async fn prefix_hook_sees_instance_and_args() {
    let harness = Harness::start(warehouse_runtime()).await;
    let proxy = harness
        .client
        .create("Warehouse.Crate", [CallArg::from(0)])
        .await
        .expect("create");

    let (hits_tx, mut hits_rx) = tokio::sync::mpsc::unbounded_channel();
    let hook = harness
        .client
        .hook(
            "Warehouse.Crate",
            "AddWeight",
            vec!["System.Int32".to_string()],
            HookPosition::Prefix,
            move |_, values| {
                let _ = hits_tx.send(values);
            },
        )
        .await
        .expect("hook");

    proxy
        .invoke("AddWeight", [CallArg::from(17)])
        .await
        .expect("invoke");

    let values = tokio::time::timeout(Duration::from_secs(5), hits_rx.recv())
        .await
        .expect("hook callback")
        .expect("channel open");
    // Callback shape: [instance, arg0, ...].
    assert_eq!(values.len(), 2);
    match &values[0] {
        ClientValue::Object(instance) => {
            assert_eq!(instance.type_name(), "Warehouse.Crate");
            assert_eq!(instance.token(), proxy.token(), "same pinned identity");
        }
        other => unreachable!("instance expected, got {other:?}"),
    }
    assert_eq!(values[1].as_i64(), Some(17));

    hook.unhook().await.expect("unhook");
    proxy
        .invoke("AddWeight", [CallArg::from(1)])
        .await
        .expect("invoke");
    assert!(
        tokio::time::timeout(Duration::from_millis(300), hits_rx.recv())
            .await
            .is_err(),
        "no callbacks after unhook"
    );

    harness.shutdown().await;
}

#[tokio::test]
async fn postfix_and_finalizer_hooks_combine() {
    let harness = Harness::start(warehouse_runtime()).await;
    let proxy = harness
        .client
        .create("Warehouse.Crate", [CallArg::from(0)])
        .await
        .expect("create");

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let tx_post = tx.clone();
    let post = harness
        .client
        .hook(
            "Warehouse.Crate",
            "AddWeight",
            vec!["System.Int32".to_string()],
            HookPosition::Postfix,
            move |_, _| {
                let _ = tx_post.send("postfix");
            },
        )
        .await
        .expect("postfix hook");
    let tx_final = tx.clone();
    let fin = harness
        .client
        .hook(
            "Warehouse.Crate",
            "AddWeight",
            vec!["System.Int32".to_string()],
            HookPosition::Finalizer,
            move |_, _| {
                let _ = tx_final.send("finalizer");
            },
        )
        .await
        .expect("finalizer hook");

    proxy
        .invoke("AddWeight", [CallArg::from(1)])
        .await
        .expect("invoke");

    let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("first callback")
        .expect("open");
    let second = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("second callback")
        .expect("open");
    assert_eq!((first, second), ("postfix", "finalizer"));

    post.unhook().await.expect("unhook postfix");
    fin.unhook().await.expect("unhook finalizer");

    harness.shutdown().await;
}

#[tokio::test]
async fn hooking_missing_overload_fails() {
    let harness = Harness::start(warehouse_runtime()).await;
    let err = harness
        .client
        .hook(
            "Warehouse.Crate",
            "AddWeight",
            vec!["System.String".to_string()],
            HookPosition::Prefix,
            |_, _| {},
        )
        .await
        .expect_err("no such overload");
    assert!(matches!(
        err,
        periscope_client::ClientError::Agent(periscope_types::envelope::Fault::Resolution(_))
    ));

    harness.shutdown().await;
}
