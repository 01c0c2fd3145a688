//! Integration tests for JSON-RPC endpoints
//!
//! Each test starts its own in-process server on an ephemeral port, backed by
//! a fresh SQLite file.

use furnace::{build_rpc_module, NodeStore, StoreConfig};
use jsonrpsee::{
    core::{client::ClientT, params::ObjectParams, ClientError},
    server::{Server, ServerHandle},
    ws_client::{WsClient, WsClientBuilder},
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, TempDir};

struct TestHub {
    client: WsClient,
    _handle: ServerHandle,
    _dir: TempDir,
}

async fn start_hub() -> TestHub {
    let dir = tempdir().unwrap();
    let config = StoreConfig {
        db_path: dir.path().join("rpc_test.db"),
        ..StoreConfig::default()
    };
    let storage = Arc::new(NodeStore::new(config).await.unwrap());
    let module = build_rpc_module(storage).unwrap();

    let server = Server::builder().build("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();
    let handle = server.start(module);

    let client = WsClientBuilder::default()
        .connection_timeout(Duration::from_secs(5))
        .build(format!("ws://{}", addr))
        .await
        .expect("Failed to connect to in-process server");

    TestHub {
        client,
        _handle: handle,
        _dir: dir,
    }
}

fn params(value: Value) -> ObjectParams {
    let mut params = ObjectParams::new();
    if let Value::Object(map) = value {
        for (key, value) in map {
            params.insert(&key, value).unwrap();
        }
    }
    params
}

async fn call(hub: &TestHub, method: &str, value: Value) -> Value {
    hub.client
        .request::<Value, _>(method, params(value))
        .await
        .unwrap_or_else(|e| panic!("{} failed: {:?}", method, e))
}

async fn call_err(hub: &TestHub, method: &str, value: Value) -> i32 {
    match hub.client.request::<Value, _>(method, params(value)).await {
        Err(ClientError::Call(err)) => err.code(),
        other => panic!("{} should fail with a call error, got {:?}", method, other),
    }
}

async fn create(hub: &TestHub, name: &str, parent: i64, payload: Value) -> Value {
    call(
        hub,
        "nodes_create",
        json!({ "name": name, "parentId": parent, "payload": payload }),
    )
    .await
}

#[tokio::test]
async fn test_hub_lists_method_schemas() {
    let hub = start_hub().await;

    let methods = call(&hub, "hub_methods", json!({})).await;
    let names: Vec<&str> = methods
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|m| m["name"].as_str())
        .collect();
    assert!(names.contains(&"nodes_create"));
    assert!(names.contains(&"nodes_table"));
}

#[tokio::test]
async fn test_create_rename_delete_workflow() {
    let hub = start_hub().await;

    // 1. Root client and child order
    let acme = create(&hub, "Acme", 0, json!({ "type": "client", "attributes": {} })).await;
    assert_eq!(acme["path"], "/Acme");
    assert_eq!(acme["type"], "client");
    let acme_id = acme["id"].as_i64().unwrap();

    let order = create(
        &hub,
        "Order-1",
        acme_id,
        json!({ "type": "order", "attributes": { "reference": "PO-88" } }),
    )
    .await;
    assert_eq!(order["path"], "/Acme/Order-1");
    let order_id = order["id"].as_i64().unwrap();

    // 2. Part below the order
    let gear = create(
        &hub,
        "Gear-7",
        order_id,
        json!({ "type": "part", "attributes": { "designation": "Gear", "quantity": 4 } }),
    )
    .await;
    let gear_id = gear["id"].as_i64().unwrap();

    let count = call(&hub, "nodes_count", json!({ "ancestorId": acme_id, "type": "part" })).await;
    assert_eq!(count, 1);

    let chain = call(&hub, "nodes_ancestors", json!({ "nodeId": gear_id })).await;
    let chain: Vec<i64> = chain
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["id"].as_i64().unwrap())
        .collect();
    assert_eq!(chain, vec![acme_id, order_id, gear_id]);

    // 3. Rename the root
    let renamed = call(&hub, "nodes_update", json!({ "nodeId": acme_id, "name": "Acme-Corp" })).await;
    assert_eq!(renamed["path"], "/Acme-Corp");

    let details = call(&hub, "nodes_details", json!({ "nodeId": gear_id, "type": "part" })).await;
    assert_eq!(details["node"]["path"], "/Acme-Corp/Order-1/Gear-7");
    assert_eq!(details["payload"]["type"], "part");
    assert_eq!(details["payload"]["attributes"]["quantity"], 4);

    // 4. Delete the order, taking the part with it
    let deleted = call(&hub, "nodes_delete", json!({ "nodeId": order_id })).await;
    assert_eq!(deleted["removed"], 2);

    let count = call(&hub, "nodes_count", json!({ "ancestorId": acme_id, "type": "part" })).await;
    assert_eq!(count, 0);

    let report = call(&hub, "nodes_integrity", json!({})).await;
    assert_eq!(report["nodesChecked"], 1);
    assert_eq!(report["violations"], json!([]));
}

#[tokio::test]
async fn test_list_and_table_views() {
    let hub = start_hub().await;

    let acme = create(&hub, "Acme", 0, json!({ "type": "client", "attributes": {} })).await;
    let acme_id = acme["id"].as_i64().unwrap();
    for name in ["O-3", "O-1", "O-2"] {
        create(&hub, name, acme_id, json!({ "type": "order", "attributes": {} })).await;
    }

    let listed = call(
        &hub,
        "nodes_list",
        json!({ "ancestorId": acme_id, "type": "order", "depth": 1, "limit": 2 }),
    )
    .await;
    assert_eq!(listed.as_array().unwrap().len(), 2);

    let table = call(&hub, "nodes_table", json!({ "parentId": acme_id, "limit": 2, "page": 2 })).await;
    assert_eq!(table["rows"][0]["node"]["name"], "O-3");
    assert_eq!(table["pagination"]["total"], 3);
    assert_eq!(table["pagination"]["totalPages"], 2);

    let roots = call(&hub, "nodes_table", json!({})).await;
    assert_eq!(roots["rows"][0]["childCount"], 3);

    let status = call(&hub, "nodes_set_status", json!({ "nodeId": acme_id, "status": "archived" })).await;
    assert_eq!(status["dataStatus"], "archived");
}

#[tokio::test]
async fn test_move_over_rpc() {
    let hub = start_hub().await;

    let acme = create(&hub, "Acme", 0, json!({ "type": "client", "attributes": {} })).await;
    let globex = create(&hub, "Globex", 0, json!({ "type": "client", "attributes": {} })).await;
    let order = create(
        &hub,
        "Order-1",
        acme["id"].as_i64().unwrap(),
        json!({ "type": "order", "attributes": {} }),
    )
    .await;

    let moved = call(
        &hub,
        "nodes_move",
        json!({ "nodeId": order["id"], "parentId": globex["id"] }),
    )
    .await;
    assert_eq!(moved["path"], "/Globex/Order-1");

    let code = call_err(
        &hub,
        "nodes_move",
        json!({ "nodeId": globex["id"], "parentId": order["id"] }),
    )
    .await;
    assert_eq!(code, -32602);
}

#[tokio::test]
async fn test_error_codes() {
    let hub = start_hub().await;

    let code = call_err(
        &hub,
        "nodes_create",
        json!({ "name": "Orphan", "parentId": 4242, "payload": { "type": "order", "attributes": {} } }),
    )
    .await;
    assert_eq!(code, -32004);

    let code = call_err(&hub, "nodes_delete", json!({ "nodeId": 4242 })).await;
    assert_eq!(code, -32004);

    let code = call_err(&hub, "nodes_count", json!({ "type": "furnace" })).await;
    assert_eq!(code, -32602);

    let code = call_err(
        &hub,
        "nodes_create",
        json!({ "name": "a/b", "payload": { "type": "client", "attributes": {} } }),
    )
    .await;
    assert_eq!(code, -32602);

    let code = call_err(&hub, "nodes_list", json!({ "type": "part", "limit": 0 })).await;
    assert_eq!(code, -32602);

    let acme = create(&hub, "Acme", 0, json!({ "type": "client", "attributes": {} })).await;
    let code = call_err(&hub, "nodes_details", json!({ "nodeId": acme["id"], "type": "order" })).await;
    assert_eq!(code, -32004);

    let wiped = call(&hub, "nodes_wipe", json!({})).await;
    assert_eq!(wiped.as_array().unwrap().last().unwrap(), "nodes");
}
