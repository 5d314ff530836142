// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Integration tests for the kubepipe plugins against a live cluster.
//!
//! Each test works in its own namespace and removes it afterwards.
//!
//! Run with: cargo test --test kubernetes_integration -- --ignored

mod common;

use common::{
    cleanup_test_namespace, config_map_part, create_config_map, create_test_namespace,
    get_kube_client_or_skip, next_transaction_for, test_labels,
};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::Api;
use kubepipe::config::{InputConfig, LabelSelector, OutputConfig, ProcessorConfig, WatchSpec};
use kubepipe::input::KubernetesInput;
use kubepipe::message::{Message, Part};
use kubepipe::output::{KubernetesWriter, WriteMode};
use kubepipe::plugin::{Input, Processor};
use kubepipe::processor::KubernetesProcessor;
use std::time::Duration;

const EVENT_WAIT: Duration = Duration::from_secs(30);

fn config_map_watch(namespace: &str) -> InputConfig {
    InputConfig {
        watches: vec![WatchSpec {
            group: String::new(),
            version: "v1".to_string(),
            kind: "ConfigMap".to_string(),
            namespaces: vec![namespace.to_string()],
            selector: Some(LabelSelector {
                match_labels: Some(test_labels()),
                match_expressions: None,
            }),
        }],
        max_concurrent_reconciles: 1,
    }
}

#[tokio::test]
#[ignore] // Run with: cargo test --test kubernetes_integration -- --ignored
async fn test_input_streams_changes_and_deletions() {
    println!("\n=== Test: Input streams changes and deletions ===\n");

    let Some(client) = get_kube_client_or_skip().await else {
        return;
    };
    let namespace = "kubepipe-it-input";
    create_test_namespace(&client, namespace).await.unwrap();

    let input = KubernetesInput::new(config_map_watch(namespace)).unwrap();
    let mut transactions = input.take_transactions().unwrap();
    assert!(input.start());

    create_config_map(&client, namespace, "watched", &[("mode", "fast")])
        .await
        .unwrap();

    let created = next_transaction_for(&mut transactions, "watched", |_| true, EVENT_WAIT)
        .await
        .expect("a transaction for the created object");
    let part = created.payload.get(0).unwrap();
    assert_eq!(part.metadata_value("kind"), Some("ConfigMap"));
    assert_eq!(part.metadata_value("version"), Some("v1"));
    assert_eq!(part.metadata_value("namespace"), Some(namespace));
    assert_eq!(part.metadata_value("deleted"), None);
    let object: serde_json::Value = serde_json::from_slice(part.payload()).unwrap();
    assert_eq!(object["data"]["mode"], "fast");
    created.ack();
    println!("Received creation of ConfigMap watched");

    let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    config_maps
        .delete("watched", &Default::default())
        .await
        .unwrap();

    let deleted = next_transaction_for(
        &mut transactions,
        "watched",
        |t| t.payload.get(0).and_then(|p| p.metadata_value("deleted")) == Some("true"),
        EVENT_WAIT,
    )
    .await
    .expect("a transaction for the deleted object");
    assert_eq!(deleted.payload.get(0).unwrap().payload(), b"{}");
    deleted.ack();
    println!("Received deletion of ConfigMap watched");

    input.close_async();
    input
        .wait_for_close(Duration::from_secs(10))
        .await
        .unwrap();
    assert!(transactions.recv().await.is_none());

    cleanup_test_namespace(&client, namespace).await;
    println!("\nTest passed\n");
}

#[tokio::test]
#[ignore]
async fn test_writer_creates_updates_and_deletes() {
    println!("\n=== Test: Writer create, update, delete ===\n");

    let Some(client) = get_kube_client_or_skip().await else {
        return;
    };
    let namespace = "kubepipe-it-writer";
    create_test_namespace(&client, namespace).await.unwrap();
    let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let writer = KubernetesWriter::new(WriteMode::Object, &OutputConfig::default()).unwrap();

    // No UID: create
    writer
        .write(&Message::single(config_map_part(
            namespace,
            "written",
            &[("mode", "fast")],
        )))
        .await
        .unwrap();
    let created = config_maps.get("written").await.unwrap();
    let uid = created.metadata.uid.clone().expect("server-assigned uid");
    println!("Created ConfigMap written ({uid})");

    // Server object carries a UID: update
    let mut updated = created.clone();
    updated
        .data
        .get_or_insert_with(Default::default)
        .insert("mode".to_string(), "slow".to_string());
    writer
        .write(&Message::single(Part::new(
            serde_json::to_vec(&updated).unwrap(),
        )))
        .await
        .unwrap();
    let fetched = config_maps.get("written").await.unwrap();
    assert_eq!(fetched.metadata.uid.as_deref(), Some(uid.as_str()));
    assert_eq!(
        fetched.data.unwrap().get("mode").map(String::as_str),
        Some("slow")
    );

    // Deleted marker: delete, twice (the second is a no-op)
    let tombstone = || {
        Part::new("{}")
            .with_metadata("group", "")
            .with_metadata("version", "v1")
            .with_metadata("kind", "ConfigMap")
            .with_metadata("namespace", namespace)
            .with_metadata("name", "written")
            .with_metadata("deleted", "true")
    };
    writer.write(&Message::single(tombstone())).await.unwrap();
    writer.write(&Message::single(tombstone())).await.unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(config_maps.get_opt("written").await.unwrap().is_none());

    cleanup_test_namespace(&client, namespace).await;
    println!("\nTest passed\n");
}

#[tokio::test]
#[ignore]
async fn test_processor_get_fills_server_fields() {
    println!("\n=== Test: Processor get ===\n");

    let Some(client) = get_kube_client_or_skip().await else {
        return;
    };
    let namespace = "kubepipe-it-processor";
    create_test_namespace(&client, namespace).await.unwrap();
    create_config_map(&client, namespace, "looked-up", &[("mode", "fast")])
        .await
        .unwrap();

    let processor = KubernetesProcessor::new(&ProcessorConfig {
        operator: "get".to_string(),
        parts: Vec::new(),
    })
    .unwrap();
    let message = Message::new(vec![
        config_map_part(namespace, "looked-up", &[]),
        config_map_part(namespace, "missing", &[]),
    ]);

    let output = processor.process(message).await.unwrap().remove(0);

    let found: serde_json::Value =
        serde_json::from_slice(output.get(0).unwrap().payload()).unwrap();
    assert!(found["metadata"]["uid"].is_string());
    assert_eq!(found["data"]["mode"], "fast");
    assert!(output.get(0).unwrap().error().is_none());
    assert!(
        output.get(1).unwrap().error().is_some(),
        "a missing object flags its part"
    );

    cleanup_test_namespace(&client, namespace).await;
    println!("\nTest passed\n");
}
