// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

// Common test utilities for integration tests

#![allow(dead_code)]

use k8s_openapi::api::core::v1::{ConfigMap, Namespace};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, PostParams};
use kube::client::Client;
use kubepipe::message::Part;
use kubepipe::transaction::{Transaction, TransactionReceiver};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;

/// Label put on every object the integration tests create
pub const TEST_LABEL_KEY: &str = "app";
pub const TEST_LABEL_VALUE: &str = "kubepipe-integration";

pub fn test_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(TEST_LABEL_KEY.to_string(), TEST_LABEL_VALUE.to_string())])
}

/// Get a Kubernetes client or skip the test if not in a cluster
pub async fn get_kube_client_or_skip() -> Option<Client> {
    match Client::try_default().await {
        Ok(client) => Some(client),
        Err(e) => {
            eprintln!("Skipping integration test: not running in Kubernetes cluster: {e}");
            None
        }
    }
}

/// Create a test namespace
pub async fn create_test_namespace(
    client: &Client,
    name: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let namespaces: Api<Namespace> = Api::all(client.clone());

    let mut labels = BTreeMap::new();
    labels.insert("test".to_string(), "integration".to_string());
    labels.insert("managed-by".to_string(), "kubepipe-test".to_string());

    let ns = Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        ..Default::default()
    };

    match namespaces.create(&PostParams::default(), &ns).await {
        Ok(_) => {
            println!("Created test namespace: {name}");
            Ok(())
        }
        Err(kube::Error::Api(ae)) if ae.code == 409 => {
            println!("Test namespace already exists: {name}");
            Ok(())
        }
        Err(e) => Err(Box::new(e)),
    }
}

/// Cleanup test namespace
pub async fn cleanup_test_namespace(client: &Client, name: &str) {
    let namespaces: Api<Namespace> = Api::all(client.clone());

    match namespaces.delete(name, &DeleteParams::default()).await {
        Ok(_) => println!("Deleted test namespace: {name}"),
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            println!("Test namespace already deleted: {name}");
        }
        Err(e) => eprintln!("Failed to delete test namespace {name}: {e}"),
    }
}

/// Create a labelled `ConfigMap` holding `data`
pub async fn create_config_map(
    client: &Client,
    namespace: &str,
    name: &str,
    data: &[(&str, &str)],
) -> Result<ConfigMap, kube::Error> {
    let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let cm: ConfigMap = serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "labels": test_labels()
        },
        "data": data.iter().copied().collect::<BTreeMap<_, _>>()
    }))
    .map_err(kube::Error::SerdeError)?;
    config_maps.create(&PostParams::default(), &cm).await
}

/// A message part holding a `ConfigMap` document, as a pipeline would build it
pub fn config_map_part(namespace: &str, name: &str, data: &[(&str, &str)]) -> Part {
    Part::new(
        json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": name,
                "namespace": namespace,
                "labels": test_labels()
            },
            "data": data.iter().copied().collect::<BTreeMap<_, _>>()
        })
        .to_string(),
    )
}

/// Receive transactions until one about `name` satisfies `predicate`, acknowledging
/// every other transaction on the way.
pub async fn next_transaction_for(
    transactions: &mut TransactionReceiver,
    name: &str,
    predicate: impl Fn(&Transaction) -> bool,
    wait: Duration,
) -> Option<Transaction> {
    tokio::time::timeout(wait, async {
        while let Some(transaction) = transactions.recv().await {
            let matches = transaction
                .payload
                .get(0)
                .and_then(|part| part.metadata_value("name"))
                == Some(name);
            if matches && predicate(&transaction) {
                return Some(transaction);
            }
            transaction.ack();
        }
        None
    })
    .await
    .ok()
    .flatten()
}
