// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Test doubles shared by the unit tests.

use crate::client::{ObjectClient, ObjectIdentity};
use crate::errors::ClientError;
use async_trait::async_trait;
use kube::api::{ApiResource, DynamicObject};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// UID the fake API server assigns to created objects
pub const CREATED_UID: &str = "created-uid";

/// UID of objects the fake API server returns from `get`
pub const SERVER_UID: &str = "server-uid";

/// Build an API error as the Kubernetes API server would return it.
pub fn api_error(code: u16) -> ClientError {
    ClientError::Api(kube_api_error(code))
}

/// The `kube::Error` behind [`api_error`].
pub fn kube_api_error(code: u16) -> kube::Error {
    let reason = match code {
        404 => "NotFound",
        409 => "Conflict",
        422 => "Invalid",
        _ => "InternalError",
    };
    kube::Error::Api(
        kube::core::Status::failure(&format!("request failed with {code}"), reason)
            .with_code(code)
            .boxed(),
    )
}

/// [`ObjectClient`] that records every call and can be told to fail per object name.
#[derive(Default)]
pub struct RecordingClient {
    calls: Mutex<Vec<(&'static str, ObjectIdentity)>>,
    failures: Mutex<HashMap<String, u16>>,
    delay: Duration,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl RecordingClient {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Fail every call addressing `name` with HTTP `code`.
    pub fn fail(&self, name: &str, code: u16) {
        self.failures
            .lock()
            .unwrap()
            .insert(name.to_string(), code);
    }

    pub fn calls(&self) -> Vec<(&'static str, ObjectIdentity)> {
        self.calls.lock().unwrap().clone()
    }

    /// Operation names in call order.
    pub fn operations(&self) -> Vec<&'static str> {
        self.calls().into_iter().map(|(op, _)| op).collect()
    }

    /// Highest number of calls that were running at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn record(&self, operation: &'static str, identity: &ObjectIdentity) -> Result<(), ClientError> {
        self.calls
            .lock()
            .unwrap()
            .push((operation, identity.clone()));

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        let failure = self.failures.lock().unwrap().get(&identity.name).copied();
        match failure {
            Some(code) => Err(api_error(code)),
            None => Ok(()),
        }
    }
}

fn server_object(identity: &ObjectIdentity) -> DynamicObject {
    let resource = ApiResource::from_gvk(&identity.gvk());
    let mut object = DynamicObject::new(&identity.name, &resource);
    object.metadata.namespace = identity.namespace.clone();
    object.metadata.uid = Some(SERVER_UID.to_string());
    object.data = serde_json::json!({"status": {"ready": true}});
    object
}

#[async_trait]
impl ObjectClient for RecordingClient {
    async fn get(&self, identity: &ObjectIdentity) -> Result<DynamicObject, ClientError> {
        self.record("get", identity).await?;
        Ok(server_object(identity))
    }

    async fn create(
        &self,
        identity: &ObjectIdentity,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClientError> {
        self.record("create", identity).await?;
        let mut created = object.clone();
        created.metadata.uid = Some(CREATED_UID.to_string());
        Ok(created)
    }

    async fn update(
        &self,
        identity: &ObjectIdentity,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClientError> {
        self.record("update", identity).await?;
        Ok(object.clone())
    }

    async fn update_status(
        &self,
        identity: &ObjectIdentity,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClientError> {
        self.record("update_status", identity).await?;
        Ok(object.clone())
    }

    async fn delete(&self, identity: &ObjectIdentity) -> Result<(), ClientError> {
        self.record("delete", identity).await
    }
}
