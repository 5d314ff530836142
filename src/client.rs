// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Cluster API client used by the writers and the ad-hoc processor.
//!
//! Objects are handled as [`DynamicObject`]s addressed by an [`ObjectIdentity`]
//! (group, version, kind, namespace, name). The [`ObjectClient`] trait is the seam
//! between the plugins and the Kubernetes API; [`KubeObjectClient`] implements it on
//! top of `kube::Api<DynamicObject>`.
//!
//! The underlying `kube::Client` is built lazily on first use, at most once, and is
//! then shared by every concurrent operation.

use crate::constants::{META_GROUP, META_KIND, META_NAME, META_NAMESPACE, META_VERSION};
use crate::errors::{ClientError, PipelineError};
use crate::message::Part;
use async_trait::async_trait;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, Patch, PatchParams,
    PostParams,
};
use kube::Client;
use std::fmt;
use tokio::sync::OnceCell;
use tracing::debug;

/// Fully qualified address of one cluster object.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectIdentity {
    /// API group; empty for the core group
    pub group: String,
    /// API version
    pub version: String,
    /// Object kind
    pub kind: String,
    /// Namespace; `None` for cluster-scoped objects
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
}

impl fmt::Display for ObjectIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{} {}", self.version, self.kind)?;
        } else {
            write!(f, "{}/{} {}", self.group, self.version, self.kind)?;
        }
        match &self.namespace {
            Some(namespace) => write!(f, " {namespace}/{}", self.name),
            None => write!(f, " {}", self.name),
        }
    }
}

impl ObjectIdentity {
    #[must_use]
    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::gvk(&self.group, &self.version, &self.kind)
    }

    /// Resolve the identity of the object carried by a message part.
    ///
    /// Fields present on the decoded object (`apiVersion`, `kind`, `metadata.name`,
    /// `metadata.namespace`) take precedence; the part's metadata fills in whatever the
    /// object lacks. A deleted object's placeholder document carries nothing, so its
    /// identity comes entirely from the metadata.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MissingIdentity`] when version, kind or name cannot be
    /// determined from either source.
    pub fn resolve(part: &Part, object: &DynamicObject) -> Result<Self, PipelineError> {
        let identity = Self::from_part(part, object);
        if identity.version.is_empty() {
            return Err(PipelineError::MissingIdentity("version"));
        }
        if identity.kind.is_empty() {
            return Err(PipelineError::MissingIdentity("kind"));
        }
        if identity.name.is_empty() {
            return Err(PipelineError::MissingIdentity("name"));
        }
        Ok(identity)
    }

    /// Best-effort identity of the object carried by a message part.
    ///
    /// Same precedence as [`ObjectIdentity::resolve`], but fields neither source
    /// provides are left empty; the API call made with it reports the failure.
    #[must_use]
    pub fn from_part(part: &Part, object: &DynamicObject) -> Self {
        let (object_group, object_version) = object
            .types
            .as_ref()
            .map(|types| split_api_version(&types.api_version))
            .unwrap_or_default();

        let version = non_empty(object_version)
            .or_else(|| part.non_empty_metadata(META_VERSION).map(str::to_string))
            .unwrap_or_default();

        // An apiVersion without a group means the core group, so the metadata group is
        // only consulted when the object carries no apiVersion at all.
        let group = if object.types.is_some() {
            object_group
        } else {
            part.metadata_value(META_GROUP).unwrap_or_default().to_string()
        };

        let kind = object
            .types
            .as_ref()
            .map(|types| types.kind.clone())
            .filter(|kind| !kind.is_empty())
            .or_else(|| part.non_empty_metadata(META_KIND).map(str::to_string))
            .unwrap_or_default();

        let name = object
            .metadata
            .name
            .clone()
            .filter(|name| !name.is_empty())
            .or_else(|| part.non_empty_metadata(META_NAME).map(str::to_string))
            .unwrap_or_default();

        let namespace = object
            .metadata
            .namespace
            .clone()
            .filter(|namespace| !namespace.is_empty())
            .or_else(|| part.non_empty_metadata(META_NAMESPACE).map(str::to_string));

        Self {
            group,
            version,
            kind,
            namespace,
            name,
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

/// Split an `apiVersion` into group and version (`apps/v1` → (`apps`, `v1`), `v1` → (``, `v1`)).
#[must_use]
pub fn split_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Decode a message payload into a dynamic object.
///
/// The payload must be a JSON (or YAML-compatible JSON) document holding an object.
/// A document without `metadata`, such as the deleted-object placeholder `{}`, decodes
/// to an object with empty metadata.
///
/// # Errors
///
/// Returns [`PipelineError::Decode`] if the payload is not a JSON object.
pub fn decode_object(payload: &[u8]) -> Result<DynamicObject, PipelineError> {
    let mut document: serde_json::Value =
        serde_json::from_slice(payload).map_err(PipelineError::Decode)?;

    if let Some(map) = document.as_object_mut() {
        map.entry("metadata")
            .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
    }

    serde_json::from_value(document).map_err(PipelineError::Decode)
}

/// Encode a dynamic object as a message payload.
///
/// # Errors
///
/// Returns [`PipelineError::Encode`] if serialization fails.
pub fn encode_object(object: &DynamicObject) -> Result<Vec<u8>, PipelineError> {
    serde_json::to_vec(object).map_err(PipelineError::Encode)
}

/// Returns `true` if the object has been persisted by the API server before.
///
/// The API server assigns `metadata.uid` on creation, so an object with a non-empty
/// UID is assumed to exist already.
#[must_use]
pub fn has_identity(object: &DynamicObject) -> bool {
    object.metadata.uid.as_deref().is_some_and(|uid| !uid.is_empty())
}

/// Operations the plugins perform against the cluster.
#[async_trait]
pub trait ObjectClient: Send + Sync {
    /// Fetch the current state of an object.
    async fn get(&self, identity: &ObjectIdentity) -> Result<DynamicObject, ClientError>;

    /// Create a new object.
    async fn create(
        &self,
        identity: &ObjectIdentity,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClientError>;

    /// Replace an existing object.
    async fn update(
        &self,
        identity: &ObjectIdentity,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClientError>;

    /// Write the object's status to the status subresource.
    async fn update_status(
        &self,
        identity: &ObjectIdentity,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClientError>;

    /// Delete an object.
    async fn delete(&self, identity: &ObjectIdentity) -> Result<(), ClientError>;
}

/// [`ObjectClient`] backed by the Kubernetes API server.
pub struct KubeObjectClient {
    config: Option<kube::Config>,
    client: OnceCell<Client>,
}

impl Default for KubeObjectClient {
    fn default() -> Self {
        Self::new()
    }
}

impl KubeObjectClient {
    /// Client that infers its configuration (kubeconfig or in-cluster) on first use.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: None,
            client: OnceCell::new(),
        }
    }

    /// Client built from an explicit configuration on first use.
    #[must_use]
    pub fn with_config(config: kube::Config) -> Self {
        Self {
            config: Some(config),
            client: OnceCell::new(),
        }
    }

    /// Client wrapping an already constructed `kube::Client`.
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self {
            config: None,
            client: OnceCell::new_with(Some(client)),
        }
    }

    async fn client(&self) -> Result<Client, ClientError> {
        self.client
            .get_or_try_init(|| async {
                debug!("Initializing Kubernetes client");
                match &self.config {
                    Some(config) => Client::try_from(config.clone()),
                    None => Client::try_default().await,
                }
            })
            .await
            .cloned()
            .map_err(ClientError::Connect)
    }

    async fn api(&self, identity: &ObjectIdentity) -> Result<Api<DynamicObject>, ClientError> {
        let client = self.client().await?;
        let resource = ApiResource::from_gvk(&identity.gvk());
        Ok(match &identity.namespace {
            Some(namespace) => Api::namespaced_with(client, namespace, &resource),
            None => Api::all_with(client, &resource),
        })
    }
}

#[async_trait]
impl ObjectClient for KubeObjectClient {
    async fn get(&self, identity: &ObjectIdentity) -> Result<DynamicObject, ClientError> {
        debug!(object = %identity, "Getting object");
        let api = self.api(identity).await?;
        Ok(api.get(&identity.name).await?)
    }

    async fn create(
        &self,
        identity: &ObjectIdentity,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClientError> {
        debug!(object = %identity, "Creating object");
        let api = self.api(identity).await?;
        Ok(api.create(&PostParams::default(), object).await?)
    }

    async fn update(
        &self,
        identity: &ObjectIdentity,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClientError> {
        debug!(object = %identity, "Replacing object");
        let api = self.api(identity).await?;
        Ok(api
            .replace(&identity.name, &PostParams::default(), object)
            .await?)
    }

    async fn update_status(
        &self,
        identity: &ObjectIdentity,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ClientError> {
        debug!(object = %identity, "Updating object status");
        let api = self.api(identity).await?;
        let status = serde_json::json!({
            "status": object.data.get("status").cloned().unwrap_or_else(|| serde_json::json!({})),
        });
        Ok(api
            .patch_status(&identity.name, &PatchParams::default(), &Patch::Merge(&status))
            .await?)
    }

    async fn delete(&self, identity: &ObjectIdentity) -> Result<(), ClientError> {
        debug!(object = %identity, "Deleting object");
        let api = self.api(identity).await?;
        api.delete(&identity.name, &DeleteParams::default()).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod client_tests;
