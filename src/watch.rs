// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Watch mechanism: turns cluster change events into reconciliation requests.
//!
//! ## Architecture
//!
//! ```text
//! watcher ─► reflector ─► Store<DynamicObject>   (one per watch spec × namespace)
//!    │
//!    └─ Apply / InitApply / Delete ─► selector::admits ─► ReconcileRequest
//!                                                               │
//!                                    ┌──────────────────────────┘
//!                                    ▼
//!                               Scheduler ─► Reconciler::reconcile ─► Action
//!                                 ▲   │
//!                                 └───┘ requeue after delay / error backoff
//! ```
//!
//! kube-rs' `Controller` skips reconciliation of objects that are no longer in its
//! store, so deletions would never reach the pipeline. The mechanism here keeps the
//! same building blocks (`watcher`, `reflector`, `Store`) but owns the scheduling:
//!
//! - A key (watch, namespace, name) is never reconciled twice at the same time. A
//!   request for a key already in flight is parked and run once the current run ends.
//! - At most `max_concurrent_reconciles` reconciliations run at once.
//! - `Action::requeue(d)` re-runs the key after `d`.
//! - An error re-runs the key after an exponential backoff that resets on success.
//! - An object deleted while its watch was disconnected is requested once the relist
//!   completes, so the deletion still reaches the pipeline.
//! - Everything stops when the close signal fires.

use crate::config::{InputConfig, WatchSpec};
use crate::errors::{ConfigError, ReconcileError, WatchError};
use crate::lifecycle::CloseSignal;
use crate::metrics;
use crate::retry::{error_backoff, ExponentialBackoff};
use crate::selector::{admits, to_selector_string};
use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use kube::api::{Api, ApiResource, DynamicObject};
use kube::runtime::reflector::{self, store::Writer, ObjectRef, Store};
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Client, ResourceExt};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// What the watch mechanism should do after a reconciliation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Action {
    requeue_after: Option<Duration>,
}

impl Action {
    /// Reconcile the object again after `duration`.
    #[must_use]
    pub fn requeue(duration: Duration) -> Self {
        Self {
            requeue_after: Some(duration),
        }
    }

    /// Do nothing until the object changes again.
    #[must_use]
    pub fn await_change() -> Self {
        Self {
            requeue_after: None,
        }
    }

    #[must_use]
    pub fn requeue_after(&self) -> Option<Duration> {
        self.requeue_after
    }
}

/// Read access to the locally cached state of watched objects.
pub trait ObjectCache: Send + Sync {
    /// Look up an object by namespace and name.
    ///
    /// `Ok(None)` means the object does not exist (any more).
    ///
    /// # Errors
    ///
    /// Returns an error if the cache cannot answer for this object at all.
    fn get(&self, namespace: Option<&str>, name: &str) -> anyhow::Result<Option<DynamicObject>>;
}

/// The reflector stores backing one watch spec.
pub struct StoreCache {
    resource: ApiResource,
    /// Store per watched namespace; `None` is the cluster-wide store
    stores: Vec<(Option<String>, Store<DynamicObject>)>,
}

impl ObjectCache for StoreCache {
    fn get(&self, namespace: Option<&str>, name: &str) -> anyhow::Result<Option<DynamicObject>> {
        let store = self
            .stores
            .iter()
            .find(|(scope, _)| scope.is_none() || scope.as_deref() == namespace)
            .map(|(_, store)| store)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "no watch covers namespace '{}'",
                    namespace.unwrap_or_default()
                )
            })?;

        let mut key = ObjectRef::new_with(name, self.resource.clone());
        if let Some(namespace) = namespace {
            key = key.within(namespace);
        }
        Ok(store.get(&key).map(|object| object.as_ref().clone()))
    }
}

/// One configured watch together with the cache it reconciles from.
pub struct WatchTarget {
    /// Position of the watch in the input configuration
    pub index: usize,
    pub spec: WatchSpec,
    pub cache: Arc<dyn ObjectCache>,
}

impl fmt::Debug for WatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchTarget")
            .field("index", &self.index)
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

impl WatchTarget {
    #[must_use]
    pub fn new(index: usize, spec: WatchSpec, cache: Arc<dyn ObjectCache>) -> Self {
        Self { index, spec, cache }
    }

    /// Build a request for `object` if it passes the watch's namespace and label filters.
    #[must_use]
    pub fn request_for(self: &Arc<Self>, object: &DynamicObject) -> Option<ReconcileRequest> {
        let namespace = object.namespace();
        if !admits(
            &self.spec.namespaces,
            self.spec.selector.as_ref(),
            namespace.as_deref(),
            object.labels(),
        ) {
            return None;
        }
        Some(ReconcileRequest {
            target: self.clone(),
            namespace,
            name: object.name_any(),
        })
    }
}

/// Identifies one reconcilable object across all watches.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub watch: usize,
    pub namespace: Option<String>,
    pub name: String,
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{namespace}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// A request to reconcile one object.
#[derive(Clone, Debug)]
pub struct ReconcileRequest {
    pub target: Arc<WatchTarget>,
    pub namespace: Option<String>,
    pub name: String,
}

impl ReconcileRequest {
    #[must_use]
    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            watch: self.target.index,
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.target.spec.kind
    }

    /// Current cached state of the object; `Ok(None)` once it is gone.
    ///
    /// # Errors
    ///
    /// Propagates cache lookup failures.
    pub fn fetch(&self) -> anyhow::Result<Option<DynamicObject>> {
        self.target
            .cache
            .get(self.namespace.as_deref(), &self.name)
    }
}

/// Callback invoked by the watch mechanism for each object that needs reconciling.
#[async_trait]
pub trait Reconciler: Send + Sync {
    async fn reconcile(&self, request: ReconcileRequest) -> Result<Action, ReconcileError>;
}

/// Something that produces reconciliation requests and drives a [`Reconciler`] with
/// them until closed.
#[async_trait]
pub trait ChangeSource: Send {
    /// Run until `close` fires.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError`] if the source cannot start.
    async fn run(
        self: Box<Self>,
        reconciler: Arc<dyn Reconciler>,
        close: CloseSignal,
    ) -> Result<(), WatchError>;
}

/// [`ChangeSource`] backed by kube-rs watchers over the configured resource kinds.
pub struct WatchManager {
    client: Option<Client>,
    config: InputConfig,
}

impl WatchManager {
    /// Watch manager that connects with the inferred kubeconfig when started.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid.
    pub fn new(config: InputConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            client: None,
            config,
        })
    }

    /// Watch manager using an existing client.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid.
    pub fn with_client(client: Client, config: InputConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            client: Some(client),
            config,
        })
    }
}

#[async_trait]
impl ChangeSource for WatchManager {
    async fn run(
        self: Box<Self>,
        reconciler: Arc<dyn Reconciler>,
        close: CloseSignal,
    ) -> Result<(), WatchError> {
        let client = match self.client {
            Some(client) => client,
            None => Client::try_default().await.map_err(WatchError::Connect)?,
        };

        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let mut watchers = JoinSet::new();

        for (index, spec) in self.config.watches.iter().enumerate() {
            let resource = ApiResource::from_gvk(&spec.gvk());
            let scopes: Vec<Option<String>> = if spec.namespaces.is_empty() {
                vec![None]
            } else {
                spec.namespaces.iter().cloned().map(Some).collect()
            };

            let mut stores = Vec::with_capacity(scopes.len());
            let mut streams = Vec::with_capacity(scopes.len());
            for scope in scopes {
                let writer = Writer::<DynamicObject>::new(resource.clone());
                stores.push((scope.clone(), writer.as_reader()));
                let api = match &scope {
                    Some(namespace) => Api::namespaced_with(client.clone(), namespace, &resource),
                    None => Api::all_with(client.clone(), &resource),
                };
                streams.push((api, writer));
            }

            let cache = Arc::new(StoreCache {
                resource: resource.clone(),
                stores,
            });
            let target = Arc::new(WatchTarget::new(index, spec.clone(), cache));

            for (api, writer) in streams {
                info!(
                    group = %spec.group,
                    version = %spec.version,
                    kind = %spec.kind,
                    "Starting watch"
                );
                watchers.spawn(watch_events(
                    api,
                    watcher_config(spec),
                    writer,
                    target.clone(),
                    requests_tx.clone(),
                ));
            }
        }
        drop(requests_tx);

        Scheduler::new(reconciler, self.config.max_concurrent_reconciles)
            .run(requests_rx, close)
            .await;

        watchers.shutdown().await;
        debug!("All watches stopped");
        Ok(())
    }
}

/// Watcher configuration for a watch spec, with its selector pushed to the API server.
#[must_use]
pub fn watcher_config(spec: &WatchSpec) -> watcher::Config {
    let config = watcher::Config::default();
    match spec.selector.as_ref().map(to_selector_string) {
        Some(labels) if !labels.is_empty() => config.labels(&labels),
        _ => config,
    }
}

/// Feed one watch stream into its store and turn admitted events into requests.
async fn watch_events(
    api: Api<DynamicObject>,
    config: watcher::Config,
    writer: Writer<DynamicObject>,
    target: Arc<WatchTarget>,
    requests: mpsc::UnboundedSender<ReconcileRequest>,
) {
    let mut events = EventRequests::new(target.clone(), writer.as_reader());
    let stream = reflector::reflector(writer, watcher::watcher(api, config).default_backoff());
    let mut stream = std::pin::pin!(stream);

    while let Some(event) = stream.next().await {
        let ready = match event {
            Ok(event) => events.on_event(&event),
            Err(e) => {
                warn!(kind = %target.spec.kind, error = %e, "Watch stream error");
                Vec::new()
            }
        };

        for request in ready {
            if requests.send(request).is_err() {
                return;
            }
        }
    }
}

/// Turns the events of one watch stream into reconciliation requests.
///
/// Events must be seen after the reflector has applied them to `store`. Objects
/// listed during a (re)list only become visible in the store once the list
/// completes, so their requests are held back until `InitDone`. Objects the store
/// held before a relist that the relist no longer returns were deleted while the
/// watch was disconnected; they are requested at `InitDone` as well, when the
/// lookup no longer finds them.
pub struct EventRequests {
    target: Arc<WatchTarget>,
    store: Store<DynamicObject>,
    /// Admitted objects returned by the current relist
    listed: Vec<ReconcileRequest>,
    /// Every object returned by the current relist, admitted or not
    relisted: HashSet<(Option<String>, String)>,
    /// Admitted objects the store held when the relist started
    before_relist: Vec<ReconcileRequest>,
}

impl EventRequests {
    #[must_use]
    pub fn new(target: Arc<WatchTarget>, store: Store<DynamicObject>) -> Self {
        Self {
            target,
            store,
            listed: Vec::new(),
            relisted: HashSet::new(),
            before_relist: Vec::new(),
        }
    }

    /// Requests that become ready with `event`.
    pub fn on_event(&mut self, event: &Event<DynamicObject>) -> Vec<ReconcileRequest> {
        match event {
            Event::Apply(object) | Event::Delete(object) => {
                self.target.request_for(object).into_iter().collect()
            }
            Event::Init => {
                self.listed.clear();
                self.relisted.clear();
                self.before_relist = self
                    .store
                    .state()
                    .iter()
                    .filter_map(|object| self.target.request_for(object))
                    .collect();
                Vec::new()
            }
            Event::InitApply(object) => {
                self.relisted.insert((object.namespace(), object.name_any()));
                self.listed.extend(self.target.request_for(object));
                Vec::new()
            }
            Event::InitDone => {
                let mut ready = std::mem::take(&mut self.listed);
                let relisted = std::mem::take(&mut self.relisted);
                let gone: Vec<ReconcileRequest> = std::mem::take(&mut self.before_relist)
                    .into_iter()
                    .filter(|request| {
                        !relisted.contains(&(request.namespace.clone(), request.name.clone()))
                    })
                    .collect();
                if !gone.is_empty() {
                    debug!(
                        kind = %self.target.spec.kind,
                        count = gone.len(),
                        "Objects deleted while the watch was disconnected"
                    );
                }
                ready.extend(gone);
                ready
            }
        }
    }
}

type Completion = (ReconcileRequest, Result<Action, String>);

/// Runs reconciliations with per-key serialization, bounded concurrency, delayed
/// requeues and error backoff.
pub struct Scheduler {
    reconciler: Arc<dyn Reconciler>,
    max_concurrent: usize,
    /// Requests waiting for a worker, in arrival order
    ready: VecDeque<ReconcileRequest>,
    queued: HashSet<ObjectKey>,
    in_flight: HashSet<ObjectKey>,
    /// Requests that arrived while their key was in flight
    pending: HashMap<ObjectKey, ReconcileRequest>,
    backoffs: HashMap<ObjectKey, ExponentialBackoff>,
}

impl Scheduler {
    #[must_use]
    pub fn new(reconciler: Arc<dyn Reconciler>, max_concurrent: usize) -> Self {
        Self {
            reconciler,
            max_concurrent: max_concurrent.max(1),
            ready: VecDeque::new(),
            queued: HashSet::new(),
            in_flight: HashSet::new(),
            pending: HashMap::new(),
            backoffs: HashMap::new(),
        }
    }

    /// Process requests until `close` fires.
    ///
    /// Reconciliations already running are allowed to finish (they observe the same
    /// close signal); delayed requeues are dropped.
    pub async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<ReconcileRequest>,
        mut close: CloseSignal,
    ) {
        let (delayed_tx, mut delayed_rx) = mpsc::unbounded_channel();
        let mut running: JoinSet<Completion> = JoinSet::new();
        let mut timers: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                () = close.closing() => break,
                Some(request) = requests.recv() => self.enqueue(request),
                Some(request) = delayed_rx.recv() => self.enqueue(request),
                Some(joined) = running.join_next(), if !running.is_empty() => {
                    match joined {
                        Ok((request, result)) => {
                            if let Some(delay) = self.complete(&request, result) {
                                let delayed_tx = delayed_tx.clone();
                                timers.spawn(async move {
                                    tokio::time::sleep(delay).await;
                                    let _ = delayed_tx.send(request);
                                });
                            }
                        }
                        Err(e) => error!(error = %e, "Reconcile task failed to join"),
                    }
                }
                Some(_) = timers.join_next(), if !timers.is_empty() => {}
            }

            self.dispatch(&mut running);
        }

        timers.shutdown().await;
        while running.join_next().await.is_some() {}
        debug!("Scheduler stopped");
    }

    fn enqueue(&mut self, request: ReconcileRequest) {
        let key = request.key();
        if self.in_flight.contains(&key) {
            self.pending.insert(key, request);
        } else if self.queued.insert(key) {
            self.ready.push_back(request);
        }
    }

    fn dispatch(&mut self, running: &mut JoinSet<Completion>) {
        while running.len() < self.max_concurrent {
            let Some(request) = self.ready.pop_front() else {
                break;
            };
            let key = request.key();
            self.queued.remove(&key);
            self.in_flight.insert(key);

            let reconciler = self.reconciler.clone();
            running.spawn(async move {
                let result = AssertUnwindSafe(reconciler.reconcile(request.clone()))
                    .catch_unwind()
                    .await;
                let result = match result {
                    Ok(Ok(action)) => Ok(action),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err("reconciler panicked".to_string()),
                };
                (request, result)
            });
        }
    }

    /// Record a finished run and return the delay after which to run it again, if any.
    fn complete(
        &mut self,
        request: &ReconcileRequest,
        result: Result<Action, String>,
    ) -> Option<Duration> {
        let key = request.key();
        self.in_flight.remove(&key);
        if let Some(pending) = self.pending.remove(&key) {
            self.enqueue(pending);
        }

        match result {
            Ok(action) => {
                self.backoffs.remove(&key);
                let delay = action.requeue_after()?;
                debug!(kind = %request.kind(), object = %key, delay = ?delay, "Requeue requested");
                metrics::record_requeue(request.kind(), "requested");
                Some(delay)
            }
            Err(reason) => {
                let delay = self
                    .backoffs
                    .entry(key.clone())
                    .or_insert_with(error_backoff)
                    .next_backoff();
                warn!(
                    kind = %request.kind(),
                    object = %key,
                    error = %reason,
                    retry_in = ?delay,
                    "Reconciliation failed, backing off"
                );
                metrics::record_requeue(request.kind(), "error");
                Some(delay)
            }
        }
    }
}

#[cfg(test)]
#[path = "watch_tests.rs"]
mod watch_tests;
