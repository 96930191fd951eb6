//! # In-Memory Engine
//!
//! A [`ReconciliationEngine`] that evaluates programs against an in-memory
//! cluster. It records per-stack state the way a real engine does, so refresh,
//! idempotent updates and destroy can be exercised without a cluster.
//!
//! Tests can inject failures per operation ([`MemoryEngine::fail`]), reject a
//! resource kind during evaluation ([`MemoryEngine::reject`]), and mutate the live
//! cluster behind the engine's back to simulate drift.

use super::{
    ChangeKind, EngineError, Operation, OperationSummary, ReconciliationEngine, Stack,
    StackIdentity, UpdateResult,
};
use crate::graph::{
    GraphError, ProgramOutputs, ResolvedResource, ResolvedSpec, ResourceGraph, ResourceKind,
    ResourceRegistrar,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// A secret object in the in-memory cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSecret {
    /// Base64 data values, as stored in `Secret.data`
    pub data: BTreeMap<String, String>,
    pub secret_type: String,
}

/// Objects currently present in the in-memory cluster
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveCluster {
    pub namespaces: BTreeSet<String>,
    /// Keyed by (namespace, name)
    pub secrets: BTreeMap<(String, String), LiveSecret>,
}

impl LiveCluster {
    pub fn secret(&self, namespace: &str, name: &str) -> Option<&LiveSecret> {
        self.secrets.get(&(namespace.to_string(), name.to_string()))
    }
}

#[derive(Debug, Clone)]
struct RecordedResource {
    logical_name: String,
    assigned_name: String,
    spec: ResolvedSpec,
}

impl RecordedResource {
    fn kind(&self) -> ResourceKind {
        match self.spec {
            ResolvedSpec::KubernetesProvider { .. } => ResourceKind::KubernetesProvider,
            ResolvedSpec::Namespace { .. } => ResourceKind::Namespace,
            ResolvedSpec::Secret { .. } => ResourceKind::Secret,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct StackState {
    /// In creation order
    resources: Vec<RecordedResource>,
    outputs: ProgramOutputs,
}

#[derive(Debug, Default)]
struct Backend {
    cluster: LiveCluster,
    stacks: HashMap<StackIdentity, StackState>,
    failures: HashSet<Operation>,
    rejected: HashSet<ResourceKind>,
}

/// In-memory engine; clones share the same backend
#[derive(Debug, Clone, Default)]
pub struct MemoryEngine {
    backend: Arc<Mutex<Backend>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `operation` fail
    pub fn fail(&self, operation: Operation) {
        self.lock().failures.insert(operation);
    }

    /// Make registration of `kind` fail during evaluation
    pub fn reject(&self, kind: ResourceKind) {
        self.lock().rejected.insert(kind);
    }

    /// Snapshot of the live cluster
    pub fn cluster(&self) -> LiveCluster {
        self.lock().cluster.clone()
    }

    pub fn has_stack(&self, identity: &StackIdentity) -> bool {
        self.lock().stacks.contains_key(identity)
    }

    /// Number of resources recorded in the stack's state
    pub fn resource_count(&self, identity: &StackIdentity) -> usize {
        self.lock()
            .stacks
            .get(identity)
            .map_or(0, |state| state.resources.len())
    }

    /// Overwrite one data value of a live secret without telling the engine
    pub fn tamper_secret(&self, namespace: &str, name: &str, key: &str, value: &str) -> bool {
        let mut backend = self.lock();
        match backend
            .cluster
            .secrets
            .get_mut(&(namespace.to_string(), name.to_string()))
        {
            Some(secret) => {
                secret.data.insert(key.to_string(), value.to_string());
                true
            }
            None => false,
        }
    }

    /// Delete a live secret without telling the engine
    pub fn delete_live_secret(&self, namespace: &str, name: &str) -> bool {
        self.lock()
            .cluster
            .secrets
            .remove(&(namespace.to_string(), name.to_string()))
            .is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Backend> {
        lock_backend(&self.backend)
    }
}

fn lock_backend(backend: &Mutex<Backend>) -> MutexGuard<'_, Backend> {
    backend.lock().unwrap_or_else(PoisonError::into_inner)
}

fn check_failure(backend: &Backend, operation: Operation) -> Result<(), EngineError> {
    if backend.failures.contains(&operation) {
        return Err(EngineError::Rejected {
            operation,
            message: "injected failure".to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl ReconciliationEngine for MemoryEngine {
    type Stack = MemoryStack;

    async fn upsert_stack(
        &self,
        identity: &StackIdentity,
        program: ResourceGraph,
    ) -> Result<MemoryStack, EngineError> {
        let mut backend = self.lock();
        check_failure(&backend, Operation::Workspace)?;
        program.validate()?;

        if !backend.stacks.contains_key(identity) {
            debug!("Creating stack {}", identity);
            backend.stacks.insert(identity.clone(), StackState::default());
        }

        Ok(MemoryStack {
            identity: identity.clone(),
            program,
            backend: Arc::clone(&self.backend),
        })
    }
}

/// Stack handle returned by [`MemoryEngine`]
#[derive(Debug)]
pub struct MemoryStack {
    identity: StackIdentity,
    program: ResourceGraph,
    backend: Arc<Mutex<Backend>>,
}

/// Applies resources to the live cluster while evaluating a program
struct UpRegistrar<'b> {
    cluster: &'b mut LiveCluster,
    rejected: &'b HashSet<ResourceKind>,
    previous: &'b [RecordedResource],
    registered: Vec<RecordedResource>,
    changes: BTreeMap<ChangeKind, u64>,
}

impl UpRegistrar<'_> {
    fn previous(&self, logical_name: &str) -> Option<&RecordedResource> {
        self.previous
            .iter()
            .find(|r| r.logical_name == logical_name)
    }

    fn record_change(&mut self, kind: ChangeKind) {
        *self.changes.entry(kind).or_insert(0) += 1;
    }
}

impl ResourceRegistrar for UpRegistrar<'_> {
    fn register(&mut self, resource: &ResolvedResource) -> Result<String, GraphError> {
        if self.rejected.contains(&resource.kind()) {
            return Err(GraphError::Registration {
                resource: resource.logical_name.clone(),
                message: "rejected by the cluster".to_string(),
            });
        }

        let previous = self.previous(&resource.logical_name).cloned();
        let (assigned_name, in_sync) = match &resource.spec {
            ResolvedSpec::KubernetesProvider { .. } => (resource.logical_name.clone(), true),
            ResolvedSpec::Namespace { name } => {
                let live = !self.cluster.namespaces.insert(name.clone());
                (name.clone(), live)
            }
            ResolvedSpec::Secret {
                namespace,
                name,
                data,
                secret_type,
            } => {
                if !self.cluster.namespaces.contains(namespace) {
                    return Err(GraphError::Registration {
                        resource: resource.logical_name.clone(),
                        message: format!("namespace '{namespace}' does not exist"),
                    });
                }
                let assigned = name
                    .clone()
                    .or_else(|| previous.as_ref().map(|p| p.assigned_name.clone()))
                    .unwrap_or_else(|| generated_name(&resource.logical_name));

                if let Some(ResolvedSpec::Secret {
                    namespace: old_namespace,
                    ..
                }) = previous.as_ref().map(|p| &p.spec)
                {
                    if old_namespace != namespace {
                        let old_name = previous
                            .as_ref()
                            .map(|p| p.assigned_name.clone())
                            .unwrap_or_default();
                        self.cluster
                            .secrets
                            .remove(&(old_namespace.clone(), old_name));
                    }
                }

                let desired = LiveSecret {
                    data: data.clone(),
                    secret_type: secret_type.clone(),
                };
                let key = (namespace.clone(), assigned.clone());
                let live = self.cluster.secrets.get(&key) == Some(&desired);
                self.cluster.secrets.insert(key, desired);
                (assigned, live)
            }
        };

        let change = match &previous {
            None => ChangeKind::Create,
            Some(p) if p.spec == resource.spec && p.assigned_name == assigned_name && in_sync => {
                ChangeKind::Same
            }
            Some(_) => ChangeKind::Update,
        };
        self.record_change(change);

        self.registered.push(RecordedResource {
            logical_name: resource.logical_name.clone(),
            assigned_name: assigned_name.clone(),
            spec: resource.spec.clone(),
        });
        Ok(assigned_name)
    }
}

/// `<logical>-<8 hex chars>`, the shape of engine auto-naming
fn generated_name(logical_name: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", logical_name, &suffix[..8])
}

fn remove_live(cluster: &mut LiveCluster, resource: &RecordedResource) {
    match &resource.spec {
        ResolvedSpec::KubernetesProvider { .. } => {}
        ResolvedSpec::Namespace { name } => {
            cluster.namespaces.remove(name);
            cluster.secrets.retain(|(namespace, _), _| namespace != name);
        }
        ResolvedSpec::Secret { namespace, .. } => {
            cluster
                .secrets
                .remove(&(namespace.clone(), resource.assigned_name.clone()));
        }
    }
}

fn summary(changes: BTreeMap<ChangeKind, u64>, started_at: chrono::DateTime<Utc>) -> OperationSummary {
    OperationSummary {
        changes,
        started_at,
        finished_at: Utc::now(),
    }
}

#[async_trait]
impl Stack for MemoryStack {
    async fn refresh(&self) -> Result<OperationSummary, EngineError> {
        let started_at = Utc::now();
        let mut guard = lock_backend(&self.backend);
        check_failure(&guard, Operation::Refresh)?;
        let backend = &mut *guard;
        let cluster = &backend.cluster;
        let state = backend.stacks.entry(self.identity.clone()).or_default();

        let mut changes = BTreeMap::new();
        let mut kept = Vec::with_capacity(state.resources.len());
        for mut resource in state.resources.drain(..) {
            let change = match &mut resource.spec {
                ResolvedSpec::KubernetesProvider { .. } => ChangeKind::Same,
                ResolvedSpec::Namespace { name } => {
                    if cluster.namespaces.contains(name.as_str()) {
                        ChangeKind::Same
                    } else {
                        ChangeKind::Delete
                    }
                }
                ResolvedSpec::Secret {
                    namespace,
                    data,
                    secret_type,
                    ..
                } => match cluster.secret(namespace, &resource.assigned_name) {
                    None => ChangeKind::Delete,
                    Some(live) if &live.data == data && &live.secret_type == secret_type => {
                        ChangeKind::Same
                    }
                    Some(live) => {
                        *data = live.data.clone();
                        *secret_type = live.secret_type.clone();
                        ChangeKind::Update
                    }
                },
            };
            *changes.entry(change).or_insert(0) += 1;
            if change != ChangeKind::Delete {
                kept.push(resource);
            }
        }
        state.resources = kept;

        Ok(summary(changes, started_at))
    }

    async fn up(&self) -> Result<UpdateResult, EngineError> {
        let started_at = Utc::now();
        let mut guard = lock_backend(&self.backend);
        check_failure(&guard, Operation::Up)?;
        let backend = &mut *guard;
        let previous = backend
            .stacks
            .get(&self.identity)
            .map(|state| state.resources.clone())
            .unwrap_or_default();

        let mut registrar = UpRegistrar {
            cluster: &mut backend.cluster,
            rejected: &backend.rejected,
            previous: &previous,
            registered: Vec::new(),
            changes: BTreeMap::new(),
        };
        let evaluated = self.program.evaluate(&mut registrar);
        let UpRegistrar {
            registered,
            mut changes,
            ..
        } = registrar;

        let state = backend.stacks.entry(self.identity.clone()).or_default();
        let outputs = match evaluated {
            Ok(outputs) => outputs,
            Err(e) => {
                // Keep what was created before the failure alongside untouched state
                let mut resources = registered;
                for old in previous {
                    if !resources.iter().any(|r| r.logical_name == old.logical_name) {
                        resources.push(old);
                    }
                }
                state.resources = resources;
                return Err(e.into());
            }
        };

        // Resources no longer declared are deleted, dependents first
        for stale in previous.iter().rev() {
            if !registered.iter().any(|r| r.logical_name == stale.logical_name) {
                remove_live(&mut backend.cluster, stale);
                *changes.entry(ChangeKind::Delete).or_insert(0) += 1;
            }
        }

        let state = backend.stacks.entry(self.identity.clone()).or_default();
        state.resources = registered;
        state.outputs = outputs.clone();

        Ok(UpdateResult {
            summary: summary(changes, started_at),
            outputs,
        })
    }

    async fn destroy(
        &self,
        progress: &mut (dyn Write + Send),
    ) -> Result<OperationSummary, EngineError> {
        let started_at = Utc::now();
        let mut guard = lock_backend(&self.backend);
        check_failure(&guard, Operation::Destroy)?;
        let backend = &mut *guard;
        let state = backend.stacks.entry(self.identity.clone()).or_default();
        let io_error = |source| EngineError::Io {
            operation: Operation::Destroy,
            source,
        };

        writeln!(progress, "Destroying ({})", self.identity.stack_name).map_err(io_error)?;
        let mut deleted = 0;
        while let Some(resource) = state.resources.pop() {
            writeln!(
                progress,
                " - {} {} deleting",
                resource.kind().type_token(),
                resource.logical_name
            )
            .map_err(io_error)?;
            remove_live(&mut backend.cluster, &resource);
            writeln!(
                progress,
                " - {} {} deleted",
                resource.kind().type_token(),
                resource.logical_name
            )
            .map_err(io_error)?;
            deleted += 1;
        }
        state.outputs.clear();
        writeln!(progress, "Resources:\n    - {deleted} deleted").map_err(io_error)?;

        Ok(summary(BTreeMap::from([(ChangeKind::Delete, deleted)]), started_at))
    }

    async fn outputs(&self) -> Result<ProgramOutputs, EngineError> {
        let backend = lock_backend(&self.backend);
        check_failure(&backend, Operation::Outputs)?;
        Ok(backend
            .stacks
            .get(&self.identity)
            .map(|state| state.outputs.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProvisionerConfig;
    use crate::credential::EncodedCredential;
    use crate::graph;
    use std::path::Path;

    fn program(encoded: &str) -> ResourceGraph {
        let config = ProvisionerConfig::default();
        graph::build(
            &EncodedCredential::new(encoded.to_string()),
            &config.target,
            Path::new("/tmp/kubeconfig"),
        )
    }

    fn identity() -> StackIdentity {
        StackIdentity::new("k8s-secret", "dev")
    }

    #[tokio::test]
    async fn test_first_up_creates_everything() {
        let engine = MemoryEngine::new();
        let stack = engine.upsert_stack(&identity(), program("czNjcjN0")).await.unwrap();
        let result = stack.up().await.unwrap();

        assert_eq!(result.summary.count(ChangeKind::Create), 3);
        assert_eq!(engine.resource_count(&identity()), 3);

        let secret_name = &result.outputs["secretName"];
        assert!(secret_name.starts_with("mysecret-"));
        assert_eq!(secret_name.len(), "mysecret-".len() + 8);
        let live = engine.cluster();
        assert!(live.namespaces.contains("mynamespace"));
        let secret = live.secret("mynamespace", secret_name).unwrap();
        assert_eq!(secret.data["mysecret"], "czNjcjN0");
        assert_eq!(secret.secret_type, "Opaque");
    }

    #[tokio::test]
    async fn test_second_up_is_a_no_op() {
        let engine = MemoryEngine::new();
        let stack = engine.upsert_stack(&identity(), program("czNjcjN0")).await.unwrap();
        let first = stack.up().await.unwrap();

        let stack = engine.upsert_stack(&identity(), program("czNjcjN0")).await.unwrap();
        let second = stack.up().await.unwrap();

        assert!(!second.summary.has_changes());
        assert_eq!(second.summary.count(ChangeKind::Same), 3);
        assert_eq!(first.outputs, second.outputs);
    }

    #[tokio::test]
    async fn test_changed_credential_updates_secret_in_place() {
        let engine = MemoryEngine::new();
        let first = engine
            .upsert_stack(&identity(), program("b2xk"))
            .await
            .unwrap()
            .up()
            .await
            .unwrap();
        let second = engine
            .upsert_stack(&identity(), program("bmV3"))
            .await
            .unwrap()
            .up()
            .await
            .unwrap();

        assert_eq!(second.summary.count(ChangeKind::Update), 1);
        assert_eq!(second.summary.count(ChangeKind::Same), 2);
        assert_eq!(first.outputs["secretName"], second.outputs["secretName"]);
        let live = engine.cluster();
        assert_eq!(
            live.secret("mynamespace", &second.outputs["secretName"]).unwrap().data["mysecret"],
            "bmV3"
        );
    }

    #[tokio::test]
    async fn test_refresh_detects_drift() {
        let engine = MemoryEngine::new();
        let stack = engine.upsert_stack(&identity(), program("czNjcjN0")).await.unwrap();
        let result = stack.up().await.unwrap();
        let secret_name = result.outputs["secretName"].clone();

        assert!(!stack.refresh().await.unwrap().has_changes());

        assert!(engine.tamper_secret("mynamespace", &secret_name, "mysecret", "ZHJpZnQ="));
        let refreshed = stack.refresh().await.unwrap();
        assert_eq!(refreshed.count(ChangeKind::Update), 1);

        // The next update puts the declared value back
        let repaired = stack.up().await.unwrap();
        assert_eq!(repaired.summary.count(ChangeKind::Update), 1);
        assert_eq!(
            engine.cluster().secret("mynamespace", &secret_name).unwrap().data["mysecret"],
            "czNjcjN0"
        );
    }

    #[tokio::test]
    async fn test_refresh_forgets_deleted_resources() {
        let engine = MemoryEngine::new();
        let stack = engine.upsert_stack(&identity(), program("czNjcjN0")).await.unwrap();
        let result = stack.up().await.unwrap();

        assert!(engine.delete_live_secret("mynamespace", &result.outputs["secretName"]));
        let refreshed = stack.refresh().await.unwrap();
        assert_eq!(refreshed.count(ChangeKind::Delete), 1);
        assert_eq!(engine.resource_count(&identity()), 2);

        let recreated = stack.up().await.unwrap();
        assert_eq!(recreated.summary.count(ChangeKind::Create), 1);
    }

    #[tokio::test]
    async fn test_destroy_removes_everything_and_streams_progress() {
        let engine = MemoryEngine::new();
        let stack = engine.upsert_stack(&identity(), program("czNjcjN0")).await.unwrap();
        stack.up().await.unwrap();

        let mut progress = Vec::new();
        let summary = stack.destroy(&mut progress).await.unwrap();
        assert_eq!(summary.count(ChangeKind::Delete), 3);
        assert_eq!(engine.cluster(), LiveCluster::default());
        assert!(stack.outputs().await.unwrap().is_empty());

        let text = String::from_utf8(progress).unwrap();
        let secret_line = text.find("kubernetes:core/v1:Secret mysecret deleted").unwrap();
        let namespace_line = text
            .find("kubernetes:core/v1:Namespace mynamespace deleted")
            .unwrap();
        assert!(secret_line < namespace_line);
        assert!(text.contains("3 deleted"));
    }

    #[tokio::test]
    async fn test_rejected_namespace_never_declares_secret() {
        let engine = MemoryEngine::new();
        engine.reject(ResourceKind::Namespace);
        let stack = engine.upsert_stack(&identity(), program("czNjcjN0")).await.unwrap();

        let err = stack.up().await.unwrap_err();
        assert!(matches!(err, EngineError::Graph(GraphError::Registration { .. })));
        assert!(engine.cluster().secrets.is_empty());
        // Only the provider binding made it into state
        assert_eq!(engine.resource_count(&identity()), 1);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let engine = MemoryEngine::new();
        engine.fail(Operation::Workspace);
        let err = engine
            .upsert_stack(&identity(), program("czNjcjN0"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Rejected {
                operation: Operation::Workspace,
                ..
            }
        ));
        assert!(!engine.has_stack(&identity()));
    }
}
