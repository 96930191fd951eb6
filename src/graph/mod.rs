//! # Resource Graph
//!
//! Declarative description of what the stack creates: a Kubernetes provider
//! binding, a namespace, and a secret inside that namespace carrying the encoded
//! bootstrap credential.
//!
//! A [`ResourceGraph`] is a deferred program. Building it only captures the
//! encoded credential; resources are declared when an engine evaluates the graph,
//! either in-process through [`ResourceGraph::evaluate`] or by rendering it as a
//! Pulumi YAML project ([`yaml::render_project`]).
//!
//! References between resources ([`Value::NameOf`]) resolve to the name the engine
//! *assigned* to an earlier resource during the same evaluation, which is what
//! keeps the secret ordered after its namespace.

pub mod yaml;

use crate::config::TargetConfig;
use crate::constants::{EXPORT_NAMESPACE, EXPORT_SECRET_NAME, SECRET_TYPE_OPAQUE};
use crate::credential::EncodedCredential;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("resource '{resource}' references '{target}', which has not been declared before it")]
    UnresolvedReference { resource: String, target: String },
    #[error("resource '{0}' is declared more than once")]
    DuplicateResource(String),
    #[error("failed to register resource '{resource}': {message}")]
    Registration { resource: String, message: String },
}

/// A property value in the graph
#[derive(Clone, PartialEq, Eq)]
pub enum Value {
    /// Plain literal
    Literal(String),
    /// Credential that the engine must store encrypted; never printed
    Secret(EncodedCredential),
    /// The assigned `metadata.name` of another resource
    NameOf(String),
}

impl Value {
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }

    pub fn name_of(resource: impl Into<String>) -> Self {
        Self::NameOf(resource.into())
    }

    fn referenced(&self) -> Option<&str> {
        match self {
            Self::NameOf(target) => Some(target.as_str()),
            Self::Literal(_) | Self::Secret(_) => None,
        }
    }

    fn resolve(&self, owner: &str, assigned: &BTreeMap<String, String>) -> Result<String, GraphError> {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Secret(secret) => Ok(secret.as_str().to_string()),
            Self::NameOf(target) => {
                assigned
                    .get(target)
                    .cloned()
                    .ok_or_else(|| GraphError::UnresolvedReference {
                        resource: owner.to_string(),
                        target: target.clone(),
                    })
            }
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(value) => write!(f, "{value:?}"),
            Self::Secret(_) => write!(f, "<secret>"),
            Self::NameOf(target) => write!(f, "${{{target}.metadata.name}}"),
        }
    }
}

/// Kind of a declared resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    KubernetesProvider,
    Namespace,
    Secret,
}

impl ResourceKind {
    /// Pulumi type token
    pub fn type_token(self) -> &'static str {
        match self {
            Self::KubernetesProvider => "pulumi:providers:kubernetes",
            Self::Namespace => "kubernetes:core/v1:Namespace",
            Self::Secret => "kubernetes:core/v1:Secret",
        }
    }
}

/// Declared properties of a resource, before references are resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceSpec {
    KubernetesProvider {
        kubeconfig: PathBuf,
    },
    Namespace {
        name: Value,
    },
    Secret {
        namespace: Value,
        /// `None` lets the engine assign a name
        name: Option<Value>,
        data: BTreeMap<String, Value>,
        secret_type: String,
    },
}

impl ResourceSpec {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::KubernetesProvider { .. } => ResourceKind::KubernetesProvider,
            Self::Namespace { .. } => ResourceKind::Namespace,
            Self::Secret { .. } => ResourceKind::Secret,
        }
    }

    fn references(&self) -> Vec<&str> {
        match self {
            Self::KubernetesProvider { .. } => Vec::new(),
            Self::Namespace { name } => name.referenced().into_iter().collect(),
            Self::Secret {
                namespace,
                name,
                data,
                ..
            } => namespace
                .referenced()
                .into_iter()
                .chain(name.as_ref().and_then(Value::referenced))
                .chain(data.values().filter_map(Value::referenced))
                .collect(),
        }
    }
}

/// One declared resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDecl {
    pub logical_name: String,
    pub spec: ResourceSpec,
    /// Logical name of the provider binding the resource is created with
    pub provider: Option<String>,
}

impl ResourceDecl {
    fn resolve(&self, assigned: &BTreeMap<String, String>) -> Result<ResolvedResource, GraphError> {
        let owner = self.logical_name.as_str();
        let spec = match &self.spec {
            ResourceSpec::KubernetesProvider { kubeconfig } => ResolvedSpec::KubernetesProvider {
                kubeconfig: kubeconfig.clone(),
            },
            ResourceSpec::Namespace { name } => ResolvedSpec::Namespace {
                name: name.resolve(owner, assigned)?,
            },
            ResourceSpec::Secret {
                namespace,
                name,
                data,
                secret_type,
            } => ResolvedSpec::Secret {
                namespace: namespace.resolve(owner, assigned)?,
                name: name
                    .as_ref()
                    .map(|n| n.resolve(owner, assigned))
                    .transpose()?,
                data: data
                    .iter()
                    .map(|(k, v)| v.resolve(owner, assigned).map(|value| (k.clone(), value)))
                    .collect::<Result<_, GraphError>>()?,
                secret_type: secret_type.clone(),
            },
        };
        Ok(ResolvedResource {
            logical_name: self.logical_name.clone(),
            provider: self.provider.clone(),
            spec,
        })
    }
}

/// Resource properties with every reference replaced by its assigned value
#[derive(Clone, PartialEq, Eq)]
pub enum ResolvedSpec {
    KubernetesProvider {
        kubeconfig: PathBuf,
    },
    Namespace {
        name: String,
    },
    Secret {
        namespace: String,
        name: Option<String>,
        data: BTreeMap<String, String>,
        secret_type: String,
    },
}

impl fmt::Debug for ResolvedSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KubernetesProvider { kubeconfig } => f
                .debug_struct("KubernetesProvider")
                .field("kubeconfig", kubeconfig)
                .finish(),
            Self::Namespace { name } => f.debug_struct("Namespace").field("name", name).finish(),
            Self::Secret {
                namespace,
                name,
                data,
                secret_type,
            } => f
                .debug_struct("Secret")
                .field("namespace", namespace)
                .field("name", name)
                .field("keys", &data.keys().collect::<Vec<_>>())
                .field("secret_type", secret_type)
                .finish(),
        }
    }
}

/// A resource handed to a [`ResourceRegistrar`] during evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedResource {
    pub logical_name: String,
    pub provider: Option<String>,
    pub spec: ResolvedSpec,
}

impl ResolvedResource {
    pub fn kind(&self) -> ResourceKind {
        match self.spec {
            ResolvedSpec::KubernetesProvider { .. } => ResourceKind::KubernetesProvider,
            ResolvedSpec::Namespace { .. } => ResourceKind::Namespace,
            ResolvedSpec::Secret { .. } => ResourceKind::Secret,
        }
    }
}

/// Engine-side hook invoked for each resource, in declaration order
pub trait ResourceRegistrar {
    /// Create or update `resource` and return the name assigned to it
    fn register(&mut self, resource: &ResolvedResource) -> Result<String, GraphError>;
}

/// A named stack output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    pub name: String,
    pub value: Value,
}

/// Resolved stack outputs keyed by export name
pub type ProgramOutputs = BTreeMap<String, String>;

/// The deferred program evaluated by a reconciliation engine
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResourceGraph {
    resources: Vec<ResourceDecl>,
    exports: Vec<Export>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resource(
        mut self,
        logical_name: impl Into<String>,
        spec: ResourceSpec,
        provider: Option<&str>,
    ) -> Self {
        self.resources.push(ResourceDecl {
            logical_name: logical_name.into(),
            spec,
            provider: provider.map(str::to_string),
        });
        self
    }

    pub fn export(mut self, name: impl Into<String>, value: Value) -> Self {
        self.exports.push(Export {
            name: name.into(),
            value,
        });
        self
    }

    pub fn resources(&self) -> &[ResourceDecl] {
        &self.resources
    }

    pub fn exports(&self) -> &[Export] {
        &self.exports
    }

    /// Check that names are unique and that every reference points at a resource
    /// declared earlier in the graph
    pub fn validate(&self) -> Result<(), GraphError> {
        let mut declared: HashSet<&str> = HashSet::new();
        for decl in &self.resources {
            let dependencies = decl
                .provider
                .as_deref()
                .into_iter()
                .chain(decl.spec.references());
            for target in dependencies {
                if !declared.contains(target) {
                    return Err(GraphError::UnresolvedReference {
                        resource: decl.logical_name.clone(),
                        target: target.to_string(),
                    });
                }
            }
            if !declared.insert(decl.logical_name.as_str()) {
                return Err(GraphError::DuplicateResource(decl.logical_name.clone()));
            }
        }
        for export in &self.exports {
            if let Some(target) = export.value.referenced() {
                if !declared.contains(target) {
                    return Err(GraphError::UnresolvedReference {
                        resource: format!("export {}", export.name),
                        target: target.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Declare every resource through `registrar`, in order, and resolve the
    /// exports.
    ///
    /// Evaluation stops at the first registration error; later resources, which
    /// may depend on the failed one, are never declared.
    pub fn evaluate<R>(&self, registrar: &mut R) -> Result<ProgramOutputs, GraphError>
    where
        R: ResourceRegistrar + ?Sized,
    {
        let mut assigned: BTreeMap<String, String> = BTreeMap::new();
        for decl in &self.resources {
            if assigned.contains_key(&decl.logical_name) {
                return Err(GraphError::DuplicateResource(decl.logical_name.clone()));
            }
            if let Some(provider) = &decl.provider {
                if !assigned.contains_key(provider) {
                    return Err(GraphError::UnresolvedReference {
                        resource: decl.logical_name.clone(),
                        target: provider.clone(),
                    });
                }
            }
            let resolved = decl.resolve(&assigned)?;
            let name = registrar.register(&resolved)?;
            debug!(
                "Registered {} {} as {}",
                decl.spec.kind().type_token(),
                decl.logical_name,
                name
            );
            assigned.insert(decl.logical_name.clone(), name);
        }

        self.exports
            .iter()
            .map(|export| {
                let owner = format!("export {}", export.name);
                export
                    .value
                    .resolve(&owner, &assigned)
                    .map(|value| (export.name.clone(), value))
            })
            .collect()
    }
}

/// Build the provisioning program around an encoded credential
///
/// Declares, in order: the provider binding to `kubeconfig`, the namespace
/// `target.namespace_name`, and an `Opaque` secret in that namespace whose single
/// data entry `target.data_key` holds `encoded`. Exports the assigned secret and
/// namespace names.
pub fn build(encoded: &EncodedCredential, target: &TargetConfig, kubeconfig: &Path) -> ResourceGraph {
    let provider = target.provider_resource.as_str();
    let namespace = target.namespace_name.as_str();
    let secret = target.secret_resource.as_str();

    ResourceGraph::new()
        .resource(
            provider,
            ResourceSpec::KubernetesProvider {
                kubeconfig: kubeconfig.to_path_buf(),
            },
            None,
        )
        .resource(
            namespace,
            ResourceSpec::Namespace {
                name: Value::literal(namespace),
            },
            Some(provider),
        )
        .resource(
            secret,
            ResourceSpec::Secret {
                namespace: Value::name_of(namespace),
                name: None,
                data: BTreeMap::from([(
                    target.data_key.clone(),
                    Value::Secret(encoded.clone()),
                )]),
                secret_type: SECRET_TYPE_OPAQUE.to_string(),
            },
            Some(provider),
        )
        .export(EXPORT_SECRET_NAME, Value::name_of(secret))
        .export(EXPORT_NAMESPACE, Value::name_of(namespace))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProvisionerConfig;
    use crate::encoding;

    /// Records registrations and assigns `<logical>-assigned` to unnamed secrets
    #[derive(Default)]
    struct RecordingRegistrar {
        registered: Vec<ResolvedResource>,
        fail_on: Option<ResourceKind>,
    }

    impl ResourceRegistrar for RecordingRegistrar {
        fn register(&mut self, resource: &ResolvedResource) -> Result<String, GraphError> {
            if self.fail_on == Some(resource.kind()) {
                return Err(GraphError::Registration {
                    resource: resource.logical_name.clone(),
                    message: "forbidden".to_string(),
                });
            }
            self.registered.push(resource.clone());
            Ok(match &resource.spec {
                ResolvedSpec::Namespace { name } => name.clone(),
                ResolvedSpec::Secret { name: Some(name), .. } => name.clone(),
                ResolvedSpec::Secret { name: None, .. } => {
                    format!("{}-assigned", resource.logical_name)
                }
                ResolvedSpec::KubernetesProvider { .. } => resource.logical_name.clone(),
            })
        }
    }

    fn stock_graph(raw: &str) -> ResourceGraph {
        let config = ProvisionerConfig::default();
        let encoded = encoding::encode_credential(&raw.into());
        build(&encoded, &config.target, Path::new("/home/ops/.kube/config"))
    }

    #[test]
    fn test_build_declares_provider_namespace_then_secret() {
        let graph = stock_graph("s3cr3t");
        let kinds: Vec<_> = graph.resources().iter().map(|r| r.spec.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                ResourceKind::KubernetesProvider,
                ResourceKind::Namespace,
                ResourceKind::Secret
            ]
        );
        assert!(graph.validate().is_ok());
        let exports: Vec<_> = graph.exports().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(exports, vec!["secretName", "namespace"]);
    }

    #[test]
    fn test_secret_references_namespace_by_assigned_name() {
        let graph = stock_graph("s3cr3t");
        let secret = &graph.resources()[2];
        match &secret.spec {
            ResourceSpec::Secret {
                namespace,
                name,
                secret_type,
                ..
            } => {
                assert_eq!(namespace, &Value::name_of("mynamespace"));
                assert!(name.is_none());
                assert_eq!(secret_type, "Opaque");
            }
            other => panic!("expected secret, got {other:?}"),
        }
        assert_eq!(secret.provider.as_deref(), Some("k8s-provider"));
    }

    #[test]
    fn test_evaluate_resolves_references_and_exports() {
        let graph = stock_graph("s3cr3t");
        let mut registrar = RecordingRegistrar::default();
        let outputs = graph.evaluate(&mut registrar).unwrap();

        assert_eq!(outputs.get("namespace").map(String::as_str), Some("mynamespace"));
        assert_eq!(
            outputs.get("secretName").map(String::as_str),
            Some("mysecret-assigned")
        );

        match &registrar.registered[2].spec {
            ResolvedSpec::Secret { namespace, data, .. } => {
                assert_eq!(namespace, "mynamespace");
                assert_eq!(data.get("mysecret").map(String::as_str), Some("czNjcjN0"));
            }
            other => panic!("expected secret, got {other:?}"),
        }
    }

    #[test]
    fn test_secret_data_equals_encoding_for_any_credential() {
        for raw in ["", "XYZ", "s3cr3t", "with spaces and ✓"] {
            let graph = stock_graph(raw);
            let mut registrar = RecordingRegistrar::default();
            graph.evaluate(&mut registrar).unwrap();
            match &registrar.registered[2].spec {
                ResolvedSpec::Secret { data, .. } => {
                    assert_eq!(data["mysecret"], encoding::encode(raw.as_bytes()));
                }
                other => panic!("expected secret, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_failed_namespace_stops_evaluation_before_secret() {
        let graph = stock_graph("s3cr3t");
        let mut registrar = RecordingRegistrar {
            fail_on: Some(ResourceKind::Namespace),
            ..Default::default()
        };
        let err = graph.evaluate(&mut registrar).unwrap_err();
        assert!(matches!(err, GraphError::Registration { ref resource, .. } if resource == "mynamespace"));
        assert!(registrar
            .registered
            .iter()
            .all(|r| r.kind() != ResourceKind::Secret));
    }

    #[test]
    fn test_forward_reference_is_rejected() {
        let graph = ResourceGraph::new()
            .resource(
                "mysecret",
                ResourceSpec::Secret {
                    namespace: Value::name_of("mynamespace"),
                    name: None,
                    data: BTreeMap::new(),
                    secret_type: "Opaque".to_string(),
                },
                None,
            )
            .resource(
                "mynamespace",
                ResourceSpec::Namespace {
                    name: Value::literal("mynamespace"),
                },
                None,
            );

        let expected = GraphError::UnresolvedReference {
            resource: "mysecret".to_string(),
            target: "mynamespace".to_string(),
        };
        assert_eq!(graph.validate(), Err(expected.clone()));

        let mut registrar = RecordingRegistrar::default();
        assert_eq!(graph.evaluate(&mut registrar), Err(expected));
        assert!(registrar.registered.is_empty());
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let ns = ResourceSpec::Namespace {
            name: Value::literal("a"),
        };
        let graph = ResourceGraph::new()
            .resource("a", ns.clone(), None)
            .resource("a", ns, None);
        assert_eq!(
            graph.validate(),
            Err(GraphError::DuplicateResource("a".to_string()))
        );
    }

    #[test]
    fn test_secret_data_keeps_the_encoded_credential_type() {
        let graph = stock_graph("s3cr3t");
        match &graph.resources()[2].spec {
            ResourceSpec::Secret { data, .. } => {
                let expected = EncodedCredential::new("czNjcjN0".to_string());
                assert_eq!(data["mysecret"], Value::Secret(expected));
            }
            other => panic!("expected secret, got {other:?}"),
        }
    }

    #[test]
    fn test_debug_output_hides_secret_values() {
        let graph = stock_graph("s3cr3t");
        let rendered = format!("{graph:?}");
        assert!(!rendered.contains("czNjcjN0"));
        assert!(rendered.contains("<secret>"));
    }
}
