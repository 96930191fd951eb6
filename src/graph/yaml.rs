//! # Pulumi YAML Rendering
//!
//! Renders a [`ResourceGraph`] as a `Pulumi.yaml` project using the YAML runtime,
//! so the Pulumi CLI can evaluate it without a language host.
//!
//! Secret values never appear in the document. Each one becomes a declared
//! secret config key that the resource references; the engine stores the value
//! with `pulumi config set --secret` so only the encrypted copy is persisted.
//!
//! ```yaml
//! name: k8s-secret
//! runtime: yaml
//! config:
//!   mysecret-mysecret:
//!     type: string
//!     secret: true
//! resources:
//!   mynamespace:
//!     type: kubernetes:core/v1:Namespace
//!     properties:
//!       metadata:
//!         name: mynamespace
//!     options:
//!       provider: ${k8s-provider}
//!   mysecret:
//!     type: kubernetes:core/v1:Secret
//!     properties:
//!       metadata:
//!         namespace: ${mynamespace.metadata.name}
//!       data:
//!         mysecret: ${mysecret-mysecret}
//!       type: Opaque
//! outputs:
//!   secretName: ${mysecret.metadata.name}
//! ```

use super::{GraphError, ResourceGraph, ResourceSpec, Value};
use crate::credential::EncodedCredential;
use serde::Serialize;
use serde_yaml::{Mapping, Value as Yaml};
use std::collections::BTreeMap;

#[derive(Debug, Serialize)]
struct PulumiProject<'a> {
    name: &'a str,
    runtime: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    config: BTreeMap<String, ConfigDecl>,
    resources: BTreeMap<&'a str, PulumiResource>,
    outputs: BTreeMap<&'a str, Yaml>,
}

#[derive(Debug, Serialize)]
struct ConfigDecl {
    #[serde(rename = "type")]
    value_type: &'static str,
    secret: bool,
}

#[derive(Debug, Serialize)]
struct PulumiResource {
    #[serde(rename = "type")]
    type_token: &'static str,
    properties: Mapping,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<PulumiOptions>,
}

#[derive(Debug, Serialize)]
struct PulumiOptions {
    provider: String,
}

/// A secret config value the project document references by key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretConfig<'g> {
    pub key: String,
    pub value: &'g EncodedCredential,
}

/// A rendered `Pulumi.yaml` and the secret config it expects to be set
#[derive(Debug)]
pub struct RenderedProject<'g> {
    pub document: String,
    pub secrets: Vec<SecretConfig<'g>>,
}

/// Render `graph` as the `Pulumi.yaml` document of project `project_name`
pub fn render_project<'g>(
    graph: &'g ResourceGraph,
    project_name: &str,
) -> Result<RenderedProject<'g>, RenderError> {
    graph.validate()?;

    let mut renderer = Renderer::default();
    let resources = graph
        .resources()
        .iter()
        .map(|decl| {
            let owner = decl.logical_name.as_str();
            let resource = PulumiResource {
                type_token: decl.spec.kind().type_token(),
                properties: renderer.properties(owner, &decl.spec),
                options: decl.provider.as_ref().map(|provider| PulumiOptions {
                    provider: format!("${{{provider}}}"),
                }),
            };
            (owner, resource)
        })
        .collect();

    let outputs = graph
        .exports()
        .iter()
        .map(|export| {
            let value = renderer.value("export", &export.name, &export.value);
            (export.name.as_str(), value)
        })
        .collect();

    let config = renderer
        .secrets
        .iter()
        .map(|secret| {
            let decl = ConfigDecl {
                value_type: "string",
                secret: true,
            };
            (secret.key.clone(), decl)
        })
        .collect();

    let project = PulumiProject {
        name: project_name,
        runtime: "yaml",
        description: "Provisions a namespaced secret from a bootstrap credential",
        config,
        resources,
        outputs,
    };
    Ok(RenderedProject {
        document: serde_yaml::to_string(&project)?,
        secrets: renderer.secrets,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("failed to serialize Pulumi.yaml: {0}")]
    Serialize(#[from] serde_yaml::Error),
}

/// Config key for the secret held in `field` of resource `owner`
///
/// Characters outside `[A-Za-z0-9_-]` (Secret data keys may contain dots) are
/// replaced with `-` so the key can be interpolated.
pub fn config_key(owner: &str, field: &str) -> String {
    format!("{owner}-{field}")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

#[derive(Default)]
struct Renderer<'g> {
    secrets: Vec<SecretConfig<'g>>,
}

impl<'g> Renderer<'g> {
    fn properties(&mut self, owner: &str, spec: &'g ResourceSpec) -> Mapping {
        let mut props = Mapping::new();
        match spec {
            ResourceSpec::KubernetesProvider { kubeconfig } => {
                props.insert(
                    "kubeconfig".into(),
                    Yaml::String(kubeconfig.display().to_string()),
                );
            }
            ResourceSpec::Namespace { name } => {
                props.insert(
                    "metadata".into(),
                    self.metadata(owner, [("name", Some(name))]),
                );
            }
            ResourceSpec::Secret {
                namespace,
                name,
                data,
                secret_type,
            } => {
                let metadata =
                    self.metadata(owner, [("namespace", Some(namespace)), ("name", name.as_ref())]);
                props.insert("metadata".into(), metadata);
                let data: Mapping = data
                    .iter()
                    .map(|(key, value)| (Yaml::String(key.clone()), self.value(owner, key, value)))
                    .collect();
                props.insert("data".into(), Yaml::Mapping(data));
                props.insert("type".into(), Yaml::String(secret_type.clone()));
            }
        }
        props
    }

    fn metadata<const N: usize>(
        &mut self,
        owner: &str,
        fields: [(&str, Option<&'g Value>); N],
    ) -> Yaml {
        let mapping: Mapping = fields
            .into_iter()
            .filter_map(|(key, value)| {
                value.map(|v| (Yaml::String(key.to_string()), self.value(owner, key, v)))
            })
            .collect();
        Yaml::Mapping(mapping)
    }

    fn value(&mut self, owner: &str, field: &str, value: &'g Value) -> Yaml {
        match value {
            Value::Literal(literal) => Yaml::String(literal.clone()),
            Value::NameOf(target) => Yaml::String(format!("${{{target}.metadata.name}}")),
            Value::Secret(secret) => {
                let key = config_key(owner, field);
                let reference = format!("${{{key}}}");
                self.secrets.push(SecretConfig { key, value: secret });
                Yaml::String(reference)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProvisionerConfig;
    use crate::graph::build;
    use std::path::Path;

    fn stock_graph() -> ResourceGraph {
        let config = ProvisionerConfig::default();
        build(
            &EncodedCredential::new("czNjcjN0".to_string()),
            &config.target,
            Path::new("/home/ops/.kube/config"),
        )
    }

    fn rendered() -> Yaml {
        let graph = stock_graph();
        let project = render_project(&graph, "k8s-secret").unwrap();
        serde_yaml::from_str(&project.document).unwrap()
    }

    #[test]
    fn test_project_header() {
        let doc = rendered();
        assert_eq!(doc["name"].as_str(), Some("k8s-secret"));
        assert_eq!(doc["runtime"].as_str(), Some("yaml"));
    }

    #[test]
    fn test_provider_binding() {
        let doc = rendered();
        let provider = &doc["resources"]["k8s-provider"];
        assert_eq!(provider["type"].as_str(), Some("pulumi:providers:kubernetes"));
        assert_eq!(
            provider["properties"]["kubeconfig"].as_str(),
            Some("/home/ops/.kube/config")
        );
        assert!(provider.get("options").is_none());
    }

    #[test]
    fn test_secret_uses_namespace_reference_and_secret_data() {
        let doc = rendered();
        let namespace = &doc["resources"]["mynamespace"];
        assert_eq!(
            namespace["properties"]["metadata"]["name"].as_str(),
            Some("mynamespace")
        );
        assert_eq!(namespace["options"]["provider"].as_str(), Some("${k8s-provider}"));

        let secret = &doc["resources"]["mysecret"];
        assert_eq!(secret["type"].as_str(), Some("kubernetes:core/v1:Secret"));
        assert_eq!(
            secret["properties"]["metadata"]["namespace"].as_str(),
            Some("${mynamespace.metadata.name}")
        );
        assert!(secret["properties"]["metadata"].get("name").is_none());
        assert_eq!(
            secret["properties"]["data"]["mysecret"].as_str(),
            Some("${mysecret-mysecret}")
        );
        assert_eq!(secret["properties"]["type"].as_str(), Some("Opaque"));
    }

    #[test]
    fn test_credential_is_declared_as_secret_config_not_inlined() {
        let graph = stock_graph();
        let project = render_project(&graph, "k8s-secret").unwrap();

        assert!(!project.document.contains("czNjcjN0"));
        assert_eq!(project.secrets.len(), 1);
        assert_eq!(project.secrets[0].key, "mysecret-mysecret");
        assert_eq!(project.secrets[0].value.as_str(), "czNjcjN0");

        let doc: Yaml = serde_yaml::from_str(&project.document).unwrap();
        let decl = &doc["config"]["mysecret-mysecret"];
        assert_eq!(decl["type"].as_str(), Some("string"));
        assert_eq!(decl["secret"].as_bool(), Some(true));
    }

    #[test]
    fn test_config_key_replaces_unsafe_characters() {
        assert_eq!(config_key("mysecret", "ca.crt"), "mysecret-ca-crt");
        assert_eq!(config_key("my_secret", "token-1"), "my_secret-token-1");
    }

    #[test]
    fn test_outputs() {
        let doc = rendered();
        assert_eq!(
            doc["outputs"]["secretName"].as_str(),
            Some("${mysecret.metadata.name}")
        );
        assert_eq!(
            doc["outputs"]["namespace"].as_str(),
            Some("${mynamespace.metadata.name}")
        );
    }

    #[test]
    fn test_invalid_graph_is_not_rendered() {
        let graph = ResourceGraph::new().export("dangling", Value::name_of("missing"));
        let err = render_project(&graph, "k8s-secret").unwrap_err();
        assert!(matches!(err, RenderError::Graph(GraphError::UnresolvedReference { .. })));
    }
}
