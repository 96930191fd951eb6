//! # Provisioner Configuration
//!
//! Run-level settings loaded from environment variables.

use super::policy::{DestroyErrorPolicy, MatchOrder, NotFoundPolicy};
use crate::constants::*;
use std::cell::RefCell;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Identity of the reconciliation workspace (Pulumi project + stack)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceConfig {
    pub project_name: String,
    pub stack_name: String,
}

/// Where the bootstrap credential is read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    /// Namespace holding the bootstrap secret
    pub namespace: String,
    /// Case-sensitive secret name prefix
    pub name_prefix: String,
    /// Data key extracted from the matched secret
    pub data_key: String,
    pub not_found_policy: NotFoundPolicy,
    pub match_order: MatchOrder,
}

/// What the declared resource graph creates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetConfig {
    /// Logical name of the Kubernetes provider binding
    pub provider_resource: String,
    /// Literal name of the namespace to create
    pub namespace_name: String,
    /// Logical name of the secret resource (the engine assigns the object name)
    pub secret_resource: String,
    /// Key under which the credential is stored in the new secret
    pub data_key: String,
}

/// How the Pulumi CLI engine is invoked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PulumiConfig {
    /// Explicit path to the `pulumi` binary; looked up on `PATH` when unset
    pub binary: Option<PathBuf>,
    /// Root directory for per-project workspaces
    pub work_dir: PathBuf,
}

/// Provisioner configuration
///
/// All settings have defaults matching a stock installation and can be overridden
/// via `K8S_SECRET_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionerConfig {
    pub workspace: WorkspaceConfig,
    pub source: SourceConfig,
    pub target: TargetConfig,
    /// Kubeconfig used both for the credential lookup and the provider binding
    pub kubeconfig: PathBuf,
    pub destroy_error_policy: DestroyErrorPolicy,
    pub pulumi: PulumiConfig,
    /// Log level (ERROR, WARN, INFO, DEBUG, TRACE); `RUST_LOG` takes precedence
    pub log_level: String,
    /// Log format (json, text)
    pub log_format: String,
    /// Write Prometheus metrics here at the end of the run
    pub metrics_textfile: Option<PathBuf>,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            workspace: WorkspaceConfig {
                project_name: DEFAULT_PROJECT_NAME.to_string(),
                stack_name: DEFAULT_STACK_NAME.to_string(),
            },
            source: SourceConfig {
                namespace: DEFAULT_SOURCE_NAMESPACE.to_string(),
                name_prefix: DEFAULT_SOURCE_NAME_PREFIX.to_string(),
                data_key: DEFAULT_SOURCE_DATA_KEY.to_string(),
                not_found_policy: NotFoundPolicy::default(),
                match_order: MatchOrder::default(),
            },
            target: TargetConfig {
                provider_resource: DEFAULT_PROVIDER_RESOURCE.to_string(),
                namespace_name: DEFAULT_TARGET_NAMESPACE.to_string(),
                secret_resource: DEFAULT_TARGET_SECRET_RESOURCE.to_string(),
                data_key: DEFAULT_TARGET_DATA_KEY.to_string(),
            },
            kubeconfig: default_kubeconfig(),
            destroy_error_policy: DestroyErrorPolicy::default(),
            pulumi: PulumiConfig {
                binary: None,
                work_dir: home_dir().join(DEFAULT_WORK_DIR),
            },
            log_level: "INFO".to_string(),
            log_format: "text".to_string(),
            metrics_textfile: None,
        }
    }
}

/// A variable that was set but could not be parsed; the default was used instead
///
/// Configuration is loaded before logging is initialized, so these are returned to
/// the caller to be logged once a subscriber exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidSetting {
    pub variable: String,
    pub value: String,
    pub reason: String,
    pub fallback: String,
}

impl fmt::Display for InvalidSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Ignoring {}='{}': {} (using '{}')",
            self.variable, self.value, self.reason, self.fallback
        )
    }
}

impl ProvisionerConfig {
    /// Load configuration from the process environment with defaults
    pub fn from_env() -> (Self, Vec<InvalidSetting>) {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    ///
    /// Keys are the unprefixed names (e.g. `STACK_NAME`); the lookup receives the
    /// full `K8S_SECRET_`-prefixed variable name. Unparseable values fall back to
    /// their defaults and are reported alongside the config.
    pub fn from_lookup<F>(lookup: F) -> (Self, Vec<InvalidSetting>)
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvSource {
            lookup,
            invalid: RefCell::new(Vec::new()),
        };
        let defaults = Self::default();
        let config = Self {
            workspace: WorkspaceConfig {
                project_name: env.string("PROJECT_NAME", defaults.workspace.project_name),
                stack_name: env.string("STACK_NAME", defaults.workspace.stack_name),
            },
            source: SourceConfig {
                namespace: env.string("SOURCE_NAMESPACE", defaults.source.namespace),
                name_prefix: env.string("SOURCE_NAME_PREFIX", defaults.source.name_prefix),
                data_key: env.string("SOURCE_DATA_KEY", defaults.source.data_key),
                not_found_policy: env.parsed("NOT_FOUND_POLICY", defaults.source.not_found_policy),
                match_order: env.parsed("MATCH_ORDER", defaults.source.match_order),
            },
            target: TargetConfig {
                provider_resource: env
                    .string("PROVIDER_RESOURCE", defaults.target.provider_resource),
                namespace_name: env.string("TARGET_NAMESPACE", defaults.target.namespace_name),
                secret_resource: env.string("TARGET_SECRET", defaults.target.secret_resource),
                data_key: env.string("TARGET_DATA_KEY", defaults.target.data_key),
            },
            kubeconfig: env
                .get("KUBECONFIG")
                .map(|path| expand_home(&path))
                .unwrap_or(defaults.kubeconfig),
            destroy_error_policy: env
                .parsed("DESTROY_ERROR_POLICY", defaults.destroy_error_policy),
            pulumi: PulumiConfig {
                binary: env.get("PULUMI_BINARY").map(|path| expand_home(&path)),
                work_dir: env
                    .get("WORK_DIR")
                    .map(|path| expand_home(&path))
                    .unwrap_or(defaults.pulumi.work_dir),
            },
            log_level: env.string("LOG_LEVEL", defaults.log_level),
            log_format: env.string("LOG_FORMAT", defaults.log_format),
            metrics_textfile: env.get("METRICS_TEXTFILE").map(PathBuf::from),
        };
        (config, env.invalid.into_inner())
    }
}

struct EnvSource<F> {
    lookup: F,
    invalid: RefCell<Vec<InvalidSetting>>,
}

impl<F> EnvSource<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Read a variable; blank values count as unset
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(&format!("{ENV_PREFIX}{key}")).filter(|v| !v.trim().is_empty())
    }

    fn string(&self, key: &str, default: String) -> String {
        self.get(key).unwrap_or(default)
    }

    /// Parse a variable, falling back to the default (and recording it) when invalid
    fn parsed<T>(&self, key: &str, default: T) -> T
    where
        T: FromStr + fmt::Display,
        T::Err: fmt::Display,
    {
        match self.get(key) {
            None => default,
            Some(raw) => raw.parse().unwrap_or_else(|e: T::Err| {
                self.invalid.borrow_mut().push(InvalidSetting {
                    variable: format!("{ENV_PREFIX}{key}"),
                    reason: e.to_string(),
                    fallback: default.to_string(),
                    value: raw,
                });
                default
            }),
        }
    }
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Default kubeconfig location: `~/.kube/config`
pub fn default_kubeconfig() -> PathBuf {
    home_dir().join(".kube").join("config")
}

/// Expand a leading `~/` to the home directory
fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => home_dir().join(rest),
        None => PathBuf::from(path),
    }
}
