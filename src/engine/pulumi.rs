//! # Pulumi CLI Engine
//!
//! Drives the `pulumi` executable. The program is rendered as a YAML-runtime
//! `Pulumi.yaml` in `<work_dir>/<project>`, and each stack operation runs as a
//! non-interactive subprocess in that directory.
//!
//! Change counts are read back from `pulumi stack history --json`, outputs from
//! `pulumi stack output --json`. Secret values are pushed with
//! `pulumi config set --secret` after the stack is selected, so the project file
//! only references them. Backend selection and the secrets passphrase come
//! from the inherited environment (`PULUMI_BACKEND_URL`, `PULUMI_CONFIG_PASSPHRASE`).

use super::{
    ChangeKind, EngineError, Operation, OperationSummary, ReconciliationEngine, Stack,
    StackIdentity, UpdateResult,
};
use crate::config::PulumiConfig;
use crate::constants::PULUMI_BINARY_NAME;
use crate::credential::EncodedCredential;
use crate::graph::yaml::{render_project, RenderError};
use crate::graph::{GraphError, ProgramOutputs, ResourceGraph};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

const PROJECT_FILE: &str = "Pulumi.yaml";

/// [`ReconciliationEngine`] backed by the `pulumi` CLI
#[derive(Debug, Clone)]
pub struct PulumiCliEngine {
    /// Explicit binary; looked up on `PATH` when the first stack is selected
    binary: Option<PathBuf>,
    work_dir: PathBuf,
}

impl PulumiCliEngine {
    pub fn from_config(config: &PulumiConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            work_dir: config.work_dir.clone(),
        }
    }

    pub fn new(binary: PathBuf, work_dir: PathBuf) -> Self {
        Self {
            binary: Some(binary),
            work_dir,
        }
    }

    pub fn project_dir(&self, identity: &StackIdentity) -> PathBuf {
        self.work_dir.join(&identity.project_name)
    }

    /// The configured binary, else `pulumi` on `PATH`
    fn resolve_binary(&self) -> Result<PathBuf, EngineError> {
        let binary = match &self.binary {
            Some(path) => path.clone(),
            None => which::which(PULUMI_BINARY_NAME)
                .map_err(|e| EngineError::BinaryNotFound(format!("{PULUMI_BINARY_NAME}: {e}")))?,
        };
        debug!("Using pulumi binary {}", binary.display());
        Ok(binary)
    }
}

#[async_trait]
impl ReconciliationEngine for PulumiCliEngine {
    type Stack = PulumiStack;

    async fn upsert_stack(
        &self,
        identity: &StackIdentity,
        program: ResourceGraph,
    ) -> Result<PulumiStack, EngineError> {
        let project = render_project(&program, &identity.project_name).map_err(|e| match e {
            RenderError::Graph(graph) => EngineError::Graph(graph),
            other => EngineError::Graph(GraphError::Registration {
                resource: identity.project_name.clone(),
                message: other.to_string(),
            }),
        })?;
        let binary = self.resolve_binary()?;

        let project_dir = self.project_dir(identity);
        let io_error = |source| EngineError::Io {
            operation: Operation::Workspace,
            source,
        };
        tokio::fs::create_dir_all(&project_dir)
            .await
            .map_err(io_error)?;
        tokio::fs::write(project_dir.join(PROJECT_FILE), &project.document)
            .await
            .map_err(io_error)?;
        debug!("Wrote {} to {}", PROJECT_FILE, project_dir.display());

        let stack = PulumiStack {
            binary,
            project_dir,
            identity: identity.clone(),
        };
        stack
            .run(
                Operation::Workspace,
                &["stack", "select", "--create", "--non-interactive"],
            )
            .await?;
        for secret in &project.secrets {
            stack.set_secret_config(&secret.key, secret.value).await?;
        }
        info!("Selected stack {}", identity);
        Ok(stack)
    }
}

/// A stack selected in a Pulumi project directory
#[derive(Debug)]
pub struct PulumiStack {
    binary: PathBuf,
    project_dir: PathBuf,
    identity: StackIdentity,
}

impl PulumiStack {
    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .arg("--stack")
            .arg(&self.identity.stack_name)
            .current_dir(&self.project_dir)
            .env("PULUMI_SKIP_UPDATE_CHECK", "true")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Run to completion, capturing output; a non-zero exit is an error
    async fn run(&self, operation: Operation, args: &[&str]) -> Result<Output, EngineError> {
        debug!("Running pulumi {} for {}", args.join(" "), self.identity);
        let output = self
            .command(args)
            .output()
            .await
            .map_err(|source| EngineError::Io { operation, source })?;
        checked(operation, output)
    }

    /// Store `value` as an encrypted stack config value
    ///
    /// The value goes through stdin so it never shows up in the process list.
    async fn set_secret_config(
        &self,
        key: &str,
        value: &EncodedCredential,
    ) -> Result<(), EngineError> {
        let operation = Operation::Workspace;
        let io_error = |source| EngineError::Io { operation, source };
        debug!("Setting secret config {} for {}", key, self.identity);

        let mut cmd = self.command(&["config", "set", "--secret", key]);
        cmd.stdin(Stdio::piped());
        let mut child = cmd.spawn().map_err(io_error)?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(value.as_str().as_bytes())
                .await
                .map_err(io_error)?;
            stdin.shutdown().await.map_err(io_error)?;
        }
        let output = child.wait_with_output().await.map_err(io_error)?;
        checked(operation, output).map(drop)
    }

    async fn summary(
        &self,
        operation: Operation,
        started_at: DateTime<Utc>,
    ) -> Result<OperationSummary, EngineError> {
        let finished_at = Utc::now();
        let output = self
            .run(operation, &["stack", "history", "--json", "--page-size", "1"])
            .await?;
        Ok(OperationSummary {
            changes: parse_history(operation, &output.stdout)?,
            started_at,
            finished_at,
        })
    }
}

fn checked(operation: Operation, output: Output) -> Result<Output, EngineError> {
    if output.status.success() {
        Ok(output)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        warn!("pulumi {} exited with {}: {}", operation, output.status, stderr);
        Err(EngineError::CommandFailed {
            operation,
            status: output.status.to_string(),
            stderr,
        })
    }
}

const LIFECYCLE_FLAGS: [&str; 4] = ["--yes", "--skip-preview", "--non-interactive", "--color=never"];

#[async_trait]
impl Stack for PulumiStack {
    async fn refresh(&self) -> Result<OperationSummary, EngineError> {
        let started_at = Utc::now();
        let mut args = vec!["refresh"];
        args.extend(LIFECYCLE_FLAGS);
        self.run(Operation::Refresh, &args).await?;
        self.summary(Operation::Refresh, started_at).await
    }

    async fn up(&self) -> Result<UpdateResult, EngineError> {
        let started_at = Utc::now();
        let mut args = vec!["up"];
        args.extend(LIFECYCLE_FLAGS);
        self.run(Operation::Up, &args).await?;
        let summary = self.summary(Operation::Up, started_at).await?;
        let outputs = self.outputs().await?;
        Ok(UpdateResult { summary, outputs })
    }

    async fn destroy(
        &self,
        progress: &mut (dyn Write + Send),
    ) -> Result<OperationSummary, EngineError> {
        let started_at = Utc::now();
        let operation = Operation::Destroy;
        let io_error = |source| EngineError::Io { operation, source };

        let mut args = vec!["destroy"];
        args.extend(LIFECYCLE_FLAGS);
        let mut child = self.command(&args).spawn().map_err(io_error)?;

        // Drain stderr concurrently so a chatty child cannot block on a full pipe
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf).await;
                buf
            })
        });

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await.map_err(io_error)? {
                writeln!(progress, "{line}").map_err(io_error)?;
            }
        }
        progress.flush().map_err(io_error)?;

        let status = child.wait().await.map_err(io_error)?;
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        if !status.success() {
            return Err(EngineError::CommandFailed {
                operation,
                status: status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        self.summary(operation, started_at).await
    }

    async fn outputs(&self) -> Result<ProgramOutputs, EngineError> {
        let output = self
            .run(Operation::Outputs, &["stack", "output", "--json"])
            .await?;
        parse_outputs(&output.stdout)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryEntry {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    resource_changes: BTreeMap<String, u64>,
}

/// Change counts of the most recent update in `pulumi stack history --json`
///
/// Entries are newest first. Labels that are not resource changes (`read`,
/// `refresh`, ...) are ignored.
pub(crate) fn parse_history(
    operation: Operation,
    stdout: &[u8],
) -> Result<BTreeMap<ChangeKind, u64>, EngineError> {
    let entries: Vec<HistoryEntry> =
        serde_json::from_slice(stdout).map_err(|e| EngineError::Parse {
            operation,
            message: e.to_string(),
        })?;

    let mut changes = BTreeMap::new();
    if let Some(latest) = entries.first() {
        debug!("Latest {} update: {:?}", latest.kind, latest.resource_changes);
        for (label, count) in &latest.resource_changes {
            if let Some(kind) = ChangeKind::from_label(label) {
                *changes.entry(kind).or_insert(0) += count;
            }
        }
    }
    Ok(changes)
}

/// Stack outputs from `pulumi stack output --json`; non-string values keep their
/// JSON text
pub(crate) fn parse_outputs(stdout: &[u8]) -> Result<ProgramOutputs, EngineError> {
    let raw: BTreeMap<String, serde_json::Value> =
        serde_json::from_slice(stdout).map_err(|e| EngineError::Parse {
            operation: Operation::Outputs,
            message: e.to_string(),
        })?;

    Ok(raw
        .into_iter()
        .map(|(name, value)| {
            let text = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (name, text)
        })
        .collect())
}
