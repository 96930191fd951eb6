//! # Provisioner
//!
//! One invocation end to end: look up the bootstrap credential, encode it, build
//! the resource graph around it and drive the stack lifecycle to a terminal state.

use crate::config::ProvisionerConfig;
use crate::credential::{CredentialLocator, CredentialStore, LocatorError};
use crate::encoding;
use crate::engine::{ReconciliationEngine, StackIdentity};
use crate::error::ProvisionError;
use crate::graph::{self, ProgramOutputs};
use crate::lifecycle::{LifecycleController, LifecycleState, Mode};
use crate::observability::metrics;
use std::io::Write;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Outcome of one run
#[derive(Debug)]
pub struct RunReport {
    pub mode: Mode,
    pub state: LifecycleState,
    pub elapsed: Duration,
}

impl RunReport {
    /// 0 for `Updated`/`Destroyed`, 1 for `Failed`
    pub fn exit_code(&self) -> i32 {
        self.state.exit_code()
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code() == 0
    }

    /// Stack outputs, present after a successful update
    pub fn outputs(&self) -> Option<&ProgramOutputs> {
        match &self.state {
            LifecycleState::Updated(result) => Some(&result.outputs),
            _ => None,
        }
    }

    /// Report a run that ended before the lifecycle started because the
    /// credential could not be obtained
    pub fn credential_failure<W>(mode: Mode, err: LocatorError, out: &mut W, started: Instant) -> Self
    where
        W: Write + ?Sized,
    {
        let err = ProvisionError::Credential(err);
        error!("{}", err);
        metrics::increment_phase_failures(err.phase());
        metrics::increment_run_failures();
        if let Err(e) = writeln!(out, "{err}") {
            tracing::warn!("Failed to write progress line: {}", e);
        }
        Self {
            mode,
            state: LifecycleState::Failed(err),
            elapsed: started.elapsed(),
        }
    }
}

/// Run one provisioning pass against `store` and `engine`, writing progress lines
/// to `out`
pub async fn provision<S, E, W>(
    config: &ProvisionerConfig,
    mode: Mode,
    store: &S,
    engine: &E,
    mut out: W,
) -> RunReport
where
    S: CredentialStore + ?Sized,
    E: ReconciliationEngine,
    W: Write + Send,
{
    let started = Instant::now();
    metrics::increment_runs(mode.as_str());
    let identity = StackIdentity::from(&config.workspace);
    info!("Provisioning stack {} in {} mode", identity, mode);

    let source = &config.source;
    let lookup_started = Instant::now();
    let located = CredentialLocator::for_source(store, source)
        .locate(&source.namespace, &source.name_prefix, &source.data_key)
        .await;
    metrics::observe_phase_duration("credential", lookup_started.elapsed().as_secs_f64());

    let credential = match located {
        Ok(credential) => credential,
        Err(e) => return RunReport::credential_failure(mode, e, &mut out, started),
    };

    let encoded = encoding::encode_credential(&credential);
    drop(credential);
    let program = graph::build(&encoded, &config.target, &config.kubeconfig);
    drop(encoded);

    let state = LifecycleController::new(engine, identity, program, mode, &mut out)
        .with_destroy_error_policy(config.destroy_error_policy)
        .run()
        .await;

    if state.exit_code() != 0 {
        metrics::increment_run_failures();
    }
    RunReport {
        mode,
        state,
        elapsed: started.elapsed(),
    }
}
