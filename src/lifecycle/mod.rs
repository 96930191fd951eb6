//! # Lifecycle Controller
//!
//! Drives one stack through a single run:
//!
//! ```text
//! Init ──upsert + refresh──▶ Refreshed ──destroy──▶ Destroyed
//!   │                           │
//!   │                           └──────up────────▶ Updated
//!   └──────────(any failure)──────────────────────▶ Failed
//! ```
//!
//! [`LifecycleController::step`] performs exactly one transition and writes the
//! progress lines for it. [`LifecycleController::run`] steps until a terminal
//! state is reached.

use crate::config::DestroyErrorPolicy;
use crate::constants::DESTROY_MODE_TOKEN;
use crate::engine::{
    EngineError, Operation, OperationSummary, ReconciliationEngine, Stack, StackIdentity,
    UpdateResult,
};
use crate::error::ProvisionError;
use crate::graph::ResourceGraph;
use crate::observability::metrics;
use std::fmt;
use std::io::Write;
use std::time::Instant;
use tracing::{error, info, warn};

/// What the run does after refreshing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Apply,
    Destroy,
}

impl Mode {
    /// Destroy only when the first argument is exactly `destroy`
    pub fn from_first_arg(arg: Option<&str>) -> Self {
        match arg {
            Some(DESTROY_MODE_TOKEN) => Self::Destroy,
            _ => Self::Apply,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Apply => "apply",
            Self::Destroy => "destroy",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a destroy ended when it did not fail the run
#[derive(Debug)]
pub enum DestroyOutcome {
    Completed(OperationSummary),
    /// Destroy failed and [`DestroyErrorPolicy::Continue`] reported it
    Reported(EngineError),
}

#[derive(Debug)]
pub enum LifecycleState {
    Init,
    Refreshed,
    Updated(UpdateResult),
    Destroyed(DestroyOutcome),
    Failed(ProvisionError),
}

impl LifecycleState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Updated(_) | Self::Destroyed(_) | Self::Failed(_)
        )
    }

    /// Process exit code for a terminal state
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Failed(_) => 1,
            _ => 0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Refreshed => "refreshed",
            Self::Updated(_) => "updated",
            Self::Destroyed(_) => "destroyed",
            Self::Failed(_) => "failed",
        }
    }
}

/// Owns the stack handle for one run and writes progress to `out`
pub struct LifecycleController<'e, E, W>
where
    E: ReconciliationEngine,
{
    engine: &'e E,
    identity: StackIdentity,
    program: Option<ResourceGraph>,
    mode: Mode,
    destroy_error_policy: DestroyErrorPolicy,
    stack: Option<E::Stack>,
    out: W,
}

impl<E, W> fmt::Debug for LifecycleController<'_, E, W>
where
    E: ReconciliationEngine,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleController")
            .field("identity", &self.identity)
            .field("mode", &self.mode)
            .field("destroy_error_policy", &self.destroy_error_policy)
            .field("stack_selected", &self.stack.is_some())
            .finish_non_exhaustive()
    }
}

impl<'e, E, W> LifecycleController<'e, E, W>
where
    E: ReconciliationEngine,
    W: Write + Send,
{
    pub fn new(
        engine: &'e E,
        identity: StackIdentity,
        program: ResourceGraph,
        mode: Mode,
        out: W,
    ) -> Self {
        Self {
            engine,
            identity,
            program: Some(program),
            mode,
            destroy_error_policy: DestroyErrorPolicy::default(),
            stack: None,
            out,
        }
    }

    pub fn with_destroy_error_policy(mut self, policy: DestroyErrorPolicy) -> Self {
        self.destroy_error_policy = policy;
        self
    }

    /// Step from [`LifecycleState::Init`] until a terminal state
    pub async fn run(&mut self) -> LifecycleState {
        let mut state = LifecycleState::Init;
        while !state.is_terminal() {
            state = self.step(state).await;
        }
        info!("Run for stack {} finished in state {}", self.identity, state.name());
        state
    }

    /// Perform the single transition out of `state`; terminal states are returned
    /// unchanged
    pub async fn step(&mut self, state: LifecycleState) -> LifecycleState {
        match state {
            LifecycleState::Init => self.select_and_refresh().await,
            LifecycleState::Refreshed => match self.mode {
                Mode::Destroy => self.destroy().await,
                Mode::Apply => self.update().await,
            },
            terminal => terminal,
        }
    }

    async fn select_and_refresh(&mut self) -> LifecycleState {
        let Some(program) = self.program.take() else {
            return self.fail(ProvisionError::WorkspaceSetup(EngineError::Rejected {
                operation: Operation::Workspace,
                message: "program was already consumed".to_string(),
            }));
        };

        let started = Instant::now();
        let stack = match self.engine.upsert_stack(&self.identity, program).await {
            Ok(stack) => stack,
            Err(e) => return self.fail(ProvisionError::WorkspaceSetup(e)),
        };
        metrics::observe_phase_duration("workspace", started.elapsed().as_secs_f64());

        self.say(format_args!("Starting refresh"));
        let started = Instant::now();
        let refreshed = stack.refresh().await;
        metrics::observe_phase_duration("refresh", started.elapsed().as_secs_f64());
        self.stack = Some(stack);

        match refreshed {
            Ok(summary) => {
                if summary.has_changes() {
                    warn!("Refresh of {} found drift: {}", self.identity, summary);
                } else {
                    info!("Refresh of {}: {}", self.identity, summary);
                }
                metrics::record_resource_changes(&summary);
                self.say(format_args!("Refresh succeeded!"));
                LifecycleState::Refreshed
            }
            Err(e) => self.fail(ProvisionError::Refresh(e)),
        }
    }

    async fn destroy(&mut self) -> LifecycleState {
        let Some(stack) = self.stack.as_ref() else {
            return self.no_stack(ProvisionError::Destroy);
        };

        say(&mut self.out, format_args!("Starting stack destroy"));
        let started = Instant::now();
        let destroyed = stack.destroy(&mut self.out).await;
        metrics::observe_phase_duration("destroy", started.elapsed().as_secs_f64());

        match destroyed {
            Ok(summary) => {
                info!("Destroyed stack {}: {}", self.identity, summary);
                metrics::record_resource_changes(&summary);
                self.say(format_args!("Stack successfully destroyed"));
                LifecycleState::Destroyed(DestroyOutcome::Completed(summary))
            }
            Err(e) => match self.destroy_error_policy {
                DestroyErrorPolicy::Fail => self.fail(ProvisionError::Destroy(e)),
                DestroyErrorPolicy::Continue => {
                    metrics::increment_phase_failures("destroy");
                    warn!("Destroy of {} failed, continuing: {}", self.identity, e);
                    self.say(format_args!("Failed to destroy stack: {e}"));
                    LifecycleState::Destroyed(DestroyOutcome::Reported(e))
                }
            },
        }
    }

    async fn update(&mut self) -> LifecycleState {
        let Some(stack) = self.stack.as_ref() else {
            return self.no_stack(ProvisionError::Apply);
        };

        say(&mut self.out, format_args!("Starting update"));
        let started = Instant::now();
        let updated = stack.up().await;
        metrics::observe_phase_duration("update", started.elapsed().as_secs_f64());

        match updated {
            Ok(result) => {
                info!("Updated stack {}: {}", self.identity, result.summary);
                metrics::record_resource_changes(&result.summary);
                self.say(format_args!("Update succeeded!"));
                for (name, value) in &result.outputs {
                    say(&mut self.out, format_args!("{name}: {value}"));
                }
                LifecycleState::Updated(result)
            }
            Err(e) => self.fail(ProvisionError::Apply(e)),
        }
    }

    fn no_stack(&mut self, phase: fn(EngineError) -> ProvisionError) -> LifecycleState {
        self.fail(phase(EngineError::Rejected {
            operation: Operation::Workspace,
            message: "no stack selected".to_string(),
        }))
    }

    fn fail(&mut self, err: ProvisionError) -> LifecycleState {
        metrics::increment_phase_failures(err.phase());
        error!("Stack {}: {}", self.identity, err);
        self.say(format_args!("{err}"));
        LifecycleState::Failed(err)
    }

    fn say(&mut self, line: fmt::Arguments<'_>) {
        say(&mut self.out, line);
    }
}

/// Write one progress line; a broken output channel is logged, not fatal
fn say<W: Write + ?Sized>(out: &mut W, line: fmt::Arguments<'_>) {
    if let Err(e) = writeln!(out, "{line}").and_then(|()| out.flush()) {
        warn!("Failed to write progress line: {}", e);
    }
}
