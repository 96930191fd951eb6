//! # CLI
//!
//! Command-line interface of `k8s-secret`.
//!
//! ## Usage
//!
//! ```bash
//! # Refresh, then create or update the namespace and secret
//! k8s-secret
//!
//! # Refresh, then destroy everything the stack created
//! k8s-secret destroy
//! ```
//!
//! Only the first argument is inspected, and only the exact word `destroy` selects
//! destroy mode. Everything else is configured through `K8S_SECRET_*` environment
//! variables.

use crate::lifecycle::Mode;
use clap::Parser;

/// Provision a namespaced secret from the cluster's bootstrap token
#[derive(Debug, Parser)]
#[command(name = "k8s-secret", version)]
#[command(
    about = "Provision a namespaced secret from the cluster's bootstrap token",
    long_about = None,
    after_help = "\
Modes:
  (none)     refresh, then create or update the stack
  destroy    refresh, then destroy the stack

Configuration is read from K8S_SECRET_* environment variables, e.g.
  K8S_SECRET_STACK_NAME=staging k8s-secret
  K8S_SECRET_DESTROY_ERROR_POLICY=fail k8s-secret destroy
"
)]
pub struct Cli {
    /// `destroy` to tear the stack down; anything else applies it
    #[arg(value_name = "MODE", trailing_var_arg = true)]
    args: Vec<String>,
}

impl Cli {
    pub fn mode(&self) -> Mode {
        Mode::from_first_arg(self.args.first().map(String::as_str))
    }
}
