//! # k8s-secret
//!
//! Entry point: configure, look up the bootstrap credential through the cluster
//! API, and drive the stack lifecycle with the `pulumi` CLI.

use anyhow::Result;
use clap::Parser;
use k8s_secret::{
    cli::Cli,
    credential::KubeCredentialStore,
    engine::PulumiCliEngine,
    observability::{self, metrics},
    provision, ProvisionerConfig, RunReport,
};
use std::process::ExitCode;
use std::time::Instant;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let started = Instant::now();

    // Configure rustls crypto provider before any client is built
    // Required for rustls 0.23+ when no default provider is set via features
    rustls::crypto::ring::default_provider()
        .install_default()
        .unwrap_or_else(|_| panic!("Failed to install rustls crypto provider"));

    let cli = Cli::parse();
    let (config, invalid_settings) = ProvisionerConfig::from_env();
    observability::init_tracing(&config)?;
    for setting in &invalid_settings {
        warn!("{}", setting);
    }
    metrics::register_metrics()?;

    info!("Starting k8s-secret");
    info!(
        "Build info: datetime={}, git_hash={}",
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    let mode = cli.mode();
    let mut stdout = std::io::stdout();

    // The pulumi binary is only resolved once the credential has been located
    let engine = PulumiCliEngine::from_config(&config.pulumi);
    let report = match KubeCredentialStore::from_kubeconfig(&config.kubeconfig).await {
        Ok(store) => provision(&config, mode, &store, &engine, &mut stdout).await,
        Err(e) => {
            metrics::increment_runs(mode.as_str());
            RunReport::credential_failure(mode, e, &mut stdout, started)
        }
    };

    if let Some(path) = &config.metrics_textfile {
        if let Err(e) = metrics::write_textfile(path) {
            warn!("Failed to write metrics textfile: {:#}", e);
        }
    }

    info!(
        "Run finished in {:.1}s with exit code {}",
        report.elapsed.as_secs_f64(),
        report.exit_code()
    );
    Ok(ExitCode::from(report.exit_code() as u8))
}
