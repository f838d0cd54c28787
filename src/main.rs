use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use volume_s3_controller::cli::Cli;
use volume_s3_controller::config::{validate, Config};
use volume_s3_controller::controller::Controller;
use volume_s3_controller::runtime::DockerRuntime;
use volume_s3_controller::server::start_server;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "volume_s3_controller=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let cfg = Config::from_env();
    let report = validate(&cfg);

    if cli.validate_config {
        println!("{}", serde_json::to_string_pretty(&report)?);
        std::process::exit(i32::from(!report.ok));
    }

    for warning in &report.warnings {
        warn!("config: {warning}");
    }
    if !report.ok {
        for err in &report.errors {
            error!("config: {err}");
        }
        anyhow::bail!("configuration invalid, refusing to start");
    }

    info!(
        "starting volume-s3-controller {} ({} {})",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_GIT_HASH"),
        env!("BUILD_DATETIME"),
    );

    let runtime = DockerRuntime::connect().context("connect to container runtime")?;
    let (nudge_tx, nudge_rx) = mpsc::channel(1);
    let controller = Arc::new(Controller::new(cfg.clone(), Arc::new(runtime), nudge_tx));
    let cancel = CancellationToken::new();

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            cancel.cancel();
        }
    });

    let server = tokio::spawn(start_server(
        cfg.http_port(),
        controller.clone(),
        cancel.clone(),
    ));
    let events = tokio::spawn(controller.clone().run_event_task(cancel.clone()));

    controller.run(nudge_rx, cancel).await;

    let _ = events.await;
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!("HTTP server error: {err:#}"),
        Err(err) => error!("HTTP server task failed: {err}"),
    }

    info!("controller stopped");
    Ok(())
}

async fn shutdown_signal() {
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
    {
        Ok(signal) => signal,
        Err(err) => {
            warn!("could not install SIGTERM handler: {err}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}
