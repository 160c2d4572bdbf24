use std::sync::Arc;

use log::info;
use tokio::{
    signal::unix::{signal, SignalKind},
    sync::watch::channel,
};

pub mod config;
mod endpoints;
mod metrics;
mod sampler;
mod session;

use config::ProfdConfig;
use endpoints::Server;
use metrics::Exporter;
use sampler::CpuSampler;
use session::SessionController;

pub fn init_log() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init()?;
    Ok(())
}

pub async fn run(config: ProfdConfig) -> anyhow::Result<()> {
    let (tx, rx) = channel(true);

    let session = Arc::new(SessionController::new(CpuSampler::new()));
    let server = Server::new(session, Exporter::new(), &config, rx);
    let endpoints = server.start();

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }

    tx.send(false)?;
    info!("Exiting...");
    endpoints.await?;

    Ok(())
}
