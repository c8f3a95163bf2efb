pub mod attestation;
#[cfg(feature = "commands")]
pub mod commands;
#[cfg(not(feature = "commands"))]
mod commands;
#[cfg(feature = "config")]
pub mod config;
#[cfg(not(feature = "config"))]
mod config;
pub mod evm;
pub mod ledger;
pub mod monitoring;
pub mod payload;
pub mod pipeline;
pub mod report;
pub mod server;
pub mod types;
pub mod url;
mod validator;

use std::sync::Arc;

use error_stack::{Result, ResultExt};
use thiserror::Error;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;

pub async fn run(config: Config) -> Result<(), Error> {
    let (metrics_endpoint, metrics) = monitoring::create_endpoint();
    let pipeline = commands::evm_pipeline(&config, metrics).await?;

    let token = shutdown_token();
    server::Server::new(Arc::new(pipeline), metrics_endpoint, token.clone())
        .run(&config.server, token)
        .await
        .change_context(Error::Server)
}

/// Returns a token that is cancelled once SIGINT or SIGTERM is received.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let exit_token = token.clone();

    tokio::spawn(async move {
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to capture SIGINT");
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to capture SIGTERM");

        tokio::select! {
            _ = sigint.recv() => {},
            _ = sigterm.recv() => {},
        }

        info!("signal received, waiting for program to exit gracefully");

        exit_token.cancel();
    });

    token
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to load config")]
    LoadConfig,
    #[error("invalid configuration")]
    Configuration,
    #[error("connection failed")]
    Connection,
    #[error("failed to open the fulfillment ledger")]
    Ledger,
    #[error("invalid input")]
    InvalidInput,
    #[error("pipeline failed")]
    Pipeline,
    #[error("server failed")]
    Server,
}
