use clap::Subcommand;
use error_stack::{Result, ResultExt};
use valuable::Valuable;

use crate::attestation::{HttpClient, Poller};
use crate::config::{expand_home_dir, Config};
use crate::evm::{self, DestinationClient};
use crate::ledger::Ledger;
use crate::monitoring;
use crate::pipeline::{self, EvmPipeline, Pipeline};
use crate::Error;

pub mod daemon;
pub mod quote;
pub mod relay;

#[derive(Debug, Subcommand, Valuable)]
pub enum SubCommand {
    /// Run the relay server (default)
    Daemon,
    /// Relay and fulfill a single burn, then exit
    Relay(relay::Args),
    /// Quote the gross amount a buyer has to burn for an order
    Quote(quote::Args),
}

/// Connects every collaborator the pipeline needs. Fails before any request is served when
/// the destination is not fully configured.
pub async fn evm_pipeline(
    config: &Config,
    metrics: monitoring::Client,
) -> Result<EvmPipeline, Error> {
    let pipeline_config = pipeline::Config::new(config).change_context(Error::Configuration)?;

    let attestation_client =
        HttpClient::new(&config.attestation).change_context(Error::Configuration)?;
    let destination = DestinationClient::connect(&config.destination)
        .await
        .map_err(|err| {
            let context = match err.current_context() {
                evm::Error::Connection => Error::Connection,
                _ => Error::Configuration,
            };
            err.change_context(context)
        })?;
    let ledger = match &config.ledger_path {
        Some(path) => Ledger::open(expand_home_dir(path))
            .await
            .change_context(Error::Ledger)?,
        None => Ledger::in_memory(),
    };

    Ok(Pipeline::new(
        pipeline_config,
        Poller::new(attestation_client, &config.attestation),
        destination.clone(),
        destination,
        ledger,
        metrics,
    ))
}
