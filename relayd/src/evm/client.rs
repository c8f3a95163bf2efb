use std::sync::Arc;

use error_stack::{bail, Report, Result, ResultExt};
use ethers_contract::{ContractCall, ContractError};
use ethers_core::abi::Detokenize;
use ethers_core::types::{TransactionReceipt, U64};
use ethers_middleware::SignerMiddleware;
use ethers_providers::{Http, Provider};
use ethers_signers::LocalWallet;
use tracing::{debug, info};

use super::contracts::{MessageTransmitter, TicketHook};
use super::{Config, Error};
use crate::types::Hash;

pub(super) type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Signs and submits transactions to the destination contracts with the relayer key.
#[derive(Clone)]
pub struct DestinationClient {
    pub(super) transmitter: MessageTransmitter<SignerClient>,
    pub(super) hook: TicketHook<SignerClient>,
    confirmations: usize,
}

impl DestinationClient {
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        let transmitter = config.message_transmitter()?;
        let hook = config.hook()?;
        let wallet: LocalWallet = config
            .relayer_key()?
            .expose()
            .parse()
            .map_err(|_| Report::new(Error::RelayerKey))?;

        let provider = Provider::new(Http::new(config.rpc_url.to_standard_url()));
        let client = SignerMiddleware::new_with_provider_chain(provider, wallet)
            .await
            .change_context(Error::Connection)
            .attach_printable_lazy(|| config.rpc_url.to_string())?;
        let client = Arc::new(client);

        info!(
            relayer = format!("{:#x}", client.address()),
            message_transmitter = format!("{transmitter:#x}"),
            hook = format!("{hook:#x}"),
            "connected to destination"
        );

        Ok(Self {
            transmitter: MessageTransmitter::new(transmitter, client.clone()),
            hook: TicketHook::new(hook, client),
            confirmations: config.confirmations,
        })
    }

    /// Sends the call and waits until it is confirmed, failing if it was dropped or reverted.
    pub(super) async fn send<D>(&self, call: ContractCall<SignerClient, D>) -> Result<Hash, Error>
    where
        D: Detokenize,
    {
        let pending = call.send().await.map_err(|err| {
            Report::new(Error::Submission {
                reason: revert_reason(&err),
            })
        })?;
        let tx_hash = *pending;
        debug!(tx_hash = format!("{tx_hash:#x}"), "transaction submitted");

        let receipt = pending
            .confirmations(self.confirmations)
            .await
            .change_context(Error::Confirmation(tx_hash))?;

        confirmed(tx_hash, receipt)
    }
}

fn confirmed(tx_hash: Hash, receipt: Option<TransactionReceipt>) -> Result<Hash, Error> {
    match receipt {
        None => bail!(Error::Dropped(tx_hash)),
        Some(receipt) if receipt.status == Some(U64::zero()) => {
            bail!(Error::Reverted(tx_hash))
        }
        Some(receipt) => Ok(receipt.transaction_hash),
    }
}

fn revert_reason(err: &ContractError<SignerClient>) -> String {
    err.decode_revert::<String>()
        .unwrap_or_else(|| err.to_string())
}
