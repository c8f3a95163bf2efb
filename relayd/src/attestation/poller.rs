use std::time::Duration;

use error_stack::{bail, report, Result};
use tokio::select;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use valuable::Valuable;

use super::{AttestationClient, AttestedMessage, Config, Error, MessageRecord};
use crate::report::LoggableError;
use crate::types::{Domain, TxHash};

/// Polls the attestation service until a burn is attested, the deadline passes or the
/// caller cancels.
pub struct Poller<C> {
    client: C,
    poll_interval: Duration,
    timeout: Duration,
}

impl<C: AttestationClient> Poller<C> {
    pub fn new(client: C, config: &Config) -> Self {
        Self {
            client,
            poll_interval: config.poll_interval,
            timeout: config.timeout,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub async fn await_attestation(
        &self,
        domain: Domain,
        tx_hash: TxHash,
        token: &CancellationToken,
    ) -> Result<AttestedMessage, Error> {
        select! {
            _ = token.cancelled() => bail!(Error::Cancelled),
            result = time::timeout(self.timeout, self.poll(domain, tx_hash)) => {
                result.unwrap_or_else(|_| Err(report!(Error::Timeout(self.timeout))))
            }
        }
    }

    async fn poll(&self, domain: Domain, tx_hash: TxHash) -> Result<AttestedMessage, Error> {
        let mut interval = time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            match self.client.messages(domain, tx_hash).await {
                Ok(records) => match records.into_iter().find(MessageRecord::is_complete) {
                    Some(record) => return AttestedMessage::normalize(record, domain),
                    None => debug!(domain, %tx_hash, "attestation not ready yet"),
                },
                Err(err) if err.current_context().is_transient() => {
                    warn!(
                        err = LoggableError::from(&err).as_value(),
                        "failed to query attestation, retrying"
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }
}
