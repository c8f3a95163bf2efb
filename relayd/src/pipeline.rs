//! Drives one purchase from the burn on the source domain to its fulfillment on the
//! destination: await the attestation, validate it, relay it, decode the hook payload and
//! fulfill.

use std::fmt::{Display, Formatter};
use std::time::{Duration, SystemTime};

use error_stack::{report, Report, Result, ResultExt};
use ethers_core::types::U256;
use serde::Serialize;
use thiserror::Error;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};
use valuable::Valuable;

use crate::attestation::fees::{self, Quote};
use crate::attestation::{self, AttestationClient, HttpClient, Poller};
use crate::evm::{DestinationClient, Fulfiller, MessageReceiver, Submission};
use crate::ledger::{FulfillmentRecord, Ledger};
use crate::monitoring::{self, Msg};
use crate::payload::{self, FulfillmentRequest};
use crate::report::LoggableError;
use crate::types::{Domain, EVMAddress, Hash, SourceRef, TxHash};
use crate::validator;

pub type EvmPipeline = Pipeline<HttpClient, DestinationClient, DestinationClient>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Startup,
    Input,
    AwaitingAttestation,
    Validating,
    Relaying,
    SettlingDelay,
    DecodingPayload,
    Fulfilling,
    Done,
    Quoting,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Startup => "startup",
            Stage::Input => "input",
            Stage::AwaitingAttestation => "awaiting-attestation",
            Stage::Validating => "validating",
            Stage::Relaying => "relaying",
            Stage::SettlingDelay => "settling-delay",
            Stage::DecodingPayload => "decoding-payload",
            Stage::Fulfilling => "fulfilling",
            Stage::Done => "done",
            Stage::Quoting => "quoting",
        }
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("invalid input")]
    Input,
    #[error("invalid configuration")]
    Configuration,
    #[error("attestation was not available in time")]
    AttestationTimeout,
    #[error("attestation service failed")]
    AttestationService,
    #[error("attested message failed validation")]
    Validation,
    #[error("relay submission failed")]
    RelaySubmission,
    #[error("hook payload could not be decoded")]
    Decode,
    #[error("fulfillment failed")]
    Fulfillment,
    #[error("failed to read the item price")]
    Price,
    #[error("run was cancelled")]
    Cancelled,
}

impl Error {
    pub fn stage(&self) -> Stage {
        match self {
            Error::Configuration => Stage::Startup,
            Error::Input => Stage::Input,
            Error::AttestationTimeout | Error::AttestationService | Error::Cancelled => {
                Stage::AwaitingAttestation
            }
            Error::Validation => Stage::Validating,
            Error::RelaySubmission => Stage::Relaying,
            Error::Decode => Stage::DecodingPayload,
            Error::Fulfillment => Stage::Fulfilling,
            Error::Price => Stage::Quoting,
        }
    }

    /// Failures caused by the caller's request or the message it points at, rather than
    /// by this service or its upstreams.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::Input | Error::Validation | Error::Decode)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub source_domains: Vec<Domain>,
    pub destination_domain: Domain,
    pub recipient: EVMAddress,
    pub settling_delay: Duration,
}

impl Config {
    pub fn new(config: &crate::config::Config) -> Result<Self, Error> {
        let recipient = config
            .destination
            .hook()
            .change_context(Error::Configuration)?;

        Ok(Self {
            source_domains: config.source_domains.clone(),
            destination_domain: config.destination.domain,
            recipient,
            settling_delay: config.settling_delay,
        })
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RelayOutcome {
    pub relayed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay_reference: Option<Hash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fulfill_reference: Option<Hash>,
    pub fulfillment_params: FulfillmentRequest,
    pub already_fulfilled: bool,
}

pub struct Pipeline<A, R, F> {
    config: Config,
    poller: Poller<A>,
    receiver: R,
    fulfiller: F,
    ledger: Ledger,
    metrics: monitoring::Client,
}

impl<A, R, F> Pipeline<A, R, F>
where
    A: AttestationClient,
    R: MessageReceiver,
    F: Fulfiller,
{
    pub fn new(
        config: Config,
        poller: Poller<A>,
        receiver: R,
        fulfiller: F,
        ledger: Ledger,
        metrics: monitoring::Client,
    ) -> Self {
        Self {
            config,
            poller,
            receiver,
            fulfiller,
            ledger,
            metrics,
        }
    }

    /// Checks the raw request fields before any network call is made.
    pub fn source_ref(&self, domain: i64, tx_hash: &str) -> Result<SourceRef, Error> {
        Ok(SourceRef {
            domain: self.source_domain(domain)?,
            tx_hash: tx_hash.parse::<TxHash>().change_context(Error::Input)?,
        })
    }

    pub fn source_domain(&self, domain: i64) -> Result<Domain, Error> {
        Domain::try_from(domain)
            .ok()
            .filter(|domain| self.config.source_domains.contains(domain))
            .ok_or_else(|| report!(Error::Input))
            .attach_printable_lazy(|| format!("unknown source domain {domain}"))
    }

    pub async fn run(
        &self,
        source: SourceRef,
        token: &CancellationToken,
    ) -> Result<RelayOutcome, Error> {
        let span = info_span!(
            "pipeline",
            source_domain = source.domain,
            tx_hash = %source.tx_hash
        );

        async {
            let result = self.execute(source, token).await;

            match &result {
                Ok(outcome) => info!(
                    relayed = outcome.relayed,
                    already_fulfilled = outcome.already_fulfilled,
                    stage = Stage::Done.as_str(),
                    "pipeline finished"
                ),
                Err(err) => {
                    let stage = err.current_context().stage();
                    self.metrics.record_metric(Msg::PipelineFailure {
                        stage: stage.to_string(),
                    });
                    error!(
                        err = LoggableError::from(err).as_value(),
                        stage = stage.as_str(),
                        "pipeline failed"
                    );
                }
            }

            result
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        source: SourceRef,
        token: &CancellationToken,
    ) -> Result<RelayOutcome, Error> {
        enter(Stage::AwaitingAttestation);
        let msg = self
            .poller
            .await_attestation(source.domain, source.tx_hash, token)
            .await
            .map_err(attestation_error)?;

        enter(Stage::Validating);
        validator::validate(&msg, self.config.destination_domain, self.config.recipient)
            .change_context(Error::Validation)?;

        enter(Stage::Relaying);
        let submission = self
            .receiver
            .receive_message(msg.message.clone(), msg.attestation.clone())
            .await
            .change_context(Error::RelaySubmission)?;
        let relayed = matches!(submission, Submission::Relayed(_));
        self.metrics.record_metric(Msg::RelaySubmission { relayed });

        if relayed {
            enter(Stage::SettlingDelay);
            time::sleep(self.config.settling_delay).await;
        }

        enter(Stage::DecodingPayload);
        let request = payload::decode(&msg.payload).change_context(Error::Decode)?;

        if let Some(record) = self.ledger.get(&source).await {
            info!(
                fulfill_reference = format!("{:#x}", record.fulfill_reference),
                "purchase already fulfilled, skipping"
            );

            return Ok(RelayOutcome {
                relayed,
                relay_reference: submission.reference(),
                fulfill_reference: Some(record.fulfill_reference),
                fulfillment_params: request,
                already_fulfilled: true,
            });
        }

        enter(Stage::Fulfilling);
        let fulfill_reference = self
            .fulfiller
            .fulfill(request.clone())
            .await
            .change_context(Error::Fulfillment)?;
        self.metrics.record_metric(Msg::Fulfillment);

        let record = FulfillmentRecord {
            relay_reference: submission.reference(),
            fulfill_reference,
            params: request.clone(),
            fulfilled_at: SystemTime::now(),
        };
        if let Err(err) = self.ledger.record(&source, record).await {
            error!(
                err = LoggableError::from(&err).as_value(),
                "failed to persist fulfillment record"
            );
        }

        Ok(RelayOutcome {
            relayed,
            relay_reference: submission.reference(),
            fulfill_reference: Some(fulfill_reference),
            fulfillment_params: request,
            already_fulfilled: false,
        })
    }

    /// Gross amount a buyer has to burn so that `quantity` items are paid for after fees.
    pub async fn quote(
        &self,
        source_domain: Domain,
        item_id: U256,
        quantity: U256,
    ) -> Result<Quote, Error> {
        if quantity.is_zero() {
            return Err(report!(Error::Input)).attach_printable("quantity must be greater than zero");
        }

        let price = self
            .fulfiller
            .item_price(item_id)
            .await
            .change_context(Error::Price)?;
        let net = price
            .checked_mul(quantity)
            .ok_or_else(|| report!(Error::Input))
            .attach_printable("price times quantity overflows")?;

        let rows = self
            .poller
            .client()
            .burn_fees(source_domain, self.config.destination_domain)
            .await
            .change_context(Error::AttestationService)?;

        Quote::new(net, fees::max_fee_bps(&rows)).map_err(|err| {
            let context = match err.current_context() {
                fees::Error::FeeTooHigh(_) => Error::AttestationService,
                fees::Error::Overflow => Error::Input,
            };
            err.change_context(context)
        })
    }
}

fn enter(stage: Stage) {
    info!(stage = stage.as_str(), "entering stage");
}

fn attestation_error(err: Report<attestation::Error>) -> Report<Error> {
    let context = match err.current_context() {
        attestation::Error::Timeout(_) => Error::AttestationTimeout,
        attestation::Error::Cancelled => Error::Cancelled,
        attestation::Error::Transport
        | attestation::Error::Status(_)
        | attestation::Error::Schema => Error::AttestationService,
    };

    err.change_context(context)
}

/// Parses a decimal amount or identifier from a request.
pub fn parse_u256(name: &str, value: &str) -> Result<U256, Error> {
    let digits = value.trim();

    (!digits.is_empty())
        .then(|| U256::from_dec_str(digits).ok())
        .flatten()
        .ok_or_else(|| report!(Error::Input))
        .attach_printable_lazy(|| format!("{name} must be a decimal integer, got {value:?}"))
}

#[cfg(test)]
pub mod test_utils {
    use std::time::Duration;

    use ethers_core::types::{H160, U256};

    use super::{Config, Pipeline};
    use crate::attestation::{self, MockAttestationClient, Poller};
    use crate::evm::{MockFulfiller, MockMessageReceiver};
    use crate::ledger::Ledger;
    use crate::monitoring;
    use crate::payload::{self, FulfillmentRequest};
    use crate::types::EVMAddress;

    pub const TX_HASH: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    pub type MockPipeline = Pipeline<MockAttestationClient, MockMessageReceiver, MockFulfiller>;

    pub fn hook() -> EVMAddress {
        H160::repeat_byte(0x77)
    }

    pub fn request() -> FulfillmentRequest {
        FulfillmentRequest {
            buyer: H160::repeat_byte(0x11),
            item_id: U256::one(),
            quantity: U256::one(),
            memo: "gatee".to_string(),
        }
    }

    pub fn payload() -> Vec<u8> {
        payload::encode(&request())
    }

    pub fn config() -> Config {
        Config {
            source_domains: vec![0, 1],
            destination_domain: 6,
            recipient: hook(),
            settling_delay: Duration::from_millis(2500),
        }
    }

    pub fn pipeline(
        client: MockAttestationClient,
        receiver: MockMessageReceiver,
        fulfiller: MockFulfiller,
    ) -> MockPipeline {
        let attestation = attestation::Config {
            poll_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(30),
            ..attestation::Config::default()
        };

        Pipeline::new(
            config(),
            Poller::new(client, &attestation),
            receiver,
            fulfiller,
            Ledger::in_memory(),
            monitoring::Client::Disabled,
        )
    }
}
