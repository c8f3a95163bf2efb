//! Access to the attestation service: the raw response schema, its normalization into
//! [AttestedMessage], the polling loop and the burn fee quotes.

use std::time::Duration;

use error_stack::{report, Report, Result, ResultExt};
use ethers_core::types::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Domain;
use crate::url::Url;

mod burn_message;
mod client;
pub mod fees;
mod poller;

pub use burn_message::BurnMessage;
pub use client::{AttestationClient, HttpClient};
#[cfg(test)]
pub use client::MockAttestationClient;
pub use poller::Poller;

const STATUS_COMPLETE: &str = "complete";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("failed to reach the attestation service")]
    Transport,
    #[error("attestation service responded with status {0}")]
    Status(u16),
    #[error("attestation service response does not match the expected schema")]
    Schema,
    #[error("attestation not ready within {0:?}")]
    Timeout(Duration),
    #[error("attestation polling was cancelled")]
    Cancelled,
}

impl Error {
    /// Transient errors are retried on the next poll tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transport | Error::Status(_))
    }
}

#[derive(Deserialize, Serialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct Config {
    #[serde(deserialize_with = "Url::deserialize_non_sensitive")]
    pub url: Url,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub fee_asset: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: Url::new_non_sensitive("https://iris-api-sandbox.circle.com/v2")
                .expect("default attestation url should be valid"),
            poll_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(600),
            request_timeout: Duration::from_secs(10),
            fee_asset: "USDC".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttestationStatus {
    Pending,
    Complete,
}

/// A domain as reported by the service, which uses both numbers and numeric strings.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum DomainValue {
    Number(Domain),
    Text(String),
}

impl DomainValue {
    fn parse(&self) -> Option<Domain> {
        match self {
            DomainValue::Number(domain) => Some(*domain),
            DomainValue::Text(text) => text.trim().parse().ok(),
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DecodedMessageBody {
    pub mint_recipient: Option<String>,
    pub hook_data: Option<String>,
    pub amount: Option<String>,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DecodedMessage {
    pub source_domain: Option<DomainValue>,
    pub destination_domain: Option<DomainValue>,
    pub nonce: Option<String>,
    pub decoded_message_body: Option<DecodedMessageBody>,
}

/// One message record exactly as the service returns it.
#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub attestation: Option<String>,
    pub message: Option<String>,
    pub status: Option<String>,
    pub event_nonce: Option<String>,
    pub decoded_message: Option<DecodedMessage>,
    pub decoded_message_body: Option<DecodedMessageBody>,
}

impl MessageRecord {
    pub fn status(&self) -> AttestationStatus {
        match self.status.as_deref() {
            Some(STATUS_COMPLETE) => AttestationStatus::Complete,
            _ => AttestationStatus::Pending,
        }
    }

    /// A record is usable once it is complete and carries both the message and its attestation.
    pub fn is_complete(&self) -> bool {
        self.status() == AttestationStatus::Complete
            && has_hex_content(self.message.as_deref())
            && has_hex_content(self.attestation.as_deref())
    }

    fn body(&self) -> Option<&DecodedMessageBody> {
        self.decoded_message_body.as_ref().or_else(|| {
            self.decoded_message
                .as_ref()
                .and_then(|decoded| decoded.decoded_message_body.as_ref())
        })
    }
}

fn has_hex_content(field: Option<&str>) -> bool {
    field.is_some_and(|value| !value.trim_start_matches("0x").is_empty())
}

/// A completed attestation, independent of the shape the service reported it in.
#[derive(Debug, Clone, PartialEq)]
pub struct AttestedMessage {
    pub message: Bytes,
    pub attestation: Bytes,
    pub status: AttestationStatus,
    pub source_domain: Domain,
    pub destination_domain: Domain,
    pub nonce: Option<String>,
    pub recipient: Option<String>,
    pub payload: Bytes,
}

impl AttestedMessage {
    /// Maps a complete record onto the fixed message structure.
    ///
    /// The raw message bytes are what the attestation signs, so routing fields and the
    /// payload are read from them whenever they form a burn message. The service's decoded
    /// JSON fields are only consulted for messages in any other format.
    pub fn normalize(record: MessageRecord, queried_domain: Domain) -> Result<Self, Error> {
        if !record.is_complete() {
            return Err(report!(Error::Schema))
                .attach_printable("attestation record is not complete");
        }

        let message = decode_hex("message", record.message.as_deref())?;
        let attestation = decode_hex("attestation", record.attestation.as_deref())?;

        if let Some(burn) = BurnMessage::parse(&message) {
            return Ok(AttestedMessage {
                status: AttestationStatus::Complete,
                source_domain: burn.source_domain,
                destination_domain: burn.destination_domain,
                nonce: Some(format!("{:#x}", burn.nonce)),
                recipient: Some(burn.mint_recipient_hex()),
                payload: burn.hook_data.into(),
                message: message.into(),
                attestation: attestation.into(),
            });
        }

        let decoded = record.decoded_message.clone().unwrap_or_default();
        let body = record.body().cloned().unwrap_or_default();

        let destination_domain = decoded
            .destination_domain
            .as_ref()
            .and_then(DomainValue::parse)
            .ok_or_else(|| report!(Error::Schema))
            .attach_printable("destination domain missing from attestation record")?;
        let source_domain = match decoded.source_domain {
            Some(domain) => domain
                .parse()
                .ok_or_else(|| report!(Error::Schema))
                .attach_printable_lazy(|| format!("invalid source domain {domain:?}"))?,
            None => queried_domain,
        };
        let payload = match body.hook_data.as_deref() {
            Some(hook_data) => decode_hex("hookData", Some(hook_data))?,
            None => Vec::new(),
        };

        Ok(AttestedMessage {
            message: message.into(),
            attestation: attestation.into(),
            status: AttestationStatus::Complete,
            source_domain,
            destination_domain,
            nonce: decoded.nonce.or(record.event_nonce),
            recipient: body.mint_recipient,
            payload: payload.into(),
        })
    }
}

fn decode_hex(field: &'static str, value: Option<&str>) -> Result<Vec<u8>, Error> {
    let value = value
        .ok_or_else(|| report!(Error::Schema))
        .attach_printable_lazy(|| format!("{field} missing from attestation record"))?;

    hex::decode(value.trim_start_matches("0x"))
        .map_err(|err| Report::new(Error::Schema).attach_printable(err.to_string()))
        .attach_printable_lazy(|| format!("{field} is not valid hex"))
}


#[cfg(test)]
mod tests {
    use ethers_core::types::H160;

    use super::test_utils::{attestation_hex, complete_record, pending_record};
    use super::*;

    fn json_record(value: serde_json::Value) -> MessageRecord {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn normalize_should_read_routing_from_burn_message() {
        let recipient = H160::repeat_byte(0x22);
        let record = complete_record(0, 6, recipient, b"payload");

        let msg = AttestedMessage::normalize(record, 0).unwrap();

        assert_eq!(msg.status, AttestationStatus::Complete);
        assert_eq!(msg.source_domain, 0);
        assert_eq!(msg.destination_domain, 6);
        assert_eq!(
            msg.recipient,
            Some(format!("0x{}{}", "00".repeat(12), "22".repeat(20)))
        );
        assert_eq!(msg.payload.to_vec(), b"payload".to_vec());
        assert_eq!(msg.attestation.len(), 65);
        assert_eq!(msg.nonce, Some(format!("0x{}", "0e".repeat(32))));
    }

    #[test]
    fn normalize_should_fall_back_to_top_level_decoded_body() {
        let record = json_record(serde_json::json!({
            "message": "0xdeadbeef",
            "attestation": attestation_hex(),
            "status": "complete",
            "eventNonce": "42",
            "decodedMessage": { "sourceDomain": "1", "destinationDomain": "6" },
            "decodedMessageBody": { "mintRecipient": "0xABCD", "hookData": "0x0102" }
        }));

        let msg = AttestedMessage::normalize(record, 1).unwrap();

        assert_eq!(msg.message.to_vec(), vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(msg.source_domain, 1);
        assert_eq!(msg.destination_domain, 6);
        assert_eq!(msg.nonce.as_deref(), Some("42"));
        assert_eq!(msg.recipient.as_deref(), Some("0xABCD"));
        assert_eq!(msg.payload.to_vec(), vec![1, 2]);
    }

    #[test]
    fn normalize_should_fall_back_to_nested_decoded_body() {
        let record = json_record(serde_json::json!({
            "message": "0xdeadbeef",
            "attestation": attestation_hex(),
            "status": "complete",
            "decodedMessage": {
                "destinationDomain": 5,
                "nonce": "7",
                "decodedMessageBody": { "mintRecipient": "0xabcd" }
            }
        }));

        let msg = AttestedMessage::normalize(record, 0).unwrap();

        assert_eq!(msg.source_domain, 0);
        assert_eq!(msg.destination_domain, 5);
        assert_eq!(msg.nonce.as_deref(), Some("7"));
        assert_eq!(msg.recipient.as_deref(), Some("0xabcd"));
        assert!(msg.payload.is_empty());
    }

    #[test]
    fn normalize_should_fail_without_destination_domain() {
        let record = json_record(serde_json::json!({
            "message": "0xdeadbeef",
            "attestation": attestation_hex(),
            "status": "complete"
        }));

        let report = AttestedMessage::normalize(record, 0).unwrap_err();

        assert_eq!(report.current_context(), &Error::Schema);
    }

    #[test]
    fn normalize_should_fail_on_invalid_hex() {
        let mut record = complete_record(0, 6, H160::zero(), &[]);
        record.attestation = Some("0xnothex".to_string());

        let report = AttestedMessage::normalize(record, 0).unwrap_err();

        assert_eq!(report.current_context(), &Error::Schema);
    }

    #[test]
    fn pending_records_should_not_be_complete() {
        assert_eq!(pending_record().status(), AttestationStatus::Pending);
        assert!(!pending_record().is_complete());

        let mut record = complete_record(0, 6, H160::zero(), &[]);
        record.attestation = Some("0x".to_string());
        assert!(!record.is_complete());

        assert!(AttestedMessage::normalize(pending_record(), 0).is_err());
    }
}
