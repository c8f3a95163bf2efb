use async_trait::async_trait;
use error_stack::Result;
use ethers_core::types::Bytes;
use mockall::automock;
use tracing::warn;

use super::{DestinationClient, Error};
use crate::types::Hash;

/// Outcome of handing an attested message to the destination message transmitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Relayed(Hash),
    /// The message was already relayed, by this relayer or anyone else.
    AlreadyConsumed,
}

impl Submission {
    pub fn reference(&self) -> Option<Hash> {
        match self {
            Submission::Relayed(tx_hash) => Some(*tx_hash),
            Submission::AlreadyConsumed => None,
        }
    }
}

#[automock]
#[async_trait]
pub trait MessageReceiver: Send + Sync {
    async fn receive_message(&self, message: Bytes, attestation: Bytes)
        -> Result<Submission, Error>;
}

/// Each attested message carries a nonce the transmitter consumes exactly once, and
/// replays are rejected with an error mentioning it.
pub fn is_nonce_consumed(reason: &str) -> bool {
    let reason = reason.to_lowercase();

    reason.contains("nonce has already been used")
        || (reason.contains("nonce") && reason.contains("used"))
}

#[async_trait]
impl MessageReceiver for DestinationClient {
    async fn receive_message(
        &self,
        message: Bytes,
        attestation: Bytes,
    ) -> Result<Submission, Error> {
        let call = self.transmitter.receive_message(message, attestation);

        classify(self.send(call).await)
    }
}

/// Rejections for an already consumed nonce count as a successful relay by someone else.
fn classify(result: Result<Hash, Error>) -> Result<Submission, Error> {
    match result {
        Ok(tx_hash) => Ok(Submission::Relayed(tx_hash)),
        Err(err) => match err.current_context() {
            Error::Submission { reason } if is_nonce_consumed(reason) => {
                warn!(reason, "message already relayed");
                Ok(Submission::AlreadyConsumed)
            }
            _ => Err(err),
        },
    }
}

#[cfg(test)]
mod tests {
    use error_stack::report;

    use super::*;

    fn rejected(reason: &str) -> Result<Hash, Error> {
        Err(report!(Error::Submission {
            reason: reason.to_string(),
        }))
    }

    #[test]
    fn classify_should_report_new_relays() {
        assert_eq!(
            classify(Ok(Hash::repeat_byte(0xaa))).unwrap(),
            Submission::Relayed(Hash::repeat_byte(0xaa))
        );
    }

    #[test]
    fn classify_should_tolerate_consumed_nonce() {
        assert_eq!(
            classify(rejected("execution reverted: Nonce already used")).unwrap(),
            Submission::AlreadyConsumed
        );
    }

    #[test]
    fn classify_should_fail_on_other_rejections() {
        let report = classify(rejected("execution reverted: Invalid attestation")).unwrap_err();

        assert_eq!(
            report.current_context(),
            &Error::Submission {
                reason: "execution reverted: Invalid attestation".to_string()
            }
        );
    }

    #[test]
    fn classify_should_fail_on_reverted_relays() {
        for err in [
            Error::Reverted(Hash::repeat_byte(1)),
            Error::Dropped(Hash::repeat_byte(1)),
            Error::Confirmation(Hash::repeat_byte(1)),
        ] {
            let expected = format!("{err}");
            let report = classify(Err(report!(err))).unwrap_err();

            assert_eq!(report.current_context().to_string(), expected);
        }
    }

    #[test]
    fn is_nonce_consumed_should_match_replay_errors() {
        assert!(is_nonce_consumed("Nonce has already been used"));
        assert!(is_nonce_consumed("execution reverted: Nonce already used"));
        assert!(is_nonce_consumed("USED NONCE"));
    }

    #[test]
    fn is_nonce_consumed_should_ignore_other_errors() {
        assert!(!is_nonce_consumed("execution reverted: Invalid attestation"));
        assert!(!is_nonce_consumed("nonce too low"));
        assert!(!is_nonce_consumed("insufficient funds for gas"));
        assert!(!is_nonce_consumed(""));
    }

    #[test]
    fn submission_reference_should_only_exist_for_new_relays() {
        assert_eq!(
            Submission::Relayed(Hash::repeat_byte(1)).reference(),
            Some(Hash::repeat_byte(1))
        );
        assert_eq!(Submission::AlreadyConsumed.reference(), None);
    }
}
