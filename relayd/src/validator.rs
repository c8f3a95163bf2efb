use error_stack::{bail, Result};
use thiserror::Error;

use crate::attestation::AttestedMessage;
use crate::types::{Domain, EVMAddress};

const ADDRESS_HEX_LEN: usize = 40;
const WORD_HEX_LEN: usize = 64;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("destination domain mismatch: {observed} != {expected}")]
    DestinationDomain { observed: Domain, expected: Domain },
    #[error("recipient missing from attested message")]
    RecipientMissing,
    #[error("recipient mismatch: {observed} != {expected:#x}")]
    Recipient {
        observed: String,
        expected: EVMAddress,
    },
    #[error("hook payload missing from attested message")]
    PayloadMissing,
}

/// Checks that an attested message is meant for this relayer's destination and hook
/// before anything is submitted on its behalf.
pub fn validate(
    msg: &AttestedMessage,
    destination_domain: Domain,
    recipient: EVMAddress,
) -> Result<(), Error> {
    if msg.destination_domain != destination_domain {
        bail!(Error::DestinationDomain {
            observed: msg.destination_domain,
            expected: destination_domain,
        });
    }

    let Some(observed) = msg.recipient.as_deref() else {
        bail!(Error::RecipientMissing);
    };
    if normalize_recipient(observed) != hex::encode(recipient) {
        bail!(Error::Recipient {
            observed: observed.to_string(),
            expected: recipient,
        });
    }

    if msg.payload.is_empty() {
        bail!(Error::PayloadMissing);
    }

    Ok(())
}

/// Lowercases and strips the prefix, reducing a left-padded 32-byte word to its address.
fn normalize_recipient(recipient: &str) -> String {
    let recipient = recipient.trim();
    let digits = recipient
        .strip_prefix("0x")
        .or_else(|| recipient.strip_prefix("0X"))
        .unwrap_or(recipient)
        .to_ascii_lowercase();

    match digits.split_at_checked(WORD_HEX_LEN - ADDRESS_HEX_LEN) {
        Some((padding, address))
            if digits.len() == WORD_HEX_LEN && padding.bytes().all(|b| b == b'0') =>
        {
            address.to_string()
        }
        _ => digits,
    }
}
