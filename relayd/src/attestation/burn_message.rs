//! Layout of a version 2 burn message as signed by the attestation service.
//!
//! Header (148 bytes): version u32, source domain u32, destination domain u32, nonce bytes32,
//! sender bytes32, recipient bytes32, destination caller bytes32, min finality threshold u32,
//! executed finality threshold u32. The body follows: version u32, burn token bytes32,
//! mint recipient bytes32, amount u256, message sender bytes32, max fee u256, fee executed
//! u256, expiration block u256, then the hook data up to the end of the message.

use std::ops::Range;

use crate::types::{Domain, Hash};

const MESSAGE_VERSION: u32 = 1;
const BODY_VERSION: u32 = 1;

const VERSION: Range<usize> = 0..4;
const SOURCE_DOMAIN: Range<usize> = 4..8;
const DESTINATION_DOMAIN: Range<usize> = 8..12;
const NONCE: Range<usize> = 12..44;
const HEADER_LEN: usize = 148;

const BODY_VERSION_FIELD: Range<usize> = 0..4;
const MINT_RECIPIENT: Range<usize> = 36..68;
const BODY_PREFIX_LEN: usize = 228;

#[derive(Debug, PartialEq, Eq)]
pub struct BurnMessage {
    pub source_domain: Domain,
    pub destination_domain: Domain,
    pub nonce: Hash,
    pub mint_recipient: [u8; 32],
    pub hook_data: Vec<u8>,
}

impl BurnMessage {
    /// Returns `None` when the bytes are not a version 2 burn message.
    pub fn parse(message: &[u8]) -> Option<Self> {
        let body = message.get(HEADER_LEN..)?;
        if body.len() < BODY_PREFIX_LEN
            || read_u32(message, VERSION)? != MESSAGE_VERSION
            || read_u32(body, BODY_VERSION_FIELD)? != BODY_VERSION
        {
            return None;
        }

        Some(BurnMessage {
            source_domain: read_u32(message, SOURCE_DOMAIN)?,
            destination_domain: read_u32(message, DESTINATION_DOMAIN)?,
            nonce: Hash::from_slice(message.get(NONCE)?),
            mint_recipient: body.get(MINT_RECIPIENT)?.try_into().ok()?,
            hook_data: body.get(BODY_PREFIX_LEN..)?.to_vec(),
        })
    }

    pub fn mint_recipient_hex(&self) -> String {
        format!("0x{}", hex::encode(self.mint_recipient))
    }
}

fn read_u32(bytes: &[u8], range: Range<usize>) -> Option<u32> {
    bytes
        .get(range)
        .and_then(|field| field.try_into().ok())
        .map(u32::from_be_bytes)
}

#[cfg(test)]
pub(crate) fn encode(
    source_domain: Domain,
    destination_domain: Domain,
    nonce: Hash,
    mint_recipient: [u8; 32],
    hook_data: &[u8],
) -> Vec<u8> {
    let mut message = Vec::new();
    message.extend(MESSAGE_VERSION.to_be_bytes());
    message.extend(source_domain.to_be_bytes());
    message.extend(destination_domain.to_be_bytes());
    message.extend(nonce.as_bytes());
    message.extend([0u8; 32 * 3]);
    message.extend(1000u32.to_be_bytes());
    message.extend(1000u32.to_be_bytes());
    assert_eq!(message.len(), HEADER_LEN);

    message.extend(BODY_VERSION.to_be_bytes());
    message.extend([0x1cu8; 32]);
    message.extend(mint_recipient);
    message.extend([0u8; 32 * 5]);
    assert_eq!(message.len(), HEADER_LEN + BODY_PREFIX_LEN);

    message.extend(hook_data);
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipient() -> [u8; 32] {
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(&[0x22; 20]);
        word
    }

    #[test]
    fn parse_should_extract_routing_fields_and_hook_data() {
        let nonce = Hash::repeat_byte(0x0e);
        let message = encode(0, 6, nonce, recipient(), b"hook data");

        let parsed = BurnMessage::parse(&message).unwrap();

        assert_eq!(
            parsed,
            BurnMessage {
                source_domain: 0,
                destination_domain: 6,
                nonce,
                mint_recipient: recipient(),
                hook_data: b"hook data".to_vec(),
            }
        );
        assert_eq!(
            parsed.mint_recipient_hex(),
            format!("0x{}{}", "00".repeat(12), "22".repeat(20))
        );
    }

    #[test]
    fn parse_should_allow_empty_hook_data() {
        let message = encode(1, 6, Hash::zero(), recipient(), &[]);

        assert!(BurnMessage::parse(&message).unwrap().hook_data.is_empty());
    }

    #[test]
    fn parse_should_reject_truncated_messages() {
        let message = encode(0, 6, Hash::zero(), recipient(), &[]);

        assert!(BurnMessage::parse(&message[..message.len() - 1]).is_none());
        assert!(BurnMessage::parse(&message[..HEADER_LEN]).is_none());
        assert!(BurnMessage::parse(&[]).is_none());
    }

    #[test]
    fn parse_should_reject_other_versions() {
        let mut message = encode(0, 6, Hash::zero(), recipient(), &[]);
        message[3] = 0;
        assert!(BurnMessage::parse(&message).is_none());

        let mut message = encode(0, 6, Hash::zero(), recipient(), &[]);
        message[HEADER_LEN + 3] = 2;
        assert!(BurnMessage::parse(&message).is_none());
    }
}
