//! The hook payload that rides along with a burn: who bought what, and a free-form memo.

use error_stack::{bail, Report, Result};
use ethers_core::abi::{self, ParamType, Token};
use ethers_core::types::U256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{u256_decimal, EVMAddress};

pub const MAX_MEMO_LEN: usize = 256;

const PREFIX_LEN: usize = 32;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("payload {prefix} is not an abi encoded (address, uint256, uint256, string)")]
    Malformed { prefix: String },
    #[error("payload {prefix} is not canonically encoded")]
    NonCanonical { prefix: String },
    #[error("quantity must be greater than zero")]
    ZeroQuantity,
    #[error("memo of {len} bytes exceeds the maximum of {max}")]
    MemoTooLong { len: usize, max: usize },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FulfillmentRequest {
    pub buyer: EVMAddress,
    #[serde(with = "u256_decimal")]
    pub item_id: U256,
    #[serde(with = "u256_decimal")]
    pub quantity: U256,
    pub memo: String,
}

fn param_types() -> [ParamType; 4] {
    [
        ParamType::Address,
        ParamType::Uint(256),
        ParamType::Uint(256),
        ParamType::String,
    ]
}

pub fn decode(payload: &[u8]) -> Result<FulfillmentRequest, Error> {
    let tokens = abi::decode(&param_types(), payload).map_err(|err| {
        Report::new(Error::Malformed {
            prefix: prefix(payload),
        })
        .attach_printable(err.to_string())
    })?;

    if abi::encode(&tokens) != payload {
        bail!(Error::NonCanonical {
            prefix: prefix(payload),
        });
    }

    let request = match tokens.as_slice() {
        [Token::Address(buyer), Token::Uint(item_id), Token::Uint(quantity), Token::String(memo)] => {
            FulfillmentRequest {
                buyer: *buyer,
                item_id: *item_id,
                quantity: *quantity,
                memo: memo.clone(),
            }
        }
        _ => bail!(Error::Malformed {
            prefix: prefix(payload),
        }),
    };

    if request.quantity.is_zero() {
        bail!(Error::ZeroQuantity);
    }
    if request.memo.len() > MAX_MEMO_LEN {
        bail!(Error::MemoTooLong {
            len: request.memo.len(),
            max: MAX_MEMO_LEN,
        });
    }

    Ok(request)
}

pub fn encode(request: &FulfillmentRequest) -> Vec<u8> {
    abi::encode(&[
        Token::Address(request.buyer),
        Token::Uint(request.item_id),
        Token::Uint(request.quantity),
        Token::String(request.memo.clone()),
    ])
}

fn prefix(payload: &[u8]) -> String {
    format!("0x{}", hex::encode(&payload[..payload.len().min(PREFIX_LEN)]))
}

#[cfg(test)]
mod tests {
    use ethers_core::types::H160;

    use super::*;

    fn request(memo: &str) -> FulfillmentRequest {
        FulfillmentRequest {
            buyer: H160::repeat_byte(0xb0),
            item_id: U256::from(7),
            quantity: U256::from(2),
            memo: memo.to_string(),
        }
    }

    #[test]
    fn decode_should_recover_encoded_request() {
        let request = request("seat 12A");

        assert_eq!(decode(&encode(&request)).unwrap(), request);
    }

    #[test]
    fn decode_should_accept_memo_at_maximum_length() {
        let request = request(&"m".repeat(MAX_MEMO_LEN));

        assert_eq!(decode(&encode(&request)).unwrap(), request);
    }

    #[test]
    fn decode_should_reject_long_memo() {
        let payload = encode(&request(&"m".repeat(MAX_MEMO_LEN + 1)));

        assert_eq!(
            decode(&payload).unwrap_err().current_context(),
            &Error::MemoTooLong {
                len: MAX_MEMO_LEN + 1,
                max: MAX_MEMO_LEN
            }
        );
    }

    #[test]
    fn decode_should_reject_zero_quantity() {
        let mut request = request("");
        request.quantity = U256::zero();

        assert_eq!(
            decode(&encode(&request)).unwrap_err().current_context(),
            &Error::ZeroQuantity
        );
    }

    #[test]
    fn decode_should_reject_truncated_payload() {
        let payload = encode(&request("memo"));
        let truncated = &payload[..payload.len() - 32];

        assert_eq!(
            decode(truncated).unwrap_err().current_context(),
            &Error::Malformed {
                prefix: format!("0x{}", hex::encode(&payload[..32]))
            }
        );
        assert!(matches!(
            decode(&[0xde, 0xad]).unwrap_err().current_context(),
            Error::Malformed { prefix } if prefix == "0xdead"
        ));
    }

    #[test]
    fn decode_should_reject_trailing_bytes() {
        let mut payload = encode(&request("memo"));
        payload.extend([0u8; 32]);

        assert!(matches!(
            decode(&payload).unwrap_err().current_context(),
            Error::NonCanonical { .. }
        ));
    }

    #[test]
    fn decode_should_reject_dirty_address_padding() {
        let mut payload = encode(&request("memo"));
        payload[0] = 0xff;

        assert!(decode(&payload).is_err());
    }

    #[test]
    fn request_should_serialize_numbers_as_decimal_strings() {
        let json = serde_json::to_value(request("hi")).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "buyer": format!("{:#x}", H160::repeat_byte(0xb0)),
                "itemId": "7",
                "quantity": "2",
                "memo": "hi"
            })
        );
    }
}
