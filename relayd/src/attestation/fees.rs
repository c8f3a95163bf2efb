//! Gross-up of a net purchase amount by the burn fee the attestation service charges.

use error_stack::{bail, report, Result};
use ethers_core::types::U256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::u256_decimal;

const BPS_DENOMINATOR: u32 = 10_000;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("fee of {0} bps leaves nothing to deliver")]
    FeeTooHigh(u32),
    #[error("gross amount overflows")]
    Overflow,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeeRow {
    pub finality_threshold: Option<u32>,
    pub minimum_fee: Option<f64>,
}

impl FeeRow {
    /// Fractional basis points round up so the quote never undershoots the fee.
    fn bps(&self) -> u32 {
        match self.minimum_fee {
            Some(fee) if fee.is_finite() && fee > 0.0 => {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let bps = fee.ceil().min(f64::from(u32::MAX)) as u32;
                bps
            }
            _ => 0,
        }
    }
}

/// The highest fee among all finality thresholds, so the quote covers any of them.
pub fn max_fee_bps(rows: &[FeeRow]) -> u32 {
    rows.iter().map(FeeRow::bps).max().unwrap_or(0)
}

/// Smallest gross amount that still delivers `net` after a fee of `fee_bps`:
/// `ceil(net * 10000 / (10000 - fee_bps))`.
pub fn gross_amount(net: U256, fee_bps: u32) -> Result<U256, Error> {
    let Some(kept) = BPS_DENOMINATOR.checked_sub(fee_bps).filter(|kept| *kept > 0) else {
        bail!(Error::FeeTooHigh(fee_bps));
    };

    let denominator = U256::from(kept);
    let numerator = net
        .checked_mul(U256::from(BPS_DENOMINATOR))
        .ok_or_else(|| report!(Error::Overflow))?;

    let (quotient, remainder) = numerator.div_mod(denominator);
    if remainder.is_zero() {
        Ok(quotient)
    } else {
        quotient
            .checked_add(U256::one())
            .ok_or_else(|| report!(Error::Overflow))
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    #[serde(with = "u256_decimal")]
    pub net: U256,
    pub fee_bps: u32,
    #[serde(with = "u256_decimal")]
    pub gross: U256,
}

impl Quote {
    pub fn new(net: U256, fee_bps: u32) -> Result<Self, Error> {
        Ok(Quote {
            net,
            fee_bps,
            gross: gross_amount(net, fee_bps)?,
        })
    }
}
