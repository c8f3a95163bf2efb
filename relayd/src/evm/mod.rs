//! The destination network: configuration, contract bindings and the transactions the
//! relayer submits there.

use std::fmt::{Debug, Formatter};

use error_stack::{report, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Domain, EVMAddress, Hash};
use crate::url::Url;

mod client;
mod contracts;
pub mod fulfill;
pub mod relay;

pub use client::DestinationClient;
pub use fulfill::Fulfiller;
#[cfg(test)]
pub use fulfill::MockFulfiller;
#[cfg(test)]
pub use relay::MockMessageReceiver;
pub use relay::{MessageReceiver, Submission};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("destination setting {0} is not configured")]
    MissingSetting(&'static str),
    #[error("relayer key is not a valid private key")]
    RelayerKey,
    #[error("failed to connect to the destination rpc")]
    Connection,
    #[error("transaction submission failed: {reason}")]
    Submission { reason: String },
    #[error("failed to wait for confirmation of transaction {0:#x}")]
    Confirmation(Hash),
    #[error("transaction {0:#x} was dropped")]
    Dropped(Hash),
    #[error("transaction {0:#x} reverted")]
    Reverted(Hash),
    #[error("contract call failed")]
    Call,
}

/// A private key read from configuration. Never formatted.
#[derive(Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl Debug for Secret {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

#[derive(Deserialize, Serialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct Config {
    #[serde(deserialize_with = "Url::deserialize_sensitive")]
    pub rpc_url: Url,
    pub domain: Domain,
    pub message_transmitter: Option<EVMAddress>,
    pub hook: Option<EVMAddress>,
    pub relayer_key: Option<Secret>,
    pub confirmations: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc_url: Url::new_sensitive("https://sepolia.base.org")
                .expect("default rpc url should be valid"),
            domain: 6,
            message_transmitter: None,
            hook: None,
            relayer_key: None,
            confirmations: 1,
        }
    }
}

impl Config {
    pub fn message_transmitter(&self) -> Result<EVMAddress, Error> {
        self.message_transmitter
            .ok_or_else(|| report!(Error::MissingSetting("message_transmitter")))
    }

    pub fn hook(&self) -> Result<EVMAddress, Error> {
        self.hook.ok_or_else(|| report!(Error::MissingSetting("hook")))
    }

    pub fn relayer_key(&self) -> Result<&Secret, Error> {
        self.relayer_key
            .as_ref()
            .ok_or_else(|| report!(Error::MissingSetting("relayer_key")))
    }
}
