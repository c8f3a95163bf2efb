use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use error_stack::{Result, ResultExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::info;

use crate::payload::FulfillmentRequest;
use crate::types::{Hash, SourceRef};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("failed to read the ledger file")]
    ReadFailure,
    #[error("invalid ledger file")]
    InvalidLedger,
    #[error("failed serializing the ledger")]
    SerializationFailure,
    #[error("failed writing the ledger file to disk")]
    WriteFailure,
}

/// Proof that a purchase has been fulfilled on the destination.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FulfillmentRecord {
    pub relay_reference: Option<Hash>,
    pub fulfill_reference: Hash,
    pub params: FulfillmentRequest,
    #[serde(with = "humantime_serde")]
    pub fulfilled_at: SystemTime,
}

/// Fulfillment records keyed by the burn that paid for them, kept in memory and
/// optionally mirrored to a JSON file.
pub struct Ledger {
    path: Option<PathBuf>,
    records: Mutex<HashMap<String, FulfillmentRecord>>,
}

impl Ledger {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            records: Mutex::default(),
        }
    }

    pub async fn open(path: PathBuf) -> Result<Self, Error> {
        let records = match fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content)
                .change_context(Error::InvalidLedger)
                .attach_printable_lazy(|| path.display().to_string())?,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(path = %path.display(), "ledger does not exist, starting empty");

                HashMap::new()
            }
            Err(err) => {
                return Err(err)
                    .change_context(Error::ReadFailure)
                    .attach_printable(path.display().to_string())
            }
        };

        Ok(Self {
            path: Some(path),
            records: Mutex::new(records),
        })
    }

    pub async fn get(&self, source: &SourceRef) -> Option<FulfillmentRecord> {
        self.records.lock().await.get(&source.to_string()).cloned()
    }

    /// Keeps the record in memory even when persisting it fails.
    pub async fn record(&self, source: &SourceRef, record: FulfillmentRecord) -> Result<(), Error> {
        let mut records = self.records.lock().await;
        records.insert(source.to_string(), record);

        match &self.path {
            Some(path) => flush(path, &records).await,
            None => Ok(()),
        }
    }
}

async fn flush(path: &Path, records: &HashMap<String, FulfillmentRecord>) -> Result<(), Error> {
    let content =
        serde_json::to_string_pretty(records).change_context(Error::SerializationFailure)?;

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .change_context(Error::WriteFailure)?;
    }

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, content)
        .await
        .change_context(Error::WriteFailure)?;
    fs::rename(&tmp, path)
        .await
        .change_context(Error::WriteFailure)
        .attach_printable_lazy(|| path.display().to_string())
}
