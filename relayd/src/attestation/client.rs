use async_trait::async_trait;
use error_stack::{report, Report, Result, ResultExt};
use mockall::automock;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use super::fees::FeeRow;
use super::{Config, Error, MessageRecord};
use crate::types::{Domain, TxHash};
use crate::url::Url;

const BODY_EXCERPT_LEN: usize = 120;

#[automock]
#[async_trait]
pub trait AttestationClient: Send + Sync {
    /// Returns an empty list while the burn has not been indexed yet.
    async fn messages(&self, domain: Domain, tx_hash: TxHash) -> Result<Vec<MessageRecord>, Error>;

    async fn burn_fees(
        &self,
        source_domain: Domain,
        destination_domain: Domain,
    ) -> Result<Vec<FeeRow>, Error>;
}

/// Picks the message list out of either `{data: {messages}}` or `{messages}`. A body with
/// neither key has no messages yet, but a list that is present has to match the schema.
fn message_records(body: Value) -> Result<Vec<MessageRecord>, Error> {
    let Some(list) = body
        .pointer("/data/messages")
        .or_else(|| body.get("messages"))
    else {
        return Ok(vec![]);
    };

    Vec::<MessageRecord>::deserialize(list)
        .map_err(|err| Report::new(Error::Schema).attach_printable(err.to_string()))
        .attach_printable_lazy(|| excerpt(list.to_string().as_bytes()))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FeesResponse {
    Bare(Vec<FeeRow>),
    Nested { data: Vec<FeeRow> },
}

impl From<FeesResponse> for Vec<FeeRow> {
    fn from(response: FeesResponse) -> Self {
        match response {
            FeesResponse::Bare(rows) | FeesResponse::Nested { data: rows } => rows,
        }
    }
}

pub struct HttpClient {
    base: Url,
    fee_asset: String,
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .change_context(Error::Transport)
            .attach_printable("failed to build http client")?;

        Ok(Self {
            base: config.url.clone(),
            fee_asset: config.fee_asset.clone(),
            client,
        })
    }

    async fn get<T>(&self, endpoint: String) -> Result<Option<T>, Error>
    where
        T: DeserializeOwned,
    {
        let response = self
            .client
            .get(&endpoint)
            .send()
            .await
            .change_context(Error::Transport)
            .attach_printable_lazy(|| endpoint.clone())?;

        match response.status() {
            StatusCode::NOT_FOUND => return Ok(None),
            status if !status.is_success() => {
                return Err(report!(Error::Status(status.as_u16()))).attach_printable(endpoint)
            }
            _ => {}
        }

        let body = response
            .bytes()
            .await
            .change_context(Error::Transport)
            .attach_printable_lazy(|| endpoint.clone())?;

        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|err| Report::new(Error::Schema).attach_printable(err.to_string()))
            .attach_printable_lazy(|| excerpt(&body))
    }
}

#[async_trait]
impl AttestationClient for HttpClient {
    async fn messages(&self, domain: Domain, tx_hash: TxHash) -> Result<Vec<MessageRecord>, Error> {
        let endpoint = self
            .base
            .endpoint(&format!("messages/{domain}?transactionHash={tx_hash}"));

        match self.get::<Value>(endpoint).await? {
            Some(body) => message_records(body),
            None => Ok(vec![]),
        }
    }

    async fn burn_fees(
        &self,
        source_domain: Domain,
        destination_domain: Domain,
    ) -> Result<Vec<FeeRow>, Error> {
        let endpoint = self.base.endpoint(&format!(
            "burn/{}/fees/{source_domain}/{destination_domain}",
            self.fee_asset
        ));

        Ok(self
            .get::<FeesResponse>(endpoint)
            .await?
            .map(Vec::from)
            .unwrap_or_default())
    }
}

fn excerpt(body: &[u8]) -> String {
    String::from_utf8_lossy(body)
        .chars()
        .take(BODY_EXCERPT_LEN)
        .collect()
}
