use async_trait::async_trait;
use error_stack::{Result, ResultExt};
use ethers_core::types::U256;
use mockall::automock;

use super::{DestinationClient, Error};
use crate::payload::FulfillmentRequest;
use crate::types::Hash;

#[automock]
#[async_trait]
pub trait Fulfiller: Send + Sync {
    /// Calls `processAfterMint` on the hook and returns the confirmed transaction hash.
    async fn fulfill(&self, request: FulfillmentRequest) -> Result<Hash, Error>;

    /// Unit price of an item in 6-decimal token units.
    async fn item_price(&self, item_id: U256) -> Result<U256, Error>;
}

#[async_trait]
impl Fulfiller for DestinationClient {
    async fn fulfill(&self, request: FulfillmentRequest) -> Result<Hash, Error> {
        let call = self.hook.process_after_mint(
            request.buyer,
            request.item_id,
            request.quantity,
            request.memo,
        );

        self.send(call).await
    }

    async fn item_price(&self, item_id: U256) -> Result<U256, Error> {
        self.hook
            .price_6(item_id)
            .call()
            .await
            .change_context(Error::Call)
            .attach_printable_lazy(|| format!("item {item_id}"))
    }
}
