use error_stack::{Result, ResultExt};
use valuable::Valuable;

use crate::commands::evm_pipeline;
use crate::config::Config;
use crate::pipeline::parse_u256;
use crate::{monitoring, Error};

#[derive(clap::Args, Debug, Valuable)]
pub struct Args {
    /// Domain of the chain the buyer burns on
    #[arg(long)]
    pub source_domain: i64,
    #[arg(long)]
    pub item_id: String,
    #[arg(long)]
    pub quantity: String,
}

pub async fn run(config: Config, args: Args) -> Result<Option<String>, Error> {
    let pipeline = evm_pipeline(&config, monitoring::Client::Disabled).await?;

    let source_domain = pipeline
        .source_domain(args.source_domain)
        .change_context(Error::InvalidInput)?;
    let item_id = parse_u256("item id", &args.item_id).change_context(Error::InvalidInput)?;
    let quantity = parse_u256("quantity", &args.quantity).change_context(Error::InvalidInput)?;

    let quote = pipeline
        .quote(source_domain, item_id, quantity)
        .await
        .change_context(Error::Pipeline)?;

    Ok(Some(
        serde_json::to_string(&quote).change_context(Error::Pipeline)?,
    ))
}
