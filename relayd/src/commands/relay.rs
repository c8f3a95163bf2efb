use error_stack::{Result, ResultExt};
use valuable::Valuable;

use crate::commands::evm_pipeline;
use crate::config::Config;
use crate::{monitoring, Error};

#[derive(clap::Args, Debug, Valuable)]
pub struct Args {
    /// Domain of the chain the burn happened on
    #[arg(long)]
    pub source_domain: i64,
    /// Hash of the burn transaction
    #[arg(long)]
    pub tx_hash: String,
}

pub async fn run(config: Config, args: Args) -> Result<Option<String>, Error> {
    let pipeline = evm_pipeline(&config, monitoring::Client::Disabled).await?;
    let source = pipeline
        .source_ref(args.source_domain, &args.tx_hash)
        .change_context(Error::InvalidInput)?;

    let outcome = pipeline
        .run(source, &crate::shutdown_token())
        .await
        .change_context(Error::Pipeline)?;

    Ok(Some(
        serde_json::to_string(&outcome).change_context(Error::Pipeline)?,
    ))
}
