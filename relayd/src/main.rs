use std::path::PathBuf;
use std::process::ExitCode;

use ::config::{Config as ConfigBuilder, Environment, File};
use clap::{Parser, ValueEnum};
use error_stack::{Report, Result, ResultExt};
use relayd::commands::{daemon, quote, relay, SubCommand};
use relayd::config::{expand_home_dir, Config};
use relayd::report::LoggableError;
use relayd::Error;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use valuable::Valuable;

const ENV_PREFIX: &str = "RELAYD";

#[derive(Debug, Parser, Valuable)]
#[command(version, about = "Relays attested burns to the destination and fulfills the purchases they pay for")]
struct Args {
    /// Config files to merge, later files override earlier ones. Missing files are skipped
    #[arg(short, long, default_values_os_t = vec![PathBuf::from("~/.relayd/config.toml"), PathBuf::from("config.toml")])]
    pub config: Vec<PathBuf>,

    /// Log format
    #[arg(short, long, value_enum, default_value_t = Output::Text)]
    pub output: Output,

    #[clap(subcommand)]
    pub cmd: Option<SubCommand>,
}

#[derive(Debug, Clone, ValueEnum, Valuable)]
enum Output {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.output);

    let config = load_config(&args.config).unwrap_or_else(|report| {
        warn!(
            err = LoggableError::from(&report).as_value(),
            "falling back to the default config"
        );
        Config::default()
    });

    let result = match args.cmd {
        Some(SubCommand::Daemon) | None => {
            info!(args = args.as_value(), "starting daemon");
            daemon::run(config).await
        }
        Some(SubCommand::Relay(args)) => relay::run(config, args).await,
        Some(SubCommand::Quote(args)) => quote::run(config, args).await,
    };

    match result {
        Ok(Some(output)) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Ok(None) => ExitCode::SUCCESS,
        Err(report) => {
            error!(err = LoggableError::from(&report).as_value(), "{report:#}");

            if matches!(args.output, Output::Text) {
                eprintln!("{report:?}");
            }

            ExitCode::FAILURE
        }
    }
}

fn init_logging(output: &Output) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    match output {
        Output::Json => subscriber.json().flatten_event(true).init(),
        Output::Text => subscriber.compact().init(),
    }
}

/// Merges the existing config files in order, then `RELAYD_`-prefixed environment variables
/// with `__` separating nested keys, e.g. `RELAYD_DESTINATION__RELAYER_KEY`.
fn load_config(paths: &[PathBuf]) -> Result<Config, Error> {
    let files: Vec<_> = paths
        .iter()
        .map(|path| expand_home_dir(path))
        .filter(|path| path.is_file())
        .inspect(|path| info!(path = %path.display(), "loading config file"))
        .map(File::from)
        .collect();

    if files.is_empty() {
        info!("no config files found");
    }

    ConfigBuilder::builder()
        .add_source(files)
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        )
        .build()
        .and_then(|config| config.try_deserialize::<Config>())
        .map_err(Report::from)
        .change_context(Error::LoadConfig)
}
