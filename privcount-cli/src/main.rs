//! Process entrypoint for every PrivCount role: the Tally Server, a
//! Share Keeper, a Data Collector, and a development event injector
//! standing in for a relay's local event source.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use privcount_dc::DataCollectorConfig;
use privcount_sk::ShareKeeperConfig;
use privcount_ts::TallyServerConfig;
use privcount_types::error::PrivcountError;

mod inject;
mod logging;
mod roles;

use inject::InjectConfig;

/// Top-level command line: exactly one role per process.
#[derive(Parser, Debug)]
#[command(name = "privcount", about = "Run a PrivCount round participant")]
struct Cli {
    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand, Debug)]
enum Role {
    /// Runs the Tally Server: coordinates rounds, allocates noise, and
    /// publishes outcomes.
    Ts(TallyServerConfig),
    /// Runs a Share Keeper: holds one blinding share per counter.
    Sk(ShareKeeperConfig),
    /// Runs a Data Collector: observes events and maintains a blinded
    /// share of every counter.
    Dc(DataCollectorConfig),
    /// Runs a development event injector in place of a real relay.
    Inject(InjectConfig),
}

/// A failure that aborted the process, from either a PrivCount role or
/// the development injector, carrying enough information to pick an
/// exit code and log a single line.
enum ProcessError {
    Role(PrivcountError),
    Other(eyre::Report),
}

#[tokio::main]
async fn main() -> eyre::Result<ExitCode> {
    let cli = Cli::parse();
    logging::install(default_filter(&cli.role));

    let result = match cli.role {
        Role::Ts(config) => roles::run_ts(config).await.map_err(ProcessError::Role),
        Role::Sk(config) => roles::run_sk(config).await.map_err(ProcessError::Role),
        Role::Dc(config) => roles::run_dc(config).await.map_err(ProcessError::Role),
        Role::Inject(config) => inject::run(config).await.map_err(ProcessError::Other),
    };

    match result {
        Ok(()) => {
            tracing::info!("exiting");
            Ok(ExitCode::SUCCESS)
        }
        Err(ProcessError::Role(err)) => {
            tracing::error!(kind = ?err.kind, "{}", err.reason);
            Ok(ExitCode::from(err.kind.exit_code() as u8))
        }
        Err(ProcessError::Other(err)) => {
            tracing::error!("{err:?}");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn default_filter(role: &Role) -> &'static str {
    match role {
        Role::Ts(_) => "privcount_ts=info,privcount_core=info,warn",
        Role::Sk(_) => "privcount_sk=info,privcount_core=info,warn",
        Role::Dc(_) => "privcount_dc=info,privcount_core=info,warn",
        Role::Inject(_) => "privcount_cli=info,warn",
    }
}
