//! Round-driving loops for each PrivCount role, one per process.
//!
//! The Tally Server consumes itself once a round publishes (it tears
//! down its listener and coordinator state), so running several rounds
//! back to back means rebinding a fresh [`TallyServer`] each time. Share
//! Keepers and Data Collectors instead dial out fresh every round but
//! keep their identity and policy state across rounds via `&mut self`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use privcount_dc::{DataCollector, DataCollectorConfig};
use privcount_sk::{ShareKeeper, ShareKeeperConfig};
use privcount_ts::delay_policy::SigmaHistory;
use privcount_ts::outcome_writer::write_outcome;
use privcount_ts::{TallyServer, TallyServerConfig};
use privcount_types::error::{ErrorKind, PrivcountError};
use privcount_types::round::{RoundConfig, RoundId};
use tracing::{info, warn};

/// Delay before retrying a round after a recoverable failure (a refused
/// handshake, a missed quorum, a dropped connection). Fixed rather than
/// backed off: the peer on the other end is either ready or it isn't,
/// and a growing delay only makes every retry slower to notice.
const ROUND_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Runs the Tally Server for `round_config.continue_count` rounds beyond
/// the first, publishing one outcome file per round, until the count is
/// exhausted or a shutdown signal arrives.
pub async fn run_ts(ts_config: TallyServerConfig) -> Result<(), PrivcountError> {
    let ts_config = Arc::new(ts_config);
    let outcome_dir = ts_config.outcome_dir.clone();
    let mut round_config = load_round_config(&ts_config.round_config_path).await?;
    let mut remaining = round_config.continue_count;
    // Carried across rounds so the delay policy can compare this round's
    // proposed sigma against the last one actually published, even
    // though a fresh `TallyServer` is bound every iteration.
    let mut sigma_history = SigmaHistory::default();

    loop {
        let round_id = round_config.round_id;
        info!(round = round_id.0, "starting round");

        tokio::select! {
            result = run_one_round(
                ts_config.clone(),
                round_config.clone(),
                &outcome_dir,
                &mut sigma_history,
            ) => {
                result?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received, not scheduling another round");
                return Ok(());
            }
        }

        match remaining {
            None | Some(0) => return Ok(()),
            Some(n) => {
                remaining = Some(n - 1);
                round_config.round_id = RoundId(round_config.round_id.0 + 1);
            }
        }
    }
}

async fn run_one_round(
    ts_config: Arc<TallyServerConfig>,
    round_config: RoundConfig,
    outcome_dir: &Path,
    sigma_history: &mut SigmaHistory,
) -> Result<(), PrivcountError> {
    let round_id = round_config.round_id;
    let server = TallyServer::bind(ts_config)?;
    let outcome = server.run(round_config, sigma_history).await?;

    tokio::fs::create_dir_all(outcome_dir)
        .await
        .map_err(|e| PrivcountError::new(ErrorKind::Internal, e.to_string()))?;
    let outcome_path = outcome_dir.join(format!("round-{}.json", round_id.0));
    write_outcome(&outcome, &outcome_path)
        .await
        .map_err(|e| PrivcountError::new(ErrorKind::Internal, e.to_string()))?;
    info!(round = round_id.0, path = %outcome_path.display(), "round published");
    Ok(())
}

async fn load_round_config(path: &Path) -> Result<RoundConfig, PrivcountError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| PrivcountError::new(ErrorKind::ConfigInvalid, e.to_string()))?;
    let round_config: RoundConfig = serde_json::from_str(&raw)
        .map_err(|e| PrivcountError::new(ErrorKind::ConfigInvalid, e.to_string()))?;
    round_config
        .counters
        .validate()
        .map_err(|e| PrivcountError::new(ErrorKind::ConfigInvalid, e))?;
    Ok(round_config)
}

/// Runs a Share Keeper, dialing the Tally Server for one round at a
/// time, until a process-fatal error occurs or a shutdown signal
/// arrives. A round-level failure (refused handshake, missed quorum) is
/// logged and retried rather than ending the process.
pub async fn run_sk(sk_config: ShareKeeperConfig) -> Result<(), PrivcountError> {
    let mut keeper = ShareKeeper::bind(sk_config)?;
    loop {
        tokio::select! {
            outcome = keeper.run_round() => match outcome {
                Ok(outcome) => info!(?outcome, "round finished"),
                Err(err) if err.kind.is_process_abort() => return Err(err),
                Err(err) => {
                    warn!(%err, "round aborted, retrying");
                    tokio::time::sleep(ROUND_RETRY_INTERVAL).await;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                return Ok(());
            }
        }
    }
}

/// Runs a Data Collector, reconnecting to its event source and the
/// Tally Server one round at a time, with the same retry-vs-abort split
/// as [`run_sk`].
pub async fn run_dc(dc_config: DataCollectorConfig) -> Result<(), PrivcountError> {
    dc_config
        .validate()
        .map_err(|e| PrivcountError::new(ErrorKind::ConfigInvalid, e))?;
    let mut collector = DataCollector::bind(dc_config)?;
    loop {
        tokio::select! {
            outcome = collector.run_round() => match outcome {
                Ok(outcome) => info!(?outcome, "round finished"),
                Err(err) if err.kind.is_process_abort() => return Err(err),
                Err(err) => {
                    warn!(%err, "round aborted, retrying");
                    tokio::time::sleep(ROUND_RETRY_INTERVAL).await;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                return Ok(());
            }
        }
    }
}
