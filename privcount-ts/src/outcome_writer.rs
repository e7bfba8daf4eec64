//! Writes the outcome file atomically: serialize to a temp file in the
//! same directory, `fsync`, then rename over the final path, so a crash
//! mid-write never leaves a half-written outcome file where a reader
//! might see it.

use std::path::{Path, PathBuf};

use privcount_types::outcome::Outcome;
use uuid::Uuid;

/// Errors writing an outcome file.
#[derive(Debug, thiserror::Error)]
pub enum OutcomeWriteError {
    /// The outcome could not be serialized to JSON.
    #[error("failed to serialize outcome: {0}")]
    Serialize(#[from] serde_json::Error),
    /// An I/O error occurred writing or renaming the file.
    #[error("I/O error writing outcome file: {0}")]
    Io(#[from] std::io::Error),
}

/// Writes `outcome` to `final_path`, going through a sibling temp file
/// first so the rename is atomic on the same filesystem.
pub async fn write_outcome(outcome: &Outcome, final_path: &Path) -> Result<(), OutcomeWriteError> {
    let json = serde_json::to_vec_pretty(outcome)?;
    let temp_path = sibling_temp_path(final_path);
    let mut file = tokio::fs::File::create(&temp_path).await?;
    use tokio::io::AsyncWriteExt;
    file.write_all(&json).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&temp_path, final_path).await?;
    Ok(())
}

fn sibling_temp_path(final_path: &Path) -> PathBuf {
    let file_name = final_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "outcome".to_string());
    let temp_name = format!(".{file_name}.{}.tmp", Uuid::new_v4());
    final_path
        .parent()
        .map(|dir| dir.join(&temp_name))
        .unwrap_or_else(|| PathBuf::from(temp_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use privcount_types::outcome::Context;
    use std::collections::BTreeMap;

    fn sample_round_config() -> privcount_types::round::RoundConfig {
        privcount_types::round::RoundConfig {
            round_id: privcount_types::round::RoundId(1),
            start_after: None,
            counters: privcount_types::counter::CounterTable::default(),
            thresholds: privcount_types::round::Thresholds {
                dc_threshold: 1,
                sk_threshold: 1,
            },
            timing: privcount_types::round::Timing {
                collect_period: std::time::Duration::from_secs(1),
                checkin_period: std::time::Duration::from_secs(1),
                event_period: std::time::Duration::from_secs(1),
                delay_period: std::time::Duration::from_secs(1),
                start_timeout: std::time::Duration::from_secs(1),
                submission_timeout: std::time::Duration::from_secs(1),
            },
            noise: privcount_types::round::NoisePolicy {
                epsilon: 1.0,
                delta: 1e-6,
                sigma_decrease_tolerance: 0.0,
                always_delay: false,
            },
            share_keepers: vec![],
            event_subscription: vec![],
            circuit_sample_rate: 1.0,
            max_cell_events_per_circuit: 0,
            rotate_period: std::time::Duration::from_secs(3600),
            continue_count: None,
            prime_modulus_hex: "f".repeat(128),
        }
    }

    fn sample_outcome() -> Outcome {
        Outcome {
            tally: BTreeMap::new(),
            context: Context {
                round_id: privcount_types::round::RoundId(1),
                round_config_hash: sample_round_config().content_hash(),
                start_time: "2026-01-01T00:00:00Z".to_string(),
                stop_time: "2026-01-01T01:00:00Z".to_string(),
                publish_time: "2026-01-01T01:05:00Z".to_string(),
                participating_dcs: vec![],
                participating_sks: vec![],
                protocol_version: 1,
                software_version: "0.1.0".to_string(),
                noise_sampled_by: "tally-server".to_string(),
                validity_flagged: false,
            },
        }
    }

    #[tokio::test]
    async fn writes_readable_json_and_leaves_no_temp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("outcome.json");
        write_outcome(&sample_outcome(), &final_path).await.unwrap();

        let contents = tokio::fs::read_to_string(&final_path).await.unwrap();
        let parsed: Outcome = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.context.round_id, privcount_types::round::RoundId(1));

        let leftover = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path() != final_path)
            .count();
        assert_eq!(leftover, 0);
    }

    #[tokio::test]
    async fn overwrites_an_existing_outcome_file() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("outcome.json");
        write_outcome(&sample_outcome(), &final_path).await.unwrap();
        write_outcome(&sample_outcome(), &final_path).await.unwrap();
        assert!(final_path.exists());
    }
}
