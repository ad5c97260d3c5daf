//! Trainer statistics written to a JSON file after every iteration.
//!
//! The snapshot combines the iteration counters kept here with the
//! coordinator's [`LearningStatus`], the evaluator's training-quality
//! summary and the store's aggregate counts.

use learner::{IterationOutcome, LearningStatus, PerformanceSummary};
use replay_store::StoreStats;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

#[derive(Debug)]
pub struct TrainerStats {
    trained: AtomicU64,
    paused: AtomicU64,
    waiting: AtomicU64,
    start_time: Instant,
    stats_path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TrainerStatsSnapshot {
    pub trained_iterations: u64,
    pub paused_iterations: u64,
    pub waiting_iterations: u64,
    pub learning: LearningStatus,
    pub last_outcome: Option<IterationOutcome>,
    pub performance: Option<PerformanceSummary>,
    pub store: Option<StoreStats>,
    pub runtime_seconds: f64,
    pub timestamp: u64,
}

impl TrainerStats {
    pub fn new(stats_path: impl Into<PathBuf>) -> Self {
        let stats_path = stats_path.into();
        if let Some(parent) = stats_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!("Failed to create stats directory: {}", e);
            }
        }

        Self {
            trained: AtomicU64::new(0),
            paused: AtomicU64::new(0),
            waiting: AtomicU64::new(0),
            start_time: Instant::now(),
            stats_path,
        }
    }

    pub fn record(&self, outcome: &IterationOutcome) {
        let counter = match outcome {
            IterationOutcome::Trained { .. } => &self.trained,
            IterationOutcome::Paused => &self.paused,
            IterationOutcome::WaitingForData { .. } => &self.waiting,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(
        &self,
        learning: LearningStatus,
        last_outcome: Option<IterationOutcome>,
        performance: Option<PerformanceSummary>,
        store: Option<StoreStats>,
    ) -> TrainerStatsSnapshot {
        TrainerStatsSnapshot {
            trained_iterations: self.trained.load(Ordering::Relaxed),
            paused_iterations: self.paused.load(Ordering::Relaxed),
            waiting_iterations: self.waiting.load(Ordering::Relaxed),
            learning,
            last_outcome,
            performance,
            store,
            runtime_seconds: self.start_time.elapsed().as_secs_f64(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        }
    }

    /// Write a snapshot via a temp file and rename. Failures are logged.
    pub fn write(&self, snapshot: &TrainerStatsSnapshot) {
        let json = match serde_json::to_string_pretty(snapshot) {
            Ok(j) => j,
            Err(e) => {
                warn!("Failed to serialize trainer stats: {}", e);
                return;
            }
        };

        let temp_path = self.stats_path.with_extension("json.tmp");
        let written = fs::File::create(&temp_path).and_then(|mut file| file.write_all(json.as_bytes()));
        if let Err(e) = written {
            warn!("Failed to write temp stats file: {}", e);
            let _ = fs::remove_file(&temp_path);
            return;
        }

        if let Err(e) = fs::rename(&temp_path, &self.stats_path) {
            warn!("Failed to rename stats file: {}", e);
            let _ = fs::remove_file(&temp_path);
            return;
        }

        debug!(path = %self.stats_path.display(), "Wrote trainer stats");
    }

    pub fn stats_path(&self) -> &Path {
        &self.stats_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use learner::PerformanceEvaluator;
    use tempfile::tempdir;

    #[test]
    fn test_record_counts_by_outcome() {
        let dir = tempdir().unwrap();
        let stats = TrainerStats::new(dir.path().join("stats.json"));

        stats.record(&IterationOutcome::Paused);
        stats.record(&IterationOutcome::WaitingForData {
            available: 1,
            required: 32,
        });
        stats.record(&IterationOutcome::WaitingForData {
            available: 2,
            required: 32,
        });

        let snapshot = stats.snapshot(LearningStatus::default(), None, None, None);
        assert_eq!(snapshot.trained_iterations, 0);
        assert_eq!(snapshot.paused_iterations, 1);
        assert_eq!(snapshot.waiting_iterations, 2);
    }

    #[test]
    fn test_write_replaces_file_atomically() {
        let dir = tempdir().unwrap();
        let stats = TrainerStats::new(dir.path().join("nested").join("stats.json"));
        stats.record(&IterationOutcome::Paused);

        let status = LearningStatus {
            active: true,
            paused: true,
            ..LearningStatus::default()
        };
        stats.write(&stats.snapshot(
            status,
            Some(IterationOutcome::Paused),
            None,
            Some(StoreStats::default()),
        ));

        let content = fs::read_to_string(stats.stats_path()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed["paused_iterations"], 1);
        assert_eq!(parsed["learning"]["paused"], true);
        assert_eq!(parsed["last_outcome"]["status"], "paused");
        assert!(parsed["performance"].is_null());
        assert!(!stats.stats_path().with_extension("json.tmp").exists());
    }

    #[test]
    fn test_snapshot_carries_training_quality() {
        let dir = tempdir().unwrap();
        let stats = TrainerStats::new(dir.path().join("stats.json"));
        let evaluator = PerformanceEvaluator::new();
        evaluator.record_training(1.25, 0.5, 0.75);

        stats.write(&stats.snapshot(LearningStatus::default(), None, evaluator.summary(), None));

        let content = fs::read_to_string(stats.stats_path()).unwrap();
        let parsed: TrainerStatsSnapshot = serde_json::from_str(&content).unwrap();
        let performance = parsed.performance.unwrap();
        assert_eq!(performance.avg_policy_entropy, Some(1.25));
        assert_eq!(performance.avg_value_error, Some(0.5));
        assert_eq!(performance.training_steps, 1);
    }
}
