use crate::config::ResultsConfig;
use crate::detector::Detection;
use crate::planner::SignalPlan;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Per-class detection totals, one slot per catalog entry in catalog order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DetectionCounts(pub Vec<u32>);

impl DetectionCounts {
    /// Tallies detections into class slots. Detections whose class index lies
    /// outside the catalog are dropped, not counted.
    pub fn from_detections(detections: &[Detection], num_classes: usize) -> Self {
        let mut counts = vec![0u32; num_classes];
        for detection in detections {
            if let Some(slot) = counts.get_mut(detection.class_id as usize) {
                *slot += 1;
            }
        }
        Self(counts)
    }

    pub fn total(&self) -> u32 {
        self.0.iter().sum()
    }
}

/// Traffic-light status derived from the planned red-phase duration, kept for
/// compatibility with existing polling clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Ready,
    Processing,
    Error,
}

impl ResultStatus {
    pub fn from_duration(duration_seconds: u32) -> Self {
        match duration_seconds {
            0..=30 => ResultStatus::Ready,
            31..=60 => ResultStatus::Processing,
            _ => ResultStatus::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub input_image: Option<String>,
    pub output_image: Option<String>,
    pub counts: DetectionCounts,
    pub total_vehicles: u32,
    pub plan: SignalPlan,
    pub status: ResultStatus,
}

/// Single-slot store for the most recent `DetectionResult`.
///
/// Every publish overwrites both the in-memory slot and the JSON file at the
/// configured path, so external pollers observe trigger-initiated captures
/// without an HTTP round trip. Absence of the file means no capture has
/// completed yet. A failed file write is logged and does not fail the
/// publishing caller; the in-memory result is still served.
pub struct ResultStore {
    slot: RwLock<Option<DetectionResult>>,
    path: PathBuf,
}

impl ResultStore {
    pub fn new(results_config: &ResultsConfig) -> Self {
        Self {
            slot: RwLock::new(None),
            path: results_config.last_result_path.clone(),
        }
    }

    pub fn publish(&self, result: DetectionResult) {
        *self.slot.write() = Some(result.clone());

        match serde_json::to_vec_pretty(&result) {
            Ok(bytes) => {
                if let Err(e) = fs::write(&self.path, bytes) {
                    tracing::warn!("Failed to persist last result to {:?}: {}", self.path, e);
                }
            }
            Err(e) => {
                tracing::warn!("Failed to serialize last result: {}", e);
            }
        }
    }

    pub fn latest(&self) -> Option<DetectionResult> {
        self.slot.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::plan;

    fn detection(class_id: u32) -> Detection {
        Detection {
            class_id,
            confidence: 0.9,
            x1: 0.0,
            y1: 0.0,
            x2: 10.0,
            y2: 10.0,
        }
    }

    fn result(total: u32) -> DetectionResult {
        let plan = plan(total);
        DetectionResult {
            input_image: None,
            output_image: None,
            counts: DetectionCounts(vec![total, 0, 0, 0, 0, 0]),
            total_vehicles: total,
            plan,
            status: ResultStatus::from_duration(plan.duration_seconds),
        }
    }

    #[test]
    fn test_tally_drops_out_of_range_classes() {
        let detections = vec![detection(0), detection(2), detection(2), detection(9)];
        let counts = DetectionCounts::from_detections(&detections, 6);

        assert_eq!(counts.0, vec![1, 0, 2, 0, 0, 0]);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn test_tally_width_matches_catalog() {
        let counts = DetectionCounts::from_detections(&[], 4);
        assert_eq!(counts.0.len(), 4);
        assert_eq!(counts.total(), 0);
    }

    #[test]
    fn test_status_thresholds() {
        assert_eq!(ResultStatus::from_duration(20), ResultStatus::Ready);
        assert_eq!(ResultStatus::from_duration(30), ResultStatus::Ready);
        assert_eq!(ResultStatus::from_duration(45), ResultStatus::Processing);
        assert_eq!(ResultStatus::from_duration(60), ResultStatus::Processing);
        assert_eq!(ResultStatus::from_duration(90), ResultStatus::Error);
    }

    #[test]
    fn test_store_overwrites_slot_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_result.json");
        let store = ResultStore::new(&ResultsConfig {
            last_result_path: path.clone(),
        });

        assert!(store.latest().is_none());
        assert!(!path.exists());

        store.publish(result(3));
        store.publish(result(12));

        let latest = store.latest().unwrap();
        assert_eq!(latest.total_vehicles, 12);

        let on_disk: DetectionResult =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk, latest);
    }

    #[test]
    fn test_persist_failure_keeps_memory_result() {
        let store = ResultStore::new(&ResultsConfig {
            last_result_path: PathBuf::from("/nonexistent/dir/last_result.json"),
        });

        store.publish(result(5));
        assert_eq!(store.latest().unwrap().total_vehicles, 5);
    }
}
