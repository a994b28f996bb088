//! Event types for the EMUsort pipeline
//!
//! Provides the shared event definitions and the EventBus the orchestrator
//! publishes job progress on.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

/// Lifecycle of one sorting job after the sorter returns
///
/// ```text
/// RawSortOutput -> WaveformsExtracted -> Scored -> Consolidated -> Renamed
///        \________________\_________________\___________\__________-> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    RawSortOutput,
    WaveformsExtracted,
    Scored,
    Consolidated,
    Renamed,
    Failed,
}

impl JobState {
    /// Whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Renamed | JobState::Failed)
    }

    /// The single forward successor, if any
    pub fn next(&self) -> Option<JobState> {
        match self {
            JobState::RawSortOutput => Some(JobState::WaveformsExtracted),
            JobState::WaveformsExtracted => Some(JobState::Scored),
            JobState::Scored => Some(JobState::Consolidated),
            JobState::Consolidated => Some(JobState::Renamed),
            JobState::Renamed | JobState::Failed => None,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::RawSortOutput => "RAW_SORT_OUTPUT",
            JobState::WaveformsExtracted => "WAVEFORMS_EXTRACTED",
            JobState::Scored => "SCORED",
            JobState::Consolidated => "CONSOLIDATED",
            JobState::Renamed => "RENAMED",
            JobState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// How the concatenation cache satisfied a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CacheOutcome {
    /// No artifact existed
    Built,
    /// Fingerprint matched, artifact reused
    Loaded,
    /// Artifact existed but could not be trusted
    Rebuilt { reason: String },
}

/// EMUsort pipeline events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EmuEvent {
    /// Concatenated recording resolved from the cache
    CacheResolved {
        artifact: String,
        outcome: CacheOutcome,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Sorter dispatch started for a channel group
    SortingStarted {
        group: usize,
        jobs: usize,
        concurrency: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Sorter returned for every job of a channel group
    SortingCompleted {
        group: usize,
        jobs: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Extraction batch started (batches are 1-based)
    BatchStarted {
        batch: usize,
        total_batches: usize,
        size: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Every job in the batch settled
    BatchCompleted {
        batch: usize,
        total_batches: usize,
        failed: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Job moved forward (or failed)
    JobStateChanged {
        worker: usize,
        old_state: JobState,
        new_state: JobState,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Job failed during extraction, scoring or finalization
    JobFailed {
        worker: usize,
        error: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// Broadcast bus for pipeline events
///
/// Cloning is cheap; every clone publishes to the same subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EmuEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<EmuEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: EmuEvent,
    ) -> Result<usize, broadcast::error::SendError<EmuEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: EmuEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_state_forward_chain() {
        let mut state = JobState::RawSortOutput;
        let mut visited = vec![state];
        while let Some(next) = state.next() {
            visited.push(next);
            state = next;
        }
        assert_eq!(
            visited,
            vec![
                JobState::RawSortOutput,
                JobState::WaveformsExtracted,
                JobState::Scored,
                JobState::Consolidated,
                JobState::Renamed,
            ]
        );
        assert!(JobState::Renamed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Failed.next().is_none());
    }

    #[test]
    fn test_job_state_serializes_screaming_case() {
        let json = serde_json::to_string(&JobState::WaveformsExtracted).unwrap();
        assert_eq!(json, "\"WAVEFORMS_EXTRACTED\"");
        assert_eq!(JobState::Scored.to_string(), "SCORED");
    }

    #[tokio::test]
    async fn test_event_bus_delivers_to_subscribers() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        let sent = bus
            .emit(EmuEvent::JobFailed {
                worker: 3,
                error: "boom".to_string(),
                timestamp: chrono::Utc::now(),
            })
            .unwrap();
        assert_eq!(sent, 1);

        match rx.recv().await.unwrap() {
            EmuEvent::JobFailed { worker, error, .. } => {
                assert_eq!(worker, 3);
                assert_eq!(error, "boom");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(4);
        let event = EmuEvent::CacheResolved {
            artifact: "concatenated_data".to_string(),
            outcome: CacheOutcome::Built,
            timestamp: chrono::Utc::now(),
        };
        assert!(bus.emit(event.clone()).is_err());
        bus.emit_lossy(event);
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.capacity(), 4);
    }
}
