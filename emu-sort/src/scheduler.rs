//! Bounded batch scheduler for result extraction
//!
//! Items are split into consecutive batches of at most `max_concurrent`
//! tasks. Tasks of one batch are polled together on the calling task; batch
//! `n + 1` starts only after every task of batch `n` has settled. Heavy work
//! inside a task is expected to go through `spawn_blocking`.

use crate::error::{PipelineError, Result};
use chrono::Utc;
use emu_common::events::{EmuEvent, EventBus};
use futures::future::join_all;
use std::future::Future;
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct BatchScheduler {
    max_concurrent: usize,
    event_bus: Option<EventBus>,
}

impl BatchScheduler {
    pub fn new(max_concurrent: usize) -> Result<Self> {
        if max_concurrent == 0 {
            return Err(PipelineError::Config(
                "max_concurrent_tasks must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            max_concurrent,
            event_bus: None,
        })
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn batch_count(&self, items: usize) -> usize {
        items.div_ceil(self.max_concurrent)
    }

    fn emit(&self, event: EmuEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit_lossy(event);
        }
    }

    /// Run `task` over every item, batch by batch, keeping item order
    ///
    /// `on_batch` sees each batch's outputs (1-based batch number) once the
    /// batch has fully succeeded. The first failure in a batch aborts the
    /// run after its siblings settle, wrapped in [`PipelineError::Batch`].
    pub async fn run<I, T, F, Fut, B>(&self, items: Vec<I>, task: F, mut on_batch: B) -> Result<Vec<T>>
    where
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<T>>,
        B: FnMut(usize, &[T]),
    {
        let total = self.batch_count(items.len());
        let mut outputs = Vec::with_capacity(items.len());
        let mut remaining = items.into_iter().peekable();
        let mut batch = 0;

        while remaining.peek().is_some() {
            batch += 1;
            let futures: Vec<Fut> = remaining
                .by_ref()
                .take(self.max_concurrent)
                .map(&task)
                .collect();
            let size = futures.len();
            info!(batch, total, size, "Starting worker batch");
            self.emit(EmuEvent::BatchStarted {
                batch,
                total_batches: total,
                size,
                timestamp: Utc::now(),
            });

            let settled = join_all(futures).await;
            let failed = settled.iter().filter(|r| r.is_err()).count();
            self.emit(EmuEvent::BatchCompleted {
                batch,
                total_batches: total,
                failed,
                timestamp: Utc::now(),
            });

            let mut batch_outputs = Vec::with_capacity(size);
            for result in settled {
                match result {
                    Ok(output) => batch_outputs.push(output),
                    Err(e) => {
                        error!(batch, total, failed, error = %e, "Worker batch failed");
                        return Err(PipelineError::Batch {
                            batch,
                            total,
                            source: Box::new(e),
                        });
                    }
                }
            }

            on_batch(batch, &batch_outputs);
            info!("All tasks done for worker batch {}/{}", batch, total);
            outputs.extend(batch_outputs);
        }
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[test]
    fn test_zero_concurrency_rejected() {
        assert!(matches!(BatchScheduler::new(0), Err(PipelineError::Config(_))));
        assert_eq!(BatchScheduler::new(2).unwrap().batch_count(5), 3);
        assert_eq!(BatchScheduler::new(4).unwrap().batch_count(0), 0);
    }

    #[tokio::test]
    async fn test_batches_run_in_sequence() {
        let scheduler = BatchScheduler::new(2).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut sizes = Vec::new();

        let outputs = scheduler
            .run(
                (0..5usize).collect(),
                |i| {
                    let log = log.clone();
                    async move {
                        log.lock().unwrap().push(format!("start {i}"));
                        // earlier items finish last inside a batch
                        tokio::time::sleep(Duration::from_millis(20 - 3 * i as u64)).await;
                        log.lock().unwrap().push(format!("end {i}"));
                        Ok(i * 10)
                    }
                },
                |batch, done: &[usize]| sizes.push((batch, done.len())),
            )
            .await
            .unwrap();

        assert_eq!(outputs, vec![0, 10, 20, 30, 40]);
        assert_eq!(sizes, vec![(1, 2), (2, 2), (3, 1)]);

        let log = log.lock().unwrap();
        let position = |entry: &str| log.iter().position(|e| e == entry).unwrap();
        assert!(position("end 0") < position("start 2"));
        assert!(position("end 1") < position("start 2"));
        assert!(position("end 2") < position("start 4"));
        assert!(position("end 3") < position("start 4"));
    }

    #[tokio::test]
    async fn test_failure_settles_siblings_and_stops() {
        let bus = EventBus::new(32);
        let mut rx = bus.subscribe();
        let scheduler = BatchScheduler::new(2).unwrap().with_event_bus(bus);
        let finished = Arc::new(Mutex::new(Vec::new()));

        let result = scheduler
            .run(
                (0..5usize).collect(),
                |i| {
                    let finished = finished.clone();
                    async move {
                        if i == 2 {
                            return Err(PipelineError::Internal("boom".to_string()));
                        }
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        finished.lock().unwrap().push(i);
                        Ok(i)
                    }
                },
                |_, _: &[usize]| {},
            )
            .await;

        match result {
            Err(PipelineError::Batch { batch, total, source }) => {
                assert_eq!((batch, total), (2, 3));
                assert!(matches!(*source, PipelineError::Internal(_)));
            }
            other => panic!("expected batch error, got {:?}", other),
        }
        // sibling 3 ran to completion, batch 3 never started
        assert_eq!(*finished.lock().unwrap(), vec![0, 1, 3]);

        let mut completed = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let EmuEvent::BatchCompleted { batch, failed, .. } = event {
                completed.push((batch, failed));
            }
        }
        assert_eq!(completed, vec![(1, 0), (2, 1)]);
    }

    #[test]
    fn test_batch_error_message_suggests_lower_concurrency() {
        let e = PipelineError::Batch {
            batch: 2,
            total: 3,
            source: Box::new(PipelineError::Internal("x".into())),
        };
        assert!(e.to_string().contains("batch 2/3"));
        assert!(e.to_string().contains("max_concurrent_tasks"));
    }
}
