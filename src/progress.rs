//! Background transfer-progress estimation.
//!
//! Fraction copied is inferred from the destination's shrinking free space
//! against the source's used space at start. The figure conflates any
//! concurrent writes to the destination, so it is best-effort only and
//! clamped at the consumer, never trusted for completion.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use crate::space::DiskSpace;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSample {
    pub fraction: f64,
    pub at: DateTime<Utc>,
}

impl ProgressSample {
    pub fn clamped(&self) -> f64 {
        self.fraction.clamp(0.0, 1.0)
    }
}

/// Spawns the sampling task for one session. Samples flow on the returned
/// channel every `period` until the session's process exits; unread samples
/// are droppable. The task never reports completion itself.
pub fn monitor(
    space: Arc<dyn DiskSpace>,
    source: PathBuf,
    dest: PathBuf,
    mut alive: watch::Receiver<bool>,
    period: Duration,
) -> mpsc::UnboundedReceiver<ProgressSample> {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let used = match space.used_space(&source) {
            Ok(bytes) if bytes > 0 => bytes as f64,
            _ => return,
        };
        let initial_free = match space.free_space(&dest) {
            Ok(bytes) => bytes as f64,
            Err(_) => return,
        };

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first interval tick is immediate; sampling starts one period in
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !*alive.borrow() {
                        break;
                    }
                    let Ok(free) = space.free_space(&dest) else {
                        continue;
                    };
                    let sample = ProgressSample {
                        fraction: (initial_free - free as f64) / used,
                        at: Utc::now(),
                    };
                    if tx.send(sample).is_err() {
                        break;
                    }
                }
                changed = alive.changed() => {
                    if changed.is_err() || !*alive.borrow() {
                        break;
                    }
                }
            }
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::mock::MockSpace;

    fn paths() -> (PathBuf, PathBuf) {
        (PathBuf::from("/src"), PathBuf::from("/dst"))
    }

    #[tokio::test(start_paused = true)]
    async fn samples_track_free_space_delta() {
        let space = MockSpace::new(1_000, 10_000);
        let (alive_tx, alive_rx) = watch::channel(true);
        let (source, dest) = paths();
        let mut rx = monitor(
            Arc::new(space.clone()),
            source,
            dest,
            alive_rx,
            Duration::from_secs(6),
        );
        // let the sampler snapshot the initial free space first
        tokio::task::yield_now().await;

        space.set_free(9_500);
        let sample = rx.recv().await.unwrap();
        assert!((sample.fraction - 0.5).abs() < f64::EPSILON);

        space.set_free(9_000);
        let sample = rx.recv().await.unwrap();
        assert!((sample.fraction - 1.0).abs() < f64::EPSILON);

        drop(alive_tx);
    }

    #[tokio::test(start_paused = true)]
    async fn sampling_stops_when_the_process_exits() {
        let space = MockSpace::new(1_000, 10_000);
        let (alive_tx, alive_rx) = watch::channel(true);
        let (source, dest) = paths();
        let mut rx = monitor(
            Arc::new(space),
            source,
            dest,
            alive_rx,
            Duration::from_secs(6),
        );

        alive_tx.send(false).unwrap();
        // channel closes once the task observes the exit
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_source_produces_no_samples() {
        let space = MockSpace::new(0, 10_000);
        let (_alive_tx, alive_rx) = watch::channel(true);
        let (source, dest) = paths();
        let mut rx = monitor(
            Arc::new(space),
            source,
            dest,
            alive_rx,
            Duration::from_secs(6),
        );

        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stat_failure_at_start_produces_no_samples() {
        let space = MockSpace::failing_source("bad media");
        let (_alive_tx, alive_rx) = watch::channel(true);
        let mut rx = monitor(
            Arc::new(space),
            PathBuf::from("/src"),
            PathBuf::from("/dst"),
            alive_rx,
            Duration::from_secs(6),
        );

        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn clamping_bounds_runaway_estimates() {
        let high = ProgressSample {
            fraction: 1.7,
            at: Utc::now(),
        };
        let low = ProgressSample {
            fraction: -0.3,
            at: Utc::now(),
        };
        assert_eq!(high.clamped(), 1.0);
        assert_eq!(low.clamped(), 0.0);
    }
}
