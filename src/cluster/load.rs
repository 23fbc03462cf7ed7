use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error};
use tokio::task::JoinSet;

/// `activeConnections` gauge. Purely informational: nothing is ever
/// refused because of its value.
#[derive(Debug, Default)]
pub struct LoadGauge {
    active: AtomicI64,
}

/// Holds one unit of the gauge until dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    gauge: Arc<LoadGauge>,
    level: i64,
}

impl ConnectionGuard {
    /// Gauge value right after this guard was taken.
    pub fn level(&self) -> i64 {
        self.level
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.gauge.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub completed: usize,
    pub peak_connections: i64,
}

impl LoadGauge {
    pub fn active(&self) -> i64 {
        self.active.load(Ordering::SeqCst)
    }

    pub fn track(self: &Arc<Self>) -> ConnectionGuard {
        let level = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        ConnectionGuard {
            gauge: Arc::clone(self),
            level,
        }
    }

    /// Run `tasks` units of simulated work concurrently, each holding a
    /// connection for `work`.
    pub async fn simulate_batch(self: &Arc<Self>, tasks: usize, work: Duration) -> BatchReport {
        let mut set = JoinSet::new();
        for _ in 0..tasks {
            let guard = self.track();
            set.spawn(async move {
                tokio::time::sleep(work).await;
                guard.level()
            });
        }

        let mut report = BatchReport {
            completed: 0,
            peak_connections: 0,
        };
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(level) => {
                    report.completed += 1;
                    report.peak_connections = report.peak_connections.max(level);
                }
                Err(e) => error!("Simulated work task failed: {}", e),
            }
        }
        debug!(
            "Simulated batch of {} tasks finished (peak {})",
            report.completed, report.peak_connections
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_increments_and_releases() {
        let gauge = Arc::new(LoadGauge::default());
        let a = gauge.track();
        let b = gauge.track();
        assert_eq!(a.level(), 1);
        assert_eq!(b.level(), 2);
        assert_eq!(gauge.active(), 2);

        drop(a);
        assert_eq!(gauge.active(), 1);
        drop(b);
        assert_eq!(gauge.active(), 0);
    }

    #[tokio::test]
    async fn batch_holds_all_connections_concurrently() {
        let gauge = Arc::new(LoadGauge::default());
        let report = gauge.simulate_batch(5, Duration::from_millis(20)).await;

        assert_eq!(report.completed, 5);
        assert_eq!(report.peak_connections, 5);
        assert_eq!(gauge.active(), 0);
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let gauge = Arc::new(LoadGauge::default());
        let report = gauge.simulate_batch(0, Duration::from_millis(1)).await;
        assert_eq!(report.completed, 0);
        assert_eq!(report.peak_connections, 0);
    }
}
