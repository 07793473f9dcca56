//! Periodic eviction of idle and dead sessions.

use std::sync::Weak;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::pool::SessionPool;
use crate::transport::ShellConnector;

/// Time between two sweeps. Independent of the idle timeout.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(120);

/// What one sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Sessions evicted for idleness or a dead connection.
    pub sessions_removed: usize,
    /// Groups dropped because they became empty.
    pub groups_removed: usize,
}

/// Background sweep bound to a pool's lifetime.
#[derive(Debug, Clone)]
pub struct IdleReaper {
    max_idle: Duration,
    interval: Duration,
}

impl IdleReaper {
    /// Creates a reaper that evicts sessions idle longer than `max_idle`.
    pub fn new(max_idle: Duration) -> Self {
        Self {
            max_idle,
            interval: SWEEP_INTERVAL,
        }
    }

    /// Overrides the sweep interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Idle threshold used by each sweep.
    pub fn max_idle(&self) -> Duration {
        self.max_idle
    }

    /// Runs one sweep as of `now`.
    pub fn sweep_at<C: ShellConnector>(&self, pool: &SessionPool<C>, now: Instant) -> SweepReport {
        let mut report = SweepReport::default();

        for group in pool.group_snapshot() {
            let removed = group.remove_where(|session| session.is_expired(now, self.max_idle));
            if removed > 0 {
                tracing::info!(
                    group_id = %group.id(),
                    removed,
                    "Evicted idle or disconnected sessions"
                );
            }
            report.sessions_removed += removed;

            if group.is_empty() && pool.remove_group_if_empty(group.id()) {
                report.groups_removed += 1;
            }
        }

        tracing::debug!(
            sessions_removed = report.sessions_removed,
            groups_removed = report.groups_removed,
            "Idle sweep complete"
        );
        report
    }

    /// Starts sweeping every interval until `cancel` fires or the pool is
    /// dropped. The first sweep happens one interval after start.
    pub fn spawn<C: ShellConnector>(
        self,
        pool: Weak<SessionPool<C>>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + self.interval;
            let mut ticker = tokio::time::interval_at(start, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(pool) = pool.upgrade() else {
                            break;
                        };
                        self.sweep_at(&pool, Instant::now());
                    }
                }
            }

            tracing::debug!("Idle reaper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::session::testing::{connect_request, wait_until, NullSink};
    use crate::transport::MemoryConnector;
    use std::sync::Arc;

    fn test_pool(max_idle_minutes: u64) -> SessionPool<MemoryConnector> {
        let mut config = Config::default();
        config.pool.max_idle_minutes = max_idle_minutes;
        SessionPool::new(&config, MemoryConnector::new(), Arc::new(NullSink))
    }

    #[tokio::test]
    async fn test_sweep_keeps_fresh_sessions() {
        let pool = test_pool(1);
        pool.connect("g1", connect_request()).await.unwrap();

        let report = pool.sweep_at(Instant::now());
        assert_eq!(report, SweepReport::default());
        assert_eq!(pool.session_count(), 1);
    }

    #[tokio::test]
    async fn test_sweep_evicts_idle_and_drops_group() {
        let pool = test_pool(1);
        pool.connect("g1", connect_request()).await.unwrap();
        pool.connect("g1", connect_request()).await.unwrap();

        let later = Instant::now() + Duration::from_secs(61);
        let report = pool.sweep_at(later);

        assert_eq!(report.sessions_removed, 2);
        assert_eq!(report.groups_removed, 1);
        assert_eq!(pool.group_count(), 0);
    }

    #[tokio::test]
    async fn test_sweep_uses_clamped_idle_timeout() {
        // Zero clamps to one minute.
        let pool = test_pool(0);
        pool.connect("g1", connect_request()).await.unwrap();
        assert_eq!(pool.sweep_at(Instant::now() + Duration::from_secs(30)).sessions_removed, 0);
        assert_eq!(pool.sweep_at(Instant::now() + Duration::from_secs(61)).sessions_removed, 1);

        // Anything above twenty clamps to twenty minutes.
        let pool = test_pool(600);
        pool.connect("g1", connect_request()).await.unwrap();
        let later = Instant::now() + Duration::from_secs(20 * 60 + 1);
        assert_eq!(pool.sweep_at(later).sessions_removed, 1);
    }

    #[tokio::test]
    async fn test_recent_input_defers_eviction() {
        let pool = test_pool(1);
        let idle = pool.connect("g1", connect_request()).await.unwrap();
        let busy = pool.connect("g1", connect_request()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let touched = Instant::now();
        pool.send_input("g1", &busy.session_id, "x").await.unwrap();

        let report = pool.sweep_at(touched + Duration::from_secs(60));

        assert_eq!(report.sessions_removed, 1);
        assert!(pool.is_connected("g1", &idle.session_id).is_err());
        assert!(pool.is_connected("g1", &busy.session_id).unwrap());
    }

    #[tokio::test]
    async fn test_sweep_evicts_dead_sessions() {
        let pool = test_pool(20);
        let dead = pool.connect("g1", connect_request()).await.unwrap();
        let keep = pool.connect("g1", connect_request()).await.unwrap();

        pool.connector().link(0).unwrap().go_silent();
        wait_until(|| pool.is_connected("g1", &dead.session_id) == Ok(false)).await;

        let report = pool.sweep_at(Instant::now());
        assert_eq!(report.sessions_removed, 1);
        assert_eq!(report.groups_removed, 0);
        assert!(pool.is_connected("g1", &keep.session_id).unwrap());
    }

    #[tokio::test]
    async fn test_spawned_reaper_sweeps_and_stops() {
        let pool = Arc::new(test_pool(1));
        pool.connect("g1", connect_request()).await.unwrap();
        pool.connector().link(0).unwrap().go_silent();

        let cancel = CancellationToken::new();
        let task = IdleReaper::new(Duration::from_secs(60))
            .with_interval(Duration::from_millis(20))
            .spawn(Arc::downgrade(&pool), cancel.clone());

        wait_until(|| pool.group_count() == 0).await;

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }
}
