//! Background re-evaluation of standing barriers.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use waypoint_core::BarrierId;

use super::BarrierService;
use crate::state::CoordinatorState;

/// This instance's share of the cluster-wide barrier work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    pub index: u32,
    pub count: u32,
}

impl Partition {
    pub fn new(index: u32, count: u32) -> Self {
        let count = count.max(1);
        Self {
            index: index % count,
            count,
        }
    }

    /// Whether this partition owns `id`. Stable across processes.
    pub fn owns(&self, id: &BarrierId) -> bool {
        let digest = Sha256::digest(id.as_str().as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(prefix) % u64::from(self.count) == u64::from(self.index)
    }
}

impl Default for Partition {
    fn default() -> Self {
        Self::new(0, 1)
    }
}

/// Periodically updates every standing barrier this instance owns.
pub struct BarrierMonitor {
    state: Arc<CoordinatorState>,
    service: Arc<BarrierService>,
    partition: Partition,
    workers: Arc<Semaphore>,
}

impl BarrierMonitor {
    pub fn new(state: Arc<CoordinatorState>, service: Arc<BarrierService>) -> Self {
        let partition = Partition::new(state.config.partition_index, state.config.partition_count);
        let workers = Arc::new(Semaphore::new(state.config.barrier_monitor_workers.max(1)));
        Self {
            state,
            service,
            partition,
            workers,
        }
    }

    /// One scan. Returns how many barriers were evaluated.
    pub async fn run_once(&self) -> usize {
        self.state.metrics.record_monitor_tick();

        let standing = match self.state.barriers.list_standing().await {
            Ok(standing) => standing,
            Err(e) => {
                warn!(error = %e, "Failed to list standing barriers");
                return 0;
            }
        };

        let mut tasks = JoinSet::new();
        for mut instance in standing
            .into_iter()
            .filter(|b| self.partition.owns(&b.id))
        {
            let service = self.service.clone();
            let workers = self.workers.clone();
            tasks.spawn(async move {
                let _permit = match workers.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return false,
                };
                if let Err(e) = service.update(&mut instance).await {
                    warn!(barrier_id = %instance.id, error = %e, "Barrier update failed");
                }
                true
            });
        }

        let mut evaluated = 0;
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(true) => evaluated += 1,
                Ok(false) => {}
                Err(e) => warn!(error = %e, "Barrier update task panicked"),
            }
        }
        debug!(evaluated, partition = self.partition.index, "Barrier monitor tick");
        evaluated
    }

    /// Scan on the configured interval until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.state.config.barrier_monitor_interval);
        info!(
            partition = self.partition.index,
            partitions = self.partition.count,
            "Barrier monitor started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Barrier monitor stopped");
                    break;
                }
                _ = interval.tick() => {
                    self.run_once().await;
                }
            }
        }
    }

    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrier::service::tests::{start_branch, two_tracks};
    use crate::barrier::ForcerLevel;
    use crate::clock::ManualClock;
    use crate::config::Config;
    use crate::memory::MemoryBackend;
    use crate::store::BarrierStore;
    use std::time::Duration;
    use waypoint_core::{BarrierState, ExecutionId, ExecutionStatus};

    fn monitor(config: Config) -> (Arc<MemoryBackend>, Arc<BarrierService>, Arc<BarrierMonitor>) {
        let backend = Arc::new(MemoryBackend::default());
        let state = backend.state(config, Arc::new(ManualClock::default()));
        let service = Arc::new(BarrierService::new(state.clone()));
        let monitor = Arc::new(BarrierMonitor::new(state, service.clone()));
        (backend, service, monitor)
    }

    #[test]
    fn test_every_barrier_has_exactly_one_owner() {
        let partitions: Vec<Partition> = (0..3).map(|i| Partition::new(i, 3)).collect();
        for _ in 0..50 {
            let id = BarrierId::generate();
            let owners = partitions.iter().filter(|p| p.owns(&id)).count();
            assert_eq!(owners, 1);
        }
        assert!(Partition::default().owns(&BarrierId::generate()));
    }

    #[tokio::test]
    async fn test_tick_settles_arrived_barriers() {
        let (backend, service, monitor) = monitor(Config::default());
        let barrier = service
            .create_instances("APP_ID", &two_tracks(), &ExecutionId::new("pipe-exec"), 0)
            .await
            .unwrap()
            .remove(0);

        assert_eq!(monitor.run_once().await, 1);
        assert_eq!(backend.notifier.count(), 0);

        for stage in ["A", "B"] {
            start_branch(&backend, stage);
            backend.executions.set_status(
                ForcerLevel::Step,
                &format!("step-exec-{stage}"),
                ExecutionStatus::Running,
            );
        }
        assert_eq!(monitor.run_once().await, 1);
        assert_eq!(backend.notifier.count(), 1);

        let stored = backend.barriers.get(&barrier.id).await.unwrap().unwrap();
        assert_eq!(stored.state, BarrierState::Down);
        assert_eq!(monitor.run_once().await, 0);
    }

    #[tokio::test]
    async fn test_partition_skips_foreign_barriers() {
        let config = Config {
            partition_index: 0,
            partition_count: 2,
            ..Config::default()
        };
        let (_, service, monitor) = monitor(config);
        let mut owned = 0;
        for i in 0..6 {
            let barrier = service
                .create_instances("APP_ID", &two_tracks(), &ExecutionId::new(format!("pipe-{i}")), 0)
                .await
                .unwrap()
                .remove(0);
            if Partition::new(0, 2).owns(&barrier.id) {
                owned += 1;
            }
        }
        assert_eq!(monitor.run_once().await, owned);
    }

    #[tokio::test]
    async fn test_cancel_stops_loop() {
        let config = Config {
            barrier_monitor_interval: Duration::from_millis(10),
            ..Config::default()
        };
        let (_, _, monitor) = monitor(config);
        let token = CancellationToken::new();
        let handle = monitor.clone().spawn(token.clone());

        tokio::time::sleep(Duration::from_millis(30)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
