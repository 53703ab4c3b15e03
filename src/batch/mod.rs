mod tally;

pub use tally::Tally;

use crate::config::BatchConfig;
use crate::issuer::{Outcome, RequestIssuer, Transport};
use crate::pool::SharedIdPool;
use rand::rngs::StdRng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub size: usize,
    pub max_in_flight: usize,
    pub interval: Duration,
    pub max_batches: Option<u64>,
}

impl BatchSettings {
    pub fn from_config(config: &BatchConfig) -> Self {
        Self {
            size: config.size,
            max_in_flight: config.effective_max_in_flight(),
            interval: config.interval(),
            max_batches: config.max_batches,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub number: u64,
    pub launched: usize,
    pub peak_in_flight: usize,
    pub tally: Tally,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub batches: u64,
    pub tally: Tally,
}

/// Fork-join loop: sample ids, issue one request per id, join them all,
/// sleep, repeat.
pub struct BatchRunner<T> {
    pool: SharedIdPool,
    issuer: Arc<RequestIssuer<T>>,
    settings: BatchSettings,
    rng: StdRng,
    completed: u64,
    totals: Tally,
}

impl<T: Transport> BatchRunner<T> {
    pub fn new(
        pool: SharedIdPool,
        issuer: RequestIssuer<T>,
        settings: BatchSettings,
        rng: StdRng,
    ) -> Self {
        Self {
            pool,
            issuer: Arc::new(issuer),
            settings,
            rng,
            completed: 0,
            totals: Tally::default(),
        }
    }

    pub fn totals(&self) -> Tally {
        self.totals
    }

    pub fn completed_batches(&self) -> u64 {
        self.completed
    }

    fn limit_reached(&self) -> bool {
        self.settings
            .max_batches
            .is_some_and(|max| self.completed >= max)
    }

    /// Runs one batch to completion. Returns only after every request of the
    /// batch has resolved.
    pub async fn run_batch(&mut self) -> BatchReport {
        let number = self.completed + 1;
        info!(
            "Starting batch {} of {} parallel requests",
            number, self.settings.size
        );

        let picks = self.pool.sample(self.settings.size, &mut self.rng);
        let mut pending = picks.into_iter();
        let mut tasks = JoinSet::new();
        let mut tally = Tally::default();
        let mut launched = 0;
        let mut peak_in_flight = 0;

        loop {
            while tasks.len() < self.settings.max_in_flight {
                let Some(index) = pending.next() else {
                    break;
                };
                let pool = self.pool.clone();
                let issuer = self.issuer.clone();
                tasks.spawn(async move { issuer.issue(&pool.ids()[index]).await });
                launched += 1;
            }
            peak_in_flight = peak_in_flight.max(tasks.len());

            match tasks.join_next().await {
                Some(Ok(outcome)) => tally.record(&outcome),
                Some(Err(e)) => {
                    error!("Request task failed: {}", e);
                    tally.record(&Outcome::Failed(e.to_string()));
                }
                None => break,
            }
        }

        self.completed = number;
        self.totals.merge(tally);

        debug!(
            "Batch {} launched {} requests, peak in flight {}",
            number, launched, peak_in_flight
        );
        info!(
            "Batch {} done: {} succeeded, {} failed. Totals: {} succeeded, {} failed, {} processed",
            number,
            tally.successes,
            tally.failures,
            self.totals.successes,
            self.totals.failures,
            self.totals.total()
        );

        BatchReport {
            number,
            launched,
            peak_in_flight,
            tally,
        }
    }

    /// Loops until `shutdown` is cancelled or the batch limit is reached.
    ///
    /// Cancellation is only observed between batches and during the sleep; a
    /// batch that has started always drains.
    pub async fn run(&mut self, shutdown: CancellationToken) -> RunSummary {
        loop {
            if shutdown.is_cancelled() {
                info!("Shutdown requested, not starting a new batch");
                break;
            }
            if self.limit_reached() {
                info!("Reached batch limit of {}", self.completed);
                break;
            }

            self.run_batch().await;

            if self.limit_reached() {
                info!("Reached batch limit of {}", self.completed);
                break;
            }

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, stopping after batch {}", self.completed);
                    break;
                }
                _ = time::sleep(self.settings.interval) => {}
            }
        }

        RunSummary {
            batches: self.completed,
            tally: self.totals,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issuer::Target;
    use crate::pool::IdPool;
    use crate::testing::ScriptedTransport;
    use http::StatusCode;
    use rand::{Rng, SeedableRng};
    use std::collections::HashSet;
    use std::io;
    use std::sync::Mutex;
    use url::Url;

    fn settings(size: usize, max_in_flight: usize) -> BatchSettings {
        BatchSettings {
            size,
            max_in_flight,
            interval: Duration::from_millis(1),
            max_batches: None,
        }
    }

    fn runner(
        transport: Arc<ScriptedTransport>,
        pool_size: usize,
        settings: BatchSettings,
    ) -> BatchRunner<Arc<ScriptedTransport>> {
        let mut rng = StdRng::seed_from_u64(11);
        let pool = Arc::new(IdPool::generate(pool_size, &mut rng));
        let target = Target::new(Url::parse("http://target/accept").unwrap(), None);
        BatchRunner::new(pool, RequestIssuer::new(transport, target), settings, rng)
    }

    fn always(status: StatusCode) -> Arc<ScriptedTransport> {
        Arc::new(ScriptedTransport::new(move |_| Ok(status)))
    }

    #[tokio::test]
    async fn batch_launches_exactly_batch_size_and_joins_all() {
        let transport = Arc::new(
            ScriptedTransport::new(|_| Ok(StatusCode::OK)).with_delay(Duration::from_millis(2)),
        );
        let mut runner = runner(transport.clone(), 10, settings(64, 64));

        let report = runner.run_batch().await;

        assert_eq!(report.number, 1);
        assert_eq!(report.launched, 64);
        assert_eq!(report.tally.total(), 64);
        assert_eq!(transport.completed(), 64);
        assert_eq!(transport.in_flight(), 0);
    }

    #[tokio::test]
    async fn in_flight_never_exceeds_bound() {
        let transport = Arc::new(
            ScriptedTransport::new(|_| Ok(StatusCode::OK)).with_delay(Duration::from_millis(2)),
        );
        let mut runner = runner(transport.clone(), 10, settings(100, 8));

        let report = runner.run_batch().await;

        assert_eq!(report.launched, 100);
        assert_eq!(report.peak_in_flight, 8);
        assert!(transport.peak_in_flight() <= 8);
        assert_eq!(transport.completed(), 100);
    }

    #[tokio::test]
    async fn counters_add_up_over_many_batches() {
        let transport = Arc::new(ScriptedTransport::new(|id| {
            let n: u32 = id.parse().unwrap();
            if n % 3 == 0 {
                Ok(StatusCode::SERVICE_UNAVAILABLE)
            } else {
                Ok(StatusCode::OK)
            }
        }));
        let mut runner = runner(transport, 50, settings(40, 40));

        for _ in 0..5 {
            runner.run_batch().await;
        }

        assert_eq!(runner.completed_batches(), 5);
        assert_eq!(runner.totals().total(), 5 * 40);
    }

    #[tokio::test]
    async fn always_ok_never_fails() {
        let mut runner = runner(always(StatusCode::OK), 20, settings(30, 30));
        for _ in 0..4 {
            let report = runner.run_batch().await;
            assert_eq!(report.tally.failures, 0);
        }
        assert_eq!(
            runner.totals(),
            Tally {
                successes: 120,
                failures: 0
            }
        );
    }

    #[tokio::test]
    async fn always_500_fails_every_request() {
        let mut runner = runner(always(StatusCode::INTERNAL_SERVER_ERROR), 20, settings(25, 25));
        for batch in 1..=4u64 {
            runner.run_batch().await;
            assert_eq!(runner.totals().successes, 0);
            assert_eq!(runner.totals().failures, batch * 25);
        }
    }

    #[tokio::test]
    async fn dropped_connections_converge_to_drop_rate() {
        let drops = Mutex::new(StdRng::seed_from_u64(2024));
        let transport = Arc::new(ScriptedTransport::new(move |_| {
            if drops.lock().unwrap().random_bool(0.1) {
                Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset"))
            } else {
                Ok(StatusCode::OK)
            }
        }));
        let mut runner = runner(transport, 100, settings(1_000, 1_000));

        for _ in 0..10 {
            runner.run_batch().await;
        }

        let totals = runner.totals();
        assert_eq!(totals.total(), 10_000);
        assert!(
            (800..=1_200).contains(&totals.failures),
            "failures = {}",
            totals.failures
        );
    }

    #[tokio::test]
    async fn batches_only_request_pool_ids_and_leave_pool_intact() {
        let transport = always(StatusCode::OK);
        let mut runner = runner(transport.clone(), 15, settings(50, 10));
        let before = runner.pool.ids().to_vec();

        for _ in 0..6 {
            runner.run_batch().await;
        }

        assert_eq!(runner.pool.ids(), before.as_slice());
        let known: HashSet<_> = before.iter().map(|id| id.as_str().to_string()).collect();
        let requested = transport.requested_ids();
        assert_eq!(requested.len(), 300);
        assert!(requested.iter().all(|id| known.contains(id)));
    }

    #[tokio::test]
    async fn run_stops_at_batch_limit() {
        let transport = always(StatusCode::OK);
        let mut settings = settings(10, 10);
        settings.max_batches = Some(3);
        let mut runner = runner(transport.clone(), 5, settings);

        let summary = runner.run(CancellationToken::new()).await;

        assert_eq!(summary.batches, 3);
        assert_eq!(summary.tally.total(), 30);
        assert_eq!(transport.completed(), 30);
    }

    #[tokio::test]
    async fn cancelled_before_start_runs_nothing() {
        let transport = always(StatusCode::OK);
        let mut runner = runner(transport.clone(), 5, settings(10, 10));
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let summary = runner.run(shutdown).await;

        assert_eq!(summary, RunSummary::default());
        assert_eq!(transport.completed(), 0);
    }

    #[tokio::test]
    async fn cancel_mid_batch_lets_batch_drain() {
        let transport = Arc::new(
            ScriptedTransport::new(|_| Ok(StatusCode::OK)).with_delay(Duration::from_millis(50)),
        );
        let mut runner = runner(transport.clone(), 5, settings(20, 20));
        let shutdown = CancellationToken::new();

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let summary = runner.run(shutdown).await;

        assert_eq!(summary.batches, 1);
        assert_eq!(summary.tally.total(), 20);
        assert_eq!(transport.completed(), 20);
        assert_eq!(transport.in_flight(), 0);
    }

    #[tokio::test]
    async fn cancel_during_sleep_prevents_next_batch() {
        let transport = always(StatusCode::OK);
        let mut settings = settings(5, 5);
        settings.interval = Duration::from_secs(60);
        let mut runner = runner(transport.clone(), 5, settings);
        let shutdown = CancellationToken::new();

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let summary = time::timeout(Duration::from_secs(5), runner.run(shutdown))
            .await
            .expect("run should stop promptly once cancelled");

        assert_eq!(summary.batches, 1);
        assert_eq!(transport.completed(), 5);
    }
}
