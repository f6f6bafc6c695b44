use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use log::{info, warn};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tokio::runtime::Handle;

use crate::flight_scraper::Extract;
use crate::record::{FlightObservation, SearchClock, build};
use crate::reference_data::ReferenceData;
use crate::renderer::Renderer;
use crate::retry::extract_with_retry;
use crate::search_unit::SearchUnit;
use crate::utils::sort_by_key_ref;

pub const DEFAULT_CONCURRENCY: usize = 10;

type ProgressObserver = Box<dyn Fn(usize, usize) + Send + Sync>;

/// "N of total" completion counter. Ticks once per finished unit, whether it
/// produced an observation or not.
pub struct Progress {
    total: usize,
    completed: AtomicUsize,
    observer: Option<ProgressObserver>,
}

impl Progress {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            completed: AtomicUsize::new(0),
            observer: None,
        }
    }

    /// Calls `observer(completed, total)` after every tick.
    pub fn with_observer(mut self, observer: impl Fn(usize, usize) + Send + Sync + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn tick(&self) -> usize {
        let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        info!("{done} of {} searches completed", self.total);
        if let Some(observer) = &self.observer {
            observer(done, self.total);
        }
        done
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

/// Runs one job per unit with at most a fixed number in flight. Results come
/// back in no particular order; one job's failure never touches another's.
pub trait JobRunner {
    fn concurrency(&self) -> usize;

    fn run<T, F, Fut>(
        &self,
        units: Vec<SearchUnit>,
        job: F,
        progress: Arc<Progress>,
    ) -> impl Future<Output = Vec<T>> + Send
    where
        T: Send + 'static,
        F: Fn(SearchUnit) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static;
}

/// Cooperative concurrency: all jobs are futures polled on the calling task.
pub struct TaskRunner {
    limit: usize,
}

impl TaskRunner {
    pub fn new(limit: usize) -> Self {
        Self { limit: limit.max(1) }
    }
}

impl JobRunner for TaskRunner {
    fn concurrency(&self) -> usize {
        self.limit
    }

    fn run<T, F, Fut>(
        &self,
        units: Vec<SearchUnit>,
        job: F,
        progress: Arc<Progress>,
    ) -> impl Future<Output = Vec<T>> + Send
    where
        T: Send + 'static,
        F: Fn(SearchUnit) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let limit = self.limit;
        async move {
            stream::iter(units)
                .map(|unit| {
                    let job = job(unit);
                    let progress = Arc::clone(&progress);
                    async move {
                        let out = job.await;
                        progress.tick();
                        out
                    }
                })
                .buffer_unordered(limit)
                .collect::<Vec<T>>()
                .await
        }
    }
}

/// Thread parallelism: each in-flight job occupies one pool thread, which
/// drives the job's future to completion on the runtime handle.
pub struct ThreadRunner {
    pool: Arc<ThreadPool>,
}

impl ThreadRunner {
    pub fn new(limit: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(limit.max(1))
            .thread_name(|i| format!("search-worker-{i}"))
            .build()?;
        Ok(Self { pool: Arc::new(pool) })
    }
}

impl JobRunner for ThreadRunner {
    fn concurrency(&self) -> usize {
        self.pool.current_num_threads()
    }

    fn run<T, F, Fut>(
        &self,
        units: Vec<SearchUnit>,
        job: F,
        progress: Arc<Progress>,
    ) -> impl Future<Output = Vec<T>> + Send
    where
        T: Send + 'static,
        F: Fn(SearchUnit) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let pool = Arc::clone(&self.pool);
        async move {
            let handle = Handle::current();
            let joined = tokio::task::spawn_blocking(move || {
                pool.install(|| {
                    units
                        .into_par_iter()
                        // One unit per split so a slow job never holds back
                        // queued siblings on the same thread.
                        .with_max_len(1)
                        .map(|unit| {
                            let out = handle.block_on(job(unit));
                            progress.tick();
                            out
                        })
                        .collect::<Vec<T>>()
                })
            })
            .await;

            match joined {
                Ok(results) => results,
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => {
                    warn!("Search worker pool was cancelled: {e}");
                    Vec::new()
                }
            }
        }
    }
}

/// What happened to one unit.
#[derive(Debug, Clone, PartialEq)]
pub enum UnitOutcome {
    Observed(FlightObservation),
    /// A flight was found but some field was unusable.
    Rejected(FlightObservation),
    NotFound(SearchUnit),
}

/// The result of one collection run, sorted by flight date.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionReport {
    pub observations: Vec<FlightObservation>,
    pub rejected: Vec<FlightObservation>,
    pub not_found: Vec<SearchUnit>,
}

impl CollectionReport {
    fn from_outcomes(outcomes: Vec<UnitOutcome>) -> Self {
        let mut report = CollectionReport::default();
        for outcome in outcomes {
            match outcome {
                UnitOutcome::Observed(obs) => report.observations.push(obs),
                UnitOutcome::Rejected(obs) => report.rejected.push(obs),
                UnitOutcome::NotFound(unit) => report.not_found.push(unit),
            }
        }
        // Stable, so same-date observations keep completion order.
        sort_by_key_ref(&mut report.observations, |obs| &obs.flight_date);
        report
    }

    /// No unit produced a valid observation.
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn units(&self) -> usize {
        self.observations.len() + self.rejected.len() + self.not_found.len()
    }
}

/// The collection pipeline: retrying extraction per unit, record building and
/// validation, fanned out over a `JobRunner`.
pub struct Collector<R, E> {
    renderer: Arc<R>,
    extractor: Arc<E>,
    reference: Arc<ReferenceData>,
    clock: SearchClock,
    max_attempts: u32,
    attempt_timeout: Duration,
}

impl<R, E> Collector<R, E>
where
    R: Renderer,
    E: Extract<R::Page> + 'static,
{
    pub fn new(
        renderer: Arc<R>,
        extractor: Arc<E>,
        reference: Arc<ReferenceData>,
        clock: SearchClock,
        max_attempts: u32,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            renderer,
            extractor,
            reference,
            clock,
            max_attempts,
            attempt_timeout,
        }
    }

    pub async fn run<J: JobRunner>(
        &self,
        runner: &J,
        units: Vec<SearchUnit>,
        progress: Arc<Progress>,
    ) -> CollectionReport {
        info!(
            "Collecting {} searches, {} at a time",
            units.len(),
            runner.concurrency()
        );
        let renderer = Arc::clone(&self.renderer);
        let extractor = Arc::clone(&self.extractor);
        let reference = Arc::clone(&self.reference);
        let clock = self.clock;
        let max_attempts = self.max_attempts;
        let attempt_timeout = self.attempt_timeout;

        let job = move |unit: SearchUnit| {
            let renderer = Arc::clone(&renderer);
            let extractor = Arc::clone(&extractor);
            let reference = Arc::clone(&reference);
            async move {
                let raw =
                    extract_with_retry(&*renderer, &*extractor, &unit, max_attempts, attempt_timeout)
                        .await;
                if raw.is_none() {
                    warn!("No flight found for {unit} after {max_attempts} attempts");
                }
                // Stamped when this unit finished, not when it was scheduled.
                match build(&unit, raw.as_ref(), &reference, clock.now()) {
                    None => UnitOutcome::NotFound(unit),
                    Some(obs) if obs.is_valid() => UnitOutcome::Observed(obs),
                    Some(obs) => {
                        warn!("Discarding incomplete observation for {unit}: {obs:?}");
                        UnitOutcome::Rejected(obs)
                    }
                }
            }
        };

        let outcomes = runner.run(units, job, progress).await;
        let report = CollectionReport::from_outcomes(outcomes);
        info!(
            "Collected {} observations ({} rejected, {} without flights)",
            report.observations.len(),
            report.rejected.len(),
            report.not_found.len()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::Datelike;

    use super::*;

    fn units(n: u32) -> Vec<SearchUnit> {
        let start: chrono::NaiveDate = "2025-06-01".parse().unwrap();
        (0..n)
            .map(|i| SearchUnit::new("GRU", "JFK", start + chrono::Days::new(i.into())))
            .collect()
    }

    /// Tracks how many jobs are inside the job body at once.
    #[derive(Default)]
    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Gauge {
        fn enter(&self) {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
        }
        fn leave(&self) {
            self.current.fetch_sub(1, Ordering::SeqCst);
        }
    }

    async fn check_bounded<J: JobRunner>(runner: J, limit: usize) {
        let gauge = Arc::new(Gauge::default());
        let progress = Arc::new(Progress::new(12));
        let job_gauge = Arc::clone(&gauge);
        let results = runner
            .run(
                units(12),
                move |unit| {
                    let gauge = Arc::clone(&job_gauge);
                    async move {
                        gauge.enter();
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        gauge.leave();
                        unit.date
                    }
                },
                Arc::clone(&progress),
            )
            .await;

        assert_eq!(results.len(), 12);
        assert_eq!(progress.completed(), 12);
        assert!(gauge.peak.load(Ordering::SeqCst) <= limit);
        assert!(gauge.peak.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn task_runner_is_bounded() {
        check_bounded(TaskRunner::new(3), 3).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn thread_runner_is_bounded() {
        check_bounded(ThreadRunner::new(3).unwrap(), 3).await;
    }

    #[tokio::test]
    async fn results_follow_completion_order() {
        let results = TaskRunner::new(4)
            .run(
                units(4),
                |unit| async move {
                    // Later dates finish first.
                    let delay = 80 - 20 * u64::from(unit.date.day());
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    unit.date.to_string()
                },
                Arc::new(Progress::new(4)),
            )
            .await;
        assert_eq!(results, ["2025-06-04", "2025-06-03", "2025-06-02", "2025-06-01"]);
    }

    #[tokio::test]
    async fn progress_is_monotonic() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let progress = Arc::new(Progress::new(5).with_observer(move |done, total| {
            sink.lock().unwrap().push((done, total));
        }));
        TaskRunner::new(2)
            .run(units(5), |unit| async move { unit }, progress)
            .await;
        let seen = seen.lock().unwrap();
        assert_eq!(*seen, [(1, 5), (2, 5), (3, 5), (4, 5), (5, 5)]);
    }

    #[test]
    fn report_sorts_by_flight_date() {
        let unit_dates = units(3);
        let obs = |unit: &SearchUnit, airline: &str| FlightObservation {
            route: unit.route(),
            flight_date: unit.date,
            departure_time: "08:00".into(),
            arrival_time: None,
            price: None,
            airline: airline.into(),
            flight_weekday: "Sunday".into(),
            search_date: unit.date,
            search_time: chrono::NaiveTime::MIN,
            search_weekday: "Sunday".into(),
            origin_region: crate::reference_data::Region::Unknown,
            distance_km: crate::reference_data::Distance::Unavailable,
        };
        let report = CollectionReport::from_outcomes(vec![
            UnitOutcome::Observed(obs(&unit_dates[2], "A")),
            UnitOutcome::NotFound(unit_dates[1].clone()),
            UnitOutcome::Observed(obs(&unit_dates[0], "B")),
            UnitOutcome::Observed(obs(&unit_dates[2], "C")),
        ]);
        let order: Vec<_> = report.observations.iter().map(|o| o.airline.as_str()).collect();
        assert_eq!(order, ["B", "A", "C"]);
        assert_eq!(report.units(), 4);
    }
}
