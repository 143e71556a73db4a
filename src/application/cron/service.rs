//! Interval-driven job scheduler
//!
//! One timer checks every enabled job each interval. Due jobs are spawned, never awaited, so a
//! slow job delays neither its siblings nor the next check.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use super::schedule::Schedule;
use crate::application::errors::CronError;
use crate::application::supervisor::spawn_supervised;
use crate::domain::entities::HandlerResult;

pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Source of "now"; swapped out in tests
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> JobHandler for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn run(&self) -> HandlerResult {
        (self)().await
    }
}

struct JobEntry {
    module_id: String,
    schedule: Schedule,
    enabled: bool,
    last_run: Option<DateTime<Utc>>,
    next_run: DateTime<Utc>,
    handler: Arc<dyn JobHandler>,
}

/// Snapshot of a registered job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    /// `module_id:job_id`
    pub key: String,
    pub module_id: String,
    pub schedule: Schedule,
    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: DateTime<Utc>,
}

struct CronInner {
    jobs: Mutex<BTreeMap<String, JobEntry>>,
    interval: Duration,
    clock: Clock,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

/// Cloneable handle to a shared scheduler
#[derive(Clone)]
pub struct CronService {
    inner: Arc<CronInner>,
}

impl Default for CronService {
    fn default() -> Self {
        Self::new(DEFAULT_CHECK_INTERVAL)
    }
}

impl CronService {
    pub fn new(interval: Duration) -> Self {
        Self::with_clock(interval, Arc::new(Utc::now))
    }

    /// A zero `interval` falls back to the default check interval
    pub fn with_clock(interval: Duration, clock: Clock) -> Self {
        let interval = if interval.is_zero() {
            warn!(
                "Cron check interval must be positive, using {}s",
                DEFAULT_CHECK_INTERVAL.as_secs()
            );
            DEFAULT_CHECK_INTERVAL
        } else {
            interval
        };
        Self {
            inner: Arc::new(CronInner {
                jobs: Mutex::new(BTreeMap::new()),
                interval,
                clock,
                ticker: Mutex::new(None),
            }),
        }
    }

    pub fn job_key(module_id: &str, job_id: &str) -> String {
        format!("{}:{}", module_id, job_id)
    }

    /// Register a job under `module_id:job_id`, replacing any job with that key
    pub fn register_job<F, Fut>(
        &self,
        module_id: &str,
        job_id: &str,
        schedule: Schedule,
        handler: F,
    ) -> Result<String, CronError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register_handler(module_id, job_id, schedule, Arc::new(handler))
    }

    pub fn register_handler(
        &self,
        module_id: &str,
        job_id: &str,
        schedule: Schedule,
        handler: Arc<dyn JobHandler>,
    ) -> Result<String, CronError> {
        let key = Self::job_key(module_id, job_id);
        let next_run = schedule.next_after(self.now())?;

        let entry = JobEntry {
            module_id: module_id.to_string(),
            schedule,
            enabled: true,
            last_run: None,
            next_run,
            handler,
        };
        if self.jobs().insert(key.clone(), entry).is_some() {
            warn!("Cron job {} was registered twice, replacing it", key);
        }
        debug!("Registered cron job {} (next run {})", key, next_run);
        Ok(key)
    }

    pub fn unregister_job(&self, key: &str) -> bool {
        self.jobs().remove(key).is_some()
    }

    /// Drop every job owned by a module
    pub fn unregister_all_for_module(&self, module_id: &str) -> usize {
        let mut jobs = self.jobs();
        let before = jobs.len();
        jobs.retain(|_, job| job.module_id != module_id);
        let removed = before - jobs.len();
        if removed > 0 {
            debug!("Removed {} cron job(s) of module {}", removed, module_id);
        }
        removed
    }

    pub fn set_job_enabled(&self, key: &str, enabled: bool) -> Result<(), CronError> {
        let mut jobs = self.jobs();
        let job = jobs
            .get_mut(key)
            .ok_or_else(|| CronError::UnknownJob(key.to_string()))?;
        job.enabled = enabled;
        Ok(())
    }

    /// Run every due job. Each due job's next run is advanced before it starts.
    pub fn tick(&self) -> Vec<JoinHandle<()>> {
        let now = self.now();
        let due: Vec<(String, Arc<dyn JobHandler>)> = {
            let mut jobs = self.jobs();
            jobs.iter_mut()
                .filter(|(_, job)| job.enabled && job.next_run <= now)
                .map(|(key, job)| {
                    job.last_run = Some(now);
                    match job.schedule.next_after(now) {
                        Ok(next) => job.next_run = next,
                        Err(e) => {
                            warn!("Cannot reschedule cron job {}: {}", key, e);
                            job.enabled = false;
                        }
                    }
                    (key.clone(), Arc::clone(&job.handler))
                })
                .collect()
        };

        if !due.is_empty() {
            trace!("{} cron job(s) due", due.len());
        }
        due.into_iter()
            .map(|(key, handler)| Self::spawn_job(key, handler))
            .collect()
    }

    /// Run a job immediately without touching its schedule
    pub fn run_job_now(&self, key: &str) -> Result<JoinHandle<()>, CronError> {
        let now = self.now();
        let handler = {
            let mut jobs = self.jobs();
            let job = jobs
                .get_mut(key)
                .ok_or_else(|| CronError::UnknownJob(key.to_string()))?;
            job.last_run = Some(now);
            Arc::clone(&job.handler)
        };
        Ok(Self::spawn_job(key.to_string(), handler))
    }

    fn spawn_job(key: String, handler: Arc<dyn JobHandler>) -> JoinHandle<()> {
        debug!("Running cron job {}", key);
        spawn_supervised(format!("Cron job {}", key), async move { handler.run().await })
    }

    /// Start the check timer. Calling it twice has no effect.
    pub fn start(&self) {
        let mut ticker = self.inner.ticker.lock().unwrap_or_else(|e| e.into_inner());
        if ticker.as_ref().map(|t| !t.is_finished()).unwrap_or(false) {
            warn!("Cron service already running");
            return;
        }

        let weak: Weak<CronInner> = Arc::downgrade(&self.inner);
        let period = self.inner.interval;
        *ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                CronService { inner }.tick();
            }
        }));
        info!("Cron service started, checking every {}s", period.as_secs());
    }

    pub fn stop(&self) {
        let handle = self.inner.ticker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            handle.abort();
            info!("Cron service stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .ticker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }

    pub fn list_jobs(&self) -> Vec<JobInfo> {
        self.jobs()
            .iter()
            .map(|(key, job)| JobInfo {
                key: key.clone(),
                module_id: job.module_id.clone(),
                schedule: job.schedule.clone(),
                enabled: job.enabled,
                last_run: job.last_run,
                next_run: job.next_run,
            })
            .collect()
    }

    pub fn job(&self, key: &str) -> Option<JobInfo> {
        self.list_jobs().into_iter().find(|j| j.key == key)
    }

    pub fn module_job_count(&self, module_id: &str) -> usize {
        self.jobs().values().filter(|j| j.module_id == module_id).count()
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    fn now(&self) -> DateTime<Utc> {
        (self.inner.clock)()
    }

    fn jobs(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, JobEntry>> {
        self.inner.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::errors::HandlerError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ManualClock(Arc<Mutex<DateTime<Utc>>>);

    impl ManualClock {
        fn at(s: &str) -> Self {
            let t = DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc);
            Self(Arc::new(Mutex::new(t)))
        }

        fn clock(&self) -> Clock {
            let now = Arc::clone(&self.0);
            Arc::new(move || *now.lock().unwrap())
        }

        fn set(&self, s: &str) {
            *self.0.lock().unwrap() = DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc);
        }
    }

    fn counting(
        counter: &Arc<AtomicUsize>,
    ) -> impl Fn() -> futures::future::Ready<HandlerResult> + Send + Sync + 'static {
        let counter = Arc::clone(counter);
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(Ok(()))
        }
    }

    async fn settle(handles: Vec<JoinHandle<()>>) -> usize {
        let count = handles.len();
        for handle in handles {
            handle.await.unwrap();
        }
        count
    }

    #[tokio::test]
    async fn test_daily_registered_before_midnight() {
        let clock = ManualClock::at("2024-03-05T23:59:00Z");
        let cron = CronService::with_clock(DEFAULT_CHECK_INTERVAL, clock.clock());
        let runs = Arc::new(AtomicUsize::new(0));

        let key = cron.register_job("daily", "reset", Schedule::Daily, counting(&runs)).unwrap();
        assert_eq!(key, "daily:reset");
        assert_eq!(cron.job(&key).unwrap().next_run.to_rfc3339(), "2024-03-06T00:00:00+00:00");

        assert_eq!(settle(cron.tick()).await, 0);

        clock.set("2024-03-06T00:00:30Z");
        assert_eq!(settle(cron.tick()).await, 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        let info = cron.job(&key).unwrap();
        assert_eq!(info.next_run.to_rfc3339(), "2024-03-07T00:00:00+00:00");
        assert!(info.last_run.is_some());
    }

    #[tokio::test]
    async fn test_failing_job_runs_once_per_interval() {
        let clock = ManualClock::at("2024-03-05T10:00:30Z");
        let cron = CronService::with_clock(DEFAULT_CHECK_INTERVAL, clock.clock());
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);

        cron.register_job("flaky", "sync", Schedule::Minutely, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(HandlerError::failed("upstream down"))
            }
        })
        .unwrap();

        clock.set("2024-03-05T10:01:10Z");
        settle(cron.tick()).await;
        settle(cron.tick()).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(
            cron.job("flaky:sync").unwrap().next_run.to_rfc3339(),
            "2024-03-05T10:02:00+00:00"
        );

        clock.set("2024-03-05T10:02:00Z");
        settle(cron.tick()).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_disabled_and_unregistered_jobs() {
        let clock = ManualClock::at("2024-03-05T10:00:30Z");
        let cron = CronService::with_clock(DEFAULT_CHECK_INTERVAL, clock.clock());
        let runs = Arc::new(AtomicUsize::new(0));

        cron.register_job("stats", "flush", Schedule::Minutely, counting(&runs)).unwrap();
        cron.register_job("stats", "report", Schedule::Hourly, counting(&runs)).unwrap();
        cron.register_job("other", "flush", Schedule::Minutely, counting(&runs)).unwrap();

        cron.set_job_enabled("stats:flush", false).unwrap();
        assert_eq!(
            cron.set_job_enabled("stats:missing", false),
            Err(CronError::UnknownJob("stats:missing".into()))
        );

        clock.set("2024-03-05T10:01:00Z");
        assert_eq!(settle(cron.tick()).await, 1);

        assert_eq!(cron.unregister_all_for_module("stats"), 2);
        assert_eq!(cron.module_job_count("stats"), 0);
        assert_eq!(cron.list_jobs().len(), 1);
    }

    #[tokio::test]
    async fn test_run_job_now() {
        let cron = CronService::default();
        let runs = Arc::new(AtomicUsize::new(0));
        let key = cron.register_job("m", "j", Schedule::Weekly, counting(&runs)).unwrap();
        let next = cron.job(&key).unwrap().next_run;

        cron.run_job_now(&key).unwrap().await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(cron.job(&key).unwrap().next_run, next);
        assert!(cron.run_job_now("m:nope").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_drives_ticks() {
        let clock = ManualClock::at("2024-03-05T10:00:30Z");
        let cron = CronService::with_clock(Duration::from_secs(60), clock.clock());
        let runs = Arc::new(AtomicUsize::new(0));
        cron.register_job("m", "j", Schedule::Minutely, counting(&runs)).unwrap();

        cron.start();
        cron.start();
        assert!(cron.is_running());

        clock.set("2024-03-05T10:01:00Z");
        tokio::time::sleep(Duration::from_secs(61)).await;
        // Let the spawned job finish
        tokio::task::yield_now().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        cron.stop();
        assert!(!cron.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_falls_back_to_default() {
        let cron = CronService::new(Duration::ZERO);
        assert_eq!(cron.interval(), DEFAULT_CHECK_INTERVAL);

        cron.start();
        tokio::task::yield_now().await;
        assert!(cron.is_running());
        cron.stop();
    }
}
