//! Request-coalescing conversion scheduler.
//!
//! A single worker task owns the scheduling state and reacts to three
//! events: a new request, the end of the running conversion, and the
//! throttle timer. The states are
//!
//! `Idle -> Scheduled(request, deadline) -> Running(token) -> Idle`
//!
//! and a request may sit in `Scheduled` while another is still `Running`
//! after being told to cancel. At most one conversion runs at a time. A new
//! request replaces the scheduled one (which is rejected as superseded) and
//! cancels the running one (which is rejected as cancelled once it stops).
//! The next conversion starts no earlier than the throttle interval after
//! the previous one finished.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use image_processor::{ConversionOutput, ConvertError, PreprocessCache, Result};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;

use super::conversion::{ConversionBackend, ConversionJob};
use crate::config::AppConfig;

/// Timing knobs for the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Minimum gap between the end of one conversion and the start of the next.
    pub throttle_interval: Duration,
    /// Delay before the single retry of a capability failure.
    pub retry_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            throttle_interval: Duration::from_millis(100),
            retry_delay: Duration::from_millis(250),
        }
    }
}

impl From<&AppConfig> for SchedulerConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            throttle_interval: config.throttle_interval,
            retry_delay: config.retry_delay,
        }
    }
}

/// Externally visible scheduler phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    #[default]
    Idle,
    Scheduled,
    Running,
}

/// Counters of how requests settled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub state: SchedulerState,
    pub submitted: u64,
    pub completed: u64,
    pub superseded: u64,
    pub cancelled: u64,
    pub failed: u64,
    /// Requests whose handle was dropped before they could start.
    pub skipped: u64,
    pub retried: u64,
}

type Reply = oneshot::Sender<Result<ConversionOutput>>;

struct Submission {
    id: u64,
    job: Arc<ConversionJob>,
    reply: Reply,
}

enum Command {
    Submit(Submission),
    Shutdown(oneshot::Sender<()>),
}

struct Scheduled {
    submission: Submission,
    deadline: Instant,
}

struct Running {
    id: u64,
    token: CancellationToken,
    reply: Reply,
    started: Instant,
}

struct RunFinished {
    id: u64,
    result: Result<ConversionOutput>,
    cache: PreprocessCache,
    retried: bool,
}

/// Handle to one submitted request; resolves exactly once.
///
/// Dropping it is allowed: a request whose handle is gone is skipped if it
/// has not started yet.
#[derive(Debug)]
pub struct PendingConversion {
    id: u64,
    rx: oneshot::Receiver<Result<ConversionOutput>>,
}

impl PendingConversion {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Future for PendingConversion {
    type Output = Result<ConversionOutput>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // A dropped sender means the scheduler stopped before settling.
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(ConvertError::Cancelled)))
    }
}

/// Coalesces conversion requests onto a single background worker.
pub struct ConversionScheduler {
    tx: mpsc::UnboundedSender<Command>,
    stats: watch::Receiver<SchedulerStats>,
    next_id: AtomicU64,
}

impl ConversionScheduler {
    /// Start the worker task. Must be called from within a Tokio runtime.
    pub fn spawn(backend: Arc<dyn ConversionBackend>, config: SchedulerConfig) -> Self {
        let (tx, commands) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let (stats_tx, stats) = watch::channel(SchedulerStats::default());

        let worker = Worker {
            backend,
            config,
            scheduled: None,
            running: None,
            cache: Some(PreprocessCache::new()),
            last_finished: None,
            stats: stats_tx,
            done_tx,
        };
        tokio::spawn(worker.run(commands, done_rx));
        tracing::info!(
            throttle_ms = config.throttle_interval.as_millis() as u64,
            retry_delay_ms = config.retry_delay.as_millis() as u64,
            "Conversion scheduler started"
        );

        Self {
            tx,
            stats,
            next_id: AtomicU64::new(1),
        }
    }

    /// Queue `job`, superseding or cancelling whatever came before it.
    pub fn submit(&self, job: ConversionJob) -> PendingConversion {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply, rx) = oneshot::channel();
        tracing::debug!(id, kind = job.kind(), "Conversion requested");

        let submission = Submission {
            id,
            job: Arc::new(job),
            reply,
        };
        if self.tx.send(Command::Submit(submission)).is_err() {
            tracing::warn!(id, "Scheduler stopped, rejecting conversion request");
        }
        PendingConversion { id, rx }
    }

    /// Snapshot of the current state and counters.
    pub fn stats(&self) -> SchedulerStats {
        self.stats.borrow().clone()
    }

    /// Cancel the running conversion, reject the scheduled one and stop the
    /// worker. Requests submitted afterwards reject as cancelled.
    pub async fn shutdown(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Command::Shutdown(ack)).is_ok() {
            let _ = done.await;
        }
    }
}

struct Worker {
    backend: Arc<dyn ConversionBackend>,
    config: SchedulerConfig,
    scheduled: Option<Scheduled>,
    running: Option<Running>,
    /// `None` while the cache is lent to the running conversion.
    cache: Option<PreprocessCache>,
    last_finished: Option<Instant>,
    stats: watch::Sender<SchedulerStats>,
    done_tx: mpsc::UnboundedSender<RunFinished>,
}

impl Worker {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut done: mpsc::UnboundedReceiver<RunFinished>,
    ) {
        loop {
            // The timer is armed only while nothing is running.
            let deadline = match (&self.scheduled, &self.running) {
                (Some(scheduled), None) => Some(scheduled.deadline),
                _ => None,
            };

            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Submit(submission)) => self.on_submit(submission),
                    Some(Command::Shutdown(ack)) => {
                        self.stop();
                        let _ = ack.send(());
                        break;
                    }
                    None => {
                        self.stop();
                        break;
                    }
                },
                Some(finished) = done.recv() => self.on_finished(finished),
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.start_scheduled();
                }
            }
        }
        tracing::info!("Conversion scheduler stopped");
    }

    fn state(&self) -> SchedulerState {
        match (&self.running, &self.scheduled) {
            (Some(_), _) => SchedulerState::Running,
            (None, Some(_)) => SchedulerState::Scheduled,
            (None, None) => SchedulerState::Idle,
        }
    }

    /// Record counter changes and the current state in one update.
    fn publish(&self, update: impl FnOnce(&mut SchedulerStats)) {
        let state = self.state();
        self.stats.send_modify(|stats| {
            update(stats);
            stats.state = state;
        });
    }

    fn next_deadline(&self) -> Instant {
        match self.last_finished {
            Some(finished) => finished + self.config.throttle_interval,
            None => Instant::now(),
        }
    }

    fn on_submit(&mut self, submission: Submission) {
        if let Some(running) = &self.running {
            if !running.token.is_cancelled() {
                tracing::debug!(
                    running = running.id,
                    newer = submission.id,
                    "Cancelling in-flight conversion"
                );
                running.token.cancel();
            }
        }

        let (deadline, replaced) = match self.scheduled.take() {
            Some(old) => (old.deadline, Some(old.submission)),
            None => (self.next_deadline(), None),
        };
        self.scheduled = Some(Scheduled {
            submission,
            deadline,
        });

        let superseded = u64::from(replaced.is_some());
        self.publish(|stats| {
            stats.submitted += 1;
            stats.superseded += superseded;
        });
        if let Some(old) = replaced {
            tracing::debug!(id = old.id, "Conversion superseded before starting");
            let _ = old.reply.send(Err(ConvertError::Superseded));
        }
    }

    fn start_scheduled(&mut self) {
        let Some(Scheduled { submission, .. }) = self.scheduled.take() else {
            return;
        };
        if submission.reply.is_closed() {
            tracing::debug!(id = submission.id, "Caller dropped request, skipping");
            self.publish(|stats| stats.skipped += 1);
            return;
        }

        let token = CancellationToken::new();
        let cache = self.cache.take().unwrap_or_default();
        tracing::debug!(id = submission.id, kind = submission.job.kind(), "Starting conversion");

        tokio::spawn(run_job(
            submission.id,
            self.backend.clone(),
            submission.job,
            cache,
            token.clone(),
            self.config.retry_delay,
            self.done_tx.clone(),
        ));
        self.running = Some(Running {
            id: submission.id,
            token,
            reply: submission.reply,
            started: Instant::now(),
        });
        self.publish(|_| {});
    }

    fn on_finished(&mut self, finished: RunFinished) {
        let now = Instant::now();
        self.cache = Some(finished.cache);
        self.last_finished = Some(now);

        let Some(running) = self.running.take() else {
            tracing::warn!(id = finished.id, "Finished conversion has no owner");
            return;
        };
        if running.id != finished.id {
            tracing::warn!(
                expected = running.id,
                got = finished.id,
                "Finished conversion does not match the running one"
            );
        }
        if let Some(scheduled) = &mut self.scheduled {
            scheduled.deadline = now + self.config.throttle_interval;
        }

        let elapsed_ms = now.duration_since(running.started).as_millis() as u64;
        let retried = u64::from(finished.retried);
        let outcome = if running.token.is_cancelled() {
            // Whatever the pipeline produced is stale now.
            tracing::debug!(id = running.id, elapsed_ms, "Conversion cancelled");
            self.publish(|stats| {
                stats.cancelled += 1;
                stats.retried += retried;
            });
            Err(ConvertError::Cancelled)
        } else {
            match finished.result {
                Ok(output) => {
                    tracing::debug!(
                        id = running.id,
                        elapsed_ms,
                        width = output.image.width(),
                        height = output.image.height(),
                        "Conversion completed"
                    );
                    self.publish(|stats| {
                        stats.completed += 1;
                        stats.retried += retried;
                    });
                    Ok(output)
                }
                Err(e) => {
                    tracing::warn!(id = running.id, error = %e, "Conversion failed");
                    self.publish(|stats| {
                        stats.failed += 1;
                        stats.retried += retried;
                    });
                    Err(e)
                }
            }
        };
        let _ = running.reply.send(outcome);
    }

    fn stop(&mut self) {
        let running = self.running.take();
        let scheduled = self.scheduled.take();
        let cancelled = u64::from(running.is_some()) + u64::from(scheduled.is_some());
        self.publish(|stats| stats.cancelled += cancelled);

        if let Some(running) = running {
            running.token.cancel();
            let _ = running.reply.send(Err(ConvertError::Cancelled));
        }
        if let Some(scheduled) = scheduled {
            let _ = scheduled.submission.reply.send(Err(ConvertError::Cancelled));
        }
    }
}

/// Run one request, retrying a capability failure once, and report back.
async fn run_job(
    id: u64,
    backend: Arc<dyn ConversionBackend>,
    job: Arc<ConversionJob>,
    cache: PreprocessCache,
    token: CancellationToken,
    retry_delay: Duration,
    done: mpsc::UnboundedSender<RunFinished>,
) {
    let (mut result, mut cache) = attempt(backend.clone(), job.clone(), cache, token.clone()).await;
    let mut retried = false;

    let retry_reason = match &result {
        Err(e) if e.is_retryable() && !token.is_cancelled() => Some(e.to_string()),
        _ => None,
    };
    if let Some(reason) = retry_reason {
        tracing::warn!(
            id,
            error = %reason,
            delay_ms = retry_delay.as_millis() as u64,
            "Conversion failed, retrying once"
        );
        retried = true;
        let cancelled = tokio::select! {
            _ = token.cancelled() => true,
            _ = sleep(retry_delay) => false,
        };
        if cancelled {
            result = Err(ConvertError::Cancelled);
        } else {
            (result, cache) = attempt(backend, job, cache, token).await;
        }
    }

    // The worker is gone after shutdown; nothing left to report to.
    let _ = done.send(RunFinished {
        id,
        result,
        cache,
        retried,
    });
}

async fn attempt(
    backend: Arc<dyn ConversionBackend>,
    job: Arc<ConversionJob>,
    mut cache: PreprocessCache,
    token: CancellationToken,
) -> (Result<ConversionOutput>, PreprocessCache) {
    let joined = tokio::task::spawn_blocking(move || {
        let cancel = || token.is_cancelled();
        let result = backend.convert(&job, &mut cache, &cancel);
        (result, cache)
    })
    .await;

    match joined {
        Ok(pair) => pair,
        Err(e) => {
            tracing::error!(error = %e, "Conversion worker panicked");
            (
                Err(ConvertError::ExternalCapability {
                    stage: "worker",
                    code: -1,
                    message: e.to_string(),
                }),
                PreprocessCache::new(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;
    use image_processor::{CancelCheck, ConversionOptions, PrinterImage, SourceImage};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    /// Sleeps for `work` while polling cancellation, then pops the next
    /// scripted error or succeeds. The output encodes the threshold.
    struct FakeBackend {
        work: Duration,
        calls: AtomicUsize,
        starts: Mutex<Vec<(u8, std::time::Instant)>>,
        script: Mutex<VecDeque<ConvertError>>,
    }

    impl FakeBackend {
        fn new(work_ms: u64) -> Arc<Self> {
            Self::scripted(work_ms, Vec::new())
        }

        fn scripted(work_ms: u64, errors: Vec<ConvertError>) -> Arc<Self> {
            Arc::new(Self {
                work: Duration::from_millis(work_ms),
                calls: AtomicUsize::new(0),
                starts: Mutex::new(Vec::new()),
                script: Mutex::new(errors.into()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ConversionBackend for FakeBackend {
        fn convert(
            &self,
            job: &ConversionJob,
            _cache: &mut PreprocessCache,
            cancel: &dyn CancelCheck,
        ) -> Result<ConversionOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.starts
                .lock()
                .unwrap()
                .push((job.options.threshold, std::time::Instant::now()));

            for _ in 0..10 {
                if cancel.is_cancelled() {
                    return Err(ConvertError::Cancelled);
                }
                std::thread::sleep(self.work / 10);
            }
            if let Some(err) = self.script.lock().unwrap().pop_front() {
                return Err(err);
            }
            Ok(ConversionOutput {
                image: PrinterImage::from_bits(8, 1, vec![job.options.threshold]).unwrap(),
                adjusted_preview: RgbaImage::new(1, 1),
                filtered_preview: None,
            })
        }
    }

    fn job(threshold: u8) -> ConversionJob {
        ConversionJob::image(
            SourceImage::new(RgbaImage::new(1, 1)),
            384,
            ConversionOptions {
                threshold,
                ..Default::default()
            },
        )
    }

    fn capability_error() -> ConvertError {
        ConvertError::ExternalCapability {
            stage: "preprocess",
            code: -215,
            message: "empty image".into(),
        }
    }

    fn config(throttle_ms: u64, retry_ms: u64) -> SchedulerConfig {
        SchedulerConfig {
            throttle_interval: Duration::from_millis(throttle_ms),
            retry_delay: Duration::from_millis(retry_ms),
        }
    }

    #[tokio::test]
    async fn single_request_completes() {
        let backend = FakeBackend::new(10);
        let scheduler = ConversionScheduler::spawn(backend.clone(), config(100, 10));

        let out = scheduler.submit(job(42)).await.unwrap();
        assert_eq!(out.image.bits(), &[42]);
        assert_eq!(backend.calls(), 1);

        let stats = scheduler.stats();
        assert_eq!(stats.submitted, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.state, SchedulerState::Idle);
    }

    #[tokio::test]
    async fn burst_of_requests_coalesces_to_latest() {
        let backend = FakeBackend::new(40);
        let scheduler = ConversionScheduler::spawn(backend.clone(), config(100, 10));

        let mut pending = Vec::new();
        for threshold in 0..10u8 {
            pending.push(scheduler.submit(job(threshold)));
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let mut results = Vec::new();
        for p in pending {
            results.push(p.await);
        }

        let last = results.pop().unwrap().unwrap();
        assert_eq!(last.image.bits(), &[9]);

        let completed = results.iter().filter(|r| r.is_ok()).count() + 1;
        assert!(completed <= 2, "{completed} conversions completed");
        for (i, result) in results.iter().enumerate().skip(1) {
            assert!(
                matches!(
                    result,
                    Err(ConvertError::Superseded) | Err(ConvertError::Cancelled)
                ),
                "request {i} settled with {result:?}"
            );
        }
        assert!(backend.calls() <= 2);

        let stats = scheduler.stats();
        assert_eq!(stats.submitted, 10);
        assert_eq!(stats.completed + stats.superseded + stats.cancelled, 10);
    }

    #[tokio::test]
    async fn next_run_waits_for_throttle_interval() {
        let backend = FakeBackend::new(10);
        let scheduler = ConversionScheduler::spawn(backend.clone(), config(100, 10));

        scheduler.submit(job(1)).await.unwrap();
        scheduler.submit(job(2)).await.unwrap();

        let starts = backend.starts.lock().unwrap().clone();
        assert_eq!(starts.len(), 2);
        let gap = starts[1].1.duration_since(starts[0].1);
        assert!(gap >= Duration::from_millis(100), "gap was {gap:?}");
    }

    #[tokio::test]
    async fn capability_failure_is_retried_once() {
        let backend = FakeBackend::scripted(5, vec![capability_error()]);
        let scheduler = ConversionScheduler::spawn(backend.clone(), config(0, 20));

        let out = scheduler.submit(job(7)).await.unwrap();
        assert_eq!(out.image.bits(), &[7]);
        assert_eq!(backend.calls(), 2);

        let stats = scheduler.stats();
        assert_eq!(stats.retried, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn second_capability_failure_rejects() {
        let backend = FakeBackend::scripted(5, vec![capability_error(), capability_error()]);
        let scheduler = ConversionScheduler::spawn(backend.clone(), config(0, 20));

        let err = scheduler.submit(job(7)).await.unwrap_err();
        assert_eq!(err, capability_error());
        assert!(err.is_user_visible());
        assert_eq!(backend.calls(), 2);
        assert_eq!(scheduler.stats().failed, 1);
    }

    #[tokio::test]
    async fn validation_error_is_not_retried() {
        let invalid = ConvertError::Validation("output width must be a multiple of 8".into());
        let backend = FakeBackend::scripted(5, vec![invalid.clone()]);
        let scheduler = ConversionScheduler::spawn(backend.clone(), config(0, 20));

        assert_eq!(scheduler.submit(job(7)).await.unwrap_err(), invalid);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn request_during_run_cancels_it() {
        let backend = FakeBackend::new(200);
        let scheduler = ConversionScheduler::spawn(backend.clone(), config(20, 10));

        let first = scheduler.submit(job(1));
        tokio::time::sleep(Duration::from_millis(30)).await;
        let second = scheduler.submit(job(2));

        assert_eq!(first.await.unwrap_err(), ConvertError::Cancelled);
        assert_eq!(second.await.unwrap().image.bits(), &[2]);
        assert_eq!(backend.calls(), 2);
        assert_eq!(scheduler.stats().cancelled, 1);
    }

    #[tokio::test]
    async fn shutdown_rejects_running_and_scheduled() {
        let backend = FakeBackend::new(200);
        let scheduler = ConversionScheduler::spawn(backend.clone(), config(20, 10));

        let running = scheduler.submit(job(1));
        tokio::time::sleep(Duration::from_millis(30)).await;
        let scheduled = scheduler.submit(job(2));
        scheduler.shutdown().await;

        assert_eq!(running.await.unwrap_err(), ConvertError::Cancelled);
        assert_eq!(scheduled.await.unwrap_err(), ConvertError::Cancelled);
        assert_eq!(
            scheduler.submit(job(3)).await.unwrap_err(),
            ConvertError::Cancelled
        );
        assert_eq!(scheduler.stats().cancelled, 2);
    }

    #[tokio::test]
    async fn dropped_request_is_skipped() {
        let backend = FakeBackend::new(50);
        let scheduler = ConversionScheduler::spawn(backend.clone(), config(100, 10));

        let first = scheduler.submit(job(1));
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(scheduler.submit(job(2)));
        // The first run is cancelled by the second request, which nobody awaits.
        assert_eq!(first.await.unwrap_err(), ConvertError::Cancelled);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(backend.calls(), 1);
        let stats = scheduler.stats();
        assert_eq!(stats.state, SchedulerState::Idle);
        assert_eq!(stats.skipped, 1);
        assert_eq!(
            stats.completed + stats.superseded + stats.cancelled + stats.failed + stats.skipped,
            stats.submitted
        );
    }
}
