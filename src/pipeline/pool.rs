//! Bounded page-job pool.
//!
//! [`JobPool::run`] admits jobs in index order, keeps at most `limit` of them
//! in flight, and returns one [`PageResult`] per job in completion order.
//! Workers are blocking closures (pdfium calls, image codecs, subprocesses)
//! and run on tokio's blocking thread pool via `spawn_blocking`, the same way
//! the renderer stage has always been kept off the async workers.
//!
//! A worker's error or panic is captured as [`PageResult::Failed`]; it never
//! aborts sibling jobs. Deciding whether a failure aborts the request is the
//! assembler's job.
//!
//! Each request builds its own pool, so one request's ceiling never starves
//! another's.

use crate::error::{ConvertError, PageError};
use crate::output::{EncodedPage, PageResult};
use crate::progress::ProgressCallback;
use futures::future;
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// One unit of work: a page or an image, tagged with its final position.
#[derive(Debug, Clone)]
pub struct PageJob<S> {
    /// 0-based ordinal; assigned at creation, never reassigned.
    pub index: usize,
    pub source: S,
}

impl<S> PageJob<S> {
    /// Number a sequence of sources 0, 1, 2, … in the order given.
    pub fn sequence(sources: impl IntoIterator<Item = S>) -> Vec<PageJob<S>> {
        sources
            .into_iter()
            .enumerate()
            .map(|(index, source)| PageJob { index, source })
            .collect()
    }
}

/// Cooperative cancellation shared between a request and its job pool.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop admitting jobs. In-flight jobs still run to completion.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`CancelToken::cancel`] has been called.
    pub async fn cancelled(&self) {
        loop {
            // Registered before the flag check so a concurrent cancel is not missed.
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// A concurrency ceiling for one direction of one request.
#[derive(Debug, Clone, Copy)]
pub struct JobPool {
    label: &'static str,
    limit: usize,
}

impl JobPool {
    /// `label` names the pool in logs; `limit` is clamped to at least 1.
    pub fn new(label: &'static str, limit: usize) -> Self {
        Self {
            label,
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Run every job through `worker`, at most `limit` at a time.
    ///
    /// Returns exactly one result per job, in completion order. Once `cancel`
    /// fires no further job is admitted; jobs already in flight run to
    /// completion, their results are discarded, and
    /// [`ConvertError::Cancelled`] is returned. Nothing a worker started is
    /// still running when this returns.
    pub async fn run<S, W>(
        &self,
        jobs: Vec<PageJob<S>>,
        worker: W,
        cancel: &CancelToken,
        progress: Option<&ProgressCallback>,
    ) -> Result<Vec<PageResult>, ConvertError>
    where
        S: Send + 'static,
        W: Fn(PageJob<S>) -> Result<EncodedPage, PageError> + Send + Sync + 'static,
    {
        let total = jobs.len();
        info!(
            "{} pool: {} jobs, ceiling {}",
            self.label, total, self.limit
        );
        if let Some(cb) = progress {
            cb.on_conversion_start(total);
        }

        let worker = Arc::new(worker);
        let admission = cancel.clone();
        let mut completions = stream::iter(jobs)
            .take_while(move |_| future::ready(!admission.is_cancelled()))
            .map(|job| {
                let worker = Arc::clone(&worker);
                let progress = progress.cloned();
                async move {
                    let index = job.index;
                    if let Some(ref cb) = progress {
                        cb.on_page_start(index + 1, total);
                    }
                    let result = run_job(worker, job).await;
                    if let Some(ref cb) = progress {
                        match &result {
                            PageResult::Ok(page) => {
                                cb.on_page_complete(index + 1, total, page.bytes.len())
                            }
                            PageResult::Failed { cause, .. } => {
                                cb.on_page_error(index + 1, total, &cause.to_string())
                            }
                        }
                    }
                    result
                }
            })
            .buffer_unordered(self.limit);

        let mut results = Vec::with_capacity(total);
        let mut cancelled_at = None;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled(), if cancelled_at.is_none() => {
                    warn!(
                        "{} pool cancelled after {}/{} jobs, draining in-flight jobs",
                        self.label,
                        results.len(),
                        total
                    );
                    cancelled_at = Some(results.len());
                }
                next = completions.next() => match next {
                    Some(result) if cancelled_at.is_none() => results.push(result),
                    Some(_) => {}
                    None => break,
                },
            }
        }

        if let Some(completed) = cancelled_at {
            return Err(ConvertError::Cancelled { completed, total });
        }
        // Admission stopped early but the stream drained before the select saw it.
        if results.len() < total {
            return Err(ConvertError::Cancelled {
                completed: results.len(),
                total,
            });
        }

        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        debug!(
            "{} pool drained: {}/{} succeeded",
            self.label, succeeded, total
        );
        if let Some(cb) = progress {
            cb.on_conversion_complete(total, succeeded);
        }
        Ok(results)
    }
}

/// Execute one job on the blocking pool, capturing errors and panics.
async fn run_job<S, W>(worker: Arc<W>, job: PageJob<S>) -> PageResult
where
    S: Send + 'static,
    W: Fn(PageJob<S>) -> Result<EncodedPage, PageError> + Send + Sync + 'static,
{
    let index = job.index;
    match tokio::task::spawn_blocking(move || worker(job)).await {
        Ok(Ok(page)) => PageResult::Ok(page),
        Ok(Err(cause)) => {
            warn!("{}", cause);
            PageResult::Failed { index, cause }
        }
        Err(join_err) => {
            let cause = PageError::WorkerPanicked {
                index,
                detail: join_err.to_string(),
            };
            warn!("{}", cause);
            PageResult::Failed { index, cause }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::Encoding;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn encoded(index: usize) -> EncodedPage {
        EncodedPage {
            index,
            width: 1,
            height: 1,
            bytes: vec![0; index + 1],
            encoding: Encoding::Png,
        }
    }

    #[tokio::test]
    async fn one_result_per_job() {
        let pool = JobPool::new("test", 3);
        let jobs = PageJob::sequence(0..10usize);
        let results = pool
            .run(jobs, |job| Ok(encoded(job.index)), &CancelToken::new(), None)
            .await
            .unwrap();

        let mut indices: Vec<_> = results.iter().map(PageResult::index).collect();
        indices.sort_unstable();
        assert_eq!(indices, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn in_flight_jobs_never_exceed_ceiling() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (a, p) = (Arc::clone(&active), Arc::clone(&peak));

        let results = JobPool::new("test", 5)
            .run(
                PageJob::sequence(0..50usize),
                move |job| {
                    let now = a.fetch_add(1, Ordering::SeqCst) + 1;
                    p.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(5));
                    a.fetch_sub(1, Ordering::SeqCst);
                    Ok(encoded(job.index))
                },
                &CancelToken::new(),
                None,
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 50);
        let peak = peak.load(Ordering::SeqCst);
        assert!(peak <= 5, "peak concurrency {peak}");
        assert!(peak >= 2, "pool never overlapped jobs");
    }

    #[tokio::test]
    async fn progress_events_fire_per_job() {
        use crate::progress::ConversionProgressCallback;

        #[derive(Default)]
        struct Counter {
            completed: AtomicUsize,
            failed: AtomicUsize,
            finished: AtomicUsize,
        }
        impl ConversionProgressCallback for Counter {
            fn on_page_complete(&self, _: usize, _: usize, _: usize) {
                self.completed.fetch_add(1, Ordering::SeqCst);
            }
            fn on_page_error(&self, _: usize, _: usize, _: &str) {
                self.failed.fetch_add(1, Ordering::SeqCst);
            }
            fn on_conversion_complete(&self, _: usize, success: usize) {
                self.finished.store(success, Ordering::SeqCst);
            }
        }

        let counter = Arc::new(Counter::default());
        let cb: ProgressCallback = counter.clone();
        JobPool::new("test", 2)
            .run(
                PageJob::sequence(0..5usize),
                |job| {
                    if job.index == 4 {
                        return Err(PageError::Decode {
                            index: 4,
                            detail: "bad".into(),
                        });
                    }
                    Ok(encoded(job.index))
                },
                &CancelToken::new(),
                Some(&cb),
            )
            .await
            .unwrap();

        assert_eq!(counter.completed.load(Ordering::SeqCst), 4);
        assert_eq!(counter.failed.load(Ordering::SeqCst), 1);
        assert_eq!(counter.finished.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn errors_and_panics_are_captured() {
        let pool = JobPool::new("test", 2);
        let jobs = PageJob::sequence(0..4usize);
        let results = pool
            .run(
                jobs,
                |job| match job.index {
                    1 => Err(PageError::Render {
                        index: 1,
                        detail: "broken".into(),
                    }),
                    2 => panic!("worker fault"),
                    i => Ok(encoded(i)),
                },
                &CancelToken::new(),
                None,
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 4);
        let panicked = results.iter().find(|r| r.index() == 2).unwrap();
        assert!(matches!(
            panicked,
            PageResult::Failed {
                cause: PageError::WorkerPanicked { index: 2, .. },
                ..
            }
        ));
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 2);
    }

    #[tokio::test]
    async fn admission_follows_index_order() {
        let admitted = Arc::new(std::sync::Mutex::new(Vec::new()));
        let log = Arc::clone(&admitted);
        let pool = JobPool::new("test", 1);
        pool.run(
            PageJob::sequence(0..6usize),
            move |job| {
                log.lock().unwrap().push(job.index);
                Ok(encoded(job.index))
            },
            &CancelToken::new(),
            None,
        )
        .await
        .unwrap();
        assert_eq!(*admitted.lock().unwrap(), vec![0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn cancelled_before_start_admits_nothing() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let err = JobPool::new("test", 4)
            .run(
                PageJob::sequence(0..8usize),
                move |job| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(encoded(job.index))
                },
                &cancel,
                None,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ConvertError::Cancelled { completed: 0, total: 8 }));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancellation_mid_run_waits_for_in_flight_jobs() {
        let cancel = CancelToken::new();
        let started = Arc::new(AtomicUsize::new(0));
        let active = Arc::new(AtomicUsize::new(0));
        let (counter, running) = (Arc::clone(&started), Arc::clone(&active));
        let trigger = cancel.clone();

        let err = JobPool::new("test", 2)
            .run(
                PageJob::sequence(0..20usize),
                move |job| {
                    running.fetch_add(1, Ordering::SeqCst);
                    if counter.fetch_add(1, Ordering::SeqCst) == 3 {
                        trigger.cancel();
                    }
                    std::thread::sleep(Duration::from_millis(30));
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(encoded(job.index))
                },
                &cancel,
                None,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ConvertError::Cancelled { total: 20, .. }));
        assert_eq!(active.load(Ordering::SeqCst), 0, "a job outlived run()");
        let started = started.load(Ordering::SeqCst);
        assert!(started <= 5, "started {started}");
    }

    #[tokio::test]
    async fn cancel_token_wakes_waiters() {
        let cancel = CancelToken::new();
        let waiter = cancel.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });
        tokio::task::yield_now().await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[test]
    fn limit_is_at_least_one() {
        assert_eq!(JobPool::new("test", 0).limit(), 1);
    }
}
