//! Poll a single object until a condition holds.
//!
//! Each iteration spawns one poll and races it against the session deadline
//! and the cancellation token. A poll that loses the race keeps running in the
//! background; its result is discarded.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use kube::api::Api;
use kube::core::DynamicObject;
use metrics::{counter, histogram};
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{RetryError, WatchError};

pub type PollFn = Arc<dyn Fn() -> BoxFuture<'static, Result<DynamicObject, kube::Error>> + Send + Sync>;

fn poll_interval() -> Duration {
    let ms = std::env::var("KSYNC_POLL_INTERVAL_MS").ok().and_then(|s| s.parse().ok()).unwrap_or(500);
    Duration::from_millis(ms)
}

fn poll_jitter_pct() -> u32 {
    std::env::var("KSYNC_POLL_JITTER_PCT").ok().and_then(|s| s.parse().ok()).unwrap_or(20)
}

enum Step<T> {
    Done(T),
    Continue(Option<DynamicObject>),
    Fail(WatchError),
}

pub struct ObjectWatcher {
    cancel: CancellationToken,
    name: String,
    poll: PollFn,
    interval: Duration,
    jitter_pct: u32,
}

impl ObjectWatcher {
    /// Watch `name` through `api`; poll failures are logged at debug level.
    pub fn for_object(cancel: CancellationToken, api: Api<DynamicObject>, name: impl Into<String>) -> Self {
        let name = name.into();
        let target = name.clone();
        Self::with_poll(cancel, name, move || {
            let api = api.clone();
            let target = target.clone();
            async move {
                api.get(&target).await.map_err(|e| {
                    debug!(name = %target, error = %e, "poll failed");
                    e
                })
            }
        })
    }

    pub fn with_poll<F, Fut>(cancel: CancellationToken, name: impl Into<String>, poll: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<DynamicObject, kube::Error>> + Send + 'static,
    {
        Self {
            cancel,
            name: name.into(),
            poll: Arc::new(move || poll().boxed()),
            interval: poll_interval(),
            jitter_pct: poll_jitter_pct(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_jitter_pct(mut self, pct: u32) -> Self {
        self.jitter_pct = pct;
        self
    }

    pub fn name(&self) -> &str { &self.name }

    /// Poll until `pred` holds. A poll error ends the session.
    pub async fn watch_until<P>(&self, mut pred: P, timeout: Duration) -> Result<DynamicObject, WatchError>
    where
        P: FnMut(&DynamicObject) -> bool + Send,
    {
        self.run(timeout, |res| match res {
            Err(source) => Step::Fail(WatchError::Poll { name: self.name.clone(), source }),
            Ok(obj) if pred(&obj) => Step::Done(obj),
            Ok(obj) => Step::Continue(Some(obj)),
        })
        .await
    }

    /// Poll until `retry` accepts the outcome. Retryable verdicts keep polling;
    /// any other error ends the session.
    pub async fn retry_until<R>(&self, mut retry: R, timeout: Duration) -> Result<Option<DynamicObject>, WatchError>
    where
        R: FnMut(Option<&DynamicObject>, Option<&kube::Error>) -> Result<(), RetryError> + Send,
    {
        self.run(timeout, |res| {
            let verdict = match &res {
                Ok(obj) => retry(Some(obj), None),
                Err(e) => retry(None, Some(e)),
            };
            let obj = res.ok();
            match verdict {
                Ok(()) => Step::Done(obj),
                Err(e) if e.retryable => {
                    debug!(name = %self.name, reason = %e, "retrying");
                    Step::Continue(obj)
                }
                Err(source) => Step::Fail(WatchError::Retry { name: self.name.clone(), source }),
            }
        })
        .await
    }

    async fn run<T, U>(&self, timeout: Duration, mut until: U) -> Result<T, WatchError>
    where
        U: FnMut(Result<DynamicObject, kube::Error>) -> Step<T>,
    {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut last: Option<DynamicObject> = None;
        let mut polls = 0u64;
        loop {
            let attempt = tokio::spawn((self.poll)());
            polls += 1;
            counter!("watch_polls_total", 1u64);
            let res = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(self.cancelled(last)),
                _ = sleep_until(deadline) => return Err(self.timed_out(last, polls)),
                joined = attempt => joined.map_err(|source| WatchError::Join { name: self.name.clone(), source })?,
            };
            match until(res) {
                Step::Done(v) => {
                    histogram!("watch_session_ms", started.elapsed().as_secs_f64() * 1000.0);
                    debug!(name = %self.name, polls, "watch condition met");
                    return Ok(v);
                }
                Step::Fail(e) => return Err(e),
                Step::Continue(obj) => {
                    if obj.is_some() {
                        last = obj;
                    }
                }
            }
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(self.cancelled(last)),
                _ = sleep_until(deadline) => return Err(self.timed_out(last, polls)),
                _ = sleep(self.pause()) => {}
            }
        }
    }

    /// Base interval plus up to `jitter_pct` percent.
    fn pause(&self) -> Duration {
        let spread = self.jitter_pct as f64 / 100.0 * rand::random::<f64>();
        self.interval + self.interval.mul_f64(spread)
    }

    fn timed_out(&self, last: Option<DynamicObject>, polls: u64) -> WatchError {
        counter!("watch_timeouts_total", 1u64);
        debug!(name = %self.name, polls, "watch timed out");
        WatchError::Timeout { name: self.name.clone(), object: last.map(Box::new) }
    }

    fn cancelled(&self, last: Option<DynamicObject>) -> WatchError {
        counter!("watch_cancellations_total", 1u64);
        WatchError::Cancelled { name: self.name.clone(), object: last.map(Box::new) }
    }
}
