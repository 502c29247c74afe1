use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info};

use super::AiError;
use crate::config::DEFAULT_AI_REQUESTS_PER_MINUTE;
use crate::retry::{retry_with_backoff, RetryPolicy};

/// Rate limit and retry settings for the gateway.
#[derive(Debug, Clone, Copy)]
pub struct GatewayConfig {
    /// Calls admitted per `window`
    pub budget: usize,
    pub window: Duration,
    /// Extra wait after the oldest call leaves the window
    pub buffer: Duration,
    pub retry: RetryPolicy,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            budget: DEFAULT_AI_REQUESTS_PER_MINUTE,
            window: Duration::from_secs(60),
            buffer: Duration::from_millis(100),
            retry: RetryPolicy::AI,
        }
    }
}

impl GatewayConfig {
    pub fn with_budget(budget: usize) -> Self {
        Self {
            budget: budget.max(1),
            ..Self::default()
        }
    }
}

/// Rolling-window admission log.
struct RateLimiter {
    budget: usize,
    window: Duration,
    buffer: Duration,
    timestamps: VecDeque<Instant>,
}

impl RateLimiter {
    fn new(config: &GatewayConfig) -> Self {
        Self {
            budget: config.budget.max(1),
            window: config.window,
            buffer: config.buffer,
            timestamps: VecDeque::new(),
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.timestamps.front() {
            if now.duration_since(*oldest) >= self.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// How long to wait before the next admission. None = admit now.
    fn wait_time(&mut self, now: Instant) -> Option<Duration> {
        self.prune(now);
        if self.timestamps.len() < self.budget {
            return None;
        }
        let oldest = *self.timestamps.front()?;
        let leaves_window = oldest + self.window;
        Some(leaves_window.saturating_duration_since(now) + self.buffer)
    }

    async fn acquire(&mut self) {
        loop {
            let now = Instant::now();
            match self.wait_time(now) {
                None => {
                    self.timestamps.push_back(now);
                    return;
                }
                Some(wait) => {
                    info!(
                        in_window = self.timestamps.len(),
                        wait_ms = wait.as_millis() as u64,
                        "AI rate limit reached, waiting"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}

type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Single choke point for calls to the AI service.
///
/// Calls are queued FIFO and dispatched one at a time by a worker task.
/// Before each dispatch the worker waits for room in the rate window. Each
/// attempt is bounded by the caller's timeout; transient failures are
/// retried with backoff, timeouts are not.
///
/// Cloning gives another handle to the same queue.
#[derive(Clone)]
pub struct AiGateway {
    jobs_tx: mpsc::UnboundedSender<Job>,
    queue_depth: Arc<AtomicUsize>,
    retry: RetryPolicy,
}

impl AiGateway {
    /// Spawn the worker on the current tokio runtime.
    pub fn start(config: GatewayConfig) -> Self {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let queue_depth = Arc::new(AtomicUsize::new(0));

        tokio::spawn(run_worker(
            jobs_rx,
            RateLimiter::new(&config),
            queue_depth.clone(),
        ));

        Self {
            jobs_tx,
            queue_depth,
            retry: config.retry,
        }
    }

    /// Calls waiting for admission.
    pub fn queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::SeqCst)
    }

    /// Queue a call and wait for its result.
    ///
    /// `request` is invoked once per attempt.
    pub async fn execute<T, F, Fut>(
        &self,
        label: &str,
        timeout: Duration,
        request: F,
    ) -> Result<T, AiError>
    where
        T: Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, AiError>> + Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        let label = label.to_string();
        let retry = self.retry;

        let job: Job = Box::new(move || {
            async move {
                let result = call_with_retry(&label, timeout, retry, request).await;
                let _ = result_tx.send(result);
            }
            .boxed()
        });

        let depth = self.queue_depth.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(queue_depth = depth, "AI request queued");

        if self.jobs_tx.send(job).is_err() {
            self.queue_depth.fetch_sub(1, Ordering::SeqCst);
            return Err(AiError::GatewayClosed);
        }

        result_rx.await.map_err(|_| AiError::GatewayClosed)?
    }
}

async fn call_with_retry<T, F, Fut>(
    label: &str,
    timeout: Duration,
    retry: RetryPolicy,
    request: F,
) -> Result<T, AiError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, AiError>>,
{
    retry_with_backoff(retry, label, || {
        let attempt = request();
        async move {
            match tokio::time::timeout(timeout, attempt).await {
                Ok(result) => result,
                Err(_) => Err(AiError::Timeout {
                    label: label.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                }),
            }
        }
    })
    .await
}

async fn run_worker(
    mut jobs_rx: mpsc::UnboundedReceiver<Job>,
    mut limiter: RateLimiter,
    queue_depth: Arc<AtomicUsize>,
) {
    while let Some(job) = jobs_rx.recv().await {
        limiter.acquire().await;
        let remaining = queue_depth.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        debug!(queue_depth = remaining, "AI request dispatched");
        job().await;
    }
    debug!("AI gateway worker stopped");
}
