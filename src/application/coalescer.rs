//! Request Coalescer
//!
//! Serializes upstream calls per logical endpoint and deduplicates
//! concurrent requests for the same resource.
//!
//! ```text
//! submit(endpoint, key, op)
//!     → in-flight map: key already running? attach and wait
//!     → otherwise enqueue on the endpoint's FIFO queue
//!
//! drain (one task per endpoint queue, started on demand)
//!     → circuit breaker   refused      → fail with CircuitOpen
//!                         (only the half-open trial skips this on its retries)
//!     → rate limiter      wait         → sleep, re-check
//!     → execute operation, reconcile limiter from response headers
//!     → success           → breaker.on_success, resolve every waiter
//!     → retryable failure → re-enqueue at the tail after the delay
//!     → terminal failure  → breaker.on_failure, reject every waiter
//! ```
//!
//! At most one request per coalescing key is in flight at any time. The queue
//! registry, each queue and the in-flight map each have their own lock; none
//! is held across an await.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::domain::{Admission, CircuitBreaker, CircuitState, RateLimiter, RetryPolicy};
use crate::ports::{FetchError, FetchFailure, Fetched};

/// Floor for rate-limit sleeps; a window ending exactly now is still closed
const MIN_LIMIT_WAIT: Duration = Duration::from_millis(1);

/// Boxed, sendable future
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// A re-invocable upstream call; invoked once per attempt
pub type Operation<T> = Arc<dyn Fn() -> BoxFuture<Result<Fetched<T>, FetchFailure>> + Send + Sync>;

/// Wrap an async closure as an [`Operation`]
pub fn operation<T, F, Fut>(f: F) -> Operation<T>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Fetched<T>, FetchFailure>> + Send + 'static,
{
    Arc::new(move || -> BoxFuture<Result<Fetched<T>, FetchFailure>> { Box::pin(f()) })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A request waiting on (or being retried through) an endpoint queue
pub struct QueuedRequest<T> {
    pub id: u64,
    pub endpoint_key: String,
    pub coalescing_key: String,
    pub retry_count: u32,
    pub enqueued_at: Instant,
    operation: Operation<T>,
    /// How the circuit breaker last let this request through; a half-open
    /// trial keeps its admission across its own retries
    admission: Option<Admission>,
}

/// Callers attached to one in-progress request
struct InFlightRequest<T> {
    waiters: Vec<oneshot::Sender<Result<T, FetchError>>>,
}

struct QueueState<T> {
    pending: VecDeque<QueuedRequest<T>>,
    draining: bool,
}

struct EndpointQueue<T> {
    state: Mutex<QueueState<T>>,
}

impl<T> EndpointQueue<T> {
    fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                draining: false,
            }),
        }
    }
}

/// Outcome label for drain-step events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepOutcome {
    Success,
    Retry,
    Failed,
    CircuitOpen,
}

impl StepOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            StepOutcome::Success => "success",
            StepOutcome::Retry => "retry",
            StepOutcome::Failed => "failed",
            StepOutcome::CircuitOpen => "circuit_open",
        }
    }
}

/// Per-endpoint queueing, deduplication and fault handling for upstream calls
pub struct RequestCoalescer<T> {
    limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    queues: Mutex<HashMap<String, Arc<EndpointQueue<T>>>>,
    in_flight: Mutex<HashMap<String, InFlightRequest<T>>>,
    next_id: AtomicU64,
}

impl<T> RequestCoalescer<T>
where
    T: Clone + Send + 'static,
{
    pub fn new(limiter: Arc<RateLimiter>, breaker: Arc<CircuitBreaker>, retry: RetryPolicy) -> Self {
        Self {
            limiter,
            breaker,
            retry,
            queues: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Run `operation` through the endpoint queue, or join the identical
    /// request already in flight under `coalescing_key`
    pub async fn submit(
        self: &Arc<Self>,
        endpoint_key: &str,
        coalescing_key: impl Into<String>,
        operation: Operation<T>,
    ) -> Result<T, FetchError> {
        let coalescing_key = coalescing_key.into();
        let (tx, rx) = oneshot::channel();

        let is_leader = {
            let mut in_flight = lock(&self.in_flight);
            match in_flight.entry(coalescing_key.clone()) {
                Entry::Occupied(mut existing) => {
                    existing.get_mut().waiters.push(tx);
                    false
                }
                Entry::Vacant(slot) => {
                    slot.insert(InFlightRequest { waiters: vec![tx] });
                    true
                }
            }
        };

        if is_leader {
            let request = QueuedRequest {
                id: self.next_id.fetch_add(1, Ordering::Relaxed),
                endpoint_key: endpoint_key.to_string(),
                coalescing_key,
                retry_count: 0,
                enqueued_at: Instant::now(),
                operation,
                admission: None,
            };
            self.enqueue(request);
        } else {
            tracing::debug!(key = %coalescing_key, "Joined in-flight request");
        }

        rx.await.unwrap_or_else(|_| {
            Err(FetchError::Network("request abandoned before completion".into()))
        })
    }

    /// Number of distinct requests currently in flight
    pub fn in_flight_count(&self) -> usize {
        lock(&self.in_flight).len()
    }

    /// Requests waiting in an endpoint's queue
    pub fn queue_depth(&self, endpoint_key: &str) -> usize {
        lock(&self.queues)
            .get(endpoint_key)
            .map(|q| lock(&q.state).pending.len())
            .unwrap_or(0)
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    fn queue_for(&self, endpoint_key: &str) -> Arc<EndpointQueue<T>> {
        let mut queues = lock(&self.queues);
        Arc::clone(
            queues
                .entry(endpoint_key.to_string())
                .or_insert_with(|| Arc::new(EndpointQueue::new())),
        )
    }

    fn enqueue(self: &Arc<Self>, request: QueuedRequest<T>) {
        let endpoint = request.endpoint_key.clone();
        let queue = self.queue_for(&endpoint);

        let start_drain = {
            let mut state = lock(&queue.state);
            state.pending.push_back(request);
            !std::mem::replace(&mut state.draining, true)
        };

        if start_drain {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.drain(endpoint, queue).await });
        }
    }

    async fn drain(self: Arc<Self>, endpoint: String, queue: Arc<EndpointQueue<T>>) {
        tracing::trace!(endpoint = %endpoint, "Drain started");
        loop {
            let next = {
                let mut state = lock(&queue.state);
                let next = state.pending.pop_front();
                if next.is_none() {
                    state.draining = false;
                }
                next
            };

            match next {
                Some(request) => self.process(request).await,
                None => break,
            }
        }
        tracing::trace!(endpoint = %endpoint, "Drain idle");
    }

    async fn process(self: &Arc<Self>, mut request: QueuedRequest<T>) {
        let endpoint = request.endpoint_key.clone();
        let attempt = request.retry_count + 1;

        loop {
            if !self.pass_breaker(&mut request) {
                log_step(&endpoint, attempt, StepOutcome::CircuitOpen, 0);
                self.settle(
                    &request.coalescing_key,
                    Err(FetchError::CircuitOpen(endpoint.clone())),
                );
                return;
            }

            match self.limiter.acquire(&endpoint) {
                Ok(_) => break,
                Err(wait) => {
                    tracing::debug!(
                        endpoint = %endpoint,
                        wait_ms = wait.as_millis() as u64,
                        "Rate limit window exhausted, waiting"
                    );
                    tokio::time::sleep(wait.max(MIN_LIMIT_WAIT)).await;
                }
            }
        }

        let started = Instant::now();
        let result = (request.operation)().await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let (result, rate_limit) = match result {
            Ok(fetched) => (Ok(fetched.value), fetched.rate_limit),
            Err(failure) => (Err(failure.error), failure.rate_limit),
        };
        self.limiter.update_from_response(&endpoint, &rate_limit);

        match result {
            Ok(value) => {
                if self.counts_for_breaker(request.admission) {
                    self.breaker.on_success();
                }
                log_step(&endpoint, attempt, StepOutcome::Success, latency_ms);
                self.settle(&request.coalescing_key, Ok(value));
            }
            Err(error) => {
                // A 429 without Retry-After waits for the window reset the headers announced
                let error = match error {
                    FetchError::RateLimited { retry_after: None } => FetchError::RateLimited {
                        retry_after: rate_limit.reset_after,
                    },
                    other => other,
                };
                if let FetchError::RateLimited { retry_after } = &error {
                    self.limiter
                        .throttle(&endpoint, retry_after.unwrap_or(self.retry.default_retry_after));
                }

                match self.retry.next_delay(&error, request.retry_count) {
                    Some(delay) => {
                        log_step(&endpoint, attempt, StepOutcome::Retry, latency_ms);
                        tracing::debug!(
                            endpoint = %endpoint,
                            request_id = request.id,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "Rescheduling request"
                        );
                        request.retry_count += 1;
                        self.reschedule(request, delay);
                    }
                    None => {
                        if self.counts_for_breaker(request.admission) {
                            self.breaker.on_failure();
                        }
                        log_step(&endpoint, attempt, StepOutcome::Failed, latency_ms);
                        tracing::warn!(
                            endpoint = %endpoint,
                            request_id = request.id,
                            queued_ms = request.enqueued_at.elapsed().as_millis() as u64,
                            error = %error,
                            "Request failed"
                        );
                        self.settle(&request.coalescing_key, Err(error));
                    }
                }
            }
        }
    }

    /// Breaker gate for one attempt. The half-open trial holder passes while
    /// its trial is open; everyone else asks the breaker again.
    fn pass_breaker(&self, request: &mut QueuedRequest<T>) -> bool {
        if request.admission == Some(Admission::Trial)
            && self.breaker.state() == CircuitState::HalfOpen
        {
            return true;
        }
        match self.breaker.admit() {
            Some(admission) => {
                request.admission = Some(admission);
                true
            }
            None => false,
        }
    }

    /// Outcomes of calls admitted while closed are stale once the circuit has
    /// left Closed; only the trial decides a half-open circuit
    fn counts_for_breaker(&self, admission: Option<Admission>) -> bool {
        admission == Some(Admission::Trial) || self.breaker.state() == CircuitState::Closed
    }

    /// Put a request back at the tail of its queue once `delay` has passed
    fn reschedule(self: &Arc<Self>, request: QueuedRequest<T>, delay: Duration) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.enqueue(request);
        });
    }

    /// Resolve every caller attached to a key and retire the in-flight entry
    fn settle(&self, coalescing_key: &str, result: Result<T, FetchError>) {
        let waiters = lock(&self.in_flight)
            .remove(coalescing_key)
            .map(|entry| entry.waiters)
            .unwrap_or_default();

        for waiter in waiters {
            // Receiver gone means that caller stopped waiting
            let _ = waiter.send(result.clone());
        }
    }
}

fn log_step(endpoint: &str, attempt: u32, outcome: StepOutcome, latency_ms: u64) {
    tracing::info!(
        endpoint,
        attempt,
        outcome = outcome.as_str(),
        latency_ms,
        "Drain step"
    );
}
