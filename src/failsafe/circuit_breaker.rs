//! Circuit breaker implementation

use std::collections::VecDeque;
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::classifier::FailureClassifier;
use super::observer::{self, BreakerObserver, CallbackObserver};
use super::permit::CallPermit;
use super::stats::BreakerStats;
use crate::config::CircuitBreakerConfig;
use crate::error::{BreakerOpen, CallError, RejectReason};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed (allowing requests)
    Closed,
    /// Circuit is open (blocking requests)
    Open,
    /// Circuit is half-open (allowing limited requests to test)
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        })
    }
}

/// Future returned by [`CircuitBreaker::wrap_async`] adapters
pub type GuardedFuture<T, E> = Pin<Box<dyn Future<Output = Result<T, CallError<E>>> + Send>>;

/// How an admitted call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Success,
    Failure,
    /// Error the classifier does not count
    Ignored,
    /// Permit dropped without a result (cancelled future, panic)
    Abandoned,
}

/// Admission receipt; `probe_epoch` is set when a half-open slot was reserved
#[derive(Debug, Clone, Copy)]
pub(crate) struct Ticket {
    probe_epoch: Option<u64>,
}

impl Ticket {
    pub(crate) fn is_probe(self) -> bool {
        self.probe_epoch.is_some()
    }
}

/// Everything guarded by the breaker lock
#[derive(Debug)]
pub(crate) struct Inner {
    state: CircuitState,
    stats: BreakerStats,
    half_open_in_flight: u32,
    /// Bumped on every transition and reset; probe slots from older epochs are void
    epoch: u64,
}

/// Read-only snapshot of a breaker for monitoring
#[derive(Debug, Clone, Serialize)]
pub struct StateInfo {
    /// Breaker name
    pub name: String,
    /// Current state
    pub state: CircuitState,
    /// Effective configuration
    pub config: CircuitBreakerConfig,
    /// Counter snapshot
    pub stats: BreakerStats,
    /// `failure_count / total_requests`
    pub failure_rate: f64,
    /// Probe calls currently running
    pub half_open_in_flight: u32,
}

/// Circuit breaker protecting calls to one collaborator
///
/// State, statistics and the probe counter live behind a single mutex.
/// The mutex is only held for bookkeeping: never across the wrapped call,
/// an `.await`, or an observer callback. Threads take it with a blocking
/// acquire; async tasks take it cooperatively (see [`Self::lock_async`]).
///
/// Observers see transitions in the order they happened, one delivery at a
/// time per breaker, even when the transitions were made on different
/// threads.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    classifier: FailureClassifier,
    observers: Vec<Arc<dyn BreakerObserver>>,
    inner: Mutex<Inner>,
    /// Transitions not yet delivered to observers, oldest first
    pending: Mutex<VecDeque<CircuitState>>,
    /// Held by the caller currently draining `pending`
    delivering: Mutex<()>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

/// Builder for breakers that need a classifier or observers
#[must_use]
pub struct CircuitBreakerBuilder {
    name: String,
    config: CircuitBreakerConfig,
    classifier: FailureClassifier,
    observers: Vec<Arc<dyn BreakerObserver>>,
    callbacks: CallbackObserver,
    has_callbacks: bool,
}

impl CircuitBreakerBuilder {
    /// Replace the whole configuration
    pub fn config(mut self, config: &CircuitBreakerConfig) -> Self {
        self.config = config.clone();
        self
    }

    /// Consecutive failures before opening
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Wait after the last failure before probing
    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.recovery_timeout = timeout;
        self
    }

    /// Consecutive half-open successes to close
    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    /// Concurrent probe calls while half-open
    pub fn half_open_max_calls(mut self, max_calls: u32) -> Self {
        self.config.half_open_max_calls = max_calls;
        self
    }

    /// Record abandoned calls as failures
    pub fn count_cancellation_as_failure(mut self, enabled: bool) -> Self {
        self.config.count_cancellation_as_failure = enabled;
        self
    }

    /// Decide which errors count as failures
    pub fn classifier(mut self, classifier: FailureClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Attach an observer
    pub fn observer(mut self, observer: Arc<dyn BreakerObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Callback when the circuit opens
    pub fn on_open(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.callbacks = self.callbacks.on_open(f);
        self.has_callbacks = true;
        self
    }

    /// Callback when the circuit closes
    pub fn on_close(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.callbacks = self.callbacks.on_close(f);
        self.has_callbacks = true;
        self
    }

    /// Callback when the circuit starts probing
    pub fn on_half_open(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.callbacks = self.callbacks.on_half_open(f);
        self.has_callbacks = true;
        self
    }

    /// Build the breaker
    #[must_use]
    pub fn build(mut self) -> CircuitBreaker {
        if self.has_callbacks {
            self.observers.push(Arc::new(self.callbacks));
        }
        CircuitBreaker::assemble(self.name, self.config, self.classifier, self.observers)
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker that counts every error as a failure
    #[must_use]
    pub fn new(name: &str, config: &CircuitBreakerConfig) -> Self {
        Self::assemble(
            name.to_string(),
            config.clone(),
            FailureClassifier::default(),
            Vec::new(),
        )
    }

    /// Start building a breaker with default configuration
    pub fn builder(name: impl Into<String>) -> CircuitBreakerBuilder {
        CircuitBreakerBuilder {
            name: name.into(),
            config: CircuitBreakerConfig::default(),
            classifier: FailureClassifier::default(),
            observers: Vec::new(),
            callbacks: CallbackObserver::new(),
            has_callbacks: false,
        }
    }

    fn assemble(
        name: String,
        mut config: CircuitBreakerConfig,
        classifier: FailureClassifier,
        observers: Vec<Arc<dyn BreakerObserver>>,
    ) -> Self {
        if config.validate().is_err() {
            warn!(breaker = %name, ?config, "Zero threshold in circuit breaker config, raising to 1");
            config.failure_threshold = config.failure_threshold.max(1);
            config.success_threshold = config.success_threshold.max(1);
            config.half_open_max_calls = config.half_open_max_calls.max(1);
        }

        Self {
            name,
            config,
            classifier,
            observers,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                stats: BreakerStats::new(),
                half_open_in_flight: 0,
                epoch: 0,
            }),
            pending: Mutex::new(VecDeque::new()),
            delivering: Mutex::new(()),
        }
    }

    /// Breaker name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Effective configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Failure classifier in use
    pub fn classifier(&self) -> &FailureClassifier {
        &self.classifier
    }

    /// Get current state
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Snapshot of the statistics
    pub fn stats(&self) -> BreakerStats {
        self.lock().stats.clone()
    }

    /// Fraction of recorded calls that failed
    pub fn failure_rate(&self) -> f64 {
        self.lock().stats.failure_rate()
    }

    /// Probe calls currently admitted
    pub fn half_open_in_flight(&self) -> u32 {
        self.lock().half_open_in_flight
    }

    /// Configuration, state and statistics for monitoring export
    pub fn state_info(&self) -> StateInfo {
        let inner = self.lock();
        StateInfo {
            name: self.name.clone(),
            state: inner.state,
            config: self.config.clone(),
            stats: inner.stats.clone(),
            failure_rate: inner.stats.failure_rate(),
            half_open_in_flight: inner.half_open_in_flight,
        }
    }

    /// One-line human readable status
    pub fn status_message(&self) -> String {
        let inner = self.lock();
        match inner.state {
            CircuitState::Closed => format!("Breaker '{}' is closed", self.name),
            CircuitState::Open => {
                let retry_in = inner
                    .stats
                    .last_failure_at
                    .map_or(Duration::ZERO, |at| {
                        self.config.recovery_timeout.saturating_sub(at.elapsed())
                    });
                format!(
                    "Breaker '{}' circuit breaker is open after {} failures, retry in {} seconds",
                    self.name,
                    inner.stats.failure_count,
                    retry_in.as_secs()
                )
            }
            CircuitState::HalfOpen => format!(
                "Breaker '{}' is half-open, testing recovery ({}/{} probes in flight)",
                self.name, inner.half_open_in_flight, self.config.half_open_max_calls
            ),
        }
    }

    /// Force the circuit closed and zero all statistics
    #[tracing::instrument(skip(self), fields(breaker = %self.name))]
    pub fn reset(&self) {
        let entered = {
            let mut inner = self.lock();
            let entered = self.transition_to(&mut inner, CircuitState::Closed);
            inner.stats.reset();
            inner.half_open_in_flight = 0;
            inner.epoch += 1;
            entered
        };
        info!(breaker = %self.name, "Circuit breaker manually reset");
        self.announce(entered);
    }

    /// Admit a call from a thread, returning a permit that records its outcome
    #[tracing::instrument(skip(self), fields(breaker = %self.name))]
    pub fn acquire(&self) -> Result<CallPermit<'_>, BreakerOpen> {
        let (admitted, entered) = {
            let mut inner = self.lock();
            self.try_admit(&mut inner)
        };
        self.announce(entered);
        admitted.map(|ticket| CallPermit::new(self, ticket))
    }

    /// Admit a call from an async task without parking the worker thread
    pub async fn acquire_async(&self) -> Result<CallPermit<'_>, BreakerOpen> {
        let (admitted, entered) = {
            let mut inner = self.lock_async().await;
            self.try_admit(&mut inner)
        };
        self.announce(entered);
        admitted.map(|ticket| CallPermit::new(self, ticket))
    }

    /// Run `f` through the breaker
    ///
    /// # Errors
    ///
    /// [`CallError::Rejected`] if the breaker refuses the call, otherwise
    /// [`CallError::Failed`] with the error `f` returned.
    pub fn call<F, T, E>(&self, f: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Result<T, E>,
        E: StdError + 'static,
    {
        let permit = self.acquire()?;
        match f() {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(e) => {
                permit.failure(&e);
                Err(CallError::Failed(e))
            }
        }
    }

    /// Await `future` through the breaker
    ///
    /// Dropping the returned future mid-call still releases the probe slot.
    ///
    /// # Errors
    ///
    /// Same as [`Self::call`].
    pub async fn call_async<Fut, T, E>(&self, future: Fut) -> Result<T, CallError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
        E: StdError + 'static,
    {
        let permit = self.acquire_async().await?;
        match future.await {
            Ok(value) => {
                permit.resolve_async(Outcome::Success).await;
                Ok(value)
            }
            Err(e) => {
                let outcome = self.classify(&e);
                permit.resolve_async(outcome).await;
                Err(CallError::Failed(e))
            }
        }
    }

    /// Wrap a function so every invocation goes through the breaker
    pub fn wrap<F, A, T, E>(self: &Arc<Self>, f: F) -> impl Fn(A) -> Result<T, CallError<E>>
    where
        F: Fn(A) -> Result<T, E>,
        E: StdError + 'static,
    {
        let breaker = Arc::clone(self);
        move |arg| breaker.call(|| f(arg))
    }

    /// Wrap an async function so every invocation goes through the breaker
    pub fn wrap_async<F, Fut, A, T, E>(
        self: &Arc<Self>,
        f: F,
    ) -> impl Fn(A) -> GuardedFuture<T, E>
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: StdError + Send + 'static,
    {
        let breaker = Arc::clone(self);
        move |arg| -> GuardedFuture<T, E> {
            let breaker = Arc::clone(&breaker);
            let future = f(arg);
            Box::pin(async move { breaker.call_async(future).await })
        }
    }

    /// Blocking acquisition, for threads and `Drop`
    pub(crate) fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock()
    }

    /// Cooperative acquisition: yields to the scheduler while the lock is busy
    ///
    /// A polling task never joins the mutex's wait queue, so it has no
    /// fairness guarantee against threads parked in [`Self::lock`]. Hold
    /// times are a few counter updates, which keeps the retry window short,
    /// but a task can lose several rounds under heavy thread contention.
    pub(crate) async fn lock_async(&self) -> MutexGuard<'_, Inner> {
        loop {
            if let Some(guard) = self.inner.try_lock() {
                return guard;
            }
            tokio::task::yield_now().await;
        }
    }

    pub(crate) fn classify(&self, error: &(dyn StdError + 'static)) -> Outcome {
        if self.classifier.is_failure(error) {
            Outcome::Failure
        } else {
            debug!(breaker = %self.name, error = %error, "Error not classified as failure, not recorded");
            Outcome::Ignored
        }
    }

    /// Admit phase. Returns the admission result and the state entered, if any.
    fn try_admit(&self, inner: &mut Inner) -> (Result<Ticket, BreakerOpen>, Option<CircuitState>) {
        let mut entered = None;
        if inner.state == CircuitState::Open && self.recovery_elapsed(inner) {
            entered = self.transition_to(inner, CircuitState::HalfOpen);
        }

        let admitted = match inner.state {
            CircuitState::Closed => {
                tracing::trace!("Circuit closed, allowing request");
                Ok(Ticket { probe_epoch: None })
            }
            CircuitState::Open => {
                inner.stats.record_rejected();
                debug!(
                    breaker = %self.name,
                    rejected = inner.stats.rejected_requests,
                    "Circuit open, rejecting request"
                );
                Err(self.rejection(CircuitState::Open, RejectReason::Open))
            }
            CircuitState::HalfOpen => {
                let max_calls = self.config.half_open_max_calls;
                if inner.half_open_in_flight >= max_calls {
                    inner.stats.record_rejected();
                    debug!(
                        breaker = %self.name,
                        in_flight = inner.half_open_in_flight,
                        "Probe capacity exhausted, rejecting request"
                    );
                    Err(self.rejection(CircuitState::HalfOpen, RejectReason::ProbeLimit { max_calls }))
                } else {
                    inner.half_open_in_flight += 1;
                    debug!(
                        breaker = %self.name,
                        in_flight = inner.half_open_in_flight,
                        "Circuit half-open, allowing probe request"
                    );
                    Ok(Ticket {
                        probe_epoch: Some(inner.epoch),
                    })
                }
            }
        };

        (admitted, entered)
    }

    /// Record phase. Releases the probe slot on every path.
    pub(crate) fn record(
        &self,
        inner: &mut Inner,
        ticket: Ticket,
        outcome: Outcome,
    ) -> Option<CircuitState> {
        if let Some(epoch) = ticket.probe_epoch {
            if epoch == inner.epoch {
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
            }
        }

        let outcome = match outcome {
            Outcome::Abandoned if self.config.count_cancellation_as_failure => {
                debug!(breaker = %self.name, "Call abandoned, recording as failure");
                Outcome::Failure
            }
            Outcome::Abandoned => {
                debug!(breaker = %self.name, "Call abandoned, slot released");
                return None;
            }
            other => other,
        };

        match outcome {
            Outcome::Success => inner.stats.record_success(),
            Outcome::Failure => {
                inner.stats.record_failure();
                warn!(
                    breaker = %self.name,
                    state = %inner.state,
                    consecutive_failures = inner.stats.consecutive_failures,
                    threshold = self.config.failure_threshold,
                    "Circuit breaker recorded failure"
                );
            }
            Outcome::Ignored | Outcome::Abandoned => return None,
        }

        self.check_thresholds(inner)
    }

    fn check_thresholds(&self, inner: &mut Inner) -> Option<CircuitState> {
        match inner.state {
            CircuitState::Closed
                if inner.stats.consecutive_failures >= self.config.failure_threshold =>
            {
                let entered = self.transition_to(inner, CircuitState::Open);
                inner.stats.reset_consecutive();
                entered
            }
            CircuitState::HalfOpen
                if inner.stats.consecutive_successes >= self.config.success_threshold =>
            {
                let entered = self.transition_to(inner, CircuitState::Closed);
                inner.stats.reset_consecutive();
                entered
            }
            CircuitState::HalfOpen if inner.stats.consecutive_failures > 0 => {
                let entered = self.transition_to(inner, CircuitState::Open);
                inner.stats.reset_consecutive();
                entered
            }
            _ => None,
        }
    }

    fn recovery_elapsed(&self, inner: &Inner) -> bool {
        inner
            .stats
            .last_failure_at
            .is_some_and(|at| Instant::now().duration_since(at) >= self.config.recovery_timeout)
    }

    /// Transition to a new state; same-state transitions are no-ops
    fn transition_to(&self, inner: &mut Inner, new_state: CircuitState) -> Option<CircuitState> {
        let old_state = inner.state;
        if old_state == new_state {
            return None;
        }

        inner.state = new_state;
        inner.half_open_in_flight = 0;
        inner.epoch += 1;
        inner.stats.mark_state_changed();
        // Queued under the state lock so queue order is transition order
        if !self.observers.is_empty() {
            self.pending.lock().push_back(new_state);
        }

        match new_state {
            CircuitState::Closed => {
                info!(
                    breaker = %self.name,
                    from = %old_state,
                    successes = inner.stats.consecutive_successes,
                    "Circuit breaker closed"
                );
            }
            CircuitState::Open => {
                warn!(
                    breaker = %self.name,
                    from = %old_state,
                    failures = inner.stats.consecutive_failures,
                    total_failures = inner.stats.failure_count,
                    "Circuit breaker opened"
                );
            }
            CircuitState::HalfOpen => {
                debug!(breaker = %self.name, from = %old_state, "Circuit breaker half-open");
            }
        }

        Some(new_state)
    }

    /// Deliver queued transitions to observers. Must be called without the
    /// state lock held.
    ///
    /// One caller drains the queue at a time. A caller that finds delivery
    /// in progress (including an observer whose callback caused a new
    /// transition) leaves its transition to the current drainer.
    pub(crate) fn announce(&self, entered: Option<CircuitState>) {
        if entered.is_none() || self.observers.is_empty() {
            return;
        }

        loop {
            let Some(guard) = self.delivering.try_lock() else {
                return;
            };
            loop {
                let next = self.pending.lock().pop_front();
                let Some(state) = next else {
                    break;
                };
                observer::notify(&self.observers, &self.name, state);
            }
            drop(guard);

            // A transition queued after the last pop saw us holding the
            // guard and left; pick it up.
            if self.pending.lock().is_empty() {
                return;
            }
        }
    }

    fn rejection(&self, state: CircuitState, reason: RejectReason) -> BreakerOpen {
        BreakerOpen {
            name: self.name.clone(),
            state,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn config(failure_threshold: u32, success_threshold: u32, recovery: Duration) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold,
            success_threshold,
            recovery_timeout: recovery,
            ..Default::default()
        }
    }

    fn fail(cb: &CircuitBreaker) -> Result<(), CallError<io::Error>> {
        cb.call(|| Err::<(), _>(io::Error::other("boom")))
    }

    fn succeed(cb: &CircuitBreaker) -> Result<(), CallError<io::Error>> {
        cb.call(|| Ok::<_, io::Error>(()))
    }

    #[test]
    fn test_opens_after_threshold() {
        let cb = CircuitBreaker::new("test", &config(3, 2, Duration::from_secs(60)));

        for _ in 0..2 {
            assert!(matches!(fail(&cb), Err(CallError::Failed(_))));
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().consecutive_failures, 2);

        assert!(fail(&cb).is_err());
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.stats().consecutive_failures, 0);
        assert_eq!(cb.stats().failure_count, 3);
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let cb = CircuitBreaker::new("test", &config(3, 2, Duration::from_secs(60)));

        fail(&cb).unwrap_err();
        fail(&cb).unwrap_err();
        succeed(&cb).unwrap();
        fail(&cb).unwrap_err();
        fail(&cb).unwrap_err();

        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_open_rejects_without_running_call() {
        let cb = CircuitBreaker::new("test", &config(1, 1, Duration::from_secs(60)));
        fail(&cb).unwrap_err();

        let ran = AtomicU32::new(0);
        let result = cb.call(|| {
            ran.fetch_add(1, Ordering::SeqCst);
            Ok::<_, io::Error>(())
        });

        let rejection = result.unwrap_err();
        let open = rejection.rejection().unwrap();
        assert_eq!(open.name, "test");
        assert_eq!(open.state, CircuitState::Open);
        assert_eq!(open.reason, RejectReason::Open);
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        let stats = cb.stats();
        assert_eq!(stats.rejected_requests, 1);
        assert_eq!(stats.total_requests, 1);
    }

    #[test]
    fn test_half_open_after_recovery_timeout() {
        let cb = CircuitBreaker::new("test", &config(1, 2, Duration::from_millis(20)));
        fail(&cb).unwrap_err();
        assert_eq!(cb.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(30));

        let permit = cb.acquire().unwrap();
        assert!(permit.is_probe());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.half_open_in_flight(), 1);
        permit.success();
        assert_eq!(cb.half_open_in_flight(), 0);
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        succeed(&cb).unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let cb = CircuitBreaker::new("test", &config(1, 2, Duration::from_millis(10)));
        fail(&cb).unwrap_err();
        std::thread::sleep(Duration::from_millis(20));

        fail(&cb).unwrap_err();
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.half_open_in_flight(), 0);
        assert!(succeed(&cb).unwrap_err().is_rejected());
    }

    #[test]
    fn test_probe_limit() {
        let cb = CircuitBreaker::builder("probe")
            .failure_threshold(1)
            .recovery_timeout(Duration::from_millis(10))
            .half_open_max_calls(2)
            .build();
        fail(&cb).unwrap_err();
        std::thread::sleep(Duration::from_millis(20));

        let first = cb.acquire().unwrap();
        let second = cb.acquire().unwrap();
        let third = cb.acquire().unwrap_err();
        assert_eq!(third.state, CircuitState::HalfOpen);
        assert_eq!(third.reason, RejectReason::ProbeLimit { max_calls: 2 });
        assert_eq!(cb.stats().rejected_requests, 1);

        drop(first);
        assert_eq!(cb.half_open_in_flight(), 1);
        let fourth = cb.acquire().unwrap();
        drop(second);
        drop(fourth);
        assert_eq!(cb.half_open_in_flight(), 0);
    }

    #[test]
    fn test_unclassified_error_is_not_recorded_but_releases_slot() {
        let cb = CircuitBreaker::builder("classified")
            .failure_threshold(1)
            .recovery_timeout(Duration::from_millis(10))
            .classifier(FailureClassifier::matching::<io::Error>())
            .build();

        #[derive(Debug, thiserror::Error)]
        #[error("validation")]
        struct Validation;

        let result = cb.call(|| Err::<(), _>(Validation));
        assert!(matches!(result, Err(CallError::Failed(Validation))));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().total_requests, 0);

        fail(&cb).unwrap_err();
        std::thread::sleep(Duration::from_millis(20));

        let result = cb.call(|| Err::<(), _>(Validation));
        assert!(matches!(result, Err(CallError::Failed(Validation))));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.half_open_in_flight(), 0);
        assert_eq!(cb.stats().failure_count, 1);
    }

    #[test]
    fn test_panicking_call_releases_slot() {
        let cb = CircuitBreaker::new("panics", &config(1, 1, Duration::from_millis(10)));
        fail(&cb).unwrap_err();
        std::thread::sleep(Duration::from_millis(20));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = cb.call(|| -> Result<(), io::Error> { panic!("wrapped call panicked") });
        }));
        assert!(result.is_err());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.half_open_in_flight(), 0);
    }

    #[test]
    fn test_reset() {
        let cb = CircuitBreaker::new("test", &config(1, 1, Duration::from_secs(60)));
        fail(&cb).unwrap_err();
        succeed(&cb).unwrap_err();
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        let stats = cb.stats();
        assert_eq!(stats.failure_count, 0);
        assert_eq!(stats.rejected_requests, 0);
        assert_eq!(stats.total_requests, 0);
        assert!(stats.last_failure_time.is_none());
        assert!(cb.failure_rate().abs() < f64::EPSILON);
    }

    #[test]
    fn test_closed_reset_keeps_state_changed_time() {
        let cb = CircuitBreaker::new("test", &config(1, 1, Duration::from_secs(60)));
        let changed = cb.stats().state_changed_time;
        std::thread::sleep(Duration::from_millis(10));

        succeed(&cb).unwrap();
        assert_eq!(cb.stats().state_changed_time, changed);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().state_changed_time, changed);

        // A real transition still moves it
        fail(&cb).unwrap_err();
        let opened = cb.stats().state_changed_time;
        assert!(opened > changed);
        std::thread::sleep(Duration::from_millis(10));
        cb.reset();
        assert!(cb.stats().state_changed_time > opened);
    }

    #[test]
    fn test_stale_probe_does_not_release_newer_slot() {
        let cb = CircuitBreaker::builder("stale")
            .failure_threshold(1)
            .recovery_timeout(Duration::from_millis(10))
            .half_open_max_calls(2)
            .build();
        fail(&cb).unwrap_err();
        std::thread::sleep(Duration::from_millis(20));

        let slow_probe = cb.acquire().unwrap();
        fail(&cb).unwrap_err();
        assert_eq!(cb.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(20));
        let fresh_probe = cb.acquire().unwrap();
        assert_eq!(cb.half_open_in_flight(), 1);

        drop(slow_probe);
        assert_eq!(cb.half_open_in_flight(), 1);
        drop(fresh_probe);
        assert_eq!(cb.half_open_in_flight(), 0);
    }

    #[test]
    fn test_zero_thresholds_are_raised() {
        let cb = CircuitBreaker::new(
            "zero",
            &CircuitBreakerConfig {
                failure_threshold: 0,
                half_open_max_calls: 0,
                ..Default::default()
            },
        );
        assert_eq!(cb.config().failure_threshold, 1);
        assert_eq!(cb.config().half_open_max_calls, 1);
        succeed(&cb).unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_status_message() {
        let cb = CircuitBreaker::new("backend", &config(2, 1, Duration::from_secs(30)));
        assert!(cb.status_message().contains("closed"));

        fail(&cb).unwrap_err();
        fail(&cb).unwrap_err();
        let message = cb.status_message();
        assert!(message.contains("Breaker 'backend'"));
        assert!(message.contains("is open"));
        assert!(message.contains("2 failures"));
        assert!(message.contains("retry in"));
    }

    #[test]
    fn test_state_info_serializes() {
        let cb = CircuitBreaker::new("export", &config(2, 1, Duration::from_secs(30)));
        fail(&cb).unwrap_err();

        let info = cb.state_info();
        assert_eq!(info.name, "export");
        assert_eq!(info.state, CircuitState::Closed);
        assert!((info.failure_rate - 1.0).abs() < f64::EPSILON);

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["state"], "closed");
        assert_eq!(json["config"]["recovery_timeout"], "30s");
        assert_eq!(json["stats"]["failure_count"], 1);
    }

    #[test]
    fn test_wrap() {
        let cb = Arc::new(CircuitBreaker::new("wrapped", &config(1, 1, Duration::from_secs(60))));
        let parse = cb.wrap(|s: &str| s.parse::<u32>());

        assert_eq!(parse("42").unwrap(), 42);
        assert!(matches!(parse("x"), Err(CallError::Failed(_))));
        assert!(parse("7").unwrap_err().is_rejected());
    }

    #[tokio::test]
    async fn test_call_async_and_wrap_async() {
        let cb = Arc::new(CircuitBreaker::new("async", &config(2, 1, Duration::from_secs(60))));

        let value = cb.call_async(async { Ok::<_, io::Error>(5) }).await.unwrap();
        assert_eq!(value, 5);

        let fetch = cb.wrap_async(|fail: bool| async move {
            if fail { Err(io::Error::other("down")) } else { Ok(1u8) }
        });
        assert!(fetch(true).await.is_err());
        assert!(fetch(true).await.is_err());
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(fetch(false).await.unwrap_err().is_rejected());
    }
}
