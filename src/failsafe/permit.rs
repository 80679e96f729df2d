//! Scoped admission guard

use std::error::Error as StdError;
use std::fmt;

use super::circuit_breaker::{CircuitBreaker, Outcome, Ticket};

/// An admitted call
///
/// Resolve it with [`success`](Self::success) or [`failure`](Self::failure)
/// (or their `_async` twins). A permit dropped unresolved, because the
/// caller's future was cancelled or the call panicked, is recorded as
/// abandoned: its probe slot is released, and it counts as a failure only
/// when the breaker is configured with `count_cancellation_as_failure`.
#[must_use = "dropping a permit without resolving it records the call as abandoned"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    ticket: Option<Ticket>,
    pending: Outcome,
}

impl<'a> CallPermit<'a> {
    pub(crate) fn new(breaker: &'a CircuitBreaker, ticket: Ticket) -> Self {
        Self {
            breaker,
            ticket: Some(ticket),
            pending: Outcome::Abandoned,
        }
    }

    /// Whether this call holds a half-open probe slot
    pub fn is_probe(&self) -> bool {
        self.ticket.is_some_and(Ticket::is_probe)
    }

    /// Record a successful call
    pub fn success(mut self) {
        self.resolve(Outcome::Success);
    }

    /// Record a failed call; returns whether the classifier counted it
    pub fn failure<E>(mut self, error: &E) -> bool
    where
        E: StdError + 'static,
    {
        let outcome = self.breaker.classify(error);
        self.resolve(outcome);
        outcome == Outcome::Failure
    }

    /// Async twin of [`success`](Self::success)
    pub async fn success_async(self) {
        self.resolve_async(Outcome::Success).await;
    }

    /// Async twin of [`failure`](Self::failure)
    pub async fn failure_async<E>(self, error: &E) -> bool
    where
        E: StdError + 'static,
    {
        let outcome = self.breaker.classify(error);
        self.resolve_async(outcome).await;
        outcome == Outcome::Failure
    }

    fn resolve(&mut self, outcome: Outcome) {
        self.pending = outcome;
        self.finish();
    }

    /// Record through the cooperative lock entry.
    ///
    /// The outcome is stored before waiting, so a cancellation while waiting
    /// for the lock still records it from `Drop`.
    pub(crate) async fn resolve_async(mut self, outcome: Outcome) {
        self.pending = outcome;
        let entered = {
            let mut inner = self.breaker.lock_async().await;
            match self.ticket.take() {
                Some(ticket) => self.breaker.record(&mut inner, ticket, outcome),
                None => None,
            }
        };
        self.breaker.announce(entered);
    }

    fn finish(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            let entered = {
                let mut inner = self.breaker.lock();
                self.breaker.record(&mut inner, ticket, self.pending)
            };
            self.breaker.announce(entered);
        }
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        self.finish();
    }
}

impl fmt::Debug for CallPermit<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallPermit")
            .field("breaker", &self.breaker.name())
            .field("probe", &self.is_probe())
            .field("resolved", &self.ticket.is_none())
            .finish()
    }
}
