//! Failure classification

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

type Predicate = dyn Fn(&(dyn StdError + 'static)) -> bool + Send + Sync;

/// Decides which errors from a wrapped call count against the breaker
///
/// Errors the classifier rejects still reach the caller, but leave the
/// breaker's counters and state untouched.
#[derive(Clone)]
pub struct FailureClassifier {
    predicate: Arc<Predicate>,
}

impl FailureClassifier {
    /// Classifier from an arbitrary predicate
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&(dyn StdError + 'static)) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
        }
    }

    /// Count every error as a failure
    #[must_use]
    pub fn all() -> Self {
        Self::new(|_| true)
    }

    /// Count an error when it, or any error in its `source()` chain, is a `T`
    #[must_use]
    pub fn matching<T>() -> Self
    where
        T: StdError + 'static,
    {
        Self::new(|error| {
            let mut current = Some(error);
            while let Some(e) = current {
                if e.is::<T>() {
                    return true;
                }
                current = e.source();
            }
            false
        })
    }

    /// Whether `error` counts as a failure
    pub fn is_failure(&self, error: &(dyn StdError + 'static)) -> bool {
        (self.predicate)(error)
    }
}

impl Default for FailureClassifier {
    fn default() -> Self {
        Self::all()
    }
}

impl fmt::Debug for FailureClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailureClassifier").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use thiserror::Error;

    use super::*;

    #[derive(Debug, Error)]
    #[error("upstream call failed")]
    struct Upstream(#[source] io::Error);

    #[derive(Debug, Error)]
    #[error("bad input")]
    struct BadInput;

    #[test]
    fn test_default_counts_everything() {
        let classifier = FailureClassifier::default();
        assert!(classifier.is_failure(&BadInput));
        assert!(classifier.is_failure(&io::Error::other("x")));
    }

    #[test]
    fn test_matching_walks_source_chain() {
        let classifier = FailureClassifier::matching::<io::Error>();
        assert!(classifier.is_failure(&io::Error::other("x")));
        assert!(classifier.is_failure(&Upstream(io::Error::other("reset"))));
        assert!(!classifier.is_failure(&BadInput));
    }

    #[test]
    fn test_custom_predicate() {
        let classifier = FailureClassifier::new(|e| e.to_string().contains("timeout"));
        assert!(classifier.is_failure(&io::Error::other("read timeout")));
        assert!(!classifier.is_failure(&io::Error::other("not found")));
    }
}
