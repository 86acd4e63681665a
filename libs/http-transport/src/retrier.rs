//! Retry coordination with coalesced credential refresh.
//!
//! When a request fails in a way the [`RetrierDelegate`] considers
//! recoverable (an expired token, typically), the retrier asks the delegate to
//! refresh once and parks every other failing request until that refresh
//! reports back. All parked requests then share its outcome.

use crate::error::TransportError;
use crate::interceptor::ResponseMeta;
use crate::request::WireRequest;
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Outcome handed to every request waiting on a retry decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    DoNotRetry,
}

/// Application policy behind a [`Retrier`].
pub trait RetrierDelegate: Send + Sync {
    /// Retries allowed per request, not counting the first attempt.
    fn max_attempts_count(&self) -> usize;

    /// Whether this failure is worth a refresh and another attempt.
    ///
    /// `json` is the response body when it parsed as JSON.
    fn should_retry(
        &self,
        response: &ResponseMeta,
        json: Option<&Value>,
        error: &TransportError,
    ) -> bool;

    /// Refresh whatever the retried requests need, then call
    /// [`RefreshCompletion::complete`].
    ///
    /// Called at most once per burst of failures. The completion may be
    /// moved to another thread or task and completed later.
    fn refresh_for_retry(&self, completion: RefreshCompletion);

    /// Rewrite a request before each attempt, e.g. to attach the current token.
    fn adapt(&self, request: WireRequest) -> WireRequest {
        request
    }
}

type Waiter = Box<dyn FnOnce(RetryDecision) + Send>;

#[derive(Default)]
struct RetryState {
    is_refreshing: bool,
    waiting: Vec<Waiter>,
}

/// Handle for reporting the end of a refresh.
///
/// Dropping it without calling [`complete`](Self::complete) counts as a
/// failed refresh, so waiting requests are never stranded.
#[must_use = "waiting requests stay parked until the refresh is completed"]
pub struct RefreshCompletion {
    state: Option<Arc<Mutex<RetryState>>>,
}

impl RefreshCompletion {
    /// Report the refresh outcome and release every waiting request.
    pub fn complete(mut self, success: bool) {
        if let Some(state) = self.state.take() {
            finish_refresh(&state, success);
        }
    }
}

impl Drop for RefreshCompletion {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            tracing::warn!("refresh completion dropped without a result; treating as failure");
            finish_refresh(&state, false);
        }
    }
}

impl fmt::Debug for RefreshCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshCompletion")
            .field("pending", &self.state.is_some())
            .finish()
    }
}

fn finish_refresh(state: &Mutex<RetryState>, success: bool) {
    let waiting = {
        let mut state = state.lock();
        state.is_refreshing = false;
        std::mem::take(&mut state.waiting)
    };

    let decision = if success {
        tracing::debug!(waiting = waiting.len(), "refresh succeeded; retrying requests");
        RetryDecision::Retry
    } else {
        tracing::warn!(waiting = waiting.len(), "refresh failed; requests will not be retried");
        RetryDecision::DoNotRetry
    };

    // Outside the lock: a waiter may start a new retry cycle right away
    for waiter in waiting {
        waiter(decision);
    }
}

/// Coordinates retries for a session.
///
/// Cheap to clone; clones share the refresh state.
#[derive(Clone)]
pub struct Retrier {
    delegate: Arc<dyn RetrierDelegate>,
    state: Arc<Mutex<RetryState>>,
}

impl Retrier {
    #[must_use]
    pub fn new(delegate: Arc<dyn RetrierDelegate>) -> Self {
        Self {
            delegate,
            state: Arc::new(Mutex::new(RetryState::default())),
        }
    }

    #[must_use]
    pub fn delegate(&self) -> &Arc<dyn RetrierDelegate> {
        &self.delegate
    }

    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        self.state.lock().is_refreshing
    }

    #[must_use]
    pub fn adapt(&self, request: WireRequest) -> WireRequest {
        self.delegate.adapt(request)
    }

    /// Decide whether a failed attempt should be retried.
    ///
    /// `attempt` counts retries already made for this request. The decision
    /// is delivered to `completion`, immediately when the policy declines and
    /// after the shared refresh otherwise. Failures without a response are
    /// never retried.
    pub fn retry(
        &self,
        attempt: usize,
        response: Option<&ResponseMeta>,
        json: Option<&Value>,
        error: &TransportError,
        completion: impl FnOnce(RetryDecision) + Send + 'static,
    ) {
        let Some(response) = response else {
            completion(RetryDecision::DoNotRetry);
            return;
        };
        if attempt >= self.delegate.max_attempts_count()
            || !self.delegate.should_retry(response, json, error)
        {
            completion(RetryDecision::DoNotRetry);
            return;
        }

        let start_refresh = {
            let mut state = self.state.lock();
            state.waiting.push(Box::new(completion));
            !std::mem::replace(&mut state.is_refreshing, true)
        };

        if start_refresh {
            tracing::debug!(attempt, status = %response.status, "starting refresh for retry");
            self.delegate.refresh_for_retry(RefreshCompletion {
                state: Some(self.state.clone()),
            });
        } else {
            tracing::debug!(attempt, "refresh already running; waiting for it");
        }
    }

    /// Async form of [`retry`](Self::retry).
    pub async fn decide(
        &self,
        attempt: usize,
        response: Option<&ResponseMeta>,
        json: Option<&Value>,
        error: &TransportError,
    ) -> RetryDecision {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.retry(attempt, response, json, error, move |decision| {
            // The receiver is gone only if the request was abandoned
            if tx.send(decision).is_err() {
                tracing::trace!("retry decision arrived after the request was dropped");
            }
        });
        rx.await.unwrap_or(RetryDecision::DoNotRetry)
    }
}

impl fmt::Debug for Retrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retrier")
            .field("max_attempts", &self.delegate.max_attempts_count())
            .field("is_refreshing", &self.is_refreshing())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::error::HttpError;
    use http::{HeaderMap, StatusCode};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Retries 401s and parks refresh completions for the test to resolve.
    #[derive(Default)]
    struct Parking {
        refreshes: AtomicUsize,
        pending: Mutex<Vec<RefreshCompletion>>,
    }

    impl RetrierDelegate for Parking {
        fn max_attempts_count(&self) -> usize {
            2
        }

        fn should_retry(&self, response: &ResponseMeta, _: Option<&Value>, _: &TransportError) -> bool {
            response.status == StatusCode::UNAUTHORIZED
        }

        fn refresh_for_retry(&self, completion: RefreshCompletion) {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            self.pending.lock().push(completion);
        }
    }

    fn meta(status: StatusCode) -> ResponseMeta {
        ResponseMeta {
            status,
            headers: HeaderMap::new(),
            url: "https://api.example.com/me".parse().unwrap(),
        }
    }

    fn error() -> TransportError {
        HttpError::Validation {
            status: StatusCode::UNAUTHORIZED,
        }
        .into()
    }

    fn counting(counter: &Arc<AtomicUsize>) -> impl FnOnce(RetryDecision) + Send + 'static {
        let counter = counter.clone();
        move |decision| {
            if decision == RetryDecision::Retry {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn test_concurrent_failures_share_one_refresh() {
        let delegate = Arc::new(Parking::default());
        let retrier = Retrier::new(delegate.clone());
        let retried = Arc::new(AtomicUsize::new(0));

        std::thread::scope(|scope| {
            for _ in 0..8 {
                let retrier = retrier.clone();
                let retried = retried.clone();
                scope.spawn(move || {
                    let unauthorized = meta(StatusCode::UNAUTHORIZED);
                    retrier.retry(0, Some(&unauthorized), None, &error(), counting(&retried));
                });
            }
        });

        assert_eq!(delegate.refreshes.load(Ordering::SeqCst), 1);
        assert!(retrier.is_refreshing());
        assert_eq!(retried.load(Ordering::SeqCst), 0, "nobody resumes before the refresh ends");

        let completion = delegate.pending.lock().pop().unwrap();
        completion.complete(true);

        assert_eq!(retried.load(Ordering::SeqCst), 8);
        assert!(!retrier.is_refreshing());
    }

    #[test]
    fn test_failed_refresh_releases_waiters_without_retry() {
        let delegate = Arc::new(Parking::default());
        let retrier = Retrier::new(delegate.clone());
        let decisions = Arc::new(Mutex::new(Vec::new()));

        for _ in 0..3 {
            let decisions = decisions.clone();
            retrier.retry(0, Some(&meta(StatusCode::UNAUTHORIZED)), None, &error(), move |d| {
                decisions.lock().push(d);
            });
        }
        delegate.pending.lock().pop().unwrap().complete(false);

        assert_eq!(*decisions.lock(), [RetryDecision::DoNotRetry; 3]);
    }

    #[test]
    fn test_dropped_completion_counts_as_failure() {
        let delegate = Arc::new(Parking::default());
        let retrier = Retrier::new(delegate.clone());
        let decisions = Arc::new(Mutex::new(Vec::new()));

        let sink = decisions.clone();
        retrier.retry(0, Some(&meta(StatusCode::UNAUTHORIZED)), None, &error(), move |d| {
            sink.lock().push(d);
        });
        drop(delegate.pending.lock().pop());

        assert_eq!(*decisions.lock(), [RetryDecision::DoNotRetry]);
        assert!(!retrier.is_refreshing());
    }

    #[test]
    fn test_policy_and_attempt_limit_short_circuit() {
        let delegate = Arc::new(Parking::default());
        let retrier = Retrier::new(delegate.clone());
        let retried = Arc::new(AtomicUsize::new(0));

        retrier.retry(0, Some(&meta(StatusCode::FORBIDDEN)), None, &error(), counting(&retried));
        retrier.retry(2, Some(&meta(StatusCode::UNAUTHORIZED)), None, &error(), counting(&retried));
        retrier.retry(0, None, None, &error(), counting(&retried));

        assert_eq!(delegate.refreshes.load(Ordering::SeqCst), 0);
        assert_eq!(retried.load(Ordering::SeqCst), 0);
        assert!(!retrier.is_refreshing());
    }

    #[test]
    fn test_new_cycle_after_refresh_completes() {
        let delegate = Arc::new(Parking::default());
        let retrier = Retrier::new(delegate.clone());
        let retried = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            retrier.retry(0, Some(&meta(StatusCode::UNAUTHORIZED)), None, &error(), counting(&retried));
            delegate.pending.lock().pop().unwrap().complete(true);
        }

        assert_eq!(delegate.refreshes.load(Ordering::SeqCst), 2);
        assert_eq!(retried.load(Ordering::SeqCst), 2);
    }

    /// Completes every refresh synchronously with a fixed outcome.
    struct Immediate(bool);

    impl RetrierDelegate for Immediate {
        fn max_attempts_count(&self) -> usize {
            1
        }

        fn should_retry(&self, _: &ResponseMeta, json: Option<&Value>, _: &TransportError) -> bool {
            json.and_then(|body| body.get("code"))
                .and_then(Value::as_str)
                .is_some_and(|code| code == "token_expired")
        }

        fn refresh_for_retry(&self, completion: RefreshCompletion) {
            completion.complete(self.0);
        }
    }

    #[tokio::test]
    async fn test_decide_uses_json_body() {
        let retrier = Retrier::new(Arc::new(Immediate(true)));
        let expired = serde_json::json!({"code": "token_expired"});
        let other = serde_json::json!({"code": "forbidden"});
        let response = meta(StatusCode::UNAUTHORIZED);

        let first = retrier.decide(0, Some(&response), Some(&expired), &error()).await;
        let second = retrier.decide(0, Some(&response), Some(&other), &error()).await;
        let exhausted = retrier.decide(1, Some(&response), Some(&expired), &error()).await;

        assert_eq!(first, RetryDecision::Retry);
        assert_eq!(second, RetryDecision::DoNotRetry);
        assert_eq!(exhausted, RetryDecision::DoNotRetry);
    }

    #[tokio::test]
    async fn test_decide_after_failed_refresh() {
        let retrier = Retrier::new(Arc::new(Immediate(false)));
        let expired = serde_json::json!({"code": "token_expired"});

        let decision = retrier
            .decide(0, Some(&meta(StatusCode::UNAUTHORIZED)), Some(&expired), &error())
            .await;

        assert_eq!(decision, RetryDecision::DoNotRetry);
    }
}
