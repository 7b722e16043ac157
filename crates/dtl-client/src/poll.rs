//! Polling long-running Azure operations
//!
//! [`poll_until`] repeatedly runs a check until it reports a result, sleeping
//! between attempts according to a [`PollPolicy`]. The wait can be bounded by a
//! timeout and aborted through a [`CancellationToken`].

use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ClientError;
use crate::http::{HttpRequest, HttpResponse, Transport};

/// Interval used by Azure samples when waiting on deployments.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// How often to poll and for how long.
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// Factor applied to the interval after every pending check. `1.0` keeps it fixed.
    pub multiplier: f64,
    pub max_interval: Duration,
    /// Give up once this much time has passed. `None` waits forever.
    pub timeout: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_POLL_INTERVAL)
    }
}

impl PollPolicy {
    pub fn fixed(interval: Duration) -> Self {
        Self {
            interval,
            multiplier: 1.0,
            max_interval: interval,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, multiplier: f64, max_interval: Duration) -> Self {
        self.multiplier = multiplier.max(1.0);
        self.max_interval = max_interval.max(self.interval);
        self
    }

    fn next_interval(&self, current: Duration) -> Duration {
        current.mul_f64(self.multiplier).min(self.max_interval)
    }
}

/// What a single check observed.
#[derive(Debug)]
pub enum PollStatus<T> {
    Done(T),
    Pending,
}

/// Run `check` until it returns [`PollStatus::Done`].
///
/// The first check runs immediately; later ones follow a sleep. A check error
/// ends the wait and is returned as is.
pub async fn poll_until<T, F, Fut>(
    policy: &PollPolicy,
    cancel: &CancellationToken,
    mut check: F,
) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollStatus<T>, ClientError>>,
{
    let started = Instant::now();
    let mut interval = policy.interval;
    let mut attempt: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }

        attempt += 1;
        let status = tokio::select! {
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            status = check() => status?,
        };
        if let PollStatus::Done(value) = status {
            debug!(attempt, "poll finished");
            return Ok(value);
        }

        let mut sleep_for = interval;
        if let Some(timeout) = policy.timeout {
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(ClientError::PollTimeout { elapsed });
            }
            sleep_for = sleep_for.min(timeout - elapsed);
        }

        debug!(attempt, sleep_secs = sleep_for.as_secs_f64(), "still pending");
        tokio::select! {
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            _ = tokio::time::sleep(sleep_for) => {}
        }
        interval = policy.next_interval(interval);
    }
}

/// Terminal result of an asynchronous operation tracked via its status URL.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutcome {
    Succeeded(Value),
    Failed(Value),
}

/// Poll an operation status request, typically a GET of a `Location` header,
/// until `succeeded` or `failed` matches the returned body.
///
/// Transient failures and unparsable bodies count as still pending; see
/// `status_body`.
pub async fn wait_for_operation<S, F>(
    transport: &dyn Transport,
    status_request: &HttpRequest,
    policy: &PollPolicy,
    cancel: &CancellationToken,
    succeeded: S,
    failed: F,
) -> Result<OperationOutcome, ClientError>
where
    S: Fn(&Value) -> bool,
    F: Fn(&Value) -> bool,
{
    let (succeeded, failed) = (&succeeded, &failed);
    poll_until(policy, cancel, || async move {
        let body = status_body(transport.execute(status_request.clone()).await)?;

        Ok(match body {
            Some(body) if succeeded(&body) => PollStatus::Done(OperationOutcome::Succeeded(body)),
            Some(body) if failed(&body) => PollStatus::Done(OperationOutcome::Failed(body)),
            _ => PollStatus::Pending,
        })
    })
    .await
}

/// The JSON body of a status request, or `None` when the answer is worth
/// waiting for.
///
/// Transport failures, 408, 429 and 5xx responses and unparsable bodies are
/// `None`. Any other non-2xx status ends the wait with an error.
pub(crate) fn status_body(
    result: Result<HttpResponse, ClientError>,
) -> Result<Option<Value>, ClientError> {
    match result {
        Ok(resp) if resp.is_success() => Ok(resp.json()),
        Ok(resp) if resp.is_transient() || !(400..500).contains(&resp.status) => {
            debug!(status = resp.status, "status request not answered yet");
            Ok(None)
        }
        Ok(resp) => {
            resp.error_for_status()?;
            Ok(None)
        }
        Err(e) => {
            debug!(error = %e, "status request failed");
            Ok(None)
        }
    }
}

/// Matches `{"status": "<expected>"}`, ignoring case.
pub fn status_is(expected: &'static str) -> impl Fn(&Value) -> bool {
    move |body| {
        body.get("status")
            .and_then(Value::as_str)
            .is_some_and(|s| s.eq_ignore_ascii_case(expected))
    }
}
