//! Bounded-backoff polling over master operations.
//!
//! [`poll_until`] is the one polling loop in the system, built on the
//! `backon` exponential backoff. An attempt reports "done" (`Ok(Some)`),
//! "not yet" (`Ok(None)`), or a master error; retryable master failures
//! (`NotLeader`, `NotReady`, `ServiceUnavailable`) are treated the same as
//! "not yet", since a restarting or re-electing master is exactly the
//! window polling is meant to ride out.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use backon::{ExponentialBuilder, Retryable};

use quarry_master::MasterService;
use quarry_types::{MasterError, TabletId};
use quarry_wire::admin::{
    GetTabletLocationsRequest, IsCreateTableDoneRequest, TabletLocations,
};

use crate::error::{ClientError, Result};

/// Backoff schedule and attempt budget for one polling call.
#[derive(Debug, Clone, PartialEq, bon::Builder)]
pub struct PollPolicy {
    /// Delay before the second attempt.
    #[builder(default = Duration::from_millis(1))]
    pub initial_backoff: Duration,
    /// Backoff growth per attempt.
    #[builder(default = 1.25)]
    pub multiplier: f32,
    /// Backoff cap.
    #[builder(default = Duration::from_secs(1))]
    pub max_backoff: Duration,
    /// Total attempts before [`ClientError::Timeout`].
    #[builder(default = 80)]
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Why an attempt did not produce a value.
#[derive(Debug)]
enum PollAttempt {
    NotYet,
    Failed(MasterError),
}

/// Polls `op` under the policy until it yields a value.
///
/// `op` returns `Ok(Some(value))` when the awaited condition holds,
/// `Ok(None)` to keep polling, or a [`MasterError`]. Retryable master
/// errors keep polling; definitive ones abort immediately.
///
/// # Errors
///
/// - [`ClientError::Timeout`] when the attempt budget is exhausted.
/// - [`ClientError::Master`] on a non-retryable master failure.
pub async fn poll_until<T, F, Fut>(policy: &PollPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<Option<T>, MasterError>>,
{
    let started = Instant::now();
    // First attempt plus one per retry notification.
    let attempts = AtomicU32::new(1);

    let backoff = ExponentialBuilder::new()
        .with_min_delay(policy.initial_backoff)
        .with_max_delay(policy.max_backoff)
        .with_factor(policy.multiplier)
        .with_max_times(policy.max_attempts.saturating_sub(1) as usize);

    let result = (|| {
        let attempt = op();
        async move {
            match attempt.await {
                Ok(Some(value)) => Ok(value),
                Ok(None) => Err(PollAttempt::NotYet),
                Err(source) => Err(PollAttempt::Failed(source)),
            }
        }
    })
    .retry(backoff)
    .sleep(tokio::time::sleep)
    .when(|err| match err {
        PollAttempt::NotYet => true,
        PollAttempt::Failed(source) => source.is_retryable(),
    })
    .notify(|err, dur: Duration| {
        let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(attempt, backoff_ms = dur.as_millis() as u64, outcome = ?err, "Polling again");
    })
    .await;

    result.map_err(|err| match err {
        PollAttempt::Failed(source) if !source.is_retryable() => ClientError::Master { source },
        _ => ClientError::Timeout {
            attempts: attempts.load(Ordering::Relaxed),
            waited: started.elapsed(),
        },
    })
}

/// Waits until a table's asynchronous creation has completed.
///
/// # Errors
///
/// [`ClientError::Timeout`] if the budget runs out first, or
/// [`ClientError::Master`] for definitive failures such as `NotFound`.
pub async fn wait_for_create_table_done(
    service: &MasterService,
    name: &str,
    policy: &PollPolicy,
) -> Result<()> {
    poll_until(policy, || async {
        let resp = service
            .is_create_table_done(IsCreateTableDoneRequest { name: name.to_string() })
            .await?;
        Ok(resp.done.then_some(()))
    })
    .await
}

/// Waits until a tablet has exactly `expected` known replicas.
///
/// # Errors
///
/// [`ClientError::Timeout`] if the budget runs out first, or
/// [`ClientError::Master`] for definitive failures such as `NotFound`.
pub async fn wait_for_replica_count(
    service: &MasterService,
    tablet_id: TabletId,
    expected: usize,
    policy: &PollPolicy,
) -> Result<TabletLocations> {
    poll_until(policy, || async {
        let resp =
            service.get_tablet_locations(GetTabletLocationsRequest { tablet_id }).await?;
        let locations = resp.locations;
        Ok((locations.replicas.len() == expected).then_some(locations))
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn fast_policy(max_attempts: u32) -> PollPolicy {
        PollPolicy::builder()
            .initial_backoff(Duration::from_micros(100))
            .max_backoff(Duration::from_millis(2))
            .max_attempts(max_attempts)
            .build()
    }

    #[tokio::test]
    async fn test_immediate_success() {
        let value: u32 =
            poll_until(&fast_policy(5), || async { Ok(Some(42)) }).await.expect("first attempt");
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_success_after_retries() {
        let calls = AtomicU32::new(0);
        let value = poll_until(&fast_policy(10), || async {
            let n = calls.fetch_add(1, Ordering::Relaxed) + 1;
            Ok((n >= 4).then_some(n))
        })
        .await
        .expect("fourth attempt succeeds");
        assert_eq!(value, 4);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_times_out() {
        let err = poll_until::<u32, _, _>(&fast_policy(3), || async { Ok(None) })
            .await
            .expect_err("never done");
        match err {
            ClientError::Timeout { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected timeout, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_retryable_master_error_keeps_polling() {
        let calls = AtomicU32::new(0);
        let value = poll_until(&fast_policy(10), || async {
            let n = calls.fetch_add(1, Ordering::Relaxed) + 1;
            if n < 3 { Err(MasterError::NotReady) } else { Ok(Some(n)) }
        })
        .await
        .expect("succeeds once master is ready");
        assert_eq!(value, 3);
    }

    #[tokio::test]
    async fn test_definitive_error_aborts() {
        let calls = AtomicU32::new(0);
        let err = poll_until::<u32, _, _>(&fast_policy(10), || async {
            calls.fetch_add(1, Ordering::Relaxed);
            Err(MasterError::NotFound { entity: "table", id: "missing".to_string() })
        })
        .await
        .expect_err("definitive failure");
        assert!(matches!(err, ClientError::Master { .. }));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_persistent_not_leader_times_out() {
        let err = poll_until::<u32, _, _>(&fast_policy(4), || async {
            Err(MasterError::NotLeader)
        })
        .await
        .expect_err("gate never opens");
        assert!(matches!(err, ClientError::Timeout { .. }));
    }
}
