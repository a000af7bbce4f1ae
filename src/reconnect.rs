//! Reconnection policy and the supervised retry loop for first-time connects
//!
//! Long-running workers never give up; request-driven services fail fast on the
//! initial connect so an orchestrator can restart them.

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use crate::Result;

/// How many connection attempts a policy allows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempts {
    Forever,
    Limited(usize),
}

impl Attempts {
    /// Limit in the form the NATS client expects (`None` = unbounded)
    pub fn limit(self) -> Option<usize> {
        match self {
            Attempts::Forever => None,
            Attempts::Limited(n) => Some(n),
        }
    }

    fn allows_another_after(self, attempts_made: usize) -> bool {
        match self {
            Attempts::Forever => true,
            Attempts::Limited(n) => attempts_made < n,
        }
    }
}

/// Delay between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    Exponential { initial: Duration, max: Duration },
}

impl Backoff {
    /// Delay after `attempt` failed attempts (0-based)
    pub fn delay(&self, attempt: usize) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { initial, max } => {
                let shift = u32::try_from(attempt).unwrap_or(u32::MAX);
                1u32.checked_shl(shift)
                    .and_then(|factor| initial.checked_mul(factor))
                    .map_or(max, |delay| delay.min(max))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Attempts for the very first connection
    pub initial: Attempts,
    /// Reconnect attempts after an established connection drops
    pub steady: Attempts,
    pub backoff: Backoff,
}

impl ReconnectPolicy {
    /// Policy for workers: retry forever, every 2 seconds
    pub fn never_give_up() -> Self {
        Self {
            initial: Attempts::Forever,
            steady: Attempts::Forever,
            backoff: Backoff::Fixed(Duration::from_secs(2)),
        }
    }

    /// Policy for services: one initial attempt, bounded reconnects afterwards
    pub fn fail_fast() -> Self {
        Self {
            initial: Attempts::Limited(1),
            steady: Attempts::Limited(60),
            backoff: Backoff::Exponential {
                initial: Duration::from_millis(250),
                max: Duration::from_secs(5),
            },
        }
    }

    pub fn gives_up(&self) -> bool {
        self.initial != Attempts::Forever
    }
}

/// Run `connect` until it succeeds or the policy's initial attempts run out.
///
/// `connect` receives the 1-based attempt number.
pub async fn connect_with_policy<T, F, Fut>(policy: &ReconnectPolicy, mut connect: F) -> Result<T>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0usize;

    loop {
        attempt += 1;

        match connect(attempt).await {
            Ok(connection) => {
                if attempt > 1 {
                    info!(attempt, "Connected after retrying");
                }
                return Ok(connection);
            }
            Err(e) => {
                if !policy.initial.allows_another_after(attempt) {
                    warn!(attempt, error = %e, "Giving up on initial connection");
                    return Err(e);
                }

                let delay = policy.backoff.delay(attempt - 1);
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Connection attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NyftError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_fixed_backoff_is_constant() {
        let backoff = Backoff::Fixed(Duration::from_secs(2));
        assert_eq!(backoff.delay(0), Duration::from_secs(2));
        assert_eq!(backoff.delay(50), Duration::from_secs(2));
    }

    #[test]
    fn test_exponential_backoff_doubles_and_caps() {
        let backoff = Backoff::Exponential {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(1),
        };
        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(200));
        assert_eq!(backoff.delay(3), Duration::from_millis(800));
        assert_eq!(backoff.delay(4), Duration::from_secs(1));
        assert_eq!(backoff.delay(usize::MAX), Duration::from_secs(1));
    }

    #[test]
    fn test_attempt_limits() {
        assert_eq!(Attempts::Forever.limit(), None);
        assert_eq!(Attempts::Limited(60).limit(), Some(60));
        assert!(!ReconnectPolicy::never_give_up().gives_up());
        assert!(ReconnectPolicy::fail_fast().gives_up());
    }

    #[tokio::test]
    async fn test_fail_fast_makes_a_single_attempt() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = connect_with_policy(&ReconnectPolicy::fail_fast(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(NyftError::Transport("connection refused".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_give_up_retries_until_success() {
        let result = connect_with_policy(&ReconnectPolicy::never_give_up(), |attempt| async move {
            if attempt < 5 {
                Err(NyftError::Transport("connection refused".to_string()))
            } else {
                Ok(attempt)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 5);
    }
}
