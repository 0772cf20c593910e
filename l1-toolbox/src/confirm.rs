//! Bounded confirmation polling.
use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Duration};

use crate::errors::{Error, Result};

/// Exponential backoff between polling attempts.
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
pub struct Backoff {
    #[serde(with = "millis")]
    pub initial: Duration,
    #[serde(with = "millis")]
    pub max: Duration,
    pub multiplier: u32,
    pub max_attempts: usize,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::default()
    }
}

impl Backoff {
    pub fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(15),
            multiplier: 2,
            max_attempts: 20,
        }
    }

    /// Returns the delay slept after the "attempt"-th failed poll (0-based).
    pub fn delay(&self, attempt: usize) -> Duration {
        let mut d = self.initial;
        for _ in 0..attempt {
            d = d.saturating_mul(self.multiplier);
            if d >= self.max {
                return self.max;
            }
        }
        d.min(self.max)
    }
}

/// Calls "f" until it yields a value, sleeping with backoff in between.
/// Errors from "f" that are retryable count as a missed attempt.
pub async fn poll<T, F, Fut>(what: &str, backoff: &Backoff, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    for attempt in 0..backoff.max_attempts {
        match f().await {
            Ok(Some(v)) => {
                log::info!("{what} confirmed after {} attempt(s)", attempt + 1);
                return Ok(v);
            }
            Ok(None) => {
                log::debug!("{what} not ready yet (attempt {})", attempt + 1);
            }
            Err(e) if e.is_retryable() => {
                log::warn!("{what} poll failed (attempt {}): {e}", attempt + 1);
            }
            Err(e) => return Err(e),
        }
        if attempt + 1 < backoff.max_attempts {
            sleep(backoff.delay(attempt)).await;
        }
    }
    Err(Error::Timeout {
        what: what.to_string(),
        attempts: backoff.max_attempts,
    })
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use tokio::time::Duration;

    pub fn serialize<S>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- confirm::test_delay --exact --show-output
#[test]
fn test_delay() {
    let b = Backoff {
        initial: Duration::from_millis(100),
        max: Duration::from_millis(1000),
        multiplier: 2,
        max_attempts: 10,
    };
    assert_eq!(b.delay(0), Duration::from_millis(100));
    assert_eq!(b.delay(1), Duration::from_millis(200));
    assert_eq!(b.delay(3), Duration::from_millis(800));
    assert_eq!(b.delay(4), Duration::from_millis(1000));
    assert_eq!(b.delay(50), Duration::from_millis(1000));
}

/// RUST_LOG=debug cargo test --package l1-toolbox --lib -- confirm::test_poll --exact --show-output
#[tokio::test]
async fn test_poll() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let _ = env_logger::builder().is_test(true).try_init();

    let b = Backoff {
        initial: Duration::from_millis(1),
        max: Duration::from_millis(2),
        multiplier: 2,
        max_attempts: 5,
    };

    let calls = AtomicUsize::new(0);
    let v = poll("ready on third", &b, || {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        async move {
            if n == 2 {
                Ok(Some(n))
            } else {
                Ok(None)
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(v, 2);

    let err = poll("never", &b, || async { Ok::<Option<u8>, Error>(None) })
        .await
        .unwrap_err();
    match err {
        Error::Timeout { what, attempts } => {
            assert_eq!(what, "never");
            assert_eq!(attempts, 5);
        }
        other => panic!("unexpected {other}"),
    }

    let err = poll("fatal", &b, || async {
        Err::<Option<u8>, Error>(Error::Validation(String::from("bad")))
    })
    .await
    .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}
