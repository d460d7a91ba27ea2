//! Shared helpers for integration tests

#![allow(dead_code)]

pub mod fake_host;

use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};

/// Retry an async check until it returns `Ok` or the timeout elapses
///
/// Avoids fixed sleeps in tests that wait on background tasks.
pub async fn assert_eventually<F, Fut, T, E>(
    desc: &str,
    timeout: Duration,
    interval: Duration,
    mut f: F,
) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let start = Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match f().await {
            Ok(value) => return value,
            Err(e) => {
                let elapsed = start.elapsed();
                if elapsed >= timeout {
                    panic!(
                        "Timeout waiting for {}\n\
                         Duration: {:?}\n\
                         Attempts: {}\n\
                         Last error: {}",
                        desc, elapsed, attempt, e
                    );
                }
                tokio::time::sleep(interval).await;
            }
        }
    }
}

/// Boolean flavor of [`assert_eventually`]
pub async fn assert_eventually_bool<F, Fut>(desc: &str, timeout: Duration, mut f: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    assert_eventually(desc, timeout, Duration::from_millis(20), || {
        let fut = f();
        async move {
            if fut.await {
                Ok(())
            } else {
                Err("condition still false")
            }
        }
    })
    .await
}
