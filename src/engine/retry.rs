use {
    log::*,
    std::{
        fmt::Display,
        future::Future,
        sync::atomic::{AtomicBool, Ordering},
    },
    tokio::time::{sleep, Duration, Instant},
};

/// Longest stretch a background task sleeps before looking at its exit flag.
pub const EXIT_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Keep calling `call` until it succeeds, sleeping `delay` after every failure.
///
/// Only meant for cluster queries that are expected to eventually succeed, so
/// there is no attempt limit and no error is ever returned.
pub async fn endless_retry<T, E, F, Fut>(name: &str, delay: Duration, mut call: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Display,
{
    loop {
        match call().await {
            Ok(value) => return value,
            Err(err) => {
                warn!("Request {} failed, retrying: {}", name, err);
                sleep(delay).await;
            }
        }
    }
}

/// Sleep for `duration` in slices of at most [`EXIT_CHECK_INTERVAL`].
/// Returns `false` as soon as `exit` is seen set, `true` once the full
/// duration has elapsed.
pub async fn sleep_unless_exit(duration: Duration, exit: &AtomicBool) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if exit.load(Ordering::Relaxed) {
            return false;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return true;
        }
        sleep(remaining.min(EXIT_CHECK_INTERVAL)).await;
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        std::sync::{atomic::AtomicUsize, Arc},
    };

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let attempts = AtomicUsize::new(0);
        let counter = &attempts;
        let start = Instant::now();
        let value = endless_retry("flaky", Duration::from_millis(500), move || async move {
            if counter.fetch_add(1, Ordering::Relaxed) < 3 {
                Err("unavailable")
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(value, 42);
        assert_eq!(attempts.load(Ordering::Relaxed), 4);
        assert_eq!(start.elapsed(), Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_success_does_not_sleep() {
        let start = Instant::now();
        let value: u64 = endless_retry("steady", Duration::from_millis(500), || async {
            Ok::<_, String>(7)
        })
        .await;
        assert_eq!(value, 7);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_runs_full_duration() {
        let exit = AtomicBool::new(false);
        let start = Instant::now();
        assert!(sleep_unless_exit(Duration::from_secs(300), &exit).await);
        assert_eq!(start.elapsed(), Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_wakes_on_exit() {
        let exit = Arc::new(AtomicBool::new(false));
        let setter = {
            let exit = exit.clone();
            tokio::spawn(async move {
                sleep(Duration::from_secs(1)).await;
                exit.store(true, Ordering::Relaxed);
            })
        };

        let start = Instant::now();
        assert!(!sleep_unless_exit(Duration::from_secs(300), &exit).await);
        assert!(start.elapsed() <= Duration::from_secs(1) + EXIT_CHECK_INTERVAL);
        setter.await.unwrap();

        // Already set: no sleep at all
        let start = Instant::now();
        assert!(!sleep_unless_exit(Duration::from_secs(300), &exit).await);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
