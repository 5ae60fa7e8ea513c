use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[cfg(not(test))]
pub fn now_monotonic() -> std::time::Instant {
    std::time::Instant::now()
}

#[cfg(test)]
pub use mock_time::now_monotonic;

/// Offset subtracted from the UNIX epoch so that millisecond timestamps used in transient file
/// names stay short.
const EPOCH_OFFSET: Duration = Duration::from_secs(1_050_000_000);

/// Milliseconds elapsed since [`EPOCH_OFFSET`].
pub fn short_epoch_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.saturating_sub(EPOCH_OFFSET).as_millis())
        .unwrap_or(0)
}

/// Testing utilities for mocking (monotonic) timestamps.
/// Use the `now_monotonic` function if you want to be able to mock the time in tests.
#[cfg(test)]
pub mod mock_time {
    use std::cell::RefCell;
    use std::time::Instant;

    thread_local! {
        static MOCK_TIME: RefCell<Option<Instant>> = const { RefCell::new(None) };
    }

    pub struct MockTime;

    impl MockTime {
        pub fn mock(time: Instant) -> Self {
            MOCK_TIME.with(|cell| {
                assert!(cell.borrow().is_none());
                *cell.borrow_mut() = Some(time);
            });
            MockTime
        }
    }

    impl Drop for MockTime {
        fn drop(&mut self) {
            MOCK_TIME.with(|cell| *cell.borrow_mut() = None);
        }
    }

    pub fn now_monotonic() -> Instant {
        MOCK_TIME.with(|cell| cell.borrow().as_ref().cloned().unwrap_or_else(Instant::now))
    }
}
