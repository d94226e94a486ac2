//! Cached `Date` header values.
//!
//! Formatting an IMF-fixdate on every response is wasteful, so the last
//! formatted value is shared through an `ArcSwap` and replaced once it is older
//! than the refresh interval. Refreshing happens lazily on the response path,
//! there is no background task.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use bytes::Bytes;
use http::HeaderValue;
use once_cell::sync::Lazy;
use tracing::error;

const REFRESH_INTERVAL: Duration = Duration::from_millis(800);

/// Caches the formatted `Date` header value, refreshed at most every 800ms.
pub struct DateService {
    current: ArcSwap<CachedDate>,
    refresh_interval: Duration,
}

struct CachedDate {
    formatted_at: Instant,
    value: Bytes,
}

static DATE_SERVICE: Lazy<DateService> = Lazy::new(|| DateService::with_refresh_interval(REFRESH_INTERVAL));

impl DateService {
    /// The process wide instance.
    pub fn global() -> &'static DateService {
        &DATE_SERVICE
    }

    fn with_refresh_interval(refresh_interval: Duration) -> Self {
        Self { current: ArcSwap::from_pointee(CachedDate::now()), refresh_interval }
    }

    /// The current date, formatted for the `Date` header.
    pub fn http_date(&self) -> Option<HeaderValue> {
        let mut cached = self.current.load_full();
        if cached.formatted_at.elapsed() >= self.refresh_interval {
            cached = Arc::new(CachedDate::now());
            self.current.store(Arc::clone(&cached));
        }

        match HeaderValue::from_maybe_shared(cached.value.clone()) {
            Ok(value) => Some(value),
            Err(e) => {
                error!(cause = %e, "formatted http date is not a valid header value");
                None
            }
        }
    }
}

impl CachedDate {
    fn now() -> Self {
        let mut buf = faf_http_date::get_date_buff_no_key();
        faf_http_date::get_date_no_key(&mut buf);
        Self { formatted_at: Instant::now(), value: Bytes::from_owner(buf) }
    }
}
