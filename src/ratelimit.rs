use governor::{
    Quota, RateLimiter as GovernorRateLimiter,
    clock::{QuantaClock, QuantaInstant},
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
};
use nonzero_ext::nonzero;
use std::{num::NonZeroU32, time::Duration};

// The upstream search page starts serving captchas well below this.
const DEFAULT_REQ_PER_SEC: NonZeroU32 = nonzero!(5u32);
// No two navigations closer than this.
const MS_BETWEEN_REQ: Duration = Duration::from_millis(100);

type SpecificGovernorRateLimiter =
    GovernorRateLimiter<NotKeyed, InMemoryState, QuantaClock, NoOpMiddleware<QuantaInstant>>;

pub struct RateLimiter {
    req_per_sec: SpecificGovernorRateLimiter,
    ms_between_req: SpecificGovernorRateLimiter,
}

impl RateLimiter {
    pub fn new(req_per_sec: u32) -> Self {
        let req_per_sec = NonZeroU32::new(req_per_sec).unwrap_or(DEFAULT_REQ_PER_SEC);

        // Limit to X total req/sec on average.
        let per_sec = GovernorRateLimiter::direct(Quota::per_second(req_per_sec));

        // Limit to one request every Y ms.
        let spacing = GovernorRateLimiter::direct(
            Quota::with_period(MS_BETWEEN_REQ).unwrap_or_else(|| Quota::per_second(req_per_sec)),
        );

        RateLimiter {
            req_per_sec: per_sec,
            ms_between_req: spacing,
        }
    }

    pub async fn wait_until_ready(&self) {
        // Order matters: clearing the per-second budget first keeps a burst of
        // waiters from crossing the spacing limiter together once it opens.
        self.req_per_sec.until_ready().await;
        self.ms_between_req.until_ready().await;
    }
}
