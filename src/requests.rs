use std::time::Duration;

use reqwest::{Client, ClientBuilder, Response};

use crate::ratelimit::RateLimiter;

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

pub struct RequestClient {
    client: Client,
    rate_limiter: RateLimiter,
}

impl RequestClient {
    pub fn new(req_per_sec: u32, timeout: Duration) -> anyhow::Result<Self> {
        let client = ClientBuilder::new()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        let rate_limiter = RateLimiter::new(req_per_sec);
        Ok(Self {
            client,
            rate_limiter,
        })
    }

    pub async fn fetch_url_response(&self, url: &str) -> reqwest::Result<Response> {
        // Wait (non-blocking) until we're allowed to make a request according
        // to our self-imposed rate-limiting policy.
        self.rate_limiter.wait_until_ready().await;

        self.client.get(url).send().await?.error_for_status()
    }

    pub async fn fetch_url_body(&self, url: &str) -> reqwest::Result<String> {
        let response = self.fetch_url_response(url).await?;
        response.text().await
    }
}
