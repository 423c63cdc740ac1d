//! Shared JSON-over-HTTP plumbing for REST and JSON-RPC sources

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

use crate::error::SourceError;
use crate::retry::RetryPolicy;

/// reqwest client with a per-call timeout and a retry policy
#[derive(Debug, Clone)]
pub struct JsonHttp {
    client: reqwest::Client,
    retry: RetryPolicy,
    timeout: Duration,
}

impl JsonHttp {
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("riskoracle/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            retry,
            timeout,
        })
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }

    /// GET `url` with query params and decode the JSON body
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        source: &str,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, SourceError> {
        let this = self;
        self.retry
            .run(source, move |_| async move {
                let response = this
                    .client
                    .get(url)
                    .query(query)
                    .send()
                    .await
                    .map_err(|e| SourceError::from_reqwest(source, e, this.timeout_ms()))?;

                let status = response.status();
                if !status.is_success() {
                    return Err(SourceError::HttpStatus {
                        source_name: source.to_string(),
                        status: status.as_u16(),
                    });
                }

                response
                    .json::<T>()
                    .await
                    .map_err(|e| SourceError::invalid(source, e.to_string()))
            })
            .await
    }

    /// POST a JSON body to `url` and decode the JSON response
    pub async fn post_json<B, T>(&self, source: &str, url: &str, body: &B) -> Result<T, SourceError>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let this = self;
        self.retry
            .run(source, move |_| async move {
                let response = this
                    .client
                    .post(url)
                    .json(body)
                    .send()
                    .await
                    .map_err(|e| SourceError::from_reqwest(source, e, this.timeout_ms()))?;

                let status = response.status();
                if !status.is_success() {
                    return Err(SourceError::HttpStatus {
                        source_name: source.to_string(),
                        status: status.as_u16(),
                    });
                }

                response
                    .json::<T>()
                    .await
                    .map_err(|e| SourceError::invalid(source, e.to_string()))
            })
            .await
    }
}
