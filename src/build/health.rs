//! HTTP health probe run after a rebuild.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::{AppError, Result};

/// Probes a URL and reports the HTTP status code.
pub trait HealthProbe: Send + Sync {
    /// Issue one probe against `url`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Timeout` when the probe exceeds its bound and
    /// `AppError::Transport` when the service is unreachable.
    fn probe<'a>(&'a self, url: &'a str)
        -> Pin<Box<dyn Future<Output = Result<u16>> + Send + 'a>>;
}

/// `reqwest`-backed probe.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: reqwest::Client,
}

impl HttpHealthProbe {
    /// Build a probe whose requests give up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the HTTP client cannot be constructed.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AppError::Config(format!("failed to build health client: {err}")))?;
        Ok(Self { client })
    }
}

impl HealthProbe for HttpHealthProbe {
    fn probe<'a>(
        &'a self,
        url: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<u16>> + Send + 'a>> {
        Box::pin(async move {
            let response = self.client.get(url).send().await.map_err(|err| {
                if err.is_timeout() {
                    AppError::Timeout(format!("health probe {url}: {err}"))
                } else {
                    AppError::Transport(format!("health probe {url}: {err}"))
                }
            })?;
            Ok(response.status().as_u16())
        })
    }
}
